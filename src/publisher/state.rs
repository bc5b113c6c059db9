//! Publisher lifecycle state

use std::fmt;

/// ```text
/// Idle -> PreviewReady -> Starting -> Streaming -> Stopping -> Idle
///                                        |  ^
///                                        v  |
///                                    Reconnecting -> Idle (stream lost)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PublisherState {
    #[default]
    Idle,
    /// Source capturing, codecs prepared, nothing sent
    PreviewReady,
    /// Connecting and publishing
    Starting,
    Streaming,
    /// Socket lost, retrying with backoff
    Reconnecting,
    /// Draining and closing the session
    Stopping,
}

impl PublisherState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublisherState::Idle => "idle",
            PublisherState::PreviewReady => "preview_ready",
            PublisherState::Starting => "starting",
            PublisherState::Streaming => "streaming",
            PublisherState::Reconnecting => "reconnecting",
            PublisherState::Stopping => "stopping",
        }
    }

    /// A stream session is live
    pub fn is_streaming(&self) -> bool {
        matches!(self, PublisherState::Streaming | PublisherState::Reconnecting)
    }

    /// The source is capturing
    pub fn is_on_preview(&self) -> bool {
        !matches!(self, PublisherState::Idle)
    }
}

impl fmt::Display for PublisherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
