//! Status snapshot

use super::state::PublisherState;
use crate::settings::{AudioInputType, VideoOrientation, VideoSettings};

/// Read-only view published by the control loop after every change
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PublisherStatus {
    pub state: PublisherState,
    pub is_streaming: bool,
    pub is_on_preview: bool,
    pub is_audio_prepared: bool,
    pub is_video_prepared: bool,
    pub is_audio_muted: bool,
    /// Only ever set while streaming
    pub has_congestion: bool,
    pub publish_url: String,
    pub video_settings: VideoSettings,
    pub audio_input: AudioInputType,
    pub orientation: VideoOrientation,
}
