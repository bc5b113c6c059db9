//! Notifications from the publisher

use std::time::Duration;

use super::state::PublisherState;
use crate::error::ConnectReason;

/// Delivered on the receiver returned by [`Publisher::new`](super::Publisher::new).
///
/// Events are best-effort: if the receiver falls far behind, newer events
/// are dropped rather than stalling the control loop. Status snapshots are
/// always current.
#[derive(Debug, Clone, PartialEq)]
pub enum PublisherEvent {
    StateChanged(PublisherState),

    /// `start_stream` began connecting
    ConnectionStarted,

    /// Publishing confirmed by the server
    ConnectionSuccess,

    ConnectionFailed { kind: ConnectReason, message: String },

    Reconnecting { attempt: u32, delay: Duration },

    /// Session ended by `stop_stream` or `shutdown`
    Disconnected,

    CongestionChanged(bool),

    /// Outbound bits/sec
    BitrateChanged(u64),

    /// Reconnects exhausted; emitted once per lost session
    StreamLost { attempts: u32, message: String },
}
