//! Connection management
//!
//! - [`establish`]: dial and run the publish exchange under `connect_timeout`
//! - [`manager::ConnectionWorker`]: socket task of a stream session
//! - [`backoff`]: reconnect schedule
//! - [`congestion`]: send-buffer hysteresis

pub mod backoff;
pub mod congestion;
pub(crate) mod manager;

pub use backoff::ReconnectPolicy;
pub use congestion::{CongestionConfig, CongestionMonitor, QueuedBytes};

use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::client::{Dialer, PublishedConnection, RtmpConnector, StreamTarget};
use crate::config::ConnectionConfig;
use crate::error::{ConnectReason, Error, Result};

/// Events a stream session reports to the control loop
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SessionEvent {
    Congestion(bool),
    Bitrate(u64),
    Reconnecting { attempt: u32, delay: Duration },
    Reconnected,
    Lost { attempts: u32, message: String },
}

/// Open a transport and publish on it.
///
/// Dialing and the RTMP exchange share one deadline. Failures come back as
/// [`Error::Connection`].
pub(crate) async fn establish(
    dialer: &dyn Dialer,
    target: &StreamTarget,
    config: &ConnectionConfig,
) -> Result<PublishedConnection> {
    let deadline = Instant::now() + config.connect_timeout;

    let stream = match timeout_at(deadline, dialer.dial(target)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(Error::connection(ConnectReason::Unreachable, e.to_string())),
        Err(_) => {
            return Err(Error::connection(
                ConnectReason::Unreachable,
                format!("{} did not answer in time", target.host()),
            ))
        }
    };

    match timeout_at(deadline, RtmpConnector::publish(stream, target, config)).await {
        Ok(result) => result.map_err(Error::into_connect_failure),
        Err(_) => Err(Error::connection(
            ConnectReason::HandshakeTimeout,
            format!("publish not confirmed within {:?}", config.connect_timeout),
        )),
    }
}

/// [`establish`], abandoned as soon as `interrupt` fires
pub(crate) async fn establish_interruptible(
    dialer: &dyn Dialer,
    target: &StreamTarget,
    config: &ConnectionConfig,
    interrupt: &CancellationToken,
) -> Result<PublishedConnection> {
    tokio::select! {
        biased;
        _ = interrupt.cancelled() => {
            Err(Error::connection(ConnectReason::Aborted, "stopped while connecting"))
        }
        result = establish(dialer, target, config) => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BoxedStream;
    use async_trait::async_trait;
    use std::io;

    struct RefusingDialer;

    #[async_trait]
    impl Dialer for RefusingDialer {
        async fn dial(&self, _target: &StreamTarget) -> io::Result<BoxedStream> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        }
    }

    /// Accepts the transport but the peer never speaks
    struct SilentDialer;

    #[async_trait]
    impl Dialer for SilentDialer {
        async fn dial(&self, _target: &StreamTarget) -> io::Result<BoxedStream> {
            let (client, server) = tokio::io::duplex(64 * 1024);
            // Keep the far end open so reads pend instead of hitting EOF
            std::mem::forget(server);
            Ok(Box::new(client))
        }
    }

    fn target() -> StreamTarget {
        StreamTarget::parse("rtmp://example.com/live/key").unwrap()
    }

    #[tokio::test]
    async fn test_refused_is_unreachable() {
        let err = establish(&RefusingDialer, &target(), &ConnectionConfig::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err.connect_reason(), Some(ConnectReason::Unreachable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out() {
        let config = ConnectionConfig::default().connect_timeout(Duration::from_secs(2));
        let err = establish(&SilentDialer, &target(), &config).await.err().unwrap();
        assert_eq!(err.connect_reason(), Some(ConnectReason::HandshakeTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_aborts() {
        let token = CancellationToken::new();
        token.cancel();
        let config = ConnectionConfig::default();
        let err = establish_interruptible(&SilentDialer, &target(), &config, &token)
            .await
            .err()
            .unwrap();
        assert_eq!(err.connect_reason(), Some(ConnectReason::Aborted));
    }
}
