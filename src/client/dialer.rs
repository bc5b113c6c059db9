//! Transport seam
//!
//! The publisher never opens sockets itself; it asks a [`Dialer`] for a byte
//! stream. [`TcpDialer`] covers plain `rtmp://`. A TLS dialer for `rtmps://`
//! or an in-memory dialer for tests can be plugged in the same way.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use super::target::{Scheme, StreamTarget};

/// Bidirectional byte stream carrying one RTMP connection
pub trait RtmpStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RtmpStream for T {}

pub type BoxedStream = Box<dyn RtmpStream>;

#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Open a transport to `target`. Errors here are reported as unreachable.
    async fn dial(&self, target: &StreamTarget) -> io::Result<BoxedStream>;
}

/// Plain TCP
#[derive(Debug, Clone)]
pub struct TcpDialer {
    nodelay: bool,
}

impl TcpDialer {
    pub fn new(nodelay: bool) -> Self {
        Self { nodelay }
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, target: &StreamTarget) -> io::Result<BoxedStream> {
        if target.scheme() == Scheme::Rtmps {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "rtmps:// needs a TLS dialer",
            ));
        }
        let stream = TcpStream::connect((target.host(), target.port())).await?;
        stream.set_nodelay(self.nodelay)?;
        tracing::debug!(host = %target.host(), port = target.port(), "TCP connected");
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rtmps_refused_without_tls() {
        let target = StreamTarget::parse("rtmps://localhost/app/key").unwrap();
        let err = TcpDialer::default().dial(&target).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_tcp_dial_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let target = StreamTarget::parse(&format!("rtmp://127.0.0.1:{}/app/key", port)).unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.is_ok() });
        assert!(TcpDialer::default().dial(&target).await.is_ok());
        assert!(accept.await.unwrap());
    }
}
