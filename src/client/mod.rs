//! RTMP publishing client
//!
//! - [`StreamTarget`]: publish URL parsing
//! - [`Dialer`]: pluggable transport (TCP by default)
//! - [`RtmpConnector`]: handshake and the connect/createStream/publish exchange

pub mod connector;
pub mod dialer;
pub mod target;

pub use connector::{InboundEvent, PublishedConnection, RtmpConnector, RtmpReader, RtmpWriter};
pub use dialer::{BoxedStream, Dialer, RtmpStream, TcpDialer};
pub use target::{Scheme, StreamTarget};
