//! RTMP wire protocol: handshake, chunk stream and messages

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;

pub use chunk::{ChunkDecoder, ChunkEncoder, RawMessage};
pub use handshake::{Handshake, HandshakeRole};
pub use message::{Command, RtmpMessage, UserControlEvent};
