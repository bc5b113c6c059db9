//! Error types
//!
//! Every public publisher operation returns [`Result`]. The top-level
//! [`Error`] carries a stable [`ErrorKind`] so a bridge layer can turn any
//! failure into a reject-style completion with a code and a message.
//!
//! Protocol-level errors ([`HandshakeError`], [`ProtocolError`], [`AmfError`],
//! [`MediaError`]) are produced inside the connection layer and folded into
//! [`Error::Connection`] at the `start_stream` boundary.

use std::fmt;
use std::io;

use crate::publisher::state::PublisherState;
use crate::settings::AudioInputType;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Why a connection attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReason {
    /// Server rejected the connect or publish (bad key, unauthorized)
    AuthRejected,
    /// DNS resolution or TCP connect failed
    Unreachable,
    /// Handshake or command exchange did not finish in time
    HandshakeTimeout,
    /// Peer violated the protocol or the URL was unusable
    Protocol,
    /// Attempt cancelled by a concurrent stop
    Aborted,
}

impl ConnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectReason::AuthRejected => "auth_rejected",
            ConnectReason::Unreachable => "unreachable",
            ConnectReason::HandshakeTimeout => "handshake_timeout",
            ConnectReason::Protocol => "protocol",
            ConnectReason::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ConnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    StreamLost,
    InvalidSettings,
    RequiresRestart,
    UnsupportedInput,
    UnsupportedOperation,
    InvalidState,
    Source,
    Codec,
    Closed,
    Internal,
}

impl ErrorKind {
    /// Code string handed across the bridge boundary
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "CONNECTION_ERROR",
            ErrorKind::StreamLost => "STREAM_LOST",
            ErrorKind::InvalidSettings => "INVALID_SETTINGS",
            ErrorKind::RequiresRestart => "REQUIRES_RESTART",
            ErrorKind::UnsupportedInput => "UNSUPPORTED_INPUT",
            ErrorKind::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::Source => "SOURCE_ERROR",
            ErrorKind::Codec => "CODEC_ERROR",
            ErrorKind::Closed => "CLOSED",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

/// Top-level publisher error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection failed ({reason}): {message}")]
    Connection {
        reason: ConnectReason,
        message: String,
    },

    #[error("stream lost after {attempts} reconnect attempts: {message}")]
    StreamLost { attempts: u32, message: String },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("setting change requires a stream restart: {0}")]
    RequiresRestart(String),

    #[error("audio input {0} has no available hardware path")]
    UnsupportedInput(AudioInputType),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("{operation} is not valid while {state}")]
    InvalidState {
        operation: &'static str,
        state: PublisherState,
    },

    #[error("media source error: {0}")]
    Source(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("publisher is shut down")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("AMF error: {0}")]
    Amf(#[from] AmfError),

    #[error("media error: {0}")]
    Media(#[from] MediaError),
}

impl Error {
    pub fn connection(reason: ConnectReason, message: impl Into<String>) -> Self {
        Error::Connection {
            reason,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection { .. } => ErrorKind::Connection,
            Error::StreamLost { .. } => ErrorKind::StreamLost,
            Error::InvalidSettings(_) => ErrorKind::InvalidSettings,
            Error::RequiresRestart(_) => ErrorKind::RequiresRestart,
            Error::UnsupportedInput(_) => ErrorKind::UnsupportedInput,
            Error::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::Source(_) => ErrorKind::Source,
            Error::Codec(_) => ErrorKind::Codec,
            Error::Closed => ErrorKind::Closed,
            Error::Io(_)
            | Error::Handshake(_)
            | Error::Protocol(_)
            | Error::Amf(_)
            | Error::Media(_) => ErrorKind::Internal,
        }
    }

    /// Reason for a connection failure, if this is one
    pub fn connect_reason(&self) -> Option<ConnectReason> {
        match self {
            Error::Connection { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Fold a protocol-layer error into a connection failure
    pub(crate) fn into_connect_failure(self) -> Self {
        match self {
            Error::Connection { .. } => self,
            Error::Io(e) => Error::connection(ConnectReason::Unreachable, e.to_string()),
            Error::Handshake(e) => Error::connection(ConnectReason::Protocol, e.to_string()),
            Error::Protocol(ProtocolError::Timeout(what)) => {
                Error::connection(ConnectReason::HandshakeTimeout, what)
            }
            Error::Protocol(ProtocolError::Rejected(msg)) => {
                Error::connection(ConnectReason::AuthRejected, msg)
            }
            other => Error::connection(ConnectReason::Protocol, other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("invalid RTMP version {0}")]
    InvalidVersion(u8),
    #[error("handshake not complete")]
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid chunk header: {0}")]
    InvalidChunkHeader(String),
    #[error("message of {0} bytes exceeds limit")]
    MessageTooLarge(u32),
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("server rejected request: {0}")]
    Rejected(String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("connection closed by peer")]
    ConnectionClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmfError {
    #[error("unexpected end of AMF data")]
    UnexpectedEof,
    #[error("unknown AMF0 marker 0x{0:02x}")]
    UnknownMarker(u8),
    #[error("invalid UTF-8 in AMF string")]
    InvalidUtf8,
    #[error("invalid AMF reference {0}")]
    InvalidReference(u16),
    #[error("AMF nesting too deep")]
    NestingTooDeep,
    #[error("missing AMF object end marker")]
    InvalidObjectEnd,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("invalid AVC data: {0}")]
    InvalidAvc(&'static str),
    #[error("invalid AAC config: {0}")]
    InvalidAac(&'static str),
}
