//! RTMP publishing engine
//!
//! Takes raw camera and microphone frames from a [`MediaSource`], encodes
//! them through pluggable [`VideoCodec`]/[`AudioCodec`] implementations,
//! muxes H.264/AAC into FLV tag bodies and publishes them over RTMP. Lost
//! connections are retried with backoff while capture keeps running.
//!
//! ```text
//! MediaSource -> FrameSink -> encoder stage -> connection worker -> socket
//!                               (codecs,        (muxer, congestion,
//!                                timestamps)     reconnect)
//! ```
//!
//! [`Publisher`] is the entry point: a cloneable handle over a control loop
//! task that owns all mutable state.

pub mod amf;
pub mod client;
pub mod config;
pub mod connection;
pub mod encoder;
pub mod error;
pub mod media;
pub mod muxer;
pub mod protocol;
pub mod publisher;
pub mod settings;
pub mod source;
pub mod stats;
#[cfg(test)]
pub(crate) mod test_support;

pub use client::{Dialer, StreamTarget, TcpDialer};
pub use config::{ConnectionConfig, PublisherConfig};
pub use connection::{CongestionConfig, ReconnectPolicy};
pub use encoder::{
    AudioCodec, AudioEncoderConfig, EncodedVideo, EncoderCapabilities, VideoCodec,
    VideoEncoderConfig,
};
pub use error::{ConnectReason, Error, ErrorKind, Result};
pub use publisher::{Publisher, PublisherEvent, PublisherState, PublisherStatus};
pub use settings::{
    AudioInputType, SettingsLimits, VideoOrientation, VideoSettings, VideoSettingsUpdate,
};
pub use source::{FrameSink, MediaSource, RawAudioFrame, RawFrame, RawVideoFrame};
pub use stats::PublishStats;
