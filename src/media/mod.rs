//! Media framing for RTMP
//!
//! - FLV audio/video tag bodies and `onMetaData`
//! - H.264 configuration records and Annex B to AVCC conversion
//! - AAC AudioSpecificConfig

pub mod aac;
pub mod flv;
pub mod h264;

pub use aac::{AacPacketType, AudioSpecificConfig};
pub use flv::{StreamMetadata, VideoTagInfo};
pub use h264::{AvcConfig, AvcPacketType, NaluType};
