//! Encoder seam and pipeline stage
//!
//! Platform encoders are supplied through [`VideoCodec`] and [`AudioCodec`].
//! The crate never encodes pixels itself: it drives the codecs from the
//! encoder stage task (see [`stage`]), stamps timestamps with
//! [`TimestampSync`], and turns decoder configurations into the sequence
//! headers the muxer sends.

pub mod stage;
pub mod timestamp;

pub use timestamp::{TimestampSync, Track};

use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;
use crate::media::flv::StreamMetadata;
use crate::media::h264::AvcConfig;
use crate::media::AudioSpecificConfig;
use crate::settings::SettingsLimits;
use crate::source::{RawAudioFrame, RawVideoFrame};

/// What a codec can do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCapabilities {
    /// Geometry/bitrate can change without restarting the stream
    pub live_reconfigure: bool,
    pub limits: SettingsLimits,
}

impl Default for EncoderCapabilities {
    fn default() -> Self {
        Self {
            live_reconfigure: false,
            limits: SettingsLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoEncoderConfig {
    pub width: u32,
    pub height: u32,
    /// bits/sec
    pub bitrate: u32,
    pub frame_rate: u32,
    pub keyframe_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioEncoderConfig {
    /// bits/sec
    pub bitrate: u32,
    pub sample_rate: u32,
    pub channels: u8,
}

/// One compressed H.264 access unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedVideo {
    /// Annex B or AVCC
    pub data: Bytes,
    pub keyframe: bool,
    /// Presentation minus decode time, ms
    pub composition_offset: i32,
}

/// H.264 encoder
pub trait VideoCodec: Send + 'static {
    fn capabilities(&self) -> EncoderCapabilities;

    /// Apply `config` and return the parameter sets (SPS/PPS as Annex B,
    /// or a complete AVCDecoderConfigurationRecord).
    fn configure(&mut self, config: &VideoEncoderConfig) -> Result<Bytes>;

    /// Encode one frame. A codec may buffer and return nothing.
    ///
    /// Frames can arrive at a size other than the configured one when the
    /// source does not scale; the codec scales them to the configured size.
    fn encode(
        &mut self,
        frame: &RawVideoFrame,
        force_keyframe: bool,
    ) -> Result<Vec<EncodedVideo>>;
}

/// AAC encoder
pub trait AudioCodec: Send + 'static {
    fn capabilities(&self) -> EncoderCapabilities;

    /// Apply `config` and return the AudioSpecificConfig. An empty result
    /// means AAC-LC at the configured rate and channel count.
    fn configure(&mut self, config: &AudioEncoderConfig) -> Result<Bytes>;

    /// Encode PCM; returns raw AAC frames (ADTS headers are stripped).
    fn encode(&mut self, frame: &RawAudioFrame) -> Result<Vec<Bytes>>;
}

/// Output of the encoder stage, in send order
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedFrame {
    Metadata(StreamMetadata),
    /// Serialized AVCDecoderConfigurationRecord
    VideoConfig(Bytes),
    /// AudioSpecificConfig
    AudioConfig(Bytes),
    Video {
        timestamp: u32,
        composition_offset: i32,
        keyframe: bool,
        data: Bytes,
    },
    Audio {
        timestamp: u32,
        data: Bytes,
    },
}

impl EncodedFrame {
    /// Payload bytes, used for send-buffer accounting
    pub fn size(&self) -> usize {
        match self {
            EncodedFrame::Metadata(_) => 128,
            EncodedFrame::VideoConfig(b) | EncodedFrame::AudioConfig(b) => b.len(),
            EncodedFrame::Video { data, .. } | EncodedFrame::Audio { data, .. } => data.len(),
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, EncodedFrame::Video { keyframe: true, .. })
    }

    /// Metadata and sequence headers, cached for re-sending after a reconnect
    pub fn is_header(&self) -> bool {
        matches!(
            self,
            EncodedFrame::Metadata(_) | EncodedFrame::VideoConfig(_) | EncodedFrame::AudioConfig(_)
        )
    }
}

/// AVCDecoderConfigurationRecord from whatever the codec returned
pub fn avc_record(params: &[u8]) -> Result<Bytes> {
    if params.first() == Some(&1) {
        if let Ok(config) = AvcConfig::parse(Bytes::copy_from_slice(params)) {
            return Ok(config.to_bytes());
        }
    }
    Ok(AvcConfig::from_stream(params)?.to_bytes())
}

/// AudioSpecificConfig bytes, filling in AAC-LC when the codec returned none
pub fn audio_specific_config(params: &[u8], config: &AudioEncoderConfig) -> Result<Bytes> {
    if params.is_empty() {
        return Ok(AudioSpecificConfig::lc(config.sample_rate, config.channels)?.to_bytes());
    }
    AudioSpecificConfig::parse(params)?;
    Ok(Bytes::copy_from_slice(params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const SPS: &[u8] = &[0x67, 0x64, 0x00, 0x1F, 0xAC, 0xD9];
    const PPS: &[u8] = &[0x68, 0xEB, 0xE3, 0xCB];

    fn annex_b_params() -> Vec<u8> {
        let mut v = vec![0, 0, 0, 1];
        v.extend_from_slice(SPS);
        v.extend_from_slice(&[0, 0, 0, 1]);
        v.extend_from_slice(PPS);
        v
    }

    #[test]
    fn test_avc_record_from_annex_b() {
        let record = avc_record(&annex_b_params()).unwrap();
        assert_eq!(record[0], 1);
        assert_eq!(record[1], 0x64);
        assert_eq!(record[3], 0x1F);

        // A record passes through unchanged
        assert_eq!(avc_record(&record).unwrap(), record);
    }

    #[test]
    fn test_avc_record_rejects_garbage() {
        let err = avc_record(&[0, 0, 0, 1, 0x65, 0x88]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_audio_config_defaults_to_lc() {
        let cfg = AudioEncoderConfig {
            bitrate: 128_000,
            sample_rate: 44_100,
            channels: 2,
        };
        assert_eq!(&audio_specific_config(&[], &cfg).unwrap()[..], &[0x12, 0x10]);
        assert_eq!(&audio_specific_config(&[0x11, 0x90], &cfg).unwrap()[..], &[0x11, 0x90]);
    }

    #[test]
    fn test_frame_classification() {
        let key = EncodedFrame::Video {
            timestamp: 0,
            composition_offset: 0,
            keyframe: true,
            data: Bytes::from_static(&[1, 2, 3]),
        };
        assert!(key.is_keyframe());
        assert!(!key.is_header());
        assert_eq!(key.size(), 3);
        assert!(EncodedFrame::AudioConfig(Bytes::from_static(&[0x12, 0x10])).is_header());
    }
}
