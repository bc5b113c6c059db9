//! AAC framing for RTMP
//!
//! RTMP carries raw AAC access units (no ADTS header), preceded by a sequence
//! header holding the AudioSpecificConfig:
//!
//! ```text
//! audioObjectType (5 bits) | samplingFrequencyIndex (4 bits)
//! | channelConfiguration (4 bits) | GASpecificConfig (3 bits, zero)
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::MediaError;

/// AAC packet type (second byte of an AAC audio body)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacPacketType {
    SequenceHeader = 0,
    Raw = 1,
}

/// Sampling frequencies addressable by index
const SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// AAC-LC audio object type
pub const AAC_LC: u8 = 2;

/// AudioSpecificConfig
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub audio_object_type: u8,
    pub sample_rate: u32,
    pub channels: u8,
}

impl AudioSpecificConfig {
    /// AAC-LC at one of the indexed sample rates
    pub fn lc(sample_rate: u32, channels: u8) -> Result<Self, MediaError> {
        if frequency_index(sample_rate).is_none() {
            return Err(MediaError::InvalidAac("unsupported sample rate"));
        }
        if channels == 0 || channels > 7 {
            return Err(MediaError::InvalidAac("unsupported channel count"));
        }
        Ok(Self {
            audio_object_type: AAC_LC,
            sample_rate,
            channels,
        })
    }

    pub fn to_bytes(&self) -> Bytes {
        // lc() guarantees a valid index; fall back to 44.1 kHz otherwise
        let index = frequency_index(self.sample_rate).unwrap_or(4);
        let bits: u16 = ((self.audio_object_type as u16 & 0x1F) << 11)
            | ((index as u16) << 7)
            | ((self.channels as u16 & 0x0F) << 3);
        Bytes::copy_from_slice(&bits.to_be_bytes())
    }

    pub fn parse(data: &[u8]) -> Result<Self, MediaError> {
        if data.len() < 2 {
            return Err(MediaError::InvalidAac("config shorter than two bytes"));
        }
        let audio_object_type = data[0] >> 3;
        let index = ((data[0] & 0x07) << 1) | (data[1] >> 7);
        let sample_rate = *SAMPLING_FREQUENCIES
            .get(index as usize)
            .ok_or(MediaError::InvalidAac("explicit sample rates are not supported"))?;
        let channels = (data[1] >> 3) & 0x0F;
        Ok(Self {
            audio_object_type,
            sample_rate,
            channels,
        })
    }

    /// PCM samples per channel in one access unit
    pub fn samples_per_frame(&self) -> u32 {
        1024
    }
}

fn frequency_index(sample_rate: u32) -> Option<u8> {
    SAMPLING_FREQUENCIES
        .iter()
        .position(|&f| f == sample_rate)
        .map(|i| i as u8)
}

/// Strip an ADTS header if the encoder emitted one
pub fn strip_adts(frame: &Bytes) -> Bytes {
    if frame.len() >= 7 && frame[0] == 0xFF && frame[1] & 0xF0 == 0xF0 {
        let header_len = if frame[1] & 0x01 == 0 { 9 } else { 7 };
        if frame.len() >= header_len {
            return frame.slice(header_len..);
        }
    }
    frame.clone()
}

/// Full audio body: `0xAF`, packet type, payload
pub(crate) fn audio_body(packet_type: AacPacketType, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(2 + payload.len());
    // AAC, 44 kHz, 16-bit, stereo; the real values come from the sequence header
    out.put_u8(0xAF);
    out.put_u8(packet_type as u8);
    out.put_slice(payload);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lc_44100_stereo() {
        let config = AudioSpecificConfig::lc(44100, 2).unwrap();
        assert_eq!(&config.to_bytes()[..], &[0x12, 0x10]);
        assert_eq!(AudioSpecificConfig::parse(&[0x12, 0x10]).unwrap(), config);
    }

    #[test]
    fn test_lc_48000_mono() {
        let config = AudioSpecificConfig::lc(48000, 1).unwrap();
        assert_eq!(&config.to_bytes()[..], &[0x11, 0x88]);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(AudioSpecificConfig::lc(44000, 2).is_err());
        assert!(AudioSpecificConfig::lc(44100, 0).is_err());
        assert!(AudioSpecificConfig::parse(&[0x12]).is_err());
        assert!(AudioSpecificConfig::parse(&[0x17, 0x80]).is_err());
    }

    #[test]
    fn test_strip_adts() {
        let mut adts = vec![0xFF, 0xF1, 0x50, 0x80, 0x01, 0x7F, 0xFC];
        adts.extend_from_slice(&[1, 2, 3]);
        assert_eq!(&strip_adts(&Bytes::from(adts))[..], &[1, 2, 3]);

        let raw = Bytes::from_static(&[0x21, 0x10, 0x05]);
        assert_eq!(strip_adts(&raw), raw);
    }

    #[test]
    fn test_audio_body_header() {
        let body = audio_body(AacPacketType::SequenceHeader, &[0x12, 0x10]);
        assert_eq!(&body[..], &[0xAF, 0x00, 0x12, 0x10]);
    }
}
