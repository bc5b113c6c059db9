//! FLV tag bodies
//!
//! An RTMP audio or video message is an FLV tag body without the tag header.
//!
//! Video:
//! ```text
//! +-----------+----------+---------------+-----------------+------
//! | FrameType | CodecID  | AVCPacketType | CompositionTime | Data
//! | (4 bits)  | (4 bits) | (1 byte)      | (SI24)          |
//! +-----------+----------+---------------+-----------------+------
//! ```
//!
//! Audio:
//! ```text
//! +-------------+-----------+-----------+-----------+---------------+------
//! | SoundFormat | SoundRate | SoundSize | SoundType | AACPacketType | Data
//! | (4 bits)    | (2 bits)  | (1 bit)   | (1 bit)   | (1 byte)      |
//! +-------------+-----------+-----------+-----------+---------------+------
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::amf::AmfValue;
use crate::media::aac::{self, AacPacketType};
use crate::media::h264::AvcPacketType;

/// FLV codec id for AVC
pub const CODEC_AVC: u8 = 7;
/// FLV sound format for AAC
pub const SOUND_AAC: u8 = 10;

/// Video frame type (upper nibble of the first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    Keyframe = 1,
    InterFrame = 2,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b >> 4 {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            _ => None,
        }
    }
}

/// AVC video body
pub fn avc_body(
    keyframe: bool,
    packet_type: AvcPacketType,
    composition_time: i32,
    data: &[u8],
) -> Bytes {
    let frame_type = if keyframe {
        VideoFrameType::Keyframe
    } else {
        VideoFrameType::InterFrame
    };
    let mut out = BytesMut::with_capacity(5 + data.len());
    out.put_u8(((frame_type as u8) << 4) | CODEC_AVC);
    out.put_u8(packet_type as u8);
    let cts = composition_time.clamp(-0x80_0000, 0x7F_FFFF) as u32;
    out.put_u8((cts >> 16) as u8);
    out.put_u8((cts >> 8) as u8);
    out.put_u8(cts as u8);
    out.put_slice(data);
    out.freeze()
}

/// AVC sequence header body from a serialized configuration record
pub fn avc_sequence_header(record: &[u8]) -> Bytes {
    avc_body(true, AvcPacketType::SequenceHeader, 0, record)
}

/// AAC sequence header body from an AudioSpecificConfig
pub fn aac_sequence_header(config: &[u8]) -> Bytes {
    aac::audio_body(AacPacketType::SequenceHeader, config)
}

/// Raw AAC frame body
pub fn aac_frame(data: &[u8]) -> Bytes {
    aac::audio_body(AacPacketType::Raw, data)
}

/// Stream properties announced with `onMetaData`
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMetadata {
    pub width: u32,
    pub height: u32,
    /// kbps, as FLV metadata expects
    pub video_data_rate: u32,
    pub audio_data_rate: u32,
    pub frame_rate: u32,
    pub audio_sample_rate: u32,
    pub stereo: bool,
    pub encoder: String,
}

impl StreamMetadata {
    pub fn to_amf(&self) -> AmfValue {
        AmfValue::ecma_array([
            ("width", AmfValue::from(self.width)),
            ("height", AmfValue::from(self.height)),
            ("videodatarate", AmfValue::from(self.video_data_rate)),
            ("framerate", AmfValue::from(self.frame_rate)),
            ("videocodecid", AmfValue::from(CODEC_AVC as u32)),
            ("audiodatarate", AmfValue::from(self.audio_data_rate)),
            ("audiosamplerate", AmfValue::from(self.audio_sample_rate)),
            ("audiosamplesize", AmfValue::from(16u32)),
            ("stereo", AmfValue::from(self.stereo)),
            ("audiocodecid", AmfValue::from(SOUND_AAC as u32)),
            ("encoder", AmfValue::from(self.encoder.as_str())),
        ])
    }
}

/// Read-only view of a received video body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoTagInfo {
    pub keyframe: bool,
    pub codec_id: u8,
    pub packet_type: Option<AvcPacketType>,
    pub composition_time: i32,
}

impl VideoTagInfo {
    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.len() < 5 {
            return None;
        }
        let raw = ((body[2] as i32) << 16) | ((body[3] as i32) << 8) | body[4] as i32;
        let composition_time = (raw << 8) >> 8;
        Some(Self {
            keyframe: VideoFrameType::from_byte(body[0]) == Some(VideoFrameType::Keyframe),
            codec_id: body[0] & 0x0F,
            packet_type: AvcPacketType::from_byte(body[1]),
            composition_time,
        })
    }

    pub fn is_sequence_header(&self) -> bool {
        self.packet_type == Some(AvcPacketType::SequenceHeader)
    }
}

/// Whether an audio body is an AAC sequence header
pub fn is_aac_sequence_header(body: &[u8]) -> bool {
    body.len() >= 2 && body[0] >> 4 == SOUND_AAC && body[1] == AacPacketType::SequenceHeader as u8
}
