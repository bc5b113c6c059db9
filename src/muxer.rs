//! Encoded frames to RTMP messages
//!
//! | frame             | chunk stream | message type          |
//! |-------------------|--------------|-----------------------|
//! | metadata          | 5            | data (AMF0)           |
//! | video / AVC header| 6            | video                 |
//! | audio / AAC header| 4            | audio                 |
//!
//! Timestamps are clamped per chunk stream so a message is never stamped
//! earlier than the previous one on the same stream.

use crate::amf::AmfValue;
use crate::encoder::EncodedFrame;
use crate::media::flv;
use crate::media::h264::{self, AvcPacketType};
use crate::protocol::constants::*;
use crate::protocol::{RawMessage, RtmpMessage};

#[derive(Debug, Default)]
struct Clamp {
    last: Option<u32>,
}

impl Clamp {
    fn apply(&mut self, timestamp: u32) -> u32 {
        let ts = match self.last {
            Some(last) if timestamp < last => last,
            _ => timestamp,
        };
        self.last = Some(ts);
        ts
    }

    /// Timestamp for a header, which carries no media time of its own
    fn current(&self) -> u32 {
        self.last.unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct Muxer {
    stream_id: u32,
    audio: Clamp,
    video: Clamp,
}

impl Muxer {
    pub fn new(stream_id: u32) -> Self {
        Self {
            stream_id,
            audio: Clamp::default(),
            video: Clamp::default(),
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Publish on a new stream id (after a reconnect); timestamps carry on
    pub fn set_stream_id(&mut self, stream_id: u32) {
        self.stream_id = stream_id;
    }

    pub fn mux(&mut self, frame: &EncodedFrame) -> RawMessage {
        match frame {
            // Data messages always go out at 0, which never moves backwards
            EncodedFrame::Metadata(meta) => RtmpMessage::Data {
                stream_id: self.stream_id,
                values: vec![
                    AmfValue::from(CMD_SET_DATA_FRAME),
                    AmfValue::from(CMD_ON_METADATA),
                    meta.to_amf(),
                ],
            }
            .to_raw(),
            EncodedFrame::VideoConfig(record) => self.video_message(
                self.video.current(),
                flv::avc_sequence_header(record),
            ),
            EncodedFrame::AudioConfig(asc) => {
                self.audio_message(self.audio.current(), flv::aac_sequence_header(asc))
            }
            EncodedFrame::Video {
                timestamp,
                composition_offset,
                keyframe,
                data,
            } => {
                let ts = self.video.apply(*timestamp);
                let avcc = h264::to_avcc(data);
                let body =
                    flv::avc_body(*keyframe, AvcPacketType::Nalu, *composition_offset, &avcc);
                self.video_message(ts, body)
            }
            EncodedFrame::Audio { timestamp, data } => {
                let ts = self.audio.apply(*timestamp);
                self.audio_message(ts, flv::aac_frame(data))
            }
        }
    }

    fn video_message(&self, timestamp: u32, body: bytes::Bytes) -> RawMessage {
        RtmpMessage::Video {
            timestamp,
            stream_id: self.stream_id,
            data: body,
        }
        .to_raw()
    }

    fn audio_message(&self, timestamp: u32, body: bytes::Bytes) -> RawMessage {
        RtmpMessage::Audio {
            timestamp,
            stream_id: self.stream_id,
            data: body,
        }
        .to_raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::amf0;
    use crate::media::flv::{StreamMetadata, VideoTagInfo};
    use bytes::Bytes;

    fn video(ts: u32, keyframe: bool) -> EncodedFrame {
        EncodedFrame::Video {
            timestamp: ts,
            composition_offset: 0,
            keyframe,
            data: Bytes::from_static(&[0, 0, 0, 1, 0x09, 0xF0, 0, 0, 0, 1, 0x65, 0x88, 0x84]),
        }
    }

    #[test]
    fn test_chunk_streams_and_types() {
        let mut muxer = Muxer::new(1);
        let v = muxer.mux(&video(0, true));
        assert_eq!((v.csid, v.type_id, v.stream_id), (CSID_VIDEO, MSG_VIDEO, 1));

        let a = muxer.mux(&EncodedFrame::Audio {
            timestamp: 0,
            data: Bytes::from_static(&[0x21, 0x00]),
        });
        assert_eq!((a.csid, a.type_id), (CSID_AUDIO, MSG_AUDIO));
        assert_eq!(&a.payload[..], &[0xAF, 0x01, 0x21, 0x00]);
    }

    #[test]
    fn test_annex_b_converted_and_aud_dropped() {
        let mut muxer = Muxer::new(1);
        let msg = muxer.mux(&video(40, true));
        assert_eq!(msg.timestamp, 40);
        let info = VideoTagInfo::parse(&msg.payload).unwrap();
        assert!(info.keyframe);
        assert_eq!(&msg.payload[5..], &[0, 0, 0, 3, 0x65, 0x88, 0x84]);
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let mut muxer = Muxer::new(1);
        assert_eq!(muxer.mux(&video(100, true)).timestamp, 100);
        assert_eq!(muxer.mux(&video(90, false)).timestamp, 100);
        assert_eq!(muxer.mux(&video(133, false)).timestamp, 133);

        // Headers take the current stream time
        let header = muxer.mux(&EncodedFrame::VideoConfig(Bytes::from_static(&[1, 0x64, 0, 0x1F])));
        assert_eq!(header.timestamp, 133);
        assert_eq!(&header.payload[..2], &[0x17, 0x00]);
    }

    #[test]
    fn test_metadata_message() {
        let mut muxer = Muxer::new(3);
        let msg = muxer.mux(&EncodedFrame::Metadata(StreamMetadata {
            width: 1280,
            height: 720,
            video_data_rate: 2000,
            audio_data_rate: 128,
            frame_rate: 30,
            audio_sample_rate: 44100,
            stereo: true,
            encoder: "test".into(),
        }));
        assert_eq!((msg.csid, msg.type_id, msg.stream_id), (CSID_DATA, MSG_DATA_AMF0, 3));

        let values = amf0::decode_all(&msg.payload).unwrap();
        assert_eq!(values[0].as_str(), Some(CMD_SET_DATA_FRAME));
        assert_eq!(values[1].as_str(), Some(CMD_ON_METADATA));
        assert_eq!(values[2].get_number("width"), Some(1280.0));
    }

    #[test]
    fn test_stream_id_switch() {
        let mut muxer = Muxer::new(1);
        muxer.mux(&video(500, true));
        muxer.set_stream_id(2);
        let msg = muxer.mux(&video(520, true));
        assert_eq!((msg.stream_id, msg.timestamp), (2, 520));
    }
}
