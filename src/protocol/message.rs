//! Typed RTMP messages
//!
//! [`RtmpMessage`] interprets a [`RawMessage`] by type id. Only what a
//! publisher sends or has to react to gets its own variant; everything else
//! is kept as [`RtmpMessage::Other`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{amf0, AmfValue};
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::chunk::RawMessage;
use crate::protocol::constants::*;

/// User control event (message type 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    StreamIsRecorded(u32),
    PingRequest(u32),
    PingResponse(u32),
    Unknown(u16),
}

impl UserControlEvent {
    fn decode(mut payload: Bytes) -> Result<Self> {
        if payload.len() < 6 {
            return Err(short("user control"));
        }
        let event = payload.get_u16();
        let value = payload.get_u32();
        Ok(match event {
            UC_STREAM_BEGIN => UserControlEvent::StreamBegin(value),
            UC_STREAM_EOF => UserControlEvent::StreamEof(value),
            UC_STREAM_DRY => UserControlEvent::StreamDry(value),
            UC_SET_BUFFER_LENGTH => {
                if payload.len() < 4 {
                    return Err(short("set buffer length"));
                }
                UserControlEvent::SetBufferLength {
                    stream_id: value,
                    buffer_ms: payload.get_u32(),
                }
            }
            UC_STREAM_IS_RECORDED => UserControlEvent::StreamIsRecorded(value),
            UC_PING_REQUEST => UserControlEvent::PingRequest(value),
            UC_PING_RESPONSE => UserControlEvent::PingResponse(value),
            other => UserControlEvent::Unknown(other),
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        let (event, value) = match *self {
            UserControlEvent::StreamBegin(v) => (UC_STREAM_BEGIN, v),
            UserControlEvent::StreamEof(v) => (UC_STREAM_EOF, v),
            UserControlEvent::StreamDry(v) => (UC_STREAM_DRY, v),
            UserControlEvent::SetBufferLength { stream_id, buffer_ms } => {
                out.put_u16(UC_SET_BUFFER_LENGTH);
                out.put_u32(stream_id);
                out.put_u32(buffer_ms);
                return;
            }
            UserControlEvent::StreamIsRecorded(v) => (UC_STREAM_IS_RECORDED, v),
            UserControlEvent::PingRequest(v) => (UC_PING_REQUEST, v),
            UserControlEvent::PingResponse(v) => (UC_PING_RESPONSE, v),
            UserControlEvent::Unknown(e) => (e, 0),
        };
        out.put_u16(event);
        out.put_u32(value);
    }
}

/// AMF command (`connect`, `publish`, `_result`, `onStatus`, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    /// Command object, `Null` for most stream commands
    pub command_object: AmfValue,
    pub arguments: Vec<AmfValue>,
    /// Message stream the command travels on
    pub stream_id: u32,
}

impl Command {
    pub fn new(name: impl Into<String>, transaction_id: f64) -> Self {
        Self {
            name: name.into(),
            transaction_id,
            command_object: AmfValue::Null,
            arguments: Vec::new(),
            stream_id: 0,
        }
    }

    pub fn with_object(mut self, object: AmfValue) -> Self {
        self.command_object = object;
        self
    }

    pub fn with_arg(mut self, arg: impl Into<AmfValue>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    pub fn on_stream(mut self, stream_id: u32) -> Self {
        self.stream_id = stream_id;
        self
    }

    /// The info object of an `onStatus` or `_error`: the first object argument
    fn info(&self) -> Option<&AmfValue> {
        self.arguments
            .iter()
            .chain(std::iter::once(&self.command_object))
            .find(|v| v.properties().is_some())
    }

    /// `code` of the status/info object, e.g. `NetStream.Publish.Start`
    pub fn status_code(&self) -> Option<&str> {
        self.info()?.get_str("code")
    }

    pub fn status_level(&self) -> Option<&str> {
        self.info()?.get_str("level")
    }

    pub fn status_description(&self) -> Option<&str> {
        self.info()?.get_str("description")
    }

    fn decode(payload: Bytes, stream_id: u32) -> Result<Self> {
        let mut values = amf0::decode_all(&payload)?.into_iter();
        let name = match values.next() {
            Some(AmfValue::String(s)) => s,
            other => {
                return Err(ProtocolError::UnexpectedMessage(format!(
                    "command without a name: {:?}",
                    other
                ))
                .into())
            }
        };
        let transaction_id = values.next().and_then(|v| v.as_number()).unwrap_or(0.0);
        let command_object = values.next().unwrap_or_default();
        Ok(Self {
            name,
            transaction_id,
            command_object,
            arguments: values.collect(),
            stream_id,
        })
    }

    fn encode(&self) -> Bytes {
        let mut enc = amf0::Amf0Encoder::new();
        enc.encode(&AmfValue::String(self.name.clone()));
        enc.encode(&AmfValue::Number(self.transaction_id));
        enc.encode(&self.command_object);
        enc.encode_all(&self.arguments);
        enc.finish()
    }
}

/// Interpreted RTMP message
#[derive(Debug, Clone, PartialEq)]
pub enum RtmpMessage {
    SetChunkSize(u32),
    Abort(u32),
    Acknowledgement(u32),
    UserControl(UserControlEvent),
    WindowAckSize(u32),
    SetPeerBandwidth { size: u32, limit_type: u8 },
    Audio { timestamp: u32, stream_id: u32, data: Bytes },
    Video { timestamp: u32, stream_id: u32, data: Bytes },
    Data { stream_id: u32, values: Vec<AmfValue> },
    Command(Command),
    Other { type_id: u8, payload: Bytes },
}

impl RtmpMessage {
    pub fn from_raw(raw: RawMessage) -> Result<Self> {
        let mut p = raw.payload;
        let msg = match raw.type_id {
            MSG_SET_CHUNK_SIZE => {
                RtmpMessage::SetChunkSize(read_u32(&mut p, "set chunk size")? & 0x7FFF_FFFF)
            }
            MSG_ABORT => RtmpMessage::Abort(read_u32(&mut p, "abort")?),
            MSG_ACKNOWLEDGEMENT => RtmpMessage::Acknowledgement(read_u32(&mut p, "ack")?),
            MSG_USER_CONTROL => RtmpMessage::UserControl(UserControlEvent::decode(p)?),
            MSG_WINDOW_ACK_SIZE => RtmpMessage::WindowAckSize(read_u32(&mut p, "window ack size")?),
            MSG_SET_PEER_BANDWIDTH => {
                let size = read_u32(&mut p, "set peer bandwidth")?;
                let limit_type = if p.has_remaining() { p.get_u8() } else { 2 };
                RtmpMessage::SetPeerBandwidth { size, limit_type }
            }
            MSG_AUDIO => RtmpMessage::Audio {
                timestamp: raw.timestamp,
                stream_id: raw.stream_id,
                data: p,
            },
            MSG_VIDEO => RtmpMessage::Video {
                timestamp: raw.timestamp,
                stream_id: raw.stream_id,
                data: p,
            },
            MSG_DATA_AMF0 | MSG_DATA_AMF3 => {
                if raw.type_id == MSG_DATA_AMF3 && p.has_remaining() {
                    p.advance(1);
                }
                RtmpMessage::Data {
                    stream_id: raw.stream_id,
                    values: amf0::decode_all(&p)?,
                }
            }
            MSG_COMMAND_AMF0 => RtmpMessage::Command(Command::decode(p, raw.stream_id)?),
            MSG_COMMAND_AMF3 => {
                // AMF3 command messages carry a format byte before an AMF0 body
                if p.has_remaining() {
                    p.advance(1);
                }
                RtmpMessage::Command(Command::decode(p, raw.stream_id)?)
            }
            type_id => RtmpMessage::Other { type_id, payload: p },
        };
        Ok(msg)
    }

    /// Serialize onto the conventional chunk stream for the message type
    pub fn to_raw(&self) -> RawMessage {
        let control = |type_id: u8, payload: Bytes| {
            RawMessage::new(CSID_PROTOCOL_CONTROL, 0, type_id, 0, payload)
        };
        match self {
            RtmpMessage::SetChunkSize(size) => {
                control(MSG_SET_CHUNK_SIZE, u32_bytes(*size & 0x7FFF_FFFF))
            }
            RtmpMessage::Abort(csid) => control(MSG_ABORT, u32_bytes(*csid)),
            RtmpMessage::Acknowledgement(seq) => control(MSG_ACKNOWLEDGEMENT, u32_bytes(*seq)),
            RtmpMessage::WindowAckSize(size) => control(MSG_WINDOW_ACK_SIZE, u32_bytes(*size)),
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                let mut b = BytesMut::with_capacity(5);
                b.put_u32(*size);
                b.put_u8(*limit_type);
                control(MSG_SET_PEER_BANDWIDTH, b.freeze())
            }
            RtmpMessage::UserControl(event) => {
                let mut b = BytesMut::with_capacity(10);
                event.encode(&mut b);
                control(MSG_USER_CONTROL, b.freeze())
            }
            RtmpMessage::Audio { timestamp, stream_id, data } => {
                RawMessage::new(CSID_AUDIO, *timestamp, MSG_AUDIO, *stream_id, data.clone())
            }
            RtmpMessage::Video { timestamp, stream_id, data } => {
                RawMessage::new(CSID_VIDEO, *timestamp, MSG_VIDEO, *stream_id, data.clone())
            }
            RtmpMessage::Data { stream_id, values } => {
                RawMessage::new(CSID_DATA, 0, MSG_DATA_AMF0, *stream_id, amf0::encode_all(values))
            }
            RtmpMessage::Command(cmd) => {
                RawMessage::new(CSID_COMMAND, 0, MSG_COMMAND_AMF0, cmd.stream_id, cmd.encode())
            }
            RtmpMessage::Other { type_id, payload } => {
                RawMessage::new(CSID_COMMAND, 0, *type_id, 0, payload.clone())
            }
        }
    }
}

fn read_u32(p: &mut Bytes, what: &str) -> Result<u32> {
    if p.remaining() < 4 {
        return Err(short(what));
    }
    Ok(p.get_u32())
}

fn short(what: &str) -> Error {
    ProtocolError::UnexpectedMessage(format!("truncated {} message", what)).into()
}

fn u32_bytes(v: u32) -> Bytes {
    Bytes::copy_from_slice(&v.to_be_bytes())
}
