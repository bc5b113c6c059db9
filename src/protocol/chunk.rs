//! Chunk stream encoding and decoding
//!
//! Every RTMP message travels as one or more chunks:
//!
//! ```text
//! +--------------+----------------+--------------------+--------------+
//! | Basic Header | Message Header | Extended Timestamp |  Chunk Data  |
//! |  1-3 bytes   | 0, 3, 7, 11 B  |     0 or 4 B       |  <= chunk sz |
//! +--------------+----------------+--------------------+--------------+
//! ```
//!
//! Message header formats:
//! - fmt 0: timestamp, length, type id, stream id (absolute)
//! - fmt 1: timestamp delta, length, type id (same stream)
//! - fmt 2: timestamp delta only
//! - fmt 3: nothing; continuation of the previous header
//!
//! Reference: RTMP Specification Section 5.3

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::constants::{
    DEFAULT_CHUNK_SIZE, EXTENDED_TIMESTAMP, MAX_CHUNK_SIZE, MAX_INBOUND_MESSAGE_SIZE,
};

/// A complete RTMP message, before interpretation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Chunk stream the message travels on
    pub csid: u32,
    /// Absolute timestamp in milliseconds
    pub timestamp: u32,
    /// Message type ID
    pub type_id: u8,
    /// Message stream ID
    pub stream_id: u32,
    pub payload: Bytes,
}

impl RawMessage {
    pub fn new(csid: u32, timestamp: u32, type_id: u8, stream_id: u32, payload: Bytes) -> Self {
        Self {
            csid,
            timestamp,
            type_id,
            stream_id,
            payload,
        }
    }
}

/// Header state remembered per chunk stream (both directions)
#[derive(Debug, Clone, Copy, Default)]
struct ChunkStreamHeader {
    timestamp: u32,
    delta: u32,
    length: u32,
    type_id: u8,
    stream_id: u32,
    extended: bool,
}

/// Outbound chunk serializer
#[derive(Debug)]
pub struct ChunkEncoder {
    chunk_size: u32,
    streams: HashMap<u32, ChunkStreamHeader>,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Change the outbound chunk size. Callers must send `SetChunkSize` first.
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Serialize one message into `out`
    pub fn encode(&mut self, msg: &RawMessage, out: &mut BytesMut) {
        let length = msg.payload.len() as u32;
        let prev = self.streams.get(&msg.csid).copied();

        let (fmt, field) = match prev {
            Some(p)
                if p.stream_id == msg.stream_id
                    && msg.timestamp >= p.timestamp =>
            {
                let delta = msg.timestamp - p.timestamp;
                if p.length == length && p.type_id == msg.type_id {
                    (2u8, delta)
                } else {
                    (1u8, delta)
                }
            }
            _ => (0u8, msg.timestamp),
        };

        let extended = field >= EXTENDED_TIMESTAMP;
        let header_field = if extended { EXTENDED_TIMESTAMP } else { field };

        out.reserve(msg.payload.len() + 18);
        put_basic_header(out, fmt, msg.csid);
        match fmt {
            0 => {
                put_u24(out, header_field);
                put_u24(out, length);
                out.put_u8(msg.type_id);
                out.put_u32_le(msg.stream_id);
            }
            1 => {
                put_u24(out, header_field);
                put_u24(out, length);
                out.put_u8(msg.type_id);
            }
            _ => put_u24(out, header_field),
        }
        if extended {
            out.put_u32(field);
        }

        let mut payload = &msg.payload[..];
        let first = payload.len().min(self.chunk_size as usize);
        out.put_slice(&payload[..first]);
        payload = &payload[first..];

        while !payload.is_empty() {
            put_basic_header(out, 3, msg.csid);
            if extended {
                out.put_u32(field);
            }
            let n = payload.len().min(self.chunk_size as usize);
            out.put_slice(&payload[..n]);
            payload = &payload[n..];
        }

        self.streams.insert(
            msg.csid,
            ChunkStreamHeader {
                timestamp: msg.timestamp,
                delta: if fmt == 0 { 0 } else { field },
                length,
                type_id: msg.type_id,
                stream_id: msg.stream_id,
                extended,
            },
        );
    }

    /// Forget per-stream header state (after a reconnect)
    pub fn reset(&mut self) {
        self.streams.clear();
        self.chunk_size = DEFAULT_CHUNK_SIZE;
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn put_basic_header(out: &mut BytesMut, fmt: u8, csid: u32) {
    let fmt = fmt << 6;
    match csid {
        2..=63 => out.put_u8(fmt | csid as u8),
        64..=319 => {
            out.put_u8(fmt);
            out.put_u8((csid - 64) as u8);
        }
        _ => {
            let id = csid - 64;
            out.put_u8(fmt | 1);
            out.put_u8((id & 0xFF) as u8);
            out.put_u8((id >> 8) as u8);
        }
    }
}

fn put_u24(out: &mut BytesMut, v: u32) {
    out.put_u8((v >> 16) as u8);
    out.put_u8((v >> 8) as u8);
    out.put_u8(v as u8);
}

fn read_u24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32
}

/// Per chunk stream assembly state
#[derive(Debug, Default)]
struct InboundStream {
    header: Option<ChunkStreamHeader>,
    partial: BytesMut,
    remaining: u32,
}

/// Inbound chunk parser
///
/// Feed raw socket bytes with [`ChunkDecoder::push`] and pull complete
/// messages with [`ChunkDecoder::next_message`].
#[derive(Debug)]
pub struct ChunkDecoder {
    chunk_size: u32,
    buf: BytesMut,
    streams: HashMap<u32, InboundStream>,
    bytes_received: u64,
}

enum Step {
    NeedMore,
    Partial,
    Complete(RawMessage),
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            buf: BytesMut::with_capacity(8 * 1024),
            streams: HashMap::new(),
            bytes_received: 0,
        }
    }

    /// Apply a peer `SetChunkSize`
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Total bytes handed to the decoder, for acknowledgements
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn push(&mut self, data: &[u8]) {
        self.bytes_received += data.len() as u64;
        self.buf.extend_from_slice(data);
    }

    /// Next complete message, or `None` if more bytes are needed
    pub fn next_message(&mut self) -> Result<Option<RawMessage>, ProtocolError> {
        loop {
            match self.read_chunk()? {
                Step::NeedMore => return Ok(None),
                Step::Partial => continue,
                Step::Complete(msg) => return Ok(Some(msg)),
            }
        }
    }

    fn read_chunk(&mut self) -> Result<Step, ProtocolError> {
        let buf = &self.buf[..];
        if buf.is_empty() {
            return Ok(Step::NeedMore);
        }

        let fmt = buf[0] >> 6;
        let (csid, mut pos) = match buf[0] & 0x3F {
            0 => {
                if buf.len() < 2 {
                    return Ok(Step::NeedMore);
                }
                (64 + buf[1] as u32, 2)
            }
            1 => {
                if buf.len() < 3 {
                    return Ok(Step::NeedMore);
                }
                (64 + buf[1] as u32 + ((buf[2] as u32) << 8), 3)
            }
            id => (id as u32, 1),
        };

        let header_len = [11usize, 7, 3, 0][fmt as usize];
        if buf.len() < pos + header_len {
            return Ok(Step::NeedMore);
        }

        let stream = self.streams.entry(csid).or_default();
        let prev = stream.header;
        if fmt != 0 && prev.is_none() {
            return Err(ProtocolError::InvalidChunkHeader(format!(
                "fmt {} on chunk stream {} without a previous header",
                fmt, csid
            )));
        }
        let starting = stream.remaining == 0;

        let mut header = prev.unwrap_or_default();
        let mut field = None;
        let h = &buf[pos..pos + header_len];
        match fmt {
            0 => {
                field = Some(read_u24(&h[0..3]));
                header.length = read_u24(&h[3..6]);
                header.type_id = h[6];
                header.stream_id = u32::from_le_bytes([h[7], h[8], h[9], h[10]]);
            }
            1 => {
                field = Some(read_u24(&h[0..3]));
                header.length = read_u24(&h[3..6]);
                header.type_id = h[6];
            }
            2 => field = Some(read_u24(&h[0..3])),
            _ => {}
        }
        pos += header_len;

        let extended = match field {
            Some(f) => f == EXTENDED_TIMESTAMP,
            None => header.extended,
        };
        let mut field = field.unwrap_or(header.delta);
        if extended {
            if buf.len() < pos + 4 {
                return Ok(Step::NeedMore);
            }
            field = u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]);
            pos += 4;
        }

        if fmt < 3 && !starting {
            return Err(ProtocolError::InvalidChunkHeader(format!(
                "new header on chunk stream {} while a message is in progress",
                csid
            )));
        }
        if header.length > MAX_INBOUND_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(header.length));
        }

        let remaining = if starting { header.length } else { stream.remaining };
        let take = remaining.min(self.chunk_size) as usize;
        if buf.len() < pos + take {
            return Ok(Step::NeedMore);
        }

        // Whole chunk is available: commit.
        if starting {
            match fmt {
                0 => {
                    header.timestamp = field;
                    header.delta = 0;
                }
                1 | 2 => {
                    header.timestamp = header.timestamp.wrapping_add(field);
                    header.delta = field;
                }
                _ => header.timestamp = header.timestamp.wrapping_add(header.delta),
            }
            header.extended = extended;
            stream.partial = BytesMut::with_capacity(header.length as usize);
        }
        stream.header = Some(header);
        stream.partial.extend_from_slice(&buf[pos..pos + take]);
        stream.remaining = remaining - take as u32;

        let done = stream.remaining == 0;
        let payload = if done {
            Some(stream.partial.split().freeze())
        } else {
            None
        };

        self.buf.advance(pos + take);

        Ok(match payload {
            Some(payload) => Step::Complete(RawMessage {
                csid,
                timestamp: header.timestamp,
                type_id: header.type_id,
                stream_id: header.stream_id,
                payload,
            }),
            None => Step::Partial,
        })
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}
