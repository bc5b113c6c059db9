//! RTMP publish connection
//!
//! [`RtmpConnector`] drives one connection from a fresh transport to a
//! published stream:
//!
//! ```text
//! handshake -> SetChunkSize -> connect -> releaseStream / FCPublish
//!           -> createStream -> publish("live") -> NetStream.Publish.Start
//! ```
//!
//! It then splits into an [`RtmpWriter`] owned by the connection worker and
//! an [`RtmpReader`] that runs in its own task, so pings and
//! acknowledgements keep flowing while media is written.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::amf::AmfValue;
use crate::client::dialer::BoxedStream;
use crate::client::target::StreamTarget;
use crate::config::ConnectionConfig;
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::constants::*;
use crate::protocol::{
    ChunkDecoder, ChunkEncoder, Command, Handshake, HandshakeRole, RawMessage, RtmpMessage,
    UserControlEvent,
};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Tracks when an acknowledgement is owed to the peer
#[derive(Debug, Default)]
struct AckWindow {
    window: Option<u32>,
    last_acked: u64,
}

impl AckWindow {
    fn set_window(&mut self, size: u32) {
        self.window = (size > 0).then_some(size);
    }

    /// Sequence number to acknowledge, if a full window has been received
    fn due(&mut self, received: u64) -> Option<u32> {
        let window = self.window? as u64;
        if received - self.last_acked >= window {
            self.last_acked = received;
            Some(received as u32)
        } else {
            None
        }
    }
}

/// Connection during setup, before media flows
pub struct RtmpConnector {
    stream: BoxedStream,
    encoder: ChunkEncoder,
    decoder: ChunkDecoder,
    write_buf: BytesMut,
    ack: AckWindow,
    next_transaction: f64,
}

/// A connection that has reached `NetStream.Publish.Start`
pub struct PublishedConnection {
    pub writer: RtmpWriter,
    pub reader: RtmpReader,
}

impl RtmpConnector {
    pub fn new(stream: BoxedStream) -> Self {
        Self {
            stream,
            encoder: ChunkEncoder::new(),
            decoder: ChunkDecoder::new(),
            write_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            ack: AckWindow::default(),
            next_transaction: 1.0,
        }
    }

    /// Run the full setup sequence on `stream`.
    ///
    /// No timeout is applied here; the caller bounds the whole exchange.
    pub async fn publish(
        stream: BoxedStream,
        target: &StreamTarget,
        config: &ConnectionConfig,
    ) -> Result<PublishedConnection> {
        let mut conn = Self::new(stream);
        conn.handshake().await?;

        conn.send(&RtmpMessage::SetChunkSize(config.chunk_size)).await?;
        conn.encoder.set_chunk_size(config.chunk_size);

        conn.connect(target, config).await?;
        conn.send(&RtmpMessage::WindowAckSize(config.window_ack_size)).await?;

        let stream_id = conn.create_stream(target.stream_key()).await?;
        conn.start_publish(stream_id, target.stream_key()).await?;

        tracing::info!(url = %target, stream_id, "Publishing");
        Ok(conn.into_split(stream_id, target.stream_key().to_string()))
    }

    async fn handshake(&mut self) -> Result<()> {
        let mut hs = Handshake::new(HandshakeRole::Client);
        let mut input = BytesMut::with_capacity(2 * HANDSHAKE_SIZE + 1);
        if let Some(c0c1) = hs.start() {
            self.stream.write_all(&c0c1).await?;
        }
        while !hs.is_done() {
            if self.stream.read_buf(&mut input).await? == 0 {
                return Err(ProtocolError::ConnectionClosed.into());
            }
            if let Some(reply) = hs.advance(&mut input)? {
                self.stream.write_all(&reply).await?;
            }
        }
        self.stream.flush().await?;
        if !input.is_empty() {
            self.decoder.push(&input);
        }
        tracing::debug!("Handshake complete");
        Ok(())
    }

    async fn connect(&mut self, target: &StreamTarget, config: &ConnectionConfig) -> Result<()> {
        let tc_url = target.tc_url();
        let tx = self.transaction();
        let cmd = Command::new(CMD_CONNECT, tx).with_object(AmfValue::object([
            ("app", AmfValue::from(target.app())),
            ("type", AmfValue::from("nonprivate")),
            ("flashVer", AmfValue::from(config.flash_ver.as_str())),
            ("tcUrl", AmfValue::from(tc_url.as_str())),
            ("swfUrl", AmfValue::from(tc_url.as_str())),
            ("fpad", AmfValue::Boolean(false)),
            ("capabilities", AmfValue::Number(15.0)),
            ("audioCodecs", AmfValue::Number(3191.0)),
            ("videoCodecs", AmfValue::Number(252.0)),
            ("videoFunction", AmfValue::Number(1.0)),
            ("objectEncoding", AmfValue::Number(0.0)),
        ]));
        self.send(&RtmpMessage::Command(cmd)).await?;

        let reply = self.await_response(tx).await?;
        if reply.name == CMD_ERROR || reply.status_level() == Some("error") {
            return Err(rejection(&reply, NC_CONNECT_REJECTED));
        }
        tracing::debug!(app = target.app(), code = ?reply.status_code(), "connect accepted");
        Ok(())
    }

    async fn create_stream(&mut self, key: &str) -> Result<u32> {
        let tx = self.transaction();
        self.send(&RtmpMessage::Command(Command::new(CMD_RELEASE_STREAM, tx).with_arg(key)))
            .await?;
        let tx = self.transaction();
        self.send(&RtmpMessage::Command(Command::new(CMD_FC_PUBLISH, tx).with_arg(key)))
            .await?;

        let tx = self.transaction();
        self.send(&RtmpMessage::Command(Command::new(CMD_CREATE_STREAM, tx)))
            .await?;
        let reply = self.await_response(tx).await?;
        if reply.name == CMD_ERROR {
            return Err(rejection(&reply, "createStream refused"));
        }
        reply
            .arguments
            .iter()
            .find_map(AmfValue::as_number)
            .map(|id| id as u32)
            .ok_or_else(|| {
                ProtocolError::UnexpectedMessage("createStream result without a stream id".into())
                    .into()
            })
    }

    async fn start_publish(&mut self, stream_id: u32, key: &str) -> Result<()> {
        let tx = self.transaction();
        let cmd = Command::new(CMD_PUBLISH, tx)
            .with_arg(key)
            .with_arg("live")
            .on_stream(stream_id);
        self.send(&RtmpMessage::Command(cmd)).await?;

        loop {
            let cmd = match self.read_message().await? {
                RtmpMessage::Command(cmd) => cmd,
                _ => continue,
            };
            match cmd.name.as_str() {
                CMD_ON_STATUS => match cmd.status_code() {
                    Some(NS_PUBLISH_START) => return Ok(()),
                    Some(NS_PUBLISH_BAD_NAME)
                    | Some(NS_PUBLISH_BAD_CONNECTION)
                    | Some(NS_PUBLISH_UNAUTHORIZED) => {
                        return Err(rejection(&cmd, "publish refused"))
                    }
                    _ if cmd.status_level() == Some("error") => {
                        return Err(rejection(&cmd, "publish refused"))
                    }
                    code => tracing::debug!(?code, "Ignoring status before publish start"),
                },
                CMD_ERROR if cmd.transaction_id == tx => {
                    return Err(rejection(&cmd, "publish refused"))
                }
                _ => {}
            }
        }
    }

    /// Wait for `_result` or `_error` matching `tx`
    async fn await_response(&mut self, tx: f64) -> Result<Command> {
        loop {
            if let RtmpMessage::Command(cmd) = self.read_message().await? {
                if (cmd.name == CMD_RESULT || cmd.name == CMD_ERROR) && cmd.transaction_id == tx {
                    return Ok(cmd);
                }
                tracing::debug!(name = %cmd.name, "Ignoring command during setup");
            }
        }
    }

    /// Next non-control message; control messages are applied in place
    async fn read_message(&mut self) -> Result<RtmpMessage> {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            while let Some(raw) = self.decoder.next_message()? {
                let msg = RtmpMessage::from_raw(raw)?;
                match msg {
                    RtmpMessage::SetChunkSize(size) => self.decoder.set_chunk_size(size),
                    RtmpMessage::WindowAckSize(size) => self.ack.set_window(size),
                    RtmpMessage::UserControl(UserControlEvent::PingRequest(ts)) => {
                        self.send(&RtmpMessage::UserControl(UserControlEvent::PingResponse(ts)))
                            .await?;
                    }
                    RtmpMessage::Command(_) => return Ok(msg),
                    other => tracing::trace!(?other, "Setup message ignored"),
                }
            }
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed.into());
            }
            self.decoder.push(&buf[..n]);
            if let Some(seq) = self.ack.due(self.decoder.bytes_received()) {
                self.send(&RtmpMessage::Acknowledgement(seq)).await?;
            }
        }
    }

    async fn send(&mut self, msg: &RtmpMessage) -> Result<()> {
        self.encoder.encode(&msg.to_raw(), &mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        self.write_buf.clear();
        self.stream.flush().await?;
        Ok(())
    }

    fn transaction(&mut self) -> f64 {
        let tx = self.next_transaction;
        self.next_transaction += 1.0;
        tx
    }

    fn into_split(self, stream_id: u32, stream_key: String) -> PublishedConnection {
        let (read, write) = tokio::io::split(self.stream);
        PublishedConnection {
            writer: RtmpWriter {
                write,
                encoder: self.encoder,
                buf: self.write_buf,
                stream_id,
                stream_key,
                next_transaction: self.next_transaction,
            },
            reader: RtmpReader {
                read,
                decoder: self.decoder,
                ack: self.ack,
            },
        }
    }
}

fn rejection(cmd: &Command, fallback: &str) -> Error {
    let code = cmd.status_code().unwrap_or(fallback);
    let message = match cmd.status_description() {
        Some(desc) if !desc.is_empty() => format!("{}: {}", code, desc),
        _ => code.to_string(),
    };
    ProtocolError::Rejected(message).into()
}

/// Write side of a published connection
pub struct RtmpWriter<S = BoxedStream> {
    write: WriteHalf<S>,
    encoder: ChunkEncoder,
    buf: BytesMut,
    stream_id: u32,
    stream_key: String,
    next_transaction: f64,
}

impl<S: AsyncRead + AsyncWrite> RtmpWriter<S> {
    /// Message stream media is published on
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Write one message; returns bytes put on the wire
    pub async fn write_message(&mut self, msg: &RawMessage) -> std::io::Result<usize> {
        self.buf.clear();
        self.encoder.encode(msg, &mut self.buf);
        self.write.write_all(&self.buf).await?;
        self.write.flush().await?;
        Ok(self.buf.len())
    }

    pub async fn write_control(&mut self, msg: RtmpMessage) -> std::io::Result<usize> {
        self.write_message(&msg.to_raw()).await
    }

    /// `FCUnpublish` and `deleteStream`, then close the transport
    pub async fn close(&mut self) -> Result<()> {
        let tx = self.next_transaction;
        self.next_transaction += 2.0;
        let unpublish = Command::new(CMD_FC_UNPUBLISH, tx).with_arg(self.stream_key.as_str());
        let delete = Command::new(CMD_DELETE_STREAM, tx + 1.0).with_arg(self.stream_id);
        self.write_control(RtmpMessage::Command(unpublish)).await?;
        self.write_control(RtmpMessage::Command(delete)).await?;
        self.write.shutdown().await?;
        tracing::debug!(stream_id = self.stream_id, "Stream closed");
        Ok(())
    }
}

/// Inbound events the connection worker acts on
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Ping(u32),
    /// Acknowledgement owed for this many received bytes
    AckDue(u32),
    /// `onStatus` from the server while publishing
    Status { code: String, level: String },
}

/// Read side of a published connection
pub struct RtmpReader<S = BoxedStream> {
    read: ReadHalf<S>,
    decoder: ChunkDecoder,
    ack: AckWindow,
}

impl<S: AsyncRead + AsyncWrite> RtmpReader<S> {
    /// Next event worth acting on. Fails when the peer closes the connection.
    pub async fn next_event(&mut self) -> Result<InboundEvent> {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            while let Some(raw) = self.decoder.next_message()? {
                match RtmpMessage::from_raw(raw)? {
                    RtmpMessage::SetChunkSize(size) => self.decoder.set_chunk_size(size),
                    RtmpMessage::WindowAckSize(size) => self.ack.set_window(size),
                    RtmpMessage::UserControl(UserControlEvent::PingRequest(ts)) => {
                        return Ok(InboundEvent::Ping(ts))
                    }
                    RtmpMessage::Command(cmd) if cmd.name == CMD_ON_STATUS => {
                        return Ok(InboundEvent::Status {
                            code: cmd.status_code().unwrap_or_default().to_string(),
                            level: cmd.status_level().unwrap_or_default().to_string(),
                        })
                    }
                    other => tracing::trace!(?other, "Inbound message ignored"),
                }
            }
            let n = self.read.read(&mut buf).await?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed.into());
            }
            self.decoder.push(&buf[..n]);
            if let Some(seq) = self.ack.due(self.decoder.bytes_received()) {
                return Ok(InboundEvent::AckDue(seq));
            }
        }
    }
}
