//! In-memory RTMP server, dialer, source and codecs for publisher tests

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use crate::amf::AmfValue;
use crate::client::{BoxedStream, Dialer, StreamTarget};
use crate::encoder::{
    AudioCodec, AudioEncoderConfig, EncodedVideo, EncoderCapabilities, VideoCodec,
    VideoEncoderConfig,
};
use crate::error::{Error, Result};
use crate::protocol::constants::*;
use crate::protocol::{
    ChunkDecoder, ChunkEncoder, Command, Handshake, HandshakeRole, RtmpMessage,
};
use crate::settings::AudioInputType;
use crate::source::{FrameSink, MediaSource, RawAudioFrame, RawVideoFrame};

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// How the server behind one dial behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServerMode {
    Accept,
    /// Drop the socket after this many audio/video messages
    AcceptThenDrop(usize),
    RejectConnect,
    RejectPublish,
    /// Read slowly for this long once media starts, then at full speed
    Throttle(Duration),
    /// Dial fails outright
    Refuse,
}

/// Everything one server connection received, in order
pub(crate) type ServerLog = Arc<Mutex<Vec<RtmpMessage>>>;

/// Dialer handing out in-memory connections to scripted servers
#[derive(Clone)]
pub(crate) struct TestDialer {
    script: Arc<Mutex<VecDeque<ServerMode>>>,
    fallback: ServerMode,
    attempts: Arc<AtomicU32>,
    logs: Arc<Mutex<Vec<ServerLog>>>,
}

impl TestDialer {
    pub fn new(script: impl IntoIterator<Item = ServerMode>, fallback: ServerMode) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            fallback,
            attempts: Arc::new(AtomicU32::new(0)),
            logs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn accepting() -> Self {
        Self::new([], ServerMode::Accept)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Log of the `n`th server connection that got past dialing
    pub fn log(&self, n: usize) -> Vec<RtmpMessage> {
        self.logs.lock().get(n).map(|l| l.lock().clone()).unwrap_or_default()
    }

    pub fn connections(&self) -> usize {
        self.logs.lock().len()
    }
}

#[async_trait]
impl Dialer for TestDialer {
    async fn dial(&self, _target: &StreamTarget) -> io::Result<BoxedStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mode = self.script.lock().pop_front().unwrap_or(self.fallback);
        if mode == ServerMode::Refuse {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
        }
        let buffer = match mode {
            ServerMode::Throttle(_) => 4 * 1024,
            _ => 64 * 1024,
        };
        let (client, server) = tokio::io::duplex(buffer);
        let log = ServerLog::default();
        self.logs.lock().push(log.clone());
        tokio::spawn(serve(server, mode, log));
        Ok(Box::new(client))
    }
}

async fn serve(mut io: DuplexStream, mode: ServerMode, log: ServerLog) {
    if let Err(e) = run_server(&mut io, mode, &log).await {
        tracing::debug!(error = %e, "Test server finished");
    }
}

async fn run_server(io: &mut DuplexStream, mode: ServerMode, log: &ServerLog) -> Result<()> {
    let mut hs = Handshake::new(HandshakeRole::Server);
    let mut input = BytesMut::new();
    while !hs.is_done() {
        if io.read_buf(&mut input).await? == 0 {
            return Ok(());
        }
        if let Some(reply) = hs.advance(&mut input)? {
            io.write_all(&reply).await?;
        }
    }

    let mut decoder = ChunkDecoder::new();
    let mut encoder = ChunkEncoder::new();
    decoder.push(&input);
    let mut media = 0usize;
    let mut throttle_until = None;
    let mut buf = [0u8; 8192];

    loop {
        while let Some(raw) = decoder.next_message()? {
            let msg = RtmpMessage::from_raw(raw)?;
            let reply = match &msg {
                RtmpMessage::SetChunkSize(size) => {
                    decoder.set_chunk_size(*size);
                    None
                }
                RtmpMessage::Command(cmd) => command_reply(cmd, mode),
                RtmpMessage::Audio { .. } | RtmpMessage::Video { .. } => {
                    media += 1;
                    if let (ServerMode::Throttle(period), None) = (mode, throttle_until) {
                        throttle_until = Some(tokio::time::Instant::now() + period);
                    }
                    None
                }
                _ => None,
            };
            log.lock().push(msg);

            if let Some(reply) = reply {
                let mut out = BytesMut::new();
                encoder.encode(&RtmpMessage::Command(reply).to_raw(), &mut out);
                io.write_all(&out).await?;
            }
            if let ServerMode::AcceptThenDrop(limit) = mode {
                if media >= limit {
                    return Ok(());
                }
            }
        }
        let limit = match throttle_until {
            Some(until) if tokio::time::Instant::now() < until => {
                tokio::time::sleep(Duration::from_millis(250)).await;
                256
            }
            _ => buf.len(),
        };
        let n = io.read(&mut buf[..limit]).await?;
        if n == 0 {
            return Ok(());
        }
        decoder.push(&buf[..n]);
    }
}

fn command_reply(cmd: &Command, mode: ServerMode) -> Option<Command> {
    let status = |level: &str, code: &str| {
        AmfValue::object([
            ("level", AmfValue::from(level)),
            ("code", AmfValue::from(code)),
            ("description", AmfValue::from("test server")),
        ])
    };
    match cmd.name.as_str() {
        CMD_CONNECT if mode == ServerMode::RejectConnect => Some(
            Command::new(CMD_ERROR, cmd.transaction_id)
                .with_arg(status("error", NC_CONNECT_REJECTED)),
        ),
        CMD_CONNECT => Some(
            Command::new(CMD_RESULT, cmd.transaction_id)
                .with_object(AmfValue::object([("fmsVer", "FMS/3,0,1,123")]))
                .with_arg(status("status", NC_CONNECT_SUCCESS)),
        ),
        CMD_CREATE_STREAM => Some(Command::new(CMD_RESULT, cmd.transaction_id).with_arg(1.0)),
        CMD_PUBLISH if mode == ServerMode::RejectPublish => Some(
            Command::new(CMD_ON_STATUS, 0.0)
                .with_arg(status("error", NS_PUBLISH_UNAUTHORIZED))
                .on_stream(cmd.stream_id),
        ),
        CMD_PUBLISH => Some(
            Command::new(CMD_ON_STATUS, 0.0)
                .with_arg(status("status", NS_PUBLISH_START))
                .on_stream(cmd.stream_id),
        ),
        _ => None,
    }
}

/// Source generating 30 fps video and 1024-sample audio frames on the
/// Tokio clock
pub(crate) struct TestSource {
    size: Arc<Mutex<(u32, u32)>>,
    /// Ignore `set_capture_size` and keep the sensor size
    fixed: bool,
    /// Reject capture sizes wider than this
    max_width: u32,
    /// Sensor size of the other camera
    other_camera: Option<(u32, u32)>,
    has_flash: bool,
    switches: Arc<AtomicU32>,
    generator: Option<JoinHandle<()>>,
}

impl TestSource {
    pub fn new() -> Self {
        Self {
            size: Arc::new(Mutex::new((720, 1280))),
            fixed: false,
            max_width: u32::MAX,
            other_camera: None,
            has_flash: false,
            switches: Arc::new(AtomicU32::new(0)),
            generator: None,
        }
    }

    /// Camera that always delivers 720x1280
    pub fn fixed_geometry(mut self) -> Self {
        self.fixed = true;
        self
    }

    pub fn max_width(mut self, width: u32) -> Self {
        self.max_width = width;
        self
    }

    /// `switch_camera` moves to a sensor of this size
    pub fn other_camera(mut self, width: u32, height: u32) -> Self {
        self.other_camera = Some((width, height));
        self
    }

    pub fn switches(&self) -> Arc<AtomicU32> {
        self.switches.clone()
    }
}

#[async_trait]
impl MediaSource for TestSource {
    async fn start_preview(&mut self, sink: FrameSink) -> Result<()> {
        if let Some(task) = self.generator.take() {
            task.abort();
        }
        self.generator = Some(tokio::spawn(generate(sink, self.size.clone())));
        Ok(())
    }

    async fn stop_preview(&mut self) -> Result<()> {
        if let Some(task) = self.generator.take() {
            task.abort();
        }
        Ok(())
    }

    async fn switch_camera(&mut self) -> Result<()> {
        self.switches.fetch_add(1, Ordering::SeqCst);
        if let Some(other) = self.other_camera {
            let previous = std::mem::replace(&mut *self.size.lock(), other);
            self.other_camera = Some(previous);
        }
        Ok(())
    }

    async fn toggle_flash(&mut self) -> Result<()> {
        if self.has_flash {
            Ok(())
        } else {
            Err(Error::UnsupportedOperation("no flash on this camera".into()))
        }
    }

    async fn set_audio_input(&mut self, input: AudioInputType) -> Result<()> {
        match input {
            AudioInputType::Bluetooth => Err(Error::UnsupportedInput(input)),
            _ => Ok(()),
        }
    }

    async fn set_capture_size(&mut self, width: u32, height: u32) -> Result<()> {
        if width > self.max_width {
            return Err(Error::UnsupportedOperation(format!(
                "camera cannot capture {}x{}",
                width, height
            )));
        }
        if !self.fixed {
            *self.size.lock() = (width, height);
        }
        Ok(())
    }
}

impl Drop for TestSource {
    fn drop(&mut self) {
        if let Some(task) = self.generator.take() {
            task.abort();
        }
    }
}

async fn generate(sink: FrameSink, size: Arc<Mutex<(u32, u32)>>) {
    let start = tokio::time::Instant::now();
    let mut video = tokio::time::interval(Duration::from_micros(33_333));
    let mut audio = tokio::time::interval(Duration::from_micros(23_220));
    loop {
        tokio::select! {
            _ = video.tick() => {
                let (width, height) = *size.lock();
                sink.push_video(RawVideoFrame {
                    width,
                    height,
                    timestamp: start.elapsed(),
                    data: Bytes::from_static(&[0x10; 64]),
                });
            }
            _ = audio.tick() => {
                sink.push_audio(RawAudioFrame {
                    timestamp: start.elapsed(),
                    samples: Bytes::from_static(&[0x7F; 32]),
                });
            }
        }
    }
}

const SPS_PPS: &[u8] = &[
    0, 0, 0, 1, 0x67, 0x64, 0x00, 0x1F, 0xAC, 0xD9, 0, 0, 0, 1, 0x68, 0xEB, 0xE3, 0xCB,
];

/// H.264 stand-in: fixed parameter sets, one tiny NAL per frame, a keyframe
/// every 30 frames or on request
pub(crate) struct TestVideoCodec {
    live: bool,
    frames: u64,
}

impl TestVideoCodec {
    pub fn new(live: bool) -> Self {
        Self { live, frames: 0 }
    }
}

impl VideoCodec for TestVideoCodec {
    fn capabilities(&self) -> EncoderCapabilities {
        EncoderCapabilities {
            live_reconfigure: self.live,
            ..Default::default()
        }
    }

    fn configure(&mut self, _config: &VideoEncoderConfig) -> Result<Bytes> {
        self.frames = 0;
        Ok(Bytes::from_static(SPS_PPS))
    }

    fn encode(
        &mut self,
        _frame: &RawVideoFrame,
        force_keyframe: bool,
    ) -> Result<Vec<EncodedVideo>> {
        let keyframe = force_keyframe || self.frames % 30 == 0;
        self.frames += 1;
        let nal: &'static [u8] = if keyframe {
            &[0, 0, 0, 1, 0x65, 0x88, 0x84]
        } else {
            &[0, 0, 0, 1, 0x41, 0x9A, 0x02]
        };
        Ok(vec![EncodedVideo {
            data: Bytes::from_static(nal),
            keyframe,
            composition_offset: 0,
        }])
    }
}

/// AAC stand-in that passes PCM through, so tests can see silence
pub(crate) struct TestAudioCodec {
    live: bool,
}

impl TestAudioCodec {
    pub fn new(live: bool) -> Self {
        Self { live }
    }
}

impl AudioCodec for TestAudioCodec {
    fn capabilities(&self) -> EncoderCapabilities {
        EncoderCapabilities {
            live_reconfigure: self.live,
            ..Default::default()
        }
    }

    fn configure(&mut self, _config: &AudioEncoderConfig) -> Result<Bytes> {
        Ok(Bytes::new())
    }

    fn encode(&mut self, frame: &RawAudioFrame) -> Result<Vec<Bytes>> {
        Ok(vec![frame.samples.clone()])
    }
}
