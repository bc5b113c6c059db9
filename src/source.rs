//! Capture seam
//!
//! Camera and microphone access live outside this crate. A [`MediaSource`]
//! implementation pushes raw frames into the [`FrameSink`] it receives in
//! [`MediaSource::start_preview`]. While a stream session runs the sink
//! forwards frames to the encoder stage; otherwise frames are discarded.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::Result;
use crate::settings::{AudioInputType, VideoOrientation};
use crate::stats::StatsCounters;

/// Uncompressed video frame
#[derive(Debug, Clone)]
pub struct RawVideoFrame {
    pub width: u32,
    pub height: u32,
    /// Capture clock
    pub timestamp: Duration,
    pub data: Bytes,
}

/// Interleaved signed 16-bit PCM
#[derive(Debug, Clone)]
pub struct RawAudioFrame {
    pub timestamp: Duration,
    pub samples: Bytes,
}

impl RawAudioFrame {
    /// Same duration, all samples zero
    pub fn silence(&self) -> Self {
        Self {
            timestamp: self.timestamp,
            samples: Bytes::from(vec![0u8; self.samples.len()]),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RawFrame {
    Video(RawVideoFrame),
    Audio(RawAudioFrame),
}

/// Camera/microphone provider
#[async_trait]
pub trait MediaSource: Send + 'static {
    /// Start capturing into `sink`
    async fn start_preview(&mut self, sink: FrameSink) -> Result<()>;

    async fn stop_preview(&mut self) -> Result<()>;

    /// Swap front/back camera without stopping capture
    async fn switch_camera(&mut self) -> Result<()>;

    /// `Error::UnsupportedOperation` when the device has no flash
    async fn toggle_flash(&mut self) -> Result<()>;

    /// `Error::UnsupportedInput` when the route has no hardware path
    async fn set_audio_input(&mut self, input: AudioInputType) -> Result<()>;

    async fn set_orientation(&mut self, _orientation: VideoOrientation) -> Result<()> {
        Ok(())
    }

    /// Frame size the encoder is configured for. Sources that cannot scale
    /// may ignore it and the video codec scales instead. An error fails the
    /// settings change that asked for the size.
    async fn set_capture_size(&mut self, _width: u32, _height: u32) -> Result<()> {
        Ok(())
    }
}

/// Where captured frames go
///
/// Cheap to clone. Pushing never blocks: when the encoder queue is full the
/// frame is dropped and counted.
#[derive(Clone)]
pub struct FrameSink {
    route: Arc<RwLock<Option<mpsc::Sender<RawFrame>>>>,
    stats: Arc<StatsCounters>,
}

impl FrameSink {
    pub(crate) fn new(stats: Arc<StatsCounters>) -> Self {
        Self {
            route: Arc::new(RwLock::new(None)),
            stats,
        }
    }

    pub fn push_video(&self, frame: RawVideoFrame) {
        self.push(RawFrame::Video(frame));
    }

    pub fn push_audio(&self, frame: RawAudioFrame) {
        self.push(RawFrame::Audio(frame));
    }

    fn push(&self, frame: RawFrame) {
        let route = self.route.read();
        let Some(tx) = route.as_ref() else {
            return;
        };
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                StatsCounters::add(&self.stats.capture_drops, 1);
                tracing::trace!("Encoder queue full, capture frame dropped");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Whether frames currently reach an encoder
    pub fn is_routed(&self) -> bool {
        self.route.read().is_some()
    }

    pub(crate) fn connect(&self, tx: mpsc::Sender<RawFrame>) {
        *self.route.write() = Some(tx);
    }

    pub(crate) fn disconnect(&self) {
        self.route.write().take();
    }
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSink")
            .field("routed", &self.is_routed())
            .finish()
    }
}
