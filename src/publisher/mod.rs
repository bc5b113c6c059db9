//! Publisher facade
//!
//! [`Publisher`] is the handle a bridge layer holds. Commands are forwarded
//! to a control loop task and complete with a [`Result`]; queries read the
//! latest [`PublisherStatus`] snapshot without waiting on anything.
//!
//! ```no_run
//! # use rtmp_publisher::*;
//! # async fn demo(
//! #     source: impl MediaSource,
//! #     video: impl VideoCodec,
//! #     audio: impl AudioCodec,
//! # ) -> Result<()> {
//! let target = StreamTarget::from_parts("rtmp://live.example.com/app", "key")?;
//! let (publisher, mut events) =
//!     Publisher::with_tcp(PublisherConfig::default(), target, source, video, audio);
//!
//! publisher.start_stream().await?;
//! while let Some(event) = events.recv().await {
//!     if let PublisherEvent::StreamLost { .. } = event {
//!         break;
//!     }
//! }
//! publisher.shutdown().await
//! # }
//! ```

mod controller;
pub mod event;
pub mod state;
pub mod status;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::client::{Dialer, StreamTarget, TcpDialer};
use crate::config::PublisherConfig;
use crate::encoder::stage::Codecs;
use crate::encoder::{AudioCodec, VideoCodec};
use crate::error::{Error, Result};
use crate::settings::{AudioInputType, VideoOrientation, VideoSettings, VideoSettingsUpdate};
use crate::source::MediaSource;
use crate::stats::{PublishStats, StatsCounters};

use controller::{Controller, ControllerParts, Reply, Request};
pub use event::PublisherEvent;
pub use state::PublisherState;
pub use status::PublisherStatus;

const EVENT_QUEUE_CAPACITY: usize = 256;

/// Handle to a running publisher
///
/// Cloning is cheap; all clones drive the same control loop.
#[derive(Clone)]
pub struct Publisher {
    requests: mpsc::Sender<Request>,
    status: watch::Receiver<PublisherStatus>,
    stats: Arc<StatsCounters>,
    interrupt: Arc<Mutex<CancellationToken>>,
}

impl Publisher {
    /// Spawn the control loop. Must be called from within a Tokio runtime.
    pub fn new<S, V, A, D>(
        config: PublisherConfig,
        target: StreamTarget,
        source: S,
        video: V,
        audio: A,
        dialer: D,
    ) -> (Self, mpsc::Receiver<PublisherEvent>)
    where
        S: MediaSource,
        V: VideoCodec,
        A: AudioCodec,
        D: Dialer,
    {
        let (request_tx, request_rx) = mpsc::channel(config.command_queue_capacity);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (status_tx, status_rx) = watch::channel(PublisherStatus::default());
        let stats = Arc::new(StatsCounters::new());
        let interrupt = Arc::new(Mutex::new(CancellationToken::new()));

        let controller = Controller::new(ControllerParts {
            config,
            target,
            source: Box::new(source),
            codecs: Codecs {
                video: Box::new(video),
                audio: Box::new(audio),
            },
            dialer: Arc::new(dialer),
            stats: stats.clone(),
            interrupt: interrupt.clone(),
            status: status_tx,
            events: event_tx,
        });
        tokio::spawn(controller.run(request_rx));

        let publisher = Self {
            requests: request_tx,
            status: status_rx,
            stats,
            interrupt,
        };
        (publisher, event_rx)
    }

    /// [`Publisher::new`] over plain TCP
    pub fn with_tcp<S, V, A>(
        config: PublisherConfig,
        target: StreamTarget,
        source: S,
        video: V,
        audio: A,
    ) -> (Self, mpsc::Receiver<PublisherEvent>)
    where
        S: MediaSource,
        V: VideoCodec,
        A: AudioCodec,
    {
        let dialer = TcpDialer::new(config.connection.tcp_nodelay);
        Self::new(config, target, source, video, audio, dialer)
    }

    async fn request(&self, make: impl FnOnce(Reply) -> Request) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.requests.send(make(tx)).await.map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Start capture and prepare the codecs
    pub async fn start_preview(&self) -> Result<()> {
        self.request(Request::StartPreview).await
    }

    pub async fn stop_preview(&self) -> Result<()> {
        self.request(Request::StopPreview).await
    }

    /// Connect and publish. Starts the preview first if needed.
    pub async fn start_stream(&self) -> Result<()> {
        self.request(Request::StartStream).await
    }

    /// End the stream and the preview. Cancels a connect or reconnect in
    /// progress immediately. Succeeds when nothing is running.
    pub async fn stop_stream(&self) -> Result<()> {
        self.interrupt.lock().cancel();
        self.request(Request::StopStream).await
    }

    pub async fn switch_camera(&self) -> Result<()> {
        self.request(Request::SwitchCamera).await
    }

    /// No-op on devices without a flash
    pub async fn toggle_flash(&self) -> Result<()> {
        self.request(Request::ToggleFlash).await
    }

    /// Replace outgoing audio with silence. Timestamps keep advancing.
    pub async fn mute(&self) -> Result<()> {
        self.request(|reply| Request::SetMuted(true, reply)).await
    }

    pub async fn unmute(&self) -> Result<()> {
        self.request(|reply| Request::SetMuted(false, reply)).await
    }

    pub async fn set_audio_input(&self, input: AudioInputType) -> Result<()> {
        self.request(|reply| Request::SetAudioInput(input, reply)).await
    }

    /// Validate and apply. While streaming this fails with
    /// [`Error::RequiresRestart`] unless the codecs can change live, and the
    /// previous settings stay in effect.
    pub async fn set_video_settings(&self, update: VideoSettingsUpdate) -> Result<()> {
        self.request(|reply| Request::SetVideoSettings(update, reply)).await
    }

    /// Ignored for orientations outside the allowed set
    pub async fn set_orientation(&self, orientation: VideoOrientation) -> Result<()> {
        self.request(|reply| Request::SetOrientation(orientation, reply)).await
    }

    pub async fn set_allowed_orientations(&self, allowed: Vec<VideoOrientation>) -> Result<()> {
        self.request(|reply| Request::SetAllowedOrientations(allowed, reply)).await
    }

    /// Change the publish URL; only while not streaming
    pub async fn set_target(&self, target: StreamTarget) -> Result<()> {
        self.request(|reply| Request::SetTarget(target, reply)).await
    }

    /// Stop everything and end the control loop. Later commands fail with
    /// [`Error::Closed`].
    pub async fn shutdown(&self) -> Result<()> {
        self.interrupt.lock().cancel();
        match self.request(Request::Shutdown).await {
            Err(Error::Closed) => Ok(()),
            other => other,
        }
    }

    pub fn status(&self) -> PublisherStatus {
        self.status.borrow().clone()
    }

    /// Watch status snapshots as they change
    pub fn subscribe_status(&self) -> watch::Receiver<PublisherStatus> {
        self.status.clone()
    }

    pub fn state(&self) -> PublisherState {
        self.status.borrow().state
    }

    pub fn is_streaming(&self) -> bool {
        self.status.borrow().is_streaming
    }

    pub fn is_on_preview(&self) -> bool {
        self.status.borrow().is_on_preview
    }

    pub fn is_audio_muted(&self) -> bool {
        self.status.borrow().is_audio_muted
    }

    pub fn is_audio_prepared(&self) -> bool {
        self.status.borrow().is_audio_prepared
    }

    pub fn is_video_prepared(&self) -> bool {
        self.status.borrow().is_video_prepared
    }

    pub fn has_congestion(&self) -> bool {
        self.status.borrow().has_congestion
    }

    pub fn publish_url(&self) -> String {
        self.status.borrow().publish_url.clone()
    }

    pub fn video_settings(&self) -> VideoSettings {
        self.status.borrow().video_settings
    }

    pub fn audio_input(&self) -> AudioInputType {
        self.status.borrow().audio_input
    }

    pub fn stats(&self) -> PublishStats {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status.borrow();
        f.debug_struct("Publisher")
            .field("state", &status.state)
            .field("publish_url", &status.publish_url)
            .finish()
    }
}
