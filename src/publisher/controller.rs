//! Control loop
//!
//! A single task owns every piece of mutable publisher state: the source,
//! the codecs between sessions, the settings store and the active stream
//! session. [`Publisher`](super::Publisher) methods reach it through a
//! bounded request channel, each request carrying a oneshot for its result.
//! Session events from the connection worker arrive on a second channel and
//! are handled in the same `select!`, so state transitions never race.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::event::PublisherEvent;
use super::state::PublisherState;
use super::status::PublisherStatus;
use crate::client::{Dialer, PublishedConnection, StreamTarget};
use crate::config::PublisherConfig;
use crate::connection::manager::{ConnectionWorker, WorkerContext};
use crate::connection::{establish_interruptible, QueuedBytes, SessionEvent};
use crate::encoder::stage::{
    prepare_audio, prepare_video, Codecs, EncoderStage, PreparedAudio, PreparedVideo,
    StageControl, StageExit, StageShared,
};
use crate::encoder::{
    AudioEncoderConfig, EncoderCapabilities, TimestampSync, VideoEncoderConfig,
};
use crate::error::{Error, Result};
use crate::settings::{
    AudioInputType, SettingsLimits, SettingsStore, VideoOrientation, VideoSettings,
    VideoSettingsUpdate,
};
use crate::source::{FrameSink, MediaSource};
use crate::stats::StatsCounters;

pub(crate) type Reply = oneshot::Sender<Result<()>>;

pub(crate) enum Request {
    StartPreview(Reply),
    StopPreview(Reply),
    StartStream(Reply),
    StopStream(Reply),
    SwitchCamera(Reply),
    ToggleFlash(Reply),
    SetMuted(bool, Reply),
    SetAudioInput(AudioInputType, Reply),
    SetVideoSettings(VideoSettingsUpdate, Reply),
    SetOrientation(VideoOrientation, Reply),
    SetAllowedOrientations(Vec<VideoOrientation>, Reply),
    SetTarget(StreamTarget, Reply),
    Shutdown(Reply),
}

/// Tasks and channels of one live stream
struct StreamSession {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    control: mpsc::Sender<StageControl>,
    stage: JoinHandle<StageExit>,
    worker: JoinHandle<()>,
    interrupt: CancellationToken,
    hard_stop: CancellationToken,
}

pub(crate) struct ControllerParts {
    pub config: PublisherConfig,
    pub target: StreamTarget,
    pub source: Box<dyn MediaSource>,
    pub codecs: Codecs,
    pub dialer: Arc<dyn Dialer>,
    pub stats: Arc<StatsCounters>,
    pub interrupt: Arc<Mutex<CancellationToken>>,
    pub status: watch::Sender<PublisherStatus>,
    pub events: mpsc::Sender<PublisherEvent>,
}

pub(crate) struct Controller {
    config: PublisherConfig,
    target: StreamTarget,
    source: Box<dyn MediaSource>,
    /// `None` while a session's encoder stage owns them
    codecs: Option<Codecs>,
    video_caps: EncoderCapabilities,
    audio_caps: EncoderCapabilities,
    prepared_video: Option<PreparedVideo>,
    prepared_audio: Option<PreparedAudio>,
    dialer: Arc<dyn Dialer>,
    settings: SettingsStore,
    state: PublisherState,
    congested: bool,
    shared: Arc<StageShared>,
    sink: FrameSink,
    stats: Arc<StatsCounters>,
    /// Token of the next or current connect; the handle cancels it directly
    interrupt: Arc<Mutex<CancellationToken>>,
    session: Option<StreamSession>,
    status: watch::Sender<PublisherStatus>,
    events: mpsc::Sender<PublisherEvent>,
}

impl Controller {
    pub fn new(parts: ControllerParts) -> Self {
        let video_caps = parts.codecs.video.capabilities();
        let audio_caps = parts.codecs.audio.capabilities();
        let limits = SettingsLimits {
            audio_bitrate: audio_caps.limits.audio_bitrate.clone(),
            ..video_caps.limits.clone()
        };
        let controller = Self {
            config: parts.config,
            target: parts.target,
            source: parts.source,
            codecs: Some(parts.codecs),
            video_caps,
            audio_caps,
            prepared_video: None,
            prepared_audio: None,
            dialer: parts.dialer,
            settings: SettingsStore::new(limits),
            state: PublisherState::Idle,
            congested: false,
            shared: Arc::new(StageShared::default()),
            sink: FrameSink::new(parts.stats.clone()),
            stats: parts.stats,
            interrupt: parts.interrupt,
            session: None,
            status: parts.status,
            events: parts.events,
        };
        controller.publish_status();
        controller
    }

    pub async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        tracing::debug!(url = %self.target, "Control loop started");
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Shutdown(reply)) => {
                        self.shutdown().await;
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    Some(request) => self.handle(request).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                event = next_session_event(&mut self.session) => match event {
                    Some(event) => self.on_session_event(event).await,
                    None => self.on_worker_exit().await,
                },
            }
        }
        tracing::debug!("Control loop finished");
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::StartPreview(reply) => {
                let _ = reply.send(self.start_preview().await);
            }
            Request::StopPreview(reply) => {
                let _ = reply.send(self.stop_preview().await);
            }
            Request::StartStream(reply) => {
                let _ = reply.send(self.start_stream().await);
            }
            Request::StopStream(reply) => {
                let _ = reply.send(self.stop_stream().await);
            }
            Request::SwitchCamera(reply) => {
                let _ = reply.send(self.switch_camera().await);
            }
            Request::ToggleFlash(reply) => {
                let _ = reply.send(self.toggle_flash().await);
            }
            Request::SetMuted(muted, reply) => {
                let _ = reply.send(self.set_muted(muted));
            }
            Request::SetAudioInput(input, reply) => {
                let _ = reply.send(self.set_audio_input(input).await);
            }
            Request::SetVideoSettings(update, reply) => {
                let _ = reply.send(self.set_video_settings(update).await);
            }
            Request::SetOrientation(orientation, reply) => {
                let _ = reply.send(self.set_orientation(orientation).await);
            }
            Request::SetAllowedOrientations(allowed, reply) => {
                let _ = reply.send(self.set_allowed_orientations(allowed).await);
            }
            Request::SetTarget(target, reply) => {
                let _ = reply.send(self.set_target(target));
            }
            Request::Shutdown(reply) => {
                self.shutdown().await;
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn start_preview(&mut self) -> Result<()> {
        match self.state {
            PublisherState::PreviewReady => return Ok(()),
            PublisherState::Idle => {}
            state => {
                return Err(Error::InvalidState {
                    operation: "start_preview",
                    state,
                })
            }
        }

        let (width, height) = self.settings.geometry();
        self.source.set_capture_size(width, height).await?;
        self.source.start_preview(self.sink.clone()).await?;
        if let Err(e) = self.prepare_codecs() {
            tracing::warn!(error = %e, "Codec preparation failed");
            self.stop_source().await;
            return Err(e);
        }
        self.set_state(PublisherState::PreviewReady);
        Ok(())
    }

    async fn stop_preview(&mut self) -> Result<()> {
        match self.state {
            PublisherState::Idle => Ok(()),
            PublisherState::PreviewReady => {
                self.stop_source().await;
                self.set_state(PublisherState::Idle);
                Ok(())
            }
            state => Err(Error::InvalidState {
                operation: "stop_preview",
                state,
            }),
        }
    }

    async fn start_stream(&mut self) -> Result<()> {
        match self.state {
            PublisherState::Idle => self.start_preview().await?,
            PublisherState::PreviewReady => {}
            state => {
                return Err(Error::InvalidState {
                    operation: "start_stream",
                    state,
                })
            }
        }

        self.set_state(PublisherState::Starting);
        self.emit(PublisherEvent::ConnectionStarted);
        let interrupt = self.interrupt.lock().clone();
        tracing::info!(url = %self.target, "Connecting");

        let connected = establish_interruptible(
            self.dialer.as_ref(),
            &self.target,
            &self.config.connection,
            &interrupt,
        )
        .await;
        let result = connected.and_then(|conn| self.spawn_session(conn, interrupt));

        match result {
            Ok(session) => {
                self.session = Some(session);
                self.set_state(PublisherState::Streaming);
                self.emit(PublisherEvent::ConnectionSuccess);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(url = %self.target, error = %e, "Stream start failed");
                if let Some(kind) = e.connect_reason() {
                    self.emit(PublisherEvent::ConnectionFailed {
                        kind,
                        message: e.to_string(),
                    });
                }
                self.renew_interrupt();
                self.stop_source().await;
                self.set_state(PublisherState::Idle);
                Err(e)
            }
        }
    }

    fn spawn_session(
        &mut self,
        conn: PublishedConnection,
        interrupt: CancellationToken,
    ) -> Result<StreamSession> {
        let (video, audio) = match (&self.prepared_video, &self.prepared_audio) {
            (Some(v), Some(a)) => (v.clone(), a.clone()),
            _ => return Err(Error::Codec("codecs are not prepared".into())),
        };
        let codecs = self
            .codecs
            .take()
            .ok_or_else(|| Error::Codec("codecs are unavailable".into()))?;

        let config = &self.config;
        let hard_stop = CancellationToken::new();
        let queued = QueuedBytes::new();
        let (raw_tx, raw_rx) = mpsc::channel(config.raw_queue_capacity);
        let (encoded_tx, encoded_rx) = mpsc::channel(config.encoded_queue_capacity);
        let (control_tx, control_rx) = mpsc::channel(4);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let stage = EncoderStage::new(
            codecs,
            video,
            audio,
            TimestampSync::new(config.max_av_skew),
            self.shared.clone(),
            self.stats.clone(),
            queued.clone(),
            encoded_tx,
        );
        let stage = tokio::spawn(stage.run(raw_rx, control_rx, hard_stop.clone()));

        let worker = ConnectionWorker::new(WorkerContext {
            config: config.connection.clone(),
            target: self.target.clone(),
            dialer: self.dialer.clone(),
            stats: self.stats.clone(),
            queued,
            shared: self.shared.clone(),
            events: events_tx,
            interrupt: interrupt.clone(),
            hard_stop: hard_stop.clone(),
            stats_interval: config.stats_interval,
        });
        let worker = tokio::spawn(worker.run(conn, encoded_rx));

        self.sink.connect(raw_tx);
        Ok(StreamSession {
            events: events_rx,
            control: control_tx,
            stage,
            worker,
            interrupt,
            hard_stop,
        })
    }

    async fn stop_stream(&mut self) -> Result<()> {
        self.interrupt.lock().cancel();
        match self.state {
            PublisherState::Idle => {}
            PublisherState::PreviewReady => {
                self.stop_source().await;
                self.set_state(PublisherState::Idle);
            }
            _ => {
                self.end_session(true).await;
                self.stop_source().await;
                self.set_state(PublisherState::Idle);
                self.emit(PublisherEvent::Disconnected);
                tracing::info!(url = %self.target, "Stream stopped");
            }
        }
        self.renew_interrupt();
        Ok(())
    }

    /// Tear down the session and take the codecs back.
    ///
    /// A graceful end lets the encoder flush and the worker drain within
    /// `stop_timeout` before writes are cut.
    async fn end_session(&mut self, graceful: bool) {
        let Some(session) = self.session.take() else {
            return;
        };
        let StreamSession {
            events,
            control,
            stage,
            mut worker,
            interrupt,
            hard_stop,
        } = session;

        interrupt.cancel();
        self.sink.disconnect();
        drop(control);

        if graceful {
            self.set_state(PublisherState::Stopping);
            let timeout = self.config.stop_timeout;
            if tokio::time::timeout(timeout, &mut worker).await.is_err() {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Graceful stop timed out, cutting writes"
                );
                hard_stop.cancel();
                let _ = worker.await;
            }
        } else {
            hard_stop.cancel();
            let _ = worker.await;
        }
        hard_stop.cancel();

        match stage.await {
            Ok(exit) => {
                self.codecs = Some(exit.codecs);
                self.prepared_video = Some(exit.video);
                self.prepared_audio = Some(exit.audio);
            }
            Err(e) => {
                tracing::error!(error = %e, "Encoder stage failed, codecs lost");
                self.prepared_video = None;
                self.prepared_audio = None;
            }
        }
        drop(events);
        self.set_congested(false);
    }

    async fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Congestion(flag) => self.set_congested(flag),
            SessionEvent::Bitrate(bitrate) => self.emit(PublisherEvent::BitrateChanged(bitrate)),
            SessionEvent::Reconnecting { attempt, delay } => {
                self.set_state(PublisherState::Reconnecting);
                self.emit(PublisherEvent::Reconnecting { attempt, delay });
            }
            SessionEvent::Reconnected => {
                self.set_state(PublisherState::Streaming);
                self.emit(PublisherEvent::ConnectionSuccess);
            }
            SessionEvent::Lost { attempts, message } => {
                if self.session.is_none() {
                    return;
                }
                tracing::error!(url = %self.target, attempts, error = %message, "Stream lost");
                self.end_session(false).await;
                self.stop_source().await;
                self.renew_interrupt();
                self.set_state(PublisherState::Idle);
                self.emit(PublisherEvent::StreamLost { attempts, message });
            }
        }
    }

    /// The worker finished without reporting a loss
    async fn on_worker_exit(&mut self) {
        let interrupted = self
            .session
            .as_ref()
            .is_some_and(|s| s.interrupt.is_cancelled());
        if interrupted {
            // A stop request is queued behind the interrupt; collect the
            // codecs now and let it finish the transition.
            self.end_session(true).await;
            return;
        }
        self.on_session_event(SessionEvent::Lost {
            attempts: 0,
            message: "connection worker exited".into(),
        })
        .await;
    }

    async fn switch_camera(&mut self) -> Result<()> {
        match self.state {
            PublisherState::PreviewReady
            | PublisherState::Streaming
            | PublisherState::Reconnecting => {}
            state => {
                return Err(Error::InvalidState {
                    operation: "switch_camera",
                    state,
                })
            }
        }
        self.shared.expect_camera_switch();
        if let Err(e) = self.source.switch_camera().await {
            self.shared.clear_camera_switch();
            return Err(e);
        }
        self.shared.request_keyframe();
        tracing::info!("Camera switched");
        Ok(())
    }

    async fn toggle_flash(&mut self) -> Result<()> {
        match self.source.toggle_flash().await {
            Err(Error::UnsupportedOperation(reason)) => {
                tracing::info!(%reason, "Flash toggle ignored");
                Ok(())
            }
            other => other,
        }
    }

    fn set_muted(&mut self, muted: bool) -> Result<()> {
        if self.shared.set_muted(muted) {
            tracing::info!(muted, "Audio mute changed");
            self.publish_status();
        }
        Ok(())
    }

    async fn set_audio_input(&mut self, input: AudioInputType) -> Result<()> {
        self.source.set_audio_input(input).await?;
        self.settings.set_audio_input(input);
        tracing::info!(%input, "Audio input changed");
        self.publish_status();
        Ok(())
    }

    async fn set_video_settings(&mut self, update: VideoSettingsUpdate) -> Result<()> {
        let settings = self.settings.prepare(&update)?;
        self.apply_video(settings, self.settings.orientation()).await?;
        self.settings.commit(settings);
        tracing::info!(
            width = settings.width,
            height = settings.height,
            bitrate = settings.bitrate,
            audio_bitrate = settings.audio_bitrate,
            "Video settings applied"
        );
        self.publish_status();
        Ok(())
    }

    async fn set_orientation(&mut self, orientation: VideoOrientation) -> Result<()> {
        if !self.settings.accepts_orientation(orientation) {
            return Ok(());
        }
        self.apply_video(self.settings.video(), orientation).await?;
        self.settings.set_orientation(orientation);
        if let Err(e) = self.source.set_orientation(orientation).await {
            tracing::warn!(error = %e, ?orientation, "Source rejected orientation");
        }
        self.publish_status();
        Ok(())
    }

    /// Narrow the orientations `set_orientation` accepts. If the current one
    /// is no longer allowed, rotate to the first allowed one.
    async fn set_allowed_orientations(&mut self, allowed: Vec<VideoOrientation>) -> Result<()> {
        let current = self.settings.orientation();
        let replacement = if allowed.contains(&current) {
            None
        } else {
            VideoOrientation::ALL.into_iter().find(|o| allowed.contains(o))
        };
        if let Some(orientation) = replacement {
            self.apply_video(self.settings.video(), orientation).await?;
            self.settings.set_orientation(orientation);
            if let Err(e) = self.source.set_orientation(orientation).await {
                tracing::warn!(error = %e, ?orientation, "Source rejected orientation");
            }
            tracing::info!(from = ?current, to = ?orientation, "Orientation no longer allowed");
        }
        tracing::debug!(?allowed, "Allowed orientations changed");
        self.settings.set_allowed_orientations(allowed);
        self.publish_status();
        Ok(())
    }

    /// Push settings to the source and the codecs: live while streaming, by
    /// re-preparing when prepared. A failure leaves both as they were.
    async fn apply_video(
        &mut self,
        settings: VideoSettings,
        orientation: VideoOrientation,
    ) -> Result<()> {
        let video_config = self.video_encoder_config(&settings, orientation);
        let audio_config = self.audio_encoder_config(settings.audio_bitrate);
        if self.session.is_some() {
            // The stage may have adopted a new camera's size
            let (width, height) = self.shared.geometry();
            if let Some(p) = self.prepared_video.as_mut() {
                p.config.width = width;
                p.config.height = height;
            }
        }
        let video_changed = self.prepared_video.as_ref().map(|p| p.config) != Some(video_config);
        let audio_changed = self.prepared_audio.as_ref().map(|p| p.config) != Some(audio_config);

        if self.session.is_some() {
            if video_changed && !self.video_caps.live_reconfigure {
                return Err(Error::RequiresRestart(
                    "video encoder cannot change geometry or bitrate while streaming".into(),
                ));
            }
            if audio_changed && !self.audio_caps.live_reconfigure {
                return Err(Error::RequiresRestart(
                    "audio encoder cannot change bitrate while streaming".into(),
                ));
            }
        }

        let (previous_width, previous_height) = self.settings.geometry();
        self.source
            .set_capture_size(video_config.width, video_config.height)
            .await?;
        let applied = self
            .apply_codecs(video_config, audio_config, video_changed, audio_changed)
            .await;
        if let Err(e) = applied {
            if let Err(e) = self.source.set_capture_size(previous_width, previous_height).await {
                tracing::warn!(error = %e, "Source could not restore capture size");
            }
            return Err(e);
        }
        if video_changed {
            self.shared.clear_camera_switch();
        }
        Ok(())
    }

    async fn apply_codecs(
        &mut self,
        video_config: VideoEncoderConfig,
        audio_config: AudioEncoderConfig,
        video_changed: bool,
        audio_changed: bool,
    ) -> Result<()> {
        if let Some(session) = &self.session {
            if video_changed || audio_changed {
                let control = session.control.clone();
                let (tx, rx) = oneshot::channel();
                let request = StageControl::Reconfigure {
                    video: video_changed.then_some(video_config),
                    audio: audio_changed.then_some(audio_config),
                    reply: tx,
                };
                let stopped = || Error::Codec("encoder stage is not running".into());
                control.send(request).await.map_err(|_| stopped())?;
                rx.await.map_err(|_| stopped())??;

                if let Some(p) = self.prepared_video.as_mut() {
                    p.config = video_config;
                }
                if let Some(p) = self.prepared_audio.as_mut() {
                    p.config = audio_config;
                }
            }
        } else if self.prepared_video.is_some() || self.prepared_audio.is_some() {
            self.reprepare(video_config, audio_config)?;
        }
        Ok(())
    }

    /// Reconfigure idle codecs; on failure both keep their previous config
    fn reprepare(
        &mut self,
        video_config: VideoEncoderConfig,
        audio_config: AudioEncoderConfig,
    ) -> Result<()> {
        let codecs = self
            .codecs
            .as_mut()
            .ok_or_else(|| Error::Codec("codecs are unavailable".into()))?;

        let video = match prepare_video(codecs.video.as_mut(), video_config) {
            Ok(video) => video,
            Err(e) => {
                if let Some(prev) = &self.prepared_video {
                    let _ = codecs.video.configure(&prev.config);
                }
                return Err(e);
            }
        };
        let audio = match prepare_audio(codecs.audio.as_mut(), audio_config) {
            Ok(audio) => audio,
            Err(e) => {
                if let Some(prev) = &self.prepared_video {
                    let _ = codecs.video.configure(&prev.config);
                }
                if let Some(prev) = &self.prepared_audio {
                    let _ = codecs.audio.configure(&prev.config);
                }
                return Err(e);
            }
        };
        self.prepared_video = Some(video);
        self.prepared_audio = Some(audio);
        Ok(())
    }

    fn set_target(&mut self, target: StreamTarget) -> Result<()> {
        match self.state {
            PublisherState::Idle | PublisherState::PreviewReady => {
                tracing::info!(url = %target, "Target changed");
                self.target = target;
                self.publish_status();
                Ok(())
            }
            state => Err(Error::InvalidState {
                operation: "set_target",
                state,
            }),
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.stop_stream().await {
            tracing::warn!(error = %e, "Error during shutdown");
        }
        tracing::info!("Publisher shut down");
    }

    fn prepare_codecs(&mut self) -> Result<()> {
        let settings = self.settings.video();
        let video_config = self.video_encoder_config(&settings, self.settings.orientation());
        let audio_config = self.audio_encoder_config(settings.audio_bitrate);
        let codecs = self
            .codecs
            .as_mut()
            .ok_or_else(|| Error::Codec("codecs are unavailable".into()))?;
        let video = prepare_video(codecs.video.as_mut(), video_config)?;
        let audio = prepare_audio(codecs.audio.as_mut(), audio_config)?;
        self.prepared_video = Some(video);
        self.prepared_audio = Some(audio);
        Ok(())
    }

    async fn stop_source(&mut self) {
        if let Err(e) = self.source.stop_preview().await {
            tracing::warn!(error = %e, "Source did not stop cleanly");
        }
        self.prepared_video = None;
        self.prepared_audio = None;
    }

    fn video_encoder_config(
        &self,
        settings: &VideoSettings,
        orientation: VideoOrientation,
    ) -> VideoEncoderConfig {
        let (width, height) = SettingsStore::geometry_for(settings, orientation);
        VideoEncoderConfig {
            width,
            height,
            bitrate: settings.bitrate,
            frame_rate: self.config.frame_rate,
            keyframe_interval: self.config.keyframe_interval,
        }
    }

    fn audio_encoder_config(&self, bitrate: u32) -> AudioEncoderConfig {
        AudioEncoderConfig {
            bitrate,
            sample_rate: self.config.audio_sample_rate,
            channels: self.config.audio_channels,
        }
    }

    fn renew_interrupt(&self) {
        let mut slot = self.interrupt.lock();
        if slot.is_cancelled() {
            *slot = CancellationToken::new();
        }
    }

    fn set_congested(&mut self, congested: bool) {
        if self.congested != congested {
            self.congested = congested;
            self.emit(PublisherEvent::CongestionChanged(congested));
            self.publish_status();
        }
    }

    fn set_state(&mut self, state: PublisherState) {
        if self.state == state {
            return;
        }
        tracing::info!(from = %self.state, to = %state, "State changed");
        self.state = state;
        self.emit(PublisherEvent::StateChanged(state));
        self.publish_status();
    }

    fn emit(&self, event: PublisherEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            tracing::warn!(?event, "Event receiver lagging, event dropped");
        }
    }

    fn publish_status(&self) {
        self.status.send_replace(PublisherStatus {
            state: self.state,
            is_streaming: self.state.is_streaming(),
            is_on_preview: self.state.is_on_preview(),
            is_audio_prepared: self.prepared_audio.is_some(),
            is_video_prepared: self.prepared_video.is_some(),
            is_audio_muted: self.shared.is_muted(),
            has_congestion: self.congested && self.state.is_streaming(),
            publish_url: self.target.publish_url().to_string(),
            video_settings: self.settings.video(),
            audio_input: self.settings.audio_input(),
            orientation: self.settings.orientation(),
        });
    }
}

async fn next_session_event(session: &mut Option<StreamSession>) -> Option<SessionEvent> {
    match session {
        Some(session) => session.events.recv().await,
        None => std::future::pending().await,
    }
}
