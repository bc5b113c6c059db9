//! Encoder stage task
//!
//! Sits between the raw queue and the encoded queue. Owns both codecs for
//! the lifetime of a stream session and hands them back when it exits.
//!
//! ```text
//! raw mpsc --> [mute gate] --> TimestampSync --> codec --> encoded mpsc
//!                  ^                                ^
//!              StageShared                   StageControl::Reconfigure
//! ```
//!
//! Reconfiguration happens between frames, so every frame reaching the
//! muxer was produced under the configuration announced by the headers
//! sent before it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::timestamp::{TimestampSync, Track};
use super::{
    audio_specific_config, avc_record, AudioCodec, AudioEncoderConfig, EncodedFrame, VideoCodec,
    VideoEncoderConfig,
};
use crate::connection::congestion::QueuedBytes;
use crate::error::{Error, Result};
use crate::media::aac;
use crate::media::flv::StreamMetadata;
use crate::source::{RawAudioFrame, RawFrame, RawVideoFrame};
use crate::stats::StatsCounters;

const ENCODER_NAME: &str = concat!("rtmp-publisher/", env!("CARGO_PKG_VERSION"));

/// Flags the control loop and the connection worker flip on a running stage
#[derive(Debug, Default)]
pub(crate) struct StageShared {
    muted: AtomicBool,
    keyframe_requested: AtomicBool,
    /// Set by a camera switch until the stage adopts the new frame size
    camera_switched: AtomicBool,
    /// Encoder geometry, width in the high half
    geometry: AtomicU64,
}

impl StageShared {
    /// Returns false if the flag already had this value
    pub fn set_muted(&self, muted: bool) -> bool {
        self.muted.swap(muted, Ordering::AcqRel) != muted
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn request_keyframe(&self) {
        self.keyframe_requested.store(true, Ordering::Release);
    }

    fn take_keyframe_request(&self) -> bool {
        self.keyframe_requested.swap(false, Ordering::AcqRel)
    }

    /// Let the next frame with a different size reconfigure the encoder
    pub fn expect_camera_switch(&self) {
        self.camera_switched.store(true, Ordering::Release);
    }

    pub fn clear_camera_switch(&self) {
        self.camera_switched.store(false, Ordering::Release);
    }

    fn take_camera_switch(&self) -> bool {
        self.camera_switched.swap(false, Ordering::AcqRel)
    }

    /// Size the running encoder produces
    pub fn geometry(&self) -> (u32, u32) {
        let packed = self.geometry.load(Ordering::Acquire);
        ((packed >> 32) as u32, packed as u32)
    }

    fn set_geometry(&self, width: u32, height: u32) {
        let packed = (u64::from(width) << 32) | u64::from(height);
        self.geometry.store(packed, Ordering::Release);
    }
}

/// A configured video codec and the record it announced
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PreparedVideo {
    pub config: VideoEncoderConfig,
    pub record: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PreparedAudio {
    pub config: AudioEncoderConfig,
    pub asc: Bytes,
}

pub(crate) fn prepare_video(
    codec: &mut dyn VideoCodec,
    config: VideoEncoderConfig,
) -> Result<PreparedVideo> {
    let params = codec.configure(&config)?;
    let record = avc_record(&params).map_err(|e| {
        Error::Codec(format!("video codec returned unusable parameter sets: {}", e))
    })?;
    Ok(PreparedVideo { config, record })
}

pub(crate) fn prepare_audio(
    codec: &mut dyn AudioCodec,
    config: AudioEncoderConfig,
) -> Result<PreparedAudio> {
    let params = codec.configure(&config)?;
    let asc = audio_specific_config(&params, &config)
        .map_err(|e| Error::Codec(format!("audio codec returned unusable config: {}", e)))?;
    Ok(PreparedAudio { config, asc })
}

/// Codecs owned by the control loop between sessions
pub(crate) struct Codecs {
    pub video: Box<dyn VideoCodec>,
    pub audio: Box<dyn AudioCodec>,
}

/// What the stage hands back on exit
pub(crate) struct StageExit {
    pub codecs: Codecs,
    pub video: PreparedVideo,
    pub audio: PreparedAudio,
}

pub(crate) enum StageControl {
    /// Apply new codec settings atomically; `None` leaves that codec alone
    Reconfigure {
        video: Option<VideoEncoderConfig>,
        audio: Option<AudioEncoderConfig>,
        reply: oneshot::Sender<Result<()>>,
    },
}

pub(crate) struct EncoderStage {
    codecs: Codecs,
    video: PreparedVideo,
    audio: PreparedAudio,
    sync: TimestampSync,
    shared: Arc<StageShared>,
    stats: Arc<StatsCounters>,
    queued: QueuedBytes,
    out: mpsc::Sender<EncodedFrame>,
    force_keyframe: bool,
    /// Source frames currently arrive at another size
    scaling: bool,
}

impl EncoderStage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        codecs: Codecs,
        video: PreparedVideo,
        audio: PreparedAudio,
        sync: TimestampSync,
        shared: Arc<StageShared>,
        stats: Arc<StatsCounters>,
        queued: QueuedBytes,
        out: mpsc::Sender<EncodedFrame>,
    ) -> Self {
        shared.set_geometry(video.config.width, video.config.height);
        Self {
            codecs,
            video,
            audio,
            sync,
            shared,
            stats,
            queued,
            out,
            force_keyframe: true,
            scaling: false,
        }
    }

    /// Run until the raw queue closes (graceful) or `hard_stop` fires
    pub async fn run(
        mut self,
        mut frames: mpsc::Receiver<RawFrame>,
        mut control: mpsc::Receiver<StageControl>,
        hard_stop: CancellationToken,
    ) -> StageExit {
        let mut pending = self.headers();
        loop {
            for frame in pending.drain(..) {
                if !send(&self.out, &self.queued, frame, &hard_stop).await {
                    return self.exit("output closed");
                }
            }

            tokio::select! {
                biased;
                _ = hard_stop.cancelled() => return self.exit("hard stop"),
                Some(ctl) = control.recv() => match ctl {
                    StageControl::Reconfigure { video, audio, reply } => {
                        let result = self.reconfigure(video, audio);
                        if result.is_ok() {
                            pending = self.headers();
                        }
                        let _ = reply.send(result);
                    }
                },
                frame = frames.recv() => match frame {
                    Some(RawFrame::Video(f)) => pending = self.encode_video(f),
                    Some(RawFrame::Audio(f)) => pending = self.encode_audio(f),
                    None => return self.exit("raw queue closed"),
                },
            }
        }
    }

    fn exit(self, reason: &str) -> StageExit {
        tracing::debug!(reason, "Encoder stage stopped");
        StageExit {
            codecs: self.codecs,
            video: self.video,
            audio: self.audio,
        }
    }

    fn headers(&self) -> Vec<EncodedFrame> {
        let v = &self.video.config;
        let a = &self.audio.config;
        let metadata = StreamMetadata {
            width: v.width,
            height: v.height,
            video_data_rate: v.bitrate / 1000,
            audio_data_rate: a.bitrate / 1000,
            frame_rate: v.frame_rate,
            audio_sample_rate: a.sample_rate,
            stereo: a.channels == 2,
            encoder: ENCODER_NAME.to_string(),
        };
        vec![
            EncodedFrame::Metadata(metadata),
            EncodedFrame::VideoConfig(self.video.record.clone()),
            EncodedFrame::AudioConfig(self.audio.asc.clone()),
        ]
    }

    fn reconfigure(
        &mut self,
        video: Option<VideoEncoderConfig>,
        audio: Option<AudioEncoderConfig>,
    ) -> Result<()> {
        let previous_video = match video {
            Some(config) => Some(self.reconfigure_video(config)?),
            None => None,
        };
        if let Some(config) = audio {
            if let Err(e) = self.reconfigure_audio(config) {
                if let Some(prev) = previous_video {
                    self.video = prev;
                    self.restore_video();
                    let v = &self.video.config;
                    self.shared.set_geometry(v.width, v.height);
                }
                return Err(e);
            }
        }
        tracing::info!(
            width = self.video.config.width,
            height = self.video.config.height,
            bitrate = self.video.config.bitrate,
            audio_bitrate = self.audio.config.bitrate,
            "Encoder reconfigured"
        );
        Ok(())
    }

    /// Returns the configuration that was replaced
    fn reconfigure_video(&mut self, config: VideoEncoderConfig) -> Result<PreparedVideo> {
        match prepare_video(self.codecs.video.as_mut(), config) {
            Ok(state) => {
                self.force_keyframe = true;
                self.shared.set_geometry(state.config.width, state.config.height);
                Ok(std::mem::replace(&mut self.video, state))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Video reconfiguration failed, restoring previous");
                self.restore_video();
                Err(e)
            }
        }
    }

    fn reconfigure_audio(&mut self, config: AudioEncoderConfig) -> Result<()> {
        match prepare_audio(self.codecs.audio.as_mut(), config) {
            Ok(state) => {
                self.audio = state;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Audio reconfiguration failed, restoring previous");
                if let Err(e) = self.codecs.audio.configure(&self.audio.config) {
                    tracing::error!(error = %e, "Audio codec could not restore its configuration");
                }
                Err(e)
            }
        }
    }

    fn restore_video(&mut self) {
        if let Err(e) = self.codecs.video.configure(&self.video.config) {
            tracing::error!(error = %e, "Video codec could not restore its configuration");
        }
        self.force_keyframe = true;
    }

    fn drop_frame(&self) {
        StatsCounters::add(&self.stats.encoder_drops, 1);
    }

    fn encode_video(&mut self, frame: RawVideoFrame) -> Vec<EncodedFrame> {
        let mut out = Vec::new();

        // Off-size frames are scaled by the codec unless a camera switch
        // is pending, in which case the encoder adopts the new size.
        let current = &self.video.config;
        let resized = (frame.width, frame.height) != (current.width, current.height);
        if resized && self.shared.take_camera_switch() {
            let config = VideoEncoderConfig {
                width: frame.width,
                height: frame.height,
                ..*current
            };
            tracing::info!(
                width = frame.width,
                height = frame.height,
                "Camera geometry changed"
            );
            if self.reconfigure_video(config).is_err() {
                self.drop_frame();
                return out;
            }
            out.extend(self.headers());
        } else if resized && !self.scaling {
            tracing::debug!(
                from_width = frame.width,
                from_height = frame.height,
                width = current.width,
                height = current.height,
                "Source frames differ from encoder size, codec scales"
            );
            self.scaling = true;
        } else if !resized {
            self.scaling = false;
        }

        let Some(timestamp) = self.sync.stamp(Track::Video, frame.timestamp) else {
            self.drop_frame();
            return out;
        };

        let force = self.shared.take_keyframe_request() || self.force_keyframe;
        match self.codecs.video.encode(&frame, force) {
            Ok(units) => {
                if units.iter().any(|u| u.keyframe) {
                    self.force_keyframe = false;
                } else if force {
                    self.force_keyframe = true;
                }
                out.extend(units.into_iter().map(|u| EncodedFrame::Video {
                    timestamp,
                    composition_offset: u.composition_offset,
                    keyframe: u.keyframe,
                    data: u.data,
                }));
            }
            Err(e) => {
                tracing::warn!(error = %e, timestamp, "Video encode failed, frame dropped");
                self.drop_frame();
            }
        }
        out
    }

    fn encode_audio(&mut self, frame: RawAudioFrame) -> Vec<EncodedFrame> {
        let frame = if self.shared.is_muted() {
            frame.silence()
        } else {
            frame
        };

        let Some(timestamp) = self.sync.stamp(Track::Audio, frame.timestamp) else {
            self.drop_frame();
            return Vec::new();
        };

        match self.codecs.audio.encode(&frame) {
            Ok(units) => {
                let rate = self.audio.config.sample_rate.max(1) as u64;
                let out: Vec<EncodedFrame> = units
                    .iter()
                    .enumerate()
                    .map(|(i, data)| {
                        let offset = (i as u64 * 1024 * 1000 / rate) as u32;
                        EncodedFrame::Audio {
                            timestamp: timestamp.saturating_add(offset),
                            data: aac::strip_adts(data),
                        }
                    })
                    .collect();
                if let Some(EncodedFrame::Audio { timestamp, .. }) = out.last() {
                    self.sync.advance(Track::Audio, *timestamp);
                }
                out
            }
            Err(e) => {
                tracing::warn!(error = %e, timestamp, "Audio encode failed, frame dropped");
                self.drop_frame();
                Vec::new()
            }
        }
    }
}

/// Queue one frame, waiting for room. False once the session is going away.
async fn send(
    out: &mpsc::Sender<EncodedFrame>,
    queued: &QueuedBytes,
    frame: EncodedFrame,
    hard_stop: &CancellationToken,
) -> bool {
    let size = frame.size();
    queued.add(size);
    let sent = tokio::select! {
        biased;
        _ = hard_stop.cancelled() => false,
        res = out.send(frame) => res.is_ok(),
    };
    if !sent {
        queued.sub(size);
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{EncodedVideo, EncoderCapabilities};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    const PARAMS: &[u8] = &[
        0, 0, 0, 1, 0x67, 0x64, 0x00, 0x1F, 0xAC, 0xD9, 0, 0, 0, 1, 0x68, 0xEB, 0xE3, 0xCB,
    ];

    /// Video codec that fails to configure widths listed in `reject_width`
    struct TestVideo {
        reject_width: u32,
        configures: Arc<AtomicU32>,
    }

    impl VideoCodec for TestVideo {
        fn capabilities(&self) -> EncoderCapabilities {
            EncoderCapabilities {
                live_reconfigure: true,
                ..Default::default()
            }
        }

        fn configure(&mut self, config: &VideoEncoderConfig) -> Result<Bytes> {
            self.configures.fetch_add(1, Ordering::SeqCst);
            if config.width == self.reject_width {
                return Err(Error::Codec("unsupported width".into()));
            }
            Ok(Bytes::from_static(PARAMS))
        }

        fn encode(
            &mut self,
            _frame: &RawVideoFrame,
            force_keyframe: bool,
        ) -> Result<Vec<EncodedVideo>> {
            Ok(vec![EncodedVideo {
                data: Bytes::from_static(&[0, 0, 0, 1, 0x65, 0x88]),
                keyframe: force_keyframe,
                composition_offset: 0,
            }])
        }
    }

    /// Echoes PCM bytes so tests can see whether silence went in
    struct TestAudio;

    impl AudioCodec for TestAudio {
        fn capabilities(&self) -> EncoderCapabilities {
            EncoderCapabilities::default()
        }

        fn configure(&mut self, _config: &AudioEncoderConfig) -> Result<Bytes> {
            Ok(Bytes::new())
        }

        fn encode(&mut self, frame: &RawAudioFrame) -> Result<Vec<Bytes>> {
            Ok(vec![frame.samples.clone()])
        }
    }

    fn video_config(width: u32, height: u32) -> VideoEncoderConfig {
        VideoEncoderConfig {
            width,
            height,
            bitrate: 3_000_000,
            frame_rate: 30,
            keyframe_interval: Duration::from_secs(2),
        }
    }

    fn audio_config() -> AudioEncoderConfig {
        AudioEncoderConfig {
            bitrate: 192_000,
            sample_rate: 44_100,
            channels: 2,
        }
    }

    struct Harness {
        raw_tx: mpsc::Sender<RawFrame>,
        ctl_tx: mpsc::Sender<StageControl>,
        out_rx: mpsc::Receiver<EncodedFrame>,
        shared: Arc<StageShared>,
        stats: Arc<StatsCounters>,
        task: tokio::task::JoinHandle<StageExit>,
    }

    /// Holds PCM back and releases it in bursts: `plan[i]` units on call i
    struct BurstyAudio {
        plan: Vec<usize>,
        calls: usize,
    }

    impl AudioCodec for BurstyAudio {
        fn capabilities(&self) -> EncoderCapabilities {
            EncoderCapabilities::default()
        }

        fn configure(&mut self, _config: &AudioEncoderConfig) -> Result<Bytes> {
            Ok(Bytes::new())
        }

        fn encode(&mut self, _frame: &RawAudioFrame) -> Result<Vec<Bytes>> {
            let count = self.plan.get(self.calls).copied().unwrap_or(1);
            self.calls += 1;
            Ok(vec![Bytes::from_static(&[0x21, 0x10]); count])
        }
    }

    fn spawn_stage(reject_width: u32) -> Harness {
        spawn_stage_with(reject_width, TestAudio)
    }

    fn spawn_stage_with(reject_width: u32, mut audio: impl AudioCodec) -> Harness {
        let mut video = TestVideo {
            reject_width,
            configures: Arc::new(AtomicU32::new(0)),
        };
        let pv = prepare_video(&mut video, video_config(720, 1280)).unwrap();
        let pa = prepare_audio(&mut audio, audio_config()).unwrap();

        let (raw_tx, raw_rx) = mpsc::channel(16);
        let (ctl_tx, ctl_rx) = mpsc::channel(4);
        let (out_tx, out_rx) = mpsc::channel(64);
        let shared = Arc::new(StageShared::default());
        let stats = Arc::new(StatsCounters::new());
        let stage = EncoderStage::new(
            Codecs {
                video: Box::new(video),
                audio: Box::new(audio),
            },
            pv,
            pa,
            TimestampSync::new(Duration::from_millis(100)),
            shared.clone(),
            stats.clone(),
            QueuedBytes::new(),
            out_tx,
        );
        let task = tokio::spawn(stage.run(raw_rx, ctl_rx, CancellationToken::new()));
        Harness {
            raw_tx,
            ctl_tx,
            out_rx,
            shared,
            stats,
            task,
        }
    }

    fn video_frame(width: u32, height: u32, ms: u64) -> RawFrame {
        RawFrame::Video(RawVideoFrame {
            width,
            height,
            timestamp: Duration::from_millis(ms),
            data: Bytes::from_static(&[0u8; 16]),
        })
    }

    fn audio_frame(ms: u64) -> RawFrame {
        RawFrame::Audio(RawAudioFrame {
            timestamp: Duration::from_millis(ms),
            samples: Bytes::from_static(&[7, 7, 7, 7]),
        })
    }

    async fn expect_headers(rx: &mut mpsc::Receiver<EncodedFrame>) -> StreamMetadata {
        let meta = match rx.recv().await.unwrap() {
            EncodedFrame::Metadata(m) => m,
            other => panic!("expected metadata, got {:?}", other),
        };
        assert!(matches!(rx.recv().await.unwrap(), EncodedFrame::VideoConfig(_)));
        assert!(matches!(rx.recv().await.unwrap(), EncodedFrame::AudioConfig(_)));
        meta
    }

    #[tokio::test]
    async fn test_headers_then_forced_keyframe() {
        let mut h = spawn_stage(0);
        let meta = expect_headers(&mut h.out_rx).await;
        assert_eq!((meta.width, meta.height), (720, 1280));
        assert_eq!(meta.video_data_rate, 3000);

        h.raw_tx.send(video_frame(720, 1280, 0)).await.unwrap();
        h.raw_tx.send(video_frame(720, 1280, 33)).await.unwrap();
        assert!(h.out_rx.recv().await.unwrap().is_keyframe());
        assert!(!h.out_rx.recv().await.unwrap().is_keyframe());

        drop(h.raw_tx);
        let exit = h.task.await.unwrap();
        assert_eq!(exit.video.config.width, 720);
    }

    #[tokio::test]
    async fn test_mute_replaces_samples_with_silence() {
        let mut h = spawn_stage(0);
        expect_headers(&mut h.out_rx).await;

        h.raw_tx.send(audio_frame(0)).await.unwrap();
        match h.out_rx.recv().await.unwrap() {
            EncodedFrame::Audio { data, timestamp } => {
                assert_eq!(timestamp, 0);
                assert_eq!(&data[..], &[7, 7, 7, 7]);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(h.shared.set_muted(true));
        assert!(!h.shared.set_muted(true));
        h.raw_tx.send(audio_frame(23)).await.unwrap();
        match h.out_rx.recv().await.unwrap() {
            EncodedFrame::Audio { data, timestamp } => {
                assert_eq!(timestamp, 23);
                assert_eq!(&data[..], &[0, 0, 0, 0]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_camera_switch_reconfigures_inline() {
        let mut h = spawn_stage(0);
        expect_headers(&mut h.out_rx).await;

        h.raw_tx.send(video_frame(720, 1280, 0)).await.unwrap();
        assert!(h.out_rx.recv().await.unwrap().is_keyframe());

        h.shared.expect_camera_switch();
        h.raw_tx.send(video_frame(1080, 1920, 33)).await.unwrap();
        let meta = expect_headers(&mut h.out_rx).await;
        assert_eq!((meta.width, meta.height), (1080, 1920));
        assert!(h.out_rx.recv().await.unwrap().is_keyframe());
        assert_eq!(h.shared.geometry(), (1080, 1920));
        assert_eq!(h.stats.snapshot().encoder_drops, 0);
    }

    #[tokio::test]
    async fn test_off_size_frames_keep_configured_geometry() {
        let mut h = spawn_stage(0);
        expect_headers(&mut h.out_rx).await;

        let (tx, rx) = oneshot::channel();
        h.ctl_tx
            .send(StageControl::Reconfigure {
                video: Some(video_config(1280, 720)),
                audio: None,
                reply: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap();
        let meta = expect_headers(&mut h.out_rx).await;
        assert_eq!((meta.width, meta.height), (1280, 720));

        // The camera keeps delivering its own size
        h.raw_tx.send(video_frame(720, 1280, 0)).await.unwrap();
        h.raw_tx.send(video_frame(720, 1280, 33)).await.unwrap();
        assert!(matches!(h.out_rx.recv().await.unwrap(), EncodedFrame::Video { .. }));
        assert!(matches!(h.out_rx.recv().await.unwrap(), EncodedFrame::Video { .. }));

        drop(h.raw_tx);
        let exit = h.task.await.unwrap();
        assert_eq!((exit.video.config.width, exit.video.config.height), (1280, 720));
        assert_eq!(h.shared.geometry(), (1280, 720));
    }

    #[tokio::test]
    async fn test_audio_bursts_stay_monotonic() {
        let audio = BurstyAudio {
            plan: vec![0, 2, 1],
            calls: 0,
        };
        let mut h = spawn_stage_with(0, audio);
        expect_headers(&mut h.out_rx).await;

        for ms in [0, 10, 20] {
            h.raw_tx.send(audio_frame(ms)).await.unwrap();
        }
        let mut stamps = Vec::new();
        while stamps.len() < 3 {
            match h.out_rx.recv().await.unwrap() {
                EncodedFrame::Audio { timestamp, .. } => stamps.push(timestamp),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(stamps[..2], [10, 33]);
        assert!(stamps.windows(2).all(|w| w[0] < w[1]), "{:?}", stamps);
    }

    #[tokio::test]
    async fn test_failed_reconfigure_keeps_previous() {
        let mut h = spawn_stage(1280);
        expect_headers(&mut h.out_rx).await;

        let (tx, rx) = oneshot::channel();
        h.ctl_tx
            .send(StageControl::Reconfigure {
                video: Some(video_config(1280, 720)),
                audio: None,
                reply: tx,
            })
            .await
            .unwrap();
        assert!(rx.await.unwrap().is_err());

        let (tx, rx) = oneshot::channel();
        h.ctl_tx
            .send(StageControl::Reconfigure {
                video: Some(video_config(1080, 1920)),
                audio: None,
                reply: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap();
        let meta = expect_headers(&mut h.out_rx).await;
        assert_eq!(meta.width, 1080);

        drop(h.raw_tx);
        let exit = h.task.await.unwrap();
        assert_eq!(exit.video.config.width, 1080);
    }

    #[tokio::test]
    async fn test_keyframe_request_honoured() {
        let mut h = spawn_stage(0);
        expect_headers(&mut h.out_rx).await;

        h.raw_tx.send(video_frame(720, 1280, 0)).await.unwrap();
        h.raw_tx.send(video_frame(720, 1280, 33)).await.unwrap();
        assert!(h.out_rx.recv().await.unwrap().is_keyframe());
        assert!(!h.out_rx.recv().await.unwrap().is_keyframe());

        h.shared.request_keyframe();
        h.raw_tx.send(video_frame(720, 1280, 66)).await.unwrap();
        assert!(h.out_rx.recv().await.unwrap().is_keyframe());
    }
}
