//! Connection worker
//!
//! One task per stream session. It owns the write half of the connection,
//! the muxer and the congestion monitor. The read half runs in a child task
//! and feeds pings, acknowledgement requests and server status back here.
//!
//! ```text
//!            +----------------- select! ------------------+
//! encoded -> | frame: mux + write (bounded by write_timeout)|
//! inbound -> | ping / ack / onStatus                        |
//!   tick  -> | congestion sample, bitrate                   |
//!            +----------------------------------------------+
//!                 | socket error
//!                 v
//!            reconnect loop (backoff, interruptible) -> replay headers
//!                                                    -> wait for keyframe
//! ```

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::congestion::{CongestionMonitor, QueuedBytes};
use super::{establish, SessionEvent};
use crate::client::{
    Dialer, InboundEvent, PublishedConnection, RtmpReader, RtmpWriter, StreamTarget,
};
use crate::config::ConnectionConfig;
use crate::encoder::stage::StageShared;
use crate::encoder::EncodedFrame;
use crate::error::Result;
use crate::muxer::Muxer;
use crate::protocol::{RawMessage, RtmpMessage, UserControlEvent};
use crate::stats::{BitrateMeter, StatsCounters};

/// Congestion sampling period
const TICK: Duration = Duration::from_millis(100);

enum PumpExit {
    /// Encoder closed the queue and everything was written
    Drained,
    HardStop,
    Failed(String),
}

/// Last metadata and sequence headers seen, replayed after a reconnect
#[derive(Debug, Default)]
struct HeaderCache {
    metadata: Option<EncodedFrame>,
    video: Option<EncodedFrame>,
    audio: Option<EncodedFrame>,
}

impl HeaderCache {
    fn remember(&mut self, frame: &EncodedFrame) {
        let slot = match frame {
            EncodedFrame::Metadata(_) => &mut self.metadata,
            EncodedFrame::VideoConfig(_) => &mut self.video,
            EncodedFrame::AudioConfig(_) => &mut self.audio,
            _ => return,
        };
        *slot = Some(frame.clone());
    }

    fn replay(&self) -> impl Iterator<Item = &EncodedFrame> {
        [&self.metadata, &self.video, &self.audio]
            .into_iter()
            .filter_map(Option::as_ref)
    }
}

/// Everything the worker shares with the rest of the session
pub(crate) struct WorkerContext {
    pub config: ConnectionConfig,
    pub target: StreamTarget,
    pub dialer: Arc<dyn Dialer>,
    pub stats: Arc<StatsCounters>,
    pub queued: QueuedBytes,
    pub shared: Arc<StageShared>,
    pub events: mpsc::UnboundedSender<SessionEvent>,
    pub interrupt: CancellationToken,
    pub hard_stop: CancellationToken,
    pub stats_interval: Duration,
}

pub(crate) struct ConnectionWorker {
    ctx: WorkerContext,
    muxer: Muxer,
    congestion: CongestionMonitor,
    headers: HeaderCache,
    replay_headers: bool,
    awaiting_keyframe: bool,
    meter: BitrateMeter,
    last_bitrate: u64,
}

impl ConnectionWorker {
    pub fn new(ctx: WorkerContext) -> Self {
        let congestion = CongestionMonitor::new(ctx.config.congestion.clone());
        Self {
            ctx,
            muxer: Muxer::new(0),
            congestion,
            headers: HeaderCache::default(),
            replay_headers: false,
            awaiting_keyframe: false,
            meter: BitrateMeter::default(),
            last_bitrate: 0,
        }
    }

    /// Publish frames until the queue closes, `hard_stop` fires, or the
    /// connection is lost for good.
    pub async fn run(
        mut self,
        conn: PublishedConnection,
        mut frames: mpsc::Receiver<EncodedFrame>,
    ) {
        let mut conn = conn;
        loop {
            let PublishedConnection { mut writer, reader } = conn;
            self.muxer.set_stream_id(writer.stream_id());

            let (inbound_tx, mut inbound_rx) = mpsc::channel(16);
            let reader_task = tokio::spawn(read_loop(reader, inbound_tx));

            let exit = match self.replay(&mut writer).await {
                Ok(()) => self.pump(&mut writer, &mut inbound_rx, &mut frames).await,
                Err(exit) => exit,
            };
            reader_task.abort();

            match exit {
                PumpExit::Drained => {
                    self.close(&mut writer).await;
                    return;
                }
                PumpExit::HardStop => {
                    tracing::debug!("Connection worker hard-stopped");
                    return;
                }
                PumpExit::Failed(message) => {
                    drop(writer);
                    if let Some(flag) = self.congestion.reset() {
                        self.emit(SessionEvent::Congestion(flag));
                    }
                    match self.reconnect(&mut frames, message).await {
                        Some(next) => conn = next,
                        None => return,
                    }
                }
            }
        }
    }

    async fn pump(
        &mut self,
        writer: &mut RtmpWriter,
        inbound: &mut mpsc::Receiver<Result<InboundEvent>>,
        frames: &mut mpsc::Receiver<EncodedFrame>,
    ) -> PumpExit {
        let hard_stop = self.ctx.hard_stop.clone();
        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sampled_at = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = hard_stop.cancelled() => return PumpExit::HardStop,
                event = inbound.recv() => {
                    let reply = match event {
                        Some(Ok(InboundEvent::Ping(ts))) => {
                            RtmpMessage::UserControl(UserControlEvent::PingResponse(ts))
                        }
                        Some(Ok(InboundEvent::AckDue(seq))) => RtmpMessage::Acknowledgement(seq),
                        Some(Ok(InboundEvent::Status { code, level })) => {
                            if level == "error" {
                                return PumpExit::Failed(format!("server reported {}", code));
                            }
                            tracing::debug!(%code, %level, "Server status");
                            continue;
                        }
                        Some(Err(e)) => return PumpExit::Failed(e.to_string()),
                        None => return PumpExit::Failed("reader stopped".into()),
                    };
                    if let Err(exit) = self.write(writer, &reply.to_raw()).await {
                        return exit;
                    }
                }
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        return PumpExit::Drained;
                    };
                    if let Err(exit) = self.send_frame(writer, frame).await {
                        return exit;
                    }
                    self.observe_congestion();
                }
                _ = tick.tick() => {
                    self.observe_congestion();
                    let elapsed = sampled_at.elapsed();
                    if elapsed >= self.ctx.stats_interval {
                        self.sample_bitrate(elapsed);
                        sampled_at = Instant::now();
                    }
                }
            }
        }
    }

    async fn send_frame(
        &mut self,
        writer: &mut RtmpWriter,
        frame: EncodedFrame,
    ) -> std::result::Result<(), PumpExit> {
        self.ctx.queued.sub(frame.size());
        self.headers.remember(&frame);

        if self.awaiting_keyframe {
            match &frame {
                EncodedFrame::Video { keyframe: true, .. } => {
                    tracing::debug!("Keyframe after reconnect, resuming media");
                    self.awaiting_keyframe = false;
                }
                EncodedFrame::Video { .. } | EncodedFrame::Audio { .. } => {
                    StatsCounters::add(&self.ctx.stats.reconnect_drops, 1);
                    return Ok(());
                }
                _ => {}
            }
        }

        let msg = self.muxer.mux(&frame);
        self.write(writer, &msg).await?;

        let stats = &self.ctx.stats;
        match frame {
            EncodedFrame::Video { keyframe, .. } => {
                StatsCounters::add(&stats.video_frames_sent, 1);
                if keyframe {
                    StatsCounters::add(&stats.keyframes_sent, 1);
                }
            }
            EncodedFrame::Audio { .. } => StatsCounters::add(&stats.audio_frames_sent, 1),
            _ => {}
        }
        Ok(())
    }

    /// One message, bounded by `write_timeout` and abandoned on hard stop
    async fn write(
        &self,
        writer: &mut RtmpWriter,
        msg: &RawMessage,
    ) -> std::result::Result<(), PumpExit> {
        let write = tokio::time::timeout(self.ctx.config.write_timeout, writer.write_message(msg));
        tokio::select! {
            biased;
            _ = self.ctx.hard_stop.cancelled() => Err(PumpExit::HardStop),
            res = write => match res {
                Ok(Ok(n)) => {
                    StatsCounters::add(&self.ctx.stats.bytes_sent, n as u64);
                    Ok(())
                }
                Ok(Err(e)) => Err(PumpExit::Failed(format!("write failed: {}", e))),
                Err(_) => Err(PumpExit::Failed(format!(
                    "write blocked for more than {:?}",
                    self.ctx.config.write_timeout
                ))),
            },
        }
    }

    /// Headers cached from the previous connection
    async fn replay(&mut self, writer: &mut RtmpWriter) -> std::result::Result<(), PumpExit> {
        if !std::mem::take(&mut self.replay_headers) {
            return Ok(());
        }
        let messages: Vec<RawMessage> = self.headers.replay().map(|f| self.muxer.mux(f)).collect();
        for msg in &messages {
            self.write(writer, msg).await?;
        }
        tracing::debug!(count = messages.len(), "Headers replayed");
        Ok(())
    }

    async fn close(&self, writer: &mut RtmpWriter) {
        let close = tokio::time::timeout(self.ctx.config.write_timeout, writer.close());
        tokio::select! {
            biased;
            _ = self.ctx.hard_stop.cancelled() => tracing::debug!("Close abandoned"),
            res = close => match res {
                Ok(Ok(())) => tracing::info!(url = %self.ctx.target, "Stream unpublished"),
                Ok(Err(e)) => tracing::debug!(error = %e, "Error while closing stream"),
                Err(_) => tracing::warn!("Timed out closing stream"),
            },
        }
    }

    /// Returns the new connection, or `None` when the session is over
    async fn reconnect(
        &mut self,
        frames: &mut mpsc::Receiver<EncodedFrame>,
        mut message: String,
    ) -> Option<PublishedConnection> {
        if self.ctx.interrupt.is_cancelled() {
            tracing::debug!(error = %message, "Connection ended while stopping");
            return None;
        }
        tracing::warn!(url = %self.ctx.target, error = %message, "Connection lost");

        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(delay) = self.ctx.config.reconnect.delay(attempt) else {
                let attempts = attempt - 1;
                tracing::error!(attempts, error = %message, "Stream lost");
                self.emit(SessionEvent::Lost { attempts, message });
                return None;
            };

            StatsCounters::add(&self.ctx.stats.reconnects, 1);
            tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
            self.emit(SessionEvent::Reconnecting { attempt, delay });

            self.offline(tokio::time::sleep(delay), frames).await?;

            let dialer = self.ctx.dialer.clone();
            let target = self.ctx.target.clone();
            let config = self.ctx.config.clone();
            let connect = async move { establish(dialer.as_ref(), &target, &config).await };

            match self.offline(connect, frames).await? {
                Ok(conn) => {
                    tracing::info!(attempt, stream_id = conn.writer.stream_id(), "Reconnected");
                    self.replay_headers = true;
                    self.awaiting_keyframe = true;
                    self.ctx.shared.request_keyframe();
                    self.emit(SessionEvent::Reconnected);
                    return Some(conn);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
                    message = e.to_string();
                }
            }
        }
    }

    /// Drive `fut` while discarding frames. `None` if the session ends first.
    async fn offline<F: Future>(
        &mut self,
        fut: F,
        frames: &mut mpsc::Receiver<EncodedFrame>,
    ) -> Option<F::Output> {
        let interrupt = self.ctx.interrupt.clone();
        let hard_stop = self.ctx.hard_stop.clone();
        tokio::pin!(fut);
        loop {
            tokio::select! {
                biased;
                _ = interrupt.cancelled() => {
                    tracing::info!("Reconnect cancelled");
                    return None;
                }
                _ = hard_stop.cancelled() => return None,
                out = &mut fut => return Some(out),
                frame = frames.recv() => match frame {
                    Some(frame) => self.discard(frame),
                    None => return None,
                },
            }
        }
    }

    fn discard(&mut self, frame: EncodedFrame) {
        self.ctx.queued.sub(frame.size());
        self.headers.remember(&frame);
        if !frame.is_header() {
            StatsCounters::add(&self.ctx.stats.reconnect_drops, 1);
        }
    }

    fn observe_congestion(&mut self) {
        let occupancy = self.ctx.queued.get();
        if let Some(flag) = self.congestion.observe(occupancy, Instant::now()) {
            if flag {
                tracing::warn!(bytes = occupancy, "Send buffer congested");
            } else {
                tracing::info!(bytes = occupancy, "Send buffer drained");
            }
            self.emit(SessionEvent::Congestion(flag));
        }
    }

    fn sample_bitrate(&mut self, elapsed: Duration) {
        let total = self.ctx.stats.bytes_sent.load(Ordering::Relaxed);
        let bitrate = self.meter.sample(total, elapsed);
        self.ctx.stats.bitrate.store(bitrate, Ordering::Relaxed);
        if bitrate != self.last_bitrate {
            self.last_bitrate = bitrate;
            self.emit(SessionEvent::Bitrate(bitrate));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // The control loop may already be gone during shutdown
        let _ = self.ctx.events.send(event);
    }
}

async fn read_loop(mut reader: RtmpReader, tx: mpsc::Sender<Result<InboundEvent>>) {
    loop {
        let event = reader.next_event().await;
        let failed = event.is_err();
        if tx.send(event).await.is_err() || failed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_header_cache_keeps_latest() {
        let mut cache = HeaderCache::default();
        cache.remember(&EncodedFrame::VideoConfig(Bytes::from_static(&[1, 1])));
        cache.remember(&EncodedFrame::AudioConfig(Bytes::from_static(&[0x12, 0x10])));
        cache.remember(&EncodedFrame::VideoConfig(Bytes::from_static(&[1, 2])));
        cache.remember(&EncodedFrame::Audio {
            timestamp: 0,
            data: Bytes::new(),
        });

        let replay: Vec<_> = cache.replay().cloned().collect();
        assert_eq!(
            replay,
            vec![
                EncodedFrame::VideoConfig(Bytes::from_static(&[1, 2])),
                EncodedFrame::AudioConfig(Bytes::from_static(&[0x12, 0x10])),
            ]
        );
    }
}
