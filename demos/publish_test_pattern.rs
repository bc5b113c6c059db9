//! Publish a synthetic stream to an RTMP server
//!
//! Run with: cargo run --example publish_test_pattern URL [SECONDS]
//!
//! Examples:
//!   cargo run --example publish_test_pattern rtmp://localhost/live/test
//!   cargo run --example publish_test_pattern rtmp://localhost/live/test 60
//!
//! The "codecs" here emit fixed H.264 parameter sets and placeholder NAL
//! units, so a player shows nothing useful. The point is to watch the
//! connection, reconnect and congestion behavior against a real server:
//!
//!   RUST_LOG=rtmp_publisher=debug cargo run --example publish_test_pattern ...

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rtmp_publisher::{
    AudioCodec, AudioEncoderConfig, AudioInputType, EncodedVideo, EncoderCapabilities,
    FrameSink, MediaSource, Publisher, PublisherConfig, PublisherEvent, RawAudioFrame,
    RawVideoFrame, StreamTarget, VideoCodec, VideoEncoderConfig,
};
use tokio::task::JoinHandle;

const SPS_PPS: &[u8] = &[
    0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1F, 0xDA, 0x01, 0x40, 0x16, 0xE8, 0, 0, 0, 1, 0x68, 0xCE,
    0x3C, 0x80,
];

/// Frame generator on the Tokio clock
struct PatternSource {
    size: (u32, u32),
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl MediaSource for PatternSource {
    async fn start_preview(&mut self, sink: FrameSink) -> rtmp_publisher::Result<()> {
        let (width, height) = self.size;
        self.task = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            let mut video = tokio::time::interval(Duration::from_micros(33_333));
            let mut audio = tokio::time::interval(Duration::from_micros(23_220));
            loop {
                tokio::select! {
                    _ = video.tick() => sink.push_video(RawVideoFrame {
                        width,
                        height,
                        timestamp: start.elapsed(),
                        data: Bytes::new(),
                    }),
                    _ = audio.tick() => sink.push_audio(RawAudioFrame {
                        timestamp: start.elapsed(),
                        samples: Bytes::from(vec![0u8; 4096]),
                    }),
                }
            }
        }));
        Ok(())
    }

    async fn stop_preview(&mut self) -> rtmp_publisher::Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    async fn switch_camera(&mut self) -> rtmp_publisher::Result<()> {
        Ok(())
    }

    async fn toggle_flash(&mut self) -> rtmp_publisher::Result<()> {
        Err(rtmp_publisher::Error::UnsupportedOperation("pattern has no flash".into()))
    }

    async fn set_audio_input(&mut self, _input: AudioInputType) -> rtmp_publisher::Result<()> {
        Ok(())
    }

    async fn set_capture_size(&mut self, width: u32, height: u32) -> rtmp_publisher::Result<()> {
        self.size = (width, height);
        Ok(())
    }
}

struct PlaceholderVideo {
    frames: u64,
    gop: u64,
}

impl VideoCodec for PlaceholderVideo {
    fn capabilities(&self) -> EncoderCapabilities {
        EncoderCapabilities::default()
    }

    fn configure(&mut self, config: &VideoEncoderConfig) -> rtmp_publisher::Result<Bytes> {
        self.frames = 0;
        self.gop = (config.frame_rate as u64 * config.keyframe_interval.as_secs().max(1)).max(1);
        Ok(Bytes::from_static(SPS_PPS))
    }

    fn encode(
        &mut self,
        _frame: &RawVideoFrame,
        force_keyframe: bool,
    ) -> rtmp_publisher::Result<Vec<EncodedVideo>> {
        let keyframe = force_keyframe || self.frames % self.gop == 0;
        self.frames += 1;
        let header: u8 = if keyframe { 0x65 } else { 0x41 };
        let mut nal = vec![0, 0, 0, 1, header];
        nal.resize(if keyframe { 4000 } else { 800 }, 0xAA);
        Ok(vec![EncodedVideo {
            data: Bytes::from(nal),
            keyframe,
            composition_offset: 0,
        }])
    }
}

struct PlaceholderAudio;

impl AudioCodec for PlaceholderAudio {
    fn capabilities(&self) -> EncoderCapabilities {
        EncoderCapabilities::default()
    }

    fn configure(&mut self, _config: &AudioEncoderConfig) -> rtmp_publisher::Result<Bytes> {
        Ok(Bytes::new())
    }

    fn encode(&mut self, _frame: &RawAudioFrame) -> rtmp_publisher::Result<Vec<Bytes>> {
        Ok(vec![Bytes::from_static(&[0x21, 0x10, 0x04, 0x60, 0x8C, 0x1C])])
    }
}

fn print_usage() {
    eprintln!("Usage: publish_test_pattern URL [SECONDS]");
    eprintln!();
    eprintln!("  URL      rtmp://host[:port]/app/stream_key");
    eprintln!("  SECONDS  how long to publish (default 30)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let Some(url) = args.get(1) else {
        print_usage();
        std::process::exit(1);
    };
    let seconds: u64 = match args.get(2) {
        Some(s) => s.parse()?,
        None => 30,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_publisher=info".parse()?),
        )
        .init();

    let target = StreamTarget::parse(url)?;
    let source = PatternSource {
        size: (720, 1280),
        task: None,
    };
    let (publisher, mut events) = Publisher::with_tcp(
        PublisherConfig::default(),
        target,
        source,
        PlaceholderVideo { frames: 0, gop: 1 },
        PlaceholderAudio,
    );

    println!("Publishing to {} for {}s", publisher.publish_url(), seconds);
    publisher.start_stream().await?;

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping...");
                break;
            }
            event = events.recv() => match event {
                Some(PublisherEvent::BitrateChanged(bps)) => {
                    println!("bitrate: {} kbps", bps / 1000);
                }
                Some(PublisherEvent::StreamLost { attempts, message }) => {
                    eprintln!("Stream lost after {} attempts: {}", attempts, message);
                    break;
                }
                Some(event) => println!("{:?}", event),
                None => break,
            },
        }
    }

    publisher.stop_stream().await?;
    let stats = publisher.stats();
    println!(
        "Sent {} bytes: {} video frames ({} keyframes), {} audio frames, {} dropped",
        stats.bytes_sent,
        stats.video_frames_sent,
        stats.keyframes_sent,
        stats.audio_frames_sent,
        stats.dropped_frames()
    );
    publisher.shutdown().await?;
    Ok(())
}
