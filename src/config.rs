//! Publisher configuration

use std::time::Duration;

use crate::connection::backoff::ReconnectPolicy;
use crate::connection::congestion::CongestionConfig;
use crate::protocol::constants::*;

/// RTMP connection options
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Outbound chunk size, announced with `SetChunkSize`
    pub chunk_size: u32,

    /// Dial + handshake + connect/createStream/publish must finish within this
    pub connect_timeout: Duration,

    /// A single socket write longer than this counts as a socket failure
    pub write_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// `flashVer` sent in `connect`
    pub flash_ver: String,

    /// Window acknowledgement size announced to the server
    pub window_ack_size: u32,

    pub reconnect: ReconnectPolicy,

    pub congestion: CongestionConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            chunk_size: RECOMMENDED_CHUNK_SIZE,
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            tcp_nodelay: true,
            flash_ver: "FMLE/3.0 (compatible; FMSc/1.0)".to_string(),
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            reconnect: ReconnectPolicy::default(),
            congestion: CongestionConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Set chunk size
    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    pub fn flash_ver(mut self, flash_ver: impl Into<String>) -> Self {
        self.flash_ver = flash_ver.into();
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn congestion(mut self, congestion: CongestionConfig) -> Self {
        self.congestion = congestion;
        self
    }
}

/// Publisher pipeline options
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub connection: ConnectionConfig,

    /// Raw frames buffered between capture and the encoder stage
    pub raw_queue_capacity: usize,

    /// Encoded frames buffered between the encoder stage and the socket
    pub encoded_queue_capacity: usize,

    /// Pending control commands
    pub command_queue_capacity: usize,

    /// Graceful stop budget before in-flight writes are cut
    pub stop_timeout: Duration,

    /// Largest forward timestamp correction before a frame is dropped
    pub max_av_skew: Duration,

    pub frame_rate: u32,

    pub keyframe_interval: Duration,

    pub audio_sample_rate: u32,

    pub audio_channels: u8,

    /// How often outbound bitrate is sampled and reported
    pub stats_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            raw_queue_capacity: 64,
            encoded_queue_capacity: 256,
            command_queue_capacity: 32,
            stop_timeout: Duration::from_secs(3),
            max_av_skew: Duration::from_millis(100),
            frame_rate: 30,
            keyframe_interval: Duration::from_secs(2),
            audio_sample_rate: 44_100,
            audio_channels: 2,
            stats_interval: Duration::from_secs(1),
        }
    }
}

impl PublisherConfig {
    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn raw_queue_capacity(mut self, capacity: usize) -> Self {
        self.raw_queue_capacity = capacity.max(1);
        self
    }

    pub fn encoded_queue_capacity(mut self, capacity: usize) -> Self {
        self.encoded_queue_capacity = capacity.max(1);
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn max_av_skew(mut self, skew: Duration) -> Self {
        self.max_av_skew = skew;
        self
    }

    pub fn frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps.max(1);
        self
    }

    pub fn keyframe_interval(mut self, interval: Duration) -> Self {
        self.keyframe_interval = interval;
        self
    }

    pub fn audio(mut self, sample_rate: u32, channels: u8) -> Self {
        self.audio_sample_rate = sample_rate;
        self.audio_channels = channels;
        self
    }

    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }
}
