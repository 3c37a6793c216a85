//! Ingest client interface.
//!
//! The output never speaks a wire protocol itself. It drives an
//! [`IngestClient`] created per connection attempt by an
//! [`IngestConnector`], and reads the client's status queue from a
//! dedicated thread.

use std::sync::Arc;
use std::time::Duration;

use streamout_encoder::PacketKind;

use crate::status::IngestStatus;

/// Video codec announced to the ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoCodec {
    #[default]
    H264,
}

/// Audio codec announced to the ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioCodec {
    #[default]
    Opus,
}

/// Session parameters handed to the connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestParams {
    /// Stream key (channel credentials).
    pub stream_key: String,

    /// Ingest hostname.
    pub ingest_hostname: String,

    /// Service credentials, for ingests that authenticate beyond the key.
    pub username: Option<String>,
    pub password: Option<String>,

    /// Local address to bind to, if not the system default.
    pub bind_ip: Option<String>,

    /// Client identification.
    pub vendor_name: String,
    pub vendor_version: String,

    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,

    /// Peak bitrate hint in kbps. Zero when unknown.
    pub peak_kbps: u32,
}

impl IngestParams {
    /// Create parameters for a host and stream key with default codecs.
    pub fn new(ingest_hostname: impl Into<String>, stream_key: impl Into<String>) -> Self {
        Self {
            stream_key: stream_key.into(),
            ingest_hostname: ingest_hostname.into(),
            username: None,
            password: None,
            bind_ip: None,
            vendor_name: String::new(),
            vendor_version: String::new(),
            video_codec: VideoCodec::default(),
            audio_codec: AudioCodec::default(),
            peak_kbps: 0,
        }
    }

    /// Set the vendor identification.
    pub fn with_vendor(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.vendor_name = name.into();
        self.vendor_version = version.into();
        self
    }

    /// Set the peak bitrate hint.
    pub fn with_peak_kbps(mut self, peak_kbps: u32) -> Self {
        self.peak_kbps = peak_kbps;
        self
    }

    /// Set service credentials.
    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    /// Bind to a specific local address.
    pub fn with_bind_ip(mut self, bind_ip: Option<String>) -> Self {
        self.bind_ip = bind_ip;
        self
    }
}

/// Result of a bandwidth probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpeedTestResult {
    pub peak_kbps: u32,
    pub starting_rtt_ms: u32,
    pub ending_rtt_ms: u32,
    pub packets_sent: u32,
    pub packets_lost: u32,
}

impl SpeedTestResult {
    /// Lost packets as a percentage of packets sent.
    pub fn loss_percent(&self) -> f32 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_lost as f32 * 100.0 / self.packets_sent as f32
        }
    }
}

/// Kind of a status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Connected,
    Disconnected,
    Destroyed,
    Other(i32),
}

/// Why a status event was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventReason {
    None,
    NoMedia,
    /// The local side asked for it through the client API.
    ApiRequest,
    Unknown,
}

/// Aggregate packet statistics over a reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketStats {
    pub period_ms: u32,
    pub sent: u32,
    pub nack_requests: u32,
    pub lost: u32,
    pub recovered: u32,
    pub late: u32,
}

/// Instantaneous network statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstantStats {
    pub period_ms: u32,
    pub min_rtt_ms: u32,
    pub max_rtt_ms: u32,
    pub avg_rtt_ms: u32,
    pub min_xmit_delay_ms: u32,
    pub max_xmit_delay_ms: u32,
    pub avg_xmit_delay_ms: u32,
}

/// Video frame statistics over a reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoStats {
    pub period_ms: u32,
    pub frames_queued: u32,
    pub frames_sent: u32,
    pub bytes_queued: u64,
    pub bytes_sent: u64,
    pub queue_fullness: u32,
    pub max_frame_size: u32,
}

/// One entry from the client's status queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusMessage {
    Event {
        kind: EventKind,
        reason: EventReason,
        error_code: IngestStatus,
    },
    Log {
        level: u8,
        message: String,
    },
    PacketStats(PacketStats),
    InstantStats(InstantStats),
    VideoStats(VideoStats),
    Other(i32),
}

/// A connected (or connectable) ingest session.
///
/// All methods take `&self`: the send thread and the status thread use the
/// client concurrently, so implementations synchronize internally.
pub trait IngestClient: Send + Sync {
    /// Open the session.
    fn connect(&self) -> Result<(), IngestStatus>;

    /// Send one unit. Returns the number of bytes accepted.
    fn send(
        &self,
        kind: PacketKind,
        dts_usec: i64,
        data: &[u8],
        end_of_unit: bool,
    ) -> Result<usize, IngestStatus>;

    /// Close the session. Posts an `ApiRequest` disconnect event.
    fn disconnect(&self) -> Result<(), IngestStatus>;

    /// Release the client. Further polls report `NotInitialized`.
    fn destroy(&self) -> Result<(), IngestStatus>;

    /// Wait up to `timeout` for the next status message.
    fn poll_status(&self, timeout: Duration) -> Result<StatusMessage, IngestStatus>;

    /// Probe available bandwidth.
    fn speed_test(
        &self,
        target_kbps: u32,
        duration: Duration,
    ) -> Result<SpeedTestResult, IngestStatus>;

    /// Push updated session parameters.
    fn update_params(&self, params: &IngestParams) -> Result<(), IngestStatus>;
}

/// Creates ingest clients, once per connection attempt.
pub trait IngestConnector: Send + Sync {
    fn create(&self, params: &IngestParams) -> Result<Arc<dyn IngestClient>, IngestStatus>;
}
