//! Ingest transport seam.
//!
//! This crate defines the interface the output uses to reach an ingest
//! server, maps ingest status codes to session outcomes, and splits
//! length-prefixed video access units into the units the ingest expects.
//! A loopback client is provided for dry runs and tests.

mod client;
mod error;
mod extractor;
mod loopback;
mod status;

pub use client::{
    AudioCodec, EventKind, EventReason, IngestClient, IngestConnector, IngestParams,
    InstantStats, PacketStats, SpeedTestResult, StatusMessage, VideoCodec, VideoStats,
};
pub use error::TransportError;
pub use extractor::{
    ExtractError, Extraction, Malformed, PayloadMode, TransmittableUnit, UnitExtractor,
    DEFAULT_MAX_UNITS, HEADER_PREFIX_LEN, HEADER_SEPARATOR_LEN,
};
pub use loopback::{LoopbackClient, LoopbackConfig, LoopbackConnector, SentUnit};
pub use status::{classify_status, map_status, IngestStatus, OutputCode, StatusAction};

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Default status poll timeout in milliseconds.
pub const STATUS_POLL_TIMEOUT_MS: u64 = 1000;

/// Bandwidth probe target in kbps.
pub const SPEED_TEST_KBPS: u32 = 15_000;

/// Bandwidth probe duration in milliseconds.
pub const SPEED_TEST_DURATION_MS: u64 = 2000;
