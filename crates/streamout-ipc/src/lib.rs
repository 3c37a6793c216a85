//! Host-facing types for the ingest output.
//!
//! This crate defines the configuration, lifecycle state and events
//! exchanged between a host application and the output engine.

mod config;
mod events;
mod state;

pub use config::{
    ConfigError, OutputConfig, DEFAULT_DROP_THRESHOLD_MS, DEFAULT_MAX_SHUTDOWN_TIME_SECS,
    DEFAULT_MAX_UNITS_PER_ACCESS_UNIT,
};
pub use events::OutputEvent;
pub use state::{OutputCode, OutputState, StopReason};

use crossbeam_channel::{Receiver, Sender};

/// Result type for configuration handling.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Channel capacity for events (output → host).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<OutputEvent>, Receiver<OutputEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
