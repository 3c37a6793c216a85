//! Ingest output engine.
//!
//! This crate owns the packet queue and its drop policy, and runs the
//! connect, status and send threads that move queued packets to an ingest
//! client.

mod error;
mod metrics;
mod output;
mod queue;
mod session;

pub use error::OutputError;
pub use metrics::{describe_status, log_status, OutputStats};
pub use output::IngestOutput;
pub use queue::{PacketQueue, MIN_PACKETS_FOR_DROP};
pub use session::{SessionState, StopMode, StopSignal, WakeSignal};

use std::sync::Arc;

use crossbeam_channel::Sender;
use streamout_encoder::HeaderSource;
use streamout_ipc::{OutputConfig, OutputEvent};
use streamout_transport::IngestConnector;

/// Result type for output operations.
pub type OutputResult<T> = Result<T, OutputError>;

/// Create an idle output reporting to `event_tx`.
pub fn create_output(
    config: OutputConfig,
    connector: Arc<dyn IngestConnector>,
    headers: Arc<dyn HeaderSource>,
    event_tx: Sender<OutputEvent>,
) -> IngestOutput {
    IngestOutput::new(config, connector, headers, event_tx)
}
