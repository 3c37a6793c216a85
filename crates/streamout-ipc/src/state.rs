//! Output lifecycle state types.

use serde::{Deserialize, Serialize};

/// Lifecycle state of an ingest output.
///
/// `Idle → Connecting → Active → Draining → Idle`. The remote-disconnect
/// condition is tracked separately and can be raised while `Active`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputState {
    /// Nothing running.
    #[default]
    Idle,

    /// A connection attempt is in progress.
    Connecting,

    /// Connected and sending queued packets.
    Active,

    /// A stop was requested; the send loop is finishing.
    Draining,
}

impl OutputState {
    /// Returns true if the output is idle.
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns a simple string representation of the state.
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Active => "Active",
            Self::Draining => "Draining",
        }
    }
}

/// Host-facing outcome of an ingest status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputCode {
    Success,
    RetryableError,
    ConnectFailed,
    Disconnected,
}

/// Why a connection attempt ended. Reported exactly once per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The host asked the output to stop.
    User,

    /// The session was lost; reconnecting is reasonable.
    Disconnected,

    /// The ingest refused or could not be reached.
    ConnectFailed {
        /// Raw ingest status code.
        code: i32,

        /// Human-readable status.
        description: String,

        /// How the ingest status classifies.
        outcome: OutputCode,
    },

    /// Session parameters could not be resolved.
    BadInput,
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::User => "Stream stopped by user".to_string(),
            Self::Disconnected => "Disconnected from ingest".to_string(),
            Self::ConnectFailed {
                code, description, ..
            } => {
                format!("Could not connect: {description} ({code})")
            }
            Self::BadInput => "Invalid ingest settings".to_string(),
        }
    }

    /// Returns true if the host may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Disconnected => true,
            Self::ConnectFailed { outcome, .. } => matches!(
                outcome,
                OutputCode::RetryableError | OutputCode::Disconnected
            ),
            Self::User | Self::BadInput => false,
        }
    }
}
