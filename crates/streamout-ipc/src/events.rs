//! Events sent from the output to the host.

use serde::{Deserialize, Serialize};

use crate::state::{OutputState, StopReason};

/// Events that the output reports to its host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputEvent {
    /// Output state has changed.
    StateChanged {
        /// Previous state.
        previous: OutputState,

        /// Current state.
        current: OutputState,
    },

    /// The session is live; the host should start feeding packets.
    BeginCapture,

    /// The session is over; the host should stop feeding packets.
    EndCapture,

    /// The connection attempt ended. Sent once per attempt.
    Stopped(StopReason),
}

impl OutputEvent {
    /// Returns the stop reason if this is a terminal event.
    pub fn stop_reason(&self) -> Option<&StopReason> {
        match self {
            Self::Stopped(reason) => Some(reason),
            _ => None,
        }
    }
}
