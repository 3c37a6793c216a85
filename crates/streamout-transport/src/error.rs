//! Error types for the transport module.

use thiserror::Error;

use crate::extractor::ExtractError;
use crate::status::{map_status, IngestStatus, OutputCode};

/// Errors that can occur while talking to the ingest.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The client could not be created.
    #[error("Failed to create ingest client: {0}")]
    Create(IngestStatus),

    /// The session could not be opened.
    #[error("Connection failed: {0}")]
    Connect(IngestStatus),

    /// A unit could not be sent.
    #[error("Send failed: {0}")]
    Send(IngestStatus),

    /// A video payload could not be split into units.
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

impl TransportError {
    /// The ingest status behind this error, if any.
    pub fn status(&self) -> Option<IngestStatus> {
        match self {
            Self::Create(status) | Self::Connect(status) | Self::Send(status) => Some(*status),
            Self::Extract(_) => None,
        }
    }

    /// Output-facing outcome of this error.
    pub fn output_code(&self) -> OutputCode {
        match self {
            Self::Send(_) => OutputCode::Disconnected,
            Self::Create(status) | Self::Connect(status) => match map_status(*status) {
                OutputCode::Success => OutputCode::ConnectFailed,
                code => code,
            },
            Self::Extract(_) => OutputCode::RetryableError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_code() {
        assert_eq!(
            TransportError::Send(IngestStatus::SocketNotConnected).output_code(),
            OutputCode::Disconnected
        );
        assert_eq!(
            TransportError::Connect(IngestStatus::Unauthorized).output_code(),
            OutputCode::ConnectFailed
        );
        assert_eq!(
            TransportError::Connect(IngestStatus::InternalError).output_code(),
            OutputCode::RetryableError
        );
        assert_eq!(
            TransportError::from(ExtractError::CapacityExceeded { limit: 100 }).status(),
            None
        );
    }
}
