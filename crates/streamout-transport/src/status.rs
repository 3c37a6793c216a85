//! Ingest status codes and their session-level meaning.

use std::fmt;

use tracing::{debug, info, warn};

pub use streamout_ipc::OutputCode;

use crate::client::{EventKind, EventReason, StatusMessage};

/// Status codes reported by an ingest client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngestStatus {
    Success,
    SocketNotConnected,
    MallocFailure,
    InternalError,
    ConfigError,
    NotActiveStream,
    NotConnected,
    AlreadyConnected,
    StatusTimeout,
    QueueFull,
    WaitingForKeyFrame,
    QueueEmpty,
    NotInitialized,
    BadRequest,
    DnsFailure,
    ConnectError,
    UnsupportedMediaType,
    OldVersion,
    Unauthorized,
    AudioSsrcCollision,
    VideoSsrcCollision,
    StreamRejected,
    BadOrInvalidStreamKey,
    ChannelInUse,
    RegionUnsupported,
    NoMediaTimeout,
    UserDisconnect,
    /// A code outside the known set.
    Unknown(i32),
}

const KNOWN: [IngestStatus; 27] = [
    IngestStatus::Success,
    IngestStatus::SocketNotConnected,
    IngestStatus::MallocFailure,
    IngestStatus::InternalError,
    IngestStatus::ConfigError,
    IngestStatus::NotActiveStream,
    IngestStatus::NotConnected,
    IngestStatus::AlreadyConnected,
    IngestStatus::StatusTimeout,
    IngestStatus::QueueFull,
    IngestStatus::WaitingForKeyFrame,
    IngestStatus::QueueEmpty,
    IngestStatus::NotInitialized,
    IngestStatus::BadRequest,
    IngestStatus::DnsFailure,
    IngestStatus::ConnectError,
    IngestStatus::UnsupportedMediaType,
    IngestStatus::OldVersion,
    IngestStatus::Unauthorized,
    IngestStatus::AudioSsrcCollision,
    IngestStatus::VideoSsrcCollision,
    IngestStatus::StreamRejected,
    IngestStatus::BadOrInvalidStreamKey,
    IngestStatus::ChannelInUse,
    IngestStatus::RegionUnsupported,
    IngestStatus::NoMediaTimeout,
    IngestStatus::UserDisconnect,
];

impl IngestStatus {
    /// Decode a raw status code. Codes are the positions of the known
    /// statuses, starting at 0 for `Success`.
    pub fn from_code(code: i32) -> Self {
        usize::try_from(code)
            .ok()
            .and_then(|index| KNOWN.get(index).copied())
            .unwrap_or(Self::Unknown(code))
    }

    /// Raw status code.
    pub fn code(self) -> i32 {
        match self {
            Self::Unknown(code) => code,
            known => KNOWN
                .iter()
                .position(|status| *status == known)
                .map_or(-1, |index| index as i32),
        }
    }

    /// Returns true for `Success`.
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::SocketNotConnected => "Socket not connected",
            Self::MallocFailure => "Out of memory",
            Self::InternalError => "Internal error",
            Self::ConfigError => "Configuration error",
            Self::NotActiveStream => "Stream is not active",
            Self::NotConnected => "Not connected",
            Self::AlreadyConnected => "Already connected",
            Self::StatusTimeout => "Timed out waiting for status",
            Self::QueueFull => "Queue full",
            Self::WaitingForKeyFrame => "Waiting for key frame",
            Self::QueueEmpty => "Queue empty",
            Self::NotInitialized => "Not initialized",
            Self::BadRequest => "Bad request",
            Self::DnsFailure => "DNS lookup failed",
            Self::ConnectError => "Connect error",
            Self::UnsupportedMediaType => "Unsupported media type",
            Self::OldVersion => "Client version too old",
            Self::Unauthorized => "Unauthorized",
            Self::AudioSsrcCollision => "Audio SSRC collision",
            Self::VideoSsrcCollision => "Video SSRC collision",
            Self::StreamRejected => "Stream rejected",
            Self::BadOrInvalidStreamKey => "Bad or invalid stream key",
            Self::ChannelInUse => "Channel in use",
            Self::RegionUnsupported => "Region unsupported",
            Self::NoMediaTimeout => "No media timeout",
            Self::UserDisconnect => "User disconnect",
            Self::Unknown(_) => "Unknown error",
        }
    }
}

impl fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

/// Map an ingest status to an output outcome. Total; unknown codes are
/// treated as retryable errors.
pub fn map_status(status: IngestStatus) -> OutputCode {
    use IngestStatus::*;

    match status {
        Success | UserDisconnect => OutputCode::Success,
        BadRequest | DnsFailure | ConnectError | UnsupportedMediaType | OldVersion
        | Unauthorized | AudioSsrcCollision | VideoSsrcCollision | StreamRejected
        | BadOrInvalidStreamKey | ChannelInUse | RegionUnsupported => OutputCode::ConnectFailed,
        NoMediaTimeout => OutputCode::Disconnected,
        SocketNotConnected | MallocFailure | InternalError | ConfigError | NotActiveStream
        | NotConnected | AlreadyConnected | StatusTimeout | QueueFull | WaitingForKeyFrame
        | QueueEmpty | NotInitialized | Unknown(_) => OutputCode::RetryableError,
    }
}

/// What the status thread should do after one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    /// Keep polling.
    Continue,

    /// The ingest dropped the session; ask the host to reconnect.
    Reconnect,

    /// The session was torn down locally; stop polling.
    Exit,
}

/// Classify the result of one status poll.
///
/// Timeouts and empty queues keep polling. A not-initialized client or a
/// disconnect requested through the API ends polling. Any other disconnect
/// event requests a reconnect. Everything else is informational.
pub fn classify_status(polled: &Result<StatusMessage, IngestStatus>) -> StatusAction {
    match polled {
        Err(IngestStatus::StatusTimeout | IngestStatus::QueueEmpty) => StatusAction::Continue,
        Err(IngestStatus::NotInitialized) => StatusAction::Exit,
        Err(status) => {
            debug!(%status, "Status poll failed");
            StatusAction::Continue
        }
        Ok(StatusMessage::Event {
            kind: EventKind::Disconnected,
            reason,
            error_code,
        }) => {
            info!(reason = ?reason, error = %error_code, "Disconnected from ingest");
            if *reason == EventReason::ApiRequest {
                StatusAction::Exit
            } else {
                warn!("Reconnecting to ingest");
                StatusAction::Reconnect
            }
        }
        Ok(_) => StatusAction::Continue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for (index, status) in KNOWN.iter().enumerate() {
            assert_eq!(status.code(), index as i32);
            assert_eq!(IngestStatus::from_code(index as i32), *status);
        }
        assert_eq!(IngestStatus::from_code(-4), IngestStatus::Unknown(-4));
        assert_eq!(IngestStatus::from_code(99), IngestStatus::Unknown(99));
        assert_eq!(IngestStatus::Unknown(99).code(), 99);
    }

    #[test]
    fn test_map_status() {
        assert_eq!(map_status(IngestStatus::Success), OutputCode::Success);
        assert_eq!(map_status(IngestStatus::UserDisconnect), OutputCode::Success);
        assert_eq!(map_status(IngestStatus::Unauthorized), OutputCode::ConnectFailed);
        assert_eq!(map_status(IngestStatus::DnsFailure), OutputCode::ConnectFailed);
        assert_eq!(
            map_status(IngestStatus::BadOrInvalidStreamKey),
            OutputCode::ConnectFailed
        );
        assert_eq!(map_status(IngestStatus::NoMediaTimeout), OutputCode::Disconnected);
        assert_eq!(map_status(IngestStatus::QueueFull), OutputCode::RetryableError);
        assert_eq!(map_status(IngestStatus::Unknown(1234)), OutputCode::RetryableError);
    }

    #[test]
    fn test_map_status_is_total() {
        for code in -5..40 {
            let _ = map_status(IngestStatus::from_code(code));
        }
    }

    #[test]
    fn test_classify_poll_errors() {
        assert_eq!(
            classify_status(&Err(IngestStatus::StatusTimeout)),
            StatusAction::Continue
        );
        assert_eq!(
            classify_status(&Err(IngestStatus::QueueEmpty)),
            StatusAction::Continue
        );
        assert_eq!(
            classify_status(&Err(IngestStatus::NotInitialized)),
            StatusAction::Exit
        );
    }

    #[test]
    fn test_classify_disconnect_events() {
        let remote = Ok(StatusMessage::Event {
            kind: EventKind::Disconnected,
            reason: EventReason::NoMedia,
            error_code: IngestStatus::NoMediaTimeout,
        });
        assert_eq!(classify_status(&remote), StatusAction::Reconnect);

        let local = Ok(StatusMessage::Event {
            kind: EventKind::Disconnected,
            reason: EventReason::ApiRequest,
            error_code: IngestStatus::UserDisconnect,
        });
        assert_eq!(classify_status(&local), StatusAction::Exit);
    }

    #[test]
    fn test_classify_informational() {
        let log = Ok(StatusMessage::Log {
            level: 2,
            message: "hello".to_string(),
        });
        assert_eq!(classify_status(&log), StatusAction::Continue);

        let connected = Ok(StatusMessage::Event {
            kind: EventKind::Connected,
            reason: EventReason::None,
            error_code: IngestStatus::Success,
        });
        assert_eq!(classify_status(&connected), StatusAction::Continue);
    }

    #[test]
    fn test_display() {
        assert_eq!(IngestStatus::Unauthorized.to_string(), "Unauthorized (18)");
    }
}
