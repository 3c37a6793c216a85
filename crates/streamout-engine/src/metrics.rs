//! Output counters and status-message reporting.

use tracing::{debug, info, warn};

use streamout_transport::{InstantStats, PacketStats, StatusMessage, VideoStats};

/// Point-in-time view of the output counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputStats {
    /// Bytes accepted by the ingest over the life of the output.
    pub bytes_sent: u64,

    /// Video frames completed (units sent with the end marker).
    pub frames_sent: u64,

    /// Video frames dropped or refused by the queue.
    pub dropped_frames: u64,

    /// Packets waiting to be sent.
    pub queued_packets: usize,
}

fn per_second(count: u64, period_ms: u32) -> f32 {
    if period_ms == 0 {
        0.0
    } else {
        count as f32 * 1000.0 / period_ms as f32
    }
}

fn kbps(bytes: u64, period_ms: u32) -> f32 {
    if period_ms == 0 {
        0.0
    } else {
        bytes as f32 / period_ms as f32 * 8.0
    }
}

fn describe_packets(p: &PacketStats) -> String {
    format!(
        "Avg packet send per second {:.1}, total nack requests {}",
        per_second(p.sent as u64, p.period_ms),
        p.nack_requests
    )
}

fn describe_instant(p: &InstantStats) -> String {
    format!(
        "avg transmit delay {}ms (min: {}, max: {}), avg rtt {}ms (min: {}, max: {})",
        p.avg_xmit_delay_ms,
        p.min_xmit_delay_ms,
        p.max_xmit_delay_ms,
        p.avg_rtt_ms,
        p.min_rtt_ms,
        p.max_rtt_ms
    )
}

fn describe_video(v: &VideoStats) -> String {
    format!(
        "Queue an average of {:.2} fps ({:.1} kbps), sent an average of {:.2} fps ({:.1} kbps), queue fullness {}, max frame size {}",
        per_second(v.frames_queued as u64, v.period_ms),
        kbps(v.bytes_queued, v.period_ms),
        per_second(v.frames_sent as u64, v.period_ms),
        kbps(v.bytes_sent, v.period_ms),
        v.queue_fullness,
        v.max_frame_size
    )
}

/// Render a status message as a log line.
pub fn describe_status(message: &StatusMessage) -> String {
    match message {
        StatusMessage::Event {
            kind,
            reason,
            error_code,
        } => format!("Status event {:?} ({:?}): {}", kind, reason, error_code),
        StatusMessage::Log { level, message } => format!("[{}] {}", level, message),
        StatusMessage::PacketStats(p) => describe_packets(p),
        StatusMessage::InstantStats(p) => describe_instant(p),
        StatusMessage::VideoStats(v) => describe_video(v),
        StatusMessage::Other(kind) => format!("Got status message of type {}", kind),
    }
}

/// Forward a status message to the log.
///
/// Client log levels follow syslog numbering: 0-3 are errors, 4 warnings.
pub fn log_status(message: &StatusMessage) {
    let line = describe_status(message);
    match message {
        StatusMessage::Log { level, .. } if *level <= 4 => {
            warn!(target: "streamout::ingest", "{}", line)
        }
        StatusMessage::Log { level, .. } if *level >= 7 => {
            debug!(target: "streamout::ingest", "{}", line)
        }
        _ => info!(target: "streamout::ingest", "{}", line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamout_transport::{EventKind, EventReason, IngestStatus};

    #[test]
    fn test_describe_packet_stats() {
        let message = StatusMessage::PacketStats(PacketStats {
            period_ms: 2000,
            sent: 500,
            nack_requests: 3,
            ..Default::default()
        });
        assert_eq!(
            describe_status(&message),
            "Avg packet send per second 250.0, total nack requests 3"
        );
    }

    #[test]
    fn test_describe_video_stats() {
        let message = StatusMessage::VideoStats(VideoStats {
            period_ms: 1000,
            frames_queued: 30,
            frames_sent: 30,
            bytes_queued: 125_000,
            bytes_sent: 125_000,
            queue_fullness: 2,
            max_frame_size: 9000,
        });
        assert_eq!(
            describe_status(&message),
            "Queue an average of 30.00 fps (1000.0 kbps), sent an average of 30.00 fps (1000.0 kbps), queue fullness 2, max frame size 9000"
        );
    }

    #[test]
    fn test_describe_zero_period() {
        let message = StatusMessage::VideoStats(VideoStats::default());
        assert!(describe_status(&message).starts_with("Queue an average of 0.00 fps"));
    }

    #[test]
    fn test_describe_other_messages() {
        let instant = StatusMessage::InstantStats(InstantStats {
            avg_xmit_delay_ms: 4,
            min_xmit_delay_ms: 1,
            max_xmit_delay_ms: 9,
            avg_rtt_ms: 30,
            min_rtt_ms: 20,
            max_rtt_ms: 45,
            ..Default::default()
        });
        assert_eq!(
            describe_status(&instant),
            "avg transmit delay 4ms (min: 1, max: 9), avg rtt 30ms (min: 20, max: 45)"
        );

        let log = StatusMessage::Log {
            level: 6,
            message: "keepalive".to_string(),
        };
        assert_eq!(describe_status(&log), "[6] keepalive");

        let event = StatusMessage::Event {
            kind: EventKind::Connected,
            reason: EventReason::None,
            error_code: IngestStatus::Success,
        };
        assert!(describe_status(&event).starts_with("Status event Connected"));
        assert_eq!(
            describe_status(&StatusMessage::Other(42)),
            "Got status message of type 42"
        );
    }
}
