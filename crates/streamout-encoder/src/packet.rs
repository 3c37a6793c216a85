//! Encoded packet model.

use bytes::Bytes;

/// Media kind of an encoded packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Compressed video access unit.
    Video,

    /// Compressed audio frame.
    Audio,
}

/// Drop priority of a packet, derived from `nal_ref_idc`.
///
/// Ordering matters: the drop policy compares priorities and never drops
/// `Highest` (keyframe-equivalent) video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum NalPriority {
    /// Not referenced by any other picture.
    #[default]
    Disposable = 0,
    /// Low importance reference.
    Low = 1,
    /// High importance reference.
    High = 2,
    /// Decodable on its own (IDR or equivalent).
    Highest = 3,
}

impl NalPriority {
    /// Map a two-bit `nal_ref_idc` to a priority.
    pub fn from_ref_idc(ref_idc: u8) -> Self {
        match ref_idc & 0x3 {
            0 => Self::Disposable,
            1 => Self::Low,
            2 => Self::High,
            _ => Self::Highest,
        }
    }
}

/// One encoder output unit, owned by whichever stage currently holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    /// Audio or video.
    pub kind: PacketKind,

    /// Compressed payload. Video payloads use 4-byte length prefixes.
    pub payload: Bytes,

    /// Decode timestamp in microseconds.
    pub dts_usec: i64,

    /// Presentation timestamp in microseconds.
    pub pts_usec: i64,

    /// Decode timestamp on the host system clock, in microseconds.
    pub system_dts_usec: i64,

    /// Whether this packet starts a decodable picture sequence.
    pub is_keyframe: bool,

    /// Importance used by the drop policy.
    pub drop_priority: NalPriority,

    /// Encoder track this packet belongs to.
    pub track_index: usize,
}

impl EncodedPacket {
    /// Create a video packet. Keyframes are always `Highest`.
    pub fn video(
        payload: impl Into<Bytes>,
        dts_usec: i64,
        pts_usec: i64,
        is_keyframe: bool,
        drop_priority: NalPriority,
    ) -> Self {
        Self {
            kind: PacketKind::Video,
            payload: payload.into(),
            dts_usec,
            pts_usec,
            system_dts_usec: dts_usec,
            is_keyframe,
            drop_priority: if is_keyframe {
                NalPriority::Highest
            } else {
                drop_priority
            },
            track_index: 0,
        }
    }

    /// Create an audio packet.
    pub fn audio(payload: impl Into<Bytes>, dts_usec: i64) -> Self {
        Self {
            kind: PacketKind::Audio,
            payload: payload.into(),
            dts_usec,
            pts_usec: dts_usec,
            system_dts_usec: dts_usec,
            is_keyframe: false,
            drop_priority: NalPriority::Highest,
            track_index: 0,
        }
    }

    /// Set the system-clock decode timestamp.
    pub fn with_system_dts(mut self, system_dts_usec: i64) -> Self {
        self.system_dts_usec = system_dts_usec;
        self
    }

    /// Set the track index.
    pub fn with_track(mut self, track_index: usize) -> Self {
        self.track_index = track_index;
        self
    }

    /// Returns true for video packets.
    pub fn is_video(&self) -> bool {
        self.kind == PacketKind::Video
    }

    /// Returns true for audio packets.
    pub fn is_audio(&self) -> bool {
        self.kind == PacketKind::Audio
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(NalPriority::Disposable < NalPriority::Low);
        assert!(NalPriority::High < NalPriority::Highest);
        assert_eq!(NalPriority::from_ref_idc(0b11), NalPriority::Highest);
        assert_eq!(NalPriority::from_ref_idc(0b01), NalPriority::Low);
    }

    #[test]
    fn test_keyframe_forces_highest_priority() {
        let packet = EncodedPacket::video(vec![0u8; 4], 0, 0, true, NalPriority::Low);
        assert_eq!(packet.drop_priority, NalPriority::Highest);
        assert!(packet.is_video());
    }

    #[test]
    fn test_builders() {
        let packet = EncodedPacket::audio(vec![1u8, 2, 3], 1_000)
            .with_system_dts(42)
            .with_track(1);
        assert!(packet.is_audio());
        assert_eq!(packet.system_dts_usec, 42);
        assert_eq!(packet.track_index, 1);
        assert_eq!(packet.len(), 3);
    }
}
