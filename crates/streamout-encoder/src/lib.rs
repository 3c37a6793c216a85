//! Encoded packet model for the ingest output.
//!
//! Frames arrive from the host's encoders already compressed. This crate
//! defines the packet type the output queues, converts H.264 Annex B
//! encoder output into the length-prefixed layout the output transmits,
//! and lets the output ask for the current stream header on demand.

mod avc;
mod error;
mod packet;

pub use avc::{
    avc_header_from_annex_b, build_avc_header, extract_sps_pps, nal_ref_idc,
    nals_to_length_prefixed, parse_annex_b, parse_avc_packet, NalUnit, NalUnitType,
};
pub use error::EncoderError;
pub use packet::{EncodedPacket, NalPriority, PacketKind};

use bytes::Bytes;

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// Supplies stream headers on demand.
///
/// The output resends the video header ahead of every keyframe so the
/// remote decoder can resynchronize.
pub trait HeaderSource: Send + Sync {
    /// Header-mode payload (AVC decoder configuration record) for a video
    /// track, if the encoder has produced one.
    fn video_header(&self, track_index: usize) -> Option<Bytes>;
}

/// A header that never changes for the lifetime of the output.
#[derive(Debug, Clone)]
pub struct StaticHeader {
    header: Bytes,
}

impl StaticHeader {
    /// Wrap an already built stream header.
    pub fn new(header: impl Into<Bytes>) -> Self {
        Self {
            header: header.into(),
        }
    }

    /// Build the header from Annex B SPS/PPS bytes.
    pub fn from_annex_b(annex_b_headers: &[u8]) -> EncoderResult<Self> {
        avc_header_from_annex_b(annex_b_headers).map(Self::new)
    }
}

impl HeaderSource for StaticHeader {
    fn video_header(&self, _track_index: usize) -> Option<Bytes> {
        Some(self.header.clone())
    }
}

impl<F> HeaderSource for F
where
    F: Fn(usize) -> Option<Bytes> + Send + Sync,
{
    fn video_header(&self, track_index: usize) -> Option<Bytes> {
        self(track_index)
    }
}
