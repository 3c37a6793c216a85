//! Elementary-stream source for the host.

use anyhow::{bail, Context};
use bytes::Bytes;

use streamout_encoder::{avc_header_from_annex_b, parse_annex_b, NalUnitType};

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Opus frame that decodes to 20 ms of silence.
pub const SILENT_OPUS_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Duration of one synthetic audio frame.
pub const AUDIO_FRAME_USEC: i64 = 20_000;

/// An H.264 stream split into access units.
pub struct AnnexBFeed {
    /// Header-mode payload built from the first SPS/PPS pair.
    pub header: Bytes,

    /// Annex B access units in decode order.
    pub access_units: Vec<Vec<u8>>,
}

impl AnnexBFeed {
    /// Split an Annex B stream. Each coded slice closes an access unit and
    /// takes every non-slice unit seen since the previous slice.
    pub fn parse(stream: &[u8]) -> anyhow::Result<Self> {
        let header =
            avc_header_from_annex_b(stream).context("stream has no usable SPS/PPS")?;

        let mut access_units = Vec::new();
        let mut pending = Vec::new();
        for nal in parse_annex_b(stream) {
            pending.extend_from_slice(&START_CODE);
            pending.extend_from_slice(nal.data);

            if matches!(nal.nal_type, NalUnitType::NonIdrSlice | NalUnitType::IdrSlice) {
                access_units.push(std::mem::take(&mut pending));
            }
        }

        if access_units.is_empty() {
            bail!("stream has no coded slices");
        }

        Ok(Self {
            header,
            access_units,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_access_units() {
        let stream = [
            0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1f, 0xe9, //
            0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80, //
            0, 0, 0, 1, 0x65, 0x88, 0x84, //
            0, 0, 0, 1, 0x09, 0xf0, //
            0, 0, 0, 1, 0x41, 0x9a, 0x02,
        ];

        let feed = AnnexBFeed::parse(&stream).unwrap();
        assert_eq!(feed.access_units.len(), 2);
        assert_eq!(feed.access_units[0].len(), 4 * 3 + 5 + 4 + 3);
        assert_eq!(&feed.access_units[1][..], &stream[24..]);
        assert_eq!(feed.header[0], 0x01);
    }

    #[test]
    fn test_rejects_stream_without_parameter_sets() {
        let stream = [0, 0, 0, 1, 0x65, 0x88, 0x84];
        assert!(AnnexBFeed::parse(&stream).is_err());
    }
}
