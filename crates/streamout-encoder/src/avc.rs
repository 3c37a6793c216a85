//! H.264 access unit normalization.
//!
//! Encoders such as x264 emit **Annex B** byte streams, where NAL units are
//! separated by start codes (0x000001 or 0x00000001). The output pipeline
//! works on length-prefixed payloads instead:
//!
//! - coded pictures use a 4-byte big-endian length before every NAL unit;
//! - the stream header is an AVC decoder configuration record carrying the
//!   SPS and PPS behind 2-byte lengths.
//!
//! This module converts encoder output into those two layouts and derives
//! the keyframe flag and drop priority the queue needs.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::error::EncoderError;
use crate::packet::{EncodedPacket, NalPriority};
use crate::EncoderResult;

/// NAL unit types relevant to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NalUnitType {
    /// Non-IDR slice (P/B frame).
    NonIdrSlice = 1,
    /// IDR slice (keyframe).
    IdrSlice = 5,
    /// Supplemental Enhancement Information.
    Sei = 6,
    /// Sequence Parameter Set.
    Sps = 7,
    /// Picture Parameter Set.
    Pps = 8,
    /// Access Unit Delimiter.
    Aud = 9,
    /// Filler data.
    Filler = 12,
    /// Other/unknown NAL type.
    Other = 0,
}

impl From<u8> for NalUnitType {
    fn from(byte: u8) -> Self {
        match byte & 0x1F {
            1 => NalUnitType::NonIdrSlice,
            5 => NalUnitType::IdrSlice,
            6 => NalUnitType::Sei,
            7 => NalUnitType::Sps,
            8 => NalUnitType::Pps,
            9 => NalUnitType::Aud,
            12 => NalUnitType::Filler,
            _ => NalUnitType::Other,
        }
    }
}

/// Two-bit `nal_ref_idc` from a NAL header byte.
pub fn nal_ref_idc(header: u8) -> u8 {
    (header >> 5) & 0x3
}

/// A NAL unit borrowed from an Annex B buffer (header byte included,
/// start code excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit<'a> {
    /// The NAL unit type.
    pub nal_type: NalUnitType,
    /// The `nal_ref_idc` field.
    pub ref_idc: u8,
    /// Raw NAL bytes.
    pub data: &'a [u8],
}

impl<'a> NalUnit<'a> {
    fn new(data: &'a [u8]) -> Self {
        let header = data[0];
        Self {
            nal_type: NalUnitType::from(header),
            ref_idc: nal_ref_idc(header),
            data,
        }
    }
}

/// Locate the next start code at or after `from`, returning its position
/// and length (3 or 4).
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if data[i + 2] == 0 && i + 3 < data.len() && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// Split an Annex B byte stream into NAL units. Bytes before the first
/// start code are ignored.
pub fn parse_annex_b(data: &[u8]) -> Vec<NalUnit<'_>> {
    let mut nals = Vec::new();
    let Some(mut current) = find_start_code(data, 0) else {
        return nals;
    };

    loop {
        let start = current.0 + current.1;
        let next = find_start_code(data, start);
        let end = next.map_or(data.len(), |(pos, _)| pos);

        if start < end {
            nals.push(NalUnit::new(&data[start..end]));
        }

        match next {
            Some(found) => current = found,
            None => break,
        }
    }

    nals
}

/// Write NAL units with 4-byte big-endian length prefixes.
pub fn nals_to_length_prefixed(nals: &[NalUnit<'_>]) -> Bytes {
    let total: usize = nals.iter().map(|nal| nal.data.len() + 4).sum();
    let mut buf = BytesMut::with_capacity(total);

    for nal in nals {
        buf.put_u32(nal.data.len() as u32);
        buf.put_slice(nal.data);
    }

    buf.freeze()
}

/// Convert one Annex B access unit into a length-prefixed video packet.
///
/// The keyframe flag is set when an IDR slice is present and the drop
/// priority is the highest `nal_ref_idc` found in the access unit.
pub fn parse_avc_packet(annex_b: &[u8], dts_usec: i64, pts_usec: i64) -> EncoderResult<EncodedPacket> {
    let nals = parse_annex_b(annex_b);
    if nals.is_empty() {
        return Err(EncoderError::NoNalUnits(annex_b.len()));
    }

    let is_keyframe = nals.iter().any(|nal| nal.nal_type == NalUnitType::IdrSlice);
    let ref_idc = nals.iter().map(|nal| nal.ref_idc).max().unwrap_or(0);

    Ok(EncodedPacket::video(
        nals_to_length_prefixed(&nals),
        dts_usec,
        pts_usec,
        is_keyframe,
        NalPriority::from_ref_idc(ref_idc),
    ))
}

/// Find the SPS and PPS in Annex B header bytes. The last of each wins.
pub fn extract_sps_pps(annex_b_headers: &[u8]) -> Option<(&[u8], &[u8])> {
    let mut sps = None;
    let mut pps = None;

    for nal in parse_annex_b(annex_b_headers) {
        match nal.nal_type {
            NalUnitType::Sps => {
                debug!(len = nal.data.len(), "Found SPS NAL unit");
                sps = Some(nal.data);
            }
            NalUnitType::Pps => {
                debug!(len = nal.data.len(), "Found PPS NAL unit");
                pps = Some(nal.data);
            }
            _ => {}
        }
    }

    sps.zip(pps)
}

/// Build the stream header (AVC decoder configuration record, ISO 14496-15)
/// from one SPS and one PPS.
///
/// Layout: 6-byte prefix (version, profile, compatibility, level,
/// `0xFF` length size, `0xE1` SPS count), 2-byte SPS length, SPS, 1-byte
/// PPS count, 2-byte PPS length, PPS.
pub fn build_avc_header(sps: &[u8], pps: &[u8]) -> EncoderResult<Bytes> {
    if sps.len() < 4 {
        return Err(EncoderError::InvalidParameterSet(format!(
            "SPS too short: {} bytes",
            sps.len()
        )));
    }
    if pps.is_empty() {
        return Err(EncoderError::InvalidParameterSet("PPS is empty".to_string()));
    }
    let sps_len = u16::try_from(sps.len())
        .map_err(|_| EncoderError::InvalidParameterSet(format!("SPS too long: {} bytes", sps.len())))?;
    let pps_len = u16::try_from(pps.len())
        .map_err(|_| EncoderError::InvalidParameterSet(format!("PPS too long: {} bytes", pps.len())))?;

    let mut buf = BytesMut::with_capacity(11 + sps.len() + pps.len());

    buf.put_u8(0x01);
    buf.put_u8(sps[1]); // profile_idc
    buf.put_u8(sps[2]); // constraint flags
    buf.put_u8(sps[3]); // level_idc
    buf.put_u8(0xFF);
    buf.put_u8(0xE1);

    buf.put_u16(sps_len);
    buf.put_slice(sps);

    buf.put_u8(0x01);
    buf.put_u16(pps_len);
    buf.put_slice(pps);

    debug!(
        sps_len = sps.len(),
        pps_len = pps.len(),
        total_len = buf.len(),
        "Built AVC stream header"
    );

    Ok(buf.freeze())
}

/// Build the stream header straight from Annex B encoder header bytes.
pub fn avc_header_from_annex_b(annex_b_headers: &[u8]) -> EncoderResult<Bytes> {
    let (sps, pps) =
        extract_sps_pps(annex_b_headers).ok_or(EncoderError::MissingParameterSets("SPS and PPS required"))?;
    build_avc_header(sps, pps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_annex_b_mixed_start_codes() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, // SPS
            0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80, // PPS
        ];
        let nals = parse_annex_b(&data);
        assert_eq!(nals.len(), 2);
        assert_eq!(nals[0].nal_type, NalUnitType::Sps);
        assert_eq!(nals[0].data, &[0x67, 0x42, 0x00, 0x1E]);
        assert_eq!(nals[1].nal_type, NalUnitType::Pps);
        assert_eq!(nals[1].ref_idc, 3);
    }

    #[test]
    fn test_parse_annex_b_without_start_code() {
        assert!(parse_annex_b(&[0x65, 0x88, 0x84]).is_empty());
        assert!(parse_annex_b(&[]).is_empty());
    }

    #[test]
    fn test_length_prefixed_output() {
        let data = [0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84];
        let nals = parse_annex_b(&data);
        let out = nals_to_length_prefixed(&nals);
        assert_eq!(out.as_ref(), &[0x00, 0x00, 0x00, 0x03, 0x65, 0x88, 0x84]);
    }

    #[test]
    fn test_parse_avc_packet_keyframe() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x09, 0xF0, // AUD, ref_idc 0
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, // IDR, ref_idc 3
        ];
        let packet = parse_avc_packet(&data, 1_000, 2_000).unwrap();
        assert!(packet.is_keyframe);
        assert_eq!(packet.drop_priority, NalPriority::Highest);
        assert_eq!(packet.dts_usec, 1_000);
        assert_eq!(packet.pts_usec, 2_000);
        assert_eq!(
            packet.payload.as_ref(),
            &[0, 0, 0, 2, 0x09, 0xF0, 0, 0, 0, 3, 0x65, 0x88, 0x84]
        );
    }

    #[test]
    fn test_parse_avc_packet_priority_from_ref_idc() {
        // Non-IDR slice with nal_ref_idc = 2
        let data = [0x00, 0x00, 0x01, 0x41, 0x9A, 0x00];
        let packet = parse_avc_packet(&data, 0, 0).unwrap();
        assert!(!packet.is_keyframe);
        assert_eq!(packet.drop_priority, NalPriority::High);

        // Disposable B-slice
        let data = [0x00, 0x00, 0x01, 0x01, 0x9E, 0x00];
        let packet = parse_avc_packet(&data, 0, 0).unwrap();
        assert_eq!(packet.drop_priority, NalPriority::Disposable);
    }

    #[test]
    fn test_parse_avc_packet_rejects_empty() {
        assert!(matches!(
            parse_avc_packet(&[0x01, 0x02], 0, 0),
            Err(EncoderError::NoNalUnits(2))
        ));
    }

    #[test]
    fn test_build_avc_header() {
        let sps = [0x67, 0x42, 0x00, 0x1E, 0xAB, 0xCD];
        let pps = [0x68, 0xCE, 0x3C, 0x80];

        let header = build_avc_header(&sps, &pps).unwrap();

        assert_eq!(&header[..6], &[0x01, 0x42, 0x00, 0x1E, 0xFF, 0xE1]);
        assert_eq!(&header[6..8], &[0x00, 0x06]);
        assert_eq!(&header[8..14], &sps);
        assert_eq!(header[14], 0x01);
        assert_eq!(&header[15..17], &[0x00, 0x04]);
        assert_eq!(&header[17..], &pps);
    }

    #[test]
    fn test_build_avc_header_rejects_short_sps() {
        assert!(build_avc_header(&[0x67, 0x42], &[0x68]).is_err());
    }

    #[test]
    fn test_avc_header_from_annex_b() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, // SPS
            0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80, // PPS
        ];
        let header = avc_header_from_annex_b(&data).unwrap();
        assert_eq!(header.len(), 6 + 2 + 4 + 1 + 2 + 4);

        assert!(matches!(
            avc_header_from_annex_b(&data[..8]),
            Err(EncoderError::MissingParameterSets(_))
        ));
    }
}
