//! Bitstream unit extraction.
//!
//! The ingest transmits H.264 one NAL unit at a time, with a marker on the
//! last unit of every picture. Packets reach the send loop in one of two
//! length-prefixed layouts:
//!
//! - **Header**: a 6-byte configuration prefix, then parameter sets behind
//!   2-byte big-endian lengths, each set after the first preceded by a
//!   1-byte count/separator.
//! - **Data**: units behind 4-byte big-endian lengths.
//!
//! Extraction borrows from the packet payload; nothing is copied.

use thiserror::Error;
use tracing::{trace, warn};

use streamout_encoder::NalUnitType;

/// Default upper bound on units extracted from one access unit.
pub const DEFAULT_MAX_UNITS: usize = 100;

/// Length of the configuration prefix ahead of the first parameter set.
pub const HEADER_PREFIX_LEN: usize = 6;

/// Length of the separator ahead of every later parameter set.
pub const HEADER_SEPARATOR_LEN: usize = 1;

/// Layout of the payload handed to the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadMode {
    /// Stream header with parameter sets.
    Header,
    /// Coded picture.
    Data,
}

/// One unit ready for transmission, borrowed from the packet payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmittableUnit<'a> {
    /// Unit bytes (NAL header included, length prefix excluded).
    pub data: &'a [u8],

    /// Offset of `data` within the source payload.
    pub offset: usize,

    /// Decode timestamp of the access unit.
    pub dts_usec: i64,

    /// Set on the last unit of a coded picture.
    pub end_of_access_unit: bool,
}

impl TransmittableUnit<'_> {
    /// Unit length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the unit is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A framing problem that extraction recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    /// A unit declared more bytes than the payload holds. The unit was
    /// cut to the bytes present.
    LengthOverrun {
        offset: usize,
        declared: usize,
        available: usize,
    },

    /// The payload ended inside a length prefix or separator.
    TruncatedPrefix { offset: usize, available: usize },
}

/// Result of extracting one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction<'a> {
    /// Units in transmission order.
    pub units: Vec<TransmittableUnit<'a>>,

    /// Recovered framing problems, in payload order.
    pub malformed: Vec<Malformed>,

    /// Units discarded by the redundancy filter.
    pub filtered: usize,
}

impl Extraction<'_> {
    /// Total bytes across all units.
    pub fn total_len(&self) -> usize {
        self.units.iter().map(|unit| unit.len()).sum()
    }
}

/// Errors that abort extraction of a single payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// The payload holds more units than the extractor accepts.
    #[error("Access unit exceeds {limit} units")]
    CapacityExceeded { limit: usize },
}

/// Bounds-checked reader over a payload.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if n > self.remaining() {
            return None;
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(bytes)
    }

    fn read_be(&mut self, width: usize) -> Option<usize> {
        self.take(width)
            .map(|bytes| bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize))
    }

    /// Take up to `n` bytes, stopping at the end of the buffer.
    fn take_clamped(&mut self, n: usize) -> &'a [u8] {
        let n = n.min(self.remaining());
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        bytes
    }
}

/// Units that carry no picture data for this transport: AUD, filler and
/// SEI with `nal_ref_idc == 0`.
fn is_redundant(header: u8) -> bool {
    let droppable = matches!(
        NalUnitType::from(header),
        NalUnitType::Aud | NalUnitType::Filler | NalUnitType::Sei
    );
    droppable && streamout_encoder::nal_ref_idc(header) == 0
}

/// Splits length-prefixed payloads into transmittable units.
#[derive(Debug, Clone, Copy)]
pub struct UnitExtractor {
    max_units: usize,
}

impl Default for UnitExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UNITS)
    }
}

impl UnitExtractor {
    /// Create an extractor accepting at most `max_units` units per payload.
    pub fn new(max_units: usize) -> Self {
        Self { max_units }
    }

    /// Upper bound on units per payload.
    pub fn max_units(&self) -> usize {
        self.max_units
    }

    /// Extract the units of one payload.
    ///
    /// In data mode the last emitted unit carries `end_of_access_unit`.
    /// Header units never do.
    pub fn extract<'a>(
        &self,
        payload: &'a [u8],
        mode: PayloadMode,
        dts_usec: i64,
    ) -> Result<Extraction<'a>, ExtractError> {
        let mut cursor = Cursor::new(payload);
        let mut out = Extraction::default();

        while !cursor.is_empty() {
            if out.units.len() >= self.max_units {
                warn!(limit = self.max_units, "Access unit has too many units");
                return Err(ExtractError::CapacityExceeded {
                    limit: self.max_units,
                });
            }

            let prefix_offset = cursor.pos;
            let declared = match mode {
                PayloadMode::Header => {
                    let skip = if prefix_offset == 0 {
                        HEADER_PREFIX_LEN
                    } else {
                        HEADER_SEPARATOR_LEN
                    };
                    cursor.take(skip).and_then(|_| cursor.read_be(2))
                }
                PayloadMode::Data => cursor.read_be(4),
            };

            let Some(declared) = declared else {
                warn!(
                    offset = prefix_offset,
                    available = payload.len() - prefix_offset,
                    "Payload ends inside a length prefix"
                );
                out.malformed.push(Malformed::TruncatedPrefix {
                    offset: prefix_offset,
                    available: payload.len() - prefix_offset,
                });
                break;
            };

            let offset = cursor.pos;
            let available = cursor.remaining();
            if declared > available {
                warn!(
                    declared,
                    available, "Unit length exceeds remaining payload"
                );
                out.malformed.push(Malformed::LengthOverrun {
                    offset,
                    declared,
                    available,
                });
            }

            let data = cursor.take_clamped(declared);
            let Some(&header) = data.first() else {
                continue;
            };

            if is_redundant(header) {
                trace!(nal_type = header & 0x1F, "Skipping redundant unit");
                out.filtered += 1;
                continue;
            }

            out.units.push(TransmittableUnit {
                data,
                offset,
                dts_usec,
                end_of_access_unit: false,
            });
        }

        if mode == PayloadMode::Data {
            if let Some(last) = out.units.last_mut() {
                last.end_of_access_unit = true;
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_payload(units: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for unit in units {
            out.extend_from_slice(&(unit.len() as u32).to_be_bytes());
            out.extend_from_slice(unit);
        }
        out
    }

    #[test]
    fn test_two_unit_access_unit() {
        let payload = [
            0x00, 0x00, 0x00, 0x02, 0x67, 0x42, //
            0x00, 0x00, 0x00, 0x03, 0x68, 0xCE, 0x3C,
        ];
        let extraction = UnitExtractor::default()
            .extract(&payload, PayloadMode::Data, 33_000)
            .unwrap();

        assert_eq!(extraction.units.len(), 2);
        assert_eq!(extraction.units[0].len(), 2);
        assert_eq!(extraction.units[0].offset, 4);
        assert!(!extraction.units[0].end_of_access_unit);
        assert_eq!(extraction.units[1].data, &[0x68, 0xCE, 0x3C]);
        assert!(extraction.units[1].end_of_access_unit);
        assert_eq!(extraction.units[1].dts_usec, 33_000);
        assert!(extraction.malformed.is_empty());
    }

    #[test]
    fn test_units_reassemble_payload() {
        let units: [&[u8]; 4] = [
            &[0x65, 0x88, 0x84, 0x00, 0x21],
            &[0x41, 0x9A],
            &[0x41, 0x9B, 0x10, 0x20, 0x30, 0x40, 0x50],
            &[0x01, 0x9E],
        ];
        let payload = data_payload(&units);
        let extraction = UnitExtractor::default()
            .extract(&payload, PayloadMode::Data, 0)
            .unwrap();

        let joined: Vec<u8> = extraction
            .units
            .iter()
            .flat_map(|unit| unit.data.iter().copied())
            .collect();
        let expected: Vec<u8> = units.concat();
        assert_eq!(joined, expected);

        let markers: Vec<bool> = extraction
            .units
            .iter()
            .map(|unit| unit.end_of_access_unit)
            .collect();
        assert_eq!(markers, vec![false, false, false, true]);
    }

    #[test]
    fn test_header_mode() {
        let sps = [0x67, 0x42, 0x00, 0x1E, 0xAB];
        let pps = [0x68, 0xCE, 0x3C, 0x80];
        let mut payload = vec![0x01, 0x42, 0x00, 0x1E, 0xFF, 0xE1];
        payload.extend_from_slice(&(sps.len() as u16).to_be_bytes());
        payload.extend_from_slice(&sps);
        payload.push(0x01);
        payload.extend_from_slice(&(pps.len() as u16).to_be_bytes());
        payload.extend_from_slice(&pps);

        let extraction = UnitExtractor::default()
            .extract(&payload, PayloadMode::Header, 0)
            .unwrap();

        assert_eq!(extraction.units.len(), 2);
        assert_eq!(extraction.units[0].data, &sps);
        assert_eq!(extraction.units[1].data, &pps);
        assert!(extraction.units.iter().all(|unit| !unit.end_of_access_unit));
    }

    #[test]
    fn test_header_mode_from_built_header() {
        let sps = [0x67, 0x64, 0x00, 0x28, 0xAC, 0xD9];
        let pps = [0x68, 0xEB, 0xE3, 0xCB];
        let header = streamout_encoder::build_avc_header(&sps, &pps).unwrap();

        let extraction = UnitExtractor::default()
            .extract(&header, PayloadMode::Header, 0)
            .unwrap();
        assert_eq!(extraction.units.len(), 2);
        assert_eq!(extraction.units[0].data, &sps);
        assert_eq!(extraction.units[1].data, &pps);
    }

    #[test]
    fn test_filters_redundant_units() {
        let units: [&[u8]; 5] = [
            &[0x09, 0xF0],       // AUD, ref_idc 0
            &[0x06, 0x05, 0x01], // SEI, ref_idc 0
            &[0x0C, 0xFF, 0xFF], // filler, ref_idc 0
            &[0x26, 0x01],       // SEI with ref_idc 1 is kept
            &[0x65, 0x88],
        ];
        let payload = data_payload(&units);
        let extraction = UnitExtractor::default()
            .extract(&payload, PayloadMode::Data, 0)
            .unwrap();

        assert_eq!(extraction.filtered, 3);
        assert_eq!(extraction.units.len(), 2);
        assert_eq!(extraction.units[0].data, &[0x26, 0x01]);
        assert!(extraction.units[1].end_of_access_unit);
    }

    #[test]
    fn test_marker_moves_to_last_emitted_unit() {
        let units: [&[u8]; 2] = [&[0x65, 0x88], &[0x0C, 0xFF]];
        let payload = data_payload(&units);
        let extraction = UnitExtractor::default()
            .extract(&payload, PayloadMode::Data, 0)
            .unwrap();

        assert_eq!(extraction.units.len(), 1);
        assert!(extraction.units[0].end_of_access_unit);
    }

    #[test]
    fn test_length_overrun_is_recovered() {
        let payload = [0x00, 0x00, 0x00, 0x09, 0x65, 0x88, 0x84];
        let extraction = UnitExtractor::default()
            .extract(&payload, PayloadMode::Data, 0)
            .unwrap();

        assert_eq!(extraction.units.len(), 1);
        assert_eq!(extraction.units[0].data, &[0x65, 0x88, 0x84]);
        assert!(extraction.units[0].end_of_access_unit);
        assert_eq!(
            extraction.malformed,
            vec![Malformed::LengthOverrun {
                offset: 4,
                declared: 9,
                available: 3,
            }]
        );
    }

    #[test]
    fn test_truncated_prefix_is_recovered() {
        let payload = [0x00, 0x00, 0x00, 0x02, 0x65, 0x88, 0x00, 0x00];
        let extraction = UnitExtractor::default()
            .extract(&payload, PayloadMode::Data, 0)
            .unwrap();

        assert_eq!(extraction.units.len(), 1);
        assert_eq!(
            extraction.malformed,
            vec![Malformed::TruncatedPrefix {
                offset: 6,
                available: 2,
            }]
        );
    }

    #[test]
    fn test_capacity_exceeded() {
        let unit: &[u8] = &[0x41, 0x9A];
        let units = vec![unit; 5];
        let payload = data_payload(&units);

        let extractor = UnitExtractor::new(4);
        assert_eq!(
            extractor.extract(&payload, PayloadMode::Data, 0),
            Err(ExtractError::CapacityExceeded { limit: 4 })
        );

        let extractor = UnitExtractor::new(5);
        assert_eq!(
            extractor
                .extract(&payload, PayloadMode::Data, 0)
                .unwrap()
                .units
                .len(),
            5
        );
    }

    #[test]
    fn test_empty_payload() {
        let extraction = UnitExtractor::default()
            .extract(&[], PayloadMode::Data, 0)
            .unwrap();
        assert!(extraction.units.is_empty());
        assert_eq!(extraction.total_len(), 0);
    }
}
