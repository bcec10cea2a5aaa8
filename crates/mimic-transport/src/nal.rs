//! H.264 Annex B inspection utilities.
//!
//! Hardware encoders emit Annex B elementary streams: NAL units separated
//! by `00 00 01` or `00 00 00 01` start codes. The sink forwards these
//! bytes untouched; these helpers only look inside them, to recognize key
//! frames and parameter sets, and to assemble streams for testing.

use bytes::{BufMut, Bytes, BytesMut};

/// Four-byte Annex B start code.
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// NAL unit types relevant to the stream.
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
            _ => NalUnitType::Other,
        }
    }
}

impl NalUnitType {
    /// Header byte for a reference NAL of this type (nal_ref_idc = 3).
    pub fn header_byte(self) -> u8 {
        0x60 | (self as u8)
    }

    /// Returns true for SPS and PPS.
    pub fn is_parameter_set(self) -> bool {
        matches!(self, Self::Sps | Self::Pps)
    }
}

/// A single NAL unit borrowed from an Annex B stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit<'a> {
    /// The NAL unit type.
    pub nal_type: NalUnitType,
    /// NAL payload including the header byte, excluding the start code.
    pub data: &'a [u8],
}

/// Returns the offset and length of the start code at or after `from`.
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// Split an Annex B byte stream into its NAL units.
///
/// Bytes before the first start code are ignored, as are empty units.
pub fn parse_annex_b(data: &[u8]) -> Vec<NalUnit<'_>> {
    let mut nals = Vec::new();

    let Some((first, len)) = find_start_code(data, 0) else {
        return nals;
    };
    let mut start = first + len;

    loop {
        let (end, next_start) = match find_start_code(data, start) {
            Some((pos, len)) => (pos, Some(pos + len)),
            None => (data.len(), None),
        };

        let payload = &data[start..end];
        if let Some(&header) = payload.first() {
            nals.push(NalUnit {
                nal_type: NalUnitType::from(header),
                data: payload,
            });
        }

        match next_start {
            Some(next) => start = next,
            None => break,
        }
    }

    nals
}

/// Returns true if the access unit contains an IDR slice.
pub fn is_key_frame(data: &[u8]) -> bool {
    parse_annex_b(data)
        .iter()
        .any(|nal| nal.nal_type == NalUnitType::IdrSlice)
}

/// Returns true if the stream carries both an SPS and a PPS.
pub fn has_parameter_sets(data: &[u8]) -> bool {
    let nals = parse_annex_b(data);
    let has = |t| nals.iter().any(|nal| nal.nal_type == t);
    has(NalUnitType::Sps) && has(NalUnitType::Pps)
}

/// Assemble NAL payloads into an Annex B stream with 4-byte start codes.
pub fn to_annex_b<'a>(nals: impl IntoIterator<Item = &'a [u8]>) -> Bytes {
    let mut buf = BytesMut::new();
    for nal in nals {
        buf.put_slice(&START_CODE);
        buf.put_slice(nal);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_annex_b_3byte_start_code() {
        let data = [0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E];
        let nals = parse_annex_b(&data);
        assert_eq!(nals.len(), 1);
        assert_eq!(nals[0].nal_type, NalUnitType::Sps);
        assert_eq!(nals[0].data, &[0x67, 0x42, 0x00, 0x1E]);
    }

    #[test]
    fn test_parse_annex_b_mixed_start_codes() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, // SPS
            0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80, // PPS
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, // IDR
        ];
        let types: Vec<_> = parse_annex_b(&data).iter().map(|n| n.nal_type).collect();
        assert_eq!(
            types,
            vec![NalUnitType::Sps, NalUnitType::Pps, NalUnitType::IdrSlice]
        );
        assert!(is_key_frame(&data));
        assert!(has_parameter_sets(&data));
    }

    #[test]
    fn test_no_start_code() {
        assert!(parse_annex_b(&[0x65, 0x88]).is_empty());
        assert!(!is_key_frame(&[]));
    }

    #[test]
    fn test_non_idr_is_not_key_frame() {
        let data = to_annex_b([&[0x41u8, 0x9A, 0x02][..]]);
        assert!(!is_key_frame(&data));
        assert_eq!(parse_annex_b(&data)[0].nal_type, NalUnitType::NonIdrSlice);
    }

    #[test]
    fn test_to_annex_b_layout() {
        let data = to_annex_b([&[0x67u8, 0x42][..], &[0x68u8][..]]);
        assert_eq!(
            data.as_ref(),
            &[0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68]
        );
    }

    #[test]
    fn test_header_byte() {
        assert_eq!(NalUnitType::Sps.header_byte(), 0x67);
        assert_eq!(NalUnitType::IdrSlice.header_byte(), 0x65);
        assert!(NalUnitType::Pps.is_parameter_set());
    }
}
