//! Multi-byte encoding support for UTF-8, UTF-16 and raw Unicode code points
//!
//! UTF-8 here follows RFC 2279 rather than RFC 3629: sequences of up to six
//! bytes covering code points up to 0x7FFFFFFF. UTF-16 is decoded one unit at
//! a time with no surrogate pairing, so every 16-bit unit is a code point of
//! its own.

use crate::{Error, Result};

/// Largest code point the six-byte UTF-8 form can carry
pub(crate) const UTF8_MAX: u64 = 0x7FFF_FFFF;

/// Byte order of a UTF-16 stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn encoding_name(self) -> &'static str {
        match self {
            ByteOrder::Little => "UTF-16LE",
            ByteOrder::Big => "UTF-16BE",
        }
    }

    fn bom(self) -> [u8; 2] {
        self.write_unit(0xFEFF)
    }

    fn read_unit(self, bytes: [u8; 2]) -> u16 {
        match self {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        }
    }

    fn write_unit(self, unit: u16) -> [u8; 2] {
        match self {
            ByteOrder::Little => unit.to_le_bytes(),
            ByteOrder::Big => unit.to_be_bytes(),
        }
    }
}

/// Bounds-checked cursor over a caller-owned destination buffer
pub(crate) struct Sink<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> Sink<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.len + bytes.len();
        let capacity = self.buf.len();
        let slot = self
            .buf
            .get_mut(self.len..end)
            .ok_or(Error::BufferTooSmall { capacity })?;
        slot.copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    pub(crate) fn written(&self) -> usize {
        self.len
    }
}

/// Sequence length announced by a UTF-8 lead byte
#[inline]
fn utf8_width(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7F => Some(1),
        0xC0..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF7 => Some(4),
        0xF8..=0xFB => Some(5),
        0xFC..=0xFD => Some(6),
        // stray continuation bytes, 0xFE and 0xFF
        _ => None,
    }
}

/// Decode the UTF-8 sequence starting at `offset`
///
/// Returns the code point and the sequence length. Any structural problem
/// (bad lead byte, truncated sequence, bad continuation byte) is reported
/// with the offset of the offending byte.
pub(crate) fn decode_utf8_at(input: &[u8], offset: usize) -> Result<(u64, usize)> {
    let invalid = |offset: usize, byte: u8| Error::InvalidEncoding {
        encoding: "UTF-8",
        offset,
        byte,
    };

    let lead = input[offset];
    let width = utf8_width(lead).ok_or_else(|| invalid(offset, lead))?;
    if width == 1 {
        return Ok((u64::from(lead), 1));
    }
    let seq = input
        .get(offset..offset + width)
        .ok_or_else(|| invalid(offset, lead))?;

    // the lead keeps 7 - width payload bits
    let mut code_point = u64::from(lead & (0x7F >> width));
    for (i, &byte) in seq.iter().enumerate().skip(1) {
        if byte & 0xC0 != 0x80 {
            return Err(invalid(offset + i, byte));
        }
        code_point = (code_point << 6) | u64::from(byte & 0x3F);
    }
    Ok((code_point, width))
}

/// Encode `code_point` as UTF-8 into `buf`, returning the used prefix
pub(crate) fn encode_utf8(code_point: u64, buf: &mut [u8; 6]) -> Result<&[u8]> {
    let width = match code_point {
        c if c < 0x80 => 1,
        c if c < 0x800 => 2,
        c if c < 0x1_0000 => 3,
        c if c < 0x20_0000 => 4,
        c if c < 0x400_0000 => 5,
        c if c <= UTF8_MAX => 6,
        _ => {
            return Err(Error::CodePointOutOfRange {
                encoding: "UTF-8",
                code_point,
            });
        }
    };
    if width == 1 {
        buf[0] = code_point as u8;
        return Ok(&buf[..1]);
    }

    let mut rest = code_point;
    for slot in buf[1..width].iter_mut().rev() {
        *slot = 0x80 | (rest & 0x3F) as u8;
        rest >>= 6;
    }
    // width leading one bits followed by a zero
    buf[0] = !(0xFFu8 >> width) | rest as u8;
    Ok(&buf[..width])
}

/// Validate a UTF-8 buffer
pub(crate) fn validate_utf8(input: &[u8]) -> Result<()> {
    let mut offset = 0;
    while offset < input.len() {
        let (_, width) = decode_utf8_at(input, offset)?;
        offset += width;
    }
    Ok(())
}

/// Validate a UTF-16 buffer, returning where the payload starts
///
/// A signature matching `order` is skipped; any other leading unit is data.
pub(crate) fn validate_utf16(input: &[u8], order: ByteOrder) -> Result<usize> {
    if input.len() % 2 != 0 {
        return Err(Error::InvalidLength {
            encoding: order.encoding_name(),
            len: input.len(),
            unit: 2,
        });
    }
    if input.starts_with(&order.bom()) {
        Ok(2)
    } else {
        Ok(0)
    }
}

/// Validate a raw Unicode buffer (4-byte little-endian code points)
pub(crate) fn validate_unicode(input: &[u8]) -> Result<()> {
    if input.len() % 4 != 0 {
        return Err(Error::InvalidLength {
            encoding: "UNICODE",
            len: input.len(),
            unit: 4,
        });
    }
    Ok(())
}

/// Decode the raw code point starting at `offset`
pub(crate) fn decode_unicode_at(input: &[u8], offset: usize) -> Result<(u64, usize)> {
    let unit: [u8; 4] = input
        .get(offset..offset + 4)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(Error::InvalidLength {
            encoding: "UNICODE",
            len: input.len(),
            unit: 4,
        })?;
    Ok((u64::from(u32::from_le_bytes(unit)), 4))
}

/// Encode a raw code point as 4 little-endian bytes
pub(crate) fn encode_unicode(code_point: u64, buf: &mut [u8; 6]) -> Result<&[u8]> {
    let unit = u32::try_from(code_point).map_err(|_| Error::CodePointOutOfRange {
        encoding: "UNICODE",
        code_point,
    })?;
    buf[..4].copy_from_slice(&unit.to_le_bytes());
    Ok(&buf[..4])
}

/// Convert UTF-8 to UTF-16 in the given byte order, signature first
pub(crate) fn utf8_to_utf16(
    source: &[u8],
    destination: &mut [u8],
    order: ByteOrder,
) -> Result<usize> {
    validate_utf8(source)?;

    let mut sink = Sink::new(destination);
    sink.push(&order.bom())?;

    let mut offset = 0;
    while offset < source.len() {
        let (code_point, width) = decode_utf8_at(source, offset)?;
        // one unit per code point, nothing above the BMP fits
        let unit = u16::try_from(code_point).map_err(|_| Error::CodePointOutOfRange {
            encoding: order.encoding_name(),
            code_point,
        })?;
        sink.push(&order.write_unit(unit))?;
        offset += width;
    }
    Ok(sink.written())
}

/// Convert UTF-16 in the given byte order to UTF-8, without a signature
pub(crate) fn utf16_to_utf8(
    source: &[u8],
    destination: &mut [u8],
    order: ByteOrder,
) -> Result<usize> {
    let start = validate_utf16(source, order)?;

    let mut sink = Sink::new(destination);
    let mut buf = [0u8; 6];
    for unit in source[start..].chunks_exact(2) {
        let code_point = order.read_unit([unit[0], unit[1]]);
        sink.push(encode_utf8(u64::from(code_point), &mut buf)?)?;
    }
    Ok(sink.written())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn utf16(input: &[u8], order: ByteOrder) -> Result<Vec<u8>> {
        let mut out = vec![0u8; input.len() * 2 + 2];
        let written = utf8_to_utf16(input, &mut out, order)?;
        out.truncate(written);
        Ok(out)
    }

    fn utf8(input: &[u8], order: ByteOrder) -> Result<Vec<u8>> {
        let mut out = vec![0u8; input.len() * 2];
        let written = utf16_to_utf8(input, &mut out, order)?;
        out.truncate(written);
        Ok(out)
    }

    #[test]
    fn test_encode_utf8_widths() {
        let cases: [(u64, &[u8]); 7] = [
            (0x41, &[0x41]),
            (0xE9, &[0xC3, 0xA9]),
            (0x4E2D, &[0xE4, 0xB8, 0xAD]),
            (0x1F600, &[0xF0, 0x9F, 0x98, 0x80]),
            (0x20_0000, &[0xF8, 0x88, 0x80, 0x80, 0x80]),
            (0x400_0000, &[0xFC, 0x84, 0x80, 0x80, 0x80, 0x80]),
            (UTF8_MAX, &[0xFD, 0xBF, 0xBF, 0xBF, 0xBF, 0xBF]),
        ];
        let mut buf = [0u8; 6];
        for (code_point, expected) in cases {
            assert_eq!(encode_utf8(code_point, &mut buf).unwrap(), expected);
            assert_eq!(
                decode_utf8_at(expected, 0).unwrap(),
                (code_point, expected.len())
            );
        }
    }

    #[test]
    fn test_encode_utf8_out_of_range() {
        let mut buf = [0u8; 6];
        assert!(matches!(
            encode_utf8(0x8000_0000, &mut buf),
            Err(Error::CodePointOutOfRange {
                code_point: 0x8000_0000,
                ..
            })
        ));
    }

    #[test]
    fn test_utf8_structural_errors() {
        // truncated sequence
        assert!(matches!(
            validate_utf8(&[0x41, 0xE4, 0xB8]),
            Err(Error::InvalidEncoding {
                offset: 1,
                byte: 0xE4,
                ..
            })
        ));
        // bad continuation byte
        assert!(matches!(
            validate_utf8(&[0xC3, 0x41]),
            Err(Error::InvalidEncoding {
                offset: 1,
                byte: 0x41,
                ..
            })
        ));
        // stray continuation byte and the two never-valid bytes
        for bad in [0x80u8, 0xBF, 0xFE, 0xFF] {
            assert!(matches!(
                validate_utf8(&[bad]),
                Err(Error::InvalidEncoding { offset: 0, .. })
            ));
        }
    }

    #[test]
    fn test_utf8_to_utf16_signature() {
        assert_eq!(utf16(b"", ByteOrder::Little).unwrap(), [0xFF, 0xFE]);
        assert_eq!(utf16(b"", ByteOrder::Big).unwrap(), [0xFE, 0xFF]);
        assert_eq!(
            utf16("中A".as_bytes(), ByteOrder::Little).unwrap(),
            [0xFF, 0xFE, 0x2D, 0x4E, 0x41, 0x00]
        );
    }

    #[test]
    fn test_utf8_to_utf16_rejects_supplementary() {
        let err = utf16(&[0xF0, 0x90, 0x80, 0x80], ByteOrder::Big).unwrap_err();
        assert!(matches!(
            err,
            Error::CodePointOutOfRange {
                encoding: "UTF-16BE",
                code_point: 0x1_0000
            }
        ));
    }

    #[test]
    fn test_utf16_signature_handling() {
        let with_bom = [0xFE, 0xFF, 0x4E, 0x2D];
        let without_bom = [0x4E, 0x2D];
        assert_eq!(utf8(&with_bom, ByteOrder::Big).unwrap(), [0xE4, 0xB8, 0xAD]);
        assert_eq!(
            utf8(&without_bom, ByteOrder::Big).unwrap(),
            [0xE4, 0xB8, 0xAD]
        );

        // big-endian mark read as little-endian is the unit U+FFFE
        assert_eq!(
            utf8(&[0xFE, 0xFF, 0x41, 0x00], ByteOrder::Little).unwrap(),
            [0xEF, 0xBF, 0xBE, 0x41]
        );
    }

    #[test]
    fn test_utf16_lone_surrogate_passes_through() {
        assert_eq!(
            utf8(&[0x3D, 0xD8], ByteOrder::Little).unwrap(),
            [0xED, 0xA0, 0xBD]
        );
    }

    #[test]
    fn test_utf16_odd_length() {
        assert!(matches!(
            validate_utf16(&[0xFF, 0xFE, 0x41], ByteOrder::Little),
            Err(Error::InvalidLength {
                encoding: "UTF-16LE",
                len: 3,
                unit: 2
            })
        ));
    }

    #[test]
    fn test_sink_stops_at_capacity() {
        let mut out = [0u8; 2];
        let mut sink = Sink::new(&mut out);
        sink.push(&[1]).unwrap();
        assert!(matches!(
            sink.push(&[2, 3]),
            Err(Error::BufferTooSmall { capacity: 2 })
        ));
        assert_eq!(sink.written(), 1);
    }

    #[test]
    fn test_raw_unicode_units() {
        assert!(validate_unicode(&[0; 8]).is_ok());
        assert!(validate_unicode(&[0; 6]).is_err());
        assert_eq!(
            decode_unicode_at(&[0x00, 0x00, 0x01, 0x00], 0).unwrap(),
            (0x1_0000, 4)
        );
        let mut buf = [0u8; 6];
        assert_eq!(
            encode_unicode(0x4E2D, &mut buf).unwrap(),
            &[0x2D, 0x4E, 0x00, 0x00]
        );
        assert!(encode_unicode(1 << 32, &mut buf).is_err());
    }

    proptest! {
        #[test]
        fn prop_utf8_codepoint_roundtrip(code_point in 0u64..=UTF8_MAX) {
            let mut buf = [0u8; 6];
            let encoded = encode_utf8(code_point, &mut buf).unwrap().to_vec();
            prop_assert_eq!(decode_utf8_at(&encoded, 0).unwrap(), (code_point, encoded.len()));
        }

        #[test]
        fn prop_validation_is_total(input in proptest::collection::vec(any::<u8>(), 0..32)) {
            let validated = validate_utf8(&input).is_ok();
            let mut out = vec![0u8; input.len() * 2 + 2];
            let converted = utf8_to_utf16(&input, &mut out, ByteOrder::Little);
            prop_assert_eq!(
                validated,
                !matches!(converted, Err(Error::InvalidEncoding { .. }))
            );
        }

        #[test]
        fn prop_utf16_roundtrip(units in proptest::collection::vec(any::<u16>(), 0..64)) {
            for order in [ByteOrder::Little, ByteOrder::Big] {
                // a leading U+FEFF would be taken as the signature
                let payload: Vec<u8> = units
                    .iter()
                    .filter(|&&unit| unit != 0xFEFF)
                    .flat_map(|&unit| order.write_unit(unit))
                    .collect();

                let decoded = utf8(&payload, order).unwrap();
                let mut signed = order.bom().to_vec();
                signed.extend_from_slice(&payload);
                prop_assert_eq!(&utf8(&signed, order).unwrap(), &decoded);

                let reencoded = utf16(&decoded, order).unwrap();
                prop_assert_eq!(&reencoded[..2], &order.bom()[..]);
                prop_assert_eq!(&reencoded[2..], &payload[..]);
            }
        }
    }
}
