//! Table-driven conversion for the GBK family (GBK, GB2312, GB18030)
//!
//! A GBK unit is one ASCII byte, a two-byte GBK/GB2312 pair, or a four-byte
//! GB18030 sequence whose second byte is an ASCII digit. Units are packed
//! big-endian into a single integer which is the key into the mapping table.

use crate::multibyte::{self, Sink};
use crate::tables::MappingTable;
use crate::{Error, Result};

type Decode = fn(&[u8], usize) -> Result<(u64, usize)>;
type Encode = fn(u64, &mut [u8; 6]) -> Result<&[u8]>;

/// Decode the GBK unit starting at `offset` into its packed key
pub(crate) fn decode_gbk_at(input: &[u8], offset: usize) -> Result<(u64, usize)> {
    let lead = input[offset];
    if lead & 0x80 == 0 {
        return Ok((u64::from(lead), 1));
    }

    let width = match input.get(offset + 1) {
        Some(b'0'..=b'9') => 4,
        Some(_) => 2,
        None => 0,
    };
    let unit = input
        .get(offset..offset + width)
        .filter(|unit| !unit.is_empty())
        .ok_or(Error::InvalidEncoding {
            encoding: "GBK",
            offset,
            byte: lead,
        })?;

    let key = unit
        .iter()
        .fold(0u64, |key, &byte| (key << 8) | u64::from(byte));
    Ok((key, width))
}

/// Encode a GBK table value as 1, 2 or 4 big-endian bytes
pub(crate) fn encode_gbk(value: u64, buf: &mut [u8; 6]) -> Result<&[u8]> {
    if value < 0x80 {
        buf[0] = value as u8;
        Ok(&buf[..1])
    } else if let Ok(pair) = u16::try_from(value) {
        buf[..2].copy_from_slice(&pair.to_be_bytes());
        Ok(&buf[..2])
    } else if let Ok(quad) = u32::try_from(value) {
        buf[..4].copy_from_slice(&quad.to_be_bytes());
        Ok(&buf[..4])
    } else {
        Err(Error::InvalidGbkValue { value })
    }
}

/// Validate a GBK-family buffer
pub(crate) fn validate_gbk(input: &[u8]) -> Result<()> {
    validate_with(input, decode_gbk_at)
}

fn validate_with(input: &[u8], decode: Decode) -> Result<()> {
    let mut offset = 0;
    while offset < input.len() {
        let (_, width) = decode(input, offset)?;
        offset += width;
    }
    Ok(())
}

/// Validate `source` completely, then map every unit through `table`
fn translate(
    table: &MappingTable,
    source: &[u8],
    destination: &mut [u8],
    decode: Decode,
    encode: Encode,
) -> Result<usize> {
    validate_with(source, decode)?;

    let mut sink = Sink::new(destination);
    let mut buf = [0u8; 6];
    let mut offset = 0;
    while offset < source.len() {
        let (key, width) = decode(source, offset)?;
        let value = table
            .get(key)
            .ok_or(Error::UnmappedCharacter { key, offset })?;
        sink.push(encode(value, &mut buf)?)?;
        offset += width;
    }
    Ok(sink.written())
}

/// GBK family to UTF-8
pub(crate) fn gbk_to_utf8(
    table: &MappingTable,
    source: &[u8],
    destination: &mut [u8],
) -> Result<usize> {
    translate(
        table,
        source,
        destination,
        decode_gbk_at,
        multibyte::encode_utf8,
    )
}

/// GBK family to raw Unicode code points
pub(crate) fn gbk_to_unicode(
    table: &MappingTable,
    source: &[u8],
    destination: &mut [u8],
) -> Result<usize> {
    translate(
        table,
        source,
        destination,
        decode_gbk_at,
        multibyte::encode_unicode,
    )
}

/// UTF-8 to the GBK family
pub(crate) fn utf8_to_gbk(
    table: &MappingTable,
    source: &[u8],
    destination: &mut [u8],
) -> Result<usize> {
    translate(
        table,
        source,
        destination,
        multibyte::decode_utf8_at,
        encode_gbk,
    )
}

/// Raw Unicode code points to the GBK family
pub(crate) fn unicode_to_gbk(
    table: &MappingTable,
    source: &[u8],
    destination: &mut [u8],
) -> Result<usize> {
    multibyte::validate_unicode(source)?;
    translate(
        table,
        source,
        destination,
        multibyte::decode_unicode_at,
        encode_gbk,
    )
}
