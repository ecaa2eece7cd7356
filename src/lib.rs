//! # gbk-iconv - GBK Family and UTF-16 Conversion Library
//!
//! Converts text between the GBK family (GBK, GB2312, GB18030), raw Unicode
//! code points, UTF-8 and UTF-16 over caller-owned byte buffers.
//!
//! ## Features
//!
//! - **No allocation in the codecs**: every routine writes into the
//!   destination slice it is handed and returns the number of bytes written
//! - **Two-pass conversion**: the whole source is validated before a single
//!   byte is emitted
//! - **Table-driven GBK**: GBK/GB2312/GB18030 go through a loaded
//!   code-point mapping table shared by every converter of one direction
//! - **Thread-safe** converters with no locking on the conversion path
//!
//! ## Quick Start
//!
//! ```rust
//! use gbk_iconv::{ConverterFactory, EncodingPair};
//!
//! // UTF-8 <-> UTF-16 pairs need no mapping table
//! let factory = ConverterFactory::new("tables");
//! let converter = factory.create(EncodingPair::Utf8ToUtf16Le).unwrap();
//!
//! let mut out = [0u8; 16];
//! let written = converter.convert(b"A", &mut out).unwrap();
//! assert_eq!(&out[..written], &[0xFF, 0xFE, 0x41, 0x00]);
//! ```

#![deny(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

mod gbk;
mod multibyte;
mod tables;

pub use tables::{MappingTable, TableKind, TableStore};

use multibyte::ByteOrder;
use tables::TableCache;

/// Environment variable naming the directory that holds the mapping datasets
pub const TABLE_DIR_ENV: &str = "GBK_ICONV_TABLE_DIR";

/// Table directory used when [`TABLE_DIR_ENV`] is not set
pub const DEFAULT_TABLE_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tables");

/// Result type for conversion operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building converters or converting data
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested encoding pair has no registered codec
    #[error("unsupported encoding pair: {0}")]
    UnsupportedPair(String),

    /// An encoding name could not be recognized
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),

    /// A mapping dataset could not be read
    #[error("failed to read mapping table {}: {source}", .path.display())]
    Io {
        /// Location of the dataset
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// A mapping dataset does not deserialize into a code-value map
    #[error("malformed mapping table {}: {source}", .path.display())]
    Format {
        /// Location of the dataset
        path: PathBuf,
        /// Underlying parse failure
        #[source]
        source: serde_json::Error,
    },

    /// Source bytes are structurally invalid for their declared encoding
    #[error("invalid {encoding} sequence at offset {offset} (byte 0x{byte:02X})")]
    InvalidEncoding {
        /// Name of the source encoding
        encoding: &'static str,
        /// Offset of the offending byte in the source
        offset: usize,
        /// The offending byte
        byte: u8,
    },

    /// Source length is not a whole number of code units
    #[error("{encoding} input of {len} bytes is not a multiple of {unit}")]
    InvalidLength {
        /// Name of the source encoding
        encoding: &'static str,
        /// Length of the source buffer
        len: usize,
        /// Code unit size of the encoding
        unit: usize,
    },

    /// A well-formed source unit has no entry in the bound mapping table
    #[error("no mapping for character 0x{key:X} at offset {offset}")]
    UnmappedCharacter {
        /// Packed lookup key of the source unit
        key: u64,
        /// Offset of the unit in the source
        offset: usize,
    },

    /// A code point cannot be represented in the target encoding
    #[error("code point 0x{code_point:X} is out of range for {encoding}")]
    CodePointOutOfRange {
        /// Name of the target encoding
        encoding: &'static str,
        /// The offending code point
        code_point: u64,
    },

    /// A table value does not fit into a four-byte GBK sequence
    #[error("GBK value 0x{value:X} does not fit in four bytes")]
    InvalidGbkValue {
        /// The offending table value
        value: u64,
    },

    /// The destination buffer cannot hold the converted output
    #[error("destination buffer of {capacity} bytes is too small")]
    BufferTooSmall {
        /// Capacity of the destination buffer
        capacity: usize,
    },
}

/// Byte-level encodings understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum Encoding {
    /// GBK (code page 936), 1 or 2 bytes per character
    GBK,
    /// GB2312, a subset of GBK
    GB2312,
    /// GB18030, GBK plus four-byte sequences
    GB18030,
    /// Raw Unicode code points, 4 bytes little-endian each, no signature
    UNICODE,
    /// UTF-8 including the legacy 5- and 6-byte forms
    UTF8,
    /// UTF-16 little endian
    UTF16LE,
    /// UTF-16 big endian
    UTF16BE,
}

impl Encoding {
    /// Every encoding, in declaration order
    pub const ALL: [Encoding; 7] = [
        Encoding::GBK,
        Encoding::GB2312,
        Encoding::GB18030,
        Encoding::UNICODE,
        Encoding::UTF8,
        Encoding::UTF16LE,
        Encoding::UTF16BE,
    ];

    /// Get the canonical name of this encoding
    pub fn name(self) -> &'static str {
        match self {
            Encoding::GBK => "GBK",
            Encoding::GB2312 => "GB2312",
            Encoding::GB18030 => "GB18030",
            Encoding::UNICODE => "UNICODE",
            Encoding::UTF8 => "UTF-8",
            Encoding::UTF16LE => "UTF-16LE",
            Encoding::UTF16BE => "UTF-16BE",
        }
    }

    /// Check if this encoding belongs to the table-driven GBK family
    pub fn is_gbk_family(self) -> bool {
        matches!(self, Encoding::GBK | Encoding::GB2312 | Encoding::GB18030)
    }

    /// Get the byte order mark emitted and skipped for this encoding
    pub fn bom(self) -> Option<&'static [u8]> {
        match self {
            Encoding::UTF16LE => Some(&[0xFF, 0xFE]),
            Encoding::UTF16BE => Some(&[0xFE, 0xFF]),
            _ => None,
        }
    }

    /// Run the validation pass for this encoding without converting anything
    pub fn validate(self, input: &[u8]) -> Result<()> {
        match self {
            Encoding::GBK | Encoding::GB2312 | Encoding::GB18030 => gbk::validate_gbk(input),
            Encoding::UNICODE => multibyte::validate_unicode(input),
            Encoding::UTF8 => multibyte::validate_utf8(input),
            Encoding::UTF16LE => multibyte::validate_utf16(input, ByteOrder::Little).map(|_| ()),
            Encoding::UTF16BE => multibyte::validate_utf16(input, ByteOrder::Big).map(|_| ()),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let encoding = match s.trim().to_uppercase().as_str() {
            "GBK" | "CP936" | "WINDOWS-936" => Encoding::GBK,
            "GB2312" | "EUC-CN" | "EUCCN" => Encoding::GB2312,
            "GB18030" => Encoding::GB18030,
            "UNICODE" | "UCS-4LE" | "UTF-32LE" | "UTF32LE" => Encoding::UNICODE,
            "UTF8" | "UTF-8" => Encoding::UTF8,
            "UTF16LE" | "UTF-16LE" => Encoding::UTF16LE,
            "UTF16BE" | "UTF-16BE" => Encoding::UTF16BE,
            _ => return Err(Error::UnknownEncoding(s.to_string())),
        };
        Ok(encoding)
    }
}

/// Codec routine selected by an [`EncodingPair`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Codec {
    Utf8ToUtf16(ByteOrder),
    Utf16ToUtf8(ByteOrder),
    GbkToUtf8,
    GbkToUnicode,
    Utf8ToGbk,
    UnicodeToGbk,
}

/// The sixteen supported (source, destination) combinations
///
/// The discriminant is the stable numeric identity of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum EncodingPair {
    /// GB2312 to raw Unicode code points
    Gb2312ToUnicode = 0,
    /// GB18030 to raw Unicode code points
    Gb18030ToUnicode = 1,
    /// GBK to raw Unicode code points
    GbkToUnicode = 2,
    /// Raw Unicode code points to GBK
    UnicodeToGbk = 3,
    /// Raw Unicode code points to GB2312
    UnicodeToGb2312 = 4,
    /// Raw Unicode code points to GB18030
    UnicodeToGb18030 = 5,
    /// UTF-8 to UTF-16 little endian
    Utf8ToUtf16Le = 6,
    /// UTF-16 little endian to UTF-8
    Utf16LeToUtf8 = 7,
    /// UTF-8 to UTF-16 big endian
    Utf8ToUtf16Be = 8,
    /// UTF-16 big endian to UTF-8
    Utf16BeToUtf8 = 9,
    /// UTF-8 to GBK
    Utf8ToGbk = 10,
    /// UTF-8 to GB2312
    Utf8ToGb2312 = 11,
    /// UTF-8 to GB18030
    Utf8ToGb18030 = 12,
    /// GBK to UTF-8
    GbkToUtf8 = 13,
    /// GB2312 to UTF-8
    Gb2312ToUtf8 = 14,
    /// GB18030 to UTF-8
    Gb18030ToUtf8 = 15,
}

impl EncodingPair {
    /// Every pair, ordered by numeric identity
    pub const ALL: [EncodingPair; 16] = [
        EncodingPair::Gb2312ToUnicode,
        EncodingPair::Gb18030ToUnicode,
        EncodingPair::GbkToUnicode,
        EncodingPair::UnicodeToGbk,
        EncodingPair::UnicodeToGb2312,
        EncodingPair::UnicodeToGb18030,
        EncodingPair::Utf8ToUtf16Le,
        EncodingPair::Utf16LeToUtf8,
        EncodingPair::Utf8ToUtf16Be,
        EncodingPair::Utf16BeToUtf8,
        EncodingPair::Utf8ToGbk,
        EncodingPair::Utf8ToGb2312,
        EncodingPair::Utf8ToGb18030,
        EncodingPair::GbkToUtf8,
        EncodingPair::Gb2312ToUtf8,
        EncodingPair::Gb18030ToUtf8,
    ];

    /// Look up the pair converting `from` into `to`
    pub fn new(from: Encoding, to: Encoding) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|pair| pair.source() == from && pair.target() == to)
            .ok_or_else(|| Error::UnsupportedPair(format!("{} -> {}", from.name(), to.name())))
    }

    /// Look up a pair by its numeric identity
    pub fn from_id(id: u8) -> Result<Self> {
        Self::ALL
            .get(usize::from(id))
            .copied()
            .ok_or_else(|| Error::UnsupportedPair(format!("id {}", id)))
    }

    /// Numeric identity of this pair
    pub fn id(self) -> u8 {
        self as u8
    }

    fn endpoints(self) -> (Encoding, Encoding) {
        use Encoding::*;
        match self {
            EncodingPair::Gb2312ToUnicode => (GB2312, UNICODE),
            EncodingPair::Gb18030ToUnicode => (GB18030, UNICODE),
            EncodingPair::GbkToUnicode => (GBK, UNICODE),
            EncodingPair::UnicodeToGbk => (UNICODE, GBK),
            EncodingPair::UnicodeToGb2312 => (UNICODE, GB2312),
            EncodingPair::UnicodeToGb18030 => (UNICODE, GB18030),
            EncodingPair::Utf8ToUtf16Le => (UTF8, UTF16LE),
            EncodingPair::Utf16LeToUtf8 => (UTF16LE, UTF8),
            EncodingPair::Utf8ToUtf16Be => (UTF8, UTF16BE),
            EncodingPair::Utf16BeToUtf8 => (UTF16BE, UTF8),
            EncodingPair::Utf8ToGbk => (UTF8, GBK),
            EncodingPair::Utf8ToGb2312 => (UTF8, GB2312),
            EncodingPair::Utf8ToGb18030 => (UTF8, GB18030),
            EncodingPair::GbkToUtf8 => (GBK, UTF8),
            EncodingPair::Gb2312ToUtf8 => (GB2312, UTF8),
            EncodingPair::Gb18030ToUtf8 => (GB18030, UTF8),
        }
    }

    /// Source encoding
    pub fn source(self) -> Encoding {
        self.endpoints().0
    }

    /// Target encoding
    pub fn target(self) -> Encoding {
        self.endpoints().1
    }

    pub(crate) fn codec(self) -> Codec {
        match (self.source(), self.target()) {
            (Encoding::UTF8, Encoding::UTF16LE) => Codec::Utf8ToUtf16(ByteOrder::Little),
            (Encoding::UTF8, Encoding::UTF16BE) => Codec::Utf8ToUtf16(ByteOrder::Big),
            (Encoding::UTF16LE, _) => Codec::Utf16ToUtf8(ByteOrder::Little),
            (Encoding::UTF16BE, _) => Codec::Utf16ToUtf8(ByteOrder::Big),
            (Encoding::UTF8, _) => Codec::Utf8ToGbk,
            (Encoding::UNICODE, _) => Codec::UnicodeToGbk,
            (_, Encoding::UTF8) => Codec::GbkToUtf8,
            _ => Codec::GbkToUnicode,
        }
    }

    /// Mapping table this pair needs, if any
    pub fn table(self) -> Option<TableKind> {
        match self.codec() {
            Codec::Utf8ToUtf16(_) | Codec::Utf16ToUtf8(_) => None,
            Codec::GbkToUtf8 | Codec::GbkToUnicode => Some(TableKind::GbkToUnicode),
            Codec::Utf8ToGbk | Codec::UnicodeToGbk => Some(TableKind::UnicodeToGbk),
        }
    }

    /// Worst-case destination size for a source of `source_len` bytes
    ///
    /// A destination of at least this many bytes never fails with
    /// [`Error::BufferTooSmall`].
    pub fn max_output_len(self, source_len: usize) -> usize {
        match self.codec() {
            // one UTF-16 unit per UTF-8 byte at most, plus the signature
            Codec::Utf8ToUtf16(_) => source_len.saturating_mul(2).saturating_add(2),
            Codec::Utf16ToUtf8(_) => source_len.div_ceil(2).saturating_mul(3),
            // a single GBK byte may map to a six-byte UTF-8 sequence
            Codec::GbkToUtf8 => source_len.saturating_mul(6),
            Codec::GbkToUnicode | Codec::Utf8ToGbk => source_len.saturating_mul(4),
            Codec::UnicodeToGbk => source_len.div_ceil(4).saturating_mul(4),
        }
    }
}

impl TryFrom<u8> for EncodingPair {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        Self::from_id(id)
    }
}

impl fmt::Display for EncodingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source(), self.target())
    }
}

impl FromStr for EncodingPair {
    type Err = Error;

    /// Parse `FROM:TO`, e.g. `gbk:utf-8`
    fn from_str(s: &str) -> Result<Self> {
        let (from, to) = s
            .split_once(':')
            .ok_or_else(|| Error::UnsupportedPair(s.to_string()))?;
        Self::new(from.parse()?, to.parse()?)
    }
}

/// Codec routine closed over the table it needs
#[derive(Debug, Clone)]
enum BoundCodec {
    Utf8ToUtf16(ByteOrder),
    Utf16ToUtf8(ByteOrder),
    GbkToUtf8(Arc<MappingTable>),
    GbkToUnicode(Arc<MappingTable>),
    Utf8ToGbk(Arc<MappingTable>),
    UnicodeToGbk(Arc<MappingTable>),
}

/// A converter bound to one [`EncodingPair`]
///
/// Converters hold no per-call state and can be shared between threads.
#[derive(Debug, Clone)]
pub struct Converter {
    pair: EncodingPair,
    codec: BoundCodec,
}

impl Converter {
    /// Pair this converter was created for
    pub fn pair(&self) -> EncodingPair {
        self.pair
    }

    /// Mapping table bound to this converter, if the pair needs one
    pub fn table(&self) -> Option<&Arc<MappingTable>> {
        match &self.codec {
            BoundCodec::Utf8ToUtf16(_) | BoundCodec::Utf16ToUtf8(_) => None,
            BoundCodec::GbkToUtf8(table)
            | BoundCodec::GbkToUnicode(table)
            | BoundCodec::Utf8ToGbk(table)
            | BoundCodec::UnicodeToGbk(table) => Some(table),
        }
    }

    /// Convert `source` into `destination`, returning the number of bytes written
    ///
    /// The whole source is validated before anything is written. On error the
    /// contents of `destination` are unspecified.
    pub fn convert(&self, source: &[u8], destination: &mut [u8]) -> Result<usize> {
        match &self.codec {
            BoundCodec::Utf8ToUtf16(order) => multibyte::utf8_to_utf16(source, destination, *order),
            BoundCodec::Utf16ToUtf8(order) => multibyte::utf16_to_utf8(source, destination, *order),
            BoundCodec::GbkToUtf8(table) => gbk::gbk_to_utf8(table, source, destination),
            BoundCodec::GbkToUnicode(table) => gbk::gbk_to_unicode(table, source, destination),
            BoundCodec::Utf8ToGbk(table) => gbk::utf8_to_gbk(table, source, destination),
            BoundCodec::UnicodeToGbk(table) => gbk::unicode_to_gbk(table, source, destination),
        }
    }

    /// Convert into a freshly allocated buffer sized by [`EncodingPair::max_output_len`]
    pub fn convert_to_vec(&self, source: &[u8]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; self.pair.max_output_len(source.len())];
        let written = self.convert(source, &mut output)?;
        output.truncate(written);
        Ok(output)
    }
}

/// Builds [`Converter`]s and owns the cache of loaded mapping tables
///
/// Each table is read from disk at most once per factory; every converter
/// created afterwards shares the same reference-counted copy.
#[derive(Debug)]
pub struct ConverterFactory {
    store: TableStore,
    cache: TableCache,
}

impl ConverterFactory {
    /// Create a factory loading tables from `table_dir`
    pub fn new(table_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: TableStore::new(table_dir),
            cache: TableCache::default(),
        }
    }

    /// Create a factory from [`TABLE_DIR_ENV`], falling back to [`DEFAULT_TABLE_DIR`]
    pub fn from_env() -> Self {
        let dir = std::env::var_os(TABLE_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TABLE_DIR));
        Self::new(dir)
    }

    /// Preload a table so it is never read from disk
    pub fn with_table(self, kind: TableKind, table: MappingTable) -> Self {
        self.cache.insert(kind, Arc::new(table));
        self
    }

    /// Directory the datasets are read from
    pub fn table_dir(&self) -> &Path {
        self.store.dir()
    }

    /// Get a table, loading it on first use
    pub fn table(&self, kind: TableKind) -> Result<Arc<MappingTable>> {
        self.cache.get_or_load(kind, |kind| self.store.load(kind))
    }

    /// Create a converter for `pair`
    pub fn create(&self, pair: EncodingPair) -> Result<Converter> {
        let codec = match pair.codec() {
            Codec::Utf8ToUtf16(order) => BoundCodec::Utf8ToUtf16(order),
            Codec::Utf16ToUtf8(order) => BoundCodec::Utf16ToUtf8(order),
            Codec::GbkToUtf8 => BoundCodec::GbkToUtf8(self.table(TableKind::GbkToUnicode)?),
            Codec::GbkToUnicode => BoundCodec::GbkToUnicode(self.table(TableKind::GbkToUnicode)?),
            Codec::Utf8ToGbk => BoundCodec::Utf8ToGbk(self.table(TableKind::UnicodeToGbk)?),
            Codec::UnicodeToGbk => BoundCodec::UnicodeToGbk(self.table(TableKind::UnicodeToGbk)?),
        };
        log::debug!("created converter for {}", pair);
        Ok(Converter { pair, codec })
    }

    /// Create a converter from a numeric pair identity
    pub fn create_by_id(&self, id: u8) -> Result<Converter> {
        self.create(EncodingPair::from_id(id)?)
    }
}

impl Default for ConverterFactory {
    fn default() -> Self {
        Self::from_env()
    }
}
