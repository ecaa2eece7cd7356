//! GBK <-> Unicode mapping tables
//!
//! Tables are stored one direction per dataset as a JSON object whose keys
//! are decimal code values, e.g. `{"54992": 20013}` maps GBK 0xD6D0 to U+4E2D.
//! GB2312 and GB18030 use the same datasets as GBK.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Direction of a mapping dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TableKind {
    /// Packed GBK byte sequence to Unicode code point
    GbkToUnicode,
    /// Unicode code point to packed GBK byte sequence
    UnicodeToGbk,
}

impl TableKind {
    /// Both directions
    pub const ALL: [TableKind; 2] = [TableKind::GbkToUnicode, TableKind::UnicodeToGbk];

    /// File name of the dataset inside the table directory
    pub fn file_name(self) -> &'static str {
        match self {
            TableKind::GbkToUnicode => "gbk2unicode.json",
            TableKind::UnicodeToGbk => "unicode2gbk.json",
        }
    }
}

/// Read-only map from a source code value to a destination code value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappingTable {
    entries: HashMap<u64, u64>,
}

impl MappingTable {
    /// Deserialize a table from JSON
    pub fn from_reader<R: Read>(reader: R) -> serde_json::Result<Self> {
        serde_json::from_reader(reader)
    }

    /// Look up the value stored for `key`
    #[inline]
    pub fn get(&self, key: u64) -> Option<u64> {
        self.entries.get(&key).copied()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(key, value)` entries in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.entries.iter().map(|(&key, &value)| (key, value))
    }

    /// Build the table for the opposite direction
    ///
    /// When several keys share a value the smallest key wins.
    pub fn inverse(&self) -> MappingTable {
        let mut entries = HashMap::with_capacity(self.entries.len());
        for (key, value) in self.iter() {
            entries
                .entry(value)
                .and_modify(|existing: &mut u64| *existing = (*existing).min(key))
                .or_insert(key);
        }
        MappingTable { entries }
    }
}

impl FromIterator<(u64, u64)> for MappingTable {
    fn from_iter<I: IntoIterator<Item = (u64, u64)>>(iter: I) -> Self {
        MappingTable {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Loads mapping datasets from a directory
#[derive(Debug, Clone)]
pub struct TableStore {
    dir: PathBuf,
}

impl TableStore {
    /// Create a store reading from `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory the datasets live in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the dataset for `kind`
    pub fn path(&self, kind: TableKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    /// Read and deserialize the dataset for `kind`
    pub fn load(&self, kind: TableKind) -> Result<MappingTable> {
        let path = self.path(kind);
        log::debug!("loading {:?} table from {}", kind, path.display());

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(source) => return Err(Error::Io { path, source }),
        };
        let table = match MappingTable::from_reader(BufReader::new(file)) {
            Ok(table) => table,
            Err(source) if source.is_io() => {
                return Err(Error::Io {
                    path,
                    source: source.into(),
                });
            }
            Err(source) => return Err(Error::Format { path, source }),
        };

        log::debug!("loaded {} entries from {}", table.len(), path.display());
        Ok(table)
    }
}

/// Tables already loaded by a factory, shared between its converters
#[derive(Debug, Default)]
pub(crate) struct TableCache {
    tables: Mutex<HashMap<TableKind, Arc<MappingTable>>>,
}

impl TableCache {
    pub(crate) fn insert(&self, kind: TableKind, table: Arc<MappingTable>) {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, table);
    }

    /// Return the cached table or load it with `load`
    ///
    /// The lock is held across `load`, so concurrent callers read a dataset
    /// at most once.
    pub(crate) fn get_or_load<F>(&self, kind: TableKind, load: F) -> Result<Arc<MappingTable>>
    where
        F: FnOnce(TableKind) -> Result<MappingTable>,
    {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(table) = tables.get(&kind) {
            log::debug!("reusing cached {:?} table", kind);
            return Ok(Arc::clone(table));
        }
        let table = Arc::new(load(kind)?);
        tables.insert(kind, Arc::clone(&table));
        Ok(table)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::MappingTable;

    /// A handful of real GBK/GB18030 assignments
    pub(crate) fn gbk_to_unicode() -> MappingTable {
        [
            (0x41, 0x41),             // A
            (0xD6D0, 0x4E2D),         // 中
            (0xCEC4, 0x6587),         // 文
            (0x8130_8130, 0x80),      // first four-byte BMP code
            (0x9030_8130, 0x1_0000),  // first supplementary plane code
        ]
        .into_iter()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gbk-iconv-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_lookup_and_inverse() {
        let table = fixtures::gbk_to_unicode();
        assert_eq!(table.len(), 5);
        assert_eq!(table.get(0xD6D0), Some(0x4E2D));
        assert_eq!(table.get(0xB0A1), None);

        let inverse = table.inverse();
        assert_eq!(inverse.get(0x4E2D), Some(0xD6D0));
        assert_eq!(inverse.get(0x1_0000), Some(0x9030_8130));
    }

    #[test]
    fn test_inverse_prefers_smallest_key() {
        let table: MappingTable = [(0xA1A4, 0xB7), (0xA1A5, 0xB7)].into_iter().collect();
        assert_eq!(table.inverse().get(0xB7), Some(0xA1A4));
    }

    #[test]
    fn test_json_format() {
        let table = MappingTable::from_reader(r#"{"54992": 20013, "65": 65}"#.as_bytes()).unwrap();
        assert_eq!(table.get(0xD6D0), Some(0x4E2D));
        assert_eq!(table.get(0x41), Some(0x41));

        let json = serde_json::to_string(&table).unwrap();
        assert_eq!(MappingTable::from_reader(json.as_bytes()).unwrap(), table);
    }

    #[test]
    fn test_store_load() {
        let dir = temp_dir("store-load");
        let file = File::create(dir.join(TableKind::GbkToUnicode.file_name())).unwrap();
        serde_json::to_writer(file, &fixtures::gbk_to_unicode()).unwrap();

        let store = TableStore::new(&dir);
        let table = store.load(TableKind::GbkToUnicode).unwrap();
        assert_eq!(table, fixtures::gbk_to_unicode());

        assert!(matches!(
            store.load(TableKind::UnicodeToGbk),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn test_store_rejects_malformed_dataset() {
        let dir = temp_dir("store-malformed");
        std::fs::write(
            dir.join(TableKind::UnicodeToGbk.file_name()),
            r#"{"not a number": 1}"#,
        )
        .unwrap();
        std::fs::write(dir.join(TableKind::GbkToUnicode.file_name()), "[1, 2, 3]").unwrap();

        let store = TableStore::new(&dir);
        for kind in TableKind::ALL {
            match store.load(kind) {
                Err(Error::Format { path, .. }) => assert_eq!(path, store.path(kind)),
                other => panic!("expected format error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_cache_loads_once() {
        let cache = TableCache::default();
        let loads = AtomicUsize::new(0);
        let load = |_kind: TableKind| -> Result<MappingTable> {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(fixtures::gbk_to_unicode())
        };

        let first = cache.get_or_load(TableKind::GbkToUnicode, load).unwrap();
        let second = cache.get_or_load(TableKind::GbkToUnicode, load).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cache_does_not_remember_failures() {
        let cache = TableCache::default();
        let failed = cache.get_or_load(TableKind::UnicodeToGbk, |_| {
            Err(Error::UnsupportedPair("boom".to_string()))
        });
        assert!(failed.is_err());

        let table = cache
            .get_or_load(TableKind::UnicodeToGbk, |_| Ok(MappingTable::default()))
            .unwrap();
        assert!(table.is_empty());
    }
}
