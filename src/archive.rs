//! In-memory archive model: an insertion-ordered map from source name to
//! entry. Order is preserved so that a repack without a layout template
//! still produces deterministic, stable output.

use indexmap::IndexMap;
use time::PrimitiveDateTime;

/// One payload stored under a source name.
#[derive(Clone, Debug)]
pub struct ArchiveEntry {
    pub payload: Vec<u8>,
    pub datetime: Option<PrimitiveDateTime>,
    pub attributes: u16,
    /// The exact bytes used for this entry's on-wire name, when it differs
    /// from the source-name key (e.g. a non-ASCII display name). `None`
    /// means "use the key".
    pub wire_name: Option<String>,
}

impl ArchiveEntry {
    pub fn new(payload: Vec<u8>) -> ArchiveEntry {
        ArchiveEntry {
            payload,
            datetime: None,
            attributes: 0,
            wire_name: None,
        }
    }
}

/// An insertion-ordered mapping from source name to entry. Keys are stored
/// and looked up verbatim (case-sensitive), matching how source names are
/// compared on the wire; case-insensitive matching (e.g. against manifest
/// `Extract/Source` values) is the caller's concern, not this type's.
#[derive(Clone, Debug, Default)]
pub struct Archive {
    entries: IndexMap<String, ArchiveEntry>,
}

impl Archive {
    pub fn new() -> Archive {
        Archive { entries: IndexMap::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ArchiveEntry> {
        self.entries.get_mut(name)
    }

    /// Inserts or overwrites an entry, preserving the original insertion
    /// position on overwrite (matching `IndexMap::insert` semantics).
    pub fn insert(&mut self, name: impl Into<String>, entry: ArchiveEntry) {
        self.entries.insert(name.into(), entry);
    }

    /// Removes an entry by exact key, returning whether one was present.
    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.shift_remove(name).is_some()
    }

    /// Iterates entries in stable insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArchiveEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }
}
