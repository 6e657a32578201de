//! Derived, display-friendly view of archive entries, built either straight
//! from the archive (no manifest) or joined against `_setup.xml` mappings.

use time::PrimitiveDateTime;

use crate::archive::Archive;
use crate::manifest::Manifest;

/// A display-friendly representation of one archive entry.
#[derive(Clone, Debug)]
pub struct Record {
    pub display_name: String,
    pub source_name: String,
    pub size: usize,
    pub modified: Option<PrimitiveDateTime>,
    pub parent_type: String,
}

impl Record {
    /// `YYYY-MM-DD HH:MM:SS`, or an empty string when no timestamp is set.
    pub fn formatted_modified(&self) -> String {
        match self.modified {
            Some(dt) => format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                dt.year(),
                u8::from(dt.month()),
                dt.day(),
                dt.hour(),
                dt.minute(),
                dt.second()
            ),
            None => String::new(),
        }
    }
}

/// Builds the listing shown to callers: joined against the manifest's file
/// mappings when one is loaded, or a flat one-record-per-entry view
/// otherwise. Manifest mappings whose source name no longer exists in the
/// archive are silently dropped, matching the original editor's behavior.
pub fn build_records(archive: &Archive, manifest: Option<&Manifest>) -> Vec<Record> {
    match manifest {
        None => archive
            .iter()
            .map(|(name, entry)| Record {
                display_name: name.to_string(),
                source_name: name.to_string(),
                size: entry.payload.len(),
                modified: entry.datetime,
                parent_type: String::new(),
            })
            .collect(),
        Some(manifest) => manifest
            .iter_file_records()
            .into_iter()
            .filter_map(|record| {
                let entry = archive.get(&record.source_name)?;
                Some(Record {
                    display_name: record.display_name,
                    source_name: record.source_name,
                    size: entry.payload.len(),
                    modified: entry.datetime,
                    parent_type: record.parent_type,
                })
            })
            .collect(),
    }
}
