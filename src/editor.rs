//! Archive editor facade: load, mutate, and save a CAB archive while keeping
//! an embedded `_setup.xml` install manifest in sync.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::archive::{Archive, ArchiveEntry};
use crate::codec;
use crate::consts;
use crate::error::{Error, Result};
use crate::layout::LayoutTemplate;
use crate::manifest::Manifest;
use crate::record::{self, Record};
use crate::signature::{self, SignatureStatus};

/// Holds a loaded CAB archive, its recoverable CE layout template, and its
/// optional `_setup.xml` manifest, and coordinates mutations across all
/// three. `Send` but not internally synchronized; callers serialize access
/// per workspace themselves.
#[derive(Default)]
pub struct Editor {
    archive: Option<Archive>,
    template: Option<LayoutTemplate>,
    manifest: Option<Manifest>,
    loaded_path: Option<PathBuf>,
    signature_before: Option<SignatureStatus>,
}

impl Editor {
    pub fn new() -> Editor {
        Editor::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.archive.is_some()
    }

    pub fn loaded_path(&self) -> Option<&Path> {
        self.loaded_path.as_deref()
    }

    /// The Authenticode status captured at load time, if a load has
    /// happened. `None` before any load.
    pub fn signature_before(&self) -> Option<&SignatureStatus> {
        self.signature_before.as_ref()
    }

    /// Loads CAB bytes read from `path`. On failure the editor is left with
    /// no loaded archive; `path` is cleared rather than retained.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub fn load_path(&mut self, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path)?;
        match self.load_bytes(&bytes) {
            Ok(()) => {
                self.loaded_path = Some(path.to_path_buf());
                self.signature_before = Some(signature::probe(path));
                Ok(())
            }
            Err(error) => {
                self.loaded_path = None;
                Err(error)
            }
        }
    }

    /// Loads CAB bytes directly, without touching `loaded_path` or
    /// `signature_before` (those only make sense for a real file on disk).
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let (template, archive) = codec::parse_cab(bytes)?;
        let manifest = archive
            .get(consts::SETUP_XML_NAME)
            .and_then(|entry| Manifest::parse(&entry.payload));
        info!(
            files = archive.len(),
            has_manifest = manifest.is_some(),
            structural_only = template.is_none(),
            "loaded CAB archive"
        );
        self.archive = Some(archive);
        self.template = template;
        self.manifest = manifest;
        Ok(())
    }

    fn archive(&self) -> Result<&Archive> {
        self.archive.as_ref().ok_or(Error::NotLoaded)
    }

    fn archive_mut(&mut self) -> Result<&mut Archive> {
        self.archive.as_mut().ok_or(Error::NotLoaded)
    }

    /// Replaces the payload of an existing entry, stamping the current time.
    /// `source_name` is matched case-sensitively against archive keys.
    #[instrument(skip(self, bytes), fields(source_name, outcome = tracing::field::Empty))]
    pub fn update_file(&mut self, source_name: &str, bytes: Vec<u8>) -> Result<()> {
        if bytes.is_empty() {
            return Err(Error::EmptyPayload);
        }
        let entry = self
            .archive_mut()?
            .get_mut(source_name)
            .ok_or_else(|| Error::EntryMissing(source_name.to_string()))?;
        entry.payload = bytes;
        entry.datetime = current_datetime();
        info!(source_name, "updated file");
        Ok(())
    }

    /// Removes an archive entry and, when a manifest is present, its
    /// matching file node (case-insensitive match on `Extract/Source`).
    /// Returns whether an archive entry was actually removed.
    #[instrument(skip(self), fields(source_name))]
    pub fn remove_file(&mut self, source_name: &str) -> Result<bool> {
        let archive = self.archive_mut()?;
        let existed = archive.remove(source_name);

        match &self.manifest {
            Some(manifest) => {
                if !manifest.remove_file_record(source_name) {
                    return Err(Error::ManifestMismatch(format!(
                        "no manifest entry for {source_name:?}"
                    )));
                }
                manifest.update_num_files(manifest.iter_file_records().len());
                self.sync_manifest_into_archive()?;
            }
            None => {
                if !existed {
                    warn!(source_name, "remove_file: nothing removed");
                    return Ok(false);
                }
            }
        }
        info!(source_name, existed, "removed file");
        Ok(existed)
    }

    /// Adds a new file under a generated short source name. `display_name`
    /// is used if non-empty after trimming, else `upload_name`. Fails if
    /// neither resolves to a usable name, the payload is empty, or (with a
    /// manifest) no insertion point can be resolved.
    #[instrument(skip(self, bytes), fields(display_name, directory, source_name = tracing::field::Empty))]
    pub fn add_file(
        &mut self,
        bytes: Vec<u8>,
        display_name: &str,
        upload_name: &str,
        directory: &str,
    ) -> Result<String> {
        if bytes.is_empty() {
            return Err(Error::EmptyPayload);
        }
        let effective_display_name = {
            let trimmed = display_name.trim();
            if !trimmed.is_empty() {
                trimmed.to_string()
            } else {
                upload_name.trim().to_string()
            }
        };
        if effective_display_name.is_empty() {
            return Err(Error::InvariantViolation(
                "no usable display name for add_file".into(),
            ));
        }

        let archive = self.archive.as_ref().ok_or(Error::NotLoaded)?;
        let existing_lower: HashSet<String> =
            archive.keys().map(|k| k.to_lowercase()).collect();
        let source_name = crate::sourcename::generate_source_name(
            &effective_display_name,
            &existing_lower,
        )?;

        if let Some(manifest) = &self.manifest {
            manifest.append_file_record(directory, &effective_display_name, &source_name)?;
        }

        let mut entry = ArchiveEntry::new(bytes);
        entry.datetime = current_datetime();
        self.archive_mut()?.insert(source_name.clone(), entry);

        if let Some(manifest) = &self.manifest {
            manifest.update_num_files(manifest.iter_file_records().len());
            self.sync_manifest_into_archive()?;
        }

        info!(source_name = %source_name, "added file");
        Ok(source_name)
    }

    pub fn get_file_bytes(&self, source_name: &str) -> Result<&[u8]> {
        self.archive()?
            .get(source_name)
            .map(|entry| entry.payload.as_slice())
            .ok_or_else(|| Error::EntryMissing(source_name.to_string()))
    }

    /// Serializes the manifest's current tree into the archive's
    /// `_setup.xml` entry, if a manifest is loaded.
    fn sync_manifest_into_archive(&mut self) -> Result<()> {
        let Some(manifest) = &self.manifest else {
            return Ok(());
        };
        let bytes = manifest.to_bytes()?;
        let archive = self.archive.as_mut().ok_or(Error::NotLoaded)?;
        match archive.get_mut(consts::SETUP_XML_NAME) {
            Some(entry) => entry.payload = bytes,
            None => archive.insert(consts::SETUP_XML_NAME, ArchiveEntry::new(bytes)),
        }
        Ok(())
    }

    /// Renders the current archive to CAB bytes, resyncing the manifest
    /// payload first when one is loaded. Uses the captured layout template,
    /// with deterministic (sorted) ordering for any unassigned new files.
    #[instrument(skip(self), fields(compress))]
    pub fn build_cab_bytes(&mut self, compress: bool) -> Result<Vec<u8>> {
        if self.manifest.is_some() {
            self.sync_manifest_into_archive()?;
        }
        let archive = self.archive.as_ref().ok_or(Error::NotLoaded)?;
        codec::build_ce_cab_bytes(archive, self.template.as_ref(), compress, true)
    }

    /// The display-oriented record listing: joined against the manifest if
    /// one is loaded, else a flat one-record-per-entry view.
    pub fn records(&self) -> Result<Vec<Record>> {
        Ok(record::build_records(self.archive()?, self.manifest.as_ref()))
    }

    /// Distinct install directories known to the manifest, restricted to
    /// entries that still exist in the archive (matching `records()`'s own
    /// archive-existence filter). Empty if no manifest is loaded.
    pub fn directories(&self) -> Vec<String> {
        match (&self.manifest, &self.archive) {
            (Some(manifest), Some(archive)) => manifest.directories(archive),
            _ => Vec::new(),
        }
    }

    pub fn has_manifest(&self) -> bool {
        self.manifest.is_some()
    }
}

fn current_datetime() -> Option<time::PrimitiveDateTime> {
    let now = OffsetDateTime::now_utc();
    time::PrimitiveDateTime::new(now.date(), now.time()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded_editor_no_manifest() -> Editor {
        let mut archive = Archive::new();
        archive.insert("hi.txt", ArchiveEntry::new(b"hello".to_vec()));
        let bytes = codec::build_ce_cab_bytes(&archive, None, false, true).unwrap();
        let mut editor = Editor::new();
        editor.load_bytes(&bytes).unwrap();
        editor
    }

    #[test]
    fn update_file_requires_existing_case_sensitive_key() {
        let mut editor = loaded_editor_no_manifest();
        assert!(editor.update_file("HI.TXT", b"x".to_vec()).is_err());
        editor.update_file("hi.txt", b"bye".to_vec()).unwrap();
        assert_eq!(editor.get_file_bytes("hi.txt").unwrap(), b"bye");
    }

    #[test]
    fn update_file_rejects_empty_payload() {
        let mut editor = loaded_editor_no_manifest();
        assert!(matches!(
            editor.update_file("hi.txt", Vec::new()),
            Err(Error::EmptyPayload)
        ));
    }

    #[test]
    fn remove_file_without_manifest_reports_whether_key_existed() {
        let mut editor = loaded_editor_no_manifest();
        assert_eq!(editor.remove_file("missing.txt").unwrap(), false);
        assert_eq!(editor.remove_file("hi.txt").unwrap(), true);
        assert!(editor.get_file_bytes("hi.txt").is_err());
    }

    #[test]
    fn add_file_generates_unique_source_name_and_collision_suffix() {
        let mut editor = loaded_editor_no_manifest();
        let first = editor.add_file(b"a".to_vec(), "Readme.txt", "", "").unwrap();
        assert_eq!(first, "README~1.TXT");
        let second = editor.add_file(b"b".to_vec(), "Readme.txt", "", "").unwrap();
        assert_eq!(second, "README~2.TXT");
    }

    #[test]
    fn add_file_falls_back_to_upload_name_when_display_name_blank() {
        let mut editor = loaded_editor_no_manifest();
        let source_name = editor.add_file(b"a".to_vec(), "  ", "upload.bin", "").unwrap();
        assert_eq!(source_name, "UPLOAD~1.BIN");
    }

    #[test]
    fn build_cab_bytes_round_trips_after_mutation() {
        let mut editor = loaded_editor_no_manifest();
        let source_name = editor.add_file(b"second".to_vec(), "second.txt", "", "").unwrap();
        let bytes = editor.build_cab_bytes(true).unwrap();
        let mut reloaded = Editor::new();
        reloaded.load_bytes(&bytes).unwrap();
        assert_eq!(reloaded.get_file_bytes("hi.txt").unwrap(), b"hello");
        assert_eq!(reloaded.get_file_bytes(&source_name).unwrap(), b"second");
    }
}
