//! `_setup.xml` install-manifest coordination: keeping the embedded CE
//! install manifest's file mappings in sync with archive contents as files
//! are added or removed.

use sxd_document::dom::{Document, Element};
use sxd_document::{Package, QName};

use crate::archive::Archive;
use crate::error::{Error, Result};
use crate::string::{decode_setup_xml_candidates, XmlEncoding};

/// One `<characteristic>` file mapping read out of the manifest.
#[derive(Clone, Debug)]
pub struct ManifestFileRecord {
    pub display_name: String,
    pub source_name: String,
    pub parent_type: String,
}

/// A parsed `_setup.xml`, held as an `sxd_document` DOM tree.
pub struct Manifest {
    package: Package,
    encoding: XmlEncoding,
}

impl Manifest {
    /// Decodes and parses manifest bytes, trying UTF-8, then BOM-sniffed or
    /// strict UTF-16, then Windows-1252 as a last resort. Decoding and XML
    /// parsing are tried together per candidate: a candidate whose bytes
    /// decode cleanly but whose text isn't well-formed XML (e.g. a no-BOM
    /// UTF-16BE document, whose bytes also "decode" as garbage UTF-8) is
    /// rejected in favor of the next candidate, rather than committed to.
    /// Returns `None` if no candidate both decodes and parses.
    pub fn parse(bytes: &[u8]) -> Option<Manifest> {
        decode_setup_xml_candidates(bytes).into_iter().find_map(|(encoding, text)| {
            let package = sxd_document::parser::parse(&text).ok()?;
            Some(Manifest { package, encoding })
        })
    }

    pub fn original_encoding(&self) -> XmlEncoding {
        self.encoding
    }

    fn document(&self) -> Document<'_> {
        self.package.as_document()
    }

    fn root_element(&self) -> Option<Element<'_>> {
        self.document().root().children().into_iter().find_map(|c| c.element())
    }

    fn file_operation_element(&self) -> Option<Element<'_>> {
        find_child_with_type(self.root_element()?, "FileOperation")
    }

    /// Every file mapping under `FileOperation`, depth-first.
    pub fn iter_file_records(&self) -> Vec<ManifestFileRecord> {
        let mut out = Vec::new();
        let Some(fileop) = self.file_operation_element() else {
            return out;
        };
        for parent in descendants_with_tag(fileop, "characteristic") {
            for file_node in children_with_tag(parent, "characteristic") {
                let Some(extract) = find_child_with_type(file_node, "Extract") else {
                    continue;
                };
                let Some(source_name) = source_parm_value(extract) else {
                    continue;
                };
                let Some(display_name) = file_node.attribute_value("type") else {
                    continue;
                };
                out.push(ManifestFileRecord {
                    display_name: display_name.to_string(),
                    source_name: source_name.to_string(),
                    parent_type: parent.attribute_value("type").unwrap_or("").to_string(),
                });
            }
        }
        out
    }

    /// Removes the file mapping for `source_name` (case-insensitive),
    /// returning whether a matching node was found and removed.
    pub fn remove_file_record(&self, source_name: &str) -> bool {
        let Some(fileop) = self.file_operation_element() else {
            return false;
        };
        let wanted = source_name.to_lowercase();
        for parent in descendants_with_tag(fileop, "characteristic") {
            for file_node in children_with_tag(parent, "characteristic") {
                let Some(extract) = find_child_with_type(file_node, "Extract") else {
                    continue;
                };
                let matches = source_parm_value(extract)
                    .map(|s| s.to_lowercase() == wanted)
                    .unwrap_or(false);
                if matches {
                    parent.remove_child(file_node);
                    return true;
                }
            }
        }
        false
    }

    /// Appends a new file mapping under the best matching install
    /// directory, falling back to the top-level `FileOperation` node.
    /// Fails only if the manifest has no `FileOperation` section at all.
    pub fn append_file_record(
        &self,
        directory: &str,
        display_name: &str,
        source_name: &str,
    ) -> Result<()> {
        let parent = self.resolve_target_parent(directory).ok_or_else(|| {
            Error::ManifestMismatch("_setup.xml has no FileOperation section".into())
        })?;
        let doc = self.document();

        let file_node = doc.create_element("characteristic");
        file_node.set_attribute_value("type", display_name);
        file_node.set_attribute_value("translation", "install");

        let extract_node = doc.create_element("characteristic");
        extract_node.set_attribute_value("type", "Extract");
        file_node.append_child(extract_node);

        let source_parm = doc.create_element("parm");
        source_parm.set_attribute_value("name", "Source");
        source_parm.set_attribute_value("value", source_name);
        extract_node.append_child(source_parm);

        parent.append_child(file_node);
        Ok(())
    }

    fn resolve_target_parent(&self, directory: &str) -> Option<Element<'_>> {
        let fileop = self.file_operation_element()?;
        if !directory.is_empty() {
            if let Some(node) = find_child_with_type(fileop, directory) {
                return Some(node);
            }
        }
        let install_child = children_with_tag(fileop, "characteristic")
            .into_iter()
            .find(|node| node.attribute_value("translation") == Some("install"));
        Some(install_child.unwrap_or(fileop))
    }

    /// Refreshes the `NumFiles` install parameter, if present, to `count`.
    pub fn update_num_files(&self, count: usize) {
        let Some(root) = self.root_element() else { return };
        let Some(install) = find_child_with_type(root, "Install") else { return };
        if let Some(parm) = children_with_tag(install, "parm")
            .into_iter()
            .find(|p| p.attribute_value("name") == Some("NumFiles"))
        {
            parm.set_attribute_value("value", &count.to_string());
        }
    }

    /// Distinct install directories (parent types starting with `\`),
    /// sorted, derived from the file records that still have a matching
    /// archive entry — matching the same archive-existence filter the
    /// joined record view applies, so a manifest entry whose file was
    /// removed from the archive doesn't still contribute a directory.
    pub fn directories(&self, archive: &Archive) -> Vec<String> {
        let mut dirs: Vec<String> = self
            .iter_file_records()
            .into_iter()
            .filter(|record| archive.contains_key(&record.source_name))
            .map(|record| record.parent_type)
            .filter(|parent_type| parent_type.starts_with('\\'))
            .collect();
        dirs.sort();
        dirs.dedup();
        dirs
    }

    /// Serializes the manifest back to UTF-8 bytes, matching the encoding
    /// the original writer always uses on save regardless of the encoding
    /// the manifest was loaded with.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        sxd_document::writer::format_document(&self.document(), &mut output).map_err(|error| {
            Error::ManifestMismatch(format!("failed to serialize _setup.xml: {error:?}"))
        })?;
        Ok(output)
    }
}

fn children_with_tag<'d>(elem: Element<'d>, tag: &str) -> Vec<Element<'d>> {
    elem.children()
        .into_iter()
        .filter_map(|c| c.element())
        .filter(|e| e.name() == QName::new(tag))
        .collect()
}

fn find_child_with_type<'d>(elem: Element<'d>, type_value: &str) -> Option<Element<'d>> {
    children_with_tag(elem, "characteristic")
        .into_iter()
        .find(|e| e.attribute_value("type") == Some(type_value))
}

fn descendants_with_tag<'d>(elem: Element<'d>, tag: &str) -> Vec<Element<'d>> {
    let mut out = Vec::new();
    let mut stack: Vec<Element<'d>> =
        elem.children().into_iter().filter_map(|c| c.element()).collect();
    while let Some(node) = stack.pop() {
        for child in node.children().into_iter().filter_map(|c| c.element()) {
            stack.push(child);
        }
        if node.name() == QName::new(tag) {
            out.push(node);
        }
    }
    out
}

fn source_parm_value<'d>(extract: Element<'d>) -> Option<&'d str> {
    children_with_tag(extract, "parm")
        .into_iter()
        .find(|p| p.attribute_value("name") == Some("Source"))
        .and_then(|p| p.attribute_value("value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<wap-provisioningdoc>
  <characteristic type="Install">
    <parm name="NumFiles" value="1"/>
  </characteristic>
  <characteristic type="FileOperation">
    <characteristic type="\Windows">
      <characteristic type="readme.txt" translation="install">
        <characteristic type="Extract">
          <parm name="Source" value="README~1.TXT"/>
        </characteristic>
      </characteristic>
    </characteristic>
  </characteristic>
</wap-provisioningdoc>"#;

    #[test]
    fn reads_file_records_and_directories() {
        let manifest = Manifest::parse(SAMPLE.as_bytes()).unwrap();
        let records = manifest.iter_file_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].display_name, "readme.txt");
        assert_eq!(records[0].source_name, "README~1.TXT");
        assert_eq!(records[0].parent_type, "\\Windows");

        let mut archive = Archive::new();
        archive.insert("README~1.TXT", crate::archive::ArchiveEntry::new(b"hi".to_vec()));
        assert_eq!(manifest.directories(&archive), vec!["\\Windows".to_string()]);
    }

    #[test]
    fn directories_excludes_entries_missing_from_the_archive() {
        let manifest = Manifest::parse(SAMPLE.as_bytes()).unwrap();
        let archive = Archive::new(); // README~1.TXT was never inserted
        assert!(manifest.directories(&archive).is_empty());
    }

    #[test]
    fn removes_file_record_case_insensitively() {
        let manifest = Manifest::parse(SAMPLE.as_bytes()).unwrap();
        assert!(manifest.remove_file_record("readme~1.txt"));
        assert!(manifest.iter_file_records().is_empty());
        assert!(!manifest.remove_file_record("readme~1.txt"));
    }

    #[test]
    fn appends_file_record_under_matching_directory() {
        let manifest = Manifest::parse(SAMPLE.as_bytes()).unwrap();
        manifest.append_file_record("\\Windows", "second.bin", "SECOND~1.BIN").unwrap();
        let records = manifest.iter_file_records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.source_name == "SECOND~1.BIN"));
    }

    #[test]
    fn update_num_files_rewrites_parm_value() {
        let manifest = Manifest::parse(SAMPLE.as_bytes()).unwrap();
        manifest.update_num_files(3);
        let bytes = manifest.to_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains(r#"value="3""#));
    }
}
