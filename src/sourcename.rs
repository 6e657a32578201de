//! Short DOS-like "source name" generation for newly added files, matching
//! the 8.3-flavored identifiers real CE install manifests reference.

use std::collections::HashSet;

use time::OffsetDateTime;

use crate::error::{Error, Result};

fn stem_and_ext(display_name: &str) -> (String, String) {
    let file_name = display_name.rsplit(['/', '\\']).next().unwrap_or(display_name);
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, ext),
        _ => (file_name, ""),
    };
    let mut stem: String =
        stem.chars().filter(|c| c.is_ascii_alphanumeric()).map(|c| c.to_ascii_uppercase()).collect();
    stem.truncate(6);
    if stem.is_empty() {
        stem = "PYFILE".to_string();
    }

    let mut ext: String =
        ext.chars().filter(|c| c.is_ascii_alphanumeric()).map(|c| c.to_ascii_uppercase()).collect();
    ext.truncate(3);
    if ext.is_empty() {
        ext = "BIN".to_string();
    }
    (stem, ext)
}

/// Generates a short, unique source name for `display_name`, trying
/// `STEM~1.EXT` through `STEM~999.EXT` before falling back to a
/// timestamp-derived name. `existing_lower` must already be lowercased.
pub fn generate_source_name(
    display_name: &str,
    existing_lower: &HashSet<String>,
) -> Result<String> {
    let (stem, ext) = stem_and_ext(display_name);

    for index in 1..1000 {
        let candidate = format!("{stem}~{index}.{ext}");
        if !existing_lower.contains(&candidate.to_lowercase()) {
            return Ok(candidate);
        }
    }

    let fallback = format!("PY{}.DAT", OffsetDateTime::now_utc().unix_timestamp());
    if !existing_lower.contains(&fallback.to_lowercase()) {
        return Ok(fallback);
    }
    Err(Error::NameExhausted(display_name.to_string()))
}
