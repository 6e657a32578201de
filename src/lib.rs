//! An in-memory editor for Windows CE-flavored [Windows cabinet
//! (CAB)](https://en.wikipedia.org/wiki/Cabinet_(file_format)) archives,
//! coordinating an embedded `_setup.xml` install manifest alongside archive
//! contents.
//!
//! The core model is [`Archive`](archive::Archive), a map from short source
//! name to payload, plus an optional [`LayoutTemplate`](layout::LayoutTemplate)
//! capturing the CE-specific bytes (reserved areas, folder grouping, file
//! order) a byte-faithful repack needs to reproduce. [`Editor`] ties the
//! archive, its layout template, and its manifest together behind the
//! mutation operations a caller actually needs: add, update, remove, list,
//! and rebuild.

#![warn(missing_docs)]

macro_rules! invalid_data {
    ($e:expr) => {
        return Err(::std::io::Error::new(::std::io::ErrorKind::InvalidData, $e))
    };
    ($fmt:expr, $($arg:tt)+) => {
        return Err(::std::io::Error::new(
            ::std::io::ErrorKind::InvalidData,
            format!($fmt, $($arg)+),
        ))
    };
}
pub(crate) use invalid_data;

mod archive;
mod checksum;
mod codec;
mod consts;
mod ctype;
mod datetime;
mod editor;
mod error;
mod layout;
mod manifest;
mod mszip;
mod record;
mod signature;
mod sourcename;
mod string;

pub use archive::{Archive, ArchiveEntry};
pub use editor::Editor;
pub use error::{Error, Result};
pub use layout::LayoutTemplate;
pub use manifest::{Manifest, ManifestFileRecord};
pub use record::Record;
pub use signature::SignatureStatus;
pub use string::XmlEncoding;

pub use codec::{build_ce_cab_bytes, parse_cab};
