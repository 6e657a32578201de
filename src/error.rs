//! Crate-level error type.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while loading, editing, or saving a CAB
/// archive and its install manifest.
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying I/O failure (reading a path, generally).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation that requires a loaded archive was called on an empty
    /// editor.
    #[error("no archive is loaded")]
    NotLoaded,

    /// A source name was expected to be present but wasn't.
    #[error("no entry named {0:?}")]
    EntryMissing(String),

    /// An upload or replacement payload had zero bytes.
    #[error("payload is empty")]
    EmptyPayload,

    /// The archive and `_setup.xml` disagree in a way a mutation can't
    /// reconcile (no matching node to remove, no valid insertion point).
    #[error("manifest mismatch: {0}")]
    ManifestMismatch(String),

    /// Source-name generation exhausted every candidate.
    #[error("could not generate a unique source name for {0:?}")]
    NameExhausted(String),

    /// The CAB buffer violates the format at a point that prevents reading
    /// it at all (bad signature, truncated header/folder/file table).
    #[error("CAB structure is invalid: {0}")]
    StructuralDecode(String),

    /// A internal invariant was violated (empty archive on save, etc.).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}
