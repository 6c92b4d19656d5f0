//! Error kinds for the boundary operations described in the design docs.
//!
//! Per-file scan/parse failures are not represented here: they are folded
//! into `bool`/`Option` returns by the callers that observe them (see
//! [`crate::fragment::AudioFileFragment::get_metadata_for_song`]). This
//! enum is reserved for programmer errors and genuine boundary I/O
//! failures.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by public crate operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A path was given that does not resolve under any known AFI root.
    #[error("path does not resolve under any known root: {0}")]
    InvalidPath(PathBuf),

    /// A referenced file is no longer present on disk.
    #[error("file no longer exists: {0}")]
    MissingFile(PathBuf),

    /// Hard tag-parse failure; recorded in the do-not-retry set.
    #[error("failed to parse tags for {0}")]
    ParseFailure(PathBuf),

    /// An invariant (§3.1-§3.5) was violated during a write; logged and
    /// the operation proceeds best-effort. Surfaced here only when a
    /// caller explicitly asks for the strict form of an operation.
    #[error("index inconsistency detected: {0}")]
    IndexInconsistency(String),

    /// The preferred location was unwritable; a fallback location was used.
    #[error("read-only target, used fallback: {0}")]
    ReadOnlyTarget(PathBuf),

    /// A hash collision occurred and was resolved by rehashing.
    #[error("hash collision while registering {0}")]
    HashCollision(String),

    /// The injected persistence backend failed.
    #[error("persistence backend error: {0}")]
    Persist(String),

    /// Underlying filesystem I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted blob was present but could not be deserialized.
    #[error("corrupt persisted data: {0}")]
    Corrupt(String),
}

/// Convenience alias used throughout the crate's public boundary.
pub type Result<T> = std::result::Result<T, Error>;
