//! Crate-wide error type

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a whole operation.
///
/// Per-file failures inside a batch are not represented here; they are
/// collected into the operation's outcome struct as
/// [`OperationError`](crate::models::OperationError) values so the rest of
/// the batch can proceed.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O failure tied to a specific path
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A `.zip` file contained no entry with a recognized ROM extension
    #[error("no ROM file found in archive: {}", .0.display())]
    NoRomInArchive(PathBuf),

    /// A file claiming to be an archive could not be opened as one
    #[error("{}: not a valid archive: {reason}", path.display())]
    BadArchive { path: PathBuf, reason: String },

    /// DAT file could not be parsed; no partial index is returned
    #[error("failed to parse DAT file {}: {reason}", path.display())]
    DatParse { path: PathBuf, reason: String },

    /// Caller-supplied regex pattern was invalid; caught before any work
    #[error("invalid rename pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Required external tool is not installed
    #[error("external tool not found: {0}")]
    ToolMissing(String),
}

impl Error {
    /// Attach a path to a raw I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
