//! Error taxonomy for working-copy administration
//!
//! One enum covers every failure class the engine distinguishes.
//! `NotDirectory` is the recoverable class: the access manager turns it
//! into a MISSING placeholder instead of unwinding.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, WcError>;

#[derive(Debug, thiserror::Error)]
pub enum WcError {
    #[error("Working copy '{0}' is not locked")]
    NotLocked(PathBuf),

    #[error("Working copy '{0}' locked; try performing 'cleanup'")]
    Locked(PathBuf),

    #[error("Working copy '{path}' is corrupt: {details}")]
    Corrupt { path: PathBuf, details: String },

    #[error("Base checksum mismatch for '{path}': expected '{expected}', actual '{actual}'")]
    CorruptTextBase {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("No entry for '{0}'")]
    EntryNotFound(String),

    #[error("Entry '{0}' has no revision")]
    EntryMissingRevision(String),

    #[error("Entry '{0}' has no URL")]
    EntryMissingUrl(String),

    #[error("Entry '{name}' has invalid '{attribute}' value: '{value}'")]
    EntryAttributeInvalid {
        name: String,
        attribute: String,
        value: String,
    },

    #[error("Unknown node kind '{kind}' for entry '{name}'")]
    UnknownNodeKind { name: String, kind: String },

    #[error("Schedule conflict for '{name}': {details}")]
    ScheduleConflict { name: String, details: String },

    #[error("{0}")]
    UnsupportedFormat(String),

    #[error("'{0}' is not a working copy")]
    NotDirectory(PathBuf),

    #[error("Obstructed update of '{path}': {details}")]
    ObstructedUpdate { path: PathBuf, details: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl WcError {
    /// Corruption error with a path for context.
    pub fn corrupt(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        WcError::Corrupt {
            path: path.into(),
            details: details.into(),
        }
    }

    /// True for errors the access manager may recover from by recording
    /// the directory as missing.
    pub fn is_missing_wc(&self) -> bool {
        matches!(self, WcError::NotDirectory(_))
    }
}
