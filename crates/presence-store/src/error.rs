use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt file {}: {reason} (repair or remove it by hand)", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("roster unavailable: {0}")]
    Roster(String),
    #[error("group {group:?} shares file name {file:?} with group {other:?}")]
    GroupCollision {
        group: String,
        other: String,
        file: String,
    },
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn corrupt(path: &Path, reason: impl ToString) -> Self {
        StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// I/O failures are transient; a corrupt file stays corrupt until someone
    /// fixes it.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io { .. } | StoreError::Roster(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
