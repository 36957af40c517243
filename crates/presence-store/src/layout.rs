//! On-disk naming of the data directory.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
const VECTORS_FILE: &str = "enrollments.json";
const FALLBACK_GROUP: &str = "global";

/// Root directory holding every store's files.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `attendance_<group>_<YYYY-MM-DD>.json`
    pub fn daily_file(&self, group: &str, date: NaiveDate) -> PathBuf {
        self.root.join(format!(
            "attendance_{}_{}.json",
            safe_group_name(group),
            date.format(DATE_FORMAT)
        ))
    }

    /// `attendance-<group>.csv`
    pub fn ledger_file(&self, group: &str) -> PathBuf {
        self.root
            .join(format!("attendance-{}.csv", safe_group_name(group)))
    }

    pub fn vectors_file(&self) -> PathBuf {
        self.root.join(VECTORS_FILE)
    }
}

/// File-name-safe form of a group id.
///
/// Whitespace runs become `_`; anything outside `[A-Za-z0-9_-]` is dropped.
/// An id with nothing left maps to `global`.
pub fn safe_group_name(group: &str) -> String {
    let mut out = String::with_capacity(group.len());
    let mut in_space = false;
    for c in group.trim().chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
        }
    }
    if out.is_empty() {
        FALLBACK_GROUP.to_string()
    } else {
        out
    }
}
