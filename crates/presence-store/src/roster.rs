//! Group rosters. Membership is managed elsewhere; this side only reads it.

use crate::error::{Result, StoreError};
use crate::files::read_optional;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Source of the ordered member list (identity keys) of a group.
pub trait Roster: Send + Sync {
    fn members(&self, group: &str) -> Result<Vec<String>>;

    /// Every group id the roster knows about.
    fn groups(&self) -> Result<Vec<String>>;
}

impl Roster for HashMap<String, Vec<String>> {
    fn members(&self, group: &str) -> Result<Vec<String>> {
        Ok(self.get(group).cloned().unwrap_or_default())
    }

    fn groups(&self) -> Result<Vec<String>> {
        Ok(self.keys().cloned().collect())
    }
}

impl Roster for BTreeMap<String, Vec<String>> {
    fn members(&self, group: &str) -> Result<Vec<String>> {
        Ok(self.get(group).cloned().unwrap_or_default())
    }

    fn groups(&self) -> Result<Vec<String>> {
        Ok(self.keys().cloned().collect())
    }
}

#[derive(Debug, Default, Deserialize)]
struct RosterDocument {
    #[serde(default)]
    groups: BTreeMap<String, Vec<String>>,
}

/// Roster read from a JSON file of the form
/// `{ "groups": { "<group>": ["<roll>_<name>", ...] } }`.
///
/// The file is re-read on every call so edits are picked up without a
/// restart. A missing file or group means no members.
#[derive(Debug, Clone)]
pub struct RosterFile {
    path: PathBuf,
}

impl RosterFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<RosterDocument> {
        let Some(text) = read_optional(&self.path)? else {
            return Ok(RosterDocument::default());
        };
        serde_json::from_str(&text).map_err(|e| {
            StoreError::Roster(format!("{}: {e}", self.path.display()))
        })
    }
}

impl Roster for RosterFile {
    fn members(&self, group: &str) -> Result<Vec<String>> {
        Ok(self.read()?.groups.remove(group).unwrap_or_default())
    }

    fn groups(&self) -> Result<Vec<String>> {
        Ok(self.read()?.groups.into_keys().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        std::fs::write(
            &path,
            r#"{"groups":{"classX":["2_Bob","1_Alice"],"classY":[]}}"#,
        )
        .unwrap();

        let roster = RosterFile::new(&path);
        assert_eq!(roster.members("classX").unwrap(), vec!["2_Bob", "1_Alice"]);
        assert!(roster.members("classZ").unwrap().is_empty());
        assert_eq!(roster.groups().unwrap(), vec!["classX", "classY"]);
    }

    #[test]
    fn test_missing_roster_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let roster = RosterFile::new(dir.path().join("absent.json"));
        assert!(roster.members("classX").unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_roster_is_roster_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        std::fs::write(&path, "groups: nope").unwrap();
        let err = RosterFile::new(&path).members("classX").unwrap_err();
        assert!(matches!(err, StoreError::Roster(_)));
    }
}
