//! Per-(group, date) attendance entries.
//!
//! Each day's entries live in one JSON array file, kept in insertion order.
//! Every mutation loads the whole set, changes it and replaces the file
//! under the file's lock.

use crate::error::{Result, StoreError};
use crate::files::{read_optional, write_atomic, FileLocks};
use crate::layout::DataDir;
use crate::table;
use chrono::{DateTime, NaiveDate, Utc};
use presence_core::Identity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const STATUS_PRESENT: &str = "Present";

fn default_status() -> String {
    STATUS_PRESENT.to_string()
}

/// One recorded presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEntry {
    #[serde(default)]
    pub roll: String,
    #[serde(default)]
    pub name: String,
    /// Stored as epoch milliseconds.
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl AttendanceEntry {
    /// A "Present" entry for an identity key such as `7_Alice`.
    pub fn present(identity: &str, group: &str, at: DateTime<Utc>) -> Self {
        let Identity { roll, name } = Identity::parse(identity);
        Self {
            roll,
            name,
            timestamp: at,
            status: default_status(),
            identity: Some(identity.to_string()),
            group: Some(group.to_string()),
        }
    }

    /// Whether both entries refer to the same member. Roll is the key; the
    /// name stands in when there is no roll.
    pub fn same_member(&self, roll: &str, name: &str) -> bool {
        let (own_roll, roll) = (self.roll.trim(), roll.trim());
        if own_roll.is_empty() && roll.is_empty() {
            self.name.trim() == name.trim()
        } else {
            own_roll == roll
        }
    }
}

#[derive(Debug, Clone)]
pub struct DailyRecordStore {
    dir: DataDir,
    locks: Arc<FileLocks>,
}

impl DailyRecordStore {
    pub fn new(dir: DataDir, locks: Arc<FileLocks>) -> Self {
        Self { dir, locks }
    }

    pub fn path(&self, group: &str, date: NaiveDate) -> PathBuf {
        self.dir.daily_file(group, date)
    }

    /// Entries for the day in insertion order; empty when no file exists.
    pub fn load(&self, group: &str, date: NaiveDate) -> Result<Vec<AttendanceEntry>> {
        let path = self.path(group, date);
        self.locks.with(&path, || read_entries(&path))
    }

    /// Record an entry unless its member is already recorded for the day.
    ///
    /// Returns `false` without touching the file for a duplicate.
    pub fn append(&self, group: &str, date: NaiveDate, entry: AttendanceEntry) -> Result<bool> {
        let path = self.path(group, date);
        self.locks.with(&path, || {
            let mut entries = read_entries(&path)?;
            if entries.iter().any(|e| e.same_member(&entry.roll, &entry.name)) {
                tracing::debug!(group, %date, roll = %entry.roll, "already recorded today");
                return Ok(false);
            }
            tracing::info!(group, %date, roll = %entry.roll, name = %entry.name, "attendance recorded");
            entries.push(entry);
            write_entries(&path, &entries)?;
            Ok(true)
        })
    }

    /// Remove the entry with this exact timestamp and roll.
    pub fn remove(
        &self,
        group: &str,
        date: NaiveDate,
        timestamp: DateTime<Utc>,
        roll: &str,
    ) -> Result<bool> {
        let path = self.path(group, date);
        self.locks.with(&path, || {
            let mut entries = read_entries(&path)?;
            let Some(idx) = entries
                .iter()
                .position(|e| e.timestamp == timestamp && e.roll == roll)
            else {
                return Ok(false);
            };
            let removed = entries.remove(idx);
            write_entries(&path, &entries)?;
            tracing::info!(group, %date, roll = %removed.roll, "attendance entry removed");
            Ok(true)
        })
    }

    /// Undo: remove the most recently appended entry.
    pub fn remove_last(&self, group: &str, date: NaiveDate) -> Result<Option<AttendanceEntry>> {
        let path = self.path(group, date);
        self.locks.with(&path, || {
            let mut entries = read_entries(&path)?;
            let Some(last) = entries.pop() else {
                return Ok(None);
            };
            write_entries(&path, &entries)?;
            tracing::info!(group, %date, roll = %last.roll, "last attendance entry undone");
            Ok(Some(last))
        })
    }

    /// Write the day's entries as `roll,name,timestamp,status` CSV to `out`.
    /// Returns the number of entries exported.
    pub fn export_csv(&self, group: &str, date: NaiveDate, out: &Path) -> Result<usize> {
        let entries = self.load(group, date)?;
        let mut rows = Vec::with_capacity(entries.len() + 1);
        rows.push(
            ["roll", "name", "timestamp", "status"]
                .map(String::from)
                .to_vec(),
        );
        for e in &entries {
            rows.push(vec![
                e.roll.clone(),
                e.name.clone(),
                e.timestamp.timestamp_millis().to_string(),
                e.status.clone(),
            ]);
        }
        write_atomic(out, &table::render_rows(&rows)?)?;
        tracing::info!(group, %date, count = entries.len(), path = %out.display(), "day exported");
        Ok(entries.len())
    }
}

fn read_entries(path: &Path) -> Result<Vec<AttendanceEntry>> {
    match read_optional(path)? {
        None => Ok(Vec::new()),
        Some(text) if text.trim().is_empty() => Ok(Vec::new()),
        Some(text) => serde_json::from_str(&text).map_err(|e| StoreError::corrupt(path, e)),
    }
}

fn write_entries(path: &Path, entries: &[AttendanceEntry]) -> Result<()> {
    let json = serde_json::to_vec_pretty(entries).map_err(|e| StoreError::corrupt(path, e))?;
    write_atomic(path, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store(dir: &Path) -> DailyRecordStore {
        DailyRecordStore::new(DataDir::new(dir), Arc::new(FileLocks::new()))
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_704_880_000_000 + ms).unwrap()
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(dir.path()).load("classX", day()).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_roll_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());

        assert!(s.append("classX", day(), AttendanceEntry::present("7_Alice", "classX", at(0))).unwrap());
        assert!(!s.append("classX", day(), AttendanceEntry::present("7_Alice", "classX", at(5))).unwrap());

        let entries = s.load("classX", day()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].roll, "7");
        assert_eq!(entries[0].timestamp, at(0));
    }

    #[test]
    fn test_days_and_groups_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let next = day().succ_opt().unwrap();

        assert!(s.append("classX", day(), AttendanceEntry::present("7_Alice", "classX", at(0))).unwrap());
        assert!(s.append("classX", next, AttendanceEntry::present("7_Alice", "classX", at(0))).unwrap());
        assert!(s.append("classY", day(), AttendanceEntry::present("7_Alice", "classY", at(0))).unwrap());
        assert_eq!(s.load("classX", day()).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_by_timestamp_and_roll() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.append("g", day(), AttendanceEntry::present("1_A", "g", at(1))).unwrap();
        s.append("g", day(), AttendanceEntry::present("2_B", "g", at(2))).unwrap();

        assert!(!s.remove("g", day(), at(2), "1").unwrap());
        assert!(s.remove("g", day(), at(1), "1").unwrap());

        let left = s.load("g", day()).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].roll, "2");
    }

    #[test]
    fn test_remove_last_undoes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.append("g", day(), AttendanceEntry::present("1_A", "g", at(1))).unwrap();
        s.append("g", day(), AttendanceEntry::present("2_B", "g", at(2))).unwrap();

        assert_eq!(s.remove_last("g", day()).unwrap().map(|e| e.roll), Some("2".into()));
        assert_eq!(s.remove_last("g", day()).unwrap().map(|e| e.roll), Some("1".into()));
        assert!(s.remove_last("g", day()).unwrap().is_none());
    }

    #[test]
    fn test_reads_minimal_legacy_records() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        std::fs::write(
            s.path("g", day()),
            r#"[{"roll":"3","name":"Cara","timestamp":1704880000000}]"#,
        )
        .unwrap();

        let entries = s.load("g", day()).unwrap();
        assert_eq!(entries[0].status, STATUS_PRESENT);
        assert_eq!(entries[0].timestamp, at(0));
        assert!(entries[0].identity.is_none());
    }

    #[test]
    fn test_corrupt_file_is_reported_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        std::fs::write(s.path("g", day()), "{not json").unwrap();

        let err = s
            .append("g", day(), AttendanceEntry::present("1_A", "g", at(0)))
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert!(!err.is_transient());
        assert_eq!(std::fs::read_to_string(s.path("g", day())).unwrap(), "{not json");
    }

    #[test]
    fn test_export_csv() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.append("g", day(), AttendanceEntry::present("7_Smith,_Al", "g", at(0))).unwrap();

        let out = dir.path().join("export.csv");
        assert_eq!(s.export_csv("g", day(), &out).unwrap(), 1);
        assert_eq!(
            std::fs::read_to_string(out).unwrap(),
            "roll,name,timestamp,status\n7,\"Smith, Al\",1704880000000,Present\n"
        );
    }
}
