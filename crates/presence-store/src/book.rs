//! One handle over every store in a data directory.

use crate::daily::{AttendanceEntry, DailyRecordStore};
use crate::error::{Result, StoreError};
use crate::files::FileLocks;
use crate::layout::{safe_group_name, DataDir};
use crate::ledger::LedgerReconciler;
use crate::roster::Roster;
use crate::vectors::VectorStore;
use chrono::{DateTime, Local, NaiveDate, Utc};
use presence_core::{RecognitionSession, SessionConfig};
use std::path::Path;
use std::sync::Arc;

/// Calendar day an instant falls on, in local time.
pub fn local_date(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&Local).date_naive()
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkOutcome {
    Marked(AttendanceEntry),
    AlreadyMarked,
}

impl MarkOutcome {
    pub fn is_marked(&self) -> bool {
        matches!(self, MarkOutcome::Marked(_))
    }
}

pub struct AttendanceBook {
    dir: DataDir,
    daily: DailyRecordStore,
    ledger: LedgerReconciler,
    vectors: VectorStore,
    roster: Arc<dyn Roster>,
}

impl AttendanceBook {
    /// Open the stores under `dir`. Every book in the process shares the
    /// same lock registry, so two books on one directory do not race.
    pub fn open(dir: DataDir, roster: Arc<dyn Roster>) -> Self {
        let locks = FileLocks::shared();
        let daily = DailyRecordStore::new(dir.clone(), Arc::clone(&locks));
        let ledger = LedgerReconciler::new(
            dir.clone(),
            Arc::clone(&locks),
            daily.clone(),
            Arc::clone(&roster),
        );
        let vectors = VectorStore::new(dir.vectors_file(), locks);
        Self {
            dir,
            daily,
            ledger,
            vectors,
            roster,
        }
    }

    pub fn dir(&self) -> &DataDir {
        &self.dir
    }

    pub fn daily(&self) -> &DailyRecordStore {
        &self.daily
    }

    pub fn ledger(&self) -> &LedgerReconciler {
        &self.ledger
    }

    pub fn vectors(&self) -> &VectorStore {
        &self.vectors
    }

    pub fn roster(&self) -> &dyn Roster {
        self.roster.as_ref()
    }

    /// Fresh session for `group`, enrolled with its roster members' vectors
    /// in roster order.
    pub fn session(&self, group: &str, config: SessionConfig) -> Result<RecognitionSession> {
        self.check_group(group)?;
        let members = self.roster.members(group)?;
        let mut session = RecognitionSession::new(group, config);
        let loaded = self.vectors.load_into(session.engine_mut(), &members)?;
        tracing::info!(
            group,
            members = members.len(),
            enrolled = loaded,
            "recognition session ready"
        );
        Ok(session)
    }

    /// Record `identity` present in `group` on `date`, then bring the ledger
    /// up to date.
    ///
    /// A failed ledger sync is logged and does not undo the mark; the next
    /// successful sync for the day catches up.
    pub fn mark(
        &self,
        group: &str,
        identity: &str,
        date: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<MarkOutcome> {
        self.check_group(group)?;
        let entry = AttendanceEntry::present(identity, group, at);
        if !self.daily.append(group, date, entry.clone())? {
            return Ok(MarkOutcome::AlreadyMarked);
        }
        self.sync_quietly(group, date);
        Ok(MarkOutcome::Marked(entry))
    }

    /// Remove the day's most recent entry and resync.
    pub fn undo(&self, group: &str, date: NaiveDate) -> Result<Option<AttendanceEntry>> {
        self.check_group(group)?;
        let removed = self.daily.remove_last(group, date)?;
        if removed.is_some() {
            self.sync_quietly(group, date);
        }
        Ok(removed)
    }

    /// Remove one entry by timestamp and roll, then resync.
    pub fn remove_entry(
        &self,
        group: &str,
        date: NaiveDate,
        timestamp: DateTime<Utc>,
        roll: &str,
    ) -> Result<bool> {
        self.check_group(group)?;
        let removed = self.daily.remove(group, date, timestamp, roll)?;
        if removed {
            self.sync_quietly(group, date);
        }
        Ok(removed)
    }

    pub fn entries(&self, group: &str, date: NaiveDate) -> Result<Vec<AttendanceEntry>> {
        self.check_group(group)?;
        self.daily.load(group, date)
    }

    /// Add any roster members missing from the group's ledger.
    pub fn ensure_roster_present(&self, group: &str) -> Result<bool> {
        self.check_group(group)?;
        self.ledger.ensure_roster_present(group)
    }

    /// Write the day's entries to `out` as CSV.
    pub fn export_day(&self, group: &str, date: NaiveDate, out: &Path) -> Result<usize> {
        self.check_group(group)?;
        self.daily.export_csv(group, date, out)
    }

    /// Drop a member from the group's ledger and, with `forget_vectors`,
    /// their enrolled samples too.
    pub fn remove_member(&self, group: &str, identity: &str, forget_vectors: bool) -> Result<bool> {
        self.check_group(group)?;
        let removed = self.ledger.remove_member(group, identity)?;
        if forget_vectors {
            self.vectors.remove(identity)?;
        }
        Ok(removed)
    }

    /// Refuse a group whose file names would be shared with another roster
    /// group, e.g. `Class X` and `Class_X`.
    pub fn check_group(&self, group: &str) -> Result<()> {
        let file = safe_group_name(group);
        for other in self.roster.groups()? {
            if other != group && safe_group_name(&other) == file {
                return Err(StoreError::GroupCollision {
                    group: group.to_string(),
                    other,
                    file,
                });
            }
        }
        Ok(())
    }

    fn sync_quietly(&self, group: &str, date: NaiveDate) {
        if let Err(err) = self.ledger.sync(group, date) {
            tracing::warn!(
                group,
                %date,
                error = %err,
                transient = err.is_transient(),
                "ledger sync failed; ledger left unchanged"
            );
        }
    }
}
