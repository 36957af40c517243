//! presence-store — Attendance persistence.
//!
//! Daily entry files, the per-group ledger table, enrolled vectors and the
//! roster seam. Every file is replaced whole under a per-path lock.

pub mod book;
pub mod daily;
pub mod error;
pub mod files;
pub mod layout;
pub mod ledger;
pub mod roster;
pub mod table;
pub mod vectors;

pub use book::{local_date, AttendanceBook, MarkOutcome};
pub use daily::{AttendanceEntry, DailyRecordStore};
pub use error::{Result, StoreError};
pub use files::FileLocks;
pub use layout::DataDir;
pub use ledger::{LedgerReconciler, LedgerTable};
pub use roster::{Roster, RosterFile};
pub use vectors::VectorStore;
