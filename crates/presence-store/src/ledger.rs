//! Cumulative per-group attendance table.
//!
//! One CSV file per group: a row per member ever on the roster, a `P`/`A`
//! column per synced date and an attendance percentage, followed by a blank
//! line and two summary rows. The whole file is regenerated on every sync.
//!
//! ```text
//! S.No.,Roll_No.,Full_Name,2024-01-10,2024-01-11,Attendance %
//! 1,1,Alice,P,P,100
//! 2,2,Bob,A,P,50
//!
//! ,,Total Present,1,2,
//! ,,Total Absent,1,0,
//! ```

use crate::daily::DailyRecordStore;
use crate::error::{Result, StoreError};
use crate::files::{read_optional, write_atomic, FileLocks};
use crate::layout::{DataDir, DATE_FORMAT};
use crate::roster::Roster;
use crate::table::{self, is_blank_member, Row};
use chrono::NaiveDate;
use presence_core::Identity;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

pub const SERIAL_HEADER: &str = "S.No.";
pub const ROLL_HEADER: &str = "Roll_No.";
pub const NAME_HEADER: &str = "Full_Name";
pub const PERCENT_HEADER: &str = "Attendance %";
pub const TOTAL_PRESENT: &str = "Total Present";
pub const TOTAL_ABSENT: &str = "Total Absent";

const SERIAL: usize = 0;
const ROLL: usize = 1;
const NAME: usize = 2;
const KEY_COLUMNS: usize = 3;

const PRESENT: &str = "P";
const ABSENT: &str = "A";

fn date_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date header pattern"))
}

pub fn is_date_header(cell: &str) -> bool {
    date_header_re().is_match(cell)
}

/// Synthetic summary rows carry their label in the name column.
pub fn is_summary_name(name: &str) -> bool {
    let n = name.trim();
    n.eq_ignore_ascii_case(TOTAL_PRESENT) || n.eq_ignore_ascii_case(TOTAL_ABSENT)
}

fn is_summary_row(row: &[String]) -> bool {
    row.get(NAME).is_some_and(|n| is_summary_name(n))
}

fn is_present(cell: &str) -> bool {
    cell.trim().eq_ignore_ascii_case(PRESENT)
}

fn default_header() -> Row {
    [SERIAL_HEADER, ROLL_HEADER, NAME_HEADER]
        .map(String::from)
        .to_vec()
}

fn canonical_header(cell: &str) -> String {
    match cell.trim() {
        "Roll" => ROLL_HEADER.to_string(),
        "Name" => NAME_HEADER.to_string(),
        _ => cell.to_string(),
    }
}

/// Integer percentage of `present` over `total`, rounded half to even.
/// Blank when there is nothing to count.
pub fn attendance_percent(present: usize, total: usize) -> String {
    if total == 0 {
        return String::new();
    }
    let scaled = present * 100;
    let mut pct = scaled / total;
    let twice_rem = (scaled % total) * 2;
    if twice_rem > total || (twice_rem == total && pct % 2 == 1) {
        pct += 1;
    }
    pct.to_string()
}

/// Roll ordering: numbers ascending, then everything else case-insensitively.
fn compare_rolls(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}

/// In-memory form of a group's ledger file.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerTable {
    header: Row,
    rows: Vec<Row>,
}

impl LedgerTable {
    /// Parse ledger text. Summary rows, blank rows and rows with fewer than
    /// three cells are dropped; a repeated (roll, name) keeps its first row.
    pub fn parse(text: &str) -> std::result::Result<Self, csv::Error> {
        let mut records = table::parse_rows(text)?.into_iter();
        let header: Row = match records.next() {
            Some(h) if !h.iter().all(|c| c.is_empty()) => {
                h.iter().map(|c| canonical_header(c)).collect()
            }
            _ => default_header(),
        };

        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for mut row in records {
            if row.len() < KEY_COLUMNS || is_summary_row(&row) || is_blank_member(&row) {
                continue;
            }
            if !seen.insert((row[ROLL].clone(), row[NAME].clone())) {
                continue;
            }
            if row.len() < header.len() {
                row.resize(header.len(), String::new());
            }
            rows.push(row);
        }
        Ok(Self { header, rows })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Indices of every `YYYY-MM-DD` column, left to right.
    pub fn date_columns(&self) -> Vec<usize> {
        self.header
            .iter()
            .enumerate()
            .filter(|(_, h)| is_date_header(h))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn dates(&self) -> Vec<&str> {
        self.date_columns()
            .into_iter()
            .map(|i| self.header[i].as_str())
            .collect()
    }

    fn widen_rows(&mut self) {
        let width = self.header.len();
        for row in &mut self.rows {
            if row.len() < width {
                row.resize(width, String::new());
            }
        }
    }

    fn insert_column(&mut self, at: usize, name: &str) {
        self.header.insert(at, name.to_string());
        for row in &mut self.rows {
            if row.len() >= at {
                row.insert(at, String::new());
            }
        }
        self.widen_rows();
    }

    fn ensure_percent_column(&mut self) -> usize {
        match self.column(PERCENT_HEADER) {
            Some(idx) => idx,
            None => {
                let at = self.header.len();
                self.insert_column(at, PERCENT_HEADER);
                at
            }
        }
    }

    /// Column for `date`, inserted just before the percentage column when
    /// new. Columns therefore follow first-sync order, not calendar order.
    fn ensure_date_column(&mut self, date: &str) -> usize {
        if let Some(idx) = self.column(date) {
            return idx;
        }
        let at = self.ensure_percent_column();
        self.insert_column(at, date);
        at
    }

    fn find_member(&self, roll: &str, name: &str) -> Option<usize> {
        self.rows
            .iter()
            .position(|r| r[ROLL] == roll && r[NAME] == name)
    }

    fn new_member_row(&self, member: &Identity) -> Row {
        let mut row = vec![String::new(); self.header.len()];
        row[ROLL] = member.roll.clone();
        row[NAME] = member.name.clone();
        row
    }

    /// Mark one day: roster members get `P` or `A` by `present`; members
    /// joining now get `A` for every earlier date; former members keep their
    /// history and default to `A` for the day.
    pub fn apply_day(
        &mut self,
        date: &str,
        roster: &[Identity],
        present: impl Fn(&Identity) -> bool,
    ) {
        self.ensure_percent_column();
        let col = self.ensure_date_column(date);
        let date_cols = self.date_columns();

        for member in roster {
            let mark = if present(member) { PRESENT } else { ABSENT };
            match self.find_member(&member.roll, &member.name) {
                Some(idx) => self.rows[idx][col] = mark.to_string(),
                None => {
                    let mut row = self.new_member_row(member);
                    for &di in &date_cols {
                        row[di] = ABSENT.to_string();
                    }
                    row[col] = mark.to_string();
                    tracing::debug!(roll = %member.roll, name = %member.name, "member added to ledger");
                    self.rows.push(row);
                }
            }
        }

        for row in &mut self.rows {
            if row[col].trim().is_empty() {
                row[col] = ABSENT.to_string();
            }
        }
    }

    /// Sort, renumber and recompute percentages.
    pub fn normalize(&mut self) {
        self.rows
            .sort_by(|a, b| compare_rolls(&a[ROLL], &b[ROLL]));
        for (i, row) in self.rows.iter_mut().enumerate() {
            row[SERIAL] = (i + 1).to_string();
        }

        let Some(pct_col) = self.column(PERCENT_HEADER) else {
            return;
        };
        let date_cols = self.date_columns();
        for row in &mut self.rows {
            let present = date_cols.iter().filter(|&&di| is_present(&row[di])).count();
            row[pct_col] = attendance_percent(present, date_cols.len());
        }
    }

    /// `Total Present` and `Total Absent` rows for the current data.
    pub fn summary_rows(&self) -> (Row, Row) {
        let width = self.header.len().max(KEY_COLUMNS);
        let mut total_present = vec![String::new(); width];
        let mut total_absent = vec![String::new(); width];
        total_present[NAME] = TOTAL_PRESENT.to_string();
        total_absent[NAME] = TOTAL_ABSENT.to_string();

        for di in self.date_columns() {
            let present = self
                .rows
                .iter()
                .filter(|r| r.get(di).is_some_and(|c| is_present(c)))
                .count();
            total_present[di] = present.to_string();
            total_absent[di] = (self.rows.len() - present).to_string();
        }
        (total_present, total_absent)
    }

    /// Header, rows, a blank line, then the two summary rows.
    pub fn render(&self) -> std::result::Result<Vec<u8>, csv::Error> {
        let mut body = Vec::with_capacity(self.rows.len() + 1);
        body.push(self.header.clone());
        body.extend(self.rows.iter().cloned());
        let mut out = table::render_rows(&body)?;

        out.push(b'\n');

        let (present, absent) = self.summary_rows();
        out.extend(table::render_rows(&[present, absent])?);
        Ok(out)
    }
}

/// Keeps each group's ledger file in step with its roster and daily records.
pub struct LedgerReconciler {
    dir: DataDir,
    locks: Arc<FileLocks>,
    daily: DailyRecordStore,
    roster: Arc<dyn Roster>,
}

impl LedgerReconciler {
    pub fn new(
        dir: DataDir,
        locks: Arc<FileLocks>,
        daily: DailyRecordStore,
        roster: Arc<dyn Roster>,
    ) -> Self {
        Self {
            dir,
            locks,
            daily,
            roster,
        }
    }

    pub fn path(&self, group: &str) -> PathBuf {
        self.dir.ledger_file(group)
    }

    fn roster_members(&self, group: &str) -> Result<Vec<Identity>> {
        Ok(self
            .roster
            .members(group)?
            .iter()
            .map(|id| Identity::parse(id))
            .collect())
    }

    pub fn load(&self, group: &str) -> Result<Option<LedgerTable>> {
        let path = self.path(group);
        self.locks.with(&path, || {
            read_optional(&path)?
                .map(|text| LedgerTable::parse(&text).map_err(|e| StoreError::corrupt(&path, e)))
                .transpose()
        })
    }

    /// Merge the day's entries for `group` into its ledger.
    ///
    /// On error the previous file is left untouched. Running it again with
    /// no new entries rewrites identical bytes.
    pub fn sync(&self, group: &str, date: NaiveDate) -> Result<LedgerTable> {
        let path = self.path(group);
        let date_str = date.format(DATE_FORMAT).to_string();
        let roster = self.roster_members(group)?;

        self.locks.with(&path, || {
            let mut ledger = match read_optional(&path)? {
                Some(text) => {
                    LedgerTable::parse(&text).map_err(|e| StoreError::corrupt(&path, e))?
                }
                None => LedgerTable {
                    header: default_header(),
                    rows: Vec::new(),
                },
            };

            let entries = self.daily.load(group, date)?;
            ledger.apply_day(&date_str, &roster, |member| {
                entries
                    .iter()
                    .any(|e| e.same_member(&member.roll, &member.name))
            });
            ledger.normalize();

            write_atomic(&path, &ledger.render()?)?;
            tracing::info!(
                group,
                date = %date_str,
                members = ledger.rows.len(),
                present = entries.len(),
                "ledger synced"
            );
            Ok(ledger)
        })
    }

    /// Make sure every roster member has a row, without touching any data.
    ///
    /// Creates the file (header plus roster, blank percentages) when absent
    /// or empty. Returns whether the file was written.
    pub fn ensure_roster_present(&self, group: &str) -> Result<bool> {
        let path = self.path(group);
        let roster = self.roster_members(group)?;

        self.locks.with(&path, || {
            let records = match read_optional(&path)? {
                Some(text) => table::parse_rows(&text).map_err(|e| StoreError::corrupt(&path, e))?,
                None => Vec::new(),
            };

            let mut records = records.into_iter();
            let Some(header) = records.next() else {
                let mut header = default_header();
                header.push(PERCENT_HEADER.to_string());
                let mut rows = vec![header];
                for (i, member) in roster.iter().enumerate() {
                    rows.push(vec![
                        (i + 1).to_string(),
                        member.roll.clone(),
                        member.name.clone(),
                        String::new(),
                    ]);
                }
                write_atomic(&path, &table::render_rows(&rows)?)?;
                tracing::info!(group, members = roster.len(), "ledger created from roster");
                return Ok(true);
            };

            let mut rows: Vec<Row> = records
                .filter(|r| r.len() >= KEY_COLUMNS && !is_summary_row(r) && !is_blank_member(r))
                .collect();
            let existing: HashSet<(String, String)> = rows
                .iter()
                .map(|r| (r[ROLL].clone(), r[NAME].clone()))
                .collect();

            let mut added = 0;
            for member in &roster {
                if existing.contains(&(member.roll.clone(), member.name.clone())) {
                    continue;
                }
                let mut row = vec![String::new(); header.len().max(KEY_COLUMNS)];
                row[ROLL] = member.roll.clone();
                row[NAME] = member.name.clone();
                rows.push(row);
                added += 1;
            }
            if added == 0 {
                return Ok(false);
            }

            let mut out = Vec::with_capacity(rows.len() + 1);
            out.push(header.clone());
            for (i, mut row) in rows.into_iter().enumerate() {
                if row.len() < header.len() {
                    row.resize(header.len(), String::new());
                }
                row[SERIAL] = (i + 1).to_string();
                out.push(row);
            }
            write_atomic(&path, &table::render_rows(&out)?)?;
            tracing::info!(group, added, "roster members added to ledger");
            Ok(true)
        })
    }

    /// Delete a member's row. Other rows keep their history; stray summary
    /// and blank rows are dropped. Returns whether a row was removed.
    pub fn remove_member(&self, group: &str, identity: &str) -> Result<bool> {
        let path = self.path(group);
        let member = Identity::parse(identity);

        self.locks.with(&path, || {
            let Some(text) = read_optional(&path)? else {
                return Ok(false);
            };
            let mut records = table::parse_rows(&text)
                .map_err(|e| StoreError::corrupt(&path, e))?
                .into_iter();
            let Some(header) = records.next() else {
                return Ok(false);
            };

            let mut removed = false;
            let mut out = vec![header];
            for row in records {
                if row.len() >= KEY_COLUMNS && row[ROLL] == member.roll && row[NAME] == member.name {
                    removed = true;
                    continue;
                }
                if is_summary_row(&row) || is_blank_member(&row) {
                    continue;
                }
                out.push(row);
            }

            write_atomic(&path, &table::render_rows(&out)?)?;
            tracing::info!(group, identity, removed, "member removed from ledger");
            Ok(removed)
        })
    }
}
