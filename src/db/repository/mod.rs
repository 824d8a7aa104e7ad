//! Repository layer: entity-scoped database operations.
//!
//! Free functions take a borrowed `Connection`; [`Repository`] wraps them so that
//! each operation opens its own connection and drops it on every exit path.

mod entry;
mod weekly_report;

pub use entry::*;
pub use weekly_report::*;

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime, SubsecRound};
use rusqlite::Connection;

use super::sqlite::{connect, open_database};
use super::DatabaseError;
use crate::models::{Category, Entry, EntryStatistics, NewEntry, WeekId, WeeklyReport};

/// Handle on the single storage file. Holds only the path; no pooled connection.
#[derive(Debug, Clone)]
pub struct Repository {
    path: PathBuf,
}

impl Repository {
    /// Create the file if needed, run migrations, and return a handle.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DatabaseError> {
        let path = path.into();
        open_database(&path)?;
        tracing::debug!(path = %path.display(), "Repository opened");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let conn = connect(&self.path)?;
        f(&conn)
    }

    /// Run `f` inside a transaction. Any error rolls back (the transaction is
    /// dropped uncommitted), so partial writes are never visible.
    fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let mut conn = connect(&self.path)?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn insert_entry(&self, entry: &NewEntry) -> Result<i64, DatabaseError> {
        let created_at = now();
        let id = self.with_transaction(|conn| insert_entry(conn, entry, created_at))?;
        tracing::info!(id, category = %entry.category, "Entry stored");
        Ok(id)
    }

    pub fn get_entry(&self, id: i64) -> Result<Option<Entry>, DatabaseError> {
        self.with_connection(|conn| get_entry(conn, id))
    }

    pub fn entries_on(&self, date: chrono::NaiveDate) -> Result<Vec<Entry>, DatabaseError> {
        self.with_connection(|conn| get_entries_by_date(conn, date))
    }

    pub fn entries_between(&self, filter: &EntryFilter) -> Result<Vec<Entry>, DatabaseError> {
        self.with_connection(|conn| get_entries_in_range(conn, filter))
    }

    pub fn recent_entries(
        &self,
        limit: usize,
        category: Option<Category>,
    ) -> Result<Vec<Entry>, DatabaseError> {
        self.with_connection(|conn| get_recent_entries(conn, limit, category))
    }

    pub fn categories(&self) -> Result<Vec<Category>, DatabaseError> {
        self.with_connection(get_categories)
    }

    pub fn statistics(&self, filter: &EntryFilter) -> Result<EntryStatistics, DatabaseError> {
        self.with_connection(|conn| get_statistics(conn, filter))
    }

    pub fn entries_per_day(
        &self,
        filter: &EntryFilter,
    ) -> Result<std::collections::BTreeMap<chrono::NaiveDate, usize>, DatabaseError> {
        self.with_connection(|conn| count_entries_per_day(conn, filter))
    }

    pub fn weekly_report(&self, week: &WeekId) -> Result<Option<WeeklyReport>, DatabaseError> {
        self.with_connection(|conn| get_weekly_report(conn, week))
    }

    pub fn insert_weekly_report(
        &self,
        week: &WeekId,
        report_json: &str,
        generated_at: NaiveDateTime,
    ) -> Result<i64, DatabaseError> {
        self.with_transaction(|conn| insert_weekly_report(conn, week, report_json, generated_at))
    }

    pub fn upsert_weekly_report(
        &self,
        week: &WeekId,
        report_json: &str,
        generated_at: NaiveDateTime,
    ) -> Result<(), DatabaseError> {
        self.with_transaction(|conn| upsert_weekly_report(conn, week, report_json, generated_at))
    }
}

/// Local wall-clock time at second precision, matching the stored format.
pub fn now() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(0)
}
