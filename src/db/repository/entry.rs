use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection};

use super::super::DatabaseError;
use crate::models::{Category, Entry, EntryStatistics, Metrics, Mood, NewEntry};

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ENTRY_COLUMNS: &str =
    "id, timestamp, date, raw_input, category, mood, metrics_json, note, created_at";

/// Optional window and category restriction shared by range and aggregate queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub category: Option<Category>,
}

impl EntryFilter {
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            category: None,
        }
    }

    pub fn with_category(mut self, category: Option<Category>) -> Self {
        self.category = category;
        self
    }
}

pub fn insert_entry(
    conn: &Connection,
    entry: &NewEntry,
    created_at: NaiveDateTime,
) -> Result<i64, DatabaseError> {
    let metrics_json = serde_json::to_string(&entry.metrics)
        .map_err(|e| DatabaseError::ConstraintViolation(format!("metrics not serializable: {e}")))?;
    conn.execute(
        "INSERT INTO entries (timestamp, date, raw_input, category, mood, metrics_json, note, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.timestamp.format(DATETIME_FORMAT).to_string(),
            entry.date().format(DATE_FORMAT).to_string(),
            entry.raw_input,
            entry.category.as_str(),
            entry.mood.as_str(),
            metrics_json,
            entry.note,
            created_at.format(DATETIME_FORMAT).to_string(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_entry(conn: &Connection, id: i64) -> Result<Option<Entry>, DatabaseError> {
    let mut stmt = conn.prepare(&format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?1"))?;
    let rows = stmt.query_map(params![id], entry_row)?;
    Ok(entry_rows_to_vec(rows)?.into_iter().next())
}

/// Entries recorded on `date`, oldest first.
pub fn get_entries_by_date(conn: &Connection, date: NaiveDate) -> Result<Vec<Entry>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM entries WHERE date = ?1 ORDER BY timestamp ASC, id ASC"
    ))?;
    let rows = stmt.query_map(params![date.format(DATE_FORMAT).to_string()], entry_row)?;
    entry_rows_to_vec(rows)
}

/// Entries matching the filter, both bounds inclusive, ordered by date then timestamp.
pub fn get_entries_in_range(
    conn: &Connection,
    filter: &EntryFilter,
) -> Result<Vec<Entry>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM entries
         WHERE (?1 IS NULL OR date >= ?1)
           AND (?2 IS NULL OR date <= ?2)
           AND (?3 IS NULL OR category = ?3)
         ORDER BY date ASC, timestamp ASC, id ASC"
    ))?;
    let [start, end, category] = filter_params(filter);
    let rows = stmt.query_map(params![start, end, category], entry_row)?;
    entry_rows_to_vec(rows)
}

/// The `limit` most recent entries, newest first.
pub fn get_recent_entries(
    conn: &Connection,
    limit: usize,
    category: Option<Category>,
) -> Result<Vec<Entry>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM entries
         WHERE (?1 IS NULL OR category = ?1)
         ORDER BY timestamp DESC, id DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(
        params![category.map(|c| c.as_str()), limit as i64],
        entry_row,
    )?;
    entry_rows_to_vec(rows)
}

pub fn get_categories(conn: &Connection) -> Result<Vec<Category>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT DISTINCT category FROM entries ORDER BY category")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut categories = Vec::new();
    for row in rows {
        categories.push(Category::from_str(&row?)?);
    }
    Ok(categories)
}

/// Counts grouped by category and by mood over the filtered window.
pub fn get_statistics(
    conn: &Connection,
    filter: &EntryFilter,
) -> Result<EntryStatistics, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT category, mood, COUNT(*) FROM entries
         WHERE (?1 IS NULL OR date >= ?1)
           AND (?2 IS NULL OR date <= ?2)
           AND (?3 IS NULL OR category = ?3)
         GROUP BY category, mood",
    )?;
    let [start, end, category] = filter_params(filter);
    let rows = stmt.query_map(params![start, end, category], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut stats = EntryStatistics::default();
    for row in rows {
        let (category, mood, count) = row?;
        let count = count as usize;
        stats.total_entries += count;
        *stats.by_category.entry(Category::from_str(&category)?).or_insert(0) += count;
        *stats.by_mood.entry(Mood::from_str(&mood)?).or_insert(0) += count;
    }
    Ok(stats)
}

fn filter_params(filter: &EntryFilter) -> [Option<String>; 3] {
    [
        filter.start.map(|d| d.format(DATE_FORMAT).to_string()),
        filter.end.map(|d| d.format(DATE_FORMAT).to_string()),
        filter.category.map(|c| c.as_str().to_string()),
    ]
}

type EntryRow = (
    i64,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
);

fn entry_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn entry_rows_to_vec(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<EntryRow>>,
) -> Result<Vec<Entry>, DatabaseError> {
    let mut entries = Vec::new();
    for row in rows {
        let (id, timestamp, date, raw_input, category, mood, metrics_json, note, created_at) = row?;
        let metrics: Metrics = serde_json::from_str(&metrics_json)
            .map_err(|e| DatabaseError::corrupt("entries", format!("entry {id} metrics: {e}")))?;
        entries.push(Entry {
            id,
            timestamp: parse_datetime(&timestamp)?,
            date: NaiveDate::parse_from_str(&date, DATE_FORMAT)
                .map_err(|e| DatabaseError::corrupt("entries", format!("entry {id} date: {e}")))?,
            raw_input,
            category: Category::from_str(&category)?,
            mood: Mood::from_str(&mood)?,
            metrics,
            note,
            created_at: parse_datetime(&created_at)?,
        });
    }
    Ok(entries)
}

pub(crate) fn parse_datetime(s: &str) -> Result<NaiveDateTime, DatabaseError> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .map_err(|e| DatabaseError::corrupt("entries", format!("datetime {s:?}: {e}")))
}

/// Count rows per calendar date in the window (used by streak detection).
pub fn count_entries_per_day(
    conn: &Connection,
    filter: &EntryFilter,
) -> Result<BTreeMap<NaiveDate, usize>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT date, COUNT(*) FROM entries
         WHERE (?1 IS NULL OR date >= ?1)
           AND (?2 IS NULL OR date <= ?2)
           AND (?3 IS NULL OR category = ?3)
         GROUP BY date ORDER BY date",
    )?;
    let [start, end, category] = filter_params(filter);
    let rows = stmt.query_map(params![start, end, category], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut counts = BTreeMap::new();
    for row in rows {
        let (date, count) = row?;
        let date = NaiveDate::parse_from_str(&date, DATE_FORMAT)
            .map_err(|e| DatabaseError::corrupt("entries", format!("date {date:?}: {e}")))?;
        counts.insert(date, count as usize);
    }
    Ok(counts)
}
