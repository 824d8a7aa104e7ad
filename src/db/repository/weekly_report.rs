use chrono::NaiveDateTime;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use super::super::DatabaseError;
use super::entry::{parse_datetime, DATETIME_FORMAT};
use crate::models::{WeekId, WeeklyReport};

pub fn get_weekly_report(
    conn: &Connection,
    week: &WeekId,
) -> Result<Option<WeeklyReport>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, week_iso, report_json, generated_at FROM weekly_reports WHERE week_iso = ?1",
            params![week.to_string()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    match row {
        None => Ok(None),
        Some((id, week_iso, report_json, generated_at)) => Ok(Some(WeeklyReport {
            id,
            week: week_iso
                .parse()
                .map_err(|e| DatabaseError::corrupt("weekly_reports", e))?,
            report_json,
            generated_at: parse_datetime(&generated_at)?,
        })),
    }
}

/// Insert a report for a week that has none yet. A second insert for the same
/// week is a constraint violation; use [`upsert_weekly_report`] to overwrite.
pub fn insert_weekly_report(
    conn: &Connection,
    week: &WeekId,
    report_json: &str,
    generated_at: NaiveDateTime,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO weekly_reports (week_iso, report_json, generated_at) VALUES (?1, ?2, ?3)",
        params![
            week.to_string(),
            report_json,
            generated_at.format(DATETIME_FORMAT).to_string()
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref err, _) if err.code == ErrorCode::ConstraintViolation => {
            DatabaseError::ConstraintViolation(format!("weekly report for {week} already exists"))
        }
        other => DatabaseError::Sqlite(other),
    })?;
    Ok(conn.last_insert_rowid())
}

pub fn upsert_weekly_report(
    conn: &Connection,
    week: &WeekId,
    report_json: &str,
    generated_at: NaiveDateTime,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO weekly_reports (week_iso, report_json, generated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(week_iso) DO UPDATE SET
            report_json = excluded.report_json,
            generated_at = excluded.generated_at",
        params![
            week.to_string(),
            report_json,
            generated_at.format(DATETIME_FORMAT).to_string()
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).unwrap()
    }

    fn week(s: &str) -> WeekId {
        s.parse().unwrap()
    }

    #[test]
    fn missing_report_is_none() {
        let conn = open_memory_database().unwrap();
        assert!(get_weekly_report(&conn, &week("2024-W10")).unwrap().is_none());
    }

    #[test]
    fn insert_then_get() {
        let conn = open_memory_database().unwrap();
        let w = week("2024-W10");
        insert_weekly_report(&conn, &w, r#"{"total":3}"#, ts("2024-03-10 20:00:00")).unwrap();

        let report = get_weekly_report(&conn, &w).unwrap().unwrap();
        assert_eq!(report.week, w);
        assert_eq!(report.report_json, r#"{"total":3}"#);
        assert_eq!(report.generated_at, ts("2024-03-10 20:00:00"));
    }

    #[test]
    fn duplicate_insert_is_constraint_violation() {
        let conn = open_memory_database().unwrap();
        let w = week("2024-W10");
        insert_weekly_report(&conn, &w, "{}", ts("2024-03-10 20:00:00")).unwrap();
        let err = insert_weekly_report(&conn, &w, "{}", ts("2024-03-11 20:00:00")).unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));
    }

    #[test]
    fn upsert_overwrites_single_row() {
        let conn = open_memory_database().unwrap();
        let w = week("2024-W10");
        upsert_weekly_report(&conn, &w, r#"{"v":1}"#, ts("2024-03-10 20:00:00")).unwrap();
        upsert_weekly_report(&conn, &w, r#"{"v":2}"#, ts("2024-03-11 20:00:00")).unwrap();

        let report = get_weekly_report(&conn, &w).unwrap().unwrap();
        assert_eq!(report.report_json, r#"{"v":2}"#);
        assert_eq!(report.generated_at, ts("2024-03-11 20:00:00"));

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM weekly_reports", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
