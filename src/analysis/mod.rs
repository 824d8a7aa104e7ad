//! Statistics, patterns, weekly reports and export over stored entries.

pub mod export;
pub mod patterns;
pub mod report;
pub mod time_series;

pub use export::*;
pub use patterns::*;
pub use report::*;
pub use time_series::*;

use std::path::Path;

use chrono::{Days, NaiveDate};
use thiserror::Error;

use crate::config::AnalysisSettings;
use crate::db::{DatabaseError, EntryFilter, Repository};
use crate::models::{Category, Entry, WeekId};

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Database error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Cannot write {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("A {weeks}-week window ending {end} starts before the earliest supported date")]
    WindowOutOfRange { end: NaiveDate, weeks: u32 },
}

impl AnalysisError {
    pub(crate) fn io(path: &Path, e: std::io::Error) -> Self {
        AnalysisError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

/// First day of the `weeks`-week window ending on `end`, inclusive.
pub fn window_start(end: NaiveDate, weeks: u32) -> Result<NaiveDate, AnalysisError> {
    let days = u64::from(weeks.max(1)) * 7 - 1;
    end.checked_sub_days(Days::new(days))
        .ok_or(AnalysisError::WindowOutOfRange { end, weeks })
}

/// Repository-backed entry point for the pure analysis functions.
#[derive(Debug, Clone)]
pub struct Analyzer {
    repo: Repository,
    settings: AnalysisSettings,
}

impl Analyzer {
    pub fn new(repo: Repository, settings: AnalysisSettings) -> Self {
        Self { repo, settings }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    /// Entries in the `weeks`-week window ending on `end`, inclusive.
    pub fn window(
        &self,
        end: NaiveDate,
        weeks: u32,
        category: Option<Category>,
    ) -> Result<Vec<Entry>, AnalysisError> {
        let start = window_start(end, weeks)?;
        let filter = EntryFilter::between(start, end).with_category(category);
        Ok(self.repo.entries_between(&filter)?)
    }

    pub fn weekly_statistics(&self, week: WeekId) -> Result<WeeklyStatistics, AnalysisError> {
        let entries = self
            .repo
            .entries_between(&EntryFilter::between(week.monday(), week.sunday()))?;
        Ok(weekly_statistics(&entries, week))
    }

    pub fn compare_weeks(
        &self,
        previous: WeekId,
        current: WeekId,
    ) -> Result<PeriodComparison, AnalysisError> {
        Ok(compare_periods(
            &self.weekly_statistics(previous)?,
            &self.weekly_statistics(current)?,
        ))
    }

    pub fn trend(
        &self,
        end: NaiveDate,
        weeks: u32,
        category: Option<Category>,
        metric: Option<&str>,
    ) -> Result<TrendAnalysis, AnalysisError> {
        let entries = self.window(end, weeks, category)?;
        Ok(trend_analysis(&entries, metric, self.settings.moving_average_window))
    }

    pub fn daily_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        category: Option<Category>,
    ) -> Result<Vec<DailySummary>, AnalysisError> {
        let filter = EntryFilter::between(start, end).with_category(category);
        let entries = self.repo.entries_between(&filter)?;
        Ok(daily_summary(&entries, start, end))
    }

    pub fn weekday_patterns(
        &self,
        end: NaiveDate,
        weeks: u32,
        category: Option<Category>,
    ) -> Result<WeekdayPatterns, AnalysisError> {
        Ok(weekday_patterns(&self.window(end, weeks, category)?, weeks))
    }

    pub fn streaks(
        &self,
        end: NaiveDate,
        weeks: u32,
        category: Option<Category>,
    ) -> Result<Streaks, AnalysisError> {
        let entries = self.window(end, weeks, category)?;
        Ok(detect_streaks(entries.iter().map(|e| e.date), end))
    }

    pub fn correlations(&self, end: NaiveDate, weeks: u32) -> Result<Correlations, AnalysisError> {
        Ok(detect_correlations(&self.window(end, weeks, None)?))
    }

    pub fn insights(&self, end: NaiveDate, weeks: u32) -> Result<Insights, AnalysisError> {
        Ok(build_insights(&self.window(end, weeks, None)?, weeks, end))
    }

    /// Export entries matching `filter`. Returns the number of rows written.
    pub fn export(
        &self,
        filter: &EntryFilter,
        format: ExportFormat,
        path: &Path,
    ) -> Result<usize, AnalysisError> {
        let entries = self.repo.entries_between(filter)?;
        export_entries(&entries, format, path)
    }
}
