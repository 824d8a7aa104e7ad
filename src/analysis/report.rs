//! Weekly report assembly, caching and rendering.

use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::patterns::{build_insights, Insights};
use super::time_series::{
    compare_periods, trend_analysis, weekly_statistics, PeriodComparison, TrendAnalysis,
    TrendDirection, WeeklyStatistics,
};
use super::{AnalysisError, Analyzer};
use crate::config::Settings;
use crate::db::now;
use crate::llm::{CompletionApi, CompletionRequest, Operation};
use crate::models::{Mood, WeekId};

const NARRATIVE_SYSTEM_PROMPT: &str = "You are a supportive habit coach. \
Write in plain, friendly English using Markdown.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub week: WeekId,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub statistics: WeeklyStatistics,
    pub comparison: PeriodComparison,
    pub trend: TrendAnalysis,
    pub insights: Insights,
    pub narrative: Option<String>,
    /// Why the narrative is missing when one was requested.
    pub narrative_error: Option<String>,
    pub markdown: String,
    pub generated_at: NaiveDateTime,
}

/// A report as stored: the serialized document plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedReport {
    pub week: WeekId,
    pub json: String,
    pub from_cache: bool,
}

impl GeneratedReport {
    pub fn document(&self) -> Result<ReportDocument, AnalysisError> {
        serde_json::from_str(&self.json).map_err(|e| AnalysisError::Serialization(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Markdown,
    Json,
}

impl FromStr for ReportFormat {
    type Err = AnalysisError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "md" | "markdown" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            other => Err(AnalysisError::UnsupportedFormat(other.to_string())),
        }
    }
}

pub struct ReportGenerator {
    analyzer: Analyzer,
    narrator: Option<(Arc<dyn CompletionApi>, String)>,
    aggregations: AtomicUsize,
}

impl ReportGenerator {
    /// Generator without a narrative section.
    pub fn new(analyzer: Analyzer) -> Self {
        Self {
            analyzer,
            narrator: None,
            aggregations: AtomicUsize::new(0),
        }
    }

    pub fn with_narrative(mut self, llm: Arc<dyn CompletionApi>, model: impl Into<String>) -> Self {
        self.narrator = Some((llm, model.into()));
        self
    }

    pub fn from_settings(
        analyzer: Analyzer,
        llm: Option<Arc<dyn CompletionApi>>,
        settings: &Settings,
    ) -> Self {
        let generator = Self::new(analyzer);
        match llm {
            Some(llm) if settings.analysis.narrative => {
                generator.with_narrative(llm, settings.llm.report_model.clone())
            }
            _ => generator,
        }
    }

    /// Aggregation passes run so far. Cache hits do not count.
    pub fn aggregation_count(&self) -> usize {
        self.aggregations.load(Ordering::SeqCst)
    }

    /// Report for `week`, from cache unless `force` is set.
    ///
    /// A cached report is returned byte for byte. Forced regeneration replaces
    /// the stored report.
    pub fn generate(&self, week: WeekId, force: bool) -> Result<GeneratedReport, AnalysisError> {
        let _span = tracing::info_span!("weekly_report", week = %week, force).entered();
        let repo = self.analyzer.repository();

        if !force {
            if let Some(cached) = repo.weekly_report(&week)? {
                tracing::info!("Weekly report served from cache");
                return Ok(GeneratedReport {
                    week,
                    json: cached.report_json,
                    from_cache: true,
                });
            }
        }

        let document = self.build_document(week)?;
        let json = serde_json::to_string(&document)
            .map_err(|e| AnalysisError::Serialization(e.to_string()))?;

        if force {
            repo.upsert_weekly_report(&week, &json, document.generated_at)?;
        } else {
            repo.insert_weekly_report(&week, &json, document.generated_at)?;
        }
        tracing::info!(
            total_entries = document.statistics.total_entries,
            narrative = document.narrative.is_some(),
            "Weekly report generated"
        );

        Ok(GeneratedReport {
            week,
            json,
            from_cache: false,
        })
    }

    /// One aggregation pass. Streaks and insights use the week's Sunday as
    /// the reference day so a past week always renders the same figures.
    pub fn build_document(&self, week: WeekId) -> Result<ReportDocument, AnalysisError> {
        self.aggregations.fetch_add(1, Ordering::SeqCst);
        let settings = self.analyzer.settings();
        let end = week.sunday();

        // Current and previous week in one read.
        let fortnight = self.analyzer.window(end, 2, None)?;
        let statistics = weekly_statistics(&fortnight, week);
        let previous_stats = weekly_statistics(&fortnight, week.previous());
        let trend_entries = self.analyzer.window(end, settings.trend_weeks, None)?;

        let comparison = compare_periods(&previous_stats, &statistics);
        let trend = trend_analysis(&trend_entries, None, settings.moving_average_window);
        let insights = build_insights(&trend_entries, settings.trend_weeks, end);

        let mut document = ReportDocument {
            week,
            period_start: week.monday(),
            period_end: end,
            statistics,
            comparison,
            trend,
            insights,
            narrative: None,
            narrative_error: None,
            markdown: String::new(),
            generated_at: now(),
        };

        if let Some((llm, model)) = &self.narrator {
            match request_narrative(llm.as_ref(), model, &document) {
                Ok(text) => document.narrative = Some(text),
                Err(reason) => {
                    tracing::warn!(error = %reason, "Report narrative unavailable");
                    document.narrative_error = Some(reason);
                }
            }
        }

        document.markdown = render_markdown(&document);
        Ok(document)
    }
}

fn request_narrative(
    llm: &dyn CompletionApi,
    model: &str,
    document: &ReportDocument,
) -> Result<String, String> {
    let summary = serde_json::json!({
        "week": document.week,
        "total_entries": document.statistics.total_entries,
        "by_category": document.statistics.by_category,
        "positive_rate": document.statistics.positive_rate,
        "change_vs_previous_week": document.comparison.total_entries.absolute,
        "trend": document.trend.trend.direction,
        "current_streak": document.insights.streaks.current,
        "patterns": document.insights.weekday.patterns.iter().take(3).collect::<Vec<_>>(),
        "recommendations": document.insights.recommendations.iter().take(3).collect::<Vec<_>>(),
    });
    let prompt = format!(
        "Here is one week of habit-tracking data:\n{summary:#}\n\n\
         Write two short sections:\n\
         1. **Insight** (80-120 words): a non-obvious observation connecting the data points.\n\
         2. **Suggestions**: 2-3 concrete, encouraging actions, one per line.\n\
         Keep the whole reply under 250 words."
    );

    let request = CompletionRequest::new(Operation::Report, model, NARRATIVE_SYSTEM_PROMPT, prompt)
        .with_max_tokens(600);
    let completion = llm.complete(&request).map_err(|e| e.to_string())?;
    let text = completion.text.trim();
    if text.is_empty() {
        Err("empty narrative".to_string())
    } else {
        Ok(text.to_string())
    }
}

pub fn render_markdown(doc: &ReportDocument) -> String {
    let stats = &doc.statistics;
    let mut lines = vec![
        format!("# Weekly habit report {}", doc.week),
        format!("**Period**: {} to {}", doc.period_start, doc.period_end),
        format!("**Generated**: {}", doc.generated_at.format("%Y-%m-%d %H:%M")),
        String::new(),
        "## Overview".to_string(),
        format!("Total entries: **{}**", stats.total_entries),
    ];

    let change = &doc.comparison.total_entries;
    if change.previous > 0 {
        lines.push(format!(
            "Compared with {}: {:+} entries ({:+.0}%)",
            doc.comparison.previous, change.absolute, change.percent
        ));
    } else {
        lines.push(format!("Compared with {}: {:+} entries", doc.comparison.previous, change.absolute));
    }
    lines.push(String::new());

    if stats.total_entries > 0 {
        lines.push("### By category".to_string());
        let mut categories: Vec<_> = stats.by_category.iter().collect();
        categories.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (category, count) in categories {
            lines.push(format!("- **{category}**: {count}"));
        }
        lines.push(String::new());

        lines.push("### Mood".to_string());
        for mood in Mood::ALL {
            let count = stats.mood_distribution.get(mood).copied().unwrap_or(0);
            lines.push(format!("- {} {mood}: {count}", mood.emoji()));
        }
        lines.push(String::new());

        if !stats.metrics_summary.is_empty() {
            lines.push("### Metrics".to_string());
            for (name, m) in &stats.metrics_summary {
                lines.push(format!(
                    "- {}: total {:.1}, average {:.1} ({} entries)",
                    name.replace('_', " "),
                    m.sum,
                    m.mean,
                    m.count
                ));
            }
            lines.push(String::new());
        }
    }

    lines.push("## Patterns".to_string());
    let mut findings: Vec<&String> = doc.insights.weekday.patterns.iter().take(5).collect();
    findings.extend(doc.insights.correlations.findings.iter().take(3));
    if findings.is_empty() {
        lines.push("Not enough data yet. Keep recording to discover patterns.".to_string());
    } else {
        for (i, finding) in findings.iter().enumerate() {
            lines.push(format!("{}. {finding}", i + 1));
        }
    }
    lines.push(String::new());

    lines.push("## Streaks".to_string());
    let streaks = &doc.insights.streaks;
    if streaks.current > 0 {
        lines.push(format!("- Current streak: **{}** days", streaks.current));
    }
    if streaks.longest > 0 {
        lines.push(format!("- Longest streak: **{}** days", streaks.longest));
    } else {
        lines.push("No streak yet. Start one today!".to_string());
    }
    lines.push(String::new());

    lines.push("## Trend".to_string());
    let trend = &doc.trend;
    if trend.trend.direction == TrendDirection::InsufficientData {
        lines.push("Not enough data to analyse the trend.".to_string());
    } else {
        let strength = match trend.trend.r_squared {
            r if r > 0.7 => "strong",
            r if r > 0.3 => "moderate",
            _ => "weak",
        };
        lines.push(format!("- Direction: {}", trend.trend.direction.as_str()));
        lines.push(format!("- Strength: {strength} (R² {:.2})", trend.trend.r_squared));
        lines.push(format!(
            "- Entries per active day: mean {:.2}, min {:.0}, max {:.0}",
            trend.mean, trend.min, trend.max
        ));
    }
    lines.push(String::new());

    lines.push("## Recommendations".to_string());
    if doc.insights.recommendations.is_empty() {
        lines.push("Keep it up, and record more to get personalised suggestions.".to_string());
    } else {
        for (i, rec) in doc.insights.recommendations.iter().take(5).enumerate() {
            lines.push(format!("{}. {rec}", i + 1));
        }
    }
    lines.push(String::new());

    if let Some(narrative) = &doc.narrative {
        lines.push("## Coach's notes".to_string());
        lines.push(narrative.clone());
        lines.push(String::new());
    }

    lines.push("---".to_string());
    lines.push("*Generated by Trackit*".to_string());
    lines.join("\n")
}

/// Write a report as Markdown or pretty JSON. Returns bytes written.
pub fn save_report(
    report: &GeneratedReport,
    path: &Path,
    format: ReportFormat,
) -> Result<usize, AnalysisError> {
    let document = report.document()?;
    let body = match format {
        ReportFormat::Markdown => document.markdown,
        ReportFormat::Json => serde_json::to_string_pretty(&document)
            .map_err(|e| AnalysisError::Serialization(e.to_string()))?,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| AnalysisError::io(path, e))?;
    }
    std::fs::write(path, &body).map_err(|e| AnalysisError::io(path, e))?;
    tracing::info!(path = %path.display(), ?format, "Report saved");
    Ok(body.len())
}
