use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;

use super::{Agent, AgentError};
use crate::analysis::{
    save_report, window_start, Analyzer, ExportFormat, ReportFormat, ReportGenerator, Streaks,
    TrendAnalysis, WeekdayPatterns,
};
use crate::db::EntryFilter;
use crate::extraction::classify::matched_category;
use crate::models::{Category, WeekId};
use crate::validation::allowed_metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnalysisRoute {
    Pattern,
    Trend,
    Export,
    Report,
    Insights,
}

impl AnalysisRoute {
    /// Keyword routing on whole words. First match wins.
    pub fn for_request(text: &str) -> Self {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let any_prefix =
            |prefixes: &[&str]| words.iter().any(|w| prefixes.iter().any(|p| w.starts_with(p)));
        let any_word = |options: &[&str]| words.iter().any(|w| options.contains(w));

        if any_prefix(&["pattern", "weekday", "streak"]) || any_word(&["day", "days"]) {
            Self::Pattern
        } else if any_prefix(&["trend", "progress", "chang"]) {
            Self::Trend
        } else if any_word(&["export", "csv", "json"]) {
            Self::Export
        } else if any_word(&["report", "weekly"]) {
            Self::Report
        } else {
            Self::Insights
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub text: String,
    pub today: NaiveDate,
    /// Window length; the configured trend window when unset.
    pub weeks: Option<u32>,
    /// Destination for exports and saved reports.
    pub output: Option<PathBuf>,
}

impl AnalysisRequest {
    pub fn new(text: impl Into<String>, today: NaiveDate) -> Self {
        Self {
            text: text.into(),
            today,
            weeks: None,
            output: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResponse {
    pub route: AnalysisRoute,
    pub text: String,
    pub data: serde_json::Value,
    /// File written by the export and report routes.
    pub path: Option<PathBuf>,
}

pub struct AnalysisAgent {
    analyzer: Analyzer,
    reports: ReportGenerator,
    export_dir: PathBuf,
}

impl AnalysisAgent {
    pub fn new(
        analyzer: Analyzer,
        reports: ReportGenerator,
        export_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            analyzer,
            reports,
            export_dir: export_dir.into(),
        }
    }

    fn patterns(
        &self,
        req: &AnalysisRequest,
        weeks: u32,
        category: Option<Category>,
    ) -> Result<AnalysisResponse, AgentError> {
        let weekday = self.analyzer.weekday_patterns(req.today, weeks, category)?;
        let streaks = self.analyzer.streaks(req.today, weeks, category)?;
        Ok(AnalysisResponse {
            route: AnalysisRoute::Pattern,
            text: render_patterns(&weekday, &streaks, weeks),
            data: json!({ "weekday": weekday, "streaks": streaks }),
            path: None,
        })
    }

    fn trend(
        &self,
        req: &AnalysisRequest,
        weeks: u32,
        category: Option<Category>,
    ) -> Result<AnalysisResponse, AgentError> {
        let metric = metric_named_in(&req.text, category);
        let trend = self.analyzer.trend(req.today, weeks, category, metric)?;
        Ok(AnalysisResponse {
            route: AnalysisRoute::Trend,
            text: render_trend(&trend, weeks),
            data: json!(trend),
            path: None,
        })
    }

    fn export(
        &self,
        req: &AnalysisRequest,
        weeks: u32,
        category: Option<Category>,
    ) -> Result<AnalysisResponse, AgentError> {
        let format = if req.text.to_lowercase().contains("json") {
            ExportFormat::Json
        } else {
            ExportFormat::Csv
        };
        let extension = match format {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        };
        let path = req.output.clone().unwrap_or_else(|| {
            self.export_dir.join(format!("habits_{}.{extension}", req.today.format("%Y%m%d")))
        });
        let start = window_start(req.today, weeks)?;
        let filter = EntryFilter::between(start, req.today).with_category(category);
        let rows = self.analyzer.export(&filter, format, &path)?;
        Ok(AnalysisResponse {
            route: AnalysisRoute::Export,
            text: format!("Exported {rows} entries to {}", path.display()),
            data: json!({ "rows": rows, "format": format, "start": start, "end": req.today }),
            path: Some(path),
        })
    }

    fn report(&self, req: &AnalysisRequest) -> Result<AnalysisResponse, AgentError> {
        let report = self.reports.generate(WeekId::containing(req.today), false)?;
        let document = report.document()?;
        let path = match &req.output {
            Some(path) => {
                let format = match path.extension().and_then(|e| e.to_str()) {
                    Some("json") => ReportFormat::Json,
                    _ => ReportFormat::Markdown,
                };
                save_report(&report, path, format)?;
                Some(path.clone())
            }
            None => None,
        };
        Ok(AnalysisResponse {
            route: AnalysisRoute::Report,
            text: document.markdown.clone(),
            data: json!(document),
            path,
        })
    }

    fn insights(&self, req: &AnalysisRequest, weeks: u32) -> Result<AnalysisResponse, AgentError> {
        let insights = self.analyzer.insights(req.today, weeks)?;
        let mut text = format!("💡 {}", insights.summary);
        if !insights.recommendations.is_empty() {
            text.push_str("\n\nRecommendations:");
            for rec in &insights.recommendations {
                text.push_str(&format!("\n- {rec}"));
            }
        }
        Ok(AnalysisResponse {
            route: AnalysisRoute::Insights,
            text,
            data: json!(insights),
            path: None,
        })
    }
}

impl Agent for AnalysisAgent {
    type Input = AnalysisRequest;
    type Output = AnalysisResponse;

    fn name(&self) -> &'static str {
        "analysis"
    }

    fn execute(&self, input: AnalysisRequest) -> Result<AnalysisResponse, AgentError> {
        let route = AnalysisRoute::for_request(&input.text);
        let weeks = input
            .weeks
            .unwrap_or(self.analyzer.settings().trend_weeks)
            .max(1);
        let category = matched_category(&input.text.to_lowercase());
        let _span = tracing::info_span!("agent", agent = self.name(), ?route, weeks).entered();

        let response = match route {
            AnalysisRoute::Pattern => self.patterns(&input, weeks, category),
            AnalysisRoute::Trend => self.trend(&input, weeks, category),
            AnalysisRoute::Export => self.export(&input, weeks, category),
            AnalysisRoute::Report => self.report(&input),
            AnalysisRoute::Insights => self.insights(&input, weeks),
        }
        .inspect_err(|e| tracing::warn!(error = %e, "Analysis request failed"))?;

        tracing::info!(path = ?response.path, "Analysis complete");
        Ok(response)
    }
}

/// First metric whose name, or leading word, appears in the text.
fn metric_named_in(text: &str, category: Option<Category>) -> Option<&'static str> {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .collect();
    let categories: Vec<Category> = match category {
        Some(c) => vec![c],
        None => Category::ALL.to_vec(),
    };
    categories
        .into_iter()
        .filter_map(allowed_metrics)
        .flat_map(|metrics| metrics.iter().map(|(name, _)| *name))
        .find(|name| {
            let lead = name.split('_').next().unwrap_or(name);
            words.iter().any(|w| w == name || *w == lead)
        })
}

fn render_patterns(weekday: &WeekdayPatterns, streaks: &Streaks, weeks: u32) -> String {
    let mut lines = vec![format!("📅 Patterns over the last {weeks} week(s)")];
    if weekday.patterns.is_empty() {
        lines.push("- Not enough data for weekday patterns yet".to_string());
    } else {
        lines.extend(weekday.patterns.iter().map(|p| format!("- {p}")));
    }
    lines.push(format!(
        "- Average {:.1} entries per week",
        weekday.avg_entries_per_week
    ));
    lines.push(format!(
        "🔥 Current streak: {} day(s), longest: {} day(s)",
        streaks.current, streaks.longest
    ));
    lines.join("\n")
}

fn render_trend(trend: &TrendAnalysis, weeks: u32) -> String {
    let subject = trend
        .metric
        .as_deref()
        .map_or("Entries per day".to_string(), |m| m.replace('_', " "));
    if trend.daily.is_empty() {
        return format!("No entries in the last {weeks} week(s) to analyse.");
    }
    format!(
        "📈 {subject} over the last {weeks} week(s): {} (slope {:+.2}/day, R² {:.2}). \
         Mean {:.1}, range {:.1} to {:.1} across {} day(s).",
        trend.trend.direction.as_str(),
        trend.trend.slope,
        trend.trend.r_squared,
        trend.mean,
        trend.min,
        trend.max,
        trend.daily.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tests::seeded_analyzer;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn agent(dir: &tempfile::TempDir) -> AnalysisAgent {
        let analyzer = seeded_analyzer(dir);
        let reports = ReportGenerator::new(analyzer.clone());
        AnalysisAgent::new(analyzer, reports, dir.path().join("exports"))
    }

    #[test]
    fn routes_by_keyword_in_order() {
        let cases = [
            ("show my weekday patterns", AnalysisRoute::Pattern),
            ("which days am I most active", AnalysisRoute::Pattern),
            ("how long is my streak", AnalysisRoute::Pattern),
            ("what is my running trend", AnalysisRoute::Trend),
            ("show my progress", AnalysisRoute::Trend),
            ("export everything to csv", AnalysisRoute::Export),
            ("give me the weekly report", AnalysisRoute::Report),
            ("how am I doing", AnalysisRoute::Insights),
            ("monday", AnalysisRoute::Insights),
        ];
        for (text, expected) in cases {
            assert_eq!(AnalysisRoute::for_request(text), expected, "{text}");
        }
    }

    #[test]
    fn finds_metric_by_leading_word() {
        assert_eq!(metric_named_in("distance trend", Some(Category::Exercise)), Some("distance_km"));
        assert_eq!(metric_named_in("trend of duration_hr", None), Some("duration_hr"));
        assert_eq!(metric_named_in("overall trend", None), None);
    }

    #[test]
    fn trend_route_uses_mentioned_metric() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = AnalysisRequest::new("exercise distance trend", date("2024-03-10"));
        req.weeks = Some(2);
        let response = agent(&dir).execute(req).unwrap();

        assert_eq!(response.route, AnalysisRoute::Trend);
        assert_eq!(response.data["metric"], "distance_km");
        assert_eq!(response.data["daily"].as_array().unwrap().len(), 3);
        assert!(response.text.starts_with("📈 distance km over the last 2 week(s): increasing"));
    }

    #[test]
    fn pattern_route_reports_streaks() {
        let dir = tempfile::tempdir().unwrap();
        let response = agent(&dir)
            .execute(AnalysisRequest::new("streaks please", date("2024-03-07")))
            .unwrap();
        assert_eq!(response.route, AnalysisRoute::Pattern);
        assert_eq!(response.data["streaks"]["current"], 3);
        assert!(response.text.contains("Current streak: 3 day(s), longest: 3 day(s)"));
    }

    #[test]
    fn export_route_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = AnalysisRequest::new("export to json", date("2024-03-10"));
        req.weeks = Some(1);
        let response = agent(&dir).execute(req).unwrap();

        assert_eq!(response.route, AnalysisRoute::Export);
        let path = response.path.unwrap();
        assert_eq!(path, dir.path().join("exports").join("habits_20240310.json"));
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.as_array().unwrap().len(), 3);
        assert_eq!(response.text, format!("Exported 3 entries to {}", path.display()));
    }

    #[test]
    fn huge_week_count_fails_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = AnalysisRequest::new("export to csv", date("2024-03-10"));
        req.weeks = Some(u32::MAX);
        let err = agent(&dir).execute(req).unwrap_err();

        assert!(matches!(
            err,
            AgentError::Analysis(crate::analysis::AnalysisError::WindowOutOfRange { .. })
        ));
        assert!(err.user_message().contains("too far back"));
        assert!(!dir.path().join("exports").exists());
    }

    #[test]
    fn report_route_saves_when_output_given() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("week.md");
        let mut req = AnalysisRequest::new("weekly report", date("2024-03-07"));
        req.output = Some(out.clone());
        let response = agent(&dir).execute(req).unwrap();

        assert_eq!(response.route, AnalysisRoute::Report);
        assert_eq!(response.path.as_deref(), Some(out.as_path()));
        assert!(response.text.starts_with("# Weekly habit report 2024-W10"));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), response.text);
    }

    #[test]
    fn insights_is_the_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let response = agent(&dir)
            .execute(AnalysisRequest::new("how am I doing", date("2024-03-07")))
            .unwrap();
        assert_eq!(response.route, AnalysisRoute::Insights);
        assert!(response.text.starts_with("💡 "));
        assert!(response.data["streaks"]["longest"].as_u64().unwrap() >= 3);
    }
}
