//! Descriptive statistics over a window of entries.
//!
//! Functions here are pure: callers load the window through the repository
//! and pass the slice in.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::{Category, Entry, Mood, WeekId};

/// Slopes smaller than this (per day) count as flat.
pub const STABLE_SLOPE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

/// Clamp to the finite range so reports always serialize; NaN becomes zero.
pub(crate) fn saturate(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(f64::MIN, f64::MAX)
    }
}

impl MetricSummary {
    fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let sum = saturate(values.iter().sum());
        Some(Self {
            count: values.len(),
            sum,
            mean: saturate(sum / values.len() as f64),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayCount {
    pub date: NaiveDate,
    pub weekday: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyStatistics {
    pub week: WeekId,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub total_entries: usize,
    pub by_category: BTreeMap<Category, usize>,
    /// Monday through Sunday, always seven items.
    pub by_day: Vec<DayCount>,
    pub mood_distribution: BTreeMap<Mood, usize>,
    pub positive_rate: f64,
    /// Numeric metrics only, keyed by metric name.
    pub metrics_summary: BTreeMap<String, MetricSummary>,
}

/// Statistics for `week`. Entries outside the week are ignored.
pub fn weekly_statistics(entries: &[Entry], week: WeekId) -> WeeklyStatistics {
    let (start, end) = (week.monday(), week.sunday());
    let in_week: Vec<&Entry> = entries
        .iter()
        .filter(|e| e.date >= start && e.date <= end)
        .collect();

    let mut by_category = BTreeMap::new();
    let mut mood_distribution = BTreeMap::new();
    let mut metric_values: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for entry in &in_week {
        *by_category.entry(entry.category).or_insert(0) += 1;
        *mood_distribution.entry(entry.mood).or_insert(0) += 1;
        for (key, value) in &entry.metrics {
            if let Some(n) = value.as_number() {
                metric_values.entry(key.clone()).or_default().push(n);
            }
        }
    }

    let by_day = (0..7)
        .map(|offset| {
            let date = start + Duration::days(offset);
            DayCount {
                date,
                weekday: weekday_name(date).to_string(),
                count: in_week.iter().filter(|e| e.date == date).count(),
            }
        })
        .collect();

    let positive = mood_distribution.get(&Mood::Positive).copied().unwrap_or(0);

    WeeklyStatistics {
        week,
        start,
        end,
        total_entries: in_week.len(),
        by_category,
        by_day,
        mood_distribution,
        positive_rate: ratio(positive, in_week.len()),
        metrics_summary: metric_values
            .into_iter()
            .filter_map(|(key, values)| MetricSummary::from_values(&values).map(|s| (key, s)))
            .collect(),
    }
}

/// Rolling mean with a minimum of one period: the first values average over
/// however many points exist so far.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let from = (i + 1).saturating_sub(window);
            let slice = &values[from..=i];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Increasing => "increasing",
            Self::Decreasing => "decreasing",
            Self::Stable => "stable",
            Self::InsufficientData => "insufficient data",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearTrend {
    pub slope: f64,
    /// Coefficient of determination; 0 when the series is flat.
    pub r_squared: f64,
    pub direction: TrendDirection,
}

/// Least-squares line through `values` at x = 0, 1, 2, ...
pub fn linear_trend(values: &[f64]) -> LinearTrend {
    if values.len() < 2 {
        return LinearTrend {
            slope: 0.0,
            r_squared: 0.0,
            direction: TrendDirection::InsufficientData,
        };
    }

    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }
    let slope = saturate(sxy / sxx);
    let intercept = mean_y - slope * mean_x;

    let (mut ss_res, mut ss_tot) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let predicted = intercept + slope * i as f64;
        ss_res += (y - predicted).powi(2);
        ss_tot += (y - mean_y).powi(2);
    }
    let r_squared = if ss_tot > 0.0 {
        saturate(1.0 - ss_res / ss_tot)
    } else {
        0.0
    };

    let direction = if slope.abs() < STABLE_SLOPE {
        TrendDirection::Stable
    } else if slope > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    };

    LinearTrend {
        slope,
        r_squared,
        direction,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub value: f64,
    pub moving_avg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    /// Metric summed per day, or `None` for entry counts.
    pub metric: Option<String>,
    pub window_days: usize,
    pub daily: Vec<DailyPoint>,
    pub trend: LinearTrend,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

/// Trend of a daily series built from `entries`.
///
/// Only days that have entries form points. With `metric` set, each point is
/// that metric's sum for the day and days without the metric are skipped.
pub fn trend_analysis(entries: &[Entry], metric: Option<&str>, window: usize) -> TrendAnalysis {
    let mut per_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for entry in entries {
        match metric {
            None => *per_day.entry(entry.date).or_insert(0.0) += 1.0,
            Some(key) => {
                if let Some(n) = entry.metrics.get(key).and_then(|v| v.as_number()) {
                    *per_day.entry(entry.date).or_insert(0.0) += n;
                }
            }
        }
    }

    let values: Vec<f64> = per_day.values().copied().map(saturate).collect();
    let averages: Vec<f64> = moving_average(&values, window)
        .into_iter()
        .map(saturate)
        .collect();
    let summary = MetricSummary::from_values(&values);

    TrendAnalysis {
        metric: metric.map(str::to_string),
        window_days: window.max(1),
        daily: per_day
            .keys()
            .zip(values.iter().zip(averages))
            .map(|(date, (value, moving_avg))| DailyPoint {
                date: *date,
                value: *value,
                moving_avg,
            })
            .collect(),
        trend: linear_trend(&values),
        mean: summary.map_or(0.0, |s| s.mean),
        min: summary.map_or(0.0, |s| s.min),
        max: summary.map_or(0.0, |s| s.max),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountChange {
    pub previous: usize,
    pub current: usize,
    pub absolute: i64,
    /// Relative change in percent; 0 when the previous count is 0.
    pub percent: f64,
}

impl CountChange {
    pub fn new(previous: usize, current: usize) -> Self {
        let absolute = current as i64 - previous as i64;
        Self {
            previous,
            current,
            absolute,
            percent: if previous > 0 {
                absolute as f64 / previous as f64 * 100.0
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SumChange {
    pub previous: f64,
    pub current: f64,
    pub absolute: f64,
    pub percent: f64,
}

impl SumChange {
    fn new(previous: f64, current: f64) -> Self {
        let absolute = saturate(current - previous);
        Self {
            previous,
            current,
            absolute,
            percent: if previous > 0.0 {
                saturate(absolute / previous * 100.0)
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodComparison {
    pub previous: WeekId,
    pub current: WeekId,
    pub total_entries: CountChange,
    pub by_category: BTreeMap<Category, CountChange>,
    pub mood_distribution: BTreeMap<Mood, CountChange>,
    pub metrics: BTreeMap<String, SumChange>,
    pub more_entries: bool,
    pub more_positive: bool,
}

pub fn compare_periods(previous: &WeeklyStatistics, current: &WeeklyStatistics) -> PeriodComparison {
    let count = |map: &BTreeMap<Category, usize>, c: &Category| map.get(c).copied().unwrap_or(0);

    let categories: std::collections::BTreeSet<Category> = previous
        .by_category
        .keys()
        .chain(current.by_category.keys())
        .copied()
        .collect();
    let by_category = categories
        .into_iter()
        .map(|c| {
            (
                c,
                CountChange::new(count(&previous.by_category, &c), count(&current.by_category, &c)),
            )
        })
        .collect();

    let mood_distribution: BTreeMap<Mood, CountChange> = Mood::ALL
        .iter()
        .map(|m| {
            (
                *m,
                CountChange::new(
                    previous.mood_distribution.get(m).copied().unwrap_or(0),
                    current.mood_distribution.get(m).copied().unwrap_or(0),
                ),
            )
        })
        .collect();

    let metric_names: std::collections::BTreeSet<&String> = previous
        .metrics_summary
        .keys()
        .chain(current.metrics_summary.keys())
        .collect();
    let metrics = metric_names
        .into_iter()
        .map(|name| {
            let sum = |s: &WeeklyStatistics| s.metrics_summary.get(name).map_or(0.0, |m| m.sum);
            (name.clone(), SumChange::new(sum(previous), sum(current)))
        })
        .collect();

    let total_entries = CountChange::new(previous.total_entries, current.total_entries);
    let more_positive = mood_distribution
        .get(&Mood::Positive)
        .map_or(true, |c| c.absolute >= 0);

    PeriodComparison {
        previous: previous.week,
        current: current.week,
        more_entries: total_entries.absolute >= 0,
        total_entries,
        by_category,
        mood_distribution,
        metrics,
        more_positive,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub count: usize,
    pub categories: BTreeMap<Category, usize>,
    pub moods: BTreeMap<Mood, usize>,
}

/// One summary per day from `start` to `end` inclusive, empty days included.
pub fn daily_summary(entries: &[Entry], start: NaiveDate, end: NaiveDate) -> Vec<DailySummary> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|date| {
            let mut summary = DailySummary {
                date,
                count: 0,
                categories: BTreeMap::new(),
                moods: BTreeMap::new(),
            };
            for entry in entries.iter().filter(|e| e.date == date) {
                summary.count += 1;
                *summary.categories.entry(entry.category).or_insert(0) += 1;
                *summary.moods.entry(entry.mood).or_insert(0) += 1;
            }
            summary
        })
        .collect()
}

pub fn weekday_name(date: NaiveDate) -> &'static str {
    match date.weekday() {
        chrono::Weekday::Mon => "Monday",
        chrono::Weekday::Tue => "Tuesday",
        chrono::Weekday::Wed => "Wednesday",
        chrono::Weekday::Thu => "Thursday",
        chrono::Weekday::Fri => "Friday",
        chrono::Weekday::Sat => "Saturday",
        chrono::Weekday::Sun => "Sunday",
    }
}

pub(crate) fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{MetricValue, Metrics};

    pub(crate) fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    pub(crate) fn entry(day: &str, category: Category, mood: Mood, metrics: &[(&str, f64)]) -> Entry {
        let date = date(day);
        let timestamp = date.and_hms_opt(9, 0, 0).unwrap();
        let metrics: Metrics = metrics
            .iter()
            .map(|(k, v)| (k.to_string(), MetricValue::Number(*v)))
            .collect();
        Entry {
            id: 0,
            timestamp,
            date,
            raw_input: format!("{category} on {day}"),
            category,
            mood,
            metrics,
            note: None,
            created_at: timestamp,
        }
    }

    fn week(s: &str) -> WeekId {
        s.parse().unwrap()
    }

    #[test]
    fn weekly_statistics_counts_and_metrics() {
        // 2024-W10 runs 2024-03-04 .. 2024-03-10.
        let entries = vec![
            entry("2024-03-04", Category::Exercise, Mood::Positive, &[("distance_km", 5.0)]),
            entry("2024-03-06", Category::Exercise, Mood::Neutral, &[("distance_km", 3.0)]),
            entry("2024-03-06", Category::Study, Mood::Positive, &[("pages", 40.0)]),
            entry("2024-03-11", Category::Study, Mood::Negative, &[("pages", 10.0)]),
        ];
        let stats = weekly_statistics(&entries, week("2024-W10"));

        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.by_category[&Category::Exercise], 2);
        assert_eq!(stats.by_day.len(), 7);
        assert_eq!(stats.by_day[0].weekday, "Monday");
        assert_eq!(stats.by_day[2].count, 2);
        assert_eq!(stats.mood_distribution[&Mood::Positive], 2);
        assert!((stats.positive_rate - 2.0 / 3.0).abs() < 1e-9);

        let distance = stats.metrics_summary["distance_km"];
        assert_eq!(distance.count, 2);
        assert_eq!(distance.sum, 8.0);
        assert_eq!(distance.mean, 4.0);
        assert_eq!(distance.min, 3.0);
        assert_eq!(distance.max, 5.0);
        assert_eq!(stats.metrics_summary["pages"].sum, 40.0);
    }

    #[test]
    fn overflowing_metric_sums_stay_finite() {
        let entries = vec![
            entry("2024-03-04", Category::Exercise, Mood::Positive, &[("distance_km", 1e308)]),
            entry("2024-03-04", Category::Exercise, Mood::Positive, &[("distance_km", 1e308)]),
        ];
        let stats = weekly_statistics(&entries, week("2024-W10"));
        let distance = stats.metrics_summary["distance_km"];
        assert_eq!(distance.sum, f64::MAX);
        assert!(distance.mean.is_finite());

        let change = compare_periods(&weekly_statistics(&[], week("2024-W09")), &stats);
        assert!(change.metrics["distance_km"].absolute.is_finite());

        let trend = trend_analysis(&entries, Some("distance_km"), 7);
        assert_eq!(trend.daily[0].value, f64::MAX);
        assert!(trend.daily[0].moving_avg.is_finite());
        assert!(serde_json::to_string(&trend).unwrap().contains("1.7976931348623157e308"));
    }

    #[test]
    fn empty_week_has_seven_zero_days() {
        let stats = weekly_statistics(&[], week("2024-W10"));
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.positive_rate, 0.0);
        assert!(stats.by_day.iter().all(|d| d.count == 0));
    }

    #[test]
    fn moving_average_uses_min_periods_one() {
        let avg = moving_average(&[2.0, 4.0, 6.0, 8.0], 3);
        assert_eq!(avg, vec![2.0, 3.0, 4.0, 6.0]);
        assert_eq!(moving_average(&[1.0, 3.0], 0), vec![1.0, 3.0]);
        assert!(moving_average(&[], 7).is_empty());
    }

    #[test]
    fn linear_trend_directions() {
        let up = linear_trend(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(up.direction, TrendDirection::Increasing);
        assert!((up.slope - 1.0).abs() < 1e-9);
        assert!((up.r_squared - 1.0).abs() < 1e-9);

        assert_eq!(linear_trend(&[4.0, 2.0, 0.0]).direction, TrendDirection::Decreasing);

        let flat = linear_trend(&[3.0, 3.0, 3.0]);
        assert_eq!(flat.direction, TrendDirection::Stable);
        assert_eq!(flat.r_squared, 0.0);

        assert_eq!(linear_trend(&[5.0]).direction, TrendDirection::InsufficientData);
    }

    #[test]
    fn trend_analysis_sums_metric_per_day() {
        let entries = vec![
            entry("2024-03-01", Category::Exercise, Mood::Neutral, &[("distance_km", 2.0)]),
            entry("2024-03-01", Category::Exercise, Mood::Neutral, &[("distance_km", 1.0)]),
            entry("2024-03-02", Category::Exercise, Mood::Neutral, &[("duration_min", 30.0)]),
            entry("2024-03-03", Category::Exercise, Mood::Neutral, &[("distance_km", 6.0)]),
        ];

        let by_metric = trend_analysis(&entries, Some("distance_km"), 7);
        assert_eq!(by_metric.daily.len(), 2);
        assert_eq!(by_metric.daily[0].value, 3.0);
        assert_eq!(by_metric.daily[1].moving_avg, 4.5);
        assert_eq!(by_metric.trend.direction, TrendDirection::Increasing);
        assert_eq!(by_metric.max, 6.0);

        let by_count = trend_analysis(&entries, None, 7);
        assert_eq!(by_count.daily.len(), 3);
        assert_eq!(by_count.daily[0].value, 2.0);
        assert_eq!(by_count.metric, None);
    }

    #[test]
    fn compare_periods_reports_changes() {
        let previous = weekly_statistics(
            &[
                entry("2024-03-04", Category::Exercise, Mood::Positive, &[("distance_km", 4.0)]),
                entry("2024-03-05", Category::Exercise, Mood::Negative, &[]),
            ],
            week("2024-W10"),
        );
        let current = weekly_statistics(
            &[
                entry("2024-03-11", Category::Exercise, Mood::Positive, &[("distance_km", 6.0)]),
                entry("2024-03-12", Category::Study, Mood::Positive, &[]),
                entry("2024-03-13", Category::Study, Mood::Positive, &[]),
            ],
            week("2024-W11"),
        );

        let cmp = compare_periods(&previous, &current);
        assert_eq!(cmp.total_entries.absolute, 1);
        assert_eq!(cmp.total_entries.percent, 50.0);
        assert_eq!(cmp.by_category[&Category::Exercise].absolute, -1);
        assert_eq!(cmp.by_category[&Category::Study], CountChange::new(0, 2));
        assert_eq!(cmp.by_category[&Category::Study].percent, 0.0);
        assert_eq!(cmp.mood_distribution[&Mood::Positive].absolute, 2);
        assert_eq!(cmp.metrics["distance_km"].absolute, 2.0);
        assert_eq!(cmp.metrics["distance_km"].percent, 50.0);
        assert!(cmp.more_entries);
        assert!(cmp.more_positive);
    }

    #[test]
    fn daily_summary_fills_empty_days() {
        let entries = vec![
            entry("2024-03-01", Category::Sleep, Mood::Neutral, &[]),
            entry("2024-03-03", Category::Diet, Mood::Positive, &[]),
            entry("2024-03-03", Category::Diet, Mood::Negative, &[]),
        ];
        let days = daily_summary(&entries, date("2024-03-01"), date("2024-03-03"));
        assert_eq!(days.len(), 3);
        assert_eq!(days[1].count, 0);
        assert_eq!(days[2].count, 2);
        assert_eq!(days[2].categories[&Category::Diet], 2);
        assert_eq!(days[2].moods[&Mood::Negative], 1);
    }
}
