//! Categorical pattern detection: weekday skew, streaks, correlations.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::time_series::{ratio, weekday_name};
use crate::models::{Category, Entry, Mood};

/// Minimum gap in positive rate before best/worst mood days are reported.
const MOOD_SPREAD: f64 = 0.1;
const CORRELATION_MIN_ENTRIES: usize = 3;
const CORRELATION_MIN_RATE: f64 = 0.7;
const CO_OCCURRENCE_MIN_DAYS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekdayStat {
    pub weekday: String,
    pub count: usize,
    pub positive: usize,
    pub neutral: usize,
    pub negative: usize,
    pub positive_rate: f64,
    pub avg_per_week: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeekdayPatterns {
    pub most_active_day: Option<String>,
    pub least_active_day: Option<String>,
    pub best_mood_day: Option<String>,
    pub worst_mood_day: Option<String>,
    pub avg_entries_per_week: f64,
    /// Monday through Sunday.
    pub days: Vec<WeekdayStat>,
    pub patterns: Vec<String>,
}

/// Weekday frequency and mood skew over a window spanning `weeks` weeks.
pub fn weekday_patterns(entries: &[Entry], weeks: u32) -> WeekdayPatterns {
    if entries.is_empty() {
        return WeekdayPatterns::default();
    }
    let weeks = f64::from(weeks.max(1));

    let days: Vec<WeekdayStat> = (0..7)
        .map(|n| {
            let on_day: Vec<&Entry> = entries
                .iter()
                .filter(|e| e.date.weekday().num_days_from_monday() == n)
                .collect();
            let mood = |m: Mood| on_day.iter().filter(|e| e.mood == m).count();
            let positive = mood(Mood::Positive);
            WeekdayStat {
                weekday: weekday_by_index(n).to_string(),
                count: on_day.len(),
                positive,
                neutral: mood(Mood::Neutral),
                negative: mood(Mood::Negative),
                positive_rate: ratio(positive, on_day.len()),
                avg_per_week: on_day.len() as f64 / weeks,
            }
        })
        .collect();

    let most = first_by(&days, |a, b| a.count > b.count);
    let least = first_by(&days, |a, b| a.count < b.count);
    let logged: Vec<WeekdayStat> = days.iter().filter(|d| d.count > 0).cloned().collect();
    let best = first_by(&logged, |a, b| a.positive_rate > b.positive_rate);
    let worst = first_by(&logged, |a, b| a.positive_rate < b.positive_rate);

    let mut patterns = Vec::new();
    if let Some(most) = most {
        patterns.push(format!(
            "You're most active on {}s (avg {:.1} entries/week)",
            most.weekday, most.avg_per_week
        ));
        if let Some(least) = least.filter(|l| l.count < most.count) {
            patterns.push(format!(
                "You're least active on {}s (avg {:.1} entries/week)",
                least.weekday, least.avg_per_week
            ));
        }
    }
    if let (Some(best), Some(worst)) = (best, worst) {
        if best.positive_rate > worst.positive_rate + MOOD_SPREAD {
            patterns.push(format!(
                "Mood tends to be best on {}s ({:.0}% positive)",
                best.weekday,
                best.positive_rate * 100.0
            ));
            patterns.push(format!(
                "Mood tends to be lowest on {}s ({:.0}% positive)",
                worst.weekday,
                worst.positive_rate * 100.0
            ));
        }
    }

    WeekdayPatterns {
        most_active_day: most.map(|d| d.weekday.clone()),
        least_active_day: least.map(|d| d.weekday.clone()),
        best_mood_day: best.map(|d| d.weekday.clone()),
        worst_mood_day: worst.map(|d| d.weekday.clone()),
        avg_entries_per_week: entries.len() as f64 / weeks,
        days,
        patterns,
    }
}

/// First element that no later element beats.
fn first_by<T>(items: &[T], better: impl Fn(&T, &T) -> bool) -> Option<&T> {
    items
        .iter()
        .fold(None, |best, item| match best {
            Some(b) if !better(item, b) => Some(b),
            _ => Some(item),
        })
}

fn weekday_by_index(n: u32) -> &'static str {
    // 2024-01-01 is a Monday.
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .map(|monday| weekday_name(monday + Duration::days(i64::from(n))))
        .unwrap_or("Monday")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakRun {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub length: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streaks {
    /// Alive only when the last logged day is `reference` or the day before.
    pub current: u32,
    pub longest: u32,
    pub runs: Vec<StreakRun>,
}

/// Runs of consecutive logged days up to `reference`. Later dates are ignored.
pub fn detect_streaks(dates: impl IntoIterator<Item = NaiveDate>, reference: NaiveDate) -> Streaks {
    let days: BTreeSet<NaiveDate> = dates.into_iter().filter(|d| *d <= reference).collect();

    let mut runs: Vec<StreakRun> = Vec::new();
    for day in days {
        match runs.last_mut() {
            Some(run) if day - run.end == Duration::days(1) => {
                run.end = day;
                run.length += 1;
            }
            _ => runs.push(StreakRun {
                start: day,
                end: day,
                length: 1,
            }),
        }
    }

    let current = runs
        .last()
        .filter(|run| run.end == reference || run.end + Duration::days(1) == reference)
        .map_or(0, |run| run.length);

    Streaks {
        current,
        longest: runs.iter().map(|r| r.length).max().unwrap_or(0),
        runs,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryMood {
    pub category: Category,
    pub total: usize,
    pub positive: usize,
    pub positive_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoOccurrence {
    pub first: Category,
    pub second: Category,
    pub days: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Correlations {
    pub mood_by_category: Vec<CategoryMood>,
    pub good_mood_categories: Vec<Category>,
    /// Most frequent first.
    pub pairs: Vec<CoOccurrence>,
    pub findings: Vec<String>,
}

pub fn detect_correlations(entries: &[Entry]) -> Correlations {
    let mut by_category: BTreeMap<Category, (usize, usize)> = BTreeMap::new();
    let mut categories_by_day: BTreeMap<NaiveDate, BTreeSet<Category>> = BTreeMap::new();
    for entry in entries {
        let slot = by_category.entry(entry.category).or_insert((0, 0));
        slot.0 += 1;
        if entry.mood == Mood::Positive {
            slot.1 += 1;
        }
        categories_by_day.entry(entry.date).or_default().insert(entry.category);
    }

    let mood_by_category: Vec<CategoryMood> = by_category
        .into_iter()
        .map(|(category, (total, positive))| CategoryMood {
            category,
            total,
            positive,
            positive_rate: ratio(positive, total),
        })
        .collect();

    let mut findings = Vec::new();
    let mut good_mood_categories = Vec::new();
    for cm in &mood_by_category {
        if cm.total >= CORRELATION_MIN_ENTRIES && cm.positive_rate >= CORRELATION_MIN_RATE {
            good_mood_categories.push(cm.category);
            findings.push(format!(
                "{} correlates with good mood ({:.0}% positive, {} occurrences)",
                cm.category,
                cm.positive_rate * 100.0,
                cm.total
            ));
        }
    }

    let mut pair_counts: BTreeMap<(Category, Category), usize> = BTreeMap::new();
    for categories in categories_by_day.values() {
        let list: Vec<Category> = categories.iter().copied().collect();
        for (i, first) in list.iter().enumerate() {
            for second in &list[i + 1..] {
                *pair_counts.entry((*first, *second)).or_insert(0) += 1;
            }
        }
    }
    let mut pairs: Vec<CoOccurrence> = pair_counts
        .into_iter()
        .filter(|(_, days)| *days >= CO_OCCURRENCE_MIN_DAYS)
        .map(|((first, second), days)| CoOccurrence { first, second, days })
        .collect();
    pairs.sort_by(|a, b| b.days.cmp(&a.days));
    for pair in pairs.iter().take(5) {
        findings.push(format!(
            "{} + {} often happen on the same day ({} times)",
            pair.first, pair.second, pair.days
        ));
    }

    Correlations {
        mood_by_category,
        good_mood_categories,
        pairs,
        findings,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insights {
    pub summary: String,
    pub recommendations: Vec<String>,
    pub weekday: WeekdayPatterns,
    pub streaks: Streaks,
    pub correlations: Correlations,
}

/// Combined patterns with a one-line summary and recommendations.
pub fn build_insights(entries: &[Entry], weeks: u32, reference: NaiveDate) -> Insights {
    let weekday = weekday_patterns(entries, weeks);
    let streaks = detect_streaks(entries.iter().map(|e| e.date), reference);
    let correlations = detect_correlations(entries);

    let mut summary_parts = Vec::new();
    if streaks.current >= 3 {
        summary_parts.push(format!("You're on a {}-day streak!", streaks.current));
    }
    if streaks.longest >= 7 {
        summary_parts.push(format!("Your longest streak was {} days", streaks.longest));
    }
    if let Some(best) = &weekday.best_mood_day {
        if weekday.patterns.iter().any(|p| p.starts_with("Mood tends")) {
            summary_parts.push(format!("You tend to be in the best mood on {best}s"));
        }
    }
    let summary = if summary_parts.is_empty() {
        "Keep tracking to see patterns!".to_string()
    } else {
        summary_parts.join(" | ")
    };

    let mut recommendations = Vec::new();
    if streaks.current == 0 {
        recommendations.push("Start small: record just one habit today".to_string());
    } else if streaks.current < streaks.longest {
        recommendations.push(format!(
            "You're close to your record! Your longest streak was {} days",
            streaks.longest
        ));
    }
    if let Some(worst) = &weekday.worst_mood_day {
        if weekday.patterns.iter().any(|p| p.starts_with("Mood tends")) {
            recommendations.push(format!(
                "Be extra mindful on {worst}s, typically your lowest mood day"
            ));
        }
    }
    for category in correlations.good_mood_categories.iter().take(3) {
        recommendations.push(format!(
            "Consider more {category}: it seems to boost your mood"
        ));
    }

    Insights {
        summary,
        recommendations,
        weekday,
        streaks,
        correlations,
    }
}
