//! Daily step records and statistics.
//!
//! One [`StepRecord`] exists per user per UTC day, holding the highest
//! cumulative count reported for that day. Health sources re-sync freely;
//! a report lower than what is already stored leaves the record unchanged.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Where a step count was reported from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepSource {
    /// Apple HealthKit.
    Healthkit,
    /// Google Fit.
    GoogleFit,
    /// Operator-entered correction.
    Manual,
}

impl StepSource {
    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthkit => "healthkit",
            Self::GoogleFit => "google_fit",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for StepSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepSource {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthkit" => Ok(Self::Healthkit),
            "google_fit" => Ok(Self::GoogleFit),
            "manual" => Ok(Self::Manual),
            other => Err(UnknownSource(other.to_string())),
        }
    }
}

/// A stored step source outside the known set.
#[derive(Debug, thiserror::Error)]
#[error("unknown step source: {0}")]
pub struct UnknownSource(pub String);

/// A day's activity as reported by a health source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepsSync {
    /// Day the count belongs to (UTC).
    pub day: NaiveDate,
    /// Cumulative step count for the day so far. Always the running total,
    /// never a delta.
    pub steps: u64,
    /// Distance covered, meters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
    /// Energy burned, kcal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    /// Minutes of activity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_minutes: Option<u32>,
    /// Reporting source.
    pub source: StepSource,
}

/// Stored per-day step record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Owning user.
    pub user_id: String,
    /// Day covered (UTC).
    pub day: NaiveDate,
    /// Highest cumulative count reported for the day.
    pub steps: u64,
    /// Distance covered, meters.
    pub distance_m: Option<f64>,
    /// Energy burned, kcal.
    pub calories: Option<f64>,
    /// Minutes of activity.
    pub active_minutes: Option<u32>,
    /// Most recent reporting source.
    pub source: StepSource,
    /// Points awarded from this day's steps so far.
    pub points_earned: u32,
    /// Last sync instant.
    pub updated_at: DateTime<Utc>,
}

/// Aggregates over a user's step history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepsStatistics {
    /// Sum of all recorded days.
    pub total_steps: u64,
    /// Mean steps over recorded days (0 when no records).
    pub average_daily: u64,
    /// Highest-count day, if any records exist.
    pub best_day: Option<DayCount>,
    /// Consecutive recorded days ending today or yesterday.
    pub current_streak: u32,
    /// Longest run of consecutive recorded days.
    pub longest_streak: u32,
}

/// A day paired with its step count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCount {
    /// The day.
    pub day: NaiveDate,
    /// Steps recorded that day.
    pub steps: u64,
}

/// Computes statistics over `(day, steps)` pairs sorted ascending by day.
///
/// A streak is a run of consecutive days each holding a nonzero count. The
/// current streak is alive while its last day is `today` or yesterday, so a
/// user who has not yet synced today keeps yesterday's streak.
#[must_use]
pub fn compute_statistics(days: &[DayCount], today: NaiveDate) -> StepsStatistics {
    let counted: Vec<&DayCount> = days.iter().filter(|d| d.steps > 0).collect();

    let total_steps: u64 = counted.iter().map(|d| d.steps).sum();
    let average_daily = if counted.is_empty() {
        0
    } else {
        total_steps / counted.len() as u64
    };
    let best_day = counted
        .iter()
        .max_by_key(|d| (d.steps, std::cmp::Reverse(d.day)))
        .map(|d| **d);

    let mut longest_streak: u32 = 0;
    let mut run: u32 = 0;
    let mut prev: Option<NaiveDate> = None;
    let mut last_run: u32 = 0;
    for entry in &counted {
        run = match prev {
            Some(p) if p.succ_opt() == Some(entry.day) => run + 1,
            _ => 1,
        };
        longest_streak = longest_streak.max(run);
        prev = Some(entry.day);
        last_run = run;
    }

    let current_streak = match prev {
        Some(last) if last == today || last.succ_opt() == Some(today) => last_run,
        _ => 0,
    };

    StepsStatistics {
        total_steps,
        average_daily,
        best_day,
        current_streak,
        longest_streak,
    }
}
