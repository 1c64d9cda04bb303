//! Per-user, per-day award counters.
//!
//! [`DailyCounters`] tracks a user's progress against the three daily caps:
//! steps points, ad points, and the combined total. One logical instance
//! exists per `(user, UTC day)`; a fresh zeroed instance stands in until the
//! first award of the day persists one.
//!
//! Cap enforcement is **fail-closed**: the policy layer pre-clamps every
//! award to the remaining allowances, and [`DailyCounters::checked_add`]
//! re-checks the result. A [`CapExceeded`] from `checked_add` therefore
//! signals a programming error, not a user hitting a limit: hitting a limit
//! is a zero award, which never reaches `checked_add`.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PointsConfig;

/// The three daily caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapKind {
    /// Cap on points earned from steps.
    Steps,
    /// Cap on points earned from ad views.
    Ads,
    /// Cap on combined steps + ad points.
    Total,
}

impl CapKind {
    /// Returns the display representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Steps => "steps",
            Self::Ads => "ads",
            Self::Total => "total",
        }
    }
}

impl fmt::Display for CapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defensive invariant breach: an increment would push a counter past its cap.
///
/// Unreachable when callers pre-clamp correctly. Logged, never silently
/// swallowed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("daily {cap} cap breached for {user_id} on {day}: {current} + {delta} > {max}")]
pub struct CapExceeded {
    /// Which cap would be breached.
    pub cap: CapKind,
    /// User whose counters were incremented.
    pub user_id: String,
    /// Day the counters belong to.
    pub day: NaiveDate,
    /// Counter value before the increment.
    pub current: u32,
    /// Requested increment.
    pub delta: u32,
    /// Configured maximum.
    pub max: u32,
}

/// Consumption of a single cap, for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapUsage {
    /// Points awarded so far today.
    pub current: u32,
    /// Configured maximum.
    pub max: u32,
}

/// Read-only snapshot of all three caps for one user-day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyLimits {
    /// Steps cap usage.
    pub steps: CapUsage,
    /// Ad cap usage.
    pub ads: CapUsage,
    /// Combined cap usage.
    pub total: CapUsage,
}

/// Award counters for one user on one UTC day.
///
/// Invariant: `total_points == steps_points + ad_points`. Bonus and referral
/// awards are exempt from the activity caps and do not touch these counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCounters {
    /// Owning user.
    pub user_id: String,
    /// UTC day these counters cover.
    pub day: NaiveDate,
    /// Points awarded from steps today.
    pub steps_points: u32,
    /// Points awarded from ad views today.
    pub ad_points: u32,
    /// Combined activity points awarded today.
    pub total_points: u32,
}

impl DailyCounters {
    /// Returns zeroed counters for a user-day with no awards yet.
    #[must_use]
    pub fn fresh(user_id: impl Into<String>, day: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            day,
            steps_points: 0,
            ad_points: 0,
            total_points: 0,
        }
    }

    /// Remaining room under the steps cap.
    #[must_use]
    pub const fn steps_allowance(&self, config: &PointsConfig) -> u32 {
        config.max_daily_steps_points.saturating_sub(self.steps_points)
    }

    /// Remaining room under the combined cap.
    #[must_use]
    pub const fn total_allowance(&self, config: &PointsConfig) -> u32 {
        config
            .max_total_points_per_day
            .saturating_sub(self.total_points)
    }

    /// Number of ad views already credited, derived from ad points.
    #[must_use]
    pub const fn ad_views_used(&self, config: &PointsConfig) -> u32 {
        self.ad_points / config.points_per_ad_view
    }

    /// Whether the daily ad-view count cap is reached.
    #[must_use]
    pub const fn ad_view_cap_reached(&self, config: &PointsConfig) -> bool {
        self.ad_views_used(config) >= config.max_ad_views_per_day
    }

    /// Applies an increment, re-verifying every cap.
    ///
    /// Returns the updated counters, or [`CapExceeded`] if any counter would
    /// pass its configured maximum, which indicates a pre-clamping bug in
    /// the caller rather than normal cap exhaustion.
    pub fn checked_add(
        &self,
        steps_delta: u32,
        ad_delta: u32,
        config: &PointsConfig,
    ) -> Result<Self, CapExceeded> {
        let steps_points = self.steps_points.saturating_add(steps_delta);
        if steps_points > config.max_daily_steps_points {
            return Err(self.breach(CapKind::Steps, self.steps_points, steps_delta, config));
        }

        let ad_points = self.ad_points.saturating_add(ad_delta);
        let ad_max = config.max_ad_views_per_day * config.points_per_ad_view;
        if ad_points > ad_max {
            return Err(self.breach(CapKind::Ads, self.ad_points, ad_delta, config));
        }

        let total_points = self
            .total_points
            .saturating_add(steps_delta)
            .saturating_add(ad_delta);
        if total_points > config.max_total_points_per_day {
            return Err(self.breach(
                CapKind::Total,
                self.total_points,
                steps_delta.saturating_add(ad_delta),
                config,
            ));
        }

        Ok(Self {
            user_id: self.user_id.clone(),
            day: self.day,
            steps_points,
            ad_points,
            total_points,
        })
    }

    /// Snapshot of all three caps for presentation.
    #[must_use]
    pub const fn limits(&self, config: &PointsConfig) -> DailyLimits {
        DailyLimits {
            steps: CapUsage {
                current: self.steps_points,
                max: config.max_daily_steps_points,
            },
            ads: CapUsage {
                current: self.ad_points,
                max: config.max_ad_views_per_day * config.points_per_ad_view,
            },
            total: CapUsage {
                current: self.total_points,
                max: config.max_total_points_per_day,
            },
        }
    }

    fn breach(
        &self,
        cap: CapKind,
        current: u32,
        delta: u32,
        config: &PointsConfig,
    ) -> CapExceeded {
        let max = match cap {
            CapKind::Steps => config.max_daily_steps_points,
            CapKind::Ads => config.max_ad_views_per_day * config.points_per_ad_view,
            CapKind::Total => config.max_total_points_per_day,
        };
        CapExceeded {
            cap,
            user_id: self.user_id.clone(),
            day: self.day,
            current,
            delta,
            max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[test]
    fn fresh_counters_are_zero() {
        let counters = DailyCounters::fresh("u1", day());
        let config = PointsConfig::default();
        assert_eq!(counters.steps_allowance(&config), 15);
        assert_eq!(counters.total_allowance(&config), 25);
        assert_eq!(counters.ad_views_used(&config), 0);
        assert!(!counters.ad_view_cap_reached(&config));
    }

    #[test]
    fn checked_add_maintains_total_invariant() {
        let config = PointsConfig::default();
        let counters = DailyCounters::fresh("u1", day())
            .checked_add(5, 0, &config)
            .unwrap()
            .checked_add(0, 3, &config)
            .unwrap();

        assert_eq!(counters.steps_points, 5);
        assert_eq!(counters.ad_points, 3);
        assert_eq!(counters.total_points, counters.steps_points + counters.ad_points);
    }

    #[test]
    fn checked_add_rejects_steps_breach() {
        let config = PointsConfig::default();
        let counters = DailyCounters::fresh("u1", day());
        let err = counters.checked_add(16, 0, &config).unwrap_err();
        assert_eq!(err.cap, CapKind::Steps);
        assert_eq!(err.max, 15);
    }

    #[test]
    fn checked_add_rejects_total_breach() {
        let config = PointsConfig::default();
        let counters = DailyCounters::fresh("u1", day())
            .checked_add(15, 0, &config)
            .unwrap()
            .checked_add(0, 9, &config)
            .unwrap();
        // 24 of 25 used; a full ad view would land on 27.
        let err = counters.checked_add(0, 3, &config).unwrap_err();
        assert_eq!(err.cap, CapKind::Total);
        assert_eq!(err.current, 24);
    }

    #[test]
    fn ad_view_count_derives_from_points() {
        let config = PointsConfig::default();
        let mut counters = DailyCounters::fresh("u1", day());
        for _ in 0..5 {
            counters = counters.checked_add(0, 3, &config).unwrap();
        }
        assert_eq!(counters.ad_views_used(&config), 5);
        assert!(counters.ad_view_cap_reached(&config));
    }

    #[test]
    fn limits_snapshot_tracks_usage() {
        let config = PointsConfig::default();
        let counters = DailyCounters::fresh("u1", day())
            .checked_add(7, 3, &config)
            .unwrap();
        let limits = counters.limits(&config);
        assert_eq!(limits.steps.current, 7);
        assert_eq!(limits.steps.max, 15);
        assert_eq!(limits.ads.current, 3);
        assert_eq!(limits.ads.max, 15);
        assert_eq!(limits.total.current, 10);
        assert_eq!(limits.total.max, 25);
    }
}
