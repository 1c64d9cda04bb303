//! Configuration for the points engine.
//!
//! All earning rates and daily caps live in [`PointsConfig`]; the production
//! values match the deployed service and the [`Default`] impls reproduce
//! them. Hosts can override any of it from a TOML file via
//! [`WalkpointConfig::from_file`].

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::redemption::RedemptionCatalog;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration parsed but holds an unusable value.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Earning rates and the three daily caps.
///
/// | field | production value |
/// |---|---|
/// | `steps_per_point` | 2000 |
/// | `max_daily_steps_points` | 15 |
/// | `max_ad_views_per_day` | 5 |
/// | `points_per_ad_view` | 3 |
/// | `max_total_points_per_day` | 25 |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointsConfig {
    /// Steps required to earn one point.
    pub steps_per_point: u64,
    /// Cap on points earned from steps per day.
    pub max_daily_steps_points: u32,
    /// Cap on rewarded-ad views credited per day.
    pub max_ad_views_per_day: u32,
    /// Points awarded per completed rewarded-ad view.
    pub points_per_ad_view: u32,
    /// Cap on combined steps + ad points per day.
    pub max_total_points_per_day: u32,
}

impl PointsConfig {
    /// Creates a builder seeded with the production values.
    #[must_use]
    pub const fn builder() -> PointsConfigBuilder {
        PointsConfigBuilder::new()
    }

    /// Checks that every rate and cap is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.steps_per_point == 0 {
            return Err(ConfigError::Validation(
                "steps_per_point must be positive".to_string(),
            ));
        }
        if self.points_per_ad_view == 0 {
            return Err(ConfigError::Validation(
                "points_per_ad_view must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            steps_per_point: 2000,
            max_daily_steps_points: 15,
            max_ad_views_per_day: 5,
            points_per_ad_view: 3,
            max_total_points_per_day: 25,
        }
    }
}

/// Builder for [`PointsConfig`].
#[derive(Debug, Clone)]
pub struct PointsConfigBuilder {
    steps_per_point: u64,
    max_daily_steps_points: u32,
    max_ad_views_per_day: u32,
    points_per_ad_view: u32,
    max_total_points_per_day: u32,
}

impl PointsConfigBuilder {
    /// Creates a builder with the production values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            steps_per_point: 2000,
            max_daily_steps_points: 15,
            max_ad_views_per_day: 5,
            points_per_ad_view: 3,
            max_total_points_per_day: 25,
        }
    }

    /// Sets the steps required per point.
    #[must_use]
    pub const fn steps_per_point(mut self, steps: u64) -> Self {
        self.steps_per_point = steps;
        self
    }

    /// Sets the daily steps-points cap.
    #[must_use]
    pub const fn max_daily_steps_points(mut self, cap: u32) -> Self {
        self.max_daily_steps_points = cap;
        self
    }

    /// Sets the daily ad-view cap.
    #[must_use]
    pub const fn max_ad_views_per_day(mut self, cap: u32) -> Self {
        self.max_ad_views_per_day = cap;
        self
    }

    /// Sets the points per completed ad view.
    #[must_use]
    pub const fn points_per_ad_view(mut self, points: u32) -> Self {
        self.points_per_ad_view = points;
        self
    }

    /// Sets the daily combined cap.
    #[must_use]
    pub const fn max_total_points_per_day(mut self, cap: u32) -> Self {
        self.max_total_points_per_day = cap;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub const fn build(self) -> PointsConfig {
        PointsConfig {
            steps_per_point: self.steps_per_point,
            max_daily_steps_points: self.max_daily_steps_points,
            max_ad_views_per_day: self.max_ad_views_per_day,
            points_per_ad_view: self.points_per_ad_view,
            max_total_points_per_day: self.max_total_points_per_day,
        }
    }
}

impl Default for PointsConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Plausibility bounds applied to reported activity before any award.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Largest single-day step count accepted from any source.
    ///
    /// Counts above this are rejected as implausible for human locomotion
    /// before the earning policy runs.
    pub max_daily_steps: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_daily_steps: 50_000,
        }
    }
}

/// Fixed award amounts for bonus grants, keyed by bonus kind.
///
/// Bonus points are recorded in the transaction log but do not count against
/// the daily activity caps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BonusSchedule {
    /// Points for the first login of a day.
    pub daily_login: i64,
    /// Points for hitting the weekly step goal.
    pub weekly_goal: i64,
    /// Points for completing the monthly challenge.
    pub monthly_challenge: i64,
    /// Points for referring a new user.
    pub referral: i64,
}

impl Default for BonusSchedule {
    fn default() -> Self {
        Self {
            daily_login: 1,
            weekly_goal: 10,
            monthly_challenge: 30,
            referral: 100,
        }
    }
}

/// Top-level configuration for the Walkpoint engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkpointConfig {
    /// Earning rates and daily caps.
    pub points: PointsConfig,
    /// Activity plausibility bounds.
    pub health: HealthConfig,
    /// Bonus award amounts.
    pub bonuses: BonusSchedule,
    /// Redemption options offered to users.
    pub redemption: RedemptionCatalog,
}

impl WalkpointConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.points.validate()?;
        let mut seen = BTreeMap::new();
        for option in self.redemption.options() {
            if option.rate <= 0 {
                return Err(ConfigError::Validation(format!(
                    "redemption option '{}' has non-positive rate",
                    option.reward_type
                )));
            }
            if seen.insert(option.reward_type.clone(), ()).is_some() {
                return Err(ConfigError::Validation(format!(
                    "duplicate redemption option '{}'",
                    option.reward_type
                )));
            }
        }
        Ok(())
    }
}
