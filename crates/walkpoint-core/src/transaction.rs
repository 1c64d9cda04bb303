//! Point transaction records.
//!
//! Every points movement (award, redemption, compensation) is one
//! immutable [`PointTransaction`] in the append-only log. The original
//! system attached free-form JSON metadata to each transaction; here the
//! metadata is a tagged enum with one well-typed variant per transaction
//! kind, so consumers get exhaustiveness checking instead of string lookups.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a points movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Points earned from the day's step count.
    Steps,
    /// Points earned from a completed rewarded-ad view.
    AdView,
    /// Points granted by the bonus schedule.
    Bonus,
    /// Points spent on a reward (negative amount).
    Redemption,
    /// Compensating entry, e.g. points returned for a cancelled redemption.
    Adjustment,
    /// Points granted for referring a new user.
    Referral,
}

impl TransactionKind {
    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Steps => "steps",
            Self::AdView => "ad_view",
            Self::Bonus => "bonus",
            Self::Redemption => "redemption",
            Self::Adjustment => "adjustment",
            Self::Referral => "referral",
        }
    }

    /// Returns all kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Steps,
            Self::AdView,
            Self::Bonus,
            Self::Redemption,
            Self::Adjustment,
            Self::Referral,
        ]
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// A stored transaction kind that is not part of the taxonomy.
#[derive(Debug, thiserror::Error)]
#[error("unknown transaction kind: {0}")]
pub struct UnknownKind(pub String);

/// Bonus grant categories from the engagement schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BonusKind {
    /// First login of a UTC day.
    DailyLogin,
    /// Weekly step goal reached.
    WeeklyGoal,
    /// Monthly challenge completed.
    MonthlyChallenge,
}

impl BonusKind {
    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DailyLogin => "daily_login",
            Self::WeeklyGoal => "weekly_goal",
            Self::MonthlyChallenge => "monthly_challenge",
        }
    }
}

impl fmt::Display for BonusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed payload attached to a transaction, one variant per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionMetadata {
    /// Steps award context.
    Steps {
        /// Day the steps were walked (may differ from the append instant
        /// when a sync arrives after midnight).
        day: NaiveDate,
        /// Cumulative step count reported for that day.
        cumulative_steps: u64,
    },
    /// Rewarded-ad award context.
    AdView {
        /// Ad unit that served the view.
        ad_unit_id: String,
        /// Client-supplied dedup key for the view.
        view_id: String,
        /// Milliseconds of the ad actually watched, when reported.
        #[serde(skip_serializing_if = "Option::is_none")]
        watched_ms: Option<u64>,
    },
    /// Bonus grant context.
    Bonus {
        /// Which bonus fired.
        bonus: BonusKind,
        /// Grant period the bonus is keyed on (day, ISO week, or month).
        period: String,
    },
    /// Redemption spend context.
    Redemption {
        /// The redemption record this spend belongs to.
        redemption_id: String,
        /// Reward the points were exchanged for.
        reward_type: String,
    },
    /// Compensation context.
    Adjustment {
        /// Human-readable cause.
        reason: String,
        /// Redemption being compensated, when applicable.
        #[serde(skip_serializing_if = "Option::is_none")]
        related_redemption: Option<String>,
    },
    /// Referral award context.
    Referral {
        /// The user who was referred.
        referred_user_id: String,
    },
}

impl TransactionMetadata {
    /// Returns the transaction kind this metadata belongs to.
    #[must_use]
    pub const fn kind(&self) -> TransactionKind {
        match self {
            Self::Steps { .. } => TransactionKind::Steps,
            Self::AdView { .. } => TransactionKind::AdView,
            Self::Bonus { .. } => TransactionKind::Bonus,
            Self::Redemption { .. } => TransactionKind::Redemption,
            Self::Adjustment { .. } => TransactionKind::Adjustment,
            Self::Referral { .. } => TransactionKind::Referral,
        }
    }
}

/// One immutable entry in a user's points history.
///
/// Created exactly once when an award or redemption is accepted; never
/// mutated, never deleted. `balance_after` is the running balance
/// immediately after this entry: `balance_after == previous balance +
/// amount` holds for every entry, and replaying a user's history from zero
/// reproduces their balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointTransaction {
    /// Unique identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Classification, always consistent with `metadata`.
    pub kind: TransactionKind,
    /// Signed points delta; positive = earned, negative = spent.
    pub amount: i64,
    /// Running balance immediately after applying `amount`.
    pub balance_after: i64,
    /// Day the movement is attributed to (UTC).
    pub day: NaiveDate,
    /// Human-readable label; opaque to the policy.
    pub description: String,
    /// Typed context for the movement.
    pub metadata: TransactionMetadata,
    /// Append instant.
    pub created_at: DateTime<Utc>,
}
