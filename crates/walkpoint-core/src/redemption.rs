//! Gift-card redemption catalog and records.
//!
//! Redemptions move through a small lifecycle: `pending` → `processing` →
//! `completed` or `failed`, with user cancellation allowed from `pending`
//! and `processing`. The spend itself is a negative transaction in the
//! points log; cancellation and failure append a compensating adjustment
//! rather than rewriting the log.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reward users can exchange points for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionOption {
    /// Stable identifier, e.g. `amazon_gift`.
    pub reward_type: String,
    /// Display name.
    pub name: String,
    /// Smallest redeemable points amount.
    pub min_points: i64,
    /// Points per currency unit.
    pub rate: i64,
    /// Whether the option can currently be redeemed.
    pub available: bool,
    /// Currency values offered for this reward.
    pub denominations: Vec<i64>,
}

/// The set of redemption options offered to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RedemptionCatalog {
    options: Vec<RedemptionOption>,
}

impl RedemptionCatalog {
    /// Creates a catalog from explicit options.
    #[must_use]
    pub fn new(options: Vec<RedemptionOption>) -> Self {
        Self { options }
    }

    /// All options, in catalog order.
    #[must_use]
    pub fn options(&self) -> &[RedemptionOption] {
        &self.options
    }

    /// Looks up an option by reward type.
    #[must_use]
    pub fn get(&self, reward_type: &str) -> Option<&RedemptionOption> {
        self.options.iter().find(|o| o.reward_type == reward_type)
    }
}

impl Default for RedemptionCatalog {
    /// The launch catalog: Amazon gift cards live, PayPay and Rakuten
    /// announced but not yet redeemable.
    fn default() -> Self {
        Self::new(vec![
            RedemptionOption {
                reward_type: "amazon_gift".to_string(),
                name: "Amazon Gift Card".to_string(),
                min_points: 500,
                rate: 1,
                available: true,
                denominations: vec![500, 1000, 3000, 5000, 10_000],
            },
            RedemptionOption {
                reward_type: "paypay".to_string(),
                name: "PayPay".to_string(),
                min_points: 500,
                rate: 1,
                available: false,
                denominations: vec![100, 500, 1000, 3000, 5000, 10_000],
            },
            RedemptionOption {
                reward_type: "rakuten".to_string(),
                name: "Rakuten Points".to_string(),
                min_points: 500,
                rate: 1,
                available: false,
                denominations: vec![100, 500, 1000, 3000, 5000, 10_000],
            },
        ])
    }
}

/// Lifecycle state of a redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionStatus {
    /// Requested, not yet picked up by fulfillment.
    Pending,
    /// Fulfillment in progress.
    Processing,
    /// Reward delivered.
    Completed,
    /// Fulfillment failed; points were returned.
    Failed,
    /// Cancelled by the user; points were returned.
    Cancelled,
}

impl RedemptionStatus {
    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether fulfillment may move a redemption from `self` to `to`.
    ///
    /// `Failed` and `Cancelled` are reached through the compensation path,
    /// never through a plain status update, so they are not valid targets
    /// here.
    #[must_use]
    pub const fn can_advance_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Processing) | (Self::Processing, Self::Completed)
        )
    }

    /// Whether a compensating refund (cancel or fail) is still possible.
    #[must_use]
    pub const fn refundable(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

impl fmt::Display for RedemptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RedemptionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A stored redemption status outside the known set.
#[derive(Debug, thiserror::Error)]
#[error("unknown redemption status: {0}")]
pub struct UnknownStatus(pub String);

/// A user's request to exchange points for a reward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redemption {
    /// Unique identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Reward the points were exchanged for.
    pub reward_type: String,
    /// Points spent (positive).
    pub points_used: i64,
    /// Currency value of the reward.
    pub reward_value: i64,
    /// Current lifecycle state.
    pub status: RedemptionStatus,
    /// Why fulfillment failed, when `status` is `Failed`.
    pub failure_reason: Option<String>,
    /// Request instant.
    pub created_at: DateTime<Utc>,
    /// When fulfillment started.
    pub processed_at: Option<DateTime<Utc>>,
    /// When the reward was delivered.
    pub completed_at: Option<DateTime<Utc>>,
}
