//! Walkpoint core - the points engine for a step-rewards service.
//!
//! Users earn points from daily step counts and completed rewarded-ad views
//! under three daily caps, collect scheduled bonuses, and redeem accumulated
//! points for gift cards. This crate is the single authority for all of it:
//!
//! - [`PointsLedger`]: the policy core: earning, bonuses, redemption, and
//!   the read-side queries a client renders from.
//! - [`LedgerStore`]: `SQLite`-backed storage for the append-only transaction
//!   log, daily cap counters, dedup keys, step records, and redemption
//!   records, written atomically per operation.
//! - [`DailyCounters`]: per-user-day progress against the caps.
//! - [`WalkpointConfig`]: rates, caps, bonus amounts, and the redemption
//!   catalog.
//!
//! Earning is idempotent where deliveries can repeat: step reports are
//! cumulative-per-day, and ad views carry a client-supplied dedup key. Cap
//! exhaustion is a normal zero-award outcome, never an error. All day keys
//! use the UTC calendar date of a single injectable [`Clock`].

pub mod clock;
pub mod config;
pub mod counters;
pub mod ledger;
pub mod redemption;
pub mod steps;
pub mod store;
pub mod transaction;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{
    BonusSchedule, ConfigError, HealthConfig, PointsConfig, PointsConfigBuilder, WalkpointConfig,
};
pub use counters::{CapExceeded, CapKind, CapUsage, DailyCounters, DailyLimits};
pub use ledger::{
    AdViewEvent, BalanceSummary, BonusGrant, EarnOutcome, LedgerError, PointsLedger,
    PointsStatistics, RedemptionOutcome, StepsOutcome,
};
pub use redemption::{Redemption, RedemptionCatalog, RedemptionOption, RedemptionStatus};
pub use steps::{DayCount, StepRecord, StepSource, StepsStatistics, StepsSync};
pub use store::{LedgerStore, StorageError};
pub use transaction::{BonusKind, PointTransaction, TransactionKind, TransactionMetadata};
