//! The daily points ledger.
//!
//! [`PointsLedger`] is the single authority for converting raw activity
//! (cumulative daily step counts, completed rewarded-ad views) into point
//! awards under three daily caps, and for spending points on redemptions.
//! Every accepted movement becomes one immutable transaction; cap exhaustion
//! is a normal zero-award outcome, never an error.
//!
//! # Steps are cumulative
//!
//! Health sources report the day's running total, not deltas, and re-sync
//! freely. `earn_from_steps` therefore awards the difference between the
//! points the running total entitles the user to and the points already
//! awarded today: repeating a report is a no-op, and a regressed report
//! (a smaller count than previously seen) awards nothing rather than going
//! negative.
//!
//! # Concurrency
//!
//! A per-user lock serializes each user's read-compute-write sequence, so
//! two racing syncs cannot both compute an award from the same stale
//! counters. Users do not share locks; cross-user contention only exists at
//! the storage layer's single-writer commit, which is bounded by its busy
//! timeout. The counter increment and the transaction append commit in one
//! storage transaction; partial application cannot happen.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::WalkpointConfig;
use crate::counters::{CapExceeded, DailyCounters, DailyLimits};
use crate::redemption::{Redemption, RedemptionOption, RedemptionStatus};
use crate::steps::{StepRecord, StepsStatistics, StepsSync, compute_statistics};
use crate::store::{
    AwardError, AwardWrite, DedupKey, LedgerStore, RedeemError, RedemptionUpdateError,
    RedemptionWrite, RefundKind, StepsRecordWrite, StorageError,
};
use crate::transaction::{BonusKind, PointTransaction, TransactionMetadata};

#[cfg(test)]
mod proptests;

/// Errors surfaced by ledger operations.
///
/// Everything except `Storage` is a caller mistake; `Storage` with
/// [`StorageError::is_retryable`] true can be retried wholesale, since the
/// steps path is idempotent by construction and the ad path is guarded by
/// its view id.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// Underlying store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Defensive cap re-check failed; indicates a pre-clamping bug.
    #[error(transparent)]
    Cap(#[from] CapExceeded),

    /// Reported step count is beyond plausible human locomotion.
    #[error("implausible step count {steps} for {day}: exceeds {max}")]
    ImplausibleSteps {
        /// Reported count.
        steps: u64,
        /// Day it was reported for.
        day: NaiveDate,
        /// Configured plausibility bound.
        max: u64,
    },

    /// No redemption option with that reward type.
    #[error("unknown reward type: {0}")]
    UnknownReward(String),

    /// The option exists but cannot currently be redeemed.
    #[error("reward {0} is not currently available")]
    RewardUnavailable(String),

    /// The spend is below the option's minimum.
    #[error("{points} points is below the minimum {min} for {reward}")]
    BelowMinimum {
        /// Requested spend.
        points: i64,
        /// Option minimum.
        min: i64,
        /// Reward type.
        reward: String,
    },

    /// The spend does not map to an offered denomination.
    #[error("{points} points does not map to a {reward} denomination")]
    InvalidDenomination {
        /// Requested spend.
        points: i64,
        /// Reward type.
        reward: String,
    },

    /// The user's balance cannot cover the spend.
    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance {
        /// Balance at the time of the attempt.
        balance: i64,
        /// Points the redemption needed.
        required: i64,
    },

    /// No such redemption (or it belongs to another user).
    #[error("redemption not found: {0}")]
    RedemptionNotFound(String),

    /// The redemption already reached a terminal state.
    #[error("redemption {id} is {status} and can no longer be refunded")]
    NotRefundable {
        /// The redemption id.
        id: String,
        /// Its current status.
        status: RedemptionStatus,
    },

    /// Fulfillment tried a transition the lifecycle does not allow.
    #[error("redemption {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The redemption id.
        id: String,
        /// Current status.
        from: RedemptionStatus,
        /// Requested status.
        to: RedemptionStatus,
    },
}

impl From<AwardError> for LedgerError {
    fn from(err: AwardError) -> Self {
        match err {
            AwardError::Storage(e) => Self::Storage(e),
            AwardError::Cap(e) => Self::Cap(e),
        }
    }
}

impl From<RedeemError> for LedgerError {
    fn from(err: RedeemError) -> Self {
        match err {
            RedeemError::Storage(e) => Self::Storage(e),
            RedeemError::InsufficientBalance { balance, required } => {
                Self::InsufficientBalance { balance, required }
            },
        }
    }
}

impl From<RedemptionUpdateError> for LedgerError {
    fn from(err: RedemptionUpdateError) -> Self {
        match err {
            RedemptionUpdateError::Storage(e) => Self::Storage(e),
            RedemptionUpdateError::NotFound { id } => Self::RedemptionNotFound(id),
            RedemptionUpdateError::NotRefundable { id, status } => {
                Self::NotRefundable { id, status }
            },
            RedemptionUpdateError::InvalidTransition { id, from, to } => {
                Self::InvalidTransition { id, from, to }
            },
        }
    }
}

/// Result of an earning operation.
///
/// `transaction` is `None` when nothing was awarded: a cap was reached,
/// steps regressed, the ad view was incomplete or a duplicate. That is the
/// expected steady state once a user exhausts a cap, not a failure.
#[derive(Debug, Clone)]
pub struct EarnOutcome {
    /// The award, if one was made.
    pub transaction: Option<PointTransaction>,
    /// Counters after the operation.
    pub counters: DailyCounters,
}

/// Result of a steps sync: the earning outcome plus the stored day record.
#[derive(Debug, Clone)]
pub struct StepsOutcome {
    /// The award, if one was made.
    pub transaction: Option<PointTransaction>,
    /// Counters after the operation.
    pub counters: DailyCounters,
    /// The day's step record after the upsert.
    pub record: Option<StepRecord>,
}

/// Result of a redemption request.
#[derive(Debug, Clone)]
pub struct RedemptionOutcome {
    /// The spend transaction.
    pub transaction: PointTransaction,
    /// The created redemption record.
    pub redemption: Redemption,
}

/// A completed (or abandoned) rewarded-ad view as delivered by the ad SDK.
#[derive(Debug, Clone)]
pub struct AdViewEvent {
    /// Client-supplied dedup key; a view id credited before is a no-op.
    pub view_id: String,
    /// Ad unit that served the view.
    pub ad_unit_id: String,
    /// Milliseconds watched, when reported.
    pub watched_ms: Option<u64>,
    /// Whether the view ran to completion. Incomplete views never earn.
    pub completed: bool,
}

/// A bonus grant request.
#[derive(Debug, Clone)]
pub enum BonusGrant {
    /// First login of a UTC day; at most one per day.
    DailyLogin,
    /// Weekly step goal reached; at most one per ISO week.
    WeeklyGoal,
    /// Monthly challenge completed; at most one per calendar month.
    MonthlyChallenge,
    /// A referred user signed up; at most one per referred user.
    Referral {
        /// The user who was referred.
        referred_user_id: String,
    },
}

/// Balance figures for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSummary {
    /// Current balance.
    pub balance: i64,
    /// Points earned today (bonuses included, refunds excluded).
    pub earned_today: i64,
    /// Points earned over the account lifetime.
    pub lifetime_earned: i64,
}

/// Aggregates over a user's earning and spending history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsStatistics {
    /// Points earned over the account lifetime.
    pub total_earned: i64,
    /// Points spent on redemptions.
    pub total_redeemed: i64,
    /// Mean points per earning day (0 with no history).
    pub average_daily: f64,
    /// Highest-earning day, if any.
    pub best_day: Option<(NaiveDate, i64)>,
}

/// Registry of per-user mutexes.
///
/// Entries are created on first use and kept for the process lifetime; the
/// population is bounded by the active-user count, which is small for one
/// engine instance.
#[derive(Default)]
struct UserLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    fn for_user(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap();
        Arc::clone(
            map.entry(user_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

/// The points engine: policy over [`LedgerStore`], configured by
/// [`WalkpointConfig`], timed by an injectable [`Clock`].
pub struct PointsLedger<C: Clock = SystemClock> {
    store: Arc<LedgerStore>,
    config: WalkpointConfig,
    clock: C,
    locks: UserLocks,
}

impl PointsLedger<SystemClock> {
    /// Creates a ledger over a store with the system clock.
    #[must_use]
    pub fn new(store: Arc<LedgerStore>, config: WalkpointConfig) -> Self {
        Self::with_clock(store, config, SystemClock)
    }
}

impl<C: Clock> PointsLedger<C> {
    /// Creates a ledger with an explicit clock.
    #[must_use]
    pub fn with_clock(store: Arc<LedgerStore>, config: WalkpointConfig, clock: C) -> Self {
        Self {
            store,
            config,
            clock,
            locks: UserLocks::default(),
        }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &WalkpointConfig {
        &self.config
    }

    /// Awards points for the day's cumulative step count.
    ///
    /// `cumulative_steps` is the running total reported by the health
    /// source, never a delta. Idempotent under re-reports; a regressed
    /// count awards nothing.
    pub fn earn_from_steps(
        &self,
        user_id: &str,
        day: NaiveDate,
        cumulative_steps: u64,
    ) -> Result<EarnOutcome, LedgerError> {
        let lock = self.locks.for_user(user_id);
        let _guard = lock.lock().unwrap();
        self.earn_steps_locked(user_id, day, cumulative_steps, None)
            .map(|outcome| EarnOutcome {
                transaction: outcome.transaction,
                counters: outcome.counters,
            })
    }

    /// Records a health-source sync and awards any points it unlocks, as
    /// one atomic unit.
    ///
    /// Rejects counts above the configured plausibility bound before
    /// anything is written.
    pub fn sync_steps(
        &self,
        user_id: &str,
        sync: &StepsSync,
    ) -> Result<StepsOutcome, LedgerError> {
        if sync.steps > self.config.health.max_daily_steps {
            return Err(LedgerError::ImplausibleSteps {
                steps: sync.steps,
                day: sync.day,
                max: self.config.health.max_daily_steps,
            });
        }

        let lock = self.locks.for_user(user_id);
        let _guard = lock.lock().unwrap();
        self.earn_steps_locked(user_id, sync.day, sync.steps, Some(sync))
    }

    /// Awards points for a rewarded-ad view.
    ///
    /// Incomplete views, views past the daily view cap, views clamped to
    /// zero by the total cap, and redelivered view ids are all no-ops.
    pub fn earn_from_ad(
        &self,
        user_id: &str,
        day: NaiveDate,
        event: &AdViewEvent,
    ) -> Result<EarnOutcome, LedgerError> {
        if !event.completed {
            debug!(user_id, view_id = %event.view_id, "incomplete ad view, nothing to award");
            let counters = self.store.counters(user_id, day)?;
            return Ok(EarnOutcome {
                transaction: None,
                counters,
            });
        }

        let lock = self.locks.for_user(user_id);
        let _guard = lock.lock().unwrap();

        let points = &self.config.points;
        let counters = self.store.counters(user_id, day)?;

        if counters.ad_view_cap_reached(points) {
            return Ok(EarnOutcome {
                transaction: None,
                counters,
            });
        }

        let award = points.points_per_ad_view.min(counters.total_allowance(points));
        if award == 0 {
            return Ok(EarnOutcome {
                transaction: None,
                counters,
            });
        }

        let write = AwardWrite {
            user_id,
            day,
            amount: i64::from(award),
            steps_delta: 0,
            ad_delta: award,
            description: "Ad view reward".to_string(),
            metadata: TransactionMetadata::AdView {
                ad_unit_id: event.ad_unit_id.clone(),
                view_id: event.view_id.clone(),
                watched_ms: event.watched_ms,
            },
            created_at: self.clock.now(),
            dedup: Some(DedupKey::AdView {
                view_id: &event.view_id,
                ad_unit_id: &event.ad_unit_id,
                watched_ms: event.watched_ms,
            }),
            steps_record: None,
        };

        match self.store.award(points, &write) {
            Ok(Some((transaction, counters))) => {
                info!(
                    user_id,
                    amount = transaction.amount,
                    view_id = %event.view_id,
                    "awarded ad view points"
                );
                Ok(EarnOutcome {
                    transaction: Some(transaction),
                    counters,
                })
            },
            Ok(None) => {
                debug!(user_id, view_id = %event.view_id, "duplicate ad view, nothing to award");
                Ok(EarnOutcome {
                    transaction: None,
                    counters,
                })
            },
            Err(err) => Err(Self::log_award_error(err)),
        }
    }

    /// Grants a scheduled bonus.
    ///
    /// Bonuses are exempt from the daily activity caps; each grant fires at
    /// most once per its period (day, ISO week, month, or referred user).
    pub fn earn_bonus(
        &self,
        user_id: &str,
        grant: &BonusGrant,
    ) -> Result<EarnOutcome, LedgerError> {
        let day = self.clock.today();
        let bonuses = &self.config.bonuses;

        let (amount, kind_str, period, description, metadata) = match grant {
            BonusGrant::DailyLogin => {
                let period = day.to_string();
                (
                    bonuses.daily_login,
                    BonusKind::DailyLogin.as_str(),
                    period.clone(),
                    "Daily login bonus".to_string(),
                    TransactionMetadata::Bonus {
                        bonus: BonusKind::DailyLogin,
                        period,
                    },
                )
            },
            BonusGrant::WeeklyGoal => {
                let week = day.iso_week();
                let period = format!("{}-W{:02}", week.year(), week.week());
                (
                    bonuses.weekly_goal,
                    BonusKind::WeeklyGoal.as_str(),
                    period.clone(),
                    "Weekly goal bonus".to_string(),
                    TransactionMetadata::Bonus {
                        bonus: BonusKind::WeeklyGoal,
                        period,
                    },
                )
            },
            BonusGrant::MonthlyChallenge => {
                let period = day.format("%Y-%m").to_string();
                (
                    bonuses.monthly_challenge,
                    BonusKind::MonthlyChallenge.as_str(),
                    period.clone(),
                    "Monthly challenge bonus".to_string(),
                    TransactionMetadata::Bonus {
                        bonus: BonusKind::MonthlyChallenge,
                        period,
                    },
                )
            },
            BonusGrant::Referral { referred_user_id } => (
                bonuses.referral,
                "referral",
                referred_user_id.clone(),
                "Referral reward".to_string(),
                TransactionMetadata::Referral {
                    referred_user_id: referred_user_id.clone(),
                },
            ),
        };

        let lock = self.locks.for_user(user_id);
        let _guard = lock.lock().unwrap();

        if amount <= 0 {
            let counters = self.store.counters(user_id, day)?;
            return Ok(EarnOutcome {
                transaction: None,
                counters,
            });
        }

        let write = AwardWrite {
            user_id,
            day,
            amount,
            steps_delta: 0,
            ad_delta: 0,
            description,
            metadata,
            created_at: self.clock.now(),
            dedup: Some(DedupKey::BonusGrant {
                kind: kind_str,
                period: &period,
            }),
            steps_record: None,
        };

        match self.store.award(&self.config.points, &write) {
            Ok(Some((transaction, counters))) => {
                info!(user_id, amount = transaction.amount, bonus = kind_str, "granted bonus");
                Ok(EarnOutcome {
                    transaction: Some(transaction),
                    counters,
                })
            },
            Ok(None) => {
                debug!(user_id, bonus = kind_str, %period, "bonus already granted for period");
                let counters = self.store.counters(user_id, day)?;
                Ok(EarnOutcome {
                    transaction: None,
                    counters,
                })
            },
            Err(err) => Err(Self::log_award_error(err)),
        }
    }

    /// Exchanges points for a reward.
    pub fn request_redemption(
        &self,
        user_id: &str,
        reward_type: &str,
        points_to_use: i64,
    ) -> Result<RedemptionOutcome, LedgerError> {
        let option = self
            .config
            .redemption
            .get(reward_type)
            .ok_or_else(|| LedgerError::UnknownReward(reward_type.to_string()))?;
        if !option.available {
            return Err(LedgerError::RewardUnavailable(reward_type.to_string()));
        }
        if points_to_use < option.min_points {
            return Err(LedgerError::BelowMinimum {
                points: points_to_use,
                min: option.min_points,
                reward: reward_type.to_string(),
            });
        }
        if points_to_use % option.rate != 0 {
            return Err(LedgerError::InvalidDenomination {
                points: points_to_use,
                reward: reward_type.to_string(),
            });
        }
        let reward_value = points_to_use / option.rate;
        if !option.denominations.contains(&reward_value) {
            return Err(LedgerError::InvalidDenomination {
                points: points_to_use,
                reward: reward_type.to_string(),
            });
        }

        let lock = self.locks.for_user(user_id);
        let _guard = lock.lock().unwrap();

        let now = self.clock.now();
        let (transaction, redemption) = self.store.apply_redemption(&RedemptionWrite {
            user_id,
            reward_type,
            points_used: points_to_use,
            reward_value,
            description: format!("{} redemption", option.name),
            day: now.date_naive(),
            created_at: now,
        })?;

        info!(
            user_id,
            redemption_id = %redemption.id,
            points = points_to_use,
            reward = reward_type,
            "redemption requested"
        );
        Ok(RedemptionOutcome {
            transaction,
            redemption,
        })
    }

    /// Cancels a pending or processing redemption, returning its points via
    /// a compensating adjustment. The spend itself stays in the history.
    pub fn cancel_redemption(
        &self,
        user_id: &str,
        redemption_id: &str,
    ) -> Result<RedemptionOutcome, LedgerError> {
        let lock = self.locks.for_user(user_id);
        let _guard = lock.lock().unwrap();

        let (transaction, redemption) = self.store.refund_redemption(
            redemption_id,
            RefundKind::Cancelled,
            Some(user_id),
            self.clock.now(),
        )?;

        info!(user_id, redemption_id, "redemption cancelled, points returned");
        Ok(RedemptionOutcome {
            transaction,
            redemption,
        })
    }

    /// Marks a redemption failed and returns its points. Fulfillment-side
    /// operation; no ownership check.
    pub fn fail_redemption(
        &self,
        redemption_id: &str,
        reason: &str,
    ) -> Result<RedemptionOutcome, LedgerError> {
        let redemption = self
            .store
            .redemption(redemption_id)?
            .ok_or_else(|| LedgerError::RedemptionNotFound(redemption_id.to_string()))?;

        let lock = self.locks.for_user(&redemption.user_id);
        let _guard = lock.lock().unwrap();

        let (transaction, redemption) = self.store.refund_redemption(
            redemption_id,
            RefundKind::Failed { reason },
            None,
            self.clock.now(),
        )?;

        info!(redemption_id, reason, "redemption failed, points returned");
        Ok(RedemptionOutcome {
            transaction,
            redemption,
        })
    }

    /// Advances a redemption through fulfillment
    /// (`pending` → `processing` → `completed`).
    pub fn advance_redemption(
        &self,
        redemption_id: &str,
        to: RedemptionStatus,
    ) -> Result<Redemption, LedgerError> {
        let redemption = self
            .store
            .advance_redemption(redemption_id, to, self.clock.now())?;
        info!(redemption_id, status = %to, "redemption advanced");
        Ok(redemption)
    }

    /// The user's current balance.
    pub fn balance(&self, user_id: &str) -> Result<i64, LedgerError> {
        Ok(self.store.balance(user_id)?)
    }

    /// Balance figures for the points screen.
    pub fn balance_summary(&self, user_id: &str) -> Result<BalanceSummary, LedgerError> {
        let today = self.clock.today();
        Ok(BalanceSummary {
            balance: self.store.balance(user_id)?,
            earned_today: self.store.earned_on_day(user_id, today)?,
            lifetime_earned: self.store.lifetime_earned(user_id)?,
        })
    }

    /// Today's cap usage for the progress display.
    pub fn daily_limits(&self, user_id: &str) -> Result<DailyLimits, LedgerError> {
        let counters = self.store.counters(user_id, self.clock.today())?;
        Ok(counters.limits(&self.config.points))
    }

    /// One page of the user's transaction history, newest first.
    pub fn history(
        &self,
        user_id: &str,
        page: u64,
        page_size: u64,
    ) -> Result<Vec<PointTransaction>, LedgerError> {
        Ok(self.store.history(user_id, page, page_size)?)
    }

    /// Earning/spending aggregates for the statistics screen.
    pub fn points_statistics(&self, user_id: &str) -> Result<PointsStatistics, LedgerError> {
        let total_earned = self.store.lifetime_earned(user_id)?;
        let total_redeemed = self.store.total_redeemed(user_id)?;
        let day_totals = self.store.earning_day_totals(user_id)?;

        let best_day = day_totals
            .iter()
            .max_by_key(|(day, total)| (*total, std::cmp::Reverse(*day)))
            .copied();
        #[allow(clippy::cast_precision_loss)]
        let average_daily = if day_totals.is_empty() {
            0.0
        } else {
            total_earned as f64 / day_totals.len() as f64
        };

        Ok(PointsStatistics {
            total_earned,
            total_redeemed,
            average_daily,
            best_day,
        })
    }

    /// Today's step record, if any sync arrived.
    pub fn steps_today(&self, user_id: &str) -> Result<Option<StepRecord>, LedgerError> {
        Ok(self.store.step_record(user_id, self.clock.today())?)
    }

    /// Step records for an inclusive day range, ascending.
    pub fn steps_range(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<StepRecord>, LedgerError> {
        Ok(self.store.steps_range(user_id, from, to)?)
    }

    /// Aggregates over the user's step history.
    pub fn steps_statistics(&self, user_id: &str) -> Result<StepsStatistics, LedgerError> {
        let counts = self.store.step_day_counts(user_id)?;
        Ok(compute_statistics(&counts, self.clock.today()))
    }

    /// The redemption catalog.
    #[must_use]
    pub fn redemption_options(&self) -> &[RedemptionOption] {
        self.config.redemption.options()
    }

    /// Looks up a redemption by id.
    pub fn redemption(&self, redemption_id: &str) -> Result<Option<Redemption>, LedgerError> {
        Ok(self.store.redemption(redemption_id)?)
    }

    /// One page of the user's redemptions, newest first.
    pub fn redemption_history(
        &self,
        user_id: &str,
        page: u64,
        page_size: u64,
    ) -> Result<Vec<Redemption>, LedgerError> {
        Ok(self.store.redemption_history(user_id, page, page_size)?)
    }

    /// Steps earning core, shared by `earn_from_steps` and `sync_steps`.
    /// Caller holds the user lock.
    fn earn_steps_locked(
        &self,
        user_id: &str,
        day: NaiveDate,
        cumulative_steps: u64,
        sync: Option<&StepsSync>,
    ) -> Result<StepsOutcome, LedgerError> {
        let points = &self.config.points;
        let counters = self.store.counters(user_id, day)?;

        let raw_eligible =
            u32::try_from(cumulative_steps / points.steps_per_point).unwrap_or(u32::MAX);
        let entitled_total = raw_eligible.min(points.max_daily_steps_points);
        let delta = entitled_total
            .saturating_sub(counters.steps_points)
            .min(counters.steps_allowance(points))
            .min(counters.total_allowance(points));

        if delta == 0 {
            debug!(
                user_id,
                %day,
                cumulative_steps,
                already_awarded = counters.steps_points,
                "no step points to award"
            );
            let record = match sync {
                Some(sync) => {
                    self.store.record_steps(&Self::steps_record_write(
                        user_id, sync, 0,
                        self.clock.now(),
                    ))?;
                    self.store.step_record(user_id, day)?
                },
                None => None,
            };
            return Ok(StepsOutcome {
                transaction: None,
                counters,
                record,
            });
        }

        let write = AwardWrite {
            user_id,
            day,
            amount: i64::from(delta),
            steps_delta: delta,
            ad_delta: 0,
            description: "Steps reward".to_string(),
            metadata: TransactionMetadata::Steps {
                day,
                cumulative_steps,
            },
            created_at: self.clock.now(),
            dedup: None,
            steps_record: sync
                .map(|sync| Self::steps_record_write(user_id, sync, delta, self.clock.now())),
        };

        match self.store.award(points, &write) {
            Ok(Some((transaction, counters))) => {
                info!(
                    user_id,
                    %day,
                    amount = transaction.amount,
                    cumulative_steps,
                    "awarded step points"
                );
                let record = match sync {
                    Some(_) => self.store.step_record(user_id, day)?,
                    None => None,
                };
                Ok(StepsOutcome {
                    transaction: Some(transaction),
                    counters,
                    record,
                })
            },
            // No dedup key on the steps path, so an applied award is the
            // only success shape.
            Ok(None) => Ok(StepsOutcome {
                transaction: None,
                counters,
                record: None,
            }),
            Err(err) => Err(Self::log_award_error(err)),
        }
    }

    fn steps_record_write<'a>(
        user_id: &'a str,
        sync: &'a StepsSync,
        points_delta: u32,
        updated_at: chrono::DateTime<chrono::Utc>,
    ) -> StepsRecordWrite<'a> {
        StepsRecordWrite {
            user_id,
            day: sync.day,
            steps: sync.steps,
            distance_m: sync.distance_m,
            calories: sync.calories,
            active_minutes: sync.active_minutes,
            source: sync.source,
            points_delta,
            updated_at,
        }
    }

    fn log_award_error(err: AwardError) -> LedgerError {
        if let AwardError::Cap(cap) = &err {
            // Pre-clamping should make this unreachable; a breach here is a
            // bug in the policy math, so it must not pass silently.
            error!(%cap, "defensive cap check failed inside award transaction");
        }
        err.into()
    }
}
