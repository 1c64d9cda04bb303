//! `SQLite`-backed ledger storage.
//!
//! One database holds the append-only transaction log, the per-user-day cap
//! counters, ad-view and bonus dedup keys, step records, and redemption
//! records. Holding them in one store is what lets an award be atomic: the
//! counter update, the dedup insert, and the transaction append all commit
//! or all roll back together.
//!
//! WAL mode allows concurrent reads while a write is in progress. Writes
//! serialize on `SQLite`'s single-writer lock, bounded by a busy timeout;
//! hitting the timeout surfaces as a retryable [`StorageError::Busy`], never
//! a hang.

// SQLite returns i64 for counts; ledger counters are always non-negative.
// Mutex poisoning indicates a panic in another thread, which is unrecoverable.
#![allow(clippy::cast_sign_loss, clippy::missing_panics_doc)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{
    Connection, ErrorCode, OpenFlags, OptionalExtension, Transaction, TransactionBehavior, params,
};
use thiserror::Error;
use uuid::Uuid;

use crate::config::PointsConfig;
use crate::counters::{CapExceeded, DailyCounters};
use crate::redemption::{Redemption, RedemptionStatus};
use crate::steps::{DayCount, StepRecord, StepSource};
use crate::transaction::{PointTransaction, TransactionKind, TransactionMetadata};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// How long a writer waits for the database lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from the underlying store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(rusqlite::Error),

    /// I/O error during database operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The database stayed locked past the busy timeout. Retryable.
    #[error("storage busy: {context}")]
    Busy {
        /// What the store was doing when the timeout hit.
        context: String,
    },

    /// A stored record no longer parses.
    #[error("corrupt record {id}: {details}")]
    Corrupt {
        /// Identifier of the offending row.
        id: String,
        /// What failed to parse.
        details: String,
    },
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if matches!(
                    e.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) =>
            {
                Self::Busy {
                    context: msg.clone().unwrap_or_else(|| e.to_string()),
                }
            },
            _ => Self::Database(err),
        }
    }
}

impl StorageError {
    /// Whether retrying the whole operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

/// Errors from an atomic award write.
#[derive(Debug, Error)]
pub enum AwardError {
    /// Underlying store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Defensive cap re-check failed inside the transaction.
    #[error(transparent)]
    Cap(#[from] CapExceeded),
}

/// Errors from an atomic redemption spend.
#[derive(Debug, Error)]
pub enum RedeemError {
    /// Underlying store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The user's balance cannot cover the spend.
    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance {
        /// Balance at the time of the attempt.
        balance: i64,
        /// Points the redemption needed.
        required: i64,
    },
}

/// Errors from redemption lifecycle updates.
#[derive(Debug, Error)]
pub enum RedemptionUpdateError {
    /// Underlying store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// No redemption with that id (or it belongs to another user).
    #[error("redemption not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: String,
    },

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

/// An award to apply atomically: transaction append + counter increment,
/// plus optional dedup insert and step-record upsert.
#[derive(Debug)]
pub struct AwardWrite<'a> {
    /// Owning user.
    pub user_id: &'a str,
    /// Day the award is attributed to.
    pub day: NaiveDate,
    /// Points to award; always positive.
    pub amount: i64,
    /// Increment to the steps counter.
    pub steps_delta: u32,
    /// Increment to the ad counter.
    pub ad_delta: u32,
    /// Transaction label.
    pub description: String,
    /// Transaction metadata; determines the stored kind.
    pub metadata: TransactionMetadata,
    /// Append instant.
    pub created_at: DateTime<Utc>,
    /// Idempotency key; a conflict turns the whole write into a no-op.
    pub dedup: Option<DedupKey<'a>>,
    /// Step record to upsert in the same transaction.
    pub steps_record: Option<StepsRecordWrite<'a>>,
}

/// Idempotency key for an award.
#[derive(Debug)]
pub enum DedupKey<'a> {
    /// A rewarded-ad view, keyed by the client-supplied view id.
    AdView {
        /// Client-supplied dedup key.
        view_id: &'a str,
        /// Ad unit that served the view.
        ad_unit_id: &'a str,
        /// Milliseconds watched, when reported.
        watched_ms: Option<u64>,
    },
    /// A bonus grant, keyed by kind and period.
    BonusGrant {
        /// Bonus kind storage form.
        kind: &'a str,
        /// Grant period (day, ISO week, month, or referred user).
        period: &'a str,
    },
}

/// A step-record upsert. `steps` only ever grows for a given day;
/// `points_delta` accumulates into the day's `points_earned`.
#[derive(Debug)]
pub struct StepsRecordWrite<'a> {
    /// Owning user.
    pub user_id: &'a str,
    /// Day covered.
    pub day: NaiveDate,
    /// Cumulative count reported.
    pub steps: u64,
    /// Distance covered, meters.
    pub distance_m: Option<f64>,
    /// Energy burned, kcal.
    pub calories: Option<f64>,
    /// Minutes of activity.
    pub active_minutes: Option<u32>,
    /// Reporting source.
    pub source: StepSource,
    /// Points awarded by this sync.
    pub points_delta: u32,
    /// Sync instant.
    pub updated_at: DateTime<Utc>,
}

/// A redemption spend to apply atomically: negative transaction append plus
/// the redemption record, guarded by an in-transaction balance check.
#[derive(Debug)]
pub struct RedemptionWrite<'a> {
    /// Owning user.
    pub user_id: &'a str,
    /// Reward being redeemed.
    pub reward_type: &'a str,
    /// Points to spend; always positive.
    pub points_used: i64,
    /// Currency value of the reward.
    pub reward_value: i64,
    /// Transaction label.
    pub description: String,
    /// Day the spend is attributed to.
    pub day: NaiveDate,
    /// Request instant.
    pub created_at: DateTime<Utc>,
}

/// Outcome of a compensating refund.
#[derive(Debug, Clone, Copy)]
pub enum RefundKind<'a> {
    /// User cancelled the redemption.
    Cancelled,
    /// Fulfillment failed.
    Failed {
        /// Why fulfillment failed.
        reason: &'a str,
    },
}

/// The ledger store.
///
/// Cheap to clone by wrapping in [`Arc`]; internally a single `SQLite`
/// connection behind a mutex, as WAL readers are opened per query by the
/// CLI and the write path is serialized anyway.
pub struct LedgerStore {
    conn: Arc<Mutex<Connection>>,
    #[allow(dead_code)]
    path: Option<PathBuf>,
}

impl LedgerStore {
    /// Opens or creates a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(StorageError::from)?;

        Self::initialize_connection(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory store for testing.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        Self::initialize_connection(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    fn initialize_connection(conn: &Connection) -> Result<(), StorageError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Returns the user's current balance: the latest transaction's
    /// `balance_after`, or 0 with no history.
    pub fn balance(&self, user_id: &str) -> Result<i64, StorageError> {
        let conn = self.conn.lock().unwrap();
        Self::balance_tx(&conn, user_id)
    }

    fn balance_tx(conn: &Connection, user_id: &str) -> Result<i64, StorageError> {
        let latest: Option<i64> = conn
            .query_row(
                "SELECT balance_after FROM transactions
                 WHERE user_id = ?1
                 ORDER BY seq DESC
                 LIMIT 1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(latest.unwrap_or(0))
    }

    /// Reads one page of the user's history, newest first.
    pub fn history(
        &self,
        user_id: &str,
        page: u64,
        page_size: u64,
    ) -> Result<Vec<PointTransaction>, StorageError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, user_id, kind, amount, balance_after, day, description, metadata, created_at_ns
             FROM transactions
             WHERE user_id = ?1
             ORDER BY seq DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let offset = page.saturating_mul(page_size);
        let rows = stmt
            .query_map(
                params![
                    user_id,
                    i64::try_from(page_size).unwrap_or(i64::MAX),
                    i64::try_from(offset).unwrap_or(i64::MAX)
                ],
                raw_transaction_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawTransaction::parse).collect()
    }

    /// Returns the user's counters for a day, or fresh zeroed counters if no
    /// award has persisted a row yet. The fresh instance is not persisted.
    pub fn counters(
        &self,
        user_id: &str,
        day: NaiveDate,
    ) -> Result<DailyCounters, StorageError> {
        let conn = self.conn.lock().unwrap();
        Self::counters_tx(&conn, user_id, day)
    }

    fn counters_tx(
        conn: &Connection,
        user_id: &str,
        day: NaiveDate,
    ) -> Result<DailyCounters, StorageError> {
        let row: Option<(i64, i64, i64)> = conn
            .query_row(
                "SELECT steps_points, ad_points, total_points FROM daily_counters
                 WHERE user_id = ?1 AND day = ?2",
                params![user_id, day.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match row {
            None => Ok(DailyCounters::fresh(user_id, day)),
            Some((steps, ads, total)) => {
                if steps + ads != total {
                    return Err(StorageError::Corrupt {
                        id: format!("daily_counters {user_id}/{day}"),
                        details: format!("total {total} != steps {steps} + ads {ads}"),
                    });
                }
                Ok(DailyCounters {
                    user_id: user_id.to_string(),
                    day,
                    steps_points: steps as u32,
                    ad_points: ads as u32,
                    total_points: total as u32,
                })
            },
        }
    }

    /// Applies an award atomically.
    ///
    /// Returns `Ok(None)` when the write's dedup key already exists: the
    /// event was credited before and nothing changed. A [`CapExceeded`]
    /// from the in-transaction re-check rolls everything back.
    pub fn award(
        &self,
        config: &PointsConfig,
        write: &AwardWrite<'_>,
    ) -> Result<Option<(PointTransaction, DailyCounters)>, AwardError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;

        let created_at_ns = timestamp_ns(write.created_at);

        if let Some(dedup) = &write.dedup {
            let inserted = match dedup {
                DedupKey::AdView {
                    view_id,
                    ad_unit_id,
                    watched_ms,
                } => tx
                    .execute(
                        "INSERT OR IGNORE INTO ad_views
                         (view_id, user_id, ad_unit_id, day, points_earned, watched_ms, created_at_ns)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            view_id,
                            write.user_id,
                            ad_unit_id,
                            write.day.to_string(),
                            write.amount,
                            watched_ms.map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)),
                            created_at_ns,
                        ],
                    )
                    .map_err(StorageError::from)?,
                DedupKey::BonusGrant { kind, period } => tx
                    .execute(
                        "INSERT OR IGNORE INTO bonus_grants
                         (user_id, kind, period, created_at_ns)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![write.user_id, kind, period, created_at_ns],
                    )
                    .map_err(StorageError::from)?,
            };
            if inserted == 0 {
                return Ok(None);
            }
        }

        let current = Self::counters_tx(&tx, write.user_id, write.day)?;
        let counters = if write.steps_delta > 0 || write.ad_delta > 0 {
            let updated = current.checked_add(write.steps_delta, write.ad_delta, config)?;
            tx.execute(
                "INSERT INTO daily_counters (user_id, day, steps_points, ad_points, total_points)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (user_id, day) DO UPDATE SET
                     steps_points = excluded.steps_points,
                     ad_points = excluded.ad_points,
                     total_points = excluded.total_points",
                params![
                    write.user_id,
                    write.day.to_string(),
                    updated.steps_points,
                    updated.ad_points,
                    updated.total_points,
                ],
            )
            .map_err(StorageError::from)?;
            updated
        } else {
            current
        };

        if let Some(record) = &write.steps_record {
            Self::upsert_steps_tx(&tx, record)?;
        }

        let transaction = Self::append_tx(
            &tx,
            write.user_id,
            write.amount,
            write.day,
            &write.description,
            &write.metadata,
            write.created_at,
        )?;

        tx.commit().map_err(StorageError::from)?;
        Ok(Some((transaction, counters)))
    }

    /// Upserts a step record outside any award (a sync that earned nothing
    /// still updates the day's record).
    pub fn record_steps(&self, record: &StepsRecordWrite<'_>) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        Self::upsert_steps_tx(&conn, record)
    }

    fn upsert_steps_tx(
        conn: &Connection,
        record: &StepsRecordWrite<'_>,
    ) -> Result<(), StorageError> {
        conn.execute(
            "INSERT INTO daily_steps
             (user_id, day, steps, distance_m, calories, active_minutes, source, points_earned, updated_at_ns)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (user_id, day) DO UPDATE SET
                 steps = MAX(steps, excluded.steps),
                 distance_m = COALESCE(excluded.distance_m, distance_m),
                 calories = COALESCE(excluded.calories, calories),
                 active_minutes = COALESCE(excluded.active_minutes, active_minutes),
                 source = excluded.source,
                 points_earned = points_earned + excluded.points_earned,
                 updated_at_ns = excluded.updated_at_ns",
            params![
                record.user_id,
                record.day.to_string(),
                i64::try_from(record.steps).unwrap_or(i64::MAX),
                record.distance_m,
                record.calories,
                record.active_minutes,
                record.source.as_str(),
                record.points_delta,
                timestamp_ns(record.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Reads one day's step record.
    pub fn step_record(
        &self,
        user_id: &str,
        day: NaiveDate,
    ) -> Result<Option<StepRecord>, StorageError> {
        let conn = self.conn.lock().unwrap();

        let row = conn
            .query_row(
                "SELECT user_id, day, steps, distance_m, calories, active_minutes, source, points_earned, updated_at_ns
                 FROM daily_steps
                 WHERE user_id = ?1 AND day = ?2",
                params![user_id, day.to_string()],
                raw_step_row,
            )
            .optional()?;

        row.map(RawStepRecord::parse).transpose()
    }

    /// Reads step records for an inclusive day range, ascending.
    pub fn steps_range(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<StepRecord>, StorageError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT user_id, day, steps, distance_m, calories, active_minutes, source, points_earned, updated_at_ns
             FROM daily_steps
             WHERE user_id = ?1 AND day >= ?2 AND day <= ?3
             ORDER BY day ASC",
        )?;

        let rows = stmt
            .query_map(
                params![user_id, from.to_string(), to.to_string()],
                raw_step_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawStepRecord::parse).collect()
    }

    /// Reads the user's full `(day, steps)` history, ascending.
    pub fn step_day_counts(&self, user_id: &str) -> Result<Vec<DayCount>, StorageError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT day, steps FROM daily_steps
             WHERE user_id = ?1
             ORDER BY day ASC",
        )?;

        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(day, steps)| {
                Ok(DayCount {
                    day: parse_day(&day, "daily_steps")?,
                    steps: steps.max(0) as u64,
                })
            })
            .collect()
    }

    /// Sum of points earned on a given day (bonus included, refunds
    /// excluded).
    pub fn earned_on_day(&self, user_id: &str, day: NaiveDate) -> Result<i64, StorageError> {
        let conn = self.conn.lock().unwrap();
        let earned: i64 = conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM transactions
             WHERE user_id = ?1 AND day = ?2 AND amount > 0 AND kind != 'adjustment'",
            params![user_id, day.to_string()],
            |row| row.get(0),
        )?;
        Ok(earned)
    }

    /// Sum of all points ever earned (refunds excluded).
    pub fn lifetime_earned(&self, user_id: &str) -> Result<i64, StorageError> {
        let conn = self.conn.lock().unwrap();
        let earned: i64 = conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM transactions
             WHERE user_id = ?1 AND amount > 0 AND kind != 'adjustment'",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(earned)
    }

    /// Sum of all points ever spent on redemptions.
    pub fn total_redeemed(&self, user_id: &str) -> Result<i64, StorageError> {
        let conn = self.conn.lock().unwrap();
        let redeemed: i64 = conn.query_row(
            "SELECT COALESCE(-SUM(amount), 0) FROM transactions
             WHERE user_id = ?1 AND kind = 'redemption'",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(redeemed)
    }

    /// Per-day earned totals (refunds excluded), ascending by day.
    pub fn earning_day_totals(
        &self,
        user_id: &str,
    ) -> Result<Vec<(NaiveDate, i64)>, StorageError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT day, SUM(amount) FROM transactions
             WHERE user_id = ?1 AND amount > 0 AND kind != 'adjustment'
             GROUP BY day
             ORDER BY day ASC",
        )?;

        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(day, total)| Ok((parse_day(&day, "transactions")?, total)))
            .collect()
    }

    /// Applies a redemption spend atomically.
    ///
    /// The balance check runs inside the transaction, so a racing spend
    /// cannot drive the balance negative.
    pub fn apply_redemption(
        &self,
        write: &RedemptionWrite<'_>,
    ) -> Result<(PointTransaction, Redemption), RedeemError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;

        let balance = Self::balance_tx(&tx, write.user_id)?;
        if balance < write.points_used {
            return Err(RedeemError::InsufficientBalance {
                balance,
                required: write.points_used,
            });
        }

        let redemption_id = Uuid::new_v4().to_string();
        let metadata = TransactionMetadata::Redemption {
            redemption_id: redemption_id.clone(),
            reward_type: write.reward_type.to_string(),
        };
        let transaction = Self::append_tx(
            &tx,
            write.user_id,
            -write.points_used,
            write.day,
            &write.description,
            &metadata,
            write.created_at,
        )?;

        tx.execute(
            "INSERT INTO redemptions
             (id, user_id, reward_type, points_used, reward_value, status, created_at_ns)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                redemption_id,
                write.user_id,
                write.reward_type,
                write.points_used,
                write.reward_value,
                RedemptionStatus::Pending.as_str(),
                timestamp_ns(write.created_at),
            ],
        )
        .map_err(StorageError::from)?;

        tx.commit().map_err(StorageError::from)?;

        let redemption = Redemption {
            id: redemption_id,
            user_id: write.user_id.to_string(),
            reward_type: write.reward_type.to_string(),
            points_used: write.points_used,
            reward_value: write.reward_value,
            status: RedemptionStatus::Pending,
            failure_reason: None,
            created_at: write.created_at,
            processed_at: None,
            completed_at: None,
        };
        Ok((transaction, redemption))
    }

    /// Refunds a redemption: appends the compensating adjustment and marks
    /// the record cancelled or failed, atomically.
    ///
    /// When `expected_user` is set, a redemption owned by someone else
    /// reports [`RedemptionUpdateError::NotFound`].
    pub fn refund_redemption(
        &self,
        redemption_id: &str,
        refund: RefundKind<'_>,
        expected_user: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(PointTransaction, Redemption), RedemptionUpdateError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;

        let mut redemption =
            Self::redemption_tx(&tx, redemption_id)?.ok_or_else(|| {
                RedemptionUpdateError::NotFound {
                    id: redemption_id.to_string(),
                }
            })?;
        if expected_user.is_some_and(|user| user != redemption.user_id) {
            return Err(RedemptionUpdateError::NotFound {
                id: redemption_id.to_string(),
            });
        }
        if !redemption.status.refundable() {
            return Err(RedemptionUpdateError::NotRefundable {
                id: redemption_id.to_string(),
                status: redemption.status,
            });
        }

        let (status, reason, description) = match refund {
            RefundKind::Cancelled => (
                RedemptionStatus::Cancelled,
                "redemption cancelled".to_string(),
                "Points returned for cancelled redemption".to_string(),
            ),
            RefundKind::Failed { reason } => (
                RedemptionStatus::Failed,
                reason.to_string(),
                "Points returned for failed redemption".to_string(),
            ),
        };

        let metadata = TransactionMetadata::Adjustment {
            reason: reason.clone(),
            related_redemption: Some(redemption_id.to_string()),
        };
        let transaction = Self::append_tx(
            &tx,
            &redemption.user_id,
            redemption.points_used,
            now.date_naive(),
            &description,
            &metadata,
            now,
        )?;

        let failure_reason = match status {
            RedemptionStatus::Failed => Some(reason.as_str()),
            _ => None,
        };
        tx.execute(
            "UPDATE redemptions SET status = ?2, failure_reason = ?3 WHERE id = ?1",
            params![redemption_id, status.as_str(), failure_reason],
        )
        .map_err(StorageError::from)?;

        tx.commit().map_err(StorageError::from)?;

        redemption.status = status;
        redemption.failure_reason = failure_reason.map(ToString::to_string);
        Ok((transaction, redemption))
    }

    /// Advances a redemption through fulfillment
    /// (`pending` → `processing` → `completed`).
    pub fn advance_redemption(
        &self,
        redemption_id: &str,
        to: RedemptionStatus,
        now: DateTime<Utc>,
    ) -> Result<Redemption, RedemptionUpdateError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;

        let mut redemption =
            Self::redemption_tx(&tx, redemption_id)?.ok_or_else(|| {
                RedemptionUpdateError::NotFound {
                    id: redemption_id.to_string(),
                }
            })?;
        if !redemption.status.can_advance_to(to) {
            return Err(RedemptionUpdateError::InvalidTransition {
                id: redemption_id.to_string(),
                from: redemption.status,
                to,
            });
        }

        match to {
            RedemptionStatus::Processing => {
                tx.execute(
                    "UPDATE redemptions SET status = ?2, processed_at_ns = ?3 WHERE id = ?1",
                    params![redemption_id, to.as_str(), timestamp_ns(now)],
                )
                .map_err(StorageError::from)?;
                redemption.processed_at = Some(now);
            },
            RedemptionStatus::Completed => {
                tx.execute(
                    "UPDATE redemptions SET status = ?2, completed_at_ns = ?3 WHERE id = ?1",
                    params![redemption_id, to.as_str(), timestamp_ns(now)],
                )
                .map_err(StorageError::from)?;
                redemption.completed_at = Some(now);
            },
            // can_advance_to admits no other target.
            _ => unreachable!("can_advance_to only admits processing and completed"),
        }

        tx.commit().map_err(StorageError::from)?;

        redemption.status = to;
        Ok(redemption)
    }

    /// Reads a redemption by id.
    pub fn redemption(&self, redemption_id: &str) -> Result<Option<Redemption>, StorageError> {
        let conn = self.conn.lock().unwrap();
        Self::redemption_tx(&conn, redemption_id)
    }

    fn redemption_tx(
        conn: &Connection,
        redemption_id: &str,
    ) -> Result<Option<Redemption>, StorageError> {
        let row = conn
            .query_row(
                "SELECT id, user_id, reward_type, points_used, reward_value, status, failure_reason, created_at_ns, processed_at_ns, completed_at_ns
                 FROM redemptions
                 WHERE id = ?1",
                params![redemption_id],
                raw_redemption_row,
            )
            .optional()?;

        row.map(RawRedemption::parse).transpose()
    }

    /// Reads one page of the user's redemptions, newest first.
    pub fn redemption_history(
        &self,
        user_id: &str,
        page: u64,
        page_size: u64,
    ) -> Result<Vec<Redemption>, StorageError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, user_id, reward_type, points_used, reward_value, status, failure_reason, created_at_ns, processed_at_ns, completed_at_ns
             FROM redemptions
             WHERE user_id = ?1
             ORDER BY created_at_ns DESC, id DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let offset = page.saturating_mul(page_size);
        let rows = stmt
            .query_map(
                params![
                    user_id,
                    i64::try_from(page_size).unwrap_or(i64::MAX),
                    i64::try_from(offset).unwrap_or(i64::MAX)
                ],
                raw_redemption_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawRedemption::parse).collect()
    }

    /// Appends one transaction inside an open SQL transaction, computing
    /// `balance_after` from the latest row for the user.
    fn append_tx(
        tx: &Transaction<'_>,
        user_id: &str,
        amount: i64,
        day: NaiveDate,
        description: &str,
        metadata: &TransactionMetadata,
        created_at: DateTime<Utc>,
    ) -> Result<PointTransaction, StorageError> {
        let previous = Self::balance_tx(tx, user_id)?;
        let balance_after = previous + amount;
        let id = Uuid::new_v4().to_string();
        let kind = metadata.kind();
        let metadata_json =
            serde_json::to_string(metadata).map_err(|e| StorageError::Corrupt {
                id: id.clone(),
                details: format!("metadata failed to serialize: {e}"),
            })?;

        tx.execute(
            "INSERT INTO transactions
             (id, user_id, kind, amount, balance_after, day, description, metadata, created_at_ns)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                user_id,
                kind.as_str(),
                amount,
                balance_after,
                day.to_string(),
                description,
                metadata_json,
                timestamp_ns(created_at),
            ],
        )?;

        Ok(PointTransaction {
            id,
            user_id: user_id.to_string(),
            kind,
            amount,
            balance_after,
            day,
            description: description.to_string(),
            metadata: metadata.clone(),
            created_at,
        })
    }
}

fn timestamp_ns(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(0)
}

fn parse_day(day: &str, table: &str) -> Result<NaiveDate, StorageError> {
    day.parse().map_err(|_| StorageError::Corrupt {
        id: format!("{table} day {day}"),
        details: "not a calendar date".to_string(),
    })
}

struct RawTransaction {
    id: String,
    user_id: String,
    kind: String,
    amount: i64,
    balance_after: i64,
    day: String,
    description: String,
    metadata: String,
    created_at_ns: i64,
}

fn raw_transaction_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTransaction> {
    Ok(RawTransaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: row.get(2)?,
        amount: row.get(3)?,
        balance_after: row.get(4)?,
        day: row.get(5)?,
        description: row.get(6)?,
        metadata: row.get(7)?,
        created_at_ns: row.get(8)?,
    })
}

impl RawTransaction {
    fn parse(self) -> Result<PointTransaction, StorageError> {
        let kind: TransactionKind =
            self.kind.parse().map_err(|_| StorageError::Corrupt {
                id: self.id.clone(),
                details: format!("unknown kind '{}'", self.kind),
            })?;
        let metadata: TransactionMetadata = serde_json::from_str(&self.metadata)
            .map_err(|e| StorageError::Corrupt {
                id: self.id.clone(),
                details: format!("metadata failed to parse: {e}"),
            })?;
        if metadata.kind() != kind {
            return Err(StorageError::Corrupt {
                id: self.id,
                details: format!(
                    "metadata kind {} disagrees with stored kind {kind}",
                    metadata.kind()
                ),
            });
        }
        let day = parse_day(&self.day, "transactions")?;

        Ok(PointTransaction {
            id: self.id,
            user_id: self.user_id,
            kind,
            amount: self.amount,
            balance_after: self.balance_after,
            day,
            description: self.description,
            metadata,
            created_at: DateTime::from_timestamp_nanos(self.created_at_ns),
        })
    }
}

struct RawStepRecord {
    user_id: String,
    day: String,
    steps: i64,
    distance_m: Option<f64>,
    calories: Option<f64>,
    active_minutes: Option<i64>,
    source: String,
    points_earned: i64,
    updated_at_ns: i64,
}

fn raw_step_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawStepRecord> {
    Ok(RawStepRecord {
        user_id: row.get(0)?,
        day: row.get(1)?,
        steps: row.get(2)?,
        distance_m: row.get(3)?,
        calories: row.get(4)?,
        active_minutes: row.get(5)?,
        source: row.get(6)?,
        points_earned: row.get(7)?,
        updated_at_ns: row.get(8)?,
    })
}

impl RawStepRecord {
    fn parse(self) -> Result<StepRecord, StorageError> {
        let day = parse_day(&self.day, "daily_steps")?;
        let source: StepSource =
            self.source.parse().map_err(|_| StorageError::Corrupt {
                id: format!("daily_steps {}/{day}", self.user_id),
                details: format!("unknown source '{}'", self.source),
            })?;

        Ok(StepRecord {
            user_id: self.user_id,
            day,
            steps: self.steps.max(0) as u64,
            distance_m: self.distance_m,
            calories: self.calories,
            active_minutes: self.active_minutes.map(|m| m.max(0) as u32),
            source,
            points_earned: self.points_earned.max(0) as u32,
            updated_at: DateTime::from_timestamp_nanos(self.updated_at_ns),
        })
    }
}

struct RawRedemption {
    id: String,
    user_id: String,
    reward_type: String,
    points_used: i64,
    reward_value: i64,
    status: String,
    failure_reason: Option<String>,
    created_at_ns: i64,
    processed_at_ns: Option<i64>,
    completed_at_ns: Option<i64>,
}

fn raw_redemption_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRedemption> {
    Ok(RawRedemption {
        id: row.get(0)?,
        user_id: row.get(1)?,
        reward_type: row.get(2)?,
        points_used: row.get(3)?,
        reward_value: row.get(4)?,
        status: row.get(5)?,
        failure_reason: row.get(6)?,
        created_at_ns: row.get(7)?,
        processed_at_ns: row.get(8)?,
        completed_at_ns: row.get(9)?,
    })
}

impl RawRedemption {
    fn parse(self) -> Result<Redemption, StorageError> {
        let status: RedemptionStatus =
            self.status.parse().map_err(|_| StorageError::Corrupt {
                id: self.id.clone(),
                details: format!("unknown status '{}'", self.status),
            })?;

        Ok(Redemption {
            id: self.id,
            user_id: self.user_id,
            reward_type: self.reward_type,
            points_used: self.points_used,
            reward_value: self.reward_value,
            status,
            failure_reason: self.failure_reason,
            created_at: DateTime::from_timestamp_nanos(self.created_at_ns),
            processed_at: self.processed_at_ns.map(DateTime::from_timestamp_nanos),
            completed_at: self.completed_at_ns.map(DateTime::from_timestamp_nanos),
        })
    }
}

#[cfg(test)]
mod tests;
