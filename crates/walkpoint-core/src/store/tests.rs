//! Tests for the ledger storage layer.

use chrono::{NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

use super::*;
use crate::transaction::BonusKind;

/// Helper to create a temporary on-disk store for testing.
fn temp_store() -> (LedgerStore, TempDir) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("test_ledger.db");
    let store = LedgerStore::open(&path).expect("failed to open store");
    (store, dir)
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
}

fn at_noon() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn steps_award(user_id: &str, amount: i64, cumulative: u64) -> AwardWrite<'_> {
    AwardWrite {
        user_id,
        day: day(),
        amount,
        steps_delta: u32::try_from(amount).unwrap(),
        ad_delta: 0,
        description: "Steps reward".to_string(),
        metadata: TransactionMetadata::Steps {
            day: day(),
            cumulative_steps: cumulative,
        },
        created_at: at_noon(),
        dedup: None,
        steps_record: None,
    }
}

#[test]
fn fresh_store_has_zero_balance_and_fresh_counters() {
    let store = LedgerStore::in_memory().expect("in-memory store");

    assert_eq!(store.balance("u1").unwrap(), 0);
    let counters = store.counters("u1", day()).unwrap();
    assert_eq!(counters, DailyCounters::fresh("u1", day()));
    assert!(store.history("u1", 0, 10).unwrap().is_empty());
}

#[test]
fn award_appends_and_increments_atomically() {
    let (store, _dir) = temp_store();
    let config = PointsConfig::default();

    let (txn, counters) = store
        .award(&config, &steps_award("u1", 5, 10_000))
        .expect("award should apply")
        .expect("no dedup key, so never a no-op");

    assert_eq!(txn.amount, 5);
    assert_eq!(txn.balance_after, 5);
    assert_eq!(txn.kind, TransactionKind::Steps);
    assert_eq!(counters.steps_points, 5);
    assert_eq!(counters.total_points, 5);

    assert_eq!(store.balance("u1").unwrap(), 5);
    assert_eq!(store.counters("u1", day()).unwrap(), counters);
}

#[test]
fn balance_chain_is_consistent_across_awards() {
    let (store, _dir) = temp_store();
    let config = PointsConfig::default();

    store.award(&config, &steps_award("u1", 3, 6000)).unwrap();
    store.award(&config, &steps_award("u1", 4, 14_000)).unwrap();
    store.award(&config, &steps_award("u1", 2, 18_000)).unwrap();

    let history = store.history("u1", 0, 10).unwrap();
    assert_eq!(history.len(), 3);
    // Newest first.
    assert_eq!(history[0].balance_after, 9);
    assert_eq!(history[1].balance_after, 7);
    assert_eq!(history[2].balance_after, 3);

    // Replaying from zero reproduces every stored balance.
    let mut replayed = 0;
    for txn in history.iter().rev() {
        replayed += txn.amount;
        assert_eq!(txn.balance_after, replayed);
    }
}

#[test]
fn users_do_not_share_balances_or_counters() {
    let (store, _dir) = temp_store();
    let config = PointsConfig::default();

    store.award(&config, &steps_award("u1", 5, 10_000)).unwrap();
    store.award(&config, &steps_award("u2", 3, 6000)).unwrap();

    assert_eq!(store.balance("u1").unwrap(), 5);
    assert_eq!(store.balance("u2").unwrap(), 3);
    assert_eq!(store.counters("u1", day()).unwrap().steps_points, 5);
    assert_eq!(store.counters("u2", day()).unwrap().steps_points, 3);
}

#[test]
fn cap_breach_rolls_back_everything() {
    let (store, _dir) = temp_store();
    let config = PointsConfig::default();

    store.award(&config, &steps_award("u1", 15, 30_000)).unwrap();

    // 15 steps points exist; one more breaches the steps cap.
    let err = store
        .award(&config, &steps_award("u1", 1, 32_000))
        .unwrap_err();
    assert!(matches!(err, AwardError::Cap(_)));

    // Neither the transaction nor the counters moved.
    assert_eq!(store.balance("u1").unwrap(), 15);
    assert_eq!(store.counters("u1", day()).unwrap().steps_points, 15);
    assert_eq!(store.history("u1", 0, 10).unwrap().len(), 1);
}

#[test]
fn ad_view_dedup_key_makes_award_idempotent() {
    let (store, _dir) = temp_store();
    let config = PointsConfig::default();

    let write = |view: &'static str| AwardWrite {
        user_id: "u1",
        day: day(),
        amount: 3,
        steps_delta: 0,
        ad_delta: 3,
        description: "Ad view reward".to_string(),
        metadata: TransactionMetadata::AdView {
            ad_unit_id: "unit-1".to_string(),
            view_id: view.to_string(),
            watched_ms: Some(30_000),
        },
        created_at: at_noon(),
        dedup: Some(DedupKey::AdView {
            view_id: view,
            ad_unit_id: "unit-1",
            watched_ms: Some(30_000),
        }),
        steps_record: None,
    };

    assert!(store.award(&config, &write("view-1")).unwrap().is_some());
    // Redelivery of the same view id changes nothing.
    assert!(store.award(&config, &write("view-1")).unwrap().is_none());
    assert!(store.award(&config, &write("view-2")).unwrap().is_some());

    assert_eq!(store.balance("u1").unwrap(), 6);
    assert_eq!(store.counters("u1", day()).unwrap().ad_points, 6);
}

#[test]
fn bonus_grant_dedup_is_per_period() {
    let (store, _dir) = temp_store();
    let config = PointsConfig::default();

    let write = |period: &'static str| AwardWrite {
        user_id: "u1",
        day: day(),
        amount: 1,
        steps_delta: 0,
        ad_delta: 0,
        description: "Daily login bonus".to_string(),
        metadata: TransactionMetadata::Bonus {
            bonus: BonusKind::DailyLogin,
            period: period.to_string(),
        },
        created_at: at_noon(),
        dedup: Some(DedupKey::BonusGrant {
            kind: "daily_login",
            period,
        }),
        steps_record: None,
    };

    assert!(store.award(&config, &write("2025-06-01")).unwrap().is_some());
    assert!(store.award(&config, &write("2025-06-01")).unwrap().is_none());
    assert!(store.award(&config, &write("2025-06-02")).unwrap().is_some());

    assert_eq!(store.balance("u1").unwrap(), 2);
    // Bonuses do not touch the activity counters.
    assert_eq!(store.counters("u1", day()).unwrap().total_points, 0);
}

#[test]
fn step_record_upserts_to_the_maximum() {
    let (store, _dir) = temp_store();

    let record = |steps: u64, points: u32| StepsRecordWrite {
        user_id: "u1",
        day: day(),
        steps,
        distance_m: Some(1200.0),
        calories: None,
        active_minutes: Some(35),
        source: StepSource::Healthkit,
        points_delta: points,
        updated_at: at_noon(),
    };

    store.record_steps(&record(4000, 0)).unwrap();
    store.record_steps(&record(9000, 2)).unwrap();
    // A regressed re-sync cannot shrink the stored count.
    store.record_steps(&record(7000, 0)).unwrap();

    let stored = store.step_record("u1", day()).unwrap().expect("record");
    assert_eq!(stored.steps, 9000);
    assert_eq!(stored.points_earned, 2);
    assert_eq!(stored.active_minutes, Some(35));
    assert_eq!(stored.source, StepSource::Healthkit);
}

#[test]
fn steps_range_is_ascending_and_inclusive() {
    let (store, _dir) = temp_store();

    for (d, steps) in [(1, 2000_u64), (2, 4000), (4, 6000)] {
        store
            .record_steps(&StepsRecordWrite {
                user_id: "u1",
                day: NaiveDate::from_ymd_opt(2025, 6, d).unwrap(),
                steps,
                distance_m: None,
                calories: None,
                active_minutes: None,
                source: StepSource::GoogleFit,
                points_delta: 0,
                updated_at: at_noon(),
            })
            .unwrap();
    }

    let range = store
        .steps_range(
            "u1",
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 4).unwrap(),
        )
        .unwrap();
    assert_eq!(range.len(), 3);
    assert_eq!(range[0].steps, 2000);
    assert_eq!(range[2].steps, 6000);

    let counts = store.step_day_counts("u1").unwrap();
    assert_eq!(counts.len(), 3);
    assert_eq!(counts[1].steps, 4000);
}

#[test]
fn redemption_spend_checks_balance_in_transaction() {
    let (store, _dir) = temp_store();
    let config = PointsConfig::default();

    store.award(&config, &steps_award("u1", 10, 20_000)).unwrap();

    let err = store
        .apply_redemption(&RedemptionWrite {
            user_id: "u1",
            reward_type: "amazon_gift",
            points_used: 500,
            reward_value: 500,
            description: "Amazon Gift Card".to_string(),
            day: day(),
            created_at: at_noon(),
        })
        .unwrap_err();
    assert!(matches!(
        err,
        RedeemError::InsufficientBalance {
            balance: 10,
            required: 500
        }
    ));

    // Nothing was written.
    assert_eq!(store.balance("u1").unwrap(), 10);
    assert!(store.redemption_history("u1", 0, 10).unwrap().is_empty());
}

#[test]
fn redemption_lifecycle_and_refund() {
    let (store, _dir) = temp_store();
    let config = PointsConfig::default();

    // Build up a redeemable balance across days.
    for d in 1..=40 {
        store
            .award(
                &config,
                &AwardWrite {
                    user_id: "u1",
                    day: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap() + chrono::Days::new(d),
                    amount: 15,
                    steps_delta: 15,
                    ad_delta: 0,
                    description: "Steps reward".to_string(),
                    metadata: TransactionMetadata::Steps {
                        day: day(),
                        cumulative_steps: 30_000,
                    },
                    created_at: at_noon(),
                    dedup: None,
                    steps_record: None,
                },
            )
            .unwrap();
    }
    assert_eq!(store.balance("u1").unwrap(), 600);

    let (spend, redemption) = store
        .apply_redemption(&RedemptionWrite {
            user_id: "u1",
            reward_type: "amazon_gift",
            points_used: 500,
            reward_value: 500,
            description: "Amazon Gift Card".to_string(),
            day: day(),
            created_at: at_noon(),
        })
        .unwrap();
    assert_eq!(spend.amount, -500);
    assert_eq!(spend.balance_after, 100);
    assert_eq!(redemption.status, RedemptionStatus::Pending);

    let advanced = store
        .advance_redemption(&redemption.id, RedemptionStatus::Processing, at_noon())
        .unwrap();
    assert_eq!(advanced.status, RedemptionStatus::Processing);
    assert!(advanced.processed_at.is_some());

    // Refund from processing returns the points and closes the record.
    let (refund, refunded) = store
        .refund_redemption(&redemption.id, RefundKind::Cancelled, Some("u1"), at_noon())
        .unwrap();
    assert_eq!(refund.amount, 500);
    assert_eq!(refund.balance_after, 600);
    assert_eq!(refund.kind, TransactionKind::Adjustment);
    assert_eq!(refunded.status, RedemptionStatus::Cancelled);

    // A second refund is rejected; the spend row itself is untouched.
    let err = store
        .refund_redemption(&redemption.id, RefundKind::Cancelled, Some("u1"), at_noon())
        .unwrap_err();
    assert!(matches!(
        err,
        RedemptionUpdateError::NotRefundable {
            status: RedemptionStatus::Cancelled,
            ..
        }
    ));
}

#[test]
fn refund_hides_other_users_redemptions() {
    let (store, _dir) = temp_store();
    let config = PointsConfig::default();

    for d in 1..=40 {
        store
            .award(
                &config,
                &AwardWrite {
                    user_id: "u1",
                    day: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap() + chrono::Days::new(d),
                    amount: 15,
                    steps_delta: 15,
                    ad_delta: 0,
                    description: "Steps reward".to_string(),
                    metadata: TransactionMetadata::Steps {
                        day: day(),
                        cumulative_steps: 30_000,
                    },
                    created_at: at_noon(),
                    dedup: None,
                    steps_record: None,
                },
            )
            .unwrap();
    }

    let (_, redemption) = store
        .apply_redemption(&RedemptionWrite {
            user_id: "u1",
            reward_type: "amazon_gift",
            points_used: 500,
            reward_value: 500,
            description: "Amazon Gift Card".to_string(),
            day: day(),
            created_at: at_noon(),
        })
        .unwrap();

    let err = store
        .refund_redemption(&redemption.id, RefundKind::Cancelled, Some("u2"), at_noon())
        .unwrap_err();
    assert!(matches!(err, RedemptionUpdateError::NotFound { .. }));
}

#[test]
fn invalid_advance_is_rejected() {
    let (store, _dir) = temp_store();
    let config = PointsConfig::default();

    for d in 1..=40 {
        store
            .award(
                &config,
                &AwardWrite {
                    user_id: "u1",
                    day: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap() + chrono::Days::new(d),
                    amount: 15,
                    steps_delta: 15,
                    ad_delta: 0,
                    description: "Steps reward".to_string(),
                    metadata: TransactionMetadata::Steps {
                        day: day(),
                        cumulative_steps: 30_000,
                    },
                    created_at: at_noon(),
                    dedup: None,
                    steps_record: None,
                },
            )
            .unwrap();
    }

    let (_, redemption) = store
        .apply_redemption(&RedemptionWrite {
            user_id: "u1",
            reward_type: "amazon_gift",
            points_used: 500,
            reward_value: 500,
            description: "Amazon Gift Card".to_string(),
            day: day(),
            created_at: at_noon(),
        })
        .unwrap();

    let err = store
        .advance_redemption(&redemption.id, RedemptionStatus::Completed, at_noon())
        .unwrap_err();
    assert!(matches!(
        err,
        RedemptionUpdateError::InvalidTransition {
            from: RedemptionStatus::Pending,
            to: RedemptionStatus::Completed,
            ..
        }
    ));

    let err = store
        .advance_redemption("no-such-id", RedemptionStatus::Processing, at_noon())
        .unwrap_err();
    assert!(matches!(err, RedemptionUpdateError::NotFound { .. }));
}

#[test]
fn earning_aggregates() {
    let (store, _dir) = temp_store();
    let config = PointsConfig::default();

    let day2 = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    store.award(&config, &steps_award("u1", 15, 30_000)).unwrap();
    store
        .award(
            &config,
            &AwardWrite {
                user_id: "u1",
                day: day2,
                amount: 10,
                steps_delta: 10,
                ad_delta: 0,
                description: "Steps reward".to_string(),
                metadata: TransactionMetadata::Steps {
                    day: day2,
                    cumulative_steps: 20_000,
                },
                created_at: at_noon(),
                dedup: None,
                steps_record: None,
            },
        )
        .unwrap();

    assert_eq!(store.earned_on_day("u1", day()).unwrap(), 15);
    assert_eq!(store.earned_on_day("u1", day2).unwrap(), 10);
    assert_eq!(store.lifetime_earned("u1").unwrap(), 25);
    assert_eq!(store.total_redeemed("u1").unwrap(), 0);

    let totals = store.earning_day_totals("u1").unwrap();
    assert_eq!(totals, vec![(day(), 15), (day2, 10)]);
}

#[test]
fn history_pagination_is_restartable() {
    let (store, _dir) = temp_store();
    let config = PointsConfig::default();

    for i in 1..=5_i64 {
        store
            .award(
                &config,
                &AwardWrite {
                    user_id: "u1",
                    day: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
                        + chrono::Days::new(u64::try_from(i).unwrap()),
                    amount: i,
                    steps_delta: u32::try_from(i).unwrap(),
                    ad_delta: 0,
                    description: format!("Steps reward {i}"),
                    metadata: TransactionMetadata::Steps {
                        day: day(),
                        cumulative_steps: 2000 * u64::try_from(i).unwrap(),
                    },
                    created_at: at_noon(),
                    dedup: None,
                    steps_record: None,
                },
            )
            .unwrap();
    }

    let page0 = store.history("u1", 0, 2).unwrap();
    let page1 = store.history("u1", 1, 2).unwrap();
    let page2 = store.history("u1", 2, 2).unwrap();

    assert_eq!(page0.len(), 2);
    assert_eq!(page1.len(), 2);
    assert_eq!(page2.len(), 1);
    // Newest first across pages.
    assert_eq!(page0[0].amount, 5);
    assert_eq!(page1[0].amount, 3);
    assert_eq!(page2[0].amount, 1);
}

#[test]
fn metadata_roundtrips_through_storage() {
    let (store, _dir) = temp_store();
    let config = PointsConfig::default();

    let metadata = TransactionMetadata::AdView {
        ad_unit_id: "unit-9".to_string(),
        view_id: "view-9".to_string(),
        watched_ms: None,
    };
    store
        .award(
            &config,
            &AwardWrite {
                user_id: "u1",
                day: day(),
                amount: 3,
                steps_delta: 0,
                ad_delta: 3,
                description: "Ad view reward".to_string(),
                metadata: metadata.clone(),
                created_at: at_noon(),
                dedup: Some(DedupKey::AdView {
                    view_id: "view-9",
                    ad_unit_id: "unit-9",
                    watched_ms: None,
                }),
                steps_record: None,
            },
        )
        .unwrap();

    let history = store.history("u1", 0, 1).unwrap();
    assert_eq!(history[0].metadata, metadata);
    assert_eq!(history[0].kind, TransactionKind::AdView);
}
