//! Property-based tests for the earning policy.
//!
//! These verify the cap, idempotence, and conservation invariants under
//! arbitrary interleavings of step reports and ad views.

use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use proptest::prelude::*;

use super::{AdViewEvent, PointsLedger};
use crate::clock::FixedClock;
use crate::config::WalkpointConfig;
use crate::store::LedgerStore;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
}

fn ledger() -> PointsLedger<FixedClock> {
    let store = Arc::new(LedgerStore::in_memory().expect("in-memory store"));
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap());
    PointsLedger::with_clock(store, WalkpointConfig::default(), clock)
}

/// One activity event as the outside world would deliver it.
#[derive(Debug, Clone)]
enum Event {
    StepsReport(u64),
    AdView { view_id: u8, completed: bool },
}

fn event_strategy() -> impl Strategy<Value = Event> {
    prop_oneof![
        (0u64..60_000).prop_map(Event::StepsReport),
        (any::<u8>(), any::<bool>()).prop_map(|(view_id, completed)| Event::AdView {
            view_id,
            completed
        }),
    ]
}

proptest! {
    /// Property: no event sequence pushes any counter past its cap.
    #[test]
    fn prop_caps_always_hold(events in prop::collection::vec(event_strategy(), 0..40)) {
        let ledger = ledger();

        for event in events {
            match event {
                Event::StepsReport(steps) => {
                    ledger.earn_from_steps("u1", day(), steps).unwrap();
                },
                Event::AdView { view_id, completed } => {
                    let event = AdViewEvent {
                        view_id: format!("view-{view_id}"),
                        ad_unit_id: "unit-1".to_string(),
                        watched_ms: None,
                        completed,
                    };
                    ledger.earn_from_ad("u1", day(), &event).unwrap();
                },
            }
        }

        let limits = ledger.daily_limits("u1").unwrap();
        prop_assert!(limits.steps.current <= 15);
        prop_assert!(limits.ads.current <= 15);
        prop_assert!(limits.total.current <= 25);
        prop_assert!(ledger.balance("u1").unwrap() <= 25);
    }

    /// Property: the total counter always equals steps + ads.
    #[test]
    fn prop_total_is_steps_plus_ads(events in prop::collection::vec(event_strategy(), 0..40)) {
        let ledger = ledger();

        for event in events {
            match event {
                Event::StepsReport(steps) => {
                    ledger.earn_from_steps("u1", day(), steps).unwrap();
                },
                Event::AdView { view_id, completed } => {
                    let event = AdViewEvent {
                        view_id: format!("view-{view_id}"),
                        ad_unit_id: "unit-1".to_string(),
                        watched_ms: None,
                        completed,
                    };
                    ledger.earn_from_ad("u1", day(), &event).unwrap();
                },
            }

            let limits = ledger.daily_limits("u1").unwrap();
            prop_assert_eq!(
                limits.total.current,
                limits.steps.current + limits.ads.current
            );
        }
    }

    /// Property: repeating a step report awards only on the first delivery,
    /// and a regressed report never decreases anything.
    #[test]
    fn prop_steps_idempotent_and_monotone(
        first in 0u64..60_000,
        second in 0u64..60_000,
    ) {
        let ledger = ledger();

        ledger.earn_from_steps("u1", day(), first).unwrap();
        let after_first = ledger.balance("u1").unwrap();

        // Same report again: no movement.
        let repeat = ledger.earn_from_steps("u1", day(), first).unwrap();
        prop_assert!(repeat.transaction.is_none());
        prop_assert_eq!(ledger.balance("u1").unwrap(), after_first);

        // Any second report: balance never drops.
        ledger.earn_from_steps("u1", day(), second).unwrap();
        let after_second = ledger.balance("u1").unwrap();
        prop_assert!(after_second >= after_first);

        // And the award matches the larger cumulative count, capped.
        let expected = (first.max(second) / 2000).min(15);
        prop_assert_eq!(after_second as u64, expected);
    }

    /// Property: every stored balance is the replay of the history before it.
    #[test]
    fn prop_history_replays_to_balance(events in prop::collection::vec(event_strategy(), 0..40)) {
        let ledger = ledger();

        for event in events {
            match event {
                Event::StepsReport(steps) => {
                    ledger.earn_from_steps("u1", day(), steps).unwrap();
                },
                Event::AdView { view_id, completed } => {
                    let event = AdViewEvent {
                        view_id: format!("view-{view_id}"),
                        ad_unit_id: "unit-1".to_string(),
                        watched_ms: None,
                        completed,
                    };
                    ledger.earn_from_ad("u1", day(), &event).unwrap();
                },
            }
        }

        let history = ledger.history("u1", 0, 1000).unwrap();
        let mut replayed = 0;
        for txn in history.iter().rev() {
            replayed += txn.amount;
            prop_assert_eq!(txn.balance_after, replayed);
        }
        prop_assert_eq!(replayed, ledger.balance("u1").unwrap());
    }
}
