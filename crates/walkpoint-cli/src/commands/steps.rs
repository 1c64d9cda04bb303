//! Step record commands.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use walkpoint_core::{PointsLedger, StepsSync, SystemClock};

use super::print_json;

/// Record a health-source sync and award any points it unlocks.
#[allow(clippy::too_many_arguments)]
pub fn sync(
    ledger: &PointsLedger<SystemClock>,
    user: &str,
    steps: u64,
    day: Option<NaiveDate>,
    distance_m: Option<f64>,
    calories: Option<f64>,
    active_minutes: Option<u32>,
    source: &str,
    json: bool,
) -> Result<()> {
    let source = source
        .parse()
        .with_context(|| format!("invalid step source '{source}'"))?;
    let sync = StepsSync {
        day: day.unwrap_or_else(|| chrono::Utc::now().date_naive()),
        steps,
        distance_m,
        calories,
        active_minutes,
        source,
    };

    let outcome = ledger.sync_steps(user, &sync)?;

    if json {
        return print_json(&serde_json::json!({
            "transaction": outcome.transaction,
            "counters": outcome.counters,
            "record": outcome.record,
        }));
    }
    match &outcome.transaction {
        Some(txn) => println!(
            "Synced {} steps, awarded {} point(s), balance {}",
            steps, txn.amount, txn.balance_after
        ),
        None => println!("Synced {steps} steps, nothing new to award"),
    }
    Ok(())
}

/// Show today's step record.
pub fn today(ledger: &PointsLedger<SystemClock>, user: &str, json: bool) -> Result<()> {
    let record = ledger.steps_today(user)?;

    if json {
        return print_json(&record);
    }
    match record {
        Some(record) => println!(
            "{}: {} steps ({} point(s) earned, source {})",
            record.day, record.steps, record.points_earned, record.source
        ),
        None => println!("No sync recorded today"),
    }
    Ok(())
}

/// List step records for an inclusive day range.
pub fn range(
    ledger: &PointsLedger<SystemClock>,
    user: &str,
    from: NaiveDate,
    to: NaiveDate,
    json: bool,
) -> Result<()> {
    let records = ledger.steps_range(user, from, to)?;

    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No records between {from} and {to}");
        return Ok(());
    }
    for record in records {
        println!(
            "{}  {:>6} steps  {:>2} point(s)  {}",
            record.day, record.steps, record.points_earned, record.source
        );
    }
    Ok(())
}

/// Show step statistics.
pub fn stats(ledger: &PointsLedger<SystemClock>, user: &str, json: bool) -> Result<()> {
    let stats = ledger.steps_statistics(user)?;

    if json {
        return print_json(&stats);
    }
    println!("Total steps:    {}", stats.total_steps);
    println!("Average daily:  {}", stats.average_daily);
    match stats.best_day {
        Some(best) => println!("Best day:       {} ({} steps)", best.day, best.steps),
        None => println!("Best day:       none yet"),
    }
    println!("Current streak: {} day(s)", stats.current_streak);
    println!("Longest streak: {} day(s)", stats.longest_streak);
    Ok(())
}
