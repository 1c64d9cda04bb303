//! Points commands: earning, balances, limits, history.

use anyhow::{Result, bail};
use walkpoint_core::{AdViewEvent, BonusGrant, PointsLedger, SystemClock};

use super::print_json;

/// Credit a rewarded-ad view.
pub fn ad_view(
    ledger: &PointsLedger<SystemClock>,
    user: &str,
    view_id: &str,
    ad_unit: &str,
    watched_ms: Option<u64>,
    completed: bool,
    json: bool,
) -> Result<()> {
    let event = AdViewEvent {
        view_id: view_id.to_string(),
        ad_unit_id: ad_unit.to_string(),
        watched_ms,
        completed,
    };
    let today = chrono::Utc::now().date_naive();
    let outcome = ledger.earn_from_ad(user, today, &event)?;

    if json {
        return print_json(&serde_json::json!({
            "transaction": outcome.transaction,
            "counters": outcome.counters,
        }));
    }
    match outcome.transaction {
        Some(txn) => println!(
            "Awarded {} point(s) for ad view, balance {}",
            txn.amount, txn.balance_after
        ),
        None => println!("Nothing to award (limit reached, duplicate, or incomplete view)"),
    }
    Ok(())
}

/// Grant a scheduled bonus.
pub fn bonus(
    ledger: &PointsLedger<SystemClock>,
    user: &str,
    kind: &str,
    referred: Option<&str>,
    json: bool,
) -> Result<()> {
    let grant = match kind {
        "daily_login" => BonusGrant::DailyLogin,
        "weekly_goal" => BonusGrant::WeeklyGoal,
        "monthly_challenge" => BonusGrant::MonthlyChallenge,
        "referral" => match referred {
            Some(referred) => BonusGrant::Referral {
                referred_user_id: referred.to_string(),
            },
            None => bail!("--referred is required for referral bonuses"),
        },
        other => bail!(
            "unknown bonus kind '{other}' (expected daily_login, weekly_goal, monthly_challenge, or referral)"
        ),
    };

    let outcome = ledger.earn_bonus(user, &grant)?;

    if json {
        return print_json(&serde_json::json!({
            "transaction": outcome.transaction,
        }));
    }
    match outcome.transaction {
        Some(txn) => println!(
            "Granted {} bonus point(s), balance {}",
            txn.amount, txn.balance_after
        ),
        None => println!("Bonus already granted for this period"),
    }
    Ok(())
}

/// Show balance figures.
pub fn balance(ledger: &PointsLedger<SystemClock>, user: &str, json: bool) -> Result<()> {
    let summary = ledger.balance_summary(user)?;

    if json {
        return print_json(&summary);
    }
    println!("Balance:         {}", summary.balance);
    println!("Earned today:    {}", summary.earned_today);
    println!("Earned lifetime: {}", summary.lifetime_earned);
    Ok(())
}

/// Show today's cap usage.
pub fn limits(ledger: &PointsLedger<SystemClock>, user: &str, json: bool) -> Result<()> {
    let limits = ledger.daily_limits(user)?;

    if json {
        return print_json(&limits);
    }
    println!("Steps points: {}/{}", limits.steps.current, limits.steps.max);
    println!("Ad points:    {}/{}", limits.ads.current, limits.ads.max);
    println!("Total today:  {}/{}", limits.total.current, limits.total.max);
    Ok(())
}

/// List transaction history, newest first.
pub fn history(
    ledger: &PointsLedger<SystemClock>,
    user: &str,
    page: u64,
    page_size: u64,
    json: bool,
) -> Result<()> {
    let transactions = ledger.history(user, page, page_size)?;

    if json {
        return print_json(&transactions);
    }
    if transactions.is_empty() {
        println!("No transactions on page {page}");
        return Ok(());
    }
    for txn in transactions {
        println!(
            "{}  {:>+5}  {:>6}  {:<10}  {}",
            txn.created_at.format("%Y-%m-%d %H:%M:%S"),
            txn.amount,
            txn.balance_after,
            txn.kind,
            txn.description
        );
    }
    Ok(())
}

/// Show earning and spending statistics.
pub fn stats(ledger: &PointsLedger<SystemClock>, user: &str, json: bool) -> Result<()> {
    let stats = ledger.points_statistics(user)?;

    if json {
        return print_json(&stats);
    }
    println!("Total earned:   {}", stats.total_earned);
    println!("Total redeemed: {}", stats.total_redeemed);
    println!("Average daily:  {:.1}", stats.average_daily);
    match stats.best_day {
        Some((day, points)) => println!("Best day:       {day} ({points} points)"),
        None => println!("Best day:       none yet"),
    }
    Ok(())
}
