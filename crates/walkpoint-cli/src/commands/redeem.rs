//! Redemption commands.

use anyhow::{Result, bail};
use walkpoint_core::{PointsLedger, RedemptionStatus, SystemClock};

use super::print_json;

/// List the redemption catalog.
pub fn options(ledger: &PointsLedger<SystemClock>, json: bool) -> Result<()> {
    let options = ledger.redemption_options();

    if json {
        return print_json(&options);
    }
    for option in options {
        let availability = if option.available { "" } else { "  (coming soon)" };
        println!(
            "{:<12}  {}  min {} points{}",
            option.reward_type, option.name, option.min_points, availability
        );
    }
    Ok(())
}

/// Exchange points for a reward.
pub fn request(
    ledger: &PointsLedger<SystemClock>,
    user: &str,
    reward: &str,
    points: i64,
    json: bool,
) -> Result<()> {
    let outcome = ledger.request_redemption(user, reward, points)?;

    if json {
        return print_json(&outcome.redemption);
    }
    println!(
        "Redemption {} requested: {} points -> {} (value {}), balance {}",
        outcome.redemption.id,
        outcome.redemption.points_used,
        outcome.redemption.reward_type,
        outcome.redemption.reward_value,
        outcome.transaction.balance_after
    );
    Ok(())
}

/// Cancel a pending or processing redemption.
pub fn cancel(
    ledger: &PointsLedger<SystemClock>,
    user: &str,
    id: &str,
    json: bool,
) -> Result<()> {
    let outcome = ledger.cancel_redemption(user, id)?;

    if json {
        return print_json(&outcome.redemption);
    }
    println!(
        "Redemption {} cancelled, {} points returned, balance {}",
        outcome.redemption.id, outcome.transaction.amount, outcome.transaction.balance_after
    );
    Ok(())
}

/// Mark a redemption failed and return its points.
pub fn fail(
    ledger: &PointsLedger<SystemClock>,
    id: &str,
    reason: &str,
    json: bool,
) -> Result<()> {
    let outcome = ledger.fail_redemption(id, reason)?;

    if json {
        return print_json(&outcome.redemption);
    }
    println!(
        "Redemption {} failed ({}), {} points returned",
        outcome.redemption.id, reason, outcome.transaction.amount
    );
    Ok(())
}

/// Advance a redemption through fulfillment.
pub fn advance(
    ledger: &PointsLedger<SystemClock>,
    id: &str,
    status: &str,
    json: bool,
) -> Result<()> {
    let to = match status {
        "processing" => RedemptionStatus::Processing,
        "completed" => RedemptionStatus::Completed,
        other => bail!("cannot advance to '{other}' (expected processing or completed)"),
    };

    let redemption = ledger.advance_redemption(id, to)?;

    if json {
        return print_json(&redemption);
    }
    println!("Redemption {} is now {}", redemption.id, redemption.status);
    Ok(())
}

/// List a user's redemptions, newest first.
pub fn history(
    ledger: &PointsLedger<SystemClock>,
    user: &str,
    page: u64,
    page_size: u64,
    json: bool,
) -> Result<()> {
    let redemptions = ledger.redemption_history(user, page, page_size)?;

    if json {
        return print_json(&redemptions);
    }
    if redemptions.is_empty() {
        println!("No redemptions on page {page}");
        return Ok(());
    }
    for redemption in redemptions {
        println!(
            "{}  {}  {:>6} points  {:<10}  {}",
            redemption.created_at.format("%Y-%m-%d %H:%M:%S"),
            redemption.id,
            redemption.points_used,
            redemption.status,
            redemption.reward_type
        );
    }
    Ok(())
}
