//! walkpoint - operator CLI for the Walkpoint points engine.
//!
//! Opens the ledger database directly and runs one operation per
//! invocation: syncing steps, crediting ad views, granting bonuses,
//! querying balances and limits, and working redemptions.

use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// walkpoint - step-rewards points engine
#[derive(Parser, Debug)]
#[command(name = "walkpoint")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the ledger database
    #[arg(long, default_value = "walkpoint.db")]
    db: PathBuf,

    /// Path to a TOML configuration file (defaults apply when absent)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Emit results as JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the ledger database and verify the configuration
    Init,

    /// Record a health-source step sync and award any points it unlocks
    SyncSteps {
        /// User id
        user: String,

        /// Cumulative step count for the day (running total, not a delta)
        steps: u64,

        /// Day the count belongs to (UTC, defaults to today)
        #[arg(long)]
        day: Option<NaiveDate>,

        /// Distance covered in meters
        #[arg(long)]
        distance_m: Option<f64>,

        /// Energy burned in kcal
        #[arg(long)]
        calories: Option<f64>,

        /// Minutes of activity
        #[arg(long)]
        active_minutes: Option<u32>,

        /// Reporting source (healthkit, google_fit, manual)
        #[arg(long, default_value = "manual")]
        source: String,
    },

    /// Credit a rewarded-ad view
    AdView {
        /// User id
        user: String,

        /// Client-supplied view id (dedup key)
        view_id: String,

        /// Ad unit that served the view
        #[arg(long, default_value = "default")]
        ad_unit: String,

        /// Milliseconds of the ad watched
        #[arg(long)]
        watched_ms: Option<u64>,

        /// Mark the view as not run to completion (earns nothing)
        #[arg(long)]
        incomplete: bool,
    },

    /// Grant a scheduled bonus
    Bonus {
        /// User id
        user: String,

        /// Bonus kind (daily_login, weekly_goal, monthly_challenge, referral)
        kind: String,

        /// Referred user id (required for referral)
        #[arg(long)]
        referred: Option<String>,
    },

    /// Show balance, today's earning, and lifetime earning
    Balance {
        /// User id
        user: String,
    },

    /// Show today's cap usage
    Limits {
        /// User id
        user: String,
    },

    /// List transaction history, newest first
    History {
        /// User id
        user: String,

        /// Page number (0-based)
        #[arg(long, default_value = "0")]
        page: u64,

        /// Transactions per page
        #[arg(long, default_value = "20")]
        page_size: u64,
    },

    /// Show earning and spending statistics
    Stats {
        /// User id
        user: String,
    },

    /// Step record queries
    #[command(subcommand)]
    Steps(StepsCommands),

    /// Redemption operations
    #[command(subcommand)]
    Redeem(RedeemCommands),
}

#[derive(Subcommand, Debug)]
enum StepsCommands {
    /// Show today's step record
    Today {
        /// User id
        user: String,
    },

    /// List step records for an inclusive day range
    Range {
        /// User id
        user: String,

        /// First day (UTC)
        from: NaiveDate,

        /// Last day (UTC)
        to: NaiveDate,
    },

    /// Show step statistics (totals, best day, streaks)
    Stats {
        /// User id
        user: String,
    },
}

#[derive(Subcommand, Debug)]
enum RedeemCommands {
    /// List the redemption catalog
    Options,

    /// Exchange points for a reward
    Request {
        /// User id
        user: String,

        /// Reward type (e.g. amazon_gift)
        reward: String,

        /// Points to spend
        points: i64,
    },

    /// Cancel a pending or processing redemption
    Cancel {
        /// User id
        user: String,

        /// Redemption id
        id: String,
    },

    /// Mark a redemption failed and return its points
    Fail {
        /// Redemption id
        id: String,

        /// Why fulfillment failed
        reason: String,
    },

    /// Advance a redemption (pending -> processing -> completed)
    Advance {
        /// Redemption id
        id: String,

        /// Target status (processing, completed)
        status: String,
    },

    /// List a user's redemptions, newest first
    History {
        /// User id
        user: String,

        /// Page number (0-based)
        #[arg(long, default_value = "0")]
        page: u64,

        /// Redemptions per page
        #[arg(long, default_value = "20")]
        page_size: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let ledger = commands::open_ledger(&cli.db, cli.config.as_deref())?;
    let json = cli.json;

    match cli.command {
        Commands::Init => commands::init(&cli.db),
        Commands::SyncSteps {
            user,
            steps,
            day,
            distance_m,
            calories,
            active_minutes,
            source,
        } => commands::steps::sync(
            &ledger,
            &user,
            steps,
            day,
            distance_m,
            calories,
            active_minutes,
            &source,
            json,
        ),
        Commands::AdView {
            user,
            view_id,
            ad_unit,
            watched_ms,
            incomplete,
        } => commands::points::ad_view(
            &ledger,
            &user,
            &view_id,
            &ad_unit,
            watched_ms,
            !incomplete,
            json,
        ),
        Commands::Bonus {
            user,
            kind,
            referred,
        } => commands::points::bonus(&ledger, &user, &kind, referred.as_deref(), json),
        Commands::Balance { user } => commands::points::balance(&ledger, &user, json),
        Commands::Limits { user } => commands::points::limits(&ledger, &user, json),
        Commands::History {
            user,
            page,
            page_size,
        } => commands::points::history(&ledger, &user, page, page_size, json),
        Commands::Stats { user } => commands::points::stats(&ledger, &user, json),
        Commands::Steps(cmd) => match cmd {
            StepsCommands::Today { user } => commands::steps::today(&ledger, &user, json),
            StepsCommands::Range { user, from, to } => {
                commands::steps::range(&ledger, &user, from, to, json)
            },
            StepsCommands::Stats { user } => commands::steps::stats(&ledger, &user, json),
        },
        Commands::Redeem(cmd) => match cmd {
            RedeemCommands::Options => commands::redeem::options(&ledger, json),
            RedeemCommands::Request {
                user,
                reward,
                points,
            } => commands::redeem::request(&ledger, &user, &reward, points, json),
            RedeemCommands::Cancel { user, id } => {
                commands::redeem::cancel(&ledger, &user, &id, json)
            },
            RedeemCommands::Fail { id, reason } => {
                commands::redeem::fail(&ledger, &id, &reason, json)
            },
            RedeemCommands::Advance { id, status } => {
                commands::redeem::advance(&ledger, &id, &status, json)
            },
            RedeemCommands::History {
                user,
                page,
                page_size,
            } => commands::redeem::history(&ledger, &user, page, page_size, json),
        },
    }
}
