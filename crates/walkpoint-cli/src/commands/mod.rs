//! Command implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use walkpoint_core::{LedgerStore, PointsLedger, SystemClock, WalkpointConfig};

pub mod points;
pub mod redeem;
pub mod steps;

/// Opens the store and builds the engine from the optional config file.
pub fn open_ledger(
    db: &Path,
    config: Option<&Path>,
) -> Result<PointsLedger<SystemClock>> {
    let config = match config {
        Some(path) => WalkpointConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => WalkpointConfig::default(),
    };

    let store = LedgerStore::open(db)
        .with_context(|| format!("failed to open ledger database at {}", db.display()))?;

    Ok(PointsLedger::new(Arc::new(store), config))
}

/// Creates the database (already done by `open_ledger`) and reports it.
pub fn init(db: &Path) -> Result<()> {
    println!("Ledger database ready at {}", db.display());
    Ok(())
}

/// Prints a value as pretty JSON.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize output")?
    );
    Ok(())
}
