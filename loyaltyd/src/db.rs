//! Database CLI subcommands for loyaltyd.
//!
//! Provides `db migrate` and `db status` commands.

use anyhow::{anyhow, Result};
use std::time::Duration;

use loyalty_db::{connect, migrate, status};

/// Run database CLI subcommands.
///
/// Supported commands:
/// - `loyaltyd db migrate` - Run pending migrations
/// - `loyaltyd db status` - Check migration status
pub async fn run_db_command(args: &[String]) -> Result<()> {
    let command = args
        .get(2)
        .ok_or_else(|| anyhow!("Usage: loyaltyd db <migrate|status>"))?;

    let database_url = std::env::var("DATABASE_URI")
        .map_err(|_| anyhow!("DATABASE_URI environment variable is required for db commands"))?;

    let pool = connect(&database_url, Duration::from_secs(5)).await?;

    match command.as_str() {
        "migrate" => migrate(&pool).await?,
        "status" => status(&pool).await?,
        other => return Err(anyhow!("Unknown db command: {}", other)),
    }

    Ok(())
}
