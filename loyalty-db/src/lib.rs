//! Database lifecycle management for the loyalty ledger.
//!
//! Provides pool setup, migration running and status checking.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{info, warn};

/// Result type for DB operations.
pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// Open a connection pool and verify connectivity.
///
/// `acquire_timeout` bounds how long a caller waits for a free connection.
pub async fn connect(database_url: &str, acquire_timeout: Duration) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await?;

    ping(&pool).await?;
    Ok(pool)
}

/// Run all pending migrations.
///
/// Uses sqlx migrations from the workspace `migrations` directory.
/// Idempotent: safe to run multiple times.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    sqlx::migrate!("../migrations").run(pool).await?;

    info!("Migrations completed successfully");
    Ok(())
}

async fn ping(pool: &PgPool) -> Result<()> {
    let result: i32 = sqlx::query_scalar("SELECT 1").fetch_one(pool).await?;

    if result != 1 {
        return Err(anyhow::anyhow!("Database connectivity check failed"));
    }
    Ok(())
}

/// Check database connectivity and migration status.
///
/// Logs the latest applied migrations.
pub async fn status(pool: &PgPool) -> Result<()> {
    ping(pool).await?;
    info!("Database connectivity: OK");

    let rows = sqlx::query(
        r#"
        SELECT version, description, installed_on::text AS installed_on, success
        FROM _sqlx_migrations
        ORDER BY version DESC
        LIMIT 10
        "#,
    )
    .fetch_all(pool)
    .await;

    match rows {
        Ok(migs) if !migs.is_empty() => {
            info!("Latest migrations:");
            for mig in migs {
                let version: i64 = mig.try_get("version")?;
                let description: String = mig.try_get("description")?;
                let installed_on: Option<String> = mig.try_get("installed_on")?;
                let success: bool = mig.try_get("success")?;

                let status = if success { "ok" } else { "FAILED" };
                info!(
                    "  [{}] v{}: {} ({})",
                    status,
                    version,
                    description,
                    installed_on.unwrap_or_else(|| "N/A".to_string())
                );
            }
        },
        Ok(_) => {
            warn!("No migrations found in database (run `loyaltyd db migrate` first)");
        },
        Err(e) => {
            // Table might not exist yet
            if e.to_string().contains("_sqlx_migrations") {
                warn!("Migration table not found (run `loyaltyd db migrate` first)");
            } else {
                return Err(e.into());
            }
        },
    }

    Ok(())
}
