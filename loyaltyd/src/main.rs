//! Loyalty Daemon
//!
//! Runtime orchestrator for the reconciler and API server.
//!
//! # Usage
//!
//! ```bash
//! # Start with the in-memory store
//! cargo run -p loyaltyd
//!
//! # Start against PostgreSQL (migrations run at startup)
//! DATABASE_URI=postgres://localhost/loyalty cargo run -p loyaltyd --features postgres
//!
//! # Database maintenance
//! cargo run -p loyaltyd --features postgres -- db migrate
//! ```
//!
//! # Environment Variables
//!
//! - `LOYALTY_ENV`: Environment (test, development, production)
//! - `RUN_ADDRESS`: API bind address as host:port (default: 0.0.0.0:8080)
//! - `LOYALTY_API_HOST`: API host (overrides `RUN_ADDRESS`)
//! - `LOYALTY_API_PORT`: API port (overrides `RUN_ADDRESS`)
//! - `DATABASE_URI`: PostgreSQL DSN (unset: in-memory store)
//! - `ACCRUAL_SYSTEM_ADDRESS`: Accrual oracle URL (default: http://localhost:8081)
//! - `LOYALTY_RECONCILE_INTERVAL_MS`: Tick interval (default: 500)
//! - `LOYALTY_RECONCILE_BATCH`: Orders per tick (default: 100)
//! - `LOYALTY_RECONCILE_MAX_PAUSE_MS`: Cap on a Retry-After pause (default: 60000)
//! - `LOYALTY_ORACLE_TIMEOUT_MS`: Oracle request timeout (default: 5000)
//! - `LOYALTY_STORE_TIMEOUT_MS`: Ledger operation timeout (default: 500)

use loyaltyd::{Config, Daemon};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("loyaltyd=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("db") {
        return run_db(&args).await;
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        accrual = %config.accrual.address,
        "Loyalty Daemon"
    );

    match config.store.database_url.clone() {
        Some(url) => run_postgres(config, &url).await,
        None => {
            info!("DATABASE_URI not set, using in-memory store");
            Daemon::in_memory(config).run().await?;
            Ok(())
        },
    }
}

#[cfg(feature = "postgres")]
async fn run_db(args: &[String]) -> anyhow::Result<()> {
    loyaltyd::db::run_db_command(args).await
}

#[cfg(not(feature = "postgres"))]
async fn run_db(_args: &[String]) -> anyhow::Result<()> {
    anyhow::bail!("db commands require the `postgres` feature")
}

#[cfg(feature = "postgres")]
async fn run_postgres(config: Config, url: &str) -> anyhow::Result<()> {
    use loyalty_connectors::AccrualRestClient;
    use loyalty_store::PgStore;
    use std::sync::Arc;
    use std::time::Duration;

    let pool = loyalty_db::connect(url, Duration::from_secs(5)).await?;
    loyalty_db::migrate(&pool).await?;

    let store = Arc::new(PgStore::new(Arc::new(pool), config.store.timeout));
    let oracle = Arc::new(AccrualRestClient::new(
        config.accrual.address.clone(),
        config.accrual.timeout,
    ));

    info!("Using PostgreSQL store");
    Daemon::new(config, oracle, store).run().await?;
    Ok(())
}

#[cfg(not(feature = "postgres"))]
async fn run_postgres(_config: Config, _url: &str) -> anyhow::Result<()> {
    anyhow::bail!("DATABASE_URI is set but loyaltyd was built without the `postgres` feature")
}
