//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Order and Balance services (request path)
//! - Reconciler (background oracle polling)
//! - API Server (HTTP endpoints)
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Initialize components
//! 3. Start reconciler and API server
//! 4. Wait for SIGINT
//! 5. Cancel the shared token; both tasks finish their in-flight work

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use loyalty_connectors::{AccrualPort, AccrualRestClient};
use loyalty_store::{MemoryStore, Store};

use crate::api::{create_router, ApiState};
use crate::balance_service::BalanceService;
use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};
use crate::order_service::OrderService;
use crate::reconciler::Reconciler;

// =============================================================================
// Daemon
// =============================================================================

/// The main loyalty daemon.
pub struct Daemon<A: AccrualPort + 'static, S: Store + 'static> {
    /// Configuration
    config: Config,
    /// Accrual oracle
    oracle: Arc<A>,
    /// Ledger store
    store: Arc<S>,
}

impl Daemon<AccrualRestClient, MemoryStore> {
    /// Create a daemon backed by the in-memory store (for development).
    pub fn in_memory(config: Config) -> Self {
        let oracle = Arc::new(AccrualRestClient::new(
            config.accrual.address.clone(),
            config.accrual.timeout,
        ));
        let store = Arc::new(MemoryStore::new());
        Self::new(config, oracle, store)
    }
}

impl<A: AccrualPort + 'static, S: Store + 'static> Daemon<A, S> {
    /// Create a new daemon with provided components.
    pub fn new(config: Config, oracle: Arc<A>, store: Arc<S>) -> Self {
        Self {
            config,
            oracle,
            store,
        }
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT).
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            "Starting loyalty daemon"
        );

        let shutdown = CancellationToken::new();
        let running = self.start(shutdown.clone()).await?;
        info!(api_addr = %running.api_addr, "API server started");

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Received shutdown signal");

        shutdown.cancel();
        running.wait().await;

        info!("Shutdown complete");
        Ok(())
    }

    /// Start the reconciler and the API server in the background.
    ///
    /// Both stop when `shutdown` is cancelled.
    pub async fn start(self, shutdown: CancellationToken) -> DaemonResult<RunningDaemon> {
        let reconciler = Arc::new(Reconciler::new(
            self.oracle.clone(),
            self.store.clone(),
            self.config.reconcile.clone(),
        ));
        let reconciler = reconciler.start(shutdown.clone());

        let (api_addr, server) = self.start_api_server(shutdown).await?;

        Ok(RunningDaemon {
            api_addr,
            reconciler,
            server,
        })
    }

    /// Start the API server.
    async fn start_api_server(
        &self,
        shutdown: CancellationToken,
    ) -> DaemonResult<(SocketAddr, JoinHandle<()>)> {
        let state = Arc::new(ApiState {
            orders: OrderService::new(self.store.clone()),
            balances: BalanceService::new(self.store.clone()),
        });

        let router = create_router(state);
        let api = &self.config.api;

        let listener = TcpListener::bind((api.host.as_str(), api.port)).await.map_err(|e| {
            DaemonError::Config(format!("Failed to bind to {}:{}: {}", api.host, api.port, e))
        })?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| DaemonError::Config(format!("Failed to get local address: {}", e)))?;

        // Spawn the server task
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
            if let Err(e) = result {
                error!(error = %e, "API server error");
            }
        });

        Ok((local_addr, server))
    }
}

/// Handles of a started daemon.
pub struct RunningDaemon {
    /// Address the API server is bound to
    pub api_addr: SocketAddr,
    reconciler: JoinHandle<()>,
    server: JoinHandle<()>,
}

impl RunningDaemon {
    /// Wait for both background tasks to finish.
    ///
    /// Returns once the shutdown token has been cancelled and in-flight
    /// work is done.
    pub async fn wait(self) {
        if let Err(e) = self.reconciler.await {
            error!(error = %e, "Reconciler task panicked");
        }
        if let Err(e) = self.server.await {
            error!(error = %e, "API server task panicked");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
