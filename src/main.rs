//! RentVault Backend Server
//!
//! HTTP API over rental agreements, deposit-collateralised loans and the
//! reconciler that mirrors their on-chain escrow contracts.

use axum::http::{HeaderName, HeaderValue, Method};
use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::CorsLayer;

use rentvault_server::config::{Config, LedgerMode};
use rentvault_server::db::{self, AgreementStore, PgStore};
use rentvault_server::ledger::{Ledger, LedgerClient, SimulatedLedgerClient, SorobanRpcClient};
use rentvault_server::middleware::PARTY_HEADER;
use rentvault_server::loan::LoanService;
use rentvault_server::reconciler::EventReconciler;
use rentvault_server::routes;
use rentvault_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(environment = config.environment.as_str(), "Starting RentVault server");

    tracing::info!(database = %config.database_url_masked(), "Connecting to database");
    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let store: Arc<dyn AgreementStore> = Arc::new(PgStore::new(pool.clone()));

    let client: Arc<dyn LedgerClient> = match config.ledger_mode {
        LedgerMode::Rpc => {
            tracing::info!(rpc = %config.soroban_rpc_url, "Using Soroban RPC ledger");
            Arc::new(SorobanRpcClient::new(
                config.soroban_rpc_url.clone(),
                config.ledger_poll_interval(),
            ))
        }
        LedgerMode::Simulated => {
            tracing::warn!("Using simulated ledger; no transactions leave this process");
            Arc::new(SimulatedLedgerClient::new())
        }
    };
    let ledger = Ledger::new(client, config.ledger_timeout());

    let app_state = AppState::assemble(store, ledger, config.factory_contract_id.clone());

    let reconciler = app_state.reconciler.clone();
    if let Err(e) = reconciler.start().await {
        tracing::error!("Event reconciler failed to start: {}", e);
    }

    // Periodic on-chain sweep
    let sweep_reconciler = reconciler.clone();
    let interval = config.reconcile_interval();
    tokio::spawn(async move {
        tracing::info!("Reconciliation sweep task started");
        run_every(interval, || sweep_once(sweep_reconciler.clone())).await;
    });

    // Default detection
    let loans = app_state.loan_service.clone();
    tokio::spawn(async move {
        tracing::info!("Default detector task started");
        run_every(interval, || detect_defaults_once(loans.clone())).await;
    });

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health_check).with_state(pool))
        .merge(routes::api_router(app_state))
        .layer(configure_cors(config.cors_allowed_origins.as_deref()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Run `job` on a fixed period, logging failures without stopping
async fn run_every<F, Fut>(period: Duration, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = job().await {
            tracing::error!("Background task failed: {:#}", e);
        }
    }
}

async fn sweep_once(reconciler: Arc<EventReconciler>) -> anyhow::Result<()> {
    let report = reconciler.sweep().await?;
    if report.corrected > 0 {
        tracing::info!(
            checked = report.checked,
            corrected = report.corrected,
            "Sweep corrected agreements from on-chain state"
        );
    }
    Ok(())
}

async fn detect_defaults_once(loans: Arc<LoanService>) -> anyhow::Result<()> {
    let defaulted = loans.detect_defaults(Utc::now()).await?;
    if !defaulted.is_empty() {
        tracing::warn!(count = defaulted.len(), "Loans marked as defaulted");
    }
    Ok(())
}

async fn root() -> &'static str {
    "RentVault API Server"
}

/// Health check response
#[derive(serde::Serialize)]
struct HealthResponse {
    status: String,
    database: String,
    version: String,
}

/// Health check endpoint
async fn health_check(State(pool): State<PgPool>) -> Json<HealthResponse> {
    let db_status = match db::check_health(&pool).await {
        Ok(()) => "connected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    let status = if db_status == "connected" {
        "healthy"
    } else {
        "unhealthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        database: db_status,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn configure_cors(allowed_origins: Option<&str>) -> CorsLayer {
    let allowed_origins = allowed_origins.unwrap_or_default();

    if allowed_origins.trim().is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            HeaderName::from_static(PARTY_HEADER),
        ])
        .max_age(Duration::from_secs(3600))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
