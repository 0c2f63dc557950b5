use std::net::SocketAddr;
use std::path::Path;

use metrics_exporter_prometheus::PrometheusBuilder;
use solana_sdk::pubkey::Pubkey;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::error::{Result, SwapError};
use crate::jupiter_client::AggregatorApi;
use crate::ledger::LedgerRpc;
use crate::types::NATIVE_MINT;

pub const LOG_FILE_NAME: &str = "swapseer.log";

/// Below this the wallet cannot cover network fees for a swap.
const LOW_BALANCE_LAMPORTS: u64 = 10_000_000;

/// Initializes the logging system (both console and file).
/// Returns a guard that must be kept alive for file logging to work.
pub fn init_logging(log_dir: &str, file_level: &str, console_level: &str) -> Result<WorkerGuard> {
    let log_path = Path::new(log_dir);
    if !log_path.exists() {
        std::fs::create_dir_all(log_path)?;
    }

    // --- File Logger ---
    let file_appender = rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);

    let file_filter = EnvFilter::try_new(file_level)
        .map_err(|e| SwapError::Config(format!("Invalid file log level filter '{}': {}", file_level, e)))?;
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_appender)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .with_filter(file_filter);

    // --- Console Logger ---
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(console_level))
        .map_err(|e| SwapError::Config(format!("Invalid console log level filter '{}': {}", console_level, e)))?;
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| SwapError::Internal(format!("Failed to initialize tracing subscriber: {}", e)))?;

    Ok(guard)
}

/// Serves Prometheus metrics on `addr`.
pub fn install_metrics_exporter(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| SwapError::Config(format!("Invalid METRICS_ADDR '{}': {}", addr, e)))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| SwapError::Config(format!("Failed to install metrics exporter: {}", e)))?;
    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

// --- Health Monitoring ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentStatus {
    Ok,
    Warning(String),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentHealth {
    pub name: String,
    pub status: ComponentStatus,
}

/// Checks the ledger RPC answers a block height query.
pub async fn check_ledger_health(ledger: &dyn LedgerRpc) -> ComponentHealth {
    let name = "Solana RPC".to_string();
    info!(target: "health_check", component = name, "Running check...");
    match ledger.get_block_height().await {
        Ok(_) => ComponentHealth { name, status: ComponentStatus::Ok },
        Err(e) => ComponentHealth {
            name,
            status: ComponentStatus::Error(format!("Failed RPC check: {}", e)),
        },
    }
}

/// Checks the aggregator answers a metadata lookup for the native mint.
pub async fn check_aggregator_health(aggregator: &dyn AggregatorApi) -> ComponentHealth {
    let name = "Jupiter".to_string();
    info!(target: "health_check", component = name, "Running check...");
    match aggregator.token_info(&NATIVE_MINT).await {
        Ok(Some(_)) => ComponentHealth { name, status: ComponentStatus::Ok },
        Ok(None) => ComponentHealth {
            name,
            status: ComponentStatus::Warning("Native mint unknown to the token API".to_string()),
        },
        Err(e) => ComponentHealth {
            name,
            status: ComponentStatus::Error(format!("Failed aggregator check: {}", e)),
        },
    }
}

/// Warns when the wallet is too low on SOL to pay for a swap.
pub async fn check_wallet_balance(ledger: &dyn LedgerRpc, wallet: &Pubkey) -> ComponentHealth {
    let name = "Wallet".to_string();
    match ledger.get_balance(wallet).await {
        Ok(balance) if balance < LOW_BALANCE_LAMPORTS => ComponentHealth {
            name,
            status: ComponentStatus::Warning(format!("Low wallet balance: {} lamports", balance)),
        },
        Ok(_) => ComponentHealth { name, status: ComponentStatus::Ok },
        Err(e) => ComponentHealth {
            name,
            status: ComponentStatus::Error(format!("Failed to get wallet balance: {}", e)),
        },
    }
}

/// Folds component results into one status and logs each.
pub fn summarize(checks: &[ComponentHealth]) -> ComponentStatus {
    let mut overall = ComponentStatus::Ok;
    for health in checks {
        match &health.status {
            ComponentStatus::Ok => {
                info!(target: "health_check", component = health.name, status = "Ok", "Health check passed");
            }
            ComponentStatus::Warning(msg) => {
                warn!(target: "health_check", component = health.name, status = "Warning", message = msg, "Health check warning");
                if overall == ComponentStatus::Ok {
                    overall = ComponentStatus::Warning("One or more components have warnings".to_string());
                }
            }
            ComponentStatus::Error(msg) => {
                error!(target: "health_check", component = health.name, status = "Error", message = msg, "Health check failed!");
                overall = ComponentStatus::Error("One or more components are unhealthy".to_string());
            }
        }
    }
    overall
}
