//! fulfilment-sync
//!
//! Keeps a local cache of the inventory system's awaiting-fulfilment sales in
//! step with the remote set and writes entered orders onto the production
//! spreadsheet's entry and day sheets. UI event handlers drive it through
//! [`commands`] against an open [`session::Session`].

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod cache;
pub mod columns;
pub mod commands;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod fulfilment;
pub mod inventory;
pub mod layout;
pub mod rate_limit;
pub mod reconcile;
pub mod rows;
pub mod session;
pub mod sheet_sync;
pub mod sheets;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use session::Session;

use db::DbState;
use inventory::DearClient;
use rate_limit::RateLimiter;
use sheets::GoogleSheetsClient;

/// Install console and daily-rolling file logging.
///
/// `RUST_LOG` overrides the default filter. Keep the returned guard alive
/// for as long as logs should be written; dropping it flushes the file.
pub fn init_logging(log_dir: &Path) -> WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fulfilment_sync=debug"));

    diagnostics::prune_old_logs(log_dir);
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!("cannot create log dir {}: {e}", log_dir.display());
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);

    if tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        warn!("a global tracing subscriber was already installed");
    }

    info!("Starting fulfilment-sync v{}", env!("CARGO_PKG_VERSION"));
    guard
}

/// Process-wide state: the database, settings and the inventory rate limiter
/// every session shares.
pub struct Backend {
    pub db: Arc<DbState>,
    pub config: AppConfig,
    pub limiter: Arc<RateLimiter>,
}

impl Backend {
    /// Open the database under `data_dir` and load the settings.
    pub fn start(data_dir: &Path) -> Result<Self> {
        let db = Arc::new(db::init(data_dir)?);
        let config = db.with_conn(|conn| Ok(AppConfig::load(conn)))??;
        let limiter = Arc::new(RateLimiter::new(
            config.requests_per_second,
            config.queue_depth,
        ));
        info!(
            requests_per_second = config.requests_per_second,
            queue_depth = config.queue_depth,
            "backend ready"
        );
        Ok(Self { db, config, limiter })
    }

    /// Open a spreadsheet with the production clients.
    pub async fn open_session(
        &self,
        spreadsheet_id: &str,
    ) -> Result<Session<GoogleSheetsClient, DearClient>> {
        Session::connect(
            self.config.clone(),
            self.db.clone(),
            self.limiter.clone(),
            spreadsheet_id,
            Utc::now(),
        )
        .await
    }
}
