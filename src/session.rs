//! One open spreadsheet.
//!
//! Opening stamps the spreadsheet's cache scope, drops scopes nobody opened
//! within `max_sheet_age_days` and then reads the `Automation` layout sheet.
//! The scope is stamped even when the layout turns out to be unusable.
//! Everything the UI does afterwards goes through the [`Session`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::cache::{self, SqliteSaleCache};
use crate::config::AppConfig;
use crate::db::DbState;
use crate::error::{Error, Result};
use crate::fulfilment::{authorize_fulfilment, FulfilmentRecord};
use crate::inventory::{DearClient, InventoryApi, Sale};
use crate::layout::{SheetLayoutConfig, LAYOUT_SHEET};
use crate::rate_limit::RateLimiter;
use crate::reconcile::{
    ConfirmReset, OrderCacheReconciler, Partition, Progress, ReloadOutcome, SyncReport,
};
use crate::sheet_sync::{AddOutcome, RemoveOutcome, SheetSyncEngine};
use crate::sheets::{GoogleSheetsClient, MajorDimension, SheetsApi};
use crate::storage;

/// Read and parse the layout sheet.
pub async fn load_layout<S: SheetsApi>(sheets: &S) -> Result<SheetLayoutConfig> {
    let values = sheets.get_values(LAYOUT_SHEET, MajorDimension::Columns).await?;
    let layout = SheetLayoutConfig::parse(&values).map_err(|e| {
        warn!(error = %e, "layout sheet could not be parsed");
        Error::Layout(e)
    })?;
    Ok(layout)
}

pub struct Session<S, I> {
    config: AppConfig,
    spreadsheet_id: String,
    engine: SheetSyncEngine<S>,
    reconciler: OrderCacheReconciler<I, SqliteSaleCache>,
}

impl Session<GoogleSheetsClient, DearClient> {
    /// Open `spreadsheet_id` with the production clients, using the
    /// credentials from the OS credential store.
    pub async fn connect(
        config: AppConfig,
        db: Arc<DbState>,
        limiter: Arc<RateLimiter>,
        spreadsheet_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let sheets = GoogleSheetsClient::new(
            &config.sheets_base_url,
            spreadsheet_id,
            storage::load_sheets_token()?,
            config.http_timeout(),
        )?;
        let inventory = DearClient::new(
            &config.inventory_base_url,
            storage::load_inventory_credentials()?,
            limiter,
            config.http_timeout(),
            config.page_limit,
        )?;
        Self::open(config, db, spreadsheet_id, sheets, inventory, now).await
    }
}

impl<S: SheetsApi, I: InventoryApi> Session<S, I> {
    pub async fn open(
        config: AppConfig,
        db: Arc<DbState>,
        spreadsheet_id: &str,
        sheets: S,
        inventory: I,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let cache = SqliteSaleCache::open(db.clone(), spreadsheet_id, now)?;
        let trimmed = cache::trim_scopes_older_than(&db, config.max_sheet_age(), now)?;
        if !trimmed.is_empty() {
            info!(trimmed = ?trimmed, "dropped caches of spreadsheets not opened recently");
        }

        let layout = Arc::new(load_layout(&sheets).await?);

        info!(
            spreadsheet_id,
            variant = ?layout.variant,
            weekdays = ?layout.weekdays(),
            "spreadsheet opened"
        );

        Ok(Self {
            config,
            spreadsheet_id: spreadsheet_id.to_string(),
            engine: SheetSyncEngine::new(sheets, layout),
            reconciler: OrderCacheReconciler::new(inventory, cache),
        })
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn layout(&self) -> &SheetLayoutConfig {
        self.engine.layout()
    }

    pub fn engine(&self) -> &SheetSyncEngine<S> {
        &self.engine
    }

    pub fn reconciler(&self) -> &OrderCacheReconciler<I, SqliteSaleCache> {
        &self.reconciler
    }

    // -----------------------------------------------------------------------
    // Cache
    // -----------------------------------------------------------------------

    pub async fn sync(&self) -> Result<SyncReport> {
        Ok(self.reconciler.sync().await?)
    }

    pub async fn reload(&self, confirm: impl ConfirmReset) -> Result<ReloadOutcome> {
        Ok(self.reconciler.reload_sales(confirm).await?)
    }

    pub fn pending(&self) -> Result<Partition> {
        Ok(self.reconciler.pending()?)
    }

    pub fn progress(&self) -> Result<Progress> {
        Ok(self.reconciler.progress()?)
    }

    // -----------------------------------------------------------------------
    // Workflow
    // -----------------------------------------------------------------------

    pub async fn enter_order(&self, sale_id: &str, weekday: &str) -> Result<AddOutcome> {
        Ok(self
            .engine
            .enter_order(self.reconciler.cache(), sale_id, weekday)
            .await?)
    }

    pub async fn unenter_order(&self, sale_id: &str) -> Result<Option<RemoveOutcome>> {
        Ok(self
            .engine
            .unenter_order(self.reconciler.cache(), sale_id)
            .await?)
    }

    pub fn mark_authorized(&self, sale_id: &str, now: DateTime<Utc>) -> Result<Sale> {
        Ok(self.reconciler.mark_authorized(sale_id, now)?)
    }

    pub fn authorize_entered(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        Ok(self.reconciler.authorize_entered(now)?)
    }

    /// Pick, pack and ship a sale in the inventory system, starting from its
    /// current remote status.
    pub async fn fulfil_sale(
        &self,
        sale_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FulfilmentRecord> {
        let snapshot = self.reconciler.fetch_sale(sale_id).await?;
        let record = authorize_fulfilment(self.reconciler.inventory(), &snapshot, now).await?;
        info!(sale_id, "sale fulfilled");
        Ok(record)
    }
}
