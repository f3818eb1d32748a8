//! Keeps the local sale cache in step with the remote "awaiting fulfilment"
//! set, and owns the workflow flag transitions of cached sales.
//!
//! A sync evicts cached sales that are no longer awaiting fulfilment, then
//! fetches the missing ones individually through the rate-limited inventory
//! client. A reload bumps the generation counter; results of syncs started
//! under an older generation are dropped instead of written.

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::cache::SaleCache;
use crate::error::{ApiError, CacheError, ReconcileError, WorkflowError};
use crate::inventory::{InventoryApi, Product, Sale, SaleSnapshot, WorkflowState};

/// Question put to the user before a reload throws away workflow progress.
pub const RESET_WARNING: &str = "This will reset all progress you've made. Are you sure?";

/// Sale fetches kept in flight at once during a sync.
const FETCH_CONCURRENCY: usize = 8;

// ---------------------------------------------------------------------------
// Workflow transitions
// ---------------------------------------------------------------------------

fn load<C: SaleCache + ?Sized>(cache: &C, id: &str) -> Result<Sale, CacheError> {
    cache
        .get(id)?
        .ok_or_else(|| CacheError::NotFound(id.to_string()))
}

pub(crate) fn invalid_transition(sale: &Sale, to: WorkflowState) -> WorkflowError {
    WorkflowError::InvalidTransition {
        sale_id: sale.id().to_string(),
        from: sale.workflow_state(),
        to,
    }
}

/// `Unentered -> Entered`, recording the weekday and the unmapped items.
pub fn mark_entered<C, E>(
    cache: &C,
    id: &str,
    weekday: &str,
    skipped: Vec<Product>,
) -> Result<Sale, E>
where
    C: SaleCache + ?Sized,
    E: From<CacheError> + From<WorkflowError>,
{
    let mut sale = load(cache, id)?;
    if sale.workflow_state() != WorkflowState::Unentered {
        return Err(invalid_transition(&sale, WorkflowState::Entered).into());
    }
    sale.workflow.entry_day = Some(weekday.to_string());
    sale.workflow.skipped = Some(skipped);
    cache.update_workflow(id, &sale.workflow)?;
    debug!(sale_id = id, weekday, "marked entered");
    Ok(sale)
}

/// `Entered -> Unentered`, clearing the weekday and skipped items. A no-op
/// for a sale that is not entered.
pub fn mark_unentered<C, E>(cache: &C, id: &str) -> Result<Sale, E>
where
    C: SaleCache + ?Sized,
    E: From<CacheError> + From<WorkflowError>,
{
    let mut sale = load(cache, id)?;
    match sale.workflow_state() {
        WorkflowState::Unentered => return Ok(sale),
        WorkflowState::Authorized => {
            return Err(invalid_transition(&sale, WorkflowState::Unentered).into())
        }
        WorkflowState::Entered => {}
    }
    sale.workflow.entry_day = None;
    sale.workflow.skipped = None;
    cache.update_workflow(id, &sale.workflow)?;
    debug!(sale_id = id, "marked unentered");
    Ok(sale)
}

/// `Entered -> Authorized`. Authorizing an authorized sale keeps its
/// original timestamp.
pub fn mark_authorized<C, E>(cache: &C, id: &str, now: DateTime<Utc>) -> Result<Sale, E>
where
    C: SaleCache + ?Sized,
    E: From<CacheError> + From<WorkflowError>,
{
    let mut sale = load(cache, id)?;
    match sale.workflow_state() {
        WorkflowState::Authorized => return Ok(sale),
        WorkflowState::Unentered => {
            return Err(invalid_transition(&sale, WorkflowState::Authorized).into())
        }
        WorkflowState::Entered => {}
    }
    sale.workflow.authorized_at = Some(now);
    cache.update_workflow(id, &sale.workflow)?;
    debug!(sale_id = id, "marked authorized");
    Ok(sale)
}

// ---------------------------------------------------------------------------
// Partition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub to_enter: Vec<Sale>,
    pub to_authorize: Vec<Sale>,
}

/// Split sales into those still to enter and those entered but not yet
/// authorized. Authorized sales are dropped. Input order is kept.
pub fn partition(sales: Vec<Sale>) -> Partition {
    let mut result = Partition::default();
    for sale in sales {
        match sale.workflow_state() {
            WorkflowState::Authorized => {}
            WorkflowState::Entered => result.to_authorize.push(sale),
            WorkflowState::Unentered => result.to_enter.push(sale),
        }
    }
    result
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchFailure {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub evicted: Vec<String>,
    pub fetched: Vec<String>,
    pub failed: Vec<FetchFailure>,
    /// Results dropped because a reload started meanwhile.
    pub discarded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum ReloadOutcome {
    Declined,
    Reloaded { cleared: usize, report: SyncReport },
}

/// Progress header counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub loaded: usize,
    /// Remote count from the last listing, unknown before the first sync.
    pub total: Option<usize>,
}

/// Asks the user to confirm a destructive reload.
pub trait ConfirmReset {
    fn confirm(&self, warning: &str) -> bool;
}

impl<F: Fn(&str) -> bool> ConfirmReset for F {
    fn confirm(&self, warning: &str) -> bool {
        self(warning)
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

type SharedFetch = Arc<OnceCell<Result<SaleSnapshot, ApiError>>>;

pub struct OrderCacheReconciler<I, C> {
    inventory: I,
    cache: C,
    generation: AtomicU64,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
    remote_total: Mutex<Option<usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<I: InventoryApi, C: SaleCache> OrderCacheReconciler<I, C> {
    pub fn new(inventory: I, cache: C) -> Self {
        Self {
            inventory,
            cache,
            generation: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
            remote_total: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn inventory(&self) -> &I {
        &self.inventory
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Fetch one sale, sharing the request with concurrent callers for the
    /// same ID.
    pub async fn fetch_sale(&self, id: &str) -> Result<SaleSnapshot, ApiError> {
        let cell = lock(&self.in_flight)
            .entry(id.to_string())
            .or_default()
            .clone();

        let result = cell
            .get_or_init(|| self.inventory.fetch_sale(id))
            .await
            .clone();

        let mut in_flight = lock(&self.in_flight);
        if in_flight
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            in_flight.remove(id);
        }
        result
    }

    /// Bring the cache in line with the remote awaiting-fulfilment set.
    pub async fn sync(&self) -> Result<SyncReport, ReconcileError> {
        let generation = self.generation();
        let remote_ids = self.inventory.list_awaiting_fulfilment_ids().await?;
        *lock(&self.remote_total) = Some(remote_ids.len());

        let mut report = SyncReport::default();
        if self.generation() != generation {
            debug!(generation, "sync superseded before eviction");
            return Ok(report);
        }

        let cached: HashSet<String> = self.cache.list_ids()?.into_iter().collect();
        let remote: HashSet<&str> = remote_ids.iter().map(String::as_str).collect();

        let mut to_remove: Vec<String> = cached
            .iter()
            .filter(|id| !remote.contains(id.as_str()))
            .cloned()
            .collect();
        to_remove.sort();

        let mut seen = HashSet::new();
        let to_fetch: Vec<String> = remote_ids
            .into_iter()
            .filter(|id| !cached.contains(id) && seen.insert(id.clone()))
            .collect();

        info!(
            cached = cached.len(),
            evicting = to_remove.len(),
            fetching = to_fetch.len(),
            "syncing sale cache"
        );

        for id in &to_remove {
            self.cache.remove(id)?;
        }
        report.evicted = to_remove;

        let mut fetches = stream::iter(to_fetch)
            .map(|id| async move {
                let result = self.fetch_sale(&id).await;
                (id, result)
            })
            .buffer_unordered(FETCH_CONCURRENCY);

        while let Some((id, result)) = fetches.next().await {
            if self.generation() != generation {
                report.discarded += 1;
                continue;
            }
            match result {
                Ok(mut snapshot) => {
                    if snapshot.id.is_empty() {
                        snapshot.id = id.clone();
                    }
                    self.cache.put(&snapshot)?;
                    debug!(sale_id = %id, "cached sale");
                    report.fetched.push(id);
                }
                Err(e) => {
                    warn!(sale_id = %id, error = %e, "failed to fetch sale");
                    report.failed.push(FetchFailure {
                        id,
                        error: e.to_string(),
                    });
                }
            }
        }

        if report.discarded > 0 {
            info!(discarded = report.discarded, "dropped results of superseded sync");
        }
        info!(
            evicted = report.evicted.len(),
            fetched = report.fetched.len(),
            failed = report.failed.len(),
            "sale cache synced"
        );
        Ok(report)
    }

    /// Drop every cached sale (and its workflow progress) and sync from
    /// scratch, after the user confirms.
    pub async fn reload_sales(
        &self,
        confirm: impl ConfirmReset,
    ) -> Result<ReloadOutcome, ReconcileError> {
        if !confirm.confirm(RESET_WARNING) {
            info!("reload declined");
            return Ok(ReloadOutcome::Declined);
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cleared = self.cache.clear()?;
        *lock(&self.remote_total) = None;
        info!(generation, cleared, "reloading sales");

        let report = self.sync().await?;
        Ok(ReloadOutcome::Reloaded { cleared, report })
    }

    /// Cached sales split into the two work queues, by order date.
    pub fn pending(&self) -> Result<Partition, ReconcileError> {
        Ok(partition(self.cache.list_ordered()?))
    }

    pub fn progress(&self) -> Result<Progress, ReconcileError> {
        Ok(Progress {
            loaded: self.cache.list_ids()?.len(),
            total: *lock(&self.remote_total),
        })
    }

    pub fn mark_entered(
        &self,
        id: &str,
        weekday: &str,
        skipped: Vec<Product>,
    ) -> Result<Sale, ReconcileError> {
        mark_entered(&self.cache, id, weekday, skipped)
    }

    pub fn mark_unentered(&self, id: &str) -> Result<Sale, ReconcileError> {
        mark_unentered(&self.cache, id)
    }

    pub fn mark_authorized(&self, id: &str, now: DateTime<Utc>) -> Result<Sale, ReconcileError> {
        mark_authorized(&self.cache, id, now)
    }

    /// Authorize every entered sale. Returns the IDs authorized.
    pub fn authorize_entered(&self, now: DateTime<Utc>) -> Result<Vec<String>, ReconcileError> {
        let pending = self.pending()?;
        let mut authorized = Vec::with_capacity(pending.to_authorize.len());
        for sale in pending.to_authorize {
            mark_authorized::<_, ReconcileError>(&self.cache, sale.id(), now)?;
            authorized.push(sale.snapshot.id);
        }
        info!(count = authorized.len(), "authorized entered sales");
        Ok(authorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SqliteSaleCache;
    use crate::db;
    use crate::test_support::{dated_sale, product, FakeInventory};
    use std::time::Duration;

    fn reconciler(
        inventory: FakeInventory,
    ) -> OrderCacheReconciler<FakeInventory, SqliteSaleCache> {
        let db = Arc::new(db::init_in_memory().unwrap());
        let cache = SqliteSaleCache::open(db, "sheet-1", Utc::now()).unwrap();
        OrderCacheReconciler::new(inventory, cache)
    }

    fn sales(ids: &[&str]) -> Vec<SaleSnapshot> {
        ids.iter()
            .enumerate()
            .map(|(day, id)| dated_sale(id, &format!("2021-03-{:02}T00:00:00", day + 1)))
            .collect()
    }

    fn cached_ids<I: InventoryApi>(r: &OrderCacheReconciler<I, SqliteSaleCache>) -> Vec<String> {
        let mut ids = r.cache().list_ids().unwrap();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let r = reconciler(FakeInventory::new().with_sales(sales(&["1", "2", "3"])));

        let first = r.sync().await.unwrap();
        assert_eq!(first.fetched.len(), 3);
        assert!(first.evicted.is_empty());

        let second = r.sync().await.unwrap();
        assert_eq!(second, SyncReport::default());
        assert_eq!(r.inventory().fetch_calls().len(), 3);
        assert_eq!(cached_ids(&r), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_sync_evicts_and_fetches_the_difference() {
        let r = reconciler(FakeInventory::new().with_sales(sales(&["1", "2", "3", "4"])));
        r.inventory().set_awaiting(&["1", "2", "3"]);
        r.sync().await.unwrap();

        r.inventory().set_awaiting(&["2", "3", "4"]);
        let report = r.sync().await.unwrap();

        assert_eq!(report.evicted, vec!["1"]);
        assert_eq!(report.fetched, vec!["4"]);
        assert_eq!(cached_ids(&r), vec!["2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_sync_evicts_before_fetching() {
        let db = Arc::new(db::init_in_memory().unwrap());
        let cache = SqliteSaleCache::open(db.clone(), "sheet-1", Utc::now()).unwrap();
        let inventory = FakeInventory::new().with_sales(sales(&["1", "2", "3", "4", "5"]));
        inventory.set_awaiting(&["1", "2", "3"]);
        let r = OrderCacheReconciler::new(inventory, cache);
        r.sync().await.unwrap();

        // A second handle on the same scope sees what each fetch sees.
        let observer = SqliteSaleCache::open(db, "sheet-1", Utc::now()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_fetch = seen.clone();
        r.inventory().on_fetch(move |id| {
            let mut ids = observer.list_ids().unwrap();
            ids.sort();
            seen_by_fetch.lock().unwrap().push((id.to_string(), ids));
        });

        r.inventory().set_awaiting(&["3", "4", "5"]);
        let report = r.sync().await.unwrap();
        assert_eq!(report.evicted, vec!["1", "2"]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        for (id, cached) in seen.iter() {
            assert!(!cached.contains(&"1".to_string()), "{id} fetched before eviction");
            assert!(!cached.contains(&"2".to_string()), "{id} fetched before eviction");
            assert!(cached.contains(&"3".to_string()));
        }
    }

    #[tokio::test]
    async fn test_fetch_failures_are_reported_and_retried() {
        let r = reconciler(FakeInventory::new().with_sales(sales(&["1", "2", "3"])));
        r.inventory().fail_fetch("2");

        let report = r.sync().await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, "2");
        assert_eq!(cached_ids(&r), vec!["1", "3"]);

        // The next sync picks it up again.
        let report = r.sync().await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(
            r.inventory().fetch_calls().iter().filter(|id| *id == "2").count(),
            2
        );
    }

    #[tokio::test]
    async fn test_sync_keeps_workflow_progress() {
        let r = reconciler(FakeInventory::new().with_sales(sales(&["1", "2"])));
        r.sync().await.unwrap();
        r.mark_entered("1", "Monday", Vec::new()).unwrap();

        r.sync().await.unwrap();
        assert!(r.cache().get("1").unwrap().unwrap().is_entered());
    }

    #[tokio::test]
    async fn test_partition_by_workflow_state() {
        let r = reconciler(FakeInventory::new().with_sales(sales(&["1", "2", "3", "4"])));
        r.sync().await.unwrap();
        r.mark_entered("2", "Monday", Vec::new()).unwrap();
        r.mark_entered("3", "Tuesday", vec![product("MYSTERY", 1)]).unwrap();
        r.mark_authorized("3", Utc::now()).unwrap();

        let pending = r.pending().unwrap();
        let ids = |sales: &[Sale]| sales.iter().map(|s| s.id().to_string()).collect::<Vec<_>>();
        assert_eq!(ids(&pending.to_enter), vec!["1", "4"]);
        assert_eq!(ids(&pending.to_authorize), vec!["2"]);
    }

    #[tokio::test]
    async fn test_workflow_transitions() {
        let r = reconciler(FakeInventory::new().with_sales(sales(&["1"])));
        r.sync().await.unwrap();

        let err = r.mark_authorized("1", Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Workflow(WorkflowError::InvalidTransition {
                from: WorkflowState::Unentered,
                to: WorkflowState::Authorized,
                ..
            })
        ));

        r.mark_entered("1", "Monday", Vec::new()).unwrap();
        assert!(r.mark_entered("1", "Tuesday", Vec::new()).is_err());

        let sale = r.mark_unentered("1").unwrap();
        assert_eq!(sale.workflow_state(), WorkflowState::Unentered);
        assert!(sale.workflow.skipped.is_none());

        r.mark_entered("1", "Monday", Vec::new()).unwrap();
        r.mark_authorized("1", Utc::now()).unwrap();
        assert!(r.mark_unentered("1").is_err());

        assert!(matches!(
            r.mark_entered("ghost", "Monday", Vec::new()),
            Err(ReconcileError::Cache(CacheError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_authorize_entered_marks_every_entered_sale() {
        let r = reconciler(FakeInventory::new().with_sales(sales(&["1", "2", "3"])));
        r.sync().await.unwrap();
        r.mark_entered("1", "Monday", Vec::new()).unwrap();
        r.mark_entered("3", "Monday", Vec::new()).unwrap();

        let authorized = r.authorize_entered(Utc::now()).unwrap();
        assert_eq!(authorized, vec!["1", "3"]);

        let pending = r.pending().unwrap();
        assert!(pending.to_authorize.is_empty());
        assert_eq!(pending.to_enter.len(), 1);
    }

    #[tokio::test]
    async fn test_reload_declined_changes_nothing() {
        let r = reconciler(FakeInventory::new().with_sales(sales(&["1", "2"])));
        r.sync().await.unwrap();
        r.mark_entered("1", "Monday", Vec::new()).unwrap();

        let outcome = r
            .reload_sales(|warning: &str| {
                assert_eq!(warning, RESET_WARNING);
                false
            })
            .await
            .unwrap();

        assert_eq!(outcome, ReloadOutcome::Declined);
        assert_eq!(r.generation(), 0);
        assert!(r.cache().get("1").unwrap().unwrap().is_entered());
    }

    #[tokio::test]
    async fn test_reload_resets_progress() {
        let r = reconciler(FakeInventory::new().with_sales(sales(&["1", "2"])));
        r.sync().await.unwrap();
        r.mark_entered("1", "Monday", Vec::new()).unwrap();

        let outcome = r.reload_sales(|_: &str| true).await.unwrap();
        match outcome {
            ReloadOutcome::Reloaded { cleared, report } => {
                assert_eq!(cleared, 2);
                assert_eq!(report.fetched.len(), 2);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(r.generation(), 1);
        assert!(!r.cache().get("1").unwrap().unwrap().is_entered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_discards_stale_sync_results() {
        let inventory = FakeInventory::new()
            .with_fetch_delay(Duration::from_secs(1))
            .with_sales(sales(&["1", "2"]));
        inventory.set_awaiting(&["1"]);
        let r = reconciler(inventory);

        let (stale, reloaded) = tokio::join!(r.sync(), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            r.inventory().set_awaiting(&["2"]);
            r.reload_sales(|_: &str| true).await
        });

        let stale = stale.unwrap();
        assert_eq!(stale.discarded, 1);
        assert!(stale.fetched.is_empty());
        assert!(matches!(reloaded.unwrap(), ReloadOutcome::Reloaded { .. }));
        assert_eq!(cached_ids(&r), vec!["2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetches_share_one_request() {
        let inventory = FakeInventory::new()
            .with_fetch_delay(Duration::from_millis(500))
            .with_sales(sales(&["1"]));
        let r = reconciler(inventory);

        let (a, b) = tokio::join!(r.fetch_sale("1"), r.fetch_sale("1"));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(r.inventory().fetch_calls(), vec!["1"]);

        // Completed fetches leave the map, so a later call hits the API again.
        r.fetch_sale("1").await.unwrap();
        assert_eq!(r.inventory().fetch_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_progress_counts() {
        let r = reconciler(FakeInventory::new().with_sales(sales(&["1", "2", "3"])));
        r.inventory().fail_fetch("3");
        assert_eq!(r.progress().unwrap(), Progress { loaded: 0, total: None });

        r.sync().await.unwrap();
        assert_eq!(
            r.progress().unwrap(),
            Progress {
                loaded: 2,
                total: Some(3)
            }
        );
    }

    #[test]
    fn test_partition_is_pure() {
        let entered = {
            let mut sale = Sale::new(dated_sale("e", "2021-03-01"));
            sale.workflow.entry_day = Some("Monday".into());
            sale
        };
        let authorized = {
            let mut sale = entered.clone();
            sale.snapshot.id = "a".into();
            sale.workflow.authorized_at = Some(Utc::now());
            sale
        };
        let fresh = Sale::new(dated_sale("f", "2021-03-02"));

        let input = vec![entered.clone(), authorized, fresh.clone()];
        let first = partition(input.clone());
        assert_eq!(first, partition(input));
        assert_eq!(first.to_enter, vec![fresh]);
        assert_eq!(first.to_authorize, vec![entered]);
    }
}
