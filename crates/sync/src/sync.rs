//! Bringing local tables in line with the game API.
//!
//! Each resource is refreshed with one of three strategies (see
//! [`Strategy`]). A refresh only runs when the resource's last complete sync
//! is older than its freshness threshold; fetching a single entity by id
//! always runs and never counts as a complete sync.
//!
//! Any failure aborts the pass: freshness is not advanced and no deletions
//! are made, so the next call retries from scratch. Pages of a paginated
//! resource that were already written stay written.

use crate::error::{ErrorKind, Result};
use crate::resource::{Resource, Strategy};
use exn::OptionExt;
use futures::TryStreamExt;
use lss_remote::{Page, TransportHandle, decode, paginate};
use lss_store::{Clock, FreshnessTracker, Key, StoreManager, SystemClock, Table, Thresholds};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

/// Called with the items of every page of a paginated resource, after the
/// page has been written to the store.
pub type Progress<'a> = &'a (dyn Fn(&[Value]) + Send + Sync);

const VEHICLE_COUNT_PATH: &str = "/api/v2/vehicles?limit=2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub thresholds: Thresholds,
    /// Page size for the vehicle listing of a small account.
    pub vehicle_base_limit: u64,
    /// The page size is divided by one more for every this many vehicles.
    pub vehicle_divisor: u64,
}
impl Default for SyncOptions {
    fn default() -> Self {
        Self { thresholds: Thresholds::default(), vehicle_base_limit: 10_000, vehicle_divisor: 50_000 }
    }
}

/// Page size for the vehicle listing: large accounts time out on big pages.
pub fn vehicle_page_limit(base_limit: u64, divisor: u64, count: Option<u64>) -> u64 {
    let chunks = count.map_or(1, |count| count.div_ceil(divisor.max(1)).max(1));
    (base_limit / chunks).max(1)
}

pub struct Synchronizer {
    store: Arc<StoreManager>,
    transport: TransportHandle,
    freshness: FreshnessTracker,
    options: SyncOptions,
    locks: Mutex<HashMap<Table, Arc<Mutex<()>>>>,
    vehicles_count: OnceCell<u64>,
}

impl Synchronizer {
    pub fn new(store: Arc<StoreManager>, transport: TransportHandle, options: SyncOptions) -> Self {
        Self::with_clock(store, transport, options, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<StoreManager>,
        transport: TransportHandle,
        options: SyncOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            freshness: FreshnessTracker::with_clock(store.clone(), clock),
            store,
            transport,
            options,
            locks: Mutex::new(HashMap::new()),
            vehicles_count: OnceCell::new(),
        }
    }

    pub fn store(&self) -> &StoreManager {
        &self.store
    }

    pub fn freshness(&self) -> &FreshnessTracker {
        &self.freshness
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Refresh `table` if it is stale. Returns whether a pass ran.
    ///
    /// `allianceMembers` is refreshed through `allianceInfo`.
    pub async fn refresh(&self, table: Table) -> Result<bool> {
        self.refresh_with_progress(table, None).await
    }

    #[instrument(level = "debug", skip(self, progress), fields(transport = self.transport.name()))]
    pub async fn refresh_with_progress(&self, table: Table, progress: Option<Progress<'_>>) -> Result<bool> {
        let resource = resource_of(table)?;
        // Concurrent callers wait here and then find the table fresh.
        let _guard = self.lock(resource.table).await;
        let threshold = self.options.thresholds.of(resource.freshness);
        if !self.freshness.needs_refresh(resource.table, threshold).await.map_err(ErrorKind::store)? {
            debug!(table = %resource.table, "still fresh");
            return Ok(false);
        }
        match resource.strategy {
            Strategy::Replace => self.replace(resource).await?,
            Strategy::Reconcile => self.reconcile(resource).await?,
            Strategy::Paginated => self.drain(resource, progress).await?,
        }
        self.freshness.record_synced(resource.table).await.map_err(ErrorKind::store)?;
        info!(table = %resource.table, "synced");
        Ok(true)
    }

    /// Refresh every stale resource, in catalogue order. Stops at the first
    /// failure.
    pub async fn refresh_all(&self) -> Result<Vec<(Table, bool)>> {
        let mut refreshed = Vec::new();
        for resource in crate::resource::RESOURCES {
            refreshed.push((resource.table, self.refresh(resource.table).await?));
        }
        Ok(refreshed)
    }

    /// Fetch one building (or alliance building) by id and upsert it. Nothing
    /// is deleted and freshness is left alone.
    #[instrument(level = "debug", skip(self))]
    pub async fn refresh_building(&self, table: Table, id: i64) -> Result<()> {
        let resource = resource_of(table)?;
        if !matches!(table, Table::Buildings | Table::AllianceBuildings) {
            exn::bail!(ErrorKind::InvalidResponse("single-entity fetch is only supported for buildings"));
        }
        let path = resource.entity_path(id).ok_or_raise(|| ErrorKind::InvalidResponse("entity path"))?;
        let _guard = self.lock(table).await;
        let building = self.fetch(&path).await?;
        self.store
            .with_store(|store| async move { store.table(table).put(&building).await.map(|_| ()) })
            .await
            .map_err(ErrorKind::store)
    }

    /// Fetch one vehicle by id and upsert it. Nothing is deleted and
    /// freshness is left alone.
    #[instrument(level = "debug", skip(self))]
    pub async fn refresh_vehicle(&self, id: i64) -> Result<()> {
        let _guard = self.lock(Table::Vehicles).await;
        self.upsert_pages(Table::Vehicles, &format!("/api/v2/vehicles/{id}"), None).await.map(|_| ())
    }

    /// Fetch the vehicles stationed at one building and upsert them. Vehicles
    /// missing from the response are kept, and freshness is left alone.
    #[instrument(level = "debug", skip(self, progress))]
    pub async fn refresh_vehicles_at_building(&self, building_id: i64, progress: Option<Progress<'_>>) -> Result<()> {
        let _guard = self.lock(Table::Vehicles).await;
        let path = format!("/api/v2/buildings/{building_id}/vehicles");
        self.upsert_pages(Table::Vehicles, &path, progress).await.map(|_| ())
    }

    /// Total number of vehicles on the account, as reported by the API.
    pub async fn vehicles_count(&self) -> Result<u64> {
        let page = Page::decode(self.fetch(VEHICLE_COUNT_PATH).await?).map_err(ErrorKind::remote)?;
        page.paging.count_total.ok_or_raise(|| ErrorKind::InvalidResponse("vehicle count"))
    }

    /// Page size for the next vehicle listing. The vehicle count is fetched
    /// once; if that fails the base limit is used and the count is requested
    /// again next time.
    async fn vehicles_page_limit(&self) -> u64 {
        let count = match self.vehicles_count.get_or_try_init(|| self.vehicles_count()).await {
            Ok(count) => Some(*count),
            Err(err) => {
                warn!(error = ?err, "could not count vehicles, using the default page size");
                None
            },
        };
        vehicle_page_limit(self.options.vehicle_base_limit, self.options.vehicle_divisor, count)
    }

    async fn lock(&self, table: Table) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().await.entry(table).or_default().clone();
        lock.lock_owned().await
    }

    async fn fetch(&self, path: &str) -> Result<Value> {
        self.transport.get_json(path).await.map_err(ErrorKind::remote)
    }

    /// Whole-object replace. `allianceInfo` also reconciles the alliance
    /// members listed in it.
    async fn replace(&self, resource: &Resource) -> Result<()> {
        let body = self.fetch(resource.endpoint).await?;
        let members = match resource.table {
            Table::AllianceInfo => Some(alliance_members(&body)?),
            _ => None,
        };
        let entries = decode::entries(body).map_err(ErrorKind::remote)?;
        let table = resource.table;
        self.store
            .with_store(|store| async move {
                let written = store.table(table).replace_all(entries.into_iter().map(|(k, v)| (Key::Text(k), v))).await?;
                debug!(%table, written, "replaced");
                if let Some(members) = members {
                    let report = store.table(Table::AllianceMembers).reconcile(&members).await?;
                    debug!(upserted = report.upserted, deleted = report.deleted.len(), "reconciled alliance members");
                }
                Ok(())
            })
            .await
            .map_err(ErrorKind::store)
    }

    /// Full-list reconcile in a single transaction.
    async fn reconcile(&self, resource: &Resource) -> Result<()> {
        let items = decode::list(self.fetch(resource.endpoint).await?).map_err(ErrorKind::remote)?;
        let items = normalise(resource.table, items);
        let table = resource.table;
        let report = self
            .store
            .with_store(|store| async move { store.table(table).reconcile(&items).await })
            .await
            .map_err(ErrorKind::store)?;
        debug!(%table, upserted = report.upserted, deleted = report.deleted.len(), "reconciled");
        Ok(())
    }

    /// Paginated reconcile: upsert page by page, delete what was not seen
    /// once the last page is in.
    async fn drain(&self, resource: &Resource, progress: Option<Progress<'_>>) -> Result<()> {
        let limit = self.vehicles_page_limit().await;
        let first = format!("{}?limit={limit}", resource.endpoint);
        let observed = self.upsert_pages(resource.table, &first, progress).await?;
        let table = resource.table;
        let deleted = self
            .store
            .with_store(|store| async move { store.table(table).retain(&observed).await })
            .await
            .map_err(ErrorKind::store)?;
        debug!(%table, deleted = deleted.len(), "removed records missing from the listing");
        Ok(())
    }

    /// Upsert every item of every page starting at `first`, one page at a
    /// time. The next page is only requested once the previous page is
    /// written and reported.
    async fn upsert_pages(&self, table: Table, first: &str, progress: Option<Progress<'_>>) -> Result<BTreeSet<Key>> {
        let mut pages = paginate(self.transport.as_ref(), first);
        let mut observed = BTreeSet::new();
        while let Some(page) = pages.try_next().await.map_err(ErrorKind::remote)? {
            let items = normalise(table, page.items);
            let written = &items;
            let keys = self
                .store
                .with_store(|store| async move { store.table(table).put_many(written).await })
                .await
                .map_err(ErrorKind::store)?;
            observed.extend(keys);
            if let Some(progress) = progress {
                progress(items.as_slice());
            }
        }
        Ok(observed)
    }
}

fn resource_of(table: Table) -> Result<&'static Resource> {
    let table = match table {
        Table::AllianceMembers => Table::AllianceInfo,
        other => other,
    };
    Resource::of(table).ok_or_raise(|| ErrorKind::Store(lss_store::error::ErrorKind::UnknownTable(table.to_string())))
}

fn alliance_members(alliance: &Value) -> Result<Vec<Value>> {
    match alliance.get("users") {
        // Not in an alliance.
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(users)) => Ok(users.clone()),
        Some(_) => exn::bail!(ErrorKind::InvalidResponse("allianceinfo users")),
    }
}

/// Booleans cannot be looked up through an index alongside the numbers the
/// API sometimes sends instead, so `running` is stored as `0`/`1`.
fn normalise(table: Table, mut items: Vec<Value>) -> Vec<Value> {
    if matches!(table, Table::Schoolings | Table::AllianceSchoolings) {
        for item in &mut items {
            if let Some(running) = item.get_mut("running")
                && let Some(flag) = running.as_bool()
            {
                *running = Value::from(u8::from(flag));
            }
        }
    }
    items
}
