//! Read access to every mirrored resource, refreshing it first when stale.
//!
//! Construct one [`ApiStorage`] at startup and hand it to whoever needs game
//! data. Each accessor brings its resource up to date (subject to the
//! resource's freshness threshold) and then answers from the local store.

use crate::error::{ErrorKind, Result};
use crate::resource::{Resource, Shape};
use crate::sync::{Progress, SyncOptions, Synchronizer};
use lss_remote::TransportHandle;
use lss_store::{IndexLookup, IndexValue, Key, StoreManager, Table};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What to read from a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Every record.
    All,
    /// The record with this primary key.
    Key(Key),
    /// Records whose indexed field equals `value`.
    Index { index: &'static str, value: IndexValue },
}
impl Lookup {
    pub fn key(key: impl Into<Key>) -> Self {
        Self::Key(key.into())
    }

    pub fn index(index: &'static str, value: impl Into<IndexValue>) -> Self {
        Self::Index { index, value: value.into() }
    }
}

/// Records read from a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    One(Option<Value>),
    Many(Vec<Value>),
    Map(BTreeMap<Key, Value>),
}
impl Fetched {
    /// Flatten into a list of records, discarding keys.
    pub fn into_vec(self) -> Vec<Value> {
        match self {
            Self::One(record) => record.into_iter().collect(),
            Self::Many(records) => records,
            Self::Map(records) => records.into_values().collect(),
        }
    }

    /// The single record of a key or unique-index lookup.
    pub fn into_one(self) -> Option<Value> {
        match self {
            Self::One(record) => record,
            Self::Many(records) => records.into_iter().next(),
            Self::Map(records) => records.into_values().next(),
        }
    }
}
impl From<IndexLookup> for Fetched {
    fn from(lookup: IndexLookup) -> Self {
        match lookup {
            IndexLookup::One(record) => Self::One(record),
            IndexLookup::Many(records) => Self::Many(records),
        }
    }
}

pub struct ApiStorage {
    sync: Synchronizer,
}

impl ApiStorage {
    pub fn new(store: Arc<StoreManager>, transport: TransportHandle, options: SyncOptions) -> Self {
        Self { sync: Synchronizer::new(store, transport, options) }
    }

    pub fn from_synchronizer(sync: Synchronizer) -> Self {
        Self { sync }
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    /// Refresh `table` as needed, then read `lookup` from it.
    ///
    /// A key lookup on vehicles, buildings or alliance buildings fetches just
    /// that entity, regardless of how fresh the table is.
    pub async fn get(&self, table: Table, lookup: Lookup) -> Result<Fetched> {
        self.get_with_progress(table, lookup, None).await
    }

    pub async fn get_with_progress(
        &self,
        table: Table,
        lookup: Lookup,
        progress: Option<Progress<'_>>,
    ) -> Result<Fetched> {
        match (table, &lookup) {
            (Table::Vehicles, Lookup::Key(Key::Int(id))) => self.sync.refresh_vehicle(*id).await?,
            (Table::Buildings | Table::AllianceBuildings, Lookup::Key(Key::Int(id))) => {
                self.sync.refresh_building(table, *id).await?
            },
            _ => {
                self.sync.refresh_with_progress(table, progress).await?;
            },
        }
        self.read(table, lookup).await
    }

    /// Read from the local store without touching the network.
    pub async fn read(&self, table: Table, lookup: Lookup) -> Result<Fetched> {
        let store = self.sync.store();
        let fetched = match lookup {
            Lookup::All => match Resource::of(table).map(|r| r.shape) {
                Some(Shape::Map) => Fetched::Map(store.get_all_as_map(table).await.map_err(ErrorKind::store)?),
                _ => Fetched::Many(store.get_all_as_list(table).await.map_err(ErrorKind::store)?),
            },
            Lookup::Key(key) => Fetched::One(store.get_by_key(table, &key).await.map_err(ErrorKind::store)?),
            Lookup::Index { index, value } => {
                store.get_by_index(table, index, &value).await.map_err(ErrorKind::store)?.into()
            },
        };
        Ok(fetched)
    }

    // =========================================================================
    // Account and alliance
    // =========================================================================

    pub async fn user_info(&self, lookup: Lookup) -> Result<Fetched> {
        self.get(Table::UserInfo, lookup).await
    }

    pub async fn alliance_info(&self, lookup: Lookup) -> Result<Fetched> {
        self.get(Table::AllianceInfo, lookup).await
    }

    pub async fn settings(&self, lookup: Lookup) -> Result<Fetched> {
        self.get(Table::Settings, lookup).await
    }

    /// Alliance members, by id or (unique) `name`.
    pub async fn alliance_members(&self, lookup: Lookup) -> Result<Fetched> {
        self.get(Table::AllianceMembers, lookup).await
    }

    pub async fn alliance_member_named(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.alliance_members(Lookup::index("name", name)).await?.into_one())
    }

    pub async fn alliance_event_types(&self, lookup: Lookup) -> Result<Fetched> {
        self.get(Table::AllianceEventTypes, lookup).await
    }

    // =========================================================================
    // Game reference data
    // =========================================================================

    /// Mission types, keyed by their (textual) id.
    pub async fn mission_types(&self, lookup: Lookup) -> Result<Fetched> {
        self.get(Table::MissionTypes, lookup).await
    }

    pub async fn aao_categories(&self, lookup: Lookup) -> Result<Fetched> {
        self.get(Table::AaoCategories, lookup).await
    }

    pub async fn aaos(&self, lookup: Lookup) -> Result<Fetched> {
        self.get(Table::Aaos, lookup).await
    }

    pub async fn aaos_of_color(&self, color: &str) -> Result<Vec<Value>> {
        Ok(self.aaos(Lookup::index("color", color)).await?.into_vec())
    }

    pub async fn aaos_of_column(&self, column: impl Into<IndexValue>) -> Result<Vec<Value>> {
        Ok(self.aaos(Lookup::index("column", column)).await?.into_vec())
    }

    pub async fn aaos_of_category(&self, category_id: i64) -> Result<Vec<Value>> {
        Ok(self.aaos(Lookup::index("aao_category_id", category_id)).await?.into_vec())
    }

    // =========================================================================
    // Buildings and what is in them
    // =========================================================================

    pub async fn buildings(&self, lookup: Lookup) -> Result<Fetched> {
        self.get(Table::Buildings, lookup).await
    }

    pub async fn buildings_of_type(&self, building_type: i64) -> Result<Vec<Value>> {
        Ok(self.buildings(Lookup::index("building_type", building_type)).await?.into_vec())
    }

    /// Buildings dispatched by the given dispatch center.
    pub async fn buildings_of_dispatch_center(&self, dispatch_center_id: i64) -> Result<Vec<Value>> {
        Ok(self.buildings(Lookup::index("leitstelle_building_id", dispatch_center_id)).await?.into_vec())
    }

    pub async fn alliance_buildings(&self, lookup: Lookup) -> Result<Fetched> {
        self.get(Table::AllianceBuildings, lookup).await
    }

    pub async fn alliance_buildings_of_type(&self, building_type: i64) -> Result<Vec<Value>> {
        Ok(self.alliance_buildings(Lookup::index("building_type", building_type)).await?.into_vec())
    }

    /// Equipment, by id or `equipment_type`.
    pub async fn equipments(&self, lookup: Lookup) -> Result<Fetched> {
        self.get(Table::Equipments, lookup).await
    }

    pub async fn equipments_at_building(&self, building_id: i64) -> Result<Vec<Value>> {
        Ok(self.equipments(Lookup::index("building_id", building_id)).await?.into_vec())
    }

    /// Schoolings, by id, `education_title` or `running`.
    pub async fn schoolings(&self, lookup: Lookup) -> Result<Fetched> {
        self.get(Table::Schoolings, lookup).await
    }

    pub async fn schoolings_at_building(&self, building_id: i64) -> Result<Vec<Value>> {
        Ok(self.schoolings(Lookup::index("building_id", building_id)).await?.into_vec())
    }

    pub async fn schoolings_running(&self, running: bool) -> Result<Vec<Value>> {
        Ok(self.schoolings(Lookup::index("running", running)).await?.into_vec())
    }

    pub async fn alliance_schoolings(&self, lookup: Lookup) -> Result<Fetched> {
        self.get(Table::AllianceSchoolings, lookup).await
    }

    pub async fn alliance_schoolings_at_building(&self, building_id: i64) -> Result<Vec<Value>> {
        Ok(self.alliance_schoolings(Lookup::index("building_id", building_id)).await?.into_vec())
    }

    pub async fn alliance_schoolings_running(&self, running: bool) -> Result<Vec<Value>> {
        Ok(self.alliance_schoolings(Lookup::index("running", running)).await?.into_vec())
    }

    // =========================================================================
    // Vehicles
    // =========================================================================

    /// Vehicles. A full refresh reports every page to `progress` as it is
    /// written.
    pub async fn vehicles(&self, lookup: Lookup, progress: Option<Progress<'_>>) -> Result<Fetched> {
        self.get_with_progress(Table::Vehicles, lookup, progress).await
    }

    pub async fn vehicles_of_type(&self, vehicle_type: i64, progress: Option<Progress<'_>>) -> Result<Vec<Value>> {
        Ok(self.vehicles(Lookup::index("vehicle_type", vehicle_type), progress).await?.into_vec())
    }

    /// Vehicles at one building. Only that building's vehicles are fetched:
    /// the rest of the table is neither refreshed nor pruned.
    pub async fn vehicles_at_building(&self, building_id: i64, progress: Option<Progress<'_>>) -> Result<Vec<Value>> {
        self.sync.refresh_vehicles_at_building(building_id, progress).await?;
        Ok(self.read(Table::Vehicles, Lookup::index("building_id", building_id)).await?.into_vec())
    }

    /// Total number of vehicles on the account. Always asks the API.
    pub async fn vehicles_count(&self) -> Result<u64> {
        self.sync.vehicles_count().await
    }

    pub async fn vehicle_distances(&self, lookup: Lookup) -> Result<Fetched> {
        self.get(Table::VehicleDistances, lookup).await
    }
}
