//! Which endpoint feeds which table, and how.

use lss_store::{FreshnessClass, Table};
use FreshnessClass::{Fast, Slow};
use Shape::{List, Map};
use Strategy::{Paginated, Reconcile, Replace};

/// How a resource's table is brought in line with the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The endpoint returns one object. The table is cleared and every
    /// top-level property stored as its own record, keyed by property name.
    Replace,
    /// The endpoint returns the complete list. Every item is upserted and
    /// stored records missing from the list are deleted.
    Reconcile,
    /// Like [`Reconcile`](Self::Reconcile), but drained page by page from
    /// the v2 API. Deletions happen only once the last page is in.
    Paginated,
}

/// Shape of a resource's "everything" lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Records keyed by primary key.
    Map,
    /// Records as a list.
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resource {
    pub table: Table,
    pub endpoint: &'static str,
    pub strategy: Strategy,
    pub freshness: FreshnessClass,
    pub shape: Shape,
}

const fn resource(
    table: Table,
    endpoint: &'static str,
    strategy: Strategy,
    freshness: FreshnessClass,
    shape: Shape,
) -> Resource {
    Resource { table, endpoint, strategy, freshness, shape }
}

/// Every synchronised resource. `allianceMembers` has no endpoint of its own:
/// it is filled from the `users` of `allianceInfo`.
pub static RESOURCES: &[Resource] = &[
    resource(Table::MissionTypes, "/einsaetze.json", Reconcile, Slow, Map),
    resource(Table::UserInfo, "/api/userinfo", Replace, Fast, Map),
    resource(Table::AllianceInfo, "/api/allianceinfo", Replace, Fast, Map),
    resource(Table::Settings, "/api/settings", Replace, Fast, Map),
    resource(Table::AllianceEventTypes, "/alliance_event_types.json", Reconcile, Slow, List),
    resource(Table::Vehicles, "/api/v2/vehicles", Paginated, Fast, List),
    resource(Table::Buildings, "/api/buildings", Reconcile, Fast, List),
    resource(Table::VehicleDistances, "/api/v1/vehicle_distances", Reconcile, Fast, Map),
    resource(Table::Equipments, "/api/equipments", Reconcile, Fast, List),
    resource(Table::AllianceBuildings, "/api/alliance_buildings", Reconcile, Fast, List),
    resource(Table::Schoolings, "/api/schoolings", Reconcile, Fast, List),
    resource(Table::AllianceSchoolings, "/api/alliance_schoolings", Reconcile, Fast, List),
    resource(Table::AaoCategories, "/api/v1/aao_categories", Replace, Fast, Map),
    resource(Table::Aaos, "/api/v1/aaos", Reconcile, Fast, Map),
];

impl Resource {
    /// The resource synchronised into `table`, if any.
    pub fn of(table: Table) -> Option<&'static Resource> {
        RESOURCES.iter().find(|resource| resource.table == table)
    }

    /// Path of a single entity of this resource, for resources that can be
    /// fetched one at a time.
    pub fn entity_path(&self, id: i64) -> Option<String> {
        match self.table {
            Table::Vehicles | Table::Buildings | Table::AllianceBuildings => Some(format!("{}/{id}", self.endpoint)),
            _ => None,
        }
    }
}
