//! Schema registry.
//!
//! Every table and index that has ever existed is declared here, grouped by
//! the schema version that introduced it. Opening the store at version `n`
//! applies the operations of every version newer than the one on disk, in
//! order. Migrations are additive: nothing declared here is ever dropped, and
//! table/index names are never renamed (that would orphan existing data).

use crate::error::{ErrorKind, Result};
use std::fmt;
use std::str::FromStr;

/// Schema version the store is opened at by default.
pub const CURRENT_VERSION: u32 = 5;

/// Name of the database instance. Must never change, or every existing user
/// would silently start over with an empty store.
pub const DATABASE_NAME: &str = "shared-api-storage";

/// Every table in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    LastUpdates,
    MissionTypes,
    UserInfo,
    AllianceInfo,
    Settings,
    AllianceMembers,
    AllianceEventTypes,
    Vehicles,
    Buildings,
    VehicleDistances,
    Equipments,
    AllianceBuildings,
    Schoolings,
    AllianceSchoolings,
    AaoCategories,
    Aaos,
}
impl Table {
    pub const ALL: [Table; 16] = [
        Self::LastUpdates,
        Self::MissionTypes,
        Self::UserInfo,
        Self::AllianceInfo,
        Self::Settings,
        Self::AllianceMembers,
        Self::AllianceEventTypes,
        Self::Vehicles,
        Self::Buildings,
        Self::VehicleDistances,
        Self::Equipments,
        Self::AllianceBuildings,
        Self::Schoolings,
        Self::AllianceSchoolings,
        Self::AaoCategories,
        Self::Aaos,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::LastUpdates => "lastUpdates",
            Self::MissionTypes => "missionTypes",
            Self::UserInfo => "userInfo",
            Self::AllianceInfo => "allianceInfo",
            Self::Settings => "settings",
            Self::AllianceMembers => "allianceMembers",
            Self::AllianceEventTypes => "allianceEventTypes",
            Self::Vehicles => "vehicles",
            Self::Buildings => "buildings",
            Self::VehicleDistances => "vehicleDistances",
            Self::Equipments => "equipments",
            Self::AllianceBuildings => "allianceBuildings",
            Self::Schoolings => "schoolings",
            Self::AllianceSchoolings => "allianceSchoolings",
            Self::AaoCategories => "aaoCategories",
            Self::Aaos => "aaos",
        }
    }

    /// Field every record carries its primary key in, or `None` for tables
    /// whose keys are supplied by the writer.
    pub fn key_path(&self) -> Option<&'static str> {
        MIGRATIONS
            .iter()
            .flat_map(|m| m.operations)
            .find_map(|op| match op {
                Operation::CreateTable { table, key_path } if table == self => *key_path,
                _ => None,
            })
    }

    /// Secondary indexes declared on this table, across all versions.
    pub fn indexes(&self) -> impl Iterator<Item = IndexDef> + '_ {
        MIGRATIONS.iter().flat_map(|m| m.operations).filter_map(move |op| match op {
            Operation::CreateIndex { table, path, unique } if table == self => Some(IndexDef { path: *path, unique: *unique }),
            _ => None,
        })
    }

    /// Look up a declared index by its path.
    pub fn index(&self, path: &str) -> Result<IndexDef> {
        self.indexes()
            .find(|index| index.path == path)
            .ok_or_else(|| exn::Exn::from(ErrorKind::UnknownIndex(self.name().to_string(), path.to_string())))
    }

    /// Schema version that introduced this table.
    pub fn introduced_in(&self) -> u32 {
        MIGRATIONS
            .iter()
            .find(|m| m.operations.iter().any(|op| matches!(op, Operation::CreateTable { table, .. } if table == self)))
            .map(|m| m.version)
            .unwrap_or(CURRENT_VERSION)
    }
}
impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
impl FromStr for Table {
    type Err = exn::Exn<ErrorKind>;
    fn from_str(s: &str) -> Result<Self> {
        // SQLite identifiers are case-insensitive, so table names are too.
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| exn::Exn::from(ErrorKind::UnknownTable(s.to_string())))
    }
}

/// A secondary index on a JSON field of the stored records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    pub path: &'static str,
    pub unique: bool,
}
impl IndexDef {
    /// SQL name of the index. Index names share one namespace per database
    /// in SQLite, so they are prefixed with their table.
    pub fn sql_name(&self, table: Table) -> String {
        format!("{}__{}", table.name(), self.path)
    }
}

/// A single structural change to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateTable { table: Table, key_path: Option<&'static str> },
    CreateIndex { table: Table, path: &'static str, unique: bool },
}
impl Operation {
    /// Render the operation as a single DDL statement.
    pub fn to_sql(&self) -> String {
        match self {
            Self::CreateTable { table, .. } => format!(
                r#"CREATE TABLE "{}" (key NOT NULL PRIMARY KEY, value TEXT NOT NULL CHECK (json_valid(value)))"#,
                table.name()
            ),
            Self::CreateIndex { table, path, unique } => format!(
                r#"CREATE {}INDEX "{}" ON "{}" (json_extract(value, '$.{}'))"#,
                if *unique { "UNIQUE " } else { "" },
                IndexDef { path: *path, unique: *unique }.sql_name(*table),
                table.name(),
                path,
            ),
        }
    }
}

/// The incremental changes introduced by one schema version.
#[derive(Debug)]
pub struct Migration {
    pub version: u32,
    pub operations: &'static [Operation],
}

const fn table(table: Table, key_path: Option<&'static str>) -> Operation {
    Operation::CreateTable { table, key_path }
}

const fn index(table: Table, path: &'static str, unique: bool) -> Operation {
    Operation::CreateIndex { table, path, unique }
}

pub static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        operations: &[
            table(Table::LastUpdates, None),
            table(Table::MissionTypes, Some("id")),
            table(Table::UserInfo, None),
            table(Table::AllianceInfo, None),
            table(Table::Settings, None),
            table(Table::AllianceMembers, Some("id")),
            index(Table::AllianceMembers, "name", true),
        ],
    },
    Migration {
        version: 2,
        operations: &[table(Table::AllianceEventTypes, Some("id")), index(Table::AllianceEventTypes, "caption", true)],
    },
    Migration {
        version: 3,
        operations: &[
            table(Table::Vehicles, Some("id")),
            index(Table::Vehicles, "building_id", false),
            index(Table::Vehicles, "vehicle_type", false),
            table(Table::Buildings, Some("id")),
            index(Table::Buildings, "leitstelle_building_id", false),
            index(Table::Buildings, "building_type", false),
        ],
    },
    Migration {
        version: 4,
        operations: &[
            table(Table::VehicleDistances, Some("vehicle_id")),
            table(Table::Equipments, Some("id")),
            index(Table::Equipments, "equipment_type", false),
            index(Table::Equipments, "building_id", false),
        ],
    },
    Migration {
        version: 5,
        operations: &[
            table(Table::AllianceBuildings, Some("id")),
            index(Table::AllianceBuildings, "building_type", false),
            table(Table::Schoolings, Some("id")),
            index(Table::Schoolings, "education_title", false),
            index(Table::Schoolings, "building_id", false),
            index(Table::Schoolings, "running", false),
            table(Table::AllianceSchoolings, Some("id")),
            index(Table::AllianceSchoolings, "education_title", false),
            index(Table::AllianceSchoolings, "building_id", false),
            index(Table::AllianceSchoolings, "running", false),
            table(Table::AaoCategories, None),
            table(Table::Aaos, Some("id")),
            index(Table::Aaos, "color", false),
            index(Table::Aaos, "column", false),
            index(Table::Aaos, "aao_category_id", false),
        ],
    },
];

/// Migrations to apply when upgrading a store from `from` to `to`, in order.
///
/// Returns [`ErrorKind::UnknownVersion`] if `to` is newer than anything
/// declared.
pub fn migrations_between(from: u32, to: u32) -> Result<impl Iterator<Item = &'static Migration>> {
    if to > CURRENT_VERSION {
        exn::bail!(ErrorKind::UnknownVersion(to));
    }
    Ok(MIGRATIONS.iter().filter(move |m| m.version > from && m.version <= to))
}

/// Tables that exist in a store at the given version.
pub fn tables_at(version: u32) -> impl Iterator<Item = Table> {
    Table::ALL.into_iter().filter(move |t| t.introduced_in() <= version)
}
