//! Primary keys and secondary index values.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Sqlite;
use sqlx::query::Query;

pub(crate) type SqliteQuery<'q> = Query<'q, Sqlite, <Sqlite as sqlx::Database>::Arguments<'q>>;

/// Primary key of a stored record.
///
/// Numeric and textual keys are distinct: `Key::Int(7)` and
/// `Key::Text("7")` never address the same record. Ordering puts all
/// integers before all strings (the same order SQLite sorts mixed columns).
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, From, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    #[display("{_0}")]
    Int(i64),
    #[display("{_0}")]
    Text(String),
}
impl Key {
    /// Read a key out of a JSON scalar. Floats, booleans, objects and arrays
    /// are not valid keys.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Int),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    pub(crate) fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        match self {
            Self::Int(i) => query.bind(*i),
            Self::Text(s) => query.bind(s.as_str()),
        }
    }
}
impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// A value to look up through a secondary index.
///
/// Booleans are stored by SQLite's JSON functions as `0`/`1`, so a boolean
/// lookup matches records whose field is `true`/`false` as well as `1`/`0`.
#[derive(Debug, Display, Clone, PartialEq, Eq, From)]
pub enum IndexValue {
    #[display("{_0}")]
    Int(i64),
    #[display("{_0:?}")]
    Text(String),
    #[display("{_0}")]
    Bool(bool),
}
impl IndexValue {
    pub(crate) fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        match self {
            Self::Int(i) => query.bind(*i),
            Self::Text(s) => query.bind(s.as_str()),
            Self::Bool(b) => query.bind(i64::from(*b)),
        }
    }
}
impl From<&str> for IndexValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}
impl From<Key> for IndexValue {
    fn from(key: Key) -> Self {
        match key {
            Key::Int(i) => Self::Int(i),
            Key::Text(s) => Self::Text(s),
        }
    }
}
