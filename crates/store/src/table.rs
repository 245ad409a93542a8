//! Record-level operations on a single table.
//!
//! Each table stores JSON documents in a `value` column next to their primary
//! key. Secondary indexes are expression indexes over `json_extract()`, see
//! [`schema`](crate::schema).

use crate::error::{ErrorKind, Result};
use crate::key::{IndexValue, Key};
use crate::schema::Table;
use exn::{OptionExt, ResultExt};
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{BTreeMap, BTreeSet};
use tracing::instrument;

// `key` is declared without a type, so SQLite keeps integers and text apart.
const KEY_COLUMNS: &str = "CASE WHEN typeof(key) = 'integer' THEN key END AS int_key, \
                           CASE WHEN typeof(key) = 'text' THEN key END AS text_key";

#[derive(sqlx::FromRow)]
pub(crate) struct RecordRow {
    pub(crate) int_key: Option<i64>,
    pub(crate) text_key: Option<String>,
    pub(crate) value: String,
}
impl RecordRow {
    fn key(&self) -> Result<Key> {
        match (self.int_key, &self.text_key) {
            (Some(i), _) => Ok(Key::Int(i)),
            (None, Some(s)) => Ok(Key::Text(s.clone())),
            (None, None) => exn::bail!(ErrorKind::InvalidData("primary key")),
        }
    }

    fn value(&self) -> Result<Value> {
        serde_json::from_str(&self.value).or_raise(|| ErrorKind::InvalidData("record value"))
    }
}

/// Result of a secondary index lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexLookup {
    /// The index is unique: at most one record matches.
    One(Option<Value>),
    /// The index is not unique: any number of records match.
    Many(Vec<Value>),
}
impl IndexLookup {
    /// Flatten into a list regardless of the index's uniqueness.
    pub fn into_vec(self) -> Vec<Value> {
        match self {
            Self::One(record) => record.into_iter().collect(),
            Self::Many(records) => records,
        }
    }
}

/// What a reconcile pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub upserted: usize,
    pub deleted: BTreeSet<Key>,
}

/// Operations on one table of an open [`Store`](crate::Store).
#[derive(Debug, Clone, Copy)]
pub struct TableStore<'a> {
    pool: &'a SqlitePool,
    table: Table,
}
impl<'a> TableStore<'a> {
    pub(crate) fn new(pool: &'a SqlitePool, table: Table) -> Self {
        Self { pool, table }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    /// Primary key of `record`, read from the table's key path.
    pub fn key_of(&self, record: &Value) -> Result<Key> {
        let path = self
            .table
            .key_path()
            .ok_or_raise(|| ErrorKind::MissingKey(format!("{} (out-of-line keys)", self.table)))?;
        record.get(path).and_then(Key::from_json).ok_or_raise(|| ErrorKind::MissingKey(path.to_string()))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, key: &Key) -> Result<Option<Value>> {
        let sql = format!(r#"SELECT {KEY_COLUMNS}, value FROM "{}" WHERE key = ?"#, self.table);
        let row: Option<RecordRow> = key
            .bind(sqlx::query(&sql))
            .try_map(|row| sqlx::FromRow::from_row(&row))
            .fetch_optional(self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(|r| r.value()).transpose()
    }

    /// Records whose indexed field equals `value`.
    pub async fn get_by_index(&self, path: &str, value: &IndexValue) -> Result<IndexLookup> {
        let index = self.table.index(path)?;
        let sql = format!(
            r#"SELECT {KEY_COLUMNS}, value FROM "{}" WHERE json_extract(value, '$.{}') = ? ORDER BY key"#,
            self.table, index.path
        );
        let rows: Vec<RecordRow> = value
            .bind(sqlx::query(&sql))
            .try_map(|row| sqlx::FromRow::from_row(&row))
            .fetch_all(self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let records = rows.iter().map(RecordRow::value).collect::<Result<Vec<_>>>()?;
        Ok(match index.unique {
            true => IndexLookup::One(records.into_iter().next()),
            false => IndexLookup::Many(records),
        })
    }

    pub async fn keys(&self) -> Result<BTreeSet<Key>> {
        keys(&mut *self.pool.acquire().await.or_raise(|| ErrorKind::Database)?, self.table).await
    }

    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!(r#"SELECT COUNT(*) FROM "{}""#, self.table))
            .fetch_one(self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("row count"))
    }

    pub async fn all(&self) -> Result<Vec<Value>> {
        let sql = format!(r#"SELECT {KEY_COLUMNS}, value FROM "{}""#, self.table);
        let rows: Vec<RecordRow> = sqlx::query_as(&sql).fetch_all(self.pool).await.or_raise(|| ErrorKind::Database)?;
        rows.iter().map(RecordRow::value).collect()
    }

    /// Every record keyed by primary key, walking the table in key order one
    /// row at a time.
    pub async fn all_as_map(&self) -> Result<BTreeMap<Key, Value>> {
        let sql = format!(r#"SELECT {KEY_COLUMNS}, value FROM "{}" ORDER BY key"#, self.table);
        let mut cursor = sqlx::query_as::<_, RecordRow>(&sql).fetch(self.pool);
        let mut map = BTreeMap::new();
        while let Some(row) = cursor.try_next().await.or_raise(|| ErrorKind::Database)? {
            map.insert(row.key()?, row.value()?);
        }
        Ok(map)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert or replace a record keyed by its own key path.
    pub async fn put(&self, record: &Value) -> Result<Key> {
        let key = self.key_of(record)?;
        self.put_with_key(&key, record).await?;
        Ok(key)
    }

    /// Insert or replace a record under an explicitly supplied key.
    pub async fn put_with_key(&self, key: &Key, record: &Value) -> Result<()> {
        let mut conn = self.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
        upsert(&mut conn, self.table, key, record).await
    }

    /// Upsert every record in a single transaction, returning their keys.
    #[instrument(level = "debug", skip(self, records), fields(table = %self.table, records = records.len()))]
    pub async fn put_many(&self, records: &[Value]) -> Result<BTreeSet<Key>> {
        let keyed = self.keyed(records)?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        for (key, record) in &keyed {
            upsert(&mut tx, self.table, key, record).await?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(keyed.into_iter().map(|(key, _)| key).collect())
    }

    /// Delete the given keys in a single transaction. Missing keys are ignored.
    pub async fn delete_many<'k>(&self, keys: impl IntoIterator<Item = &'k Key>) -> Result<usize> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let mut deleted = 0;
        for key in keys {
            deleted += delete(&mut tx, self.table, key).await?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(deleted)
    }

    /// Empty the table, then write every `(key, record)` entry, atomically.
    #[instrument(level = "debug", skip(self, entries), fields(table = %self.table))]
    pub async fn replace_all(&self, entries: impl IntoIterator<Item = (Key, Value)>) -> Result<usize> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query(&format!(r#"DELETE FROM "{}""#, self.table))
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let mut written = 0;
        for (key, record) in entries {
            upsert(&mut tx, self.table, &key, &record).await?;
            written += 1;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(written)
    }

    /// Make the table contain exactly `records`: delete every stored key not
    /// among them and upsert the rest, in one transaction. Either everything
    /// is applied or nothing is.
    ///
    /// Stale records go first so a new record may take over a unique indexed
    /// value from a departed one.
    #[instrument(level = "debug", skip(self, records), fields(table = %self.table, records = records.len()))]
    pub async fn reconcile(&self, records: &[Value]) -> Result<ReconcileReport> {
        let keyed = self.keyed(records)?;
        let current: BTreeSet<Key> = keyed.iter().map(|(key, _)| key.clone()).collect();
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let stored = keys(&mut tx, self.table).await?;
        let stale: BTreeSet<Key> = stored.difference(&current).cloned().collect();
        for key in &stale {
            delete(&mut tx, self.table, key).await?;
        }
        for (key, record) in &keyed {
            upsert(&mut tx, self.table, key, record).await?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(ReconcileReport { upserted: keyed.len(), deleted: stale })
    }

    /// Delete every stored key absent from `observed`, in one transaction.
    ///
    /// Used after a multi-step drain, where the upserts have already been
    /// written page by page.
    #[instrument(level = "debug", skip(self, observed), fields(table = %self.table, observed = observed.len()))]
    pub async fn retain(&self, observed: &BTreeSet<Key>) -> Result<BTreeSet<Key>> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let stored = keys(&mut tx, self.table).await?;
        let stale: BTreeSet<Key> = stored.difference(observed).cloned().collect();
        for key in &stale {
            delete(&mut tx, self.table, key).await?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(stale)
    }

    fn keyed<'r>(&self, records: &'r [Value]) -> Result<Vec<(Key, &'r Value)>> {
        records.iter().map(|record| Ok((self.key_of(record)?, record))).collect()
    }
}

async fn keys(conn: &mut SqliteConnection, table: Table) -> Result<BTreeSet<Key>> {
    let sql = format!(r#"SELECT {KEY_COLUMNS}, '' AS value FROM "{table}""#);
    let rows: Vec<RecordRow> = sqlx::query_as(&sql).fetch_all(&mut *conn).await.or_raise(|| ErrorKind::Database)?;
    rows.iter().map(RecordRow::key).collect()
}

async fn upsert(conn: &mut SqliteConnection, table: Table, key: &Key, record: &Value) -> Result<()> {
    let sql = format!(r#"INSERT INTO "{table}" (key, value) VALUES (?, ?) ON CONFLICT (key) DO UPDATE SET value = excluded.value"#);
    let value = serde_json::to_string(record).or_raise(|| ErrorKind::InvalidData("record value"))?;
    key.bind(sqlx::query(&sql))
        .bind(value)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(())
}

async fn delete(conn: &mut SqliteConnection, table: Table, key: &Key) -> Result<usize> {
    let sql = format!(r#"DELETE FROM "{table}" WHERE key = ?"#);
    let result = key.bind(sqlx::query(&sql)).execute(&mut *conn).await.or_raise(|| ErrorKind::Database)?;
    Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
}
