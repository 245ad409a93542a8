//! Store connection lifecycle and schema migration.

use crate::error::{ErrorKind, Result};
use crate::schema::{self, CURRENT_VERSION, DATABASE_NAME, Table};
use crate::table::TableStore;
use exn::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

// Reads from the query surface can overlap a sync pass writing another table.
const MAX_CONNECTIONS: u32 = 5;

/// How the store should be opened.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Database file. Created if missing.
    pub path: PathBuf,
    /// Schema version to open (and, if necessary, migrate) the store at.
    pub version: u32,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}
impl StoreOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            version: CURRENT_VERSION,
            max_connections: MAX_CONNECTIONS,
            busy_timeout: Duration::from_millis(1500),
        }
    }

    /// Store inside `dir`, under the fixed database name.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(format!("{DATABASE_NAME}.sqlite3")))
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(self.busy_timeout)
    }
}

#[derive(Debug, Default)]
struct State {
    pool: Option<SqlitePool>,
    handles: usize,
}

/// Owner of the single physical connection (pool) to the store.
///
/// Every logical operation runs inside [`with_store`](Self::with_store),
/// which claims a handle for its duration. The first handle opens the
/// database (migrating it if the file is at an older schema version); the
/// last handle to be released closes it again. Construct one manager at
/// startup and share it (`Arc<StoreManager>`) with everything that needs
/// storage access.
///
/// Opening and migrating happen while the manager's open lock is held, so
/// concurrent callers queue behind the first open and never observe a
/// half-migrated store.
#[derive(Debug)]
pub struct StoreManager {
    options: StoreOptions,
    opening: Mutex<()>,
    state: StdMutex<State>,
    opened: AtomicU64,
    closed: AtomicU64,
}

impl StoreManager {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            options,
            opening: Mutex::new(()),
            state: StdMutex::new(State::default()),
            opened: AtomicU64::new(0),
            closed: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Run `callback` against the open store.
    ///
    /// The handle is released on every exit path of the callback, including
    /// a panic or the returned future being dropped part-way through, and the
    /// connection is closed if it was the last one outstanding. A failed open
    /// or migration is returned as an error without claiming a handle.
    pub async fn with_store<F, Fut, T>(&self, callback: F) -> Result<T>
    where
        F: FnOnce(Store) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let claim = self.acquire().await?;
        let result = callback(claim.store()).await;
        claim.release().await;
        result
    }

    /// Number of physical connections opened so far.
    pub fn open_count(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    /// Number of physical connections closed after their last handle was
    /// released. Connections discarded by a failed open are not counted.
    pub fn close_count(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }

    /// Handles currently outstanding.
    pub fn outstanding(&self) -> usize {
        self.state().handles
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn acquire(&self) -> Result<Claim<'_>> {
        let _opening = self.opening.lock().await;
        let existing = self.state().pool.clone();
        let pool = match existing {
            Some(pool) => pool,
            None => {
                let pool = self.open().await?;
                self.state().pool = Some(pool.clone());
                pool
            },
        };
        self.state().handles += 1;
        Ok(Claim { manager: self, pool, released: false })
    }

    /// Give back one handle. Returns the pool if it was the last one, for the
    /// caller to close.
    fn release(&self) -> Option<SqlitePool> {
        let mut state = self.state();
        state.handles = state.handles.saturating_sub(1);
        let pool = match state.handles {
            0 => state.pool.take(),
            _ => None,
        };
        if pool.is_some() {
            self.closed.fetch_add(1, Ordering::Relaxed);
        }
        pool
    }

    #[instrument(skip(self), fields(path = %self.options.path.display(), version = self.options.version))]
    async fn open(&self) -> Result<SqlitePool> {
        if self.options.version > CURRENT_VERSION {
            exn::bail!(ErrorKind::UnknownVersion(self.options.version));
        }
        if let Some(parent) = self.options.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Database)?;
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(self.options.max_connections)
            .connect_with(self.options.connect_options())
            .await
            .or_raise(|| ErrorKind::Database)?;
        self.opened.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = migrate(&pool, self.options.version).await {
            pool.close().await;
            return Err(err);
        }
        debug!("opened store connection");
        Ok(pool)
    }
}

/// One claimed handle. Dropping it without [`release`](Self::release)
/// still gives the handle back; the pool is then closed on a spawned task.
struct Claim<'a> {
    manager: &'a StoreManager,
    pool: SqlitePool,
    released: bool,
}
impl Claim<'_> {
    fn store(&self) -> Store {
        Store { pool: self.pool.clone() }
    }

    async fn release(mut self) {
        self.released = true;
        if let Some(pool) = self.manager.release() {
            pool.close().await;
            debug!("closed store connection");
        }
    }
}
impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(pool) = self.manager.release() {
            debug!("closing store connection of an abandoned operation");
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move { pool.close().await });
            }
        }
    }
}

/// Bring the store up to `target`, applying the operations of every version
/// newer than the one on disk inside a single transaction.
///
/// Returns the version the store was at before migrating.
#[instrument(skip(pool))]
async fn migrate(pool: &SqlitePool, target: u32) -> Result<u32> {
    let mut tx = pool.begin().await.or_raise(|| ErrorKind::Migration)?;
    let on_disk: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(&mut *tx)
        .await
        .or_raise(|| ErrorKind::Migration)?;
    let on_disk = u32::try_from(on_disk).or_raise(|| ErrorKind::InvalidData("schema version"))?;
    if on_disk == target {
        return Ok(on_disk);
    }
    if on_disk > target {
        exn::bail!(ErrorKind::Downgrade(on_disk, target));
    }

    let mut applied = 0usize;
    for migration in schema::migrations_between(on_disk, target)? {
        for operation in migration.operations {
            sqlx::query(&operation.to_sql())
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Migration)?;
            applied += 1;
        }
        debug!(version = migration.version, operations = migration.operations.len(), "applied schema version");
    }
    // PRAGMA arguments cannot be bound; `target` is an integer we control.
    sqlx::query(&format!("PRAGMA user_version = {target}"))
        .execute(&mut *tx)
        .await
        .or_raise(|| ErrorKind::Migration)?;
    tx.commit().await.or_raise(|| ErrorKind::Migration)?;
    tracing::info!(from = on_disk, to = target, applied, "migrated store schema");
    Ok(on_disk)
}

/// A claimed handle on the open store, handed to [`StoreManager::with_store`]
/// callbacks. Cheap to clone; only valid for the duration of the callback.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}
impl Store {
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn table(&self, table: Table) -> TableStore<'_> {
        TableStore::new(&self.pool, table)
    }

    /// Schema version currently recorded in the database.
    pub async fn version(&self) -> Result<u32> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u32::try_from(version).or_raise(|| ErrorKind::InvalidData("schema version"))
    }

    /// Names of all tables present in the database.
    pub async fn table_names(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// Names of all indexes present in the database, excluding the implicit
    /// primary key indexes SQLite creates itself.
    pub async fn index_names(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'index' AND sql IS NOT NULL ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Key;
    use crate::schema::tables_at;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn manager(dir: &TempDir, version: u32) -> StoreManager {
        StoreManager::new(StoreOptions::in_dir(dir.path()).with_version(version))
    }

    #[tokio::test]
    async fn test_fresh_store_migrates_to_version_three() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, 3);
        let (version, tables, indexes) = manager
            .with_store(|store| async move {
                Ok((store.version().await?, store.table_names().await?, store.index_names().await?))
            })
            .await
            .unwrap();
        assert_eq!(version, 3);
        let tables: BTreeSet<String> = tables.into_iter().collect();
        let expected: BTreeSet<String> = tables_at(3).map(|t| t.name().to_string()).collect();
        assert_eq!(tables, expected);
        for table in tables_at(3) {
            for index in table.indexes() {
                assert!(indexes.contains(&index.sql_name(table)), "missing index {}", index.sql_name(table));
            }
        }
        assert!(!tables.contains("equipments"));
    }

    #[tokio::test]
    async fn test_reopening_does_not_reapply_migrations() {
        let dir = TempDir::new().unwrap();
        let first = manager(&dir, CURRENT_VERSION);
        first.with_store(|_| async { Ok(()) }).await.unwrap();
        let second = manager(&dir, CURRENT_VERSION);
        let version = second.with_store(|store| async move { store.version().await }).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
        // Same manager, second physical session.
        second.with_store(|_| async { Ok(()) }).await.unwrap();
        assert_eq!(second.open_count(), 2);
    }

    #[tokio::test]
    async fn test_upgrade_keeps_existing_data() {
        let dir = TempDir::new().unwrap();
        let old = manager(&dir, 3);
        old.with_store(|store| async move { store.table(Table::Vehicles).put(&json!({"id": 1, "building_id": 7})).await })
            .await
            .unwrap();
        let new = manager(&dir, CURRENT_VERSION);
        let (version, vehicle) = new
            .with_store(|store| async move {
                Ok((store.version().await?, store.table(Table::Vehicles).get(&Key::Int(1)).await?))
            })
            .await
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
        assert_eq!(vehicle, Some(json!({"id": 1, "building_id": 7})));
    }

    #[tokio::test]
    async fn test_downgrade_is_rejected() {
        let dir = TempDir::new().unwrap();
        manager(&dir, CURRENT_VERSION).with_store(|_| async { Ok(()) }).await.unwrap();
        let old = manager(&dir, 2);
        let err = old.with_store(|_| async { Ok(()) }).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Downgrade(CURRENT_VERSION, 2));
        assert_eq!(old.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_unknown_version_fails_without_phantom_handle() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, CURRENT_VERSION + 1);
        let err = manager.with_store(|_| async { Ok(()) }).await.unwrap_err();
        assert_eq!(*err, ErrorKind::UnknownVersion(CURRENT_VERSION + 1));
        assert_eq!(manager.outstanding(), 0);
        assert_eq!(manager.open_count(), 0);
        assert_eq!(manager.close_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_migration_releases_nothing() {
        let dir = TempDir::new().unwrap();
        // A pre-existing table with a colliding name makes version 1 fail.
        let pool = SqlitePool::connect_with(StoreOptions::in_dir(dir.path()).connect_options()).await.unwrap();
        sqlx::query(r#"CREATE TABLE "settings" (x)"#).execute(&pool).await.unwrap();
        pool.close().await;

        let manager = manager(&dir, CURRENT_VERSION);
        let err = manager.with_store(|_| async { Ok(()) }).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Migration);
        assert_eq!(manager.outstanding(), 0);
        assert_eq!(manager.close_count(), 0);
        // Nothing from the failed upgrade was committed.
        let pool = SqlitePool::connect_with(StoreOptions::in_dir(dir.path()).connect_options()).await.unwrap();
        let version: i64 = sqlx::query_scalar("PRAGMA user_version").fetch_one(&pool).await.unwrap();
        assert_eq!(version, 0);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_callback_error_still_closes_connection() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, CURRENT_VERSION);
        let err = manager
            .with_store(|_| async { Err::<(), _>(exn::Exn::from(ErrorKind::InvalidData("boom"))) })
            .await
            .unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData("boom"));
        assert_eq!(manager.outstanding(), 0);
        assert_eq!(manager.close_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_operation_releases_its_handle() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, CURRENT_VERSION);
        let pending = manager.with_store(|_| std::future::pending::<Result<()>>());
        assert!(tokio::time::timeout(Duration::from_millis(50), pending).await.is_err());
        assert_eq!(manager.outstanding(), 0);
        assert_eq!(manager.close_count(), 1);

        manager.with_store(|store| async move { store.version().await }).await.unwrap();
        assert_eq!(manager.outstanding(), 0);
        assert_eq!(manager.open_count(), 2);
        assert_eq!(manager.close_count(), 2);
    }

    #[tokio::test]
    async fn test_panicking_callback_releases_its_handle() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(manager(&dir, CURRENT_VERSION));
        let task = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .with_store(|store| async move {
                        assert_eq!(store.version().await?, 0, "callback panics");
                        Ok(())
                    })
                    .await
            })
        };
        assert!(task.await.unwrap_err().is_panic());
        assert_eq!(manager.outstanding(), 0);
        assert_eq!(manager.close_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_parent_directories_are_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lss").join("data").join("shared-api-storage.sqlite3");
        let manager = StoreManager::new(StoreOptions::new(&path));
        let version = manager.with_store(|store| async move { store.version().await }).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
        assert!(path.is_file());
    }

    #[tokio::test]
    async fn test_connection_closes_only_when_last_handle_released() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(manager(&dir, CURRENT_VERSION));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let outer = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .with_store(|store| async move {
                        let _ = rx.await;
                        // Still usable: the inner handle finishing must not have closed it.
                        store.version().await
                    })
                    .await
            })
        };
        while manager.outstanding() == 0 {
            tokio::task::yield_now().await;
        }
        manager.with_store(|store| async move { store.version().await }).await.unwrap();
        assert_eq!(manager.close_count(), 0, "closed while a handle was outstanding");
        tx.send(()).unwrap();
        assert_eq!(outer.await.unwrap().unwrap(), CURRENT_VERSION);

        assert_eq!(manager.outstanding(), 0);
        assert_eq!(manager.open_count(), 1);
        assert_eq!(manager.close_count(), 1);

        // A second 1 -> 0 transition closes a second connection.
        manager.with_store(|_| async { Ok(()) }).await.unwrap();
        assert_eq!(manager.open_count(), 2);
        assert_eq!(manager.close_count(), 2);
    }
}
