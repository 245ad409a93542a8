//! Read-only lookups, each run under its own store handle.

use crate::db::StoreManager;
use crate::error::Result;
use crate::key::{IndexValue, Key};
use crate::schema::Table;
use crate::table::IndexLookup;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

impl StoreManager {
    pub async fn get_by_key(&self, table: Table, key: &Key) -> Result<Option<Value>> {
        self.with_store(|store| async move { store.table(table).get(key).await }).await
    }

    /// Look a record up through one of the table's secondary indexes.
    ///
    /// Unique indexes yield [`IndexLookup::One`], others [`IndexLookup::Many`].
    pub async fn get_by_index(&self, table: Table, index: &str, value: &IndexValue) -> Result<IndexLookup> {
        self.with_store(|store| async move { store.table(table).get_by_index(index, value).await }).await
    }

    pub async fn get_all_keys(&self, table: Table) -> Result<BTreeSet<Key>> {
        self.with_store(|store| async move { store.table(table).keys().await }).await
    }

    pub async fn get_all_as_list(&self, table: Table) -> Result<Vec<Value>> {
        self.with_store(|store| async move { store.table(table).all().await }).await
    }

    pub async fn get_all_as_map(&self, table: Table) -> Result<BTreeMap<Key, Value>> {
        self.with_store(|store| async move { store.table(table).all_as_map().await }).await
    }

    pub async fn count(&self, table: Table) -> Result<u64> {
        self.with_store(|store| async move { store.table(table).count().await }).await
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{StoreManager, StoreOptions};
    use crate::error::ErrorKind;
    use crate::key::{IndexValue, Key};
    use crate::schema::Table;
    use crate::table::IndexLookup;
    use serde_json::json;
    use tempfile::TempDir;

    async fn seeded(dir: &TempDir) -> StoreManager {
        let manager = StoreManager::new(StoreOptions::in_dir(dir.path()));
        manager
            .with_store(|store| async move {
                store
                    .table(Table::Buildings)
                    .put_many(&[
                        json!({"id": 3, "building_type": 0, "leitstelle_building_id": 1}),
                        json!({"id": 1, "building_type": 7}),
                        json!({"id": 2, "building_type": 0, "leitstelle_building_id": 1}),
                    ])
                    .await?;
                store.table(Table::AllianceEventTypes).put(&json!({"id": 4, "caption": "Fest"})).await?;
                Ok(())
            })
            .await
            .unwrap();
        manager
    }

    #[tokio::test]
    async fn test_reads_release_their_handle() {
        let dir = TempDir::new().unwrap();
        let manager = seeded(&dir).await;
        assert_eq!(manager.get_by_key(Table::Buildings, &Key::Int(2)).await.unwrap().unwrap()["building_type"], 0);
        assert_eq!(manager.get_by_key(Table::Buildings, &Key::Int(99)).await.unwrap(), None);
        assert_eq!(manager.count(Table::Buildings).await.unwrap(), 3);
        assert_eq!(manager.outstanding(), 0);
        assert_eq!(manager.open_count(), manager.close_count());
    }

    #[tokio::test]
    async fn test_all_keys_and_map_are_ordered() {
        let dir = TempDir::new().unwrap();
        let manager = seeded(&dir).await;
        let keys: Vec<Key> = manager.get_all_keys(Table::Buildings).await.unwrap().into_iter().collect();
        assert_eq!(keys, vec![Key::Int(1), Key::Int(2), Key::Int(3)]);
        let map = manager.get_all_as_map(Table::Buildings).await.unwrap();
        assert_eq!(map.keys().cloned().collect::<Vec<_>>(), keys);
        assert_eq!(manager.get_all_as_list(Table::Buildings).await.unwrap().len(), 3);
        assert!(manager.get_all_as_list(Table::Vehicles).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_index_queries() {
        let dir = TempDir::new().unwrap();
        let manager = seeded(&dir).await;
        let dispatched = manager
            .get_by_index(Table::Buildings, "leitstelle_building_id", &IndexValue::Int(1))
            .await
            .unwrap()
            .into_vec();
        let ids: Vec<i64> = dispatched.iter().filter_map(|b| b["id"].as_i64()).collect();
        assert_eq!(ids, vec![2, 3]);

        let event = manager
            .get_by_index(Table::AllianceEventTypes, "caption", &IndexValue::from("Fest"))
            .await
            .unwrap();
        assert_eq!(event, IndexLookup::One(Some(json!({"id": 4, "caption": "Fest"}))));

        let err = manager.get_by_index(Table::Buildings, "caption", &IndexValue::from("x")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::UnknownIndex("buildings".to_string(), "caption".to_string()));
    }
}
