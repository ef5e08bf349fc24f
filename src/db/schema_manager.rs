use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::PathConfig;
use crate::db::db_pool::open_read_only;
use crate::db::descriptions::Descriptions;
use crate::db::introspect::load_tables;
use crate::error::Result;
use crate::schema::Schema;

/// Caches loaded schemas per database name.
pub struct SchemaManager {
    paths: PathConfig,
    sample_values: usize,
    /// Cache of loaded schemas
    schema_cache: RwLock<HashMap<String, Arc<Schema>>>,
    /// Database currently selected by the caller
    active_database: RwLock<Option<String>>,
    /// Last refresh timestamp
    last_refresh: RwLock<chrono::DateTime<chrono::Utc>>,
}

impl SchemaManager {
    pub fn new(paths: PathConfig, sample_values: usize) -> Self {
        Self {
            paths,
            sample_values,
            schema_cache: RwLock::new(HashMap::new()),
            active_database: RwLock::new(None),
            last_refresh: RwLock::new(chrono::Utc::now()),
        }
    }

    pub fn paths(&self) -> &PathConfig {
        &self.paths
    }

    pub fn database_path(&self, database_name: &str) -> Result<PathBuf> {
        self.paths.checked_sqlite_path(database_name)
    }

    pub async fn active_database(&self) -> Option<String> {
        self.active_database.read().await.clone()
    }

    pub async fn last_refresh(&self) -> chrono::DateTime<chrono::Utc> {
        *self.last_refresh.read().await
    }

    /// Returns the cached schema, reading it from disk on first use.
    pub async fn load(&self, database_name: &str) -> Result<Arc<Schema>> {
        PathConfig::validate_database_name(database_name)?;
        if let Some(schema) = self.schema_cache.read().await.get(database_name) {
            debug!("Schema cache hit for {}", database_name);
            return Ok(Arc::clone(schema));
        }

        let mut cache = self.schema_cache.write().await;
        // Another task may have filled the entry while we waited for the lock
        if let Some(schema) = cache.get(database_name) {
            return Ok(Arc::clone(schema));
        }

        let schema = Arc::new(self.read_schema(database_name).await?);
        cache.insert(database_name.to_string(), Arc::clone(&schema));
        *self.last_refresh.write().await = chrono::Utc::now();
        Ok(schema)
    }

    /// Makes `database_name` the active database, dropping every cached schema first.
    pub async fn switch_database(&self, database_name: &str) -> Result<Arc<Schema>> {
        PathConfig::validate_database_name(database_name)?;
        info!("Switching active database to {}", database_name);

        let mut cache = self.schema_cache.write().await;
        let schema = Arc::new(self.read_schema(database_name).await?);
        cache.clear();
        cache.insert(database_name.to_string(), Arc::clone(&schema));
        drop(cache);

        *self.active_database.write().await = Some(database_name.to_string());
        *self.last_refresh.write().await = chrono::Utc::now();
        Ok(schema)
    }

    pub async fn invalidate(&self, database_name: &str) {
        if self.schema_cache.write().await.remove(database_name).is_some() {
            debug!("Invalidated cached schema for {}", database_name);
        }
    }

    pub async fn cached_databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schema_cache.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn read_schema(&self, database_name: &str) -> Result<Schema> {
        let db_path = self.paths.checked_sqlite_path(database_name)?;
        let description_dir = self.paths.description_dir(database_name);
        let meaning_path = self.paths.column_meaning_path();
        let sample_values = self.sample_values;
        let name = database_name.to_string();

        info!("Loading schema for {} from {}", name, db_path.display());

        let schema = tokio::task::spawn_blocking(move || -> Result<Schema> {
            let conn = open_read_only(&db_path)?;
            let mut tables = load_tables(&conn, sample_values)?;

            let mut descriptions = match &description_dir {
                Some(dir) if dir.is_dir() => Descriptions::load_csv_dir(dir, &name, &tables),
                Some(dir) => {
                    warn!("Description directory not found: {}", dir.display());
                    Descriptions::default()
                }
                None => Descriptions::default(),
            };
            if let Some(path) = &meaning_path {
                descriptions.merge_column_meanings(path, &name);
            }
            descriptions.apply(&mut tables);

            Ok(Schema::new(name, tables))
        })
        .await??;

        info!(
            "Loaded schema for {}: {} tables",
            database_name,
            schema.tables.len()
        );
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatasetType;
    use rusqlite::Connection;

    fn synthetic_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let db_dir = dir.path().join("databases");
        std::fs::create_dir_all(&db_dir).unwrap();
        for name in ["hotels", "shop"] {
            let conn = Connection::open(db_dir.join(format!("{}.db", name))).unwrap();
            conn.execute_batch(&format!("CREATE TABLE {}_t (id INTEGER PRIMARY KEY);", name))
                .unwrap();
        }
        dir
    }

    fn manager(root: &tempfile::TempDir) -> SchemaManager {
        SchemaManager::new(
            PathConfig::new(root.path().to_path_buf(), DatasetType::Synthetic),
            3,
        )
    }

    #[tokio::test]
    async fn test_load_is_cached() {
        let root = synthetic_root();
        let manager = manager(&root);
        let first = manager.load("hotels").await.unwrap();
        let second = manager.load("hotels").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.table_names(), vec!["hotels_t"]);
    }

    #[tokio::test]
    async fn test_missing_database() {
        let root = synthetic_root();
        let err = manager(&root).load("nowhere").await.unwrap_err();
        assert_eq!(err.kind(), "InvalidDatabasePath");
    }

    #[tokio::test]
    async fn test_switch_invalidates_cache() {
        let root = synthetic_root();
        let manager = manager(&root);
        manager.load("hotels").await.unwrap();
        manager.switch_database("shop").await.unwrap();

        assert_eq!(manager.active_database().await.as_deref(), Some("shop"));
        assert_eq!(manager.cached_databases().await, vec!["shop"]);
    }

    #[tokio::test]
    async fn test_names_outside_dataset_are_rejected() {
        let root = synthetic_root();
        // A real database one level above the dataset directory
        let conn = Connection::open(root.path().join("secrets.db")).unwrap();
        conn.execute_batch("CREATE TABLE credentials (password TEXT);")
            .unwrap();
        drop(conn);

        let manager = manager(&root);
        for name in ["../secrets", "..\\secrets", "/tmp/secrets"] {
            let err = manager.load(name).await.unwrap_err();
            assert_eq!(err.kind(), "InvalidInput", "{:?}", name);
            let err = manager.switch_database(name).await.unwrap_err();
            assert_eq!(err.kind(), "InvalidInput", "{:?}", name);
        }
        assert!(manager.database_path("../secrets").is_err());
        assert!(manager.cached_databases().await.is_empty());
        assert!(manager.active_database().await.is_none());
    }
}
