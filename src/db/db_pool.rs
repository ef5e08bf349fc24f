use r2d2::{ManageConnection, Pool};
use rusqlite::{Connection, OpenFlags};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, Text2SqlError};

/// r2d2 manager handing out read-only connections to one SQLite file.
pub struct SqliteConnectionManager {
    path: PathBuf,
}

impl SqliteConnectionManager {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ManageConnection for SqliteConnectionManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        Connection::open_with_flags(&self.path, read_only_flags())
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.query_row("SELECT 1", [], |_| Ok(()))
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

fn read_only_flags() -> OpenFlags {
    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX
}

/// Opens a single read-only connection, failing early when the file is absent.
pub fn open_read_only(path: &Path) -> Result<Connection> {
    if !path.is_file() {
        return Err(Text2SqlError::InvalidDatabasePath(path.display().to_string()));
    }
    Ok(Connection::open_with_flags(path, read_only_flags())?)
}

/// Lazily built pools, one per database file.
pub struct DatabasePools {
    max_size: u32,
    pools: Mutex<HashMap<PathBuf, Pool<SqliteConnectionManager>>>,
}

impl DatabasePools {
    pub fn new(max_size: u32) -> Self {
        Self {
            max_size: max_size.max(1),
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, path: &Path) -> Result<Pool<SqliteConnectionManager>> {
        if !path.is_file() {
            return Err(Text2SqlError::InvalidDatabasePath(path.display().to_string()));
        }

        let mut pools = self
            .pools
            .lock()
            .map_err(|_| Text2SqlError::Internal("database pool registry poisoned".to_string()))?;

        if let Some(pool) = pools.get(path) {
            debug!("Reusing connection pool for {}", path.display());
            return Ok(pool.clone());
        }

        info!("Creating connection pool for {}", path.display());
        let pool = Pool::builder()
            .max_size(self.max_size)
            .build(SqliteConnectionManager::new(path.to_path_buf()))?;
        pools.insert(path.to_path_buf(), pool.clone());
        Ok(pool)
    }

    /// Drops the pool for a database so the next request reopens it.
    pub fn evict(&self, path: &Path) {
        if let Ok(mut pools) = self.pools.lock() {
            if pools.remove(path).is_some() {
                debug!("Evicted connection pool for {}", path.display());
            }
        }
    }
}
