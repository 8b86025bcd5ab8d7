//! Database connection management

use crate::error::Result;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;

use super::migrations;

/// Page-level usage of the local database file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageUsage {
    pub page_size: u64,
    pub page_count: u64,
    pub freelist_count: u64,
    pub max_page_count: u64,
}

impl StorageUsage {
    /// Bytes held by live pages.
    pub const fn used_bytes(&self) -> u64 {
        self.page_count.saturating_sub(self.freelist_count) * self.page_size
    }

    /// Bytes still writable before the page quota is reached.
    pub const fn available_bytes(&self) -> u64 {
        (self.max_page_count.saturating_sub(self.page_count) + self.freelist_count) * self.page_size
    }
}

/// Database wrapper for libSQL connections
pub struct Database {
    _db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        Self::from_libsql(db).await
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::from_libsql(db).await
    }

    async fn from_libsql(db: LibSqlDatabase) -> Result<Self> {
        let conn = db.connect()?;
        let database = Self { _db: db, conn };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Configure `SQLite` for optimal performance
    async fn configure(&self) -> Result<()> {
        // journal_mode returns a row and is rejected for in-memory databases
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        self.conn
            .execute("PRAGMA cache_size = 10000;", ())
            .await
            .ok();
        Ok(())
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    /// Current schema version
    pub async fn schema_version(&self) -> Result<i32> {
        migrations::get_version(&self.conn).await
    }

    /// Read page counters for the storage-health probe
    pub async fn usage(&self) -> Result<StorageUsage> {
        Ok(StorageUsage {
            page_size: self.pragma_u64("page_size").await?,
            page_count: self.pragma_u64("page_count").await?,
            freelist_count: self.pragma_u64("freelist_count").await?,
            max_page_count: self.pragma_u64("max_page_count").await?,
        })
    }

    /// Cap the database size; writes beyond it fail with a full-disk error.
    pub async fn set_max_page_count(&self, pages: u64) -> Result<u64> {
        let mut rows = self
            .conn
            .query(&format!("PRAGMA max_page_count = {pages}"), ())
            .await?;
        let applied = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(u64::try_from(applied).unwrap_or_default())
    }

    async fn pragma_u64(&self, name: &str) -> Result<u64> {
        let mut rows = self.conn.query(&format!("PRAGMA {name}"), ()).await?;
        let value = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(u64::try_from(value).unwrap_or_default())
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}
