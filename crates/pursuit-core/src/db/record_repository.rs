//! Record repository implementation

use crate::error::{Error, Result};
use crate::models::{EntityType, Record, RecordId};
use libsql::{params, Connection, Row};
use serde_json::{Map, Value};

/// Sort order for record listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OrderBy {
    #[default]
    CreatedDesc,
    CreatedAsc,
    UpdatedDesc,
}

impl OrderBy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreatedDesc => "created_desc",
            Self::CreatedAsc => "created_asc",
            Self::UpdatedDesc => "updated_desc",
        }
    }

    const fn sql(self) -> &'static str {
        match self {
            Self::CreatedDesc => "created_at DESC, id DESC",
            Self::CreatedAsc => "created_at ASC, id ASC",
            Self::UpdatedDesc => "updated_at DESC, id DESC",
        }
    }
}

/// Trait for record storage operations (async)
#[allow(async_fn_in_trait)]
pub trait RecordRepository {
    /// Get a live record by id
    async fn get(&self, entity: EntityType, id: &RecordId) -> Result<Option<Record>>;

    /// Get a record by id, including tombstones
    async fn get_any(&self, entity: EntityType, id: &RecordId) -> Result<Option<Record>>;

    /// List live records
    async fn list(&self, entity: EntityType, order: OrderBy) -> Result<Vec<Record>>;

    /// Insert or replace a record as given
    async fn upsert(&self, record: &Record) -> Result<()>;

    /// Physically remove a row. Returns whether a row existed.
    async fn remove(&self, entity: EntityType, id: &RecordId) -> Result<bool>;

    /// Remove every row of an entity type
    async fn clear(&self, entity: EntityType) -> Result<u64>;
}

/// libSQL implementation of `RecordRepository`
pub struct LibSqlRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_record(entity: EntityType, row: &Row) -> Result<Record> {
        let id: String = row.get(0)?;
        let data: String = row.get(4)?;
        let fields: Map<String, Value> = match serde_json::from_str(&data)? {
            Value::Object(fields) => fields,
            _ => {
                return Err(Error::Database(format!(
                    "{entity} row {id} does not hold an object payload"
                )))
            }
        };

        Ok(Record {
            id: RecordId::parse(id)?,
            entity,
            created_at: row.get(1)?,
            updated_at: row.get(2)?,
            deleted_at: row.get(3)?,
            fields,
        })
    }

    async fn fetch_one(&self, entity: EntityType, id: &RecordId, live_only: bool) -> Result<Option<Record>> {
        let table = entity.local_table();
        let filter = if live_only { " AND deleted_at IS NULL" } else { "" };
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT id, created_at, updated_at, deleted_at, data FROM {table} WHERE id = ?{filter}"
                ),
                params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(entity, &row)?)),
            None => Ok(None),
        }
    }
}

impl RecordRepository for LibSqlRecordRepository<'_> {
    async fn get(&self, entity: EntityType, id: &RecordId) -> Result<Option<Record>> {
        self.fetch_one(entity, id, true).await
    }

    async fn get_any(&self, entity: EntityType, id: &RecordId) -> Result<Option<Record>> {
        self.fetch_one(entity, id, false).await
    }

    async fn list(&self, entity: EntityType, order: OrderBy) -> Result<Vec<Record>> {
        let table = entity.local_table();
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT id, created_at, updated_at, deleted_at, data FROM {table}
                     WHERE deleted_at IS NULL
                     ORDER BY {}",
                    order.sql()
                ),
                (),
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(entity, &row)?);
        }
        Ok(records)
    }

    async fn upsert(&self, record: &Record) -> Result<()> {
        let table = record.entity.local_table();
        let status = record
            .entity
            .status_field()
            .and_then(|field| record.field_str(field))
            .map(str::to_string);
        let data = serde_json::to_string(&record.fields)?;

        self.conn
            .execute(
                &format!(
                    "INSERT INTO {table} (id, created_at, updated_at, deleted_at, status, data)
                     VALUES (?, ?, ?, ?, ?, ?)
                     ON CONFLICT(id) DO UPDATE SET
                        created_at = excluded.created_at,
                        updated_at = excluded.updated_at,
                        deleted_at = excluded.deleted_at,
                        status = excluded.status,
                        data = excluded.data"
                ),
                params![
                    record.id.as_str(),
                    record.created_at,
                    record.updated_at,
                    record.deleted_at,
                    status,
                    data
                ],
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, entity: EntityType, id: &RecordId) -> Result<bool> {
        let table = entity.local_table();
        let affected = self
            .conn
            .execute(
                &format!("DELETE FROM {table} WHERE id = ?"),
                params![id.as_str()],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn clear(&self, entity: EntityType) -> Result<u64> {
        let table = entity.local_table();
        Ok(self.conn.execute(&format!("DELETE FROM {table}"), ()).await?)
    }
}
