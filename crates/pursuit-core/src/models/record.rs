//! Record model shared by every entity type

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use super::entity::EntityType;
use crate::error::{Error, Result};

/// Client-generated record identifier, stable across devices.
///
/// New ids are UUID v7 (time-sortable), but any non-empty string pulled from
/// the remote is accepted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wrap an existing identifier, rejecting blank values.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(Error::InvalidInput("Record id cannot be empty".into()));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A typed entity stored as a [`Record`].
pub trait Entity: Serialize + DeserializeOwned {
    const TYPE: EntityType;
}

/// A stored record of any entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier (join key on both local and remote side)
    pub id: RecordId,
    /// Collection this record belongs to
    pub entity: EntityType,
    /// Creation timestamp (Unix ms), set once
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Tombstone marker, kept until the remote delete is confirmed
    pub deleted_at: Option<i64>,
    /// Entity-specific fields, keyed by local (camelCase) name
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a new record with a fresh id
    #[must_use]
    pub fn new(entity: EntityType, fields: Map<String, Value>) -> Self {
        Self::with_id(entity, RecordId::new(), fields)
    }

    /// Create a record with a caller-supplied id
    #[must_use]
    pub fn with_id(entity: EntityType, id: RecordId, fields: Map<String, Value>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id,
            entity,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            fields,
        }
    }

    /// Build a record from a typed entity value.
    pub fn from_entity<T: Entity>(id: RecordId, value: &T) -> Result<Self> {
        match serde_json::to_value(value)? {
            Value::Object(fields) => Ok(Self::with_id(T::TYPE, id, fields)),
            _ => Err(Error::InvalidInput(format!(
                "{} must serialize to an object",
                T::TYPE
            ))),
        }
    }

    /// Decode the fields into a typed entity value.
    pub fn decode<T: Entity>(&self) -> Result<T> {
        if self.entity != T::TYPE {
            return Err(Error::InvalidInput(format!(
                "Record {} is a {}, not a {}",
                self.id,
                self.entity,
                T::TYPE
            )));
        }
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether two copies carry the same user-visible state.
    ///
    /// Timestamps are ignored; a tombstone never equals a live record.
    pub fn same_content(&self, other: &Self) -> bool {
        self.is_deleted() == other.is_deleted() && self.fields == other.fields
    }

    /// Reject fields that are not part of the entity's field map.
    pub fn validate(&self) -> Result<()> {
        if let Some(unknown) = self.fields.keys().find(|key| !self.entity.has_field(key)) {
            return Err(Error::InvalidInput(format!(
                "Unknown field '{unknown}' for {}",
                self.entity
            )));
        }
        Ok(())
    }
}
