//! Record <-> remote row mapping.
//!
//! Both directions are driven by the entity's single field map, so the push
//! and pull paths can never disagree on column names.

use chrono::DateTime;
use serde_json::{Map, Value};

use super::backend::RemoteRow;
use crate::error::RemoteError;
use crate::models::{AccountKey, EntityType, Record, RecordId};

/// A pulled row decoded into a local record
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    pub account_key: Option<AccountKey>,
    pub synced_at: Option<i64>,
    pub record: Record,
}

/// Typed mapping for one entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowMapper {
    entity: EntityType,
}

impl RowMapper {
    pub const fn new(entity: EntityType) -> Self {
        Self { entity }
    }

    pub const fn entity(&self) -> EntityType {
        self.entity
    }

    /// Build the row pushed for `record`.
    ///
    /// Every mapped column is written; fields absent locally are sent as
    /// `null` so an upsert clears them remotely.
    pub fn to_remote(&self, record: &Record, account_key: AccountKey, synced_at: i64) -> RemoteRow {
        let mut row = Map::new();
        row.insert("id".into(), Value::from(record.id.as_str()));
        row.insert("user_id".into(), Value::from(account_key.get()));
        row.insert("created_at".into(), Value::from(record.created_at));
        row.insert("updated_at".into(), Value::from(record.updated_at));
        row.insert("synced_at".into(), Value::from(synced_at));

        for mapping in self.entity.fields() {
            let value = record.fields.get(mapping.local).cloned().unwrap_or(Value::Null);
            row.insert(mapping.remote.into(), value);
        }
        row
    }

    /// Decode a pulled row. Unknown columns are ignored; `null` columns are
    /// treated as absent fields.
    pub fn from_remote(&self, row: &RemoteRow) -> Result<RemoteRecord, RemoteError> {
        let table = self.entity.remote_table();
        let id = row
            .get("id")
            .and_then(|value| match value {
                Value::String(id) => Some(id.clone()),
                Value::Number(id) => Some(id.to_string()),
                _ => None,
            })
            .ok_or_else(|| RemoteError::schema(format!("{table}: row without an id column")))?;
        let id = RecordId::parse(id)
            .map_err(|_| RemoteError::schema(format!("{table}: row with a blank id")))?;

        let created_at = timestamp(row, "created_at")
            .ok_or_else(|| RemoteError::schema(format!("{table}.{id}: missing created_at")))?;
        let updated_at = timestamp(row, "updated_at").unwrap_or(created_at);

        let mut fields = Map::new();
        for mapping in self.entity.fields() {
            match row.get(mapping.remote) {
                None | Some(Value::Null) => {}
                Some(value) => {
                    fields.insert(mapping.local.into(), value.clone());
                }
            }
        }

        Ok(RemoteRecord {
            account_key: row.get("user_id").and_then(Value::as_i64).map(AccountKey),
            synced_at: timestamp(row, "synced_at"),
            record: Record {
                id,
                entity: self.entity,
                created_at,
                updated_at,
                deleted_at: None,
                fields,
            },
        })
    }
}

/// Unix ms from either an integer column or an RFC 3339 string.
fn timestamp(row: &RemoteRow, column: &str) -> Option<i64> {
    match row.get(column)? {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|parsed| parsed.timestamp_millis()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Application, ApplicationStatus, Goal};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample(entity: EntityType) -> Record {
        let fields = match entity {
            EntityType::Applications => json!({
                "company": "Acme",
                "position": "Engineer",
                "status": "Interviewing",
                "appliedDate": "2026-01-05",
                "location": "Remote",
                "jobUrl": "https://acme.example/jobs/1",
                "notes": "Referral"
            }),
            EntityType::Goals => json!({"dailyGoal": 2, "weeklyGoal": 10, "monthlyGoal": 40}),
            EntityType::Backups => json!({"label": "weekly", "recordCount": 12, "payload": {"applications": []}}),
            EntityType::AnalyticsEvents => json!({"eventName": "application_added", "properties": {"source": "quick"}, "occurredAt": 1_700_000_000_000_i64}),
            EntityType::Sessions => json!({"startedAt": 1, "endedAt": 2, "deviceType": "desktop", "platform": "linux"}),
            EntityType::UserMetrics => json!({"totalApplications": 7, "streakDays": 3, "lastActiveAt": 5}),
            EntityType::Feedback => json!({"rating": 5, "category": "bug", "message": "Crash on save"}),
            EntityType::PrivacySettings => json!({"analyticsEnabled": true, "crashReportsEnabled": false, "consentedAt": 9}),
        };
        let mut record = Record::new(entity, fields.as_object().cloned().unwrap());
        record.created_at = 1_000;
        record.updated_at = 2_000;
        record
    }

    #[test]
    fn round_trip_every_entity_type() {
        for entity in EntityType::ALL {
            let mapper = RowMapper::new(entity);
            let record = sample(entity);
            assert!(record.validate().is_ok(), "{entity}");

            let row = mapper.to_remote(&record, AccountKey(42), 3_000);
            let decoded = mapper.from_remote(&row).unwrap();
            assert_eq!(decoded.record, record, "{entity}");
            assert_eq!(decoded.account_key, Some(AccountKey(42)));
            assert_eq!(decoded.synced_at, Some(3_000));
        }
    }

    #[test]
    fn push_uses_snake_case_columns() {
        let mapper = RowMapper::new(EntityType::Applications);
        let row = mapper.to_remote(&sample(EntityType::Applications), AccountKey(1), 0);
        assert_eq!(row["job_url"], json!("https://acme.example/jobs/1"));
        assert_eq!(row["applied_date"], json!("2026-01-05"));
        assert!(!row.contains_key("jobUrl"));
        assert_eq!(row["user_id"], json!(1));
    }

    #[test]
    fn absent_fields_are_pushed_as_null_and_pulled_as_absent() {
        let application = Application::new("Acme", "Engineer")
            .unwrap()
            .with_status(ApplicationStatus::Applied);
        let record = Record::from_entity(RecordId::new(), &application).unwrap();
        let mapper = RowMapper::new(EntityType::Applications);

        let row = mapper.to_remote(&record, AccountKey(1), 0);
        assert_eq!(row["notes"], Value::Null);

        let decoded = mapper.from_remote(&row).unwrap().record;
        assert_eq!(decoded.decode::<Application>().unwrap(), application);
    }

    #[test]
    fn pull_accepts_rfc3339_timestamps_and_ignores_unknown_columns() {
        let mapper = RowMapper::new(EntityType::Goals);
        let row = json!({
            "id": "g1",
            "user_id": 7,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:01Z",
            "daily_goal": 4,
            "weekly_goal": 20,
            "monthly_goal": 80,
            "inserted_by": "migration"
        });
        let decoded = mapper.from_remote(row.as_object().unwrap()).unwrap();
        assert_eq!(decoded.record.updated_at - decoded.record.created_at, 1_000);
        let goal: Goal = decoded.record.decode().unwrap();
        assert_eq!(goal.daily_goal, 4);
    }

    #[test]
    fn pull_without_id_is_a_schema_error() {
        let mapper = RowMapper::new(EntityType::Goals);
        let row = json!({"created_at": 1});
        let error = mapper.from_remote(row.as_object().unwrap()).unwrap_err();
        assert_eq!(error.kind, crate::error::RemoteErrorKind::Schema);
        assert!(error.message.contains("goals"));
    }
}
