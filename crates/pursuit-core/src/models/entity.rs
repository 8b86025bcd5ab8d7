//! Entity types and their local/remote field contract

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One local field and the remote column it is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    /// Field name in the local record payload (camelCase)
    pub local: &'static str,
    /// Column name on the remote table (snake_case)
    pub remote: &'static str,
}

const fn field(local: &'static str, remote: &'static str) -> FieldMapping {
    FieldMapping { local, remote }
}

const APPLICATION_FIELDS: &[FieldMapping] = &[
    field("company", "company"),
    field("position", "position"),
    field("status", "status"),
    field("appliedDate", "applied_date"),
    field("location", "location"),
    field("jobUrl", "job_url"),
    field("notes", "notes"),
];

const GOAL_FIELDS: &[FieldMapping] = &[
    field("dailyGoal", "daily_goal"),
    field("weeklyGoal", "weekly_goal"),
    field("monthlyGoal", "monthly_goal"),
];

const BACKUP_FIELDS: &[FieldMapping] = &[
    field("label", "label"),
    field("recordCount", "record_count"),
    field("payload", "payload"),
];

const ANALYTICS_EVENT_FIELDS: &[FieldMapping] = &[
    field("eventName", "event_name"),
    field("properties", "properties"),
    field("occurredAt", "occurred_at"),
];

const SESSION_FIELDS: &[FieldMapping] = &[
    field("startedAt", "started_at"),
    field("endedAt", "ended_at"),
    field("deviceType", "device_type"),
    field("platform", "platform"),
];

const USER_METRIC_FIELDS: &[FieldMapping] = &[
    field("totalApplications", "total_applications"),
    field("streakDays", "streak_days"),
    field("lastActiveAt", "last_active_at"),
];

const FEEDBACK_FIELDS: &[FieldMapping] = &[
    field("rating", "rating"),
    field("category", "category"),
    field("message", "message"),
];

const PRIVACY_SETTING_FIELDS: &[FieldMapping] = &[
    field("analyticsEnabled", "analytics_enabled"),
    field("crashReportsEnabled", "crash_reports_enabled"),
    field("consentedAt", "consented_at"),
];

/// Every synchronized collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Applications,
    Goals,
    Backups,
    AnalyticsEvents,
    Sessions,
    UserMetrics,
    Feedback,
    PrivacySettings,
}

impl EntityType {
    pub const ALL: [Self; 8] = [
        Self::Applications,
        Self::Goals,
        Self::Backups,
        Self::AnalyticsEvents,
        Self::Sessions,
        Self::UserMetrics,
        Self::Feedback,
        Self::PrivacySettings,
    ];

    /// Stable name, also used as the local table name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applications => "applications",
            Self::Goals => "goals",
            Self::Backups => "backups",
            Self::AnalyticsEvents => "analytics_events",
            Self::Sessions => "sessions",
            Self::UserMetrics => "user_metrics",
            Self::Feedback => "feedback",
            Self::PrivacySettings => "privacy_settings",
        }
    }

    pub const fn local_table(self) -> &'static str {
        self.as_str()
    }

    pub const fn remote_table(self) -> &'static str {
        match self {
            Self::Sessions => "user_sessions",
            Self::Feedback => "feedback_submissions",
            other => other.as_str(),
        }
    }

    /// The single field map shared by the push and pull paths.
    pub const fn fields(self) -> &'static [FieldMapping] {
        match self {
            Self::Applications => APPLICATION_FIELDS,
            Self::Goals => GOAL_FIELDS,
            Self::Backups => BACKUP_FIELDS,
            Self::AnalyticsEvents => ANALYTICS_EVENT_FIELDS,
            Self::Sessions => SESSION_FIELDS,
            Self::UserMetrics => USER_METRIC_FIELDS,
            Self::Feedback => FEEDBACK_FIELDS,
            Self::PrivacySettings => PRIVACY_SETTING_FIELDS,
        }
    }

    /// Local field mirrored into the indexed `status` column, if any.
    pub const fn status_field(self) -> Option<&'static str> {
        match self {
            Self::Applications => Some("status"),
            Self::Feedback => Some("category"),
            _ => None,
        }
    }

    pub fn has_field(self, local: &str) -> bool {
        self.fields().iter().any(|mapping| mapping.local == local)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|entity| entity.as_str() == s.trim())
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown entity type: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn entity_names_parse_back() {
        for entity in EntityType::ALL {
            assert_eq!(entity.as_str().parse::<EntityType>().unwrap(), entity);
        }
        assert!("notes".parse::<EntityType>().is_err());
    }

    #[test]
    fn field_maps_have_no_duplicate_columns() {
        for entity in EntityType::ALL {
            let locals: HashSet<_> = entity.fields().iter().map(|f| f.local).collect();
            let remotes: HashSet<_> = entity.fields().iter().map(|f| f.remote).collect();
            assert_eq!(locals.len(), entity.fields().len(), "{entity}");
            assert_eq!(remotes.len(), entity.fields().len(), "{entity}");
        }
    }

    #[test]
    fn remote_columns_are_snake_case() {
        for entity in EntityType::ALL {
            for mapping in entity.fields() {
                assert!(
                    mapping
                        .remote
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c == '_'),
                    "{entity}.{} is not snake_case",
                    mapping.remote
                );
            }
        }
    }

    #[test]
    fn status_field_is_part_of_field_map() {
        for entity in EntityType::ALL {
            if let Some(status) = entity.status_field() {
                assert!(entity.has_field(status));
            }
        }
    }
}
