//! Job application and goal entities

use serde::{Deserialize, Serialize};

use super::entity::EntityType;
use super::record::Entity;
use crate::error::{Error, Result};

/// Pipeline status of an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ApplicationStatus {
    #[default]
    Saved,
    Applied,
    Interviewing,
    Offer,
    Rejected,
    Withdrawn,
}

/// A tracked job application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub company: String,
    pub position: String,
    #[serde(default)]
    pub status: ApplicationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Application {
    pub fn new(company: impl Into<String>, position: impl Into<String>) -> Result<Self> {
        let company = company.into().trim().to_string();
        let position = position.into().trim().to_string();

        if company.is_empty() {
            return Err(Error::InvalidInput(
                "Application company cannot be empty".to_string(),
            ));
        }
        if position.is_empty() {
            return Err(Error::InvalidInput(
                "Application position cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            company,
            position,
            status: ApplicationStatus::default(),
            applied_date: None,
            location: None,
            job_url: None,
            notes: None,
        })
    }

    #[must_use]
    pub const fn with_status(mut self, status: ApplicationStatus) -> Self {
        self.status = status;
        self
    }
}

impl Entity for Application {
    const TYPE: EntityType = EntityType::Applications;
}

/// Daily / weekly / monthly application targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub daily_goal: u32,
    pub weekly_goal: u32,
    pub monthly_goal: u32,
}

impl Default for Goal {
    fn default() -> Self {
        Self {
            daily_goal: 2,
            weekly_goal: 10,
            monthly_goal: 40,
        }
    }
}

impl Entity for Goal {
    const TYPE: EntityType = EntityType::Goals;
}
