use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gateway::Row;

/// Per-company setup checklist, one row per company, mutated by onboarding
/// flows outside this crate. The authorization core only reads it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OnboardingProgress {
    pub company_id: String,
    #[serde(default)]
    pub has_pool: bool,
    #[serde(default)]
    pub has_vesting_schedule: bool,
    #[serde(default)]
    pub has_plan: bool,
    #[serde(default)]
    pub has_employee: bool,
    #[serde(default)]
    pub has_grant: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl OnboardingProgress {
    pub fn from_row(row: &Row) -> Option<Self> {
        serde_json::from_value(serde_json::Value::Object(row.clone())).ok()
    }

    pub fn is_complete(&self) -> bool {
        self.has_pool
            && self.has_vesting_schedule
            && self.has_plan
            && self.has_employee
            && self.has_grant
    }

    /// Completion law over an optional row: a company with no progress row
    /// yet counts as complete, so guards are never blocked on a row that
    /// arrives late after company creation.
    pub fn complete(progress: Option<&Self>) -> bool {
        progress.map_or(true, Self::is_complete)
    }
}
