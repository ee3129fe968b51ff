//! Goal entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::WorkspaceId;

pub type GoalId = Uuid;

/// Default minutes between two validations of the same goal.
pub const DEFAULT_VALIDATION_FREQUENCY_MINUTES: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Active,
    Paused,
    Achieved,
}

/// A measurable target tracked per workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: GoalId,
    pub workspace_id: WorkspaceId,
    #[serde(default)]
    pub description: String,
    /// Free-form metric name, matched against task achievements
    pub metric_type: String,
    pub target_value: f64,
    #[serde(default)]
    pub current_value: f64,
    pub status: GoalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_validation_at: Option<DateTime<Utc>>,
    pub validation_frequency_minutes: u32,
    pub created_at: DateTime<Utc>,
}

impl Goal {
    pub fn new(
        workspace_id: WorkspaceId,
        description: impl Into<String>,
        metric_type: impl Into<String>,
        target_value: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            description: description.into(),
            metric_type: metric_type.into(),
            target_value,
            current_value: 0.0,
            status: GoalStatus::Active,
            last_validation_at: None,
            validation_frequency_minutes: DEFAULT_VALIDATION_FREQUENCY_MINUTES,
            created_at: Utc::now(),
        }
    }

    /// current / target, with a non-positive target counting as complete.
    pub fn progress_ratio(&self) -> f64 {
        if self.target_value <= 0.0 {
            return 1.0;
        }
        self.current_value / self.target_value
    }

    pub fn is_met(&self) -> bool {
        self.progress_ratio() >= 1.0
    }

    pub fn validation_frequency(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.validation_frequency_minutes.max(1) as i64)
    }

    /// Never validated, or last validated at least one frequency ago.
    pub fn is_validation_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_validation_at {
            None => true,
            Some(at) => now - at >= self.validation_frequency(),
        }
    }
}
