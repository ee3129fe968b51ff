//! Failure-category to recovery-action mapping.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::task::FailureCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Back to pending with the same parameters
    Requeue,
    /// Back to pending with a larger time budget
    RequeueBroadened,
    /// Terminal failure, left for external review
    Escalate,
}

/// Configurable per-category strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyTable {
    pub timeout: RecoveryAction,
    pub validation_error: RecoveryAction,
    pub worker_crash: RecoveryAction,
    pub dependency_blocked: RecoveryAction,
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self {
            timeout: RecoveryAction::RequeueBroadened,
            validation_error: RecoveryAction::RequeueBroadened,
            worker_crash: RecoveryAction::Requeue,
            dependency_blocked: RecoveryAction::Escalate,
        }
    }
}

impl StrategyTable {
    pub fn action_for(&self, category: FailureCategory) -> RecoveryAction {
        match category {
            FailureCategory::Timeout => self.timeout,
            FailureCategory::ValidationError => self.validation_error,
            FailureCategory::WorkerCrash => self.worker_crash,
            FailureCategory::DependencyBlocked => self.dependency_blocked,
        }
    }

    /// The retry ceiling overrides the table.
    pub fn select(
        &self,
        category: FailureCategory,
        retry_count: u32,
        max_retries: u32,
    ) -> RecoveryAction {
        if retry_count >= max_retries {
            RecoveryAction::Escalate
        } else {
            self.action_for(category)
        }
    }
}

/// Parameters for a broadened retry: double the timeout scale up to `max_scale`.
pub fn broaden_context(
    context: &Map<String, Value>,
    attempt: u32,
    max_scale: u32,
) -> Map<String, Value> {
    let current = context
        .get("timeout_scale")
        .and_then(Value::as_u64)
        .unwrap_or(1)
        .max(1);
    let scale = current.saturating_mul(2).min(max_scale.max(1) as u64);

    let mut broadened = context.clone();
    broadened.insert("timeout_scale".to_string(), Value::from(scale));
    broadened.insert("broadened".to_string(), Value::Bool(true));
    broadened.insert("attempt".to_string(), Value::from(attempt));
    broadened
}
