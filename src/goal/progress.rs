//! Goal-increment: turns measurable achievements in task results into goal progress.
//!
//! A structured payload may carry an `achievements` field, either as an object
//! `{"contacts": 3}` or as an array `[{"metric": "contacts", "value": 3}]`.
//! Entries without a metric count toward the task's own goal.

use serde_json::Value;

use crate::goal::{Goal, GoalId};
use crate::store::TaskStore;
use crate::task::{normalize_text, Task, TaskPayload};

/// One measurable unit of progress reported by a task.
#[derive(Debug, Clone, PartialEq)]
pub struct Achievement {
    pub metric: Option<String>,
    pub value: f64,
}

/// A goal increment that was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedIncrement {
    pub goal_id: GoalId,
    pub increment: f64,
    pub current_value: f64,
}

/// Pull achievements out of a payload. Non-positive and non-finite values are dropped.
pub fn extract_achievements(payload: &TaskPayload) -> Vec<Achievement> {
    let TaskPayload::Structured(map) = payload else {
        return Vec::new();
    };

    let mut achievements = Vec::new();
    match map.get("achievements") {
        Some(Value::Object(entries)) => {
            for (metric, value) in entries {
                if let Some(value) = value.as_f64() {
                    achievements.push(Achievement {
                        metric: Some(metric.clone()),
                        value,
                    });
                }
            }
        }
        Some(Value::Array(items)) => {
            for item in items {
                let metric = item
                    .get("metric")
                    .or_else(|| item.get("metric_type"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let value = item
                    .get("value")
                    .or_else(|| item.get("count"))
                    .and_then(Value::as_f64);
                if let Some(value) = value {
                    achievements.push(Achievement { metric, value });
                }
            }
        }
        _ => {}
    }

    achievements.retain(|a| a.value.is_finite() && a.value > 0.0);
    achievements
}

/// Whether an achievement counts toward a goal for the given task.
pub fn achievement_matches(achievement: &Achievement, goal: &Goal, task: &Task) -> bool {
    if task.workspace_id != goal.workspace_id {
        return false;
    }
    match &achievement.metric {
        Some(metric) => {
            normalize_text(metric) == normalize_text(&goal.metric_type)
                && task.goal_id.map_or(true, |id| id == goal.id)
        }
        None => task.goal_id == Some(goal.id),
    }
}

/// Apply a completed task's achievements to the matching active goals.
///
/// Store errors affect only the increment they occurred on.
pub async fn apply_task_progress(store: &dyn TaskStore, task: &Task) -> Vec<AppliedIncrement> {
    let achievements = extract_achievements(&task.result);
    if achievements.is_empty() {
        return Vec::new();
    }

    let goals = match store.get_active_goals(task.workspace_id).await {
        Ok(goals) => goals,
        Err(e) => {
            tracing::warn!(
                task_id = %task.id,
                workspace_id = %task.workspace_id,
                "Failed to load goals for progress update: {}",
                e
            );
            return Vec::new();
        }
    };

    let mut applied = Vec::new();
    for goal in &goals {
        let increment: f64 = achievements
            .iter()
            .filter(|a| achievement_matches(a, goal, task))
            .map(|a| a.value)
            .sum();
        if increment <= 0.0 {
            continue;
        }

        match store.update_goal_progress(goal.id, increment).await {
            Ok(updated) => {
                tracing::info!(
                    goal_id = %goal.id,
                    task_id = %task.id,
                    increment,
                    current = updated.current_value,
                    target = updated.target_value,
                    "Goal progress updated"
                );
                applied.push(AppliedIncrement {
                    goal_id: goal.id,
                    increment,
                    current_value: updated.current_value,
                });
            }
            Err(e) => {
                tracing::warn!(goal_id = %goal.id, "Failed to update goal progress: {}", e);
            }
        }
    }
    applied
}
