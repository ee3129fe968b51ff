//! Workspace health snapshot.
//!
//! Always derived from task, goal and agent records of the current cycle.
//! Nothing here is cached between cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::HealthThresholds;
use crate::goal::Goal;
use crate::store::{Agent, AgentStatus};
use crate::task::{Task, TaskStatus, WorkspaceId};

/// Completions per rolling 24h, bucketed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Velocity {
    Stalled,
    Slow,
    Normal,
    Fast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceHealth {
    pub workspace_id: WorkspaceId,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub completion_rate: f64,
    /// Completions in the last 24 hours
    pub recent_completions: usize,
    pub velocity: Velocity,
    pub active_agents: usize,
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Enough workers and recent activity to justify generating more work
    pub healthy: bool,
}

impl WorkspaceHealth {
    pub fn compute(
        workspace_id: WorkspaceId,
        tasks: &[Task],
        goals: &[Goal],
        agents: &[Agent],
        thresholds: &HealthThresholds,
        now: DateTime<Utc>,
    ) -> Self {
        let day_ago = now - chrono::Duration::hours(24);

        let total_tasks = tasks.len();
        let completed: Vec<&Task> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .collect();
        let completed_tasks = completed.len();
        let recent_completions = completed.iter().filter(|t| t.updated_at >= day_ago).count();

        let completion_rate = if total_tasks > 0 {
            completed_tasks as f64 / total_tasks as f64
        } else {
            0.0
        };

        let velocity = classify_velocity(recent_completions, thresholds);

        let active_agents = agents
            .iter()
            .filter(|a| a.status == AgentStatus::Active)
            .count();

        let last_task_touch = tasks.iter().map(|t| t.updated_at).max();
        let last_goal_created = goals.iter().map(|g| g.created_at).max();
        let last_activity_at = last_task_touch.max(last_goal_created);

        let window = chrono::Duration::hours(thresholds.activity_window_hours.max(0));
        let recently_active = last_activity_at
            .map(|at| now - at <= window)
            .unwrap_or(false);

        Self {
            workspace_id,
            total_tasks,
            completed_tasks,
            completion_rate,
            recent_completions,
            velocity,
            active_agents,
            last_activity_at,
            healthy: active_agents >= thresholds.min_active_agents && recently_active,
        }
    }
}

pub fn classify_velocity(recent_completions: usize, thresholds: &HealthThresholds) -> Velocity {
    if recent_completions == 0 {
        Velocity::Stalled
    } else if recent_completions < thresholds.slow_below {
        Velocity::Slow
    } else if recent_completions < thresholds.fast_at {
        Velocity::Normal
    } else {
        Velocity::Fast
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{agent, task_with_status};
    use uuid::Uuid;

    #[test]
    fn test_velocity_buckets() {
        let t = HealthThresholds::default();
        assert_eq!(classify_velocity(0, &t), Velocity::Stalled);
        assert_eq!(classify_velocity(1, &t), Velocity::Slow);
        assert_eq!(classify_velocity(5, &t), Velocity::Normal);
        assert_eq!(classify_velocity(25, &t), Velocity::Fast);
    }

    #[test]
    fn test_snapshot_counts() {
        let ws = Uuid::new_v4();
        let now = Utc::now();
        let mut old = task_with_status(ws, None, "old", TaskStatus::Completed);
        old.updated_at = now - chrono::Duration::hours(48);
        let tasks = vec![
            old,
            task_with_status(ws, None, "a", TaskStatus::Completed),
            task_with_status(ws, None, "b", TaskStatus::Pending),
            task_with_status(ws, None, "c", TaskStatus::Failed),
        ];
        let agents = vec![agent(ws, AgentStatus::Active)];

        let health =
            WorkspaceHealth::compute(ws, &tasks, &[], &agents, &HealthThresholds::default(), now);

        assert_eq!(health.total_tasks, 4);
        assert_eq!(health.completed_tasks, 2);
        assert_eq!(health.recent_completions, 1);
        assert_eq!(health.completion_rate, 0.5);
        assert_eq!(health.velocity, Velocity::Slow);
        assert!(health.healthy);
    }

    #[test]
    fn test_unhealthy_without_active_agents() {
        let ws = Uuid::new_v4();
        let tasks = vec![task_with_status(ws, None, "a", TaskStatus::Pending)];
        let agents = vec![agent(ws, AgentStatus::Offline)];

        let health = WorkspaceHealth::compute(
            ws,
            &tasks,
            &[],
            &agents,
            &HealthThresholds::default(),
            Utc::now(),
        );
        assert_eq!(health.active_agents, 0);
        assert!(!health.healthy);
    }

    #[test]
    fn test_unhealthy_when_abandoned() {
        let ws = Uuid::new_v4();
        let now = Utc::now();
        let mut stale = task_with_status(ws, None, "a", TaskStatus::Completed);
        stale.updated_at = now - chrono::Duration::days(30);
        let agents = vec![agent(ws, AgentStatus::Active)];

        let health = WorkspaceHealth::compute(
            ws,
            &[stale],
            &[],
            &agents,
            &HealthThresholds::default(),
            now,
        );
        assert!(!health.healthy);
    }

    #[test]
    fn test_new_goal_counts_as_activity() {
        let ws = Uuid::new_v4();
        let goal = Goal::new(ws, "fresh", "items", 3.0);
        let agents = vec![agent(ws, AgentStatus::Active)];

        let health = WorkspaceHealth::compute(
            ws,
            &[],
            &[goal],
            &agents,
            &HealthThresholds::default(),
            Utc::now(),
        );
        assert!(health.healthy);
        assert_eq!(health.velocity, Velocity::Stalled);
    }
}
