//! Goals - measurable targets, workspace health, and the monitor that keeps
//! stalled goals supplied with work.

mod goal;
mod health;
mod monitor;
mod progress;

pub use goal::{Goal, GoalId, GoalStatus, DEFAULT_VALIDATION_FREQUENCY_MINUTES};
pub use health::{classify_velocity, Velocity, WorkspaceHealth};
pub use monitor::{CycleReport, GoalEvaluation, GoalHealthMonitor, GoalOutcome, MonitorStatus};
pub use progress::{
    achievement_matches, apply_task_progress, extract_achievements, Achievement, AppliedIncrement,
};
