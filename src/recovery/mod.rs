//! Recovery of stale, failed and starved tasks.

mod coordinator;
mod strategy;

pub use coordinator::{RecoveryCoordinator, RecoveryReport, RecoveryStatus};
pub use strategy::{broaden_context, RecoveryAction, StrategyTable};
