//! # Goal Pilot
//!
//! Adaptive orchestration core that drives measurable goals to completion.
//!
//! This library provides:
//! - An adaptive scheduling loop that claims and executes tasks under load
//! - A goal monitor that asks a reasoning service for new work when goals stall
//! - Deliverable assembly once enough substantial work has completed
//! - Recovery of stale, failed and starved tasks with a hard retry ceiling
//!
//! ## Architecture
//!
//! ```text
//!   ┌────────────────┐    ┌──────────────────┐    ┌────────────────┐
//!   │  Goal monitor  │    │ Adaptive executor│    │    Recovery    │
//!   │ (slow cadence) │    │ (adaptive poll)  │    │ (slow cadence) │
//!   └───────┬────────┘    └───┬──────────┬───┘    └───────┬────────┘
//!           │ create_task     │ claim    │ on completion  │ requeue /
//!           │                 │          ▼                │ escalate
//!           │                 │   goal increment +        │
//!           │                 │   aggregation trigger     │
//!           ▼                 ▼          ▼                ▼
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │                  TaskStore (shared, durable)                 │
//!   └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//! - `task`: task types and the semantic dedup key
//! - `goal`: goals, workspace health, progress, and the monitor
//! - `executor`: the scheduling loop and load classification
//! - `deliverable`: content checks and the aggregation trigger
//! - `recovery`: strategy table and the recovery coordinator
//! - `store`: the store contract and the in-memory reference store
//! - `reasoning` / `worker`: external collaborator seams and HTTP clients

pub mod config;
pub mod deliverable;
pub mod executor;
pub mod goal;
pub mod orchestrator;
pub mod reasoning;
pub mod recovery;
pub mod store;
pub mod task;
pub mod worker;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use orchestrator::{Orchestrator, OrchestratorStatus, RunningOrchestrator};
pub use store::{MemoryStore, SharedTaskStore, TaskStore};
