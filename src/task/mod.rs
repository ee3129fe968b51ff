//! Tasks, their result payloads, and the semantic dedup key.
//!
//! Nothing here does IO. State transitions are enforced at the store boundary.

pub mod task;
mod dedup;

pub use dedup::{normalize_text, semantic_hash, GOAL_SENTINEL};
pub use task::{
    FailureCategory, Task, TaskDraft, TaskId, TaskPayload, TaskResult, TaskStatus, WorkspaceId,
};
