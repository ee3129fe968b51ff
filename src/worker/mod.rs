//! Worker execution interface.
//!
//! A worker runs one claimed task and reports a `TaskResult`. The executor
//! owns timeouts and panic isolation; implementations only need to do the work.

mod http;

pub use http::HttpWorker;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::task::{Task, TaskResult};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker unreachable: {0}")]
    Unreachable(String),

    #[error("worker returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid worker response: {0}")]
    InvalidResponse(String),

    #[error("worker failed: {0}")]
    Execution(String),
}

impl From<reqwest::Error> for WorkerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            WorkerError::InvalidResponse(e.to_string())
        } else {
            WorkerError::Unreachable(e.to_string())
        }
    }
}

#[async_trait]
pub trait Worker: Send + Sync {
    async fn execute(&self, task: Task) -> Result<TaskResult, WorkerError>;
}

pub type SharedWorker = Arc<dyn Worker>;
