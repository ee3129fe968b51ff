//! Worker reached over HTTP: `POST {base}/execute` with the task as JSON,
//! answering with a `TaskResult`.

use async_trait::async_trait;
use reqwest::Client;

use super::{Worker, WorkerError};
use crate::task::{Task, TaskResult};

pub struct HttpWorker {
    client: Client,
    base_url: String,
}

impl HttpWorker {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Worker for HttpWorker {
    async fn execute(&self, task: Task) -> Result<TaskResult, WorkerError> {
        let url = format!("{}/execute", self.base_url);
        tracing::debug!(task_id = %task.id, %url, "Dispatching task to worker");

        let resp = self.client.post(&url).json(&task).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(WorkerError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| WorkerError::InvalidResponse(format!("{}: {}", e, text)))
    }
}
