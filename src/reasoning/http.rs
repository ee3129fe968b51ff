//! HTTP client for an external reasoning service.
//!
//! Endpoints (relative to the base URL):
//! - `POST /propose-tasks`        `{goal, context}`         -> `{tasks: [TaskDraft]}`
//! - `POST /assemble-deliverable` `{goal?, completed_tasks}` -> `DeliverableContent`

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{CollaboratorError, ContentAssembler, TaskGenerator, WorkspaceContext};
use crate::deliverable::DeliverableContent;
use crate::goal::Goal;
use crate::task::{Task, TaskDraft};

pub struct HttpReasoningClient {
    client: Client,
    base_url: String,
}

impl HttpReasoningClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, CollaboratorError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.post(&url).json(body).send().await?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(CollaboratorError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| {
            CollaboratorError::InvalidResponse(format!("{} from {}: {}", e, url, text))
        })
    }
}

#[derive(Serialize)]
struct ProposeRequest<'a> {
    goal: &'a Goal,
    context: &'a WorkspaceContext,
}

#[derive(Deserialize)]
struct ProposeResponse {
    #[serde(default)]
    tasks: Vec<TaskDraft>,
}

#[derive(Serialize)]
struct AssembleRequest<'a> {
    goal: Option<&'a Goal>,
    completed_tasks: &'a [Task],
}

#[async_trait]
impl TaskGenerator for HttpReasoningClient {
    async fn propose_tasks(
        &self,
        goal: &Goal,
        context: &WorkspaceContext,
    ) -> Result<Vec<TaskDraft>, CollaboratorError> {
        let response: ProposeResponse = self
            .post("/propose-tasks", &ProposeRequest { goal, context })
            .await?;

        // Drop drafts without a usable name instead of failing the whole batch
        let drafts: Vec<TaskDraft> = response
            .tasks
            .into_iter()
            .filter(|d| !d.name.trim().is_empty())
            .collect();
        tracing::debug!(goal_id = %goal.id, count = drafts.len(), "Received task proposals");
        Ok(drafts)
    }
}

#[async_trait]
impl ContentAssembler for HttpReasoningClient {
    async fn assemble_deliverable(
        &self,
        goal: Option<&Goal>,
        completed_tasks: &[Task],
    ) -> Result<DeliverableContent, CollaboratorError> {
        let content: DeliverableContent = self
            .post(
                "/assemble-deliverable",
                &AssembleRequest {
                    goal,
                    completed_tasks,
                },
            )
            .await?;

        if content.title.trim().is_empty() {
            return Err(CollaboratorError::InvalidResponse(
                "deliverable title is empty".to_string(),
            ));
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trimmed() {
        let client = HttpReasoningClient::new("http://localhost:8080///");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_network_error() {
        // Port 9 (discard) on localhost is closed in test environments
        let client = HttpReasoningClient::new("http://127.0.0.1:9");
        let goal = Goal::new(uuid::Uuid::new_v4(), "g", "m", 1.0);
        let err = client.assemble_deliverable(Some(&goal), &[]).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Network(_)));
        assert!(err.is_retryable());
    }
}
