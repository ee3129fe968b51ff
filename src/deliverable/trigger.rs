//! Deliverable Aggregation Trigger.
//!
//! Evaluated after every task completion. A deliverable is assembled for the
//! completed task's (workspace, goal) scope when:
//! - at least `min_completed_tasks` tasks in the scope are completed
//! - at least one of them carries substantial content
//! - no deliverable for the scope was created within the cooldown window
//!
//! Evaluation, assembly and persistence for one scope are serialized behind a
//! per-scope mutex, so a burst of concurrent completions yields one deliverable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use super::{is_substantial, Deliverable, DeliverableScope, NewDeliverable};
use crate::config::TriggerConfig;
use crate::reasoning::{CollaboratorError, SharedContentAssembler};
use crate::store::SharedTaskStore;
use crate::task::{Task, TaskStatus};

#[derive(Debug, Clone)]
pub enum TriggerOutcome {
    InsufficientTasks { completed: usize },
    NoSubstantialContent,
    CoolingDown { last_created_at: DateTime<Utc> },
    Created(Deliverable),
    AssemblyFailed(String),
    StoreUnavailable(String),
}

impl TriggerOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, TriggerOutcome::Created(_))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TriggerStatus {
    pub evaluations: u64,
    pub created: u64,
    pub assembly_failures: u64,
    pub last_created_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Process-local, reset on restart. The store's deliverables are the durable record.
#[derive(Debug, Default)]
struct ScopeState {
    last_created_at: Option<DateTime<Utc>>,
}

pub struct AggregationTrigger {
    store: SharedTaskStore,
    assembler: SharedContentAssembler,
    config: TriggerConfig,
    collaborator_timeout: Duration,
    scopes: Mutex<HashMap<DeliverableScope, Arc<Mutex<ScopeState>>>>,
    status: RwLock<TriggerStatus>,
}

impl AggregationTrigger {
    pub fn new(
        store: SharedTaskStore,
        assembler: SharedContentAssembler,
        config: TriggerConfig,
        collaborator_timeout: Duration,
    ) -> Self {
        Self {
            store,
            assembler,
            config,
            collaborator_timeout,
            scopes: Mutex::new(HashMap::new()),
            status: RwLock::new(TriggerStatus::default()),
        }
    }

    pub async fn status(&self) -> TriggerStatus {
        self.status.read().await.clone()
    }

    pub async fn on_task_completed(&self, task: &Task) -> TriggerOutcome {
        self.on_task_completed_at(task, Utc::now()).await
    }

    pub async fn on_task_completed_at(&self, task: &Task, now: DateTime<Utc>) -> TriggerOutcome {
        let scope = DeliverableScope {
            workspace_id: task.workspace_id,
            goal_id: task.goal_id,
        };

        let scope_lock = self.scope_lock(scope, now).await;
        let mut state = scope_lock.lock().await;
        self.status.write().await.evaluations += 1;

        let outcome = self.evaluate(scope, &mut state, now).await;
        match &outcome {
            TriggerOutcome::Created(deliverable) => {
                tracing::info!(
                    workspace_id = %scope.workspace_id,
                    goal_id = ?scope.goal_id,
                    deliverable_id = %deliverable.id,
                    title = %deliverable.title,
                    "Deliverable created"
                );
                let mut status = self.status.write().await;
                status.created += 1;
                status.last_created_at = Some(deliverable.created_at);
            }
            TriggerOutcome::AssemblyFailed(error) => {
                tracing::warn!(
                    workspace_id = %scope.workspace_id,
                    goal_id = ?scope.goal_id,
                    "Deliverable assembly failed, will retry on next completion: {}",
                    error
                );
                let mut status = self.status.write().await;
                status.assembly_failures += 1;
                status.last_error = Some(error.clone());
            }
            TriggerOutcome::StoreUnavailable(error) => {
                tracing::warn!(workspace_id = %scope.workspace_id, "Trigger store error: {}", error);
                self.status.write().await.last_error = Some(error.clone());
            }
            other => {
                tracing::debug!(workspace_id = %scope.workspace_id, outcome = ?other, "No deliverable");
            }
        }
        outcome
    }

    /// Per-scope lock, pruning idle scopes whose cooldown has lapsed.
    ///
    /// Handles are only cloned under the map lock, so an entry with no other
    /// holder is idle and its local timestamp adds nothing the store's
    /// deliverables don't already record.
    async fn scope_lock(
        &self,
        scope: DeliverableScope,
        now: DateTime<Utc>,
    ) -> Arc<Mutex<ScopeState>> {
        let cooldown = self.config.cooldown();
        let mut scopes = self.scopes.lock().await;
        scopes.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(state) => state
                    .last_created_at
                    .is_some_and(|last| now.signed_duration_since(last) < cooldown),
                Err(_) => true,
            }
        });
        Arc::clone(scopes.entry(scope).or_default())
    }

    async fn evaluate(
        &self,
        scope: DeliverableScope,
        state: &mut ScopeState,
        now: DateTime<Utc>,
    ) -> TriggerOutcome {
        let cooldown = self.config.cooldown();

        if let Some(last) = state.last_created_at {
            if now.signed_duration_since(last) < cooldown {
                return TriggerOutcome::CoolingDown {
                    last_created_at: last,
                };
            }
        }

        let completed: Vec<Task> = match self
            .store
            .list_tasks(scope.workspace_id, Some(TaskStatus::Completed))
            .await
        {
            Ok(tasks) => tasks
                .into_iter()
                .filter(|t| t.goal_id == scope.goal_id)
                .collect(),
            Err(e) => return TriggerOutcome::StoreUnavailable(e.to_string()),
        };

        if completed.len() < self.config.min_completed_tasks {
            return TriggerOutcome::InsufficientTasks {
                completed: completed.len(),
            };
        }

        if !completed
            .iter()
            .any(|t| is_substantial(&t.result, self.config.min_content_chars))
        {
            return TriggerOutcome::NoSubstantialContent;
        }

        // Deliverables written by an earlier process still count toward the window
        let latest = match self
            .store
            .list_deliverables(scope.workspace_id, scope.goal_id)
            .await
        {
            Ok(deliverables) => deliverables
                .into_iter()
                .filter(|d| d.scope() == scope)
                .map(|d| d.created_at)
                .max(),
            Err(e) => return TriggerOutcome::StoreUnavailable(e.to_string()),
        };
        if let Some(last) = latest {
            if now.signed_duration_since(last) < cooldown {
                state.last_created_at = Some(last);
                return TriggerOutcome::CoolingDown {
                    last_created_at: last,
                };
            }
        }

        let goal = match scope.goal_id {
            Some(goal_id) => match self.store.get_goal(goal_id).await {
                Ok(goal) => Some(goal),
                Err(e) => {
                    tracing::debug!(%goal_id, "Assembling without goal record: {}", e);
                    None
                }
            },
            None => None,
        };

        let content = match tokio::time::timeout(
            self.collaborator_timeout,
            self.assembler.assemble_deliverable(goal.as_ref(), &completed),
        )
        .await
        {
            Ok(Ok(content)) => content,
            Ok(Err(e)) => return TriggerOutcome::AssemblyFailed(e.to_string()),
            Err(_) => {
                return TriggerOutcome::AssemblyFailed(
                    CollaboratorError::Timeout(self.collaborator_timeout).to_string(),
                )
            }
        };

        match self
            .store
            .create_deliverable(NewDeliverable {
                scope,
                content,
                created_at: now,
            })
            .await
        {
            Ok(deliverable) => {
                state.last_created_at = Some(deliverable.created_at);
                TriggerOutcome::Created(deliverable)
            }
            Err(e) => TriggerOutcome::StoreUnavailable(e.to_string()),
        }
    }
}
