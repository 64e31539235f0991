//! In-memory metadata store.
//!
//! Backs tests and single-process deployments that do not need durability.
//! Semantics match the PostgreSQL store: owner-scoped reads, newest-first
//! listing, and immutable terminal execution records.

use agentflow_core::{ExecutionId, UserId, WorkflowId};
use agentflow_workflow::definition::{Visibility, WorkflowRecord};
use agentflow_workflow::execution::{AgentLogRecord, ExecutionRecord};
use agentflow_workflow::store::{ExecutionFilter, ExecutionPatch, MetadataStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

const DEFAULT_PAGE_SIZE: usize = 20;

/// A metadata store held entirely in process memory.
#[derive(Default)]
pub struct InMemoryStore {
    executions: Mutex<HashMap<ExecutionId, ExecutionRecord>>,
    workflows: Mutex<HashMap<WorkflowId, WorkflowRecord>>,
    agent_logs: Mutex<Vec<AgentLogRecord>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a workflow record directly (there is no workflow CRUD in the
    /// core; the API layer owning workflows seeds them here).
    pub fn put_workflow(&self, record: WorkflowRecord) {
        self.workflows
            .lock()
            .expect("workflows lock")
            .insert(record.id, record);
    }

    /// Returns all agent logs for an execution, ordered by step index.
    #[must_use]
    pub fn agent_logs_for(&self, execution_id: ExecutionId) -> Vec<AgentLogRecord> {
        let mut logs: Vec<AgentLogRecord> = self
            .agent_logs
            .lock()
            .expect("agent logs lock")
            .iter()
            .filter(|log| log.execution_id == execution_id)
            .cloned()
            .collect();
        logs.sort_by_key(|log| log.step_index);
        logs
    }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn create_execution(&self, record: &ExecutionRecord) -> Result<ExecutionId, StoreError> {
        self.executions
            .lock()
            .expect("executions lock")
            .insert(record.id, record.clone());
        Ok(record.id)
    }

    async fn update_execution(
        &self,
        id: ExecutionId,
        patch: ExecutionPatch,
    ) -> Result<(), StoreError> {
        let mut executions = self.executions.lock().expect("executions lock");
        let record = executions.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "execution",
            id: id.to_string(),
        })?;

        // Terminal records are immutable; late writers no-op
        if record.status.is_terminal() {
            return Ok(());
        }

        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(output) = patch.output_data {
            record.output_data = Some(output);
        }
        if let Some(error) = patch.error_message {
            record.error_message = Some(error);
        }
        if let Some(started_at) = patch.started_at {
            record.started_at = Some(started_at);
        }
        if let Some(completed_at) = patch.completed_at {
            record.completed_at = Some(completed_at);
        }
        if let Some(ms) = patch.execution_time_ms {
            record.execution_time_ms = Some(ms);
        }
        record.logs.extend(patch.append_logs);
        Ok(())
    }

    async fn get_execution(
        &self,
        id: ExecutionId,
        user_id: UserId,
    ) -> Result<ExecutionRecord, StoreError> {
        self.executions
            .lock()
            .expect("executions lock")
            .get(&id)
            .filter(|record| record.user_id == user_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "execution",
                id: id.to_string(),
            })
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let executions = self.executions.lock().expect("executions lock");
        let mut records: Vec<ExecutionRecord> = executions
            .values()
            .filter(|record| {
                filter.workflow_id.is_none_or(|id| record.workflow_id == id)
                    && filter.user_id.is_none_or(|id| record.user_id == id)
                    && filter.status.is_none_or(|status| record.status == status)
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let limit = if filter.limit == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            filter.limit as usize
        };
        Ok(records
            .into_iter()
            .skip(filter.offset as usize)
            .take(limit)
            .collect())
    }

    async fn get_workflow(
        &self,
        id: WorkflowId,
        user_id: UserId,
    ) -> Result<WorkflowRecord, StoreError> {
        self.workflows
            .lock()
            .expect("workflows lock")
            .get(&id)
            .filter(|record| record.owner == user_id || record.visibility == Visibility::Public)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "workflow",
                id: id.to_string(),
            })
    }

    async fn append_agent_log(&self, record: &AgentLogRecord) -> Result<(), StoreError> {
        self.agent_logs
            .lock()
            .expect("agent logs lock")
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_workflow::definition::WorkflowData;
    use agentflow_workflow::execution::{ExecutionStatus, ProgressRecord, TriggerKind};
    use chrono::Utc;
    use serde_json::json;

    fn record(user_id: UserId, workflow_id: WorkflowId) -> ExecutionRecord {
        ExecutionRecord::new(workflow_id, user_id, TriggerKind::Manual, json!({}))
    }

    #[tokio::test]
    async fn create_update_get_roundtrip() {
        let store = InMemoryStore::new();
        let user_id = UserId::new();
        let workflow_id = WorkflowId::new();
        let execution = record(user_id, workflow_id);
        let id = store.create_execution(&execution).await.expect("create");

        store
            .update_execution(
                id,
                ExecutionPatch::running(Utc::now())
                    .with_logs(vec![ProgressRecord::execution_started(id)]),
            )
            .await
            .expect("update");

        let fetched = store.get_execution(id, user_id).await.expect("get");
        assert_eq!(fetched.status, ExecutionStatus::Running);
        assert_eq!(fetched.logs.len(), 1);
    }

    #[tokio::test]
    async fn reads_are_owner_scoped() {
        let store = InMemoryStore::new();
        let owner = UserId::new();
        let execution = record(owner, WorkflowId::new());
        let id = store.create_execution(&execution).await.expect("create");

        let stranger = UserId::new();
        let result = store.get_execution(id, stranger).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn terminal_records_are_immutable() {
        let store = InMemoryStore::new();
        let user_id = UserId::new();
        let execution = record(user_id, WorkflowId::new());
        let id = store.create_execution(&execution).await.expect("create");

        store
            .update_execution(
                id,
                ExecutionPatch::terminal(ExecutionStatus::Completed, Utc::now())
                    .with_output(json!({"ok": true})),
            )
            .await
            .expect("terminal write");

        // A racing cancel writer observes the terminal state and no-ops
        store
            .update_execution(
                id,
                ExecutionPatch::terminal(ExecutionStatus::Cancelled, Utc::now()),
            )
            .await
            .expect("idempotent write");

        let fetched = store.get_execution(id, user_id).await.expect("get");
        assert_eq!(fetched.status, ExecutionStatus::Completed);
        assert_eq!(fetched.output_data, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn listing_filters_and_pages() {
        let store = InMemoryStore::new();
        let user_id = UserId::new();
        let workflow_id = WorkflowId::new();

        for _ in 0..5 {
            store
                .create_execution(&record(user_id, workflow_id))
                .await
                .expect("create");
        }
        store
            .create_execution(&record(user_id, WorkflowId::new()))
            .await
            .expect("create unrelated");

        let filter = ExecutionFilter {
            workflow_id: Some(workflow_id),
            limit: 3,
            ..ExecutionFilter::default()
        };
        let page = store.list_executions(&filter).await.expect("list");
        assert_eq!(page.len(), 3);
        assert!(page.iter().all(|r| r.workflow_id == workflow_id));

        let filter = ExecutionFilter {
            workflow_id: Some(workflow_id),
            limit: 3,
            offset: 3,
            ..ExecutionFilter::default()
        };
        let rest = store.list_executions(&filter).await.expect("list");
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn public_workflows_are_visible_to_everyone() {
        let store = InMemoryStore::new();
        let owner = UserId::new();
        let mut workflow = WorkflowRecord::new(owner, "Shared", WorkflowData::default());
        workflow.visibility = Visibility::Public;
        let id = workflow.id;
        store.put_workflow(workflow);

        let stranger = UserId::new();
        assert!(store.get_workflow(id, stranger).await.is_ok());

        let mut private = WorkflowRecord::new(owner, "Private", WorkflowData::default());
        private.visibility = Visibility::Private;
        let private_id = private.id;
        store.put_workflow(private);
        assert!(store.get_workflow(private_id, stranger).await.is_err());
    }
}
