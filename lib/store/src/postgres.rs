//! PostgreSQL metadata store.
//!
//! One row per execution; its progress log lives in the row as an ordered
//! JSONB array appended with `logs || $n`. Terminal-status monotonicity is
//! enforced in SQL: updates only match rows still in a non-terminal state,
//! so the losing writer of a cancel/complete race updates zero rows and
//! no-ops.

use agentflow_core::{ExecutionId, UserId, WorkflowId};
use agentflow_workflow::definition::{ExecutionConfig, Visibility, WorkflowData, WorkflowRecord};
use agentflow_workflow::execution::{
    AgentLogRecord, ExecutionRecord, ExecutionStatus, ProgressRecord, TriggerKind,
};
use agentflow_workflow::store::{ExecutionFilter, ExecutionPatch, MetadataStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

const DEFAULT_PAGE_SIZE: i64 = 20;

fn decode_error(what: &str, value: &str, error: impl std::fmt::Display) -> StoreError {
    StoreError::Backend {
        message: format!("invalid {what} '{value}': {error}"),
    }
}

fn backend_error(error: sqlx::Error) -> StoreError {
    StoreError::Backend {
        message: error.to_string(),
    }
}

fn status_from_str(value: &str) -> ExecutionStatus {
    match value {
        "running" => ExecutionStatus::Running,
        "completed" => ExecutionStatus::Completed,
        "failed" => ExecutionStatus::Failed,
        "cancelled" => ExecutionStatus::Cancelled,
        _ => ExecutionStatus::Queued,
    }
}

fn trigger_from_str(value: &str) -> TriggerKind {
    match value {
        "schedule" => TriggerKind::Schedule,
        "webhook" => TriggerKind::Webhook,
        "api" => TriggerKind::Api,
        _ => TriggerKind::Manual,
    }
}

fn trigger_as_str(kind: TriggerKind) -> &'static str {
    match kind {
        TriggerKind::Manual => "manual",
        TriggerKind::Schedule => "schedule",
        TriggerKind::Webhook => "webhook",
        TriggerKind::Api => "api",
    }
}

fn visibility_from_str(value: &str) -> Visibility {
    match value {
        "public" => Visibility::Public,
        _ => Visibility::Private,
    }
}

/// Row type for execution queries.
#[derive(FromRow)]
struct ExecutionRow {
    id: String,
    workflow_id: String,
    user_id: String,
    status: String,
    trigger_kind: String,
    input_data: serde_json::Value,
    output_data: Option<serde_json::Value>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    execution_time_ms: Option<i64>,
    logs: serde_json::Value,
}

impl ExecutionRow {
    fn try_into_record(self) -> Result<ExecutionRecord, StoreError> {
        let id =
            ExecutionId::from_str(&self.id).map_err(|e| decode_error("execution id", &self.id, e))?;
        let workflow_id = WorkflowId::from_str(&self.workflow_id)
            .map_err(|e| decode_error("workflow id", &self.workflow_id, e))?;
        let user_id =
            UserId::from_str(&self.user_id).map_err(|e| decode_error("user id", &self.user_id, e))?;
        let logs: Vec<ProgressRecord> = serde_json::from_value(self.logs)
            .map_err(|e| decode_error("logs", &self.id, e))?;

        Ok(ExecutionRecord {
            id,
            workflow_id,
            user_id,
            status: status_from_str(&self.status),
            trigger_kind: trigger_from_str(&self.trigger_kind),
            input_data: self.input_data,
            output_data: self.output_data,
            error_message: self.error_message,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            execution_time_ms: self.execution_time_ms,
            logs,
        })
    }
}

/// Row type for workflow queries.
#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    owner: String,
    name: String,
    version: i32,
    workflow_data: serde_json::Value,
    execution_config: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    tags: serde_json::Value,
    visibility: String,
}

impl WorkflowRow {
    fn try_into_record(self) -> Result<WorkflowRecord, StoreError> {
        let id =
            WorkflowId::from_str(&self.id).map_err(|e| decode_error("workflow id", &self.id, e))?;
        let owner =
            UserId::from_str(&self.owner).map_err(|e| decode_error("owner id", &self.owner, e))?;
        let workflow_data: WorkflowData = serde_json::from_value(self.workflow_data)
            .map_err(|e| decode_error("workflow data", &self.id, e))?;
        let execution_config: ExecutionConfig = serde_json::from_value(self.execution_config)
            .map_err(|e| decode_error("execution config", &self.id, e))?;
        let tags: Vec<String> = serde_json::from_value(self.tags).unwrap_or_default();

        Ok(WorkflowRecord {
            id,
            owner,
            name: self.name,
            version: self.version.max(0) as u32,
            workflow_data,
            execution_config,
            created_at: self.created_at,
            updated_at: self.updated_at,
            tags,
            visibility: visibility_from_str(&self.visibility),
        })
    }
}

/// Metadata store backed by PostgreSQL.
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    /// Creates a store over an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Saves (inserts or replaces) a workflow record.
    ///
    /// The core treats workflow CRUD as external; this write path exists so
    /// the API layer and tools can seed workflows.
    pub async fn put_workflow(&self, record: &WorkflowRecord) -> Result<(), StoreError> {
        let workflow_data =
            serde_json::to_value(&record.workflow_data).map_err(|e| StoreError::Backend {
                message: e.to_string(),
            })?;
        let execution_config =
            serde_json::to_value(&record.execution_config).map_err(|e| StoreError::Backend {
                message: e.to_string(),
            })?;
        let tags = serde_json::to_value(&record.tags).map_err(|e| StoreError::Backend {
            message: e.to_string(),
        })?;
        let visibility = match record.visibility {
            Visibility::Private => "private",
            Visibility::Public => "public",
        };

        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, owner, name, version, workflow_data, execution_config,
                 created_at, updated_at, tags, visibility)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                version = EXCLUDED.version,
                workflow_data = EXCLUDED.workflow_data,
                execution_config = EXCLUDED.execution_config,
                updated_at = EXCLUDED.updated_at,
                tags = EXCLUDED.tags,
                visibility = EXCLUDED.visibility
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.owner.to_string())
        .bind(&record.name)
        .bind(record.version as i32)
        .bind(workflow_data)
        .bind(execution_config)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(tags)
        .bind(visibility)
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;

        Ok(())
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn create_execution(&self, record: &ExecutionRecord) -> Result<ExecutionId, StoreError> {
        let logs = serde_json::to_value(&record.logs).map_err(|e| StoreError::Backend {
            message: e.to_string(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO executions
                (id, workflow_id, user_id, status, trigger_kind, input_data,
                 output_data, error_message, created_at, started_at,
                 completed_at, execution_time_ms, logs)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.workflow_id.to_string())
        .bind(record.user_id.to_string())
        .bind(record.status.as_str())
        .bind(trigger_as_str(record.trigger_kind))
        .bind(&record.input_data)
        .bind(&record.output_data)
        .bind(&record.error_message)
        .bind(record.created_at)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.execution_time_ms)
        .bind(logs)
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;

        Ok(record.id)
    }

    async fn update_execution(
        &self,
        id: ExecutionId,
        patch: ExecutionPatch,
    ) -> Result<(), StoreError> {
        let appended = serde_json::to_value(&patch.append_logs).map_err(|e| StoreError::Backend {
            message: e.to_string(),
        })?;

        // Only non-terminal rows match; a late terminal writer no-ops
        let result = sqlx::query(
            r#"
            UPDATE executions SET
                status = COALESCE($2, status),
                output_data = COALESCE($3, output_data),
                error_message = COALESCE($4, error_message),
                started_at = COALESCE($5, started_at),
                completed_at = COALESCE($6, completed_at),
                execution_time_ms = COALESCE($7, execution_time_ms),
                logs = logs || $8
            WHERE id = $1 AND status IN ('queued', 'running')
            "#,
        )
        .bind(id.to_string())
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.output_data)
        .bind(patch.error_message)
        .bind(patch.started_at)
        .bind(patch.completed_at)
        .bind(patch.execution_time_ms)
        .bind(appended)
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;

        if result.rows_affected() == 0 {
            // Distinguish "already terminal" (fine) from "missing" (error)
            let exists: Option<String> =
                sqlx::query_scalar("SELECT status FROM executions WHERE id = $1")
                    .bind(id.to_string())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(backend_error)?;
            if exists.is_none() {
                return Err(StoreError::NotFound {
                    entity: "execution",
                    id: id.to_string(),
                });
            }
        }

        Ok(())
    }

    async fn get_execution(
        &self,
        id: ExecutionId,
        user_id: UserId,
    ) -> Result<ExecutionRecord, StoreError> {
        let row: Option<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, user_id, status, trigger_kind, input_data,
                   output_data, error_message, created_at, started_at,
                   completed_at, execution_time_ms, logs
            FROM executions
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_error)?;

        row.ok_or(StoreError::NotFound {
            entity: "execution",
            id: id.to_string(),
        })?
        .try_into_record()
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let limit = if filter.limit == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            i64::from(filter.limit)
        };

        let rows: Vec<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, user_id, status, trigger_kind, input_data,
                   output_data, error_message, created_at, started_at,
                   completed_at, execution_time_ms, logs
            FROM executions
            WHERE ($1::text IS NULL OR workflow_id = $1)
              AND ($2::text IS NULL OR user_id = $2)
              AND ($3::text IS NULL OR status = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filter.workflow_id.map(|id| id.to_string()))
        .bind(filter.user_id.map(|id| id.to_string()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(limit)
        .bind(i64::from(filter.offset))
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;

        rows.into_iter().map(ExecutionRow::try_into_record).collect()
    }

    async fn get_workflow(
        &self,
        id: WorkflowId,
        user_id: UserId,
    ) -> Result<WorkflowRecord, StoreError> {
        let row: Option<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, owner, name, version, workflow_data, execution_config,
                   created_at, updated_at, tags, visibility
            FROM workflows
            WHERE id = $1 AND (owner = $2 OR visibility = 'public')
            "#,
        )
        .bind(id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_error)?;

        row.ok_or(StoreError::NotFound {
            entity: "workflow",
            id: id.to_string(),
        })?
        .try_into_record()
    }

    async fn append_agent_log(&self, record: &AgentLogRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO agent_logs
                (id, execution_id, agent_kind, agent_display_name, step_index,
                 status, input_data, output_data, error_message,
                 execution_time_ms, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.execution_id.to_string())
        .bind(&record.agent_kind)
        .bind(&record.agent_display_name)
        .bind(record.step_index as i32)
        .bind(&record.status)
        .bind(&record.input_data)
        .bind(&record.output_data)
        .bind(&record.error_message)
        .bind(record.execution_time_ms)
        .bind(record.started_at)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            ExecutionStatus::Queued,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(status_from_str(status.as_str()), status);
        }
    }

    #[test]
    fn trigger_round_trips_through_strings() {
        for kind in [
            TriggerKind::Manual,
            TriggerKind::Schedule,
            TriggerKind::Webhook,
            TriggerKind::Api,
        ] {
            assert_eq!(trigger_from_str(trigger_as_str(kind)), kind);
        }
    }

    #[test]
    fn unknown_status_defaults_to_queued() {
        assert_eq!(status_from_str("weird"), ExecutionStatus::Queued);
        assert_eq!(visibility_from_str("weird"), Visibility::Private);
    }
}
