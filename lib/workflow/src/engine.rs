//! The execution engine.
//!
//! One engine instance serves the whole process. Each `execute` call runs a
//! single workflow to completion:
//!
//! 1. Acquire an admission permit (caps concurrent executions)
//! 2. Build the execution graph (structural failures end the run before any
//!    node is dispatched)
//! 3. Register an in-flight entry with a per-execution cancellation token
//! 4. Drive the dispatch loop: spawn every ready node as a task, join
//!    results, merge variables, unblock dependents
//! 5. Persist the terminal state and emit the terminal progress event
//!
//! A background monitor cancels runs whose wall-clock age exceeds the
//! configured cap. Terminal store writes are idempotent, so the race between
//! an external `cancel` and natural completion converges on one state.

use crate::agent::{AgentInvoker, AgentOutcome};
use crate::context::ExecutionContext;
use crate::definition::WorkflowData;
use crate::error::{EngineError, InvokeError};
use crate::events::ProgressSink;
use crate::execution::{
    AgentLogRecord, ExecutionStatus, NodeRun, ProgressRecord,
};
use crate::graph::ExecutionGraph;
use crate::node::{Node, NodeId};
use crate::store::{ExecutionPatch, MetadataStore};
use crate::work::ReadyTracker;
use agentflow_core::{AgentLogId, ExecutionId, UserId, WorkflowId};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Tuning knobs for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum executions in flight; further `execute` calls block.
    pub max_concurrent_executions: usize,
    /// Wall-clock budget per execution.
    pub execution_timeout: Duration,
    /// How often the monitor scans for stale executions.
    pub monitor_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 100,
            execution_timeout: Duration::from_secs(3600),
            monitor_interval: Duration::from_secs(60),
        }
    }
}

/// Bookkeeping for one running execution.
struct InFlight {
    workflow_id: WorkflowId,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

/// What one node task hands back to the dispatch loop.
struct NodeTaskResult {
    node: Node,
    started_at: DateTime<Utc>,
    input: JsonValue,
    outcome: Result<AgentOutcome, InvokeError>,
}

/// The workflow execution engine.
pub struct ExecutionEngine {
    store: Arc<dyn MetadataStore>,
    sink: Arc<dyn ProgressSink>,
    invoker: Arc<dyn AgentInvoker>,
    config: EngineConfig,
    admission: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashMap<ExecutionId, InFlight>>>,
    shutdown: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionEngine {
    /// Creates an engine over the given store, sink, and agent invoker.
    #[must_use]
    pub fn new(
        store: Arc<dyn MetadataStore>,
        sink: Arc<dyn ProgressSink>,
        invoker: Arc<dyn AgentInvoker>,
        config: EngineConfig,
    ) -> Self {
        let admission = Arc::new(Semaphore::new(config.max_concurrent_executions));
        Self {
            store,
            sink,
            invoker,
            config,
            admission,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            monitor: Mutex::new(None),
        }
    }

    /// Starts the background monitor loop.
    pub fn start(&self) {
        let in_flight = Arc::clone(&self.in_flight);
        let shutdown = self.shutdown.clone();
        let interval = self.config.monitor_interval;
        let timeout = self.config.execution_timeout;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        let stale: Vec<(ExecutionId, CancellationToken)> = in_flight
                            .lock()
                            .expect("in-flight lock")
                            .iter()
                            .filter(|(_, entry)| {
                                (now - entry.started_at).num_milliseconds()
                                    > timeout.as_millis() as i64
                            })
                            .map(|(id, entry)| (*id, entry.cancel.clone()))
                            .collect();

                        for (execution_id, token) in stale {
                            tracing::warn!(%execution_id, "cancelling stale execution");
                            token.cancel();
                        }
                    }
                }
            }
        });

        *self.monitor.lock().expect("monitor lock") = Some(handle);
        tracing::info!("execution engine started");
    }

    /// Stops the engine: cancels every in-flight execution and waits for
    /// graceful termination.
    pub async fn stop(&self) {
        tracing::info!("stopping execution engine");
        self.shutdown.cancel();

        // In-flight runs observe the token and drain themselves
        for _ in 0..500 {
            if self.in_flight.lock().expect("in-flight lock").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let handle = self.monitor.lock().expect("monitor lock").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Number of executions currently in flight.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.in_flight.lock().expect("in-flight lock").len()
    }

    /// Requests cancellation of a running execution.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionNotFound` if the execution is not in flight.
    pub async fn cancel(&self, execution_id: ExecutionId) -> Result<(), EngineError> {
        let entry = self
            .in_flight
            .lock()
            .expect("in-flight lock")
            .get(&execution_id)
            .map(|entry| (entry.workflow_id, entry.started_at, entry.cancel.clone()));

        let Some((workflow_id, started_at, token)) = entry else {
            return Err(EngineError::ExecutionNotFound { execution_id });
        };

        token.cancel();

        let record = ProgressRecord::execution_cancelled(execution_id);
        let duration_ms = (Utc::now() - started_at).num_milliseconds();
        self.store
            .update_execution(
                execution_id,
                ExecutionPatch::terminal(ExecutionStatus::Cancelled, Utc::now())
                    .with_duration_ms(duration_ms)
                    .with_logs(vec![record.clone()]),
            )
            .await?;
        self.sink
            .execution_update(workflow_id, execution_id, &record)
            .await;
        Ok(())
    }

    /// Runs a workflow to completion.
    ///
    /// The execution record must already exist (status queued). Returns the
    /// run's output payload on success.
    ///
    /// # Errors
    ///
    /// `InvalidWorkflow` for structural failures, `NodeFailed` when a node
    /// fails, `Cancelled` when the run is cancelled, `Store` when a
    /// non-terminal store write fails.
    pub async fn execute(
        &self,
        execution_id: ExecutionId,
        workflow_data: &WorkflowData,
        input_data: JsonValue,
        user_id: UserId,
        workflow_id: WorkflowId,
    ) -> Result<JsonValue, EngineError> {
        let _permit = Arc::clone(&self.admission)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Internal {
                message: "engine admission closed".to_string(),
            })?;

        let graph = match ExecutionGraph::build(workflow_data) {
            Ok(graph) => graph,
            Err(graph_error) => {
                let message = graph_error.to_string();
                tracing::error!(%execution_id, error = %message, "workflow rejected");
                let record = ProgressRecord::execution_failed(execution_id, message.clone());
                self.store
                    .update_execution(
                        execution_id,
                        ExecutionPatch::terminal(ExecutionStatus::Failed, Utc::now())
                            .with_error(message)
                            .with_logs(vec![record.clone()]),
                    )
                    .await?;
                self.sink
                    .execution_update(workflow_id, execution_id, &record)
                    .await;
                return Err(graph_error.into());
            }
        };

        let cancel = self.shutdown.child_token();
        let started_at = Utc::now();
        self.in_flight.lock().expect("in-flight lock").insert(
            execution_id,
            InFlight {
                workflow_id,
                started_at,
                cancel: cancel.clone(),
            },
        );

        tracing::info!(%execution_id, %workflow_id, %user_id, nodes = graph.node_count(), "executing workflow");

        let result = self
            .run(execution_id, workflow_id, &graph, input_data, &cancel, started_at)
            .await;

        self.in_flight
            .lock()
            .expect("in-flight lock")
            .remove(&execution_id);

        result
    }

    #[allow(clippy::too_many_lines)]
    async fn run(
        &self,
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        graph: &ExecutionGraph,
        input_data: JsonValue,
        cancel: &CancellationToken,
        started_at: DateTime<Utc>,
    ) -> Result<JsonValue, EngineError> {
        let start_record = ProgressRecord::execution_started(execution_id);
        self.store
            .update_execution(
                execution_id,
                ExecutionPatch::running(started_at).with_logs(vec![start_record.clone()]),
            )
            .await?;
        self.sink
            .execution_update(workflow_id, execution_id, &start_record)
            .await;

        let mut ctx = ExecutionContext::new(&Map::new(), &input_data);
        let mut tracker = ReadyTracker::from_graph(graph);
        let mut node_runs: HashMap<NodeId, NodeRun> = graph
            .node_ids()
            .map(|id| (id.clone(), NodeRun::new(id.clone())))
            .collect();
        let mut tasks: JoinSet<NodeTaskResult> = JoinSet::new();
        let mut step_index: u32 = 0;
        let mut first_error: Option<(NodeId, String)> = None;

        loop {
            // Dispatch everything ready, unless the run is already doomed
            if first_error.is_none() && !cancel.is_cancelled() {
                for node_id in tracker.ready_nodes() {
                    tracker.mark_executing(&node_id);
                    let node = graph.node(&node_id).expect("ready node in graph").clone();
                    if let Some(run) = node_runs.get_mut(&node_id) {
                        run.start();
                    }

                    let record = ProgressRecord::node_started(execution_id, node_id.clone());
                    self.push_progress(workflow_id, execution_id, record).await?;

                    let input = ctx.prepare_input(&node);
                    let invoker = Arc::clone(&self.invoker);
                    let task_cancel = cancel.clone();
                    tasks.spawn(async move {
                        let node_started = Utc::now();
                        let input_value = input.as_value();
                        let outcome = match node.data.agent_kind.clone() {
                            Some(kind) => {
                                let config = JsonValue::Object(node.data.config.clone());
                                invoker.invoke(&kind, &config, input, &task_cancel).await
                            }
                            // Trigger/condition/action nodes without an agent
                            // pass through
                            None => Ok(passthrough_outcome(&node, node_started)),
                        };
                        NodeTaskResult {
                            node,
                            started_at: node_started,
                            input: input_value,
                            outcome,
                        }
                    });
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            let task = match joined {
                Ok(task) => task,
                Err(join_error) => {
                    tracing::error!(%execution_id, error = %join_error, "node task panicked");
                    if first_error.is_none() {
                        first_error = Some((
                            NodeId::from("unknown"),
                            format!("node task panicked: {join_error}"),
                        ));
                        cancel.cancel();
                    }
                    continue;
                }
            };

            let finished_at = Utc::now();
            let node_id = task.node.id.clone();

            match task.outcome {
                Ok(outcome) => {
                    ctx.merge_variables(outcome.variables.clone());

                    let node_result = json!({
                        "status": "completed",
                        "result": {
                            "output": outcome.output,
                            "variables": outcome.variables,
                            "metadata": outcome.metadata,
                        },
                        "execution_time_ms": (finished_at - task.started_at).num_milliseconds(),
                        "timestamp": finished_at.to_rfc3339(),
                    });
                    ctx.record_result(node_id.clone(), node_result.clone());
                    if let Some(run) = node_runs.get_mut(&node_id) {
                        run.complete(node_result.clone());
                    }
                    tracker.mark_completed(&node_id);

                    self.write_agent_log(
                        execution_id,
                        &task.node,
                        step_index,
                        "completed",
                        Some(task.input),
                        Some(node_result.clone()),
                        None,
                        task.started_at,
                        finished_at,
                    )
                    .await;
                    step_index += 1;

                    let record =
                        ProgressRecord::node_completed(execution_id, node_id, node_result);
                    self.push_progress(workflow_id, execution_id, record).await?;
                }
                Err(error) if error.is_cancelled() => {
                    // A sibling cancelled by failure or external cancel; not a
                    // node failure of its own
                    if let Some(run) = node_runs.get_mut(&node_id) {
                        run.skip();
                    }
                    self.write_agent_log(
                        execution_id,
                        &task.node,
                        step_index,
                        "cancelled",
                        Some(task.input),
                        None,
                        None,
                        task.started_at,
                        finished_at,
                    )
                    .await;
                    step_index += 1;
                }
                Err(error) => {
                    let message = error.to_string();
                    tracing::error!(%execution_id, node = %node_id, error = %message, "node failed");
                    if let Some(run) = node_runs.get_mut(&node_id) {
                        run.fail(message.clone());
                    }
                    tracker.mark_failed(&node_id);

                    self.write_agent_log(
                        execution_id,
                        &task.node,
                        step_index,
                        "failed",
                        Some(task.input),
                        None,
                        Some(message.clone()),
                        task.started_at,
                        finished_at,
                    )
                    .await;
                    step_index += 1;

                    let record = ProgressRecord::node_failed(
                        execution_id,
                        node_id.clone(),
                        message.clone(),
                    );
                    self.push_progress(workflow_id, execution_id, record).await?;

                    if first_error.is_none() {
                        first_error = Some((node_id, message));
                        // Signal every running sibling to abort
                        cancel.cancel();
                    }
                }
            }
        }

        let duration_ms = (Utc::now() - started_at).num_milliseconds();

        if let Some((node_id, error)) = first_error {
            for blocked in tracker.blocked_nodes() {
                if let Some(run) = node_runs.get_mut(&blocked) {
                    run.skip();
                }
            }

            let record = ProgressRecord::execution_failed(execution_id, error.clone());
            self.store
                .update_execution(
                    execution_id,
                    ExecutionPatch::terminal(ExecutionStatus::Failed, Utc::now())
                        .with_error(error.clone())
                        .with_duration_ms(duration_ms)
                        .with_logs(vec![record.clone()]),
                )
                .await?;
            self.sink
                .execution_update(workflow_id, execution_id, &record)
                .await;
            return Err(EngineError::NodeFailed { node_id, error });
        }

        if cancel.is_cancelled() {
            let record = ProgressRecord::execution_cancelled(execution_id);
            // No-op if an external cancel already wrote the terminal state
            self.store
                .update_execution(
                    execution_id,
                    ExecutionPatch::terminal(ExecutionStatus::Cancelled, Utc::now())
                        .with_duration_ms(duration_ms)
                        .with_logs(vec![record.clone()]),
                )
                .await?;
            self.sink
                .execution_update(workflow_id, execution_id, &record)
                .await;
            return Err(EngineError::Cancelled);
        }

        let output = json!({
            "status": "completed",
            "results": ctx.results_map(),
            "execution_time_ms": duration_ms,
        });

        let record = ProgressRecord::execution_completed(execution_id, output.clone());
        self.store
            .update_execution(
                execution_id,
                ExecutionPatch::terminal(ExecutionStatus::Completed, Utc::now())
                    .with_output(output.clone())
                    .with_duration_ms(duration_ms)
                    .with_logs(vec![record.clone()]),
            )
            .await?;
        self.sink
            .execution_update(workflow_id, execution_id, &record)
            .await;

        tracing::info!(%execution_id, duration_ms, "execution completed");
        Ok(output)
    }

    async fn push_progress(
        &self,
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        record: ProgressRecord,
    ) -> Result<(), EngineError> {
        self.store
            .update_execution(execution_id, ExecutionPatch::logs(vec![record.clone()]))
            .await?;
        self.sink
            .execution_update(workflow_id, execution_id, &record)
            .await;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_agent_log(
        &self,
        execution_id: ExecutionId,
        node: &Node,
        step_index: u32,
        status: &str,
        input_data: Option<JsonValue>,
        output_data: Option<JsonValue>,
        error_message: Option<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) {
        let agent_kind = node
            .data
            .agent_kind
            .clone()
            .unwrap_or_else(|| node.kind.as_str().to_string());
        let agent_display_name = node
            .data
            .label
            .clone()
            .unwrap_or_else(|| agent_kind.clone());

        let record = AgentLogRecord {
            id: AgentLogId::new(),
            execution_id,
            agent_kind,
            agent_display_name,
            step_index,
            status: status.to_string(),
            input_data,
            output_data,
            error_message,
            execution_time_ms: (completed_at - started_at).num_milliseconds(),
            started_at,
            completed_at,
        };

        // Agent logs are observability data; losing one must not fail the run
        if let Err(error) = self.store.append_agent_log(&record).await {
            tracing::warn!(%execution_id, %error, "failed to append agent log");
        }
    }
}

fn passthrough_outcome(node: &Node, started_at: DateTime<Utc>) -> AgentOutcome {
    AgentOutcome::new(
        json!({
            "triggered": true,
            "node_id": node.id.to_string(),
            "kind": node.kind.as_str(),
        }),
        started_at,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentInput;
    use crate::definition::WorkflowData;
    use crate::edge::Edge;
    use crate::error::AgentFailure;
    use crate::execution::{ExecutionRecord, ProgressKind, TriggerKind};
    use crate::store::{ExecutionFilter, StoreError};
    use crate::definition::WorkflowRecord;
    use async_trait::async_trait;

    /// In-memory store honouring terminal-write idempotence.
    #[derive(Default)]
    struct TestStore {
        executions: Mutex<HashMap<ExecutionId, ExecutionRecord>>,
        agent_logs: Mutex<Vec<AgentLogRecord>>,
    }

    impl TestStore {
        fn execution(&self, id: ExecutionId) -> ExecutionRecord {
            self.executions
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .expect("execution exists")
        }

        fn logs(&self) -> Vec<AgentLogRecord> {
            self.agent_logs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MetadataStore for TestStore {
        async fn create_execution(
            &self,
            record: &ExecutionRecord,
        ) -> Result<ExecutionId, StoreError> {
            self.executions
                .lock()
                .unwrap()
                .insert(record.id, record.clone());
            Ok(record.id)
        }

        async fn update_execution(
            &self,
            id: ExecutionId,
            patch: ExecutionPatch,
        ) -> Result<(), StoreError> {
            let mut executions = self.executions.lock().unwrap();
            let record = executions.get_mut(&id).ok_or(StoreError::NotFound {
                entity: "execution",
                id: id.to_string(),
            })?;

            // Terminal records are immutable
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
            _user_id: UserId,
        ) -> Result<ExecutionRecord, StoreError> {
            self.executions
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(StoreError::NotFound {
                    entity: "execution",
                    id: id.to_string(),
                })
        }

        async fn list_executions(
            &self,
            _filter: &ExecutionFilter,
        ) -> Result<Vec<ExecutionRecord>, StoreError> {
            Ok(self.executions.lock().unwrap().values().cloned().collect())
        }

        async fn get_workflow(
            &self,
            id: WorkflowId,
            _user_id: UserId,
        ) -> Result<WorkflowRecord, StoreError> {
            Err(StoreError::NotFound {
                entity: "workflow",
                id: id.to_string(),
            })
        }

        async fn append_agent_log(&self, record: &AgentLogRecord) -> Result<(), StoreError> {
            self.agent_logs.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    /// Sink that records every event in order.
    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<ProgressRecord>>,
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn execution_update(
            &self,
            _workflow_id: WorkflowId,
            _execution_id: ExecutionId,
            record: &ProgressRecord,
        ) {
            self.events.lock().unwrap().push(record.clone());
        }
    }

    /// Invoker scripted through node config:
    /// `{"behavior": "emit", "output": .., "variables": {..}}`
    /// `{"behavior": "fail", "message": ".."}`
    /// `{"behavior": "sleep", "ms": N}` (cancellation-aware)
    /// `{"behavior": "arith", "op": "add"|"mul", "from": key, "amount": N, "as": var}`
    /// `{"behavior": "sum", "keys": [..]}`
    struct ScriptedInvoker;

    #[async_trait]
    impl AgentInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            kind: &str,
            config: &JsonValue,
            input: AgentInput,
            cancel: &CancellationToken,
        ) -> Result<AgentOutcome, InvokeError> {
            let started = Utc::now();
            if kind != "scripted" {
                return Err(InvokeError::UnknownAgent {
                    kind: kind.to_string(),
                });
            }

            match config.get("behavior").and_then(JsonValue::as_str) {
                Some("emit") => {
                    let output = config.get("output").cloned().unwrap_or(JsonValue::Null);
                    let variables = config
                        .get("variables")
                        .and_then(JsonValue::as_object)
                        .cloned()
                        .unwrap_or_default();
                    Ok(AgentOutcome::new(output, started).with_variables(variables))
                }
                Some("fail") => {
                    let message = config
                        .get("message")
                        .and_then(JsonValue::as_str)
                        .unwrap_or("scripted failure")
                        .to_string();
                    Err(AgentFailure::Internal { message }.into())
                }
                Some("sleep") => {
                    let ms = config.get("ms").and_then(JsonValue::as_u64).unwrap_or(50);
                    tokio::select! {
                        () = cancel.cancelled() => Err(AgentFailure::Cancelled.into()),
                        () = tokio::time::sleep(Duration::from_millis(ms)) => {
                            Ok(AgentOutcome::new(json!({"slept_ms": ms}), started))
                        }
                    }
                }
                Some("arith") => {
                    let from = config.get("from").and_then(JsonValue::as_str).unwrap_or("k");
                    let amount = config.get("amount").and_then(JsonValue::as_i64).unwrap_or(0);
                    let target = config.get("as").and_then(JsonValue::as_str).unwrap_or("out");
                    let value = input.get(from).and_then(JsonValue::as_i64).unwrap_or(0);
                    let result = match config.get("op").and_then(JsonValue::as_str) {
                        Some("mul") => value * amount,
                        _ => value + amount,
                    };
                    let mut variables = Map::new();
                    variables.insert(target.to_string(), json!(result));
                    Ok(AgentOutcome::new(json!(result), started).with_variables(variables))
                }
                Some("sum") => {
                    let keys = config
                        .get("keys")
                        .and_then(JsonValue::as_array)
                        .cloned()
                        .unwrap_or_default();
                    let total: i64 = keys
                        .iter()
                        .filter_map(JsonValue::as_str)
                        .filter_map(|key| input.get(key).and_then(JsonValue::as_i64))
                        .sum();
                    Ok(AgentOutcome::new(json!(total), started))
                }
                other => Err(AgentFailure::InvalidInput {
                    message: format!("unknown behavior {other:?}"),
                }
                .into()),
            }
        }
    }

    struct Harness {
        store: Arc<TestStore>,
        sink: Arc<RecordingSink>,
        engine: Arc<ExecutionEngine>,
    }

    fn harness(config: EngineConfig) -> Harness {
        let store = Arc::new(TestStore::default());
        let sink = Arc::new(RecordingSink::default());
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&store) as Arc<dyn MetadataStore>,
            Arc::clone(&sink) as Arc<dyn ProgressSink>,
            Arc::new(ScriptedInvoker),
            config,
        ));
        Harness { store, sink, engine }
    }

    fn scripted_node(id: &str, config: JsonValue) -> Node {
        Node::agent(id, "scripted").with_config(
            config
                .as_object()
                .cloned()
                .expect("config is an object"),
        )
    }

    async fn queued_execution(
        store: &TestStore,
        workflow_id: WorkflowId,
        user_id: UserId,
    ) -> ExecutionId {
        let record = ExecutionRecord::new(workflow_id, user_id, TriggerKind::Api, json!({}));
        store.create_execution(&record).await.expect("create")
    }

    #[tokio::test]
    async fn linear_execution_completes() {
        let h = harness(EngineConfig::default());
        let workflow_id = WorkflowId::new();
        let user_id = UserId::new();
        let execution_id = queued_execution(&h.store, workflow_id, user_id).await;

        let data = WorkflowData::new(
            vec![
                scripted_node("a", json!({"behavior": "emit", "output": 1, "variables": {"x": 1}})),
                scripted_node("b", json!({"behavior": "emit", "output": 2})),
            ],
            vec![Edge::new("e1", "a", "b")],
        );

        let output = h
            .engine
            .execute(execution_id, &data, json!({}), user_id, workflow_id)
            .await
            .expect("execution succeeds");
        assert_eq!(output["status"], "completed");

        let record = h.store.execution(execution_id);
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert!(record.started_at.is_some());
        assert!(record.completed_at.unwrap() >= record.started_at.unwrap());
        assert!(record.execution_time_ms.unwrap() >= 0);
        assert!(record.error_message.is_none());

        // step_index reflects completion order: a then b
        let logs = h.store.logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].step_index, 0);
        assert_eq!(logs[1].step_index, 1);
        assert_eq!(logs[0].status, "completed");

        let kinds: Vec<ProgressKind> = record.logs.iter().map(|l| l.kind).collect();
        assert_eq!(kinds[0], ProgressKind::ExecutionStarted);
        assert_eq!(*kinds.last().unwrap(), ProgressKind::ExecutionCompleted);
    }

    #[tokio::test]
    async fn diamond_merges_variables_from_both_branches() {
        let h = harness(EngineConfig::default());
        let workflow_id = WorkflowId::new();
        let user_id = UserId::new();
        let execution_id = queued_execution(&h.store, workflow_id, user_id).await;

        let mut b = scripted_node(
            "b",
            json!({"behavior": "arith", "op": "add", "from": "k", "amount": 1, "as": "kb"}),
        );
        b.data.input_mapping = Some(Map::from_iter([("k".to_string(), json!("$k"))]));
        let mut c = scripted_node(
            "c",
            json!({"behavior": "arith", "op": "mul", "from": "k", "amount": 2, "as": "kc"}),
        );
        c.data.input_mapping = Some(Map::from_iter([("k".to_string(), json!("$k"))]));
        let mut d = scripted_node("d", json!({"behavior": "sum", "keys": ["kb", "kc"]}));
        d.data.input_mapping = Some(Map::from_iter([
            ("kb".to_string(), json!("$kb")),
            ("kc".to_string(), json!("$kc")),
        ]));

        let data = WorkflowData::new(
            vec![
                scripted_node("a", json!({"behavior": "emit", "output": 5, "variables": {"k": 5}})),
                b,
                c,
                d,
            ],
            vec![
                Edge::new("e1", "a", "b"),
                Edge::new("e2", "a", "c"),
                Edge::new("e3", "b", "d"),
                Edge::new("e4", "c", "d"),
            ],
        );

        let output = h
            .engine
            .execute(execution_id, &data, json!({}), user_id, workflow_id)
            .await
            .expect("execution succeeds");

        // k=5, kb=6, kc=10, d = kb + kc
        assert_eq!(output["results"]["d"]["result"]["output"], json!(16));

        // Predecessors complete before the successor starts
        let record = h.store.execution(execution_id);
        let position = |kind: ProgressKind, node: &str| {
            record
                .logs
                .iter()
                .position(|l| {
                    l.kind == kind && l.node_id.as_ref().is_some_and(|n| n.as_str() == node)
                })
                .unwrap_or(usize::MAX)
        };
        let d_started = position(ProgressKind::NodeStarted, "d");
        assert!(position(ProgressKind::NodeCompleted, "b") < d_started);
        assert!(position(ProgressKind::NodeCompleted, "c") < d_started);
    }

    #[tokio::test]
    async fn failing_node_cancels_running_siblings() {
        let h = harness(EngineConfig::default());
        let workflow_id = WorkflowId::new();
        let user_id = UserId::new();
        let execution_id = queued_execution(&h.store, workflow_id, user_id).await;

        // Two entry points: a sleeps, b fails immediately; c is downstream of b
        let data = WorkflowData::new(
            vec![
                scripted_node("a", json!({"behavior": "sleep", "ms": 30000})),
                scripted_node("b", json!({"behavior": "fail", "message": "boom"})),
                scripted_node("c", json!({"behavior": "emit"})),
            ],
            vec![Edge::new("e1", "b", "c")],
        );

        let started = std::time::Instant::now();
        let result = h
            .engine
            .execute(execution_id, &data, json!({}), user_id, workflow_id)
            .await;
        assert!(started.elapsed() < Duration::from_secs(5), "siblings were cancelled");

        match result {
            Err(EngineError::NodeFailed { node_id, error }) => {
                assert_eq!(node_id.as_str(), "b");
                assert!(error.contains("boom"));
            }
            other => panic!("expected NodeFailed, got {other:?}"),
        }

        let record = h.store.execution(execution_id);
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.error_message.unwrap().contains("boom"));

        let logs = h.store.logs();
        let b_log = logs.iter().find(|l| l.agent_display_name == "b").unwrap();
        assert_eq!(b_log.status, "failed");
        let a_log = logs.iter().find(|l| l.agent_display_name == "a").unwrap();
        assert_eq!(a_log.status, "cancelled");
        // c never started
        assert!(!logs.iter().any(|l| l.agent_display_name == "c"));
    }

    #[tokio::test]
    async fn cancel_stops_a_running_execution() {
        let h = harness(EngineConfig::default());
        let workflow_id = WorkflowId::new();
        let user_id = UserId::new();
        let execution_id = queued_execution(&h.store, workflow_id, user_id).await;

        let data = WorkflowData::new(
            vec![scripted_node("slow", json!({"behavior": "sleep", "ms": 120000}))],
            vec![],
        );

        let engine = Arc::clone(&h.engine);
        let handle = tokio::spawn(async move {
            engine
                .execute(execution_id, &data, json!({}), user_id, workflow_id)
                .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        h.engine.cancel(execution_id).await.expect("cancel in-flight run");

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run ends promptly")
            .expect("task joins");
        assert!(matches!(result, Err(EngineError::Cancelled)));

        let record = h.store.execution(execution_id);
        assert_eq!(record.status, ExecutionStatus::Cancelled);
        assert!(record.error_message.is_none());
        assert!(record.output_data.is_none());
    }

    #[tokio::test]
    async fn cancel_unknown_execution_is_not_found() {
        let h = harness(EngineConfig::default());
        let result = h.engine.cancel(ExecutionId::new()).await;
        assert!(matches!(result, Err(EngineError::ExecutionNotFound { .. })));
    }

    #[tokio::test]
    async fn monitor_cancels_stale_executions() {
        let h = harness(EngineConfig {
            max_concurrent_executions: 100,
            execution_timeout: Duration::from_millis(200),
            monitor_interval: Duration::from_millis(50),
        });
        h.engine.start();

        let workflow_id = WorkflowId::new();
        let user_id = UserId::new();
        let execution_id = queued_execution(&h.store, workflow_id, user_id).await;

        let data = WorkflowData::new(
            vec![scripted_node("slow", json!({"behavior": "sleep", "ms": 120000}))],
            vec![],
        );

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            h.engine
                .execute(execution_id, &data, json!({}), user_id, workflow_id),
        )
        .await
        .expect("monitor fires well within the timeout");
        assert!(matches!(result, Err(EngineError::Cancelled)));

        let record = h.store.execution(execution_id);
        assert_eq!(record.status, ExecutionStatus::Cancelled);
        h.engine.stop().await;
    }

    #[tokio::test]
    async fn structural_failures_reject_before_dispatch() {
        let h = harness(EngineConfig::default());
        let workflow_id = WorkflowId::new();
        let user_id = UserId::new();

        // Empty workflow
        let execution_id = queued_execution(&h.store, workflow_id, user_id).await;
        let result = h
            .engine
            .execute(execution_id, &WorkflowData::default(), json!({}), user_id, workflow_id)
            .await;
        assert!(matches!(result, Err(EngineError::InvalidWorkflow { .. })));
        assert_eq!(h.store.execution(execution_id).status, ExecutionStatus::Failed);

        // Cycle
        let execution_id = queued_execution(&h.store, workflow_id, user_id).await;
        let cyclic = WorkflowData::new(
            vec![
                scripted_node("a", json!({"behavior": "emit"})),
                scripted_node("b", json!({"behavior": "emit"})),
            ],
            vec![Edge::new("e1", "a", "b"), Edge::new("e2", "b", "a")],
        );
        let result = h
            .engine
            .execute(execution_id, &cyclic, json!({}), user_id, workflow_id)
            .await;
        assert!(matches!(result, Err(EngineError::InvalidWorkflow { .. })));

        // No agent logs were written in either case
        assert!(h.store.logs().is_empty());
    }

    #[tokio::test]
    async fn admission_cap_serialises_executions() {
        let h = harness(EngineConfig {
            max_concurrent_executions: 1,
            ..EngineConfig::default()
        });
        let workflow_id = WorkflowId::new();
        let user_id = UserId::new();
        let first = queued_execution(&h.store, workflow_id, user_id).await;
        let second = queued_execution(&h.store, workflow_id, user_id).await;

        let data = WorkflowData::new(
            vec![scripted_node("n", json!({"behavior": "sleep", "ms": 100}))],
            vec![],
        );

        let engine_a = Arc::clone(&h.engine);
        let engine_b = Arc::clone(&h.engine);
        let data_a = data.clone();
        let data_b = data.clone();
        let a = tokio::spawn(async move {
            engine_a.execute(first, &data_a, json!({}), user_id, workflow_id).await
        });
        let b = tokio::spawn(async move {
            engine_b.execute(second, &data_b, json!({}), user_id, workflow_id).await
        });

        a.await.unwrap().expect("first run");
        b.await.unwrap().expect("second run");

        let record_a = h.store.execution(first);
        let record_b = h.store.execution(second);
        let (earlier, later) = if record_a.started_at <= record_b.started_at {
            (record_a, record_b)
        } else {
            (record_b, record_a)
        };
        assert!(
            later.started_at.unwrap() >= earlier.completed_at.unwrap(),
            "second run waited for the first's permit"
        );
    }

    #[tokio::test]
    async fn terminal_state_is_immutable() {
        let h = harness(EngineConfig::default());
        let workflow_id = WorkflowId::new();
        let user_id = UserId::new();
        let execution_id = queued_execution(&h.store, workflow_id, user_id).await;

        let data = WorkflowData::new(
            vec![scripted_node("n", json!({"behavior": "emit", "output": 1}))],
            vec![],
        );
        h.engine
            .execute(execution_id, &data, json!({}), user_id, workflow_id)
            .await
            .expect("run completes");

        // A late cancel writer no-ops against the completed record
        h.store
            .update_execution(
                execution_id,
                ExecutionPatch::terminal(ExecutionStatus::Cancelled, Utc::now()),
            )
            .await
            .expect("idempotent write");
        assert_eq!(h.store.execution(execution_id).status, ExecutionStatus::Completed);

        // And the engine no longer knows the run
        let result = h.engine.cancel(execution_id).await;
        assert!(matches!(result, Err(EngineError::ExecutionNotFound { .. })));
    }

    #[tokio::test]
    async fn passthrough_nodes_run_without_agent_kind() {
        let h = harness(EngineConfig::default());
        let workflow_id = WorkflowId::new();
        let user_id = UserId::new();
        let execution_id = queued_execution(&h.store, workflow_id, user_id).await;

        let data = WorkflowData::new(
            vec![
                Node::trigger("start"),
                scripted_node("work", json!({"behavior": "emit", "output": "done"})),
            ],
            vec![Edge::new("e1", "start", "work")],
        );

        let output = h
            .engine
            .execute(execution_id, &data, json!({}), user_id, workflow_id)
            .await
            .expect("run completes");
        assert_eq!(
            output["results"]["start"]["result"]["output"]["triggered"],
            json!(true)
        );
    }

    #[tokio::test]
    async fn sink_receives_events_in_emission_order() {
        let h = harness(EngineConfig::default());
        let workflow_id = WorkflowId::new();
        let user_id = UserId::new();
        let execution_id = queued_execution(&h.store, workflow_id, user_id).await;

        let data = WorkflowData::new(
            vec![scripted_node("only", json!({"behavior": "emit"}))],
            vec![],
        );
        h.engine
            .execute(execution_id, &data, json!({}), user_id, workflow_id)
            .await
            .expect("run completes");

        let events = h.sink.events.lock().unwrap();
        let kinds: Vec<ProgressKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ProgressKind::ExecutionStarted,
                ProgressKind::NodeStarted,
                ProgressKind::NodeCompleted,
                ProgressKind::ExecutionCompleted,
            ]
        );
    }
}
