//! Task runner: executes one node end-to-end
//!
//! Resolves the selected executor, invokes it (or recursively dispatches a
//! sublattice), and packages the outcome as a [`NodeResult`] record. The
//! runner never mutates the dispatch result; merging records is the
//! scheduler's job. Single-attempt semantics: any failure becomes a
//! `FAILED` record with the rendered error chain and the end time set.

use chrono::Utc;
use dispatch_store::DispatchDb;
use lattice_core::{
    CallableRef, DispatchResult, Hook, NodeKind, NodeResult, Status, TransportableObject,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

use crate::callable::DISPATCH_CALLABLE;
use crate::error::{render_error_chain, DispatcherError, Result};
use crate::executor::{ExecutorRegistry, ExecutorSelection, TaskPayload};
use crate::inputs::TaskInputs;
use crate::pool::TaskPool;
use crate::registry::DispatchRegistry;

/// Node id recorded on auxiliary jobs (post-processing, sublattice
/// dispatch) that have no node of their own in the graph
pub const AUX_NODE_ID: usize = usize::MAX;

/// Everything needed to run one node
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Graph node id; `None` for auxiliary jobs
    pub node_id: Option<usize>,
    pub node_name: String,
    pub dispatch_id: String,
    pub results_dir: String,
    pub inputs: TaskInputs,
    pub function: TransportableObject,
    pub selected_executor: ExecutorSelection,
    pub call_before: Vec<Hook>,
    pub call_after: Vec<Hook>,
    /// Executor used for post-processing and sublattice recursion
    pub workflow_executor: ExecutorSelection,
}

/// Runs task-runner jobs against the executor registry and worker pool
#[derive(Clone)]
pub struct TaskRunner {
    executors: ExecutorRegistry,
    registry: DispatchRegistry,
    pool: TaskPool,
    store: DispatchDb,
}

impl TaskRunner {
    pub fn new(
        executors: ExecutorRegistry,
        registry: DispatchRegistry,
        pool: TaskPool,
        store: DispatchDb,
    ) -> Self {
        Self { executors, registry, pool, store }
    }

    /// Run one node; always returns a record, never panics the wave
    ///
    /// Boxed because this recurses through [`Self::run_sublattice`], which
    /// submits another `run_task` call to the pool; without boxing, the
    /// compiler cannot resolve the resulting self-referential future type.
    pub fn run_task<'a>(
        &'a self,
        spec: TaskSpec,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = NodeResult> + Send + 'a>> {
        Box::pin(async move {
            let node_id = spec.node_id.unwrap_or(AUX_NODE_ID);
            debug!(
                node = %spec.node_name,
                executor = %spec.selected_executor.short_name,
                dispatch_id = %spec.dispatch_id,
                "Running task"
            );

            let outcome = if NodeKind::of(&spec.node_name) == NodeKind::Sublattice {
                self.run_sublattice(&spec).await
            } else {
                self.run_on_executor(&spec).await
            };

            match outcome {
                Ok(record) => record,
                Err(err) => {
                    error!(node = %spec.node_name, error = %err, "Task execution failed");
                    NodeResult::failed(node_id, render_error_chain(&err))
                }
            }
        })
    }

    async fn run_on_executor(&self, spec: &TaskSpec) -> Result<NodeResult> {
        let node_id = spec.node_id.unwrap_or(AUX_NODE_ID);
        let executor = self.executors.resolve(&spec.selected_executor)?;

        let payload = TaskPayload {
            function: spec.function.clone(),
            args: spec.inputs.args.clone(),
            kwargs: spec.inputs.kwargs.clone(),
            call_before: spec.call_before.clone(),
            call_after: spec.call_after.clone(),
            dispatch_id: spec.dispatch_id.clone(),
            results_dir: spec.results_dir.clone(),
            node_id: spec.node_id,
        };

        let outcome = executor.execute(payload).await?;

        let mut record = NodeResult::new(node_id)
            .with_status(Status::Completed)
            .with_end_time(Utc::now())
            .with_output(outcome.output);
        record.stdout = Some(outcome.stdout);
        record.stderr = Some(outcome.stderr);
        Ok(record)
    }

    /// Dispatch a nested lattice and await its terminal result
    async fn run_sublattice(&self, spec: &TaskSpec) -> Result<NodeResult> {
        let node_id = spec.node_id.unwrap_or(AUX_NODE_ID);

        if spec.workflow_executor.is_client() {
            return Err(DispatcherError::Sublattice(
                "No executor selected for dispatching sublattices".to_string(),
            ));
        }

        // Nested job: the dispatch entry callable, with the sublattice
        // definition as its first argument followed by the original inputs.
        let mut args = Vec::with_capacity(spec.inputs.args.len() + 1);
        args.push(spec.function.clone());
        args.extend(spec.inputs.args.iter().cloned());

        let nested = TaskSpec {
            node_id: None,
            node_name: "dispatch_sublattice".to_string(),
            dispatch_id: spec.dispatch_id.clone(),
            results_dir: spec.results_dir.clone(),
            inputs: TaskInputs { args, kwargs: spec.inputs.kwargs.clone() },
            function: TransportableObject::wrap_callable(&CallableRef::new(DISPATCH_CALLABLE))?,
            selected_executor: spec.workflow_executor.clone(),
            call_before: vec![],
            call_after: vec![],
            workflow_executor: spec.workflow_executor.clone(),
        };

        let runner = self.clone();
        let handle = self.pool.submit(async move { runner.run_task(nested).await });
        let dispatched = handle
            .await
            .map_err(|e| DispatcherError::Join(e.to_string()))?;

        if dispatched.status != Some(Status::Completed) {
            return Err(DispatcherError::Sublattice(format!(
                "sublattice dispatch task failed: {}",
                dispatched.error.unwrap_or_default()
            )));
        }
        let sub_dispatch_id: String = dispatched
            .output
            .ok_or_else(|| {
                DispatcherError::Sublattice("sublattice dispatch produced no id".to_string())
            })?
            .materialize()?;

        debug!(sub_dispatch_id = %sub_dispatch_id, "Sublattice dispatched, awaiting result");

        let sub_result = self.await_sub_dispatch(&sub_dispatch_id).await?;

        let mut record = NodeResult::new(node_id).with_end_time(Utc::now());
        record.sub_dispatch_id = Some(sub_dispatch_id);
        record.sublattice_result = Some(Box::new((*sub_result).clone()));

        if sub_result.status == Status::Completed {
            record.status = Some(Status::Completed);
            record.output = Some(
                sub_result
                    .result
                    .clone()
                    .unwrap_or(TransportableObject::wrap(&Value::Null)?),
            );
        } else {
            record.status = Some(Status::Failed);
            record.error = Some("Sublattice workflow failed to complete".to_string());
        }
        Ok(record)
    }

    /// Await the nested dispatch through the registry, falling back to the
    /// store for dispatches that already terminated and deregistered
    async fn await_sub_dispatch(&self, sub_dispatch_id: &str) -> Result<Arc<DispatchResult>> {
        if let Some(result) = self.registry.wait_for_terminal(sub_dispatch_id).await {
            return Ok(result);
        }
        let doc = self
            .store
            .load(sub_dispatch_id)
            .await?
            .ok_or_else(|| DispatcherError::Sublattice("Sublattice execution failed".to_string()))?;
        let result: DispatchResult = serde_json::from_str(&doc)?;
        Ok(Arc::new(result))
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("executors", &self.executors)
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::{CallableRegistry, TaskArgs};
    use serde_json::json;
    use std::collections::BTreeMap;

    async fn runner() -> TaskRunner {
        let callables = CallableRegistry::with_builtins();
        callables.register(
            "double",
            Arc::new(|task: TaskArgs, _ctx| {
                Box::pin(async move {
                    let x = task.kwargs["x"].as_i64().unwrap_or(0);
                    Ok(json!(x * 2))
                })
            }),
        );
        callables.register(
            "explode",
            Arc::new(|_task: TaskArgs, _ctx| {
                Box::pin(async move { anyhow::bail!("division by zero") })
            }),
        );
        TaskRunner::new(
            ExecutorRegistry::with_defaults(&callables),
            DispatchRegistry::new(),
            TaskPool::new(4),
            DispatchDb::in_memory().await.unwrap(),
        )
    }

    fn spec(function: &str) -> TaskSpec {
        let mut kwargs = BTreeMap::new();
        kwargs.insert("x".to_string(), TransportableObject::wrap(&21i64).unwrap());
        TaskSpec {
            node_id: Some(1),
            node_name: function.to_string(),
            dispatch_id: "d-1".to_string(),
            results_dir: "/tmp/results".to_string(),
            inputs: TaskInputs { args: vec![], kwargs },
            function: TransportableObject::wrap_callable(&CallableRef::new(function)).unwrap(),
            selected_executor: ExecutorSelection::new("local"),
            call_before: vec![],
            call_after: vec![],
            workflow_executor: ExecutorSelection::new("local"),
        }
    }

    #[tokio::test]
    async fn test_successful_task_record() {
        let record = runner().await.run_task(spec("double")).await;
        assert_eq!(record.status, Some(Status::Completed));
        assert!(record.end_time.is_some());
        let out: i64 = record.output.unwrap().materialize().unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn test_failing_task_record_carries_chain() {
        let record = runner().await.run_task(spec("explode")).await;
        assert_eq!(record.status, Some(Status::Failed));
        assert!(record.end_time.is_some());
        assert!(record.error.unwrap().contains("division by zero"));
    }

    #[tokio::test]
    async fn test_executor_resolution_failure_fails_node() {
        let mut bad = spec("double");
        bad.selected_executor = ExecutorSelection::new("dask");
        let record = runner().await.run_task(bad).await;
        assert_eq!(record.status, Some(Status::Failed));
        assert!(record.error.unwrap().contains("unknown executor"));
    }

    #[tokio::test]
    async fn test_sublattice_under_client_executor_fails() {
        let mut bad = spec("double");
        bad.node_name = ":sublattice:inner".to_string();
        bad.workflow_executor = ExecutorSelection::new("client");
        let record = runner().await.run_task(bad).await;
        assert_eq!(record.status, Some(Status::Failed));
        assert!(record
            .error
            .unwrap()
            .contains("No executor selected for dispatching sublattices"));
    }
}
