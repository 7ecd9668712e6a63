//! Wave scheduler
//!
//! Drives a planned workflow to terminal status: walks the transport graph
//! in topological waves, evaluates pure nodes inline, submits task-runner
//! jobs for the rest, merges completion records, and finally runs the
//! post-processing pass. The scheduler is the sole writer of the dispatch
//! result; every mutation is persisted and fanned out to observers in
//! order. A failed or cancelled node in one wave prevents any node of the
//! next wave from being submitted.

use std::sync::Arc;

use chrono::Utc;
use dispatch_store::{BackendRegistry, BlobAddress, DispatchDb};
use futures::stream::{FuturesUnordered, StreamExt};
use lattice_core::{
    encode_result, Dep, DispatchResult, Hook, NodeKind, NodeMetadata, NodeResult, Status,
    TransportableObject,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::callable::POSTPROCESS_CALLABLE;
use crate::error::{render_error_chain, DispatcherError, Result};
use crate::executor::{ExecutorSelection, CLIENT_EXECUTOR};
use crate::inputs::{assemble_task_inputs, TaskInputs};
use crate::registry::DispatchRegistry;
use crate::runner::{TaskRunner, TaskSpec};
use crate::pool::TaskPool;

/// Per-process scheduler collaborators; one instance drives one dispatch
/// at a time
#[derive(Clone)]
pub struct WaveScheduler {
    store: DispatchDb,
    backends: BackendRegistry,
    observers: Arc<crate::observer::ObserverSet>,
    runner: TaskRunner,
    registry: DispatchRegistry,
    pool: TaskPool,
}

impl WaveScheduler {
    pub fn new(
        store: DispatchDb,
        backends: BackendRegistry,
        observers: Arc<crate::observer::ObserverSet>,
        runner: TaskRunner,
        registry: DispatchRegistry,
        pool: TaskPool,
    ) -> Self {
        Self { store, backends, observers, runner, registry, pool }
    }

    /// Run a planned workflow to a terminal result
    pub async fn run_planned_workflow(&self, mut result: DispatchResult) -> DispatchResult {
        info!(dispatch_id = %result.dispatch_id, "Running workflow");
        result.status = Status::Running;
        result.start_time = Some(Utc::now());
        self.persist_and_notify(&result).await;

        let layers = match result.lattice.transport_graph.topological_layers() {
            Ok(layers) => layers,
            Err(err) => return self.fail_workflow(result, render_error_chain(&err)).await,
        };

        let workflow_executor = ExecutorSelection {
            short_name: result.lattice.metadata.workflow_executor.clone(),
            data: result.lattice.metadata.workflow_executor_data.clone(),
        };

        for layer in &layers {
            if self.registry.cancel_requested(&result.dispatch_id) {
                info!(dispatch_id = %result.dispatch_id, "Cancellation observed between waves");
                return self.cancel_workflow(result).await;
            }

            let mut submitted = Vec::new();

            for &node_id in layer {
                let node_name = match result.node_name(node_id) {
                    Ok(name) => name.to_string(),
                    Err(err) => return self.fail_workflow(result, render_error_chain(&err)).await,
                };
                let kind = NodeKind::of(&node_name);

                if kind.is_pure() {
                    if let Err(err) = evaluate_pure_node(&mut result, node_id, kind) {
                        return self.fail_workflow(result, render_error_chain(&err)).await;
                    }
                    continue;
                }

                debug!(node = node_id, "Gathering inputs for task");
                let spec = match self.task_spec(&result, node_id, &node_name, &workflow_executor) {
                    Ok(spec) => spec,
                    Err(err) => return self.fail_workflow(result, render_error_chain(&err)).await,
                };

                let running = NodeResult::new(node_id)
                    .with_status(Status::Running)
                    .with_start_time(Utc::now());
                if let Err(err) = result.update_node(running) {
                    return self.fail_workflow(result, render_error_chain(&err)).await;
                }
                self.persist_and_notify(&result).await;

                debug!(node = node_id, "Submitting task to worker pool");
                let runner = self.runner.clone();
                let handle = self.pool.submit(async move { runner.run_task(spec).await });
                submitted.push((node_id, handle));
            }

            // Wave barrier: merge records as jobs finish
            let mut pending: FuturesUnordered<_> = submitted
                .into_iter()
                .map(|(node_id, handle)| async move { (node_id, handle.await) })
                .collect();
            while let Some((node_id, joined)) = pending.next().await {
                let record = match joined {
                    Ok(record) => record,
                    Err(err) => NodeResult::failed(node_id, format!("worker task aborted: {err}")),
                };
                if let Err(err) = result.update_node(record) {
                    warn!(node = node_id, error = %err, "Dropping unmergeable node record");
                }
                self.persist_and_notify(&result).await;
            }

            // Early abort: the first failed node of the wave wins
            for &node_id in layer {
                match result.node_status(node_id) {
                    Ok(Status::Failed) => {
                        let name = result
                            .node_name(node_id)
                            .map(str::to_string)
                            .unwrap_or_else(|_| node_id.to_string());
                        let node_error = result
                            .node_error(node_id)
                            .ok()
                            .flatten()
                            .unwrap_or_default()
                            .to_string();
                        let message = format!("Node {name} failed: \n{node_error}");
                        return self.fail_workflow(result, message).await;
                    }
                    Ok(Status::Cancelled) => {
                        return self.cancel_workflow(result).await;
                    }
                    _ => {}
                }
            }
        }

        self.post_process(result, &layers, workflow_executor).await
    }

    /// Build the task spec for one non-pure node
    fn task_spec(
        &self,
        result: &DispatchResult,
        node_id: usize,
        node_name: &str,
        workflow_executor: &ExecutorSelection,
    ) -> Result<TaskSpec> {
        let inputs = assemble_task_inputs(node_id, node_name, result)?;

        let graph = &result.lattice.transport_graph;
        let node = graph.node(node_id)?;

        let function = node.function.clone().ok_or_else(|| {
            DispatcherError::Task(format!("node {node_id} ('{node_name}') has no function"))
        })?;

        let (call_before, call_after) = rehydrate_hooks(&node.metadata)?;

        // Nodes that select no executor fall back to the lattice default
        let short_name = if node.metadata.executor.is_empty() {
            result.lattice.metadata.executor.clone()
        } else {
            node.metadata.executor.clone()
        };
        let data = if node.metadata.executor.is_empty() {
            result.lattice.metadata.executor_data.clone()
        } else {
            node.metadata.executor_data.clone()
        };

        Ok(TaskSpec {
            node_id: Some(node_id),
            node_name: node_name.to_string(),
            dispatch_id: result.dispatch_id.clone(),
            results_dir: result.results_dir().to_string(),
            inputs,
            function,
            selected_executor: ExecutorSelection { short_name, data },
            call_before,
            call_after,
            workflow_executor: workflow_executor.clone(),
        })
    }

    /// Run the post-processing pass and settle the terminal status
    async fn post_process(
        &self,
        mut result: DispatchResult,
        layers: &[Vec<usize>],
        workflow_executor: ExecutorSelection,
    ) -> DispatchResult {
        result.status = Status::Postprocessing;
        debug!(dispatch_id = %result.dispatch_id, "Preparing to post-process workflow");

        if workflow_executor.short_name == CLIENT_EXECUTOR {
            debug!(dispatch_id = %result.dispatch_id, "Workflow to be post-processed on the client");
            result.status = Status::PendingPostprocessing;
            result.end_time = Some(Utc::now());
            self.persist_and_notify(&result).await;
            return result;
        }

        let spec = match self.post_process_spec(&result, layers, &workflow_executor) {
            Ok(spec) => spec,
            Err(err) => {
                error!(error = %err, "Failed to prepare post-processing");
                return self
                    .postprocess_failed(result, "Post-processing failed".to_string())
                    .await;
            }
        };

        let runner = self.runner.clone();
        let handle = self.pool.submit(async move { runner.run_task(spec).await });
        let record = match handle.await {
            Ok(record) => record,
            Err(err) => {
                error!(error = %err, "Post-processing job aborted");
                return self
                    .postprocess_failed(result, "Post-processing failed".to_string())
                    .await;
            }
        };

        if record.status != Some(Status::Completed) {
            let detail = record
                .stderr
                .filter(|s| !s.is_empty())
                .or(record.error)
                .unwrap_or_default();
            return self
                .postprocess_failed(result, format!("Post-processing failed: {detail}"))
                .await;
        }

        debug!(dispatch_id = %result.dispatch_id, "Post-processing completed");
        result.result = record.output;
        result.status = Status::Completed;
        result.end_time = Some(Utc::now());
        self.persist_and_notify(&result).await;
        result
    }

    fn post_process_spec(
        &self,
        result: &DispatchResult,
        layers: &[Vec<usize>],
        workflow_executor: &ExecutorSelection,
    ) -> Result<TaskSpec> {
        let lattice_value = serde_json::to_value(&result.lattice)?;

        let mut outputs: Vec<(String, Value)> = Vec::new();
        for (name, output) in result.all_node_outputs() {
            outputs.push((name, output.materialize_value()?));
        }

        let args = vec![
            TransportableObject::wrap(&lattice_value)?,
            TransportableObject::wrap(&outputs)?,
            TransportableObject::wrap(&layers)?,
        ];

        Ok(TaskSpec {
            node_id: None,
            node_name: "post_process".to_string(),
            dispatch_id: result.dispatch_id.clone(),
            results_dir: result.results_dir().to_string(),
            inputs: TaskInputs { args, kwargs: Default::default() },
            function: TransportableObject::wrap_callable(&lattice_core::CallableRef::new(
                POSTPROCESS_CALLABLE,
            ))?,
            selected_executor: workflow_executor.clone(),
            call_before: vec![],
            call_after: vec![],
            workflow_executor: workflow_executor.clone(),
        })
    }

    async fn fail_workflow(&self, mut result: DispatchResult, error: String) -> DispatchResult {
        warn!(dispatch_id = %result.dispatch_id, "Workflow failed");
        result.status = Status::Failed;
        result.error = Some(error);
        result.end_time = Some(Utc::now());
        self.persist_and_notify(&result).await;
        result
    }

    async fn cancel_workflow(&self, mut result: DispatchResult) -> DispatchResult {
        result.status = Status::Cancelled;
        result.end_time = Some(Utc::now());
        self.persist_and_notify(&result).await;
        result
    }

    async fn postprocess_failed(
        &self,
        mut result: DispatchResult,
        error: String,
    ) -> DispatchResult {
        warn!(dispatch_id = %result.dispatch_id, error = %error, "Post-processing failed");
        result.status = Status::PostprocessingFailed;
        result.error = Some(error);
        result.end_time = Some(Utc::now());
        self.persist_and_notify(&result).await;
        result
    }

    /// Persist the result and fan it out, in that order; failures on either
    /// path are logged and never rethrown into the scheduling control path
    pub async fn persist_and_notify(&self, result: &DispatchResult) {
        self.persist(result).await;
        self.observers.send_update(result).await;
    }

    async fn persist(&self, result: &DispatchResult) {
        let row_doc = match serde_json::to_string(result) {
            Ok(doc) => doc,
            Err(err) => {
                error!(dispatch_id = %result.dispatch_id, error = %err, "Cannot serialize result");
                return;
            }
        };
        let archive_doc = match encode_result(result) {
            Ok(doc) => doc,
            Err(err) => {
                error!(dispatch_id = %result.dispatch_id, error = %err, "Cannot encode result document");
                return;
            }
        };

        let mut session = match self.store.begin_session(self.backends.clone()).await {
            Ok(session) => session,
            Err(err) => {
                warn!(dispatch_id = %result.dispatch_id, error = %err, "Cannot open store session");
                return;
            }
        };

        if let Err(err) = session.upsert(&result.dispatch_id, &row_doc).await {
            warn!(dispatch_id = %result.dispatch_id, error = %err, "Persistence write failed");
            if let Err(err) = session.rollback().await {
                warn!(dispatch_id = %result.dispatch_id, error = %err, "Session rollback failed");
            }
            return;
        }
        session.queue_upload(
            archive_doc.into_bytes(),
            BlobAddress::local(&result.dispatch_id, "result.json"),
        );
        if let Err(err) = session.commit().await {
            warn!(dispatch_id = %result.dispatch_id, error = %err, "Session commit failed");
        }
    }
}

/// Evaluate a parameter/subscript/attribute/generator node inline
fn evaluate_pure_node(
    result: &mut DispatchResult,
    node_id: usize,
    kind: NodeKind,
) -> Result<TransportableObject> {
    let output = {
        let graph = &result.lattice.transport_graph;
        match kind {
            NodeKind::Parameter => graph.node(node_id)?.value.clone().ok_or_else(|| {
                DispatcherError::Task(format!("parameter node {node_id} has no value"))
            })?,
            _ => {
                let parents = graph.dependencies(node_id);
                if parents.len() != 1 {
                    return Err(lattice_core::LatticeError::SingleParentExpected {
                        node: node_id,
                        found: parents.len(),
                    }
                    .into());
                }
                let parent_output = result.node_output(parents[0])?.materialize_value()?;

                let projected = if kind == NodeKind::Attribute {
                    let attribute = graph.node(node_id)?.attribute_name.clone().ok_or_else(|| {
                        DispatcherError::Task(format!("attribute node {node_id} has no attribute_name"))
                    })?;
                    parent_output.get(&attribute).cloned().ok_or_else(|| {
                        lattice_core::LatticeError::Projection {
                            node: node_id,
                            reason: format!("no attribute '{attribute}'"),
                        }
                    })?
                } else {
                    // subscript and generator projections index by key
                    let key = graph.node(node_id)?.key.clone().ok_or_else(|| {
                        DispatcherError::Task(format!("subscript node {node_id} has no key"))
                    })?;
                    project_by_key(node_id, &parent_output, &key)?
                };
                TransportableObject::wrap(&projected)?
            }
        }
    };

    let now = Utc::now();
    result.update_node(
        NodeResult::new(node_id)
            .with_status(Status::Completed)
            .with_start_time(now)
            .with_end_time(now)
            .with_output(output.clone()),
    )?;
    Ok(output)
}

fn project_by_key(node_id: usize, value: &Value, key: &Value) -> Result<Value> {
    let projected = match (value, key) {
        (Value::Array(items), Value::Number(index)) => index
            .as_u64()
            .and_then(|i| items.get(i as usize))
            .cloned(),
        (Value::Object(map), Value::String(name)) => map.get(name).cloned(),
        _ => None,
    };
    projected.ok_or_else(|| {
        lattice_core::LatticeError::Projection {
            node: node_id,
            reason: format!("key {key} does not apply"),
        }
        .into()
    })
}

/// Rehydrate the node's dependency bundles into hook lists
///
/// The `bash` and `pip` bundles always run before the task, followed by
/// the serialized call-before records; call-after records run after.
fn rehydrate_hooks(metadata: &NodeMetadata) -> Result<(Vec<Hook>, Vec<Hook>)> {
    let mut call_before = Vec::new();
    if let Some(record) = metadata.deps.get("bash") {
        call_before.push(Dep::from_value(record)?.apply()?);
    }
    if let Some(record) = metadata.deps.get("pip") {
        call_before.push(Dep::from_value(record)?.apply()?);
    }
    for record in &metadata.call_before {
        call_before.push(Dep::from_value(record)?.apply()?);
    }

    let mut call_after = Vec::new();
    for record in &metadata.call_after {
        call_after.push(Dep::from_value(record)?.apply()?);
    }
    Ok((call_before, call_after))
}
