//! Dispatcher entry points
//!
//! Owns the collaborators (store, registries, pool, observers) and exposes
//! the command surface: `run_workflow` drives one serialized lattice to a
//! terminal result, `submit` spawns it for callers that only hold the
//! dispatch id (sublattice recursion), and `cancel_workflow` requests a
//! cooperative, wave-granular cancel.

use std::sync::Arc;

use anyhow::Context;
use dispatch_store::{BackendRegistry, DispatchDb};
use lattice_core::{
    DispatchResult, Lattice, Status, TransportableObject, PREFIX_SEPARATOR, SUBLATTICE_PREFIX,
};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::callable::{
    CallableRegistry, TaskArgs, TaskContext, DISPATCH_CALLABLE, POSTPROCESS_CALLABLE,
};
use crate::config::DispatcherConfig;
use crate::error::Result;
use crate::executor::ExecutorRegistry;
use crate::observer::{Observer, ObserverSet};
use crate::pool::TaskPool;
use crate::registry::DispatchRegistry;
use crate::runner::TaskRunner;
use crate::scheduler::WaveScheduler;

/// One dispatcher process: shared pool, registries, store, observers
pub struct Dispatcher {
    config: DispatcherConfig,
    store: DispatchDb,
    backends: BackendRegistry,
    callables: CallableRegistry,
    executors: ExecutorRegistry,
    registry: DispatchRegistry,
    pool: TaskPool,
    observers: Arc<ObserverSet>,
}

impl Dispatcher {
    /// Build a dispatcher from configuration
    pub async fn build(config: DispatcherConfig) -> Result<Arc<Self>> {
        let store = match &config.db_path {
            Some(path) => DispatchDb::new(path).await?,
            None => DispatchDb::in_memory().await?,
        };
        let backends = BackendRegistry::with_local(&config.blob_base_dir);
        let callables = CallableRegistry::with_builtins();
        let executors = ExecutorRegistry::with_defaults(&callables);

        let dispatcher = Arc::new(Self {
            pool: TaskPool::new(config.max_workers),
            registry: DispatchRegistry::new(),
            observers: Arc::new(ObserverSet::new()),
            config,
            store,
            backends,
            callables,
            executors,
        });
        dispatcher.install_dispatch_callable();
        dispatcher.install_postprocess_callable();
        Ok(dispatcher)
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn store(&self) -> &DispatchDb {
        &self.store
    }

    pub fn callables(&self) -> &CallableRegistry {
        &self.callables
    }

    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }

    pub fn registry(&self) -> &DispatchRegistry {
        &self.registry
    }

    /// Handle to the shared task-runner pool
    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    pub fn add_observer(&self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    /// Plan and run a serialized lattice to a terminal result
    pub async fn run_workflow(
        self: &Arc<Self>,
        dispatch_id: &str,
        json_lattice: &str,
    ) -> Result<DispatchResult> {
        if !self.registry.contains(dispatch_id) {
            self.registry.insert(dispatch_id);
        }

        let outcome = self.run_workflow_inner(dispatch_id, json_lattice).await;

        if let Ok(result) = &outcome {
            self.registry.complete(dispatch_id, Arc::new(result.clone()));
        }
        self.registry.remove(dispatch_id);
        outcome
    }

    async fn run_workflow_inner(
        &self,
        dispatch_id: &str,
        json_lattice: &str,
    ) -> Result<DispatchResult> {
        let lattice = Lattice::deserialize_from_json(json_lattice)?;
        info!(dispatch_id, workflow = %lattice.name, "Dispatching workflow");

        let mut result = DispatchResult::new(lattice, dispatch_id);
        result.initialize_nodes();

        // Redispatching a completed workflow is a no-op
        if let Ok(Some(document)) = self.store.load(dispatch_id).await {
            if let Ok(previous) = serde_json::from_str::<DispatchResult>(&document) {
                if previous.status == Status::Completed {
                    info!(dispatch_id, "Dispatch already completed, returning stored result");
                    return Ok(previous);
                }
            }
        }

        match serde_json::to_string(&result) {
            Ok(document) => {
                if let Err(err) = self.store.upsert(dispatch_id, &document).await {
                    warn!(dispatch_id, error = %err, "Initial persistence failed");
                }
            }
            Err(err) => warn!(dispatch_id, error = %err, "Cannot serialize fresh result"),
        }

        self.plan_workflow(&mut result);
        Ok(self.scheduler().run_planned_workflow(result).await)
    }

    /// Spawn a dispatch and return its join handle
    ///
    /// The registry entry is inserted before spawning, so the returned
    /// dispatch id can immediately be awaited through the registry.
    pub fn submit(
        self: &Arc<Self>,
        dispatch_id: String,
        json_lattice: String,
    ) -> JoinHandle<Result<DispatchResult>> {
        self.registry.insert(&dispatch_id);
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let outcome = dispatcher.run_workflow(&dispatch_id, &json_lattice).await;
            if let Err(err) = &outcome {
                warn!(dispatch_id = %dispatch_id, error = %err, "Dispatch failed before planning");
            }
            outcome
        })
    }

    /// Best-effort cancel: observed between waves, never interrupts
    /// in-flight executor calls
    pub fn cancel_workflow(&self, dispatch_id: &str) -> bool {
        info!(dispatch_id, "Cancellation requested");
        self.registry.request_cancel(dispatch_id)
    }

    /// Planner seam honoring the `schedule` metadata hint
    ///
    /// Executor reassignment would happen here; ordering beyond the
    /// topological constraints is never changed.
    fn plan_workflow(&self, result: &mut DispatchResult) {
        if result.lattice.metadata.schedule {
            debug!(dispatch_id = %result.dispatch_id, "Schedule hint set; planner is a no-op");
        }
    }

    fn scheduler(&self) -> WaveScheduler {
        let runner = TaskRunner::new(
            self.executors.clone(),
            self.registry.clone(),
            self.pool.clone(),
            self.store.clone(),
        );
        WaveScheduler::new(
            self.store.clone(),
            self.backends.clone(),
            self.observers.clone(),
            runner,
            self.registry.clone(),
            self.pool.clone(),
        )
    }

    /// Register the builtin that dispatches a sublattice document and
    /// returns the new dispatch id
    fn install_dispatch_callable(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.callables.register(
            DISPATCH_CALLABLE,
            Arc::new(move |task: TaskArgs, _ctx: Arc<TaskContext>| {
                let weak = weak.clone();
                Box::pin(async move {
                    let dispatcher = weak.upgrade().context("dispatcher has shut down")?;

                    let document = task
                        .args
                        .first()
                        .cloned()
                        .context("dispatch expects a lattice document")?;
                    let mut lattice: Lattice = serde_json::from_value(document)
                        .context("malformed sublattice document")?;

                    // Bind the call-site inputs over the embedded defaults
                    if task.args.len() > 1 {
                        let mut bound = Vec::with_capacity(task.args.len() - 1);
                        for arg in &task.args[1..] {
                            bound.push(TransportableObject::wrap(arg)?);
                        }
                        lattice.args = bound;
                    }
                    for (name, value) in &task.kwargs {
                        lattice
                            .kwargs
                            .insert(name.clone(), TransportableObject::wrap(value)?);
                    }

                    let dispatch_id = Uuid::new_v4().to_string();
                    let json = lattice.serialize_to_json()?;
                    debug!(sub_dispatch_id = %dispatch_id, "Dispatching sublattice");
                    let _handle = dispatcher.submit(dispatch_id.clone(), json);
                    Ok(Value::String(dispatch_id))
                })
            }),
        );
    }

    /// Register the builtin that evaluates the workflow function over the
    /// collected node outputs
    fn install_postprocess_callable(&self) {
        let callables = self.callables.clone();
        self.callables.register(
            POSTPROCESS_CALLABLE,
            Arc::new(move |task: TaskArgs, ctx: Arc<TaskContext>| {
                let callables = callables.clone();
                Box::pin(async move {
                    let lattice: Lattice = serde_json::from_value(
                        task.args.first().cloned().context("post-process expects a lattice")?,
                    )
                    .context("malformed lattice in post-processing")?;
                    let outputs: Vec<(String, Value)> = serde_json::from_value(
                        task.args.get(1).cloned().context("post-process expects node outputs")?,
                    )
                    .context("malformed node outputs in post-processing")?;

                    // Ordered task outputs: unmarked nodes plus sublattices;
                    // pure helper nodes are skipped
                    let electron_outputs: Vec<Value> = outputs
                        .into_iter()
                        .filter(|(name, _)| {
                            !name.starts_with(PREFIX_SEPARATOR)
                                || name.starts_with(SUBLATTICE_PREFIX)
                        })
                        .map(|(_, value)| value)
                        .collect();

                    let workflow = lattice.workflow_callable()?;
                    let function = callables.resolve_ref(&workflow)?;

                    let mut args = Vec::with_capacity(lattice.args.len());
                    for arg in &lattice.args {
                        args.push(arg.materialize_value()?);
                    }
                    let mut kwargs = Map::new();
                    for (name, value) in &lattice.kwargs {
                        kwargs.insert(name.clone(), value.materialize_value()?);
                    }

                    let inner_ctx = Arc::new(
                        TaskContext::new(ctx.dispatch_id.clone(), None, ctx.results_dir.clone())
                            .with_electron_outputs(electron_outputs),
                    );
                    let value = function(TaskArgs { args, kwargs }, inner_ctx.clone()).await?;

                    let (stdout, stderr) = inner_ctx.captured();
                    ctx.write_stdout(&stdout);
                    ctx.write_stderr(&stderr);
                    Ok(value)
                })
            }),
        );
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_registers_builtins() {
        let dispatcher = Dispatcher::build(DispatcherConfig::default()).await.unwrap();
        assert!(dispatcher.callables().resolve(DISPATCH_CALLABLE).is_some());
        assert!(dispatcher.callables().resolve(POSTPROCESS_CALLABLE).is_some());
        assert!(dispatcher
            .callables()
            .resolve(lattice_core::SHELL_CALLABLE)
            .is_some());
    }

    #[tokio::test]
    async fn test_cancel_unknown_dispatch_is_false() {
        let dispatcher = Dispatcher::build(DispatcherConfig::default()).await.unwrap();
        assert!(!dispatcher.cancel_workflow("missing"));
    }
}
