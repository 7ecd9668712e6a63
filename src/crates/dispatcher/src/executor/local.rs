//! In-process executor
//!
//! Materializes the task on the current worker, resolves the callable
//! against the process registry, and applies hooks around the invocation.
//! Isolation is the pool's concurrency bound; anything stronger belongs to
//! a different executor plugin.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use lattice_core::Hook;
use serde_json::{Map, Value};
use tracing::debug;

use crate::callable::{CallableRegistry, TaskArgs, TaskContext};
use crate::error::{render_anyhow_chain, DispatcherError, Result};
use crate::executor::{ExecutionOutcome, Executor, TaskPayload};

/// Configuration accepted by the local executor
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LocalExecutorConfig {
    workdir: Option<PathBuf>,
}

/// Runs tasks on the shared worker pool of the dispatcher process
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    callables: CallableRegistry,
    workdir: Option<PathBuf>,
}

impl LocalExecutor {
    pub fn new(callables: CallableRegistry) -> Self {
        Self { callables, workdir: None }
    }

    /// Apply a configuration dictionary (`{"workdir": ...}`)
    pub fn from_config(callables: CallableRegistry, data: &Value) -> Result<Self> {
        let config: LocalExecutorConfig = match data {
            Value::Null => LocalExecutorConfig::default(),
            other => serde_json::from_value(other.clone())?,
        };
        Ok(Self { callables, workdir: config.workdir })
    }

    async fn apply_hook(&self, ctx: &Arc<TaskContext>, hook: &Hook) -> Result<()> {
        let callable = hook.apply_fn.materialize_callable()?;
        let function = self.callables.resolve_ref(&callable)?;
        let args: Vec<Value> = hook.apply_args.materialize()?;
        let kwargs: Map<String, Value> = hook.apply_kwargs.materialize()?;

        debug!(hook = %callable.name, "Applying hook");
        function(TaskArgs { args, kwargs }, ctx.clone())
            .await
            .map_err(|e| DispatcherError::Task(render_anyhow_chain(&e)))?;
        Ok(())
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn execute(&self, payload: TaskPayload) -> Result<ExecutionOutcome> {
        let ctx = Arc::new(
            TaskContext::new(&payload.dispatch_id, payload.node_id, &payload.results_dir)
                .with_workdir(self.workdir.clone()),
        );

        for hook in &payload.call_before {
            self.apply_hook(&ctx, hook).await?;
        }

        let callable = payload.function.materialize_callable()?;
        let function = self.callables.resolve_ref(&callable)?;

        let mut args = Vec::with_capacity(payload.args.len());
        for arg in &payload.args {
            args.push(arg.materialize_value()?);
        }
        let mut kwargs = Map::new();
        for (name, value) in &payload.kwargs {
            kwargs.insert(name.clone(), value.materialize_value()?);
        }

        debug!(function = %callable.name, "Invoking task function");
        let output = function(TaskArgs { args, kwargs }, ctx.clone())
            .await
            .map_err(|e| DispatcherError::Task(render_anyhow_chain(&e)))?;

        for hook in &payload.call_after {
            self.apply_hook(&ctx, hook).await?;
        }

        let (stdout, stderr) = ctx.captured();
        Ok(ExecutionOutcome {
            output: lattice_core::TransportableObject::wrap(&output)?,
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::{CallableRef, Dep, TransportableObject};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn registry_with_square() -> CallableRegistry {
        let registry = CallableRegistry::with_builtins();
        registry.register(
            "square",
            Arc::new(|task: TaskArgs, _ctx| {
                Box::pin(async move {
                    let x = task.kwargs["x"].as_i64().unwrap_or(0);
                    Ok(json!(x * x))
                })
            }),
        );
        registry
    }

    fn payload(kwargs: BTreeMap<String, TransportableObject>) -> TaskPayload {
        TaskPayload {
            function: TransportableObject::wrap_callable(&CallableRef::new("square")).unwrap(),
            args: vec![],
            kwargs,
            call_before: vec![],
            call_after: vec![],
            dispatch_id: "d-1".into(),
            results_dir: "/tmp/results".into(),
            node_id: Some(1),
        }
    }

    #[tokio::test]
    async fn test_execute_materializes_and_wraps() {
        let executor = LocalExecutor::new(registry_with_square());
        let mut kwargs = BTreeMap::new();
        kwargs.insert("x".to_string(), TransportableObject::wrap(&3i64).unwrap());

        let outcome = executor.execute(payload(kwargs)).await.unwrap();
        let out: i64 = outcome.output.materialize().unwrap();
        assert_eq!(out, 9);
    }

    #[tokio::test]
    async fn test_hooks_run_in_order_and_capture() {
        let executor = LocalExecutor::new(registry_with_square());
        let mut kwargs = BTreeMap::new();
        kwargs.insert("x".to_string(), TransportableObject::wrap(&2i64).unwrap());

        let mut task = payload(kwargs);
        task.call_before = vec![
            Dep::bash(vec!["echo first".into()]).apply().unwrap(),
            Dep::bash(vec!["echo second".into()]).apply().unwrap(),
        ];
        task.call_after = vec![Dep::bash(vec!["echo after".into()]).apply().unwrap()];

        let outcome = executor.execute(task).await.unwrap();
        assert_eq!(outcome.stdout, "first\nsecond\nafter\n");
    }

    #[tokio::test]
    async fn test_failing_hook_propagates() {
        let executor = LocalExecutor::new(registry_with_square());
        let mut kwargs = BTreeMap::new();
        kwargs.insert("x".to_string(), TransportableObject::wrap(&2i64).unwrap());

        let mut task = payload(kwargs);
        task.call_before = vec![Dep::bash(vec!["exit 9".into()]).apply().unwrap()];

        assert!(executor.execute(task).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_function_propagates() {
        let executor = LocalExecutor::new(CallableRegistry::new());
        let outcome = executor.execute(payload(BTreeMap::new())).await;
        assert!(matches!(outcome, Err(DispatcherError::UnknownCallable(_))));
    }
}
