//! Process-wide registry of named native task functions
//!
//! Serialized callables cross the wire as name references; executors
//! resolve them here. A registered function receives its materialized
//! args/kwargs plus a [`TaskContext`] carrying the dispatch coordinates
//! and stdout/stderr capture buffers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use futures::future::BoxFuture;
use lattice_core::{CallableRef, PACKAGE_INSTALL_CALLABLE, SHELL_CALLABLE};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{DispatcherError, Result};

/// Name of the builtin that collects electron-list/dict inputs
pub const COLLECTION_CALLABLE: &str = ":collection:";

/// Name of the builtin that dispatches a sublattice
pub const DISPATCH_CALLABLE: &str = ":dispatch:";

/// Name of the builtin that drives workflow post-processing
pub const POSTPROCESS_CALLABLE: &str = ":postprocess:";

/// Execution context handed to every native task function
pub struct TaskContext {
    pub dispatch_id: String,
    pub node_id: Option<usize>,
    pub results_dir: String,
    /// Working directory applied to shell hooks
    pub workdir: Option<PathBuf>,
    /// Ordered task outputs, populated only during post-processing
    pub electron_outputs: Vec<Value>,
    stdout: Mutex<String>,
    stderr: Mutex<String>,
}

impl TaskContext {
    pub fn new(
        dispatch_id: impl Into<String>,
        node_id: Option<usize>,
        results_dir: impl Into<String>,
    ) -> Self {
        Self {
            dispatch_id: dispatch_id.into(),
            node_id,
            results_dir: results_dir.into(),
            workdir: None,
            electron_outputs: Vec::new(),
            stdout: Mutex::new(String::new()),
            stderr: Mutex::new(String::new()),
        }
    }

    pub fn with_workdir(mut self, workdir: Option<PathBuf>) -> Self {
        self.workdir = workdir;
        self
    }

    pub fn with_electron_outputs(mut self, outputs: Vec<Value>) -> Self {
        self.electron_outputs = outputs;
        self
    }

    pub fn write_stdout(&self, text: &str) {
        self.stdout.lock().push_str(text);
    }

    pub fn write_stderr(&self, text: &str) {
        self.stderr.lock().push_str(text);
    }

    /// Current contents of the capture buffers
    pub fn captured(&self) -> (String, String) {
        (self.stdout.lock().clone(), self.stderr.lock().clone())
    }
}

/// Materialized inputs of one invocation
#[derive(Debug, Clone, Default)]
pub struct TaskArgs {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

/// A registered native task function
pub type NativeFn =
    Arc<dyn Fn(TaskArgs, Arc<TaskContext>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Name -> native function mapping shared across the process
#[derive(Clone, Default)]
pub struct CallableRegistry {
    inner: Arc<RwLock<HashMap<String, NativeFn>>>,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the shell, package-install, and
    /// collection builtins
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        register_builtins(&registry);
        registry
    }

    pub fn register(&self, name: impl Into<String>, function: NativeFn) {
        self.inner.write().insert(name.into(), function);
    }

    pub fn resolve(&self, name: &str) -> Option<NativeFn> {
        self.inner.read().get(name).cloned()
    }

    pub fn resolve_ref(&self, callable: &CallableRef) -> Result<NativeFn> {
        self.resolve(&callable.name)
            .ok_or_else(|| DispatcherError::UnknownCallable(callable.name.clone()))
    }
}

impl std::fmt::Debug for CallableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallableRegistry")
            .field("names", &self.inner.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

fn register_builtins(registry: &CallableRegistry) {
    registry.register(
        SHELL_CALLABLE,
        Arc::new(|task: TaskArgs, ctx: Arc<TaskContext>| {
            Box::pin(async move {
                let commands: Vec<String> =
                    serde_json::from_value(task.args.first().cloned().unwrap_or(Value::Null))
                        .context("shell hook expects a list of commands")?;
                for command in commands {
                    let mut invocation = tokio::process::Command::new("sh");
                    invocation.arg("-c").arg(&command);
                    if let Some(workdir) = &ctx.workdir {
                        invocation.current_dir(workdir);
                    }
                    let output = invocation
                        .output()
                        .await
                        .with_context(|| format!("failed to run '{command}'"))?;
                    ctx.write_stdout(&String::from_utf8_lossy(&output.stdout));
                    ctx.write_stderr(&String::from_utf8_lossy(&output.stderr));
                    if !output.status.success() {
                        anyhow::bail!("command '{command}' exited with {}", output.status);
                    }
                }
                Ok(Value::Null)
            })
        }),
    );

    // Package management belongs to the executor environment; the builtin
    // records the request so the node's capture buffers show it.
    registry.register(
        PACKAGE_INSTALL_CALLABLE,
        Arc::new(|task: TaskArgs, ctx: Arc<TaskContext>| {
            Box::pin(async move {
                let packages: Vec<String> =
                    serde_json::from_value(task.args.first().cloned().unwrap_or(Value::Null))
                        .context("package hook expects a list of packages")?;
                let requirements: Option<String> =
                    serde_json::from_value(task.args.get(1).cloned().unwrap_or(Value::Null))
                        .unwrap_or(None);
                debug!(packages = ?packages, "Recording package-install request");
                ctx.write_stdout(&format!("requested packages: {}\n", packages.join(", ")));
                if let Some(requirements) = requirements {
                    ctx.write_stdout(&format!("requested requirements:\n{requirements}"));
                }
                Ok(Value::Null)
            })
        }),
    );

    // Collection nodes pass their gathered parents straight through.
    registry.register(
        COLLECTION_CALLABLE,
        Arc::new(|task: TaskArgs, _ctx: Arc<TaskContext>| {
            Box::pin(async move {
                task.kwargs
                    .get("x")
                    .cloned()
                    .context("collection node expects kwarg 'x'")
            })
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Arc<TaskContext> {
        Arc::new(TaskContext::new("d-1", Some(0), "/tmp/results"))
    }

    #[tokio::test]
    async fn test_shell_builtin_captures_output() {
        let registry = CallableRegistry::with_builtins();
        let shell = registry.resolve(SHELL_CALLABLE).unwrap();
        let ctx = ctx();

        let args = TaskArgs {
            args: vec![json!(["echo hello", "echo oops >&2"])],
            kwargs: Map::new(),
        };
        shell(args, ctx.clone()).await.unwrap();

        let (stdout, stderr) = ctx.captured();
        assert_eq!(stdout, "hello\n");
        assert_eq!(stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_shell_builtin_fails_on_nonzero_exit() {
        let registry = CallableRegistry::with_builtins();
        let shell = registry.resolve(SHELL_CALLABLE).unwrap();

        let args = TaskArgs { args: vec![json!(["exit 3"])], kwargs: Map::new() };
        let err = shell(args, ctx()).await.unwrap_err();
        assert!(err.to_string().contains("exit"));
    }

    #[tokio::test]
    async fn test_package_builtin_records_request() {
        let registry = CallableRegistry::with_builtins();
        let install = registry.resolve(PACKAGE_INSTALL_CALLABLE).unwrap();
        let ctx = ctx();

        let args = TaskArgs {
            args: vec![json!(["numpy==1.23.0"]), Value::Null],
            kwargs: Map::new(),
        };
        install(args, ctx.clone()).await.unwrap();
        let (stdout, _) = ctx.captured();
        assert!(stdout.contains("numpy==1.23.0"));
    }

    #[tokio::test]
    async fn test_collection_builtin_passes_through() {
        let registry = CallableRegistry::with_builtins();
        let collect = registry.resolve(COLLECTION_CALLABLE).unwrap();

        let mut kwargs = Map::new();
        kwargs.insert("x".into(), json!([1, 2, 3]));
        let out = collect(TaskArgs { args: vec![], kwargs }, ctx()).await.unwrap();
        assert_eq!(out, json!([1, 2, 3]));
    }

    #[test]
    fn test_unknown_callable_is_an_error() {
        let registry = CallableRegistry::new();
        let err = registry
            .resolve_ref(&CallableRef::new("missing"))
            .err()
            .unwrap();
        assert!(matches!(err, DispatcherError::UnknownCallable(_)));
    }
}
