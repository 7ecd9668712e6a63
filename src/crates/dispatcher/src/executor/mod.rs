//! Executor abstraction and registry
//!
//! Executors vary by isolation strategy but share one contract: take a
//! serialized function with serialized inputs and hooks, materialize them
//! inside the chosen isolation context, run call-before hooks, the
//! function, then call-after hooks, capture stdout/stderr, and hand back
//! the wrapped output. The registry resolves an executor short-name plus a
//! configuration dictionary to a ready instance.

pub mod local;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use lattice_core::{Hook, TransportableObject};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::callable::CallableRegistry;
use crate::error::{DispatcherError, Result};

pub use local::LocalExecutor;

/// Sentinel short-name meaning "do not run here"
pub const CLIENT_EXECUTOR: &str = "client";

/// Short-name of the in-process executor
pub const LOCAL_EXECUTOR: &str = "local";

/// An executor short-name plus its configuration dictionary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSelection {
    pub short_name: String,
    #[serde(default)]
    pub data: Value,
}

impl ExecutorSelection {
    pub fn new(short_name: impl Into<String>) -> Self {
        Self { short_name: short_name.into(), data: Value::Null }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn is_client(&self) -> bool {
        self.short_name == CLIENT_EXECUTOR
    }
}

/// One task, fully serialized, as handed to an executor
#[derive(Debug, Clone)]
pub struct TaskPayload {
    pub function: TransportableObject,
    pub args: Vec<TransportableObject>,
    pub kwargs: BTreeMap<String, TransportableObject>,
    pub call_before: Vec<Hook>,
    pub call_after: Vec<Hook>,
    pub dispatch_id: String,
    pub results_dir: String,
    pub node_id: Option<usize>,
}

/// Output of a successful execution
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub output: TransportableObject,
    pub stdout: String,
    pub stderr: String,
}

/// The single-method executor contract
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, payload: TaskPayload) -> Result<ExecutionOutcome>;
}

/// Factory turning a configuration dictionary into an executor instance
pub type ExecutorFactory = Arc<dyn Fn(&Value) -> Result<Arc<dyn Executor>> + Send + Sync>;

/// Short-name -> factory mapping shared across the process
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    inner: Arc<RwLock<HashMap<String, ExecutorFactory>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the `local` executor
    pub fn with_defaults(callables: &CallableRegistry) -> Self {
        let registry = Self::new();
        let callables = callables.clone();
        registry.register(
            LOCAL_EXECUTOR,
            Arc::new(move |data: &Value| {
                Ok(Arc::new(LocalExecutor::from_config(callables.clone(), data)?) as Arc<dyn Executor>)
            }),
        );
        registry
    }

    pub fn register(&self, short_name: impl Into<String>, factory: ExecutorFactory) {
        self.inner.write().insert(short_name.into(), factory);
    }

    /// Resolve a selection to a configured executor instance
    ///
    /// The `client` sentinel is never instantiated; selecting it here is an
    /// error the caller turns into its pending-client semantics.
    pub fn resolve(&self, selection: &ExecutorSelection) -> Result<Arc<dyn Executor>> {
        if selection.is_client() {
            return Err(DispatcherError::ClientExecutor(selection.short_name.clone()));
        }
        let factory = self
            .inner
            .read()
            .get(&selection.short_name)
            .cloned()
            .ok_or_else(|| DispatcherError::UnknownExecutor(selection.short_name.clone()))?;
        factory(&selection.data)
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("short_names", &self.inner.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
