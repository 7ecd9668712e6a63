//! Error types for the dispatcher runtime

use lattice_core::LatticeError;
use thiserror::Error;

/// Convenience result type using [`DispatcherError`]
pub type Result<T> = std::result::Result<T, DispatcherError>;

/// Errors from executor resolution, task execution, and dispatch lifecycle
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// No executor factory registered under a short-name
    #[error("unknown executor '{0}'")]
    UnknownExecutor(String),

    /// The `client` sentinel was selected for server-side work
    #[error("executor '{0}' cannot run tasks on the dispatcher")]
    ClientExecutor(String),

    /// No native function registered under a callable name
    #[error("unknown callable '{0}'")]
    UnknownCallable(String),

    /// A native task function failed
    #[error("task failed: {0}")]
    Task(String),

    /// A sublattice dispatch could not complete
    #[error("{0}")]
    Sublattice(String),

    /// A worker task panicked or was aborted
    #[error("worker task aborted: {0}")]
    Join(String),

    /// Observer delivery failure
    #[error("observer delivery failed: {0}")]
    Observer(String),

    #[error(transparent)]
    Lattice(#[from] LatticeError),

    #[error("store error: {0}")]
    Store(#[from] dispatch_store::StoreError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Render an error with its full cause chain, one cause per line
pub fn render_error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str("\nCaused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Render an `anyhow` error with its full cause chain
pub fn render_anyhow_chain(err: &anyhow::Error) -> String {
    let mut rendered = String::new();
    for (i, cause) in err.chain().enumerate() {
        if i > 0 {
            rendered.push_str("\nCaused by: ");
        }
        rendered.push_str(&cause.to_string());
    }
    rendered
}
