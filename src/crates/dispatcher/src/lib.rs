//! Lattice workflow dispatcher
//!
//! Drives serialized workflow lattices to completion: plans the transport
//! graph into topological waves, assembles task inputs from upstream
//! outputs, invokes pluggable executors on a bounded worker pool, recurses
//! into sublattices, persists every state change to the dispatch store,
//! fans updates out to observers, and finishes with the post-processing
//! pass that produces the workflow result.
//!
//! The command surface is [`Dispatcher`]: `run_workflow`, `submit`, and
//! `cancel_workflow`, plus the shared [`TaskPool`] handle used by
//! recursive sublattice dispatch.

pub mod callable;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod inputs;
pub mod observer;
pub mod pool;
pub mod registry;
pub mod runner;
pub mod scheduler;

pub use callable::{
    CallableRegistry, NativeFn, TaskArgs, TaskContext, COLLECTION_CALLABLE, DISPATCH_CALLABLE,
    POSTPROCESS_CALLABLE,
};
pub use config::DispatcherConfig;
pub use dispatch::Dispatcher;
pub use error::{render_anyhow_chain, render_error_chain, DispatcherError, Result};
pub use executor::{
    ExecutionOutcome, Executor, ExecutorRegistry, ExecutorSelection, LocalExecutor, TaskPayload,
    CLIENT_EXECUTOR, LOCAL_EXECUTOR,
};
pub use inputs::{assemble_task_inputs, TaskInputs};
pub use observer::{ChannelObserver, Observer, ObserverSet, WebhookObserver};
pub use pool::TaskPool;
pub use registry::DispatchRegistry;
pub use runner::{TaskRunner, TaskSpec, AUX_NODE_ID};
pub use scheduler::WaveScheduler;
