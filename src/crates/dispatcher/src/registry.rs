//! In-flight dispatch registry
//!
//! Maps `dispatch_id` to a handle on the running dispatch: a watch channel
//! that publishes the terminal result, plus the cooperative cancellation
//! flag. The lifecycle is insert-on-submit, lookup-and-await (sublattice
//! nodes), remove-on-terminal. An explicit collaborator handed to the
//! dispatcher, not ambient process state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use lattice_core::DispatchResult;
use tokio::sync::watch;
use tracing::debug;

struct DispatchHandle {
    terminal: watch::Sender<Option<Arc<DispatchResult>>>,
    cancel: AtomicBool,
}

/// Registry of in-flight dispatches
#[derive(Clone, Default)]
pub struct DispatchRegistry {
    inner: Arc<DashMap<String, DispatchHandle>>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dispatch at submission time
    pub fn insert(&self, dispatch_id: &str) {
        let (terminal, _) = watch::channel(None);
        self.inner.insert(
            dispatch_id.to_string(),
            DispatchHandle { terminal, cancel: AtomicBool::new(false) },
        );
        debug!(dispatch_id, "Registered in-flight dispatch");
    }

    pub fn contains(&self, dispatch_id: &str) -> bool {
        self.inner.contains_key(dispatch_id)
    }

    /// Publish the terminal result to every waiter
    pub fn complete(&self, dispatch_id: &str, result: Arc<DispatchResult>) {
        if let Some(handle) = self.inner.get(dispatch_id) {
            let _ = handle.terminal.send(Some(result));
        }
    }

    /// Drop the handle once the dispatch is terminal
    pub fn remove(&self, dispatch_id: &str) {
        self.inner.remove(dispatch_id);
    }

    /// Await the terminal result of a registered dispatch
    ///
    /// Returns `None` when the dispatch is unknown or its handle went away
    /// without publishing a result.
    pub async fn wait_for_terminal(&self, dispatch_id: &str) -> Option<Arc<DispatchResult>> {
        let mut receiver = {
            let handle = self.inner.get(dispatch_id)?;
            handle.terminal.subscribe()
        };
        loop {
            let current = receiver.borrow().clone();
            if current.is_some() {
                return current;
            }
            if receiver.changed().await.is_err() {
                // sender dropped; surface whatever was last published
                return receiver.borrow().clone();
            }
        }
    }

    /// Request cooperative cancellation; observed between waves
    pub fn request_cancel(&self, dispatch_id: &str) -> bool {
        match self.inner.get(dispatch_id) {
            Some(handle) => {
                handle.cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn cancel_requested(&self, dispatch_id: &str) -> bool {
        self.inner
            .get(dispatch_id)
            .map(|handle| handle.cancel.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for DispatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRegistry")
            .field("in_flight", &self.inner.len())
            .finish()
    }
}
