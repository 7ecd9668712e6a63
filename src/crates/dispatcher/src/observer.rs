//! Observer fan-out
//!
//! Every result mutation the scheduler makes is pushed to the registered
//! observers, in mutation order. Delivery is best-effort: a failing
//! observer is logged and skipped, never blocking the scheduler.

use std::sync::Arc;

use async_trait::async_trait;
use lattice_core::{encode_result, DispatchResult};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{DispatcherError, Result};

/// One observer of dispatch state changes
#[async_trait]
pub trait Observer: Send + Sync {
    async fn send_update(&self, result: &DispatchResult) -> Result<()>;
}

/// Ordered, best-effort fan-out to all registered observers
#[derive(Default)]
pub struct ObserverSet {
    observers: RwLock<Vec<Arc<dyn Observer>>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, observer: Arc<dyn Observer>) {
        self.observers.write().push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Deliver one update to every observer, sequentially, suppressing
    /// failures
    pub async fn send_update(&self, result: &DispatchResult) {
        let observers: Vec<Arc<dyn Observer>> = self.observers.read().clone();
        for observer in observers {
            if let Err(err) = observer.send_update(result).await {
                warn!(dispatch_id = %result.dispatch_id, error = %err, "Observer delivery failed");
            }
        }
    }
}

impl std::fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSet").field("count", &self.len()).finish()
    }
}

/// Channel-backed observer for in-process listeners and tests
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<DispatchResult>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchResult>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Observer for ChannelObserver {
    async fn send_update(&self, result: &DispatchResult) -> Result<()> {
        self.sender
            .send(result.clone())
            .map_err(|e| DispatcherError::Observer(e.to_string()))
    }
}

/// POSTs the encoded result document to a webhook URL
pub struct WebhookObserver {
    url: String,
    client: reqwest::Client,
}

impl WebhookObserver {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), client: reqwest::Client::new() }
    }
}

#[async_trait]
impl Observer for WebhookObserver {
    async fn send_update(&self, result: &DispatchResult) -> Result<()> {
        let document = encode_result(result)?;
        self.client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(document)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| DispatcherError::Observer(e.to_string()))?;
        Ok(())
    }
}
