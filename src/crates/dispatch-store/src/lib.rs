//! Durable dispatch store
//!
//! Maps `dispatch_id -> serialized result document` in a file-backed SQLite
//! table with upsert semantics, wraps write windows in a transactional
//! [`StoreSession`] with blob upload/delete side-queues, and routes blob
//! addresses through a [`BackendRegistry`] (default backend: local
//! filesystem rooted at a configured base directory).
//!
//! The store treats result documents as opaque strings; the data model
//! lives upstream.

pub mod db;
pub mod error;
pub mod session;
pub mod storage;

pub use db::{DatabasePool, DispatchDb};
pub use error::{Result, StoreError};
pub use session::{PendingUpload, StoreSession};
pub use storage::{
    BackendRegistry, BlobAddress, LocalStorageBackend, StorageBackend, LOCAL_STORAGE_TYPE,
};
