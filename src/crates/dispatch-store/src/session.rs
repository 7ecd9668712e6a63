//! Transactional store session
//!
//! A session scopes a write window: row writes go through a transaction,
//! while blob uploads and deletes queue on the side. Closing the session
//! commits the transaction, then drains uploads in queued order, then
//! deletes in queued order. Rolling back (or dropping without commit)
//! discards the transaction and both queues with no storage mutation.

use chrono::Utc;
use sqlx::{Sqlite, Transaction};
use tracing::debug;

use crate::error::Result;
use crate::storage::{BackendRegistry, BlobAddress};

/// One queued blob upload
pub struct PendingUpload {
    pub data: Vec<u8>,
    pub address: BlobAddress,
}

/// Scoped transactional window over the dispatch store
pub struct StoreSession {
    tx: Transaction<'static, Sqlite>,
    backends: BackendRegistry,
    pending_uploads: Vec<PendingUpload>,
    pending_deletes: Vec<BlobAddress>,
}

impl StoreSession {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>, backends: BackendRegistry) -> Self {
        Self {
            tx,
            backends,
            pending_uploads: Vec::new(),
            pending_deletes: Vec::new(),
        }
    }

    /// Upsert a dispatch row inside the transaction
    pub async fn upsert(&mut self, dispatch_id: &str, result_doc: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO dispatches (dispatch_id, result_doc, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(dispatch_id)
             DO UPDATE SET result_doc = excluded.result_doc,
                           updated_at = excluded.updated_at",
        )
        .bind(dispatch_id)
        .bind(result_doc)
        .bind(Utc::now().timestamp())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Queue a blob upload to run after a successful commit
    pub fn queue_upload(&mut self, data: Vec<u8>, address: BlobAddress) {
        self.pending_uploads.push(PendingUpload { data, address });
    }

    /// Queue a blob delete to run after a successful commit
    pub fn queue_delete(&mut self, address: BlobAddress) {
        self.pending_deletes.push(address);
    }

    /// Commit the transaction, then drain uploads, then deletes
    ///
    /// A queue-drain failure surfaces as an error, but the transaction is
    /// already committed at that point.
    pub async fn commit(self) -> Result<()> {
        let Self { tx, backends, pending_uploads, pending_deletes } = self;

        tx.commit().await?;

        for upload in pending_uploads {
            debug!(
                storage_type = %upload.address.storage_type,
                file = %upload.address.file_name,
                "Draining queued upload"
            );
            backends.upload(&upload.address, &upload.data).await?;
        }
        for address in pending_deletes {
            debug!(
                storage_type = %address.storage_type,
                file = %address.file_name,
                "Draining queued delete"
            );
            backends.delete(&address).await?;
        }
        Ok(())
    }

    /// Roll the transaction back, discarding both side-queues
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DispatchDb;

    #[tokio::test]
    async fn test_commit_applies_row_and_drains_queues() {
        let dir = tempfile::tempdir().unwrap();
        let db = DispatchDb::in_memory().await.unwrap();
        let backends = BackendRegistry::with_local(dir.path());

        let mut session = db.begin_session(backends.clone()).await.unwrap();
        session.upsert("d-1", "{\"status\":\"COMPLETED\"}").await.unwrap();
        session.queue_upload(b"artifact".to_vec(), BlobAddress::local("d-1", "result.json"));
        session.commit().await.unwrap();

        assert!(db.load("d-1").await.unwrap().is_some());
        let blob = backends
            .download(&BlobAddress::local("d-1", "result.json"))
            .await
            .unwrap();
        assert_eq!(blob, b"artifact");
    }

    #[tokio::test]
    async fn test_rollback_discards_row_and_queues() {
        let dir = tempfile::tempdir().unwrap();
        let db = DispatchDb::in_memory().await.unwrap();
        let backends = BackendRegistry::with_local(dir.path());

        let mut session = db.begin_session(backends.clone()).await.unwrap();
        session.upsert("d-1", "{}").await.unwrap();
        session.queue_upload(b"artifact".to_vec(), BlobAddress::local("d-1", "result.json"));
        session.rollback().await.unwrap();

        assert_eq!(db.load("d-1").await.unwrap(), None);
        assert!(backends
            .download(&BlobAddress::local("d-1", "result.json"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_deletes_drain_after_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let db = DispatchDb::in_memory().await.unwrap();
        let backends = BackendRegistry::with_local(dir.path());
        let address = BlobAddress::local("d-1", "old.json");

        backends.upload(&address, b"old").await.unwrap();

        let mut session = db.begin_session(backends.clone()).await.unwrap();
        session.queue_upload(b"new".to_vec(), BlobAddress::local("d-1", "new.json"));
        session.queue_delete(address.clone());
        session.commit().await.unwrap();

        assert!(backends.download(&address).await.is_err());
        assert_eq!(
            backends
                .download(&BlobAddress::local("d-1", "new.json"))
                .await
                .unwrap(),
            b"new"
        );
    }
}
