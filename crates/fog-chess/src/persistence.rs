//! Persistence Port and the background snapshot writer.
//!
//! The Session Engine never awaits a storage round-trip on the move path: it
//! queues the snapshot with [`SnapshotWriter::queue`] and returns. A single
//! writer task drains the queue in order and retries each write with bounded
//! backoff. Failures are logged and never reach match participants.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::RetryConfig;
use crate::error::PersistenceError;
use crate::retry::with_backoff;
use crate::types::{MatchSession, SessionId, UserId};

/// Document storage for session snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert or replace the snapshot for `session_id`.
    async fn upsert_snapshot(
        &self,
        session_id: SessionId,
        snapshot: &MatchSession,
    ) -> Result<(), PersistenceError>;

    async fn load_snapshot(
        &self,
        session_id: SessionId,
    ) -> Result<Option<MatchSession>, PersistenceError>;

    /// Sessions `user` took part in, newest first, at most `limit`.
    async fn list_by_user(
        &self,
        user: UserId,
        limit: usize,
    ) -> Result<Vec<MatchSession>, PersistenceError>;
}

/// In-memory snapshot store for testing and single-process deployments.
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<SessionId, MatchSession>>,
    /// Upserts to reject before accepting again.
    failures: AtomicU32,
    writes: AtomicU32,
}

impl MemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` upserts fail with a backend error.
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Number of successful upserts so far.
    #[must_use]
    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn upsert_snapshot(
        &self,
        session_id: SessionId,
        snapshot: &MatchSession,
    ) -> Result<(), PersistenceError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(PersistenceError::Backend {
                reason: "injected failure".to_string(),
                source: None,
            });
        }
        self.snapshots.lock().insert(session_id, snapshot.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_snapshot(
        &self,
        session_id: SessionId,
    ) -> Result<Option<MatchSession>, PersistenceError> {
        Ok(self.snapshots.lock().get(&session_id).cloned())
    }

    async fn list_by_user(
        &self,
        user: UserId,
        limit: usize,
    ) -> Result<Vec<MatchSession>, PersistenceError> {
        let mut sessions: Vec<MatchSession> = self
            .snapshots
            .lock()
            .values()
            .filter(|s| s.players.contains(user))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions.truncate(limit);
        Ok(sessions)
    }
}

enum WriteRequest {
    Snapshot(Box<MatchSession>),
    Flush(oneshot::Sender<()>),
}

/// Handle to the background snapshot writer.
///
/// Cloning is cheap; all clones feed the same writer task. The task exits
/// once every handle has been dropped and the queue is drained.
#[derive(Clone)]
pub struct SnapshotWriter {
    tx: mpsc::UnboundedSender<WriteRequest>,
}

impl SnapshotWriter {
    /// Start the writer task on the current runtime.
    pub fn spawn(store: Arc<dyn SnapshotStore>, retry: RetryConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_writer(store, retry, rx));
        (Self { tx }, handle)
    }

    /// Queue a snapshot for durable write. Returns once it is queued.
    pub fn queue(&self, snapshot: MatchSession) {
        let session_id = snapshot.id;
        if self
            .tx
            .send(WriteRequest::Snapshot(Box::new(snapshot)))
            .is_err()
        {
            error!(session_id = %session_id, "snapshot writer stopped, snapshot dropped");
        }
    }

    /// Wait until every snapshot queued before this call has been written
    /// or given up on.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriteRequest::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run_writer(
    store: Arc<dyn SnapshotStore>,
    retry: RetryConfig,
    mut rx: mpsc::UnboundedReceiver<WriteRequest>,
) {
    while let Some(request) = rx.recv().await {
        match request {
            WriteRequest::Snapshot(snapshot) => {
                let session_id = snapshot.id;
                let result = with_backoff(&retry, "upsert_snapshot", || {
                    store.upsert_snapshot(session_id, &snapshot)
                })
                .await;
                if result.is_ok() {
                    debug!(session_id = %session_id, status = %snapshot.status, "snapshot written");
                }
            }
            WriteRequest::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("snapshot writer stopped");
}
