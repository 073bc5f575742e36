//! Document store contract used for all race, wager and account persistence.
//!
//! Paths are slash separated, alternating collection and document ids, e.g.
//! `races/{race_id}/lapData/lap_3`. A collection path has an odd number of segments.

use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Number of attempts for operations failing with a transient error
pub const MAX_ATTEMPTS: u32 = 5;
/// (ms) Delay before the first retry, doubled for every further one
pub const BACKOFF_BASE_MS: u64 = 25;

pub type Document = Value;

/// Errors reported by a store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Concurrent write conflict, the operation may be retried.
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Backend temporarily unreachable, the operation may be retried.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// is_transient returns true for errors after which a retry can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Unavailable(_))
    }
}

/// A single write inside a batch or transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Overwrite the document, or shallow-merge its top level fields if `merge` is set.
    Set {
        path: String,
        data: Document,
        merge: bool,
    },
    /// Add `delta` to a numeric field, creating document and field if missing.
    Increment {
        path: String,
        field: String,
        delta: f64,
    },
}

impl WriteOp {
    pub fn set(path: impl Into<String>, data: Document) -> WriteOp {
        WriteOp::Set {
            path: path.into(),
            data,
            merge: false,
        }
    }

    pub fn merge(path: impl Into<String>, data: Document) -> WriteOp {
        WriteOp::Set {
            path: path.into(),
            data,
            merge: true,
        }
    }

    pub fn increment(path: impl Into<String>, field: impl Into<String>, delta: f64) -> WriteOp {
        WriteOp::Increment {
            path: path.into(),
            field: field.into(),
            delta,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            WriteOp::Set { path, .. } | WriteOp::Increment { path, .. } => path,
        }
    }
}

/// A stored document together with its id (last path segment) and full path.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub path: String,
    pub data: Document,
}

/// Transaction is handed to the closure of `DocumentStore::transaction`. Reads see the
/// committed state at the time the transaction runs, writes are buffered and committed
/// together once the closure returns `Ok`.
pub struct Transaction<'a> {
    reader: &'a (dyn Fn(&str) -> Option<Document> + Send + Sync),
    writes: Vec<WriteOp>,
}

impl<'a> Transaction<'a> {
    pub fn new(reader: &'a (dyn Fn(&str) -> Option<Document> + Send + Sync)) -> Transaction<'a> {
        Transaction {
            reader,
            writes: Vec::new(),
        }
    }

    pub fn get(&self, path: &str) -> Option<Document> {
        (self.reader)(path)
    }

    pub fn set(&mut self, path: impl Into<String>, data: Document, merge: bool) {
        self.writes.push(WriteOp::Set {
            path: path.into(),
            data,
            merge,
        });
    }

    pub fn increment(&mut self, path: impl Into<String>, field: impl Into<String>, delta: f64) {
        self.writes.push(WriteOp::increment(path, field, delta));
    }

    pub fn into_writes(self) -> Vec<WriteOp> {
        self.writes
    }
}

/// Persistence collaborator of the engine.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read_collection(&self, path: &str) -> Result<Vec<StoredDocument>, StoreError>;

    async fn read_document(&self, path: &str) -> Result<Option<Document>, StoreError>;

    async fn write_document(&self, path: &str, data: Document, merge: bool) -> Result<(), StoreError>;

    /// Stores `data` under a freshly generated id in the collection and returns the id.
    async fn append_document(&self, collection: &str, data: Document) -> Result<String, StoreError>;

    /// Commits all operations or none of them.
    async fn atomic_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    /// Runs `f` against a consistent view and commits its writes atomically. Fails with
    /// `StoreError::Conflict` if the commit loses against a concurrent writer.
    async fn transaction(
        &self,
        f: &mut (dyn for<'a, 't> FnMut(&'a mut Transaction<'t>) -> Result<(), StoreError> + Send),
    ) -> Result<(), StoreError>;

    async fn increment_field(&self, path: &str, field: &str, delta: f64) -> Result<(), StoreError>;

    /// Pushes `(path, document)` for every committed write below `path_prefix`.
    fn subscribe(&self, path_prefix: &str) -> flume::Receiver<(String, Document)>;
}

/// doc_id returns the last segment of a document path.
pub fn doc_id(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// backoff_delay returns the delay before retry number `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS << attempt.min(10))
}

/// with_retry runs `op` until it succeeds, fails permanently or `MAX_ATTEMPTS` is reached,
/// sleeping with exponential backoff between attempts.
pub async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                let delay = backoff_delay(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    what, attempt, MAX_ATTEMPTS, err, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// transaction_with_retry runs `store.transaction(f)` with the retry policy of `with_retry`.
/// `f` may run more than once and must reset any state it reports to the caller.
pub async fn transaction_with_retry(
    store: &dyn DocumentStore,
    what: &str,
    f: &mut (dyn for<'a, 't> FnMut(&'a mut Transaction<'t>) -> Result<(), StoreError> + Send),
) -> Result<(), StoreError> {
    let mut attempt = 1;
    loop {
        match store.transaction(&mut *f).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                let delay = backoff_delay(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    what, attempt, MAX_ATTEMPTS, err, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
