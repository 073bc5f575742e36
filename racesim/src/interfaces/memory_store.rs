use crate::interfaces::store::{
    doc_id, Document, DocumentStore, StoreError, StoredDocument, Transaction, WriteOp,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use uuid::Uuid;

type Subscriber = (String, flume::Sender<(String, Document)>);

/// InMemoryStore keeps all documents in a sorted map behind one lock. Every batch and
/// transaction is applied to a staged copy first, so a failing operation leaves the store
/// untouched. `inject_failures` makes the next commits fail with a transient error.
pub struct InMemoryStore {
    docs: Mutex<BTreeMap<String, Document>>,
    subscribers: StdMutex<Vec<Subscriber>>,
    injected_failures: AtomicU32,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        InMemoryStore::new()
    }
}

impl InMemoryStore {
    pub fn new() -> InMemoryStore {
        InMemoryStore {
            docs: Mutex::new(BTreeMap::new()),
            subscribers: StdMutex::new(Vec::new()),
            injected_failures: AtomicU32::new(0),
        }
    }

    /// inject_failures lets the next `n` batches/transactions fail with a transient error.
    pub fn inject_failures(&self, n: u32) {
        self.injected_failures.store(n, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn notify(&self, changes: Vec<(String, Document)>) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for (path, data) in changes {
            subscribers.retain(|(prefix, tx)| {
                if path.starts_with(prefix.as_str()) {
                    tx.send((path.to_owned(), data.to_owned())).is_ok()
                } else {
                    true
                }
            });
        }
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let changes = {
            let mut docs = self.docs.lock().await;
            let mut staged = docs.clone();
            let mut changes = Vec::with_capacity(ops.len());
            for op in ops {
                changes.push(apply(&mut staged, op)?);
            }
            *docs = staged;
            changes
        };
        self.notify(changes);
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for InMemoryStore {
    async fn read_collection(&self, path: &str) -> Result<Vec<StoredDocument>, StoreError> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let docs = self.docs.lock().await;

        Ok(docs
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| !key[prefix.len()..].contains('/'))
            .map(|(key, data)| StoredDocument {
                id: doc_id(key).to_owned(),
                path: key.to_owned(),
                data: data.to_owned(),
            })
            .collect())
    }

    async fn read_document(&self, path: &str) -> Result<Option<Document>, StoreError> {
        check_document_path(path)?;
        Ok(self.docs.lock().await.get(path).cloned())
    }

    async fn write_document(&self, path: &str, data: Document, merge: bool) -> Result<(), StoreError> {
        self.commit(vec![WriteOp::Set {
            path: path.to_owned(),
            data,
            merge,
        }])
        .await
    }

    async fn append_document(&self, collection: &str, data: Document) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.commit(vec![WriteOp::set(format!("{}/{}", collection, id), data)])
            .await?;
        Ok(id)
    }

    async fn atomic_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable("injected failure".to_owned()));
        }
        self.commit(ops).await
    }

    async fn transaction(
        &self,
        f: &mut (dyn for<'a, 't> FnMut(&'a mut Transaction<'t>) -> Result<(), StoreError> + Send),
    ) -> Result<(), StoreError> {
        if self.take_injected_failure() {
            return Err(StoreError::Conflict("injected conflict".to_owned()));
        }

        let changes = {
            let mut docs = self.docs.lock().await;
            let writes = {
                let snapshot: &BTreeMap<String, Document> = &docs;
                let reader = move |path: &str| snapshot.get(path).cloned();
                let mut tx = Transaction::new(&reader);
                f(&mut tx)?;
                tx.into_writes()
            };

            let mut staged = docs.clone();
            let mut changes = Vec::with_capacity(writes.len());
            for op in writes {
                changes.push(apply(&mut staged, op)?);
            }
            *docs = staged;
            changes
        };
        self.notify(changes);
        Ok(())
    }

    async fn increment_field(&self, path: &str, field: &str, delta: f64) -> Result<(), StoreError> {
        self.commit(vec![WriteOp::increment(path, field, delta)])
            .await
    }

    fn subscribe(&self, path_prefix: &str) -> flume::Receiver<(String, Document)> {
        let (tx, rx) = flume::unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((path_prefix.to_owned(), tx));
        rx
    }
}

fn check_document_path(path: &str) -> Result<(), StoreError> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() % 2 != 0 || segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidDocument(format!(
            "{} is not a document path",
            path
        )));
    }
    Ok(())
}

/// apply executes one write and returns the affected path with its new content.
fn apply(
    docs: &mut BTreeMap<String, Document>,
    op: WriteOp,
) -> Result<(String, Document), StoreError> {
    check_document_path(op.path())?;

    match op {
        WriteOp::Set { path, data, merge } => {
            let fields = match data {
                Value::Object(fields) => fields,
                other => {
                    return Err(StoreError::InvalidDocument(format!(
                        "{} must be an object, got {}",
                        path, other
                    )))
                }
            };

            let doc = if merge {
                let mut existing = match docs.remove(&path) {
                    Some(Value::Object(existing)) => existing,
                    _ => Map::new(),
                };
                existing.extend(fields);
                Value::Object(existing)
            } else {
                Value::Object(fields)
            };

            docs.insert(path.to_owned(), doc.to_owned());
            Ok((path, doc))
        }
        WriteOp::Increment { path, field, delta } => {
            let doc = docs
                .entry(path.to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            let fields = doc.as_object_mut().ok_or_else(|| {
                StoreError::InvalidDocument(format!("{} is not an object", path))
            })?;

            let current = match fields.get(&field) {
                None | Some(Value::Null) => 0.0,
                Some(value) => value.as_f64().ok_or_else(|| {
                    StoreError::InvalidDocument(format!("{}.{} is not numeric", path, field))
                })?,
            };
            fields.insert(field, number(current + delta));

            Ok((path, doc.to_owned()))
        }
    }
}

/// number keeps integral values as JSON integers so that they read back with `as_i64`.
pub(crate) fn number(x: f64) -> Value {
    if x.fract() == 0.0 && x.abs() < 9.0e15 {
        Value::from(x as i64)
    } else {
        Value::from(x)
    }
}
