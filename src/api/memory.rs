//! In-process store with the same snapshot semantics as the hosted one.
//! Backs `--local` mode and the feed/session tests.

use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use crate::api::query::{Query, Snapshot};
use crate::api::store::{RealtimeStore, SnapshotStream, StoreError};
use crate::api::tree;
use crate::reconciler::{Clock, SystemClock, Timestamp};

const PUSH_CHARS: &[u8] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

struct Subscriber {
    query: Query,
    tx: mpsc::UnboundedSender<Result<Snapshot, StoreError>>,
}

#[derive(Default)]
struct Inner {
    root: Value,
    subscribers: Vec<Subscriber>,
    pushes: u64,
    reject_writes: bool,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    /// Current value at `path`, `None` when absent.
    pub fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        Ok(tree::get(&self.lock()?.root, path).cloned())
    }

    /// Makes every later write fail as the hosted store does on a rule denial.
    pub fn reject_writes(&self, reject: bool) -> Result<(), StoreError> {
        self.lock()?.reject_writes = reject;
        Ok(())
    }

    /// Ends every open subscription with a server-side cancellation.
    pub fn cancel_all(&self, reason: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        for sub in inner.subscribers.drain(..) {
            let _ = sub.tx.send(Err(StoreError::Cancelled(reason.to_string())));
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn mutate<F>(&self, path: &str, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Value, Timestamp),
    {
        let now = self.clock.now_millis();
        let mut inner = self.lock()?;
        if inner.reject_writes {
            return Err(StoreError::Rejected {
                status: 401,
                message: "Permission denied".to_string(),
            });
        }
        apply(&mut inner.root, now);
        notify(&mut inner, path);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn related(a: &str, b: &str) -> bool {
    let a = tree::segments(a);
    let b = tree::segments(b);
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

fn notify(inner: &mut Inner, changed: &str) {
    let Inner {
        root, subscribers, ..
    } = inner;
    subscribers.retain(|sub| {
        if !related(&sub.query.path, changed) {
            return true;
        }
        let snapshot = sub.query.select(tree::get(root, &sub.query.path));
        sub.tx.send(Ok(snapshot)).is_ok()
    });
}

/// Chronologically sortable key: eight characters of time, twelve of sequence.
fn push_id(now: Timestamp, seq: u64) -> String {
    let mut out = vec![0u8; 20];
    let mut t = now.max(0) as u64;
    for slot in out[..8].iter_mut().rev() {
        *slot = PUSH_CHARS[(t % 64) as usize];
        t /= 64;
    }
    let mut s = seq;
    for slot in out[8..].iter_mut().rev() {
        *slot = PUSH_CHARS[(s % 64) as usize];
        s /= 64;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[async_trait]
impl RealtimeStore for MemoryStore {
    async fn write(&self, path: &str, record: &Value) -> Result<(), StoreError> {
        let mut record = record.clone();
        self.mutate(path, |root, now| {
            tree::resolve_server_values(&mut record, now);
            tree::set(root, path, record);
        })?;
        debug!("[memory] wrote {path}");
        Ok(())
    }

    async fn update(&self, path: &str, partial: &Value) -> Result<(), StoreError> {
        let mut partial = partial.clone();
        if !partial.is_object() {
            return Err(StoreError::InvalidPatch {
                path: path.to_string(),
            });
        }
        self.mutate(path, |root, now| {
            tree::resolve_server_values(&mut partial, now);
            if let Some(map) = partial.as_object() {
                tree::merge(root, path, map);
            }
        })?;
        debug!("[memory] updated {path}");
        Ok(())
    }

    async fn append(&self, path: &str, record: &Value) -> Result<String, StoreError> {
        let key = {
            let mut inner = self.lock()?;
            inner.pushes += 1;
            push_id(self.clock.now_millis(), inner.pushes)
        };
        self.write(&tree::join(path, &key), record).await?;
        Ok(key)
    }

    async fn subscribe(&self, query: &Query) -> Result<SnapshotStream, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock()?;
        let initial = query.select(tree::get(&inner.root, &query.path));
        let _ = tx.send(Ok(initial));
        inner.subscribers.push(Subscriber {
            query: query.clone(),
            tx,
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::store::server_timestamp;
    use crate::reconciler::tests::ManualClock;
    use serde_json::json;

    fn store_at(millis: Timestamp) -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(millis));
        (MemoryStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn append_generates_ordered_keys_and_resolves_timestamps() {
        let (store, clock) = store_at(1_000);
        let first = store
            .append("messages", &json!({"text": "a", "timestamp": server_timestamp()}))
            .await
            .unwrap();
        clock.set(2_000);
        let second = store
            .append("messages", &json!({"text": "b", "timestamp": server_timestamp()}))
            .await
            .unwrap();

        assert!(first < second);
        assert_eq!(first.len(), 20);
        let stored = store.get(&format!("messages/{first}")).unwrap().unwrap();
        assert_eq!(stored["timestamp"], json!(1_000));
    }

    #[tokio::test]
    async fn subscribers_get_full_result_sets() {
        let (store, _) = store_at(0);
        store.write("users/ada", &json!({"online": true})).await.unwrap();
        let query = Query::new("users").order_by_child("online").equal_to(true);
        let mut rx = store.subscribe(&query).await.unwrap();

        let initial = rx.recv().await.unwrap().unwrap();
        assert_eq!(initial.keys(), ["ada"]);

        store.write("users/bob", &json!({"online": true})).await.unwrap();
        let next = rx.recv().await.unwrap().unwrap();
        assert_eq!(next.keys(), ["ada", "bob"]);

        store.write("messages/m1", &json!({"text": "unrelated"})).await.unwrap();
        store.update("users/ada", &json!({"online": false})).await.unwrap();
        let after = rx.recv().await.unwrap().unwrap();
        assert_eq!(after.keys(), ["bob"]);
    }

    #[tokio::test]
    async fn rejected_writes_leave_tree_untouched() {
        let (store, _) = store_at(0);
        store.reject_writes(true).unwrap();
        let err = store.write("users/ada", &json!({"online": true})).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status: 401, .. }));
        assert_eq!(store.get("users/ada").unwrap(), None);
    }

    #[test]
    fn push_ids_sort_by_time_then_sequence() {
        assert!(push_id(5, 9) < push_id(6, 0));
        assert!(push_id(5, 1) < push_id(5, 2));
    }
}
