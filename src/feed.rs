//! Live feed: a standing query pumped through a reconciler into a surface.
//!
//! Every delivery is the whole matching set, so each one is replayed as
//! per-record upserts. Records that were already shown come back as
//! `Unchanged` and never reach the surface.

use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::api::query::{Query, Snapshot};
use crate::api::store::{RealtimeStore, SnapshotStream, StoreError};
use crate::api::tree;
use crate::reconciler::{Clock, ListChange, Reconciler, Record, ReconcileError, SystemClock};
use crate::ui::Surface;

#[derive(Debug, Error)]
pub enum AdaptError {
    #[error("record {key} is malformed: {reason}")]
    Malformed { key: String, reason: String },
}

/// Turns one child of a snapshot into a record, or `None` to skip it.
pub trait RecordAdapter: Send + 'static {
    fn adapt(&self, key: &str, value: &Value) -> Result<Option<Record>, AdaptError>;

    /// Partial update to write back once the record has been shown.
    fn receipt(&self, _key: &str, _value: &Value) -> Option<Value> {
        None
    }
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Adapt(#[from] AdaptError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed source failed: {0}")]
    Source(#[from] StoreError),
    #[error("feed task ended abnormally: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Subscribed,
    Unsubscribed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedStats {
    pub snapshots: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub rejected: u64,
}

pub struct Feed<A, C = SystemClock> {
    store: Arc<dyn RealtimeStore>,
    query: Query,
    adapter: A,
    reconciler: Reconciler<C>,
}

impl<A: RecordAdapter> Feed<A> {
    pub fn new(store: Arc<dyn RealtimeStore>, query: Query, adapter: A) -> Self {
        Self {
            store,
            query,
            adapter,
            reconciler: Reconciler::new(),
        }
    }
}

impl<A: RecordAdapter, C: Clock + 'static> Feed<A, C> {
    /// Replaces the list the feed starts from, e.g. one restored from cache.
    pub fn with_reconciler<C2: Clock + 'static>(self, reconciler: Reconciler<C2>) -> Feed<A, C2> {
        Feed {
            store: self.store,
            query: self.query,
            adapter: self.adapter,
            reconciler,
        }
    }

    pub async fn subscribe<S: Surface>(self, surface: S) -> Result<Subscription, FeedError> {
        let stream = self.store.subscribe(&self.query).await?;
        info!("[feed] subscribed to {}", self.query.path);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Subscribed);
        let pump = Pump {
            store: self.store,
            path: self.query.path,
            adapter: self.adapter,
            reconciler: self.reconciler,
            surface,
            stats: FeedStats::default(),
        };
        let handle = tokio::spawn(async move {
            let result = pump.run(stream, cancel_rx).await;
            state_tx.send_replace(SubscriptionState::Unsubscribed);
            result
        });

        Ok(Subscription {
            cancel: Some(cancel_tx),
            handle: Some(handle),
            state: state_rx,
        })
    }
}

/// Handle to a running feed. Dropping it cancels the feed.
pub struct Subscription {
    cancel: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<FeedStats, FeedError>>>,
    state: watch::Receiver<SubscriptionState>,
}

impl Subscription {
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Fire-and-forget; the feed stops before its next snapshot.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }

    /// Waits for the feed to stop, either after `cancel` or because the
    /// source failed or closed.
    pub async fn join(mut self) -> Result<FeedStats, FeedError> {
        let Some(handle) = self.handle.take() else {
            return Err(FeedError::Task("already joined".to_string()));
        };
        handle.await.map_err(|e| FeedError::Task(e.to_string()))?
    }

    /// Resolves once the feed has left the subscribed state.
    pub async fn stopped(&mut self) {
        let _ = self
            .state
            .wait_for(|s| *s == SubscriptionState::Unsubscribed)
            .await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct Pump<A, C, S> {
    store: Arc<dyn RealtimeStore>,
    path: String,
    adapter: A,
    reconciler: Reconciler<C>,
    surface: S,
    stats: FeedStats,
}

impl<A: RecordAdapter, C: Clock, S: Surface> Pump<A, C, S> {
    async fn run(
        mut self,
        mut stream: SnapshotStream,
        mut cancel: oneshot::Receiver<()>,
    ) -> Result<FeedStats, FeedError> {
        loop {
            tokio::select! {
                biased;
                _ = &mut cancel => {
                    debug!("[feed] {} cancelled", self.path);
                    return Ok(self.stats);
                }
                next = stream.recv() => match next {
                    Some(Ok(snapshot)) => self.apply_snapshot(&snapshot).await,
                    Some(Err(e)) => {
                        warn!("[feed] {} failed: {e}", self.path);
                        return Err(FeedError::Source(e));
                    }
                    None => {
                        debug!("[feed] {} source closed", self.path);
                        return Ok(self.stats);
                    }
                },
            }
        }
    }

    async fn apply_snapshot(&mut self, snapshot: &Snapshot) {
        self.stats.snapshots += 1;
        for (key, value) in snapshot.iter() {
            match self.apply_record(key, value) {
                Ok(Some(change)) => {
                    if !matches!(change, ListChange::Unchanged { .. }) {
                        self.surface.apply(&change);
                    }
                    if let Some(patch) = self.adapter.receipt(key, value) {
                        let path = tree::join(&self.path, key);
                        if let Err(e) = self.store.update(&path, &patch).await {
                            warn!("[feed] receipt for {path} failed: {e}");
                        }
                    }
                }
                Ok(None) => self.stats.skipped += 1,
                Err(e) => {
                    self.stats.rejected += 1;
                    warn!("[feed] {}: {e}", self.path);
                }
            }
        }
    }

    fn apply_record(
        &mut self,
        key: &str,
        value: &Value,
    ) -> Result<Option<ListChange>, RecordError> {
        let Some(record) = self.adapter.adapt(key, value)? else {
            return Ok(None);
        };
        let change = self.reconciler.apply(record)?;
        match &change {
            ListChange::Inserted { .. } => self.stats.inserted += 1,
            ListChange::Updated { .. } => self.stats.updated += 1,
            ListChange::Unchanged { .. } => self.stats.unchanged += 1,
        }
        Ok(Some(change))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::MemoryStore;
    use crate::reconciler::tests::{ManualClock, fields};
    use crate::reconciler::{Entry, FieldValue};
    use serde_json::json;
    use tokio::sync::mpsc;

    /// Uses each child's `ts` and `text`; `skip: true` children are ignored.
    struct TextAdapter;

    impl RecordAdapter for TextAdapter {
        fn adapt(&self, key: &str, value: &Value) -> Result<Option<Record>, AdaptError> {
            let obj = value.as_object().ok_or_else(|| AdaptError::Malformed {
                key: key.to_string(),
                reason: "not an object".to_string(),
            })?;
            if obj.get("skip").and_then(Value::as_bool) == Some(true) {
                return Ok(None);
            }
            let text = obj.get("text").and_then(Value::as_str).unwrap_or_default();
            Ok(Some(Record {
                id: obj
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or(key)
                    .to_string(),
                timestamp: obj.get("ts").and_then(Value::as_i64),
                fields: fields(&[("text", FieldValue::from(text))]),
            }))
        }

        fn receipt(&self, _key: &str, value: &Value) -> Option<Value> {
            (value.get("ack") == Some(&json!(false))).then(|| json!({"ack": true}))
        }
    }

    fn memory() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_clock(Arc::new(ManualClock::at(1_000))))
    }

    fn ids(changes: &[ListChange]) -> Vec<(String, usize)> {
        changes
            .iter()
            .map(|c| match c {
                ListChange::Inserted { index, entry } => (format!("+{}", entry.id()), *index),
                ListChange::Updated { index, entry } => (format!("~{}", entry.id()), *index),
                ListChange::Unchanged { index } => ("=".to_string(), *index),
            })
            .collect()
    }

    async fn take(rx: &mut mpsc::UnboundedReceiver<ListChange>, n: usize) -> Vec<ListChange> {
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(rx.recv().await.expect("feed stopped early"));
        }
        out
    }

    #[tokio::test]
    async fn snapshots_become_ordered_inserts() {
        let store = memory();
        store.write("m/a", &json!({"ts": 100, "text": "hi"})).await.unwrap();
        store.write("m/b", &json!({"ts": 50, "text": "yo"})).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = Feed::new(store.clone(), Query::new("m"), TextAdapter)
            .subscribe(tx)
            .await
            .unwrap();
        assert_eq!(sub.state(), SubscriptionState::Subscribed);

        // Key order delivers a then b; b is older so it lands in front.
        let first = take(&mut rx, 2).await;
        assert_eq!(ids(&first), [("+a".to_string(), 0), ("+b".to_string(), 0)]);

        store.write("m/c", &json!({"ts": 100, "text": "sup"})).await.unwrap();
        let next = take(&mut rx, 1).await;
        assert_eq!(ids(&next), [("+c".to_string(), 2)]);
    }

    #[tokio::test]
    async fn redelivered_records_are_not_re_rendered() {
        let store = memory();
        store.write("m/a", &json!({"ts": 1, "text": "hi"})).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sub = Feed::new(store.clone(), Query::new("m"), TextAdapter)
            .subscribe(tx)
            .await
            .unwrap();
        take(&mut rx, 1).await;

        store.write("m/b", &json!({"ts": 2, "text": "yo"})).await.unwrap();
        store.update("m/a", &json!({"text": "hi!"})).await.unwrap();
        let changes = take(&mut rx, 2).await;
        assert_eq!(ids(&changes), [("+b".to_string(), 1), ("~a".to_string(), 0)]);

        sub.cancel();
        let stats = sub.join().await.unwrap();
        assert_eq!(stats.snapshots, 3);
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.unchanged, 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bad_records_do_not_stop_the_snapshot() {
        let store = memory();
        store.write("m/a", &json!("garbage")).await.unwrap();
        store.write("m/b", &json!({"id": "", "ts": 2, "text": "anon"})).await.unwrap();
        store.write("m/c", &json!({"skip": true})).await.unwrap();
        store.write("m/d", &json!({"ts": 3, "text": "ok"})).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sub = Feed::new(store.clone(), Query::new("m"), TextAdapter)
            .subscribe(tx)
            .await
            .unwrap();
        let changes = take(&mut rx, 1).await;
        assert_eq!(ids(&changes), [("+d".to_string(), 0)]);

        sub.cancel();
        let stats = sub.join().await.unwrap();
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test]
    async fn corrupt_restored_entry_only_fails_its_own_records() {
        let store = memory();
        store.write("m/new", &json!({"ts": 50, "text": "late"})).await.unwrap();
        store.write("m/old", &json!({"ts": 1, "text": "early"})).await.unwrap();

        let mut seeded = Reconciler::new();
        seeded.restore([
            Entry::new("r1", Some(10), false, fields(&[("text", "cached".into())])),
            Entry::new("r2", None, false, fields(&[("text", "broken".into())])),
        ]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sub = Feed::new(store.clone(), Query::new("m"), TextAdapter)
            .with_reconciler(seeded)
            .subscribe(tx)
            .await
            .unwrap();
        let changes = take(&mut rx, 1).await;
        assert_eq!(ids(&changes), [("+old".to_string(), 0)]);

        sub.cancel();
        let stats = sub.join().await.unwrap();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.inserted, 1);
    }

    #[tokio::test]
    async fn receipts_are_written_back() {
        let store = memory();
        store.write("m/a", &json!({"ts": 1, "text": "hi", "ack": false})).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = Feed::new(store.clone(), Query::new("m"), TextAdapter)
            .subscribe(tx)
            .await
            .unwrap();
        take(&mut rx, 1).await;

        let mut acked = store.subscribe(&Query::new("m")).await.unwrap();
        loop {
            let snapshot = acked.recv().await.unwrap().unwrap();
            if snapshot.iter().any(|(_, v)| v["ack"] == json!(true)) {
                break;
            }
        }
        assert_eq!(store.get("m/a/ack").unwrap(), Some(json!(true)));
    }

    #[tokio::test]
    async fn source_failure_ends_the_subscription() {
        let store = memory();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut sub = Feed::new(store.clone(), Query::new("m"), TextAdapter)
            .subscribe(tx)
            .await
            .unwrap();

        store.cancel_all("permission_denied").unwrap();
        sub.stopped().await;
        assert_eq!(sub.state(), SubscriptionState::Unsubscribed);
        assert!(matches!(
            sub.join().await,
            Err(FeedError::Source(StoreError::Cancelled(_)))
        ));
    }

    #[tokio::test]
    async fn cancel_moves_to_unsubscribed() {
        let store = memory();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut sub = Feed::new(store.clone(), Query::new("m"), TextAdapter)
            .subscribe(tx)
            .await
            .unwrap();

        sub.cancel();
        sub.stopped().await;
        assert_eq!(sub.state(), SubscriptionState::Unsubscribed);
        assert!(sub.join().await.is_ok());
    }
}
