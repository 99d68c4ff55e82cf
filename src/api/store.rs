use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::api::query::{Query, Snapshot};

/// Snapshots for one standing query. An `Err` item ends the stream.
pub type SnapshotStream = mpsc::UnboundedReceiver<Result<Snapshot, StoreError>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid database url: {0}")]
    InvalidUrl(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("update for {path} must be an object")]
    InvalidPatch { path: String },
    #[error("malformed stream event: {0}")]
    MalformedEvent(String),
    #[error("subscription cancelled by server: {0}")]
    Cancelled(String),
    #[error("stream closed by server")]
    StreamClosed,
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("store lock poisoned")]
    LockPoisoned,
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Transport(err.to_string())
    }
}

/// Placeholder the store replaces with its own clock at write time.
pub fn server_timestamp() -> Value {
    json!({".sv": "timestamp"})
}

/// A real-time database: path-addressed writes plus standing queries that
/// redeliver their whole result set on every change.
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    async fn write(&self, path: &str, record: &Value) -> Result<(), StoreError>;

    async fn update(&self, path: &str, partial: &Value) -> Result<(), StoreError>;

    /// Stores `record` under a freshly generated child key and returns it.
    async fn append(&self, path: &str, record: &Value) -> Result<String, StoreError>;

    async fn subscribe(&self, query: &Query) -> Result<SnapshotStream, StoreError>;

    /// Bearer token attached to subsequent requests; `None` signs out.
    fn authorize(&self, _token: Option<String>) {}
}
