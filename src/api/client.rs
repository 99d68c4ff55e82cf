use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use reqwest::header::ACCEPT;
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

use crate::api::events::{EventDecoder, StreamEvent};
use crate::api::query::Query;
use crate::api::store::{RealtimeStore, SnapshotStream, StoreError};
use crate::utils::normalize_url;

/// Hosted real-time database over its REST surface. Writes are plain
/// HTTP verbs on `<path>.json`; subscriptions are server-sent event streams.
pub struct RestStore {
    http: HttpClient,
    stream_http: HttpClient,
    base: Url,
    token: RwLock<Option<String>>,
}

impl RestStore {
    pub fn new(database_url: &str) -> Result<Self, StoreError> {
        let base = Url::parse(&normalize_url(database_url))
            .map_err(|e| StoreError::InvalidUrl(e.to_string()))?;
        let http = HttpClient::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        // Streams stay open indefinitely, so no overall timeout here.
        let stream_http = HttpClient::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            stream_http,
            base,
            token: RwLock::new(None),
        })
    }

    fn url_for(&self, path: &str) -> Result<Url, StoreError> {
        let trimmed = path.trim_matches('/');
        let relative = if trimmed.is_empty() {
            ".json".to_string()
        } else {
            format!("{trimmed}.json")
        };
        let mut base = self.base.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(&relative)
            .map_err(|e| StoreError::InvalidUrl(e.to_string()))
    }

    fn with_auth(&self, req: RequestBuilder) -> RequestBuilder {
        let token = self.token.read().ok().and_then(|t| t.clone());
        match token {
            Some(t) => req.query(&[("auth", t)]),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, StoreError> {
        let resp = self.with_auth(req).send().await?;
        check_status(resp).await
    }
}

async fn check_status(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);
    Err(StoreError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl RealtimeStore for RestStore {
    async fn write(&self, path: &str, record: &Value) -> Result<(), StoreError> {
        let url = self.url_for(path)?;
        self.send(self.http.put(url).json(record)).await?;
        debug!("[store] wrote {path}");
        Ok(())
    }

    async fn update(&self, path: &str, partial: &Value) -> Result<(), StoreError> {
        if !partial.is_object() {
            return Err(StoreError::InvalidPatch {
                path: path.to_string(),
            });
        }
        let url = self.url_for(path)?;
        self.send(self.http.patch(url).json(partial)).await?;
        debug!("[store] updated {path}");
        Ok(())
    }

    async fn append(&self, path: &str, record: &Value) -> Result<String, StoreError> {
        let url = self.url_for(path)?;
        let resp = self.send(self.http.post(url).json(record)).await?;
        let json: Value = resp.json().await?;
        json.get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| StoreError::UnexpectedResponse("no generated key in response".into()))
    }

    async fn subscribe(&self, query: &Query) -> Result<SnapshotStream, StoreError> {
        let url = self.url_for(&query.path)?;
        let req = self
            .stream_http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .query(&query.params());
        let resp = self.send(req).await?;
        info!("[store] streaming {}", query.path);

        let (tx, rx) = mpsc::unbounded_channel();
        let query = query.clone();
        tokio::spawn(async move {
            let mut decoder = EventDecoder::new();
            let mut local = Value::Null;
            let mut bytes = resp.bytes_stream();

            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        debug!("[store] subscriber for {} went away", query.path);
                        return;
                    }
                    next = bytes.next() => next,
                };
                let Some(chunk) = next else {
                    break;
                };
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(StoreError::from(e)));
                        return;
                    }
                };
                for incoming in decoder.feed(&chunk) {
                    let event = match StreamEvent::try_from(incoming) {
                        Ok(ev) => ev,
                        Err(e) => {
                            warn!("[store] skipping stream event: {e}");
                            continue;
                        }
                    };
                    match event {
                        StreamEvent::KeepAlive => {}
                        StreamEvent::Cancel(reason) | StreamEvent::AuthRevoked(reason) => {
                            let _ = tx.send(Err(StoreError::Cancelled(reason)));
                            return;
                        }
                        data_event => match data_event.apply(&mut local) {
                            Ok(true) => {
                                if tx.send(Ok(query.select(Some(&local)))).is_err() {
                                    debug!("[store] subscriber for {} went away", query.path);
                                    return;
                                }
                            }
                            Ok(false) => {}
                            Err(e) => warn!("[store] could not apply stream event: {e}"),
                        },
                    }
                }
            }
            let _ = tx.send(Err(StoreError::StreamClosed));
        });
        Ok(rx)
    }

    fn authorize(&self, token: Option<String>) {
        match self.token.write() {
            Ok(mut slot) => *slot = token,
            Err(_) => warn!("[store] token lock poisoned; keeping previous credentials"),
        }
    }
}
