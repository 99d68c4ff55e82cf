//! Server-sent events from the database streaming endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::store::StoreError;
use crate::api::tree;

/// Raw event as framed on the wire: an `event:` name and its `data:` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingEvent {
    pub event_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Put { path: String, data: Value },
    Patch { path: String, data: Value },
    KeepAlive,
    Cancel(String),
    AuthRevoked(String),
}

#[derive(Deserialize)]
struct PathData {
    path: String,
    data: Value,
}

impl TryFrom<IncomingEvent> for StreamEvent {
    type Error = StoreError;

    fn try_from(event: IncomingEvent) -> Result<Self, Self::Error> {
        let payload = || -> Result<PathData, StoreError> {
            serde_json::from_str(&event.data)
                .map_err(|e| StoreError::MalformedEvent(format!("{}: {e}", event.event_type)))
        };
        let reason = || {
            serde_json::from_str::<Value>(&event.data)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| event.data.trim().to_string())
        };
        match event.event_type.as_str() {
            "put" => {
                let PathData { path, data } = payload()?;
                Ok(StreamEvent::Put { path, data })
            }
            "patch" => {
                let PathData { path, data } = payload()?;
                Ok(StreamEvent::Patch { path, data })
            }
            "keep-alive" => Ok(StreamEvent::KeepAlive),
            "cancel" => Ok(StreamEvent::Cancel(reason())),
            "auth_revoked" => Ok(StreamEvent::AuthRevoked(reason())),
            other => Err(StoreError::MalformedEvent(format!("unknown event type {other}"))),
        }
    }
}

impl StreamEvent {
    /// Applies a data event to the local copy of the subscribed node.
    /// Returns whether the tree may have changed.
    pub fn apply(&self, root: &mut Value) -> Result<bool, StoreError> {
        match self {
            StreamEvent::Put { path, data } => {
                tree::set(root, path, data.clone());
                Ok(true)
            }
            StreamEvent::Patch { path, data } => {
                let patch = data
                    .as_object()
                    .ok_or_else(|| StoreError::InvalidPatch { path: path.clone() })?;
                tree::merge(root, path, patch);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Incremental `text/event-stream` framer. Bytes may be split anywhere,
/// including inside a multi-byte character.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: Vec<u8>,
    event_type: Option<String>,
    data: Vec<String>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<IncomingEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    out.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => self.event_type = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        out
    }

    fn dispatch(&mut self) -> Option<IncomingEvent> {
        let event_type = self.event_type.take();
        let data = std::mem::take(&mut self.data);
        if event_type.is_none() && data.is_empty() {
            return None;
        }
        Some(IncomingEvent {
            event_type: event_type.unwrap_or_else(|| "message".to_string()),
            data: data.join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_events_across_chunks() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.feed(b"event: put\ndata: {\"path\":\"/\",").is_empty());
        assert!(decoder.feed(b"\"data\":{\"m1\":{\"text\":\"h\xc3").is_empty());
        let events = decoder.feed(b"\xa9\"}}}\n\nevent: keep-alive\ndata: null\n\n");

        assert_eq!(events.len(), 2);
        let put = StreamEvent::try_from(events[0].clone()).unwrap();
        assert_eq!(
            put,
            StreamEvent::Put {
                path: "/".to_string(),
                data: json!({"m1": {"text": "hé"}}),
            }
        );
        assert_eq!(
            StreamEvent::try_from(events[1].clone()).unwrap(),
            StreamEvent::KeepAlive
        );
    }

    #[test]
    fn comments_and_crlf_are_tolerated() {
        let mut decoder = EventDecoder::new();
        let events =
            decoder.feed(b": hello\r\nevent: cancel\r\ndata: \"permission_denied\"\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(
            StreamEvent::try_from(events[0].clone()).unwrap(),
            StreamEvent::Cancel("permission_denied".to_string())
        );
    }

    #[test]
    fn put_and_patch_update_local_tree() {
        let mut root = Value::Null;
        StreamEvent::Put {
            path: "/".to_string(),
            data: json!({"m1": {"text": "hi", "sent": false}}),
        }
        .apply(&mut root)
        .unwrap();
        StreamEvent::Patch {
            path: "/m1".to_string(),
            data: json!({"sent": true}),
        }
        .apply(&mut root)
        .unwrap();
        StreamEvent::Put {
            path: "/m2".to_string(),
            data: json!({"text": "yo"}),
        }
        .apply(&mut root)
        .unwrap();

        assert_eq!(root, json!({"m1": {"text": "hi", "sent": true}, "m2": {"text": "yo"}}));
    }

    #[test]
    fn unknown_event_is_malformed() {
        let event = IncomingEvent {
            event_type: "bogus".to_string(),
            data: "null".to_string(),
        };
        assert!(matches!(
            StreamEvent::try_from(event),
            Err(StoreError::MalformedEvent(_))
        ));
    }
}
