//! Snapshot children to display records, for the two lists the client shows.

use serde_json::{Value, json};

use crate::api::models::{Message, UserPresence};
use crate::feed::{AdaptError, RecordAdapter};
use crate::reconciler::Record;

fn malformed(key: &str, err: serde_json::Error) -> AdaptError {
    AdaptError::Malformed {
        key: key.to_string(),
        reason: err.to_string(),
    }
}

/// Messages exchanged between the signed-in user and one peer.
#[derive(Debug, Clone)]
pub struct MessageAdapter {
    me: String,
    peer: String,
}

impl MessageAdapter {
    pub fn new(me: impl Into<String>, peer: impl Into<String>) -> Self {
        Self {
            me: me.into(),
            peer: peer.into(),
        }
    }

    fn parse(&self, key: &str, value: &Value) -> Result<Message, AdaptError> {
        serde_json::from_value(value.clone()).map_err(|e| malformed(key, e))
    }
}

impl RecordAdapter for MessageAdapter {
    fn adapt(&self, key: &str, value: &Value) -> Result<Option<Record>, AdaptError> {
        let message = self.parse(key, value)?;
        if !message.between(&self.me, &self.peer) {
            return Ok(None);
        }
        Ok(Some(Record {
            id: key.to_string(),
            timestamp: message.timestamp,
            fields: message.display_fields(),
        }))
    }

    /// Marks messages addressed to us as received once they are shown.
    fn receipt(&self, key: &str, value: &Value) -> Option<Value> {
        let message = self.parse(key, value).ok()?;
        let inbound = message.sender_id == self.peer && message.receiver_id == self.me;
        (inbound && !message.received).then(|| json!({"received": true}))
    }
}

/// Online users other than the signed-in one, identified by uid.
#[derive(Debug, Clone)]
pub struct UserAdapter {
    me: String,
}

impl UserAdapter {
    pub fn new(me: impl Into<String>) -> Self {
        Self { me: me.into() }
    }
}

impl RecordAdapter for UserAdapter {
    fn adapt(&self, key: &str, value: &Value) -> Result<Option<Record>, AdaptError> {
        let user: UserPresence =
            serde_json::from_value(value.clone()).map_err(|e| malformed(key, e))?;
        if user.uid == self.me {
            return Ok(None);
        }
        Ok(Some(Record {
            id: user.uid.clone(),
            timestamp: user.timestamp,
            fields: user.display_fields(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::FieldValue;

    #[test]
    fn messages_outside_the_conversation_are_skipped() {
        let adapter = MessageAdapter::new("me", "bob");
        let other = json!({"sender_id": "me", "receiver_id": "carol", "text": "hi"});
        assert_eq!(adapter.adapt("m1", &other).unwrap(), None);

        let ours = json!({"sender_id": "bob", "receiver_id": "me", "text": "yo", "timestamp": 7});
        let record = adapter.adapt("m2", &ours).unwrap().unwrap();
        assert_eq!(record.id, "m2");
        assert_eq!(record.timestamp, Some(7));
        assert_eq!(record.fields.get("text"), Some(&FieldValue::from("yo")));
    }

    #[test]
    fn only_unreceived_inbound_messages_get_receipts() {
        let adapter = MessageAdapter::new("me", "bob");
        let inbound = json!({"sender_id": "bob", "receiver_id": "me", "received": false});
        let outbound = json!({"sender_id": "me", "receiver_id": "bob", "received": false});
        let already = json!({"sender_id": "bob", "receiver_id": "me", "received": true});

        assert_eq!(adapter.receipt("m1", &inbound), Some(json!({"received": true})));
        assert_eq!(adapter.receipt("m2", &outbound), None);
        assert_eq!(adapter.receipt("m3", &already), None);
    }

    #[test]
    fn non_object_message_is_malformed() {
        let adapter = MessageAdapter::new("me", "bob");
        assert!(adapter.adapt("m1", &json!(42)).is_err());
    }

    #[test]
    fn users_are_keyed_by_uid_and_skip_self() {
        let adapter = UserAdapter::new("u1");
        let me = json!({"name": "Ada", "uid": "u1", "online": true});
        let bob = json!({"name": "Bob", "uid": "u2", "online": true, "timestamp": 3});

        assert_eq!(adapter.adapt("Ada", &me).unwrap(), None);
        let record = adapter.adapt("Bob", &bob).unwrap().unwrap();
        assert_eq!(record.id, "u2");
        assert_eq!(record.fields.get("online"), Some(&FieldValue::Flag(true)));
    }
}
