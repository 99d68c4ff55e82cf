use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use crate::api::auth::Identity;
use crate::api::store::server_timestamp;
use crate::reconciler::{DisplayFields, FieldValue, Timestamp};
use crate::utils::{profile_pic_or_placeholder, sized_profile_pic};

/// A row under `messages/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "profilePicUrl", default)]
    pub profile_pic_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub timestamp: Option<Timestamp>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub sender_id: String,
    #[serde(default, deserialize_with = "lenient_id")]
    pub receiver_id: String,
    #[serde(default)]
    pub sent: bool,
    #[serde(default)]
    pub received: bool,
    #[serde(default)]
    pub seen: bool,
}

impl Message {
    /// Body of a new message; the store fills in the timestamp.
    pub fn outgoing(from: &Identity, to: &str, text: &str) -> Value {
        json!({
            "name": from.display_name,
            "text": text,
            "profilePicUrl": profile_pic_or_placeholder(from.photo_url.as_deref()),
            "timestamp": server_timestamp(),
            "sender_id": from.uid,
            "receiver_id": to,
            "sent": false,
            "received": false,
            "seen": false,
        })
    }

    /// True when the message was exchanged between `a` and `b`, either way.
    pub fn between(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    pub fn display_fields(&self) -> DisplayFields {
        let mut fields = DisplayFields::new();
        fields.insert("name".into(), FieldValue::from(self.name.as_str()));
        fields.insert("text".into(), FieldValue::from(self.text.as_str()));
        if let Some(pic) = self.profile_pic_url.as_deref().filter(|p| !p.is_empty()) {
            fields.insert("pic".into(), FieldValue::from(sized_profile_pic(pic)));
        }
        fields.insert("sender".into(), FieldValue::from(self.sender_id.as_str()));
        fields.insert("sent".into(), FieldValue::from(self.sent));
        fields.insert("received".into(), FieldValue::from(self.received));
        fields.insert("seen".into(), FieldValue::from(self.seen));
        fields
    }
}

/// A row under `users/`, keyed by display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPresence {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "profilePicUrl", default)]
    pub profile_pic_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub uid: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub timestamp: Option<Timestamp>,
}

impl UserPresence {
    pub fn online(identity: &Identity) -> Value {
        json!({
            "name": identity.display_name,
            "profilePicUrl": profile_pic_or_placeholder(identity.photo_url.as_deref()),
            "uid": identity.uid,
            "online": true,
            "timestamp": server_timestamp(),
        })
    }

    pub fn display_fields(&self) -> DisplayFields {
        let mut fields = DisplayFields::new();
        fields.insert("name".into(), FieldValue::from(self.name.as_str()));
        if let Some(pic) = self.profile_pic_url.as_deref().filter(|p| !p.is_empty()) {
            fields.insert("pic".into(), FieldValue::from(sized_profile_pic(pic)));
        }
        fields.insert("online".into(), FieldValue::from(self.online));
        fields
    }
}

// Timestamps arrive as integers from the server but may be floats when
// written by other clients; anything else counts as absent.
fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as Timestamp)),
        _ => None,
    })
}

// Older rows store a numeric zero for "no recipient".
fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}
