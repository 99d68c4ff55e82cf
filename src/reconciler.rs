//! Ordered live-list reconciliation.
//!
//! Keeps a display list sorted ascending by ordering key. New ids are placed
//! with a linear scan from the head; known ids are updated where they stand.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Text(String),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Flag(_) => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FieldValue::Flag(b) => Some(*b),
            FieldValue::Text(_) => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Flag(value)
    }
}

pub type DisplayFields = BTreeMap<String, FieldValue>;

/// A record as extracted from a snapshot, before it reaches the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: String,
    pub timestamp: Option<Timestamp>,
    pub fields: DisplayFields,
}

/// One row of the display list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    id: String,
    ordering_key: Option<Timestamp>,
    provisional: bool,
    fields: DisplayFields,
}

impl Entry {
    /// Builds an entry as it was persisted. A `None` ordering key is corrupt
    /// state and only surfaces when a later insertion scans past it.
    pub fn new(
        id: impl Into<String>,
        ordering_key: Option<Timestamp>,
        provisional: bool,
        fields: DisplayFields,
    ) -> Self {
        Self {
            id: id.into(),
            ordering_key,
            provisional,
            fields,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ordering_key(&self) -> Option<Timestamp> {
        self.ordering_key
    }

    /// True when the ordering key came from the local clock.
    pub fn is_provisional(&self) -> bool {
        self.provisional
    }

    pub fn fields(&self) -> &DisplayFields {
        &self.fields
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(FieldValue::as_text)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.fields
            .get(name)
            .and_then(FieldValue::as_flag)
            .unwrap_or(false)
    }
}

/// What an upsert did to the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListChange {
    Inserted { index: usize, entry: Entry },
    Updated { index: usize, entry: Entry },
    Unchanged { index: usize },
}

impl ListChange {
    pub fn index(&self) -> usize {
        match self {
            ListChange::Inserted { index, .. }
            | ListChange::Updated { index, .. }
            | ListChange::Unchanged { index } => *index,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("record has no identity key")]
    MissingIdentity,
    #[error("entry {id} has no ordering key")]
    MissingOrderingKey { id: String },
}

/// Source of provisional ordering keys.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as Timestamp)
            .unwrap_or_default()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_millis(&self) -> Timestamp {
        (**self).now_millis()
    }
}

impl<C: Clock + ?Sized> Clock for Box<C> {
    fn now_millis(&self) -> Timestamp {
        (**self).now_millis()
    }
}

#[derive(Debug)]
pub struct Reconciler<C = SystemClock> {
    entries: Vec<Entry>,
    clock: C,
}

impl Reconciler<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for Reconciler<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Reconciler<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            entries: Vec::new(),
            clock,
        }
    }

    /// Inserts `id` at its sorted position, or refreshes its fields in place.
    ///
    /// An existing entry keeps both its position and its original ordering
    /// key, even when `timestamp` differs from the one it was created with.
    pub fn upsert(
        &mut self,
        id: &str,
        timestamp: Option<Timestamp>,
        fields: DisplayFields,
    ) -> Result<ListChange, ReconcileError> {
        if id.is_empty() {
            return Err(ReconcileError::MissingIdentity);
        }

        if let Some(index) = self.position(id) {
            let entry = &mut self.entries[index];
            if entry.fields == fields {
                return Ok(ListChange::Unchanged { index });
            }
            entry.fields = fields;
            return Ok(ListChange::Updated {
                index,
                entry: entry.clone(),
            });
        }

        let (key, provisional) = match timestamp {
            Some(t) => (t, false),
            None => (self.clock.now_millis(), true),
        };
        let index = self.insertion_point(key)?;
        let entry = Entry {
            id: id.to_string(),
            ordering_key: Some(key),
            provisional,
            fields,
        };
        self.entries.insert(index, entry.clone());
        Ok(ListChange::Inserted { index, entry })
    }

    pub fn apply(&mut self, record: Record) -> Result<ListChange, ReconcileError> {
        self.upsert(&record.id, record.timestamp, record.fields)
    }

    /// Appends previously persisted entries as-is. Ids already present are
    /// skipped so the list never holds two entries for one id.
    pub fn restore(&mut self, entries: impl IntoIterator<Item = Entry>) -> usize {
        let mut restored = 0;
        for entry in entries {
            if entry.id.is_empty() || self.position(&entry.id).is_some() {
                continue;
            }
            self.entries.push(entry);
            restored += 1;
        }
        restored
    }

    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    // First entry strictly newer than `key`; ties land after their equals.
    fn insertion_point(&self, key: Timestamp) -> Result<usize, ReconcileError> {
        for (index, entry) in self.entries.iter().enumerate() {
            let existing = entry
                .ordering_key
                .ok_or_else(|| ReconcileError::MissingOrderingKey {
                    id: entry.id.clone(),
                })?;
            if existing > key {
                return Ok(index);
            }
        }
        Ok(self.entries.len())
    }
}
