//! Rendering adapters. They only ever see list changes, never the list.

pub mod chat_view;
pub mod sidebar;

use log::debug;
use tokio::sync::mpsc;

use crate::reconciler::{Entry, ListChange};

pub trait Surface: Send + 'static {
    fn apply(&mut self, change: &ListChange);
}

impl<S: Surface + ?Sized> Surface for Box<S> {
    fn apply(&mut self, change: &ListChange) {
        (**self).apply(change);
    }
}

/// Hands changes to another task, e.g. the one that owns the terminal.
impl Surface for mpsc::UnboundedSender<ListChange> {
    fn apply(&mut self, change: &ListChange) {
        if self.send(change.clone()).is_err() {
            debug!("[ui] change receiver dropped");
        }
    }
}

/// Read-side mirror of a display list, rebuilt purely from changes.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ListProjection {
    entries: Vec<Entry>,
}

impl ListProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index that changed, if any.
    pub fn apply(&mut self, change: &ListChange) -> Option<usize> {
        match change {
            ListChange::Inserted { index, entry } => {
                let index = (*index).min(self.entries.len());
                self.entries.insert(index, entry.clone());
                Some(index)
            }
            ListChange::Updated { index, entry } => {
                let slot = self.entries.get_mut(*index)?;
                *slot = entry.clone();
                Some(*index)
            }
            ListChange::Unchanged { .. } => None,
        }
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::Reconciler;
    use crate::reconciler::tests::fields;

    #[test]
    fn projection_mirrors_the_list() {
        let mut list = Reconciler::new();
        let mut view = ListProjection::new();
        for (id, ts, text) in [("a", 30, "x"), ("b", 10, "y"), ("c", 20, "z"), ("a", 30, "x2")] {
            let change = list.upsert(id, Some(ts), fields(&[("text", text.into())])).unwrap();
            view.apply(&change);
        }
        assert_eq!(view.entries(), list.entries());
    }

    #[tokio::test]
    async fn channel_surface_forwards_changes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut surface = tx;
        let change = ListChange::Unchanged { index: 3 };
        surface.apply(&change);
        assert_eq!(rx.recv().await, Some(change));
    }
}
