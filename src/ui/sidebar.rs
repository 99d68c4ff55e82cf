use log::warn;
use std::io::Write;

use crate::reconciler::{Entry, ListChange};
use crate::ui::{ListProjection, Surface};

pub fn render_user(entry: &Entry) -> String {
    let name = entry.text("name").unwrap_or("?");
    format!("  {name}  (/to {})", entry.id())
}

/// Online users. The list is short, so every change redraws it.
pub struct Sidebar<W> {
    out: W,
    list: ListProjection,
}

impl<W: Write + Send + 'static> Sidebar<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            list: ListProjection::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn redraw(&mut self) -> std::io::Result<()> {
        writeln!(self.out, "Online ({}):", self.list.len())?;
        for entry in self.list.entries() {
            writeln!(self.out, "{}", render_user(entry))?;
        }
        self.out.flush()
    }
}

impl<W: Write + Send + 'static> Surface for Sidebar<W> {
    fn apply(&mut self, change: &ListChange) {
        if self.list.apply(change).is_none() {
            return;
        }
        if let Err(e) = self.redraw() {
            warn!("[ui] sidebar write failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::Reconciler;
    use crate::reconciler::tests::fields;

    #[test]
    fn redraws_sorted_user_list() {
        let mut list = Reconciler::new();
        let mut sidebar = Sidebar::new(Vec::new());
        for (uid, ts, name) in [("u2", 20, "Bob"), ("u1", 10, "Ada")] {
            let change = list.upsert(uid, Some(ts), fields(&[("name", name.into())])).unwrap();
            sidebar.apply(&change);
        }
        let unchanged = list.upsert("u1", Some(10), fields(&[("name", "Ada".into())])).unwrap();
        sidebar.apply(&unchanged);

        let out = String::from_utf8(sidebar.into_inner()).unwrap();
        assert!(out.ends_with("Online (2):\n  Ada  (/to u1)\n  Bob  (/to u2)\n"));
        assert_eq!(out.matches("Online").count(), 2);
    }
}
