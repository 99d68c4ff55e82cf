use log::warn;
use std::io::Write;

use crate::reconciler::{Entry, ListChange};
use crate::ui::{ListProjection, Surface};

/// Delivery marks appended to message text.
pub fn status_mark(entry: &Entry) -> &'static str {
    if entry.flag("seen") || entry.flag("received") {
        "\t\u{2713}\u{2713}"
    } else if entry.flag("sent") {
        "\t\u{2713}"
    } else {
        ""
    }
}

pub fn render_message(entry: &Entry) -> String {
    let name = entry.text("name").unwrap_or("?");
    let text = entry.text("text").unwrap_or_default().replace('\n', "\n    ");
    format!("{name}: {text}{}", status_mark(entry))
}

/// Message list for one conversation. Appends are printed as they come;
/// anything that lands mid-list or changes an earlier line redraws the view.
pub struct ChatView<W> {
    out: W,
    title: String,
    list: ListProjection,
}

impl<W: Write + Send + 'static> ChatView<W> {
    pub fn new(out: W, title: impl Into<String>) -> Self {
        let mut view = Self {
            out,
            title: title.into(),
            list: ListProjection::new(),
        };
        view.header();
        view
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn header(&mut self) {
        let line = format!("── {} ──", self.title);
        self.write_line(&line);
    }

    fn redraw(&mut self) {
        self.header();
        let lines: Vec<String> = self.list.entries().iter().map(render_message).collect();
        for line in lines {
            self.write_line(&line);
        }
    }

    fn write_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{line}").and_then(|_| self.out.flush()) {
            warn!("[ui] chat view write failed: {e}");
        }
    }
}

impl<W: Write + Send + 'static> Surface for ChatView<W> {
    fn apply(&mut self, change: &ListChange) {
        let Some(index) = self.list.apply(change) else {
            return;
        };
        let appended =
            matches!(change, ListChange::Inserted { .. }) && index + 1 == self.list.len();
        if appended {
            let line = render_message(&self.list.entries()[index]);
            self.write_line(&line);
        } else {
            self.redraw();
        }
    }
}
