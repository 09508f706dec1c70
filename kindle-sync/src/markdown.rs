use chrono::NaiveDate;
use itertools::Itertools;
use kindle_common::{Book, EntryKind, Highlight};
use serde::Serialize;
use tera::{Context, Tera};

const BOOK_TEMPLATE: &str = r#"---
title: {{ title | json_encode() | safe }}
author: {{ author | json_encode() | safe }}
synced: {{ synced }}
---

## Highlights

{% include "entries.md" %}"#;

const ENTRIES_TEMPLATE: &str = r#"{% for entry in entries -%}
- **{{ entry.reference }}** — {% if entry.kind == "note" %}*[Note]* {{ entry.text }}{% elif entry.kind == "bookmark" %}*[Bookmark]*{% else %}"{{ entry.text }}"{% endif %}

{% endfor -%}
"#;

#[derive(Serialize)]
struct EntryView {
    kind: EntryKind,
    reference: String,
    text: String,
}

impl From<&Highlight> for EntryView {
    fn from(highlight: &Highlight) -> Self {
        let reference = match (highlight.page, highlight.location) {
            (Some(page), _) => format!("p. {}", page),
            (None, Some(location)) => format!("loc. {}", location),
            (None, None) => "no location".to_string(),
        };

        EntryView {
            kind: highlight.kind,
            reference,
            // Continuation lines stay inside the list item.
            text: highlight.text.lines().map(str::trim_end).join("\n  "),
        }
    }
}

#[derive(Serialize)]
struct BookView<'a> {
    title: &'a str,
    author: &'a str,
    synced: String,
    entries: Vec<EntryView>,
}

/// Renders books to Markdown. Output depends only on the arguments.
pub struct Renderer {
    templates: Tera,
}

impl Renderer {
    pub fn new() -> Result<Self, tera::Error> {
        let mut templates = Tera::default();
        templates.add_raw_templates(vec![
            ("entries.md", ENTRIES_TEMPLATE),
            ("book.md", BOOK_TEMPLATE),
        ])?;

        Ok(Self { templates })
    }

    /// The whole document: frontmatter, heading and one bullet per entry.
    pub fn render_document(&self, book: &Book, synced: NaiveDate) -> Result<String, tera::Error> {
        let view = BookView {
            title: &book.title,
            author: &book.author,
            synced: synced.format("%Y-%m-%d").to_string(),
            entries: book.entries.iter().map_into().collect_vec(),
        };

        self.templates.render("book.md", &Context::from_serialize(&view)?)
    }

    /// Only the bullets, for appending to an existing document.
    pub fn render_entries(&self, entries: &[Highlight]) -> Result<String, tera::Error> {
        let mut context = Context::new();
        context.insert("entries", &entries.iter().map(EntryView::from).collect_vec());

        self.templates.render("entries.md", &context)
    }
}
