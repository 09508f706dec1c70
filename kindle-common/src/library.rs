use std::fmt::{Display, Formatter};

use chrono::NaiveDateTime;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{normalize, EntryKind, Fingerprint, SyncState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub start: u32,
    pub end: Option<u32>,
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.end {
            Some(end) if end != self.start => write!(f, "{}–{}", self.start, end),
            _ => write!(f, "{}", self.start),
        }
    }
}

/// Normalized `(title, author)` pair identifying one output document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookKey(String);

impl BookKey {
    pub fn new(title: &str, author: &str) -> Self {
        BookKey(format!("{}|{}", normalize(title), normalize(author)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BookKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Highlight {
    pub book_title: String,
    pub author: String,
    pub kind: EntryKind,
    pub page: Option<u32>,
    pub location: Option<Location>,
    pub text: String,
    pub added_on: Option<NaiveDateTime>,
    pub ordinal: usize,
    pub identity: Fingerprint,
}

impl Highlight {
    pub fn book_key(&self) -> BookKey {
        BookKey::new(&self.book_title, &self.author)
    }

    /// Page first, then location, then position in the log. Entries with
    /// neither page nor location sort after everything else.
    pub fn sort_key(&self) -> (u32, u32, usize) {
        (
            self.page.unwrap_or(u32::MAX),
            self.location.map(|l| l.start).unwrap_or(u32::MAX),
            self.ordinal,
        )
    }
}

#[derive(Debug, Clone)]
pub struct Book {
    pub key: BookKey,
    pub title: String,
    pub author: String,
    pub entries: Vec<Highlight>,
    /// Number of identities already synced for this book in earlier runs.
    pub previously_synced: usize,
    /// The key was not in the sync state before this run.
    pub is_new: bool,
}

pub struct Library;

impl Library {
    /// Groups novel highlights into books, ordered by key. Books without any
    /// novel highlight are never produced.
    pub fn aggregate(novel: Vec<Highlight>, state: &SyncState) -> Vec<Book> {
        novel
            .into_iter()
            .unique_by(|h| h.identity.clone())
            .into_group_map_by(|h| h.book_key())
            .into_iter()
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(key, entries)| {
                let entries = entries
                    .into_iter()
                    .sorted_by_key(|h| h.sort_key())
                    .collect_vec();

                let (title, author) = match state.book(&key) {
                    Some(record) => (record.title.clone(), record.author.clone()),
                    None => (entries[0].book_title.clone(), entries[0].author.clone()),
                };

                Book {
                    previously_synced: state.highlights_for(&key),
                    is_new: state.book(&key).is_none(),
                    key,
                    title,
                    author,
                    entries,
                }
            })
            .collect_vec()
    }
}
