pub mod clippings;
pub mod fingerprint;
pub mod library;
pub mod state;

// Re-export commonly used types
pub use clippings::{classify, parse_clippings, MalformedRecord, ParsedLog, RawEntry, Unsupported};
pub use fingerprint::{Fingerprint, FINGERPRINT_SCHEME};
pub use library::{Book, BookKey, Highlight, Library, Location};
pub use state::{BookRecord, StateError, StateStore, SyncState, SyncedHighlight};

// Entry kinds the device writes into the clippings log
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Highlight,
    Note,
    Bookmark,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Highlight => "highlight",
            EntryKind::Note => "note",
            EntryKind::Bookmark => "bookmark",
        }
    }

    /// Maps the keyword after "Your" in a metadata line to a kind.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_lowercase().as_str() {
            "highlight" => Some(EntryKind::Highlight),
            "note" => Some(EntryKind::Note),
            "bookmark" => Some(EntryKind::Bookmark),
            _ => None,
        }
    }
}

/// Trims and collapses internal runs of whitespace, keeping the original casing.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The form used for grouping and identity, never for display.
pub fn normalize(s: &str) -> String {
    collapse_whitespace(s).to_lowercase()
}
