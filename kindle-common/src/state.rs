use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{BookKey, Fingerprint, FINGERPRINT_SCHEME};

pub const STATE_VERSION: u32 = 1;

#[derive(thiserror::Error, Debug)]
pub enum StateError {
    #[error(
        "state file {path:?} is corrupt ({source}); fix or move it aside manually, \
         starting fresh would re-emit every highlight"
    )]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("state file {path:?} has version {found}, this build understands up to {}", STATE_VERSION)]
    UnsupportedVersion { path: PathBuf, found: u32 },

    #[error("state file {path:?} uses fingerprint scheme {found:?}, expected {:?}", FINGERPRINT_SCHEME)]
    FingerprintMismatch { path: PathBuf, found: String },

    #[error("failed to read state file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write state file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedHighlight {
    pub book_key: BookKey,
    pub synced_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_on: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub title: String,
    pub author: String,
    /// File name relative to the output directory.
    pub file: String,
    pub first_synced: DateTime<Utc>,
}

/// Everything previously emitted. Grows monotonically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub version: u32,
    pub fingerprint: String,
    #[serde(default)]
    pub highlights: BTreeMap<Fingerprint, SyncedHighlight>,
    #[serde(default)]
    pub books: BTreeMap<BookKey, BookRecord>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            fingerprint: FINGERPRINT_SCHEME.to_string(),
            highlights: BTreeMap::new(),
            books: BTreeMap::new(),
        }
    }
}

impl SyncState {
    pub fn is_known(&self, identity: &Fingerprint) -> bool {
        self.highlights.contains_key(identity)
    }

    /// Marks an identity as synced. Returns false, and changes nothing, when
    /// the identity was already known.
    pub fn record(
        &mut self,
        identity: Fingerprint,
        book_key: BookKey,
        synced_at: DateTime<Utc>,
        added_on: Option<NaiveDateTime>,
    ) -> bool {
        if self.is_known(&identity) {
            return false;
        }

        self.highlights.insert(
            identity,
            SyncedHighlight {
                book_key,
                synced_at,
                added_on,
            },
        );
        true
    }

    pub fn book(&self, key: &BookKey) -> Option<&BookRecord> {
        self.books.get(key)
    }

    /// Records the output file of a book the first time it is written.
    pub fn register_book(&mut self, key: BookKey, record: BookRecord) {
        self.books.entry(key).or_insert(record);
    }

    pub fn highlights_for(&self, key: &BookKey) -> usize {
        self.highlights.values().filter(|h| &h.book_key == key).count()
    }

    pub fn is_file_taken(&self, file: &str) -> bool {
        self.books.values().any(|b| b.file == file)
    }
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or blank file is an empty state. Anything unparseable is an
    /// error the operator has to resolve.
    pub fn load(&self) -> Result<SyncState, StateError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {:?}, starting empty", self.path);
                return Ok(SyncState::default());
            }
            Err(source) => {
                return Err(StateError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if contents.trim().is_empty() {
            debug!("State file {:?} is empty, starting empty", self.path);
            return Ok(SyncState::default());
        }

        let state: SyncState = serde_json::from_str(&contents).map_err(|source| StateError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        if state.version > STATE_VERSION {
            return Err(StateError::UnsupportedVersion {
                path: self.path.clone(),
                found: state.version,
            });
        }

        if state.fingerprint != FINGERPRINT_SCHEME {
            return Err(StateError::FingerprintMismatch {
                path: self.path.clone(),
                found: state.fingerprint,
            });
        }

        debug!(
            "Loaded state from {:?}: {} highlights across {} books",
            self.path,
            state.highlights.len(),
            state.books.len()
        );

        Ok(state)
    }

    /// Writes to a temporary file next to the target and renames it into
    /// place, so the previous state survives a crash mid-write.
    pub fn save(&self, state: &SyncState) -> Result<(), StateError> {
        let write_err = |source| StateError::Write {
            path: self.path.clone(),
            source,
        };

        let parent = self
            .path
            .parent()
            .filter(|p| *p != Path::new(""))
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent).map_err(write_err)?;

        let json = serde_json::to_string_pretty(state).map_err(|e| write_err(e.into()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
        tmp.write_all(json.as_bytes()).map_err(write_err)?;
        tmp.write_all(b"\n").map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;

        debug!("Saved state to {:?}", self.path);
        Ok(())
    }
}
