use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use kindle_common::{classify, parse_clippings, Book, BookRecord, Library, StateStore, SyncState};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::SyncError;
use crate::lock::{LockError, LockInfo, SyncLock};
use crate::markdown::Renderer;
use crate::note::{slugify, suffixed_slug, truncate_to_bytes, NoteToWrite, WriteMode, WriteOutcome};

/// Room kept for the title when an author disambiguates a file name.
const MAX_AUTHOR_SUFFIX_BYTES: usize = 80;

#[derive(Debug)]
pub struct BookFailure {
    pub title: String,
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct SyncSummary {
    /// Records split out of the clippings log.
    pub parsed: usize,
    pub malformed: usize,
    pub unsupported: usize,
    pub already_synced: usize,
    pub novel: usize,
    pub books_written: usize,
    pub highlights_written: usize,
    pub failures: Vec<BookFailure>,
}

impl SyncSummary {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(SyncSummary),
    /// Another run holds the lock; nothing was touched. The holder is `None`
    /// when its lock file could not be read.
    LockHeld(Option<LockInfo>),
}

pub struct Syncer {
    config: Config,
    renderer: Renderer,
}

impl Syncer {
    pub fn new(config: Config) -> Result<Self, SyncError> {
        Ok(Self {
            config,
            renderer: Renderer::new()?,
        })
    }

    /// One complete run. Fatal errors are returned before the state file is
    /// touched; per-book write failures are reported in the summary.
    pub fn run(&self, now: DateTime<Utc>, synced_on: NaiveDate) -> Result<RunOutcome, SyncError> {
        let _lock = match SyncLock::acquire(&self.config.lock_file, "sync") {
            Ok(lock) => lock,
            Err(LockError::Held { path, holder }) => {
                match &holder {
                    Some(holder) => info!("Another sync ({}) is running, exiting", holder),
                    None => info!("Another sync is starting ({:?} is not readable yet), exiting", path),
                }
                return Ok(RunOutcome::LockHeld(holder));
            }
            Err(e) => return Err(e.into()),
        };

        let store = StateStore::new(&self.config.state_file);
        let mut state = store.load()?;
        info!(
            "Loaded state: {} highlights already synced across {} books",
            state.highlights.len(),
            state.books.len()
        );

        let raw = std::fs::read_to_string(&self.config.input).map_err(|source| SyncError::InputUnavailable {
            path: self.config.input.clone(),
            source,
        })?;
        info!("Reading clippings from {:?}", self.config.input);

        std::fs::create_dir_all(&self.config.output_dir).map_err(|source| SyncError::OutputDirUnavailable {
            path: self.config.output_dir.clone(),
            source,
        })?;

        let summary = self.sync_clippings(&raw, &mut state, now, synced_on);

        if summary.highlights_written > 0 {
            store.save(&state)?;
        }

        info!(
            parsed = summary.parsed,
            novel = summary.novel,
            skipped_malformed = summary.malformed,
            skipped_unsupported = summary.unsupported,
            already_synced = summary.already_synced,
            books_written = summary.books_written,
            books_failed = summary.failures.len(),
            "Sync complete: {} new highlights saved to {:?}",
            summary.highlights_written,
            self.config.output_dir
        );

        Ok(RunOutcome::Completed(summary))
    }

    fn sync_clippings(
        &self,
        raw: &str,
        state: &mut SyncState,
        now: DateTime<Utc>,
        synced_on: NaiveDate,
    ) -> SyncSummary {
        let log = parse_clippings(raw);
        for record in &log.malformed {
            warn!("Skipping malformed record: {}", record);
        }

        let mut summary = SyncSummary {
            parsed: log.entries.len(),
            malformed: log.malformed.len(),
            ..Default::default()
        };

        let mut novel = vec![];
        for entry in &log.entries {
            match classify(entry) {
                Ok(highlight) if state.is_known(&highlight.identity) => summary.already_synced += 1,
                Ok(highlight) => novel.push(highlight),
                Err(unsupported) => {
                    debug!("Skipping {}", unsupported);
                    summary.unsupported += 1;
                }
            }
        }

        let books = Library::aggregate(novel, state);
        summary.novel = books.iter().map(|b| b.entries.len()).sum();
        info!("Found {} new highlights in {} books", summary.novel, books.len());

        let mut claimed = HashSet::new();
        for book in books {
            let file = self.file_for(&book, state, &mut claimed);
            let path = self.config.output_dir.join(&file);

            match self.write_book(&book, &path, synced_on) {
                Ok(outcome) => {
                    if book.is_new {
                        state.register_book(
                            book.key.clone(),
                            BookRecord {
                                title: book.title.clone(),
                                author: book.author.clone(),
                                file: file.clone(),
                                first_synced: now,
                            },
                        );
                    }

                    for highlight in &book.entries {
                        state.record(highlight.identity.clone(), book.key.clone(), now, highlight.added_on);
                    }

                    summary.books_written += 1;
                    summary.highlights_written += book.entries.len();
                    info!(
                        "{}: {} (+{} highlights, {} previously synced)",
                        match outcome {
                            WriteOutcome::Created => "Saved",
                            WriteOutcome::Appended => "Appended",
                        },
                        file,
                        book.entries.len(),
                        book.previously_synced
                    );
                }
                Err(e) => {
                    error!("Failed to save {:?}: {}", path, e);
                    summary.failures.push(BookFailure {
                        title: book.title.clone(),
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }

        summary
    }

    fn write_book(&self, book: &Book, path: &std::path::Path, synced_on: NaiveDate) -> anyhow::Result<WriteOutcome> {
        let mode = if book.is_new {
            WriteMode::Fresh
        } else if path.is_file() {
            WriteMode::Append
        } else {
            warn!("{:?} is missing, recreating it with the new highlights only", path);
            WriteMode::Fresh
        };

        let contents = match mode {
            WriteMode::Fresh => self.renderer.render_document(book, synced_on)?,
            WriteMode::Append => self.renderer.render_entries(&book.entries)?,
        };

        let note = NoteToWrite {
            path: path.to_path_buf(),
            mode,
            contents,
        };

        Ok(note.write()?)
    }

    /// The file recorded for a known book, otherwise a slug not used by any
    /// other book.
    fn file_for(&self, book: &Book, state: &SyncState, claimed: &mut HashSet<String>) -> String {
        if let Some(record) = state.book(&book.key) {
            claimed.insert(record.file.clone());
            return record.file.clone();
        }

        let title = slugify(&book.title);
        let mut candidates = vec![title.clone()];
        if !book.author.is_empty() {
            let author = slugify(&book.author);
            let author = truncate_to_bytes(&author, MAX_AUTHOR_SUFFIX_BYTES).trim_end_matches('-');
            candidates.push(suffixed_slug(&title, author));
        }

        let is_free = |name: &String, claimed: &HashSet<String>| !state.is_file_taken(name) && !claimed.contains(name);

        let file = candidates
            .into_iter()
            .map(|slug| format!("{}.md", slug))
            .find(|name| is_free(name, claimed))
            .unwrap_or_else(|| {
                (2..)
                    .map(|n| format!("{}.md", suffixed_slug(&title, &n.to_string())))
                    .find(|name| is_free(name, claimed))
                    .unwrap_or_else(|| format!("{}.md", title))
            });

        claimed.insert(file.clone());
        file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindle_common::BookKey;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        Config {
            input: dir.path().join("My Clippings.txt"),
            output_dir: dir.path().join("out"),
            state_file: dir.path().join("state.json"),
            log_file: dir.path().join("sync.log"),
            lock_file: dir.path().join("sync.lock"),
        }
    }

    fn book(title: &str, author: &str) -> Book {
        Book {
            key: BookKey::new(title, author),
            title: title.to_string(),
            author: author.to_string(),
            entries: vec![],
            previously_synced: 0,
            is_new: true,
        }
    }

    #[test]
    fn colliding_titles_get_distinct_files() {
        let dir = TempDir::new().unwrap();
        let syncer = Syncer::new(config(&dir)).unwrap();
        let state = SyncState::default();
        let mut claimed = HashSet::new();

        let first = syncer.file_for(&book("Poems", "Emily Dickinson"), &state, &mut claimed);
        let second = syncer.file_for(&book("Poems", "John Keats"), &state, &mut claimed);
        let third = syncer.file_for(&book("Poems!", "John Keats"), &state, &mut claimed);
        let fourth = syncer.file_for(&book("Poems?", ""), &state, &mut claimed);

        assert_eq!(first, "poems.md");
        assert_eq!(second, "poems-john-keats.md");
        assert_eq!(third, "poems-2.md");
        assert_eq!(fourth, "poems-3.md");
    }

    #[test]
    fn long_titles_keep_every_candidate_within_a_file_name() {
        let dir = TempDir::new().unwrap();
        let syncer = Syncer::new(config(&dir)).unwrap();
        let state = SyncState::default();
        let mut claimed = HashSet::new();
        let title = "漢".repeat(100);

        let files: Vec<_> = ["", "別の作者", ""]
            .iter()
            .map(|author| syncer.file_for(&book(&title, author), &state, &mut claimed))
            .collect();

        assert!(files.iter().all(|f| f.len() <= crate::note::MAX_SLUG_BYTES + ".md".len()));
        assert!(files[1].ends_with("-別の作者.md"));
        assert!(files[2].ends_with("-2.md"));
        assert_eq!(files.iter().collect::<HashSet<_>>().len(), 3);
    }

    #[test]
    fn known_books_keep_their_file() {
        let dir = TempDir::new().unwrap();
        let syncer = Syncer::new(config(&dir)).unwrap();
        let mut state = SyncState::default();
        let poems = book("Poems", "John Keats");
        state.register_book(
            poems.key.clone(),
            BookRecord {
                title: "Poems".to_string(),
                author: "John Keats".to_string(),
                file: "poems.md".to_string(),
                first_synced: Utc::now(),
            },
        );

        let mut claimed = HashSet::new();
        assert_eq!(syncer.file_for(&poems, &state, &mut claimed), "poems.md");
        assert_eq!(
            syncer.file_for(&book("Poems", "Emily Dickinson"), &state, &mut claimed),
            "poems-emily-dickinson.md"
        );
    }
}
