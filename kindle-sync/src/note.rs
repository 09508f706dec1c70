use crate::note::WriteOutcome::{Appended, Created};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// How a book's document is written in this run. Decided once per book.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Write the full document, replacing anything at the path.
    Fresh,
    /// Append bullets to a document written by an earlier run.
    Append,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Appended,
}

pub struct NoteToWrite {
    pub path: PathBuf,
    pub mode: WriteMode,
    pub contents: String,
}

impl NoteToWrite {
    pub fn write(&self) -> std::io::Result<WriteOutcome> {
        debug!("Writing note to {:?} ({:?})", &self.path, self.mode);

        match self.mode {
            WriteMode::Fresh => {
                let parent = self
                    .path
                    .parent()
                    .filter(|p| *p != Path::new(""))
                    .unwrap_or(Path::new("."));

                let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
                tmp.write_all(self.contents.as_bytes())?;
                tmp.as_file().sync_all()?;
                tmp.persist(&self.path).map_err(|e| e.error)?;
                Ok(Created)
            }

            WriteMode::Append => {
                let mut file = std::fs::OpenOptions::new().append(true).open(&self.path)?;
                file.write_all(self.contents.as_bytes())?;
                file.sync_all()?;
                Ok(Appended)
            }
        }
    }
}

/// Longest slug in bytes. Leaves room for `-N.md` under the 255-byte file
/// name limit of common filesystems.
pub const MAX_SLUG_BYTES: usize = 200;

/// File name for a title: lowercase, runs of anything but letters and digits
/// become a single `-`. At most [`MAX_SLUG_BYTES`] bytes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();

    for ch in title.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            slug.push(ch);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }

    let slug = truncate_to_bytes(slug.trim_end_matches('-'), MAX_SLUG_BYTES).trim_end_matches('-');

    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.to_string()
    }
}

/// `slug-suffix`, shortening `slug` so the result stays within
/// [`MAX_SLUG_BYTES`].
pub fn suffixed_slug(slug: &str, suffix: &str) -> String {
    let budget = MAX_SLUG_BYTES.saturating_sub(suffix.len() + 1);
    let base = truncate_to_bytes(slug, budget).trim_end_matches('-');
    if base.is_empty() {
        truncate_to_bytes(suffix, MAX_SLUG_BYTES).to_string()
    } else {
        format!("{}-{}", base, suffix)
    }
}

/// Longest prefix of `s` that is at most `max` bytes and ends on a char
/// boundary.
pub fn truncate_to_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let end = (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0);
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn slugs_are_filesystem_safe() {
        assert_eq!(slugify("Howards End"), "howards-end");
        assert_eq!(slugify("  What/Is: <This>?  "), "what-is-this");
        assert_eq!(slugify("Gödel, Escher, Bach"), "gödel-escher-bach");
        assert_eq!(slugify("???"), "untitled");
        assert_eq!(slugify(&"a".repeat(300)).len(), MAX_SLUG_BYTES);
    }

    #[test]
    fn long_multibyte_titles_fit_a_file_name() {
        let slug = slugify(&"漢".repeat(100));
        assert!(slug.len() <= MAX_SLUG_BYTES);
        assert_eq!(slug, "漢".repeat(MAX_SLUG_BYTES / 3));

        // Cut lands inside a 4-byte char.
        let slug = slugify(&format!("a{}", "𝔸".repeat(100)));
        assert_eq!(slug, format!("a{}", "𝔸".repeat(49)));

        let dir = TempDir::new().unwrap();
        let note = NoteToWrite {
            path: dir.path().join(format!("{}-99.md", slugify(&"漢".repeat(100)))),
            mode: WriteMode::Fresh,
            contents: "# 漢\n".to_string(),
        };
        assert_eq!(note.write().unwrap(), Created);
    }

    #[test]
    fn suffixes_survive_a_full_length_slug() {
        let slug = slugify(&"漢".repeat(100));

        let numbered = suffixed_slug(&slug, "12");
        assert!(numbered.len() <= MAX_SLUG_BYTES);
        assert!(numbered.ends_with("漢-12"));

        assert_eq!(suffixed_slug("poems", "john-keats"), "poems-john-keats");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_to_bytes("abc", 10), "abc");
        assert_eq!(truncate_to_bytes("ébc", 1), "");
        assert_eq!(truncate_to_bytes("aéb", 2), "a");
        assert_eq!(truncate_to_bytes("aéb", 3), "aé");
    }

    #[test]
    fn fresh_replaces_and_append_extends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.md");
        std::fs::write(&path, "stale").unwrap();

        let fresh = NoteToWrite {
            path: path.clone(),
            mode: WriteMode::Fresh,
            contents: "head\n".to_string(),
        };
        assert_eq!(fresh.write().unwrap(), Created);

        let append = NoteToWrite {
            path: path.clone(),
            mode: WriteMode::Append,
            contents: "more\n".to_string(),
        };
        assert_eq!(append.write().unwrap(), Appended);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "head\nmore\n");
    }

    #[test]
    fn append_requires_an_existing_file() {
        let dir = TempDir::new().unwrap();
        let append = NoteToWrite {
            path: dir.path().join("missing.md"),
            mode: WriteMode::Append,
            contents: "more\n".to_string(),
        };

        assert!(append.write().is_err());
    }
}
