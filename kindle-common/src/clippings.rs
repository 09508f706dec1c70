//! Parsing of the device's `My Clippings.txt` log.
//!
//! The log is a flat sequence of records separated by a line of ten `=`
//! characters. Each record is a header (`Title (Author)`), a metadata line
//! (`- Your Highlight on page 14 | Location 210-215 | Added on ...`), a blank
//! line and the body, which is empty for bookmarks.
//!
//! A body line consisting solely of the separator cannot be told apart from a
//! real separator. Such a record is cut short and the remainder is reported as
//! malformed.

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use tracing::debug;

use crate::{collapse_whitespace, EntryKind, Fingerprint, Highlight, Location};

pub const RECORD_SEPARATOR: &str = "==========";

static METADATA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^-\s*your\s+(\w+)").unwrap());
static PAGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bpage\s+(\d+)").unwrap());
static LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:location|loc\.)\s+(\d+)(?:\s*-\s*(\d+))?").unwrap());
static ADDED_ON: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)added on\s+(.+)$").unwrap());

const DATE_FORMATS: &[&str] = &[
    "%A, %d %B %Y %H:%M:%S",
    "%A, %B %d, %Y %I:%M:%S %p",
    "%A, %B %d, %Y %H:%M:%S",
    "%A, %B %d, %Y, %H:%M:%S",
    "%A %d %B %Y %H:%M:%S",
    "%d %B %Y %H:%M:%S",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub header_line: String,
    pub meta_line: String,
    pub body: String,
    pub ordinal: usize,
}

/// A record that could not be split into header, metadata and body.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedRecord {
    #[error("record {header:?} has no metadata line")]
    MissingMetadata { header: String },

    #[error("record {header:?} has unrecognised metadata {meta:?}")]
    UnrecognizedMetadata { header: String, meta: String },
}

/// A well-formed record of a kind that is not synced.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported clipping kind {kind:?} in {header:?}")]
pub struct Unsupported {
    pub header: String,
    pub kind: String,
}

#[derive(Debug, Default)]
pub struct ParsedLog {
    pub entries: Vec<RawEntry>,
    pub malformed: Vec<MalformedRecord>,
}

/// Splits the log into records in file order. Malformed records are collected,
/// never fatal.
pub fn parse_clippings(raw: &str) -> ParsedLog {
    let text = raw
        .trim_start_matches('\u{feff}')
        .replace("\r\n", "\n")
        .replace('\r', "\n");

    let mut log = ParsedLog::default();
    let mut chunk: Vec<&str> = vec![];

    for line in text.lines() {
        if line.trim() == RECORD_SEPARATOR {
            parse_chunk(&chunk, &mut log);
            chunk.clear();
        } else {
            chunk.push(line);
        }
    }
    parse_chunk(&chunk, &mut log);

    log
}

fn parse_chunk(lines: &[&str], log: &mut ParsedLog) {
    let mut lines = lines.iter().skip_while(|l| l.trim().is_empty());

    let Some(header) = lines.next() else {
        return;
    };
    let header = header.trim().trim_start_matches('\u{feff}').trim().to_string();

    let meta = match lines.next().map(|l| l.trim()) {
        Some(meta) if !meta.is_empty() => meta.to_string(),
        _ => {
            log.malformed.push(MalformedRecord::MissingMetadata { header });
            return;
        }
    };

    if !METADATA.is_match(&meta) {
        log.malformed.push(MalformedRecord::UnrecognizedMetadata { header, meta });
        return;
    }

    let body = lines.map(|l| l.trim_end()).collect::<Vec<_>>().join("\n");

    log.entries.push(RawEntry {
        header_line: header,
        meta_line: meta,
        body: body.trim_matches('\n').to_string(),
        ordinal: log.entries.len(),
    });
}

/// Splits `Title (Author)` on the trailing parenthetical only, so parentheses
/// inside the title stay part of it.
pub fn split_header(header: &str) -> (String, String) {
    let header = header.trim();

    if let Some(inner) = header.strip_suffix(')') {
        let mut depth = 0usize;
        for (idx, ch) in inner.char_indices().rev() {
            match ch {
                ')' => depth += 1,
                '(' if depth > 0 => depth -= 1,
                '(' => {
                    let title = &inner[..idx];
                    if title.trim().is_empty() {
                        break;
                    }
                    let author = &inner[idx + 1..];
                    return (collapse_whitespace(title), collapse_whitespace(author));
                }
                _ => {}
            }
        }
    }

    (collapse_whitespace(header), String::new())
}

fn parse_added_on(meta: &str) -> Option<NaiveDateTime> {
    let date = ADDED_ON.captures(meta)?.get(1)?.as_str().trim();

    let parsed = DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(date, format).ok());

    if parsed.is_none() {
        debug!("Unrecognised clipping date {:?}", date);
    }
    parsed
}

/// Interprets a raw record. Highlights and notes without text are treated as
/// bookmarks.
pub fn classify(entry: &RawEntry) -> Result<Highlight, Unsupported> {
    let (book_title, author) = split_header(&entry.header_line);

    let keyword = METADATA
        .captures(&entry.meta_line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    let kind = EntryKind::from_keyword(&keyword).ok_or_else(|| Unsupported {
        header: entry.header_line.clone(),
        kind: keyword.clone(),
    })?;

    let text = entry.body.trim().to_string();
    let kind = if text.is_empty() { EntryKind::Bookmark } else { kind };
    let text = if kind == EntryKind::Bookmark { String::new() } else { text };

    let page = PAGE
        .captures(&entry.meta_line)
        .and_then(|c| c[1].parse::<u32>().ok());

    let location = LOCATION.captures(&entry.meta_line).and_then(|c| {
        let start = c[1].parse::<u32>().ok()?;
        let end = c.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
        Some(Location { start, end })
    });

    let identity = Fingerprint::compute(&book_title, &author, kind, page, location.as_ref(), &text);

    Ok(Highlight {
        book_title,
        author,
        kind,
        page,
        location,
        text,
        added_on: parse_added_on(&entry.meta_line),
        ordinal: entry.ordinal,
        identity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SAMPLE: &str = "\u{feff}Howards End (E. M. Forster)
- Your Highlight on page 14 | Location 210-215 | Added on Wednesday, 15 March 2023 10:32:11

Only connect! That was the whole of her sermon.
==========
Howards End (E. M. Forster)
- Your Note on page 72 | Location 1101 | Added on Wednesday, March 15, 2023 10:40:00 PM

This connects to Williams on structures of feeling.
==========
Howards End (E. M. Forster)
- Your Bookmark on page 80 | Location 1200 | Added on Thursday, 16 March 2023 09:00:00


==========
";

    #[test]
    fn splits_records_in_file_order() {
        let log = parse_clippings(SAMPLE);

        assert!(log.malformed.is_empty());
        assert_eq!(log.entries.len(), 3);
        assert_eq!(log.entries[0].header_line, "Howards End (E. M. Forster)");
        assert_eq!(log.entries[0].body, "Only connect! That was the whole of her sermon.");
        assert_eq!(log.entries[1].ordinal, 1);
        assert_eq!(log.entries[2].body, "");
    }

    #[test]
    fn handles_crlf_line_endings() {
        let log = parse_clippings(&SAMPLE.replace('\n', "\r\n"));

        assert_eq!(log.entries.len(), 3);
        assert_eq!(log.entries[1].body, "This connects to Williams on structures of feeling.");
    }

    #[test]
    fn classifies_kinds_pages_and_locations() {
        let log = parse_clippings(SAMPLE);
        let entries = log.entries.iter().map(|e| classify(e).unwrap()).collect::<Vec<_>>();

        assert_eq!(entries[0].kind, EntryKind::Highlight);
        assert_eq!(entries[0].book_title, "Howards End");
        assert_eq!(entries[0].author, "E. M. Forster");
        assert_eq!(entries[0].page, Some(14));
        assert_eq!(entries[0].location, Some(Location { start: 210, end: Some(215) }));
        assert_eq!(
            entries[0].added_on,
            NaiveDate::from_ymd_opt(2023, 3, 15).unwrap().and_hms_opt(10, 32, 11)
        );

        assert_eq!(entries[1].kind, EntryKind::Note);
        assert_eq!(entries[1].page, Some(72));
        assert_eq!(
            entries[1].added_on,
            NaiveDate::from_ymd_opt(2023, 3, 15).unwrap().and_hms_opt(22, 40, 0)
        );

        assert_eq!(entries[2].kind, EntryKind::Bookmark);
        assert_eq!(entries[2].text, "");
    }

    #[test]
    fn malformed_records_are_counted_not_fatal() {
        let raw = "Good Book (Someone)
- Your Highlight on page 1 | Added on Monday, 1 January 2024 00:00:00

first
==========
Broken Book (Someone)
==========
Odd Book (Someone)
this is not a metadata line

text
==========
Good Book (Someone)
- Your Highlight on page 2 | Added on Monday, 1 January 2024 00:00:00

second
==========";

        let log = parse_clippings(raw);

        assert_eq!(log.entries.len(), 2);
        assert_eq!(log.entries[1].ordinal, 1);
        assert_eq!(log.malformed.len(), 2);
        assert!(matches!(log.malformed[0], MalformedRecord::MissingMetadata { .. }));
        assert!(matches!(log.malformed[1], MalformedRecord::UnrecognizedMetadata { .. }));
    }

    #[test]
    fn trailing_separator_and_blank_chunks_are_ignored() {
        let log = parse_clippings("==========\n\n==========\n   \n==========\n");

        assert!(log.entries.is_empty());
        assert!(log.malformed.is_empty());
    }

    #[test]
    fn separator_inside_text_cuts_the_record() {
        let raw = "Book (Author)
- Your Highlight on page 5 | Added on Monday, 1 January 2024 00:00:00

before the line
==========
after the line
==========";

        let log = parse_clippings(raw);

        assert_eq!(log.entries.len(), 1);
        assert_eq!(log.entries[0].body, "before the line");
        assert_eq!(log.malformed.len(), 1);
    }

    #[test]
    fn author_comes_from_trailing_parenthetical_only() {
        assert_eq!(
            split_header("The Sense of an Ending (Booker Prize) (Julian Barnes)"),
            ("The Sense of an Ending (Booker Prize)".to_string(), "Julian Barnes".to_string())
        );
        assert_eq!(
            split_header("Thinking (Fast) and Slow"),
            ("Thinking (Fast) and Slow".to_string(), String::new())
        );
        assert_eq!(
            split_header("Collected Essays (Orwell, George (ed.))"),
            ("Collected Essays".to_string(), "Orwell, George (ed.)".to_string())
        );
        assert_eq!(split_header("(Untitled)"), ("(Untitled)".to_string(), String::new()));
        assert_eq!(split_header("  Middlemarch  "), ("Middlemarch".to_string(), String::new()));
    }

    #[test]
    fn location_only_and_unsupported_kinds() {
        let located = RawEntry {
            header_line: "Article".to_string(),
            meta_line: "- Your Highlight at location 42-44 | Added on Friday, 5 April 2024 08:00:00".to_string(),
            body: "words".to_string(),
            ordinal: 0,
        };
        let highlight = classify(&located).unwrap();
        assert_eq!(highlight.page, None);
        assert_eq!(highlight.location, Some(Location { start: 42, end: Some(44) }));

        let clip = RawEntry {
            meta_line: "- Your Clip on page 3".to_string(),
            ..located.clone()
        };
        assert_eq!(classify(&clip).unwrap_err().kind, "Clip");
    }

    #[test]
    fn identity_ignores_offsets_and_whitespace() {
        let a = RawEntry {
            header_line: "Howards End (E. M. Forster)".to_string(),
            meta_line: "- Your Highlight on page 14 | Location 210-215 | Added on Wednesday, 15 March 2023 10:32:11"
                .to_string(),
            body: "Only connect!".to_string(),
            ordinal: 0,
        };
        let b = RawEntry {
            header_line: "  Howards  End (E. M. Forster) ".to_string(),
            meta_line: "- Your Highlight on page 14 | Location 210-216 | Added on Friday, 17 March 2023 08:00:00"
                .to_string(),
            body: "  Only   connect! ".to_string(),
            ordinal: 57,
        };

        assert_eq!(classify(&a).unwrap().identity, classify(&b).unwrap().identity);
    }
}
