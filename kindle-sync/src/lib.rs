//! Syncs the highlights in a Kindle's `My Clippings.txt` into one Markdown
//! document per book.
//!
//! Each run parses the whole clippings log, skips everything recorded in the
//! state file, and either writes a fresh document for a book seen for the
//! first time or appends the new bullets to the document written earlier.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | CLI and default paths |
//! | [`lock`] | Exclusion between overlapping runs |
//! | [`markdown`] | Document and bullet rendering |
//! | [`note`] | Fresh and append writes, file naming |
//! | [`sync`] | The run itself |

pub mod config;
pub mod error;
pub mod lock;
pub mod markdown;
pub mod note;
pub mod sync;

pub use config::{Cli, Config};
pub use error::SyncError;
pub use sync::{RunOutcome, SyncSummary, Syncer};
