use std::path::PathBuf;

use kindle_common::StateError;

use crate::lock::LockError;

/// Conditions that abort a run before any state is persisted.
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("clippings file {path:?} is unavailable: {source}")]
    InputUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    State(#[from] StateError),

    #[error("output directory {path:?} is unavailable: {source}")]
    OutputDirUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("failed to prepare markdown templates: {0}")]
    Templates(#[from] tera::Error),
}
