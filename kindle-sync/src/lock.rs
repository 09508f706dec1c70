use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Locks older than this are assumed to belong to a crashed run.
const LOCK_STALE_SECONDS: i64 = 600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub created_at: DateTime<Utc>,
    pub operation: String,
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pid {} since {}", self.pid, self.created_at)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LockError {
    /// `holder` is `None` when the lock file is recent but unreadable.
    #[error("sync lock {path:?} is held by {}", .holder.as_ref().map_or("an unknown run".to_string(), |h| h.to_string()))]
    Held { path: PathBuf, holder: Option<LockInfo> },

    #[error("failed to acquire sync lock {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What is currently sitting at the lock path.
enum Existing {
    Live(Option<LockInfo>),
    Stale(Vec<u8>),
    Gone,
}

/// Exclusive marker file held for the duration of a run. Removed on drop.
#[derive(Debug)]
pub struct SyncLock {
    path: PathBuf,
    released: bool,
}

impl SyncLock {
    /// Never blocks: a live holder is reported as [`LockError::Held`].
    ///
    /// The lock file only ever appears with its JSON already written, so a
    /// concurrent run can never observe a half-created lock.
    pub fn acquire(path: &Path, operation: &str) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        let parent = path.parent().filter(|p| *p != Path::new("")).unwrap_or(Path::new("."));
        fs::create_dir_all(parent).map_err(io_err)?;

        let info = LockInfo {
            pid: std::process::id(),
            created_at: Utc::now(),
            operation: operation.to_owned(),
        };
        let json = serde_json::to_string_pretty(&info).map_err(|e| io_err(e.into()))?;

        // Second attempt only after clearing a stale lock.
        for _ in 0..2 {
            let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
            tmp.write_all(json.as_bytes()).map_err(io_err)?;
            tmp.as_file().sync_all().map_err(io_err)?;

            match tmp.persist_noclobber(path) {
                Ok(_) => {
                    debug!("Acquired sync lock {:?}", path);
                    return Ok(Self {
                        path: path.to_path_buf(),
                        released: false,
                    });
                }
                Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(io_err(e.error)),
            }

            match inspect_existing(path).map_err(io_err)? {
                Existing::Live(holder) => {
                    return Err(LockError::Held {
                        path: path.to_path_buf(),
                        holder,
                    })
                }
                Existing::Stale(contents) => remove_stale_lock(path, &contents).map_err(io_err)?,
                Existing::Gone => {}
            }
        }

        Err(LockError::Held {
            path: path.to_path_buf(),
            holder: read_holder(path),
        })
    }

    fn release(&mut self) -> std::io::Result<()> {
        if self.released {
            return Ok(());
        }
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        self.released = true;
        debug!("Released sync lock {:?}", self.path);
        Ok(())
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Could not remove sync lock {:?}: {}", self.path, e);
        }
    }
}

fn read_holder(path: &Path) -> Option<LockInfo> {
    fs::read(path).ok().and_then(|c| serde_json::from_slice(&c).ok())
}

fn inspect_existing(path: &Path) -> std::io::Result<Existing> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Existing::Gone),
        Err(e) => return Err(e),
    };

    match serde_json::from_slice::<LockInfo>(&contents) {
        Ok(holder) if is_lock_stale(&holder) => {
            warn!("Replacing stale sync lock left by pid {}", holder.pid);
            Ok(Existing::Stale(contents))
        }
        Ok(holder) => Ok(Existing::Live(Some(holder))),
        Err(_) => {
            let modified = match fs::metadata(path).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Existing::Gone),
                Err(e) => return Err(e),
            };
            let age = SystemTime::now().duration_since(modified).unwrap_or(Duration::ZERO);

            if age.as_secs() > LOCK_STALE_SECONDS as u64 {
                warn!("Replacing unreadable sync lock {:?}", path);
                Ok(Existing::Stale(contents))
            } else {
                Ok(Existing::Live(None))
            }
        }
    }
}

/// Removes the lock only if it still holds what was judged stale.
fn remove_stale_lock(path: &Path, judged: &[u8]) -> std::io::Result<()> {
    match fs::read(path) {
        Ok(current) if current == judged => match fs::remove_file(path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        },
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn is_lock_stale(info: &LockInfo) -> bool {
    if !pid_is_alive(info.pid) {
        return true;
    }

    Utc::now().signed_duration_since(info.created_at).num_seconds() > LOCK_STALE_SECONDS
}

#[cfg(target_os = "linux")]
fn pid_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_is_alive(_pid: u32) -> bool {
    true
}
