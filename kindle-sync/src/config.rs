use clap::Parser;
use std::path::PathBuf;

const DEVICE_VOLUMES: &[&str] = &["Kindle", "KINDLE", "kindle"];
const CLIPPINGS_LOCATIONS: &[&str] = &["documents/My Clippings.txt", "My Clippings.txt"];

#[derive(Debug, Parser)]
#[command(name = "kindle-sync")]
#[command(about = "Syncs Kindle highlights into one Markdown note per book", long_about = None)]
pub struct Cli {
    /// The clippings file exported by the device. Defaults to the first
    /// "My Clippings.txt" found on a mounted Kindle volume.
    #[arg(long, env = "KINDLE_SYNC_INPUT")]
    pub input: Option<PathBuf>,

    /// Directory receiving one Markdown file per book
    #[arg(long, env = "KINDLE_SYNC_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Record of highlights already synced
    #[arg(long, env = "KINDLE_SYNC_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Append-only run log
    #[arg(long, env = "KINDLE_SYNC_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Lock file guarding against overlapping runs
    #[arg(long, env = "KINDLE_SYNC_LOCK_FILE")]
    pub lock_file: Option<PathBuf>,
}

/// Concrete paths for a run.
#[derive(Debug, Clone)]
pub struct Config {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub state_file: PathBuf,
    pub log_file: PathBuf,
    pub lock_file: PathBuf,
}

impl Cli {
    pub fn into_config(self) -> Config {
        Config {
            input: self.input.unwrap_or_else(default_input),
            output_dir: self
                .output_dir
                .unwrap_or_else(|| home_dir().join("Documents").join("Kindle Highlights")),
            state_file: self
                .state_file
                .unwrap_or_else(|| home_dir().join(".kindle-sync-state.json")),
            log_file: self.log_file.unwrap_or_else(|| home_dir().join(".kindle-sync.log")),
            lock_file: self.lock_file.unwrap_or_else(|| home_dir().join(".kindle-sync.lock")),
        }
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn input_candidates() -> Vec<PathBuf> {
    DEVICE_VOLUMES
        .iter()
        .flat_map(|volume| {
            CLIPPINGS_LOCATIONS
                .iter()
                .map(move |location| PathBuf::from("/Volumes").join(volume).join(location))
        })
        .collect()
}

/// The first candidate that exists, otherwise the first candidate so the run
/// reports it as unavailable.
fn default_input() -> PathBuf {
    let candidates = input_candidates();
    candidates
        .iter()
        .find(|c| c.is_file())
        .unwrap_or(&candidates[0])
        .clone()
}
