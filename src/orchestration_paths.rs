//! On-disk layout of orchestration state, relative to the plan file.
//!
//! Everything lives under `<planDir>/.orchestration/`:
//! - `orchestration.log.json` - the event log
//! - `orchestration.lock` - single-writer lock file
//! - `config.yaml` - optional per-plan configuration
//! - `transcripts/` - out-of-line tool-call payloads
//!
//! None of these helpers create directories; writers do that lazily.

use std::path::{Path, PathBuf};

/// The name of the per-plan orchestration directory.
pub const ORCHESTRATION_DIR_NAME: &str = ".orchestration";

pub const LOG_FILE_NAME: &str = "orchestration.log.json";
pub const LOCK_FILE_NAME: &str = "orchestration.lock";
pub const CONFIG_FILE_NAME: &str = "config.yaml";
pub const TRANSCRIPTS_DIR_NAME: &str = "transcripts";

/// Returns the directory containing the plan file.
pub fn plan_dir(plan_path: &Path) -> PathBuf {
    match plan_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Returns `<planDir>/.orchestration/`
pub fn orchestration_dir(plan_path: &Path) -> PathBuf {
    plan_dir(plan_path).join(ORCHESTRATION_DIR_NAME)
}

/// Returns `<planDir>/.orchestration/orchestration.log.json`
pub fn log_path(plan_path: &Path) -> PathBuf {
    orchestration_dir(plan_path).join(LOG_FILE_NAME)
}

/// Returns `<planDir>/.orchestration/orchestration.lock`
pub fn lock_path(plan_path: &Path) -> PathBuf {
    orchestration_dir(plan_path).join(LOCK_FILE_NAME)
}

/// Returns `<planDir>/.orchestration/config.yaml`
pub fn plan_config_path(plan_path: &Path) -> PathBuf {
    orchestration_dir(plan_path).join(CONFIG_FILE_NAME)
}

/// Returns `<planDir>/.orchestration/transcripts/`
pub fn transcripts_dir(plan_path: &Path) -> PathBuf {
    orchestration_dir(plan_path).join(TRANSCRIPTS_DIR_NAME)
}

/// Returns the user-level config path: `~/.plan-orchestrator/config.yaml`
pub fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".plan-orchestrator").join(CONFIG_FILE_NAME))
}
