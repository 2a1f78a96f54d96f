//! Configuration management for the botherd supervisor.
//!
//! Two layers live here: [`Settings`], the operator-editable document
//! persisted as JSON next to the bot fleet, and [`SupervisorConfig`],
//! the fixed tunables of the supervision machinery itself.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BotherdError, Result};

/// Fixed tunables of the supervision machinery.
///
/// These are deliberately not part of [`Settings`]: changing them changes
/// observable protocol behavior (buffer truncation, rename-back timing),
/// not fleet policy.
pub struct SupervisorConfig;

impl SupervisorConfig {
    /// Maximum retained console lines per bot. Oldest lines are evicted
    /// first once the buffer is full.
    pub const OUTPUT_BUFFER_LINES: usize = 100;

    /// Capacity of the live output delivery channel per bot. Pushes into
    /// a full channel are dropped, never awaited.
    pub const OUTPUT_QUEUE_CAPACITY: usize = 50;

    /// How long the launched executable keeps its tagged name before the
    /// deferred task renames it back to the generic name.
    pub const RENAME_BACK_DELAY: Duration = Duration::from_secs(5);

    /// Pause between kill and relaunch during a single-bot restart.
    pub const RESTART_SETTLE_DELAY: Duration = Duration::from_secs(2);

    /// Pause between the kill sweep and the relaunch sweep during a
    /// fleet-wide restart.
    pub const RESTART_ALL_SETTLE_DELAY: Duration = Duration::from_secs(5);

    /// Cadence at which callers are expected to drive exit reconciliation.
    pub const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// Name every bot executable carries at rest.
    pub const GENERIC_EXE_NAME: &'static str = "start.exe";

    /// Per-bot log directory name under the bot folder.
    pub const LOGS_DIR_NAME: &'static str = "logs";

    /// Console log file name inside the log directory.
    pub const CONSOLE_LOG_FILENAME: &'static str = "console.txt";
}

fn default_restart_interval() -> u64 {
    7200
}

fn default_true() -> bool {
    true
}

fn default_log_pattern() -> String {
    "(Weight|card)".to_string()
}

/// Operator-editable fleet settings, persisted as JSON.
///
/// Missing fields in the persisted file fall back to defaults, so a file
/// written by an older version loads cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory containing one folder per bot.
    #[serde(default)]
    pub base_directory: PathBuf,

    /// Ordered list of known bot folder names.
    #[serde(default)]
    pub bot_folders: Vec<String>,

    /// Seconds between a bot's start and its scheduled automatic restart.
    #[serde(default = "default_restart_interval")]
    pub restart_interval_secs: u64,

    /// Arm a restart timer whenever a bot starts.
    #[serde(default = "default_true")]
    pub auto_restart: bool,

    /// Attach output readers to hidden-console bots.
    #[serde(default = "default_true")]
    pub capture_output: bool,

    /// The working set: bots that batch operations act on.
    #[serde(default)]
    pub all_bots: Vec<String>,

    /// Regex used by external log viewers to highlight matching lines.
    #[serde(default = "default_log_pattern")]
    pub log_match_pattern: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_directory: PathBuf::new(),
            bot_folders: Vec::new(),
            restart_interval_secs: default_restart_interval(),
            auto_restart: true,
            capture_output: true,
            all_bots: Vec::new(),
            log_match_pattern: default_log_pattern(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file. A missing file yields defaults;
    /// a malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Settings file not found, using defaults");
            return Ok(Self::default());
        }
        let raw =
            fs::read_to_string(path).map_err(|e| BotherdError::io_with_path(e, path))?;
        let settings: Settings = serde_json::from_str(&raw).map_err(|e| BotherdError::Config {
            message: format!("Failed to parse {}: {e}", path.display()),
        })?;
        info!(path = %path.display(), bots = settings.bot_folders.len(), "Loaded settings");
        Ok(settings)
    }

    /// Persist settings as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw).map_err(|e| BotherdError::io_with_path(e, path))?;
        debug!(path = %path.display(), "Saved settings");
        Ok(())
    }

    /// The folder a bot lives in.
    pub fn bot_dir(&self, bot: &str) -> PathBuf {
        self.base_directory.join(bot)
    }

    /// Path of the bot's executable under its generic at-rest name.
    pub fn generic_exe_path(&self, bot: &str) -> PathBuf {
        self.bot_dir(bot).join(SupervisorConfig::GENERIC_EXE_NAME)
    }

    /// Path of the bot's executable under its per-bot tagged name.
    pub fn tagged_exe_path(&self, bot: &str) -> PathBuf {
        self.bot_dir(bot).join(tagged_exe_name(bot))
    }

    /// Path of the bot's console log file.
    pub fn console_log_path(&self, bot: &str) -> PathBuf {
        self.bot_dir(bot)
            .join(SupervisorConfig::LOGS_DIR_NAME)
            .join(SupervisorConfig::CONSOLE_LOG_FILENAME)
    }

    /// Compile the configured log match pattern. Viewers use this to
    /// highlight console lines; an unparsable pattern is a config error.
    pub fn log_matcher(&self) -> Result<Regex> {
        Regex::new(&self.log_match_pattern).map_err(|e| BotherdError::Config {
            message: format!("Invalid log match pattern {:?}: {e}", self.log_match_pattern),
        })
    }
}

/// Executable file name that identifies a specific bot in the OS process
/// table, e.g. `start_alpha.exe` for bot `alpha`.
pub fn tagged_exe_name(bot: &str) -> String {
    let generic = SupervisorConfig::GENERIC_EXE_NAME;
    match generic.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}_{bot}.{ext}"),
        None => format!("{generic}_{bot}"),
    }
}

/// Discover bot folders: immediate subdirectories of `base` that contain
/// the generic executable. Returned sorted for stable ordering.
pub fn scan_bots(base: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(base).map_err(|e| BotherdError::io_with_path(e, base))?;
    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| BotherdError::io_with_path(e, base))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if path.join(SupervisorConfig::GENERIC_EXE_NAME).is_file() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                found.push(name.to_string());
            }
        }
    }
    found.sort();
    debug!(base = %base.display(), count = found.len(), "Scanned bot folders");
    Ok(found)
}
