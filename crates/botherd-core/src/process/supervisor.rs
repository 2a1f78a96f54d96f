//! Fleet lifecycle control.
//!
//! [`BotSupervisor`] is the public face of the crate: it composes the
//! registry, launcher, capture, scheduler, and monitor into the
//! start/kill/restart/status operations callers drive. Per-bot failures
//! are logged and absorbed; a broken bot never takes a batch operation
//! or the supervisor down.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::{scan_bots, Settings, SupervisorConfig};
use crate::error::{BotherdError, Result};
use crate::process::capture::OutputCapture;
use crate::process::launcher::ProcessLauncher;
use crate::process::monitor::{BotStatus, StatusMonitor};
use crate::process::scheduler::RestartScheduler;
use crate::registry::{ConsoleMode, ProcessRegistry};

/// Supervisor for a fleet of bot processes. Cheap to clone; clones share
/// all state.
///
/// Methods must be called from within a tokio runtime: starting a bot
/// spawns background tasks (output readers, the rename-back deferral,
/// restart timers) and panics without one.
#[derive(Clone)]
pub struct BotSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    settings: Arc<RwLock<Settings>>,
    settings_path: Option<PathBuf>,
    registry: Arc<ProcessRegistry>,
    launcher: ProcessLauncher,
    capture: OutputCapture,
    scheduler: RestartScheduler,
    monitor: StatusMonitor,
    /// Receivers created at launch, held until a viewer subscribes.
    pending_rx: Mutex<HashMap<String, mpsc::Receiver<String>>>,
}

impl BotSupervisor {
    pub fn new(settings: Settings) -> Self {
        Self::build(settings, None)
    }

    /// Load settings from a JSON file and build a supervisor bound to it,
    /// so [`Self::save_settings`] writes back to the same place.
    pub fn from_config_file(path: &Path) -> Result<Self> {
        let settings = Settings::load(path)?;
        Ok(Self::build(settings, Some(path.to_path_buf())))
    }

    fn build(settings: Settings, settings_path: Option<PathBuf>) -> Self {
        let settings = Arc::new(RwLock::new(settings));
        let registry = Arc::new(ProcessRegistry::new());
        Self {
            inner: Arc::new(SupervisorInner {
                launcher: ProcessLauncher::new(Arc::clone(&registry), Arc::clone(&settings)),
                capture: OutputCapture::new(Arc::clone(&registry)),
                scheduler: RestartScheduler::new(),
                monitor: StatusMonitor::new(Arc::clone(&registry), Arc::clone(&settings)),
                registry,
                settings,
                settings_path,
                pending_rx: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> Settings {
        self.inner
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the settings document.
    pub fn set_settings(&self, settings: Settings) {
        *self
            .inner
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner) = settings;
    }

    /// Persist the current settings to the bound config file.
    pub fn save_settings(&self) -> Result<()> {
        let path = self
            .inner
            .settings_path
            .as_ref()
            .ok_or_else(|| BotherdError::Config {
                message: "supervisor was built without a config file".to_string(),
            })?;
        self.settings().save(path)
    }

    /// Rediscover bot folders under the base directory and update the
    /// known-bot list. Returns the discovered names.
    pub fn rescan(&self) -> Result<Vec<String>> {
        let base = self.settings().base_directory;
        let found = scan_bots(&base)?;
        {
            let mut settings = self
                .inner
                .settings
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            settings.bot_folders = found.clone();
        }
        Ok(found)
    }

    /// Start a bot. Returns `false` if it is already running or the
    /// launch failed; failures are logged, not raised.
    pub fn start(&self, bot: &str, visible: bool) -> bool {
        if let Some(pid) = self.inner.monitor.running_pid(bot) {
            info!(bot = %bot, pid, "Already running, not starting a second instance");
            return false;
        }

        let handles = match self.inner.launcher.start(bot, visible) {
            Ok(handles) => handles,
            Err(e) => {
                error!(bot = %bot, error = %e, "Failed to start bot");
                return false;
            }
        };

        {
            let mut pending = self
                .inner
                .pending_rx
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            pending.insert(bot.to_string(), handles.output_rx);
        }
        if handles.console_mode == ConsoleMode::Captured {
            self.inner.capture.attach(bot, handles.stdout, handles.stderr);
        }

        let settings = self.settings();
        if settings.auto_restart {
            let interval = Duration::from_secs(settings.restart_interval_secs);
            let sup = self.clone();
            let name = bot.to_string();
            self.inner.scheduler.schedule(bot, interval, async move {
                info!(bot = %name, "Scheduled restart firing");
                sup.restart(&name).await;
            });
        }
        true
    }

    /// Kill every process matching the bot's tagged name and clean up
    /// the bookkeeping. Idempotent; returns whether anything was killed.
    pub fn kill(&self, bot: &str) -> bool {
        let killed = self.inner.monitor.kill_matching(bot) > 0;

        // Cleanup runs regardless of whether a process was found, so a
        // kill after a self-death still disarms the timer and freezes
        // the record.
        self.inner.scheduler.cancel(bot);
        self.inner.registry.with_entry(bot, |state| state.mark_stopped());
        {
            let mut pending = self
                .inner
                .pending_rx
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            pending.remove(bot);
        }

        if !killed {
            info!(bot = %bot, "Kill requested but no matching process found");
        }
        killed
    }

    /// Kill, wait for the process table to settle, start again hidden.
    pub async fn restart(&self, bot: &str) -> bool {
        self.kill(bot);
        tokio::time::sleep(SupervisorConfig::RESTART_SETTLE_DELAY).await;
        self.start(bot, false)
    }

    /// Restart the whole working set: kill sweep, settle, start sweep.
    /// Returns how many bots came back up.
    pub async fn restart_all(&self) -> usize {
        let bots = self.settings().all_bots;
        if bots.is_empty() {
            warn!("Restart-all requested with an empty working set");
            return 0;
        }
        for bot in &bots {
            self.kill(bot);
        }
        tokio::time::sleep(SupervisorConfig::RESTART_ALL_SETTLE_DELAY).await;

        let mut started = 0;
        for bot in &bots {
            if self.start(bot, false) {
                started += 1;
            }
        }
        info!(started, total = bots.len(), "Restarted working set");
        started
    }

    /// Kill the whole working set. Returns how many bots had a process
    /// actually killed.
    pub fn kill_all(&self) -> usize {
        let bots = self.settings().all_bots;
        let mut killed = 0;
        for bot in &bots {
            if self.kill(bot) {
                killed += 1;
            }
        }
        info!(killed, total = bots.len(), "Killed working set");
        killed
    }

    /// Fleet status report keyed by bot name.
    pub fn status(&self) -> BTreeMap<String, BotStatus> {
        self.inner.monitor.status()
    }

    /// The bot's retained console lines, oldest first.
    pub fn recent_output(&self, bot: &str) -> Vec<String> {
        self.inner
            .registry
            .get(bot)
            .map(|snap| snap.output_buffer)
            .unwrap_or_default()
    }

    /// Claim the bot's live output channel. The first call after a start
    /// gets the channel created at launch (including lines captured
    /// before anyone subscribed); later calls install a fresh channel,
    /// displacing the previous viewer. `None` if the bot has no active
    /// capture.
    pub fn subscribe_output(&self, bot: &str) -> Option<mpsc::Receiver<String>> {
        {
            let mut pending = self
                .inner
                .pending_rx
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(rx) = pending.remove(bot) {
                return Some(rx);
            }
        }
        self.inner
            .registry
            .with_entry(bot, |state| {
                if state.output_tx.is_none() {
                    return None;
                }
                let (tx, rx) = mpsc::channel(SupervisorConfig::OUTPUT_QUEUE_CAPACITY);
                state.output_tx = Some(tx);
                Some(rx)
            })
            .flatten()
    }

    /// Reconcile recorded state with the real process table. Drive this
    /// on a short cadence ([`SupervisorConfig::STATUS_POLL_INTERVAL`]).
    pub fn poll(&self) {
        self.inner.monitor.poll();
    }

    /// Truncate a bot's console log file, creating the log directory if
    /// it does not exist yet.
    pub fn reset_console_log(&self, bot: &str) -> Result<()> {
        let path = self.settings().console_log_path(bot);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| BotherdError::io_with_path(e, parent))?;
        }
        fs::write(&path, b"").map_err(|e| BotherdError::io_with_path(e, &path))?;
        info!(bot = %bot, path = %path.display(), "Reset console log");
        Ok(())
    }
}
