//! Liveness oracle and status reporting.
//!
//! Liveness is decided by scanning the OS process table for the bot's
//! tagged executable name, never by the registry's recorded pid. The
//! registry only contributes bookkeeping (uptime, console mode) on top.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::config::{tagged_exe_name, Settings};
use crate::registry::{ConsoleMode, ProcessRegistry};

/// Minimum spacing between full process-table refreshes for status
/// reporting. Liveness checks before start/kill always refresh.
const RESOURCE_REFRESH_TTL: Duration = Duration::from_millis(500);

/// One row of the fleet status report.
#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    pub running: bool,
    pub pid: Option<u32>,
    /// Member of the configured working set.
    pub selected: bool,
    /// Resident set size in bytes, when the process lookup succeeds.
    pub memory_bytes: Option<u64>,
    /// CPU usage percent, when the process lookup succeeds.
    pub cpu_percent: Option<f32>,
    pub console_mode: ConsoleMode,
    /// Live uptime while running, last frozen uptime otherwise.
    pub uptime_secs: u64,
}

pub struct StatusMonitor {
    registry: Arc<ProcessRegistry>,
    settings: Arc<RwLock<Settings>>,
    system: Mutex<System>,
    last_resource_refresh: Mutex<Option<Instant>>,
}

impl StatusMonitor {
    pub fn new(registry: Arc<ProcessRegistry>, settings: Arc<RwLock<Settings>>) -> Self {
        Self {
            registry,
            settings,
            system: Mutex::new(System::new()),
            last_resource_refresh: Mutex::new(None),
        }
    }

    fn settings_snapshot(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names that identify the bot in the process table, lowercased:
    /// the tagged file name and its stem.
    fn match_names(bot: &str) -> [String; 2] {
        let tagged = tagged_exe_name(bot).to_lowercase();
        let stem = tagged
            .strip_suffix(".exe")
            .unwrap_or(&tagged)
            .to_string();
        [tagged, stem]
    }

    /// Scan the process table for the bot's tagged executable name.
    /// Returns the first matching pid. This is the liveness oracle:
    /// a bot is running iff this finds a match.
    pub fn running_pid(&self, bot: &str) -> Option<u32> {
        let names = Self::match_names(bot);
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::All, true);
        for (pid, process) in system.processes() {
            let name = process.name().to_string_lossy().to_lowercase();
            if names.contains(&name) {
                return Some(pid.as_u32());
            }
        }
        None
    }

    /// Kill every process whose name matches the bot's tagged executable.
    /// Returns how many kill signals were delivered.
    pub fn kill_matching(&self, bot: &str) -> usize {
        let names = Self::match_names(bot);
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::All, true);
        let mut killed = 0;
        for (pid, process) in system.processes() {
            let name = process.name().to_string_lossy().to_lowercase();
            if names.contains(&name) {
                if process.kill() {
                    info!(bot = %bot, pid = pid.as_u32(), "Killed process");
                    killed += 1;
                } else {
                    warn!(bot = %bot, pid = pid.as_u32(), "Kill signal not delivered");
                }
            }
        }
        killed
    }

    /// Reconcile recorded state with reality: `try_wait` every tracked
    /// child and transition exited bots to the stopped state. Restart
    /// timers are left alone so a crashed bot still comes back.
    pub fn poll(&self) {
        for bot in self.registry.tracked_names() {
            let Some(mut child) = self.registry.take_child(&bot) else {
                continue;
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!(bot = %bot, status = %status, "Process exited");
                    self.registry.with_entry(&bot, |state| state.mark_stopped());
                }
                Ok(None) => self.registry.restore_child(&bot, child),
                Err(e) => {
                    warn!(bot = %bot, error = %e, "Exit check failed");
                    self.registry.restore_child(&bot, child);
                }
            }
        }
    }

    /// Fleet status: one row per configured bot, liveness from the
    /// process table, resources best-effort.
    pub fn status(&self) -> BTreeMap<String, BotStatus> {
        let settings = self.settings_snapshot();

        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        let mut last = self
            .last_resource_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let stale = last.map(|t| t.elapsed() >= RESOURCE_REFRESH_TTL).unwrap_or(true);
        if stale {
            system.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::new().with_cpu().with_memory(),
            );
            *last = Some(Instant::now());
        }
        drop(last);

        // Index the table once: lowercase name -> (pid, rss, cpu).
        let mut by_name: HashMap<String, (u32, u64, f32)> = HashMap::new();
        for (pid, process) in system.processes() {
            let name = process.name().to_string_lossy().to_lowercase();
            by_name
                .entry(name)
                .or_insert((pid.as_u32(), process.memory(), process.cpu_usage()));
        }
        drop(system);

        let mut report = BTreeMap::new();
        for bot in &settings.bot_folders {
            let names = Self::match_names(bot);
            let hit = names.iter().find_map(|n| by_name.get(n));

            let snap = self.registry.get(bot);
            let (console_mode, uptime_secs) = match &snap {
                Some(s) => (s.console_mode, s.uptime_secs),
                None => (ConsoleMode::None, 0),
            };

            report.insert(
                bot.clone(),
                BotStatus {
                    running: hit.is_some(),
                    pid: hit.map(|(pid, _, _)| *pid),
                    selected: settings.all_bots.contains(bot),
                    memory_bytes: hit.map(|(_, mem, _)| *mem),
                    cpu_percent: hit.map(|(_, _, cpu)| *cpu),
                    console_mode,
                    uptime_secs,
                },
            );
        }
        debug!(bots = report.len(), "Built status report");
        report
    }
}

/// Render an uptime as `HH:MM:SS`.
pub fn format_uptime(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
