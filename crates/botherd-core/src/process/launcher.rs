//! Process launching with name disambiguation.
//!
//! Every bot ships the same generic executable name, so a bare spawn
//! would make bots indistinguishable in the process table. Before the
//! spawn, the executable is renamed to a per-bot tagged name; a deferred
//! task renames it back a few seconds later, once the OS has the tagged
//! name on record. The rename step is the critical section: two
//! concurrent launches in the same folder must not interleave their
//! renames, so it runs under a dedicated mutex.

use std::fs;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{Settings, SupervisorConfig};
use crate::error::{BotherdError, Result};
use crate::registry::{ConsoleMode, ProcessRegistry};

/// CREATE_NO_WINDOW: keep hidden-console children from allocating a
/// visible console on Windows.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// What a successful launch hands back to the caller: the identity of
/// the new process plus the capture-side ends. The child handle itself
/// is already parked in the registry for exit polling.
#[derive(Debug)]
pub struct LaunchHandles {
    pub pid: u32,
    pub console_mode: ConsoleMode,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
    /// Receiver of the bot's fresh live-output channel.
    pub output_rx: mpsc::Receiver<String>,
}

pub struct ProcessLauncher {
    registry: Arc<ProcessRegistry>,
    settings: Arc<RwLock<Settings>>,
    rename_lock: Mutex<()>,
}

impl ProcessLauncher {
    pub fn new(registry: Arc<ProcessRegistry>, settings: Arc<RwLock<Settings>>) -> Self {
        Self {
            registry,
            settings,
            rename_lock: Mutex::new(()),
        }
    }

    /// Launch a bot: tag the executable, spawn it from its own folder,
    /// record it in the registry, and schedule the rename-back.
    ///
    /// Callers are expected to have consulted the liveness oracle first;
    /// this does no duplicate-instance check of its own.
    pub fn start(&self, bot: &str, visible: bool) -> Result<LaunchHandles> {
        let settings = self
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let bot_dir = settings.bot_dir(bot);
        let generic = settings.generic_exe_path(bot);
        let tagged = settings.tagged_exe_path(bot);

        {
            let _guard = self.rename_lock.lock().unwrap_or_else(PoisonError::into_inner);
            if generic.exists() {
                if tagged.exists() {
                    // Stale tag from an earlier crash; the fresh generic
                    // copy wins.
                    fs::remove_file(&tagged).map_err(|e| BotherdError::RenameConflict {
                        from: generic.clone(),
                        to: tagged.clone(),
                        reason: format!("failed to remove stale tagged file: {e}"),
                    })?;
                }
                fs::rename(&generic, &tagged).map_err(|e| BotherdError::RenameConflict {
                    from: generic.clone(),
                    to: tagged.clone(),
                    reason: e.to_string(),
                })?;
                debug!(bot = %bot, "Tagged executable for launch");
            } else if !tagged.exists() {
                return Err(BotherdError::ExecutableNotFound(generic));
            }
            // Only the tagged file existing is fine: a previous run died
            // before its rename-back fired.
        }

        let console_mode = if visible {
            ConsoleMode::Windowed
        } else {
            ConsoleMode::Captured
        };

        let mut cmd = Command::new(&tagged);
        cmd.current_dir(&bot_dir).stdin(Stdio::null());
        match console_mode {
            ConsoleMode::Windowed => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            _ => {
                if settings.capture_output {
                    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
                } else {
                    cmd.stdout(Stdio::null()).stderr(Stdio::null());
                }
                // Hidden means hidden: without this flag a console
                // subsystem child still pops a window.
                #[cfg(windows)]
                cmd.creation_flags(CREATE_NO_WINDOW);
            }
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                // Untag so the folder is launchable again right away.
                if let Err(re) = fs::rename(&tagged, &generic) {
                    warn!(bot = %bot, error = %re, "Could not restore executable name after failed spawn");
                }
                return Err(BotherdError::Spawn {
                    bot: bot.to_string(),
                    message: e.to_string(),
                });
            }
        };

        let pid = child.id().ok_or_else(|| BotherdError::Spawn {
            bot: bot.to_string(),
            message: "spawned process has no pid".to_string(),
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (output_tx, output_rx) = mpsc::channel(SupervisorConfig::OUTPUT_QUEUE_CAPACITY);
        self.registry.upsert(bot, |state| {
            state.pid = Some(pid);
            state.started_at = Some(std::time::Instant::now());
            state.frozen_uptime_secs = 0;
            state.console_mode = Some(console_mode);
            state.output_tx = Some(output_tx);
            state.child = Some(child);
        });

        schedule_rename_back(bot.to_string(), tagged, generic);
        info!(bot = %bot, pid, mode = ?console_mode, "Started bot");

        Ok(LaunchHandles {
            pid,
            console_mode,
            stdout,
            stderr,
            output_rx,
        })
    }
}

/// Restore the generic executable name after the OS has recorded the
/// tagged one. The file being gone already (bot crashed and cleaned up,
/// or a manual rename) is tolerated.
fn schedule_rename_back(bot: String, tagged: std::path::PathBuf, generic: std::path::PathBuf) {
    tokio::spawn(async move {
        tokio::time::sleep(SupervisorConfig::RENAME_BACK_DELAY).await;
        if !tagged.exists() {
            return;
        }
        match fs::rename(&tagged, &generic) {
            Ok(()) => debug!(bot = %bot, "Restored generic executable name"),
            Err(e) => warn!(bot = %bot, error = %e, "Rename-back failed"),
        }
    });
}
