//! In-memory record of per-bot runtime state.
//!
//! The registry is bookkeeping only: the OS process table stays the
//! source of truth for liveness. Lock discipline: the map mutex guards
//! in-memory mutation and is never held across spawn, kill, rename, or
//! process-table scans.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tokio::process::Child;
use tokio::sync::mpsc;

use crate::config::SupervisorConfig;

/// Console disposition of a bot process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleMode {
    /// Visible console window, stdio inherited.
    Windowed,
    /// Hidden console, stdout/stderr piped into the capture readers.
    Captured,
    /// Not running.
    None,
}

/// Mutable per-bot state. Internal to the crate; callers see
/// [`BotSnapshot`] projections.
#[derive(Debug, Default)]
pub(crate) struct RuntimeState {
    pub pid: Option<u32>,
    pub started_at: Option<Instant>,
    pub frozen_uptime_secs: u64,
    pub console_mode: Option<ConsoleMode>,
    pub output_buffer: VecDeque<String>,
    pub output_tx: Option<mpsc::Sender<String>>,
    pub child: Option<Child>,
}

impl RuntimeState {
    /// Append a captured line, evicting the oldest once the buffer is
    /// full, and offer it to the live delivery channel without blocking.
    pub fn push_line(&mut self, line: String) {
        if self.output_buffer.len() >= SupervisorConfig::OUTPUT_BUFFER_LINES {
            self.output_buffer.pop_front();
        }
        if let Some(tx) = &self.output_tx {
            // Full or disconnected channel just drops the line; the
            // buffer remains the authoritative history.
            let _ = tx.try_send(line.clone());
        }
        self.output_buffer.push_back(line);
    }

    /// Transition to the stopped state: freeze uptime, clear the process
    /// identity and the delivery channel. The output buffer survives so
    /// the last lines stay inspectable.
    pub fn mark_stopped(&mut self) {
        if let Some(started) = self.started_at {
            self.frozen_uptime_secs = started.elapsed().as_secs();
        }
        self.pid = None;
        self.started_at = None;
        self.console_mode = None;
        self.output_tx = None;
        self.child = None;
    }

    fn snapshot(&self) -> BotSnapshot {
        BotSnapshot {
            pid: self.pid,
            uptime_secs: self
                .started_at
                .map(|t| t.elapsed().as_secs())
                .unwrap_or(self.frozen_uptime_secs),
            console_mode: self.console_mode.unwrap_or(ConsoleMode::None),
            output_buffer: self.output_buffer.iter().cloned().collect(),
        }
    }
}

/// Read-only projection of a bot's runtime state. The child handle and
/// the channel sender are deliberately not part of it.
#[derive(Debug, Clone)]
pub struct BotSnapshot {
    pub pid: Option<u32>,
    /// Live uptime while running, frozen final uptime after a stop.
    pub uptime_secs: u64,
    pub console_mode: ConsoleMode,
    pub output_buffer: Vec<String>,
}

impl BotSnapshot {
    pub fn is_running(&self) -> bool {
        self.pid.is_some()
    }
}

/// Mutex-guarded map of bot name to runtime state.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    inner: Mutex<HashMap<String, RuntimeState>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RuntimeState>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a mutation to the bot's state, creating the entry if absent.
    pub(crate) fn upsert<F>(&self, bot: &str, mutate: F)
    where
        F: FnOnce(&mut RuntimeState),
    {
        let mut map = self.lock();
        mutate(map.entry(bot.to_string()).or_default());
    }

    /// Apply a closure to the bot's state if an entry exists.
    pub(crate) fn with_entry<F, R>(&self, bot: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut RuntimeState) -> R,
    {
        let mut map = self.lock();
        map.get_mut(bot).map(f)
    }

    /// Snapshot of a single bot.
    pub fn get(&self, bot: &str) -> Option<BotSnapshot> {
        let map = self.lock();
        map.get(bot).map(RuntimeState::snapshot)
    }

    /// Drop a bot's entry entirely.
    pub fn remove(&self, bot: &str) {
        let mut map = self.lock();
        map.remove(bot);
    }

    /// Defensive copy of the whole registry.
    pub fn snapshot(&self) -> BTreeMap<String, BotSnapshot> {
        let map = self.lock();
        map.iter()
            .map(|(name, state)| (name.clone(), state.snapshot()))
            .collect()
    }

    /// Names of bots currently holding a child handle, i.e. those the
    /// exit reconciliation pass has to check.
    pub(crate) fn tracked_names(&self) -> Vec<String> {
        let map = self.lock();
        map.iter()
            .filter(|(_, state)| state.child.is_some())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Take a bot's child handle out of the registry so it can be waited
    /// on without holding the lock. Pair with [`Self::restore_child`].
    pub(crate) fn take_child(&self, bot: &str) -> Option<Child> {
        let mut map = self.lock();
        map.get_mut(bot).and_then(|state| state.child.take())
    }

    /// Put a still-running child handle back.
    pub(crate) fn restore_child(&self, bot: &str, child: Child) {
        let mut map = self.lock();
        if let Some(state) = map.get_mut(bot) {
            state.child = Some(child);
        }
    }
}
