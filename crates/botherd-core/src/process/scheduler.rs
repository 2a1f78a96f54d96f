//! Per-bot automatic restart timers.
//!
//! One armed one-shot timer per bot at most. Re-arming replaces the old
//! timer; cancelling is idempotent. The interval measures from the most
//! recent start, so a restarted bot gets a fresh countdown.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Default)]
pub struct RestartScheduler {
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl RestartScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm a one-shot timer for the bot, replacing any previous one.
    pub fn schedule<F>(&self, bot: &str, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });
        let mut timers = self.lock();
        if let Some(old) = timers.insert(bot.to_string(), handle) {
            old.abort();
        }
        debug!(bot = %bot, delay_secs = delay.as_secs(), "Armed restart timer");
    }

    /// Disarm the bot's timer if one is pending. Returns whether a live
    /// timer was cancelled.
    pub fn cancel(&self, bot: &str) -> bool {
        let handle = {
            let mut timers = self.lock();
            timers.remove(bot)
        };
        match handle {
            Some(handle) => {
                let was_live = !handle.is_finished();
                handle.abort();
                if was_live {
                    debug!(bot = %bot, "Cancelled restart timer");
                }
                was_live
            }
            None => false,
        }
    }

    /// Whether the bot currently has a pending timer.
    pub fn is_armed(&self, bot: &str) -> bool {
        let timers = self.lock();
        timers.get(bot).map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Disarm everything. Used on shutdown.
    pub fn cancel_all(&self) {
        let mut timers = self.lock();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }
}
