//! botherd-core: headless supervisor for fleets of bot worker
//! executables.
//!
//! Each bot is an external executable living in its own folder under a
//! common base directory, every one shipped under the same generic file
//! name. The supervisor launches bots under a per-bot tagged name so the
//! OS process table can tell them apart, captures their console output
//! into bounded buffers, schedules periodic restarts, and reconciles its
//! records against the real process table.
//!
//! The main entry point is [`BotSupervisor`]:
//!
//! ```no_run
//! use botherd_core::BotSupervisor;
//!
//! # async fn demo() -> botherd_core::Result<()> {
//! let sup = BotSupervisor::from_config_file("bot_config.json".as_ref())?;
//! sup.start("alpha", false);
//! for (name, status) in sup.status() {
//!     println!("{name}: running={}", status.running);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Liveness is always decided by scanning the process table for the
//! bot's tagged executable name; the registry's recorded pid is
//! bookkeeping, never the oracle.

pub mod config;
pub mod error;
pub mod process;
pub mod registry;

pub use config::{scan_bots, tagged_exe_name, Settings, SupervisorConfig};
pub use error::{BotherdError, Result};
pub use process::{format_uptime, BotStatus, BotSupervisor};
pub use registry::{BotSnapshot, ConsoleMode, ProcessRegistry};
