//! Process lifecycle machinery: launching, output capture, restart
//! scheduling, liveness monitoring, and the supervisor that ties them
//! together.

pub mod capture;
pub mod launcher;
pub mod monitor;
pub mod scheduler;
pub mod supervisor;

pub use capture::OutputCapture;
pub use launcher::{LaunchHandles, ProcessLauncher};
pub use monitor::{format_uptime, BotStatus, StatusMonitor};
pub use scheduler::RestartScheduler;
pub use supervisor::BotSupervisor;
