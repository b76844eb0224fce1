//! Rustant background daemon.
//!
//! Runs Rustant as a persistent background process with IPC, job queue,
//! warm MoE cache, and active session. Supports auto-start via launchd (macOS)
//! or systemd (Linux).

pub mod ipc;
pub mod lifecycle;
pub mod process;

pub use ipc::{IpcMessage, IpcServer};
pub use lifecycle::{check_daemon_running, DaemonState};
#[cfg(target_os = "macos")]
pub use lifecycle::{install_launchd_plist, uninstall_launchd_plist};
#[cfg(target_os = "linux")]
pub use lifecycle::{install_systemd_service, uninstall_systemd_service};
pub use process::RustantDaemon;
