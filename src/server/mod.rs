//! Persistent matcher server for warm lookups
//!
//! Keeps an index and its symbol-table cache loaded so repeated find / dump
//! calls skip the cold start.
//!
//! Architecture:
//! - daemon: loads the index, listens on a Unix socket, answers requests
//! - client: connects to the socket, sends requests, reads responses
//! - fallback: without a daemon the CLI opens the index directly

mod client;
pub mod daemon;
pub mod protocol;

pub use client::{ClientError, ClientResult, IndexClient};
pub use protocol::{Problem, Request, Response, StatusResponse};

use std::path::PathBuf;

const SOCKET_NAME: &str = "libcsearch.sock";
const PID_NAME: &str = "libcsearch.pid";

/// Per-user runtime path for `file_name`
fn runtime_path(file_name: &str) -> PathBuf {
    // XDG_RUNTIME_DIR is per-user and tmpfs-backed
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(file_name);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".local").join("run").join(file_name);
    }

    // Last resort: /tmp with user ID
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/{}-{}", uid, file_name))
}

/// Get the socket path for the server
pub fn get_socket_path() -> PathBuf {
    runtime_path(SOCKET_NAME)
}

/// Get the PID file path for the daemon
pub fn get_pid_path() -> PathBuf {
    runtime_path(PID_NAME)
}

/// Check if the daemon is running
pub fn is_daemon_running() -> bool {
    let Ok(pid_str) = std::fs::read_to_string(get_pid_path()) else {
        return false;
    };

    match pid_str.trim().parse::<i32>() {
        // kill(pid, 0) probes for existence without signalling
        Ok(pid) => unsafe { libc::kill(pid, 0) == 0 },
        Err(_) => false,
    }
}
