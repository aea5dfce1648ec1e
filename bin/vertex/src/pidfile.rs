//! Pid-file management for the `start`/`stop`/`restart`/`reload`/`status`
//! signal-dispatch relationship described in §6.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("pid file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("pid file did not contain a valid process id")]
    Malformed,
    #[error("no running daemon found (pid file missing at {0})")]
    NotRunning(String),
}

pub fn write(path: &Path, pid: u32) -> Result<(), PidFileError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, pid.to_string())?;
    Ok(())
}

pub fn read(path: &Path) -> Result<u32, PidFileError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|_| PidFileError::NotRunning(path.display().to_string()))?;
    raw.trim().parse().map_err(|_| PidFileError::Malformed)
}

pub fn remove(path: &Path) {
    let _ = std::fs::remove_file(path);
}

/// Sends `signal` (a `libc::SIG*` constant) to the daemon named by the pid
/// file at `path`.
pub fn send_signal(path: &Path, signal: i32) -> Result<(), PidFileError> {
    let pid = read(path)?;
    // SAFETY: `pid` is a plain process id read back from our own pid file;
    // `kill` with a valid signal number has no memory-safety implications.
    let result = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if result != 0 {
        return Err(PidFileError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}
