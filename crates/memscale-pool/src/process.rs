//! Signal delivery to worker processes.
//!
//! Two urgencies map to two Unix signals: SIGTERM asks a worker to
//! finish in-flight work, SIGKILL does not ask.

use std::io;

/// Request a cooperative stop.
pub(crate) fn send_term(pid: u32) -> io::Result<()> {
    send(pid, libc::SIGTERM)
}

/// Force termination.
pub(crate) fn send_kill(pid: u32) -> io::Result<()> {
    send(pid, libc::SIGKILL)
}

fn send(pid: u32, signal: i32) -> io::Result<()> {
    // SAFETY: plain kill(2) call with a pid we spawned ourselves.
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
