//! Daemonization collaborator (spec §10.5).
//!
//! A simplified single-fork detach: fork once, the parent waits on a pipe
//! for the child to report it is alive (or for the pipe to close if the
//! child dies first) and then exits; the child calls `setsid` to become a
//! session leader detached from the controlling terminal and continues into
//! the outer loop. `--once` mode skips this entirely (spec §10.3).
//!
//! This is deliberately simpler than the original program's double-fork
//! dance: that protocol existed to let `main`'s caller block on the
//! downstream Supervisor's own readiness handshake, which lives inside the
//! Supervisor and is out of scope here (spec §10.5).

use std::io::Read;
use std::os::fd::{FromRawFd, IntoRawFd};

use anyhow::{Context, Result};
use log::debug;
use nix::unistd::{fork, pipe, setsid, ForkResult};

/// Detach from the invoking process. Returns once running as the detached
/// child; the original process that called this never returns from it (it
/// exits internally once it has observed the child come up).
pub fn daemonize() -> Result<()> {
    let (read_fd, write_fd) = pipe().context("creating daemonize handshake pipe")?;

    match unsafe { fork() }.context("fork() failed")? {
        ForkResult::Parent { .. } => {
            drop(write_fd);
            let mut reader = unsafe { std::fs::File::from_raw_fd(read_fd.into_raw_fd()) };
            let mut buf = [0u8; 1];
            // Either we read the child's ready byte, or the read returns 0
            // because the child died and closed its end; either way, the
            // parent's job here is done.
            let _ = reader.read(&mut buf);
            std::process::exit(0);
        }
        ForkResult::Child => {
            drop(read_fd);
            setsid().context("setsid() failed")?;
            let mut writer = unsafe { std::fs::File::from_raw_fd(write_fd.into_raw_fd()) };
            use std::io::Write;
            let _ = writer.write_all(&[1]);
            drop(writer);
            debug!("daemonized, pid {}", std::process::id());
            Ok(())
        }
    }
}
