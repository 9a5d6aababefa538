//! Daemonization (§4.12): the classic double-fork, `setsid`, redirect-stdio-to-`/dev/null`,
//! chdir-to-`/` dance that detaches the master from its controlling terminal.
//!
//! This runs once, before the accept lock, shared memory, and worker table exist, so it has no
//! dependency on anything else in the crate — it only ever touches raw OS primitives.

use std::os::unix::io::AsRawFd;

use nix::unistd::{chdir, dup2, fork, setsid, ForkResult};

use crate::error::Error;

/// Fork twice and detach from the controlling terminal, per the standard daemon(7) recipe:
/// the first fork's parent exits immediately (so the shell regains its prompt), the first
/// fork's child calls `setsid` to shed the controlling terminal, and the second fork's parent
/// also exits so the final process can never reacquire one. Only the second fork's child
/// returns from this function.
pub fn daemonize() -> Result<(), Error> {
    // SAFETY: called before any threads are spawned and before any of the shared state in this
    // crate (shm regions, tokio runtimes) is constructed.
    match unsafe { fork() }.map_err(Error::Daemonize)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid().map_err(Error::Daemonize)?;

    // SAFETY: same constraints as the fork above.
    match unsafe { fork() }.map_err(Error::Daemonize)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    chdir("/").map_err(Error::Daemonize)?;
    redirect_stdio_to_dev_null()?;
    Ok(())
}

fn redirect_stdio_to_dev_null() -> Result<(), Error> {
    let dev_null = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|source| Error::Io {
            path: "/dev/null".into(),
            source,
        })?;
    let fd = dev_null.as_raw_fd();
    for target in [0, 1, 2] {
        if target != fd {
            dup2(fd, target).map_err(Error::Daemonize)?;
        }
    }
    // `dev_null` closes its own fd on drop; the dup'd 0/1/2 descriptors stay open independently.
    Ok(())
}
