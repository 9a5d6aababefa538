//! Signal-driven state flags (§4.7).
//!
//! Every flag here is a single lock-free word written only from a signal handler and read only
//! from the master or worker main loop. Handlers are kept branchless — a signal sets exactly one
//! atomic and returns — so they stay async-signal-safe regardless of what the rest of the crate
//! is doing. All *decisions* happen later, in [`crate::master`] and [`crate::worker`].
//!
//! A single process only ever plays one role (master or worker) at a time, so the master and
//! worker loops share these statics rather than each needing their own: the meaning of
//! `stop_requested` ("a graceful-stop signal arrived at this process") is identical whether this
//! process happens to be the master translating it into a broadcast, or a worker translating it
//! into "stop accepting".

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::Error;

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);
static EXIT_REQUESTED: AtomicBool = AtomicBool::new(false);
static CHILD_EXITED: AtomicBool = AtomicBool::new(false);
static LOG_REOPEN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_graceful_stop(_: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn on_immediate_exit(_: libc::c_int) {
    EXIT_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn on_child_exited(_: libc::c_int) {
    CHILD_EXITED.store(true, Ordering::SeqCst);
}

extern "C" fn on_log_reopen(_: libc::c_int) {
    LOG_REOPEN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Install the master's signal handlers: graceful stop, immediate exit, child-exited, and log
/// reopen.
pub fn install_master_handlers() -> Result<(), Error> {
    install(Signal::SIGTERM, on_graceful_stop)?;
    install(Signal::SIGQUIT, on_immediate_exit)?;
    install(Signal::SIGCHLD, on_child_exited)?;
    install(Signal::SIGUSR1, on_log_reopen)?;
    Ok(())
}

/// Install a worker's signal handlers. Workers do not reap children, so SIGCHLD is left at its
/// default disposition.
pub fn install_worker_handlers() -> Result<(), Error> {
    install(Signal::SIGTERM, on_graceful_stop)?;
    install(Signal::SIGQUIT, on_immediate_exit)?;
    install(Signal::SIGUSR1, on_log_reopen)?;
    Ok(())
}

fn install(sig: Signal, handler: extern "C" fn(libc::c_int)) -> Result<(), Error> {
    let action = SigAction::new(SigHandler::Handler(handler), SaFlags::empty(), SigSet::empty());
    // SAFETY: the handler only stores to a `static AtomicBool`, which is signal-safe.
    unsafe { signal::sigaction(sig, &action) }.map_err(Error::from)?;
    Ok(())
}

/// A freshly forked worker inherits the master's flag values (they live in normal, per-process
/// memory, not shared memory). Call this immediately after `fork()` in the child so a stop/exit
/// signal the master had already observed doesn't leak into the new worker's state.
pub fn reset_after_fork() {
    STOP_REQUESTED.store(false, Ordering::SeqCst);
    EXIT_REQUESTED.store(false, Ordering::SeqCst);
    CHILD_EXITED.store(false, Ordering::SeqCst);
    LOG_REOPEN_REQUESTED.store(false, Ordering::SeqCst);
}

/// Has a graceful-stop signal arrived at this process?
pub fn stop_requested() -> bool {
    STOP_REQUESTED.load(Ordering::SeqCst)
}

/// Has an immediate-exit signal arrived at this process?
pub fn exit_requested() -> bool {
    EXIT_REQUESTED.load(Ordering::SeqCst)
}

/// Consume ("take") the child-exited flag: returns whether it was set, and clears it. Used by the
/// master loop, which then drains all reapable children with `waitpid(WNOHANG)` in one go —
/// SIGCHLD delivery can coalesce, so one flag observation may correspond to several exits.
pub fn take_child_exited() -> bool {
    CHILD_EXITED.swap(false, Ordering::SeqCst)
}

/// Consume the log-reopen flag.
pub fn take_log_reopen_requested() -> bool {
    LOG_REOPEN_REQUESTED.swap(false, Ordering::SeqCst)
}
