//! The master supervisor loop (§4.6) and worker lifecycle driver (§4.5).
//!
//! The master's own logic is split into a pure decision function, [`next_action`], and the I/O
//! it triggers (`fork`, `waitpid`, `kill`). Keeping the decision table free of side effects is
//! what lets it be unit tested without ever forking a real process — a real fork/signal
//! end-to-end run is left to the `#[ignore]`-marked integration tests.

use std::net::TcpListener as StdTcpListener;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use crate::accept_lock::AcceptLock;
use crate::config::Config;
use crate::error::Error;
use crate::logging::FileLogger;
use crate::registration::Registration;
use crate::signals::{self, take_child_exited};
use crate::worker;
use crate::worker_table::WorkerTable;

/// How the master loop should spend its next tick. Pure function of observable state, so it can
/// be tested without any real forking or signal delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterAction {
    /// At least one worker slot is vacant and no shutdown has been requested: fork a new worker.
    SpawnWorker { slot: usize },
    /// An immediate-exit signal arrived: kill every live worker and stop.
    ExitNow,
    /// A graceful-stop signal arrived: ask every live worker to stop accepting, then wait.
    BroadcastStop,
    /// Nothing to do this tick besides reap any exited children and sleep.
    Idle,
    /// Every worker has exited following a stop/exit request: the master may now return.
    Done,
}

/// Master-loop phase, tracked across ticks so a stop broadcast is only ever sent once and so
/// [`next_action`] can tell "draining" apart from "steady state".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPhase {
    /// Normal operation: replace workers that die, no shutdown pending.
    Running,
    /// A graceful stop has been broadcast; waiting for workers to exit on their own.
    Stopping,
    /// An immediate exit has been requested or ordered; workers are being killed outright.
    Exiting,
}

/// Decide the next action for a given observed state. `worker_count` is the number of currently
/// live worker slots (§4.2's `WorkerTable::live_count`); `configured` is how many workers should
/// exist in steady state.
pub fn next_action(phase: StopPhase, worker_count: usize, configured: usize, vacant_slot: Option<usize>) -> MasterAction {
    match phase {
        StopPhase::Exiting => {
            if worker_count == 0 {
                MasterAction::Done
            } else {
                MasterAction::ExitNow
            }
        }
        StopPhase::Stopping => {
            if worker_count == 0 {
                MasterAction::Done
            } else {
                MasterAction::BroadcastStop
            }
        }
        StopPhase::Running => match vacant_slot {
            Some(slot) if worker_count < configured => MasterAction::SpawnWorker { slot },
            _ => MasterAction::Idle,
        },
    }
}

/// Master runtime state: the shared accept lock and listener (inherited by every forked worker),
/// the worker table, and the current stop phase.
pub struct MasterRuntimeState {
    table: WorkerTable,
    accept_lock: Rc<AcceptLock>,
    phase: StopPhase,
}

impl MasterRuntimeState {
    /// Build master state: allocate the shared accept lock and size the worker table from
    /// configuration. Does not fork anything yet.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let cpu_count = num_cpus();
        Ok(MasterRuntimeState {
            table: WorkerTable::new(config.worker_processes as usize, cpu_count),
            accept_lock: Rc::new(AcceptLock::new()?),
            phase: StopPhase::Running,
        })
    }
}

fn num_cpus() -> usize {
    core_affinity::get_core_ids().map(|ids| ids.len()).unwrap_or(1)
}

/// Run the master supervisor loop until every worker has exited following a shutdown request.
/// `listener` is the single shared listening socket, already bound; `handler` is the
/// application's per-connection handler registered via [`crate::register_project`].
pub fn run_master(
    config: &Config,
    listener: StdTcpListener,
    registration: &Registration,
    logger: Option<Arc<FileLogger>>,
) -> Result<(), Error> {
    signals::install_master_handlers()?;
    let mut state = MasterRuntimeState::new(config)?;

    loop {
        reap_exited_children(&mut state.table);

        if signals::exit_requested() {
            state.phase = StopPhase::Exiting;
        } else if signals::stop_requested() && state.phase == StopPhase::Running {
            state.phase = StopPhase::Stopping;
        }
        if signals::take_log_reopen_requested() {
            if let Some(logger) = &logger {
                match logger.reopen() {
                    Ok(()) => info!("log reopened"),
                    Err(e) => warn!("failed to reopen log file: {e}"),
                }
            }
            // Each worker process has its own copy of LOG_REOPEN_REQUESTED after fork, so a
            // SIGUSR1 delivered only to the master never reaches them on its own: re-signal
            // every live worker so each one reopens its own log file handle in turn.
            state.table.broadcast(nix::sys::signal::Signal::SIGUSR1);
        }

        let action = next_action(
            state.phase,
            state.table.live_count(),
            state.table.len(),
            state.table.find_vacant(),
        );

        match action {
            MasterAction::SpawnWorker { slot } => {
                spawn_worker(&mut state, slot, &listener, config, registration, logger.clone())?;
            }
            MasterAction::BroadcastStop => {
                // `kill` on an already-stopping worker is harmless, so resending each tick
                // rather than tracking "already sent" keeps this branch, and its tests, simple.
                state.table.broadcast(nix::sys::signal::Signal::SIGTERM);
            }
            MasterAction::ExitNow => {
                warn!("broadcasting immediate exit to all workers");
                state.table.broadcast(nix::sys::signal::Signal::SIGQUIT);
            }
            MasterAction::Idle => {}
            MasterAction::Done => {
                info!("all workers exited, master shutting down");
                return Ok(());
            }
        }

        std::thread::sleep(Duration::from_millis(10));
    }
}

fn spawn_worker(
    state: &mut MasterRuntimeState,
    slot: usize,
    listener: &StdTcpListener,
    config: &Config,
    registration: &Registration,
    logger: Option<Arc<FileLogger>>,
) -> Result<(), Error> {
    let listener_clone = listener.try_clone().map_err(|source| Error::InitHook("listener clone", source))?;
    // SAFETY: called from a single-threaded master before any tokio runtime exists in this
    // process; the child immediately resets signal flags and installs its own handlers.
    match unsafe { fork() }.map_err(Error::Process)? {
        ForkResult::Parent { child } => {
            state.table.record_child(slot, child);
            info!("spawned worker pid {child} in slot {slot}");
            Ok(())
        }
        ForkResult::Child => {
            let accept_lock = state.accept_lock.clone();
            if let Some(worker_init) = &registration.worker_init {
                if let Err(source) = worker_init() {
                    warn!("worker slot {slot} init hook failed: {source}");
                    std::process::exit(1);
                }
            }
            let exit_code = match worker::run_worker(
                slot,
                listener_clone,
                accept_lock,
                config,
                registration.request_handler.clone(),
                logger,
            ) {
                Ok(()) => 0,
                Err(e) => {
                    warn!("worker slot {slot} exited with error: {e}");
                    1
                }
            };
            // A worker must never fall back into the master's own loop or run its `Drop`s
            // (which would `munmap` shared memory the master still needs): exit directly.
            std::process::exit(exit_code);
        }
    }
}

/// Drain `SIGCHLD`-flagged exits with `waitpid(WNOHANG)`, clearing the corresponding worker table
/// slots. SIGCHLD delivery can coalesce multiple exits into one signal, so this loops until
/// `waitpid` reports nothing left to reap rather than reaping once per flag observation.
fn reap_exited_children(table: &mut WorkerTable) {
    if !take_child_exited() {
        return;
    }
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => {
                info!("worker pid {pid} exited with status {code}");
                table.clear_by_pid(pid);
            }
            Ok(WaitStatus::Signaled(pid, sig, _)) => {
                warn!("worker pid {pid} terminated by signal {sig:?}");
                table.clear_by_pid(pid);
            }
            Ok(WaitStatus::StillAlive) => break,
            Ok(_) => continue,
            Err(nix::Error::ECHILD) => break,
            Err(e) => {
                warn!("waitpid failed: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_with_vacant_slot_spawns() {
        let action = next_action(StopPhase::Running, 2, 4, Some(2));
        assert_eq!(action, MasterAction::SpawnWorker { slot: 2 });
    }

    #[test]
    fn running_at_full_strength_is_idle() {
        let action = next_action(StopPhase::Running, 4, 4, None);
        assert_eq!(action, MasterAction::Idle);
    }

    #[test]
    fn stopping_with_live_workers_rebroadcasts_not_done() {
        let action = next_action(StopPhase::Stopping, 3, 4, Some(1));
        assert_eq!(action, MasterAction::BroadcastStop);
    }

    #[test]
    fn stopping_with_no_live_workers_is_done() {
        let action = next_action(StopPhase::Stopping, 0, 4, Some(0));
        assert_eq!(action, MasterAction::Done);
    }

    #[test]
    fn exiting_with_live_workers_sends_exit_now() {
        let action = next_action(StopPhase::Exiting, 2, 4, None);
        assert_eq!(action, MasterAction::ExitNow);
    }

    #[test]
    fn exiting_with_no_live_workers_is_done() {
        let action = next_action(StopPhase::Exiting, 0, 4, None);
        assert_eq!(action, MasterAction::Done);
    }

    #[test]
    fn running_never_spawns_past_configured_count() {
        // No vacant slot reported even though worker_count < configured should not happen in
        // practice (a vacant slot always exists if live_count < len), but the decision function
        // must still not spawn without one.
        let action = next_action(StopPhase::Running, 2, 4, None);
        assert_eq!(action, MasterAction::Idle);
    }
}
