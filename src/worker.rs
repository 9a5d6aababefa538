//! The worker acceptor loop and connection coroutine (§4.3, §4.4).
//!
//! A worker is one OS process running a single-threaded `tokio` runtime (`Runtime::new_current_thread`)
//! driving a `LocalSet`. That combination plays the role SPEC_FULL.md leaves to an external
//! "coroutine runtime + event loop" collaborator: `spawn_local` tasks are the coroutines, the
//! Tokio reactor is the event loop. Per-connection state therefore never needs to be `Send`, so
//! it is built from `Rc`/`Cell` rather than `Arc`/`Mutex` — there is exactly one OS thread per
//! worker and nothing else ever touches this state.

use std::cell::Cell;
use std::io;
use std::net::TcpListener as StdTcpListener;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::LocalSet;
use tokio::time::sleep;

use crate::accept_lock::AcceptLock;
use crate::config::Config;
use crate::error::Error;
use crate::logging::FileLogger;
use crate::signals;

/// How often the single-worker accept path re-checks the stop/exit flags while idle. Bounds the
/// worst-case latency between a signal arriving and the worker noticing it with nothing else to
/// wake it — the multi-worker path re-checks every tick already, since it never blocks in accept.
const IDLE_STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// The per-connection request handler supplied via [`crate::register_project`]. Plain
/// `Rc<dyn Fn>` with no `Send`/`Sync` bound: it runs only inside the worker process that holds
/// it, on the worker's single OS thread, so there is no cross-thread sharing to prove safe.
pub type RequestHandlerFn = dyn Fn(tokio::net::TcpStream) -> futures_boxed::BoxFuture<'static, ()>;

/// A tiny local stand-in for `futures::future::BoxFuture` so this crate doesn't need to pull in
/// the `futures` umbrella crate just for one type alias.
pub mod futures_boxed {
    use std::future::Future;
    use std::pin::Pin;

    /// A boxed, non-`Send` future — connection handlers live entirely on one worker's thread.
    pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;
}

/// Runtime state private to one worker process: its view of the shared accept lock, its
/// listening socket, and the connection-admission budget described in SPEC_FULL.md's §9 resolved
/// open question.
pub struct WorkerRuntimeState {
    accept_lock: Rc<AcceptLock>,
    listener: TcpListener,
    /// Permits double as the "can this worker accept another connection" budget. A connection
    /// holds one permit for its lifetime; `try_acquire_owned` makes admission atomic with the
    /// capacity check, closing the race a separate `active < max` comparison would have.
    ///
    /// `Arc`, not `Rc`: `Semaphore::try_acquire_owned` takes `self: Arc<Self>`, and the returned
    /// `OwnedSemaphorePermit` is moved into the spawned connection task, so the owned-permit API
    /// is load-bearing here even though nothing about this semaphore crosses an OS thread.
    capacity: Arc<Semaphore>,
    active_connections: Rc<Cell<u32>>,
    single_worker: bool,
}

impl WorkerRuntimeState {
    fn new(accept_lock: Rc<AcceptLock>, listener: TcpListener, max_connections: u32, single_worker: bool) -> Self {
        WorkerRuntimeState {
            accept_lock,
            listener,
            capacity: Arc::new(Semaphore::new(max_connections as usize)),
            active_connections: Rc::new(Cell::new(0)),
            single_worker,
        }
    }
}

/// Decrements the shared connection counter and releases its semaphore permit when the
/// connection's task finishes — including when it finishes via a panic, since neither profile in
/// `Cargo.toml` sets `panic = "abort"` and `Drop` still runs while unwinding.
struct DecrementGuard {
    active_connections: Rc<Cell<u32>>,
}

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.active_connections.set(self.active_connections.get().saturating_sub(1));
    }
}

/// Build the worker's single-threaded runtime, install worker signal handlers, and run the
/// acceptor loop until a stop or exit signal is observed. Returns once the worker has drained
/// (graceful stop) or abandoned (immediate exit) its in-flight connections.
pub fn run_worker(
    slot_index: usize,
    std_listener: StdTcpListener,
    accept_lock: Rc<AcceptLock>,
    config: &Config,
    handler: Rc<RequestHandlerFn>,
    logger: Option<Arc<FileLogger>>,
) -> Result<(), Error> {
    signals::reset_after_fork();
    signals::install_worker_handlers()?;
    pin_to_cpu(slot_index);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|source| Error::InitHook("worker runtime", source))?;
    let local = LocalSet::new();

    std_listener
        .set_nonblocking(true)
        .map_err(|source| Error::InitHook("worker listener nonblocking", source))?;
    let listener = TcpListener::from_std(std_listener)
        .map_err(|source| Error::InitHook("worker listener conversion", source))?;

    let single_worker = config.worker_processes <= 1;
    let state = Rc::new(WorkerRuntimeState::new(
        accept_lock,
        listener,
        config.worker_connections,
        single_worker,
    ));

    local.block_on(&runtime, async move {
        acceptor_loop(state, handler, logger).await;
    });

    info!("worker slot {slot_index} exiting");
    Ok(())
}

fn pin_to_cpu(slot_index: usize) {
    let Some(cores) = core_affinity::get_core_ids() else {
        warn!("core affinity unavailable on this platform, leaving worker unpinned");
        return;
    };
    if cores.is_empty() {
        return;
    }
    let core = cores[slot_index % cores.len()];
    if !core_affinity::set_for_current(core) {
        warn!("failed to pin worker slot {slot_index} to core {core:?}");
    }
}

/// The acceptor loop proper (§4.3). With more than one worker sharing the listening socket,
/// `accept()` is only ever attempted while holding the accept lock, and is a single non-blocking
/// attempt so the lock is never held across a suspension point. With exactly one worker there is
/// no lock to contend for, so the loop awaits the listener directly and lets the Tokio reactor
/// park the thread between connections instead of polling.
async fn acceptor_loop(state: Rc<WorkerRuntimeState>, handler: Rc<RequestHandlerFn>, logger: Option<Arc<FileLogger>>) {
    loop {
        if signals::exit_requested() {
            info!("immediate exit requested, abandoning acceptor loop");
            return;
        }
        if signals::stop_requested() {
            info!("graceful stop requested, no longer accepting new connections");
            drain_until_idle(&state).await;
            return;
        }
        if signals::take_log_reopen_requested() {
            if let Some(logger) = &logger {
                if let Err(e) = logger.reopen() {
                    warn!("failed to reopen log file: {e}");
                }
            }
        }

        let Ok(permit) = state.capacity.clone().try_acquire_owned() else {
            // At budget: yield briefly rather than hot-spinning until a slot frees up.
            sleep(Duration::from_millis(5)).await;
            continue;
        };

        let accepted = if state.single_worker {
            // A plain `.accept().await` would park here until a connection arrives, so a
            // SIGTERM/SIGUSR1 that lands while idle would never be noticed: re-check the flags
            // on a bounded interval instead of awaiting the listener unconditionally.
            tokio::select! {
                biased;
                result = state.listener.accept() => match result {
                    Ok(pair) => Some(pair),
                    Err(e) => {
                        warn!("accept failed: {e}");
                        None
                    }
                },
                _ = sleep(IDLE_STOP_CHECK_INTERVAL) => None,
            }
        } else {
            accept_under_lock(&state).await
        };

        let Some((stream, peer)) = accepted else {
            drop(permit);
            continue;
        };

        state.active_connections.set(state.active_connections.get() + 1);
        let guard = DecrementGuard {
            active_connections: state.active_connections.clone(),
        };
        let handler = handler.clone();
        debug!("accepted connection from {peer}");
        tokio::task::spawn_local(async move {
            let _permit = permit;
            let _guard = guard;
            handler(stream).await;
        });
    }
}

/// Try once, non-blockingly, to acquire the shared accept lock and accept a single connection.
/// Returns `None` either because the lock was contended or because the accept itself would have
/// blocked — both are routine and handled by falling back to a short cooperative yield.
async fn accept_under_lock(state: &WorkerRuntimeState) -> Option<(tokio::net::TcpStream, std::net::SocketAddr)> {
    if !state.accept_lock.try_acquire() {
        tokio::task::yield_now().await;
        return None;
    }
    let result = poll_accept_once(&state.listener);
    state.accept_lock.release();
    match result {
        Some(Ok(pair)) => Some(pair),
        Some(Err(e)) => {
            warn!("accept failed: {e}");
            None
        }
        None => {
            tokio::task::yield_now().await;
            None
        }
    }
}

/// A single non-blocking `accept` attempt via `poll_accept`, driven with a no-op waker so it
/// never actually suspends. The accept lock must not be held across an `.await` that could
/// park this task, so this intentionally polls exactly once instead of calling `.accept().await`.
fn poll_accept_once(listener: &TcpListener) -> Option<io::Result<(tokio::net::TcpStream, std::net::SocketAddr)>> {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    match listener.poll_accept(&mut cx) {
        Poll::Ready(result) => Some(result),
        Poll::Pending => None,
    }
}

fn noop_waker() -> std::task::Waker {
    use std::task::{RawWaker, RawWakerVTable, Waker};

    fn no_op(_: *const ()) {}
    fn clone(_: *const ()) -> RawWaker {
        raw_waker()
    }
    fn raw_waker() -> RawWaker {
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }
    // SAFETY: the vtable's functions never dereference the data pointer.
    unsafe { Waker::from_raw(raw_waker()) }
}

/// Graceful-stop drain (§4.4's "stop accepting, let in-flight finish"): poll the connection
/// counter until it reaches zero, or until the configurable ceiling has elapsed, whichever comes
/// first — at which point any still-running handlers are abandoned when the process exits.
async fn drain_until_idle(state: &Rc<WorkerRuntimeState>) {
    const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
    const POLL_INTERVAL: Duration = Duration::from_millis(20);

    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while state.active_connections.get() > 0 {
        if signals::exit_requested() {
            info!("immediate exit requested mid-drain, abandoning remaining connections");
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(
                "drain timed out with {} connection(s) still active",
                state.active_connections.get()
            );
            return;
        }
        sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrement_guard_decrements_on_drop() {
        let counter = Rc::new(Cell::new(3u32));
        {
            let _guard = DecrementGuard {
                active_connections: counter.clone(),
            };
        }
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn decrement_guard_saturates_at_zero() {
        let counter = Rc::new(Cell::new(0u32));
        {
            let _guard = DecrementGuard {
                active_connections: counter.clone(),
            };
        }
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn noop_waker_can_be_cloned_and_woken_without_panicking() {
        let waker = noop_waker();
        let cloned = waker.clone();
        cloned.wake();
        waker.wake_by_ref();
    }
}
