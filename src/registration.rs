//! Application registration (§4's "worker lifecycle driver" collaborator contract): the three
//! hooks an embedding application supplies, and the `register_project` constructor that collects
//! them.
//!
//! These are plain `Box<dyn Fn>` / `Rc<dyn Fn>` closures with no `Send`/`Sync` bound. That would
//! be a bug in almost any other concurrency model, but `fork()` gives every worker its own
//! copy-on-write copy of this data — there is no cross-OS-thread sharing to prove safe, so
//! requiring `Send` here would only get in an application's way for no benefit.

use std::io;
use std::rc::Rc;

use crate::worker::RequestHandlerFn;

/// Runs once in the master, before any worker is forked. Typically used to open resources that
/// must exist before workers start (e.g. a database connection pool dialed once and inherited).
pub type MasterInitFn = dyn Fn() -> io::Result<()>;

/// Runs once in each worker, immediately after `fork()`, before the acceptor loop starts.
/// Typically used to re-seed anything a `fork()` leaves in a parent-shared but worker-unsafe
/// state (RNGs, per-worker file handles).
pub type WorkerInitFn = dyn Fn() -> io::Result<()>;

/// The hooks and handler an embedding application supplies to [`register_project`].
///
/// `worker_init` is kept behind an `Rc` rather than a one-shot `Box`: the master may fork more
/// than one worker sharing the same hook (steady-state startup, or a respawn after a worker
/// crashes), so it must be callable more than once rather than consumed by the first fork.
pub struct Registration {
    pub(crate) master_init: Option<Box<MasterInitFn>>,
    pub(crate) worker_init: Option<Rc<WorkerInitFn>>,
    pub(crate) request_handler: Rc<RequestHandlerFn>,
}

/// Register an application with `muster`. `request_handler` is mandatory — a server with nothing
/// to do on accept isn't meaningful; `master_init` and `worker_init` are optional lifecycle hooks.
pub fn register_project(
    master_init: Option<Box<MasterInitFn>>,
    worker_init: Option<Rc<WorkerInitFn>>,
    request_handler: Rc<RequestHandlerFn>,
) -> Registration {
    Registration {
        master_init,
        worker_init,
        request_handler,
    }
}
