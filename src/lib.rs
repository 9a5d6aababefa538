//! `muster`: a prefork TCP server framework.
//!
//! A master process binds one listening socket, forks `worker_processes` copies of itself, and
//! each worker serializes `accept()` against its siblings through a spinlock living in shared
//! memory (see [`accept_lock`]). Inside a worker, accepted connections are driven to completion
//! by a cooperative, single-threaded scheduler (see [`worker`]) rather than a thread per
//! connection.
//!
//! Applications plug in via [`register_project`]: a master-init hook, a worker-init hook, and a
//! per-connection request handler. The handler receives the accepted `tokio::net::TcpStream` and
//! owns it until it finishes; `muster` itself never parses a byte of application protocol.
//!
//! What this crate deliberately leaves to its caller or to `tokio`: the coroutine/event-loop
//! internals backing each worker's scheduler, hot-reload-with-socket-inheritance, TLS, and
//! protocol parsing. See the crate's `SPEC_FULL.md` for the full rationale.

pub mod accept_lock;
pub mod cli;
pub mod config;
pub mod daemonize;
pub mod error;
pub mod listener;
pub mod logging;
pub mod master;
pub mod pidfile;
pub mod registration;
pub mod shm;
pub mod signals;
pub mod worker;
pub mod worker_table;

pub use config::Config;
pub use error::Error;
pub use registration::{register_project, Registration};
pub use worker::futures_boxed::BoxFuture;

use std::sync::Arc;

use log::info;

/// Run the server described by `registration` under `config` until a stop or exit signal brings
/// every worker down. This is the single entry point a `musterd`-style binary calls after parsing
/// its CLI and loading configuration; it does not daemonize or install logging itself, so the
/// caller can sequence those (pidfile, daemonize, logger) exactly as its own policy requires.
///
/// `logger`, if given, is the same handle the caller passed to [`logging::install`]: the master
/// loop and each worker need it to actually reopen the log file when `-s reopen` / `SIGUSR1`
/// arrives, since `log::set_boxed_logger` otherwise leaves no way back to the installed instance.
pub fn run(config: &Config, registration: Registration, logger: Option<Arc<logging::FileLogger>>) -> Result<(), Error> {
    let listener = listener::bind(config.listen_ip, config.listen_port)?;
    info!(
        "muster listening on {}:{}, {} worker(s)",
        config.listen_ip, config.listen_port, config.worker_processes
    );

    if let Some(master_init) = &registration.master_init {
        master_init().map_err(|source| Error::InitHook("master", source))?;
    }

    master::run_master(config, listener, &registration, logger)
}
