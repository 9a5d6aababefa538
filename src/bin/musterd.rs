//! `musterd`: the reference daemon binary for the `muster` crate.
//!
//! This wires the CLI, config loader, logger, pidfile, and daemonization together the way an
//! embedding application is expected to; the default request handler is a bare connection echo,
//! useful for smoke-testing a deployment before swapping in real application logic via
//! [`muster::register_project`].

use std::rc::Rc;
use std::sync::Arc;

use clap::Parser;
use log::error;
use muster::cli::{Cli, ControlSignal};
use muster::{daemonize, logging, pidfile, registration, Config};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn main() {
    let cli = Cli::parse();

    if let Some(signal) = cli.signal {
        if let Err(e) = send_control_signal(&cli, signal) {
            eprintln!("musterd: {e}");
            std::process::exit(1);
        }
        return;
    }

    let config = match Config::load(&cli.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("musterd: {e}");
            std::process::exit(1);
        }
    };

    if cli.test_config {
        println!("configuration OK:\n{config}");
        return;
    }

    if let Err(e) = run_daemon(&config) {
        eprintln!("musterd: {e}");
        std::process::exit(1);
    }
}

fn run_daemon(config: &Config) -> Result<(), muster::Error> {
    // Daemonize first so the pid recorded in the pidfile is the final daemon's own pid, as
    // required by §4.12 — not the pid of a process that is about to exit mid-startup.
    daemonize::daemonize()?;

    let level = logging::parse_level(&config.log_level)?;
    let logger = Arc::new(logging::FileLogger::open(&config.log_path, level)?);
    logging::install(logger.clone())?;

    let pid = nix::unistd::getpid();
    let _pidfile = pidfile::Pidfile::create(&config.pidfile_path, pid)?;

    let handler: Rc<muster::worker::RequestHandlerFn> = Rc::new(|stream| Box::pin(echo(stream)));
    let registration = registration::register_project(None, None, handler);

    muster::run(config, registration, Some(logger))
}

/// Default request handler: echoes whatever the peer sends back to it until the peer closes the
/// connection. Exists so a freshly-started `musterd` is useful for a connectivity smoke test
/// before an embedding application registers its own handler.
async fn echo(mut stream: tokio::net::TcpStream) {
    let mut buf = [0u8; 4096];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                error!("echo handler read error: {e}");
                return;
            }
        };
        if let Err(e) = stream.write_all(&buf[..n]).await {
            error!("echo handler write error: {e}");
            return;
        }
    }
}

fn send_control_signal(cli: &Cli, signal: ControlSignal) -> Result<(), muster::Error> {
    let config = Config::load(&cli.config_path)?;
    let pid = pidfile::read(&config.pidfile_path)?;
    nix::sys::signal::kill(pid, signal.to_nix_signal()).map_err(muster::Error::Process)?;
    Ok(())
}
