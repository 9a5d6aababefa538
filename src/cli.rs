//! Command-line surface (§4.11): an nginx-style `-v`/`-t`/`-s {stop,quit,reopen}`/`-h`, plus a
//! bare invocation that starts the daemon.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// A prefork TCP server daemon built on `muster`.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long = "config", default_value = "muster.toml")]
    pub config_path: PathBuf,

    /// Parse and validate the configuration file, print it, and exit without starting the
    /// server.
    #[arg(short = 't', long = "test-config")]
    pub test_config: bool,

    /// Send a signal to a running master process identified by its pidfile, instead of starting
    /// a new one.
    #[arg(short = 's', long = "signal", value_enum)]
    pub signal: Option<ControlSignal>,
}

/// The control signals this daemon understands via `-s`, mapped onto the same flags
/// [`crate::signals`] reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ControlSignal {
    /// Graceful shutdown: stop accepting, let in-flight connections finish.
    Stop,
    /// Immediate shutdown: exit without waiting for in-flight connections.
    Quit,
    /// Re-open the log file in place, for log rotation.
    Reopen,
}

impl ControlSignal {
    /// The POSIX signal this control signal maps onto.
    pub fn to_nix_signal(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;
        match self {
            ControlSignal::Stop => Signal::SIGTERM,
            ControlSignal::Quit => Signal::SIGQUIT,
            ControlSignal::Reopen => Signal::SIGUSR1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_starts_the_daemon() {
        let cli = Cli::parse_from(["musterd"]);
        assert!(!cli.test_config);
        assert!(cli.signal.is_none());
    }

    #[test]
    fn test_config_flag_is_recognized() {
        let cli = Cli::parse_from(["musterd", "-t"]);
        assert!(cli.test_config);
    }

    #[test]
    fn signal_flag_parses_each_variant() {
        let cli = Cli::parse_from(["musterd", "-s", "stop"]);
        assert_eq!(cli.signal, Some(ControlSignal::Stop));
        let cli = Cli::parse_from(["musterd", "-s", "quit"]);
        assert_eq!(cli.signal, Some(ControlSignal::Quit));
        let cli = Cli::parse_from(["musterd", "-s", "reopen"]);
        assert_eq!(cli.signal, Some(ControlSignal::Reopen));
    }

    #[test]
    fn custom_config_path_is_honored() {
        let cli = Cli::parse_from(["musterd", "-c", "/etc/muster/custom.toml"]);
        assert_eq!(cli.config_path, PathBuf::from("/etc/muster/custom.toml"));
    }
}
