//! Configuration loading. The loader is a thin TOML/serde layer; the values it produces are the
//! contract the core consumes (§4.8 of the expanded spec).

use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Error;
use crate::worker_table::MAX_WORKERS;

fn default_worker_processes() -> u8 {
    1
}

fn default_worker_connections() -> u32 {
    1024
}

fn default_coro_stack_kb() -> u32 {
    128
}

fn default_listen_ip() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_listen_port() -> u16 {
    8080
}

fn default_pidfile_path() -> PathBuf {
    PathBuf::from("/var/run/muster.pid")
}

fn default_log_path() -> PathBuf {
    PathBuf::from("/var/log/muster.log")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Server configuration, deserialized from a TOML file or defaulted entirely.
///
/// Every field carries a default so a half-specified (or missing) configuration file still
/// produces a runnable server — only `worker_processes` is validated beyond parsing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of worker processes to fork, `1..=32`.
    pub worker_processes: u8,
    /// Maximum simultaneous in-flight connection handlers per worker.
    pub worker_connections: u32,
    /// Per-connection task stack-size hint, in KiB. Retained from the original tunable; the async
    /// runtime manages its own stacks, so this only sizes the task's initial buffer reservation.
    pub coro_stack_kb: u32,
    /// Address the shared listening socket binds to.
    pub listen_ip: IpAddr,
    /// Port the shared listening socket binds to.
    pub listen_port: u16,
    /// Where the master pidfile is written.
    pub pidfile_path: PathBuf,
    /// Where the log file is written.
    pub log_path: PathBuf,
    /// Minimum severity written to the log file: one of off/error/warn/info/debug/trace.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            worker_processes: default_worker_processes(),
            worker_connections: default_worker_connections(),
            coro_stack_kb: default_coro_stack_kb(),
            listen_ip: default_listen_ip(),
            listen_port: default_listen_port(),
            pidfile_path: default_pidfile_path(),
            log_path: default_log_path(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Parse a TOML configuration file and validate it.
    pub fn load(path: &Path) -> Result<Config, Error> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&text).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate invariants the TOML parser itself cannot express, notably the worker-count
    /// ceiling: "configuring more than 32 workers must be rejected by the config layer" (§8).
    pub fn validate(&self) -> Result<(), Error> {
        if self.worker_processes == 0 || self.worker_processes as usize > MAX_WORKERS {
            return Err(Error::ConfigInvalid(format!(
                "worker_processes must be in 1..={MAX_WORKERS}, got {}",
                self.worker_processes
            )));
        }
        if self.worker_connections == 0 {
            return Err(Error::ConfigInvalid(
                "worker_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "worker_processes  = {}", self.worker_processes)?;
        writeln!(f, "worker_connections = {}", self.worker_connections)?;
        writeln!(f, "coro_stack_kb     = {}", self.coro_stack_kb)?;
        writeln!(f, "listen            = {}:{}", self.listen_ip, self.listen_port)?;
        writeln!(f, "pidfile_path      = {}", self.pidfile_path.display())?;
        writeln!(f, "log_path          = {}", self.log_path.display())?;
        write!(f, "log_level         = {}", self.log_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_workers() {
        let mut config = Config::default();
        config.worker_processes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_too_many_workers() {
        let mut config = Config::default();
        config.worker_processes = 33;
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_max_workers() {
        let mut config = Config::default();
        config.worker_processes = 32;
        config.validate().unwrap();
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muster.toml");
        std::fs::write(&path, "worker_processes = 4\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.worker_processes, 4);
        assert_eq!(config.worker_connections, default_worker_connections());
    }

    #[test]
    fn rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muster.toml");
        std::fs::write(&path, "worker_processes = [this is not toml\n").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::ConfigParse { .. })));
    }
}
