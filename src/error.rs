//! Error taxonomy for the crate, grouped by remediation rather than call site.

use std::path::PathBuf;

/// Errors surfaced by the ambient init paths (config, logging, daemonization, shared memory,
/// sockets) and by the few core operations that can fail outside of the happy path.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to bind, set options on, or listen on the shared TCP socket.
    #[error("failed to set up listening socket on {addr}: {source}")]
    Listen {
        /// Address the server attempted to bind.
        addr: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create the anonymous shared-memory region backing the accept lock.
    #[error("failed to allocate shared accept lock: {0}")]
    SharedMemory(#[source] nix::Error),

    /// Failed to open or write the log file.
    #[error("failed to initialize logging at {path}: {source}")]
    LogInit {
        /// Path of the log file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Failed to daemonize (double-fork, setsid, or stdio redirection).
    #[error("failed to daemonize: {0}")]
    Daemonize(#[source] nix::Error),

    /// Failed to create, read, or delete the pidfile.
    #[error("pidfile error at {path}: {source}")]
    Pidfile {
        /// Path of the pidfile.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Configuration was structurally invalid TOML.
    #[error("invalid configuration file {path}: {source}")]
    ConfigParse {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying parse failure.
        #[source]
        source: Box<toml::de::Error>,
    },

    /// Configuration parsed but failed validation (e.g. worker count out of range).
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The user-supplied master or worker init hook returned an error.
    #[error("{0} init hook failed: {1}")]
    InitHook(&'static str, std::io::Error),

    /// Fork, waitpid, kill, or other process-table operation failed.
    #[error("process operation failed: {0}")]
    Process(#[source] nix::Error),

    /// A plain filesystem I/O failure with a path attached for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path the failing operation was working against.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::Process(e)
    }
}
