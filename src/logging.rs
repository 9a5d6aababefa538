//! File-backed logger (§4.9): a minimal [`log::Log`] implementation writing to a single file,
//! with a [`FileLogger::reopen`] hook that re-opens that file in place — the mechanism behind
//! `-s reopen` / `SIGUSR1` (see [`crate::signals`]). The original C server named log rotation
//! as a feature but never actually implemented the reopen path ("to be implement..." in
//! `shark.c`); this supplements that gap rather than leaving it a dead CLI flag.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::error::Error;

/// Logs to a single append-only file behind a mutex. Not the fastest logger imaginable — no
/// batching, no async writer — but the worker/master loops here log at a rate (lifecycle events,
/// not per-request) where that doesn't matter.
pub struct FileLogger {
    path: PathBuf,
    file: Mutex<std::fs::File>,
    level: LevelFilter,
}

impl FileLogger {
    /// Open (creating if absent, appending if present) the log file at `path`.
    pub fn open(path: &Path, level: LevelFilter) -> Result<Self, Error> {
        let file = open_append(path)?;
        Ok(FileLogger {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            level,
        })
    }

    /// Re-open the underlying file at the same path. Used after a `-s reopen` signal so an
    /// external log-rotation tool (e.g. `logrotate`) can move the old file aside and have this
    /// process start writing to a fresh one, without restarting the server.
    pub fn reopen(&self) -> Result<(), Error> {
        let new_file = open_append(&self.path)?;
        *self.file.lock().expect("log file mutex poisoned") = new_file;
        Ok(())
    }
}

/// Install `logger` as the global `log` backend. Takes an `Arc` rather than consuming a bare
/// `FileLogger` so the caller keeps its own handle — `log::set_boxed_logger` hands the crate's
/// copy off to a `'static` global with no way back, but the master/worker loops need a live
/// handle of their own to call [`FileLogger::reopen`] when `-s reopen` / `SIGUSR1` arrives.
pub fn install(logger: Arc<FileLogger>) -> Result<(), Error> {
    let level = logger.level;
    log::set_boxed_logger(Box::new(logger))
        .map(|()| log::set_max_level(level))
        .map_err(|e| Error::LogInit {
            path: PathBuf::new(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })
}

fn open_append(path: &Path) -> Result<std::fs::File, Error> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| Error::LogInit {
            path: path.to_path_buf(),
            source,
        })
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{}] {} {}: {}\n",
            humantime_like_timestamp(),
            record.level(),
            record.target(),
            record.args()
        );
        if let Ok(mut file) = self.file.lock() {
            // A failed log write must never crash the process; best effort only.
            let _ = file.write_all(line.as_bytes());
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// Delegates straight through so an `Arc<FileLogger>` can be handed to `log::set_boxed_logger`
/// while the caller retains its own clone of the same `Arc` to call `reopen` on later.
impl Log for Arc<FileLogger> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        FileLogger::enabled(self, metadata)
    }

    fn log(&self, record: &Record) {
        FileLogger::log(self, record)
    }

    fn flush(&self) {
        FileLogger::flush(self)
    }
}

/// A dependency-free, coarse timestamp. Good enough for log lines; nothing in this crate parses
/// them back out.
fn humantime_like_timestamp() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}", now.as_secs(), now.subsec_millis())
}

/// Severity threshold parsed from configuration; kept separate from [`log::LevelFilter`]'s own
/// `FromStr` so invalid config values produce a [`Error::ConfigInvalid`] rather than a generic
/// parse error.
pub fn parse_level(raw: &str) -> Result<LevelFilter, Error> {
    match raw.to_ascii_lowercase().as_str() {
        "off" => Ok(LevelFilter::Off),
        "error" => Ok(LevelFilter::Error),
        "warn" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        "trace" => Ok(LevelFilter::Trace),
        other => Err(Error::ConfigInvalid(format!(
            "unknown log level {other:?}, expected one of off/error/warn/info/debug/trace"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muster.log");
        let logger = FileLogger::open(&path, LevelFilter::Info).unwrap();
        let record = Record::builder()
            .args(format_args!("hello"))
            .level(Level::Info)
            .target("muster::test")
            .build();
        logger.log(&record);
        logger.flush();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("hello"));

        logger.reopen().unwrap();
        logger.log(&record);
        logger.flush();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("hello").count(), 2);
    }

    #[test]
    fn below_threshold_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muster.log");
        let logger = FileLogger::open(&path, LevelFilter::Warn).unwrap();
        let record = Record::builder()
            .args(format_args!("quiet"))
            .level(Level::Debug)
            .target("muster::test")
            .build();
        logger.log(&record);
        logger.flush();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("quiet"));
    }

    #[test]
    fn parse_level_accepts_known_names_and_rejects_unknown() {
        assert_eq!(parse_level("info").unwrap(), LevelFilter::Info);
        assert_eq!(parse_level("DEBUG").unwrap(), LevelFilter::Debug);
        assert!(parse_level("verbose").is_err());
    }
}
