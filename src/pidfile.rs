//! Pidfile handling (§4.12, §6 "Persisted state"): a single file holding the master pid as ASCII
//! decimal, created at master init and deleted on clean master exit — never on worker exit.

use std::fs;
use std::path::{Path, PathBuf};

use nix::unistd::Pid;

use crate::error::Error;

/// Handle to a created pidfile. Deleting it is an explicit, deliberate action ([`Pidfile::delete`])
/// rather than a `Drop` impl, because a worker that inherits this handle's *path* (not the
/// handle itself) must never delete the master's pidfile, and because `std::process::exit` —
/// used throughout shutdown — skips destructors entirely.
pub struct Pidfile {
    path: PathBuf,
}

impl Pidfile {
    /// Write `pid` to `path` as ASCII decimal, truncating any stale file.
    pub fn create(path: &Path, pid: Pid) -> Result<Self, Error> {
        fs::write(path, format!("{pid}\n")).map_err(|source| Error::Pidfile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Pidfile {
            path: path.to_path_buf(),
        })
    }

    /// Remove the pidfile. Called once, by the master, on clean exit.
    pub fn delete(&self) -> Result<(), Error> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Pidfile {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Read a master pid out of an existing pidfile, for the `-s stop|quit|reopen` CLI paths.
pub fn read(path: &Path) -> Result<Pid, Error> {
    let text = fs::read_to_string(path).map_err(|source| Error::Pidfile {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: i32 = text.trim().parse().map_err(|_| Error::Pidfile {
        path: path.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("pidfile does not contain a decimal pid: {text:?}"),
        ),
    })?;
    Ok(Pid::from_raw(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_read_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muster.pid");
        let pidfile = Pidfile::create(&path, Pid::from_raw(4242)).unwrap();
        assert_eq!(read(&path).unwrap(), Pid::from_raw(4242));
        pidfile.delete().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muster.pid");
        let pidfile = Pidfile::create(&path, Pid::from_raw(1)).unwrap();
        pidfile.delete().unwrap();
        // A second delete of an already-absent pidfile must not error.
        pidfile.delete().unwrap();
    }

    #[test]
    fn create_truncates_stale_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("muster.pid");
        std::fs::write(&path, "999999\nstale garbage").unwrap();
        Pidfile::create(&path, Pid::from_raw(2)).unwrap();
        assert_eq!(read(&path).unwrap(), Pid::from_raw(2));
    }
}
