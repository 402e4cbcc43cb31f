//! Single-instance guard.
//!
//! Two processes driving the same LED panel fight over the GPIO pins and
//! produce garbage. The lock file holds the pid of the running instance; a
//! lock whose pid no longer exists is taken over.

use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
    process,
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default lock location; /tmp is cleared on reboot.
pub const DEFAULT_LOCK_PATH: &str = "/tmp/subway_clock.lock";

#[derive(Error, Debug)]
pub enum LockError {
    #[error("another instance is running (pid {pid}, lock {})", path.display())]
    Held { pid: u32, path: PathBuf },

    #[error("lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held for the lifetime of the process; removes the lock file on drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self, LockError> {
        Self::acquire_with(path.as_ref(), pid_is_alive)
    }

    fn acquire_with(path: &Path, is_alive: impl Fn(u32) -> bool) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        // Two attempts: the second one after clearing a stale lock
        for _ in 0..2 {
            match fs::OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    write!(file, "{}", process::id()).map_err(io_err)?;
                    info!("acquired instance lock {}", path.display());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let contents = fs::read_to_string(path).map_err(io_err)?;
                    match contents.trim().parse::<u32>() {
                        Ok(pid) if pid != process::id() && is_alive(pid) => {
                            return Err(LockError::Held {
                                pid,
                                path: path.to_path_buf(),
                            });
                        }
                        _ => {
                            warn!("removing stale lock {} ({:?})", path.display(), contents.trim());
                            fs::remove_file(path).map_err(io_err)?;
                        }
                    }
                }
                Err(e) => return Err(io_err(e)),
            }
        }
        Err(io_err(io::Error::new(
            ErrorKind::AlreadyExists,
            "lock reappeared while taking it over",
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("released instance lock {}", self.path.display()),
            Err(e) => warn!("failed to remove lock {}: {e}", self.path.display()),
        }
    }
}

fn pid_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}
