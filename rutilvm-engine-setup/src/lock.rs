use std::{
    fs::{self, File},
    os::fd::AsRawFd,
    path::Path,
};

use anyhow::{Context, Result, bail};
use nix::{
    errno::Errno,
    fcntl::{FlockArg, flock},
};

/// Exclusive advisory lock held for the lifetime of a setup session.
///
/// The lock is released when the value is dropped and the file descriptor closed.
#[derive(Debug)]
pub struct SessionLock {
    _file: File,
}

impl SessionLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("could not create {}", dir.display()))?;
        }

        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .with_context(|| format!("could not open lock file {}", path.display()))?;

        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => Ok(Self { _file: file }),
            Err(err) if err == Errno::EWOULDBLOCK => {
                bail!(
                    "another setup session is already running (lock {} is held)",
                    path.display()
                )
            }
            Err(err) => bail!("could not lock {}: {err}", path.display()),
        }
    }
}
