//! Lock Coordinator Module
//!
//! Cross-process binary lock serializing read-modify-write cycles on a
//! segment. Backed by an exclusive advisory lock on a dedicated file whose
//! identity is derived from, but distinct from, the segment key.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{trace, warn};

use crate::cache::segment::{derive_id, ensure_directory, SegmentKey, NAMESPACE};
use crate::config::Config;
use crate::error::{CacheError, Result};

const INITIAL_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(50);

// == Lock Key ==
/// Identity of the lock guarding one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockKey(u32);

impl LockKey {
    /// Derives the lock identity paired with `segment`.
    pub fn for_segment(segment: SegmentKey) -> Self {
        Self(derive_id(&[
            NAMESPACE.as_bytes(),
            b"lock",
            &segment.raw().to_be_bytes(),
        ]))
    }

    /// Returns the numeric key.
    pub fn raw(self) -> u32 {
        self.0
    }
}

// == Lock Coordinator ==
/// Hands out exclusive [`LockGuard`]s.
///
/// Every acquisition opens its own file description, so two threads of one
/// process exclude each other exactly like two processes do. The lock is not
/// reentrant: acquiring twice from one thread without releasing deadlocks
/// (or times out, when a timeout is configured).
#[derive(Debug, Clone)]
pub struct LockCoordinator {
    key: LockKey,
    path: PathBuf,
    permissions: u32,
    timeout: Option<Duration>,
}

impl LockCoordinator {
    /// Describes the lock `key` inside `directory`.
    pub fn new(directory: &Path, key: LockKey, permissions: u32, timeout: Option<Duration>) -> Self {
        Self {
            key,
            path: directory.join(format!("{}-{:08x}.lock", NAMESPACE, key.raw())),
            permissions,
            timeout,
        }
    }

    /// Describes the lock paired with the segment selected by `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.directory,
            LockKey::for_segment(config.resolved_key()),
            config.permissions,
            config.lock_timeout,
        )
    }

    /// Returns the lock identity.
    pub fn key(&self) -> LockKey {
        self.key
    }

    /// Returns the backing path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // == Acquire ==
    /// Blocks until the lock is held exclusively.
    ///
    /// # Errors
    /// - `LockUnavailable` if the lock file cannot be opened or locked
    /// - `LockTimeout` if a timeout is configured and elapses first
    pub fn acquire(&self) -> Result<LockGuard> {
        let file = self.open()?;

        match self.timeout {
            None => {
                file.lock_exclusive().map_err(|e| self.unavailable(e))?;
            }
            Some(timeout) => {
                let started = Instant::now();
                let mut backoff = INITIAL_BACKOFF;
                loop {
                    match file.try_lock_exclusive() {
                        Ok(()) => break,
                        Err(e) if is_contended(&e) => {
                            let elapsed = started.elapsed();
                            if elapsed >= timeout {
                                return Err(CacheError::LockTimeout(timeout));
                            }
                            thread::sleep(backoff.min(timeout - elapsed));
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                        }
                        Err(e) => return Err(self.unavailable(e)),
                    }
                }
            }
        }

        trace!("Acquired lock {:08x}", self.key.raw());
        Ok(LockGuard {
            file,
            key: self.key,
        })
    }

    /// Takes the lock only if it is free right now.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        let file = self.open()?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(LockGuard {
                file,
                key: self.key,
            })),
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(self.unavailable(e)),
        }
    }

    /// Opens the lock file read only, creating it on first use.
    ///
    /// `flock` needs no write access, so anyone able to read the lock file
    /// can take the lock.
    fn open(&self) -> Result<File> {
        if let Some(dir) = self.path.parent() {
            ensure_directory(dir, self.permissions).map_err(|e| self.unavailable(e))?;
        }

        match OpenOptions::new().read(true).open(&self.path) {
            Ok(file) => return Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(self.unavailable(e)),
        }

        let mut options = OpenOptions::new();
        options.read(true).write(true).create_new(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(self.permissions);
        }

        match options.open(&self.path) {
            Ok(file) => {
                // The umask may have narrowed the mode passed to open.
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    file.set_permissions(fs::Permissions::from_mode(self.permissions))
                        .map_err(|e| self.unavailable(e))?;
                }
                trace!("Created lock file {}", self.path.display());
                Ok(file)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => OpenOptions::new()
                .read(true)
                .open(&self.path)
                .map_err(|e| self.unavailable(e)),
            Err(e) => Err(self.unavailable(e)),
        }
    }

    fn unavailable(&self, source: io::Error) -> CacheError {
        CacheError::LockUnavailable {
            path: self.path.clone(),
            source,
        }
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

// == Lock Guard ==
/// Proof that the lock is held. Released on drop.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    key: LockKey,
}

impl LockGuard {
    /// Releases the lock now.
    pub fn release(self) {}
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release lock {:08x}: {}", self.key.raw(), e);
        } else {
            trace!("Released lock {:08x}", self.key.raw());
        }
    }
}
