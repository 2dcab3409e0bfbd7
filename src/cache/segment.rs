//! Shared Segment Module
//!
//! The fixed-capacity block every attached process reads and replaces as a
//! whole. A segment is a file in a shared-memory directory whose length is
//! the segment capacity; its bytes are the blob followed by zero padding.
//!
//! Content is never modified in place. A write builds the new content in a
//! private file and renames it over the segment, so a reader sees either the
//! old or the new blob in full.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{CacheError, Result};

/// Namespace token mixed into every derived identity.
pub const NAMESPACE: &str = "shmcache";

/// Allocation granularity; actual capacity is the request rounded up to it.
pub const PAGE_SIZE: usize = 4096;

/// How often `open_or_create` retries when the segment vanishes under it.
const OPEN_ATTEMPTS: usize = 3;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// == Segment Key ==
/// Deterministic identity of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentKey(u32);

impl SegmentKey {
    /// Derives the key from the namespace token and a discriminator.
    pub fn derive(discriminator: &str) -> Self {
        Self(derive_id(&[NAMESPACE.as_bytes(), discriminator.as_bytes()]))
    }

    /// Wraps an explicitly configured key.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the numeric key.
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// First four bytes of a SHA-256 over the NUL-separated parts.
pub(crate) fn derive_id(parts: &[&[u8]]) -> u32 {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part);
    }
    let digest = hasher.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

// == Shared Segment ==
/// Where a segment lives and how it is created.
///
/// Cheap to construct; no OS resource is touched until
/// [`open_or_create`](Self::open_or_create).
#[derive(Debug, Clone)]
pub struct SharedSegment {
    key: SegmentKey,
    path: PathBuf,
    requested: usize,
    permissions: u32,
}

impl SharedSegment {
    /// Describes the segment `key` inside `directory`.
    pub fn new(directory: &Path, key: SegmentKey, requested: usize, permissions: u32) -> Self {
        Self {
            key,
            path: directory.join(format!("{}-{:08x}.seg", NAMESPACE, key.raw())),
            requested,
            permissions,
        }
    }

    /// Describes the segment selected by `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.directory,
            config.resolved_key(),
            config.segment_size,
            config.permissions,
        )
    }

    /// Returns the segment identity.
    pub fn key(&self) -> SegmentKey {
        self.key
    }

    /// Returns the backing path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the configured capacity in bytes.
    pub fn requested_capacity(&self) -> usize {
        self.requested
    }

    /// Returns the permission bits used on creation.
    pub fn permissions(&self) -> u32 {
        self.permissions
    }

    /// Checks whether the segment currently exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    // == Open Or Create ==
    /// Opens the segment, creating it first when it does not exist.
    ///
    /// An existing segment keeps the capacity it was created with, even if
    /// the requested capacity has changed since.
    ///
    /// # Errors
    /// `SegmentUnavailable` when the segment can be neither created nor opened.
    pub fn open_or_create(&self) -> Result<SegmentHandle<'_>> {
        let mut last_error = io::Error::from(io::ErrorKind::NotFound);

        for _ in 0..OPEN_ATTEMPTS {
            match OpenOptions::new().read(true).write(true).open(&self.path) {
                Ok(file) => {
                    let len = file.metadata().map_err(|e| self.unavailable(e))?.len();
                    let capacity = usize::try_from(len).map_err(|_| {
                        self.unavailable(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "segment larger than the address space",
                        ))
                    })?;
                    return Ok(SegmentHandle {
                        segment: self,
                        file,
                        capacity,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    self.create()?;
                    last_error = e;
                }
                Err(e) => return Err(self.unavailable(e)),
            }
        }

        Err(self.unavailable(last_error))
    }

    /// Publishes a zeroed segment of the page-rounded requested size.
    ///
    /// The file is fully sized before it becomes visible, and the hard link
    /// fails rather than clobbering a segment another process published first.
    fn create(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            ensure_directory(dir, self.permissions).map_err(|e| self.unavailable(e))?;
        }

        let capacity = page_round(self.requested);
        let temp = self.temp_path();

        let staged = create_file(&temp, self.permissions)
            .and_then(|file| file.set_len(capacity as u64));
        if let Err(e) = staged {
            let _ = fs::remove_file(&temp);
            return Err(self.unavailable(e));
        }

        let linked = fs::hard_link(&temp, &self.path);
        let _ = fs::remove_file(&temp);

        match linked {
            Ok(()) => {
                info!(
                    "Created segment {:08x} at {} ({} bytes requested, {} allocated)",
                    self.key.raw(),
                    self.path.display(),
                    self.requested,
                    capacity
                );
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("Segment {:08x} was created concurrently", self.key.raw());
                Ok(())
            }
            Err(e) => Err(self.unavailable(e)),
        }
    }

    // == Delete ==
    /// Marks the segment for reclamation.
    ///
    /// Open handles keep reading their snapshot until dropped; the next
    /// `open_or_create` builds a fresh, empty segment from the current
    /// configuration. Returns whether a segment existed.
    pub fn delete(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Deleted segment {:08x}", self.key.raw());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.unavailable(e)),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{}.{}.tmp", std::process::id(), n));
        PathBuf::from(name)
    }

    fn unavailable(&self, source: io::Error) -> CacheError {
        CacheError::SegmentUnavailable {
            path: self.path.clone(),
            source,
        }
    }
}

// == Segment Handle ==
/// An attachment to a segment, detached on drop.
///
/// A handle reads the content the segment held when it was opened.
#[derive(Debug)]
pub struct SegmentHandle<'a> {
    segment: &'a SharedSegment,
    file: File,
    capacity: usize,
}

impl SegmentHandle<'_> {
    /// Returns the capacity the segment was allocated with.
    pub fn actual_capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the configured capacity of the owning segment.
    pub fn requested_capacity(&self) -> usize {
        self.segment.requested
    }

    // == Read All ==
    /// Reads the full content, padding included.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.capacity);
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_end(&mut buf))
            .map_err(|e| self.segment.unavailable(e))?;
        Ok(buf)
    }

    // == Write All ==
    /// Replaces the whole content with `bytes`, zero-padded to capacity.
    ///
    /// # Errors
    /// `CapacityExceeded` if `bytes` is longer than the segment, nothing is
    /// written in that case.
    pub fn write_all(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.capacity {
            return Err(CacheError::CapacityExceeded {
                len: bytes.len(),
                capacity: self.capacity,
            });
        }

        let temp = self.segment.temp_path();
        let staged = create_file(&temp, self.segment.permissions).and_then(|mut file| {
            file.write_all(bytes)?;
            file.set_len(self.capacity as u64)
        });

        let published = staged.and_then(|()| fs::rename(&temp, &self.segment.path));
        if let Err(e) = published {
            let _ = fs::remove_file(&temp);
            return Err(self.segment.unavailable(e));
        }

        Ok(())
    }
}

/// Rounds a request up to whole pages, never below one page.
pub fn page_round(requested: usize) -> usize {
    requested.max(1).div_ceil(PAGE_SIZE).saturating_mul(PAGE_SIZE)
}

/// Creates the directory holding segments and locks if it is missing.
///
/// A directory created here gets `permissions` plus search bits wherever a
/// read bit is set, and no sticky bit, so every user allowed to write the
/// segment may also replace and unlink it. An existing directory is left
/// untouched.
pub(crate) fn ensure_directory(dir: &Path, permissions: u32) -> io::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    if let Some(parent) = dir.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::create_dir(dir) {
        Ok(()) => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(dir, fs::Permissions::from_mode(directory_mode(permissions)))?;
            }
            #[cfg(not(unix))]
            let _ = permissions;
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// File permission bits widened with a search bit for each read bit.
pub(crate) fn directory_mode(permissions: u32) -> u32 {
    let permissions = permissions & 0o777;
    permissions | ((permissions & 0o444) >> 2)
}

fn create_file(path: &Path, permissions: u32) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(permissions);
    }

    let file = options.open(path)?;

    // The umask may have narrowed the mode passed to open.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(permissions))?;
    }
    #[cfg(not(unix))]
    let _ = permissions;

    Ok(file)
}
