//! Durable storage behind a [`HistoryStore`](crate::store::HistoryStore).
//!
//! Backends expose versioned reads and compare-and-swap writes. A version is
//! the SHA-256 digest of the stored bytes, so it behaves like an ETag: two
//! readers that saw the same bytes hold the same version, and any write in
//! between changes it.

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

use crate::error::{StorageError, WriteError};

/// Content digest of a persisted document.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version([u8; 32]);

impl Version {
    pub fn of(bytes: &[u8]) -> Self {
        Version(Sha256::digest(bytes).into())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full = self.to_string();
        write!(f, "Version({})", &full[..12])
    }
}

/// Bytes read from a backend together with their version.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub bytes: Vec<u8>,
    pub version: Version,
}

impl Snapshot {
    pub fn new(bytes: Vec<u8>) -> Self {
        let version = Version::of(&bytes);
        Self { bytes, version }
    }
}

pub trait HistoryBackend: Send + Sync {
    /// Current contents, or `None` if nothing was ever persisted.
    fn read(&self) -> Result<Option<Snapshot>, StorageError>;

    /// Replace the contents if they are still at `expected` (`None`: still absent).
    ///
    /// Must be all-or-nothing: a reader sees either the old bytes or the new ones.
    /// Returns [`WriteError::Conflict`] when another writer got there first.
    fn write(
        &self,
        bytes: &[u8],
        expected: Option<&Version>,
        deadline: Instant,
    ) -> Result<Version, WriteError>;

    /// Human-readable location for logs and error messages.
    fn describe(&self) -> String;
}

impl<B: HistoryBackend + ?Sized> HistoryBackend for &B {
    fn read(&self) -> Result<Option<Snapshot>, StorageError> {
        (**self).read()
    }

    fn write(
        &self,
        bytes: &[u8],
        expected: Option<&Version>,
        deadline: Instant,
    ) -> Result<Version, WriteError> {
        (**self).write(bytes, expected, deadline)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// In-process backend with native compare-and-swap.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<Option<Snapshot>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(bytes: Vec<u8>) -> Self {
        Self {
            state: Mutex::new(Some(Snapshot::new(bytes))),
        }
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.lock().as_ref().map(|s| s.bytes.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Snapshot>> {
        // A panic while holding the lock cannot leave a half-written snapshot.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl HistoryBackend for MemoryBackend {
    fn read(&self) -> Result<Option<Snapshot>, StorageError> {
        Ok(self.lock().clone())
    }

    fn write(
        &self,
        bytes: &[u8],
        expected: Option<&Version>,
        _deadline: Instant,
    ) -> Result<Version, WriteError> {
        let mut state = self.lock();
        let current = state.as_ref().map(|s| &s.version);
        if current != expected {
            return Err(WriteError::Conflict);
        }
        let snapshot = Snapshot::new(bytes.to_vec());
        let version = snapshot.version;
        *state = Some(snapshot);
        Ok(version)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

const LOCK_POLL: Duration = Duration::from_millis(5);

/// History file on a local filesystem.
///
/// Writes hold an exclusive `flock` on a sibling `<file>.lock`, re-check the
/// version under it, then write a temp file and rename it over the target.
/// The lock file itself is never removed; the kernel drops the lock when its
/// holder exits, so a killed writer cannot wedge the history.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    fn read_current(&self) -> io::Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn acquire_lock(&self, deadline: Instant) -> Result<Flock<File>, StorageError> {
        let started = Instant::now();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?;
        loop {
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(guard) => return Ok(guard),
                Err((f, errno)) if errno == Errno::EWOULDBLOCK => file = f,
                Err((_, errno)) => return Err(io::Error::from(errno).into()),
            }

            if Instant::now() >= deadline {
                tracing::warn!(lock = %self.lock_path.display(), "gave up waiting for lock");
                return Err(StorageError::Timeout {
                    waited: started.elapsed(),
                });
            }
            thread::sleep(LOCK_POLL);
        }
    }

    fn replace(&self, bytes: &[u8]) -> io::Result<()> {
        let dir = self.dir();
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        // Make the rename itself durable where the platform allows it.
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }
        Ok(())
    }
}

impl HistoryBackend for FileBackend {
    fn read(&self) -> Result<Option<Snapshot>, StorageError> {
        Ok(self.read_current()?.map(Snapshot::new))
    }

    fn write(
        &self,
        bytes: &[u8],
        expected: Option<&Version>,
        deadline: Instant,
    ) -> Result<Version, WriteError> {
        // The lock file lives next to the history, so the directory comes first.
        fs::create_dir_all(self.dir())?;
        let _lock = self.acquire_lock(deadline)?;

        let current = self.read_current()?.map(|b| Version::of(&b));
        if current.as_ref() != expected {
            return Err(WriteError::Conflict);
        }

        self.replace(bytes)?;
        Ok(Version::of(bytes))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Hold the lock of `backend` as another process would.
#[cfg(test)]
pub(crate) fn hold_lock(backend: &FileBackend) -> Flock<File> {
    fs::create_dir_all(backend.dir()).unwrap();
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(backend.lock_path())
        .unwrap();
    Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, e)| e).unwrap()
}
