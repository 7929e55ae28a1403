//! One-time remote initialization shared by parallel test workers.
//!
//! Workers coordinate through two files in the cache directory: an exclusive,
//! non-blocking `flock` on `.initialization_lock` elects the worker that
//! initializes, and `.initialization_complete` tells everyone else it is done.
//! The marker is written before the lock is released, so a worker that gets the
//! lock later always sees it.
//!
//! The marker holds the session id of the run that wrote it. A marker from a
//! different session is discarded, so every `cargo test` run initializes once.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use crate::config::TestingConfig;
use crate::error::{Error, Result};

/// Lock sentinel file name.
pub const LOCK_FILE_NAME: &str = ".initialization_lock";

/// Completion sentinel file name.
pub const COMPLETE_FILE_NAME: &str = ".initialization_complete";

/// How long a waiting worker polls for the completion marker.
pub const DEFAULT_WAIT_CEILING: Duration = Duration::from_secs(600);

/// Age after which a completion marker belongs to an earlier session.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(6 * 60 * 60);

const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Environment variable that overrides the derived session id.
pub const SESSION_ID_ENV: &str = "KEEPER_SESSION_ID";

/// Identifies the current test session.
///
/// Uses `KEEPER_SESSION_ID` when set. Otherwise the parent process id, which
/// is shared by every test binary `cargo test` or a test runner spawns for one
/// run and differs between runs.
pub fn current_session_id() -> String {
    match std::env::var(SESSION_ID_ENV) {
        Ok(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => format!("ppid-{}", parent_process_id()),
    }
}

#[cfg(unix)]
fn parent_process_id() -> u32 {
    // SAFETY: getppid has no preconditions and cannot fail.
    let ppid = unsafe { libc::getppid() };
    u32::try_from(ppid).unwrap_or_default()
}

#[cfg(not(unix))]
fn parent_process_id() -> u32 {
    std::process::id()
}

/// How [`SessionCoordinator::ensure_initialized`] finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// This caller ran the initialization.
    Performed,
    /// Another caller had already initialized.
    Observed,
}

/// Elects one initializer per session across threads and processes.
#[derive(Debug, Clone)]
pub struct SessionCoordinator {
    cache_dir: PathBuf,
    wait_ceiling: Duration,
    check_interval: Duration,
    stale_after: Duration,
    session_id: Option<String>,
}

impl SessionCoordinator {
    /// Creates a coordinator using markers in `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            wait_ceiling: DEFAULT_WAIT_CEILING,
            check_interval: DEFAULT_CHECK_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
            session_id: None,
        }
    }

    /// Creates a coordinator for the configured cache directory, scoped to
    /// [`current_session_id`].
    pub fn from_config(config: &TestingConfig) -> Self {
        Self::new(config.cache_dir.clone()).with_session_id(current_session_id())
    }

    /// Ties the completion marker to `id`. Markers written under another id
    /// are treated as stale.
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Sets how long waiters poll for the completion marker.
    pub fn with_wait_ceiling(mut self, ceiling: Duration) -> Self {
        self.wait_ceiling = ceiling;
        self
    }

    /// Sets the delay between marker checks while waiting.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Sets the age after which a completion marker is ignored.
    pub fn with_stale_after(mut self, age: Duration) -> Self {
        self.stale_after = age;
        self
    }

    /// Path of the lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.cache_dir.join(LOCK_FILE_NAME)
    }

    /// Path of the completion marker.
    pub fn marker_path(&self) -> PathBuf {
        self.cache_dir.join(COMPLETE_FILE_NAME)
    }

    /// Deletes both sentinel files so the next call initializes again.
    pub fn reset(&self) -> Result<()> {
        for path in [self.marker_path(), self.lock_path()] {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed sentinel"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Whether a current completion marker exists. A stale one is removed.
    ///
    /// A marker is stale when it is older than `stale_after` or, with a session
    /// id set, when it was written by another session.
    pub fn is_complete(&self) -> bool {
        let marker = self.marker_path();
        let modified = match std::fs::metadata(&marker).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return marker.exists(),
        };

        let age = SystemTime::now().duration_since(modified).unwrap_or_default();
        if age > self.stale_after {
            tracing::info!(
                marker = %marker.display(),
                ?age,
                "ignoring completion marker from an earlier session"
            );
            let _ = std::fs::remove_file(&marker);
            return false;
        }

        if let Some(session_id) = &self.session_id {
            let written_by = std::fs::read_to_string(&marker).unwrap_or_default();
            if written_by.trim() != session_id.as_str() {
                tracing::info!(
                    marker = %marker.display(),
                    written_by = written_by.trim(),
                    session_id = %session_id,
                    "ignoring completion marker from another session"
                );
                let _ = std::fs::remove_file(&marker);
                return false;
            }
        }
        true
    }

    /// Writes the marker through a rename so readers never see it half written.
    fn write_marker(&self) -> Result<()> {
        let staging = self.cache_dir.join(format!("{}.tmp", COMPLETE_FILE_NAME));
        std::fs::write(&staging, self.session_id.as_deref().unwrap_or(""))?;
        std::fs::rename(&staging, self.marker_path())?;
        Ok(())
    }

    /// Runs `init` exactly once across all coordinators sharing the cache directory.
    ///
    /// Returns [`InitOutcome::Observed`] without calling `init` when another
    /// caller has already finished. A caller that loses the lock race waits for
    /// the completion marker, retrying the lock while it waits so a failed or
    /// crashed initializer is replaced. After the wait ceiling it fails with
    /// [`Error::InitializationTimeout`]. An error from `init` is returned as-is
    /// and leaves no marker behind.
    pub fn ensure_initialized<F>(&self, init: F) -> Result<InitOutcome>
    where
        F: FnOnce() -> Result<()>,
    {
        std::fs::create_dir_all(&self.cache_dir)?;
        let start = Instant::now();
        let mut init = Some(init);

        loop {
            if self.is_complete() {
                return Ok(InitOutcome::Observed);
            }

            if let Some(_lock) = SessionLock::try_acquire(&self.lock_path())? {
                if self.is_complete() {
                    return Ok(InitOutcome::Observed);
                }

                let Some(init) = init.take() else {
                    return Err(Error::Config(
                        "initialization already attempted by this caller".to_string(),
                    ));
                };

                tracing::info!(
                    cache_dir = %self.cache_dir.display(),
                    session_id = self.session_id.as_deref().unwrap_or("-"),
                    "performing session initialization"
                );
                init()?;
                self.write_marker()?;
                tracing::info!("session initialization complete");
                return Ok(InitOutcome::Performed);
            }

            let elapsed = start.elapsed();
            if elapsed >= self.wait_ceiling {
                return Err(Error::InitializationTimeout {
                    marker: self.marker_path(),
                    waited: elapsed,
                });
            }
            tracing::debug!(?elapsed, "waiting for another worker to finish initialization");
            std::thread::sleep(self.check_interval.min(self.wait_ceiling - elapsed));
        }
    }
}

/// Held exclusive lock on the lock file; released on drop.
struct SessionLock {
    #[cfg(unix)]
    file: File,
    #[cfg(not(unix))]
    path: PathBuf,
}

impl SessionLock {
    /// Returns `None` when someone else holds the lock.
    #[cfg(unix)]
    fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        if try_flock_exclusive(&file)? {
            Ok(Some(Self { file }))
        } else {
            Ok(None)
        }
    }

    #[cfg(not(unix))]
    fn try_acquire(path: &Path) -> Result<Option<Self>> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => Ok(Some(Self {
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for SessionLock {
    #[cfg(unix)]
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor is owned by `self.file` and still open.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }

    #[cfg(not(unix))]
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Tries to take an exclusive lock without blocking.
///
/// Returns `Ok(false)` if another open file description holds it.
#[cfg(unix)]
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: flock is a POSIX call on a descriptor owned by `file`.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Ok(false);
    }
    Err(err)
}
