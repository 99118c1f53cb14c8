//! Lock files shared between stackflow processes
//!
//! A lock is a file created with `create_new`, so only one process can hold
//! it. It records who took it; a lock older than [`STALE_LOCK_AGE`] is
//! assumed abandoned and taken over.

use crate::error::{DeployError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Age after which a lock is treated as left behind by a dead process
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(60 * 60);

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Contents of a lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub holder: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    fn current() -> Self {
        Self {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }

    fn is_stale(&self) -> bool {
        Utc::now()
            .signed_duration_since(self.acquired_at)
            .to_std()
            .is_ok_and(|age| age >= STALE_LOCK_AGE)
    }
}

/// Held lock file; removed on drop
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl StateLock {
    /// Take the lock at `path`, or `None` while another holder has it
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Second round runs only after a stale lock was cleared
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let info = LockInfo::current();
                    file.write_all(serde_json::to_string_pretty(&info)?.as_bytes())?;
                    debug!(path = %path.display(), "Acquired lock");
                    return Ok(Some(Self {
                        path: path.to_path_buf(),
                    }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !clear_if_stale(path)? {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(None)
    }

    /// Wait up to `timeout` for the lock at `path`
    pub async fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(lock);
            }
            if Instant::now() >= deadline {
                let holder = Self::holder(path)
                    .map(|info| format!("{} (pid {}) since {}", info.holder, info.pid, info.acquired_at))
                    .unwrap_or_else(|| "an unknown holder".to_string());
                return Err(DeployError::Repository(format!(
                    "{} is locked by {holder}",
                    path.display()
                )));
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Who holds the lock at `path`, if it is readable
    pub fn holder(path: &Path) -> Option<LockInfo> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Released lock"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to release lock"),
        }
    }
}

/// Remove the lock at `path` when it is stale. Returns whether it is gone.
fn clear_if_stale(path: &Path) -> Result<bool> {
    let stale = match StateLock::holder(path) {
        Some(info) if info.is_stale() => {
            warn!(holder = %info.holder, pid = info.pid, since = %info.acquired_at, "Removing stale lock");
            true
        }
        Some(info) => {
            debug!(holder = %info.holder, pid = info.pid, "Lock is held");
            false
        }
        // Unreadable: the holder may still be writing it, so go by file age
        None => match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => modified.elapsed().is_ok_and(|age| age >= STALE_LOCK_AGE),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        },
    };

    if stale {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(stale)
}

/// File-name-safe form of an id
pub(crate) fn lock_component(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
