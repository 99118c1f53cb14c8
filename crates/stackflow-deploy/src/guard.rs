//! One pass at a time per environment and product group
//!
//! Within a process the registry map decides; with a lock directory set,
//! each pass also holds `<dir>/locks/<env>/<group>.lock` so that separate
//! processes sharing a state directory exclude each other too.

use crate::error::{DeployError, Result};
use crate::lock::{StateLock, lock_component};
use crate::model::{EnvironmentId, ProductGroupId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

type PassKey = (EnvironmentId, ProductGroupId);

/// Registry of running passes.
///
/// `acquire` hands out a [`PassGuard`]; the scope stays taken until the guard
/// is dropped. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct DeploymentLocks {
    running: Arc<Mutex<HashMap<PassKey, CancellationToken>>>,
    lock_dir: Option<PathBuf>,
}

impl DeploymentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that also takes lock files under `state_dir`
    pub fn with_lock_dir(state_dir: impl AsRef<Path>) -> Self {
        Self {
            running: Arc::default(),
            lock_dir: Some(state_dir.as_ref().join("locks")),
        }
    }

    /// Lock file of the pair, when lock files are in use
    pub fn lock_file(&self, environment: &EnvironmentId, group: &ProductGroupId) -> Option<PathBuf> {
        self.lock_dir.as_ref().map(|dir| {
            dir.join(lock_component(environment.as_str()))
                .join(format!("{}.lock", lock_component(group.as_str())))
        })
    }

    /// Take the scope or fail immediately with `DeploymentInProgress`
    pub fn acquire(&self, environment: &EnvironmentId, group: &ProductGroupId) -> Result<PassGuard> {
        let in_progress = || DeployError::DeploymentInProgress {
            environment: environment.to_string(),
            group: group.to_string(),
        };

        let key = (environment.clone(), group.clone());
        let mut running = lock(&self.running);
        if running.contains_key(&key) {
            return Err(in_progress());
        }

        let file = match self.lock_file(environment, group) {
            Some(path) => match StateLock::try_acquire(&path)? {
                Some(file) => Some(file),
                None => {
                    if let Some(holder) = StateLock::holder(&path) {
                        debug!(holder = %holder.holder, pid = holder.pid, "Pass held by another process");
                    }
                    return Err(in_progress());
                }
            },
            None => None,
        };

        let token = CancellationToken::new();
        running.insert(key.clone(), token.clone());
        debug!(environment = %environment, group = %group, "Pass registered");

        Ok(PassGuard {
            key,
            token,
            running: Arc::clone(&self.running),
            _file: file,
        })
    }

    pub fn is_running(&self, environment: &EnvironmentId, group: &ProductGroupId) -> bool {
        lock(&self.running).contains_key(&(environment.clone(), group.clone()))
    }

    /// Cancel the running pass, if any. Returns whether one was found.
    pub fn cancel(&self, environment: &EnvironmentId, group: &ProductGroupId) -> bool {
        match lock(&self.running).get(&(environment.clone(), group.clone())) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

fn lock(
    running: &Mutex<HashMap<PassKey, CancellationToken>>,
) -> MutexGuard<'_, HashMap<PassKey, CancellationToken>> {
    running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Holds an exclusion scope; released on drop
pub struct PassGuard {
    key: PassKey,
    token: CancellationToken,
    running: Arc<Mutex<HashMap<PassKey, CancellationToken>>>,
    _file: Option<StateLock>,
}

impl PassGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        lock(&self.running).remove(&self.key);
        debug!(environment = %self.key.0, group = %self.key.1, "Pass released");
    }
}
