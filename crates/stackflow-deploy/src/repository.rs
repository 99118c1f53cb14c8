//! Deployment persistence
//!
//! `JsonFileRepository` keeps every deployment in `<state_dir>/deployments.json`;
//! the previous file is kept as `deployments.json.backup` on each write.
//! Writes hold `deployments.json.lock` and replace the state file by rename,
//! so readers never see a partial file and concurrent writers never drop
//! each other's records.

use crate::error::{DeployError, Result};
use crate::lock::StateLock;
use crate::model::{EnvironmentId, ProductDeployment, ProductDeploymentId, ProductGroupId, ProductStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;

const STATE_VERSION: u32 = 1;
const STATE_FILE: &str = "deployments.json";
const STATE_BACKUP: &str = "deployments.json.backup";
const STATE_TEMP: &str = "deployments.json.tmp";
const STATE_LOCK: &str = "deployments.json.lock";

/// How long a write waits for another writer
const WRITE_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    /// Insert or replace by id
    async fn save(&self, deployment: &ProductDeployment) -> Result<()>;

    async fn get(&self, id: &ProductDeploymentId) -> Result<Option<ProductDeployment>>;

    /// Most recent deployment of the pair, unless it has been removed
    async fn active(
        &self,
        environment: &EnvironmentId,
        group: &ProductGroupId,
    ) -> Result<Option<ProductDeployment>>;

    /// Every deployment of the pair, newest first
    async fn history(
        &self,
        environment: &EnvironmentId,
        group: &ProductGroupId,
    ) -> Result<Vec<ProductDeployment>>;

    /// Every deployment in an environment, newest first
    async fn list(&self, environment: &EnvironmentId) -> Result<Vec<ProductDeployment>>;
}

/// Saved deployments in creation order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentState {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub deployments: Vec<ProductDeployment>,
}

impl Default for DeploymentState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            deployments: Vec::new(),
        }
    }
}

impl DeploymentState {
    fn upsert(&mut self, deployment: &ProductDeployment) {
        match self.deployments.iter_mut().find(|d| d.id == deployment.id) {
            Some(existing) => *existing = deployment.clone(),
            None => self.deployments.push(deployment.clone()),
        }
        self.updated_at = Utc::now();
    }

    fn get(&self, id: &ProductDeploymentId) -> Option<ProductDeployment> {
        self.deployments.iter().find(|d| &d.id == id).cloned()
    }

    fn history(&self, environment: &EnvironmentId, group: &ProductGroupId) -> Vec<ProductDeployment> {
        self.deployments
            .iter()
            .rev()
            .filter(|d| &d.environment == environment && &d.group == group)
            .cloned()
            .collect()
    }

    fn active(&self, environment: &EnvironmentId, group: &ProductGroupId) -> Option<ProductDeployment> {
        self.deployments
            .iter()
            .rev()
            .find(|d| &d.environment == environment && &d.group == group)
            .filter(|d| d.status() != ProductStatus::Removed)
            .cloned()
    }

    fn list(&self, environment: &EnvironmentId) -> Vec<ProductDeployment> {
        self.deployments
            .iter()
            .rev()
            .filter(|d| &d.environment == environment)
            .cloned()
            .collect()
    }
}

#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<DeploymentState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentRepository for InMemoryRepository {
    async fn save(&self, deployment: &ProductDeployment) -> Result<()> {
        self.state.lock().await.upsert(deployment);
        Ok(())
    }

    async fn get(&self, id: &ProductDeploymentId) -> Result<Option<ProductDeployment>> {
        Ok(self.state.lock().await.get(id))
    }

    async fn active(
        &self,
        environment: &EnvironmentId,
        group: &ProductGroupId,
    ) -> Result<Option<ProductDeployment>> {
        Ok(self.state.lock().await.active(environment, group))
    }

    async fn history(
        &self,
        environment: &EnvironmentId,
        group: &ProductGroupId,
    ) -> Result<Vec<ProductDeployment>> {
        Ok(self.state.lock().await.history(environment, group))
    }

    async fn list(&self, environment: &EnvironmentId) -> Result<Vec<ProductDeployment>> {
        Ok(self.state.lock().await.list(environment))
    }
}

/// Repository backed by a JSON state file
pub struct JsonFileRepository {
    state_dir: PathBuf,
    /// Serialises writers of this instance before they contend for the file lock
    write_lock: Mutex<()>,
}

impl JsonFileRepository {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir.join(STATE_BACKUP)
    }

    fn temp_path(&self) -> PathBuf {
        self.state_dir.join(STATE_TEMP)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir.join(STATE_LOCK)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        if !self.state_dir.exists() {
            fs::create_dir_all(&self.state_dir).await?;
            tracing::debug!("Created state directory: {}", self.state_dir.display());
        }
        Ok(())
    }

    pub async fn load(&self) -> Result<DeploymentState> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("State file not found, returning empty state");
            return Ok(DeploymentState::default());
        }

        let content = fs::read_to_string(&path).await?;
        let state: DeploymentState = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(DeployError::Repository(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!("Loaded state with {} deployments", state.deployments.len());
        Ok(state)
    }

    /// Replace the state file. Callers hold the write lock.
    async fn store(&self, state: &DeploymentState) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let temp = self.temp_path();

        let content = serde_json::to_string_pretty(state)?;
        fs::write(&temp, content).await?;

        if path.exists() {
            fs::copy(&path, self.backup_path()).await?;
        }
        fs::rename(&temp, &path).await?;

        tracing::debug!("Saved state with {} deployments", state.deployments.len());
        Ok(())
    }
}

#[async_trait]
impl DeploymentRepository for JsonFileRepository {
    async fn save(&self, deployment: &ProductDeployment) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.ensure_state_dir().await?;
        let _file = StateLock::acquire(&self.lock_path(), WRITE_LOCK_TIMEOUT).await?;

        let mut state = self.load().await?;
        state.upsert(deployment);
        self.store(&state).await
    }

    async fn get(&self, id: &ProductDeploymentId) -> Result<Option<ProductDeployment>> {
        Ok(self.load().await?.get(id))
    }

    async fn active(
        &self,
        environment: &EnvironmentId,
        group: &ProductGroupId,
    ) -> Result<Option<ProductDeployment>> {
        Ok(self.load().await?.active(environment, group))
    }

    async fn history(
        &self,
        environment: &EnvironmentId,
        group: &ProductGroupId,
    ) -> Result<Vec<ProductDeployment>> {
        Ok(self.load().await?.history(environment, group))
    }

    async fn list(&self, environment: &EnvironmentId) -> Result<Vec<ProductDeployment>> {
        Ok(self.load().await?.list(environment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StackDeployment, StackStatus};
    use tempfile::tempdir;

    fn deployment(version: &str) -> ProductDeployment {
        let mut deployment = ProductDeployment::new("prod".into(), "shop".into(), "Shop", version);
        deployment
            .stacks
            .push(StackDeployment::new("app", "App", format!("shop@{version}/app"), 0));
        deployment
    }

    #[tokio::test]
    async fn test_state_save_load() {
        let temp_dir = tempdir().unwrap();
        let repo = JsonFileRepository::new(temp_dir.path());

        let first = deployment("1.0");
        repo.save(&first).await.unwrap();

        let loaded = repo.get(&first.id).await.unwrap().unwrap();
        assert_eq!(loaded.version, "1.0");
        assert!(temp_dir.path().join(STATE_FILE).exists());

        // Second write keeps the previous file as backup
        let mut updated = first.clone();
        updated.stacks[0].status = StackStatus::Running;
        repo.save(&updated).await.unwrap();
        assert!(temp_dir.path().join(STATE_BACKUP).exists());

        let state = repo.load().await.unwrap();
        assert_eq!(state.deployments.len(), 1);
        assert_eq!(state.deployments[0].status(), ProductStatus::Running);
    }

    async fn save_versions(repo: &JsonFileRepository, major: &str) {
        for minor in 0..5 {
            repo.save(&deployment(&format!("{major}.{minor}"))).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_concurrent_writers_keep_every_record() {
        let temp_dir = tempdir().unwrap();
        let first = JsonFileRepository::new(temp_dir.path());
        let second = JsonFileRepository::new(temp_dir.path());

        tokio::join!(save_versions(&first, "1"), save_versions(&second, "2"));

        let state = first.load().await.unwrap();
        assert_eq!(state.deployments.len(), 10);
        assert!(!temp_dir.path().join(STATE_LOCK).exists());
        assert!(!temp_dir.path().join(STATE_TEMP).exists());
    }

    #[tokio::test]
    async fn test_state_file_survives_backup() {
        let temp_dir = tempdir().unwrap();
        let repo = JsonFileRepository::new(temp_dir.path());

        repo.save(&deployment("1.0")).await.unwrap();
        repo.save(&deployment("1.1")).await.unwrap();

        // The backup is a copy; the state file is never moved away
        let backup: DeploymentState = serde_json::from_str(
            &std::fs::read_to_string(temp_dir.path().join(STATE_BACKUP)).unwrap(),
        )
        .unwrap();
        assert_eq!(backup.deployments.len(), 1);
        assert_eq!(repo.load().await.unwrap().deployments.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_state() {
        let temp_dir = tempdir().unwrap();
        let repo = JsonFileRepository::new(temp_dir.path().join("missing"));

        let state = repo.load().await.unwrap();
        assert!(state.deployments.is_empty());
    }

    #[tokio::test]
    async fn test_newer_state_version_rejected() {
        let temp_dir = tempdir().unwrap();
        std::fs::write(
            temp_dir.path().join(STATE_FILE),
            r#"{"version": 99, "updated_at": "2026-01-01T00:00:00Z", "deployments": []}"#,
        )
        .unwrap();

        let repo = JsonFileRepository::new(temp_dir.path());
        assert!(matches!(repo.load().await, Err(DeployError::Repository(_))));
    }

    #[tokio::test]
    async fn test_active_and_history() {
        let repo = InMemoryRepository::new();
        let env = EnvironmentId::from("prod");
        let group = ProductGroupId::from("shop");

        let old = deployment("1.0");
        let new = deployment("1.1");
        repo.save(&old).await.unwrap();
        repo.save(&new).await.unwrap();

        let active = repo.active(&env, &group).await.unwrap().unwrap();
        assert_eq!(active.version, "1.1");

        let history = repo.history(&env, &group).await.unwrap();
        let versions: Vec<&str> = history.iter().map(|d| d.version.as_str()).collect();
        assert_eq!(versions, vec!["1.1", "1.0"]);

        let mut removed = new.clone();
        removed.stacks[0].status = StackStatus::Removed;
        repo.save(&removed).await.unwrap();
        assert!(repo.active(&env, &group).await.unwrap().is_none());
        assert_eq!(repo.list(&env).await.unwrap().len(), 2);
    }
}
