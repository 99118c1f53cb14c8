//! Settings and collaborators shared by the deployment commands

use anyhow::Context as _;
use stackflow_config::Settings;
use stackflow_container::{DockerRuntime, RetryPolicy};
use stackflow_deploy::{
    EnvironmentId, FileCatalog, FileManifestSource, JsonFileRepository, ProductDeploymentOrchestrator,
    UpgradeEngine,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub struct Context {
    pub settings: Settings,
    pub environment: EnvironmentId,
}

impl Context {
    pub fn load(config: Option<&Path>, environment: Option<String>) -> anyhow::Result<Self> {
        let settings = Settings::load(config).context("failed to load config")?;
        let environment = EnvironmentId::new(environment.unwrap_or_else(|| settings.environment.clone()));
        Ok(Self {
            settings,
            environment,
        })
    }

    pub fn repository(&self) -> JsonFileRepository {
        JsonFileRepository::new(&self.settings.state_dir)
    }

    pub async fn catalog(&self) -> anyhow::Result<FileCatalog> {
        let path = self
            .settings
            .catalog
            .as_ref()
            .context("no catalog configured; set `catalog` in stackflow.yml")?;
        FileCatalog::load(path)
            .await
            .with_context(|| format!("failed to load catalog {}", path.display()))
    }

    pub async fn upgrade_engine(&self) -> anyhow::Result<UpgradeEngine> {
        Ok(UpgradeEngine::new(Arc::new(self.catalog().await?)))
    }

    /// Full orchestrator against the Docker daemon
    pub async fn orchestrator(&self) -> anyhow::Result<ProductDeploymentOrchestrator> {
        let source = Arc::new(FileManifestSource);
        let catalog = Arc::new(self.catalog().await?.with_source(source.clone()));

        let runtime = match &self.settings.docker_host {
            Some(host) => DockerRuntime::connect_to(host),
            None => DockerRuntime::connect(),
        }
        .context("failed to connect to Docker")?;
        runtime
            .ping()
            .await
            .context("Docker daemon is not reachable")?;

        let orchestrator = ProductDeploymentOrchestrator::new(
            catalog,
            source,
            Arc::new(self.repository()),
            Arc::new(runtime),
        )?
        .with_lock_dir(&self.settings.state_dir)
        .with_retry(RetryPolicy {
            backoff: Duration::from_millis(self.settings.retry_backoff_ms),
            ..Default::default()
        });
        Ok(orchestrator)
    }
}
