//! Docker implementation of `ContainerRuntime`

#![allow(deprecated)]

use crate::converter::{parse_image_tag, service_to_container_config};
use crate::error::{Result, RuntimeError};
use crate::runtime::{
    ApplyOutcome, ContainerRuntime, MANAGED_LABEL, ResourceHandle, SPEC_HASH_LABEL, spec_hash,
};
use async_trait::async_trait;
use bollard::Docker;
use bollard::errors::Error as DockerError;
use bollard::models::{NetworkCreateRequest, VolumeCreateOptions};
use bollard::query_parameters::{
    InspectContainerOptions, InspectNetworkOptions, RemoveContainerOptions, RemoveVolumeOptions,
    StartContainerOptions, StopContainerOptions,
};
use futures_util::stream::StreamExt;
use stackflow_core::{NetworkSpec, ResolvedService, ResourceKind, ResourceSpec, VolumeSpec};
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

/// Seconds before a runtime call is abandoned
const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct DockerRuntime {
    docker: Docker,
}

fn is_status(err: &DockerError, code: u16) -> bool {
    matches!(err, DockerError::DockerResponseServerError { status_code, .. } if *status_code == code)
}

fn labels(hash: &str) -> HashMap<String, String> {
    HashMap::from([
        (MANAGED_LABEL.to_string(), "true".to_string()),
        (SPEC_HASH_LABEL.to_string(), hash.to_string()),
    ])
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect using `DOCKER_HOST` or the platform default socket
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::ConnectionFailed(e.to_string()))?;
        Ok(Self::new(docker))
    }

    /// Connect to an explicit `unix://`, `tcp://` or `http://` endpoint
    pub fn connect_to(host: &str) -> Result<Self> {
        let connected = match host.strip_prefix("unix://") {
            Some(path) => {
                Docker::connect_with_socket(path, DEFAULT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            }
            None => {
                let addr = host.replacen("tcp://", "http://", 1);
                Docker::connect_with_http(&addr, DEFAULT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            }
        };
        let docker = connected.map_err(|e| RuntimeError::ConnectionFailed(e.to_string()))?;
        Ok(Self::new(docker))
    }

    /// Fail early when the daemon is unreachable
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| RuntimeError::ConnectionFailed(e.to_string()))?;
        Ok(())
    }

    async fn apply_network(&self, name: &str, network: &NetworkSpec, hash: &str) -> Result<ApplyOutcome> {
        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions>)
            .await
        {
            Ok(existing) => {
                let current = existing.labels.as_ref().and_then(|l| l.get(SPEC_HASH_LABEL));
                if current.map(String::as_str) != Some(hash) && !network.external {
                    warn!(network = %name, "Network differs from its spec; leaving it in place");
                }
                return Ok(ApplyOutcome::Unchanged);
            }
            Err(e) if is_status(&e, 404) && network.external => {
                return Err(RuntimeError::NotFound(format!(
                    "external network `{name}` does not exist"
                )));
            }
            Err(e) if is_status(&e, 404) => {}
            Err(e) => return Err(e.into()),
        }

        let request = NetworkCreateRequest {
            name: name.to_string(),
            driver: Some(network.driver_or_default().to_string()),
            labels: Some(labels(hash)),
            ..Default::default()
        };

        match self.docker.create_network(request).await {
            Ok(_) => {
                info!(network = %name, "Created network");
                Ok(ApplyOutcome::Created)
            }
            // Created concurrently
            Err(e) if is_status(&e, 409) => Ok(ApplyOutcome::Unchanged),
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_volume(&self, name: &str, volume: &VolumeSpec, hash: &str) -> Result<ApplyOutcome> {
        match self.docker.inspect_volume(name).await {
            Ok(existing) => {
                if existing.labels.get(SPEC_HASH_LABEL).map(String::as_str) != Some(hash)
                    && !volume.external
                {
                    warn!(volume = %name, "Volume differs from its spec; leaving it in place");
                }
                return Ok(ApplyOutcome::Unchanged);
            }
            Err(e) if is_status(&e, 404) && volume.external => {
                return Err(RuntimeError::NotFound(format!(
                    "external volume `{name}` does not exist"
                )));
            }
            Err(e) if is_status(&e, 404) => {}
            Err(e) => return Err(e.into()),
        }

        let options = VolumeCreateOptions {
            name: Some(name.to_string()),
            driver: Some(volume.driver.clone().unwrap_or_else(|| "local".to_string())),
            labels: Some(labels(hash)),
            ..Default::default()
        };

        self.docker.create_volume(options).await?;
        info!(volume = %name, "Created volume");
        Ok(ApplyOutcome::Created)
    }

    async fn apply_container(
        &self,
        name: &str,
        service: &ResolvedService,
        hash: &str,
    ) -> Result<(ApplyOutcome, Option<String>)> {
        let mut outcome = ApplyOutcome::Created;

        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => {
                let current = info
                    .config
                    .as_ref()
                    .and_then(|c| c.labels.as_ref())
                    .and_then(|l| l.get(SPEC_HASH_LABEL));

                if current.map(String::as_str) == Some(hash) {
                    let running = info.state.as_ref().and_then(|s| s.running).unwrap_or(false);
                    if !running {
                        debug!(container = %name, "Starting stopped container");
                        self.start(name).await?;
                    }
                    return Ok((ApplyOutcome::Unchanged, info.id));
                }

                info!(container = %name, "Container differs from its spec; recreating");
                self.stop_and_remove(name).await?;
                outcome = ApplyOutcome::Updated;
            }
            Err(e) if is_status(&e, 404) => {}
            Err(e) => return Err(e.into()),
        }

        self.ensure_image(&service.image).await?;

        let (config, options) = service_to_container_config(name, service, hash);
        let created = match self.docker.create_container(Some(options), config).await {
            Ok(created) => created,
            Err(e) if is_status(&e, 404) => {
                return Err(RuntimeError::ImageNotFound {
                    image: service.image.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        self.start(name).await?;
        info!(container = %name, image = %service.image, "Container started");
        Ok((outcome, Some(created.id)))
    }

    async fn start(&self, name: &str) -> Result<()> {
        match self
            .docker
            .start_container(name, None::<StartContainerOptions>)
            .await
        {
            Ok(_) => Ok(()),
            // Already running
            Err(e) if is_status(&e, 304) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn stop_and_remove(&self, name: &str) -> Result<()> {
        match self
            .docker
            .stop_container(name, None::<StopContainerOptions>)
            .await
        {
            Ok(_) => {}
            Err(e) if is_status(&e, 304) || is_status(&e, 404) => {}
            Err(e) => return Err(e.into()),
        }

        match self
            .docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Pull the image unless it is already present locally
    async fn ensure_image(&self, image: &str) -> Result<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(e) if is_status(&e, 404) => {}
            Err(e) => return Err(e.into()),
        }

        let (image_name, tag) = parse_image_tag(image);
        info!(image = %image, "Pulling image");

        let options = bollard::image::CreateImageOptions {
            from_image: image_name,
            tag,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            match progress {
                Ok(bollard::models::CreateImageInfo {
                    status: Some(status),
                    ..
                }) => {
                    debug!(image = %image, status = %status, "Pull progress");
                }
                Ok(_) => {}
                Err(e) if is_status(&e, 404) => {
                    return Err(RuntimeError::ImageNotFound {
                        image: image.to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    #[instrument(skip(self, spec), fields(kind = %spec.kind()))]
    async fn create_or_update(&self, name: &str, spec: &ResourceSpec) -> Result<ResourceHandle> {
        let hash = spec_hash(spec)?;

        let (outcome, id) = match spec {
            ResourceSpec::Network(network) => (self.apply_network(name, network, &hash).await?, None),
            ResourceSpec::Volume(volume) => (self.apply_volume(name, volume, &hash).await?, None),
            ResourceSpec::Service(service) => self.apply_container(name, service, &hash).await?,
        };

        Ok(ResourceHandle {
            kind: spec.kind(),
            name: name.to_string(),
            id,
            outcome,
        })
    }

    #[instrument(skip(self))]
    async fn remove(&self, kind: ResourceKind, name: &str) -> Result<()> {
        let result = match kind {
            ResourceKind::Service => return self.stop_and_remove(name).await,
            ResourceKind::Network => self.docker.remove_network(name).await,
            ResourceKind::Volume => {
                self.docker
                    .remove_volume(name, None::<RemoveVolumeOptions>)
                    .await
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if is_status(&e, 404) => {
                debug!(%kind, name, "Already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, kind: ResourceKind, name: &str) -> Result<bool> {
        let result = match kind {
            ResourceKind::Service => self
                .docker
                .inspect_container(name, None::<InspectContainerOptions>)
                .await
                .map(|_| ()),
            ResourceKind::Network => self
                .docker
                .inspect_network(name, None::<InspectNetworkOptions>)
                .await
                .map(|_| ()),
            ResourceKind::Volume => self.docker.inspect_volume(name).await.map(|_| ()),
        };

        match result {
            Ok(()) => Ok(true),
            Err(e) if is_status(&e, 404) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
