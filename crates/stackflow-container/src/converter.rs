//! Resolved service to Docker API parameters

#![allow(deprecated)]

use crate::runtime::{MANAGED_LABEL, SPEC_HASH_LABEL};
use bollard::container::{Config, CreateContainerOptions, NetworkingConfig};
use bollard::models::{
    EndpointSettings, HostConfig, PortBinding, RestartPolicy as DockerRestartPolicy,
    RestartPolicyNameEnum,
};
use stackflow_core::{MountSource, ResolvedService, RestartPolicy, STACK_LABEL};
use std::collections::HashMap;
use std::path::PathBuf;

/// Convert a resolved service into container create parameters.
///
/// `spec_hash` is stored as a label so a later apply can tell whether the
/// container still matches its spec.
pub fn service_to_container_config(
    container_name: &str,
    service: &ResolvedService,
    spec_hash: &str,
) -> (Config<String>, CreateContainerOptions<String>) {
    let env: Vec<String> = service
        .environment
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    // Ports
    let mut port_bindings = HashMap::new();
    let mut exposed_ports = HashMap::new();

    for port in &service.ports {
        let container_port = port.container_key();
        exposed_ports.insert(container_port.clone(), HashMap::new());

        // Unpublished ports are only exposed
        if let Some(host) = port.host {
            let host_ip = port.host_ip.as_deref().unwrap_or("0.0.0.0");
            port_bindings.insert(
                container_port,
                Some(vec![PortBinding {
                    host_ip: Some(host_ip.to_string()),
                    host_port: Some(host.to_string()),
                }]),
            );
        }
    }

    // Mounts
    let mut binds = Vec::new();
    let mut anonymous = HashMap::new();
    for mount in &service.mounts {
        let mode = if mount.read_only { "ro" } else { "rw" };
        match &mount.source {
            MountSource::Volume(name) => binds.push(format!("{}:{}:{}", name, mount.target, mode)),
            MountSource::Bind(path) => {
                let host_path = absolute_host_path(path);
                binds.push(format!("{}:{}:{}", host_path.display(), mount.target, mode));
            }
            MountSource::Anonymous => {
                anonymous.insert(mount.target.clone(), HashMap::new());
            }
        }
    }

    let primary_network = service.networks.first().cloned();

    let host_config = Some(HostConfig {
        port_bindings: Some(port_bindings),
        binds: Some(binds),
        network_mode: primary_network,
        restart_policy: Some(DockerRestartPolicy {
            name: Some(restart_policy_name(service.restart)),
            maximum_retry_count: None,
        }),
        ..Default::default()
    });

    // Labels
    let mut labels: HashMap<String, String> = service
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if let Some(stack) = service.labels.get(STACK_LABEL) {
        labels.insert("com.docker.compose.project".to_string(), stack.clone());
    }
    labels.insert(
        "com.docker.compose.service".to_string(),
        service.service.clone(),
    );
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    labels.insert(SPEC_HASH_LABEL.to_string(), spec_hash.to_string());

    // Every network gets the service name as alias
    let endpoints: HashMap<String, EndpointSettings> = service
        .networks
        .iter()
        .map(|network| {
            (
                network.clone(),
                EndpointSettings {
                    aliases: Some(vec![service.service.clone()]),
                    ..Default::default()
                },
            )
        })
        .collect();

    let config = Config {
        image: Some(service.image.clone()),
        env: Some(env),
        exposed_ports: Some(exposed_ports),
        volumes: if anonymous.is_empty() {
            None
        } else {
            Some(anonymous)
        },
        host_config,
        labels: Some(labels),
        cmd: service.command.clone(),
        networking_config: Some(NetworkingConfig {
            endpoints_config: endpoints,
        }),
        ..Default::default()
    };

    let options = CreateContainerOptions {
        name: container_name.to_string(),
        platform: None,
    };

    (config, options)
}

fn restart_policy_name(policy: RestartPolicy) -> RestartPolicyNameEnum {
    match policy {
        RestartPolicy::No => RestartPolicyNameEnum::NO,
        RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
        RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
    }
}

/// Relative bind sources resolve against the current directory
fn absolute_host_path(path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_relative() {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(&path)
    } else {
        path
    }
}

/// Split `name[:tag][@digest]` for image pulls; a registry port is not a tag.
///
/// A digest wins over the tag and is passed as the pull reference.
pub fn parse_image_tag(image: &str) -> (&str, &str) {
    let (reference, digest) = match image.split_once('@') {
        Some((reference, digest)) => (reference, Some(digest)),
        None => (image, None),
    };
    let (name, tag) = match reference.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') => (name, tag),
        _ => (reference, "latest"),
    };
    (name, digest.unwrap_or(tag))
}
