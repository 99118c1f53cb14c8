//! Deployment plan types

use super::network::NetworkSpec;
use super::port::Port;
use super::service::RestartPolicy;
use super::volume::{Mount, VolumeSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of runtime resource a plan step manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    Volume,
    Service,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Network => write!(f, "network"),
            ResourceKind::Volume => write!(f, "volume"),
            ResourceKind::Service => write!(f, "service"),
        }
    }
}

/// Reference to a runtime resource owned by a stack
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Service with every placeholder substituted and every reference mapped to
/// its runtime name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedService {
    /// Service name within the stack (also its network alias)
    pub service: String,
    pub image: String,
    pub ports: Vec<Port>,
    pub environment: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    /// Runtime network names
    pub networks: Vec<String>,
    pub depends_on: Vec<String>,
    pub command: Option<Vec<String>>,
    pub restart: RestartPolicy,
    pub labels: BTreeMap<String, String>,
}

/// Resolved specification of a single step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    Network(NetworkSpec),
    Volume(VolumeSpec),
    Service(ResolvedService),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Network(_) => ResourceKind::Network,
            ResourceSpec::Volume(_) => ResourceKind::Volume,
            ResourceSpec::Service(_) => ResourceKind::Service,
        }
    }

    /// External networks and volumes are shared and never owned by a stack
    pub fn is_external(&self) -> bool {
        match self {
            ResourceSpec::Network(n) => n.external,
            ResourceSpec::Volume(v) => v.external,
            ResourceSpec::Service(_) => false,
        }
    }
}

/// One atomic resource operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Runtime resource name
    pub name: String,
    pub spec: ResourceSpec,
}

impl PlanStep {
    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    pub fn resource(&self) -> ResourceRef {
        ResourceRef::new(self.kind(), self.name.clone())
    }
}

/// Ordered steps for a single stack: networks, volumes, then services in
/// dependency order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub stack_name: String,
    pub steps: Vec<PlanStep>,
}

impl DeploymentPlan {
    pub fn service_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.kind() == ResourceKind::Service)
            .count()
    }

    /// Position of the step creating the given resource
    pub fn position(&self, kind: ResourceKind, name: &str) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.kind() == kind && s.name == name)
    }

    /// Position of the step for a service, by its name within the stack
    pub fn service_position(&self, service: &str) -> Option<usize> {
        self.steps.iter().position(|s| match &s.spec {
            ResourceSpec::Service(svc) => svc.service == service,
            _ => false,
        })
    }

    /// Resources the stack owns, in creation order
    pub fn owned_resources(&self) -> Vec<ResourceRef> {
        self.steps
            .iter()
            .filter(|s| !s.spec.is_external())
            .map(PlanStep::resource)
            .collect()
    }

    pub fn summary(&self) -> PlanSummary {
        let count = |kind| self.steps.iter().filter(|s| s.kind() == kind).count();
        PlanSummary {
            networks: count(ResourceKind::Network),
            volumes: count(ResourceKind::Volume),
            services: count(ResourceKind::Service),
        }
    }
}

/// Step counts per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSummary {
    pub networks: usize,
    pub volumes: usize,
    pub services: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} networks, {} volumes, {} services",
            self.networks, self.volumes, self.services
        )
    }
}
