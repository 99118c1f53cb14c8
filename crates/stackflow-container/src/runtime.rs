//! Container runtime abstraction

use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stackflow_core::{ResourceKind, ResourceSpec};

/// Label holding the hash of the spec a resource was created from
pub const SPEC_HASH_LABEL: &str = "stackflow.spec-hash";
/// Label marking resources created by stackflow
pub const MANAGED_LABEL: &str = "stackflow.managed";

/// What `create_or_update` had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Resource as it exists in the runtime after an apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub name: String,
    /// Runtime-assigned identifier, if the runtime reports one
    pub id: Option<String>,
    pub outcome: ApplyOutcome,
}

/// Idempotent operations against a container runtime.
///
/// `create_or_update` on a resource that already exists with the same spec
/// must report `Unchanged`; `remove` on an absent resource must succeed.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create_or_update(&self, name: &str, spec: &ResourceSpec) -> Result<ResourceHandle>;

    async fn remove(&self, kind: ResourceKind, name: &str) -> Result<()>;

    async fn exists(&self, kind: ResourceKind, name: &str) -> Result<bool>;
}

/// Stable digest of a resolved spec, used to detect drift
pub fn spec_hash(spec: &ResourceSpec) -> Result<String> {
    let json = serde_json::to_vec(spec).map_err(|e| RuntimeError::InvalidSpec(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&json);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_core::NetworkSpec;

    fn network(driver: Option<&str>) -> ResourceSpec {
        ResourceSpec::Network(NetworkSpec {
            name: "shop_default".to_string(),
            driver: driver.map(str::to_string),
            external: false,
        })
    }

    #[test]
    fn test_spec_hash_is_stable() {
        let a = spec_hash(&network(None)).unwrap();
        let b = spec_hash(&network(None)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_spec_hash_changes_with_spec() {
        let a = spec_hash(&network(None)).unwrap();
        let b = spec_hash(&network(Some("overlay"))).unwrap();
        assert_ne!(a, b);
    }
}
