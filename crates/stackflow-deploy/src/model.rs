//! Product deployment aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackflow_core::ResourceRef;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductDeploymentId(Uuid);

impl ProductDeploymentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for ProductDeploymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProductDeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Target environment (host or namespace) a product is deployed to
    EnvironmentId
);
string_id!(
    /// Catalog product family; every version of a product shares it
    ProductGroupId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackStatus {
    Pending,
    Deploying,
    Running,
    Failed,
    Removing,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Pending,
    Deploying,
    Running,
    PartiallyFailed,
    Failed,
    Removing,
    Removed,
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StackStatus::Pending => "pending",
            StackStatus::Deploying => "deploying",
            StackStatus::Running => "running",
            StackStatus::Failed => "failed",
            StackStatus::Removing => "removing",
            StackStatus::Removed => "removed",
        };
        f.write_str(s)
    }
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProductStatus::Pending => "pending",
            ProductStatus::Deploying => "deploying",
            ProductStatus::Running => "running",
            ProductStatus::PartiallyFailed => "partially_failed",
            ProductStatus::Failed => "failed",
            ProductStatus::Removing => "removing",
            ProductStatus::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// Aggregate status of a set of stack statuses.
///
/// Removed stacks are ignored unless every stack is removed.
pub fn derive_status(statuses: &[StackStatus]) -> ProductStatus {
    use StackStatus as S;

    if statuses.is_empty() {
        return ProductStatus::Pending;
    }
    let any = |s: S| statuses.iter().any(|x| *x == s);

    if any(S::Removing) {
        return ProductStatus::Removing;
    }
    if any(S::Deploying) {
        return ProductStatus::Deploying;
    }

    let live: Vec<S> = statuses.iter().copied().filter(|s| *s != S::Removed).collect();
    if live.is_empty() {
        return ProductStatus::Removed;
    }

    let live_any = |s: S| live.contains(&s);
    if live_any(S::Failed) {
        return if live_any(S::Pending) || !live_any(S::Running) {
            ProductStatus::Failed
        } else {
            ProductStatus::PartiallyFailed
        };
    }

    if live.iter().all(|s| *s == S::Running) {
        ProductStatus::Running
    } else if live.iter().all(|s| *s == S::Pending) {
        ProductStatus::Pending
    } else {
        ProductStatus::Deploying
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackDeployment {
    pub stack_name: String,
    pub display_name: String,
    /// `<group>@<version>/<stack>`
    pub catalog_stack_id: String,
    /// Runtime project name the stack's resources are prefixed with
    pub runtime_id: Option<String>,
    pub status: StackStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub order: usize,
    pub service_count: usize,
    #[serde(default)]
    pub is_new_in_upgrade: bool,
    /// Owned resources applied by the last pass, in creation order
    #[serde(default)]
    pub resources: Vec<ResourceRef>,
}

impl StackDeployment {
    pub fn new(
        stack_name: impl Into<String>,
        display_name: impl Into<String>,
        catalog_stack_id: impl Into<String>,
        order: usize,
    ) -> Self {
        Self {
            stack_name: stack_name.into(),
            display_name: display_name.into(),
            catalog_stack_id: catalog_stack_id.into(),
            runtime_id: None,
            status: StackStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            order,
            service_count: 0,
            is_new_in_upgrade: false,
            resources: Vec::new(),
        }
    }

    pub(crate) fn start(&mut self, status: StackStatus) {
        self.status = status;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        self.error = None;
    }

    pub(crate) fn finish(&mut self, status: StackStatus, error: Option<String>) {
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.error = error;
    }
}

/// One deployment of a product version into an environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDeployment {
    pub id: ProductDeploymentId,
    pub environment: EnvironmentId,
    pub group: ProductGroupId,
    pub product_name: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub continue_on_error: bool,
    pub stacks: Vec<StackDeployment>,
    /// Resolved values visible to every stack
    #[serde(default)]
    pub shared_variables: BTreeMap<String, String>,
    pub previous_version: Option<String>,
    #[serde(default)]
    pub upgrade_count: u32,
}

impl ProductDeployment {
    pub fn new(
        environment: EnvironmentId,
        group: ProductGroupId,
        product_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: ProductDeploymentId::new(),
            environment,
            group,
            product_name: product_name.into(),
            version: version.into(),
            created_at: Utc::now(),
            completed_at: None,
            continue_on_error: false,
            stacks: Vec::new(),
            shared_variables: BTreeMap::new(),
            previous_version: None,
            upgrade_count: 0,
        }
    }

    pub fn status(&self) -> ProductStatus {
        let statuses: Vec<StackStatus> = self.stacks.iter().map(|s| s.status).collect();
        derive_status(&statuses)
    }

    pub fn stack(&self, name: &str) -> Option<&StackDeployment> {
        self.stacks.iter().find(|s| s.stack_name == name)
    }

    pub(crate) fn stack_mut(&mut self, name: &str) -> Option<&mut StackDeployment> {
        self.stacks.iter_mut().find(|s| s.stack_name == name)
    }

    /// Stack names in ascending order index
    pub fn ordered_stack_names(&self) -> Vec<String> {
        let mut stacks: Vec<&StackDeployment> = self.stacks.iter().collect();
        stacks.sort_by_key(|s| s.order);
        stacks.into_iter().map(|s| s.stack_name.clone()).collect()
    }

    pub fn stack_statuses(&self) -> Vec<StackStatus> {
        let mut stacks: Vec<&StackDeployment> = self.stacks.iter().collect();
        stacks.sort_by_key(|s| s.order);
        stacks.into_iter().map(|s| s.status).collect()
    }

    /// Failed or removed; a later pass starts a fresh aggregate
    pub fn is_terminal(&self) -> bool {
        matches!(self.status(), ProductStatus::Failed | ProductStatus::Removed)
    }
}
