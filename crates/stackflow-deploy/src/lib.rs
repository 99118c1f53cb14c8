//! Product deployments for stackflow
//!
//! A product is one or more stacks deployed together. This crate tracks
//! each deployment as a [`ProductDeployment`] aggregate and drives it through
//! deploy, upgrade, rollback and removal passes.
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐   ┌──────────────────────┐
//! │ StackCatalog │──▶│ ManifestSource │──▶│ ManifestParser /     │
//! │ (versions)   │   │ (manifest text)│   │ PlanBuilder (core)   │
//! └──────┬───────┘   └────────────────┘   └──────────┬───────────┘
//!        │                                           │ DeploymentPlan
//! ┌──────▼────────┐  ┌─────────────────────────────────▼───────────┐
//! │ UpgradeEngine │◀─│      ProductDeploymentOrchestrator          │
//! └───────────────┘  │  DeploymentLocks · DeploymentRepository     │
//!                    └─────────────────────┬───────────────────────┘
//!                                          │ per stack
//!                              ┌───────────▼────────────┐
//!                              │ DeploymentOrchestrator │
//!                              │ (stackflow-container)  │
//!                              └────────────────────────┘
//! ```

pub mod catalog;
pub mod error;
pub mod guard;
pub mod lock;
pub mod model;
pub mod orchestrator;
pub mod repository;
pub mod upgrade;

pub use catalog::{
    CatalogStack, FileCatalog, FileManifestSource, InMemoryCatalog, ManifestSource,
    ProductVersion, StackCatalog, version_variables,
};
pub use error::{DeployError, Result};
pub use guard::{DeploymentLocks, PassGuard};
pub use lock::{LockInfo, STALE_LOCK_AGE, StateLock};
pub use model::{
    EnvironmentId, ProductDeployment, ProductDeploymentId, ProductGroupId, ProductStatus,
    StackDeployment, StackStatus, derive_status,
};
pub use orchestrator::{DeployRequest, ProductDeploymentOrchestrator, runtime_name};
pub use repository::{DeploymentRepository, InMemoryRepository, JsonFileRepository};
pub use upgrade::{UpgradeEngine, UpgradeInfo, compare_versions, is_newer_version, merge_variables};
