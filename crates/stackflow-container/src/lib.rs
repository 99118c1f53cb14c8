//! Container runtime layer for stackflow
//!
//! [`ContainerRuntime`] is the seam between plans and a concrete runtime.
//! [`DockerRuntime`] talks to a Docker daemon through bollard and
//! [`InMemoryRuntime`] keeps everything in a map for tests and dry runs.
//! [`DeploymentOrchestrator`] walks a [`stackflow_core::DeploymentPlan`]
//! against either one.

pub mod contract;
pub mod converter;
pub mod docker;
pub mod error;
pub mod executor;
pub mod memory;
pub mod runtime;

pub use converter::{parse_image_tag, service_to_container_config};
pub use docker::DockerRuntime;
pub use error::{FailureClass, Result, RuntimeError};
pub use executor::{
    ApplyMode, ApplyReport, DEFAULT_RETRY_BACKOFF, DeploymentOrchestrator, RetryPolicy,
    StepResult, StepStatus,
};
pub use memory::{FaultKind, InMemoryRuntime, RuntimeCall};
pub use runtime::{
    ApplyOutcome, ContainerRuntime, MANAGED_LABEL, ResourceHandle, SPEC_HASH_LABEL, spec_hash,
};
