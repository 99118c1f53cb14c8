//! Behaviour every `ContainerRuntime` must show
//!
//! `verify_idempotency` drives a runtime through create / re-apply / remove
//! cycles and reports the first deviation. It only touches resources whose
//! names start with `prefix`, so it can run against a real daemon too.

use crate::error::{Result, RuntimeError};
use crate::runtime::{ApplyOutcome, ContainerRuntime};
use stackflow_core::{NetworkSpec, ResourceKind, ResourceSpec, VolumeSpec};
use thiserror::Error;

pub fn sample_network(name: &str) -> ResourceSpec {
    ResourceSpec::Network(NetworkSpec {
        name: name.to_string(),
        driver: None,
        external: false,
    })
}

pub fn sample_volume(name: &str) -> ResourceSpec {
    ResourceSpec::Volume(VolumeSpec {
        name: name.to_string(),
        driver: None,
        external: false,
    })
}

/// First deviation from the runtime contract
#[derive(Error, Debug)]
pub enum ContractViolation {
    #[error("{kind} `{name}`: runtime call failed: {source}")]
    Runtime {
        kind: ResourceKind,
        name: String,
        #[source]
        source: RuntimeError,
    },

    #[error("{kind} `{name}`: {what}")]
    Behaviour {
        kind: ResourceKind,
        name: String,
        what: String,
    },
}

impl ContractViolation {
    fn behaviour(kind: ResourceKind, name: &str, what: impl Into<String>) -> Self {
        ContractViolation::Behaviour {
            kind,
            name: name.to_string(),
            what: what.into(),
        }
    }
}

/// Attach the resource to a failed runtime call
fn call<T>(kind: ResourceKind, name: &str, result: Result<T>) -> std::result::Result<T, ContractViolation> {
    result.map_err(|source| ContractViolation::Runtime {
        kind,
        name: name.to_string(),
        source,
    })
}

pub async fn verify_idempotency(
    runtime: &dyn ContainerRuntime,
    prefix: &str,
) -> std::result::Result<(), ContractViolation> {
    let cases = [
        (format!("{prefix}_net"), sample_network(&format!("{prefix}_net"))),
        (format!("{prefix}_vol"), sample_volume(&format!("{prefix}_vol"))),
    ];

    for (name, spec) in &cases {
        let kind = spec.kind();

        call(kind, name, runtime.remove(kind, name).await)?;

        let first = call(kind, name, runtime.create_or_update(name, spec).await)?;
        if first.outcome != ApplyOutcome::Created {
            return Err(ContractViolation::behaviour(
                kind,
                name,
                format!("first apply reported {:?}", first.outcome),
            ));
        }

        let second = call(kind, name, runtime.create_or_update(name, spec).await)?;
        if second.outcome != ApplyOutcome::Unchanged {
            return Err(ContractViolation::behaviour(
                kind,
                name,
                format!("re-apply reported {:?}", second.outcome),
            ));
        }

        if !call(kind, name, runtime.exists(kind, name).await)? {
            return Err(ContractViolation::behaviour(kind, name, "missing after apply"));
        }

        call(kind, name, runtime.remove(kind, name).await)?;
        if call(kind, name, runtime.exists(kind, name).await)? {
            return Err(ContractViolation::behaviour(kind, name, "still present after remove"));
        }

        // Removing an absent resource succeeds
        call(kind, name, runtime.remove(kind, name).await)?;
    }

    // Services are exercised through full plans by callers; only absence is
    // checked here since creating one needs a pullable image.
    let kind = ResourceKind::Service;
    let container = format!("{prefix}-absent");
    if call(kind, &container, runtime.exists(kind, &container).await)? {
        return Err(ContractViolation::behaviour(kind, &container, "unexpectedly exists"));
    }
    call(kind, &container, runtime.remove(kind, &container).await)?;

    // A missing external resource is never created
    let external = format!("{prefix}_external");
    let spec = ResourceSpec::Network(NetworkSpec {
        name: external.clone(),
        driver: None,
        external: true,
    });
    if runtime.create_or_update(&external, &spec).await.is_ok() {
        return Err(ContractViolation::behaviour(
            ResourceKind::Network,
            &external,
            "missing external network was accepted",
        ));
    }

    Ok(())
}
