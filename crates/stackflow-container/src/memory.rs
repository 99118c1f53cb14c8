//! In-memory `ContainerRuntime`
//!
//! Keeps resources in a map instead of talking to a daemon. Used by tests
//! and dry runs; supports injected failures, call recording and latency.

use crate::error::{Result, RuntimeError};
use crate::runtime::{ApplyOutcome, ContainerRuntime, ResourceHandle, spec_hash};
use async_trait::async_trait;
use stackflow_core::{ResourceKind, ResourceRef, ResourceSpec};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// Operation recorded by the in-memory runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Apply(ResourceRef),
    Remove(ResourceRef),
}

/// Kind of failure to inject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Transient,
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultOp {
    Apply,
    Remove,
}

#[derive(Debug)]
struct Fault {
    op: FaultOp,
    name: String,
    kind: FaultKind,
    /// `None` fails forever
    remaining: Option<usize>,
}

#[derive(Default)]
struct MemoryState {
    resources: BTreeMap<(ResourceKind, String), String>,
    calls: Vec<RuntimeCall>,
    faults: Vec<Fault>,
    next_id: u64,
}

type ApplyHook = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct InMemoryRuntime {
    state: Mutex<MemoryState>,
    hook: Mutex<Option<ApplyHook>>,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `create_or_update` for `name`; `times: None` fails every call
    pub fn fail_apply(&self, name: impl Into<String>, kind: FaultKind, times: Option<usize>) {
        self.push_fault(FaultOp::Apply, name.into(), kind, times);
    }

    /// Fail `remove` for `name`; `times: None` fails every call
    pub fn fail_remove(&self, name: impl Into<String>, kind: FaultKind, times: Option<usize>) {
        self.push_fault(FaultOp::Remove, name.into(), kind, times);
    }

    /// Make an external network or volume exist, as if created outside any stack
    pub fn add_external(&self, kind: ResourceKind, name: impl Into<String>) {
        self.lock()
            .resources
            .insert((kind, name.into()), "external".to_string());
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Run `hook` with the resource name before every apply
    pub fn on_apply<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.hook.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    /// Delay every call, to keep a pass in flight
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut slot) = self.latency.lock() {
            *slot = Some(latency);
        }
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    /// Names passed to `remove`, in call order
    pub fn removed(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                RuntimeCall::Remove(r) => Some(r.name.clone()),
                RuntimeCall::Apply(_) => None,
            })
            .collect()
    }

    /// Names passed to `create_or_update`, in call order
    pub fn applied(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                RuntimeCall::Apply(r) => Some(r.name.clone()),
                RuntimeCall::Remove(_) => None,
            })
            .collect()
    }

    pub fn contains(&self, kind: ResourceKind, name: &str) -> bool {
        self.lock()
            .resources
            .contains_key(&(kind, name.to_string()))
    }

    pub fn resource_count(&self) -> usize {
        self.lock().resources.len()
    }

    fn push_fault(&self, op: FaultOp, name: String, kind: FaultKind, times: Option<usize>) {
        self.lock().faults.push(Fault {
            op,
            name,
            kind,
            remaining: times,
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A panic while holding the lock leaves plain data behind
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn delay(&self) {
        let latency = self.latency.lock().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_fault(state: &mut MemoryState, op: FaultOp, name: &str) -> Option<RuntimeError> {
        let index = state.faults.iter().position(|f| {
            f.op == op && f.name == name && f.remaining.is_none_or(|n| n > 0)
        })?;
        let fault = &mut state.faults[index];
        if let Some(n) = fault.remaining.as_mut() {
            *n -= 1;
        }
        Some(match fault.kind {
            FaultKind::Transient => RuntimeError::ConnectionFailed(format!("injected fault on {name}")),
            FaultKind::Permanent => RuntimeError::InvalidSpec(format!("injected fault on {name}")),
        })
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn create_or_update(&self, name: &str, spec: &ResourceSpec) -> Result<ResourceHandle> {
        if let Ok(hook) = self.hook.lock()
            && let Some(hook) = hook.as_ref()
        {
            hook(name);
        }
        self.delay().await;

        let hash = spec_hash(spec)?;
        let kind = spec.kind();
        let mut state = self.lock();
        state
            .calls
            .push(RuntimeCall::Apply(ResourceRef::new(kind, name)));

        if let Some(err) = Self::take_fault(&mut state, FaultOp::Apply, name) {
            return Err(err);
        }

        let key = (kind, name.to_string());
        if spec.is_external() {
            return if state.resources.contains_key(&key) {
                Ok(ResourceHandle {
                    kind,
                    name: name.to_string(),
                    id: None,
                    outcome: ApplyOutcome::Unchanged,
                })
            } else {
                Err(RuntimeError::NotFound(format!("external {kind} `{name}` does not exist")))
            };
        }

        let outcome = match state.resources.get(&key) {
            Some(existing) if *existing == hash => ApplyOutcome::Unchanged,
            // Networks and volumes are never replaced in place
            Some(_) if kind != ResourceKind::Service => ApplyOutcome::Unchanged,
            Some(_) => ApplyOutcome::Updated,
            None => ApplyOutcome::Created,
        };

        if outcome != ApplyOutcome::Unchanged {
            state.resources.insert(key, hash);
        }
        state.next_id += 1;
        let id = format!("mem-{}", state.next_id);

        Ok(ResourceHandle {
            kind,
            name: name.to_string(),
            id: Some(id),
            outcome,
        })
    }

    async fn remove(&self, kind: ResourceKind, name: &str) -> Result<()> {
        self.delay().await;

        let mut state = self.lock();
        state
            .calls
            .push(RuntimeCall::Remove(ResourceRef::new(kind, name)));

        if let Some(err) = Self::take_fault(&mut state, FaultOp::Remove, name) {
            return Err(err);
        }

        state.resources.remove(&(kind, name.to_string()));
        Ok(())
    }

    async fn exists(&self, kind: ResourceKind, name: &str) -> Result<bool> {
        Ok(self.contains(kind, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{ContractViolation, verify_idempotency};

    #[tokio::test]
    async fn test_memory_runtime_honours_contract() {
        let runtime = InMemoryRuntime::new();
        verify_idempotency(&runtime, "contract").await.unwrap();
    }

    #[tokio::test]
    async fn test_contract_reports_failing_call() {
        let runtime = InMemoryRuntime::new();
        runtime.fail_remove("contract_vol", FaultKind::Permanent, None);

        let err = verify_idempotency(&runtime, "contract").await.unwrap_err();
        match err {
            ContractViolation::Runtime { kind, name, source } => {
                assert_eq!(kind, ResourceKind::Volume);
                assert_eq!(name, "contract_vol");
                assert!(!source.is_transient());
            }
            other => panic!("unexpected violation: {other}"),
        }
    }

    #[tokio::test]
    async fn test_external_resources_must_exist() {
        let runtime = InMemoryRuntime::new();
        let spec = ResourceSpec::Network(stackflow_core::NetworkSpec {
            name: "shared".to_string(),
            driver: None,
            external: true,
        });

        let err = runtime.create_or_update("shared", &spec).await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotFound(_)));
        assert_eq!(runtime.resource_count(), 0);

        runtime.add_external(ResourceKind::Network, "shared");
        let handle = runtime.create_or_update("shared", &spec).await.unwrap();
        assert_eq!(handle.outcome, ApplyOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_fault_injection_counts_down() {
        let runtime = InMemoryRuntime::new();
        runtime.fail_apply("shop-web", FaultKind::Transient, Some(1));

        let spec = crate::contract::sample_network("shop-web");
        let err = runtime.create_or_update("shop-web", &spec).await.unwrap_err();
        assert!(err.is_transient());

        let handle = runtime.create_or_update("shop-web", &spec).await.unwrap();
        assert_eq!(handle.outcome, ApplyOutcome::Created);
        assert_eq!(runtime.applied(), vec!["shop-web", "shop-web"]);
    }

    #[tokio::test]
    async fn test_permanent_fault_repeats() {
        let runtime = InMemoryRuntime::new();
        runtime.fail_remove("shop_default", FaultKind::Permanent, None);

        for _ in 0..2 {
            let err = runtime
                .remove(ResourceKind::Network, "shop_default")
                .await
                .unwrap_err();
            assert!(!err.is_transient());
        }

        runtime.clear_faults();
        runtime
            .remove(ResourceKind::Network, "shop_default")
            .await
            .unwrap();
        assert_eq!(runtime.removed().len(), 3);
    }
}
