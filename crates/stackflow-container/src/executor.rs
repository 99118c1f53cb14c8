//! Plan execution for a single stack

use crate::error::{FailureClass, Result};
use crate::runtime::{ApplyOutcome, ContainerRuntime};
use stackflow_core::{DeploymentPlan, ResourceRef};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Backoff before retrying a transient failure
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// What to do after a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyMode {
    /// Stop at the first failed step
    #[default]
    StopOnFailure,
    /// Attempt every step regardless of earlier failures
    BestEffort,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt, transient failures only
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Applied(ApplyOutcome),
    Removed,
    Failed { error: String, class: FailureClass },
    NotAttempted,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub resource: ResourceRef,
    /// Created and removed by the stack (not an external resource)
    pub owned: bool,
    pub status: StepStatus,
    pub attempts: u32,
}

impl StepResult {
    fn not_attempted(resource: ResourceRef, owned: bool) -> Self {
        Self {
            resource,
            owned,
            status: StepStatus::NotAttempted,
            attempts: 0,
        }
    }
}

/// Per-step results of an apply or remove run
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub results: Vec<StepResult>,
    pub cancelled: bool,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        !self.cancelled
            && self
                .results
                .iter()
                .all(|r| matches!(r.status, StepStatus::Applied(_) | StepStatus::Removed))
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.status, StepStatus::Failed { .. }))
    }

    /// `"<kind>:<name>: <error>"` of the first failed step
    pub fn first_error(&self) -> Option<String> {
        self.failures().next().and_then(|r| match &r.status {
            StepStatus::Failed { error, .. } => Some(format!("{}: {error}", r.resource)),
            _ => None,
        })
    }

    /// Owned resources that were applied, in plan order
    pub fn applied_resources(&self) -> Vec<ResourceRef> {
        self.results
            .iter()
            .filter(|r| r.owned && matches!(r.status, StepStatus::Applied(_)))
            .map(|r| r.resource.clone())
            .collect()
    }

    pub fn count(&self, outcome: ApplyOutcome) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == StepStatus::Applied(outcome))
            .count()
    }
}

/// Executes plans against a runtime, step by step
#[derive(Clone)]
pub struct DeploymentOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    retry: RetryPolicy,
}

impl DeploymentOrchestrator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Apply every step in order.
    ///
    /// Cancellation is checked before each step; steps after a cancellation
    /// (or after a failure in `StopOnFailure` mode) are `NotAttempted`.
    /// Nothing is undone on failure.
    #[instrument(skip(self, plan, cancel), fields(stack = %plan.stack_name))]
    pub async fn apply(
        &self,
        plan: &DeploymentPlan,
        mode: ApplyMode,
        cancel: &CancellationToken,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut halted = false;

        for step in &plan.steps {
            let resource = step.resource();
            let owned = !step.spec.is_external();

            if !halted && cancel.is_cancelled() {
                warn!("Apply cancelled");
                report.cancelled = true;
                halted = true;
            }
            if halted {
                report.results.push(StepResult::not_attempted(resource, owned));
                continue;
            }

            debug!(resource = %resource, "Applying step");
            let (result, attempts) = self
                .retrying(&resource, || self.runtime.create_or_update(&step.name, &step.spec))
                .await;

            let status = match result {
                Ok(handle) => {
                    debug!(resource = %resource, outcome = ?handle.outcome, "Step applied");
                    StepStatus::Applied(handle.outcome)
                }
                Err(e) => {
                    warn!(resource = %resource, error = %e, "Step failed");
                    if mode == ApplyMode::StopOnFailure {
                        halted = true;
                    }
                    StepStatus::Failed {
                        error: e.to_string(),
                        class: e.class(),
                    }
                }
            };

            report.results.push(StepResult {
                resource,
                owned,
                status,
                attempts,
            });
        }

        info!(
            created = report.count(ApplyOutcome::Created),
            updated = report.count(ApplyOutcome::Updated),
            unchanged = report.count(ApplyOutcome::Unchanged),
            failed = report.failures().count(),
            cancelled = report.cancelled,
            "Plan applied"
        );
        report
    }

    /// Remove resources in the given order, stopping at the first failure.
    /// Absent resources count as removed.
    #[instrument(skip(self, resources, cancel), fields(count = resources.len()))]
    pub async fn remove(&self, resources: &[ResourceRef], cancel: &CancellationToken) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut halted = false;

        for resource in resources {
            if !halted && cancel.is_cancelled() {
                warn!("Removal cancelled");
                report.cancelled = true;
                halted = true;
            }
            if halted {
                report
                    .results
                    .push(StepResult::not_attempted(resource.clone(), true));
                continue;
            }

            let (result, attempts) = self
                .retrying(resource, || self.runtime.remove(resource.kind, &resource.name))
                .await;

            let status = match result {
                Ok(()) => {
                    debug!(resource = %resource, "Removed");
                    StepStatus::Removed
                }
                Err(e) => {
                    warn!(resource = %resource, error = %e, "Removal failed");
                    halted = true;
                    StepStatus::Failed {
                        error: e.to_string(),
                        class: e.class(),
                    }
                }
            };

            report.results.push(StepResult {
                resource: resource.clone(),
                owned: true,
                status,
                attempts,
            });
        }

        report
    }

    /// Run `op`, retrying transient failures after the configured backoff
    async fn retrying<T, F, Fut>(&self, resource: &ResourceRef, mut op: F) -> (Result<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 1;
        let mut result = op().await;

        while let Err(e) = &result {
            if !e.is_transient() || attempts > self.retry.max_retries {
                break;
            }
            warn!(
                resource = %resource,
                error = %e,
                backoff_ms = self.retry.backoff.as_millis() as u64,
                "Transient failure; retrying"
            );
            tokio::time::sleep(self.retry.backoff).await;
            attempts += 1;
            result = op().await;
        }

        (result, attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FaultKind, InMemoryRuntime};
    use stackflow_core::{ManifestParser, PlanBuilder, ResourceKind, Variables};

    const MANIFEST: &str = r#"
services:
  web:
    image: nginx
    depends_on: [api]
  api:
    image: api:1
    volumes: [data:/data]
networks:
  shared: { external: true }
"#;

    fn plan() -> DeploymentPlan {
        let stack = ManifestParser::new().unwrap().parse(MANIFEST).unwrap();
        PlanBuilder::new()
            .unwrap()
            .build(&stack, &Variables::new(), "shop")
            .unwrap()
    }

    /// Runtime where the stack's external network already exists
    fn runtime() -> Arc<InMemoryRuntime> {
        let runtime = Arc::new(InMemoryRuntime::new());
        runtime.add_external(ResourceKind::Network, "shared");
        runtime
    }

    fn orchestrator(runtime: Arc<InMemoryRuntime>) -> DeploymentOrchestrator {
        DeploymentOrchestrator::new(runtime).with_retry(RetryPolicy {
            max_retries: 1,
            backoff: Duration::ZERO,
        })
    }

    #[tokio::test]
    async fn test_apply_in_plan_order() {
        let runtime = runtime();
        let report = orchestrator(runtime.clone())
            .apply(&plan(), ApplyMode::StopOnFailure, &CancellationToken::new())
            .await;

        assert!(report.is_success());
        assert_eq!(
            runtime.applied(),
            vec!["shop_default", "shared", "shop_data", "shop-api", "shop-web"]
        );
        assert_eq!(report.count(ApplyOutcome::Created), 4);
        assert_eq!(report.count(ApplyOutcome::Unchanged), 1);

        // External network is not owned
        let owned: Vec<String> = report
            .applied_resources()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(owned, vec!["shop_default", "shop_data", "shop-api", "shop-web"]);
    }

    #[tokio::test]
    async fn test_missing_external_network_fails_permanently() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let report = orchestrator(runtime.clone())
            .apply(&plan(), ApplyMode::StopOnFailure, &CancellationToken::new())
            .await;

        let shared = &report.results[1];
        assert_eq!(shared.resource.name, "shared");
        assert_eq!(shared.attempts, 1);
        assert!(matches!(
            shared.status,
            StepStatus::Failed {
                class: FailureClass::Permanent,
                ..
            }
        ));
        assert!(!runtime.contains(ResourceKind::Network, "shared"));
        assert!(!runtime.contains(ResourceKind::Service, "shop-api"));
    }

    #[tokio::test]
    async fn test_reapply_is_noop() {
        let runtime = runtime();
        let orch = orchestrator(runtime.clone());
        let plan = plan();
        let cancel = CancellationToken::new();

        orch.apply(&plan, ApplyMode::StopOnFailure, &cancel).await;
        let again = orch.apply(&plan, ApplyMode::StopOnFailure, &cancel).await;

        assert!(again.is_success());
        assert_eq!(again.count(ApplyOutcome::Unchanged), plan.steps.len());
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let runtime = runtime();
        runtime.fail_apply("shop-api", FaultKind::Transient, Some(1));

        let report = orchestrator(runtime.clone())
            .apply(&plan(), ApplyMode::StopOnFailure, &CancellationToken::new())
            .await;

        assert!(report.is_success());
        let api = &report.results[3];
        assert_eq!(api.resource.name, "shop-api");
        assert_eq!(api.attempts, 2);
    }

    #[tokio::test]
    async fn test_transient_failure_escalates_after_retry() {
        let runtime = runtime();
        runtime.fail_apply("shop-api", FaultKind::Transient, None);

        let report = orchestrator(runtime.clone())
            .apply(&plan(), ApplyMode::StopOnFailure, &CancellationToken::new())
            .await;

        assert!(!report.is_success());
        let api = &report.results[3];
        assert_eq!(api.attempts, 2);
        assert!(matches!(
            api.status,
            StepStatus::Failed {
                class: FailureClass::Transient,
                ..
            }
        ));
        assert_eq!(report.results[4].status, StepStatus::NotAttempted);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let runtime = runtime();
        runtime.fail_apply("shop_data", FaultKind::Permanent, None);

        let report = orchestrator(runtime.clone())
            .apply(&plan(), ApplyMode::StopOnFailure, &CancellationToken::new())
            .await;

        assert_eq!(report.results[2].attempts, 1);
        assert!(report.first_error().unwrap().starts_with("volume:shop_data"));
        assert!(!runtime.contains(ResourceKind::Service, "shop-api"));
    }

    #[tokio::test]
    async fn test_best_effort_continues() {
        let runtime = runtime();
        runtime.fail_apply("shop-api", FaultKind::Permanent, None);

        let report = orchestrator(runtime.clone())
            .apply(&plan(), ApplyMode::BestEffort, &CancellationToken::new())
            .await;

        assert_eq!(report.failures().count(), 1);
        assert!(runtime.contains(ResourceKind::Service, "shop-web"));
    }

    #[tokio::test]
    async fn test_cancellation_between_steps() {
        let runtime = runtime();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        runtime.on_apply(move |name| {
            if name == "shop_data" {
                trigger.cancel();
            }
        });

        let report = orchestrator(runtime.clone())
            .apply(&plan(), ApplyMode::StopOnFailure, &cancel)
            .await;

        assert!(report.cancelled);
        assert!(!report.is_success());
        // The step in flight completes; later ones are skipped
        assert_eq!(
            report.results[2].status,
            StepStatus::Applied(ApplyOutcome::Created)
        );
        assert_eq!(report.results[3].status, StepStatus::NotAttempted);
        assert_eq!(report.results[4].status, StepStatus::NotAttempted);
    }

    #[tokio::test]
    async fn test_remove_in_given_order_and_absent_is_success() {
        let runtime = runtime();
        let orch = orchestrator(runtime.clone());
        let cancel = CancellationToken::new();

        let applied = orch.apply(&plan(), ApplyMode::StopOnFailure, &cancel).await;
        let mut resources = applied.applied_resources();
        resources.reverse();
        resources.push(ResourceRef::new(ResourceKind::Volume, "never_created"));

        let report = orch.remove(&resources, &cancel).await;
        assert!(report.is_success());
        assert_eq!(
            runtime.removed(),
            vec!["shop-web", "shop-api", "shop_data", "shop_default", "never_created"]
        );
        assert!(runtime.contains(ResourceKind::Network, "shared"));
    }

    #[tokio::test]
    async fn test_remove_stops_at_failure() {
        let runtime = runtime();
        runtime.fail_remove("shop-api", FaultKind::Permanent, None);
        let resources = vec![
            ResourceRef::new(ResourceKind::Service, "shop-web"),
            ResourceRef::new(ResourceKind::Service, "shop-api"),
            ResourceRef::new(ResourceKind::Network, "shop_default"),
        ];

        let report = orchestrator(runtime)
            .remove(&resources, &CancellationToken::new())
            .await;

        assert!(!report.is_success());
        assert_eq!(report.results[0].status, StepStatus::Removed);
        assert_eq!(report.results[2].status, StepStatus::NotAttempted);
        assert!(report.first_error().unwrap().starts_with("service:shop-api"));
    }
}
