//! Multi-stack product deployment
//!
//! A product version is a list of stacks applied one after another. Each
//! pass (deploy, upgrade, rollback, remove) holds the exclusion scope of its
//! `(environment, group)` pair for its whole duration and persists the
//! aggregate after every stack transition.

use crate::catalog::{ManifestSource, ProductVersion, StackCatalog, version_variables};
use crate::error::{DeployError, Result};
use crate::guard::DeploymentLocks;
use crate::model::{
    EnvironmentId, ProductDeployment, ProductDeploymentId, ProductGroupId, ProductStatus,
    StackDeployment, StackStatus,
};
use crate::repository::DeploymentRepository;
use crate::upgrade::{UpgradeEngine, UpgradeInfo, merge_variables};
use chrono::Utc;
use stackflow_container::{
    ApplyMode, ContainerRuntime, DeploymentOrchestrator, RetryPolicy, StepStatus,
};
use stackflow_core::{DeploymentPlan, ManifestParser, PlanBuilder, ResourceKind, ResourceRef, Variables};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

const CANCELLED: &str = "deployment cancelled";

#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub environment: EnvironmentId,
    pub group: ProductGroupId,
    /// Latest catalog version when unset
    pub version: Option<String>,
    pub variables: Variables,
    pub continue_on_error: bool,
}

impl DeployRequest {
    pub fn new(environment: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            environment: EnvironmentId::new(environment),
            group: ProductGroupId::new(group),
            version: None,
            variables: Variables::new(),
            continue_on_error: false,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }
}

/// A stack with its plan, ready to apply
struct PreparedStack {
    name: String,
    plan: DeploymentPlan,
}

pub struct ProductDeploymentOrchestrator {
    catalog: Arc<dyn StackCatalog>,
    source: Arc<dyn ManifestSource>,
    repository: Arc<dyn DeploymentRepository>,
    executor: DeploymentOrchestrator,
    upgrades: UpgradeEngine,
    locks: DeploymentLocks,
    parser: ManifestParser,
    planner: PlanBuilder,
}

impl ProductDeploymentOrchestrator {
    pub fn new(
        catalog: Arc<dyn StackCatalog>,
        source: Arc<dyn ManifestSource>,
        repository: Arc<dyn DeploymentRepository>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self> {
        Ok(Self {
            upgrades: UpgradeEngine::new(Arc::clone(&catalog)),
            catalog,
            source,
            repository,
            executor: DeploymentOrchestrator::new(runtime),
            locks: DeploymentLocks::new(),
            parser: ManifestParser::new()?,
            planner: PlanBuilder::new()?,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.executor = self.executor.with_retry(retry);
        self
    }

    /// Also exclude passes of other processes sharing `state_dir`
    pub fn with_lock_dir(mut self, state_dir: impl AsRef<std::path::Path>) -> Self {
        self.locks = DeploymentLocks::with_lock_dir(state_dir);
        self
    }

    pub fn locks(&self) -> &DeploymentLocks {
        &self.locks
    }

    /// Deploy a product version.
    ///
    /// Fails with `AlreadyDeployed` while a live deployment of the pair
    /// exists; after a failed or removed one a fresh aggregate is created
    /// that remembers the earlier version.
    #[instrument(skip(self, request), fields(env = %request.environment, group = %request.group))]
    pub async fn deploy(&self, request: DeployRequest) -> Result<ProductDeployment> {
        let guard = self.locks.acquire(&request.environment, &request.group)?;

        let last = self
            .repository
            .history(&request.environment, &request.group)
            .await?
            .into_iter()
            .next();
        if let Some(last) = &last
            && !last.is_terminal()
        {
            return Err(DeployError::AlreadyDeployed {
                environment: request.environment.to_string(),
                group: request.group.to_string(),
            });
        }

        let product = match &request.version {
            Some(version) => self.catalog.version(&request.group, version).await?,
            None => self.catalog.latest_version(&request.group).await?,
        }
        .ok_or_else(|| {
            DeployError::ProductNotFound(match &request.version {
                Some(version) => format!("{}@{}", request.group, version),
                None => request.group.to_string(),
            })
        })?;

        let declared = version_variables(self.catalog.as_ref(), &product).await?;
        let variables = merge_variables(&request.variables, &BTreeMap::new(), &declared);
        let prepared = self.prepare(&product, &variables).await?;

        let mut deployment = ProductDeployment::new(
            request.environment.clone(),
            request.group.clone(),
            product.name.clone(),
            product.version.clone(),
        );
        deployment.continue_on_error = request.continue_on_error;
        deployment.previous_version = last.map(|d| d.version);
        deployment.shared_variables = variables.into_iter().collect();
        deployment.stacks = stack_entries(&product);
        self.repository.save(&deployment).await?;

        info!(id = %deployment.id, version = %deployment.version, stacks = deployment.stacks.len(), "Deploying product");
        self.run_pass(&mut deployment, &prepared, guard.token()).await?;
        self.finish(&mut deployment).await?;
        Ok(deployment)
    }

    /// Move a running deployment to the latest catalog version in place
    #[instrument(skip_all, fields(env = %environment, group = %group))]
    pub async fn upgrade(
        &self,
        environment: &EnvironmentId,
        group: &ProductGroupId,
        variables: &Variables,
    ) -> Result<ProductDeployment> {
        let guard = self.locks.acquire(environment, group)?;
        let mut deployment = self.require_active(environment, group).await?;

        let info = self.upgrades.check_upgrade(&deployment).await?;
        if !info.can_upgrade {
            return Err(DeployError::UpgradeNotEligible {
                reason: info
                    .reason
                    .unwrap_or_else(|| "no upgrade available".to_string()),
            });
        }
        let target = info.latest_version.unwrap_or_default();
        let product = self
            .catalog
            .version(group, &target)
            .await?
            .ok_or_else(|| DeployError::ProductNotFound(format!("{group}@{target}")))?;

        let declared = version_variables(self.catalog.as_ref(), &product).await?;
        let merged = merge_variables(variables, &deployment.shared_variables, &declared);
        let prepared = self.prepare(&product, &merged).await?;

        info!(from = %deployment.version, to = %product.version, "Upgrading product");
        deployment.upgrade_count += 1;
        self.transition(&mut deployment, &product, merged, &prepared, guard.token())
            .await?;
        Ok(deployment)
    }

    /// Re-deploy the version recorded before the last upgrade or deploy.
    ///
    /// A failed deployment is replaced by a fresh aggregate; a partially
    /// failed one is moved back in place.
    #[instrument(skip_all, fields(env = %environment, group = %group))]
    pub async fn rollback(
        &self,
        environment: &EnvironmentId,
        group: &ProductGroupId,
    ) -> Result<ProductDeployment> {
        let guard = self.locks.acquire(environment, group)?;
        let mut current = self.require_active(environment, group).await?;

        let status = current.status();
        if !matches!(status, ProductStatus::Failed | ProductStatus::PartiallyFailed) {
            return Err(DeployError::RollbackNotEligible {
                reason: format!("deployment is {status}; only failed deployments can be rolled back"),
            });
        }
        let Some(previous) = current.previous_version.clone() else {
            return Err(DeployError::RollbackNotEligible {
                reason: "no previous version recorded".to_string(),
            });
        };

        let product = self
            .catalog
            .version(group, &previous)
            .await?
            .ok_or_else(|| DeployError::ProductNotFound(format!("{group}@{previous}")))?;
        let declared = version_variables(self.catalog.as_ref(), &product).await?;
        let merged = merge_variables(&Variables::new(), &current.shared_variables, &declared);
        let prepared = self.prepare(&product, &merged).await?;

        info!(from = %current.version, to = %previous, %status, "Rolling back product");

        if status == ProductStatus::PartiallyFailed {
            self.transition(&mut current, &product, merged, &prepared, guard.token())
                .await?;
            return Ok(current);
        }

        let mut deployment = ProductDeployment::new(
            environment.clone(),
            group.clone(),
            product.name.clone(),
            product.version.clone(),
        );
        deployment.continue_on_error = current.continue_on_error;
        deployment.previous_version = Some(current.version.clone());
        deployment.shared_variables = merged.into_iter().collect();
        deployment.stacks = stack_entries(&product);
        self.repository.save(&deployment).await?;

        self.run_pass(&mut deployment, &prepared, guard.token()).await?;
        self.finish(&mut deployment).await?;
        Ok(deployment)
    }

    /// Remove every stack, last deployed first.
    ///
    /// Volumes are kept unless `purge_volumes` is set. Stops at the first
    /// stack that cannot be removed; that stack keeps its prior status.
    #[instrument(skip_all, fields(env = %environment, group = %group))]
    pub async fn remove(
        &self,
        environment: &EnvironmentId,
        group: &ProductGroupId,
        purge_volumes: bool,
    ) -> Result<ProductDeployment> {
        let guard = self.locks.acquire(environment, group)?;
        let mut deployment = self.require_active(environment, group).await?;

        let mut names = deployment.ordered_stack_names();
        names.reverse();

        info!(id = %deployment.id, "Removing product");
        for name in names {
            if !self
                .remove_stack(&mut deployment, &name, purge_volumes, guard.token())
                .await?
            {
                break;
            }
        }

        self.finish(&mut deployment).await?;
        Ok(deployment)
    }

    pub async fn check_upgrade(
        &self,
        environment: &EnvironmentId,
        group: &ProductGroupId,
    ) -> Result<UpgradeInfo> {
        let deployment = self.require_active(environment, group).await?;
        self.upgrades.check_upgrade(&deployment).await
    }

    pub async fn get(&self, id: &ProductDeploymentId) -> Result<ProductDeployment> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| DeployError::ProductNotFound(id.to_string()))
    }

    /// Live deployment of the pair, if any
    pub async fn status(
        &self,
        environment: &EnvironmentId,
        group: &ProductGroupId,
    ) -> Result<Option<ProductDeployment>> {
        self.repository.active(environment, group).await
    }

    pub async fn history(
        &self,
        environment: &EnvironmentId,
        group: &ProductGroupId,
    ) -> Result<Vec<ProductDeployment>> {
        self.repository.history(environment, group).await
    }

    pub async fn list(&self, environment: &EnvironmentId) -> Result<Vec<ProductDeployment>> {
        self.repository.list(environment).await
    }

    /// Cancel the running pass of the pair. Returns whether one was running.
    pub fn cancel(&self, environment: &EnvironmentId, group: &ProductGroupId) -> bool {
        let found = self.locks.cancel(environment, group);
        if found {
            warn!(env = %environment, group = %group, "Cancellation requested");
        }
        found
    }

    async fn require_active(
        &self,
        environment: &EnvironmentId,
        group: &ProductGroupId,
    ) -> Result<ProductDeployment> {
        self.repository
            .active(environment, group)
            .await?
            .ok_or_else(|| DeployError::ProductNotFound(format!("{group} in {environment}")))
    }

    /// Fetch, parse and plan every stack before anything is applied
    async fn prepare(&self, product: &ProductVersion, variables: &Variables) -> Result<Vec<PreparedStack>> {
        let mut prepared = Vec::with_capacity(product.stacks.len());
        for stack in &product.stacks {
            let text = self.source.fetch(stack).await?;
            let definition = self.parser.parse(&text)?;
            let plan = self.planner.build(
                &definition,
                variables,
                &runtime_name(&product.group, &stack.name),
            )?;
            prepared.push(PreparedStack {
                name: stack.name.clone(),
                plan,
            });
        }
        Ok(prepared)
    }

    /// In-place move of `deployment` to `product`: apply its stacks, then
    /// remove the stacks the version no longer has
    async fn transition(
        &self,
        deployment: &mut ProductDeployment,
        product: &ProductVersion,
        variables: Variables,
        prepared: &[PreparedStack],
        cancel: &CancellationToken,
    ) -> Result<()> {
        deployment.previous_version = Some(deployment.version.clone());
        deployment.version = product.version.clone();
        deployment.product_name = product.name.clone();
        deployment.shared_variables = variables.into_iter().collect();
        deployment.completed_at = None;
        let dropped = sync_stacks(deployment, product);
        self.repository.save(deployment).await?;

        self.run_pass(deployment, prepared, cancel).await?;

        if !cancel.is_cancelled() {
            for name in dropped {
                info!(stack = %name, "Removing stack dropped by new version");
                if !self.remove_stack(deployment, &name, false, cancel).await? {
                    break;
                }
            }
        }

        self.finish(deployment).await
    }

    /// Apply prepared stacks in order, recording each transition
    async fn run_pass(
        &self,
        deployment: &mut ProductDeployment,
        prepared: &[PreparedStack],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let continue_on_error = deployment.continue_on_error;

        for stack in prepared {
            let Some(entry) = deployment.stack_mut(&stack.name) else {
                return Err(DeployError::StackNotFound(stack.name.clone()));
            };

            if cancel.is_cancelled() {
                warn!(stack = %stack.name, "Pass cancelled before stack");
                entry.finish(StackStatus::Failed, Some(CANCELLED.to_string()));
                self.repository.save(deployment).await?;
                break;
            }

            entry.start(StackStatus::Deploying);
            entry.runtime_id = Some(stack.plan.stack_name.clone());
            entry.service_count = stack.plan.service_count();
            self.repository.save(deployment).await?;
            info!(stack = %stack.name, summary = %stack.plan.summary(), "Deploying stack");

            let report = self
                .executor
                .apply(&stack.plan, ApplyMode::StopOnFailure, cancel)
                .await;

            let Some(entry) = deployment.stack_mut(&stack.name) else {
                return Err(DeployError::StackNotFound(stack.name.clone()));
            };
            merge_resources(&mut entry.resources, report.applied_resources());

            let stop = if report.is_success() {
                entry.finish(StackStatus::Running, None);
                info!(stack = %stack.name, "Stack running");
                false
            } else if report.cancelled {
                entry.finish(StackStatus::Failed, Some(CANCELLED.to_string()));
                warn!(stack = %stack.name, "Stack cancelled");
                true
            } else {
                let error = report
                    .first_error()
                    .unwrap_or_else(|| "deployment failed".to_string());
                warn!(stack = %stack.name, error = %error, "Stack failed");
                entry.finish(StackStatus::Failed, Some(error));
                !continue_on_error
            };

            self.repository.save(deployment).await?;
            if stop {
                break;
            }
        }

        Ok(())
    }

    /// Remove one stack's resources in reverse creation order. Returns
    /// whether the stack reached `Removed`.
    async fn remove_stack(
        &self,
        deployment: &mut ProductDeployment,
        name: &str,
        purge_volumes: bool,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let Some(entry) = deployment.stack_mut(name) else {
            return Err(DeployError::StackNotFound(name.to_string()));
        };
        if entry.status == StackStatus::Removed {
            return Ok(true);
        }

        let prior = entry.status;
        let (targets, kept): (Vec<ResourceRef>, Vec<ResourceRef>) = entry
            .resources
            .iter()
            .rev()
            .cloned()
            .partition(|r| purge_volumes || r.kind != ResourceKind::Volume);

        entry.status = StackStatus::Removing;
        self.repository.save(deployment).await?;
        info!(stack = %name, resources = targets.len(), "Removing stack");

        let report = self.executor.remove(&targets, cancel).await;

        let Some(entry) = deployment.stack_mut(name) else {
            return Err(DeployError::StackNotFound(name.to_string()));
        };
        let removed: Vec<&ResourceRef> = report
            .results
            .iter()
            .filter(|r| r.status == StepStatus::Removed)
            .map(|r| &r.resource)
            .collect();
        entry.resources.retain(|r| !removed.contains(&r));

        let done = report.is_success();
        if done {
            let mut kept = kept;
            kept.reverse();
            entry.resources = kept;
            entry.finish(StackStatus::Removed, None);
            info!(stack = %name, "Stack removed");
        } else {
            let error = if report.cancelled {
                "removal cancelled".to_string()
            } else {
                report
                    .first_error()
                    .unwrap_or_else(|| "removal failed".to_string())
            };
            warn!(stack = %name, error = %error, "Stack removal failed");
            entry.status = prior;
            entry.error = Some(error);
        }

        self.repository.save(deployment).await?;
        Ok(done)
    }

    async fn finish(&self, deployment: &mut ProductDeployment) -> Result<()> {
        deployment.completed_at = Some(Utc::now());
        self.repository.save(deployment).await?;
        info!(
            id = %deployment.id,
            version = %deployment.version,
            status = %deployment.status(),
            "Pass finished"
        );
        Ok(())
    }
}

/// Runtime prefix of a product's stack
pub fn runtime_name(group: &ProductGroupId, stack: &str) -> String {
    format!("{group}-{stack}")
}

fn stack_entries(product: &ProductVersion) -> Vec<StackDeployment> {
    product
        .stacks
        .iter()
        .enumerate()
        .map(|(order, s)| StackDeployment::new(&s.name, &s.display_name, &s.id, order))
        .collect()
}

/// Align the stack list with `product`. Returns the live stacks it no
/// longer contains; they are ordered after the new stacks.
fn sync_stacks(deployment: &mut ProductDeployment, product: &ProductVersion) -> Vec<String> {
    for stack in &mut deployment.stacks {
        stack.is_new_in_upgrade = false;
    }

    for (order, catalog_stack) in product.stacks.iter().enumerate() {
        match deployment.stack_mut(&catalog_stack.name) {
            Some(existing) => {
                existing.catalog_stack_id = catalog_stack.id.clone();
                existing.display_name = catalog_stack.display_name.clone();
                existing.order = order;
            }
            None => {
                let mut stack = StackDeployment::new(
                    &catalog_stack.name,
                    &catalog_stack.display_name,
                    &catalog_stack.id,
                    order,
                );
                stack.is_new_in_upgrade = true;
                deployment.stacks.push(stack);
            }
        }
    }

    let count = product.stacks.len();
    let mut dropped = Vec::new();
    for stack in &mut deployment.stacks {
        let kept = product.stacks.iter().any(|s| s.name == stack.stack_name);
        if !kept && stack.status != StackStatus::Removed {
            stack.order += count;
            dropped.push(stack.stack_name.clone());
        }
    }
    dropped
}

/// Append `applied` to `recorded`, keeping first-seen order
fn merge_resources(recorded: &mut Vec<ResourceRef>, applied: Vec<ResourceRef>) {
    for resource in applied {
        if !recorded.contains(&resource) {
            recorded.push(resource);
        }
    }
}
