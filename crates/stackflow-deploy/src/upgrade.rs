//! Upgrade eligibility and variable carry-over

use crate::catalog::{StackCatalog, version_variables};
use crate::error::Result;
use crate::model::{ProductDeployment, ProductStatus};
use serde::Serialize;
use stackflow_core::{VariableDefinition, Variables};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Compare dotted versions component by component.
///
/// Numeric components compare as numbers and sort before textual ones;
/// when one version is a prefix of the other, the longer one is newer.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parts = |v: &str| -> Vec<String> {
        v.trim_start_matches(['v', 'V'])
            .split('.')
            .map(str::to_string)
            .collect()
    };
    let (a, b) = (parts(a), parts(b));

    for (x, y) in a.iter().zip(b.iter()) {
        let ordering = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => x.cmp(y),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    a.len().cmp(&b.len())
}

pub fn is_newer_version(candidate: &str, current: &str) -> bool {
    compare_versions(candidate, current) == Ordering::Greater
}

/// Result of comparing a deployment against the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeInfo {
    pub current_version: String,
    pub latest_version: Option<String>,
    pub upgrade_available: bool,
    pub can_upgrade: bool,
    pub reason: Option<String>,
    pub new_variables: Vec<String>,
    pub removed_variables: Vec<String>,
}

pub struct UpgradeEngine {
    catalog: Arc<dyn StackCatalog>,
}

impl UpgradeEngine {
    pub fn new(catalog: Arc<dyn StackCatalog>) -> Self {
        Self { catalog }
    }

    #[instrument(skip(self, deployment), fields(group = %deployment.group, version = %deployment.version))]
    pub async fn check_upgrade(&self, deployment: &ProductDeployment) -> Result<UpgradeInfo> {
        let mut info = UpgradeInfo {
            current_version: deployment.version.clone(),
            latest_version: None,
            upgrade_available: false,
            can_upgrade: false,
            reason: None,
            new_variables: Vec::new(),
            removed_variables: Vec::new(),
        };

        let Some(latest) = self.catalog.latest_version(&deployment.group).await? else {
            info.reason = Some(format!("{} is not in the catalog", deployment.group));
            return Ok(info);
        };
        info.latest_version = Some(latest.version.clone());
        info.upgrade_available = is_newer_version(&latest.version, &deployment.version);

        if info.upgrade_available {
            let current: Vec<String> =
                match self.catalog.version(&deployment.group, &deployment.version).await? {
                    Some(version) => version_variables(self.catalog.as_ref(), &version)
                        .await?
                        .into_iter()
                        .map(|v| v.name)
                        .collect(),
                    // Version dropped from the catalog; fall back to what was deployed
                    None => deployment.shared_variables.keys().cloned().collect(),
                };
            let candidate: Vec<String> = version_variables(self.catalog.as_ref(), &latest)
                .await?
                .into_iter()
                .map(|v| v.name)
                .collect();

            info.new_variables = candidate
                .iter()
                .filter(|name| !current.contains(name))
                .cloned()
                .collect();
            info.removed_variables = current
                .iter()
                .filter(|name| !candidate.contains(name))
                .cloned()
                .collect();
        }

        let status = deployment.status();
        if status != ProductStatus::Running {
            info.reason = Some(format!("deployment is not running (status: {status})"));
        } else if !info.upgrade_available {
            info.reason = Some(format!("{} is the latest version", deployment.version));
        } else {
            info.can_upgrade = true;
        }

        debug!(
            latest = ?info.latest_version,
            available = info.upgrade_available,
            can_upgrade = info.can_upgrade,
            "Checked for upgrade"
        );
        Ok(info)
    }
}

/// Values for an upgrade pass: supplied values, then existing shared values
/// still declared, then declared defaults. Undeclared names are dropped.
pub fn merge_variables(
    supplied: &Variables,
    existing: &BTreeMap<String, String>,
    declared: &[VariableDefinition],
) -> Variables {
    declared
        .iter()
        .filter_map(|definition| {
            let name = &definition.name;
            supplied
                .get(name)
                .or_else(|| existing.get(name))
                .or(definition.default.as_ref())
                .map(|value| (name.clone(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::model::{StackDeployment, StackStatus};

    #[test]
    fn test_compare_versions() {
        assert!(is_newer_version("1.0.1", "1.0.0"));
        assert!(is_newer_version("1.10.0", "1.9.0"));
        assert!(is_newer_version("2.0.0", "1.99.99"));
        assert!(is_newer_version("1.0.1", "1.0"));
        assert!(is_newer_version("v1.2", "1.1"));
        assert!(!is_newer_version("1.0.0", "1.0.0"));
        assert!(!is_newer_version("1.0.0", "1.0.1"));
        // Numeric before textual
        assert!(is_newer_version("1.0.rc", "1.0.1"));
        assert_eq!(compare_versions("1.a", "1.b"), Ordering::Less);
    }

    fn deployment(version: &str, status: StackStatus) -> ProductDeployment {
        let mut deployment =
            ProductDeployment::new("prod".into(), "shop".into(), "Shop", version);
        let mut stack = StackDeployment::new("app", "App", format!("shop@{version}/app"), 0);
        stack.status = status;
        deployment.stacks.push(stack);
        deployment
    }

    fn catalog() -> Arc<InMemoryCatalog> {
        let catalog = InMemoryCatalog::new();
        catalog.add_version(
            "shop",
            "1.0.0",
            &[("app", "services:\n  app:\n    image: app\n    environment:\n      A: ${A}\n      B: ${B}\n")],
        );
        catalog.add_version(
            "shop",
            "1.1.0",
            &[("app", "services:\n  app:\n    image: app\n    environment:\n      B: ${B}\n      C: ${C:-c}\n")],
        );
        Arc::new(catalog)
    }

    #[tokio::test]
    async fn test_check_upgrade_diffs_variables() {
        let engine = UpgradeEngine::new(catalog());
        let info = engine
            .check_upgrade(&deployment("1.0.0", StackStatus::Running))
            .await
            .unwrap();

        assert!(info.upgrade_available);
        assert!(info.can_upgrade);
        assert_eq!(info.latest_version.as_deref(), Some("1.1.0"));
        assert_eq!(info.new_variables, vec!["C"]);
        assert_eq!(info.removed_variables, vec!["A"]);
    }

    #[tokio::test]
    async fn test_check_upgrade_on_failed_deployment() {
        let engine = UpgradeEngine::new(catalog());
        let info = engine
            .check_upgrade(&deployment("1.0.0", StackStatus::Failed))
            .await
            .unwrap();

        assert!(info.upgrade_available);
        assert!(!info.can_upgrade);
        assert!(info.reason.unwrap().contains("not running"));
    }

    #[tokio::test]
    async fn test_check_upgrade_when_latest() {
        let engine = UpgradeEngine::new(catalog());
        let info = engine
            .check_upgrade(&deployment("1.1.0", StackStatus::Running))
            .await
            .unwrap();

        assert!(!info.upgrade_available);
        assert!(!info.can_upgrade);
        assert!(info.reason.is_some());
        assert!(info.new_variables.is_empty());
    }

    #[test]
    fn test_merge_variables_precedence() {
        let declared = vec![
            VariableDefinition::detected("B", None),
            VariableDefinition::detected("C", Some("c".to_string())),
            VariableDefinition::detected("D", Some("d".to_string())),
        ];
        let supplied = Variables::from([("D".to_string(), "new".to_string())]);
        let existing = BTreeMap::from([
            ("A".to_string(), "dropped".to_string()),
            ("B".to_string(), "kept".to_string()),
            ("D".to_string(), "old".to_string()),
        ]);

        let merged = merge_variables(&supplied, &existing, &declared);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged["B"], "kept");
        assert_eq!(merged["C"], "c");
        assert_eq!(merged["D"], "new");
        assert!(!merged.contains_key("A"));
    }
}
