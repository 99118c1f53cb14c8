//! Product catalog and manifest sources
//!
//! The catalog lists products by group and version; each version names the
//! stacks it is made of. Manifests are fetched separately through a
//! [`ManifestSource`] so the catalog can stay a small index.

use crate::error::{DeployError, Result};
use crate::model::ProductGroupId;
use crate::upgrade::compare_versions;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stackflow_core::{ManifestParser, VariableDefinition};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A stack within a product version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStack {
    /// `<group>@<version>/<stack>`
    pub id: String,
    pub name: String,
    pub display_name: String,
    /// Location understood by the manifest source
    pub manifest: String,
}

/// A version of a product and the stacks it deploys, in deployment order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVersion {
    pub group: ProductGroupId,
    pub name: String,
    pub version: String,
    pub stacks: Vec<CatalogStack>,
}

pub fn stack_id(group: &ProductGroupId, version: &str, stack: &str) -> String {
    format!("{group}@{version}/{stack}")
}

/// Read-only product catalog
#[async_trait]
pub trait StackCatalog: Send + Sync {
    /// Highest version of the group
    async fn latest_version(&self, group: &ProductGroupId) -> Result<Option<ProductVersion>>;

    async fn version(&self, group: &ProductGroupId, version: &str) -> Result<Option<ProductVersion>>;

    /// Variable surface of a single stack
    async fn variables(&self, stack_id: &str) -> Result<Vec<VariableDefinition>>;
}

/// Where manifest text comes from
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch(&self, stack: &CatalogStack) -> Result<String>;
}

/// Variable surface of a whole version: every stack's variables, first
/// declaration wins
pub async fn version_variables(
    catalog: &dyn StackCatalog,
    version: &ProductVersion,
) -> Result<Vec<VariableDefinition>> {
    let mut merged: Vec<VariableDefinition> = Vec::new();
    for stack in &version.stacks {
        for variable in catalog.variables(&stack.id).await? {
            if !merged.iter().any(|v| v.name == variable.name) {
                merged.push(variable);
            }
        }
    }
    Ok(merged)
}

fn latest<'a>(versions: impl Iterator<Item = &'a ProductVersion>) -> Option<&'a ProductVersion> {
    versions.max_by(|a, b| compare_versions(&a.version, &b.version))
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    products: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    group: String,
    name: Option<String>,
    version: String,
    stacks: Vec<CatalogStackEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogStackEntry {
    name: String,
    display_name: Option<String>,
    manifest: PathBuf,
}

/// Catalog loaded from a YAML file.
///
/// ```yaml
/// products:
///   - group: wordpress
///     name: WordPress
///     version: 1.2.0
///     stacks:
///       - name: db
///         display_name: Database
///         manifest: wordpress/1.2.0/db.yml
/// ```
///
/// Manifest paths resolve against the catalog file's directory. Manifests
/// are read through the catalog's [`ManifestSource`], the filesystem unless
/// [`FileCatalog::with_source`] replaces it.
#[derive(Clone)]
pub struct FileCatalog {
    path: PathBuf,
    products: Vec<ProductVersion>,
    source: Arc<dyn ManifestSource>,
}

impl FileCatalog {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DeployError::Catalog(format!("{}: {}", path.display(), e)))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_yaml(&content, base).map(|mut catalog| {
            catalog.path = path.to_path_buf();
            catalog
        })
    }

    pub fn from_yaml(content: &str, base_dir: &Path) -> Result<Self> {
        let file: CatalogFile = serde_yaml::from_str(content)
            .map_err(|e| DeployError::Catalog(format!("invalid catalog: {e}")))?;

        let mut products = Vec::new();
        for entry in file.products {
            let group = ProductGroupId::new(entry.group);
            if entry.stacks.is_empty() {
                return Err(DeployError::Catalog(format!(
                    "{group}@{} has no stacks",
                    entry.version
                )));
            }
            let stacks = entry
                .stacks
                .into_iter()
                .map(|s| CatalogStack {
                    id: stack_id(&group, &entry.version, &s.name),
                    display_name: s.display_name.unwrap_or_else(|| s.name.clone()),
                    manifest: base_dir.join(&s.manifest).to_string_lossy().into_owned(),
                    name: s.name,
                })
                .collect();

            products.push(ProductVersion {
                name: entry.name.unwrap_or_else(|| group.to_string()),
                group,
                version: entry.version,
                stacks,
            });
        }

        debug!(count = products.len(), "Loaded catalog");
        Ok(Self {
            path: base_dir.to_path_buf(),
            products,
            source: Arc::new(FileManifestSource),
        })
    }

    pub fn with_source(mut self, source: Arc<dyn ManifestSource>) -> Self {
        self.source = source;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn products(&self) -> &[ProductVersion] {
        &self.products
    }

    fn find_stack(&self, stack_id: &str) -> Option<&CatalogStack> {
        self.products
            .iter()
            .flat_map(|p| p.stacks.iter())
            .find(|s| s.id == stack_id)
    }
}

#[async_trait]
impl StackCatalog for FileCatalog {
    async fn latest_version(&self, group: &ProductGroupId) -> Result<Option<ProductVersion>> {
        Ok(latest(self.products.iter().filter(|p| &p.group == group)).cloned())
    }

    async fn version(&self, group: &ProductGroupId, version: &str) -> Result<Option<ProductVersion>> {
        Ok(self
            .products
            .iter()
            .find(|p| &p.group == group && p.version == version)
            .cloned())
    }

    async fn variables(&self, stack_id: &str) -> Result<Vec<VariableDefinition>> {
        let stack = self
            .find_stack(stack_id)
            .ok_or_else(|| DeployError::StackNotFound(stack_id.to_string()))?;
        let text = self.source.fetch(stack).await?;
        Ok(ManifestParser::new()?.detect_variables(&text)?)
    }
}

/// Reads manifests from the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FileManifestSource;

#[async_trait]
impl ManifestSource for FileManifestSource {
    async fn fetch(&self, stack: &CatalogStack) -> Result<String> {
        tokio::fs::read_to_string(&stack.manifest)
            .await
            .map_err(|e| DeployError::Source(format!("{}: {}", stack.manifest, e)))
    }
}

/// Catalog and manifest source held in memory, keyed by stack id
#[derive(Default)]
pub struct InMemoryCatalog {
    products: Mutex<Vec<ProductVersion>>,
    manifests: Mutex<HashMap<String, String>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a version; `stacks` are `(name, manifest text)` pairs in
    /// deployment order
    pub fn add_version(&self, group: &str, version: &str, stacks: &[(&str, &str)]) {
        let group = ProductGroupId::from(group);
        let mut entries = Vec::new();
        let mut manifests = self.manifests.lock().unwrap_or_else(|p| p.into_inner());
        for (name, manifest) in stacks {
            let id = stack_id(&group, version, name);
            manifests.insert(id.clone(), manifest.to_string());
            entries.push(CatalogStack {
                manifest: id.clone(),
                id,
                name: name.to_string(),
                display_name: name.to_string(),
            });
        }

        self.products
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(ProductVersion {
                name: group.to_string(),
                group,
                version: version.to_string(),
                stacks: entries,
            });
    }

    fn manifest(&self, stack_id: &str) -> Option<String> {
        self.manifests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(stack_id)
            .cloned()
    }
}

#[async_trait]
impl StackCatalog for InMemoryCatalog {
    async fn latest_version(&self, group: &ProductGroupId) -> Result<Option<ProductVersion>> {
        let products = self.products.lock().unwrap_or_else(|p| p.into_inner());
        Ok(latest(products.iter().filter(|p| &p.group == group)).cloned())
    }

    async fn version(&self, group: &ProductGroupId, version: &str) -> Result<Option<ProductVersion>> {
        let products = self.products.lock().unwrap_or_else(|p| p.into_inner());
        Ok(products
            .iter()
            .find(|p| &p.group == group && p.version == version)
            .cloned())
    }

    async fn variables(&self, stack_id: &str) -> Result<Vec<VariableDefinition>> {
        let text = self
            .manifest(stack_id)
            .ok_or_else(|| DeployError::StackNotFound(stack_id.to_string()))?;
        Ok(ManifestParser::new()?.detect_variables(&text)?)
    }
}

#[async_trait]
impl ManifestSource for InMemoryCatalog {
    async fn fetch(&self, stack: &CatalogStack) -> Result<String> {
        self.manifest(&stack.manifest)
            .ok_or_else(|| DeployError::Source(format!("no manifest for {}", stack.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CATALOG: &str = r#"
products:
  - group: wordpress
    name: WordPress
    version: 1.9.0
    stacks:
      - name: db
        display_name: Database
        manifest: db.yml
  - group: wordpress
    version: 1.10.0
    stacks:
      - name: db
        manifest: db.yml
      - name: web
        manifest: web.yml
"#;

    #[tokio::test]
    async fn test_file_catalog() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("catalog.yml"), CATALOG).unwrap();
        std::fs::write(
            dir.path().join("db.yml"),
            "services:\n  db:\n    image: mysql:${MYSQL_VERSION:-8.0}\n",
        )
        .unwrap();

        let catalog = FileCatalog::load(dir.path().join("catalog.yml")).await.unwrap();
        let group = ProductGroupId::from("wordpress");

        // 1.10.0 is newer than 1.9.0 numerically
        let latest = catalog.latest_version(&group).await.unwrap().unwrap();
        assert_eq!(latest.version, "1.10.0");
        assert_eq!(latest.name, "wordpress");
        assert_eq!(latest.stacks[1].id, "wordpress@1.10.0/web");

        let old = catalog.version(&group, "1.9.0").await.unwrap().unwrap();
        assert_eq!(old.stacks[0].display_name, "Database");

        let vars = catalog.variables("wordpress@1.9.0/db").await.unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "MYSQL_VERSION");

        assert!(matches!(
            catalog.variables("wordpress@1.9.0/cache").await,
            Err(DeployError::StackNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_manifest_is_source_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("catalog.yml"), CATALOG).unwrap();
        let catalog = FileCatalog::load(dir.path().join("catalog.yml")).await.unwrap();

        let err = catalog.variables("wordpress@1.10.0/web").await.unwrap_err();
        assert!(matches!(err, DeployError::Source(_)));
    }

    struct FixedSource(&'static str);

    #[async_trait]
    impl ManifestSource for FixedSource {
        async fn fetch(&self, _stack: &CatalogStack) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_variables_read_through_injected_source() {
        // No manifest files on disk; only the injected source can answer
        let catalog = FileCatalog::from_yaml(CATALOG, Path::new("/nonexistent"))
            .unwrap()
            .with_source(Arc::new(FixedSource(
                "services:\n  web:\n    image: web:${WEB_TAG}\n",
            )));

        let vars = catalog.variables("wordpress@1.10.0/web").await.unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "WEB_TAG");
    }

    #[test]
    fn test_catalog_without_stacks_rejected() {
        let yaml = "products:\n  - group: g\n    version: '1'\n    stacks: []\n";
        assert!(FileCatalog::from_yaml(yaml, Path::new(".")).is_err());
    }

    #[tokio::test]
    async fn test_in_memory_catalog() {
        let catalog = InMemoryCatalog::new();
        catalog.add_version("shop", "1.0", &[("api", "services:\n  api:\n    image: ${IMAGE}\n")]);

        let group = ProductGroupId::from("shop");
        let version = catalog.version(&group, "1.0").await.unwrap().unwrap();
        let text = catalog.fetch(&version.stacks[0]).await.unwrap();
        assert!(text.contains("${IMAGE}"));

        let vars = version_variables(&catalog, &version).await.unwrap();
        assert_eq!(vars[0].name, "IMAGE");
        assert!(vars[0].required);
    }
}
