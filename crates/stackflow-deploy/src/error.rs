//! Deployment error types

use stackflow_container::RuntimeError;
use stackflow_core::StackError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error(transparent)]
    Stack(#[from] StackError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("A deployment pass is already running for {group} in {environment}")]
    DeploymentInProgress { environment: String, group: String },

    #[error("Upgrade not possible: {reason}")]
    UpgradeNotEligible { reason: String },

    #[error("Rollback not possible: {reason}")]
    RollbackNotEligible { reason: String },

    #[error("Stack not found: {0}")]
    StackNotFound(String),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("{group} is already deployed in {environment}")]
    AlreadyDeployed { environment: String, group: String },

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Manifest source error: {0}")]
    Source(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, DeployError>;
