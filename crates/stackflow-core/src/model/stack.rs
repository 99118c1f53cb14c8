//! Stack definition

use super::network::NetworkSpec;
use super::service::ServiceSpec;
use super::variable::VariableDefinition;
use super::volume::VolumeSpec;
use serde::{Deserialize, Serialize};

/// Parsed manifest of a single stack. Never mutated after parsing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackDefinition {
    /// `name` from the manifest, if any
    pub name: Option<String>,
    /// Services in declaration order
    pub services: Vec<ServiceSpec>,
    /// Detected and declared variables, first-seen order
    pub variables: Vec<VariableDefinition>,
    pub volumes: Vec<VolumeSpec>,
    pub networks: Vec<NetworkSpec>,
}

impl StackDefinition {
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn variable(&self, name: &str) -> Option<&VariableDefinition> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.variables.iter().map(|v| v.name.as_str()).collect()
    }
}

/// Result of validating a manifest without building a plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub(crate) fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}
