//! Network declarations

use serde::{Deserialize, Serialize};

/// Network declared in the top-level `networks` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    #[serde(default)]
    pub driver: Option<String>,
    /// Network shared across stacks: must already exist, used under its literal name and never removed by a stack
    #[serde(default)]
    pub external: bool,
}

impl NetworkSpec {
    pub fn driver_or_default(&self) -> &str {
        self.driver.as_deref().unwrap_or("bridge")
    }
}
