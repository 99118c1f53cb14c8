//! stackflow core
//!
//! Everything that happens before a container runtime is touched:
//!
//! ```text
//! manifest text ──▶ ManifestParser ──▶ StackDefinition
//!                                           │ + variable values
//!                                           ▼
//!                                      PlanBuilder ──▶ DeploymentPlan
//! ```
//!
//! Parsing and planning are synchronous and perform no I/O beyond reading a
//! manifest file on request.

pub mod error;
pub mod model;
pub mod parser;
pub mod planner;
pub mod template;

pub use error::{Result, StackError};
pub use model::*;
pub use parser::{DEFAULT_NETWORK, ManifestParser};
pub use planner::{PlanBuilder, SERVICE_LABEL, STACK_LABEL};
pub use template::{Placeholder, VariableResolver, Variables};
