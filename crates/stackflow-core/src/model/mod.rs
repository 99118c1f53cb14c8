//! Data model
//!
//! Manifest-level definitions (`StackDefinition` and its parts) and the
//! resolved `DeploymentPlan` built from them.

mod network;
mod plan;
mod port;
mod service;
mod stack;
mod variable;
mod volume;

pub use network::*;
pub use plan::*;
pub use port::*;
pub use service::*;
pub use stack::*;
pub use variable::*;
pub use volume::*;
