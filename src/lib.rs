#![forbid(unsafe_code)]

pub mod apply;
pub mod config;
pub mod correlator;
pub mod deployment;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod identity;
pub mod naming;
pub mod order;
pub mod providers;
pub mod render;
pub mod resource;
pub mod telemetry;

pub use config::{Action, CliArgs, Command, DeployerConfig, Provider};
pub use correlator::{EngineEventCorrelator, ResourceStatus, ResourceUpdate};
pub use deployment::{DeployMessage, DeploymentRequest, DeploymentResult, deploy};
pub use dispatch::{DispatchContext, ResourceRegistry, dispatch};
pub use engine::{EngineEvent, EngineOp, LocalEngine, ProvisioningEngine};
pub use error::DeployerError;
pub use naming::{NameGenerator, NamingConstraint};
pub use order::{DeploymentOrder, order};
pub use providers::{ProviderHandlers, create_provider};
pub use resource::{LogicalResource, ResourceGraph, ResourceId, ResourceKind, ResourceSpec};
