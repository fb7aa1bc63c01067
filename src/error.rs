use std::io;

use thiserror::Error;

use crate::resource::ResourceKind;

#[derive(Debug, Error)]
pub enum DeployerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid resource graph: {0}")]
    Graph(String),

    #[error(
        "resource kind '{kind}' has no entry in the {provider} priority table; refusing to skip its resources"
    )]
    UnorderedKind {
        kind: ResourceKind,
        provider: String,
    },

    #[error("provider handler failed for {resource}: {message}")]
    Provider { resource: String, message: String },

    #[error("{resource} depends on {dependency}, which has not been deployed yet")]
    MissingDependency {
        resource: String,
        dependency: String,
    },

    #[error("cannot synthesize a {resource_type} name from '{input}': every segment is empty")]
    NamingExhausted {
        input: String,
        resource_type: String,
    },

    #[error("provisioning engine error: {0}")]
    Engine(String),

    #[error("engine event for unknown physical path '{0}'")]
    UnknownPhysicalPath(String),

    #[error("deployment cancelled before the engine reported completion")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml_bw::Error),

    #[error("telemetry initialization error: {0}")]
    Telemetry(String),

    #[error("unexpected error: {0}")]
    Other(String),
}

impl DeployerError {
    /// Convenience constructor for provider backends reporting a handler failure.
    pub fn provider(resource: impl ToString, message: impl Into<String>) -> Self {
        DeployerError::Provider {
            resource: resource.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployerError>;
