use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DeployerError, Result};

/// Abstract resource classes a deployment can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Service,
    Queue,
    Topic,
    Bucket,
    Api,
    Http,
    Schedule,
    Secret,
    Policy,
    KeyValueStore,
    SqlDatabase,
    Website,
    Websocket,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 13] = [
        ResourceKind::Service,
        ResourceKind::Queue,
        ResourceKind::Topic,
        ResourceKind::Bucket,
        ResourceKind::Api,
        ResourceKind::Http,
        ResourceKind::Schedule,
        ResourceKind::Secret,
        ResourceKind::Policy,
        ResourceKind::KeyValueStore,
        ResourceKind::SqlDatabase,
        ResourceKind::Website,
        ResourceKind::Websocket,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Service => "service",
            ResourceKind::Queue => "queue",
            ResourceKind::Topic => "topic",
            ResourceKind::Bucket => "bucket",
            ResourceKind::Api => "api",
            ResourceKind::Http => "http",
            ResourceKind::Schedule => "schedule",
            ResourceKind::Secret => "secret",
            ResourceKind::Policy => "policy",
            ResourceKind::KeyValueStore => "key_value_store",
            ResourceKind::SqlDatabase => "sql_database",
            ResourceKind::Website => "website",
            ResourceKind::Websocket => "websocket",
        }
    }

    pub fn from_token(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a logical resource: unique per deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn service(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Service, name)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

fn default_memory_mb() -> u32 {
    512
}

fn default_timeout_secs() -> u32 {
    15
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub image: String,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl ServiceConfig {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            memory_mb: default_memory_mb(),
            timeout_secs: default_timeout_secs(),
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Services receiving every message published to the topic.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscribers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketEvent {
    Write,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketNotification {
    pub service: String,
    pub event: BucketEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<BucketNotification>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRoute {
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    pub service: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<ApiRoute>,
}

/// A raw HTTP proxy in front of a single service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Cron expression or `rate(...)` expression, passed through to the cloud scheduler.
    pub expression: String,
    pub service: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretConfig {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub principals: Vec<ResourceId>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub resources: Vec<ResourceId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueStoreConfig {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlDatabaseConfig {
    /// Migration directory applied after the database is created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrations: Option<String>,
}

fn default_base_path() -> String {
    "/".to_string()
}

fn default_index_document() -> String {
    "index.html".to_string()
}

fn default_error_document() -> String {
    "404.html".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsiteConfig {
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default = "default_index_document")]
    pub index_document: String,
    #[serde(default = "default_error_document")]
    pub error_document: String,
}

impl Default for WebsiteConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            index_document: default_index_document(),
            error_document: default_error_document(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsocketConfig {
    pub service: String,
}

/// Kind-specific payload of a logical resource. The variant is the resource kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    Service(ServiceConfig),
    Queue(QueueConfig),
    Topic(TopicConfig),
    Bucket(BucketConfig),
    Api(ApiConfig),
    Http(HttpConfig),
    Schedule(ScheduleConfig),
    Secret(SecretConfig),
    Policy(PolicyConfig),
    KeyValueStore(KeyValueStoreConfig),
    SqlDatabase(SqlDatabaseConfig),
    Website(WebsiteConfig),
    Websocket(WebsocketConfig),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Service(_) => ResourceKind::Service,
            ResourceSpec::Queue(_) => ResourceKind::Queue,
            ResourceSpec::Topic(_) => ResourceKind::Topic,
            ResourceSpec::Bucket(_) => ResourceKind::Bucket,
            ResourceSpec::Api(_) => ResourceKind::Api,
            ResourceSpec::Http(_) => ResourceKind::Http,
            ResourceSpec::Schedule(_) => ResourceKind::Schedule,
            ResourceSpec::Secret(_) => ResourceKind::Secret,
            ResourceSpec::Policy(_) => ResourceKind::Policy,
            ResourceSpec::KeyValueStore(_) => ResourceKind::KeyValueStore,
            ResourceSpec::SqlDatabase(_) => ResourceKind::SqlDatabase,
            ResourceSpec::Website(_) => ResourceKind::Website,
            ResourceSpec::Websocket(_) => ResourceKind::Websocket,
        }
    }

    /// Other logical resources this one needs to exist before it can be realised.
    pub fn references(&self) -> Vec<ResourceId> {
        match self {
            ResourceSpec::Topic(cfg) => cfg.subscribers.iter().map(ResourceId::service).collect(),
            ResourceSpec::Bucket(cfg) => cfg
                .notifications
                .iter()
                .map(|n| ResourceId::service(&n.service))
                .collect(),
            ResourceSpec::Api(cfg) => cfg
                .routes
                .iter()
                .map(|r| ResourceId::service(&r.service))
                .collect(),
            ResourceSpec::Http(cfg) => vec![ResourceId::service(&cfg.service)],
            ResourceSpec::Schedule(cfg) => vec![ResourceId::service(&cfg.service)],
            ResourceSpec::Websocket(cfg) => vec![ResourceId::service(&cfg.service)],
            ResourceSpec::Policy(cfg) => cfg
                .principals
                .iter()
                .chain(cfg.resources.iter())
                .cloned()
                .collect(),
            ResourceSpec::Service(_)
            | ResourceSpec::Queue(_)
            | ResourceSpec::Secret(_)
            | ResourceSpec::KeyValueStore(_)
            | ResourceSpec::SqlDatabase(_)
            | ResourceSpec::Website(_) => Vec::new(),
        }
    }
}

/// The caller's unit of infrastructure intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalResource {
    pub name: String,
    #[serde(flatten)]
    pub spec: ResourceSpec,
}

impl LogicalResource {
    pub fn new(name: impl Into<String>, spec: ResourceSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.kind(), self.name.clone())
    }
}

/// Declarative resource graph submitted for one deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGraph {
    #[serde(default)]
    pub resources: Vec<LogicalResource>,
}

impl ResourceGraph {
    pub fn new(resources: Vec<LogicalResource>) -> Self {
        Self { resources }
    }

    /// Load a graph from a `.json` or YAML file and validate it.
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DeployerError::Config(format!(
                "resource graph {} does not exist",
                path.display()
            )));
        }
        let raw = fs::read_to_string(path)?;
        let graph: ResourceGraph = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&raw)?,
            _ => serde_yaml_bw::from_str(&raw)?,
        };
        graph.validate()?;
        Ok(graph)
    }

    /// Rejects reserved characters, duplicate ids and dangling references.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for resource in &self.resources {
            validate_name(resource)?;
            if !seen.insert(resource.id()) {
                return Err(DeployerError::Graph(format!(
                    "duplicate resource {}",
                    resource.id()
                )));
            }
        }

        for resource in &self.resources {
            for reference in resource.spec.references() {
                if !seen.contains(&reference) {
                    return Err(DeployerError::Graph(format!(
                        "{} references undeclared resource {}",
                        resource.id(),
                        reference
                    )));
                }
            }
        }
        Ok(())
    }
}

fn validate_name(resource: &LogicalResource) -> Result<()> {
    let name = resource.name.as_str();
    if name.trim().is_empty() {
        return Err(DeployerError::Graph(format!(
            "a {} resource has an empty name",
            resource.kind()
        )));
    }
    if name.contains('$') || name.contains("::") {
        return Err(DeployerError::Graph(format!(
            "resource name '{name}' contains a reserved sequence ('$' or '::')"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str) -> LogicalResource {
        LogicalResource::new(name, ResourceSpec::Service(ServiceConfig::new("app:latest")))
    }

    #[test]
    fn parses_flattened_yaml_resources() {
        let yaml = r#"
resources:
  - name: orders
    kind: service
    image: registry.local/orders:1
    env:
      MODE: prod
  - name: updates
    kind: topic
    subscribers: [orders]
  - name: uploads
    kind: bucket
    notifications:
      - service: orders
        event: write
        prefix: incoming/
"#;
        let graph: ResourceGraph = serde_yaml_bw::from_str(yaml).expect("parse graph");
        assert_eq!(graph.resources.len(), 3);
        match &graph.resources[0].spec {
            ResourceSpec::Service(cfg) => {
                assert_eq!(cfg.image, "registry.local/orders:1");
                assert_eq!(cfg.memory_mb, 512);
                assert_eq!(cfg.env.get("MODE").map(String::as_str), Some("prod"));
            }
            other => panic!("expected service, got {other:?}"),
        }
        assert_eq!(graph.resources[1].id().to_string(), "topic:updates");
        graph.validate().expect("graph valid");
    }

    #[test]
    fn website_documents_default_and_override() {
        let yaml = r#"
resources:
  - name: docs
    kind: website
    index_document: home.html
  - name: landing
    kind: website
"#;
        let graph: ResourceGraph = serde_yaml_bw::from_str(yaml).expect("parse graph");
        let sites: Vec<_> = graph
            .resources
            .iter()
            .map(|r| match &r.spec {
                ResourceSpec::Website(cfg) => cfg.clone(),
                other => panic!("expected website, got {other:?}"),
            })
            .collect();
        assert_eq!(sites[0].index_document, "home.html");
        assert_eq!(sites[0].error_document, "404.html");
        assert_eq!(sites[1].base_path, "/");
        assert_eq!(sites[1].index_document, "index.html");
    }

    #[test]
    fn rejects_duplicate_ids() {
        let graph = ResourceGraph::new(vec![service("a"), service("a")]);
        let err = graph.validate().unwrap_err();
        assert!(format!("{err}").contains("duplicate resource service:a"));
    }

    #[test]
    fn same_name_different_kind_is_allowed() {
        let graph = ResourceGraph::new(vec![
            service("shared"),
            LogicalResource::new("shared", ResourceSpec::Queue(QueueConfig::default())),
        ]);
        graph.validate().expect("distinct kinds");
    }

    #[test]
    fn rejects_reserved_path_characters() {
        let graph = ResourceGraph::new(vec![service("bad$name")]);
        assert!(matches!(graph.validate(), Err(DeployerError::Graph(_))));
        let graph = ResourceGraph::new(vec![service("bad::name")]);
        assert!(matches!(graph.validate(), Err(DeployerError::Graph(_))));
    }

    #[test]
    fn rejects_dangling_references() {
        let graph = ResourceGraph::new(vec![LogicalResource::new(
            "nightly",
            ResourceSpec::Schedule(ScheduleConfig {
                expression: "0 3 * * *".into(),
                service: "missing".into(),
            }),
        )]);
        let err = graph.validate().unwrap_err();
        assert!(format!("{err}").contains("undeclared resource service:missing"));
    }

    #[test]
    fn kind_tokens_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_token(kind.as_str()), Some(kind));
        }
        assert_eq!(ResourceKind::from_token("lambda"), None);
    }
}
