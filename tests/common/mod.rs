#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cloud_deployer::dispatch::DispatchContext;
use cloud_deployer::engine::{EngineEvent, PhysicalHandle, ProvisioningEngine, RegisterRequest};
use cloud_deployer::error::{DeployerError, Result};
use cloud_deployer::identity::ScopeHandle;
use cloud_deployer::naming::NamingConstraint;
use cloud_deployer::providers::ProviderHandlers;
use cloud_deployer::resource::*;
use serde_json::json;
use tokio::sync::mpsc;

pub const MOCK_NAME: NamingConstraint = NamingConstraint {
    resource_type: "mock resource",
    abbreviation: "mk",
    max_length: 40,
    allow_upper_case: false,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

const MOCK_PRIORITY: &[ResourceKind] = &[
    ResourceKind::Service,
    ResourceKind::Queue,
    ResourceKind::Topic,
    ResourceKind::Bucket,
    ResourceKind::Api,
    ResourceKind::Policy,
];

/// Provider recording every handler call; optionally fails the n-th call (1-based).
#[derive(Clone, Default)]
pub struct RecordingProvider {
    pub calls: Arc<Mutex<Vec<ResourceId>>>,
    pub fail_on_call: Option<usize>,
}

impl RecordingProvider {
    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<ResourceId> {
        self.calls.lock().unwrap().clone()
    }

    fn handle(&self, ctx: &mut DispatchContext, scope: &ScopeHandle, name: &str) -> Result<()> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(scope.id.clone());
            calls.len()
        };
        if self.fail_on_call == Some(call) {
            return Err(DeployerError::provider(&scope.id, format!("mock failure on call {call}")));
        }
        ctx.provision(scope, "main", "mock:res/main", name, &MOCK_NAME, json!({ "call": call }))?;
        Ok(())
    }
}

#[async_trait]
impl ProviderHandlers for RecordingProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn priority(&self) -> &'static [ResourceKind] {
        MOCK_PRIORITY
    }

    async fn service(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &ServiceConfig,
    ) -> Result<()> {
        self.handle(ctx, scope, name)
    }

    async fn queue(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &QueueConfig,
    ) -> Result<()> {
        self.handle(ctx, scope, name)
    }

    async fn topic(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &TopicConfig,
    ) -> Result<()> {
        self.handle(ctx, scope, name)
    }

    async fn bucket(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &BucketConfig,
    ) -> Result<()> {
        self.handle(ctx, scope, name)
    }

    async fn api(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &ApiConfig,
    ) -> Result<()> {
        self.handle(ctx, scope, name)
    }

    async fn http(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &HttpConfig,
    ) -> Result<()> {
        self.handle(ctx, scope, name)
    }

    async fn schedule(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &ScheduleConfig,
    ) -> Result<()> {
        self.handle(ctx, scope, name)
    }

    async fn secret(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &SecretConfig,
    ) -> Result<()> {
        self.handle(ctx, scope, name)
    }

    async fn policy(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &PolicyConfig,
    ) -> Result<()> {
        self.handle(ctx, scope, name)
    }

    async fn key_value_store(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &KeyValueStoreConfig,
    ) -> Result<()> {
        self.handle(ctx, scope, name)
    }

    async fn sql_database(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &SqlDatabaseConfig,
    ) -> Result<()> {
        self.handle(ctx, scope, name)
    }

    async fn website(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &WebsiteConfig,
    ) -> Result<()> {
        self.handle(ctx, scope, name)
    }

    async fn websocket(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &WebsocketConfig,
    ) -> Result<()> {
        self.handle(ctx, scope, name)
    }
}

/// Engine that records every call and assigns opaque scope paths, so the correlator can only
/// resolve them through the scope index.
pub struct OpaqueEngine {
    pub calls: Arc<Mutex<Vec<String>>>,
    sender: Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>,
    next: AtomicUsize,
}

impl OpaqueEngine {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self {
            calls: Arc::default(),
            sender: Mutex::new(Some(tx)),
            next: AtomicUsize::new(0),
        };
        (engine, rx)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn emit(&self, event: EngineEvent) -> Result<()> {
        let guard = self.sender.lock().unwrap();
        let sender = guard
            .as_ref()
            .ok_or_else(|| DeployerError::Engine("closed".into()))?;
        sender
            .send(event)
            .map_err(|_| DeployerError::Engine("consumer gone".into()))
    }
}

impl ProvisioningEngine for OpaqueEngine {
    fn scope_path(&self, _id: &ResourceId) -> String {
        format!("urn:engine:{}", self.next.fetch_add(1, Ordering::SeqCst))
    }

    fn register_scope(&self, scope: &ScopeHandle) -> Result<()> {
        self.calls.lock().unwrap().push(format!("scope {}", scope.path));
        self.emit(EngineEvent::Pre {
            path: scope.path.clone(),
            parent: None,
            op: cloud_deployer::engine::EngineOp::Update,
        })
    }

    fn register(&self, request: RegisterRequest) -> Result<PhysicalHandle> {
        let path = format!("{}/{}", request.parent, request.name);
        self.calls.lock().unwrap().push(format!("register {path}"));
        self.emit(EngineEvent::Pre {
            path: path.clone(),
            parent: Some(request.parent),
            op: cloud_deployer::engine::EngineOp::Update,
        })?;
        self.emit(EngineEvent::Outputs { path: path.clone() })?;
        Ok(PhysicalHandle {
            path,
            type_token: request.type_token,
            name: request.name,
        })
    }

    fn complete(&self, path: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("complete {path}"));
        self.emit(EngineEvent::Outputs {
            path: path.to_string(),
        })
    }

    fn finish(&self) -> Result<()> {
        self.calls.lock().unwrap().push("finish".into());
        self.emit(EngineEvent::Summary { succeeded: true })?;
        self.abort();
        Ok(())
    }

    fn abort(&self) {
        self.sender.lock().unwrap().take();
    }
}

pub fn service(name: &str) -> LogicalResource {
    LogicalResource::new(name, ResourceSpec::Service(ServiceConfig::new("registry.local/app:1")))
}

pub fn queue(name: &str) -> LogicalResource {
    LogicalResource::new(name, ResourceSpec::Queue(QueueConfig::default()))
}

pub fn topic(name: &str, subscribers: &[&str]) -> LogicalResource {
    LogicalResource::new(
        name,
        ResourceSpec::Topic(TopicConfig {
            subscribers: subscribers.iter().map(|s| s.to_string()).collect(),
        }),
    )
}

/// A graph touching every resource kind, with cross-references between them.
pub const FULL_GRAPH: &str = r#"
resources:
  - name: live
    kind: websocket
    service: api
  - name: access
    kind: policy
    principals:
      - { kind: service, name: worker }
    actions: [read, write]
    resources:
      - { kind: bucket, name: uploads }
      - { kind: queue, name: jobs }
  - name: public
    kind: api
    routes:
      - { path: /orders, methods: [GET, POST], service: api }
      - { path: /health, service: worker }
  - name: api
    kind: service
    image: registry.local/api:1
    env:
      MODE: prod
  - name: worker
    kind: service
    image: registry.local/worker:1
    memory_mb: 1024
  - name: jobs
    kind: queue
  - name: events
    kind: topic
    subscribers: [worker, api]
  - name: uploads
    kind: bucket
    notifications:
      - { service: worker, event: write, prefix: incoming/ }
      - { service: worker, event: delete }
  - name: proxy
    kind: http
    service: api
  - name: nightly
    kind: schedule
    expression: "cron(0 3 * * ? *)"
    service: worker
  - name: db-password
    kind: secret
  - name: sessions
    kind: key_value_store
  - name: orders-db
    kind: sql_database
    migrations: ./migrations
  - name: site
    kind: website
"#;
