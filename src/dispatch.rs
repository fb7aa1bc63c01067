use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{Instrument, debug, info_span};

use crate::engine::{PhysicalHandle, ProvisioningEngine, RegisterRequest};
use crate::error::{DeployerError, Result};
use crate::identity::{ScopeHandle, ScopeIndex};
use crate::naming::{NameGenerator, NamingConstraint};
use crate::order::DeploymentOrder;
use crate::providers::ProviderHandlers;
use crate::resource::{LogicalResource, ResourceId, ResourceSpec};

/// Physical handles created for each logical resource during one deployment.
///
/// Later handlers look up earlier resources here (a topic subscription needs the target
/// service's function). It lives and dies with a single [`DispatchContext`].
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: IndexMap<ResourceId, IndexMap<String, PhysicalHandle>>,
    shared: IndexMap<String, PhysicalHandle>,
}

impl ResourceRegistry {
    pub fn record(&mut self, id: &ResourceId, role: &str, handle: PhysicalHandle) {
        self.entries
            .entry(id.clone())
            .or_default()
            .insert(role.to_string(), handle);
    }

    pub fn get(&self, id: &ResourceId, role: &str) -> Option<&PhysicalHandle> {
        self.entries.get(id).and_then(|roles| roles.get(role))
    }

    /// Stack-level resource shared by several logical resources (a storage account, a server).
    pub fn shared(&self, key: &str) -> Option<&PhysicalHandle> {
        self.shared.get(key)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.entries.contains_key(id)
    }

    /// Handles recorded for `id`, keyed by role, in registration order.
    pub fn handles(&self, id: &ResourceId) -> Option<&IndexMap<String, PhysicalHandle>> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-deployment state threaded through every provider handler call.
pub struct DispatchContext {
    engine: Arc<dyn ProvisioningEngine>,
    names: NameGenerator,
    index: ScopeIndex,
    scopes: HashMap<ResourceId, ScopeHandle>,
    registry: ResourceRegistry,
}

impl DispatchContext {
    pub fn new(
        engine: Arc<dyn ProvisioningEngine>,
        names: NameGenerator,
        index: ScopeIndex,
    ) -> Self {
        Self {
            engine,
            names,
            index,
            scopes: HashMap::new(),
            registry: ResourceRegistry::default(),
        }
    }

    pub fn names(&self) -> &NameGenerator {
        &self.names
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Scope for `id`, registering it with the engine the first time it is requested.
    ///
    /// The scope path is published to the [`ScopeIndex`] before the engine can emit any event
    /// for it.
    pub fn resolve_scope(&mut self, id: &ResourceId) -> Result<ScopeHandle> {
        if let Some(scope) = self.scopes.get(id) {
            return Ok(scope.clone());
        }
        let scope = ScopeHandle {
            id: id.clone(),
            path: self.engine.scope_path(id),
        };
        self.index.insert(scope.path.clone(), id.clone());
        self.engine.register_scope(&scope)?;
        self.scopes.insert(id.clone(), scope.clone());
        Ok(scope)
    }

    /// Name, register and record one physical resource beneath `scope`.
    pub fn provision(
        &mut self,
        scope: &ScopeHandle,
        role: &str,
        type_token: &str,
        logical_name: &str,
        rt: &NamingConstraint,
        properties: Value,
    ) -> Result<PhysicalHandle> {
        let name = self.names.physical_name(logical_name, rt)?;
        self.register(
            scope,
            role,
            RegisterRequest::new(&scope.path, type_token, name).with_properties(properties),
        )
    }

    /// Stack-level resource keyed by `key`, provisioned beneath `scope` on first use only.
    pub fn provision_shared(
        &mut self,
        scope: &ScopeHandle,
        key: &str,
        type_token: &str,
        rt: &NamingConstraint,
        properties: Value,
    ) -> Result<PhysicalHandle> {
        if let Some(handle) = self.registry.shared.get(key) {
            return Ok(handle.clone());
        }
        let name = self.names.physical_name(key, rt)?;
        let handle = self.engine.register(
            RegisterRequest::new(&scope.path, type_token, name).with_properties(properties),
        )?;
        debug!(scope = %scope.id, key, path = %handle.path, "registered shared resource");
        self.registry
            .shared
            .insert(key.to_string(), handle.clone());
        Ok(handle)
    }

    /// Register an already-named physical resource beneath `scope`.
    pub fn register(
        &mut self,
        scope: &ScopeHandle,
        role: &str,
        request: RegisterRequest,
    ) -> Result<PhysicalHandle> {
        let handle = self.engine.register(request)?;
        debug!(scope = %scope.id, role, path = %handle.path, "registered physical resource");
        self.registry.record(&scope.id, role, handle.clone());
        Ok(handle)
    }

    /// Handle `role` of an earlier resource `dependency`, required by `owner`.
    pub fn require(
        &self,
        owner: &ResourceId,
        dependency: &ResourceId,
        role: &str,
    ) -> Result<PhysicalHandle> {
        self.registry
            .get(dependency, role)
            .cloned()
            .ok_or_else(|| DeployerError::MissingDependency {
                resource: owner.to_string(),
                dependency: format!("{dependency} ({role})"),
            })
    }

    fn complete_scope(&self, scope: &ScopeHandle) -> Result<()> {
        self.engine.complete(&scope.path)
    }
}

/// Walk `order`, handing each resource to `provider` inside its own scope.
///
/// The first handler error stops the walk and is returned unchanged. Physical resources the
/// engine already accepted are left to the engine.
pub async fn dispatch(
    order: &DeploymentOrder,
    provider: &dyn ProviderHandlers,
    ctx: &mut DispatchContext,
) -> Result<()> {
    for resource in order.iter() {
        let id = resource.id();
        let scope = ctx.resolve_scope(&id)?;
        let span = info_span!("dispatch", resource = %id, provider = provider.name());
        invoke(provider, ctx, &scope, resource)
            .instrument(span)
            .await?;
        ctx.complete_scope(&scope)?;
    }
    Ok(())
}

async fn invoke(
    provider: &dyn ProviderHandlers,
    ctx: &mut DispatchContext,
    scope: &ScopeHandle,
    resource: &LogicalResource,
) -> Result<()> {
    let name = resource.name.as_str();
    match &resource.spec {
        ResourceSpec::Service(cfg) => provider.service(ctx, scope, name, cfg).await,
        ResourceSpec::Queue(cfg) => provider.queue(ctx, scope, name, cfg).await,
        ResourceSpec::Topic(cfg) => provider.topic(ctx, scope, name, cfg).await,
        ResourceSpec::Bucket(cfg) => provider.bucket(ctx, scope, name, cfg).await,
        ResourceSpec::Api(cfg) => provider.api(ctx, scope, name, cfg).await,
        ResourceSpec::Http(cfg) => provider.http(ctx, scope, name, cfg).await,
        ResourceSpec::Schedule(cfg) => provider.schedule(ctx, scope, name, cfg).await,
        ResourceSpec::Secret(cfg) => provider.secret(ctx, scope, name, cfg).await,
        ResourceSpec::Policy(cfg) => provider.policy(ctx, scope, name, cfg).await,
        ResourceSpec::KeyValueStore(cfg) => provider.key_value_store(ctx, scope, name, cfg).await,
        ResourceSpec::SqlDatabase(cfg) => provider.sql_database(ctx, scope, name, cfg).await,
        ResourceSpec::Website(cfg) => provider.website(ctx, scope, name, cfg).await,
        ResourceSpec::Websocket(cfg) => provider.websocket(ctx, scope, name, cfg).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineEvent, EngineOp, LocalEngine};
    use crate::identity::scope_path;
    use crate::resource::ResourceKind;

    fn context() -> (
        DispatchContext,
        ScopeIndex,
        tokio::sync::mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        let (engine, rx) = LocalEngine::new(EngineOp::Create);
        let index = ScopeIndex::new();
        let ctx = DispatchContext::new(
            Arc::new(engine),
            NameGenerator::new("shop", "dev"),
            index.clone(),
        );
        (ctx, index, rx)
    }

    #[test]
    fn scope_is_unique_per_kind_and_name() {
        let (mut ctx, index, mut rx) = context();
        let id = ResourceId::service("api");
        let first = ctx.resolve_scope(&id).unwrap();
        let second = ctx.resolve_scope(&id).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.path, scope_path(&id));

        let queue = ctx
            .resolve_scope(&ResourceId::new(ResourceKind::Queue, "api"))
            .unwrap();
        assert_ne!(queue.path, first.path);
        assert_eq!(index.len(), 2);

        let pres = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, EngineEvent::Pre { .. }))
            .count();
        assert_eq!(pres, 2, "each scope is registered once");
    }

    #[test]
    fn require_reports_missing_dependency() {
        let (ctx, _index, _rx) = context();
        let err = ctx
            .require(
                &ResourceId::new(ResourceKind::Topic, "t"),
                &ResourceId::service("worker"),
                "function",
            )
            .unwrap_err();
        assert!(format!("{err}").contains("service:worker (function)"));
    }

    #[test]
    fn provision_records_named_handle() {
        let (mut ctx, _index, _rx) = context();
        let id = ResourceId::new(ResourceKind::Bucket, "uploads");
        let scope = ctx.resolve_scope(&id).unwrap();
        let rt = NamingConstraint {
            resource_type: "bucket",
            abbreviation: "s3",
            max_length: 63,
            allow_upper_case: false,
            allow_hyphen: true,
            uses_logical_name_verbatim: true,
        };
        let handle = ctx
            .provision(&scope, "bucket", "aws:s3/bucket", "uploads", &rt, Value::Null)
            .unwrap();
        assert!(handle.name.starts_with("uploads-s3"));
        assert_eq!(ctx.registry().get(&id, "bucket"), Some(&handle));
        assert!(handle.path.starts_with(&scope.path));
    }

    #[test]
    fn shared_resources_are_provisioned_once() {
        let (mut ctx, _index, _rx) = context();
        let rt = NamingConstraint {
            resource_type: "storage account",
            abbreviation: "st",
            max_length: 24,
            allow_upper_case: false,
            allow_hyphen: false,
            uses_logical_name_verbatim: false,
        };
        let first_scope = ctx
            .resolve_scope(&ResourceId::new(ResourceKind::Queue, "a"))
            .unwrap();
        let second_scope = ctx
            .resolve_scope(&ResourceId::new(ResourceKind::Queue, "b"))
            .unwrap();
        let first = ctx
            .provision_shared(&first_scope, "storage", "azure:storage/account", &rt, Value::Null)
            .unwrap();
        let second = ctx
            .provision_shared(&second_scope, "storage", "azure:storage/account", &rt, Value::Null)
            .unwrap();
        assert_eq!(first, second);
        assert!(first.name.starts_with("shopdevst"));
        assert_eq!(ctx.registry().shared("storage"), Some(&first));
    }
}
