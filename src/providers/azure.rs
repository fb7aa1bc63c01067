use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::dispatch::DispatchContext;
use crate::engine::PhysicalHandle;
use crate::error::{DeployerError, Result};
use crate::identity::ScopeHandle;
use crate::naming::NamingConstraint;
use crate::providers::ProviderHandlers;
use crate::resource::{
    ApiConfig, BucketConfig, BucketEvent, HttpConfig, KeyValueStoreConfig, PolicyConfig,
    QueueConfig, ResourceId, ResourceKind, ScheduleConfig, SecretConfig, ServiceConfig,
    SqlDatabaseConfig, TopicConfig, WebsiteConfig, WebsocketConfig,
};

const PRIORITY: &[ResourceKind] = &[
    ResourceKind::Secret,
    ResourceKind::SqlDatabase,
    ResourceKind::KeyValueStore,
    ResourceKind::Service,
    ResourceKind::Queue,
    ResourceKind::Bucket,
    ResourceKind::Topic,
    ResourceKind::Schedule,
    ResourceKind::Api,
    ResourceKind::Http,
    ResourceKind::Websocket,
    ResourceKind::Website,
    ResourceKind::Policy,
];

// Stack-level resources are named from project and stack.
pub const CONTAINER_ENV: NamingConstraint = NamingConstraint {
    resource_type: "container app environment",
    abbreviation: "cae",
    max_length: 60,
    allow_upper_case: false,
    allow_hyphen: true,
    uses_logical_name_verbatim: false,
};

pub const STORAGE_ACCOUNT: NamingConstraint = NamingConstraint {
    resource_type: "storage account",
    abbreviation: "st",
    max_length: 24,
    allow_upper_case: false,
    allow_hyphen: false,
    uses_logical_name_verbatim: false,
};

pub const KEY_VAULT: NamingConstraint = NamingConstraint {
    resource_type: "key vault",
    abbreviation: "kv",
    max_length: 24,
    allow_upper_case: false,
    allow_hyphen: true,
    uses_logical_name_verbatim: false,
};

pub const API_MANAGEMENT: NamingConstraint = NamingConstraint {
    resource_type: "api management service",
    abbreviation: "apim",
    max_length: 50,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: false,
};

pub const POSTGRES_SERVER: NamingConstraint = NamingConstraint {
    resource_type: "postgres flexible server",
    abbreviation: "psql",
    max_length: 63,
    allow_upper_case: false,
    allow_hyphen: true,
    uses_logical_name_verbatim: false,
};

pub const CONTAINER_APP: NamingConstraint = NamingConstraint {
    resource_type: "container app",
    abbreviation: "ca",
    max_length: 32,
    allow_upper_case: false,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const IDENTITY: NamingConstraint = NamingConstraint {
    resource_type: "managed identity",
    abbreviation: "id",
    max_length: 128,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const DAPR_COMPONENT: NamingConstraint = NamingConstraint {
    resource_type: "dapr component",
    abbreviation: "dapr",
    max_length: 60,
    allow_upper_case: false,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const STORAGE_CHILD: NamingConstraint = NamingConstraint {
    resource_type: "storage queue or container",
    abbreviation: "",
    max_length: 63,
    allow_upper_case: false,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const STORAGE_TABLE: NamingConstraint = NamingConstraint {
    resource_type: "storage table",
    abbreviation: "tbl",
    max_length: 63,
    allow_upper_case: true,
    allow_hyphen: false,
    uses_logical_name_verbatim: true,
};

pub const EVENT_GRID: NamingConstraint = NamingConstraint {
    resource_type: "event grid topic",
    abbreviation: "evgt",
    max_length: 50,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const EVENT_SUBSCRIPTION: NamingConstraint = NamingConstraint {
    resource_type: "event grid subscription",
    abbreviation: "evgs",
    max_length: 64,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const APIM_API: NamingConstraint = NamingConstraint {
    resource_type: "api management api",
    abbreviation: "api",
    max_length: 80,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const VAULT_SECRET: NamingConstraint = NamingConstraint {
    resource_type: "key vault secret",
    abbreviation: "sec",
    max_length: 127,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const ROLE_ASSIGNMENT: NamingConstraint = NamingConstraint {
    resource_type: "role assignment",
    abbreviation: "ra",
    max_length: 64,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const DATABASE: NamingConstraint = NamingConstraint {
    resource_type: "postgres database",
    abbreviation: "db",
    max_length: 63,
    allow_upper_case: false,
    allow_hyphen: false,
    uses_logical_name_verbatim: true,
};

pub const WEB_STORAGE: NamingConstraint = NamingConstraint {
    resource_type: "static website storage account",
    abbreviation: "web",
    max_length: 24,
    allow_upper_case: false,
    allow_hyphen: false,
    uses_logical_name_verbatim: true,
};

pub const CDN_ENDPOINT: NamingConstraint = NamingConstraint {
    resource_type: "cdn endpoint",
    abbreviation: "cdn",
    max_length: 50,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const WEB_PUBSUB: NamingConstraint = NamingConstraint {
    resource_type: "web pubsub service",
    abbreviation: "wps",
    max_length: 63,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

/// Azure handlers: Container Apps for compute, Event Grid for events, API Management for ingress.
#[derive(Debug, Clone, Default)]
pub struct AzureBackend;

impl AzureBackend {
    pub fn new() -> Self {
        Self
    }

    fn storage_account(ctx: &mut DispatchContext, scope: &ScopeHandle) -> Result<PhysicalHandle> {
        ctx.provision_shared(
            scope,
            "storage",
            "azure:storage/storageAccount",
            &STORAGE_ACCOUNT,
            json!({ "kind": "StorageV2", "sku": "Standard_LRS" }),
        )
    }

    fn container_app(ctx: &DispatchContext, owner: &ScopeHandle, service: &str) -> Result<String> {
        let handle = ctx.require(&owner.id, &ResourceId::service(service), "container-app")?;
        Ok(handle.name)
    }

    fn subscribe(
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        source: &PhysicalHandle,
        service: &str,
        label: &str,
        filter: serde_json::Value,
    ) -> Result<()> {
        let app = Self::container_app(ctx, scope, service)?;
        ctx.provision(
            scope,
            &format!("subscription:{label}"),
            "azure:eventgrid/eventSubscription",
            &format!("{}-{label}", scope.id.name),
            &EVENT_SUBSCRIPTION,
            json!({ "source": source.name, "endpoint": app, "filter": filter }),
        )?;
        Ok(())
    }

    fn apim_api(
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        protocol: &str,
        operations: &[(String, Vec<String>, String)],
    ) -> Result<()> {
        let apim = ctx.provision_shared(
            scope,
            "apim",
            "azure:apimanagement/apiManagementService",
            &API_MANAGEMENT,
            json!({ "sku": "Consumption" }),
        )?;
        let api = ctx.provision(
            scope,
            "api",
            "azure:apimanagement/api",
            name,
            &APIM_API,
            json!({ "service": apim.name, "protocols": [protocol] }),
        )?;
        for (idx, (path, methods, service)) in operations.iter().enumerate() {
            let app = Self::container_app(ctx, scope, service)?;
            ctx.provision(
                scope,
                &format!("operation:{path}"),
                "azure:apimanagement/apiOperation",
                &format!("{name}-op{idx}"),
                &APIM_API,
                json!({ "api": api.name, "urlTemplate": path, "methods": methods, "backend": app }),
            )?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderHandlers for AzureBackend {
    fn name(&self) -> &'static str {
        "azure"
    }

    fn priority(&self) -> &'static [ResourceKind] {
        PRIORITY
    }

    async fn service(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &ServiceConfig,
    ) -> Result<()> {
        let environment = ctx.provision_shared(
            scope,
            "container-env",
            "azure:app/managedEnvironment",
            &CONTAINER_ENV,
            json!({}),
        )?;
        let identity = ctx.provision(
            scope,
            "identity",
            "azure:managedidentity/userAssignedIdentity",
            name,
            &IDENTITY,
            json!({}),
        )?;
        let app = ctx.provision(
            scope,
            "container-app",
            "azure:app/containerApp",
            name,
            &CONTAINER_APP,
            json!({
                "environment": environment.name,
                "identity": identity.name,
                "image": config.image,
                "memory": format!("{}Mi", config.memory_mb),
                "env": config.env,
            }),
        )?;
        info!(service = name, app = %app.name, "registered container app");
        Ok(())
    }

    async fn queue(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &QueueConfig,
    ) -> Result<()> {
        let account = Self::storage_account(ctx, scope)?;
        ctx.provision(
            scope,
            "queue",
            "azure:storage/queue",
            name,
            &STORAGE_CHILD,
            json!({ "account": account.name }),
        )?;
        Ok(())
    }

    async fn topic(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &TopicConfig,
    ) -> Result<()> {
        let topic = ctx.provision(
            scope,
            "topic",
            "azure:eventgrid/topic",
            name,
            &EVENT_GRID,
            json!({ "inputSchema": "CloudEventSchemaV1_0" }),
        )?;
        for subscriber in &config.subscribers {
            Self::subscribe(ctx, scope, &topic, subscriber, subscriber, json!({}))?;
        }
        Ok(())
    }

    async fn bucket(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &BucketConfig,
    ) -> Result<()> {
        let account = Self::storage_account(ctx, scope)?;
        ctx.provision(
            scope,
            "container",
            "azure:storage/blobContainer",
            name,
            &STORAGE_CHILD,
            json!({ "account": account.name }),
        )?;
        if config.notifications.is_empty() {
            return Ok(());
        }
        let system_topic = ctx.provision(
            scope,
            "system-topic",
            "azure:eventgrid/systemTopic",
            name,
            &EVENT_GRID,
            json!({ "source": account.name, "topicType": "Microsoft.Storage.StorageAccounts" }),
        )?;
        for notification in &config.notifications {
            let (event, suffix) = match notification.event {
                BucketEvent::Write => ("Microsoft.Storage.BlobCreated", "write"),
                BucketEvent::Delete => ("Microsoft.Storage.BlobDeleted", "delete"),
            };
            Self::subscribe(
                ctx,
                scope,
                &system_topic,
                &notification.service,
                &format!("{}-{suffix}", notification.service),
                json!({ "includedEventTypes": [event], "subjectBeginsWith": notification.prefix }),
            )?;
        }
        Ok(())
    }

    async fn api(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &ApiConfig,
    ) -> Result<()> {
        let operations: Vec<_> = config
            .routes
            .iter()
            .map(|route| (route.path.clone(), route.methods.clone(), route.service.clone()))
            .collect();
        Self::apim_api(ctx, scope, name, "https", &operations)
    }

    async fn http(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &HttpConfig,
    ) -> Result<()> {
        let operations = vec![("/*".to_string(), Vec::new(), config.service.clone())];
        Self::apim_api(ctx, scope, name, "https", &operations)
    }

    async fn schedule(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &ScheduleConfig,
    ) -> Result<()> {
        let app = Self::container_app(ctx, scope, &config.service)?;
        ctx.provision(
            scope,
            "binding",
            "azure:app/daprComponent",
            name,
            &DAPR_COMPONENT,
            json!({
                "componentType": "bindings.cron",
                "schedule": config.expression,
                "scopes": [app],
            }),
        )?;
        Ok(())
    }

    async fn secret(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &SecretConfig,
    ) -> Result<()> {
        let vault = ctx.provision_shared(
            scope,
            "vault",
            "azure:keyvault/vault",
            &KEY_VAULT,
            json!({ "sku": "standard", "enableRbacAuthorization": true }),
        )?;
        ctx.provision(
            scope,
            "secret",
            "azure:keyvault/secret",
            name,
            &VAULT_SECRET,
            json!({ "vault": vault.name }),
        )?;
        Ok(())
    }

    async fn policy(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &PolicyConfig,
    ) -> Result<()> {
        for principal in &config.principals {
            if principal.kind != ResourceKind::Service {
                return Err(DeployerError::provider(
                    &scope.id,
                    format!("policy principal {principal} is not a service"),
                ));
            }
            let identity = ctx.require(&scope.id, principal, "identity")?;
            for resource in &config.resources {
                let target = ctx
                    .registry()
                    .handles(resource)
                    .and_then(|roles| roles.values().next())
                    .cloned()
                    .ok_or_else(|| DeployerError::MissingDependency {
                        resource: scope.id.to_string(),
                        dependency: resource.to_string(),
                    })?;
                ctx.provision(
                    scope,
                    &format!("assignment:{}:{resource}", principal.name),
                    "azure:authorization/roleAssignment",
                    &format!(
                        "{name}-{}-{}-{}",
                        principal.name, resource.kind, resource.name
                    ),
                    &ROLE_ASSIGNMENT,
                    json!({
                        "principal": identity.name,
                        "scope": target.name,
                        "actions": config.actions,
                    }),
                )?;
            }
        }
        Ok(())
    }

    async fn key_value_store(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &KeyValueStoreConfig,
    ) -> Result<()> {
        let account = Self::storage_account(ctx, scope)?;
        ctx.provision(
            scope,
            "table",
            "azure:storage/table",
            name,
            &STORAGE_TABLE,
            json!({ "account": account.name }),
        )?;
        Ok(())
    }

    async fn sql_database(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &SqlDatabaseConfig,
    ) -> Result<()> {
        let server = ctx.provision_shared(
            scope,
            "postgres",
            "azure:dbforpostgresql/flexibleServer",
            &POSTGRES_SERVER,
            json!({ "version": "16", "sku": "Standard_B1ms" }),
        )?;
        ctx.provision(
            scope,
            "database",
            "azure:dbforpostgresql/database",
            name,
            &DATABASE,
            json!({ "server": server.name, "migrations": config.migrations }),
        )?;
        Ok(())
    }

    async fn website(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &WebsiteConfig,
    ) -> Result<()> {
        let account = ctx.provision(
            scope,
            "storage",
            "azure:storage/storageAccount",
            name,
            &WEB_STORAGE,
            json!({
                "staticWebsite": {
                    "indexDocument": config.index_document,
                    "error404Document": config.error_document,
                }
            }),
        )?;
        ctx.provision(
            scope,
            "endpoint",
            "azure:cdn/endpoint",
            name,
            &CDN_ENDPOINT,
            json!({ "origin": account.name, "originPath": config.base_path }),
        )?;
        Ok(())
    }

    async fn websocket(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &WebsocketConfig,
    ) -> Result<()> {
        let app = Self::container_app(ctx, scope, &config.service)?;
        let hub = ctx.provision(
            scope,
            "pubsub",
            "azure:webpubsub/webPubSub",
            name,
            &WEB_PUBSUB,
            json!({ "sku": "Free_F1" }),
        )?;
        ctx.provision(
            scope,
            "hub",
            "azure:webpubsub/webPubSubHub",
            name,
            &WEB_PUBSUB,
            json!({ "service": hub.name, "eventHandler": app }),
        )?;
        Ok(())
    }
}
