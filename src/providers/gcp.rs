use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::dispatch::DispatchContext;
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
    ResourceKind::KeyValueStore,
    ResourceKind::SqlDatabase,
    ResourceKind::Service,
    ResourceKind::Bucket,
    ResourceKind::Queue,
    ResourceKind::Topic,
    ResourceKind::Schedule,
    ResourceKind::Api,
    ResourceKind::Http,
    ResourceKind::Websocket,
    ResourceKind::Website,
    ResourceKind::Policy,
];

pub const SERVICE_ACCOUNT: NamingConstraint = NamingConstraint {
    resource_type: "service account",
    abbreviation: "sa",
    max_length: 30,
    allow_upper_case: false,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const CLOUD_RUN: NamingConstraint = NamingConstraint {
    resource_type: "cloud run service",
    abbreviation: "run",
    max_length: 49,
    allow_upper_case: false,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const PUBSUB: NamingConstraint = NamingConstraint {
    resource_type: "pubsub topic or subscription",
    abbreviation: "ps",
    max_length: 255,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const STORAGE_BUCKET: NamingConstraint = NamingConstraint {
    resource_type: "storage bucket",
    abbreviation: "gcs",
    max_length: 63,
    allow_upper_case: false,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const API_GATEWAY: NamingConstraint = NamingConstraint {
    resource_type: "api gateway",
    abbreviation: "gw",
    max_length: 50,
    allow_upper_case: false,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const SCHEDULER_JOB: NamingConstraint = NamingConstraint {
    resource_type: "scheduler job",
    abbreviation: "job",
    max_length: 500,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const SECRET: NamingConstraint = NamingConstraint {
    resource_type: "secret manager secret",
    abbreviation: "sec",
    max_length: 255,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const IAM_MEMBER: NamingConstraint = NamingConstraint {
    resource_type: "iam member binding",
    abbreviation: "iam",
    max_length: 128,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const FIRESTORE: NamingConstraint = NamingConstraint {
    resource_type: "firestore database",
    abbreviation: "fs",
    max_length: 63,
    allow_upper_case: false,
    allow_hyphen: true,
    uses_logical_name_verbatim: false,
};

pub const COLLECTION: NamingConstraint = NamingConstraint {
    resource_type: "firestore collection",
    abbreviation: "col",
    max_length: 1500,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const SQL_INSTANCE: NamingConstraint = NamingConstraint {
    resource_type: "cloud sql instance",
    abbreviation: "sql",
    max_length: 98,
    allow_upper_case: false,
    allow_hyphen: true,
    uses_logical_name_verbatim: false,
};

pub const SQL_DATABASE: NamingConstraint = NamingConstraint {
    resource_type: "cloud sql database",
    abbreviation: "db",
    max_length: 63,
    allow_upper_case: false,
    allow_hyphen: false,
    uses_logical_name_verbatim: true,
};

pub const LOAD_BALANCER: NamingConstraint = NamingConstraint {
    resource_type: "load balancer component",
    abbreviation: "lb",
    max_length: 63,
    allow_upper_case: false,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

/// Google Cloud handlers: Cloud Run for compute, Pub/Sub for messaging.
#[derive(Debug, Clone, Default)]
pub struct GcpBackend;

impl GcpBackend {
    pub fn new() -> Self {
        Self
    }

    fn cloud_run(ctx: &DispatchContext, owner: &ScopeHandle, service: &str) -> Result<String> {
        let handle = ctx.require(&owner.id, &ResourceId::service(service), "run")?;
        Ok(handle.name)
    }

    /// Let the scope's invoker account call the Cloud Run service behind `service`.
    fn grant_invoker(ctx: &mut DispatchContext, scope: &ScopeHandle, service: &str) -> Result<()> {
        let role = format!("invoker:{service}");
        if ctx.registry().get(&scope.id, &role).is_some() {
            return Ok(());
        }
        let run = Self::cloud_run(ctx, scope, service)?;
        let account = ctx.require(&scope.id, &scope.id, "invoker-account")?;
        ctx.provision(
            scope,
            &role,
            "gcp:cloudrun/iamMember",
            &format!("{}-{service}", scope.id.name),
            &IAM_MEMBER,
            json!({ "service": run, "role": "roles/run.invoker", "member": account.name }),
        )?;
        Ok(())
    }

    fn invoker_account(ctx: &mut DispatchContext, scope: &ScopeHandle, name: &str) -> Result<()> {
        if ctx.registry().get(&scope.id, "invoker-account").is_some() {
            return Ok(());
        }
        ctx.provision(
            scope,
            "invoker-account",
            "gcp:serviceaccount/account",
            &format!("{name}-inv"),
            &SERVICE_ACCOUNT,
            json!({}),
        )?;
        Ok(())
    }

    fn gateway(
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        routes: &[(String, Vec<String>, String)],
    ) -> Result<()> {
        Self::invoker_account(ctx, scope, name)?;
        let api = ctx.provision(scope, "api", "gcp:apigateway/api", name, &API_GATEWAY, json!({}))?;
        let mut paths = serde_json::Map::new();
        for (path, methods, service) in routes {
            let backend = Self::cloud_run(ctx, scope, service)?;
            paths.insert(path.clone(), json!({ "methods": methods, "backend": backend }));
            Self::grant_invoker(ctx, scope, service)?;
        }
        let config = ctx.provision(
            scope,
            "config",
            "gcp:apigateway/apiConfig",
            name,
            &API_GATEWAY,
            json!({ "api": api.name, "openapi": { "paths": paths } }),
        )?;
        ctx.provision(
            scope,
            "gateway",
            "gcp:apigateway/gateway",
            name,
            &API_GATEWAY,
            json!({ "apiConfig": config.name }),
        )?;
        Ok(())
    }
}

#[async_trait]
impl ProviderHandlers for GcpBackend {
    fn name(&self) -> &'static str {
        "gcp"
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
        let account = ctx.provision(
            scope,
            "account",
            "gcp:serviceaccount/account",
            name,
            &SERVICE_ACCOUNT,
            json!({}),
        )?;
        let run = ctx.provision(
            scope,
            "run",
            "gcp:cloudrunv2/service",
            name,
            &CLOUD_RUN,
            json!({
                "image": config.image,
                "memory": format!("{}Mi", config.memory_mb),
                "timeout": format!("{}s", config.timeout_secs),
                "serviceAccount": account.name,
                "env": config.env,
            }),
        )?;
        info!(service = name, run = %run.name, "registered cloud run service");
        Ok(())
    }

    async fn queue(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &QueueConfig,
    ) -> Result<()> {
        let topic = ctx.provision(scope, "topic", "gcp:pubsub/topic", name, &PUBSUB, json!({}))?;
        ctx.provision(
            scope,
            "subscription",
            "gcp:pubsub/subscription",
            name,
            &PUBSUB,
            json!({ "topic": topic.name, "ackDeadlineSeconds": 300 }),
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
        let topic = ctx.provision(scope, "topic", "gcp:pubsub/topic", name, &PUBSUB, json!({}))?;
        if config.subscribers.is_empty() {
            return Ok(());
        }
        Self::invoker_account(ctx, scope, name)?;
        for subscriber in &config.subscribers {
            let endpoint = Self::cloud_run(ctx, scope, subscriber)?;
            Self::grant_invoker(ctx, scope, subscriber)?;
            ctx.provision(
                scope,
                &format!("subscription:{subscriber}"),
                "gcp:pubsub/subscription",
                &format!("{name}-{subscriber}"),
                &PUBSUB,
                json!({ "topic": topic.name, "pushConfig": { "pushEndpoint": endpoint } }),
            )?;
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
        let bucket = ctx.provision(
            scope,
            "bucket",
            "gcp:storage/bucket",
            name,
            &STORAGE_BUCKET,
            json!({ "uniformBucketLevelAccess": true }),
        )?;
        if config.notifications.is_empty() {
            return Ok(());
        }
        Self::invoker_account(ctx, scope, name)?;
        for notification in &config.notifications {
            let (event_type, suffix) = match notification.event {
                BucketEvent::Write => ("OBJECT_FINALIZE", "write"),
                BucketEvent::Delete => ("OBJECT_DELETE", "delete"),
            };
            let service = notification.service.as_str();
            let endpoint = Self::cloud_run(ctx, scope, service)?;
            Self::grant_invoker(ctx, scope, service)?;
            let topic = ctx.provision(
                scope,
                &format!("notification-topic:{service}:{suffix}"),
                "gcp:pubsub/topic",
                &format!("{name}-{service}-{suffix}"),
                &PUBSUB,
                json!({}),
            )?;
            ctx.provision(
                scope,
                &format!("notification:{service}:{suffix}"),
                "gcp:storage/notification",
                &format!("{name}-{service}-{suffix}"),
                &STORAGE_BUCKET,
                json!({
                    "bucket": bucket.name,
                    "topic": topic.name,
                    "eventTypes": [event_type],
                    "objectNamePrefix": notification.prefix,
                }),
            )?;
            ctx.provision(
                scope,
                &format!("push:{service}:{suffix}"),
                "gcp:pubsub/subscription",
                &format!("{name}-{service}-{suffix}"),
                &PUBSUB,
                json!({ "topic": topic.name, "pushConfig": { "pushEndpoint": endpoint } }),
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
        let routes: Vec<_> = config
            .routes
            .iter()
            .map(|route| (route.path.clone(), route.methods.clone(), route.service.clone()))
            .collect();
        Self::gateway(ctx, scope, name, &routes)
    }

    async fn http(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &HttpConfig,
    ) -> Result<()> {
        let routes = vec![("/{proxy=**}".to_string(), Vec::new(), config.service.clone())];
        Self::gateway(ctx, scope, name, &routes)
    }

    async fn schedule(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &ScheduleConfig,
    ) -> Result<()> {
        Self::invoker_account(ctx, scope, name)?;
        let target = Self::cloud_run(ctx, scope, &config.service)?;
        Self::grant_invoker(ctx, scope, &config.service)?;
        let account = ctx.require(&scope.id, &scope.id, "invoker-account")?;
        ctx.provision(
            scope,
            "job",
            "gcp:cloudscheduler/job",
            name,
            &SCHEDULER_JOB,
            json!({
                "schedule": config.expression,
                "httpTarget": { "uri": target, "oidcServiceAccount": account.name },
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
        ctx.provision(
            scope,
            "secret",
            "gcp:secretmanager/secret",
            name,
            &SECRET,
            json!({ "replication": { "auto": {} } }),
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
        for resource in &config.resources {
            if !ctx.registry().contains(resource) {
                return Err(DeployerError::MissingDependency {
                    resource: scope.id.to_string(),
                    dependency: resource.to_string(),
                });
            }
        }
        for principal in &config.principals {
            if principal.kind != ResourceKind::Service {
                return Err(DeployerError::provider(
                    &scope.id,
                    format!("policy principal {principal} is not a service"),
                ));
            }
            let account = ctx.require(&scope.id, principal, "account")?;
            for action in &config.actions {
                ctx.provision(
                    scope,
                    &format!("member:{}:{action}", principal.name),
                    "gcp:projects/iamMember",
                    &format!("{name}-{}-{}", principal.name, action.replace([':', '.', '/'], "-")),
                    &IAM_MEMBER,
                    json!({
                        "member": account.name,
                        "role": action,
                        "resources": config
                            .resources
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>(),
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
        let database = ctx.provision_shared(
            scope,
            "firestore",
            "gcp:firestore/database",
            &FIRESTORE,
            json!({ "type": "FIRESTORE_NATIVE" }),
        )?;
        ctx.provision(
            scope,
            "collection",
            "gcp:firestore/collection",
            name,
            &COLLECTION,
            json!({ "database": database.name }),
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
        let instance = ctx.provision_shared(
            scope,
            "sql",
            "gcp:sql/databaseInstance",
            &SQL_INSTANCE,
            json!({ "databaseVersion": "POSTGRES_16", "tier": "db-f1-micro" }),
        )?;
        ctx.provision(
            scope,
            "database",
            "gcp:sql/database",
            name,
            &SQL_DATABASE,
            json!({ "instance": instance.name, "migrations": config.migrations }),
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
        let bucket = ctx.provision(
            scope,
            "bucket",
            "gcp:storage/bucket",
            name,
            &STORAGE_BUCKET,
            json!({
                "website": {
                    "mainPageSuffix": config.index_document,
                    "notFoundPage": config.error_document,
                }
            }),
        )?;
        let backend = ctx.provision(
            scope,
            "backend",
            "gcp:compute/backendBucket",
            name,
            &LOAD_BALANCER,
            json!({ "bucket": bucket.name, "enableCdn": true }),
        )?;
        ctx.provision(
            scope,
            "url-map",
            "gcp:compute/urlMap",
            name,
            &LOAD_BALANCER,
            json!({ "defaultService": backend.name, "pathPrefix": config.base_path }),
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
        // Cloud Run serves websockets directly; expose it through a serverless NEG.
        let run = Self::cloud_run(ctx, scope, &config.service)?;
        let neg = ctx.provision(
            scope,
            "neg",
            "gcp:compute/regionNetworkEndpointGroup",
            name,
            &LOAD_BALANCER,
            json!({ "networkEndpointType": "SERVERLESS", "cloudRun": { "service": run } }),
        )?;
        ctx.provision(
            scope,
            "backend",
            "gcp:compute/backendService",
            name,
            &LOAD_BALANCER,
            json!({ "backends": [neg.name], "timeoutSec": 3600 }),
        )?;
        Ok(())
    }
}
