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

pub const LAMBDA: NamingConstraint = NamingConstraint {
    resource_type: "lambda function",
    abbreviation: "fn",
    max_length: 64,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const ROLE: NamingConstraint = NamingConstraint {
    resource_type: "iam role",
    abbreviation: "role",
    max_length: 64,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

const S3_BUCKET: NamingConstraint = NamingConstraint {
    resource_type: "s3 bucket",
    abbreviation: "s3",
    max_length: 63,
    allow_upper_case: false,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const SQS_QUEUE: NamingConstraint = NamingConstraint {
    resource_type: "sqs queue",
    abbreviation: "sqs",
    max_length: 80,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const SNS_TOPIC: NamingConstraint = NamingConstraint {
    resource_type: "sns topic",
    abbreviation: "sns",
    max_length: 256,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const HTTP_API: NamingConstraint = NamingConstraint {
    resource_type: "api gateway",
    abbreviation: "api",
    max_length: 128,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const SCHEDULE: NamingConstraint = NamingConstraint {
    resource_type: "eventbridge schedule",
    abbreviation: "sch",
    max_length: 64,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const SECRET: NamingConstraint = NamingConstraint {
    resource_type: "secrets manager secret",
    abbreviation: "sec",
    max_length: 512,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const IAM_POLICY: NamingConstraint = NamingConstraint {
    resource_type: "iam policy",
    abbreviation: "pol",
    max_length: 128,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const DYNAMO_TABLE: NamingConstraint = NamingConstraint {
    resource_type: "dynamodb table",
    abbreviation: "kv",
    max_length: 255,
    allow_upper_case: true,
    allow_hyphen: true,
    uses_logical_name_verbatim: true,
};

pub const RDS_DATABASE: NamingConstraint = NamingConstraint {
    resource_type: "rds database",
    abbreviation: "db",
    max_length: 63,
    allow_upper_case: false,
    allow_hyphen: false,
    uses_logical_name_verbatim: true,
};

pub const RDS_CLUSTER: NamingConstraint = NamingConstraint {
    resource_type: "rds cluster",
    abbreviation: "rds",
    max_length: 63,
    allow_upper_case: false,
    allow_hyphen: true,
    uses_logical_name_verbatim: false,
};

fn event_suffix(event: BucketEvent) -> &'static str {
    match event {
        BucketEvent::Write => "write",
        BucketEvent::Delete => "delete",
    }
}

/// AWS handlers: Lambda for compute, SNS/SQS for messaging, API Gateway v2 for ingress.
#[derive(Debug, Clone, Default)]
pub struct AwsBackend;

impl AwsBackend {
    pub fn new() -> Self {
        Self
    }

    fn function_of(ctx: &DispatchContext, owner: &ScopeHandle, service: &str) -> Result<String> {
        let handle = ctx.require(&owner.id, &ResourceId::service(service), "function")?;
        Ok(handle.name)
    }

    /// Allow `principal` to invoke the Lambda behind `service`.
    fn grant_invoke(
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        service: &str,
        principal: &str,
    ) -> Result<()> {
        let role = format!("permission:{service}");
        if ctx.registry().get(&scope.id, &role).is_some() {
            return Ok(());
        }
        let function = Self::function_of(ctx, scope, service)?;
        ctx.provision(
            scope,
            &role,
            "aws:lambda/permission",
            &format!("{}-{service}", scope.id.name),
            &ROLE,
            json!({
                "function": function,
                "principal": principal,
                "action": "lambda:InvokeFunction",
            }),
        )?;
        Ok(())
    }

    fn gateway(
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        protocol: &str,
        routes: &[(String, Vec<String>, String)],
    ) -> Result<()> {
        let api = ctx.provision(
            scope,
            "api",
            "aws:apigatewayv2/api",
            name,
            &HTTP_API,
            json!({ "protocolType": protocol }),
        )?;
        for (idx, (path, methods, service)) in routes.iter().enumerate() {
            let function = Self::function_of(ctx, scope, service)?;
            ctx.provision(
                scope,
                &format!("integration:{path}"),
                "aws:apigatewayv2/integration",
                &format!("{name}-route{idx}"),
                &HTTP_API,
                json!({ "api": api.name, "route": path, "methods": methods, "target": function }),
            )?;
            Self::grant_invoke(ctx, scope, service, "apigateway.amazonaws.com")?;
        }
        ctx.provision(
            scope,
            "stage",
            "aws:apigatewayv2/stage",
            name,
            &HTTP_API,
            json!({ "api": api.name, "autoDeploy": true }),
        )?;
        Ok(())
    }
}

#[async_trait]
impl ProviderHandlers for AwsBackend {
    fn name(&self) -> &'static str {
        "aws"
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
        let role = ctx.provision(
            scope,
            "role",
            "aws:iam/role",
            name,
            &ROLE,
            json!({ "assumeRolePolicy": "lambda.amazonaws.com" }),
        )?;
        let function = ctx.provision(
            scope,
            "function",
            "aws:lambda/function",
            name,
            &LAMBDA,
            json!({
                "imageUri": config.image,
                "memorySize": config.memory_mb,
                "timeout": config.timeout_secs,
                "role": role.name,
                "environment": config.env,
            }),
        )?;
        info!(service = name, function = %function.name, "registered lambda service");
        Ok(())
    }

    async fn queue(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &QueueConfig,
    ) -> Result<()> {
        ctx.provision(scope, "queue", "aws:sqs/queue", name, &SQS_QUEUE, json!({}))?;
        Ok(())
    }

    async fn topic(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &TopicConfig,
    ) -> Result<()> {
        let topic = ctx.provision(scope, "topic", "aws:sns/topic", name, &SNS_TOPIC, json!({}))?;
        for subscriber in &config.subscribers {
            let function = Self::function_of(ctx, scope, subscriber)?;
            ctx.provision(
                scope,
                &format!("subscription:{subscriber}"),
                "aws:sns/topicSubscription",
                &format!("{name}-{subscriber}"),
                &SNS_TOPIC,
                json!({ "topic": topic.name, "protocol": "lambda", "endpoint": function }),
            )?;
            Self::grant_invoke(ctx, scope, subscriber, "sns.amazonaws.com")?;
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
        let bucket = ctx.provision(scope, "bucket", "aws:s3/bucket", name, &S3_BUCKET, json!({}))?;
        for notification in &config.notifications {
            let function = Self::function_of(ctx, scope, &notification.service)?;
            let events = match notification.event {
                BucketEvent::Write => "s3:ObjectCreated:*",
                BucketEvent::Delete => "s3:ObjectRemoved:*",
            };
            Self::grant_invoke(ctx, scope, &notification.service, "s3.amazonaws.com")?;
            ctx.provision(
                scope,
                &format!("notification:{}:{events}", notification.service),
                "aws:s3/bucketNotification",
                &format!("{name}-{}-{}", notification.service, event_suffix(notification.event)),
                &S3_BUCKET,
                json!({
                    "bucket": bucket.name,
                    "function": function,
                    "events": [events],
                    "filterPrefix": notification.prefix,
                }),
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
        Self::gateway(ctx, scope, name, "HTTP", &routes)
    }

    async fn http(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &HttpConfig,
    ) -> Result<()> {
        let routes = vec![("$default".to_string(), Vec::new(), config.service.clone())];
        Self::gateway(ctx, scope, name, "HTTP", &routes)
    }

    async fn schedule(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &ScheduleConfig,
    ) -> Result<()> {
        let function = Self::function_of(ctx, scope, &config.service)?;
        ctx.provision(
            scope,
            "schedule",
            "aws:scheduler/schedule",
            name,
            &SCHEDULE,
            json!({ "scheduleExpression": config.expression, "target": function }),
        )?;
        Self::grant_invoke(ctx, scope, &config.service, "scheduler.amazonaws.com")
    }

    async fn secret(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        _config: &SecretConfig,
    ) -> Result<()> {
        ctx.provision(scope, "secret", "aws:secretsmanager/secret", name, &SECRET, json!({}))?;
        Ok(())
    }

    async fn policy(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &PolicyConfig,
    ) -> Result<()> {
        let mut targets = Vec::new();
        for resource in &config.resources {
            if !ctx.registry().contains(resource) {
                return Err(DeployerError::MissingDependency {
                    resource: scope.id.to_string(),
                    dependency: resource.to_string(),
                });
            }
            targets.push(resource.to_string());
        }
        let policy = ctx.provision(
            scope,
            "policy",
            "aws:iam/policy",
            name,
            &IAM_POLICY,
            json!({ "actions": config.actions, "resources": targets }),
        )?;
        for principal in &config.principals {
            if principal.kind != ResourceKind::Service {
                return Err(DeployerError::provider(
                    &scope.id,
                    format!("policy principal {principal} is not a service"),
                ));
            }
            let role = ctx.require(&scope.id, principal, "role")?;
            ctx.provision(
                scope,
                &format!("attachment:{}", principal.name),
                "aws:iam/rolePolicyAttachment",
                &format!("{name}-{}", principal.name),
                &IAM_POLICY,
                json!({ "role": role.name, "policy": policy.name }),
            )?;
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
        ctx.provision(
            scope,
            "table",
            "aws:dynamodb/table",
            name,
            &DYNAMO_TABLE,
            json!({ "billingMode": "PAY_PER_REQUEST", "hashKey": "_pk", "rangeKey": "_sk" }),
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
        let cluster = ctx.provision(
            scope,
            "cluster",
            "aws:rds/cluster",
            name,
            &RDS_CLUSTER,
            json!({ "engine": "aurora-postgresql", "engineMode": "provisioned" }),
        )?;
        let database = ctx.provision(
            scope,
            "database",
            "aws:rds/database",
            name,
            &RDS_DATABASE,
            json!({ "cluster": cluster.name }),
        )?;
        if let Some(migrations) = &config.migrations {
            ctx.provision(
                scope,
                "migrations",
                "aws:codebuild/project",
                &format!("{name}-migrate"),
                &ROLE,
                json!({ "database": database.name, "source": migrations }),
            )?;
        }
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
            "aws:s3/bucket",
            name,
            &S3_BUCKET,
            json!({
                "website": { "index": config.index_document, "error": config.error_document },
            }),
        )?;
        ctx.provision(
            scope,
            "distribution",
            "aws:cloudfront/distribution",
            name,
            &HTTP_API,
            json!({ "origin": bucket.name, "basePath": config.base_path }),
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
        let routes: Vec<_> = ["$connect", "$disconnect", "$default"]
            .into_iter()
            .map(|route| (route.to_string(), Vec::new(), config.service.clone()))
            .collect();
        Self::gateway(ctx, scope, name, "WEBSOCKET", &routes)
    }
}
