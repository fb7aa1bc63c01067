use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Provider;
use crate::dispatch::DispatchContext;
use crate::error::Result;
use crate::identity::ScopeHandle;
use crate::resource::{
    ApiConfig, BucketConfig, HttpConfig, KeyValueStoreConfig, PolicyConfig, QueueConfig,
    ResourceKind, ScheduleConfig, SecretConfig, ServiceConfig, SqlDatabaseConfig, TopicConfig,
    WebsiteConfig, WebsocketConfig,
};

pub mod aws;
pub mod azure;
pub mod gcp;

pub use aws::AwsBackend;
pub use azure::AzureBackend;
pub use gcp::GcpBackend;

/// Cloud backend interface: one handler per logical resource kind.
///
/// Handlers are invoked one at a time in deployment order. Each one requests zero or more
/// physical resources from the engine beneath `scope` and returns once they are registered.
#[async_trait]
pub trait ProviderHandlers: Send + Sync {
    fn name(&self) -> &'static str;

    /// Kind precedence for this cloud; every deployable kind must appear.
    fn priority(&self) -> &'static [ResourceKind];

    async fn service(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &ServiceConfig,
    ) -> Result<()>;

    async fn queue(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &QueueConfig,
    ) -> Result<()>;

    async fn topic(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &TopicConfig,
    ) -> Result<()>;

    async fn bucket(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &BucketConfig,
    ) -> Result<()>;

    async fn api(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &ApiConfig,
    ) -> Result<()>;

    async fn http(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &HttpConfig,
    ) -> Result<()>;

    async fn schedule(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &ScheduleConfig,
    ) -> Result<()>;

    async fn secret(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &SecretConfig,
    ) -> Result<()>;

    async fn policy(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &PolicyConfig,
    ) -> Result<()>;

    async fn key_value_store(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &KeyValueStoreConfig,
    ) -> Result<()>;

    async fn sql_database(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &SqlDatabaseConfig,
    ) -> Result<()>;

    async fn website(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &WebsiteConfig,
    ) -> Result<()>;

    async fn websocket(
        &self,
        ctx: &mut DispatchContext,
        scope: &ScopeHandle,
        name: &str,
        config: &WebsocketConfig,
    ) -> Result<()>;
}

/// Create the handler set for the requested cloud.
pub fn create_provider(provider: Provider) -> Arc<dyn ProviderHandlers> {
    match provider {
        Provider::Aws => Arc::new(AwsBackend::new()),
        Provider::Azure => Arc::new(AzureBackend::new()),
        Provider::Gcp => Arc::new(GcpBackend::new()),
    }
}
