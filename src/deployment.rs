use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, info, info_span, warn};

use crate::correlator::{Action, EngineEventCorrelator, ResourceStatus, ResourceUpdate};
use crate::dispatch::{DispatchContext, dispatch};
use crate::engine::{EngineEvent, ProvisioningEngine};
use crate::error::{DeployerError, Result};
use crate::identity::ScopeIndex;
use crate::naming::NameGenerator;
use crate::order::order;
use crate::providers::ProviderHandlers;
use crate::resource::{ResourceGraph, ResourceId};

/// Capacity of the outbound message channel when the caller has no preference.
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Final state of one logical resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOutcome {
    pub id: ResourceId,
    pub action: Action,
    pub status: ResourceStatus,
}

/// Aggregate sent once dispatch has returned and the engine has reported completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub success: bool,
    pub resources: Vec<ResourceOutcome>,
    pub failed: Vec<ResourceId>,
    pub updates_emitted: usize,
    pub unresolved_updates: usize,
}

/// One message on the outbound deployment stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeployMessage {
    Update(ResourceUpdate),
    Result(DeploymentResult),
}

impl DeployMessage {
    /// Single-line JSON encoding, as written to line-delimited transports.
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// What the caller asked to deploy.
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub project: String,
    pub stack: String,
    pub graph: ResourceGraph,
}

impl DeploymentRequest {
    pub fn new(project: impl Into<String>, stack: impl Into<String>, graph: ResourceGraph) -> Self {
        Self {
            project: project.into(),
            stack: stack.into(),
            graph,
        }
    }
}

/// Start a deployment and return its message stream.
///
/// `events` must be the event source of `engine`. Updates arrive as the engine reports them; the
/// stream ends with either a single [`DeployMessage::Result`] or a single `Err` carrying the
/// failure unchanged. Must be called from within a tokio runtime.
pub fn deploy(
    request: DeploymentRequest,
    provider: Arc<dyn ProviderHandlers>,
    engine: Arc<dyn ProvisioningEngine>,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    buffer: usize,
) -> ReceiverStream<Result<DeployMessage>> {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let span = info_span!(
        "deployment",
        project = %request.project,
        stack = %request.stack,
        provider = provider.name()
    );
    tokio::spawn(
        async move {
            if let Err(err) = run_deployment(request, provider, engine, events, &tx).await {
                warn!(error = %err, "deployment failed");
                // The caller may already have dropped the stream.
                let _ = tx.send(Err(err)).await;
            }
        }
        .instrument(span),
    );
    ReceiverStream::new(rx)
}

async fn run_deployment(
    request: DeploymentRequest,
    provider: Arc<dyn ProviderHandlers>,
    engine: Arc<dyn ProvisioningEngine>,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    tx: &mpsc::Sender<Result<DeployMessage>>,
) -> Result<()> {
    let DeploymentRequest {
        project,
        stack,
        graph,
    } = request;
    graph.validate()?;
    let order = order(graph.resources, provider.priority(), provider.name())?;
    info!(resources = order.len(), "deployment order resolved");

    let index = ScopeIndex::new();
    let correlation = tokio::spawn(
        EngineEventCorrelator::new(index.clone())
            .run(events, tx.clone())
            .instrument(info_span!("correlate")),
    );

    let mut ctx = DispatchContext::new(engine.clone(), NameGenerator::new(project, stack), index);
    if let Err(err) = dispatch(&order, provider.as_ref(), &mut ctx).await {
        engine.abort();
        // Closing the source makes the correlator stop; its outcome is superseded by `err`.
        let _ = correlation.await;
        return Err(err);
    }
    info!(registered = ctx.registry().len(), "dispatch complete");

    if let Err(err) = engine.finish() {
        engine.abort();
        let _ = correlation.await;
        return Err(err);
    }

    let result = correlation
        .await
        .map_err(|err| DeployerError::Other(format!("correlator task failed: {err}")))??;
    info!(
        success = result.success,
        failed = result.failed.len(),
        updates = result.updates_emitted,
        "deployment finished"
    );
    tx.send(Ok(DeployMessage::Result(result)))
        .await
        .map_err(|_| DeployerError::Cancelled)
}
