use std::io::{self, Write};
use std::sync::Arc;

use tracing::info;

use crate::config::{Action, DeployerConfig};
use crate::deployment::{DeploymentRequest, deploy};
use crate::engine::{EngineOp, LocalEngine};
use crate::error::{DeployerError, Result};
use crate::order::order;
use crate::providers::create_provider;
use crate::render;
use crate::resource::ResourceGraph;
use crate::telemetry;

pub async fn run(config: DeployerConfig) -> Result<()> {
    telemetry::init(&config)?;
    run_with_writer(&config, &mut io::stdout()).await
}

/// Execute `config` against the local engine, rendering to `out`.
pub async fn run_with_writer<W: Write>(config: &DeployerConfig, out: &mut W) -> Result<()> {
    let graph = {
        let span = stage_span("load", config);
        let _enter = span.enter();
        ResourceGraph::from_path(&config.graph_path)?
    };
    info!(
        resources = graph.resources.len(),
        path = %config.graph_path.display(),
        "loaded resource graph"
    );

    let provider = create_provider(config.provider);
    let op = match config.action {
        Action::Plan => {
            let span = stage_span("plan", config);
            let _enter = span.enter();
            let order = order(graph.resources, provider.priority(), provider.name())?;
            return render::render_plan(&order, provider.name(), config.output, out);
        }
        Action::Up => EngineOp::Create,
        Action::Down => EngineOp::Delete,
    };

    let (engine, events) = LocalEngine::new(op);
    let engine = Arc::new(engine.with_failures(config.fail_names.iter().cloned()));
    let request = DeploymentRequest::new(&config.project, &config.stack, graph);
    let stream = deploy(request, provider, engine, events, config.buffer);

    let result = render::render_stream(stream, config.output, out).await?;
    match result {
        Some(result) if result.success => Ok(()),
        Some(result) => {
            let failed: Vec<_> = result.failed.iter().map(ToString::to_string).collect();
            Err(DeployerError::Engine(format!(
                "{} did not complete; failed resources: {}",
                config.action.as_str(),
                if failed.is_empty() {
                    "none reported".to_string()
                } else {
                    failed.join(", ")
                }
            )))
        }
        None => Err(DeployerError::Cancelled),
    }
}

fn stage_span(stage: &str, config: &DeployerConfig) -> tracing::Span {
    tracing::info_span!(
        "stage",
        stage,
        action = config.action.as_str(),
        project = %config.project,
        stack = %config.stack,
        provider = config.provider.as_str()
    )
}
