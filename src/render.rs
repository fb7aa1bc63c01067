use std::io::Write;

use serde::Serialize;
use tokio_stream::{Stream, StreamExt};

use crate::config::OutputFormat;
use crate::correlator::ResourceUpdate;
use crate::deployment::{DeployMessage, DeploymentResult};
use crate::error::Result;
use crate::order::DeploymentOrder;

/// Print every message of `stream` to `out`, returning the final result if one arrived.
///
/// A terminal `Err` on the stream is returned as-is after the updates before it were printed.
pub async fn render_stream<S, W>(
    mut stream: S,
    format: OutputFormat,
    out: &mut W,
) -> Result<Option<DeploymentResult>>
where
    S: Stream<Item = Result<DeployMessage>> + Unpin,
    W: Write,
{
    let mut result = None;
    while let Some(message) = stream.next().await {
        let message = message?;
        match format {
            OutputFormat::Text => write_text(&message, out)?,
            OutputFormat::Json => writeln!(out, "{}", message.to_json_line()?)?,
            OutputFormat::Yaml => write_yaml_document(&message, out)?,
        }
        if let DeployMessage::Result(done) = message {
            result = Some(done);
        }
    }
    out.flush()?;
    Ok(result)
}

/// Print the resolved deployment order without touching any engine.
pub fn render_plan<W: Write>(
    order: &DeploymentOrder,
    provider: &str,
    format: OutputFormat,
    out: &mut W,
) -> Result<()> {
    #[derive(Serialize)]
    struct PlanView {
        provider: String,
        order: Vec<String>,
    }

    let view = PlanView {
        provider: provider.to_string(),
        order: order.iter().map(|r| r.id().to_string()).collect(),
    };
    match format {
        OutputFormat::Text => {
            writeln!(out, "Deployment order for {provider} ({} resources):", order.len())?;
            for (idx, id) in view.order.iter().enumerate() {
                writeln!(out, "{:>3}. {id}", idx + 1)?;
            }
        }
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&view)?)?,
        OutputFormat::Yaml => write!(out, "{}", serde_yaml_bw::to_string(&view)?)?,
    }
    Ok(())
}

fn write_text<W: Write>(message: &DeployMessage, out: &mut W) -> Result<()> {
    match message {
        DeployMessage::Update(update) => writeln!(out, "{}", update_line(update))?,
        DeployMessage::Result(result) => {
            let verdict = if result.success { "succeeded" } else { "FAILED" };
            writeln!(
                out,
                "Deployment {verdict}: {} resources, {} updates ({} unresolved)",
                result.resources.len(),
                result.updates_emitted,
                result.unresolved_updates
            )?;
            for id in &result.failed {
                writeln!(out, "  failed: {id}")?;
            }
        }
    }
    Ok(())
}

fn update_line(update: &ResourceUpdate) -> String {
    let owner = update
        .logical_id
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "<unresolved>".to_string());
    let mut line = format!("{:<12} {:<8} {owner}", update.status, update.action);
    if let Some(sub) = &update.sub_resource_path {
        line.push_str(&format!(" ({sub})"));
    }
    if let Some(message) = &update.message {
        line.push_str(&format!(": {message}"));
    }
    line
}

fn write_yaml_document<W: Write>(message: &DeployMessage, out: &mut W) -> Result<()> {
    writeln!(out, "---")?;
    write!(out, "{}", serde_yaml_bw::to_string(message)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::{Action, ResourceStatus};
    use crate::deployment::ResourceOutcome;
    use crate::error::DeployerError;
    use crate::order::order;
    use crate::resource::{LogicalResource, QueueConfig, ResourceId, ResourceKind, ResourceSpec};

    fn update(sub: Option<&str>) -> DeployMessage {
        DeployMessage::Update(ResourceUpdate {
            logical_id: Some(ResourceId::service("api")),
            action: Action::Create,
            status: ResourceStatus::InProgress,
            sub_resource_path: sub.map(str::to_string),
            message: None,
        })
    }

    fn result() -> DeployMessage {
        DeployMessage::Result(DeploymentResult {
            success: true,
            resources: vec![ResourceOutcome {
                id: ResourceId::service("api"),
                action: Action::Create,
                status: ResourceStatus::Success,
            }],
            failed: Vec::new(),
            updates_emitted: 2,
            unresolved_updates: 0,
        })
    }

    #[tokio::test]
    async fn text_rendering_shows_sub_resources_and_result() {
        let stream = tokio_stream::iter(vec![Ok(update(Some("api-fn"))), Ok(result())]);
        let mut out = Vec::new();
        let done = render_stream(stream, OutputFormat::Text, &mut out)
            .await
            .unwrap()
            .expect("result present");
        assert!(done.success);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("in-progress  create   service:api (api-fn)"));
        assert!(text.contains("Deployment succeeded: 1 resources"));
    }

    #[tokio::test]
    async fn json_rendering_is_line_delimited() {
        let stream = tokio_stream::iter(vec![Ok(update(None)), Ok(result())]);
        let mut out = Vec::new();
        render_stream(stream, OutputFormat::Json, &mut out)
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            serde_json::from_str::<serde_json::Value>(line).expect("valid json line");
        }
    }

    #[tokio::test]
    async fn terminal_error_is_returned_after_prior_updates() {
        let stream = tokio_stream::iter(vec![
            Ok(update(None)),
            Err(DeployerError::provider("service:api", "boom")),
        ]);
        let mut out = Vec::new();
        let err = render_stream(stream, OutputFormat::Yaml, &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployerError::Provider { .. }));
        assert!(String::from_utf8(out).unwrap().starts_with("---\n"));
    }

    #[test]
    fn plan_lists_resources_in_order() {
        let resources = vec![
            LogicalResource::new("jobs", ResourceSpec::Queue(QueueConfig::default())),
            LogicalResource::new("audit", ResourceSpec::Queue(QueueConfig::default())),
        ];
        let order = order(resources, &[ResourceKind::Queue], "test").unwrap();
        let mut out = Vec::new();
        render_plan(&order, "test", OutputFormat::Text, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("  1. queue:jobs"));
        assert!(text.contains("  2. queue:audit"));
    }
}
