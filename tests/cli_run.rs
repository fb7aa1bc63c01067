use std::fs;

use clap::Parser;
use cloud_deployer::apply::run_with_writer;
use cloud_deployer::config::{Action, CliArgs, DeployerConfig, OutputFormat};
use cloud_deployer::error::DeployerError;
use tempfile::tempdir;

const GRAPH: &str = r#"
resources:
  - name: uploads
    kind: bucket
    notifications:
      - { service: thumbnailer, event: write }
  - name: thumbnailer
    kind: service
    image: registry.local/thumbs:3
  - name: config
    kind: secret
"#;

fn config_for(args: &[&str]) -> DeployerConfig {
    DeployerConfig::from_env_and_args(CliArgs::parse_from(args)).expect("config builds")
}

#[tokio::test]
async fn plan_renders_yaml_order() {
    let dir = tempdir().expect("temp dir");
    let graph = dir.path().join("graph.yaml");
    fs::write(&graph, GRAPH).unwrap();
    let graph = graph.to_str().unwrap();

    let config = config_for(&[
        "cloud-deployer", "plan", "--provider", "azure", "--project", "media", "--stack", "qa",
        "--graph", graph, "--output", "yaml",
    ]);
    assert_eq!(config.action, Action::Plan);
    assert_eq!(config.output, OutputFormat::Yaml);

    let mut out = Vec::new();
    run_with_writer(&config, &mut out).await.expect("plan runs");
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("provider: azure"));
    let secret = text.find("secret:config").unwrap();
    let service = text.find("service:thumbnailer").unwrap();
    let bucket = text.find("bucket:uploads").unwrap();
    assert!(secret < service && service < bucket);
}

#[tokio::test]
async fn up_renders_text_progress() {
    let dir = tempdir().expect("temp dir");
    let graph = dir.path().join("graph.yaml");
    fs::write(&graph, GRAPH).unwrap();

    let config = config_for(&[
        "cloud-deployer", "up", "--provider", "gcp", "--project", "media", "--stack", "qa",
        "--graph", graph.to_str().unwrap(),
    ]);
    let mut out = Vec::new();
    run_with_writer(&config, &mut out).await.expect("deployment succeeds");
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("pending"));
    assert!(text.contains("bucket:uploads"));
    assert!(text.lines().any(|line| line.starts_with("Deployment succeeded")));
}

#[tokio::test]
async fn invalid_graph_fails_before_deploying() {
    let dir = tempdir().expect("temp dir");
    let graph = dir.path().join("graph.yaml");
    fs::write(&graph, "resources:\n  - name: a$b\n    kind: queue\n").unwrap();

    let config = config_for(&[
        "cloud-deployer", "up", "--provider", "aws", "--project", "media", "--stack", "qa",
        "--graph", graph.to_str().unwrap(),
    ]);
    let mut out = Vec::new();
    let err = run_with_writer(&config, &mut out).await.unwrap_err();
    assert!(matches!(err, DeployerError::Graph(_)));
    assert!(out.is_empty());
}
