use std::collections::HashMap;

use tracing::debug;

use crate::error::{DeployerError, Result};
use crate::resource::{LogicalResource, ResourceKind};

/// Resources in the order they must be handed to the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentOrder {
    resources: Vec<LogicalResource>,
}

impl DeploymentOrder {
    pub fn resources(&self) -> &[LogicalResource] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogicalResource> {
        self.resources.iter()
    }

    pub fn into_inner(self) -> Vec<LogicalResource> {
        self.resources
    }
}

/// Order `resources` by `priority`, keeping insertion order within a kind.
/// Assumes the kind-level dependency relation is acyclic.
///
/// Fails with [`DeployerError::UnorderedKind`] before producing anything when a resource's kind
/// has no entry in the table. Repeated table entries are ignored after their first occurrence.
pub fn order(
    resources: Vec<LogicalResource>,
    priority: &[ResourceKind],
    provider: &str,
) -> Result<DeploymentOrder> {
    let mut slots: HashMap<ResourceKind, usize> = HashMap::new();
    for kind in priority {
        let next = slots.len();
        slots.entry(*kind).or_insert(next);
    }
    if let Some(missing) = resources.iter().find(|r| !slots.contains_key(&r.kind())) {
        return Err(DeployerError::UnorderedKind {
            kind: missing.kind(),
            provider: provider.to_string(),
        });
    }

    let mut buckets: Vec<Vec<LogicalResource>> = vec![Vec::new(); slots.len()];
    for resource in resources {
        buckets[slots[&resource.kind()]].push(resource);
    }

    let resources: Vec<LogicalResource> = buckets.into_iter().flatten().collect();
    debug!(
        provider,
        count = resources.len(),
        "ordered resources for deployment"
    );
    Ok(DeploymentOrder { resources })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{PolicyConfig, QueueConfig, ResourceSpec, ServiceConfig, TopicConfig};

    fn service(name: &str) -> LogicalResource {
        LogicalResource::new(name, ResourceSpec::Service(ServiceConfig::new("img")))
    }

    fn topic(name: &str) -> LogicalResource {
        LogicalResource::new(name, ResourceSpec::Topic(TopicConfig::default()))
    }

    fn policy(name: &str) -> LogicalResource {
        LogicalResource::new(name, ResourceSpec::Policy(PolicyConfig::default()))
    }

    fn names(order: &DeploymentOrder) -> Vec<String> {
        order.iter().map(|r| r.id().to_string()).collect()
    }

    #[test]
    fn orders_by_kind_priority() {
        let order = order(
            vec![policy("p1"), service("s1"), topic("t1")],
            &[ResourceKind::Service, ResourceKind::Topic, ResourceKind::Policy],
            "test",
        )
        .expect("ordered");
        assert_eq!(names(&order), vec!["service:s1", "topic:t1", "policy:p1"]);
    }

    #[test]
    fn keeps_insertion_order_within_kind() {
        let order = order(
            vec![topic("b"), service("z"), topic("a"), service("y"), topic("c")],
            &[ResourceKind::Service, ResourceKind::Topic],
            "test",
        )
        .expect("ordered");
        assert_eq!(
            names(&order),
            vec!["service:z", "service:y", "topic:b", "topic:a", "topic:c"]
        );
    }

    #[test]
    fn fails_fast_on_missing_kind() {
        let err = order(
            vec![
                service("s1"),
                LogicalResource::new("q", ResourceSpec::Queue(QueueConfig::default())),
            ],
            &[ResourceKind::Service],
            "aws",
        )
        .unwrap_err();
        match err {
            DeployerError::UnorderedKind { kind, provider } => {
                assert_eq!(kind, ResourceKind::Queue);
                assert_eq!(provider, "aws");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn duplicate_priority_entries_do_not_duplicate_resources() {
        let order = order(
            vec![service("s1"), topic("t1")],
            &[
                ResourceKind::Service,
                ResourceKind::Topic,
                ResourceKind::Service,
            ],
            "test",
        )
        .expect("ordered");
        assert_eq!(names(&order), vec!["service:s1", "topic:t1"]);
    }

    #[test]
    fn output_is_a_permutation_grouped_by_kind() {
        let priority = ResourceKind::ALL;
        let input = vec![
            policy("p"),
            topic("t2"),
            service("s"),
            topic("t1"),
            policy("q"),
        ];
        let order = order(input.clone(), &priority, "test").expect("ordered");
        assert_eq!(order.len(), input.len());
        for resource in &input {
            assert!(order.iter().any(|r| r == resource));
        }
        let ranks: Vec<usize> = order
            .iter()
            .map(|r| priority.iter().position(|k| *k == r.kind()).unwrap())
            .collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn empty_input_orders_to_empty() {
        let order = order(Vec::new(), &[], "test").expect("ordered");
        assert!(order.is_empty());
    }
}
