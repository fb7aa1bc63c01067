use std::collections::{BTreeSet, HashMap};
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::deployment::{DeployMessage, DeploymentResult, ResourceOutcome};
use crate::engine::{EngineEvent, EngineOp};
use crate::error::{DeployerError, Result};
use crate::identity::{ScopeIndex, parse_physical_path, relative_sub_path};
use crate::resource::ResourceId;

/// What the engine is doing to a resource, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Delete,
    Replace,
    NoOp,
}

impl From<EngineOp> for Action {
    fn from(op: EngineOp) -> Self {
        match op {
            EngineOp::Create => Action::Create,
            EngineOp::Update => Action::Update,
            EngineOp::Delete => Action::Delete,
            EngineOp::Replace | EngineOp::CreateReplacement | EngineOp::DeleteReplaced => {
                Action::Replace
            }
            EngineOp::Same | EngineOp::Read | EngineOp::Refresh => Action::NoOp,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Replace => "replace",
            Action::NoOp => "no-op",
        };
        f.pad(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Pending,
    InProgress,
    Success,
    Failed,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResourceStatus::Pending => "pending",
            ResourceStatus::InProgress => "in-progress",
            ResourceStatus::Success => "success",
            ResourceStatus::Failed => "failed",
        };
        f.pad(label)
    }
}

/// Caller-facing progress record, one per correlated engine event.
///
/// `logical_id` is `None` when no owning logical resource could be found; such updates are
/// diagnostic only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUpdate {
    pub logical_id: Option<ResourceId>,
    pub action: Action,
    pub status: ResourceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_resource_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

type NodeId = usize;

const ROOT: NodeId = 0;

#[derive(Debug, Clone)]
struct IdentityNode {
    physical_path: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    logical_id: Option<ResourceId>,
    action: Action,
    last_status: Option<ResourceStatus>,
}

/// Arena of physical paths seen during one deployment. Parent links are indices, never owners.
#[derive(Debug)]
pub struct IdentityTree {
    nodes: Vec<IdentityNode>,
    by_path: HashMap<String, NodeId>,
}

impl Default for IdentityTree {
    fn default() -> Self {
        Self {
            nodes: vec![IdentityNode {
                physical_path: String::new(),
                parent: None,
                children: Vec::new(),
                logical_id: None,
                action: Action::NoOp,
                last_status: None,
            }],
            by_path: HashMap::new(),
        }
    }
}

impl IdentityTree {
    /// Number of physical nodes, excluding the root.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }

    /// Logical owner recorded directly on the node for `path`.
    pub fn logical_id(&self, path: &str) -> Option<&ResourceId> {
        self.by_path
            .get(path)
            .and_then(|id| self.nodes[*id].logical_id.as_ref())
    }

    /// Status of the most recent update emitted for `path`.
    pub fn last_status(&self, path: &str) -> Option<ResourceStatus> {
        self.by_path
            .get(path)
            .and_then(|id| self.nodes[*id].last_status)
    }

    /// Physical path of the parent node, `None` for nodes attached to the root.
    pub fn parent_path(&self, path: &str) -> Option<&str> {
        let node = &self.nodes[*self.by_path.get(path)?];
        node.parent
            .filter(|parent| *parent != ROOT)
            .map(|parent| self.nodes[parent].physical_path.as_str())
    }

    pub fn children(&self, path: &str) -> Vec<&str> {
        self.by_path
            .get(path)
            .map(|id| {
                self.nodes[*id]
                    .children
                    .iter()
                    .map(|child| self.nodes[*child].physical_path.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn lookup(&self, path: &str) -> Option<NodeId> {
        self.by_path.get(path).copied()
    }

    fn insert(
        &mut self,
        path: &str,
        parent: Option<&str>,
        logical_id: Option<ResourceId>,
        action: Action,
    ) -> NodeId {
        let parent = parent.and_then(|p| self.lookup(p)).unwrap_or(ROOT);
        let id = self.nodes.len();
        self.nodes.push(IdentityNode {
            physical_path: path.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            logical_id,
            action,
            last_status: None,
        });
        self.nodes[parent].children.push(id);
        self.by_path.insert(path.to_string(), id);
        id
    }

    /// Owning logical id and undecorated sub-resource path for `node`.
    fn resolve(&self, node: NodeId) -> (Option<ResourceId>, Option<String>) {
        let target = &self.nodes[node];
        if let Some(id) = &target.logical_id {
            return (Some(id.clone()), None);
        }

        let mut cursor = target.parent;
        while let Some(ancestor) = cursor {
            if ancestor == ROOT {
                break;
            }
            let candidate = &self.nodes[ancestor];
            if let Some(id) = &candidate.logical_id {
                let sub = relative_sub_path(&target.physical_path, &candidate.physical_path)
                    .or_else(|| parse_physical_path(&target.physical_path).sub_resource);
                return (Some(id.clone()), sub);
            }
            cursor = candidate.parent;
        }

        let parsed = parse_physical_path(&target.physical_path);
        (parsed.scope, parsed.sub_resource)
    }
}

/// Correlates one deployment's engine events. Owned by a single task; never shared.
#[derive(Debug)]
pub struct EngineEventCorrelator {
    index: ScopeIndex,
    tree: IdentityTree,
    owners: HashMap<ResourceId, NodeId>,
    outcomes: IndexMap<ResourceId, ResourceOutcome>,
    failed: BTreeSet<ResourceId>,
    updates_emitted: usize,
    unresolved_updates: usize,
    summary: Option<bool>,
}

impl EngineEventCorrelator {
    pub fn new(index: ScopeIndex) -> Self {
        Self {
            index,
            tree: IdentityTree::default(),
            owners: HashMap::new(),
            outcomes: IndexMap::new(),
            failed: BTreeSet::new(),
            updates_emitted: 0,
            unresolved_updates: 0,
            summary: None,
        }
    }

    pub fn tree(&self) -> &IdentityTree {
        &self.tree
    }

    /// Engine's overall completion report, once it has arrived.
    pub fn summary(&self) -> Option<bool> {
        self.summary
    }

    /// Fold one event into the tree.
    ///
    /// Returns [`DeployerError::UnknownPhysicalPath`] when an `Outputs` or `Failed` event names a
    /// path that never had a `Pre` event; the tree is left untouched in that case.
    pub fn handle_event(&mut self, event: EngineEvent) -> Result<Option<ResourceUpdate>> {
        match event {
            EngineEvent::Pre { path, parent, op } => {
                Ok(Some(self.on_pre(&path, parent.as_deref(), op)))
            }
            EngineEvent::Outputs { path } => self
                .on_settled(&path, ResourceStatus::Success, None)
                .map(Some),
            EngineEvent::Failed { path, message } => self
                .on_settled(&path, ResourceStatus::Failed, Some(message))
                .map(Some),
            EngineEvent::Summary { succeeded } => {
                debug!(succeeded, "engine reported completion");
                self.summary = Some(succeeded);
                Ok(None)
            }
        }
    }

    fn on_pre(&mut self, path: &str, parent: Option<&str>, op: EngineOp) -> ResourceUpdate {
        let action = Action::from(op);
        let node = match self.tree.lookup(path) {
            Some(node) => {
                self.tree.nodes[node].action = action;
                node
            }
            None => {
                let logical_id = self.derive_logical_id(path);
                let node = self.tree.insert(path, parent, logical_id.clone(), action);
                if let Some(id) = logical_id {
                    self.claim(id, node);
                }
                node
            }
        };

        let status = if self.tree.nodes[node].logical_id.is_some() {
            ResourceStatus::Pending
        } else {
            ResourceStatus::InProgress
        };
        self.emit(node, status, None)
    }

    fn on_settled(
        &mut self,
        path: &str,
        status: ResourceStatus,
        message: Option<String>,
    ) -> Result<ResourceUpdate> {
        let node = self
            .tree
            .lookup(path)
            .ok_or_else(|| DeployerError::UnknownPhysicalPath(path.to_string()))?;
        Ok(self.emit(node, status, message))
    }

    /// Logical id a node owns directly: the dispatcher's index first, the path convention second.
    fn derive_logical_id(&self, path: &str) -> Option<ResourceId> {
        self.index.lookup(path).or_else(|| {
            let parsed = parse_physical_path(path);
            if parsed.is_scope() { parsed.scope } else { None }
        })
    }

    fn claim(&mut self, id: ResourceId, node: NodeId) {
        if let Some(previous) = self.owners.insert(id.clone(), node) {
            if previous != node {
                warn!(
                    logical_id = %id,
                    previous = %self.tree.nodes[previous].physical_path,
                    current = %self.tree.nodes[node].physical_path,
                    "two physical paths claim the same logical resource; keeping the latest"
                );
            }
        }
    }

    fn emit(
        &mut self,
        node: NodeId,
        status: ResourceStatus,
        message: Option<String>,
    ) -> ResourceUpdate {
        self.tree.nodes[node].last_status = Some(status);
        let action = self.tree.nodes[node].action;
        let (logical_id, sub_resource_path) = self.tree.resolve(node);

        self.updates_emitted += 1;
        match &logical_id {
            Some(id) => self.record_outcome(id, node, action, status),
            None => {
                self.unresolved_updates += 1;
                debug!(
                    path = %self.tree.nodes[node].physical_path,
                    "engine event has no owning logical resource"
                );
            }
        }

        ResourceUpdate {
            logical_id,
            action,
            status,
            sub_resource_path,
            message,
        }
    }

    fn record_outcome(
        &mut self,
        id: &ResourceId,
        node: NodeId,
        action: Action,
        status: ResourceStatus,
    ) {
        if status == ResourceStatus::Failed {
            self.failed.insert(id.clone());
        }
        let owns = self.owners.get(id) == Some(&node);
        let outcome = self
            .outcomes
            .entry(id.clone())
            .or_insert_with(|| ResourceOutcome {
                id: id.clone(),
                action,
                status,
            });
        if owns {
            outcome.action = action;
            outcome.status = status;
        }
        if self.failed.contains(id) {
            outcome.status = ResourceStatus::Failed;
        }
    }

    /// Aggregate of everything correlated so far.
    pub fn result(&self) -> DeploymentResult {
        DeploymentResult {
            success: self.summary == Some(true) && self.failed.is_empty(),
            resources: self.outcomes.values().cloned().collect(),
            failed: self.failed.iter().cloned().collect(),
            updates_emitted: self.updates_emitted,
            unresolved_updates: self.unresolved_updates,
        }
    }

    /// Consume `events` until the engine's summary, forwarding each update to `updates`.
    ///
    /// Invariant violations are logged and skipped. The event source closing before a summary,
    /// or the update receiver going away, is a cancellation and discards the tree.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
        updates: mpsc::Sender<Result<DeployMessage>>,
    ) -> Result<DeploymentResult> {
        while let Some(event) = events.recv().await {
            match self.handle_event(event) {
                Ok(Some(update)) => {
                    if updates.send(Ok(DeployMessage::Update(update))).await.is_err() {
                        debug!("update receiver dropped; stopping correlation");
                        return Err(DeployerError::Cancelled);
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "skipping engine event"),
            }
            if self.summary.is_some() {
                return Ok(self.result());
            }
        }
        debug!(nodes = self.tree.len(), "engine event source closed without a summary");
        Err(DeployerError::Cancelled)
    }
}
