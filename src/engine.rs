use std::collections::HashSet;
use std::sync::Mutex;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{DeployerError, Result};
use crate::identity::{self, ScopeHandle};
use crate::resource::ResourceId;

/// Step operation reported by the engine for a physical resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineOp {
    Create,
    Update,
    Delete,
    Replace,
    CreateReplacement,
    DeleteReplaced,
    Same,
    Read,
    Refresh,
}

/// Low-level progress event, delivered in order on a single channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The engine is about to act on `path`.
    Pre {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
        op: EngineOp,
    },
    /// The step for `path` finished and its outputs are known.
    Outputs { path: String },
    /// The step for `path` failed.
    Failed { path: String, message: String },
    /// Overall completion of the engine run.
    Summary { succeeded: bool },
}

impl EngineEvent {
    pub fn path(&self) -> Option<&str> {
        match self {
            EngineEvent::Pre { path, .. }
            | EngineEvent::Outputs { path }
            | EngineEvent::Failed { path, .. } => Some(path),
            EngineEvent::Summary { .. } => None,
        }
    }
}

/// Request for one physical resource nested under `parent`.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterRequest {
    pub parent: String,
    pub type_token: String,
    pub name: String,
    pub properties: Value,
}

impl RegisterRequest {
    pub fn new(
        parent: impl Into<String>,
        type_token: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            parent: parent.into(),
            type_token: type_token.into(),
            name: name.into(),
            properties: Value::Null,
        }
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }
}

/// Engine-assigned identity of a registered physical resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhysicalHandle {
    pub path: String,
    pub type_token: String,
    pub name: String,
}

/// The external engine that actually creates, updates and deletes cloud resources.
///
/// Registration returns once the engine has accepted the request; completion is only ever
/// observed through the engine's event stream.
pub trait ProvisioningEngine: Send + Sync {
    /// Path the engine assigns to the scope of `id`. Must be stable before registration.
    fn scope_path(&self, id: &ResourceId) -> String {
        identity::scope_path(id)
    }

    fn register_scope(&self, scope: &ScopeHandle) -> Result<()>;

    fn register(&self, request: RegisterRequest) -> Result<PhysicalHandle>;

    /// Marks a scope as fully populated.
    fn complete(&self, path: &str) -> Result<()>;

    /// Reports overall completion and closes the event stream.
    fn finish(&self) -> Result<()>;

    /// Closes the event stream without a completion report.
    fn abort(&self);
}

/// In-process engine that realises every registration immediately.
///
/// Events are pushed onto an unbounded channel so registration never blocks on the consumer.
pub struct LocalEngine {
    op: EngineOp,
    sender: Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>,
    fail_names: HashSet<String>,
    failed: Mutex<bool>,
    resources: Mutex<IndexMap<String, Value>>,
}

impl LocalEngine {
    /// Engine applying `op` to every resource, plus the receiving end of its event stream.
    pub fn new(op: EngineOp) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self {
            op,
            sender: Mutex::new(Some(tx)),
            fail_names: HashSet::new(),
            failed: Mutex::new(false),
            resources: Mutex::new(IndexMap::new()),
        };
        (engine, rx)
    }

    /// Physical resources with these names report `Failed` instead of `Outputs`.
    pub fn with_failures<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fail_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Registered physical paths with their properties, in registration order.
    pub fn resources(&self) -> IndexMap<String, Value> {
        self.resources
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn emit(&self, event: EngineEvent) -> Result<()> {
        let guard = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let sender = guard
            .as_ref()
            .ok_or_else(|| DeployerError::Engine("engine event stream already closed".into()))?;
        debug!(?event, "engine event");
        sender
            .send(event)
            .map_err(|_| DeployerError::Engine("engine event consumer went away".into()))
    }

    fn record(&self, path: &str, properties: Value) {
        self.resources
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(path.to_string(), properties);
    }
}

impl ProvisioningEngine for LocalEngine {
    fn register_scope(&self, scope: &ScopeHandle) -> Result<()> {
        self.record(&scope.path, Value::Null);
        self.emit(EngineEvent::Pre {
            path: scope.path.clone(),
            parent: None,
            op: self.op,
        })
    }

    fn register(&self, request: RegisterRequest) -> Result<PhysicalHandle> {
        let path = identity::child_path(&request.parent, &request.type_token, &request.name);
        self.record(&path, request.properties);
        self.emit(EngineEvent::Pre {
            path: path.clone(),
            parent: Some(request.parent),
            op: self.op,
        })?;

        if self.fail_names.contains(&request.name) {
            *self
                .failed
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = true;
            self.emit(EngineEvent::Failed {
                path: path.clone(),
                message: format!("{} {} rejected by engine", request.type_token, request.name),
            })?;
        } else {
            self.emit(EngineEvent::Outputs { path: path.clone() })?;
        }

        Ok(PhysicalHandle {
            path,
            type_token: request.type_token,
            name: request.name,
        })
    }

    fn complete(&self, path: &str) -> Result<()> {
        self.emit(EngineEvent::Outputs {
            path: path.to_string(),
        })
    }

    fn finish(&self) -> Result<()> {
        let succeeded = !*self
            .failed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.emit(EngineEvent::Summary { succeeded })?;
        self.abort();
        Ok(())
    }

    fn abort(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::scope_path;

    fn scope() -> ScopeHandle {
        let id = ResourceId::service("api");
        ScopeHandle {
            path: scope_path(&id),
            id,
        }
    }

    #[test]
    fn emits_pre_then_outputs_for_registrations() {
        let (engine, mut rx) = LocalEngine::new(EngineOp::Create);
        let scope = scope();
        engine.register_scope(&scope).unwrap();
        let handle = engine
            .register(RegisterRequest::new(&scope.path, "aws:lambda/function", "api-fn"))
            .unwrap();
        engine.complete(&scope.path).unwrap();
        engine.finish().unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                EngineEvent::Pre {
                    path: scope.path.clone(),
                    parent: None,
                    op: EngineOp::Create
                },
                EngineEvent::Pre {
                    path: handle.path.clone(),
                    parent: Some(scope.path.clone()),
                    op: EngineOp::Create
                },
                EngineEvent::Outputs {
                    path: handle.path.clone()
                },
                EngineEvent::Outputs {
                    path: scope.path.clone()
                },
                EngineEvent::Summary { succeeded: true },
            ]
        );
        assert_eq!(engine.resources().len(), 2);
    }

    #[test]
    fn configured_failures_report_failed_and_unsuccessful_summary() {
        let (engine, mut rx) = LocalEngine::new(EngineOp::Update);
        let engine = engine.with_failures(["api-fn"]);
        let scope = scope();
        engine
            .register(RegisterRequest::new(&scope.path, "aws:lambda/function", "api-fn"))
            .unwrap();
        engine.finish().unwrap();

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(matches!(events[1], EngineEvent::Failed { .. }));
        assert_eq!(events[2], EngineEvent::Summary { succeeded: false });
    }

    #[test]
    fn registration_after_abort_errors() {
        let (engine, _rx) = LocalEngine::new(EngineOp::Create);
        engine.abort();
        let err = engine.register_scope(&scope()).unwrap_err();
        assert!(matches!(err, DeployerError::Engine(_)));
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = EngineEvent::Outputs { path: "p".into() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "outputs");
    }
}
