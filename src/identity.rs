use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::resource::{ResourceId, ResourceKind};

pub const SCOPE_PREFIX: &str = "deployer:";
pub const SEGMENT_DELIMITER: char = '$';
pub const NAME_DELIMITER: &str = "::";

/// Type token of the scope that owns a logical resource's physical children.
pub fn scope_type_token(kind: ResourceKind) -> String {
    format!("{SCOPE_PREFIX}{kind}")
}

/// Conventional physical path of the scope for `id`.
pub fn scope_path(id: &ResourceId) -> String {
    format!("{}{NAME_DELIMITER}{}", scope_type_token(id.kind), id.name)
}

/// Conventional physical path of a resource nested beneath `parent`.
pub fn child_path(parent: &str, type_token: &str, name: &str) -> String {
    format!("{parent}{SEGMENT_DELIMITER}{type_token}{NAME_DELIMITER}{name}")
}

/// Handle to the logical scope a provider handler nests its physical resources under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeHandle {
    pub id: ResourceId,
    pub path: String,
}

/// Physical path → logical id mapping written by the dispatcher and read by the correlator.
///
/// The lock guards only this map; dispatch itself never holds it across a handler call.
#[derive(Debug, Clone, Default)]
pub struct ScopeIndex {
    inner: Arc<RwLock<HashMap<String, ResourceId>>>,
}

impl ScopeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, id: ResourceId) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.insert(path.into(), id);
    }

    pub fn lookup(&self, path: &str) -> Option<ResourceId> {
        let guard = self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of pattern-matching an opaque engine path against the scope convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    /// Logical scope the path is, or is nested beneath.
    pub scope: Option<ResourceId>,
    /// Undecorated remainder below the scope; `None` when the path is the scope itself.
    pub sub_resource: Option<String>,
}

impl ParsedPath {
    pub fn is_scope(&self) -> bool {
        self.scope.is_some() && self.sub_resource.is_none()
    }
}

/// Parse an engine path. Paths that do not follow the convention yield `scope: None` with the
/// whole path, undecorated, as the sub-resource.
pub fn parse_physical_path(path: &str) -> ParsedPath {
    let (head, tail) = match path.split_once(SEGMENT_DELIMITER) {
        Some((head, tail)) => (head, Some(tail)),
        None => (path, None),
    };

    match parse_scope_segment(head) {
        Some(scope) => ParsedPath {
            scope: Some(scope),
            sub_resource: tail.map(undecorate).filter(|s| !s.is_empty()),
        },
        None => ParsedPath {
            scope: None,
            sub_resource: Some(undecorate(path)).filter(|s| !s.is_empty()),
        },
    }
}

/// Strip `<type token>::` decoration from each `$`-delimited segment.
pub fn undecorate(suffix: &str) -> String {
    suffix
        .split(SEGMENT_DELIMITER)
        .map(|segment| {
            segment
                .rsplit_once(NAME_DELIMITER)
                .map(|(_, name)| name)
                .unwrap_or(segment)
        })
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("$")
}

/// Path of `path` relative to an ancestor `prefix`, undecorated.
pub fn relative_sub_path(path: &str, prefix: &str) -> Option<String> {
    path.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(SEGMENT_DELIMITER))
        .map(undecorate)
        .filter(|s| !s.is_empty())
}

fn parse_scope_segment(segment: &str) -> Option<ResourceId> {
    let rest = segment.strip_prefix(SCOPE_PREFIX)?;
    let (kind, name) = rest.split_once(NAME_DELIMITER)?;
    let kind = ResourceKind::from_token(kind)?;
    if name.is_empty() {
        return None;
    }
    Some(ResourceId::new(kind, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_paths_parse_back_to_their_id() {
        for kind in ResourceKind::ALL {
            let id = ResourceId::new(kind, "orders");
            let parsed = parse_physical_path(&scope_path(&id));
            assert_eq!(parsed.scope.as_ref(), Some(&id));
            assert!(parsed.is_scope());
        }
    }

    #[test]
    fn nested_paths_resolve_to_owning_scope() {
        let scope = scope_path(&ResourceId::service("api"));
        let role = child_path(&scope, "aws:iam/role", "api-role");
        let attachment = child_path(&role, "aws:iam/rolePolicyAttachment", "basic");

        let parsed = parse_physical_path(&attachment);
        assert_eq!(parsed.scope, Some(ResourceId::service("api")));
        assert_eq!(parsed.sub_resource.as_deref(), Some("api-role$basic"));
    }

    #[test]
    fn bare_suffix_is_kept_verbatim() {
        let scope = scope_path(&ResourceId::service("api"));
        let parsed = parse_physical_path(&format!("{scope}$sub"));
        assert_eq!(parsed.sub_resource.as_deref(), Some("sub"));
        assert_eq!(
            relative_sub_path(&format!("{scope}$sub"), &scope).as_deref(),
            Some("sub")
        );
    }

    #[test]
    fn foreign_paths_have_no_scope() {
        let parsed = parse_physical_path("aws:s3/bucket::logs");
        assert_eq!(parsed.scope, None);
        assert_eq!(parsed.sub_resource.as_deref(), Some("logs"));

        let parsed = parse_physical_path("deployer:lambda::x");
        assert_eq!(parsed.scope, None);
    }

    #[test]
    fn relative_path_requires_delimiter_boundary() {
        assert_eq!(
            relative_sub_path("deployer:service::apiv2", "deployer:service::api"),
            None
        );
    }

    #[test]
    fn index_is_shared_between_clones() {
        let index = ScopeIndex::new();
        let reader = index.clone();
        index.insert("p", ResourceId::service("s"));
        assert_eq!(reader.lookup("p"), Some(ResourceId::service("s")));
        assert_eq!(reader.len(), 1);
    }
}
