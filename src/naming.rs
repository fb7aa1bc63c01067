use sha2::{Digest, Sha256};

use crate::error::{DeployerError, Result};

/// Number of hex characters of the stack digest appended to generated names.
pub const SALT_LENGTH: usize = 6;

/// Naming rules for one physical resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamingConstraint {
    /// Human-readable type name used in error messages.
    pub resource_type: &'static str,
    /// Short suffix identifying the resource type (e.g. `st`, `kv`).
    pub abbreviation: &'static str,
    pub max_length: usize,
    pub allow_upper_case: bool,
    pub allow_hyphen: bool,
    /// When false the name is derived from project and stack instead of the logical name.
    pub uses_logical_name_verbatim: bool,
}

/// Stable per-stack salt: the first [`SALT_LENGTH`] hex chars of `sha256(project/stack)`.
pub fn deployment_salt(project: &str, stack: &str) -> String {
    let digest = Sha256::digest(format!("{project}/{stack}").as_bytes());
    let mut salt = hex::encode(digest);
    salt.truncate(SALT_LENGTH);
    salt
}

/// Generates physical names for one project/stack pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameGenerator {
    project: String,
    stack: String,
    salt: String,
}

impl NameGenerator {
    pub fn new(project: impl Into<String>, stack: impl Into<String>) -> Self {
        let project = project.into();
        let stack = stack.into();
        let salt = deployment_salt(&project, &stack);
        Self {
            project,
            stack,
            salt,
        }
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// Name for `logical_name` salted with this generator's stack salt.
    pub fn physical_name(&self, logical_name: &str, rt: &NamingConstraint) -> Result<String> {
        self.generate(logical_name, rt, &self.salt)
    }

    /// Pure name synthesis; identical inputs always yield the identical name.
    pub fn generate(
        &self,
        logical_name: &str,
        rt: &NamingConstraint,
        deployment_salt: &str,
    ) -> Result<String> {
        let separator = if rt.allow_hyphen { "-" } else { "" };
        let suffix = format!(
            "{}{}",
            clean(rt.abbreviation, false),
            clean(deployment_salt, false)
        );
        let budget = rt
            .max_length
            .saturating_sub(suffix.len() + separator.len());

        let body = if rt.uses_logical_name_verbatim {
            let name = leading_alpha(&clean(logical_name, rt.allow_hyphen));
            if is_blank(&name) {
                return Err(exhausted(logical_name, rt));
            }
            truncate(&name, budget)
        } else {
            let project = leading_alpha(&clean(&self.project, rt.allow_hyphen));
            let mut stack = clean(&self.stack, rt.allow_hyphen);
            if is_blank(&project) {
                stack = leading_alpha(&stack);
            }
            if is_blank(&project) && is_blank(&stack) {
                return Err(exhausted(&format!("{}/{}", self.project, self.stack), rt));
            }
            let halves = budget.saturating_sub(separator.len());
            let project_len = halves - halves / 2;
            join_segments(
                &[truncate(&project, project_len), truncate(&stack, halves / 2)],
                separator,
            )
        };

        let mut name = join_segments(&[body, suffix], separator);
        if rt.allow_hyphen {
            name = collapse_hyphens(&name);
        }
        let mut name = name
            .trim_start_matches(|c: char| !c.is_ascii_alphabetic())
            .to_string();
        if !rt.allow_upper_case {
            name = name.to_ascii_lowercase();
        }
        let name = truncate(&name, rt.max_length)
            .trim_end_matches('-')
            .to_string();

        if name.is_empty() {
            return Err(exhausted(logical_name, rt));
        }
        Ok(name)
    }
}

fn exhausted(input: &str, rt: &NamingConstraint) -> DeployerError {
    DeployerError::NamingExhausted {
        input: input.to_string(),
        resource_type: rt.resource_type.to_string(),
    }
}

fn clean(input: &str, allow_hyphen: bool) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || (allow_hyphen && *c == '-'))
        .collect()
}

/// Names must start with a letter; a segment that is all digits reduces to nothing.
fn leading_alpha(segment: &str) -> String {
    segment
        .trim_start_matches(|c: char| !c.is_ascii_alphabetic())
        .to_string()
}

fn is_blank(segment: &str) -> bool {
    segment.trim_matches('-').is_empty()
}

fn truncate(input: &str, max: usize) -> String {
    input.chars().take(max).collect()
}

fn join_segments(segments: &[String], separator: &str) -> String {
    segments
        .iter()
        .filter(|s| !s.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(separator)
}

fn collapse_hyphens(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    out
}
