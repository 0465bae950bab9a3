//! Shared policy domain types: rules, match predicates and the
//! three-way decision every evaluation produces.
//!
//! These types are intentionally storage-agnostic — `policy-engine` owns
//! parsing, compilation and the lifecycle operations built on top of them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PolicyId = Uuid;

/// The evaluator's verdict. Ordered the way the CLI exit codes expect
/// (`allow` < `deny` < `approve` has no semantic meaning, this is just
/// declaration order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
    Approve,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
            Decision::Approve => "approve",
        }
    }

    /// CLI process exit code: 0 allow, 2 deny, 3 approve (1 is reserved for
    /// a hard error, never a decision).
    pub fn exit_code(self) -> i32 {
        match self {
            Decision::Allow => 0,
            Decision::Deny => 2,
            Decision::Approve => 3,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Ok(Decision::Allow),
            "deny" => Ok(Decision::Deny),
            "approve" => Ok(Decision::Approve),
            other => Err(format!("unknown action '{other}'")),
        }
    }
}

/// Canonical storage shape for the `tool_name` clause. A bare string or
/// `"*"` is accepted on input and normalized into this shape at Validate
/// time (see the Open Question this resolves in DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolNameClause {
    /// Wildcard `"*"` — matches any tool name.
    Any,
    /// One or more literal tool names; a single literal is stored as a
    /// one-element list.
    List { names: Vec<String> },
    /// A regular expression matched against the full tool name.
    Regex { pattern: String },
}

/// A `session_context` / `metadata` clause's expected value, as written in
/// the policy document. Evaluated against the call's actual context value
/// per the rules in `policy-engine::engine`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    List(Vec<String>),
    Literal(String),
}

/// The conjunction of clauses a rule tests. Any absent clause matches
/// unconditionally; an entirely empty predicate matches unconditionally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchPredicate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<ToolNameClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arg_contains: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arg_not_contains: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_context: Option<BTreeMap<String, ContextValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, ContextValue>>,
}

impl MatchPredicate {
    pub fn is_empty(&self) -> bool {
        self.tool_name.is_none()
            && self.arg_contains.is_none()
            && self.arg_not_contains.is_none()
            && self.session_context.is_none()
            && self.metadata.is_none()
    }
}

/// Ordered element of a policy. First match wins; `index` is a
/// deterministic tie-break (ties never actually occur since rules are
/// evaluated in order, but the index is carried through to every decision
/// for traceability).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub predicate: MatchPredicate,
    pub action: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub index: usize,
}

impl Rule {
    pub fn reason_or_default(&self) -> String {
        self.reason
            .clone()
            .unwrap_or_else(|| format!("Matched rule '{}'", self.name))
    }
}

/// Immutable, labeled rule document. Exactly one version per store is
/// `active` at any instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVersion {
    pub id: PolicyId,
    pub label: String,
    pub source: String,
    pub fingerprint: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    pub rules: Vec<Rule>,
    pub default_action: Decision,
    pub default_reason: String,
}

/// The decision produced by `Evaluate`. Carries everything a log entry
/// needs to freeze at append time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalDecision {
    pub action: Decision,
    pub rule_name: Option<String>,
    pub reason: String,
    pub policy_version_label: String,
}
