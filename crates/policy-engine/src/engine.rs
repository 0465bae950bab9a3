//! Policy Evaluator — a pure function from `(policy snapshot, call)` to a
//! `Decision`. Compilation (regex, literal hash sets) happens once per
//! policy version and is cached; evaluation itself touches no I/O, no
//! clock and no randomness beyond the single wall-clock sample the caller
//! already folded into `session_context` before calling in.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use reaper_core::policy::{ContextValue, Decision, EvalDecision, PolicyId, PolicyVersion, ToolNameClause};
use regex::Regex;
use serde_json::Value;
use tracing::instrument;

/// Everything the evaluator needs about a call. `session_context` already
/// contains the merged session metadata + caller overrides + the
/// wall-clock sample (`time_of_day`, `day_of_week`) the enforcement
/// service injects before calling in.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub tool_name: String,
    pub tool_args: Value,
    pub session_context: HashMap<String, Value>,
    pub metadata: HashMap<String, Value>,
}

enum CompiledToolName {
    Any,
    Set(HashSet<String>),
    Regex(Regex),
}

struct CompiledRule {
    name: String,
    reason: String,
    action: Decision,
    tool_name: Option<CompiledToolName>,
    arg_contains: Vec<(String, Vec<String>)>,
    arg_not_contains: Vec<(String, Vec<String>)>,
    session_context: Vec<(String, ContextValue)>,
    metadata: Vec<(String, ContextValue)>,
}

/// A policy version plus its precompiled rules. Built once per version and
/// cached by `PolicyEvaluator`; invalidated on Activate/Reload.
pub struct CompiledPolicy {
    pub version: Arc<PolicyVersion>,
    rules: Vec<CompiledRule>,
}

impl std::fmt::Debug for CompiledPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPolicy")
            .field("policy_id", &self.version.id)
            .field("label", &self.version.label)
            .field("rules", &self.rules.len())
            .finish()
    }
}

fn split_alternation(pattern: &str) -> Vec<String> {
    pattern.split('|').map(|s| s.to_string()).collect()
}

fn compile_rule(rule: &reaper_core::policy::Rule) -> Result<CompiledRule, String> {
    let tool_name = match &rule.predicate.tool_name {
        None => None,
        Some(ToolNameClause::Any) => Some(CompiledToolName::Any),
        Some(ToolNameClause::List { names }) => {
            Some(CompiledToolName::Set(names.iter().cloned().collect()))
        }
        Some(ToolNameClause::Regex { pattern }) => {
            let re = Regex::new(pattern)
                .map_err(|e| format!("rule '{}': invalid tool_name regex: {e}", rule.name))?;
            Some(CompiledToolName::Regex(re))
        }
    };

    let arg_contains = rule
        .predicate
        .arg_contains
        .as_ref()
        .map(|m| {
            m.iter()
                .map(|(path, pattern)| (path.clone(), split_alternation(pattern)))
                .collect()
        })
        .unwrap_or_default();

    let arg_not_contains = rule
        .predicate
        .arg_not_contains
        .as_ref()
        .map(|m| {
            m.iter()
                .map(|(path, pattern)| (path.clone(), split_alternation(pattern)))
                .collect()
        })
        .unwrap_or_default();

    let session_context = rule
        .predicate
        .session_context
        .as_ref()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    let metadata = rule
        .predicate
        .metadata
        .as_ref()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    Ok(CompiledRule {
        name: rule.name.clone(),
        reason: rule.reason_or_default(),
        action: rule.action,
        tool_name,
        arg_contains,
        arg_not_contains,
        session_context,
        metadata,
    })
}

/// Compile every rule in a policy version. Called at most once per version
/// (see `PolicyEvaluator::compiled`).
pub fn compile(version: Arc<PolicyVersion>) -> Result<CompiledPolicy, String> {
    let mut rules = Vec::with_capacity(version.rules.len());
    for rule in &version.rules {
        rules.push(compile_rule(rule)?);
    }
    Ok(CompiledPolicy { version, rules })
}

fn json_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn tool_name_matches(compiled: &CompiledToolName, tool_name: &str) -> bool {
    match compiled {
        CompiledToolName::Any => true,
        CompiledToolName::Set(set) => set.contains(tool_name),
        CompiledToolName::Regex(re) => re.is_match(tool_name),
    }
}

fn arg_contains_matches(tool_args: &Value, path: &str, branches: &[String]) -> bool {
    match resolve_path(tool_args, path) {
        Some(value) => {
            let rendered = json_to_string(value);
            branches.iter().any(|b| rendered.contains(b.as_str()))
        }
        None => false,
    }
}

/// `">N"` / `"<N"` numeric-comparison token.
fn parse_numeric_comparison(token: &str) -> Option<(char, f64)> {
    let op = token.chars().next()?;
    if op != '<' && op != '>' {
        return None;
    }
    let number: f64 = token[1..].trim().parse().ok()?;
    Some((op, number))
}

fn is_time_range_token(token: &str) -> bool {
    let re = Regex::new(r"^\d{2}:\d{2}-\d{2}:\d{2}$").expect("static regex");
    re.is_match(token)
}

/// Minutes since midnight for an `"HH:MM"` string.
fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    Some(h * 60 + m)
}

fn time_in_range(now_hhmm: &str, range: &str) -> bool {
    let Some((start, end)) = range.split_once('-') else {
        return false;
    };
    let (Some(now), Some(start), Some(end)) =
        (parse_hhmm(now_hhmm), parse_hhmm(start), parse_hhmm(end))
    else {
        return false;
    };
    if start <= end {
        now >= start && now <= end
    } else {
        // Range wraps past midnight, e.g. "22:00-02:00".
        now >= start || now <= end
    }
}

fn context_value_matches(expected: &ContextValue, actual: Option<&Value>) -> bool {
    let Some(actual) = actual else {
        // "Missing context keys never match."
        return false;
    };
    let rendered = json_to_string(actual);

    match expected {
        ContextValue::List(options) => options.iter().any(|o| o == &rendered),
        ContextValue::Literal(token) => {
            if let Some((op, bound)) = parse_numeric_comparison(token) {
                let Ok(actual_num) = rendered.parse::<f64>() else {
                    return false;
                };
                return if op == '>' {
                    actual_num > bound
                } else {
                    actual_num < bound
                };
            }
            if is_time_range_token(token) {
                return time_in_range(&rendered, token);
            }
            rendered == *token
        }
    }
}

fn rule_matches(rule: &CompiledRule, call: &CallContext) -> bool {
    if let Some(tool_name) = &rule.tool_name {
        if !tool_name_matches(tool_name, &call.tool_name) {
            return false;
        }
    }

    for (path, branches) in &rule.arg_contains {
        if !arg_contains_matches(&call.tool_args, path, branches) {
            return false;
        }
    }

    for (path, branches) in &rule.arg_not_contains {
        if arg_contains_matches(&call.tool_args, path, branches) {
            return false;
        }
    }

    for (key, expected) in &rule.session_context {
        if !context_value_matches(expected, call.session_context.get(key)) {
            return false;
        }
    }

    for (key, expected) in &rule.metadata {
        if !context_value_matches(expected, call.metadata.get(key)) {
            return false;
        }
    }

    true
}

/// `Evaluate(policy_snapshot, call) -> Decision`. Deterministic: two calls
/// with identical inputs produce byte-identical decisions.
#[instrument(skip(compiled, call), fields(tool_name = %call.tool_name, policy_version = %compiled.version.label))]
pub fn evaluate(compiled: &CompiledPolicy, call: &CallContext) -> EvalDecision {
    for rule in &compiled.rules {
        if rule_matches(rule, call) {
            return EvalDecision {
                action: rule.action,
                rule_name: Some(rule.name.clone()),
                reason: rule.reason.clone(),
                policy_version_label: compiled.version.label.clone(),
            };
        }
    }

    EvalDecision {
        action: compiled.version.default_action,
        rule_name: None,
        reason: if compiled.version.default_reason.is_empty() {
            format!(
                "No rule matched; default action {}",
                compiled.version.default_action
            )
        } else {
            compiled.version.default_reason.clone()
        },
        policy_version_label: compiled.version.label.clone(),
    }
}

/// Evaluator-side compiled-rules cache, keyed by policy id. Owned by
/// `PolicyEvaluator`, which sits alongside `PolicyStore` in the service.
#[derive(Default)]
pub struct PolicyEvaluator {
    cache: DashMap<PolicyId, Arc<CompiledPolicy>>,
}

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Compile-once-per-version lookup. `dashmap`'s per-shard locking
    /// gives us the "under a per-version lock" behavior the design calls
    /// for without a dedicated lock table.
    pub fn compiled(&self, version: Arc<PolicyVersion>) -> Result<Arc<CompiledPolicy>, String> {
        if let Some(existing) = self.cache.get(&version.id) {
            return Ok(existing.clone());
        }
        let compiled = Arc::new(compile(version.clone())?);
        self.cache.insert(version.id, compiled.clone());
        Ok(compiled)
    }

    /// Invalidate a cached compilation — called on Reload for the policy id
    /// being replaced (cache is additive otherwise: historical versions
    /// stay compiled so in-flight evaluations that snapshotted an older
    /// version keep working). Activate never needs this: the rule set
    /// behind a version id is immutable, only the `active` flag moves.
    pub fn invalidate(&self, policy_id: &PolicyId) {
        self.cache.remove(policy_id);
    }

    pub fn evaluate(&self, compiled: &CompiledPolicy, call: &CallContext) -> EvalDecision {
        evaluate(compiled, call)
    }
}
