//! Declarative policy document: parsing, validation and canonicalization.
//!
//! The illustrative YAML shape from the design is representation-agnostic
//! on the wire (`serde_yaml` is used because the sibling example pack
//! already reaches for it for this exact kind of document) but the parsed
//! result always normalizes into `reaper_core::policy` types before it is
//! handed to the evaluator.

use std::collections::BTreeMap;

use reaper_core::policy::{ContextValue, Decision, MatchPredicate, Rule, ToolNameClause};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Raw on-the-wire shape. Anything this doesn't recognize (an unknown
/// top-level key, a `cascade`/`AND` sub-structure inside a rule) is
/// rejected at `validate` time rather than silently ignored.
#[derive(Debug, Deserialize)]
pub struct PolicyDocument {
    pub version: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rules: Vec<RawRule>,
    #[serde(default = "default_action")]
    pub default_action: String,
    #[serde(default)]
    pub default_reason: String,
}

fn default_action() -> String {
    "deny".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RawRule {
    pub name: Option<String>,
    pub action: Option<String>,
    #[serde(default)]
    pub tools: Option<serde_yaml::Value>,
    #[serde(default)]
    pub conditions: Option<RawConditions>,
    pub description: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawConditions {
    pub arg_contains: Option<BTreeMap<String, String>>,
    pub arg_not_contains: Option<BTreeMap<String, String>>,
    pub session_context: Option<BTreeMap<String, serde_yaml::Value>>,
    pub metadata: Option<BTreeMap<String, serde_yaml::Value>>,
    /// Rejected at validate time — see the Open Question this resolves in
    /// DESIGN.md: the original rule language's `cascade`/`AND`
    /// sub-structures have no documented precedence against sibling
    /// clauses, so this core refuses them outright.
    pub cascade: Option<serde_yaml::Value>,
    #[serde(rename = "AND")]
    pub and: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateOutcome {
    pub ok: bool,
    pub rules_count: usize,
    pub version_label: Option<String>,
    pub errors: Vec<String>,
}

/// Parse and validate a policy source string into an ordered rule list.
/// Does not touch storage. Surfaces a fixed error catalogue: unknown
/// action keyword, missing rule name, unparseable predicate expression,
/// duplicate rule names (warning unless `strict`), empty rule set.
pub fn validate(source: &str, strict: bool) -> (ValidateOutcome, Option<(Vec<Rule>, Decision, String)>) {
    let mut errors = Vec::new();

    let doc: PolicyDocument = match serde_yaml::from_str(source) {
        Ok(d) => d,
        Err(e) => {
            errors.push(format!("unparseable policy document: {e}"));
            return (
                ValidateOutcome {
                    ok: false,
                    rules_count: 0,
                    version_label: None,
                    errors,
                },
                None,
            );
        }
    };

    let default_action = match doc.default_action.parse::<Decision>() {
        Ok(a) => a,
        Err(e) => {
            errors.push(format!("default_action: {e}"));
            Decision::Deny
        }
    };

    let mut seen_names = std::collections::HashSet::new();
    let mut rules = Vec::with_capacity(doc.rules.len());

    for (index, raw) in doc.rules.into_iter().enumerate() {
        let name = match raw.name {
            Some(n) if !n.trim().is_empty() => n,
            _ => {
                errors.push(format!("rule at index {index}: missing rule name"));
                continue;
            }
        };

        if !seen_names.insert(name.clone()) {
            let message = format!("duplicate rule name '{name}'");
            if strict {
                errors.push(message);
            } else {
                errors.push(format!("warning: {message}"));
            }
        }

        let action = match raw.action.as_deref().map(str::parse::<Decision>) {
            Some(Ok(a)) => a,
            Some(Err(e)) => {
                errors.push(format!("rule '{name}': {e}"));
                continue;
            }
            None => {
                errors.push(format!("rule '{name}': missing action"));
                continue;
            }
        };

        let predicate = match build_predicate(raw.tools, raw.conditions, &name) {
            Ok(p) => p,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };

        rules.push(Rule {
            name,
            description: raw.description,
            predicate,
            action,
            reason: raw.reason,
            index,
        });
    }

    if rules.is_empty() && errors.is_empty() {
        errors.push("policy has an empty rule set".to_string());
    }

    let hard_errors: Vec<_> = errors
        .iter()
        .filter(|e| !e.starts_with("warning:"))
        .cloned()
        .collect();

    let outcome = ValidateOutcome {
        ok: hard_errors.is_empty(),
        rules_count: rules.len(),
        version_label: doc.version.clone(),
        errors,
    };

    if outcome.ok {
        (outcome, Some((rules, default_action, doc.default_reason)))
    } else {
        (outcome, None)
    }
}

fn build_predicate(
    tools: Option<serde_yaml::Value>,
    conditions: Option<RawConditions>,
    rule_name: &str,
) -> Result<MatchPredicate, String> {
    let tool_name = match tools {
        None => None,
        Some(v) => Some(parse_tool_name_clause(v, rule_name)?),
    };

    let mut predicate = MatchPredicate {
        tool_name,
        arg_contains: None,
        arg_not_contains: None,
        session_context: None,
        metadata: None,
    };

    if let Some(cond) = conditions {
        if cond.cascade.is_some() || cond.and.is_some() {
            return Err(format!(
                "rule '{rule_name}': 'cascade'/'AND' sub-structures are not supported"
            ));
        }
        predicate.arg_contains = cond.arg_contains;
        predicate.arg_not_contains = cond.arg_not_contains;
        predicate.session_context = cond
            .session_context
            .map(|m| parse_context_map(m, rule_name))
            .transpose()?;
        predicate.metadata = cond
            .metadata
            .map(|m| parse_context_map(m, rule_name))
            .transpose()?;
    }

    Ok(predicate)
}

fn parse_tool_name_clause(v: serde_yaml::Value, rule_name: &str) -> Result<ToolNameClause, String> {
    match v {
        serde_yaml::Value::String(s) if s == "*" => Ok(ToolNameClause::Any),
        serde_yaml::Value::String(s) => {
            if looks_like_regex(&s) {
                Ok(ToolNameClause::Regex {
                    pattern: strip_regex_delimiters(&s),
                })
            } else {
                Ok(ToolNameClause::List { names: vec![s] })
            }
        }
        serde_yaml::Value::Sequence(items) => {
            let mut names = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    serde_yaml::Value::String(s) if s == "*" => return Ok(ToolNameClause::Any),
                    serde_yaml::Value::String(s) => names.push(s),
                    _ => {
                        return Err(format!(
                            "rule '{rule_name}': tools entries must be strings"
                        ))
                    }
                }
            }
            Ok(ToolNameClause::List { names })
        }
        _ => Err(format!(
            "rule '{rule_name}': unparseable tools predicate expression"
        )),
    }
}

/// Detects the regex convention this core picks for a tool-name clause: a
/// leading/trailing `/` marks a regex, matching the common "/pattern/"
/// convention rather than heuristically sniffing metacharacters.
fn looks_like_regex(s: &str) -> bool {
    s.len() > 1 && s.starts_with('/') && s.ends_with('/')
}

fn strip_regex_delimiters(s: &str) -> String {
    s.trim_start_matches('/').trim_end_matches('/').to_string()
}

fn parse_context_map(
    map: BTreeMap<String, serde_yaml::Value>,
    rule_name: &str,
) -> Result<BTreeMap<String, ContextValue>, String> {
    let mut out = BTreeMap::new();
    for (key, value) in map {
        let parsed = match value {
            serde_yaml::Value::String(s) => ContextValue::Literal(s),
            serde_yaml::Value::Number(n) => ContextValue::Literal(n.to_string()),
            serde_yaml::Value::Bool(b) => ContextValue::Literal(b.to_string()),
            serde_yaml::Value::Sequence(items) => {
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        serde_yaml::Value::String(s) => list.push(s),
                        serde_yaml::Value::Number(n) => list.push(n.to_string()),
                        _ => {
                            return Err(format!(
                                "rule '{rule_name}': unparseable predicate expression for '{key}'"
                            ))
                        }
                    }
                }
                ContextValue::List(list)
            }
            _ => {
                return Err(format!(
                    "rule '{rule_name}': unparseable predicate expression for '{key}'"
                ))
            }
        };
        out.insert(key, parsed);
    }
    Ok(out)
}

/// Canonicalize the rule list (stable map-key ordering, trimmed strings,
/// normalized booleans/numbers) and hash it with SHA-256. `BTreeMap`
/// already guarantees stable key ordering; `serde_json` renders numbers
/// and booleans canonically, so canonicalization here is just "serialize
/// through serde_json".
pub fn fingerprint(rules: &[Rule], default_action: Decision, default_reason: &str) -> String {
    #[derive(Serialize)]
    struct Canonical<'a> {
        rules: &'a [Rule],
        default_action: Decision,
        default_reason: &'a str,
    }
    let canonical = Canonical {
        rules,
        default_action,
        default_reason,
    };
    let bytes = serde_json::to_vec(&canonical).expect("rules always serialize");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

/// The canonical (already-normalized) document shape: a flat `Vec<Rule>`
/// plus the default action/reason, serialized directly through the
/// `reaper_core::policy` types rather than the user-facing `tools:` /
/// `conditions:` shorthand. Round-tripping through this shape (rather than
/// re-deriving the shorthand) is what the round-trip property test
/// exercises: parse → canonicalize → reparse → same rules.
#[derive(Serialize, Deserialize)]
pub struct CanonicalDocument {
    pub version: String,
    pub description: String,
    pub rules: Vec<Rule>,
    pub default_action: Decision,
    pub default_reason: String,
}

pub fn to_canonical_document(
    version_label: &str,
    description: &str,
    rules: &[Rule],
    default_action: Decision,
    default_reason: &str,
) -> String {
    let doc = CanonicalDocument {
        version: version_label.to_string(),
        description: description.to_string(),
        rules: rules.to_vec(),
        default_action,
        default_reason: default_reason.to_string(),
    };
    serde_yaml::to_string(&doc).expect("canonical document always serializes")
}

pub fn from_canonical_document(source: &str) -> Result<CanonicalDocument, String> {
    serde_yaml::from_str(source).map_err(|e| format!("unparseable canonical document: {e}"))
}
