//! Policy Store (C1) and Policy Evaluator (C2).

pub use reaper_core;

mod document;
mod engine;
mod store;

pub use document::{fingerprint, validate, CanonicalDocument, ValidateOutcome};
pub use engine::{compile, evaluate, CallContext, CompiledPolicy, PolicyEvaluator};
pub use store::{ActivateOutcome, CreateOutcome, PolicyActivated, PolicyStore};

pub use reaper_core::policy::{
    ContextValue, Decision, EvalDecision, MatchPredicate, PolicyId, PolicyVersion, Rule,
    ToolNameClause,
};
pub use reaper_core::{ReaperError, Result};
