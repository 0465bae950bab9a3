//! # Reaper Core
//!
//! Shared domain types, error taxonomy and configuration for the Reaper
//! policy enforcement and audit platform.
//!
//! This crate has no I/O and no concurrency primitives of its own —
//! `policy-engine`, `audit-log`, `message-queue` and `metrics` build the
//! concurrent behavior on top of these plain types.

pub mod client;
pub mod config;
pub mod entry;
pub mod error;
pub mod policy;
pub mod session;

pub use config::ReaperConfig;
pub use entry::{EntryId, GENESIS_HASH, LogEntry, Outcome, OutcomeStatus, SessionId, SessionSummary};
pub use error::{ReaperError, Result};
pub use policy::{ContextValue, Decision, EvalDecision, MatchPredicate, PolicyId, PolicyVersion, Rule, ToolNameClause};
pub use session::{Session, generate_entry_id, generate_session_id};

#[cfg(feature = "client")]
pub use client::{ClientConfig, EnforceRequest, EnforceResponse, ReaperClient, ResultRequest};

/// Current Reaper version for compatibility checks.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reaper build information for telemetry and debugging.
pub const BUILD_INFO: &str = concat!(
    "Reaper ",
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("CARGO_PKG_NAME"),
    ")"
);

/// Standard API endpoints for Reaper services.
pub mod endpoints {
    pub const HEALTH: &str = "/health";
    pub const METRICS: &str = "/metrics";
    pub const API_V1_ENFORCE: &str = "/api/v1/enforce";
    pub const API_V1_SESSIONS: &str = "/api/v1/sessions";
    pub const API_V1_POLICY: &str = "/api/v1/policy";
    pub const API_V1_COMPLIANCE: &str = "/api/v1/compliance";
    pub const WS: &str = "/ws";
}
