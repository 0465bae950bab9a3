//! The audit log's atomic record: one `LogEntry` per `enforce` call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::policy::Decision;

pub type SessionId = String;
pub type EntryId = Uuid;

/// Genesis value chained into the first entry of every session.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Pending,
    Success,
    Error,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Pending => "pending",
            OutcomeStatus::Success => "success",
            OutcomeStatus::Error => "error",
        }
    }
}

/// One row of the audit trail. `decision`, `rule_name`, `reason` and
/// `policy_version_label` are frozen at creation; only the outcome fields
/// transition, exactly once, from their `Pending` initial values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: EntryId,
    pub session_id: SessionId,
    pub seq_index: u64,
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub tool_args: serde_json::Value,
    pub policy_version_label: String,
    pub decision: Decision,
    pub rule_name: Option<String>,
    pub reason: String,
    pub status: OutcomeStatus,
    pub outcome: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub duration_ms: Option<u64>,
    pub prev_hash: String,
    pub own_hash: String,
    /// Tagged when the process-wide bypass-mode flag short-circuited
    /// evaluation straight to `Allow`.
    pub bypass: bool,
}

/// Fields frozen at append time, in the order they are folded into the
/// own-hash. Outcome fields are deliberately excluded: `SealOutcome` must
/// never change the hash chain.
#[derive(Serialize)]
struct SigningFields<'a> {
    id: &'a EntryId,
    session_id: &'a str,
    seq_index: u64,
    timestamp: &'a DateTime<Utc>,
    tool_name: &'a str,
    tool_args: &'a serde_json::Value,
    policy_version_label: &'a str,
    decision: Decision,
    rule_name: &'a Option<String>,
    reason: &'a str,
    bypass: bool,
    prev_hash: &'a str,
}

impl LogEntry {
    /// Canonical byte representation of the entry's frozen fields plus the
    /// previous entry's hash. Fed into the HMAC that produces `own_hash`.
    pub fn signing_payload(&self) -> Vec<u8> {
        let fields = SigningFields {
            id: &self.id,
            session_id: &self.session_id,
            seq_index: self.seq_index,
            timestamp: &self.timestamp,
            tool_name: &self.tool_name,
            tool_args: &self.tool_args,
            policy_version_label: &self.policy_version_label,
            decision: self.decision,
            rule_name: &self.rule_name,
            reason: &self.reason,
            bypass: self.bypass,
            prev_hash: &self.prev_hash,
        };
        serde_json::to_vec(&fields).expect("signing fields always serialize")
    }
}

/// Outcome payload supplied by `update_result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_duration_ms: Option<u64>,
}

/// Per-session aggregate returned by `ListSessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    pub archived: bool,
    pub total_calls: u64,
    pub allowed: u64,
    pub denied: u64,
    pub approved: u64,
    pub first_entry_at: Option<DateTime<Utc>>,
    pub last_entry_at: Option<DateTime<Utc>>,
}
