//! Audit Log (C3): `Append`, `SealOutcome`, `GetSession`, `ListSessions`,
//! `Verify`, `Export`, plus the supplemented `GetEntry` point lookup and
//! the `{page, page_size, total}` pagination cursor shared by the two
//! listing operations.
//!
//! Concurrency: one append lock per session (`DashMap<SessionId,
//! tokio::sync::Mutex<()>>`), acquired for the duration of "read previous
//! hash, compute next index, compute own-hash, insert row". Reads never
//! take this lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reaper_core::entry::{EntryId, LogEntry, Outcome, OutcomeStatus, SessionId, SessionSummary};
use reaper_core::policy::{Decision, EvalDecision};
use reaper_core::session::{generate_entry_id, Session};
use reaper_core::{ReaperError, Result};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{instrument, warn};

use crate::chain;

/// A single contiguous range violation or hash mismatch surfaced by
/// `verify`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Violation {
    pub session_id: SessionId,
    pub entry_id: EntryId,
    pub seq_index: u64,
    pub kind: ViolationKind,
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    HashMismatch,
    IndexGap,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct VerifyReport {
    pub entries_checked: u64,
    pub violations: Vec<Violation>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u64,
    pub page_size: u64,
    pub total: u64,
}

#[derive(Debug, Default, Clone)]
pub struct SessionFilters {
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    pub include_archived: bool,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Fields an `enforce` call passes to `append`; the decision has already
/// been made by the time the audit log sees the call.
pub struct AppendFields {
    pub tool_name: String,
    pub tool_args: serde_json::Value,
    pub decision: EvalDecision,
    pub bypass: bool,
}

pub enum ExportFormat {
    Json,
    Csv,
}

pub struct AuditLog {
    hmac_secret: Vec<u8>,
    sessions: DashMap<SessionId, Session>,
    entries: DashMap<SessionId, Vec<LogEntry>>,
    entries_by_id: DashMap<EntryId, (SessionId, usize)>,
    append_locks: DashMap<SessionId, Arc<AsyncMutex<()>>>,
}

impl AuditLog {
    pub fn new(hmac_secret: Vec<u8>) -> Self {
        Self {
            hmac_secret,
            sessions: DashMap::new(),
            entries: DashMap::new(),
            entries_by_id: DashMap::new(),
            append_locks: DashMap::new(),
        }
    }

    fn append_lock(&self, session_id: &SessionId) -> Arc<AsyncMutex<()>> {
        self.append_locks
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Creates the session row if it does not already exist. Called by the
    /// enforcement service's session-resolution step, ahead of `append`.
    pub fn ensure_session(
        &self,
        session_id: &SessionId,
        agent_id: Option<String>,
        user_id: Option<String>,
        metadata: serde_json::Value,
    ) {
        self.sessions
            .entry(session_id.clone())
            .and_modify(|s| s.touch())
            .or_insert_with(|| Session::new(session_id.clone(), agent_id, user_id, metadata));
    }

    pub fn get_session_row(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Append(session_id, entry_fields) -> entry_id.
    #[instrument(skip(self, fields), fields(session_id = %session_id, tool_name = %fields.tool_name))]
    pub async fn append(&self, session_id: &SessionId, fields: AppendFields) -> Result<EntryId> {
        if !self.sessions.contains_key(session_id) {
            return Err(ReaperError::not_found(format!(
                "session '{session_id}' does not exist"
            )));
        }

        let lock = self.append_lock(session_id);
        let _guard = lock.lock().await;

        let mut rows = self.entries.entry(session_id.clone()).or_default();
        let (prev_hash, seq_index) = match rows.last() {
            Some(last) => (last.own_hash.clone(), last.seq_index + 1),
            None => (reaper_core::GENESIS_HASH.to_string(), 1),
        };

        let id = generate_entry_id();
        let mut entry = LogEntry {
            id,
            session_id: session_id.clone(),
            seq_index,
            timestamp: Utc::now(),
            tool_name: fields.tool_name,
            tool_args: fields.tool_args,
            policy_version_label: fields.decision.policy_version_label,
            decision: fields.decision.action,
            rule_name: fields.decision.rule_name,
            reason: fields.decision.reason,
            status: OutcomeStatus::Pending,
            outcome: None,
            error_message: None,
            duration_ms: None,
            prev_hash,
            own_hash: String::new(),
            bypass: fields.bypass,
        };
        entry.own_hash = chain::compute_own_hash(&self.hmac_secret, &entry);

        rows.push(entry);
        let index_in_vec = rows.len() - 1;
        self.entries_by_id
            .insert(id, (session_id.clone(), index_in_vec));

        drop(rows);
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.touch();
        }

        Ok(id)
    }

    /// SealOutcome(entry_id, outcome) -> ok. Rejects a second call against
    /// an already-sealed entry with CONFLICT; the hash chain is untouched.
    #[instrument(skip(self, outcome))]
    pub async fn seal_outcome(&self, entry_id: &EntryId, outcome: Outcome) -> Result<()> {
        let (session_id, index) = self
            .entries_by_id
            .get(entry_id)
            .map(|e| e.clone())
            .ok_or_else(|| ReaperError::not_found(format!("log entry '{entry_id}' not found")))?;

        let lock = self.append_lock(&session_id);
        let _guard = lock.lock().await;

        let mut rows = self
            .entries
            .get_mut(&session_id)
            .ok_or_else(|| ReaperError::server("session rows missing for known entry"))?;
        let row = rows
            .get_mut(index)
            .ok_or_else(|| ReaperError::server("entry index out of bounds"))?;

        if row.status != OutcomeStatus::Pending {
            return Err(ReaperError::conflict(format!(
                "entry '{entry_id}' is already sealed"
            )));
        }

        row.status = outcome.status;
        row.outcome = outcome.result;
        row.error_message = outcome.error_message;
        row.duration_ms = outcome.execution_duration_ms;

        Ok(())
    }

    pub fn get_entry(&self, entry_id: &EntryId) -> Option<LogEntry> {
        let (session_id, index) = self.entries_by_id.get(entry_id)?.clone();
        self.entries.get(&session_id)?.get(index).cloned()
    }

    /// GetSession(session_id) -> paginated, index-ascending entries.
    pub fn get_session(&self, session_id: &SessionId, page: u64, page_size: u64) -> Result<Page<LogEntry>> {
        if !self.sessions.contains_key(session_id) {
            return Err(ReaperError::not_found(format!(
                "session '{session_id}' does not exist"
            )));
        }
        let rows = self
            .entries
            .get(session_id)
            .map(|r| r.clone())
            .unwrap_or_default();
        Ok(paginate(rows, page, page_size))
    }

    /// ListSessions(filters, page) -> summaries.
    pub fn list_sessions(&self, filters: &SessionFilters, page: u64, page_size: u64) -> Page<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .iter()
            .filter(|entry| {
                let session = entry.value();
                if !filters.include_archived && session.archived {
                    return false;
                }
                if let Some(agent_id) = &filters.agent_id {
                    if session.agent_id.as_deref() != Some(agent_id.as_str()) {
                        return false;
                    }
                }
                if let Some(user_id) = &filters.user_id {
                    if session.user_id.as_deref() != Some(user_id.as_str()) {
                        return false;
                    }
                }
                if let Some(since) = filters.since {
                    if session.last_seen_at < since {
                        return false;
                    }
                }
                if let Some(until) = filters.until {
                    if session.created_at > until {
                        return false;
                    }
                }
                true
            })
            .map(|entry| self.summarize(entry.value()))
            .collect();

        summaries.sort_by(|a, b| b.last_entry_at.cmp(&a.last_entry_at));
        paginate(summaries, page, page_size)
    }

    /// Single-session summary, used by `GET /sessions/{id}/summary`.
    pub fn session_summary(&self, session_id: &SessionId) -> Result<SessionSummary> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| ReaperError::not_found(format!("session '{session_id}' does not exist")))?;
        Ok(self.summarize(&session))
    }

    fn summarize(&self, session: &Session) -> SessionSummary {
        let rows = self.entries.get(&session.id);
        let (mut allowed, mut denied, mut approved) = (0u64, 0u64, 0u64);
        let (mut first, mut last) = (None, None);
        let mut total = 0u64;

        if let Some(rows) = rows {
            for row in rows.iter() {
                total += 1;
                match row.decision {
                    Decision::Allow => allowed += 1,
                    Decision::Deny => denied += 1,
                    Decision::Approve => approved += 1,
                }
                first = first.or(Some(row.timestamp));
                last = Some(row.timestamp);
            }
        }

        SessionSummary {
            session_id: session.id.clone(),
            agent_id: session.agent_id.clone(),
            user_id: session.user_id.clone(),
            archived: session.archived,
            total_calls: total,
            allowed,
            denied,
            approved,
            first_entry_at: first,
            last_entry_at: last,
        }
    }

    /// Verify(range) -> {entries_checked, violations[]}. Pure read:
    /// recomputes every entry's own-hash in isolation and flags both hash
    /// mismatches and index gaps.
    pub fn verify(&self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> VerifyReport {
        let mut checked = 0u64;
        let mut violations = Vec::new();

        for entry in self.entries.iter() {
            let session_id = entry.key().clone();
            let mut expected_index = 1u64;
            for row in entry.value().iter() {
                if let Some(since) = since {
                    if row.timestamp < since {
                        continue;
                    }
                }
                if let Some(until) = until {
                    if row.timestamp > until {
                        continue;
                    }
                }
                checked += 1;

                if row.seq_index != expected_index {
                    violations.push(Violation {
                        session_id: session_id.clone(),
                        entry_id: row.id,
                        seq_index: row.seq_index,
                        kind: ViolationKind::IndexGap,
                    });
                }
                expected_index = row.seq_index + 1;

                if !chain::hash_matches(&self.hmac_secret, row) {
                    warn!(session_id = %session_id, entry_id = %row.id, "audit entry hash mismatch");
                    violations.push(Violation {
                        session_id: session_id.clone(),
                        entry_id: row.id,
                        seq_index: row.seq_index,
                        kind: ViolationKind::HashMismatch,
                    });
                }
            }
        }

        VerifyReport {
            entries_checked: checked,
            violations,
        }
    }

    /// Export(filter, format) — session_id ascending, then index ascending.
    pub fn export(&self, filters: &SessionFilters, format: ExportFormat) -> Result<String> {
        let mut session_ids: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| {
                let session = entry.value();
                if !filters.include_archived && session.archived {
                    return false;
                }
                if let Some(agent_id) = &filters.agent_id {
                    if session.agent_id.as_deref() != Some(agent_id.as_str()) {
                        return false;
                    }
                }
                true
            })
            .map(|entry| entry.key().clone())
            .collect();
        session_ids.sort();

        let mut rows = Vec::new();
        for session_id in session_ids {
            if let Some(entries) = self.entries.get(&session_id) {
                rows.extend(entries.iter().cloned());
            }
        }

        match format {
            ExportFormat::Json => serde_json::to_string_pretty(&rows).map_err(ReaperError::from),
            ExportFormat::Csv => Ok(export_csv(&rows)),
        }
    }

    /// Marks sessions archived with a retention deadline. Used by the
    /// retention scheduler.
    pub fn archive_session(&self, session_id: &SessionId, retention_days: i64) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| ReaperError::not_found(format!("session '{session_id}' does not exist")))?;
        session.archive(retention_days);
        Ok(())
    }

    /// Deletes a session's rows entirely. Used by the retention sweeper;
    /// never called for sessions carrying an unresolved integrity
    /// violation. Returns the number of log entries removed.
    pub fn delete_session(&self, session_id: &SessionId) -> usize {
        self.sessions.remove(session_id);
        let removed = self
            .entries
            .remove(session_id)
            .map(|(_, rows)| rows.len())
            .unwrap_or(0);
        self.append_locks.remove(session_id);
        self.entries_by_id
            .retain(|_, (sid, _)| sid != session_id);
        removed
    }

    /// Number of log entries a session currently holds. Read-only
    /// counterpart to `delete_session`'s return value, used to size a
    /// dry-run sweep without touching any rows.
    pub fn session_entry_count(&self, session_id: &SessionId) -> usize {
        self.entries.get(session_id).map(|r| r.len()).unwrap_or(0)
    }

    pub fn expired_sessions(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn all_sessions(&self) -> Vec<Session> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }
}

fn paginate<T: Clone>(items: Vec<T>, page: u64, page_size: u64) -> Page<T> {
    let page_size = page_size.max(1);
    let total = items.len() as u64;
    let start = (page.saturating_sub(1)) * page_size;
    let page_items = items
        .into_iter()
        .skip(start as usize)
        .take(page_size as usize)
        .collect();
    Page {
        items: page_items,
        page: page.max(1),
        page_size,
        total,
    }
}

fn export_csv(rows: &[LogEntry]) -> String {
    let mut out = String::from(
        "session_id,seq_index,timestamp,tool_name,decision,rule_name,status,own_hash\n",
    );
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            row.session_id,
            row.seq_index,
            row.timestamp.to_rfc3339(),
            row.tool_name,
            row.decision.as_str(),
            row.rule_name.clone().unwrap_or_default(),
            row.status.as_str(),
            row.own_hash,
        ));
    }
    out
}
