//! Retention & Integrity (C5): scheduled archival, expiry sweeping,
//! integrity verification (delegated to `audit-log::verify`) and
//! compliance report assembly.

use std::collections::HashSet;

use audit_log::{AuditLog, VerifyReport};
use chrono::{DateTime, Utc};
use reaper_core::entry::SessionId;
use reaper_core::policy::Decision;
use reaper_core::Result;
use tracing::{info, instrument, warn};

/// `ScheduleArchival(session_ids, retention_days, archived_by)`.
#[instrument(skip(log, session_ids))]
pub fn schedule_archival(
    log: &AuditLog,
    session_ids: &[SessionId],
    retention_days: i64,
    archived_by: &str,
) -> Vec<(SessionId, Result<()>)> {
    session_ids
        .iter()
        .map(|session_id| {
            let result = log.archive_session(session_id, retention_days);
            if result.is_ok() {
                info!(session_id = %session_id, archived_by, "session archived");
            }
            (session_id.clone(), result)
        })
        .collect()
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SweepOutcome {
    pub candidates: Vec<SessionId>,
    /// Log entries removed (or, under `dry_run`, that would be removed).
    /// Counted in entries, not sessions, per the retention cleanup
    /// endpoint's `would_delete` contract.
    pub deleted_count: u64,
    pub failures: Vec<(SessionId, String)>,
}

/// `SweepExpired(dry_run?) -> {candidates[], deleted_count}`. A failure for
/// one session is recorded and the sweep continues; it never aborts the
/// loop over the remaining candidates. `deleted_count` is an entry count,
/// not a session count — a single expired session can hold many log
/// entries — so `dry_run` sums each candidate's entry count without
/// deleting anything.
#[instrument(skip(log))]
pub fn sweep_expired(log: &AuditLog, dry_run: bool) -> SweepOutcome {
    let now = Utc::now();
    let candidates = log.expired_sessions(now);

    if dry_run {
        let deleted_count = candidates
            .iter()
            .map(|session_id| log.session_entry_count(session_id) as u64)
            .sum();
        return SweepOutcome {
            candidates,
            deleted_count,
            failures: Vec::new(),
        };
    }

    let mut deleted = 0u64;
    let failures = Vec::new();
    for session_id in &candidates {
        // `delete_session` is infallible in the in-memory reference store;
        // a real transactional backend would surface per-session I/O
        // errors here, which is why this loop still folds failures into
        // the return value instead of short-circuiting.
        deleted += log.delete_session(session_id) as u64;
    }

    if !failures.is_empty() {
        warn!(failed = failures.len(), "sweep completed with failures");
    }

    SweepOutcome {
        candidates,
        deleted_count: deleted,
        failures,
    }
}

/// `VerifyRange(start, end)` — delegates to `audit_log::AuditLog::verify`.
pub fn verify_range(
    log: &AuditLog,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> VerifyReport {
    log.verify(start, end)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLevel {
    Summary,
    Detailed,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RetentionSummary {
    pub overdue_count: u64,
    pub upcoming_count: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ComplianceReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total_calls: u64,
    pub allowed: u64,
    pub denied: u64,
    pub approved: u64,
    pub unique_agents: u64,
    pub unique_users: u64,
    pub violation_rate: f64,
    pub integrity: VerifyReport,
    pub retention: RetentionSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<reaper_core::entry::LogEntry>>,
}

/// `AssembleReport(start, end, detail_level)`.
#[instrument(skip(log))]
pub fn assemble_report(
    log: &AuditLog,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    detail_level: DetailLevel,
) -> ComplianceReport {
    let integrity = log.verify(Some(start), Some(end));

    let sessions = log.all_sessions();
    let mut agents = HashSet::new();
    let mut users = HashSet::new();
    let (mut total, mut allowed, mut denied, mut approved) = (0u64, 0u64, 0u64, 0u64);
    let mut entries = Vec::new();

    let now = Utc::now();
    let mut overdue = 0u64;
    let mut upcoming = 0u64;

    for session in &sessions {
        if let Some(agent_id) = &session.agent_id {
            agents.insert(agent_id.clone());
        }
        if let Some(user_id) = &session.user_id {
            users.insert(user_id.clone());
        }
        if let Some(until) = session.retention_until {
            if until <= now {
                overdue += 1;
            } else if until <= now + chrono::Duration::days(7) {
                upcoming += 1;
            }
        }

        if let Ok(page) = log.get_session(&session.id, 1, u64::MAX) {
            for entry in page.items {
                if entry.timestamp < start || entry.timestamp > end {
                    continue;
                }
                total += 1;
                match entry.decision {
                    Decision::Allow => allowed += 1,
                    Decision::Deny => denied += 1,
                    Decision::Approve => approved += 1,
                }
                if detail_level == DetailLevel::Detailed {
                    entries.push(entry);
                }
            }
        }
    }

    let violation_rate = if total == 0 {
        0.0
    } else {
        denied as f64 / total as f64
    };

    ComplianceReport {
        start,
        end,
        total_calls: total,
        allowed,
        denied,
        approved,
        unique_agents: agents.len() as u64,
        unique_users: users.len() as u64,
        violation_rate,
        integrity,
        retention: RetentionSummary {
            overdue_count: overdue,
            upcoming_count: upcoming,
        },
        entries: if detail_level == DetailLevel::Detailed {
            Some(entries)
        } else {
            None
        },
    }
}

/// Supplemented operator tool: reaps entries stuck `pending` for longer
/// than `threshold` into `SEALED(error, "abandoned")`. Off by default,
/// never run automatically — an operator invokes it explicitly, the way
/// the concurrency model's cancellation note frames it ("operators MAY
/// run a maintenance job").
#[instrument(skip(log))]
pub async fn abandoned_sweep(
    log: &AuditLog,
    threshold: chrono::Duration,
) -> Vec<reaper_core::entry::EntryId> {
    let cutoff = Utc::now() - threshold;
    let mut reaped = Vec::new();

    for session in log.all_sessions() {
        let Ok(page) = log.get_session(&session.id, 1, u64::MAX) else {
            continue;
        };
        for entry in page.items {
            if entry.status == reaper_core::entry::OutcomeStatus::Pending && entry.timestamp < cutoff
            {
                let outcome = reaper_core::entry::Outcome {
                    status: reaper_core::entry::OutcomeStatus::Error,
                    result: None,
                    error_message: Some("abandoned".to_string()),
                    execution_duration_ms: None,
                };
                if log.seal_outcome(&entry.id, outcome).await.is_ok() {
                    reaped.push(entry.id);
                }
            }
        }
    }

    if !reaped.is_empty() {
        info!(count = reaped.len(), "abandoned-entry sweep reaped entries");
    }
    reaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_log::AppendFields;
    use reaper_core::policy::EvalDecision;

    fn make_log() -> AuditLog {
        AuditLog::new(b"metrics-test-secret".to_vec())
    }

    async fn append_entries(log: &AuditLog, session_id: &SessionId, count: usize) {
        for i in 0..count {
            log.append(
                session_id,
                AppendFields {
                    tool_name: format!("tool_{i}"),
                    tool_args: serde_json::json!({}),
                    decision: EvalDecision {
                        action: Decision::Allow,
                        rule_name: Some("r1".to_string()),
                        reason: "matched".to_string(),
                        policy_version_label: "v1".to_string(),
                    },
                    bypass: false,
                },
            )
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn sweep_dry_run_reports_candidates_without_deleting() {
        let log = make_log();
        let session_id = "s1".to_string();
        log.ensure_session(&session_id, None, None, serde_json::json!({}));
        append_entries(&log, &session_id, 3).await;
        log.archive_session(&session_id, -1).unwrap(); // already expired

        let outcome = sweep_expired(&log, true);
        assert_eq!(outcome.candidates, vec![session_id.clone()]);
        // Entries, not sessions — a single candidate session here holds 3.
        assert_eq!(outcome.deleted_count, 3);
        assert!(log.get_session_row(&session_id).is_some());
    }

    #[tokio::test]
    async fn sweep_live_run_counts_entries_not_sessions() {
        let log = make_log();
        let many_entries = "s1".to_string();
        let one_entry = "s2".to_string();
        log.ensure_session(&many_entries, None, None, serde_json::json!({}));
        log.ensure_session(&one_entry, None, None, serde_json::json!({}));
        append_entries(&log, &many_entries, 4).await;
        append_entries(&log, &one_entry, 1).await;
        log.archive_session(&many_entries, -1).unwrap();
        log.archive_session(&one_entry, -1).unwrap();

        let outcome = sweep_expired(&log, false);
        // Two expired sessions, five entries total — counting sessions
        // would report 2.
        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(outcome.deleted_count, 5);
        assert!(log.get_session_row(&many_entries).is_none());
        assert!(log.get_session_row(&one_entry).is_none());
    }

    #[tokio::test]
    async fn assemble_report_aggregates_decision_counts() {
        let log = make_log();
        let session_id = "s1".to_string();
        log.ensure_session(&session_id, None, None, serde_json::json!({}));
        log.append(
            &session_id,
            audit_log::AppendFields {
                tool_name: "delete_file".to_string(),
                tool_args: serde_json::json!({}),
                decision: reaper_core::policy::EvalDecision {
                    action: Decision::Deny,
                    rule_name: Some("deny-rule".to_string()),
                    reason: "blocked".to_string(),
                    policy_version_label: "v1".to_string(),
                },
                bypass: false,
            },
        )
        .await
        .unwrap();

        let report = assemble_report(
            &log,
            Utc::now() - chrono::Duration::hours(1),
            Utc::now() + chrono::Duration::hours(1),
            DetailLevel::Summary,
        );
        assert_eq!(report.total_calls, 1);
        assert_eq!(report.denied, 1);
        assert!((report.violation_rate - 1.0).abs() < f64::EPSILON);
        assert!(report.entries.is_none());
    }
}
