//! Control-plane handlers: policy lifecycle, session queries/archival, and
//! compliance reporting — the HTTP façade for C1 (`policy-engine::store`)
//! and C5 (`metrics`).

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use reaper_core::entry::SessionId;
use reaper_core::{ReaperError, Result as ReaperResult};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

use crate::error::ApiError;
use crate::state::PlatformState;

// ---------------------------------------------------------------------
// Policy lifecycle (C1)
// ---------------------------------------------------------------------

#[instrument(skip(state))]
pub async fn policy_current(State(state): State<PlatformState>) -> Result<Json<Value>, ApiError> {
    let version = state.policy_store.current()?;
    Ok(Json(json!({
        "version": version.label,
        "hash": version.fingerprint,
        "rules_count": version.rules.len(),
        "rules": version.rules.iter().map(|r| json!({
            "name": r.name,
            "action": r.action.as_str(),
            "tools": r.predicate.tool_name,
            "description": r.description,
        })).collect::<Vec<_>>(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub policy_content: String,
    pub description: Option<String>,
}

#[instrument(skip(state, req))]
pub async fn policy_validate(
    State(state): State<PlatformState>,
    Json(req): Json<ValidateRequest>,
) -> Json<Value> {
    let outcome = state.policy_store.validate(&req.policy_content, true);
    Json(json!({
        "is_valid": outcome.ok,
        "errors": outcome.errors,
        "rules_count": outcome.rules_count,
        "version": outcome.version_label,
    }))
}

#[instrument(skip(state))]
pub async fn policy_reload(State(state): State<PlatformState>) -> Result<Json<Value>, ApiError> {
    let outcome = state.policy_store.reload()?;
    let rules_count = state.policy_store.current()?.rules.len();
    Ok(Json(json!({
        "status": "ok",
        "old_version": outcome.old_version,
        "new_version": outcome.new_version,
        "rules_count": rules_count,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreatePolicyRequest {
    pub policy_content: String,
    pub version: String,
    pub description: Option<String>,
    #[serde(default)]
    pub activate: bool,
}

#[instrument(skip(state, req), fields(version = %req.version))]
pub async fn policy_create(
    State(state): State<PlatformState>,
    Json(req): Json<CreatePolicyRequest>,
) -> Json<Value> {
    match state.policy_store.create(
        &req.policy_content,
        &req.version,
        req.description.as_deref().unwrap_or(""),
        req.activate,
    ) {
        Ok(outcome) => Json(json!({
            "success": true,
            "policy_id": outcome.policy_id,
            "version": req.version,
            "message": "policy version created",
            "validation_errors": Vec::<String>::new(),
        })),
        Err(err) => {
            let errors = match &err {
                ReaperError::Validation { message } => vec![message.clone()],
                other => vec![other.to_string()],
            };
            Json(json!({
                "success": false,
                "policy_id": Value::Null,
                "version": req.version,
                "message": err.to_string(),
                "validation_errors": errors,
            }))
        }
    }
}

// ---------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
}

#[instrument(skip(state))]
pub async fn list_sessions(
    State(state): State<PlatformState>,
    Query(query): Query<ListSessionsQuery>,
) -> Json<Value> {
    let filters = audit_log::SessionFilters {
        agent_id: query.agent_id,
        user_id: query.user_id,
        include_archived: query.include_archived,
        since: None,
        until: None,
    };
    let page = state
        .audit
        .list_sessions(&filters, query.page.unwrap_or(1), query.page_size.unwrap_or(20));
    Json(serde_json::to_value(page).expect("page always serializes"))
}

#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<PlatformState>,
    Path(session_id): Path<SessionId>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = state
        .audit
        .get_session(&session_id, query.page.unwrap_or(1), query.page_size.unwrap_or(50))?;
    Ok(Json(serde_json::to_value(page).expect("page always serializes")))
}

#[instrument(skip(state))]
pub async fn get_session_summary(
    State(state): State<PlatformState>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<Value>, ApiError> {
    let summary = state.audit.session_summary(&session_id)?;
    Ok(Json(serde_json::to_value(summary).expect("summary always serializes")))
}

#[instrument(skip(state))]
pub async fn delete_session(
    State(state): State<PlatformState>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<Value>, ApiError> {
    state
        .audit
        .get_session_row(&session_id)
        .ok_or_else(|| ReaperError::not_found(format!("session '{session_id}' does not exist")))?;
    let deleted = state.audit.delete_session(&session_id);
    Ok(Json(json!({"status": "ok", "deleted_entries": deleted})))
}

#[derive(Debug, Deserialize)]
pub struct ArchiveRequest {
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_archived_by")]
    pub archived_by: String,
}

fn default_retention_days() -> i64 {
    90
}

fn default_archived_by() -> String {
    "unknown".to_string()
}

#[instrument(skip(state, req))]
pub async fn archive_session(
    State(state): State<PlatformState>,
    Path(session_id): Path<SessionId>,
    Json(req): Json<ArchiveRequest>,
) -> Result<Json<Value>, ApiError> {
    let results = metrics::schedule_archival(&state.audit, &[session_id], req.retention_days, &req.archived_by);
    let (session_id, result) = results.into_iter().next().expect("exactly one session requested");
    result?;
    Ok(Json(json!({"status": "ok", "session_id": session_id})))
}

#[derive(Debug, Deserialize)]
pub struct BulkArchiveRequest {
    pub session_ids: Vec<SessionId>,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_archived_by")]
    pub archived_by: String,
}

#[instrument(skip(state, req))]
pub async fn bulk_archive_sessions(
    State(state): State<PlatformState>,
    Json(req): Json<BulkArchiveRequest>,
) -> Json<Value> {
    let results = metrics::schedule_archival(&state.audit, &req.session_ids, req.retention_days, &req.archived_by);
    let archived = results.iter().filter(|(_, r)| r.is_ok()).count();
    let failed: Vec<_> = results
        .iter()
        .filter_map(|(id, r)| r.as_ref().err().map(|e| json!({"session_id": id, "error": e.to_string()})))
        .collect();
    Json(json!({"archived": archived, "failed": failed}))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
    pub agent_id: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
}

#[instrument(skip(state))]
pub async fn export_sessions(
    State(state): State<PlatformState>,
    Query(query): Query<ExportQuery>,
) -> Result<String, ApiError> {
    let filters = audit_log::SessionFilters {
        agent_id: query.agent_id,
        user_id: None,
        include_archived: query.include_archived,
        since: None,
        until: None,
    };
    let format = match query.format.as_deref() {
        Some("csv") => audit_log::ExportFormat::Csv,
        _ => audit_log::ExportFormat::Json,
    };
    Ok(state.audit.export(&filters, format)?)
}

// ---------------------------------------------------------------------
// Compliance (C5)
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DateRangeQuery {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub detail: Option<String>,
}

fn resolve_range(query: &DateRangeQuery) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = query.end_date.unwrap_or_else(Utc::now);
    let start = query.start_date.unwrap_or_else(|| end - chrono::Duration::days(30));
    (start, end)
}

#[instrument(skip(state))]
pub async fn generate_report(
    State(state): State<PlatformState>,
    Query(query): Query<DateRangeQuery>,
) -> Json<Value> {
    let (start, end) = resolve_range(&query);
    let detail = match query.detail.as_deref() {
        Some("detailed") => metrics::DetailLevel::Detailed,
        _ => metrics::DetailLevel::Summary,
    };
    let report = metrics::assemble_report(&state.audit, start, end, detail);
    Json(serde_json::to_value(report).expect("report always serializes"))
}

#[instrument(skip(state))]
pub async fn retention_status(State(state): State<PlatformState>) -> Json<Value> {
    let now = Utc::now();
    let soon = now + chrono::Duration::days(7);
    let mut overdue = Vec::new();
    let mut upcoming = Vec::new();
    for session in state.audit.all_sessions() {
        if let Some(until) = session.retention_until {
            if until <= now {
                overdue.push(session.id);
            } else if until <= soon {
                upcoming.push(session.id);
            }
        }
    }
    Json(json!({"overdue": overdue, "upcoming": upcoming}))
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    #[serde(default)]
    pub dry_run: bool,
}

#[instrument(skip(state))]
pub async fn retention_cleanup(
    State(state): State<PlatformState>,
    Query(query): Query<CleanupQuery>,
) -> Json<Value> {
    let outcome = metrics::sweep_expired(&state.audit, query.dry_run);
    Json(json!({
        "would_delete": outcome.deleted_count,
        "deleted_count": outcome.deleted_count,
        "candidates": outcome.candidates,
        "failures": outcome.failures,
    }))
}

#[instrument(skip(state))]
pub async fn integrity_verify(
    State(state): State<PlatformState>,
    Query(query): Query<DateRangeQuery>,
) -> Json<Value> {
    let report = metrics::verify_range(&state.audit, query.start_date, query.end_date);
    Json(json!({
        "entries_checked": report.entries_checked,
        "integrity_violations": report.violations.len(),
        "chain_intact": report.violations.is_empty(),
        "violations": report.violations,
    }))
}

// ---------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------

#[instrument(skip(state))]
pub async fn health_check(State(state): State<PlatformState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "reaper-platform",
        "version": reaper_core::VERSION,
        "dev_mode": state.config.is_dev_mode(),
    }))
}

#[instrument(skip(state))]
pub async fn metrics_endpoint(State(state): State<PlatformState>) -> ReaperResult<Json<Value>> {
    let version = state.policy_store.current().ok();
    Ok(Json(json!({
        "service": "reaper-platform",
        "active_policy_version": version.map(|v| v.label.clone()),
        "total_sessions": state.audit.all_sessions().len(),
    })))
}
