//! Data-plane handlers: `enforce`, `update_result`, `policy/test`, `ws`.
//!
//! This is the HTTP-facing half of the Enforcement Service (C4); the
//! orchestration algorithm itself (resolve session, snapshot policy,
//! evaluate, append, publish, respond) is implemented directly against
//! `policy-engine`/`audit-log`/`message-queue` rather than behind another
//! abstraction layer.

use std::collections::HashMap;

use audit_log::AppendFields;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use message_queue::NotificationEvent;
use policy_engine::{CallContext, EvalDecision};
use reaper_core::entry::{Outcome, OutcomeStatus, SessionId};
use reaper_core::{ReaperError, Result as ReaperResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AgentState;

#[derive(Debug, Deserialize)]
pub struct EnforceRequest {
    pub tool_name: String,
    #[serde(default)]
    pub tool_args: Value,
    pub session_id: Option<SessionId>,
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    pub metadata: Option<Value>,
    pub context: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct EnforceResponse {
    pub session_id: SessionId,
    pub decision: &'static str,
    pub rule_name: Option<String>,
    pub reason: String,
    pub policy_version: String,
    pub log_id: String,
    pub timestamp: String,
}

fn object_to_map(value: Option<Value>) -> HashMap<String, Value> {
    value
        .and_then(|v| v.as_object().cloned())
        .map(|m| m.into_iter().collect())
        .unwrap_or_default()
}

/// `POST /api/v1/enforce`.
#[instrument(skip(state, req), fields(tool_name = %req.tool_name))]
pub async fn enforce(
    State(state): State<AgentState>,
    Json(req): Json<EnforceRequest>,
) -> Result<Json<EnforceResponse>, ApiError> {
    if req.tool_name.trim().is_empty() {
        return Err(ReaperError::validation("tool_name must not be empty").into());
    }

    // Step 1: resolve session, creating the row if this is its first
    // reference. Generated identifiers are never reused.
    let session_id = req
        .session_id
        .clone()
        .unwrap_or_else(reaper_core::generate_session_id);
    state.audit.ensure_session(
        &session_id,
        req.agent_id.clone(),
        req.user_id.clone(),
        req.metadata.clone().unwrap_or_else(|| json!({})),
    );

    let now = Utc::now();
    let bypass = state.config.bypass_mode;

    let decision: EvalDecision = if bypass {
        EvalDecision {
            action: reaper_core::Decision::Allow,
            rule_name: None,
            reason: "bypass mode enabled; decision not evaluated".to_string(),
            policy_version_label: "bypass".to_string(),
        }
    } else {
        // Step 2: snapshot the active policy — a lock-free read of an
        // immutable pointer, stable for the life of this evaluation even
        // if an activation races with it.
        let policy = state.policy_store.current()?;

        // Step 3: build the evaluation context — caller overrides merged
        // onto the session's stored metadata, plus the single wall-clock
        // sample every clause in this call sees.
        let mut session_context = object_to_map(req.context.clone());
        if let Some(session) = state.audit.get_session_row(&session_id) {
            for (key, value) in object_to_map(Some(session.metadata)) {
                session_context.entry(key).or_insert(value);
            }
        }
        session_context
            .entry("time_of_day".to_string())
            .or_insert_with(|| json!(now.format("%H:%M").to_string()));
        session_context
            .entry("day_of_week".to_string())
            .or_insert_with(|| json!(now.format("%A").to_string()));

        let call = CallContext {
            tool_name: req.tool_name.clone(),
            tool_args: req.tool_args.clone(),
            session_context,
            metadata: object_to_map(req.metadata.clone()),
        };

        let compiled = state
            .policy_store
            .evaluator
            .compiled(policy)
            .map_err(ReaperError::server)?;

        // Step 4: invoke the evaluator.
        policy_engine::evaluate(&compiled, &call)
    };

    // Step 5: append the decision. Outcome starts `pending`.
    let log_id = state
        .audit
        .append(
            &session_id,
            AppendFields {
                tool_name: req.tool_name.clone(),
                tool_args: req.tool_args.clone(),
                decision: decision.clone(),
                bypass,
            },
        )
        .await?;

    let entry = state
        .audit
        .get_entry(&log_id)
        .ok_or_else(|| ReaperError::server("entry vanished immediately after append"))?;

    // Step 6: publish to subscribers of this session.
    state
        .subscriptions
        .publish(&session_id, NotificationEvent::Decision { entry: entry.clone() });

    Ok(Json(EnforceResponse {
        session_id,
        decision: decision.action.as_str(),
        rule_name: decision.rule_name,
        reason: decision.reason,
        policy_version: decision.policy_version_label,
        log_id: log_id.to_string(),
        timestamp: entry.timestamp.to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ResultQuery {
    pub log_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ResultPayload {
    pub status: OutcomeStatus,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub execution_duration_ms: Option<u64>,
}

/// `POST /api/v1/enforce/{session_id}/result`.
#[instrument(skip(state, payload))]
pub async fn update_result(
    State(state): State<AgentState>,
    Path(session_id): Path<SessionId>,
    Query(query): Query<ResultQuery>,
    Json(payload): Json<ResultPayload>,
) -> Result<Json<Value>, ApiError> {
    if payload.status == OutcomeStatus::Pending {
        return Err(ReaperError::validation("outcome status must be success or error").into());
    }

    // Step 1: reject cross-session references before touching the store.
    let entry = state
        .audit
        .get_entry(&query.log_id)
        .ok_or_else(|| ReaperError::not_found(format!("log entry '{}' not found", query.log_id)))?;
    if entry.session_id != session_id {
        return Err(ReaperError::validation(
            "log_id does not belong to the given session_id",
        )
        .into());
    }

    // Step 2: seal — CONFLICT if already sealed, outcome never regresses.
    state
        .audit
        .seal_outcome(
            &query.log_id,
            Outcome {
                status: payload.status,
                result: payload.result,
                error_message: payload.error_message,
                execution_duration_ms: payload.execution_duration_ms,
            },
        )
        .await?;

    // Step 3: publish the result event.
    state.subscriptions.publish(
        &session_id,
        NotificationEvent::Result {
            entry_id: query.log_id,
            session_id: session_id.clone(),
        },
    );

    Ok(Json(json!({"status": "ok", "log_id": query.log_id.to_string()})))
}

#[derive(Debug, Deserialize)]
pub struct PolicyTestQuery {
    pub tool_name: String,
    pub tool_args: Option<String>,
    pub session_context: Option<String>,
}

fn parse_json_param(raw: Option<&str>) -> ReaperResult<Value> {
    match raw {
        None => Ok(json!({})),
        Some(s) if s.trim().is_empty() => Ok(json!({})),
        Some(s) => serde_json::from_str(s)
            .map_err(|e| ReaperError::validation(format!("invalid JSON query parameter: {e}"))),
    }
}

/// `GET /api/v1/policy/test` — evaluates without any audit side effect.
#[instrument(skip(state))]
pub async fn policy_test(
    State(state): State<AgentState>,
    Query(query): Query<PolicyTestQuery>,
) -> Result<Json<Value>, ApiError> {
    let tool_args = parse_json_param(query.tool_args.as_deref())?;
    let session_context_raw = parse_json_param(query.session_context.as_deref())?;

    let policy = state.policy_store.current()?;
    let compiled = state
        .policy_store
        .evaluator
        .compiled(policy)
        .map_err(ReaperError::server)?;

    let call = CallContext {
        tool_name: query.tool_name.clone(),
        tool_args: tool_args.clone(),
        session_context: object_to_map(Some(session_context_raw.clone())),
        metadata: HashMap::new(),
    };
    let decision = policy_engine::evaluate(&compiled, &call);

    Ok(Json(json!({
        "tool_name": query.tool_name,
        "tool_args": tool_args,
        "session_context": session_context_raw,
        "decision": {
            "action": decision.action.as_str(),
            "rule_name": decision.rule_name,
            "reason": decision.reason,
            "policy_version": decision.policy_version_label,
        }
    })))
}

/// `GET /ws/{session_id}` — newline-delimited JSON `{type, entry}`
/// messages, lossy on backpressure. Reconnecting clients reconcile by
/// paginating `GET /sessions/{id}` — the audit log is never lossy.
pub async fn ws_session(
    ws: WebSocketUpgrade,
    Path(session_id): Path<SessionId>,
    State(state): State<AgentState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Some(session_id)))
}

/// `GET /ws` — subscribes to every session's decisions and results.
pub async fn ws_all(ws: WebSocketUpgrade, State(state): State<AgentState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, None))
}

async fn handle_socket(mut socket: WebSocket, state: AgentState, session_filter: Option<SessionId>) {
    let mut subscription = state.subscriptions.subscribe_filtered(session_filter);
    info!(subscription_id = %subscription.id, "websocket subscriber connected");

    while let Some(event) = subscription.recv().await {
        let payload = render_event(&state, event).await;
        let text = match serde_json::to_string(&payload) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "failed to serialize notification event");
                continue;
            }
        };
        if socket.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }

    state.subscriptions.unsubscribe(&subscription.id);
    info!(subscription_id = %subscription.id, "websocket subscriber disconnected");
}

async fn render_event(state: &AgentState, event: NotificationEvent) -> Value {
    match event {
        NotificationEvent::Decision { entry } => json!({"type": "decision", "entry": entry}),
        NotificationEvent::Result { entry_id, .. } => {
            let entry = state.audit.get_entry(&entry_id);
            json!({"type": "result", "entry": entry})
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub dev_mode: bool,
    pub bypass_mode: bool,
}

#[instrument(skip(state))]
pub async fn health_check(State(state): State<AgentState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "reaper-agent",
        version: reaper_core::VERSION,
        dev_mode: state.config.is_dev_mode(),
        bypass_mode: state.config.bypass_mode,
    })
}

#[instrument(skip(state))]
pub async fn metrics(State(state): State<AgentState>) -> Json<Value> {
    let active_policy = state.policy_store.current().ok();
    Json(json!({
        "service": "reaper-agent",
        "active_policy_version": active_policy.map(|p| p.label.clone()),
        "bypass_mode": state.config.bypass_mode,
    }))
}
