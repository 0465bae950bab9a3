//! # Reaper Platform
//!
//! Control-plane service — policy lifecycle, session administration, and
//! compliance reporting (C1/C5). `reaper-agent` owns the hot enforcement
//! path; this service owns everything an operator or auditor drives by
//! hand, plus the scheduled retention sweep.

mod auth;
mod error;
mod handlers;
mod state;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use reaper_core::{endpoints, ReaperConfig, BUILD_INFO};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use state::{PlatformState, DEFAULT_POLICY_SOURCE};

/// Background retention sweeper: runs on a configurable interval,
/// default every hour. Holds no long-lived locks between ticks; a
/// failure sweeping one session is recorded in `SweepOutcome::failures`
/// and never aborts the loop, per `metrics`'s own per-session isolation.
async fn run_retention_sweeper(audit: Arc<audit_log::AuditLog>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; skip it
    loop {
        ticker.tick().await;
        let outcome = metrics::sweep_expired(&audit, false);
        if outcome.deleted_count > 0 || !outcome.failures.is_empty() {
            info!(
                deleted = outcome.deleted_count,
                candidates = outcome.candidates.len(),
                failures = outcome.failures.len(),
                "retention sweep completed"
            );
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = ReaperConfig::from_env();
    info!("Starting Reaper Platform {}", BUILD_INFO);

    if config.is_dev_mode() {
        warn!("no REAPER_API_TOKEN configured — running in development mode, all callers accepted");
    }

    let bind_addr = config.bind_addr.clone();
    let state = PlatformState::new(config);

    if let Err(e) = state.policy_store.create(DEFAULT_POLICY_SOURCE, "default", "bootstrap policy", true) {
        warn!(error = %e, "failed to activate bootstrap policy");
    }

    tokio::spawn(run_retention_sweeper(state.audit.clone(), state.config.sweep_interval));

    let sessions_path = endpoints::API_V1_SESSIONS;
    let policy_path = endpoints::API_V1_POLICY;
    let compliance_path = endpoints::API_V1_COMPLIANCE;

    let protected = Router::new()
        .route(sessions_path, get(handlers::list_sessions))
        .route(&format!("{sessions_path}/export"), get(handlers::export_sessions))
        .route(
            &format!("{sessions_path}/bulk/archive"),
            post(handlers::bulk_archive_sessions),
        )
        .route(
            &format!("{sessions_path}/{{session_id}}"),
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route(
            &format!("{sessions_path}/{{session_id}}/summary"),
            get(handlers::get_session_summary),
        )
        .route(
            &format!("{sessions_path}/{{session_id}}/archive"),
            post(handlers::archive_session),
        )
        .route(&format!("{policy_path}/current"), get(handlers::policy_current))
        .route(&format!("{policy_path}/validate"), post(handlers::policy_validate))
        .route(&format!("{policy_path}/reload"), post(handlers::policy_reload))
        .route(&format!("{policy_path}/create"), post(handlers::policy_create))
        .route(
            &format!("{compliance_path}/report/generate"),
            get(handlers::generate_report),
        )
        .route(
            &format!("{compliance_path}/retention/status"),
            get(handlers::retention_status),
        )
        .route(
            &format!("{compliance_path}/retention/cleanup"),
            post(handlers::retention_cleanup),
        )
        .route(
            &format!("{compliance_path}/integrity/verify"),
            get(handlers::integrity_verify),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer_token));

    let app = Router::new()
        .route(endpoints::HEALTH, get(handlers::health_check))
        .route(endpoints::METRICS, get(handlers::metrics_endpoint))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Reaper Platform listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
