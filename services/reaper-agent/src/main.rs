//! # Reaper Agent
//!
//! Data-plane enforcement service — the HTTP façade for the Enforcement
//! Service (C4). Owns session identity, orchestrates the evaluator and
//! audit writes, and dispatches notifications over the push channel.
//! Policy lifecycle management and compliance reporting live in
//! `reaper-platform`; this service only ever reads the active policy.

mod auth;
mod error;
mod handlers;
mod state;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use reaper_core::{endpoints, BUILD_INFO, ReaperConfig};
use tokio::net::TcpListener;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use state::{AgentState, DEFAULT_POLICY_SOURCE};

/// Background policy bundle poller: no-op unless `REAPER_POLICY_BUNDLE`
/// is configured. Each tick calls `reload()`, which is itself a no-op
/// when the on-disk fingerprint matches what's already active, so a tick
/// between `reaper-platform` activations costs a file read and nothing
/// else.
async fn run_policy_poller(policy_store: Arc<policy_engine::PolicyStore>, interval: std::time::Duration) {
    if policy_store.policy_bundle_path.is_none() {
        return;
    }
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; skip it
    loop {
        ticker.tick().await;
        match policy_store.reload() {
            Ok(outcome) if outcome.old_version.as_deref() != Some(outcome.new_version.as_str()) => {
                info!(
                    old_version = ?outcome.old_version,
                    new_version = %outcome.new_version,
                    "policy bundle poll picked up a new version"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "policy bundle poll failed"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = ReaperConfig::from_env();
    info!("Starting Reaper Agent {}", BUILD_INFO);

    if config.is_dev_mode() {
        warn!("no REAPER_API_TOKEN configured — running in development mode, all callers accepted");
    }
    if config.bypass_mode {
        warn!("REAPER_BYPASS_MODE enabled — every enforce call will short-circuit to ALLOW; never combine with a production audit store");
    }

    let bind_addr = config.bind_addr.clone();
    let state = AgentState::new(config);

    // A minimal permissive policy so `enforce` has something to evaluate
    // before an operator pushes a real one via `reaper-platform`.
    if let Err(e) = state.policy_store.create(DEFAULT_POLICY_SOURCE, "default", "bootstrap policy", true) {
        warn!(error = %e, "failed to activate bootstrap policy");
    }

    tokio::spawn(run_policy_poller(
        state.policy_store.clone(),
        state.config.policy_poll_interval,
    ));

    let mut enforce_route = post(handlers::enforce);
    if let Some(rate_limit) = state.config.rate_limit {
        let governor_config = GovernorConfigBuilder::default()
            .per_second(rate_limit.requests_per_second)
            .burst_size(rate_limit.burst_size)
            .finish()
            .expect("rate_limit: requests_per_second and burst_size must be > 0");
        info!(
            requests_per_second = rate_limit.requests_per_second,
            burst_size = rate_limit.burst_size,
            "per-caller rate limiting enabled on /enforce"
        );
        enforce_route = enforce_route.layer(GovernorLayer {
            config: Arc::new(governor_config),
        });
    }

    let protected = Router::new()
        .route(endpoints::API_V1_ENFORCE, enforce_route)
        .route(
            &format!("{}/{{session_id}}/result", endpoints::API_V1_ENFORCE),
            post(handlers::update_result),
        )
        .route(
            &format!("{}/test", endpoints::API_V1_POLICY),
            get(handlers::policy_test),
        )
        .route(&format!("{}/{{session_id}}", endpoints::WS), get(handlers::ws_session))
        .route(endpoints::WS, get(handlers::ws_all))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer_token));

    let app = Router::new()
        .route(endpoints::HEALTH, get(handlers::health_check))
        .route(endpoints::METRICS, get(handlers::metrics))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Reaper Agent listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
