//! Explicit configuration value constructed at program entry and threaded
//! through the services and client. No global configuration singleton —
//! the only process-wide mutable state this platform carries is the
//! bypass-mode flag and the policy-snapshot pointer, both scoped to a
//! single `ReaperConfig`-constructed service instance.

use std::path::PathBuf;
use std::time::Duration;

/// Default wall-clock deadline applied to every API call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval the retention sweeper runs on.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Default interval `reaper-agent` polls the on-disk policy bundle at,
/// when one is configured. `reaper-platform` is the only writer; this is
/// how an activation made there becomes visible to the enforcement path
/// without the two services sharing a process.
pub const DEFAULT_POLICY_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Per-caller token-bucket limit, applied as an optional `tower_governor`
/// layer. `RATE_LIMITED` is an optional error kind; this is off unless
/// both env vars below are set.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests_per_second: u64,
    pub burst_size: u32,
}

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Address the HTTP service binds to.
    pub bind_addr: String,
    /// Shared-secret bearer token. `None` means development mode: every
    /// caller is accepted, and the service surfaces this in `status`.
    pub bearer_token: Option<String>,
    /// Server-side HMAC secret keying the audit hash chain.
    pub hmac_secret: Vec<u8>,
    /// Process-wide bypass flag: `enforce` short-circuits to ALLOW without
    /// consulting the evaluator, still writing an audit entry tagged
    /// `bypass=true`. Development-only.
    pub bypass_mode: bool,
    /// Optional on-disk policy bundle tracked by `Reload()`. When set,
    /// `reaper-platform` writes the activated policy's source here and
    /// `reaper-agent` polls it on `policy_poll_interval`.
    pub policy_bundle_path: Option<PathBuf>,
    /// `reaper-agent`'s policy bundle poll interval.
    pub policy_poll_interval: Duration,
    /// Retention sweeper interval.
    pub sweep_interval: Duration,
    /// Per-call request timeout.
    pub request_timeout: Duration,
    /// Optional per-caller rate limit. `None` disables the layer entirely.
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            bearer_token: None,
            hmac_secret: b"reaper-development-secret-change-me".to_vec(),
            bypass_mode: false,
            policy_bundle_path: None,
            policy_poll_interval: DEFAULT_POLICY_POLL_INTERVAL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            rate_limit: None,
        }
    }
}

impl ReaperConfig {
    /// Build configuration from the environment, matching the CLI's
    /// documented env vars where they overlap (`TAME_API_URL` and friends
    /// are client-side; the server reads its own `REAPER_*` set).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("REAPER_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(token) = std::env::var("REAPER_API_TOKEN") {
            if !token.is_empty() {
                config.bearer_token = Some(token);
            }
        }
        if let Ok(secret) = std::env::var("REAPER_HMAC_SECRET") {
            if !secret.is_empty() {
                config.hmac_secret = secret.into_bytes();
            }
        }
        if let Ok(flag) = std::env::var("REAPER_BYPASS_MODE") {
            config.bypass_mode = matches!(flag.as_str(), "1" | "true" | "TRUE" | "yes");
        }
        if let Ok(path) = std::env::var("REAPER_POLICY_BUNDLE") {
            config.policy_bundle_path = Some(PathBuf::from(path));
        }
        if let Ok(secs) = std::env::var("REAPER_POLICY_POLL_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                config.policy_poll_interval = Duration::from_secs(secs);
            }
        }

        let rps = std::env::var("REAPER_RATE_LIMIT_RPS").ok().and_then(|v| v.parse().ok());
        let burst = std::env::var("REAPER_RATE_LIMIT_BURST").ok().and_then(|v| v.parse().ok());
        if let (Some(requests_per_second), Some(burst_size)) = (rps, burst) {
            config.rate_limit = Some(RateLimitConfig {
                requests_per_second,
                burst_size,
            });
        }

        config
    }

    pub fn is_dev_mode(&self) -> bool {
        self.bearer_token.is_none()
    }
}
