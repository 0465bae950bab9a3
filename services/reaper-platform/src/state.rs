use std::sync::Arc;

use audit_log::AuditLog;
use policy_engine::PolicyStore;
use reaper_core::ReaperConfig;

#[derive(Clone)]
pub struct PlatformState {
    pub config: Arc<ReaperConfig>,
    pub policy_store: Arc<PolicyStore>,
    pub audit: Arc<AuditLog>,
}

impl PlatformState {
    pub fn new(config: ReaperConfig) -> Self {
        let audit = Arc::new(AuditLog::new(config.hmac_secret.clone()));
        let mut policy_store = PolicyStore::new();
        policy_store.policy_bundle_path = config.policy_bundle_path.clone();
        Self {
            config: Arc::new(config),
            policy_store: Arc::new(policy_store),
            audit,
        }
    }
}

/// Same bootstrap policy `reaper-agent` activates, seeded independently
/// on cold start so a fresh deployment starts from a consistent default
/// before an operator publishes a real one. Once `REAPER_POLICY_BUNDLE`
/// is configured on both services, every `activate` here persists to
/// that path and `reaper-agent` picks it up on its next poll (see
/// DESIGN.md).
pub const DEFAULT_POLICY_SOURCE: &str = r#"
version: "default"
description: "Permissive bootstrap policy; replace via /policy/create."
rules:
  - name: allow-everything
    action: allow
    tools: "*"
default_action: allow
default_reason: "no policy has been published yet"
"#;
