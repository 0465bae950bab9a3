use std::sync::Arc;

use audit_log::AuditLog;
use message_queue::SubscriptionRegistry;
use policy_engine::PolicyStore;
use reaper_core::ReaperConfig;

#[derive(Clone)]
pub struct AgentState {
    pub config: Arc<ReaperConfig>,
    pub policy_store: Arc<PolicyStore>,
    pub audit: Arc<AuditLog>,
    pub subscriptions: Arc<SubscriptionRegistry>,
}

impl AgentState {
    pub fn new(config: ReaperConfig) -> Self {
        let audit = Arc::new(AuditLog::new(config.hmac_secret.clone()));
        let mut policy_store = PolicyStore::new();
        policy_store.policy_bundle_path = config.policy_bundle_path.clone();
        Self {
            config: Arc::new(config),
            policy_store: Arc::new(policy_store),
            audit,
            subscriptions: Arc::new(SubscriptionRegistry::new()),
        }
    }
}

/// A minimal default policy activated at startup so `enforce` has
/// something to evaluate against before an operator pushes a real one.
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
