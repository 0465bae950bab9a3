//! Policy Store (C1): persist policy versions, track the active one and
//! emit a change event on activation. Activation is a serialized
//! transition guarded by `activation_lock`; the active pointer itself is a
//! lock-free `ArcSwapOption` read by every in-flight evaluation.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use reaper_core::policy::{PolicyId, PolicyVersion};
use reaper_core::{ReaperError, Result};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::document::{self, ValidateOutcome};
use crate::engine::PolicyEvaluator;

/// Emitted by `activate` on a single-writer channel; the enforcement
/// service's reload task is the consumer.
#[derive(Debug, Clone)]
pub struct PolicyActivated {
    pub old_version: Option<String>,
    pub new_version: String,
}

pub struct CreateOutcome {
    pub policy_id: PolicyId,
    pub fingerprint: String,
    pub activated: bool,
}

pub struct ActivateOutcome {
    pub old_version: Option<String>,
    pub new_version: String,
}

pub struct PolicyStore {
    versions: DashMap<PolicyId, Arc<PolicyVersion>>,
    labels: DashMap<String, PolicyId>,
    active: ArcSwapOption<PolicyVersion>,
    activation_lock: Mutex<()>,
    changes: broadcast::Sender<PolicyActivated>,
    pub evaluator: PolicyEvaluator,
    pub policy_bundle_path: Option<std::path::PathBuf>,
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self {
            versions: DashMap::new(),
            labels: DashMap::new(),
            active: ArcSwapOption::empty(),
            activation_lock: Mutex::new(()),
            changes: tx,
            evaluator: PolicyEvaluator::new(),
            policy_bundle_path: None,
        }
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<PolicyActivated> {
        self.changes.subscribe()
    }

    /// Validate(source) — parses without touching storage.
    pub fn validate(&self, source: &str, strict: bool) -> ValidateOutcome {
        let (outcome, _parsed) = document::validate(source, strict);
        outcome
    }

    /// Create(source, version_label, description, activate?).
    #[instrument(skip(self, source), fields(version_label = %version_label))]
    pub fn create(
        &self,
        source: &str,
        version_label: &str,
        description: &str,
        activate: bool,
    ) -> Result<CreateOutcome> {
        if self.labels.contains_key(version_label) {
            return Err(ReaperError::validation(format!(
                "version label '{version_label}' already exists"
            )));
        }

        let (outcome, parsed) = document::validate(source, true);
        let (rules, default_action, default_reason) = parsed.ok_or_else(|| {
            ReaperError::validation(format!(
                "policy failed validation: {}",
                outcome.errors.join("; ")
            ))
        })?;

        let fingerprint = document::fingerprint(&rules, default_action, &default_reason);
        let id = Uuid::new_v4();
        let version = Arc::new(PolicyVersion {
            id,
            label: version_label.to_string(),
            source: source.to_string(),
            fingerprint: fingerprint.clone(),
            description: description.to_string(),
            created_at: Utc::now(),
            active: false,
            rules,
            default_action,
            default_reason,
        });

        self.versions.insert(id, version);
        self.labels.insert(version_label.to_string(), id);
        info!(policy_id = %id, version_label, "policy version created");

        let activated = if activate {
            self.activate(id)?;
            true
        } else {
            false
        };

        Ok(CreateOutcome {
            policy_id: id,
            fingerprint,
            activated,
        })
    }

    /// Activate(policy_id). Transactionally clears `active` on the
    /// previous row and sets it on the target; concurrent activations are
    /// serialized by `activation_lock`, losers observe the winner's new
    /// version because they re-read `active` after acquiring the lock.
    #[instrument(skip(self))]
    pub fn activate(&self, policy_id: PolicyId) -> Result<ActivateOutcome> {
        let _guard = self.activation_lock.lock();

        let target = self
            .versions
            .get(&policy_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| ReaperError::conflict(format!("policy {policy_id} does not exist")))?;

        let old = self.active.load_full();
        if let Some(old) = &old {
            let mut cleared = (**old).clone();
            cleared.active = false;
            self.versions.insert(old.id, Arc::new(cleared));
        }

        let mut activated = (*target).clone();
        activated.active = true;
        let activated = Arc::new(activated);
        self.versions.insert(policy_id, activated.clone());
        self.active.store(Some(activated.clone()));

        let event = PolicyActivated {
            old_version: old.as_ref().map(|v| v.label.clone()),
            new_version: activated.label.clone(),
        };
        // A lagging/absent subscriber is fine — the broadcast channel is a
        // notification hint, not the source of truth (Current() always
        // reflects the real pointer).
        let _ = self.changes.send(event.clone());

        if let Some(path) = &self.policy_bundle_path {
            if let Err(e) = std::fs::write(path, &activated.source) {
                warn!(error = %e, path = %path.display(), "failed to persist activated policy to bundle path");
            }
        }

        info!(
            old_version = ?event.old_version,
            new_version = %event.new_version,
            "policy activated"
        );

        Ok(ActivateOutcome {
            old_version: event.old_version,
            new_version: event.new_version,
        })
    }

    /// Current() — the active version plus its compiled-rules cache
    /// (compiled lazily on first use).
    pub fn current(&self) -> Result<Arc<PolicyVersion>> {
        self.active
            .load_full()
            .ok_or_else(|| ReaperError::not_found("no active policy version"))
    }

    pub fn get(&self, policy_id: &PolicyId) -> Option<Arc<PolicyVersion>> {
        self.versions.get(policy_id).map(|e| e.value().clone())
    }

    pub fn get_by_label(&self, label: &str) -> Option<Arc<PolicyVersion>> {
        self.labels
            .get(label)
            .and_then(|id| self.get(id.value()))
    }

    pub fn list_versions(&self) -> Vec<Arc<PolicyVersion>> {
        self.versions.iter().map(|e| e.value().clone()).collect()
    }

    /// Reload() — re-reads the on-disk policy bundle bound to the active
    /// version label, if one is configured, and replaces the compiled
    /// cache. No-op (but still returns current state) when unconfigured.
    #[instrument(skip(self))]
    pub fn reload(&self) -> Result<ActivateOutcome> {
        let Some(path) = &self.policy_bundle_path else {
            let current = self.current()?;
            return Ok(ActivateOutcome {
                old_version: Some(current.label.clone()),
                new_version: current.label.clone(),
            });
        };

        let source = std::fs::read_to_string(path)
            .map_err(|e| ReaperError::server(format!("failed to read policy bundle: {e}")))?;

        let current = self.current()?;
        let (outcome, parsed) = document::validate(&source, true);
        let (rules, default_action, default_reason) = parsed.ok_or_else(|| {
            ReaperError::validation(format!(
                "reloaded policy failed validation: {}",
                outcome.errors.join("; ")
            ))
        })?;
        let fingerprint = document::fingerprint(&rules, default_action, &default_reason);

        if fingerprint == current.fingerprint {
            // Expected on most polls: the bundle only changes when
            // `reaper-platform` activates a new version.
            return Ok(ActivateOutcome {
                old_version: Some(current.label.clone()),
                new_version: current.label.clone(),
            });
        }

        let new_label = outcome.version_label.clone().unwrap_or_else(|| current.label.clone());

        let mut reloaded = (*current).clone();
        reloaded.source = source;
        reloaded.fingerprint = fingerprint;
        reloaded.rules = rules;
        reloaded.default_action = default_action;
        reloaded.default_reason = default_reason;
        reloaded.label = new_label.clone();
        let reloaded = Arc::new(reloaded);

        self.versions.insert(reloaded.id, reloaded.clone());
        if new_label != current.label {
            self.labels.remove(&current.label);
        }
        self.labels.insert(new_label, reloaded.id);
        self.active.store(Some(reloaded.clone()));
        self.evaluator.invalidate(&reloaded.id);

        info!(
            old_version = %current.label,
            new_version = %reloaded.label,
            "policy bundle reloaded from disk"
        );

        Ok(ActivateOutcome {
            old_version: Some(current.label.clone()),
            new_version: reloaded.label.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn unique_bundle_path() -> std::path::PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "reaper-policy-bundle-test-{}-{n}.yaml",
            std::process::id()
        ))
    }

    const V1: &str = r#"
version: "v1"
rules:
  - name: allow-read
    action: allow
    tools: "read_file"
default_action: deny
default_reason: "not permitted"
"#;

    const V2: &str = r#"
version: "v2"
rules:
  - name: allow-write
    action: allow
    tools: "write_file"
default_action: deny
default_reason: "not permitted"
"#;

    /// Mirrors the two-process topology: one store (standing in for
    /// `reaper-platform`) activates versions and writes the bundle file,
    /// a second, independent store (standing in for `reaper-agent`)
    /// only ever calls `reload()` against that same path.
    #[test]
    fn reload_picks_up_a_bundle_written_by_another_store() {
        let path = unique_bundle_path();
        let _cleanup = scopeguard(&path);

        let mut writer = PolicyStore::new();
        writer.policy_bundle_path = Some(path.clone());
        writer.create(V1, "v1", "initial", true).unwrap();

        let mut reader = PolicyStore::new();
        reader.policy_bundle_path = Some(path.clone());
        reader.create(V1, "v1", "initial", true).unwrap();

        writer.create(V2, "v2", "rollout", true).unwrap();

        let outcome = reader.reload().unwrap();
        assert_eq!(outcome.old_version, Some("v1".to_string()));
        assert_eq!(outcome.new_version, "v2");

        let current = reader.current().unwrap();
        assert_eq!(current.label, "v2");
        assert_eq!(current.fingerprint, writer.current().unwrap().fingerprint);
        assert!(reader.get_by_label("v2").is_some());
    }

    #[test]
    fn reload_is_a_no_op_when_the_bundle_is_unchanged() {
        let path = unique_bundle_path();
        let _cleanup = scopeguard(&path);

        let mut store = PolicyStore::new();
        store.policy_bundle_path = Some(path.clone());
        store.create(V1, "v1", "initial", true).unwrap();

        let outcome = store.reload().unwrap();
        assert_eq!(outcome.old_version, Some("v1".to_string()));
        assert_eq!(outcome.new_version, "v1");
        assert_eq!(store.current().unwrap().label, "v1");
    }

    fn scopeguard(path: &std::path::Path) -> impl Drop {
        struct Remove(std::path::PathBuf);
        impl Drop for Remove {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.0);
            }
        }
        Remove(path.to_path_buf())
    }
}
