use std::collections::HashMap;

use audit_log::{AppendFields, AuditLog, EntryId, Outcome, OutcomeStatus};
use cucumber::{given, then, when, World};
use reaper_core::policy::{Decision, EvalDecision};

#[derive(World)]
#[world(init = Self::new)]
struct AuditLogWorld {
    log: AuditLog,
    entries_by_label: HashMap<String, EntryId>,
    last_entry: Option<EntryId>,
    last_session: Option<String>,
    last_seal_result: Option<Result<(), String>>,
}

impl std::fmt::Debug for AuditLogWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogWorld").finish()
    }
}

impl AuditLogWorld {
    fn new() -> Self {
        Self {
            log: AuditLog::new(b"bdd-test-secret".to_vec()),
            entries_by_label: HashMap::new(),
            last_entry: None,
            last_session: None,
            last_seal_result: None,
        }
    }
}

fn decision_for(action: Decision) -> EvalDecision {
    EvalDecision {
        action,
        rule_name: Some("rule".to_string()),
        reason: "matched".to_string(),
        policy_version_label: "v1".to_string(),
    }
}

#[given("a fresh audit log")]
async fn fresh_log(world: &mut AuditLogWorld) {
    world.log = AuditLog::new(b"bdd-test-secret".to_vec());
}

#[given(regex = r#"^a session "([^"]+)"$"#)]
async fn a_session(world: &mut AuditLogWorld, session_id: String) {
    world
        .log
        .ensure_session(&session_id, None, None, serde_json::json!({}));
    world.last_session = Some(session_id);
}

#[when(regex = r#"^"([^"]+)" is appended with an? (allow|deny) decision$"#)]
async fn append_entry(world: &mut AuditLogWorld, tool_name: String, action: String) {
    let session_id = world.last_session.clone().expect("session must be given");
    let action = if action == "allow" {
        Decision::Allow
    } else {
        Decision::Deny
    };
    let entry_id = world
        .log
        .append(
            &session_id,
            AppendFields {
                tool_name,
                tool_args: serde_json::json!({}),
                decision: decision_for(action),
                bypass: false,
            },
        )
        .await
        .expect("append should succeed");
    world.last_entry = Some(entry_id);
}

#[when("the entry's outcome is sealed as successful")]
async fn seal_success(world: &mut AuditLogWorld) {
    let entry_id = world.last_entry.expect("an entry must be appended first");
    world
        .log
        .seal_outcome(
            &entry_id,
            Outcome {
                status: OutcomeStatus::Success,
                result: Some(serde_json::json!({"ok": true})),
                error_message: None,
                execution_duration_ms: Some(5),
            },
        )
        .await
        .expect("first seal should succeed");
}

#[then("sealing the same entry again is rejected as a conflict")]
async fn seal_again_conflicts(world: &mut AuditLogWorld) {
    let entry_id = world.last_entry.expect("an entry must be appended first");
    let result = world
        .log
        .seal_outcome(
            &entry_id,
            Outcome {
                status: OutcomeStatus::Success,
                result: None,
                error_message: None,
                execution_duration_ms: None,
            },
        )
        .await;
    world.last_seal_result = Some(result.map_err(|e| e.to_string()));
    assert!(world.last_seal_result.as_ref().unwrap().is_err());
}

#[then("verifying the log reports no violations")]
async fn verify_clean(world: &mut AuditLogWorld) {
    let report = world.log.verify(None, None);
    assert_eq!(report.entries_checked, 2);
    assert!(report.violations.is_empty());
}

#[then(regex = r#"^the session summary for "([^"]+)" shows (\d+) allowed and (\d+) denied call$"#)]
async fn session_summary_counts(
    world: &mut AuditLogWorld,
    session_id: String,
    allowed: u64,
    denied: u64,
) {
    let page = world.log.get_session(&session_id, 1, 10).unwrap();
    let actual_allowed = page
        .items
        .iter()
        .filter(|e| e.decision == Decision::Allow)
        .count() as u64;
    let actual_denied = page
        .items
        .iter()
        .filter(|e| e.decision == Decision::Deny)
        .count() as u64;
    assert_eq!(actual_allowed, allowed);
    assert_eq!(actual_denied, denied);
}

#[tokio::main]
async fn main() {
    AuditLogWorld::run("tests/features").await;
}
