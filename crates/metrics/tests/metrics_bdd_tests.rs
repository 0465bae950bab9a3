use audit_log::{AppendFields, AuditLog};
use chrono::Utc;
use cucumber::{given, then, when, World};
use metrics::{assemble_report, sweep_expired, ComplianceReport, DetailLevel, SweepOutcome};
use reaper_core::policy::{Decision, EvalDecision};

#[derive(World)]
#[world(init = Self::new)]
struct MetricsWorld {
    log: AuditLog,
    last_sweep: Option<SweepOutcome>,
    last_report: Option<ComplianceReport>,
}

impl std::fmt::Debug for MetricsWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsWorld").finish()
    }
}

impl MetricsWorld {
    fn new() -> Self {
        Self {
            log: AuditLog::new(b"metrics-bdd-secret".to_vec()),
            last_sweep: None,
            last_report: None,
        }
    }
}

#[given(regex = r#"^an audit log with an archived, already-expired session "([^"]+)"$"#)]
async fn archived_expired_session(world: &mut MetricsWorld, session_id: String) {
    world
        .log
        .ensure_session(&session_id, None, None, serde_json::json!({}));
    world.log.archive_session(&session_id, -1).unwrap();
}

#[given(regex = r#"^an audit log with an archived, already-expired session "([^"]+)" holding (\d+) log entries$"#)]
async fn archived_expired_session_with_entries(world: &mut MetricsWorld, session_id: String, count: u64) {
    world
        .log
        .ensure_session(&session_id, None, None, serde_json::json!({}));
    for i in 0..count {
        world
            .log
            .append(
                &session_id,
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
    world.log.archive_session(&session_id, -1).unwrap();
}

#[given(regex = r#"^an audit log with one denied call in session "([^"]+)"$"#)]
async fn one_denied_call(world: &mut MetricsWorld, session_id: String) {
    world
        .log
        .ensure_session(&session_id, None, None, serde_json::json!({}));
    world
        .log
        .append(
            &session_id,
            AppendFields {
                tool_name: "delete_file".to_string(),
                tool_args: serde_json::json!({}),
                decision: EvalDecision {
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
}

#[when("a dry-run retention sweep runs")]
async fn dry_run_sweep(world: &mut MetricsWorld) {
    world.last_sweep = Some(sweep_expired(&world.log, true));
}

#[when("a live retention sweep runs")]
async fn live_sweep(world: &mut MetricsWorld) {
    world.last_sweep = Some(sweep_expired(&world.log, false));
}

#[when("a compliance report is assembled for the last hour")]
async fn assemble(world: &mut MetricsWorld) {
    world.last_report = Some(assemble_report(
        &world.log,
        Utc::now() - chrono::Duration::hours(1),
        Utc::now() + chrono::Duration::hours(1),
        DetailLevel::Summary,
    ));
}

#[then(regex = r#"^the sweep reports "([^"]+)" as a candidate$"#)]
async fn sweep_reports_candidate(world: &mut MetricsWorld, session_id: String) {
    let sweep = world.last_sweep.as_ref().unwrap();
    assert!(sweep.candidates.contains(&session_id));
}

#[then(regex = r#"^the session "([^"]+)" still exists$"#)]
async fn session_still_exists(world: &mut MetricsWorld, session_id: String) {
    assert!(world.log.get_session_row(&session_id).is_some());
}

#[then(regex = r#"^the session "([^"]+)" no longer exists$"#)]
async fn session_gone(world: &mut MetricsWorld, session_id: String) {
    assert!(world.log.get_session_row(&session_id).is_none());
}

#[then(regex = r#"^the sweep reports a deleted count of (\d+)$"#)]
async fn sweep_reports_deleted_count(world: &mut MetricsWorld, count: u64) {
    let sweep = world.last_sweep.as_ref().unwrap();
    assert_eq!(sweep.deleted_count, count);
}

#[then(regex = r#"^the report shows (\d+) total call and (\d+) denied call$"#)]
async fn report_shows_counts(world: &mut MetricsWorld, total: u64, denied: u64) {
    let report = world.last_report.as_ref().unwrap();
    assert_eq!(report.total_calls, total);
    assert_eq!(report.denied, denied);
}

#[tokio::main]
async fn main() {
    MetricsWorld::run("tests/features").await;
}
