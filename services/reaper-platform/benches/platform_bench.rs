//! Compliance report assembly over a populated audit log — the most
//! expensive read path the control plane exposes, since it walks every
//! session and entry in the requested range.

use audit_log::{AppendFields, AuditLog};
use criterion::{criterion_group, criterion_main, Criterion};
use metrics::{assemble_report, DetailLevel};
use reaper_core::policy::Decision;
use serde_json::json;

fn seed(rt: &tokio::runtime::Runtime, log: &AuditLog, sessions: usize, entries_per_session: usize) {
    rt.block_on(async {
        for s in 0..sessions {
            let session_id = format!("session-{s}");
            log.ensure_session(&session_id, Some("bench-agent".to_string()), None, json!({}));
            for _ in 0..entries_per_session {
                log.append(
                    &session_id,
                    AppendFields {
                        tool_name: "read_file".to_string(),
                        tool_args: json!({}),
                        decision: reaper_core::policy::EvalDecision {
                            action: Decision::Allow,
                            rule_name: Some("allow-read".to_string()),
                            reason: "matched".to_string(),
                            policy_version_label: "bench".to_string(),
                        },
                        bypass: false,
                    },
                )
                .await
                .unwrap();
            }
        }
    });
}

fn bench_report(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let log = AuditLog::new(b"bench-secret".to_vec());
    seed(&rt, &log, 50, 20);

    let end = chrono::Utc::now();
    let start = end - chrono::Duration::days(1);

    c.bench_function("assemble_report_detailed", |b| {
        b.iter(|| assemble_report(&log, start, end, DetailLevel::Detailed));
    });
}

criterion_group!(benches, bench_report);
criterion_main!(benches);
