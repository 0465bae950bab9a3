//! Retention & compliance-report benchmarks

use audit_log::{AppendFields, AuditLog};
use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use metrics::{assemble_report, DetailLevel};
use reaper_core::policy::{Decision, EvalDecision};

fn seeded_log() -> AuditLog {
    let log = AuditLog::new(b"bench-secret".to_vec());
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        for i in 0..50 {
            let session_id = format!("session-{i}");
            log.ensure_session(&session_id, None, None, serde_json::json!({}));
            for _ in 0..10 {
                log.append(
                    &session_id,
                    AppendFields {
                        tool_name: "read_file".to_string(),
                        tool_args: serde_json::json!({}),
                        decision: EvalDecision {
                            action: Decision::Allow,
                            rule_name: None,
                            reason: "default".to_string(),
                            policy_version_label: "v1".to_string(),
                        },
                        bypass: false,
                    },
                )
                .await
                .unwrap();
            }
        }
    });
    log
}

fn benchmark_assemble_report(c: &mut Criterion) {
    let log = seeded_log();
    let start = Utc::now() - chrono::Duration::hours(1);
    let end = Utc::now() + chrono::Duration::hours(1);

    c.bench_function("assemble_report_500_entries", |b| {
        b.iter(|| {
            black_box(assemble_report(
                black_box(&log),
                start,
                end,
                DetailLevel::Summary,
            ))
        })
    });
}

criterion_group!(benches, benchmark_assemble_report);
criterion_main!(benches);
