//! Audit Log benchmarks

use audit_log::{AppendFields, AuditLog};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use reaper_core::policy::{Decision, EvalDecision};

fn decision() -> EvalDecision {
    EvalDecision {
        action: Decision::Allow,
        rule_name: Some("rule".to_string()),
        reason: "matched".to_string(),
        policy_version_label: "v1".to_string(),
    }
}

fn benchmark_append(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let log = AuditLog::new(b"bench-secret".to_vec());
    let session_id = "bench-session".to_string();
    log.ensure_session(&session_id, None, None, serde_json::json!({}));

    c.bench_function("audit_log_append", |b| {
        b.to_async(&rt).iter(|| async {
            log.append(
                black_box(&session_id),
                AppendFields {
                    tool_name: "read_file".to_string(),
                    tool_args: serde_json::json!({"path": "/tmp/x"}),
                    decision: decision(),
                    bypass: false,
                },
            )
            .await
            .unwrap();
        })
    });
}

fn benchmark_verify(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let log = AuditLog::new(b"bench-secret".to_vec());
    let session_id = "bench-session-verify".to_string();
    log.ensure_session(&session_id, None, None, serde_json::json!({}));
    rt.block_on(async {
        for _ in 0..500 {
            log.append(
                &session_id,
                AppendFields {
                    tool_name: "read_file".to_string(),
                    tool_args: serde_json::json!({}),
                    decision: decision(),
                    bypass: false,
                },
            )
            .await
            .unwrap();
        }
    });

    c.bench_function("audit_log_verify_500_entries", |b| {
        b.iter(|| black_box(log.verify(None, None)))
    });
}

criterion_group!(benches, benchmark_append, benchmark_verify);
criterion_main!(benches);
