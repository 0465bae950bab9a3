//! Subscription fan-out benchmarks

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use message_queue::{NotificationEvent, SubscriptionRegistry};
use reaper_core::entry::{LogEntry, OutcomeStatus};
use reaper_core::policy::Decision;
use uuid::Uuid;

fn sample_entry() -> LogEntry {
    LogEntry {
        id: Uuid::new_v4(),
        session_id: "bench-session".to_string(),
        seq_index: 0,
        timestamp: Utc::now(),
        tool_name: "read_file".to_string(),
        tool_args: serde_json::json!({}),
        policy_version_label: "v1".to_string(),
        decision: Decision::Allow,
        rule_name: None,
        reason: "matched".to_string(),
        status: OutcomeStatus::Pending,
        outcome: None,
        error_message: None,
        duration_ms: None,
        prev_hash: reaper_core::GENESIS_HASH.to_string(),
        own_hash: "deadbeef".to_string(),
        bypass: false,
    }
}

fn benchmark_publish_fanout(c: &mut Criterion) {
    let registry = SubscriptionRegistry::new();
    let session_id = "bench-session".to_string();
    let _subscriptions: Vec<_> = (0..50).map(|_| registry.subscribe(session_id.clone())).collect();

    c.bench_function("publish_to_50_subscribers", |b| {
        b.iter(|| {
            registry.publish(
                black_box(&session_id),
                NotificationEvent::Decision {
                    entry: sample_entry(),
                },
            )
        })
    });
}

criterion_group!(benches, benchmark_publish_fanout);
criterion_main!(benches);
