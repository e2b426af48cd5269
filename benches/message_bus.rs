//! Benchmarks for the message bus and scheduler hot paths.
//!
//! Run with: cargo bench --bench message_bus

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use agentmesh::agent::FnBehavior;
use agentmesh::bus::{AgentMessage, MessageBus};
use agentmesh::config::Config;
use agentmesh::providers::ScriptedProvider;
use agentmesh::runtime::{AgentRuntime, AgentSpec};
use agentmesh::scheduler::MessageScheduler;

fn bench_send_receive(c: &mut Criterion) {
    let mut group = c.benchmark_group("bus_send_receive");
    for agents in [1usize, 16, 256] {
        let ids: Vec<String> = (0..agents).map(|i| format!("agent-{}", i)).collect();
        group.throughput(Throughput::Elements(agents as u64));
        group.bench_with_input(BenchmarkId::from_parameter(agents), &ids, |b, ids| {
            let bus = MessageBus::new();
            b.iter(|| {
                for id in ids {
                    bus.send(AgentMessage::text("user", id, "ping"));
                }
                for id in ids {
                    black_box(bus.receive_next(id));
                }
            });
        });
    }
    group.finish();
}

fn bench_interruption_path(c: &mut Criterion) {
    c.bench_function("bus_send_to_active_agent", |b| {
        let bus = MessageBus::new();
        bus.active_set().try_activate("busy");
        let active = bus.active_set().clone();
        bus.set_interruption_listener(Arc::new(move |msg: AgentMessage| {
            let to = msg.to.clone();
            active.add_interruption(&to, msg).err()
        }));
        b.iter(|| {
            bus.send(AgentMessage::text("user", "busy", "urgent"));
            black_box(bus.active_set().take_interruptions("busy"));
        });
    });
}

fn bench_delayed_delivery(c: &mut Criterion) {
    c.bench_function("bus_force_deliver_1000_delayed", |b| {
        b.iter(|| {
            let bus = MessageBus::new();
            for i in 0..1000u64 {
                bus.send(AgentMessage::text("user", "a", "later").with_delay_ms(60_000 + i));
            }
            black_box(bus.force_deliver_all_delayed());
        });
    });
}

fn bench_scheduler_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("scheduler_run");
    group.sample_size(20);
    for messages in [100usize, 1000] {
        group.throughput(Throughput::Elements(messages as u64));
        group.bench_with_input(BenchmarkId::from_parameter(messages), &messages, |b, &n| {
            b.to_async(&rt).iter(|| async move {
                let mut config = Config::default();
                config.scheduler.idle_ticks_to_complete = 1;
                config.scheduler.idle_wait_ms = 1;
                config.scheduler.busy_backoff_ms = 0;
                let runtime = AgentRuntime::builder(config)
                    .provider(Arc::new(ScriptedProvider::new()))
                    .default_behavior(Arc::new(FnBehavior::noop()))
                    .build()
                    .unwrap();
                for i in 0..8 {
                    runtime
                        .spawn_agent(AgentSpec::new("worker").with_id(&format!("w{}", i)))
                        .await
                        .unwrap();
                }
                for i in 0..n {
                    runtime
                        .send_message("user", &format!("w{}", i % 8), "job", None)
                        .unwrap();
                }
                let scheduler = MessageScheduler::new(runtime);
                black_box(scheduler.run(None).await);
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_send_receive,
    bench_interruption_path,
    bench_delayed_delivery,
    bench_scheduler_throughput
);
criterion_main!(benches);
