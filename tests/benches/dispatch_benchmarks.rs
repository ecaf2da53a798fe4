//! # Dispatch Benchmarks
//!
//! | Path | What is measured |
//! |------|------------------|
//! | local | `send` to a subject with N local handlers |
//! | fan-out | `send` to a subject with N remote queues |
//! | directed | `send` addressed to one session |

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use server_bus::{
    BusConfig, DeliveryFailure, LocalSession, Message, MessageQueue, ServerBus, SessionRef,
};
use tokio::runtime::Runtime;

fn bench_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime")
}

fn bench_bus(runtime: &Runtime) -> ServerBus {
    let config = BusConfig {
        queue_size: 1 << 20,
        housekeeping_interval: Duration::from_secs(3600),
        stale_window: Duration::from_secs(3600),
        ..BusConfig::default()
    };
    let bus = ServerBus::with_runtime(config, runtime.handle().clone()).expect("valid config");
    bus.set_failure_handler(Arc::new(|_: &ServerBus, _: DeliveryFailure| {}));
    bus
}

/// Connected queue with the handshake finished.
fn active_queue(bus: &ServerBus, id: &str) -> Arc<MessageQueue> {
    let session: SessionRef = LocalSession::new(id);
    let queue = bus.connect(session);
    queue.finish_init();
    queue
}

// ============================================================================
// LOCAL DISPATCH
// ============================================================================

fn bench_local_dispatch(c: &mut Criterion) {
    let runtime = bench_runtime();
    let mut group = c.benchmark_group("dispatch-local");

    for handlers in [1usize, 8, 64] {
        let bus = bench_bus(&runtime);
        for _ in 0..handlers {
            bus.subscribe("Bench", |_, message| {
                black_box(message.id());
                Ok(())
            })
            .expect("subscribe");
        }

        group.throughput(Throughput::Elements(handlers as u64));
        group.bench_with_input(BenchmarkId::new("handlers", handlers), &bus, |b, bus| {
            b.iter(|| bus.send(Message::new("Bench").with("n", 1)))
        });
        bus.stop();
    }

    group.finish();
}

// ============================================================================
// REMOTE FAN-OUT
// ============================================================================

fn bench_remote_fan_out(c: &mut Criterion) {
    let runtime = bench_runtime();
    let mut group = c.benchmark_group("dispatch-fan-out");

    for peers in [1usize, 16, 128] {
        let bus = bench_bus(&runtime);
        let queues: Vec<Arc<MessageQueue>> = (0..peers)
            .map(|i| {
                let queue = active_queue(&bus, &format!("peer-{i}"));
                bus.remote_subscribe(queue.session_id(), "Feed")
                    .expect("remote subscribe");
                queue
            })
            .collect();

        group.throughput(Throughput::Elements(peers as u64));
        group.bench_with_input(BenchmarkId::new("queues", peers), &bus, |b, bus| {
            b.iter(|| {
                bus.send(Message::new("Feed")).expect("send");
                for queue in &queues {
                    black_box(queue.poll(usize::MAX));
                }
            })
        });
        bus.stop();
    }

    group.finish();
}

// ============================================================================
// DIRECTED
// ============================================================================

fn bench_directed(c: &mut Criterion) {
    let runtime = bench_runtime();
    let bus = bench_bus(&runtime);
    let queue = active_queue(&bus, "target");
    let session = bus.session(queue.session_id()).expect("session");

    c.bench_function("dispatch-directed", |b| {
        b.iter(|| {
            bus.send(Message::new("Direct").with_session(Arc::clone(&session)))
                .expect("send");
            black_box(queue.poll(usize::MAX));
        })
    });
    bus.stop();
}

criterion_group!(
    benches,
    bench_local_dispatch,
    bench_remote_fan_out,
    bench_directed
);
criterion_main!(benches);
