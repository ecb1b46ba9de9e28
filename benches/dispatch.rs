//! Hot-path benchmarks: request id generation, frame parsing and fan-out.
//!
//! Run with: cargo bench --bench dispatch
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use probe_link::Frame;
use probe_link::dispatch::Router;
use probe_link::transport::RequestIdGenerator;

// ============================================================================
// Fixtures
// ============================================================================

const RESPONSE: &str = r#"{"cmd":"dipOneChannelResponse","code":0,"requestId":"81234567890","to":{"type":1,"id":"42"},"data":[{"ch":1,"v":0.25},{"ch":2,"v":0.5}]}"#;

const LISTENER_COUNTS: &[usize] = &[1, 16, 128];

// ============================================================================
// Benchmark: Request Ids
// ============================================================================

fn bench_request_ids(c: &mut Criterion) {
    let mut ids = RequestIdGenerator::with_instance(7);
    c.bench_function("request_id/next", |b| b.iter(|| black_box(ids.next_id())));
}

// ============================================================================
// Benchmark: Frame Parsing
// ============================================================================

fn bench_parse(c: &mut Criterion) {
    c.bench_function("frame/parse", |b| {
        b.iter(|| Frame::parse(black_box(RESPONSE)).expect("valid frame"))
    });
}

// ============================================================================
// Benchmark: Router Fan-out
// ============================================================================

fn bench_dispatch(c: &mut Criterion) {
    let frame = Frame::parse(RESPONSE).expect("valid frame");
    let mut group = c.benchmark_group("router_dispatch");

    for &count in LISTENER_COUNTS {
        let router = Router::new();
        let hits = Arc::new(AtomicU64::new(0));
        let handles: Vec<_> = (0..count)
            .map(|_| {
                let hits = Arc::clone(&hits);
                router.on_cmd("dipOneChannelResponse", move |_| {
                    hits.fetch_add(1, Ordering::Relaxed);
                })
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("on_cmd", count), &count, |b, _| {
            b.iter(|| router.dispatch(black_box(&frame)));
        });

        for handle in handles {
            handle.unsubscribe();
        }
    }

    group.finish();
}

criterion_group!(benches, bench_request_ids, bench_parse, bench_dispatch);
criterion_main!(benches);
