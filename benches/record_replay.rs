//! Benchmarks for record-replay hook overhead

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use retrace::exchange::UpstreamResponse;
use retrace::sink::channel;
use retrace::{ConfigHandle, InboundRequest, ReplayEngine};

fn upstream(i: usize) -> UpstreamResponse {
    UpstreamResponse {
        status: 200,
        status_message: "OK".to_string(),
        headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
        body: Bytes::from(format!("Response {i}")),
    }
}

fn bench_passthrough(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();
    let engine = ReplayEngine::new(ConfigHandle::default());
    let request = InboundRequest::new("GET", "/api/test");

    c.bench_function("passthrough_request", |b| {
        b.iter(|| {
            let (sink, _rx) = channel();
            black_box(engine.on_request(black_box(&request), sink));
        });
    });
}

fn bench_record_batch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();

    c.bench_function("record_100_requests", |b| {
        b.iter(|| {
            let engine = ReplayEngine::new(ConfigHandle::default());
            engine.set_requests("bench", vec![]).unwrap();
            engine.start("bench");

            for i in 0..100 {
                let request = InboundRequest::new("GET", format!("/api/test/{i}")).with_raw_body("");
                engine.on_response(&request, &upstream(i)).unwrap();
            }

            black_box(engine.stats());
        });
    });
}

fn bench_replay_fastest(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();

    let engine = ReplayEngine::new(ConfigHandle::default());
    engine.set_requests("bench", vec![]).unwrap();
    engine.start("bench");
    for i in 0..100 {
        let request = InboundRequest::new("GET", format!("/api/test/{i}"));
        engine.on_response(&request, &upstream(i)).unwrap();
    }
    engine.replay("bench");

    let request = InboundRequest::new("GET", "/api/test/99");

    c.bench_function("replay_fastest_request", |b| {
        b.iter(|| {
            let (sink, rx) = channel();
            black_box(engine.on_request(black_box(&request), sink));
            black_box(rx);
        });
    });
}

criterion_group!(
    benches,
    bench_passthrough,
    bench_record_batch,
    bench_replay_fastest
);
criterion_main!(benches);
