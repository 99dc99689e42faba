//! Criterion benchmarks for the signal-graph engine.
//!
//! Measures scheduler overhead independently of DSP cost using trivial
//! arithmetic kernels. Three axes:
//!
//! - **Mutate** — connect + incremental reorder on growing chains
//! - **Execute** — `process()` throughput at varying block sizes
//! - **Voices** — polyphonic clone scaling with shared stateless nodes
//!
//! Run with: `cargo bench -p ostinato-core -- graph/`
#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ostinato_core::operators::{Add, SmoothMultiply, Value};
use ostinato_core::{NodeId, SignalGraph};

const SAMPLE_RATE: f32 = 48000.0;
const BLOCK_SIZES: &[usize] = &[16, 32, 64, 128];

// ---------------------------------------------------------------------------
// Graph constructors
// ---------------------------------------------------------------------------

fn make_chain(length: usize) -> (SignalGraph, NodeId) {
    let mut graph = SignalGraph::new(SAMPLE_RATE);
    let root = graph.root();
    let source = graph.create_processor(Box::new(Value::new(0.5)));
    graph.add_processor(root, source).unwrap();

    let mut prev = source;
    for _ in 0..length {
        let node = graph.create_processor(Box::new(Add::new()));
        graph.add_processor(root, node).unwrap();
        graph.connect(prev, 0, node, 0).unwrap();
        prev = node;
    }
    (graph, prev)
}

fn make_voices(voice_count: usize) -> (SignalGraph, Vec<NodeId>) {
    let mut graph = SignalGraph::new(SAMPLE_RATE);
    let root = graph.root();
    let source = graph.create_processor(Box::new(Value::new(1.0)));
    let magnitude = graph.create_processor(Box::new(Value::new(0.5)));
    graph.add_processor(root, source).unwrap();
    graph.add_processor(root, magnitude).unwrap();

    let voices = graph.create_router(true);
    graph.add_processor(root, voices).unwrap();
    let offset = graph.create_processor(Box::new(Value::new(0.1)));
    let mix = graph.create_processor(Box::new(Add::new()));
    let amp = graph.create_processor(Box::new(SmoothMultiply::new()));
    for node in [offset, mix, amp] {
        graph.add_processor(voices, node).unwrap();
    }
    graph.connect(source, 0, mix, 0).unwrap();
    graph.connect(offset, 0, mix, 1).unwrap();
    graph.connect(mix, 0, amp, SmoothMultiply::AUDIO).unwrap();
    graph
        .connect(magnitude, 0, amp, SmoothMultiply::MAGNITUDE)
        .unwrap();

    let mut instances = vec![voices];
    for _ in 1..voice_count {
        instances.push(graph.clone_voice(voices).unwrap());
    }
    // Materialize every voice before measuring.
    graph.process(64);
    for &voice in &instances[1..] {
        graph.process_router(voice, 64).unwrap();
    }
    (graph, instances)
}

// ---------------------------------------------------------------------------
// Mutation benchmarks
// ---------------------------------------------------------------------------

fn bench_mutate(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/mutate");

    for &length in &[5usize, 20] {
        group.bench_function(BenchmarkId::new("build_chain", length), |b| {
            b.iter(|| {
                let (graph, sink) = make_chain(length);
                black_box((graph.node_count(), sink));
            });
        });
    }

    // Cyclic connect + disconnect: feedback insertion and garbage collection.
    group.bench_function("feedback_round_trip", |b| {
        let (mut graph, sink) = make_chain(8);
        b.iter(|| {
            let connection = graph.connect(sink, 0, sink, 1).unwrap();
            black_box(connection.feedback);
            graph.disconnect(sink, 0, sink).unwrap();
        });
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Execute benchmarks
// ---------------------------------------------------------------------------

fn bench_execute(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/execute");

    for &length in &[5usize, 20] {
        let (mut graph, sink) = make_chain(length);
        graph.process(64);
        group.bench_function(BenchmarkId::new("chain_block64", length), |b| {
            b.iter(|| {
                graph.process(black_box(64));
                black_box(graph.output(sink, 0));
            });
        });
    }

    group.finish();
}

fn bench_block_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/block_sweep");

    for &block_size in BLOCK_SIZES {
        let (mut graph, sink) = make_chain(5);
        graph.process(block_size);
        group.bench_with_input(
            BenchmarkId::new("chain_5", block_size),
            &block_size,
            |b, &block_size| {
                b.iter(|| {
                    graph.process(black_box(block_size));
                    black_box(graph.output(sink, 0));
                });
            },
        );
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Voice scaling
// ---------------------------------------------------------------------------

fn bench_voices(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/voices");

    for &voice_count in &[1usize, 4, 8] {
        let (mut graph, instances) = make_voices(voice_count);
        group.bench_with_input(
            BenchmarkId::new("block64", voice_count),
            &voice_count,
            |b, _| {
                b.iter(|| {
                    graph.process(black_box(64));
                    for &voice in &instances[1..] {
                        graph.process_router(voice, 64).unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

criterion_group!(
    benches,
    bench_mutate,
    bench_execute,
    bench_block_sweep,
    bench_voices
);
criterion_main!(benches);
