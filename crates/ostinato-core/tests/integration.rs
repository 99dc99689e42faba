//! End-to-end tests for the signal-graph engine: scheduling, cycle breaking,
//! polyphonic cloning, and oversampling.

use ostinato_core::operators::{Add, Multiply, Value};
use ostinato_core::{
    MAX_BLOCK_SIZE, NodeId, PolyF32, ProcessContext, Processor, SignalGraph,
};

/// One-pole smoother with an additive control offset. Stateful, so voice
/// clones must hold independent memory.
struct OnePole {
    state: PolyF32,
}

impl OnePole {
    const AUDIO: usize = 0;
    const OFFSET: usize = 1;

    fn new() -> Self {
        Self {
            state: PolyF32::ZERO,
        }
    }
}

impl Processor for OnePole {
    fn num_inputs(&self) -> usize {
        2
    }
    fn has_state(&self) -> bool {
        true
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let n = ctx.num_samples();
        let (inputs, mut outputs) = ctx.split();
        let audio = inputs.samples(Self::AUDIO, n);
        let offset = inputs.value(Self::OFFSET);
        let out = outputs.buffer_mut(0);
        for i in 0..n {
            let x = audio[i] + offset;
            self.state += (x - self.state) * PolyF32::splat(0.5);
            out[i] = self.state;
        }
    }
    fn clone_box(&self) -> Box<dyn Processor> {
        Box::new(Self { state: self.state })
    }
    fn reset(&mut self) {
        self.state = PolyF32::ZERO;
    }
}

/// Writes the running sample index; makes per-call sample counts observable.
struct RampCounter;

impl Processor for RampCounter {
    fn num_inputs(&self) -> usize {
        0
    }
    fn has_state(&self) -> bool {
        false
    }
    fn tracks_connected_inputs(&self) -> bool {
        false
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let n = ctx.num_samples();
        let (_, mut outputs) = ctx.split();
        let out = outputs.buffer_mut(0);
        for (i, sample) in out.iter_mut().enumerate().take(n) {
            *sample = PolyF32::splat(i as f32);
        }
    }
    fn clone_box(&self) -> Box<dyn Processor> {
        Box::new(RampCounter)
    }
}

fn add_to(graph: &mut SignalGraph, router: NodeId, kernel: Box<dyn Processor>) -> NodeId {
    let node = graph.create_processor(kernel);
    graph.add_processor(router, node).unwrap();
    node
}

fn position(order: &[NodeId], id: NodeId) -> usize {
    order.iter().position(|n| *n == id).unwrap()
}

#[test]
fn chain_orders_dependencies_before_consumers() {
    let mut graph = SignalGraph::new(48000.0);
    let root = graph.root();

    // Attach in an order that forces real reordering work.
    let sink = add_to(&mut graph, root, Box::new(Add::new()));
    let middle = add_to(&mut graph, root, Box::new(Add::new()));
    let source = add_to(&mut graph, root, Box::new(Value::new(1.0)));
    graph.connect(middle, 0, sink, 0).unwrap();
    graph.connect(source, 0, middle, 0).unwrap();

    let order = graph.global_order(root).unwrap();
    assert!(position(&order, source) < position(&order, middle));
    assert!(position(&order, middle) < position(&order, sink));

    graph.process(32);
    assert_eq!(graph.output(sink, 0).unwrap()[0], PolyF32::splat(1.0));
}

#[test]
fn cyclic_edge_becomes_one_block_delay() {
    let mut graph = SignalGraph::new(48000.0);
    let root = graph.root();

    // Accumulator: sum = source + sum's previous block.
    let source = add_to(&mut graph, root, Box::new(Value::new(1.0)));
    let sum = add_to(&mut graph, root, Box::new(Add::new()));
    graph.connect(source, 0, sum, 0).unwrap();
    let connection = graph.connect(sum, 0, sum, 1).unwrap();
    let feedback = connection.feedback.expect("cycle must break via feedback");

    const BLOCK: usize = 16;
    for block in 0..5 {
        graph.process(BLOCK);
        // The feedback emitted last block's total: zero on block 0.
        assert_eq!(
            graph.output(feedback, 0).unwrap()[0],
            PolyF32::splat(block as f32),
            "feedback should replay block {}'s value",
            block as i32 - 1
        );
        // Every sample of this block carries the accumulated total.
        let out = graph.output(sum, 0).unwrap();
        assert!(
            out[..BLOCK]
                .iter()
                .all(|s| *s == PolyF32::splat((block + 1) as f32))
        );
    }
}

#[test]
fn cycle_insertion_leaves_unrelated_order_untouched() {
    let mut graph = SignalGraph::new(48000.0);
    let root = graph.root();

    let a = add_to(&mut graph, root, Box::new(Value::new(1.0)));
    let b = add_to(&mut graph, root, Box::new(Add::new()));
    let c = add_to(&mut graph, root, Box::new(Add::new()));
    graph.connect(a, 0, b, 0).unwrap();
    graph.connect(b, 0, c, 0).unwrap();

    let p = add_to(&mut graph, root, Box::new(Add::new()));
    let q = add_to(&mut graph, root, Box::new(Add::new()));
    graph.connect(p, 0, q, 0).unwrap();

    let before = graph.global_order(root).unwrap();
    let connection = graph.connect(q, 0, p, 1).unwrap();
    assert!(connection.feedback.is_some());

    let after = graph.global_order(root).unwrap();
    for pair in [(a, b), (b, c)] {
        assert_eq!(
            position(&before, pair.0) < position(&before, pair.1),
            position(&after, pair.0) < position(&after, pair.1)
        );
    }
    assert_eq!(before, after, "feedback insertion must not reorder anything");
}

#[test]
fn disconnect_restores_feedback_set_and_order_validity() {
    let mut graph = SignalGraph::new(48000.0);
    let root = graph.root();

    let a = add_to(&mut graph, root, Box::new(Add::new()));
    let b = add_to(&mut graph, root, Box::new(Add::new()));
    let c = add_to(&mut graph, root, Box::new(Add::new()));
    graph.connect(a, 0, b, 0).unwrap();
    graph.connect(b, 0, c, 0).unwrap();

    // Cyclic connect + disconnect restores the graph exactly.
    let before = graph.global_order(root).unwrap();
    graph.connect(c, 0, a, 0).unwrap();
    assert_eq!(graph.feedback_count(root).unwrap(), 1);
    graph.disconnect(c, 0, a).unwrap();
    assert_eq!(graph.feedback_count(root).unwrap(), 0);
    assert_eq!(graph.global_order(root).unwrap(), before);

    // Acyclic connect + disconnect keeps the order valid for what remains.
    graph.connect(a, 0, c, 1).unwrap();
    graph.disconnect(a, 0, c).unwrap();
    let order = graph.global_order(root).unwrap();
    assert!(position(&order, a) < position(&order, b));
    assert!(position(&order, b) < position(&order, c));
    assert_eq!(graph.connected_inputs(c), 1);
}

#[test]
fn voice_clones_isolate_state_and_share_stateless_nodes() {
    const BLOCK: usize = 32;
    let mut graph = SignalGraph::new(48000.0);
    let root = graph.root();

    // Voice-invariant feeds live at the root scope.
    let source = add_to(&mut graph, root, Box::new(Value::new(1.0)));
    let coeff = add_to(&mut graph, root, Box::new(Value::new(0.5)));

    // The voice scope: shared stateless gain, per-voice offset and filter.
    let voices = graph.create_router(true);
    graph.add_processor(root, voices).unwrap();
    assert!(graph.is_polyphonic(voices));
    assert_eq!(graph.poly_router(voices), Some(voices));
    assert_eq!(graph.mono_router(voices), Some(root));

    let gain = add_to(&mut graph, voices, Box::new(Multiply::new()));
    let offset = add_to(&mut graph, voices, Box::new(Value::new(0.0)));
    let filter = add_to(&mut graph, voices, Box::new(OnePole::new()));
    graph.connect(source, 0, gain, 0).unwrap();
    graph.connect(coeff, 0, gain, 1).unwrap();
    graph.connect(gain, 0, filter, OnePole::AUDIO).unwrap();
    graph.connect(offset, 0, filter, OnePole::OFFSET).unwrap();

    // Cross-scope feeds must order the voice router after its sources.
    let order = graph.global_order(root).unwrap();
    assert!(position(&order, source) < position(&order, voices));
    assert!(position(&order, coeff) < position(&order, voices));

    let voice2 = graph.clone_voice(voices).unwrap();

    // First pass materializes the clone's local instances.
    graph.process(BLOCK);
    graph.process_router(voice2, BLOCK).unwrap();

    // Stateless gain is shared; stateful members are duplicated.
    assert_eq!(graph.voice_instance(voice2, gain), Some(gain));
    let offset2 = graph.voice_instance(voice2, offset).unwrap();
    let filter2 = graph.voice_instance(voice2, filter).unwrap();
    assert_ne!(offset2, offset);
    assert_ne!(filter2, filter);

    // Feed each voice a different constant.
    graph
        .operator_mut::<Value>(offset)
        .unwrap()
        .set(PolyF32::splat(0.25));
    graph
        .operator_mut::<Value>(offset2)
        .unwrap()
        .set(PolyF32::splat(0.75));

    for _ in 0..8 {
        graph.process(BLOCK);
        graph.process_router(voice2, BLOCK).unwrap();
    }

    let y1 = graph.output(filter, 0).unwrap()[BLOCK - 1];
    let y2 = graph.output(filter2, 0).unwrap()[BLOCK - 1];
    assert!((y1.lane(0) - 0.75).abs() < 1e-3, "voice 1 settles to 0.5 + 0.25");
    assert!((y2.lane(0) - 1.25).abs() < 1e-3, "voice 2 settles to 0.5 + 0.75");
    assert!((y1 - y2).abs().lane(0) > 0.4, "voices must stay independent");

    // A shared coefficient change reaches both voices on the next block.
    graph
        .operator_mut::<Value>(coeff)
        .unwrap()
        .set(PolyF32::splat(1.0));
    for _ in 0..8 {
        graph.process(BLOCK);
        graph.process_router(voice2, BLOCK).unwrap();
    }
    assert_eq!(graph.output(gain, 0).unwrap()[0], PolyF32::splat(1.0));
    let y1 = graph.output(filter, 0).unwrap()[BLOCK - 1];
    let y2 = graph.output(filter2, 0).unwrap()[BLOCK - 1];
    assert!((y1.lane(0) - 1.25).abs() < 1e-3);
    assert!((y2.lane(0) - 1.75).abs() < 1e-3);
}

#[test]
fn clones_converge_to_the_global_order_after_mutations() {
    const BLOCK: usize = 16;
    let mut graph = SignalGraph::new(48000.0);
    let root = graph.root();

    let voices = graph.create_router(true);
    graph.add_processor(root, voices).unwrap();
    let smoother = add_to(&mut graph, voices, Box::new(OnePole::new()));
    let shared = add_to(&mut graph, voices, Box::new(Add::new()));

    let voice2 = graph.clone_voice(voices).unwrap();
    graph.process_router(voice2, BLOCK).unwrap();
    assert_eq!(graph.local_order(voice2).unwrap().len(), 2);

    // Grow the lineage: the clone is stale until it next processes.
    let extra = add_to(&mut graph, voices, Box::new(OnePole::new()));
    assert_eq!(graph.local_order(voice2).unwrap().len(), 2);
    graph.process_router(voice2, BLOCK).unwrap();

    let global = graph.global_order(voices).unwrap();
    let local = graph.local_order(voice2).unwrap();
    assert_eq!(global.len(), local.len());
    for (proto, instance) in global.iter().zip(local.iter()) {
        assert_eq!(graph.voice_instance(voice2, *proto), Some(*instance));
    }
    let extra_instance = graph.voice_instance(voice2, extra).unwrap();
    assert_ne!(extra_instance, extra);
    assert_eq!(graph.voice_instance(voice2, shared), Some(shared));

    // Shrink it again: the clone garbage-collects its instance.
    graph.remove_processor(voices, extra).unwrap();
    graph.destroy_node(extra).unwrap();
    graph.process_router(voice2, BLOCK).unwrap();
    assert_eq!(graph.local_order(voice2).unwrap().len(), 1 + 1);
    assert_eq!(graph.voice_instance(voice2, extra), None);
    let _ = smoother;
}

#[test]
fn oversampled_subrouter_processes_proportionally_more_samples() {
    let mut graph = SignalGraph::new(48000.0);
    let root = graph.root();

    let sub = graph.create_router(false);
    graph.add_processor(root, sub).unwrap();
    let ramp = graph.create_processor(Box::new(RampCounter));
    graph.add_processor(sub, ramp).unwrap();
    graph.set_oversample(sub, 2).unwrap();
    assert_eq!(graph.oversample(ramp), 2);

    const BLOCK: usize = 32;
    graph.process(BLOCK);

    let out = graph.output(ramp, 0).unwrap();
    assert_eq!(out.len(), MAX_BLOCK_SIZE * 2);
    // The subrouter ran 2x the root block length.
    assert_eq!(out[2 * BLOCK - 1], PolyF32::splat((2 * BLOCK - 1) as f32));
}

#[test]
fn forced_disable_silences_output_for_any_block_size() {
    let mut graph = SignalGraph::new(48000.0);
    let root = graph.root();
    let source = add_to(&mut graph, root, Box::new(Value::new(0.8)));

    graph.process(64);
    assert_eq!(graph.output(source, 0).unwrap()[0], PolyF32::splat(0.8));

    graph.set_enabled(source, false).unwrap();
    assert!(!graph.enabled(source));
    assert!(
        graph
            .output(source, 0)
            .unwrap()
            .iter()
            .all(|s| *s == PolyF32::ZERO)
    );

    // The scheduler skips disabled nodes; the buffer stays silent.
    for block in [1usize, 17, 64, MAX_BLOCK_SIZE] {
        graph.process(block);
        assert!(
            graph
                .output(source, 0)
                .unwrap()
                .iter()
                .all(|s| *s == PolyF32::ZERO)
        );
    }
}

#[test]
fn idle_processors_get_configuration_but_never_run() {
    let mut graph = SignalGraph::new(48000.0);
    let root = graph.root();

    let idle = graph.create_processor(Box::new(Value::new(0.9)));
    graph.add_idle_processor(root, idle).unwrap();
    assert!(!graph.global_order(root).unwrap().contains(&idle));

    graph.process(64);
    assert!(
        graph
            .output(idle, 0)
            .unwrap()
            .iter()
            .all(|s| *s == PolyF32::ZERO),
        "idle nodes are excluded from scheduling"
    );

    graph.set_oversample(root, 2).unwrap();
    assert_eq!(graph.oversample(idle), 2, "idle nodes follow clock changes");
}

#[test]
fn reset_clears_voice_state() {
    const BLOCK: usize = 16;
    let mut graph = SignalGraph::new(48000.0);
    let root = graph.root();
    let source = add_to(&mut graph, root, Box::new(Value::new(1.0)));
    let filter = add_to(&mut graph, root, Box::new(OnePole::new()));
    graph.connect(source, 0, filter, OnePole::AUDIO).unwrap();

    for _ in 0..8 {
        graph.process(BLOCK);
    }
    assert!(graph.output(filter, 0).unwrap()[BLOCK - 1].lane(0) > 0.9);

    graph.reset(root);
    assert!(
        graph
            .output(filter, 0)
            .unwrap()
            .iter()
            .all(|s| *s == PolyF32::ZERO)
    );
    graph.process(BLOCK);
    // First sample after reset restarts the attack from zero.
    assert!((graph.output(filter, 0).unwrap()[0].lane(0) - 0.5).abs() < 1e-6);
}
