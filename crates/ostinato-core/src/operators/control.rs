//! Control-rate operator family.
//!
//! Control-rate nodes produce one value per block (index 0 of their output
//! buffer) and read their inputs the same way. Smoothing here happens
//! per block rather than per sample; consumers that need sample-accurate
//! ramps pair a control signal with an audio-rate smoother such as
//! [`SmoothMultiply`](super::SmoothMultiply).

#[cfg(not(feature = "std"))]
use alloc::boxed::Box;

use libm::expf;

use crate::graph::{ProcessContext, Processor};
use crate::simd::PolyF32;
use crate::tempo::index_to_division;

/// A settable control-rate constant.
pub struct Value {
    value: PolyF32,
}

impl Value {
    /// Creates a control source producing `value` on every lane.
    pub fn new(value: f32) -> Self {
        Self {
            value: PolyF32::splat(value),
        }
    }

    /// Creates a control source with an explicit lane pattern.
    pub fn with_poly(value: PolyF32) -> Self {
        Self { value }
    }

    /// Replaces the produced value.
    pub fn set(&mut self, value: PolyF32) {
        self.value = value;
    }

    /// The current value.
    pub fn get(&self) -> PolyF32 {
        self.value
    }
}

impl Processor for Value {
    fn num_inputs(&self) -> usize {
        0
    }
    fn is_control_rate(&self) -> bool {
        true
    }
    fn has_state(&self) -> bool {
        true
    }
    fn tracks_connected_inputs(&self) -> bool {
        false
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let value = self.value;
        let (_, mut outputs) = ctx.split();
        outputs.set_value(0, value);
    }
    fn clone_box(&self) -> Box<dyn Processor> {
        Box::new(Self { value: self.value })
    }
}

macro_rules! control_binary {
    ($(#[$doc:meta])* $name:ident, $op:tt) => {
        $(#[$doc])*
        #[derive(Default)]
        pub struct $name;

        impl $name {
            /// Creates the operator.
            pub fn new() -> Self {
                Self
            }
        }

        impl Processor for $name {
            fn num_inputs(&self) -> usize {
                2
            }
            fn is_control_rate(&self) -> bool {
                true
            }
            fn has_state(&self) -> bool {
                false
            }
            fn process(&mut self, ctx: &mut ProcessContext<'_>) {
                let (inputs, mut outputs) = ctx.split();
                let result = inputs.value(0) $op inputs.value(1);
                outputs.set_value(0, result);
            }
            fn clone_box(&self) -> Box<dyn Processor> {
                Box::new(Self)
            }
        }
    };
}

control_binary!(
    /// Per-block sum of two control signals.
    Add, +
);
control_binary!(
    /// Per-block product of two control signals.
    Multiply, *
);

/// Clamps a control signal into a fixed range.
pub struct Clamp {
    min: f32,
    max: f32,
}

impl Clamp {
    /// Creates a clamp over `[min, max]`.
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }
}

impl Default for Clamp {
    fn default() -> Self {
        Self::new(-1.0, 1.0)
    }
}

impl Processor for Clamp {
    fn num_inputs(&self) -> usize {
        1
    }
    fn is_control_rate(&self) -> bool {
        true
    }
    fn has_state(&self) -> bool {
        false
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let (min, max) = (self.min, self.max);
        let (inputs, mut outputs) = ctx.split();
        outputs.set_value(0, inputs.value(0).clamp(min, max));
    }
    fn clone_box(&self) -> Box<dyn Processor> {
        Box::new(Self {
            min: self.min,
            max: self.max,
        })
    }
}

/// Per-block linear interpolation of two control signals.
#[derive(Default)]
pub struct Interpolate;

impl Interpolate {
    /// Signal at fraction 0.
    pub const FROM: usize = 0;
    /// Signal at fraction 1.
    pub const TO: usize = 1;
    /// Crossfade position.
    pub const FRACTION: usize = 2;

    /// Creates the operator.
    pub fn new() -> Self {
        Self
    }
}

impl Processor for Interpolate {
    fn num_inputs(&self) -> usize {
        3
    }
    fn is_control_rate(&self) -> bool {
        true
    }
    fn has_state(&self) -> bool {
        false
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let (inputs, mut outputs) = ctx.split();
        let result = PolyF32::interpolate(
            inputs.value(Self::FROM),
            inputs.value(Self::TO),
            inputs.value(Self::FRACTION),
        );
        outputs.set_value(0, result);
    }
    fn clone_box(&self) -> Box<dyn Processor> {
        Box::new(Self)
    }
}

/// One-pole smoother toward a control target, advanced once per block.
///
/// Same recurrence as a per-sample exponential smoother
/// (`current += coeff * (target - current)`), with the coefficient expressed
/// in blocks.
pub struct SmoothValue {
    current: PolyF32,
    coeff: f32,
}

impl SmoothValue {
    /// Control-rate target input.
    pub const TARGET: usize = 0;

    /// Creates a smoother resting at `initial` with a ~4-block half time.
    pub fn new(initial: f32) -> Self {
        let mut smoother = Self {
            current: PolyF32::splat(initial),
            coeff: 0.0,
        };
        smoother.set_half_time_blocks(4.0);
        smoother
    }

    /// Sets the smoothing speed as the number of blocks to cover ~63% of the
    /// remaining distance. Zero disables smoothing.
    pub fn set_half_time_blocks(&mut self, blocks: f32) {
        if blocks <= 0.0 {
            self.coeff = 1.0;
        } else {
            self.coeff = 1.0 - expf(-1.0 / blocks);
        }
    }

    /// The current smoothed value.
    pub fn get(&self) -> PolyF32 {
        self.current
    }
}

impl Processor for SmoothValue {
    fn num_inputs(&self) -> usize {
        1
    }
    fn is_control_rate(&self) -> bool {
        true
    }
    fn has_state(&self) -> bool {
        true
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let coeff = self.coeff;
        let (inputs, mut outputs) = ctx.split();
        let target = inputs.value(Self::TARGET);
        self.current += (target - self.current) * PolyF32::splat(coeff);
        outputs.set_value(0, self.current);
    }
    fn clone_box(&self) -> Box<dyn Processor> {
        Box::new(Self {
            current: self.current,
            coeff: self.coeff,
        })
    }
    fn reset(&mut self) {
        self.current = PolyF32::ZERO;
    }
}

/// Chooses between a free-running frequency and a tempo-locked one.
///
/// In free mode the frequency input passes through untouched. In the synced
/// modes the output is derived from the beat clock and the selected note
/// division, with dotted and triplet styles scaling the division length.
#[derive(Default)]
pub struct TempoChooser;

impl TempoChooser {
    /// Free-running frequency in Hz.
    pub const FREQUENCY: usize = 0;
    /// Sync style: one of the `*_MODE` constants, read from lane 0.
    pub const SYNC: usize = 1;
    /// Index into [`DIVISIONS`](crate::tempo::DIVISIONS).
    pub const TEMPO_INDEX: usize = 2;
    /// Host beat clock in beats per second.
    pub const BEATS_PER_SECOND: usize = 3;

    /// Pass the frequency input through.
    pub const FREE_MODE: usize = 0;
    /// Straight division sync.
    pub const STRAIGHT_MODE: usize = 1;
    /// Dotted division sync (1.5x the beats).
    pub const DOTTED_MODE: usize = 2;
    /// Triplet division sync (2/3 the beats).
    pub const TRIPLET_MODE: usize = 3;

    /// Creates the operator.
    pub fn new() -> Self {
        Self
    }
}

impl Processor for TempoChooser {
    fn num_inputs(&self) -> usize {
        4
    }
    fn is_control_rate(&self) -> bool {
        true
    }
    fn has_state(&self) -> bool {
        false
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let (inputs, mut outputs) = ctx.split();
        let mode = inputs.value(Self::SYNC).lane(0).max(0.0) as usize;
        if mode == Self::FREE_MODE {
            let frequency = inputs.value(Self::FREQUENCY);
            outputs.set_value(0, frequency);
            return;
        }
        let index = inputs.value(Self::TEMPO_INDEX).lane(0).max(0.0) as usize;
        let mut beats = index_to_division(index).beats();
        match mode {
            Self::DOTTED_MODE => beats *= 1.5,
            Self::TRIPLET_MODE => beats *= 2.0 / 3.0,
            _ => {}
        }
        let beats_per_second = inputs.value(Self::BEATS_PER_SECOND);
        outputs.set_value(0, beats_per_second * PolyF32::splat(1.0 / beats));
    }
    fn clone_box(&self) -> Box<dyn Processor> {
        Box::new(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tempo::{NoteDivision, division_to_index};
    use crate::{NodeId, SignalGraph};

    fn control_graph(
        kernels: impl IntoIterator<Item = Box<dyn Processor>>,
    ) -> (SignalGraph, Vec<NodeId>) {
        let mut graph = SignalGraph::new(48000.0);
        let root = graph.root();
        let nodes = kernels
            .into_iter()
            .map(|kernel| {
                let id = graph.create_processor(kernel);
                graph.add_processor(root, id).unwrap();
                id
            })
            .collect();
        (graph, nodes)
    }

    #[test]
    fn control_ops_touch_only_index_zero() {
        let (mut graph, nodes) = control_graph([
            Box::new(Value::new(2.0)) as Box<dyn Processor>,
            Box::new(Value::new(3.0)),
            Box::new(Multiply::new()),
        ]);
        let product = nodes[2];
        graph.connect(nodes[0], 0, product, 0).unwrap();
        graph.connect(nodes[1], 0, product, 1).unwrap();

        graph.process(64);
        let out = graph.output(product, 0).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], PolyF32::splat(6.0));
    }

    #[test]
    fn smooth_value_converges_over_blocks() {
        let (mut graph, nodes) = control_graph([
            Box::new(Value::new(1.0)) as Box<dyn Processor>,
            Box::new(SmoothValue::new(0.0)),
        ]);
        let smoother = nodes[1];
        graph
            .connect(nodes[0], 0, smoother, SmoothValue::TARGET)
            .unwrap();

        graph.process(64);
        let first = graph.output(smoother, 0).unwrap()[0].lane(0);
        assert!(first > 0.0 && first < 1.0);

        for _ in 0..64 {
            graph.process(64);
        }
        let settled = graph.output(smoother, 0).unwrap()[0].lane(0);
        assert!((settled - 1.0).abs() < 1e-3);
    }

    #[test]
    fn tempo_chooser_free_mode_passes_frequency() {
        let (mut graph, nodes) = control_graph([
            Box::new(Value::new(5.5)) as Box<dyn Processor>,
            Box::new(Value::new(TempoChooser::FREE_MODE as f32)),
            Box::new(Value::new(0.0)),
            Box::new(Value::new(2.0)),
            Box::new(TempoChooser::new()),
        ]);
        let chooser = nodes[4];
        graph
            .connect(nodes[0], 0, chooser, TempoChooser::FREQUENCY)
            .unwrap();
        graph.connect(nodes[1], 0, chooser, TempoChooser::SYNC).unwrap();
        graph
            .connect(nodes[2], 0, chooser, TempoChooser::TEMPO_INDEX)
            .unwrap();
        graph
            .connect(nodes[3], 0, chooser, TempoChooser::BEATS_PER_SECOND)
            .unwrap();

        graph.process(32);
        assert_eq!(graph.output(chooser, 0).unwrap()[0], PolyF32::splat(5.5));
    }

    #[test]
    fn tempo_chooser_sync_modes() {
        let quarter = division_to_index(NoteDivision::Quarter) as f32;
        let (mut graph, nodes) = control_graph([
            Box::new(Value::new(0.0)) as Box<dyn Processor>,
            Box::new(Value::new(TempoChooser::STRAIGHT_MODE as f32)),
            Box::new(Value::new(quarter)),
            Box::new(Value::new(2.0)),
            Box::new(TempoChooser::new()),
        ]);
        let chooser = nodes[4];
        graph
            .connect(nodes[0], 0, chooser, TempoChooser::FREQUENCY)
            .unwrap();
        graph.connect(nodes[1], 0, chooser, TempoChooser::SYNC).unwrap();
        graph
            .connect(nodes[2], 0, chooser, TempoChooser::TEMPO_INDEX)
            .unwrap();
        graph
            .connect(nodes[3], 0, chooser, TempoChooser::BEATS_PER_SECOND)
            .unwrap();

        // 2 beats/s, quarter note: 2 Hz straight.
        graph.process(32);
        assert!((graph.output(chooser, 0).unwrap()[0].lane(0) - 2.0).abs() < 1e-5);

        // Dotted quarter: 1.5 beats, so 2 / 1.5 Hz.
        graph
            .operator_mut::<Value>(nodes[1])
            .unwrap()
            .set(PolyF32::splat(TempoChooser::DOTTED_MODE as f32));
        graph.process(32);
        assert!((graph.output(chooser, 0).unwrap()[0].lane(0) - 2.0 / 1.5).abs() < 1e-5);

        // Triplet quarter: 2/3 beats, so 3 Hz.
        graph
            .operator_mut::<Value>(nodes[1])
            .unwrap()
            .set(PolyF32::splat(TempoChooser::TRIPLET_MODE as f32));
        graph.process(32);
        assert!((graph.output(chooser, 0).unwrap()[0].lane(0) - 3.0).abs() < 1e-5);
    }
}
