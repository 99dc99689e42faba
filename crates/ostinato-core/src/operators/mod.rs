//! Audio-rate operator catalog.
//!
//! Every operator implements the [`Processor`] contract: fixed arity
//! declared at construction, `process` written purely in terms of the
//! context's input/output views, a truthful `has_state`, and a `clone_box`
//! returning a functionally identical detached copy. Control-rate variants
//! live in [`control`].
//!
//! Arithmetic operators are stateless and shared across polyphonic voices;
//! anything carrying smoothing or accumulation state declares
//! `has_state() == true` and is cloned per voice.

#[cfg(not(feature = "std"))]
use alloc::boxed::Box;

use libm::{cosf, sinf};

use crate::graph::{ProcessContext, Processor};
use crate::simd::PolyF32;

pub mod control;

/// A settable constant source.
///
/// Holds per-voice state so each voice of a polyphonic scope can be driven
/// with an independent value (see
/// [`SignalGraph::voice_instance`](crate::SignalGraph::voice_instance)).
pub struct Value {
    value: PolyF32,
}

impl Value {
    /// Creates a source producing `value` on every lane.
    pub fn new(value: f32) -> Self {
        Self {
            value: PolyF32::splat(value),
        }
    }

    /// Creates a source producing an explicit lane pattern.
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
    fn has_state(&self) -> bool {
        true
    }
    fn tracks_connected_inputs(&self) -> bool {
        false
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let value = self.value;
        let (_, mut outputs) = ctx.split();
        for sample in outputs.buffer_mut(0).iter_mut() {
            *sample = value;
        }
    }
    fn clone_box(&self) -> Box<dyn Processor> {
        Box::new(Self { value: self.value })
    }
}

macro_rules! stateless_binary {
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
            fn has_state(&self) -> bool {
                false
            }
            fn process(&mut self, ctx: &mut ProcessContext<'_>) {
                let n = ctx.num_samples();
                let (inputs, mut outputs) = ctx.split();
                let a = inputs.samples(0, n);
                let b = inputs.samples(1, n);
                let out = outputs.buffer_mut(0);
                for i in 0..n {
                    out[i] = a[i] $op b[i];
                }
            }
            fn clone_box(&self) -> Box<dyn Processor> {
                Box::new(Self)
            }
        }
    };
}

stateless_binary!(
    /// Samplewise sum of two inputs.
    Add, +
);
stateless_binary!(
    /// Samplewise difference of two inputs.
    Subtract, -
);
stateless_binary!(
    /// Samplewise product of two inputs.
    Multiply, *
);

/// Samplewise negation.
#[derive(Default)]
pub struct Negate;

impl Negate {
    /// Creates the operator.
    pub fn new() -> Self {
        Self
    }
}

impl Processor for Negate {
    fn num_inputs(&self) -> usize {
        1
    }
    fn has_state(&self) -> bool {
        false
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let n = ctx.num_samples();
        let (inputs, mut outputs) = ctx.split();
        let input = inputs.samples(0, n);
        let out = outputs.buffer_mut(0);
        for i in 0..n {
            out[i] = -input[i];
        }
    }
    fn clone_box(&self) -> Box<dyn Processor> {
        Box::new(Self)
    }
}

/// Clamps every sample into a fixed range.
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
    fn has_state(&self) -> bool {
        false
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let n = ctx.num_samples();
        let (inputs, mut outputs) = ctx.split();
        let input = inputs.samples(0, n);
        let out = outputs.buffer_mut(0);
        for i in 0..n {
            out[i] = input[i].clamp(self.min, self.max);
        }
    }
    fn clone_box(&self) -> Box<dyn Processor> {
        Box::new(Self {
            min: self.min,
            max: self.max,
        })
    }
}

/// Linear crossfade of two signals by a third.
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
    fn has_state(&self) -> bool {
        false
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let n = ctx.num_samples();
        let (inputs, mut outputs) = ctx.split();
        let from = inputs.samples(Self::FROM, n);
        let to = inputs.samples(Self::TO, n);
        let fraction = inputs.samples(Self::FRACTION, n);
        let out = outputs.buffer_mut(0);
        for i in 0..n {
            out[i] = PolyF32::interpolate(from[i], to[i], fraction[i]);
        }
    }
    fn clone_box(&self) -> Box<dyn Processor> {
        Box::new(Self)
    }
}

/// Two-dimensional interpolation between four corner signals.
#[derive(Default)]
pub struct BilinearInterpolate;

impl BilinearInterpolate {
    /// Corner at (0, 0).
    pub const TOP_LEFT: usize = 0;
    /// Corner at (1, 0).
    pub const TOP_RIGHT: usize = 1;
    /// Corner at (0, 1).
    pub const BOTTOM_LEFT: usize = 2;
    /// Corner at (1, 1).
    pub const BOTTOM_RIGHT: usize = 3;
    /// Horizontal position.
    pub const X: usize = 4;
    /// Vertical position.
    pub const Y: usize = 5;

    /// Creates the operator.
    pub fn new() -> Self {
        Self
    }
}

impl Processor for BilinearInterpolate {
    fn num_inputs(&self) -> usize {
        6
    }
    fn has_state(&self) -> bool {
        false
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let n = ctx.num_samples();
        let (inputs, mut outputs) = ctx.split();
        let top_left = inputs.samples(Self::TOP_LEFT, n);
        let top_right = inputs.samples(Self::TOP_RIGHT, n);
        let bottom_left = inputs.samples(Self::BOTTOM_LEFT, n);
        let bottom_right = inputs.samples(Self::BOTTOM_RIGHT, n);
        let x = inputs.samples(Self::X, n);
        let y = inputs.samples(Self::Y, n);
        let out = outputs.buffer_mut(0);
        for i in 0..n {
            let top = PolyF32::interpolate(top_left[i], top_right[i], x[i]);
            let bottom = PolyF32::interpolate(bottom_left[i], bottom_right[i], x[i]);
            out[i] = PolyF32::interpolate(top, bottom, y[i]);
        }
    }
    fn clone_box(&self) -> Box<dyn Processor> {
        Box::new(Self)
    }
}

/// Multiplies audio by a control magnitude, ramped linearly across the block.
///
/// The standard idiom for glitch-free parameter changes: the previous block's
/// magnitude slides to the newly requested one over `num_samples`, so value
/// jumps at block boundaries never step.
pub struct SmoothMultiply {
    magnitude: PolyF32,
}

impl SmoothMultiply {
    /// Audio input.
    pub const AUDIO: usize = 0;
    /// Control-rate magnitude.
    pub const MAGNITUDE: usize = 1;

    /// Creates the operator with a silent starting magnitude.
    pub fn new() -> Self {
        Self {
            magnitude: PolyF32::ZERO,
        }
    }
}

impl Default for SmoothMultiply {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for SmoothMultiply {
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
        let target = inputs.value(Self::MAGNITUDE);
        let out = outputs.buffer_mut(0);

        let step = (target - self.magnitude) * PolyF32::splat(1.0 / n as f32);
        let mut current = self.magnitude;
        for i in 0..n {
            current += step;
            out[i] = audio[i] * current;
        }
        self.magnitude = target;
    }
    fn clone_box(&self) -> Box<dyn Processor> {
        Box::new(Self {
            magnitude: self.magnitude,
        })
    }
    fn reset(&mut self) {
        self.magnitude = PolyF32::ZERO;
    }
}

/// Sums an open-ended set of modulation inputs.
///
/// Inputs are grown with
/// [`SignalGraph::connect_next`](crate::SignalGraph::connect_next); the
/// first-sample total is published as the output's trigger value so
/// observers can poll the modulation amount without reading the block.
#[derive(Default)]
pub struct ModulationSum;

impl ModulationSum {
    /// Creates the operator with no inputs.
    pub fn new() -> Self {
        Self
    }
}

impl Processor for ModulationSum {
    fn num_inputs(&self) -> usize {
        0
    }
    fn has_state(&self) -> bool {
        true
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let n = ctx.num_samples();
        let (inputs, mut outputs) = ctx.split();
        let out = outputs.buffer_mut(0);
        for sample in out.iter_mut() {
            *sample = PolyF32::ZERO;
        }
        for index in 0..inputs.len() {
            if !inputs.connected(index) {
                continue;
            }
            let source = inputs.samples(index, n);
            for i in 0..n {
                out[i] += source[i];
            }
        }
        let first = out[0];
        outputs.set_trigger_value(0, first);
    }
    fn clone_box(&self) -> Box<dyn Processor> {
        Box::new(Self)
    }
}

/// Equal-power stereo pan over the lane pairs, smoothed across the block.
///
/// The pan control is read at control rate (-1 hard left, +1 hard right);
/// left/right gains follow the quarter-circle law and ramp linearly from the
/// previous block's position.
pub struct StereoEncoder {
    pan: f32,
}

impl StereoEncoder {
    /// Audio input.
    pub const AUDIO: usize = 0;
    /// Control-rate pan position in [-1, 1].
    pub const PAN: usize = 1;

    /// Creates a centered encoder.
    pub fn new() -> Self {
        Self { pan: 0.0 }
    }

    fn gains(pan: f32) -> PolyF32 {
        let angle = (pan + 1.0) * core::f32::consts::FRAC_PI_4;
        PolyF32::from_stereo(cosf(angle), sinf(angle))
    }
}

impl Default for StereoEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for StereoEncoder {
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
        let target = inputs.value(Self::PAN).lane(0).clamp(-1.0, 1.0);
        let out = outputs.buffer_mut(0);

        let from = Self::gains(self.pan);
        let to = Self::gains(target);
        let step = (to - from) * PolyF32::splat(1.0 / n as f32);
        let mut gain = from;
        for i in 0..n {
            gain += step;
            out[i] = audio[i] * gain;
        }
        self.pan = target;
    }
    fn clone_box(&self) -> Box<dyn Processor> {
        Box::new(Self { pan: self.pan })
    }
    fn reset(&mut self) {
        self.pan = 0.0;
    }
}
