//! The node-kernel contract and the per-call processing context.
//!
//! A [`Processor`] is the open half of the node catalog: any type
//! implementing the capability set {process, clone_box, has_state,
//! inputs_changed} can be inserted into the graph with
//! [`SignalGraph::create_processor`](super::SignalGraph::create_processor).
//! Infrastructure kinds (routers, feedbacks) are closed engine variants and
//! never go through this trait.
//!
//! During `process`, a kernel sees exactly its own slice of the graph: read
//! views over its input sources and mutable access to its output buffers,
//! already adjusted for the node's rate and oversampling.

#[cfg(not(feature = "std"))]
use alloc::boxed::Box;

use core::any::Any;

use crate::simd::PolyF32;

use super::buffer::SignalBuffer;
use super::node::{Arena, Source};

/// The unit of computation in the signal graph.
///
/// Kernels are `'static + Send` so a built graph can move to the host's
/// audio thread. `Any` is a supertrait so hosts can recover the concrete
/// type after insertion (see
/// [`SignalGraph::operator_mut`](super::SignalGraph::operator_mut)).
pub trait Processor: Any + Send {
    /// Baseline number of input slots. Growable afterwards via
    /// [`SignalGraph::connect_next`](super::SignalGraph::connect_next).
    fn num_inputs(&self) -> usize;

    /// Number of output ports.
    fn num_outputs(&self) -> usize {
        1
    }

    /// Whether the node starts in control-rate mode (one value per block).
    fn is_control_rate(&self) -> bool {
        false
    }

    /// Whether independent per-voice memory is required. Must be truthful:
    /// stateless kernels are shared across voice clones, stateful ones are
    /// duplicated.
    fn has_state(&self) -> bool;

    /// Reads `ctx.num_samples()` samples from each connected input and
    /// writes that many to each output. Never called while the node is
    /// disabled.
    fn process(&mut self, ctx: &mut ProcessContext<'_>);

    /// Duplicates the kernel for an independent polyphonic voice.
    fn clone_box(&self) -> Box<dyn Processor>;

    /// Hook fired whenever an input's source is reassigned.
    fn inputs_changed(&mut self, connected: usize) {
        let _ = connected;
    }

    /// When true (the operator-family default), the engine recomputes
    /// `enabled = connected_inputs > 0` on every input change. Generators
    /// with no inputs override this to stay enabled.
    fn tracks_connected_inputs(&self) -> bool {
        true
    }

    /// Observes the effective sample rate (`base * oversample`).
    fn set_sample_rate(&mut self, sample_rate: f32) {
        let _ = sample_rate;
    }

    /// Observes the node's oversampling factor.
    fn set_oversample(&mut self, oversample: usize) {
        let _ = oversample;
    }

    /// Clears internal state back to construction values.
    fn reset(&mut self) {}
}

/// Everything a kernel sees for one `process` call.
pub struct ProcessContext<'a> {
    pub(crate) arena: &'a Arena,
    pub(crate) sources: &'a [Source],
    pub(crate) outputs: &'a mut [SignalBuffer],
    pub(crate) num_samples: usize,
    pub(crate) sample_rate: f32,
    pub(crate) oversample: usize,
}

impl ProcessContext<'_> {
    /// Samples to produce this call (1 for control-rate nodes).
    #[inline]
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Effective sample rate: base rate times the node's oversampling.
    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// The node's oversampling factor.
    #[inline]
    pub fn oversample(&self) -> usize {
        self.oversample
    }

    /// Current number of input slots (may exceed the kernel's baseline when
    /// inputs were grown with `connect_next`).
    #[inline]
    pub fn num_inputs(&self) -> usize {
        self.sources.len()
    }

    /// Number of output ports.
    #[inline]
    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// True when input `index` references a producer.
    #[inline]
    pub fn input_connected(&self, index: usize) -> bool {
        self.sources
            .get(index)
            .is_some_and(|source| source.is_connected())
    }

    /// Splits the context into disjoint read/write halves so a kernel can
    /// hold input slices and output buffers simultaneously.
    pub fn split(&mut self) -> (Inputs<'_>, Outputs<'_>) {
        (
            Inputs {
                arena: self.arena,
                sources: self.sources,
            },
            Outputs {
                buffers: &mut *self.outputs,
                num_samples: self.num_samples,
            },
        )
    }
}

/// Read view over a node's input sources.
pub struct Inputs<'a> {
    arena: &'a Arena,
    sources: &'a [Source],
}

impl<'a> Inputs<'a> {
    /// Number of input slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// True when there are no input slots.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// True when input `index` references a producer.
    #[inline]
    pub fn connected(&self, index: usize) -> bool {
        self.sources
            .get(index)
            .is_some_and(|source| source.is_connected())
    }

    /// Reads `len` samples from input `index`; unplugged inputs read as
    /// silence.
    #[inline]
    pub fn samples(&self, index: usize, len: usize) -> &'a [PolyF32] {
        match self.sources.get(index) {
            Some(source) => self.arena.resolve(*source, len),
            None => super::buffer::silence(len),
        }
    }

    /// Reads one sample of input `index`.
    #[inline]
    pub fn at(&self, index: usize, sample: usize) -> PolyF32 {
        match self.sources.get(index) {
            Some(source) => self.arena.resolve_at(*source, sample),
            None => PolyF32::ZERO,
        }
    }

    /// The control-rate read path: sample 0 of input `index`.
    #[inline]
    pub fn value(&self, index: usize) -> PolyF32 {
        self.at(index, 0)
    }
}

/// Write view over a node's output buffers.
pub struct Outputs<'a> {
    buffers: &'a mut [SignalBuffer],
    num_samples: usize,
}

impl Outputs<'_> {
    /// Number of output ports.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// True when there are no output ports.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Mutable slice of this call's samples for output `index`.
    #[inline]
    pub fn buffer_mut(&mut self, index: usize) -> &mut [PolyF32] {
        let len = self.num_samples;
        self.buffers[index].samples_mut(len)
    }

    /// The control-rate write path: sets sample 0 of output `index`.
    #[inline]
    pub fn set_value(&mut self, index: usize, value: PolyF32) {
        self.buffers[index].set(0, value);
    }

    /// Updates the auxiliary first-sample snapshot of output `index`.
    #[inline]
    pub fn set_trigger_value(&mut self, index: usize, value: PolyF32) {
        self.buffers[index].set_trigger_value(value);
    }
}
