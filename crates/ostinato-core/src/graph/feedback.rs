//! One-block-delay node that breaks cycles in time instead of in the order.
//!
//! A `Feedback` is inserted transparently by
//! [`SignalGraph::connect`](super::SignalGraph::connect) when a new edge
//! would close a cycle. Each block, the scheduler first calls
//! [`refresh_output`](Feedback::refresh_output) on every feedback (emitting
//! what the *previous* block captured), runs the normal nodes, then calls
//! [`capture`](Feedback::capture) to record this block for the next one.
//! Block 0 emits the zero-filled initial history.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use crate::simd::PolyF32;
use crate::{MAX_BLOCK_SIZE, MAX_OVERSAMPLE};

use super::buffer::SignalBuffer;

/// One block of delayed history for a cyclic edge.
pub(crate) struct Feedback {
    history: Vec<PolyF32>,
    /// Samples recorded by the most recent capture.
    captured: usize,
}

impl Feedback {
    /// Creates a zero-filled feedback sized for the given rate/oversample.
    pub fn new(control_rate: bool, oversample: usize) -> Self {
        let len = if control_rate {
            1
        } else {
            MAX_BLOCK_SIZE * oversample.clamp(1, MAX_OVERSAMPLE)
        };
        Self {
            history: vec![PolyF32::ZERO; len],
            captured: 0,
        }
    }

    /// Records this block's input for playback one block later.
    pub fn capture(&mut self, input: &[PolyF32]) {
        let len = input.len().min(self.history.len());
        self.history[..len].copy_from_slice(&input[..len]);
        self.captured = len;
    }

    /// Emits the previously captured block into the output buffer.
    ///
    /// If the current block is longer than the last capture (block size
    /// changed between calls), the tail reads as silence.
    pub fn refresh_output(&self, output: &mut SignalBuffer, num_samples: usize) {
        let out = output.samples_mut(num_samples);
        let have = self.captured.min(num_samples);
        out[..have].copy_from_slice(&self.history[..have]);
        for sample in &mut out[have..] {
            *sample = PolyF32::ZERO;
        }
    }

    /// Resets the history to the initial zero state.
    pub fn clear(&mut self) {
        self.history.fill(PolyF32::ZERO);
        self.captured = 0;
    }

    /// Resizes the history for a new rate/oversample configuration.
    pub fn reconfigure(&mut self, control_rate: bool, oversample: usize) {
        let len = if control_rate {
            1
        } else {
            MAX_BLOCK_SIZE * oversample.clamp(1, MAX_OVERSAMPLE)
        };
        self.history.clear();
        self.history.resize(len, PolyF32::ZERO);
        self.captured = 0;
    }
}
