//! Signal buffers backing node outputs.
//!
//! Every output port owns one [`SignalBuffer`]: a block of [`PolyF32`]
//! samples sized for the largest supported block at the node's oversampling
//! factor, or a single persistent value for control-rate nodes. Unplugged
//! inputs read from a process-wide static silence block instead.

#[cfg(not(feature = "std"))]
use alloc::vec;
#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::simd::PolyF32;
use crate::{MAX_BLOCK_SIZE, MAX_OVERSAMPLE};

/// Static zeroed block backing the null source. Sized so that it is "big
/// enough" for any request the engine can legally make.
static SILENCE: [PolyF32; MAX_BLOCK_SIZE * MAX_OVERSAMPLE] =
    [PolyF32::ZERO; MAX_BLOCK_SIZE * MAX_OVERSAMPLE];

/// Returns `len` samples of silence.
#[inline]
pub(crate) fn silence(len: usize) -> &'static [PolyF32] {
    debug_assert!(len <= SILENCE.len());
    &SILENCE[..len]
}

/// Sample storage for one output port.
///
/// Audio-rate buffers hold `MAX_BLOCK_SIZE * oversample` samples; control-rate
/// buffers hold a single value that persists across blocks. The
/// `trigger_value` field is an auxiliary scalar snapshot of the most recent
/// first-sample value, written opportunistically by operators (e.g.
/// `ModulationSum`) so observers can poll a value without reading the block.
pub struct SignalBuffer {
    samples: Vec<PolyF32>,
    trigger_value: PolyF32,
}

impl SignalBuffer {
    /// Creates a zeroed audio-rate buffer for the given oversampling factor.
    pub fn audio(oversample: usize) -> Self {
        Self {
            samples: vec![PolyF32::ZERO; MAX_BLOCK_SIZE * oversample.max(1)],
            trigger_value: PolyF32::ZERO,
        }
    }

    /// Creates a zeroed control-rate buffer (one persistent value).
    pub fn control() -> Self {
        Self {
            samples: vec![PolyF32::ZERO; 1],
            trigger_value: PolyF32::ZERO,
        }
    }

    /// Number of samples the buffer can hold.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// True when this is a control-rate (single value) buffer.
    pub fn is_control_rate(&self) -> bool {
        self.samples.len() == 1
    }

    /// Reads the first `len` samples.
    #[inline]
    pub fn samples(&self, len: usize) -> &[PolyF32] {
        debug_assert!(len <= self.samples.len());
        &self.samples[..len]
    }

    /// Mutable access to the first `len` samples.
    #[inline]
    pub fn samples_mut(&mut self, len: usize) -> &mut [PolyF32] {
        debug_assert!(len <= self.samples.len());
        &mut self.samples[..len]
    }

    /// The whole backing slice.
    #[inline]
    pub fn as_slice(&self) -> &[PolyF32] {
        &self.samples
    }

    /// Reads sample `index`. Index 0 is the control-rate read path.
    #[inline]
    pub fn at(&self, index: usize) -> PolyF32 {
        self.samples[index]
    }

    /// Writes sample `index`.
    #[inline]
    pub fn set(&mut self, index: usize, value: PolyF32) {
        self.samples[index] = value;
    }

    /// Zero-fills the buffer. Invoked when the owning node is forced
    /// disabled so downstream consumers read silence rather than stale data.
    pub fn clear(&mut self) {
        self.samples.fill(PolyF32::ZERO);
        self.trigger_value = PolyF32::ZERO;
    }

    /// Resizes for a new rate/oversample configuration, zeroing contents.
    pub fn reconfigure(&mut self, control_rate: bool, oversample: usize) {
        let len = if control_rate {
            1
        } else {
            MAX_BLOCK_SIZE * oversample.max(1)
        };
        self.samples.clear();
        self.samples.resize(len, PolyF32::ZERO);
        self.trigger_value = PolyF32::ZERO;
    }

    /// The auxiliary first-sample snapshot.
    #[inline]
    pub fn trigger_value(&self) -> PolyF32 {
        self.trigger_value
    }

    /// Updates the auxiliary first-sample snapshot.
    #[inline]
    pub fn set_trigger_value(&mut self, value: PolyF32) {
        self.trigger_value = value;
    }
}
