//! Ostinato Core - polyphonic signal-graph engine
//!
//! This crate provides the dataflow core of a software synthesizer: a
//! directed, potentially-cyclic network of audio/control-rate nodes with
//! automatic topological scheduling, per-voice cloning for polyphony,
//! cycle breaking via one-block feedback delays, and oversampled 4-wide
//! sample processing.
//!
//! # Core Abstractions
//!
//! ## Graph Engine
//!
//! - [`SignalGraph`] - arena owner, mutation API, and block scheduler
//! - [`Processor`] - object-safe kernel trait for custom nodes
//! - [`ProcessContext`] - per-call input/output views handed to kernels
//! - [`Connection`] - connect outcome, reporting inserted feedback nodes
//!
//! ## Signals
//!
//! - [`PolyF32`] - 4-lane packed sample (stereo pairs for two voices)
//! - [`SignalBuffer`] - per-output block storage, audio or control rate
//!
//! ## Operators
//!
//! - [`operators`] - audio-rate arithmetic, smoothing, and stereo encoding
//! - [`operators::control`] - the one-value-per-block control family
//! - [`tempo`] - note divisions for tempo-synced control signals
//!
//! # Scheduling Model
//!
//! Processing is single-threaded, synchronous, and block-based. The host
//! calls [`SignalGraph::process`] once per audio block; graph edits must not
//! race it (the engine provides no locking). Within one block, feedback
//! nodes emit last block's capture before any node runs and record this
//! block's value after all nodes ran.
//!
//! # no_std Support
//!
//! This crate is `no_std` compatible for embedded targets. Disable the
//! default `std` feature:
//!
//! ```toml
//! [dependencies]
//! ostinato-core = { version = "0.1", default-features = false }
//! ```
//!
//! # Example
//!
//! ```rust
//! use ostinato_core::operators::{Add, Value};
//! use ostinato_core::{PolyF32, SignalGraph};
//!
//! let mut graph = SignalGraph::new(48000.0);
//! let root = graph.root();
//!
//! let a = graph.create_processor(Box::new(Value::new(0.25)));
//! let b = graph.create_processor(Box::new(Value::new(0.5)));
//! let sum = graph.create_processor(Box::new(Add::new()));
//! for node in [a, b, sum] {
//!     graph.add_processor(root, node).unwrap();
//! }
//! graph.connect(a, 0, sum, 0).unwrap();
//! graph.connect(b, 0, sum, 1).unwrap();
//!
//! graph.process(64);
//! assert_eq!(graph.output(sum, 0).unwrap()[0], PolyF32::splat(0.75));
//! ```
//!
//! # Design Principles
//!
//! - **Real-time safe**: no allocations on the processing path; lazy voice
//!   resynchronization allocates only after a topology edit
//! - **No dependencies on std**: pure `no_std` with `libm` for math
//! - **Handles over pointers**: generational node ids, never raw wiring

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod graph;
pub mod operators;
pub mod simd;
pub mod tempo;

/// Largest block size (at 1x oversampling) a buffer must hold.
pub const MAX_BLOCK_SIZE: usize = 128;

/// Largest supported oversampling factor.
pub const MAX_OVERSAMPLE: usize = 8;

// Re-export main types at crate root
pub use graph::{
    Connection, GraphError, Inputs, NodeId, Outputs, ProcessContext, Processor, SignalBuffer,
    SignalGraph, Source,
};
pub use simd::PolyF32;
