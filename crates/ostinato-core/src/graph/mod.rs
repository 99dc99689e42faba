//! Signal-graph engine: nodes, routers, feedback, and block scheduling.
//!
//! The engine is a directed, potentially-cyclic network of processing nodes
//! executed once per audio block. It uses a **two-level split**:
//!
//! - A [`Lineage`](router::Lineage) — the mutable topology record of one
//!   router scope (global order, feedback list, change epoch), shared by a
//!   prototype router and all of its voice clones. Mutations touch this and
//!   bump the epoch.
//! - Per-instance materialized state — each router instance (voice) holds
//!   its own execution list and clone map, resynchronized lazily when its
//!   epoch snapshot lags. The audio path never sees a half-applied mutation
//!   because the caller serializes edits against processing.
//!
//! # Cycles
//!
//! Connections are checked against the dependency relation at mutation time.
//! An edge that would close a cycle is legal: the engine interposes a
//! feedback node holding one block of history, turning the cycle into a
//! one-block delay. Feedback edges are excluded from the topological-order
//! requirement; every block, feedbacks emit last block's capture before any
//! node runs and capture this block's value after all nodes ran.
//!
//! # Polyphony
//!
//! [`SignalGraph::clone_voice`] duplicates a router scope for another voice.
//! Stateful members are cloned per voice; stateless arithmetic is shared.
//! Clones follow topology changes lazily through the shared change epoch.
//!
//! # Example
//!
//! ```rust,ignore
//! use ostinato_core::{SignalGraph, operators::Add};
//!
//! let mut graph = SignalGraph::new(48000.0);
//! let root = graph.root();
//! let osc = graph.create_processor(Box::new(my_oscillator));
//! let gain = graph.create_processor(Box::new(Add::new()));
//! graph.add_processor(root, osc)?;
//! graph.add_processor(root, gain)?;
//! graph.connect(osc, 0, gain, 0)?;
//!
//! graph.process(128);
//! let block = graph.output(gain, 0).unwrap();
//! ```

pub mod buffer;
mod engine;
mod feedback;
pub mod node;
pub mod processor;
mod router;

pub use buffer::SignalBuffer;
pub use engine::{Connection, GraphError, SignalGraph};
pub use node::{NodeId, Source};
pub use processor::{Inputs, Outputs, ProcessContext, Processor};
