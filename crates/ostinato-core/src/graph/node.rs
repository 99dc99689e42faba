//! Node identity and arena storage for the signal graph.
//!
//! Nodes live in a generational arena owned by
//! [`SignalGraph`](super::SignalGraph). A [`NodeId`] is an index plus a
//! generation; handle equality stands in for the pointer identity the
//! scheduling algorithms depend on, and a stale handle resolves to nothing
//! instead of dangling.

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, vec::Vec};

use crate::simd::PolyF32;

use super::buffer::SignalBuffer;
use super::feedback::Feedback;
use super::processor::Processor;
use super::router::Router;

/// Unique, generation-checked identifier for a node in the graph.
///
/// Indices are reused after a node is destroyed; the generation field makes
/// handles to the old occupant stale rather than aliasing the new one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeId {
    /// Returns the raw slot index.
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "NodeId({}:{})", self.index, self.generation)
    }
}

/// The producer an input slot reads from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    /// The shared null source: reads as silence of any requested length.
    Silence,
    /// Output `port` of `node`.
    Port {
        /// Producing node.
        node: NodeId,
        /// Output port on that node.
        port: usize,
    },
}

impl Source {
    /// True when the slot references a producer (which may still be stale).
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Source::Port { .. })
    }
}

/// A node's kernel: infrastructure kinds are closed variants, operator
/// kernels are open trait objects.
pub(crate) enum NodeKind {
    /// A concrete DSP operator.
    Operator(Box<dyn Processor>),
    /// A scheduling container (prototype or voice clone).
    Router(Router),
    /// A one-block-delay cycle breaker.
    Feedback(Feedback),
}

impl NodeKind {
    pub(crate) fn has_state(&self) -> bool {
        match self {
            NodeKind::Operator(kernel) => kernel.has_state(),
            // Routers carry per-voice members, feedbacks carry history.
            NodeKind::Router(_) | NodeKind::Feedback(_) => true,
        }
    }
}

/// Everything stored for one live node.
pub(crate) struct NodeData {
    /// `None` only transiently, while the kernel is taken out for processing.
    pub kind: Option<NodeKind>,
    pub inputs: Vec<Source>,
    pub outputs: Vec<SignalBuffer>,
    /// Router node that directly owns this node, if attached.
    pub owner: Option<NodeId>,
    /// Prototype this node was cloned from, for voice instances.
    pub proto: Option<NodeId>,
    pub enabled: bool,
    pub control_rate: bool,
    pub oversample: usize,
    pub sample_rate: f32,
}

struct Slot {
    generation: u32,
    data: Option<NodeData>,
}

/// Generational arena of graph nodes.
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Arena {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Inserts a node, handing the closure its id (needed by kinds that
    /// record their own identity, e.g. routers).
    pub fn insert_with(&mut self, build: impl FnOnce(NodeId) -> NodeData) -> NodeId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    data: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = NodeId {
            index,
            generation: slot.generation,
        };
        slot.data = Some(build(id));
        id
    }

    /// Frees a slot; the generation bump invalidates outstanding handles.
    pub fn free(&mut self, id: NodeId) -> bool {
        match self.slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation && slot.data.is_some() => {
                slot.data = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
                true
            }
            _ => false,
        }
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&NodeData> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.data.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.data.as_mut())
    }

    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Takes the kernel out of a slot for the take-process-restore pattern.
    pub fn take_kind(&mut self, id: NodeId) -> Option<NodeKind> {
        self.get_mut(id).and_then(|data| data.kind.take())
    }

    /// Restores a kernel taken with [`take_kind`](Self::take_kind).
    pub fn put_kind(&mut self, id: NodeId, kind: NodeKind) {
        if let Some(data) = self.get_mut(id) {
            debug_assert!(data.kind.is_none());
            data.kind = Some(kind);
        }
    }

    /// Takes a node's output buffers out of its slot.
    pub fn take_outputs(&mut self, id: NodeId) -> Vec<SignalBuffer> {
        self.get_mut(id)
            .map(|data| core::mem::take(&mut data.outputs))
            .unwrap_or_default()
    }

    /// Restores output buffers taken with [`take_outputs`](Self::take_outputs).
    pub fn put_outputs(&mut self, id: NodeId, outputs: Vec<SignalBuffer>) {
        if let Some(data) = self.get_mut(id) {
            debug_assert!(data.outputs.is_empty());
            data.outputs = outputs;
        }
    }

    /// Resolves a source to `len` samples; unplugged, stale, or in-flight
    /// sources read as silence.
    pub fn resolve<'a>(&'a self, source: Source, len: usize) -> &'a [PolyF32] {
        match source {
            Source::Silence => super::buffer::silence(len),
            Source::Port { node, port } => match self.get(node).and_then(|d| d.outputs.get(port)) {
                Some(buffer) if buffer.len() >= len => buffer.samples(len),
                _ => super::buffer::silence(len),
            },
        }
    }

    /// Reads one sample of a source (index 0 is the control-rate read path).
    pub fn resolve_at(&self, source: Source, index: usize) -> PolyF32 {
        match source {
            Source::Silence => PolyF32::ZERO,
            Source::Port { node, port } => self
                .get(node)
                .and_then(|d| d.outputs.get(port))
                .filter(|buffer| index < buffer.len())
                .map(|buffer| buffer.at(index))
                .unwrap_or(PolyF32::ZERO),
        }
    }

    /// Ids of all live nodes.
    pub fn ids(&self) -> Vec<NodeId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.data.is_some())
            .map(|(index, slot)| NodeId {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.data.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_data() -> NodeData {
        NodeData {
            kind: Some(NodeKind::Feedback(Feedback::new(true, 1))),
            inputs: Vec::new(),
            outputs: Vec::new(),
            owner: None,
            proto: None,
            enabled: true,
            control_rate: true,
            oversample: 1,
            sample_rate: 48000.0,
        }
    }

    #[test]
    fn stale_handle_resolves_to_nothing() {
        let mut arena = Arena::new();
        let id = arena.insert_with(|_| dummy_data());
        assert!(arena.contains(id));
        assert!(arena.free(id));
        assert!(!arena.contains(id));

        // Slot is reused with a new generation; the old handle stays stale.
        let id2 = arena.insert_with(|_| dummy_data());
        assert_eq!(id.index(), id2.index());
        assert!(!arena.contains(id));
        assert!(arena.contains(id2));
    }

    #[test]
    fn resolve_silence_for_dangling_port() {
        let mut arena = Arena::new();
        let id = arena.insert_with(|_| dummy_data());
        arena.free(id);
        let source = Source::Port { node: id, port: 0 };
        assert!(
            arena
                .resolve(source, 16)
                .iter()
                .all(|s| *s == PolyF32::ZERO)
        );
        assert_eq!(arena.resolve_at(source, 0), PolyF32::ZERO);
    }
}
