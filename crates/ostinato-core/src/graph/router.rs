//! Per-instance scheduling state for routers and the lineage they share.
//!
//! The engine uses a two-level split: a [`Lineage`] is the mutable topology
//! record shared (through the head id) by a prototype router and all of its
//! voice clones — global order, feedback list, idle list, and the change
//! epoch that invalidates materialized state. Each [`Router`] instance holds
//! its own materialized execution list and clone map, resynchronized lazily
//! when its `seen_epoch` lags the lineage epoch.

#[cfg(not(feature = "std"))]
use alloc::{collections::BTreeMap, vec::Vec};
#[cfg(feature = "std")]
use std::collections::BTreeMap;

use super::node::NodeId;

/// Shared topology record for a router and its voice clones.
///
/// Stored on the lineage head only; clones reach it through
/// [`Router::head`]. Any mutation bumps `epoch`.
pub(crate) struct Lineage {
    /// Global topological order of directly-owned processors.
    pub order: Vec<NodeId>,
    /// Feedback nodes owned at this level; excluded from `order` and from
    /// the acyclic-ordering requirement.
    pub feedbacks: Vec<NodeId>,
    /// Idle processors: clock/oversample propagation only, never scheduled.
    pub idle: Vec<NodeId>,
    /// Monotonic change counter; instances resync when their snapshot lags.
    pub epoch: u64,
    /// Whether this scope hosts per-voice clones.
    pub polyphonic: bool,
}

impl Lineage {
    fn new(polyphonic: bool) -> Self {
        Self {
            order: Vec::new(),
            feedbacks: Vec::new(),
            idle: Vec::new(),
            // Start above the instances' initial snapshot so the first
            // process call always materializes.
            epoch: 1,
            polyphonic,
        }
    }
}

/// One schedulable router instance: the lineage head (voice 0) or a clone.
pub(crate) struct Router {
    /// This instance's own node id.
    pub node: NodeId,
    /// Lineage head node id (equal to `node` on the head itself).
    pub head: NodeId,
    /// Present on the head only.
    pub lineage: Option<Lineage>,
    /// Prototype id → instance id. Identity for shared stateless nodes;
    /// a per-voice clone id for stateful ones.
    pub local: BTreeMap<NodeId, NodeId>,
    /// Materialized execution order (instance ids).
    pub local_order: Vec<NodeId>,
    /// Materialized feedback list (instance ids).
    pub local_feedbacks: Vec<NodeId>,
    /// Lineage epoch this instance last synchronized against.
    pub seen_epoch: u64,
}

impl Router {
    /// Creates a lineage head.
    pub fn new_head(node: NodeId, polyphonic: bool) -> Self {
        Self {
            node,
            head: node,
            lineage: Some(Lineage::new(polyphonic)),
            local: BTreeMap::new(),
            local_order: Vec::new(),
            local_feedbacks: Vec::new(),
            seen_epoch: 0,
        }
    }

    /// Creates a voice clone sharing `head`'s lineage.
    pub fn new_clone(node: NodeId, head: NodeId) -> Self {
        Self {
            node,
            head,
            lineage: None,
            local: BTreeMap::new(),
            local_order: Vec::new(),
            local_feedbacks: Vec::new(),
            seen_epoch: 0,
        }
    }

    /// True for the lineage head (the prototype, voice 0).
    #[inline]
    pub fn is_head(&self) -> bool {
        self.lineage.is_some()
    }
}
