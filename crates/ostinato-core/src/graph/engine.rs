//! Graph facade — mutation API, cycle breaking, and block execution.
//!
//! [`SignalGraph`] owns the node arena and is the main entry point for the
//! engine. It provides mutation methods (create, add, remove, connect,
//! disconnect), maintains the topological order incrementally, detects
//! cycle-introducing connections and interposes feedback nodes, clones
//! routers for per-voice polyphony, and executes blocks.
//!
//! Mutations happen while the audio thread is not processing (the caller
//! serializes; the engine provides no locking). Execution is single-threaded
//! and allocation-free apart from lazy resynchronization after a mutation,
//! which happens at most once per change epoch.

#[cfg(not(feature = "std"))]
use alloc::{
    boxed::Box,
    collections::{BTreeMap, BTreeSet, VecDeque},
    vec,
    vec::Vec,
};
#[cfg(feature = "std")]
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use core::any::Any;

use crate::MAX_BLOCK_SIZE;
use crate::simd::PolyF32;

use super::buffer::SignalBuffer;
use super::feedback::Feedback;
use super::node::{Arena, NodeData, NodeId, NodeKind, Source};
use super::processor::{ProcessContext, Processor};
use super::router::{Lineage, Router};

/// Errors that can occur during graph mutations.
#[derive(Debug, PartialEq, Eq)]
pub enum GraphError {
    /// The node handle is unknown or stale.
    NodeNotFound(NodeId),
    /// The referenced output port does not exist on the node.
    PortOutOfRange {
        /// Node the port was looked up on.
        node: NodeId,
        /// Requested output port.
        port: usize,
    },
    /// The referenced input slot does not exist on the node.
    InputOutOfRange {
        /// Node the input was looked up on.
        node: NodeId,
        /// Requested input slot.
        index: usize,
    },
    /// The node is already owned by a router.
    AlreadyOwned(NodeId),
    /// The operation requires a router node.
    NotARouter(NodeId),
    /// The node is not owned by the given router.
    NotOwned {
        /// Node whose ownership was checked.
        node: NodeId,
        /// Router it was expected to belong to.
        router: NodeId,
    },
    /// The operation is not allowed on the root router.
    RootNode(NodeId),
}

impl core::fmt::Display for GraphError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NodeNotFound(id) => write!(f, "node {id} not found"),
            Self::PortOutOfRange { node, port } => {
                write!(f, "output port {port} out of range on {node}")
            }
            Self::InputOutOfRange { node, index } => {
                write!(f, "input slot {index} out of range on {node}")
            }
            Self::AlreadyOwned(id) => write!(f, "node {id} is already owned by a router"),
            Self::NotARouter(id) => write!(f, "node {id} is not a router"),
            Self::NotOwned { node, router } => {
                write!(f, "node {node} is not owned by router {router}")
            }
            Self::RootNode(id) => write!(f, "operation not allowed on root router {id}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for GraphError {}

/// Outcome of a [`connect`](SignalGraph::connect) call.
///
/// Cycle breaking is observable: when the new edge would have closed a cycle,
/// `feedback` names the interposed one-block-delay node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    /// The feedback node inserted on this edge, if it was cyclic.
    pub feedback: Option<NodeId>,
}

/// The signal-processing graph: node arena, routers, and scheduler.
///
/// # Usage
///
/// 1. Create a graph with [`new()`](Self::new)
/// 2. Create nodes: [`create_processor()`](Self::create_processor),
///    [`create_router()`](Self::create_router)
/// 3. Attach them: [`add_processor()`](Self::add_processor)
/// 4. Wire them: [`connect()`](Self::connect)
/// 5. Process: [`process()`](Self::process), then read
///    [`output()`](Self::output)
pub struct SignalGraph {
    arena: Arena,
    root: NodeId,
    sample_rate: f32,
}

impl SignalGraph {
    /// Creates an empty graph with a monophonic root router.
    pub fn new(sample_rate: f32) -> Self {
        let mut arena = Arena::new();
        let root = arena.insert_with(|id| NodeData {
            kind: Some(NodeKind::Router(Router::new_head(id, false))),
            inputs: Vec::new(),
            outputs: Vec::new(),
            owner: None,
            proto: None,
            enabled: true,
            control_rate: false,
            oversample: 1,
            sample_rate,
        });
        Self {
            arena,
            root,
            sample_rate,
        }
    }

    /// The root router node.
    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The base (non-oversampled) sample rate.
    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Number of live nodes (including routers and feedbacks).
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    // --- Node creation ---

    /// Creates a detached operator node from a kernel.
    ///
    /// Input slots start unplugged (silence) and outputs zeroed. Attach the
    /// node with [`add_processor`](Self::add_processor).
    pub fn create_processor(&mut self, mut kernel: Box<dyn Processor>) -> NodeId {
        kernel.set_sample_rate(self.sample_rate);
        let control_rate = kernel.is_control_rate();
        let inputs = vec![Source::Silence; kernel.num_inputs()];
        let outputs: Vec<SignalBuffer> = (0..kernel.num_outputs())
            .map(|_| {
                if control_rate {
                    SignalBuffer::control()
                } else {
                    SignalBuffer::audio(1)
                }
            })
            .collect();
        let sample_rate = self.sample_rate;
        let id = self.arena.insert_with(move |_| NodeData {
            kind: Some(NodeKind::Operator(kernel)),
            inputs,
            outputs,
            owner: None,
            proto: None,
            enabled: true,
            control_rate,
            oversample: 1,
            sample_rate,
        });
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_add: operator node {id}");
        id
    }

    /// Creates a detached router node (a lineage head).
    ///
    /// `polyphonic` marks the scope as hosting per-voice clones; see
    /// [`poly_router`](Self::poly_router).
    pub fn create_router(&mut self, polyphonic: bool) -> NodeId {
        let sample_rate = self.sample_rate;
        let id = self.arena.insert_with(|id| NodeData {
            kind: Some(NodeKind::Router(Router::new_head(id, polyphonic))),
            inputs: Vec::new(),
            outputs: Vec::new(),
            owner: None,
            proto: None,
            enabled: true,
            control_rate: false,
            oversample: 1,
            sample_rate,
        });
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_add: router node {id}");
        id
    }

    /// Clones a router for an additional polyphonic voice.
    ///
    /// The clone shares the source's lineage (global order, feedback list,
    /// change epoch) by reference and lazily materializes per-voice instances
    /// of every stateful member the next time it processes. Stateless members
    /// are shared, not duplicated.
    pub fn clone_voice(&mut self, router: NodeId) -> Result<NodeId, GraphError> {
        let head = self.router_head(router)?;
        let (oversample, sample_rate) = {
            let data = self.data(router)?;
            (data.oversample, data.sample_rate)
        };
        let id = self.arena.insert_with(|id| NodeData {
            kind: Some(NodeKind::Router(Router::new_clone(id, head))),
            inputs: Vec::new(),
            outputs: Vec::new(),
            owner: None,
            proto: Some(router),
            enabled: true,
            control_rate: false,
            oversample,
            sample_rate,
        });
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_clone: voice {id} of router {router}");
        Ok(id)
    }

    /// Destroys a node, detaching it first if necessary.
    ///
    /// Voice instances materialized by a destroyed router clone are freed
    /// with it. Outstanding handles go stale; consumers still referencing the
    /// node read silence.
    pub fn destroy_node(&mut self, node: NodeId) -> Result<(), GraphError> {
        if node == self.root {
            return Err(GraphError::RootNode(node));
        }
        let owner = self.data(node)?.owner;
        if let Some(owner) = owner {
            self.remove_processor(owner, node)?;
        }
        self.destroy_subtree(node);
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_destroy: node {node}");
        Ok(())
    }

    // --- Membership ---

    /// Attaches a detached node to a router.
    ///
    /// The node inherits the router's oversampling and joins the global
    /// order. Errors with [`GraphError::AlreadyOwned`] if it is attached
    /// anywhere.
    pub fn add_processor(&mut self, router: NodeId, node: NodeId) -> Result<(), GraphError> {
        self.attach(router, node, false)
    }

    /// Attaches a node for clock/oversample propagation only.
    ///
    /// Idle nodes are never scheduled; they exist so utility processors stay
    /// in sync with configuration changes.
    pub fn add_idle_processor(&mut self, router: NodeId, node: NodeId) -> Result<(), GraphError> {
        self.attach(router, node, true)
    }

    fn attach(&mut self, router: NodeId, node: NodeId, idle: bool) -> Result<(), GraphError> {
        let head = self.router_head(router)?;
        if self.data(node)?.owner.is_some() {
            return Err(GraphError::AlreadyOwned(node));
        }
        let oversample = self.data(router)?.oversample;
        if let Some(data) = self.arena.get_mut(node) {
            data.owner = Some(router);
        }
        self.apply_oversample(node, oversample);
        if let Some(lineage) = self.lineage_mut(head) {
            if idle {
                lineage.idle.push(node);
            } else {
                lineage.order.push(node);
            }
            lineage.epoch += 1;
        }
        self.bump_chain(router);
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_add: {node} → router {router} (idle={idle})");
        Ok(())
    }

    /// Detaches a node from its router, severing its own inputs first.
    ///
    /// Consumers of the node's outputs are left referencing it; they keep
    /// reading whatever it last produced (or silence once destroyed).
    pub fn remove_processor(&mut self, router: NodeId, node: NodeId) -> Result<(), GraphError> {
        let head = self.router_head(router)?;
        if self.data(node)?.owner != Some(router) {
            return Err(GraphError::NotOwned { node, router });
        }

        // Sever this node's inputs, garbage-collecting feedbacks it was the
        // last reader of.
        let input_count = self.data(node)?.inputs.len();
        let mut candidates: Vec<NodeId> = Vec::new();
        for index in 0..input_count {
            let source = self.data(node)?.inputs[index];
            if let Source::Port {
                node: maybe_feedback,
                port: 0,
            } = source
                && self.is_feedback(maybe_feedback)
                && !candidates.contains(&maybe_feedback)
            {
                candidates.push(maybe_feedback);
            }
            if let Some(data) = self.arena.get_mut(node) {
                data.inputs[index] = Source::Silence;
            }
        }
        for feedback in candidates {
            if !self.feedback_in_use(feedback) {
                self.remove_feedback(feedback);
            }
        }

        if let Some(lineage) = self.lineage_mut(head) {
            lineage.order.retain(|id| *id != node);
            lineage.idle.retain(|id| *id != node);
            lineage.epoch += 1;
        }
        if let Some(data) = self.arena.get_mut(node) {
            data.owner = None;
        }
        self.inputs_updated(node);
        self.bump_chain(router);
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_remove: {node} from router {router}");
        Ok(())
    }

    // --- Wiring ---

    /// Wires output `src_port` of `src` into input `dst_input` of `dst`.
    ///
    /// If `src` is already downstream of `dst`, the edge closes a cycle: a
    /// feedback node is interposed so the destination reads the previous
    /// block's value, and its id is reported in the returned [`Connection`].
    /// Acyclic edges trigger an incremental reorder instead.
    pub fn connect(
        &mut self,
        src: NodeId,
        src_port: usize,
        dst: NodeId,
        dst_input: usize,
    ) -> Result<Connection, GraphError> {
        if src_port >= self.data(src)?.outputs.len() {
            return Err(GraphError::PortOutOfRange {
                node: src,
                port: src_port,
            });
        }
        if dst_input >= self.data(dst)?.inputs.len() {
            return Err(GraphError::InputOutOfRange {
                node: dst,
                index: dst_input,
            });
        }
        self.plug(src, src_port, dst, dst_input)
    }

    /// Appends a new input slot on `dst` and wires `src` into it.
    ///
    /// This is how variadic consumers (e.g.
    /// [`ModulationSum`](crate::operators::ModulationSum)) grow beyond their
    /// baseline arity.
    pub fn connect_next(
        &mut self,
        src: NodeId,
        src_port: usize,
        dst: NodeId,
    ) -> Result<Connection, GraphError> {
        if src_port >= self.data(src)?.outputs.len() {
            return Err(GraphError::PortOutOfRange {
                node: src,
                port: src_port,
            });
        }
        let index = {
            let data = self.data_mut(dst)?;
            data.inputs.push(Source::Silence);
            data.inputs.len() - 1
        };
        self.plug(src, src_port, dst, index)
    }

    fn plug(
        &mut self,
        src: NodeId,
        src_port: usize,
        dst: NodeId,
        dst_input: usize,
    ) -> Result<Connection, GraphError> {
        let scope = self.data(dst)?.owner;
        let cyclic = scope.is_some_and(|scope| self.edge_closes_cycle(scope, src, dst));

        let feedback = if cyclic {
            let scope = scope.expect("cyclic edge implies an owning router");
            let (control_rate, oversample, sample_rate) = {
                let data = self.data(dst)?;
                (data.control_rate, data.oversample, data.sample_rate)
            };
            let feedback = self.arena.insert_with(|_| NodeData {
                kind: Some(NodeKind::Feedback(Feedback::new(control_rate, oversample))),
                inputs: vec![Source::Port {
                    node: src,
                    port: src_port,
                }],
                outputs: vec![if control_rate {
                    SignalBuffer::control()
                } else {
                    SignalBuffer::audio(oversample)
                }],
                owner: Some(scope),
                proto: None,
                enabled: true,
                control_rate,
                oversample,
                sample_rate,
            });
            if let Ok(head) = self.router_head(scope)
                && let Some(lineage) = self.lineage_mut(head)
            {
                lineage.feedbacks.push(feedback);
                lineage.epoch += 1;
            }
            if let Some(data) = self.arena.get_mut(dst) {
                data.inputs[dst_input] = Source::Port {
                    node: feedback,
                    port: 0,
                };
            }
            #[cfg(feature = "tracing")]
            tracing::debug!("graph_connect: {src} → {dst} via feedback {feedback}");
            Some(feedback)
        } else {
            if let Some(data) = self.arena.get_mut(dst) {
                data.inputs[dst_input] = Source::Port {
                    node: src,
                    port: src_port,
                };
            }
            if let Some(scope) = scope {
                self.reorder(scope, dst);
            }
            #[cfg(feature = "tracing")]
            tracing::debug!("graph_connect: {src} → {dst}");
            None
        };

        self.inputs_updated(dst);
        self.bump_chain(dst);
        Ok(Connection { feedback })
    }

    /// Severs every input of `dst` fed (directly or through a feedback) by
    /// output `src_port` of `src`.
    ///
    /// A feedback left with no reader anywhere in its lineage is removed, so
    /// a cyclic connect followed by this call restores the feedback set
    /// exactly.
    pub fn disconnect(
        &mut self,
        src: NodeId,
        src_port: usize,
        dst: NodeId,
    ) -> Result<(), GraphError> {
        let target = Source::Port {
            node: src,
            port: src_port,
        };
        let input_count = self.data(dst)?.inputs.len();
        let mut candidates: Vec<NodeId> = Vec::new();
        for index in 0..input_count {
            let Some(source) = self.arena.get(dst).map(|data| data.inputs[index]) else {
                break;
            };
            if source == target {
                if let Some(data) = self.arena.get_mut(dst) {
                    data.inputs[index] = Source::Silence;
                }
            } else if let Source::Port {
                node: feedback,
                port: 0,
            } = source
                && self.feedback_source(feedback) == Some(target)
            {
                if let Some(data) = self.arena.get_mut(dst) {
                    data.inputs[index] = Source::Silence;
                }
                if !candidates.contains(&feedback) {
                    candidates.push(feedback);
                }
            }
        }
        for feedback in candidates {
            if !self.feedback_in_use(feedback) {
                self.remove_feedback(feedback);
            }
        }
        self.inputs_updated(dst);
        self.bump_chain(dst);
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_disconnect: {src} ↛ {dst}");
        Ok(())
    }

    // --- Topology queries ---

    /// True when `first`'s output (transitively, through non-feedback edges)
    /// reaches `second`.
    pub fn is_downstream(&self, first: NodeId, second: NodeId) -> bool {
        let Some(scope) = self.arena.get(second).and_then(|data| data.owner) else {
            return false;
        };
        match self.context(scope, first) {
            Some(context) => self.dependencies(scope, second).contains(&context),
            None => false,
        }
    }

    /// True when `first`'s context precedes `second`'s in the global order of
    /// `second`'s owning router.
    pub fn are_ordered(&self, first: NodeId, second: NodeId) -> bool {
        let Some(scope) = self.arena.get(second).and_then(|data| data.owner) else {
            return false;
        };
        let (Some(a), Some(b)) = (self.context(scope, first), self.context(scope, second)) else {
            return false;
        };
        let Ok(head) = self.router_head(scope) else {
            return false;
        };
        let Some(lineage) = self.lineage(head) else {
            return false;
        };
        let pos_a = lineage.order.iter().position(|id| *id == a);
        let pos_b = lineage.order.iter().position(|id| *id == b);
        matches!((pos_a, pos_b), (Some(a), Some(b)) if a < b)
    }

    /// Copy of a router's shared global order (prototype ids).
    pub fn global_order(&self, router: NodeId) -> Result<Vec<NodeId>, GraphError> {
        let head = self.router_head(router)?;
        Ok(self
            .lineage(head)
            .map(|lineage| lineage.order.clone())
            .unwrap_or_default())
    }

    /// Copy of a router instance's materialized execution order, as of its
    /// last process call.
    pub fn local_order(&self, router: NodeId) -> Result<Vec<NodeId>, GraphError> {
        Ok(self.router_ref(router)?.local_order.clone())
    }

    /// Number of feedback nodes in a router's lineage.
    pub fn feedback_count(&self, router: NodeId) -> Result<usize, GraphError> {
        let head = self.router_head(router)?;
        Ok(self
            .lineage(head)
            .map(|lineage| lineage.feedbacks.len())
            .unwrap_or_default())
    }

    /// The per-voice instance a router clone materialized for a prototype.
    ///
    /// Returns the prototype itself for shared stateless members, `None`
    /// before the clone's first sync.
    pub fn voice_instance(&self, router: NodeId, proto: NodeId) -> Option<NodeId> {
        match self.router_ref(router) {
            Ok(r) => r.local.get(&proto).copied(),
            Err(_) => None,
        }
    }

    /// Whether the router's scope hosts per-voice clones.
    pub fn is_polyphonic(&self, router: NodeId) -> bool {
        self.router_head(router)
            .ok()
            .and_then(|head| self.lineage(head))
            .map(|lineage| lineage.polyphonic)
            .unwrap_or(false)
    }

    /// Nearest enclosing polyphonic router (including `node` itself).
    pub fn poly_router(&self, node: NodeId) -> Option<NodeId> {
        let mut current = Some(node);
        while let Some(id) = current {
            if self.router_head(id).is_ok() && self.is_polyphonic(id) {
                return Some(id);
            }
            current = self.arena.get(id).and_then(|data| data.owner);
        }
        None
    }

    /// Nearest enclosing monophonic router (including `node` itself).
    pub fn mono_router(&self, node: NodeId) -> Option<NodeId> {
        let mut current = Some(node);
        while let Some(id) = current {
            if self.router_head(id).is_ok() && !self.is_polyphonic(id) {
                return Some(id);
            }
            current = self.arena.get(id).and_then(|data| data.owner);
        }
        None
    }

    // --- Node state ---

    /// Whether the node is currently scheduled.
    pub fn enabled(&self, node: NodeId) -> bool {
        self.arena
            .get(node)
            .map(|data| data.enabled)
            .unwrap_or(false)
    }

    /// Forces a node's enabled flag.
    ///
    /// Disabling clears the node's outputs so downstream consumers read
    /// silence, not stale data.
    pub fn set_enabled(&mut self, node: NodeId, enabled: bool) -> Result<(), GraphError> {
        {
            let data = self.data_mut(node)?;
            data.enabled = enabled;
            if !enabled {
                for buffer in &mut data.outputs {
                    buffer.clear();
                }
            }
        }
        self.bump_chain(node);
        Ok(())
    }

    /// Number of inputs currently referencing a producer.
    pub fn connected_inputs(&self, node: NodeId) -> usize {
        self.arena
            .get(node)
            .map(|data| {
                data.inputs
                    .iter()
                    .filter(|source| source.is_connected())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Whether the node runs at control rate (one value per block).
    pub fn is_control_rate(&self, node: NodeId) -> bool {
        self.arena
            .get(node)
            .map(|data| data.control_rate)
            .unwrap_or(false)
    }

    /// Switches a node between audio and control rate, resizing its buffers.
    pub fn set_control_rate(&mut self, node: NodeId, control_rate: bool) -> Result<(), GraphError> {
        {
            let data = self.data_mut(node)?;
            data.control_rate = control_rate;
            let oversample = data.oversample;
            for buffer in &mut data.outputs {
                buffer.reconfigure(control_rate, oversample);
            }
            if let Some(NodeKind::Feedback(feedback)) = data.kind.as_mut() {
                feedback.reconfigure(control_rate, oversample);
            }
        }
        self.bump_chain(node);
        Ok(())
    }

    /// A node's oversampling factor.
    pub fn oversample(&self, node: NodeId) -> usize {
        self.arena
            .get(node)
            .map(|data| data.oversample)
            .unwrap_or(1)
    }

    /// Sets a node's oversampling factor, resizing buffers proportionally.
    ///
    /// Routers propagate the factor to every lineage member (scheduled,
    /// idle, and feedback nodes); voice clones pick it up at their next sync.
    pub fn set_oversample(&mut self, node: NodeId, oversample: usize) -> Result<(), GraphError> {
        self.data(node)?;
        self.apply_oversample(node, oversample.max(1));
        self.bump_chain(node);
        if let Ok(head) = self.router_head(node)
            && let Some(lineage) = self.lineage_mut(head)
        {
            lineage.epoch += 1;
        }
        Ok(())
    }

    /// Sets the base sample rate for the whole graph.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        for id in self.arena.ids() {
            if let Some(data) = self.arena.get_mut(id) {
                data.sample_rate = sample_rate;
                let effective = sample_rate * data.oversample.max(1) as f32;
                if let Some(NodeKind::Operator(kernel)) = data.kind.as_mut() {
                    kernel.set_sample_rate(effective);
                }
            }
        }
    }

    /// Resets a node (and, for routers, its materialized subtree) to its
    /// initial state: kernel state, feedback history, output buffers.
    pub fn reset(&mut self, node: NodeId) {
        let Some(kind) = self.arena.take_kind(node) else {
            return;
        };
        match kind {
            NodeKind::Operator(mut kernel) => {
                kernel.reset();
                self.arena.put_kind(node, NodeKind::Operator(kernel));
            }
            NodeKind::Feedback(mut feedback) => {
                feedback.clear();
                self.arena.put_kind(node, NodeKind::Feedback(feedback));
            }
            NodeKind::Router(router) => {
                let members: Vec<NodeId> = router
                    .local_order
                    .iter()
                    .chain(router.local_feedbacks.iter())
                    .copied()
                    .collect();
                self.arena.put_kind(node, NodeKind::Router(router));
                for member in members {
                    self.reset(member);
                }
            }
        }
        if let Some(data) = self.arena.get_mut(node) {
            for buffer in &mut data.outputs {
                buffer.clear();
            }
        }
    }

    /// Reads a node's output buffer.
    pub fn output(&self, node: NodeId, port: usize) -> Option<&[PolyF32]> {
        self.arena
            .get(node)?
            .outputs
            .get(port)
            .map(|buffer| buffer.as_slice())
    }

    /// Reads a node's auxiliary first-sample snapshot.
    pub fn trigger_value(&self, node: NodeId, port: usize) -> Option<PolyF32> {
        self.arena
            .get(node)?
            .outputs
            .get(port)
            .map(|buffer| buffer.trigger_value())
    }

    /// Borrows the concrete kernel of an operator node.
    pub fn operator_ref<T: Processor>(&self, node: NodeId) -> Option<&T> {
        match self.arena.get(node)?.kind.as_ref()? {
            NodeKind::Operator(kernel) => (kernel.as_ref() as &dyn Any).downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Mutably borrows the concrete kernel of an operator node.
    pub fn operator_mut<T: Processor>(&mut self, node: NodeId) -> Option<&mut T> {
        match self.arena.get_mut(node)?.kind.as_mut()? {
            NodeKind::Operator(kernel) => (kernel.as_mut() as &mut dyn Any).downcast_mut::<T>(),
            _ => None,
        }
    }

    // --- Execution ---

    /// Processes one block through the root router.
    ///
    /// `num_samples` is the block size at the root's oversampling factor and
    /// must not exceed `MAX_BLOCK_SIZE` times that factor.
    pub fn process(&mut self, num_samples: usize) {
        let root = self.root;
        self.run_router(root, num_samples);
    }

    /// Processes one block through a specific router instance (a voice clone
    /// or detached subgraph).
    pub fn process_router(&mut self, router: NodeId, num_samples: usize) -> Result<(), GraphError> {
        self.router_head(router)?;
        self.run_router(router, num_samples);
        Ok(())
    }

    fn run_router(&mut self, rid: NodeId, num_samples: usize) {
        let router_oversample = match self.arena.get(rid) {
            Some(data) => data.oversample.max(1),
            None => return,
        };
        debug_assert!(num_samples >= 1 && num_samples <= MAX_BLOCK_SIZE * router_oversample);

        let mut router = match self.arena.take_kind(rid) {
            Some(NodeKind::Router(router)) => router,
            Some(other) => {
                self.arena.put_kind(rid, other);
                return;
            }
            None => return,
        };

        self.sync_router(rid, &mut router);

        // Feedback emission first: every cyclic read observes last block's
        // value consistently for the whole block.
        for index in 0..router.local_feedbacks.len() {
            let id = router.local_feedbacks[index];
            let n = self.samples_for(id, num_samples, router_oversample);
            self.refresh_feedback(id, n);
        }

        for index in 0..router.local_order.len() {
            let id = router.local_order[index];
            let Some(data) = self.arena.get(id) else {
                continue;
            };
            if !data.enabled {
                continue;
            }
            let n = self.samples_for(id, num_samples, router_oversample);
            match data.kind.as_ref() {
                Some(NodeKind::Router(_)) => self.run_router(id, n),
                Some(NodeKind::Operator(_)) => self.run_operator(id, n),
                _ => {}
            }
        }

        // Feedback capture last: record this block for the next one.
        for index in 0..router.local_feedbacks.len() {
            let id = router.local_feedbacks[index];
            let n = self.samples_for(id, num_samples, router_oversample);
            self.capture_feedback(id, n);
        }

        self.arena.put_kind(rid, NodeKind::Router(router));
    }

    fn samples_for(&self, id: NodeId, num_samples: usize, router_oversample: usize) -> usize {
        match self.arena.get(id) {
            Some(data) if data.control_rate => 1,
            Some(data) => {
                ((num_samples * data.oversample.max(1)) / router_oversample).max(1)
            }
            None => num_samples,
        }
    }

    fn run_operator(&mut self, id: NodeId, num_samples: usize) {
        let Some(kind) = self.arena.take_kind(id) else {
            return;
        };
        let mut kernel = match kind {
            NodeKind::Operator(kernel) => kernel,
            other => {
                self.arena.put_kind(id, other);
                return;
            }
        };
        let mut outputs = self.arena.take_outputs(id);
        if let Some(data) = self.arena.get(id) {
            let oversample = data.oversample.max(1);
            let mut ctx = ProcessContext {
                arena: &self.arena,
                sources: &data.inputs[..],
                outputs: &mut outputs[..],
                num_samples,
                sample_rate: data.sample_rate * oversample as f32,
                oversample,
            };
            kernel.process(&mut ctx);
        }
        #[cfg(debug_assertions)]
        for buffer in &outputs {
            let len = num_samples.min(buffer.len());
            debug_assert!(
                buffer.samples(len).iter().all(|s| s.is_finite()),
                "non-finite output from {id}"
            );
        }
        self.arena.put_outputs(id, outputs);
        self.arena.put_kind(id, NodeKind::Operator(kernel));
    }

    fn refresh_feedback(&mut self, id: NodeId, num_samples: usize) {
        if !self.enabled(id) {
            return;
        }
        let Some(kind) = self.arena.take_kind(id) else {
            return;
        };
        let feedback = match kind {
            NodeKind::Feedback(feedback) => feedback,
            other => {
                self.arena.put_kind(id, other);
                return;
            }
        };
        let mut outputs = self.arena.take_outputs(id);
        if let Some(buffer) = outputs.first_mut() {
            feedback.refresh_output(buffer, num_samples);
        }
        self.arena.put_outputs(id, outputs);
        self.arena.put_kind(id, NodeKind::Feedback(feedback));
    }

    fn capture_feedback(&mut self, id: NodeId, num_samples: usize) {
        if !self.enabled(id) {
            return;
        }
        let Some(kind) = self.arena.take_kind(id) else {
            return;
        };
        let mut feedback = match kind {
            NodeKind::Feedback(feedback) => feedback,
            other => {
                self.arena.put_kind(id, other);
                return;
            }
        };
        let source = self
            .arena
            .get(id)
            .and_then(|data| data.inputs.first().copied())
            .unwrap_or(Source::Silence);
        feedback.capture(self.arena.resolve(source, num_samples));
        self.arena.put_kind(id, NodeKind::Feedback(feedback));
    }

    // --- Voice synchronization ---

    fn sync_router(&mut self, rid: NodeId, router: &mut Router) {
        let (epoch, order, feedbacks) = match router.lineage.as_ref() {
            Some(lineage) => (
                lineage.epoch,
                lineage.order.clone(),
                lineage.feedbacks.clone(),
            ),
            None => match self.lineage(router.head) {
                Some(lineage) => (
                    lineage.epoch,
                    lineage.order.clone(),
                    lineage.feedbacks.clone(),
                ),
                None => return,
            },
        };
        if router.seen_epoch == epoch {
            return;
        }

        let is_head = router.is_head();

        // Additions: clone stateful prototypes, share stateless ones.
        for &proto in order.iter().chain(feedbacks.iter()) {
            if router.local.contains_key(&proto) {
                continue;
            }
            let instance = if !is_head && self.node_has_state(proto) {
                self.clone_node_for_voice(proto, rid)
            } else {
                proto
            };
            router.local.insert(proto, instance);
        }

        // Removals: drop vanished prototypes, free their clones.
        let keep: BTreeSet<NodeId> = order.iter().chain(feedbacks.iter()).copied().collect();
        let stale: Vec<(NodeId, NodeId)> = router
            .local
            .iter()
            .filter(|(proto, _)| !keep.contains(proto))
            .map(|(proto, instance)| (*proto, *instance))
            .collect();
        for (proto, instance) in stale {
            router.local.remove(&proto);
            if instance != proto {
                self.destroy_subtree(instance);
            }
        }

        // Rewire clone inputs through the local map and refresh copied flags.
        if !is_head {
            let pairs: Vec<(NodeId, NodeId)> = router
                .local
                .iter()
                .map(|(proto, instance)| (*proto, *instance))
                .collect();
            for (proto, instance) in pairs {
                if instance != proto {
                    self.refresh_clone(proto, instance, &router.local);
                }
            }
        }

        router.local_order = order
            .iter()
            .map(|proto| router.local.get(proto).copied().unwrap_or(*proto))
            .collect();
        router.local_feedbacks = feedbacks
            .iter()
            .map(|proto| router.local.get(proto).copied().unwrap_or(*proto))
            .collect();
        router.seen_epoch = epoch;
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "graph_sync: router {} materialized {} nodes",
            router.node,
            router.local_order.len()
        );
    }

    fn node_has_state(&self, id: NodeId) -> bool {
        self.arena
            .get(id)
            .and_then(|data| data.kind.as_ref())
            .map(|kind| kind.has_state())
            .unwrap_or(false)
    }

    fn clone_node_for_voice(&mut self, proto: NodeId, owner: NodeId) -> NodeId {
        enum Seed {
            Operator(Box<dyn Processor>),
            Router(NodeId),
            Feedback,
        }

        let Some(data) = self.arena.get(proto) else {
            return proto;
        };
        let seed = match data.kind.as_ref() {
            Some(NodeKind::Operator(kernel)) => Seed::Operator(kernel.clone_box()),
            Some(NodeKind::Router(router)) => Seed::Router(router.head),
            Some(NodeKind::Feedback(_)) => Seed::Feedback,
            None => return proto,
        };
        let inputs = data.inputs.clone();
        let control_rate = data.control_rate;
        let oversample = data.oversample;
        let sample_rate = data.sample_rate;
        let enabled = data.enabled;
        let num_outputs = data.outputs.len();

        let id = self.arena.insert_with(|id| NodeData {
            kind: Some(match seed {
                Seed::Operator(kernel) => NodeKind::Operator(kernel),
                Seed::Router(head) => NodeKind::Router(Router::new_clone(id, head)),
                Seed::Feedback => NodeKind::Feedback(Feedback::new(control_rate, oversample)),
            }),
            inputs,
            outputs: (0..num_outputs)
                .map(|_| {
                    if control_rate {
                        SignalBuffer::control()
                    } else {
                        SignalBuffer::audio(oversample)
                    }
                })
                .collect(),
            owner: Some(owner),
            proto: Some(proto),
            enabled,
            control_rate,
            oversample,
            sample_rate,
        });
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_clone: {proto} → voice instance {id}");
        id
    }

    fn refresh_clone(
        &mut self,
        proto: NodeId,
        instance: NodeId,
        map: &BTreeMap<NodeId, NodeId>,
    ) {
        let Some(proto_data) = self.arena.get(proto) else {
            return;
        };
        let mapped: Vec<Source> = proto_data
            .inputs
            .iter()
            .map(|source| match source {
                Source::Port { node, port } => match map.get(node) {
                    Some(local) => Source::Port {
                        node: *local,
                        port: *port,
                    },
                    None => *source,
                },
                Source::Silence => Source::Silence,
            })
            .collect();
        let enabled = proto_data.enabled;
        let control_rate = proto_data.control_rate;
        let oversample = proto_data.oversample;
        let sample_rate = proto_data.sample_rate;

        let Some(data) = self.arena.get_mut(instance) else {
            return;
        };
        data.inputs = mapped;
        data.enabled = enabled;
        data.sample_rate = sample_rate;
        if data.control_rate != control_rate || data.oversample != oversample {
            data.control_rate = control_rate;
            data.oversample = oversample;
            for buffer in &mut data.outputs {
                buffer.reconfigure(control_rate, oversample);
            }
            match data.kind.as_mut() {
                Some(NodeKind::Operator(kernel)) => {
                    kernel.set_oversample(oversample);
                    kernel.set_sample_rate(sample_rate * oversample as f32);
                }
                Some(NodeKind::Feedback(feedback)) => {
                    feedback.reconfigure(control_rate, oversample);
                }
                _ => {}
            }
        }
    }

    // --- Ordering ---

    /// Rebuilds the scope's order so every dependency of `node` precedes it:
    /// three stable partitions (dependencies, the node, everything else).
    /// Propagates to the parent scope, where `node` resolves to the nested
    /// router that contains it.
    fn reorder(&mut self, scope: NodeId, node: NodeId) {
        let dependencies = self.dependencies(scope, node);
        if !dependencies.is_empty()
            && let Some(context) = self.context(scope, node)
            && let Ok(head) = self.router_head(scope)
            && let Some(lineage) = self.lineage_mut(head)
        {
            let mut front = Vec::with_capacity(lineage.order.len());
            let mut back = Vec::new();
            for &id in &lineage.order {
                if id == context {
                    continue;
                }
                if dependencies.contains(&id) {
                    front.push(id);
                } else {
                    back.push(id);
                }
            }
            front.push(context);
            front.append(&mut back);
            lineage.order = front;
            lineage.epoch += 1;
            #[cfg(feature = "tracing")]
            tracing::debug!("graph_reorder: {context} in scope {scope}");
        }
        let parent = self.arena.get(scope).and_then(|data| data.owner);
        if let Some(parent) = parent {
            self.reorder(parent, node);
        }
    }

    /// Upstream set of `node` at `scope` granularity: breadth-first over
    /// input edges, never crossing feedback nodes, with every reached
    /// producer resolved to its context (nearest ancestor directly owned by
    /// `scope`). The queried node's own context is excluded.
    fn dependencies(&self, scope: NodeId, node: NodeId) -> BTreeSet<NodeId> {
        let own_context = self.context(scope, node);
        let mut dependencies = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();
        visited.insert(node);
        queue.push_back(node);

        while let Some(current) = queue.pop_front() {
            let Some(data) = self.arena.get(current) else {
                continue;
            };
            // A nested router depends on whatever feeds its members.
            if let Some(NodeKind::Router(router)) = data.kind.as_ref()
                && let Some(lineage) = self.lineage(router.head)
            {
                for &member in lineage.order.iter().chain(lineage.idle.iter()) {
                    if visited.insert(member) {
                        queue.push_back(member);
                    }
                }
            }
            for source in &data.inputs {
                let Source::Port { node: src, .. } = source else {
                    continue;
                };
                let Some(src_data) = self.arena.get(*src) else {
                    continue;
                };
                // Feedback edges are excluded from the dependency relation;
                // they break cycles in time, not in the order.
                if matches!(src_data.kind.as_ref(), Some(NodeKind::Feedback(_))) {
                    continue;
                }
                if let Some(context) = self.context(scope, *src)
                    && Some(context) != own_context
                {
                    dependencies.insert(context);
                }
                if visited.insert(*src) {
                    queue.push_back(*src);
                }
            }
        }
        dependencies
    }

    /// The ancestor of `node` directly owned by `scope`, if any.
    fn context(&self, scope: NodeId, node: NodeId) -> Option<NodeId> {
        let mut current = node;
        loop {
            let owner = self.arena.get(current)?.owner?;
            if owner == scope {
                return Some(current);
            }
            current = owner;
        }
    }

    /// Would the edge `src → dst` close a cycle at `scope`?
    fn edge_closes_cycle(&self, scope: NodeId, src: NodeId, dst: NodeId) -> bool {
        let ctx_src = self.context(scope, src);
        let ctx_dst = self.context(scope, dst);
        // Same context covers the direct self-loop and edges between nodes
        // that collapse to one nested router at this scope.
        if ctx_src.is_some() && ctx_src == ctx_dst {
            return true;
        }
        match ctx_dst {
            Some(context) => self.dependencies(scope, src).contains(&context),
            None => false,
        }
    }

    // --- Internal helpers ---

    fn data(&self, id: NodeId) -> Result<&NodeData, GraphError> {
        self.arena.get(id).ok_or(GraphError::NodeNotFound(id))
    }

    fn data_mut(&mut self, id: NodeId) -> Result<&mut NodeData, GraphError> {
        self.arena.get_mut(id).ok_or(GraphError::NodeNotFound(id))
    }

    fn router_ref(&self, id: NodeId) -> Result<&Router, GraphError> {
        match self.data(id)?.kind.as_ref() {
            Some(NodeKind::Router(router)) => Ok(router),
            _ => Err(GraphError::NotARouter(id)),
        }
    }

    fn router_head(&self, id: NodeId) -> Result<NodeId, GraphError> {
        Ok(self.router_ref(id)?.head)
    }

    fn lineage(&self, head: NodeId) -> Option<&Lineage> {
        match self.arena.get(head)?.kind.as_ref()? {
            NodeKind::Router(router) => router.lineage.as_ref(),
            _ => None,
        }
    }

    fn lineage_mut(&mut self, head: NodeId) -> Option<&mut Lineage> {
        match self.arena.get_mut(head)?.kind.as_mut()? {
            NodeKind::Router(router) => router.lineage.as_mut(),
            _ => None,
        }
    }

    /// Bumps the change epoch of every router lineage along `node`'s owner
    /// chain, so all affected clones resynchronize lazily.
    fn bump_chain(&mut self, node: NodeId) {
        let mut current = node;
        while let Some(owner) = self.arena.get(current).and_then(|data| data.owner) {
            if let Ok(head) = self.router_head(owner)
                && let Some(lineage) = self.lineage_mut(head)
            {
                lineage.epoch += 1;
            }
            current = owner;
        }
    }

    fn inputs_updated(&mut self, node: NodeId) {
        let Some(data) = self.arena.get_mut(node) else {
            return;
        };
        let connected = data
            .inputs
            .iter()
            .filter(|source| source.is_connected())
            .count();
        let mut auto_enable = None;
        if let Some(NodeKind::Operator(kernel)) = data.kind.as_mut() {
            kernel.inputs_changed(connected);
            if kernel.tracks_connected_inputs() {
                auto_enable = Some(connected > 0);
            }
        }
        if let Some(enable) = auto_enable {
            data.enabled = enable;
            if !enable {
                for buffer in &mut data.outputs {
                    buffer.clear();
                }
            }
        }
    }

    fn is_feedback(&self, id: NodeId) -> bool {
        matches!(
            self.arena.get(id).and_then(|data| data.kind.as_ref()),
            Some(NodeKind::Feedback(_))
        )
    }

    fn feedback_source(&self, id: NodeId) -> Option<Source> {
        let data = self.arena.get(id)?;
        match data.kind.as_ref()? {
            NodeKind::Feedback(_) => data.inputs.first().copied(),
            _ => None,
        }
    }

    fn feedback_in_use(&self, feedback: NodeId) -> bool {
        let target = Source::Port {
            node: feedback,
            port: 0,
        };
        self.arena.ids().into_iter().any(|id| {
            self.arena
                .get(id)
                .is_some_and(|data| data.inputs.contains(&target))
        })
    }

    fn remove_feedback(&mut self, feedback: NodeId) {
        let owner = self.arena.get(feedback).and_then(|data| data.owner);
        if let Some(owner) = owner
            && let Ok(head) = self.router_head(owner)
            && let Some(lineage) = self.lineage_mut(head)
        {
            lineage.feedbacks.retain(|id| *id != feedback);
            lineage.epoch += 1;
        }
        self.arena.free(feedback);
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_disconnect: feedback {feedback} removed");
    }

    fn apply_oversample(&mut self, node: NodeId, oversample: usize) {
        if let Some(data) = self.arena.get_mut(node) {
            data.oversample = oversample;
            let control_rate = data.control_rate;
            let sample_rate = data.sample_rate;
            for buffer in &mut data.outputs {
                buffer.reconfigure(control_rate, oversample);
            }
            match data.kind.as_mut() {
                Some(NodeKind::Operator(kernel)) => {
                    kernel.set_oversample(oversample);
                    kernel.set_sample_rate(sample_rate * oversample as f32);
                }
                Some(NodeKind::Feedback(feedback)) => {
                    feedback.reconfigure(control_rate, oversample);
                }
                _ => {}
            }
        }
        let members: Option<Vec<NodeId>> =
            match self.arena.get(node).and_then(|data| data.kind.as_ref()) {
                Some(NodeKind::Router(router)) => self.lineage(router.head).map(|lineage| {
                    lineage
                        .order
                        .iter()
                        .chain(lineage.idle.iter())
                        .chain(lineage.feedbacks.iter())
                        .copied()
                        .collect()
                }),
                _ => None,
            };
        if let Some(members) = members {
            for member in members {
                self.apply_oversample(member, oversample);
            }
        }
    }

    fn destroy_subtree(&mut self, node: NodeId) {
        let instances: Vec<NodeId> =
            match self.arena.get(node).and_then(|data| data.kind.as_ref()) {
                Some(NodeKind::Router(router)) => router
                    .local
                    .iter()
                    .filter(|(proto, instance)| proto != instance)
                    .map(|(_, instance)| *instance)
                    .collect(),
                _ => Vec::new(),
            };
        for instance in instances {
            self.destroy_subtree(instance);
        }
        self.arena.free(node);
    }
}
