//! In-process renderer for the node graph.
//!
//! `channel` splits the graph into a control half (`GraphHandle`, which
//! implements `AudioContext`) and a render half (`GraphRenderer`, owned by the
//! audio callback). They share two SPSC ring buffers and a frame counter:
//!
//!   control ──Command──▶ render      node slots, edges, param and gate events
//!   control ◀──Garbage── render      released slots, dropped on the control side
//!
//! Nodes are constructed (and their buffers allocated) on the control side
//! and moved into the renderer inside `Command::Add`. The renderer never
//! frees a slot itself.
//!
//! Commands carry the context time they apply at. At the start of each block
//! the renderer drains the queue, then applies every pending command whose
//! time falls before the end of the block, in arrival order. Scheduling is
//! therefore block-accurate. Removals (`DisconnectAll`, `Release`) wait one
//! block longer: they apply only after a whole block starting at or after
//! their time has rendered, so a fade that ends at that time is heard to zero.
//!
//! The render side never grows a buffer. Every collection is sized by
//! `channel`'s capacity; work past a bound is refused or postponed and counted
//! in `RenderStats`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::{Consumer, Producer, PushError, RingBuffer};

use super::context::{
    AudioContext, ContextError, ContextResult, NodeId, NodeKind, NodeSpec, ParamRef,
};
use super::node::{GraphNode, Param, RenderCtx};
use super::{build_node, MAX_PARAMS};
use crate::dsp::modulate::{apply_modulation, block_average};
use crate::{MAX_BLOCK_SIZE, MAX_POLYPHONY};

/// Audio inputs one node accepts. The pool's mixer takes every sounding voice
/// plus the ones still fading after a steal.
pub const MAX_INPUTS: usize = MAX_POLYPHONY * 4;

/// Modulation edges one node accepts.
pub const MAX_PARAM_INPUTS: usize = 8;

/// Average edges per node the renderer reserves room for.
const EDGES_PER_NODE: usize = 8;

/// A node as the renderer stores it.
struct NodeSlot {
    kind: NodeKind,
    node: Box<dyn GraphNode>,
    params: Vec<Param>,
    effective: Vec<f32>,
    inputs: Vec<NodeId>,
    param_inputs: Vec<(usize, NodeId)>,
    out: Vec<f32>,
}

impl NodeSlot {
    fn new(spec: NodeSpec) -> Self {
        let initial = spec.initial_params();
        Self {
            kind: spec.kind(),
            params: initial.iter().copied().map(Param::new).collect(),
            effective: initial,
            node: build_node(spec),
            inputs: Vec::with_capacity(MAX_INPUTS),
            param_inputs: Vec::with_capacity(MAX_PARAM_INPUTS),
            out: vec![0.0; MAX_BLOCK_SIZE],
        }
    }
}

enum Command {
    Add { id: NodeId, slot: Box<NodeSlot> },
    Connect { from: NodeId, to: NodeId },
    Disconnect { from: NodeId, to: NodeId },
    ConnectParam { from: NodeId, to: NodeId, index: usize },
    DisconnectParam { from: NodeId, to: NodeId, index: usize },
    ConnectDestination { node: NodeId },
    DisconnectAll { node: NodeId, at: f64 },
    Release { node: NodeId, at: f64 },
    SetParam { node: NodeId, index: usize, value: f32, at: f64 },
    RampParam { node: NodeId, index: usize, value: f32, at: f64, duration: f64 },
    Attack { node: NodeId, velocity: f32, at: f64 },
    Gate { node: NodeId, at: f64 },
}

impl Command {
    /// Context time the command takes effect; structural edits are immediate.
    fn at(&self) -> f64 {
        match self {
            Command::DisconnectAll { at, .. }
            | Command::Release { at, .. }
            | Command::SetParam { at, .. }
            | Command::RampParam { at, .. }
            | Command::Attack { at, .. }
            | Command::Gate { at, .. } => *at,
            _ => f64::NEG_INFINITY,
        }
    }

    fn is_removal(&self) -> bool {
        matches!(self, Command::DisconnectAll { .. } | Command::Release { .. })
    }
}

/// Work the renderer refused or put off instead of allocating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// `Add`s refused because the renderer already held `capacity` nodes.
    /// The slot goes back to the control side as garbage.
    pub refused_nodes: u64,
    /// Edges refused because a node's input list or the edge budget was full.
    pub refused_edges: u64,
    /// Blocks in which a due `Release` waited for room in the garbage queue.
    pub deferred_releases: u64,
}

/// Create a connected control/render pair.
pub fn channel(sample_rate: f32, capacity: usize) -> (GraphHandle, GraphRenderer) {
    let (commands, command_rx) = RingBuffer::new(capacity);
    let (garbage_tx, garbage) = RingBuffer::new(capacity);
    let frames = Arc::new(AtomicU64::new(0));

    let handle = GraphHandle {
        commands,
        garbage,
        frames: Arc::clone(&frames),
        sample_rate,
        next_id: 1,
        kinds: HashMap::new(),
    };
    let renderer = GraphRenderer {
        commands: command_rx,
        garbage: garbage_tx,
        frames,
        sample_rate,
        // Twice the node bound, so clearing tombstones rehashes in place.
        nodes: HashMap::with_capacity(capacity * 2),
        node_capacity: capacity,
        order: Vec::with_capacity(capacity),
        destination: Vec::with_capacity(MAX_INPUTS),
        pending: Vec::with_capacity(capacity),
        dirty: false,
        scratch: vec![0.0; MAX_BLOCK_SIZE],
        param_scratch: [0.0; MAX_PARAMS],
        ready: Vec::with_capacity(capacity),
        indegree: HashMap::with_capacity(capacity * 2),
        edges: Vec::with_capacity(capacity * EDGES_PER_NODE),
        edge_count: 0,
        last_block_start: f64::NEG_INFINITY,
        stats: RenderStats::default(),
    };
    (handle, renderer)
}

/// Control half. Validates every call against its own view of live nodes
/// before enqueueing, so errors surface synchronously.
pub struct GraphHandle {
    commands: Producer<Command>,
    garbage: Consumer<Box<NodeSlot>>,
    frames: Arc<AtomicU64>,
    sample_rate: f32,
    next_id: u32,
    kinds: HashMap<NodeId, NodeKind>,
}

impl GraphHandle {
    /// Drop slots the renderer has handed back.
    pub fn collect_garbage(&mut self) -> usize {
        let mut dropped = 0;
        while self.garbage.pop().is_ok() {
            dropped += 1;
        }
        dropped
    }

    pub fn live_count(&self) -> usize {
        self.kinds.len()
    }

    fn send(&mut self, command: Command) -> ContextResult {
        self.commands.push(command).map_err(|_| {
            log::warn!(target: "voicegraph::graph", "command queue full, dropping command");
            ContextError::QueueFull
        })
    }

    fn kind(&self, node: NodeId) -> ContextResult<NodeKind> {
        self.kinds
            .get(&node)
            .copied()
            .ok_or(ContextError::UnknownNode(node))
    }

    fn param_index(&self, param: ParamRef) -> ContextResult<usize> {
        self.kind(param.node)?
            .param_index(param.name)
            .ok_or_else(|| ContextError::UnknownParam {
                node: param.node,
                param: param.name.to_string(),
            })
    }

    fn gated(&self, node: NodeId) -> ContextResult {
        if self.kind(node)?.is_gated() {
            Ok(())
        } else {
            Err(ContextError::NotGated(node))
        }
    }
}

impl AudioContext for GraphHandle {
    fn now(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn create_node(&mut self, spec: NodeSpec) -> ContextResult<NodeId> {
        self.collect_garbage();

        let id = NodeId(self.next_id);
        let kind = spec.kind();
        let slot = Box::new(NodeSlot::new(spec));
        self.send(Command::Add { id, slot })?;

        self.next_id += 1;
        self.kinds.insert(id, kind);
        Ok(id)
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> ContextResult {
        self.kind(from)?;
        self.kind(to)?;
        self.send(Command::Connect { from, to })
    }

    fn disconnect(&mut self, from: NodeId, to: NodeId) -> ContextResult {
        self.kind(from)?;
        self.send(Command::Disconnect { from, to })
    }

    fn connect_param(&mut self, from: NodeId, to: ParamRef) -> ContextResult {
        self.kind(from)?;
        let index = self.param_index(to)?;
        self.send(Command::ConnectParam {
            from,
            to: to.node,
            index,
        })
    }

    fn disconnect_param(&mut self, from: NodeId, to: ParamRef) -> ContextResult {
        self.kind(from)?;
        let index = self.param_index(to)?;
        self.send(Command::DisconnectParam {
            from,
            to: to.node,
            index,
        })
    }

    fn connect_destination(&mut self, node: NodeId) -> ContextResult {
        self.kind(node)?;
        self.send(Command::ConnectDestination { node })
    }

    fn disconnect_all(&mut self, node: NodeId, at: f64) -> ContextResult {
        self.kind(node)?;
        self.send(Command::DisconnectAll { node, at })
    }

    fn release_node(&mut self, node: NodeId, at: f64) -> ContextResult {
        self.kind(node)?;
        self.send(Command::Release { node, at })?;
        self.kinds.remove(&node);
        Ok(())
    }

    fn set_param(&mut self, param: ParamRef, value: f32, at: f64) -> ContextResult {
        let index = self.param_index(param)?;
        self.send(Command::SetParam {
            node: param.node,
            index,
            value,
            at,
        })
    }

    fn ramp_param(&mut self, param: ParamRef, value: f32, at: f64, duration: f64) -> ContextResult {
        let index = self.param_index(param)?;
        self.send(Command::RampParam {
            node: param.node,
            index,
            value,
            at,
            duration,
        })
    }

    fn trigger_attack(&mut self, node: NodeId, at: f64, velocity: f32) -> ContextResult {
        self.gated(node)?;
        self.send(Command::Attack { node, velocity, at })
    }

    fn trigger_release(&mut self, node: NodeId, at: f64) -> ContextResult {
        self.gated(node)?;
        self.send(Command::Gate { node, at })
    }
}

/// Render half. Lives on the audio thread.
pub struct GraphRenderer {
    commands: Consumer<Command>,
    garbage: Producer<Box<NodeSlot>>,
    frames: Arc<AtomicU64>,
    sample_rate: f32,
    nodes: HashMap<NodeId, Box<NodeSlot>>,
    node_capacity: usize,
    order: Vec<NodeId>,
    destination: Vec<NodeId>,
    pending: Vec<Command>,
    dirty: bool,
    scratch: Vec<f32>,
    param_scratch: [f32; MAX_PARAMS],
    ready: Vec<NodeId>,
    indegree: HashMap<NodeId, usize>,
    /// `(source, dependent)` pairs, sorted by source while sorting the graph.
    edges: Vec<(NodeId, NodeId)>,
    /// Audio and parameter edges held across every slot.
    edge_count: usize,
    last_block_start: f64,
    stats: RenderStats,
}

impl GraphRenderer {
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn now(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    /// Effective value of a parameter during the last rendered block
    /// (base value plus modulation).
    pub fn param_value(&self, param: ParamRef) -> Option<f32> {
        let slot = self.nodes.get(&param.node)?;
        let index = slot.kind.param_index(param.name)?;
        slot.effective.get(index).copied()
    }

    /// Render `out.len()` frames (at most `MAX_BLOCK_SIZE`) of the mono mix.
    pub fn render_block(&mut self, out: &mut [f32]) {
        let frames = out.len().min(MAX_BLOCK_SIZE);
        let start = self.frames.load(Ordering::Acquire);
        let time = start as f64 / self.sample_rate as f64;
        let block_end = (start + frames as u64) as f64 / self.sample_rate as f64;

        self.apply_commands(block_end);
        self.last_block_start = time;
        if self.dirty {
            self.sort();
        }

        let ctx = RenderCtx {
            sample_rate: self.sample_rate,
            time,
        };

        for i in 0..self.order.len() {
            let id = self.order[i];
            let Some(slot) = self.nodes.get(&id) else {
                continue;
            };

            let input = &mut self.scratch[..frames];
            input.fill(0.0);
            for src in &slot.inputs {
                if let Some(source) = self.nodes.get(src) {
                    for (acc, x) in input.iter_mut().zip(&source.out[..frames]) {
                        *acc += x;
                    }
                }
            }

            let n_params = slot.params.len();
            for (p, param) in slot.params.iter().enumerate() {
                self.param_scratch[p] = param.value_at(time);
            }
            for (index, src) in &slot.param_inputs {
                if let Some(source) = self.nodes.get(src) {
                    let modulation = block_average(&source.out[..frames]);
                    self.param_scratch[*index] =
                        apply_modulation(self.param_scratch[*index], modulation, 1.0);
                }
            }

            let Some(slot) = self.nodes.get_mut(&id) else {
                continue;
            };
            let params = &self.param_scratch[..n_params];
            slot.node
                .process(&self.scratch[..frames], &mut slot.out[..frames], params, &ctx);
            slot.effective.copy_from_slice(params);
            for param in slot.params.iter_mut() {
                param.settle(block_end);
            }
        }

        out[..frames].fill(0.0);
        for id in &self.destination {
            if let Some(slot) = self.nodes.get(id) {
                for (o, x) in out[..frames].iter_mut().zip(&slot.out[..frames]) {
                    *o += x;
                }
            }
        }

        self.frames.fetch_add(frames as u64, Ordering::AcqRel);
    }

    fn apply_commands(&mut self, block_end: f64) {
        // The ring holds whatever does not fit yet.
        while self.pending.len() < self.pending.capacity() {
            match self.commands.pop() {
                Ok(command) => self.pending.push(command),
                Err(_) => break,
            }
        }

        let mut i = 0;
        while i < self.pending.len() {
            if self.is_due(&self.pending[i], block_end) {
                let command = self.pending.remove(i);
                if let Some(postponed) = self.apply(command) {
                    self.pending.insert(i, postponed);
                    i += 1;
                }
            } else {
                i += 1;
            }
        }
    }

    fn is_due(&self, command: &Command, block_end: f64) -> bool {
        if command.is_removal() {
            command.at() <= self.last_block_start
        } else {
            command.at() < block_end
        }
    }

    /// Apply one command. Returns it when it has to wait for a later block.
    fn apply(&mut self, command: Command) -> Option<Command> {
        match command {
            Command::Add { id, slot } => {
                if self.nodes.len() >= self.node_capacity {
                    return match self.garbage.push(slot) {
                        Ok(()) => {
                            self.stats.refused_nodes += 1;
                            None
                        }
                        Err(PushError::Full(slot)) => Some(Command::Add { id, slot }),
                    };
                }
                self.nodes.insert(id, slot);
                self.dirty = true;
            }
            Command::Connect { from, to } => {
                let room = self.edge_count < self.edges.capacity();
                if let Some(slot) = self.nodes.get_mut(&to) {
                    if !slot.inputs.contains(&from) {
                        if room && slot.inputs.len() < slot.inputs.capacity() {
                            slot.inputs.push(from);
                            self.edge_count += 1;
                            self.dirty = true;
                        } else {
                            self.stats.refused_edges += 1;
                        }
                    }
                }
            }
            Command::Disconnect { from, to } => {
                if let Some(slot) = self.nodes.get_mut(&to) {
                    let before = slot.inputs.len();
                    slot.inputs.retain(|n| *n != from);
                    self.edge_count -= before - slot.inputs.len();
                    self.dirty = true;
                }
            }
            Command::ConnectParam { from, to, index } => {
                let room = self.edge_count < self.edges.capacity();
                if let Some(slot) = self.nodes.get_mut(&to) {
                    if !slot.param_inputs.contains(&(index, from)) {
                        if room && slot.param_inputs.len() < slot.param_inputs.capacity() {
                            slot.param_inputs.push((index, from));
                            self.edge_count += 1;
                            self.dirty = true;
                        } else {
                            self.stats.refused_edges += 1;
                        }
                    }
                }
            }
            Command::DisconnectParam { from, to, index } => {
                if let Some(slot) = self.nodes.get_mut(&to) {
                    let before = slot.param_inputs.len();
                    slot.param_inputs.retain(|edge| *edge != (index, from));
                    self.edge_count -= before - slot.param_inputs.len();
                    self.dirty = true;
                }
            }
            Command::ConnectDestination { node } => {
                if !self.destination.contains(&node) {
                    if self.destination.len() < self.destination.capacity() {
                        self.destination.push(node);
                    } else {
                        self.stats.refused_edges += 1;
                    }
                }
            }
            Command::DisconnectAll { node, .. } => self.detach(node),
            Command::Release { node, at } => {
                if let Some(slot) = self.nodes.remove(&node) {
                    let incoming = slot.inputs.len() + slot.param_inputs.len();
                    if let Err(PushError::Full(slot)) = self.garbage.push(slot) {
                        self.nodes.insert(node, slot);
                        self.stats.deferred_releases += 1;
                        return Some(Command::Release { node, at });
                    }
                    self.edge_count -= incoming;
                }
                self.detach(node);
            }
            Command::SetParam {
                node, index, value, ..
            } => {
                if let Some(param) = self.nodes.get_mut(&node).and_then(|s| s.params.get_mut(index)) {
                    param.set(value);
                }
            }
            Command::RampParam {
                node,
                index,
                value,
                at,
                duration,
            } => {
                if let Some(param) = self.nodes.get_mut(&node).and_then(|s| s.params.get_mut(index)) {
                    param.ramp_to(value, at, duration);
                }
            }
            Command::Attack { node, velocity, .. } => {
                if let Some(slot) = self.nodes.get_mut(&node) {
                    slot.node.note_on(velocity);
                }
            }
            Command::Gate { node, .. } => {
                let sample_rate = self.sample_rate;
                if let Some(slot) = self.nodes.get_mut(&node) {
                    slot.node.note_off(sample_rate);
                }
            }
        }
        None
    }

    /// Remove every edge leaving `node`.
    fn detach(&mut self, node: NodeId) {
        let mut removed = 0;
        for slot in self.nodes.values_mut() {
            let before = slot.inputs.len() + slot.param_inputs.len();
            slot.inputs.retain(|n| *n != node);
            slot.param_inputs.retain(|(_, n)| *n != node);
            removed += before - slot.inputs.len() - slot.param_inputs.len();
        }
        self.edge_count -= removed;
        self.destination.retain(|n| *n != node);
        self.dirty = true;
    }

    /// Kahn's algorithm over audio and parameter edges. Nodes left over by a
    /// cycle are appended in id order and read their sources' previous block.
    fn sort(&mut self) {
        self.order.clear();
        self.ready.clear();
        self.indegree.clear();
        self.edges.clear();

        for (id, slot) in &self.nodes {
            let mut degree = 0;
            for source in slot.inputs.iter().chain(slot.param_inputs.iter().map(|(_, n)| n)) {
                if self.nodes.contains_key(source) {
                    self.edges.push((*source, *id));
                    degree += 1;
                }
            }
            self.indegree.insert(*id, degree);
            if degree == 0 {
                self.ready.push(*id);
            }
        }
        self.edges.sort_unstable();
        self.ready.sort_unstable();

        while let Some(id) = self.ready.pop() {
            self.order.push(id);
            let first = self.edges.partition_point(|(source, _)| *source < id);
            let last = self.edges.partition_point(|(source, _)| *source <= id);
            for &(_, dependent) in &self.edges[first..last] {
                if let Some(degree) = self.indegree.get_mut(&dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        self.ready.push(dependent);
                    }
                }
            }
        }

        if self.order.len() < self.nodes.len() {
            // `ready` is empty here and doubles as scratch.
            for (id, degree) in &self.indegree {
                if *degree > 0 {
                    self.ready.push(*id);
                }
            }
            self.ready.sort_unstable();
            self.order.extend_from_slice(&self.ready);
            self.ready.clear();
        }
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::{EnvelopeShape, Waveform};

    const SR: f32 = 48_000.0;

    fn render(renderer: &mut GraphRenderer, blocks: usize) -> Vec<f32> {
        let mut all = Vec::new();
        let mut block = [0.0; 128];
        for _ in 0..blocks {
            renderer.render_block(&mut block);
            all.extend_from_slice(&block);
        }
        all
    }

    fn osc(handle: &mut GraphHandle) -> NodeId {
        handle
            .create_node(NodeSpec::Oscillator {
                waveform: Waveform::Sine,
                frequency: 440.0,
                detune: 0.0,
            })
            .unwrap()
    }

    #[test]
    fn test_silence_without_destination() {
        let (mut handle, mut renderer) = channel(SR, 64);
        osc(&mut handle);
        let out = render(&mut renderer, 2);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_oscillator_reaches_output_through_gain() {
        let (mut handle, mut renderer) = channel(SR, 64);
        let o = osc(&mut handle);
        let g = handle.create_node(NodeSpec::Gain { gain: 0.5 }).unwrap();
        handle.connect(o, g).unwrap();
        handle.connect_destination(g).unwrap();

        let out = render(&mut renderer, 4);
        let peak = out.iter().fold(0.0f32, |acc, x| acc.max(x.abs()));
        assert!((peak - 0.5).abs() < 0.01, "peak {peak}");
    }

    #[test]
    fn test_clock_advances_by_rendered_frames() {
        let (handle, mut renderer) = channel(SR, 64);
        render(&mut renderer, 375);
        assert!((handle.now() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_scheduled_set_waits_for_its_block() {
        let (mut handle, mut renderer) = channel(SR, 64);
        let g = handle.create_node(NodeSpec::Gain { gain: 0.0 }).unwrap();
        let gain = ParamRef::new(g, "gain");
        handle.set_param(gain, 1.0, 0.01).unwrap();

        render(&mut renderer, 1);
        assert_eq!(renderer.param_value(gain), Some(0.0));
        render(&mut renderer, 4);
        assert_eq!(renderer.param_value(gain), Some(1.0));
    }

    #[test]
    fn test_envelope_modulates_parameter() {
        let (mut handle, mut renderer) = channel(SR, 64);
        let env = handle
            .create_node(NodeSpec::Envelope {
                shape: EnvelopeShape::new(0.001, 0.001, 0.5, 0.1),
            })
            .unwrap();
        let amount = handle.create_node(NodeSpec::Gain { gain: 100.0 }).unwrap();
        let o = osc(&mut handle);
        handle.connect(env, amount).unwrap();
        let detune = ParamRef::new(o, "detune");
        handle.connect_param(amount, detune).unwrap();
        handle.trigger_attack(env, 0.0, 1.0).unwrap();

        render(&mut renderer, 20);
        let value = renderer.param_value(detune).unwrap();
        assert!((value - 50.0).abs() < 0.5, "detune {value}");
    }

    #[test]
    fn test_release_returns_slot_to_control_side() {
        let (mut handle, mut renderer) = channel(SR, 64);
        let g = handle.create_node(NodeSpec::Gain { gain: 1.0 }).unwrap();
        render(&mut renderer, 1);
        assert_eq!(renderer.node_count(), 1);

        handle.release_node(g, 0.0).unwrap();
        render(&mut renderer, 1);
        assert_eq!(renderer.node_count(), 0);
        assert_eq!(handle.collect_garbage(), 1);
        assert_eq!(
            handle.set_param(ParamRef::new(g, "gain"), 0.0, 0.0),
            Err(ContextError::UnknownNode(g))
        );
    }

    #[test]
    fn test_full_queue_reports_error() {
        let (mut handle, _renderer) = channel(SR, 2);
        handle.create_node(NodeSpec::Gain { gain: 1.0 }).unwrap();
        handle.create_node(NodeSpec::Gain { gain: 1.0 }).unwrap();
        assert_eq!(
            handle.create_node(NodeSpec::Gain { gain: 1.0 }),
            Err(ContextError::QueueFull)
        );
        assert_eq!(handle.live_count(), 2);
    }

    #[test]
    fn test_release_waits_until_fade_has_rendered() {
        let (mut handle, mut renderer) = channel(SR, 64);
        let o = osc(&mut handle);
        let g = handle.create_node(NodeSpec::Gain { gain: 1.0 }).unwrap();
        handle.connect(o, g).unwrap();
        handle.connect_destination(g).unwrap();
        let gain = ParamRef::new(g, "gain");
        handle.ramp_param(gain, 0.0, 0.0, 0.01).unwrap();
        handle.disconnect_all(g, 0.01).unwrap();
        handle.release_node(g, 0.01).unwrap();

        let mut last = None;
        let mut block = [0.0; 128];
        for _ in 0..16 {
            renderer.render_block(&mut block);
            match renderer.param_value(gain) {
                Some(value) => last = Some((value, block)),
                None => break,
            }
        }

        let (value, block) = last.unwrap();
        assert_eq!(value, 0.0);
        assert!(block[127].abs() < 1e-6);
        assert_eq!(renderer.param_value(gain), None);
    }

    #[test]
    fn test_timed_edits_still_land_in_their_block() {
        let (mut handle, mut renderer) = channel(SR, 64);
        let g = handle.create_node(NodeSpec::Gain { gain: 1.0 }).unwrap();
        render(&mut renderer, 1);
        let now = handle.now();
        handle.set_param(ParamRef::new(g, "gain"), 0.5, now).unwrap();
        handle.release_node(g, now).unwrap();

        render(&mut renderer, 1);
        assert_eq!(renderer.param_value(ParamRef::new(g, "gain")), Some(0.5));
        render(&mut renderer, 1);
        assert_eq!(renderer.node_count(), 0);
    }

    #[test]
    fn test_full_garbage_queue_defers_release() {
        let (mut handle, mut renderer) = channel(SR, 1);
        let a = handle.create_node(NodeSpec::Gain { gain: 1.0 }).unwrap();
        render(&mut renderer, 1);

        // Past the node bound: handed straight back, filling the garbage queue.
        handle.create_node(NodeSpec::Gain { gain: 1.0 }).unwrap();
        render(&mut renderer, 1);
        assert_eq!(renderer.node_count(), 1);
        assert_eq!(renderer.stats().refused_nodes, 1);

        handle.release_node(a, 0.0).unwrap();
        render(&mut renderer, 2);
        assert_eq!(renderer.node_count(), 1);
        assert!(renderer.stats().deferred_releases >= 1);

        assert_eq!(handle.collect_garbage(), 1);
        render(&mut renderer, 1);
        assert_eq!(renderer.node_count(), 0);
        assert_eq!(handle.collect_garbage(), 1);
    }

    #[test]
    fn test_sources_render_before_dependents() {
        let (mut handle, mut renderer) = channel(SR, 64);
        // Created back to front so id order disagrees with signal flow.
        let out = handle.create_node(NodeSpec::Gain { gain: 1.0 }).unwrap();
        let mid = handle.create_node(NodeSpec::Gain { gain: 1.0 }).unwrap();
        let o = osc(&mut handle);
        handle.connect(o, mid).unwrap();
        handle.connect(mid, out).unwrap();
        handle.connect_destination(out).unwrap();

        let first = render(&mut renderer, 1);
        let peak = first.iter().fold(0.0f32, |acc, x| acc.max(x.abs()));
        assert!(peak > 0.5, "first block peak {peak}");
    }

    #[test]
    fn test_cycle_still_renders() {
        let (mut handle, mut renderer) = channel(SR, 64);
        let a = handle.create_node(NodeSpec::Gain { gain: 0.5 }).unwrap();
        let b = handle.create_node(NodeSpec::Gain { gain: 0.5 }).unwrap();
        let o = osc(&mut handle);
        handle.connect(o, a).unwrap();
        handle.connect(a, b).unwrap();
        handle.connect(b, a).unwrap();
        handle.connect_destination(b).unwrap();

        let out = render(&mut renderer, 8);
        assert!(out.iter().all(|s| s.is_finite()));
        assert!(out.iter().any(|s| s.abs() > 0.1));
        assert_eq!(renderer.node_count(), 3);
    }
}
