//! Recording context for exercising voice assembly without rendering audio.
//!
//! Every call is appended to an operation log and mirrored into a small
//! model of the graph (live nodes, audio edges, parameter edges, parameter
//! values). Tests assert against either. Scheduled operations are applied to
//! the model immediately; their `at` is only recorded.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::context::{
    AudioContext, ContextError, ContextResult, NodeId, NodeKind, NodeSpec, ParamRef,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ContextOp {
    Create { node: NodeId, kind: NodeKind },
    Connect { from: NodeId, to: NodeId },
    Disconnect { from: NodeId, to: NodeId },
    ConnectParam { from: NodeId, to: ParamRef },
    DisconnectParam { from: NodeId, to: ParamRef },
    ConnectDestination { node: NodeId },
    DisconnectAll { node: NodeId, at: f64 },
    Release { node: NodeId, at: f64 },
    SetParam { param: ParamRef, value: f32, at: f64 },
    RampParam { param: ParamRef, value: f32, at: f64, duration: f64 },
    TriggerAttack { node: NodeId, at: f64, velocity: f32 },
    TriggerRelease { node: NodeId, at: f64 },
}

#[derive(Debug)]
struct RecordedNode {
    kind: NodeKind,
    params: Vec<f32>,
}

pub struct RecordingContext {
    now: f64,
    sample_rate: f32,
    next_id: u32,
    nodes: BTreeMap<NodeId, RecordedNode>,
    edges: BTreeSet<(NodeId, NodeId)>,
    param_edges: BTreeSet<(NodeId, ParamRef)>,
    destination: BTreeSet<NodeId>,
    created: Vec<NodeId>,
    released: Vec<NodeId>,
    ops: Vec<ContextOp>,
    failing_creates: Vec<NodeKind>,
}

impl RecordingContext {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            now: 0.0,
            sample_rate,
            next_id: 1,
            nodes: BTreeMap::new(),
            edges: BTreeSet::new(),
            param_edges: BTreeSet::new(),
            destination: BTreeSet::new(),
            created: Vec::new(),
            released: Vec::new(),
            ops: Vec::new(),
            failing_creates: Vec::new(),
        }
    }

    pub fn set_now(&mut self, now: f64) {
        self.now = now;
    }

    pub fn advance(&mut self, secs: f64) {
        self.now += secs;
    }

    /// Make the next `create_node` of `kind` fail.
    pub fn fail_next_create(&mut self, kind: NodeKind) {
        self.failing_creates.push(kind);
    }

    pub fn ops(&self) -> &[ContextOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    pub fn created(&self) -> &[NodeId] {
        &self.created
    }

    pub fn released(&self) -> &[NodeId] {
        &self.released
    }

    pub fn live_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_live(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn kind_of(&self, node: NodeId) -> Option<NodeKind> {
        self.nodes.get(&node).map(|n| n.kind)
    }

    pub fn live_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.kind == kind)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        self.edges.contains(&(from, to))
    }

    /// Nodes feeding `node`'s audio input.
    pub fn audio_inputs(&self, node: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|(_, to)| *to == node)
            .map(|(from, _)| *from)
            .collect()
    }

    pub fn param_sources(&self, param: ParamRef) -> Vec<NodeId> {
        self.param_edges
            .iter()
            .filter(|(_, to)| *to == param)
            .map(|(from, _)| *from)
            .collect()
    }

    /// Last value set or ramped towards.
    pub fn param_value(&self, param: ParamRef) -> Option<f32> {
        let node = self.nodes.get(&param.node)?;
        let index = node.kind.param_index(param.name)?;
        node.params.get(index).copied()
    }

    /// Whether audio leaving `node` arrives at the destination.
    pub fn reaches_destination(&self, node: NodeId) -> bool {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([node]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            if self.destination.contains(&current) {
                return true;
            }
            for (_, to) in self.edges.range((current, NodeId(0))..=(current, NodeId(u32::MAX))) {
                queue.push_back(*to);
            }
        }
        false
    }

    pub fn attacks(&self, node: NodeId) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, ContextOp::TriggerAttack { node: n, .. } if *n == node))
            .count()
    }

    pub fn releases(&self, node: NodeId) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, ContextOp::TriggerRelease { node: n, .. } if *n == node))
            .count()
    }

    fn check_live(&self, node: NodeId) -> ContextResult<&RecordedNode> {
        self.nodes.get(&node).ok_or(ContextError::UnknownNode(node))
    }

    fn param_slot(&mut self, param: ParamRef) -> ContextResult<&mut f32> {
        let node = self
            .nodes
            .get_mut(&param.node)
            .ok_or(ContextError::UnknownNode(param.node))?;
        let index = node
            .kind
            .param_index(param.name)
            .ok_or_else(|| ContextError::UnknownParam {
                node: param.node,
                param: param.name.to_string(),
            })?;
        Ok(&mut node.params[index])
    }

    fn check_gated(&self, node: NodeId) -> ContextResult {
        if self.check_live(node)?.kind.is_gated() {
            Ok(())
        } else {
            Err(ContextError::NotGated(node))
        }
    }
}

impl AudioContext for RecordingContext {
    fn now(&self) -> f64 {
        self.now
    }

    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn create_node(&mut self, spec: NodeSpec) -> ContextResult<NodeId> {
        let kind = spec.kind();
        if let Some(pos) = self.failing_creates.iter().position(|k| *k == kind) {
            self.failing_creates.remove(pos);
            return Err(ContextError::Rejected(format!("{:?} creation refused", kind)));
        }

        let node = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            node,
            RecordedNode {
                kind,
                params: spec.initial_params(),
            },
        );
        self.created.push(node);
        self.ops.push(ContextOp::Create { node, kind });
        Ok(node)
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> ContextResult {
        self.check_live(from)?;
        self.check_live(to)?;
        self.edges.insert((from, to));
        self.ops.push(ContextOp::Connect { from, to });
        Ok(())
    }

    fn disconnect(&mut self, from: NodeId, to: NodeId) -> ContextResult {
        self.check_live(from)?;
        self.edges.remove(&(from, to));
        self.ops.push(ContextOp::Disconnect { from, to });
        Ok(())
    }

    fn connect_param(&mut self, from: NodeId, to: ParamRef) -> ContextResult {
        self.check_live(from)?;
        self.param_slot(to)?;
        self.param_edges.insert((from, to));
        self.ops.push(ContextOp::ConnectParam { from, to });
        Ok(())
    }

    fn disconnect_param(&mut self, from: NodeId, to: ParamRef) -> ContextResult {
        self.check_live(from)?;
        self.param_edges.remove(&(from, to));
        self.ops.push(ContextOp::DisconnectParam { from, to });
        Ok(())
    }

    fn connect_destination(&mut self, node: NodeId) -> ContextResult {
        self.check_live(node)?;
        self.destination.insert(node);
        self.ops.push(ContextOp::ConnectDestination { node });
        Ok(())
    }

    fn disconnect_all(&mut self, node: NodeId, at: f64) -> ContextResult {
        self.check_live(node)?;
        self.edges.retain(|(from, _)| *from != node);
        self.param_edges.retain(|(from, _)| *from != node);
        self.destination.remove(&node);
        self.ops.push(ContextOp::DisconnectAll { node, at });
        Ok(())
    }

    fn release_node(&mut self, node: NodeId, at: f64) -> ContextResult {
        self.nodes
            .remove(&node)
            .ok_or(ContextError::UnknownNode(node))?;
        self.edges.retain(|(from, to)| *from != node && *to != node);
        self.param_edges
            .retain(|(from, to)| *from != node && to.node != node);
        self.destination.remove(&node);
        self.released.push(node);
        self.ops.push(ContextOp::Release { node, at });
        Ok(())
    }

    fn set_param(&mut self, param: ParamRef, value: f32, at: f64) -> ContextResult {
        *self.param_slot(param)? = value;
        self.ops.push(ContextOp::SetParam { param, value, at });
        Ok(())
    }

    fn ramp_param(&mut self, param: ParamRef, value: f32, at: f64, duration: f64) -> ContextResult {
        *self.param_slot(param)? = value;
        self.ops.push(ContextOp::RampParam {
            param,
            value,
            at,
            duration,
        });
        Ok(())
    }

    fn trigger_attack(&mut self, node: NodeId, at: f64, velocity: f32) -> ContextResult {
        self.check_gated(node)?;
        self.ops.push(ContextOp::TriggerAttack { node, at, velocity });
        Ok(())
    }

    fn trigger_release(&mut self, node: NodeId, at: f64) -> ContextResult {
        self.check_gated(node)?;
        self.ops.push(ContextOp::TriggerRelease { node, at });
        Ok(())
    }
}
