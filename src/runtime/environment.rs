use std::collections::{HashMap, VecDeque};

use serde_json::Value;
use tracing::{debug, warn};

use crate::graph::{GraphDefinition, GraphNode, NodeId};
use crate::nodes::NodeTypeRegistry;
use crate::runtime::message::{EntityMessage, ExecutionRequest, ScriptMessage, SystemMessage};
use crate::runtime::result::{ExecutionResult, OutputPins};
use crate::runtime::state::{ExecutionState, VariableScope};
use crate::runtime::strand::{GroupId, GroupTable, Strand};
use crate::runtime::world::EntityId;

/// Effects collected during a tick instead of being applied inline, so the
/// entity/script population is never mutated while it is being iterated.
#[derive(Debug, Default)]
pub struct Outbox {
    pub script_messages: Vec<(EntityId, ScriptMessage)>,
    pub system_messages: Vec<SystemMessage>,
    pub entity_messages: Vec<EntityMessage>,
    pub requests: Vec<ExecutionRequest>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.script_messages.is_empty()
            && self.system_messages.is_empty()
            && self.entity_messages.is_empty()
            && self.requests.is_empty()
    }
}

/// Variable scope a node reads from or writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarScope {
    Local,
    Shared,
    Entity,
}

impl VarScope {
    pub fn parse(s: &str) -> Self {
        match s {
            "shared" => Self::Shared,
            "entity" => Self::Entity,
            _ => Self::Local,
        }
    }
}

/// Everything a node update may touch: the graph, the node-private data of
/// the execution state, the variable scopes and the tick's outbox. Built by
/// the environment for the duration of one state update.
pub struct Env<'a> {
    graph: &'a GraphDefinition,
    registry: &'a NodeTypeRegistry,
    pub entity: EntityId,
    pub dt: f32,
    node_data: &'a mut Vec<Option<Value>>,
    locals: &'a mut VariableScope,
    shared: &'a mut VariableScope,
    entity_vars: &'a mut VariableScope,
    start_params: &'a [Value],
    outbox: &'a mut Outbox,
    targets: &'a HashMap<String, EntityId>,
}

impl<'a> Env<'a> {
    pub fn graph(&self) -> &'a GraphDefinition {
        self.graph
    }

    pub fn registry(&self) -> &'a NodeTypeRegistry {
        self.registry
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.graph.node_id(name)
    }

    pub fn start_params(&self) -> &[Value] {
        self.start_params
    }

    pub(crate) fn take_data(&mut self, id: NodeId) -> Value {
        match self.node_data[id].take() {
            Some(data) => data,
            None => {
                let node = self.graph.node(id);
                self.registry
                    .get(&node.type_id)
                    .map(|t| t.init_data(node))
                    .unwrap_or(Value::Null)
            }
        }
    }

    pub(crate) fn put_data(&mut self, id: NodeId, data: Value) {
        self.node_data[id] = Some(data);
    }

    /// Drops a node's private data so the next touch re-initializes it.
    pub fn reset_data(&mut self, id: NodeId) {
        self.node_data[id] = None;
    }

    /// Resolves an input data pin by walking the connection to the producing
    /// node's `get_data`, which may itself pull further upstream. Pure read
    /// cycles are rejected at graph-build time, so the walk terminates.
    pub fn read_data_pin(&mut self, node: &GraphNode, pin: usize) -> Value {
        let Some(conn) = node.connection(pin) else {
            return Value::Null;
        };
        let graph = self.graph;
        let registry = self.registry;
        let src = graph.node(conn.node);
        let Some(node_type) = registry.get(&src.type_id) else {
            return Value::Null;
        };
        let mut data = self.take_data(conn.node);
        let value = node_type.get_data(self, src, conn.pin, &mut data);
        self.put_data(conn.node, data);
        value
    }

    /// Pushes a value through an output write-data pin into the connected
    /// node's `set_data`.
    pub fn write_data_pin(&mut self, node: &GraphNode, pin: usize, value: Value) {
        let Some(conn) = node.connection(pin) else {
            return;
        };
        let graph = self.graph;
        let registry = self.registry;
        let dst = graph.node(conn.node);
        let Some(node_type) = registry.get(&dst.type_id) else {
            return;
        };
        let mut data = self.take_data(conn.node);
        node_type.set_data(self, dst, conn.pin, value, &mut data);
        self.put_data(conn.node, data);
    }

    pub fn read_f32(&mut self, node: &GraphNode, pin: usize, default: f32) -> f32 {
        self.read_data_pin(node, pin)
            .as_f64()
            .map(|v| v as f32)
            .unwrap_or(default)
    }

    pub fn read_bool(&mut self, node: &GraphNode, pin: usize) -> bool {
        truthy(&self.read_data_pin(node, pin))
    }

    /// Resolves a target pin to an entity id. An unconnected pin refers to
    /// the entity running the script; an unresolvable name yields `None` and
    /// the caller drops the operation.
    pub fn resolve_target(&mut self, node: &GraphNode, pin: usize) -> Option<EntityId> {
        if node.connection(pin).is_none() {
            return Some(self.entity);
        }
        match self.read_data_pin(node, pin) {
            Value::Number(n) => n.as_u64().map(EntityId),
            Value::String(name) => {
                let found = self.targets.get(name.as_str()).copied();
                if found.is_none() {
                    debug!(target = %name, "script target not found");
                }
                found
            }
            _ => Some(self.entity),
        }
    }

    pub fn variable(&self, scope: VarScope, name: &str) -> Value {
        let scope = match scope {
            VarScope::Local => &*self.locals,
            VarScope::Shared => &*self.shared,
            VarScope::Entity => &*self.entity_vars,
        };
        scope.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn set_variable(&mut self, scope: VarScope, name: &str, value: Value) {
        let scope = match scope {
            VarScope::Local => &mut *self.locals,
            VarScope::Shared => &mut *self.shared,
            VarScope::Entity => &mut *self.entity_vars,
        };
        scope.set(name, value);
    }

    /// Visits every visible variable, outer scopes first so local bindings
    /// shadow shared and entity ones.
    pub fn each_variable(&self, mut f: impl FnMut(&str, &Value)) {
        for (k, v) in self.entity_vars.iter() {
            f(k, v);
        }
        for (k, v) in self.shared.iter() {
            f(k, v);
        }
        for (k, v) in self.locals.iter() {
            f(k, v);
        }
    }

    pub fn send_script_message(&mut self, target: EntityId, msg: ScriptMessage) {
        self.outbox.script_messages.push((target, msg));
    }

    pub fn send_system_message(&mut self, msg: SystemMessage) {
        self.outbox.system_messages.push(msg);
    }

    pub fn send_entity_message(&mut self, msg: EntityMessage) {
        self.outbox.entity_messages.push(msg);
    }

    pub fn request(&mut self, req: ExecutionRequest) {
        self.outbox.requests.push(req);
    }
}

/// Loose boolean coercion for data-pin values.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Advances all strands of one execution state by one tick, collecting
/// outbound effects into the shared outbox.
pub struct Environment<'d> {
    pub registry: &'d NodeTypeRegistry,
    pub outbox: &'d mut Outbox,
    pub targets: &'d HashMap<String, EntityId>,
}

impl Environment<'_> {
    pub fn update(
        &mut self,
        dt: f32,
        state: &mut ExecutionState,
        entity: EntityId,
        entity_vars: &mut VariableScope,
    ) {
        state.ensure_started();
        for flag in state.node_ran.iter_mut() {
            *flag = false;
        }

        let graph = state.graph().clone();
        let has_inbox = graph.nodes.iter().any(|n| {
            self.registry
                .get(&n.type_id)
                .is_some_and(|t| t.is_message_inbox())
        });

        let strands = &mut state.strands;
        let groups = &mut state.groups;
        let node_ran = &mut state.node_ran;
        let mut env = Env {
            graph: &graph,
            registry: self.registry,
            entity,
            dt,
            node_data: &mut state.node_data,
            locals: &mut state.local,
            shared: &mut state.shared,
            entity_vars,
            start_params: &state.start_params,
            outbox: self.outbox,
            targets: self.targets,
        };

        let mut queue: VecDeque<usize> = (0..strands.len()).collect();
        while let Some(idx) = queue.pop_front() {
            step_strand(idx, strands, groups, node_ran, &mut env, &mut queue);
        }

        strands.retain(|s| !s.dead);
        // an inbox graph idles with no strands, waiting for the next message
        if strands.is_empty() && !has_inbox {
            state.mark_dead();
        }
    }
}

fn flow_targets(node: &GraphNode, outs: OutputPins) -> Vec<NodeId> {
    let pins = node.output_flow_pins();
    outs.iter()
        .filter_map(|n| pins.get(n).copied())
        .filter_map(|pin| node.connection(pin))
        .map(|conn| conn.node)
        .collect()
}

fn step_strand(
    idx: usize,
    strands: &mut Vec<Strand>,
    groups: &mut GroupTable,
    node_ran: &mut [bool],
    env: &mut Env<'_>,
    queue: &mut VecDeque<usize>,
) {
    loop {
        {
            let s = &strands[idx];
            if s.dead || s.waiting {
                return;
            }
        }
        let node_id = strands[idx].node;
        if node_ran[node_id] {
            // another path already ran this node; park until next tick
            return;
        }
        let graph = env.graph();
        let node = graph.node(node_id);
        let Some(node_type) = env.registry().get(&node.type_id) else {
            warn!(node = %node.name, kind = %node.type_id, "unknown node type, dropping strand");
            kill_strand(idx, strands, groups, env, queue);
            return;
        };

        let dt = env.dt;
        let mut data = env.take_data(node_id);
        let result = node_type.update(env, dt, node, &mut data);
        env.put_data(node_id, data);

        match result {
            ExecutionResult::Done(outs) => {
                node_ran[node_id] = true;
                if strands[idx].watcher {
                    // a completing watcher abandons the branches it spawned
                    abort_spawned(idx, strands, groups, env, queue);
                    strands[idx].watcher = false;
                }
                let targets = flow_targets(node, outs);
                if !advance(idx, strands, groups, env, queue, &targets) {
                    return;
                }
            }
            ExecutionResult::Executing => {
                node_ran[node_id] = true;
                strands[idx].time_slice += dt;
                return;
            }
            ExecutionResult::Fork(outs) => {
                node_ran[node_id] = true;
                let targets = flow_targets(node, outs);
                match targets.len() {
                    0 => {
                        kill_strand(idx, strands, groups, env, queue);
                        return;
                    }
                    1 => {
                        move_to(strands, idx, targets[0]);
                    }
                    n => {
                        let parent = strands[idx].group;
                        let gid = groups.create(parent, n);
                        for &target in &targets[1..] {
                            strands.push(Strand::with_group(target, Some(gid)));
                            queue.push_back(strands.len() - 1);
                        }
                        strands[idx].group = Some(gid);
                        move_to(strands, idx, targets[0]);
                    }
                }
            }
            ExecutionResult::ForkAndConvertToWatcher(outs) => {
                node_ran[node_id] = true;
                let targets = flow_targets(node, outs);
                if !targets.is_empty() {
                    // side branches get their own detached accounting; the
                    // watcher does not count toward their merges
                    let gid = groups.create(None, targets.len());
                    for &target in &targets {
                        strands.push(Strand::with_group(target, Some(gid)));
                        queue.push_back(strands.len() - 1);
                    }
                    strands[idx].spawned_group = Some(gid);
                }
                strands[idx].watcher = true;
                // watchers drop out of merge accounting
                if let Some(gid) = strands[idx].group.take() {
                    member_left(gid, strands, groups, env, queue);
                }
                return;
            }
            ExecutionResult::MergeAndWait => {
                // merge nodes rendezvous several strands within one tick, so
                // they are exempt from the once-per-tick node flag
                match strands[idx].group {
                    None => {
                        node_ran[node_id] = true;
                        let targets = flow_targets(node, OutputPins::first());
                        if !advance(idx, strands, groups, env, queue, &targets) {
                            return;
                        }
                    }
                    Some(gid) => {
                        strands[idx].waiting = true;
                        try_release(gid, strands, groups, env, queue);
                        return;
                    }
                }
            }
            ExecutionResult::MergeAndContinue => {
                if let Some(gid) = strands[idx].group {
                    let parent = groups.get(gid).and_then(|g| g.parent);
                    if let Some(p) = parent {
                        // the continuing strand becomes a direct member of
                        // the enclosing group
                        if let Some(pg) = groups.get_mut(p) {
                            pg.members += 1;
                        }
                    }
                    strands[idx].group = parent;
                    member_left(gid, strands, groups, env, queue);
                }
                let targets = flow_targets(node, OutputPins::first());
                if !advance(idx, strands, groups, env, queue, &targets) {
                    return;
                }
            }
            ExecutionResult::Call(target) => {
                node_ran[node_id] = true;
                strands[idx].stack.push(node_id);
                move_to(strands, idx, target);
            }
            ExecutionResult::Return => {
                node_ran[node_id] = true;
                let from = strands[idx].stack.pop().unwrap_or(node_id);
                let from_node = graph.node(from);
                let targets = flow_targets(from_node, OutputPins::first());
                if !advance(idx, strands, groups, env, queue, &targets) {
                    return;
                }
            }
            ExecutionResult::Restart => {
                node_ran[node_id] = true;
                if strands[idx].watcher {
                    // a restarting watcher aborts the branches it spawned and
                    // re-arms from scratch
                    abort_spawned(idx, strands, groups, env, queue);
                    strands[idx].watcher = false;
                }
                env.reset_data(node_id);
                strands[idx].time_slice = 0.0;
                return;
            }
            ExecutionResult::Terminate => {
                node_ran[node_id] = true;
                kill_strand(idx, strands, groups, env, queue);
                return;
            }
        }
    }
}

fn move_to(strands: &mut [Strand], idx: usize, node: NodeId) {
    let s = &mut strands[idx];
    s.node = node;
    s.time_slice = 0.0;
}

/// Moves the strand to the first connected target, or kills it when the flow
/// runs off the end of the graph. Returns whether the strand keeps stepping.
fn advance(
    idx: usize,
    strands: &mut Vec<Strand>,
    groups: &mut GroupTable,
    env: &mut Env<'_>,
    queue: &mut VecDeque<usize>,
    targets: &[NodeId],
) -> bool {
    match targets.first() {
        Some(&target) => {
            move_to(strands, idx, target);
            true
        }
        None => {
            kill_strand(idx, strands, groups, env, queue);
            false
        }
    }
}

/// Kills every live strand belonging to the group the watcher spawned.
fn abort_spawned(
    idx: usize,
    strands: &mut Vec<Strand>,
    groups: &mut GroupTable,
    env: &mut Env<'_>,
    queue: &mut VecDeque<usize>,
) {
    let Some(sg) = strands[idx].spawned_group.take() else {
        return;
    };
    let doomed: Vec<usize> = strands
        .iter()
        .enumerate()
        .filter(|(j, s)| *j != idx && !s.dead && groups.descends_from(s.group, sg))
        .map(|(j, _)| j)
        .collect();
    for j in doomed {
        kill_strand(j, strands, groups, env, queue);
    }
    groups.remove(sg);
}

fn kill_strand(
    idx: usize,
    strands: &mut Vec<Strand>,
    groups: &mut GroupTable,
    env: &mut Env<'_>,
    queue: &mut VecDeque<usize>,
) {
    if strands[idx].dead {
        return;
    }
    strands[idx].dead = true;
    strands[idx].waiting = false;
    abort_spawned(idx, strands, groups, env, queue);
    if let Some(inbox) = strands[idx].inbox.take() {
        let graph = env.graph();
        let node = graph.node(inbox);
        if let Some(node_type) = env.registry().get(&node.type_id) {
            let mut data = env.take_data(inbox);
            node_type.destruct(node, &mut data);
            env.put_data(inbox, data);
        }
    }
    if let Some(gid) = strands[idx].group.take() {
        member_left(gid, strands, groups, env, queue);
    }
}

/// One member of the group is gone: either its strand died or it passed a
/// merge-and-continue. May release a pending merge or dissolve the group.
fn member_left(
    gid: GroupId,
    strands: &mut Vec<Strand>,
    groups: &mut GroupTable,
    env: &mut Env<'_>,
    queue: &mut VecDeque<usize>,
) {
    let Some(group) = groups.get_mut(gid) else {
        return;
    };
    group.members = group.members.saturating_sub(1);
    if try_release(gid, strands, groups, env, queue) {
        return;
    }
    let (members, parent) = match groups.get(gid) {
        Some(g) => (g.members, g.parent),
        None => return,
    };
    let any_waiting = strands
        .iter()
        .any(|s| !s.dead && s.waiting && s.group == Some(gid));
    if members == 0 && !any_waiting {
        groups.remove(gid);
        if let Some(p) = parent {
            member_left(p, strands, groups, env, queue);
        }
    }
}

/// Releases a merge once every live member of the group is waiting: exactly
/// one strand continues past the merge node, the rest are absorbed.
fn try_release(
    gid: GroupId,
    strands: &mut Vec<Strand>,
    groups: &mut GroupTable,
    env: &mut Env<'_>,
    queue: &mut VecDeque<usize>,
) -> bool {
    let Some(group) = groups.get(gid) else {
        return false;
    };
    let members = group.members;
    let waiting: Vec<usize> = strands
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.dead && s.waiting && s.group == Some(gid))
        .map(|(i, _)| i)
        .collect();
    if members == 0 || waiting.len() < members {
        return false;
    }

    let parent = groups.remove(gid).and_then(|g| g.parent);
    let survivor = waiting[0];
    for &j in &waiting[1..] {
        strands[j].group = None;
        kill_strand(j, strands, groups, env, queue);
    }

    strands[survivor].waiting = false;
    strands[survivor].group = parent;
    strands[survivor].time_slice = 0.0;
    let merge_node = env.graph().node(strands[survivor].node);
    let targets = flow_targets(merge_node, OutputPins::first());
    if advance(survivor, strands, groups, env, queue, &targets) {
        queue.push_back(survivor);
    }
    true
}
