use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::graph::{GraphDefinition, GraphLibrary};
use crate::nodes::NodeTypeRegistry;
use crate::runtime::environment::{Environment, Outbox};
use crate::runtime::message::{
    DELIVERY_EPSILON, ExecutionRequest, RequestKind, ScriptMessage,
};
use crate::runtime::state::ExecutionState;
use crate::runtime::world::{EntityBridge, EntityId, RemoteSink, ScriptWorld, Scriptable, SystemSink};

use serde_json::Value;

#[derive(Debug)]
struct PendingMessage {
    target: EntityId,
    msg: ScriptMessage,
}

/// Orchestrates the per-tick cycle across the entity population:
/// initialize newly-attached graphs, step every execution state, deliver
/// delayed messages, fulfill start/stop requests and dispatch outbound
/// messages, looping while fresh instances keep appearing.
pub struct ScriptDriver {
    registry: Arc<NodeTypeRegistry>,
    pub library: GraphLibrary,
    outbox: Outbox,
    pending: Vec<PendingMessage>,
    targets: HashMap<String, EntityId>,
    /// Persistent states whose owning entity was removed.
    orphans: Vec<ExecutionState>,
    system_sink: Option<Box<dyn SystemSink>>,
    entity_bridge: Option<Box<dyn EntityBridge>>,
    remote_sink: Option<Box<dyn RemoteSink>>,
}

impl ScriptDriver {
    pub fn new(registry: Arc<NodeTypeRegistry>) -> Self {
        Self {
            registry,
            library: GraphLibrary::new(),
            outbox: Outbox::new(),
            pending: Vec::new(),
            targets: HashMap::new(),
            orphans: Vec::new(),
            system_sink: None,
            entity_bridge: None,
            remote_sink: None,
        }
    }

    pub fn registry(&self) -> &Arc<NodeTypeRegistry> {
        &self.registry
    }

    pub fn set_system_sink(&mut self, sink: Box<dyn SystemSink>) {
        self.system_sink = Some(sink);
    }

    pub fn set_entity_bridge(&mut self, bridge: Box<dyn EntityBridge>) {
        self.entity_bridge = Some(bridge);
    }

    pub fn set_remote_sink(&mut self, sink: Box<dyn RemoteSink>) {
        self.remote_sink = Some(sink);
    }

    /// Runs one full simulation tick in the fixed order: initialize, then
    /// step / deliver / fulfill / dispatch until no new instance was added.
    pub fn tick(&mut self, world: &mut ScriptWorld, dt: f32) {
        self.initialize_tick(world);
        let mut first_pass = true;
        loop {
            self.step(world, dt);
            self.deliver_pending(world, if first_pass { dt } else { 0.0 });
            let added = self.fulfill_requests(world);
            self.dispatch_outbound(world);
            first_pass = false;
            if !added {
                break;
            }
        }
    }

    /// Rebuilds the target index, clears frame flags and attaches embedded
    /// and declared graphs that are not yet running. A declared graph whose
    /// content hash changed since the instance was created is torn down and
    /// re-attached (asset reload).
    pub fn initialize_tick(&mut self, world: &mut ScriptWorld) {
        self.targets.clear();
        for (id, scriptable) in world.iter() {
            if let Some(name) = &scriptable.target_name {
                self.targets.insert(name.clone(), id);
            }
        }

        for id in world.ids() {
            let mut stale: Vec<String> = Vec::new();
            let mut to_attach: Vec<Arc<GraphDefinition>> = Vec::new();
            {
                let scriptable = match world.get(id) {
                    Some(s) => s,
                    None => continue,
                };
                let mut consider = |graph: &Arc<GraphDefinition>| {
                    match scriptable.active.get(&graph.name) {
                        Some(state) if state.graph().hash == graph.hash => {}
                        Some(_) => {
                            stale.push(graph.name.clone());
                            to_attach.push(graph.clone());
                        }
                        None => to_attach.push(graph.clone()),
                    }
                };
                if let Some(graph) = &scriptable.embedded {
                    consider(graph);
                }
                for graph in &scriptable.scripts {
                    consider(graph);
                }
            }

            if let Some(scriptable) = world.get_mut(id) {
                for name in &stale {
                    if let Some(mut state) = scriptable.active.remove(name) {
                        warn!(script = %name, entity = %id, "graph changed, restarting script");
                        state.destroy(&self.registry);
                    }
                }
                for state in scriptable.active.values_mut() {
                    state.set_frame_flag(false);
                }
            }

            for graph in to_attach {
                let tags = world.get(id).map(|s| s.tags.clone()).unwrap_or_default();
                self.add_graph(world, id, graph, tags, Vec::new());
            }
        }
    }

    /// Steps every active execution state exactly once.
    pub fn step(&mut self, world: &mut ScriptWorld, dt: f32) {
        let registry = self.registry.clone();
        for (entity, scriptable) in world.iter_mut() {
            let Scriptable {
                variables, active, ..
            } = scriptable;
            for state in active.values_mut() {
                if state.frame_flag() || state.is_dead() {
                    continue;
                }
                let mut env = Environment {
                    registry: &registry,
                    outbox: &mut self.outbox,
                    targets: &self.targets,
                };
                env.update(dt, state, entity, variables);
                state.set_frame_flag(true);
            }
            for state in active.values_mut() {
                if state.is_dead() {
                    state.destroy(&registry);
                }
            }
            active.retain(|_, state| !state.is_dead());
        }
    }

    /// Ages the delayed-message queue by `dt` and delivers, in original
    /// enqueue order, every message whose delay has lapsed. Messages to
    /// entities that no longer exist are dropped silently.
    pub fn deliver_pending(&mut self, world: &mut ScriptWorld, dt: f32) {
        for pending in self.pending.iter_mut() {
            pending.msg.delay -= dt;
        }
        let mut due = Vec::new();
        let mut remaining = Vec::with_capacity(self.pending.len());
        for pending in std::mem::take(&mut self.pending) {
            if pending.msg.delay <= DELIVERY_EPSILON {
                due.push(pending);
            } else {
                remaining.push(pending);
            }
        }
        self.pending = remaining;
        for pending in due {
            self.deliver_local(world, pending.target, pending.msg);
        }
    }

    /// Processes all stop requests, then all start requests, so a same-tick
    /// stop/start pair restarts the script instead of racing the duplicate
    /// check. Returns whether any instance was started.
    pub fn fulfill_requests(&mut self, world: &mut ScriptWorld) -> bool {
        let requests = std::mem::take(&mut self.outbox.requests);
        let registry = self.registry.clone();

        for req in requests
            .iter()
            .filter(|r| matches!(r.kind, RequestKind::Stop | RequestKind::StopTag))
        {
            if let Some(scriptable) = world.get_mut(req.target) {
                for (script_id, state) in scriptable.active.iter_mut() {
                    let hit = match req.kind {
                        RequestKind::Stop => *script_id == req.value,
                        RequestKind::StopTag => state.has_tag(&req.value),
                        RequestKind::Start => false,
                    };
                    if hit {
                        state.destroy(&registry);
                    }
                }
                scriptable.active.retain(|_, state| !state.is_dead());
            }
        }

        let mut added = false;
        for req in requests {
            if req.kind != RequestKind::Start {
                continue;
            }
            if !world.contains(req.target) {
                continue;
            }
            let ExecutionRequest {
                target,
                value,
                tags,
                params,
                ..
            } = req;
            self.add_script(world, target, &value, tags, params);
            added = true;
        }
        added
    }

    /// Routes the tick's outbound messages: remote entities go to the
    /// network forwarder, local ones are delivered now or queued for later
    /// depending on their delay; system and entity messages go to their
    /// collaborator sinks.
    pub fn dispatch_outbound(&mut self, world: &mut ScriptWorld) {
        for (target, msg) in std::mem::take(&mut self.outbox.script_messages) {
            if world.is_remote(target) {
                match self.remote_sink.as_mut() {
                    Some(sink) => sink.forward(target, msg),
                    None => debug!(entity = %target, "no remote sink, dropping message"),
                }
            } else if msg.delay <= DELIVERY_EPSILON {
                self.deliver_local(world, target, msg);
            } else {
                self.pending.push(PendingMessage { target, msg });
            }
        }
        for msg in std::mem::take(&mut self.outbox.system_messages) {
            if let Some(sink) = self.system_sink.as_mut() {
                sink.deliver(msg);
            }
        }
        for msg in std::mem::take(&mut self.outbox.entity_messages) {
            if let Some(bridge) = self.entity_bridge.as_mut() {
                bridge.deliver(msg);
            }
        }
    }

    /// Injects an external execution request, fulfilled on the next tick
    /// (or the current one, if raised before `fulfill_requests`).
    pub fn request(&mut self, req: ExecutionRequest) {
        self.outbox.requests.push(req);
    }

    /// Injects an external script message, dispatched with the tick's
    /// outbound batch.
    pub fn send_message(&mut self, target: EntityId, msg: ScriptMessage) {
        self.outbox.script_messages.push((target, msg));
    }

    /// Attaches a library graph to the entity. Config errors (unknown graph)
    /// and duplicate attachments are logged no-ops.
    pub fn add_script(
        &mut self,
        world: &mut ScriptWorld,
        entity: EntityId,
        name: &str,
        tags: Vec<String>,
        params: Vec<Value>,
    ) -> bool {
        match self.library.get(name) {
            Some(graph) => self.add_graph(world, entity, graph, tags, params),
            None => {
                warn!(script = %name, "script not found");
                false
            }
        }
    }

    fn add_graph(
        &mut self,
        world: &mut ScriptWorld,
        entity: EntityId,
        graph: Arc<GraphDefinition>,
        tags: Vec<String>,
        params: Vec<Value>,
    ) -> bool {
        let registry = self.registry.clone();
        let Some(scriptable) = world.get_mut(entity) else {
            return false;
        };
        if scriptable.has_script(&graph.name) {
            if !graph.quiet_duplicates {
                warn!(script = %graph.name, entity = %entity, "script already attached");
            }
            return false;
        }

        let mut state = ExecutionState::new(graph.clone());
        state.set_tags(tags);
        state.set_start_params(params);
        debug!(
            script = %graph.name,
            instance = %state.instance_id,
            entity = %entity,
            "attaching script"
        );

        // bootstrap with a zero-dt update so the fresh instance reaches its
        // first suspension point before the regular step
        let Scriptable {
            variables, active, ..
        } = scriptable;
        let mut env = Environment {
            registry: &registry,
            outbox: &mut self.outbox,
            targets: &self.targets,
        };
        env.update(0.0, &mut state, entity, variables);

        if state.is_dead() {
            state.destroy(&registry);
        } else {
            active.insert(graph.name.clone(), state);
        }
        true
    }

    /// Console-style helper: attaches the named graph to every entity
    /// carrying `tag`. Returns how many entities it was attached to.
    pub fn run_on_tag(&mut self, world: &mut ScriptWorld, graph_name: &str, tag: &str) -> usize {
        let Some(graph) = self.library.get(graph_name) else {
            warn!(script = %graph_name, "script not found");
            return 0;
        };
        let ids: Vec<EntityId> = world
            .iter()
            .filter(|(_, s)| s.tags.iter().any(|t| t == tag))
            .map(|(id, _)| id)
            .collect();
        let mut attached = 0;
        for id in ids {
            let tags = world.get(id).map(|s| s.tags.clone()).unwrap_or_default();
            if self.add_graph(world, id, graph.clone(), tags, Vec::new()) {
                attached += 1;
            }
        }
        attached
    }

    /// Tears down the entity's scripts: non-persistent states run their
    /// destructors, persistent ones are parked in the orphan pool.
    pub fn entity_removed(&mut self, world: &mut ScriptWorld, entity: EntityId) {
        let Some(scriptable) = world.despawn(entity) else {
            return;
        };
        let registry = self.registry.clone();
        for (_, mut state) in scriptable.active {
            if state.graph().persistent {
                self.orphans.push(state);
            } else {
                state.destroy(&registry);
            }
        }
    }

    fn deliver_local(&mut self, world: &mut ScriptWorld, target: EntityId, msg: ScriptMessage) {
        let registry = self.registry.clone();
        let Some(scriptable) = world.get_mut(target) else {
            return;
        };
        if let Some(state) = scriptable.active.get_mut(&msg.script_target) {
            state.receive_message(&registry, msg, false);
            return;
        }

        // no running instance; spawn one on demand when the library has a
        // graph of that name with a spawnable inbox for this message
        let Some(graph) = self.library.get(&msg.script_target) else {
            return;
        };
        if !ExecutionState::can_receive_message(&registry, &graph, &msg.type_id, true) {
            return;
        }
        let tags = scriptable.tags.clone();
        if self.add_graph(world, target, graph, tags, Vec::new()) {
            if let Some(state) = world
                .get_mut(target)
                .and_then(|s| s.state_mut(&msg.script_target))
            {
                state.receive_message(&registry, msg, true);
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }
}
