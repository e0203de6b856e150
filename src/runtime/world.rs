use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::graph::GraphDefinition;
use crate::runtime::message::{EntityMessage, ScriptMessage, SystemMessage};
use crate::runtime::state::{ExecutionState, VariableScope};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

/// Script-bearing entity: declared graphs, entity-scope variables, tags and
/// the running execution states keyed by script id.
#[derive(Default)]
pub struct Scriptable {
    pub tags: Vec<String>,
    pub variables: VariableScope,
    /// Declared scripts, (re)attached by the driver's initialize phase.
    pub scripts: Vec<Arc<GraphDefinition>>,
    /// Graph embedded directly on the entity.
    pub embedded: Option<Arc<GraphDefinition>>,
    pub active: HashMap<String, ExecutionState>,
    /// Name other scripts can resolve this entity by through a target pin.
    pub target_name: Option<String>,
    /// Simulated on another host; outbound messages are forwarded instead of
    /// delivered locally.
    pub remote: bool,
}

impl Scriptable {
    pub fn has_script(&self, script_id: &str) -> bool {
        self.active.contains_key(script_id)
    }

    pub fn state(&self, script_id: &str) -> Option<&ExecutionState> {
        self.active.get(script_id)
    }

    pub fn state_mut(&mut self, script_id: &str) -> Option<&mut ExecutionState> {
        self.active.get_mut(script_id)
    }
}

/// The locally-simulated entity population, as seen by the scripting engine.
/// Stands in for the surrounding entity/component storage; iteration order is
/// deterministic (entity id order).
#[derive(Default)]
pub struct ScriptWorld {
    entities: BTreeMap<EntityId, Scriptable>,
    next_id: u64,
}

impl ScriptWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> EntityId {
        self.next_id += 1;
        let id = EntityId(self.next_id);
        self.entities.insert(
            id,
            Scriptable {
                tags: tags.into_iter().map(Into::into).collect(),
                ..Scriptable::default()
            },
        );
        id
    }

    /// Removes the entity. The caller is expected to hand the scriptable to
    /// the driver for teardown of its execution states.
    pub fn despawn(&mut self, id: EntityId) -> Option<Scriptable> {
        self.entities.remove(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Scriptable> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Scriptable> {
        self.entities.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Scriptable)> {
        self.entities.iter().map(|(id, s)| (*id, s))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut Scriptable)> {
        self.entities.iter_mut().map(|(id, s)| (*id, s))
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    /// Declares a script on the entity; attached on the next initialize.
    pub fn attach(&mut self, id: EntityId, graph: Arc<GraphDefinition>) {
        if let Some(s) = self.entities.get_mut(&id) {
            s.scripts.push(graph);
        }
    }

    pub fn embed(&mut self, id: EntityId, graph: Arc<GraphDefinition>) {
        if let Some(s) = self.entities.get_mut(&id) {
            s.embedded = Some(graph);
        }
    }

    pub fn set_target_name(&mut self, id: EntityId, name: impl Into<String>) {
        if let Some(s) = self.entities.get_mut(&id) {
            s.target_name = Some(name.into());
        }
    }

    pub fn set_remote(&mut self, id: EntityId, remote: bool) {
        if let Some(s) = self.entities.get_mut(&id) {
            s.remote = remote;
        }
    }

    pub fn is_remote(&self, id: EntityId) -> bool {
        self.entities.get(&id).is_some_and(|s| s.remote)
    }
}

/// Receives messages addressed to named external systems.
pub trait SystemSink {
    fn deliver(&mut self, msg: SystemMessage);
}

/// Generic entity-message bridge outside the scripting engine.
pub trait EntityBridge {
    fn deliver(&mut self, msg: EntityMessage);
}

/// Forwards script messages addressed to network-remote entities.
pub trait RemoteSink {
    fn forward(&mut self, target: EntityId, msg: ScriptMessage);
}
