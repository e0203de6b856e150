use std::sync::Arc;

use serde_json::{Value, json};

use skein::graph::builder::GraphBuilder;
use skein::runtime::message::ExecutionRequest;
use skein::{EntityId, GraphDefinition, NodeTypeRegistry, ScriptDriver, ScriptWorld};

fn setup() -> (Arc<NodeTypeRegistry>, ScriptDriver, ScriptWorld) {
    let registry = Arc::new(NodeTypeRegistry::with_builtins());
    let driver = ScriptDriver::new(registry.clone());
    (registry, driver, ScriptWorld::new())
}

fn entity_var(world: &ScriptWorld, e: EntityId, name: &str) -> Value {
    world
        .get(e)
        .and_then(|s| s.variables.get(name).cloned())
        .unwrap_or(Value::Null)
}

fn idle_graph(registry: &NodeTypeRegistry, time: f32) -> GraphDefinition {
    GraphBuilder::new("idle")
        .node("start", "start")
        .node_with("park", "wait", json!({ "time": time }))
        .flow("start", 0, "park")
        .build(registry)
        .expect("valid graph")
}

#[test]
fn at_most_one_instance_per_graph() {
    let (registry, mut driver, mut world) = setup();
    driver.library.insert(Arc::new(idle_graph(&registry, 100.0)));

    let e = world.spawn(["hero"]);
    assert!(driver.add_script(&mut world, e, "idle", vec![], vec![]));
    assert!(!driver.add_script(&mut world, e, "idle", vec![], vec![]));
    assert_eq!(world.get(e).unwrap().active.len(), 1);
}

#[test]
fn unknown_script_is_a_noop() {
    let (_registry, mut driver, mut world) = setup();
    let e = world.spawn(["hero"]);
    assert!(!driver.add_script(&mut world, e, "missing", vec![], vec![]));
    assert!(world.get(e).unwrap().active.is_empty());
}

#[test]
fn same_tick_stop_then_start_restarts() {
    let (registry, mut driver, mut world) = setup();
    driver.library.insert(Arc::new(idle_graph(&registry, 100.0)));

    let e = world.spawn(["hero"]);
    driver.add_script(&mut world, e, "idle", vec![], vec![]);
    let first = world.get(e).unwrap().state("idle").unwrap().instance_id;

    driver.request(ExecutionRequest::stop(e, "idle"));
    driver.request(ExecutionRequest::start(e, "idle"));
    driver.tick(&mut world, 0.016);

    let scriptable = world.get(e).unwrap();
    assert_eq!(scriptable.active.len(), 1);
    let second = scriptable.state("idle").unwrap().instance_id;
    assert_ne!(first, second);
}

#[test]
fn states_step_at_most_once_per_tick() {
    let (registry, mut driver, mut world) = setup();
    // counts one increment per environment update: set runs, the zero-length
    // wait completes and flow loops back to set, which parks until next tick
    let graph = GraphBuilder::new("counter")
        .node("start", "start")
        .node_with("expr", "expression", json!({ "expression": "count + 1" }))
        .node_with("set", "setVariable", json!({ "scope": "entity", "name": "count" }))
        .node_with("loop", "wait", json!({ "time": 0.0 }))
        .flow("start", 0, "set")
        .flow("set", 0, "loop")
        .flow("loop", 0, "set")
        .wire("expr", 0, "set", 2)
        .build(&registry)
        .expect("valid graph");
    driver.library.insert(Arc::new(graph));

    let e = world.spawn(["hero"]);
    world.get_mut(e).unwrap().variables.set("count", json!(0));
    driver.add_script(&mut world, e, "counter", vec![], vec![]);
    assert_eq!(entity_var(&world, e, "count"), json!(1));

    driver.initialize_tick(&mut world);
    driver.step(&mut world, 0.016);
    driver.step(&mut world, 0.016);
    assert_eq!(entity_var(&world, e, "count"), json!(2));
}

#[test]
fn changed_graph_is_reloaded() {
    let (registry, mut driver, mut world) = setup();
    let v1 = Arc::new(idle_graph(&registry, 50.0));
    let v2 = Arc::new(idle_graph(&registry, 60.0));
    assert_ne!(v1.hash, v2.hash);

    let e = world.spawn(["hero"]);
    world.attach(e, v1);
    driver.tick(&mut world, 0.016);
    let first = world.get(e).unwrap().state("idle").unwrap().instance_id;

    world.get_mut(e).unwrap().scripts[0] = v2;
    driver.tick(&mut world, 0.016);
    let second = world.get(e).unwrap().state("idle").unwrap().instance_id;
    assert_ne!(first, second);
}

#[test]
fn unchanged_graph_is_not_reattached() {
    let (registry, mut driver, mut world) = setup();
    let graph = Arc::new(idle_graph(&registry, 50.0));

    let e = world.spawn(["hero"]);
    world.attach(e, graph);
    driver.tick(&mut world, 0.016);
    let first = world.get(e).unwrap().state("idle").unwrap().instance_id;
    driver.tick(&mut world, 0.016);
    let second = world.get(e).unwrap().state("idle").unwrap().instance_id;
    assert_eq!(first, second);
}

#[test]
fn declared_one_shot_runs_again_each_tick() {
    let (registry, mut driver, mut world) = setup();
    let graph = GraphBuilder::new("pulse")
        .node("start", "start")
        .node_with("expr", "expression", json!({ "expression": "n + 1" }))
        .node_with("set", "setVariable", json!({ "scope": "entity", "name": "n" }))
        .node("halt", "stop")
        .flow("start", 0, "set")
        .flow("set", 0, "halt")
        .wire("expr", 0, "set", 2)
        .build(&registry)
        .expect("valid graph");

    let e = world.spawn(["hero"]);
    world.get_mut(e).unwrap().variables.set("n", json!(0));
    world.attach(e, Arc::new(graph));

    // initialize re-attaches the declared graph whenever it is not running
    for _ in 0..3 {
        driver.tick(&mut world, 0.016);
    }
    assert_eq!(entity_var(&world, e, "n"), json!(3));
}

#[test]
fn entity_removal_parks_persistent_states() {
    let (registry, mut driver, mut world) = setup();
    let persistent = GraphBuilder::new("keeper")
        .node("start", "start")
        .node_with("park", "wait", json!({ "time": 100.0 }))
        .flow("start", 0, "park")
        .persistent(true)
        .build(&registry)
        .expect("valid graph");
    driver.library.insert(Arc::new(persistent));
    driver.library.insert(Arc::new(idle_graph(&registry, 100.0)));

    let e1 = world.spawn(["hero"]);
    let e2 = world.spawn(["hero"]);
    driver.add_script(&mut world, e1, "keeper", vec![], vec![]);
    driver.add_script(&mut world, e2, "idle", vec![], vec![]);

    driver.entity_removed(&mut world, e1);
    assert_eq!(driver.orphan_count(), 1);
    assert!(!world.contains(e1));

    driver.entity_removed(&mut world, e2);
    assert_eq!(driver.orphan_count(), 1);
}

#[test]
fn run_on_tag_attaches_to_matching_entities() {
    let (registry, mut driver, mut world) = setup();
    driver.library.insert(Arc::new(idle_graph(&registry, 100.0)));

    let a = world.spawn(["mob"]);
    let b = world.spawn(["mob"]);
    let c = world.spawn(["npc"]);

    assert_eq!(driver.run_on_tag(&mut world, "idle", "mob"), 2);
    assert!(world.get(a).unwrap().has_script("idle"));
    assert!(world.get(b).unwrap().has_script("idle"));
    assert!(!world.get(c).unwrap().has_script("idle"));
}

#[test]
fn start_script_node_raises_a_request() {
    let (registry, mut driver, mut world) = setup();
    driver.library.insert(Arc::new(idle_graph(&registry, 100.0)));
    let spawner = GraphBuilder::new("spawner")
        .node("start", "start")
        .node_with("launch", "startScript", json!({ "script": "idle" }))
        .flow("start", 0, "launch")
        .build(&registry)
        .expect("valid graph");
    driver.library.insert(Arc::new(spawner));

    let e = world.spawn(["hero"]);
    driver.add_script(&mut world, e, "spawner", vec![], vec![]);
    driver.tick(&mut world, 0.016);
    assert!(world.get(e).unwrap().has_script("idle"));
}
