use std::sync::Arc;

use serde_json::{Value, json};

use skein::graph::builder::GraphBuilder;
use skein::{EntityId, NodeTypeRegistry, ScriptDriver, ScriptWorld};

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

fn strand_count(world: &ScriptWorld, e: EntityId, script: &str) -> usize {
    world
        .get(e)
        .and_then(|s| s.state(script))
        .map(|s| s.strand_count())
        .unwrap_or(0)
}

#[test]
fn fence_holds_until_signaled() {
    let (registry, mut driver, mut world) = setup();
    // one branch parks at the fence, the other waits then signals it
    let graph = GraphBuilder::new("gate")
        .node("start", "start")
        .node_with("fork", "fork", json!({ "branches": 2 }))
        .node("fence", "fence")
        .node_with("delay", "wait", json!({ "time": 0.05 }))
        .node("sig", "signal")
        .node_with("set", "setVariable", json!({ "scope": "entity", "name": "done" }))
        .node_with("one", "constant", json!({ "value": 1 }))
        .flow("start", 0, "fork")
        .flow("fork", 0, "fence")
        .flow("fork", 1, "delay")
        .flow("delay", 0, "sig")
        .flow("fence", 0, "set")
        .wire("sig", 2, "fence", 1)
        .wire("one", 0, "set", 2)
        .build(&registry)
        .expect("valid graph");
    driver.library.insert(Arc::new(graph));

    let e = world.spawn(["hero"]);
    driver.add_script(&mut world, e, "gate", vec![], vec![]);

    driver.tick(&mut world, 0.03);
    assert_eq!(entity_var(&world, e, "done"), Value::Null);
    driver.tick(&mut world, 0.03); // signal fires, fence already stepped
    assert_eq!(entity_var(&world, e, "done"), Value::Null);
    driver.tick(&mut world, 0.03); // fence opens
    assert_eq!(entity_var(&world, e, "done"), json!(1));
    assert!(!world.get(e).unwrap().has_script("gate"));
}

#[test]
fn flow_gate_follows_its_condition() {
    let (registry, mut driver, mut world) = setup();
    let graph = GraphBuilder::new("gated")
        .node("start", "start")
        .node("gate", "flowGate")
        .node_with("cond", "getVariable", json!({ "scope": "entity", "name": "open" }))
        .node_with("yes", "setVariable", json!({ "scope": "entity", "name": "went" }))
        .node_with("no", "setVariable", json!({ "scope": "entity", "name": "blocked" }))
        .node_with("one", "constant", json!({ "value": 1 }))
        .flow("start", 0, "gate")
        .flow("gate", 0, "yes")
        .flow("gate", 1, "no")
        .wire("cond", 0, "gate", 1)
        .wire("one", 0, "yes", 2)
        .wire("one", 0, "no", 2)
        .build(&registry)
        .expect("valid graph");
    driver.library.insert(Arc::new(graph));

    let e = world.spawn(["hero"]);
    world.get_mut(e).unwrap().variables.set("open", json!(false));
    driver.add_script(&mut world, e, "gated", vec![], vec![]);
    assert_eq!(entity_var(&world, e, "blocked"), json!(1));
    assert_eq!(entity_var(&world, e, "went"), Value::Null);

    world.get_mut(e).unwrap().variables.set("open", json!(true));
    driver.tick(&mut world, 0.03); // gate notices and resets
    driver.tick(&mut world, 0.03); // re-arms along the true branch
    assert_eq!(entity_var(&world, e, "went"), json!(1));
}

#[test]
fn flow_once_takes_the_second_output_on_revisit() {
    let (registry, mut driver, mut world) = setup();
    let graph = GraphBuilder::new("once")
        .node("start", "start")
        .node("once", "flowOnce")
        .node_with("seta", "setVariable", json!({ "scope": "entity", "name": "a" }))
        .node_with("setb", "setVariable", json!({ "scope": "entity", "name": "b" }))
        .node_with("loop", "wait", json!({ "time": 0.01 }))
        .node("halt", "stop")
        .node_with("one", "constant", json!({ "value": 1 }))
        .flow("start", 0, "once")
        .flow("once", 0, "seta")
        .flow("once", 1, "setb")
        .flow("seta", 0, "loop")
        .flow("loop", 0, "once")
        .flow("setb", 0, "halt")
        .wire("one", 0, "seta", 2)
        .wire("one", 0, "setb", 2)
        .build(&registry)
        .expect("valid graph");
    driver.library.insert(Arc::new(graph));

    let e = world.spawn(["hero"]);
    driver.add_script(&mut world, e, "once", vec![], vec![]);
    assert_eq!(entity_var(&world, e, "a"), json!(1));
    assert_eq!(entity_var(&world, e, "b"), Value::Null);

    driver.tick(&mut world, 0.03);
    assert_eq!(entity_var(&world, e, "b"), json!(1));
    assert!(!world.get(e).unwrap().has_script("once"));
}

#[test]
fn wait_counts_down_across_ticks() {
    let (registry, mut driver, mut world) = setup();
    let graph = GraphBuilder::new("timer")
        .node("start", "start")
        .node_with("delay", "wait", json!({ "time": 0.1 }))
        .node_with("set", "setVariable", json!({ "scope": "entity", "name": "done" }))
        .node_with("one", "constant", json!({ "value": 1 }))
        .flow("start", 0, "delay")
        .flow("delay", 0, "set")
        .wire("one", 0, "set", 2)
        .build(&registry)
        .expect("valid graph");
    driver.library.insert(Arc::new(graph));

    let e = world.spawn(["hero"]);
    driver.add_script(&mut world, e, "timer", vec![], vec![]);
    for _ in 0..3 {
        driver.tick(&mut world, 0.03);
        assert_eq!(entity_var(&world, e, "done"), Value::Null);
    }
    driver.tick(&mut world, 0.03);
    assert_eq!(entity_var(&world, e, "done"), json!(1));
}

#[test]
fn breaker_aborts_its_branch_and_rearms() {
    let (registry, mut driver, mut world) = setup();
    let graph = GraphBuilder::new("breaking")
        .node("start", "start")
        .node_with("fork", "fork", json!({ "branches": 2 }))
        .node("brk", "breaker")
        .node_with("slow", "wait", json!({ "time": 10.0 }))
        .node_with("delay", "wait", json!({ "time": 0.05 }))
        .node("sig", "signal")
        .node_with("set", "setVariable", json!({ "scope": "entity", "name": "broke" }))
        .node_with("one", "constant", json!({ "value": 1 }))
        .flow("start", 0, "fork")
        .flow("fork", 0, "brk")
        .flow("fork", 1, "delay")
        .flow("delay", 0, "sig")
        .flow("brk", 0, "slow")
        .flow("brk", 1, "set")
        .flow("set", 0, "brk")
        .wire("sig", 2, "brk", 1)
        .wire("one", 0, "set", 2)
        .build(&registry)
        .expect("valid graph");
    driver.library.insert(Arc::new(graph));

    let e = world.spawn(["hero"]);
    driver.add_script(&mut world, e, "breaking", vec![], vec![]);
    // watcher plus the protected branch plus the signal branch
    assert_eq!(strand_count(&world, e, "breaking"), 3);

    driver.tick(&mut world, 0.03);
    driver.tick(&mut world, 0.03); // signal fires
    driver.tick(&mut world, 0.03); // breaker takes the broken path
    assert_eq!(entity_var(&world, e, "broke"), json!(1));

    driver.tick(&mut world, 0.03); // flow looped back, breaker re-armed
    assert_eq!(strand_count(&world, e, "breaking"), 2);
}

#[test]
fn breaker_keeps_an_early_signal() {
    let (registry, mut driver, mut world) = setup();
    // the signal lands before the protected strand reaches the breaker
    let graph = GraphBuilder::new("primed")
        .node("start", "start")
        .node_with("fork", "fork", json!({ "branches": 2 }))
        .node_with("late", "wait", json!({ "time": 0.2 }))
        .node("brk", "breaker")
        .node_with("slow", "wait", json!({ "time": 10.0 }))
        .node("sig", "signal")
        .node_with("set", "setVariable", json!({ "scope": "entity", "name": "broke" }))
        .node_with("one", "constant", json!({ "value": 1 }))
        .flow("start", 0, "fork")
        .flow("fork", 0, "late")
        .flow("fork", 1, "sig")
        .flow("late", 0, "brk")
        .flow("brk", 0, "slow")
        .flow("brk", 1, "set")
        .wire("sig", 2, "brk", 1)
        .wire("one", 0, "set", 2)
        .build(&registry)
        .expect("valid graph");
    driver.library.insert(Arc::new(graph));

    let e = world.spawn(["hero"]);
    driver.add_script(&mut world, e, "primed", vec![], vec![]);

    for _ in 0..4 {
        driver.tick(&mut world, 0.06);
    }
    // strand arrived and armed; the held signal trips it on the next step
    assert_eq!(entity_var(&world, e, "broke"), Value::Null);
    driver.tick(&mut world, 0.06);
    assert_eq!(entity_var(&world, e, "broke"), json!(1));
    assert!(!world.get(e).unwrap().has_script("primed"));
}

#[test]
fn line_reset_restarts_when_the_monitor_changes() {
    let (registry, mut driver, mut world) = setup();
    let graph = GraphBuilder::new("resettable")
        .node("start", "start")
        .node("reset", "lineReset")
        .node_with("mon", "getVariable", json!({ "scope": "entity", "name": "m" }))
        .node_with("slow", "wait", json!({ "time": 10.0 }))
        .flow("start", 0, "reset")
        .flow("reset", 0, "slow")
        .wire("mon", 0, "reset", 2)
        .build(&registry)
        .expect("valid graph");
    driver.library.insert(Arc::new(graph));

    let e = world.spawn(["hero"]);
    world.get_mut(e).unwrap().variables.set("m", json!(1));
    driver.add_script(&mut world, e, "resettable", vec![], vec![]);
    assert_eq!(strand_count(&world, e, "resettable"), 2);

    driver.tick(&mut world, 0.03);
    assert_eq!(strand_count(&world, e, "resettable"), 2);

    world.get_mut(e).unwrap().variables.set("m", json!(2));
    driver.tick(&mut world, 0.03); // change noticed, branch aborted
    assert_eq!(strand_count(&world, e, "resettable"), 1);

    driver.tick(&mut world, 0.03); // re-armed with a fresh branch
    assert_eq!(strand_count(&world, e, "resettable"), 2);
}
