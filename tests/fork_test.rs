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

#[test]
fn merge_waits_for_every_sibling() {
    let (registry, mut driver, mut world) = setup();
    let graph = GraphBuilder::new("join")
        .node("start", "start")
        .node_with("fork", "fork", json!({ "branches": 3 }))
        .node_with("w1", "wait", json!({ "time": 0.03 }))
        .node_with("w2", "wait", json!({ "time": 0.06 }))
        .node_with("w3", "wait", json!({ "time": 0.09 }))
        .node("merge", "merge")
        .node_with("set", "setVariable", json!({ "scope": "entity", "name": "joined" }))
        .node_with("one", "constant", json!({ "value": 1 }))
        .flow("start", 0, "fork")
        .flow("fork", 0, "w1")
        .flow("fork", 1, "w2")
        .flow("fork", 2, "w3")
        .flow("w1", 0, "merge")
        .flow("w2", 0, "merge")
        .flow("w3", 0, "merge")
        .flow("merge", 0, "set")
        .wire("one", 0, "set", 2)
        .build(&registry)
        .expect("valid graph");
    driver.library.insert(Arc::new(graph));

    let e = world.spawn(["hero"]);
    driver.add_script(&mut world, e, "join", vec![], vec![]);

    driver.tick(&mut world, 0.05); // first sibling arrives, merge holds
    assert_eq!(entity_var(&world, e, "joined"), Value::Null);
    assert!(world.get(e).unwrap().has_script("join"));

    driver.tick(&mut world, 0.05); // last siblings arrive, merge releases
    assert_eq!(entity_var(&world, e, "joined"), json!(1));
    assert!(!world.get(e).unwrap().has_script("join"));
}

#[test]
fn merge_and_continue_lets_every_sibling_through() {
    let (registry, mut driver, mut world) = setup();
    let graph = GraphBuilder::new("funnel")
        .node("start", "start")
        .node_with("fork", "fork", json!({ "branches": 3 }))
        .node_with("w1", "wait", json!({ "time": 0.03 }))
        .node_with("w2", "wait", json!({ "time": 0.06 }))
        .node_with("w3", "wait", json!({ "time": 0.09 }))
        .node_with("merge", "merge", json!({ "wait": false }))
        .node_with("expr", "expression", json!({ "expression": "count + 1" }))
        .node_with("set", "setVariable", json!({ "scope": "entity", "name": "count" }))
        .flow("start", 0, "fork")
        .flow("fork", 0, "w1")
        .flow("fork", 1, "w2")
        .flow("fork", 2, "w3")
        .flow("w1", 0, "merge")
        .flow("w2", 0, "merge")
        .flow("w3", 0, "merge")
        .flow("merge", 0, "set")
        .wire("expr", 0, "set", 2)
        .build(&registry)
        .expect("valid graph");
    driver.library.insert(Arc::new(graph));

    let e = world.spawn(["hero"]);
    world.get_mut(e).unwrap().variables.set("count", json!(0));
    driver.add_script(&mut world, e, "funnel", vec![], vec![]);

    for _ in 0..4 {
        driver.tick(&mut world, 0.05);
    }
    assert_eq!(entity_var(&world, e, "count"), json!(3));
    assert!(!world.get(e).unwrap().has_script("funnel"));
}

#[test]
fn watchers_do_not_count_toward_merges() {
    let (registry, mut driver, mut world) = setup();
    // one fork branch converts to a watcher; the merge must release on the
    // other branch alone
    let graph = GraphBuilder::new("observed")
        .node("start", "start")
        .node_with("fork", "fork", json!({ "branches": 2 }))
        .node("gate", "flowGate")
        .node_with("t", "constant", json!({ "value": true }))
        .node_with("slow", "wait", json!({ "time": 10.0 }))
        .node_with("quick", "wait", json!({ "time": 0.03 }))
        .node("merge", "merge")
        .node_with("set", "setVariable", json!({ "scope": "entity", "name": "merged" }))
        .node_with("one", "constant", json!({ "value": 1 }))
        .flow("start", 0, "fork")
        .flow("fork", 0, "gate")
        .flow("fork", 1, "quick")
        .flow("gate", 0, "slow")
        .flow("quick", 0, "merge")
        .flow("merge", 0, "set")
        .wire("t", 0, "gate", 1)
        .wire("one", 0, "set", 2)
        .build(&registry)
        .expect("valid graph");
    driver.library.insert(Arc::new(graph));

    let e = world.spawn(["hero"]);
    driver.add_script(&mut world, e, "observed", vec![], vec![]);

    driver.tick(&mut world, 0.05);
    assert_eq!(entity_var(&world, e, "merged"), json!(1));
    // the watcher and its branch keep the state alive
    assert!(world.get(e).unwrap().has_script("observed"));
    assert_eq!(world.get(e).unwrap().state("observed").unwrap().strand_count(), 2);
}

#[test]
fn call_jumps_in_and_return_resumes_after() {
    let (registry, mut driver, mut world) = setup();
    let graph = GraphBuilder::new("caller")
        .node("start", "start")
        .node_with("call", "call", json!({ "function": "fn" }))
        .node_with("after", "setVariable", json!({ "scope": "entity", "name": "after" }))
        .node("fn", "functionStart")
        .node_with("infn", "setVariable", json!({ "scope": "entity", "name": "infn" }))
        .node("ret", "return")
        .node_with("one", "constant", json!({ "value": 1 }))
        .flow("start", 0, "call")
        .flow("call", 0, "after")
        .flow("fn", 0, "infn")
        .flow("infn", 0, "ret")
        .wire("one", 0, "after", 2)
        .wire("one", 0, "infn", 2)
        .build(&registry)
        .expect("valid graph");
    driver.library.insert(Arc::new(graph));

    let e = world.spawn(["hero"]);
    assert!(driver.add_script(&mut world, e, "caller", vec![], vec![]));
    assert_eq!(entity_var(&world, e, "infn"), json!(1));
    assert_eq!(entity_var(&world, e, "after"), json!(1));
    assert!(!world.get(e).unwrap().has_script("caller"));
}

#[test]
fn restart_node_parks_its_strand() {
    let (registry, mut driver, mut world) = setup();
    let graph = GraphBuilder::new("again")
        .node("start", "start")
        .node_with("expr", "expression", json!({ "expression": "n + 1" }))
        .node_with("set", "setVariable", json!({ "scope": "entity", "name": "n" }))
        .node("cycle", "restart")
        .flow("start", 0, "set")
        .flow("set", 0, "cycle")
        .wire("expr", 0, "set", 2)
        .build(&registry)
        .expect("valid graph");
    driver.library.insert(Arc::new(graph));

    let e = world.spawn(["hero"]);
    world.get_mut(e).unwrap().variables.set("n", json!(0));
    driver.add_script(&mut world, e, "again", vec![], vec![]);

    driver.tick(&mut world, 0.03);
    driver.tick(&mut world, 0.03);
    assert_eq!(entity_var(&world, e, "n"), json!(1));
    assert!(world.get(e).unwrap().has_script("again"));
    assert_eq!(world.get(e).unwrap().state("again").unwrap().strand_count(), 1);
}

#[test]
fn terminate_destroys_the_state() {
    let (registry, mut driver, mut world) = setup();
    let graph = GraphBuilder::new("brief")
        .node("start", "start")
        .node("halt", "stop")
        .flow("start", 0, "halt")
        .build(&registry)
        .expect("valid graph");
    driver.library.insert(Arc::new(graph));

    let e = world.spawn(["hero"]);
    assert!(driver.add_script(&mut world, e, "brief", vec![], vec![]));
    assert!(!world.get(e).unwrap().has_script("brief"));
}

#[test]
fn branch_routes_on_its_condition() {
    let (registry, mut driver, mut world) = setup();
    let graph = GraphBuilder::new("choice")
        .node("start", "start")
        .node("branch", "branch")
        .node_with("cond", "getVariable", json!({ "scope": "entity", "name": "flag" }))
        .node_with("yes", "setVariable", json!({ "scope": "entity", "name": "taken" }))
        .node_with("no", "setVariable", json!({ "scope": "entity", "name": "skipped" }))
        .node_with("one", "constant", json!({ "value": 1 }))
        .flow("start", 0, "branch")
        .flow("branch", 0, "yes")
        .flow("branch", 1, "no")
        .wire("cond", 0, "branch", 1)
        .wire("one", 0, "yes", 2)
        .wire("one", 0, "no", 2)
        .build(&registry)
        .expect("valid graph");
    driver.library.insert(Arc::new(graph));

    let e = world.spawn(["hero"]);
    world.get_mut(e).unwrap().variables.set("flag", json!(true));
    driver.add_script(&mut world, e, "choice", vec![], vec![]);
    assert_eq!(entity_var(&world, e, "taken"), json!(1));
    assert_eq!(entity_var(&world, e, "skipped"), Value::Null);
}
