use std::io::Write;
use std::sync::Arc;

use serde_json::{Value, json};

use skein::graph::loader;
use skein::{NodeTypeRegistry, ScriptDriver, ScriptWorld};

const PULSE: &str = r#"
name: pulse
nodes:
  - id: start
    type: start
  - id: delay
    type: wait
    settings: { time: 0.05 }
  - id: set
    type: setVariable
    settings: { scope: entity, name: done }
  - id: one
    type: constant
    settings: { value: 1 }
flows:
  - [start, 0, delay]
  - [delay, 0, set]
wires:
  - [one, 0, set, 2]
"#;

#[test]
fn yaml_graph_loads_and_runs() {
    let registry = Arc::new(NodeTypeRegistry::with_builtins());

    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(PULSE.as_bytes()).expect("write yaml");
    let graph = loader::load_graph(file.path(), &registry).expect("load graph");
    assert_eq!(graph.name, "pulse");
    assert_eq!(graph.len(), 4);
    assert_eq!(graph.roots.len(), 1);
    assert!(!graph.persistent);

    let mut driver = ScriptDriver::new(registry);
    driver.library.insert(Arc::new(graph));
    let mut world = ScriptWorld::new();
    let e = world.spawn(["hero"]);
    driver.add_script(&mut world, e, "pulse", vec![], vec![]);

    driver.tick(&mut world, 0.03);
    assert_eq!(
        world.get(e).and_then(|s| s.variables.get("done").cloned()),
        None
    );
    driver.tick(&mut world, 0.03);
    assert_eq!(
        world.get(e).and_then(|s| s.variables.get("done").cloned()),
        Some(json!(1))
    );
}

#[test]
fn graph_flags_are_parsed() {
    let registry = NodeTypeRegistry::with_builtins();
    let yaml = r#"
name: keeper
persistent: true
quietDuplicates: true
nodes:
  - id: start
    type: start
"#;
    let graph = loader::parse_graph(yaml, &registry).expect("load graph");
    assert!(graph.persistent);
    assert!(graph.quiet_duplicates);
}

#[test]
fn malformed_documents_are_rejected() {
    let registry = NodeTypeRegistry::with_builtins();
    assert!(loader::parse_graph("nope: [broken", &registry).is_err());

    let invalid = r#"
name: bad
nodes:
  - id: a
    type: noSuchNode
"#;
    let err = loader::parse_graph(invalid, &registry).unwrap_err();
    assert!(format!("{err:#}").contains("bad"));
}

#[test]
fn directory_loading_collects_graphs() {
    let registry = NodeTypeRegistry::with_builtins();
    let dir = tempfile::tempdir().expect("temp dir");
    std::fs::write(dir.path().join("pulse.yaml"), PULSE).expect("write yaml");
    std::fs::write(dir.path().join("notes.txt"), "ignored").expect("write txt");

    let library = loader::load_library(dir.path(), &registry).expect("load library");
    assert!(library.contains("pulse"));
    assert!(library.get("pulse").unwrap().node_id("delay").is_some());
}

#[test]
fn settings_survive_the_yaml_round_trip() {
    let registry = NodeTypeRegistry::with_builtins();
    let graph = loader::parse_graph(PULSE, &registry).expect("load graph");
    let wait = graph.node(graph.node_id("delay").unwrap());
    assert_eq!(wait.setting_f32("time", 0.0), 0.05);
    let constant = graph.node(graph.node_id("one").unwrap());
    assert_eq!(constant.settings.get("value"), Some(&Value::Number(1.into())));
}
