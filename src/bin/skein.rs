use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use evalexpr::{
    ContextWithMutableVariables, DefaultNumericTypes, HashMapContext, build_operator_tree,
};
use serde_json::Value;
use tracing::info;

use skein::graph::loader;
use skein::{NodeTypeRegistry, ScriptDriver, ScriptWorld};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a graph file against a single scripted entity
    Run {
        /// Path to the graph YAML file
        file: PathBuf,
        /// Number of ticks to simulate
        #[arg(long, default_value_t = 100)]
        ticks: u32,
        /// Tick duration in seconds
        #[arg(long, default_value_t = 1.0 / 60.0)]
        dt: f32,
        /// Entity variables as name=json pairs
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, Value)>,
    },
    /// Validate a graph file without running it
    Check {
        /// Path to the graph YAML file
        file: PathBuf,
    },
    /// Evaluate an expression the way an expression node would
    Eval {
        expr: String,
        /// Variables as name=json pairs
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, Value)>,
    },
}

fn parse_var(s: &str) -> Result<(String, Value), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{s}`"))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
    Ok((name.to_owned(), value))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            file,
            ticks,
            dt,
            vars,
        } => {
            let registry = Arc::new(NodeTypeRegistry::with_builtins());
            let graph = Arc::new(loader::load_graph(&file, &registry)?);
            info!(graph = %graph.name, nodes = graph.len(), "loaded graph");

            let mut driver = ScriptDriver::new(registry);
            driver.library.insert(graph.clone());

            let mut world = ScriptWorld::new();
            let entity = world.spawn(Vec::<String>::new());
            if let Some(scriptable) = world.get_mut(entity) {
                for (name, value) in vars {
                    scriptable.variables.set(name, value);
                }
            }
            world.attach(entity, graph.clone());

            for tick in 0..ticks {
                driver.tick(&mut world, dt);
                let running = world
                    .get(entity)
                    .is_some_and(|s| s.has_script(&graph.name));
                if !running {
                    info!(tick, "script finished");
                    break;
                }
            }

            if let Some(scriptable) = world.get(entity) {
                for (name, value) in scriptable.variables.iter() {
                    println!("{name} = {value}");
                }
            }
            Ok(())
        }
        Commands::Check { file } => {
            let registry = NodeTypeRegistry::with_builtins();
            let graph = loader::load_graph(&file, &registry)?;
            println!(
                "{}: {} nodes, {} roots, hash {:016x}",
                graph.name,
                graph.len(),
                graph.roots.len(),
                graph.hash
            );
            Ok(())
        }
        Commands::Eval { expr, vars } => {
            let tree = build_operator_tree::<DefaultNumericTypes>(&expr)?;
            let mut ctx = HashMapContext::<DefaultNumericTypes>::new();
            let vars: HashMap<String, Value> = vars.into_iter().collect();
            for (name, value) in &vars {
                let ev = match value {
                    Value::String(s) => Some(evalexpr::Value::String(s.clone())),
                    Value::Number(n) => {
                        if let Some(i) = n.as_i64() {
                            Some(evalexpr::Value::Int(i))
                        } else {
                            n.as_f64().map(evalexpr::Value::Float)
                        }
                    }
                    Value::Bool(b) => Some(evalexpr::Value::Boolean(*b)),
                    _ => None,
                };
                if let Some(ev) = ev {
                    let _ = ctx.set_value(name.clone(), ev);
                }
            }
            println!("{}", tree.eval_with_context(&ctx)?);
            Ok(())
        }
    }
}
