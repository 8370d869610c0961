use canopy::engine::{BasicNode, EngineConfig, NodeId, Tree, TreeError, Value};
use canopy::parser::{RulesError, Statement, format_rules, load_rules, parse_rules};
use clap::{Parser as ClapParser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

#[derive(ClapParser)]
#[command(name = "canopy")]
#[command(about = "Canopy rule language CLI")]
struct Cli {
    /// Log filter, e.g. `debug` or `canopy=trace`. Defaults to RUST_LOG, then `warn`
    #[arg(long, global = true)]
    log: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check if a rule file parses correctly
    Check {
        /// Path to the rule file
        file: PathBuf,
    },
    /// Print the flattened rule list
    Flatten {
        /// Path to the rule file
        file: PathBuf,
    },
    /// Print the rule file in canonical formatting
    Fmt {
        /// Path to the rule file
        file: PathBuf,
    },
    /// Apply rules to a JSON tree snapshot and print every node's declarations
    Run {
        /// Path to the rule file
        rules: PathBuf,
        /// Path to a JSON snapshot: `{ "kind", "properties", "children" }`
        tree: PathBuf,
        /// Engine limits as JSON
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// One node of the input snapshot.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NodeSnapshot {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    children: Vec<NodeSnapshot>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());

    match cli.command {
        Commands::Check { file } => {
            let source_code = read_or_exit(&file);
            parse_or_exit(&file, &source_code);
            eprintln!("{}: ok", file.display());
        }
        Commands::Flatten { file } => {
            let source_code = read_or_exit(&file);
            let rules = match load_rules(&file_name(&file), &source_code) {
                Ok(rules) => rules,
                Err(error) => exit_with_reports(&error, &source_code),
            };
            for rule in &rules {
                println!("{rule}");
            }
        }
        Commands::Fmt { file } => {
            let source_code = read_or_exit(&file);
            let statements = parse_or_exit(&file, &source_code);
            print!("{}", format_rules(&statements));
        }
        Commands::Run {
            rules,
            tree,
            config,
        } => run(&rules, &tree, config.as_deref()),
    }
}

fn init_logging(directive: Option<&str>) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match directive {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

fn file_name(path: &Path) -> String {
    path.display().to_string()
}

fn read_or_exit(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            eprintln!("Error reading {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn parse_or_exit(path: &Path, source_code: &str) -> Vec<Statement> {
    match parse_rules(&file_name(path), source_code) {
        Ok(statements) => statements,
        Err(error) => exit_with_reports(&error, source_code),
    }
}

fn exit_with_reports(error: &RulesError, source_code: &str) -> ! {
    let colored = io::stderr().is_terminal();
    for diagnostic in error.diagnostics() {
        if let Err(e) = diagnostic.write_report(source_code, colored, io::stderr()) {
            // Fall back to the plain rendering
            eprintln!("{diagnostic} ({e})");
        }
    }
    std::process::exit(1);
}

fn load_config(path: Option<&Path>) -> EngineConfig {
    let Some(path) = path else {
        return EngineConfig::default();
    };
    match serde_json::from_str(&read_or_exit(path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid config {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn run(rules_path: &Path, tree_path: &Path, config_path: Option<&Path>) {
    let config = load_config(config_path);
    let source_code = read_or_exit(rules_path);
    let rules = match load_rules(&file_name(rules_path), &source_code) {
        Ok(rules) => rules,
        Err(error) => exit_with_reports(&error, &source_code),
    };
    let snapshot: NodeSnapshot = match serde_json::from_str(&read_or_exit(tree_path)) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            eprintln!("Invalid tree snapshot {}: {}", tree_path.display(), e);
            std::process::exit(1);
        }
    };

    let mut tree = Tree::with_config(config, behavior_for(&snapshot));
    tree.set_rules(rules);
    let root = tree.root();
    if let Err(e) = populate(&mut tree, root, &snapshot) {
        eprintln!("Error building tree: {}", e);
        std::process::exit(1);
    }
    let report = tree.flush();
    tracing::info!(
        passes = report.node_passes,
        watchers = report.watcher_refreshes,
        rounds = report.rounds,
        "tree flushed"
    );
    if !report.settled {
        eprintln!("Warning: rules did not settle after {} rounds", report.rounds);
    }

    let output = resolved_json(&tree, root);
    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            std::process::exit(1);
        }
    }
}

fn behavior_for(snapshot: &NodeSnapshot) -> BasicNode {
    match &snapshot.kind {
        Some(kind) => BasicNode::with_kind(kind.as_str()),
        None => BasicNode::new(),
    }
}

/// Copy the snapshot's properties onto `node` and build its children below it.
fn populate(tree: &mut Tree, node: NodeId, snapshot: &NodeSnapshot) -> Result<(), TreeError> {
    for (name, value) in &snapshot.properties {
        tree.set_property(node, name.as_str(), Value::from_json(value));
    }
    for (index, child_snapshot) in snapshot.children.iter().enumerate() {
        let child = tree.create_node(behavior_for(child_snapshot));
        tree.add_child(node, index, child)?;
        populate(tree, child, child_snapshot)?;
    }
    Ok(())
}

fn resolved_json(tree: &Tree, node: NodeId) -> serde_json::Value {
    let kind = tree
        .behavior(node)
        .map_or(Value::Undefined, |behavior| behavior.evaluate_identifier("kind"))
        .to_json();
    let declarations: serde_json::Map<String, serde_json::Value> = tree
        .declarations(node)
        .into_iter()
        .flatten()
        .map(|(name, value)| (name.to_string(), value.to_json()))
        .collect();
    let children: Vec<serde_json::Value> = tree
        .children(node)
        .iter()
        .map(|child| resolved_json(tree, *child))
        .collect();
    serde_json::json!({
        "node": node.to_string(),
        "kind": kind,
        "declarations": declarations,
        "children": children,
    })
}
