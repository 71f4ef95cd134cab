use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tagtree::config::{parse_config, ExplorerConfig};
use tagtree::locate::{BlockPos, ChunkPos};
use tagtree::search::{NameValueSearch, RuleSearch, SearchEvent, SearchState, SearchWorker};
use tagtree::{FsStorage, NodeId, NodeTree, Rule};

/// tagtree CLI: browse, search and locate nodes in a data directory
#[derive(Parser)]
#[command(name = "tagtree", version, about)]
struct Cli {
    /// Explorer config file (YAML). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Print a node and its children
    Show {
        /// Directory, data file or archive to open
        path: PathBuf,
        /// Node path inside the opened container (e.g. level.json/pos)
        #[arg(long)]
        node: Option<String>,
        /// How many levels of children to expand
        #[arg(long, default_value_t = 1)]
        depth: usize,
    },

    /// Search for tags by name/value substring or by a saved rule tree
    Find {
        /// Directory, data file or archive to open
        path: PathBuf,
        /// Tag name contains
        #[arg(long)]
        name: Option<String>,
        /// Stringified tag value contains
        #[arg(long)]
        value: Option<String>,
        /// Rule tree file (JSON), matched against compounds
        #[arg(long, conflicts_with_all = ["name", "value"])]
        rule: Option<PathBuf>,
        /// Stop at the first match
        #[arg(long)]
        first: bool,
        /// Match names and values case-sensitively
        #[arg(long)]
        case_sensitive: bool,
    },

    /// Find the archive entry holding a block or chunk
    Locate {
        /// World directory to search
        path: PathBuf,
        /// Block coordinates x,y,z
        #[arg(long, value_parser = parse_coords::<3>, conflicts_with = "chunk")]
        block: Option<Coords>,
        /// Chunk coordinates x,z
        #[arg(long, value_parser = parse_coords::<2>)]
        chunk: Option<Coords>,
    },
}

#[derive(Clone)]
struct Coords(Vec<i32>);

fn parse_coords<const N: usize>(s: &str) -> Result<Coords, String> {
    let coords = s
        .split(',')
        .map(|part| part.trim().parse::<i32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("Invalid coordinates '{s}': {e}"))?;
    if coords.len() != N {
        return Err(format!("Expected {N} comma-separated numbers, got '{s}'"));
    }
    Ok(Coords(coords))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => parse_config(path)?,
        None => ExplorerConfig::default(),
    };
    let mut tree = NodeTree::new(Arc::new(FsStorage::from_config(&config.storage)));

    match cli.command {
        Command::Show { path, node, depth } => {
            let opened = tree.open(&path)?;
            let target = match node {
                Some(node_path) => {
                    let full = format!("{}/{}", tree.path(opened), node_path.trim_matches('/'));
                    tree.find_by_path(&full)?
                        .ok_or_else(|| format!("Node not found: {node_path}"))?
                }
                None => opened,
            };
            let value = describe(&mut tree, target, depth)?;
            print_output(&value, &cli.format)?;
        }

        Command::Find {
            path,
            name,
            value,
            rule,
            first,
            case_sensitive,
        } => {
            let opened = tree.open(&path)?;
            let mut search = config.search.clone();
            search.case_sensitive |= case_sensitive;

            let found = match rule {
                Some(rule_path) => {
                    let content = std::fs::read_to_string(&rule_path)
                        .map_err(|e| format!("Failed to read rule file '{}': {e}", rule_path.display()))?;
                    let rule: Rule = serde_json::from_str(&content)?;
                    log::info!("Searching with rule: {rule}");
                    let mut state = RuleSearch::find(opened, rule).with_settings(&search);
                    state.session_mut().terminate_on_discover = first;
                    collect_matches(&mut tree, state)
                }
                None => {
                    if name.is_none() && value.is_none() {
                        return Err("Give --name, --value or --rule".into());
                    }
                    let mut state = NameValueSearch::new(opened, name.as_deref(), value.as_deref())
                        .with_settings(&search);
                    state.session_mut().terminate_on_discover = first;
                    collect_matches(&mut tree, state)
                }
            };
            print_output(&serde_json::json!({ "matches": found }), &cli.format)?;
        }

        Command::Locate { path, block, chunk } => {
            let opened = tree.open(&path)?;
            let chunk = match (block, chunk) {
                (Some(Coords(b)), _) => BlockPos::new(b[0], b[1], b[2]).chunk(),
                (None, Some(Coords(c))) => ChunkPos::new(c[0], c[1]),
                (None, None) => return Err("Give --block or --chunk".into()),
            };
            let result = match tree.find_chunk(opened, chunk)? {
                Some(entry) => serde_json::json!({
                    "chunk": [chunk.x, chunk.z],
                    "region": tree.path(tree.parent(entry).unwrap_or(entry)),
                    "slot": chunk.slot(),
                    "path": tree.path(entry),
                }),
                None => serde_json::json!({
                    "chunk": [chunk.x, chunk.z],
                    "found": false,
                }),
            };
            print_output(&result, &cli.format)?;
        }
    }

    Ok(())
}

/// Run a search to completion (or its first pause) and list what it found.
/// Containers the walk expanded are released again, so only paths are kept.
fn collect_matches<S: SearchState>(tree: &mut NodeTree, mut state: S) -> Vec<serde_json::Value> {
    let events: Receiver<SearchEvent> = state.session_mut().subscribe();
    let mut worker = SearchWorker::new(state);
    let status = worker.run(tree);
    log::debug!("Search finished: {status:?}");

    events
        .try_iter()
        .filter_map(|event| match event {
            SearchEvent::Discovered { node, path } => Some(serde_json::json!({
                "node": node.to_string(),
                "path": path,
            })),
            _ => None,
        })
        .collect()
}

fn describe(
    tree: &mut NodeTree,
    id: NodeId,
    depth: usize,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let mut out = serde_json::json!({
        "path": tree.path(id),
        "label": tree.display(id),
    });
    if depth > 0 && tree.is_container(id) {
        tree.expand(id)?;
        let mut children = Vec::new();
        for child in tree.children(id).to_vec() {
            children.push(describe(tree, child, depth - 1)?);
        }
        out["children"] = serde_json::Value::Array(children);
    } else if let Some(value) = tree.to_value(id) {
        out["value"] = serde_json::to_value(value)?;
    }
    Ok(out)
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
