use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use emath::vec2;
use log::info;
use serde::Serialize;

use chainviz_layout::graph::{Category, RiskLevel};
use chainviz_layout::search::{SearchQuery, search_nodes};
use chainviz_layout::{
    ClusterOptions, Coordinator, EngineConfig, Graph, GraphDocument, OptimizeOptions, RawGraph,
    Viewport, ViewportCuller, cluster_graph, expand_all, expand_cluster,
};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// JSON file overriding engine defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Run every job on the calling thread.
    #[arg(long, global = true)]
    sync: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the force layout and print positioned nodes.
    Layout {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = 1200.0)]
        width: f32,
        #[arg(long, default_value_t = 800.0)]
        height: f32,
    },
    /// Merge nearby nodes into cluster nodes.
    Cluster {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        distance: Option<f32>,
    },
    /// Truncate, simplify and cluster for constrained clients.
    Optimize {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        mobile: bool,
        #[arg(long)]
        max_nodes: Option<usize>,
        #[arg(long)]
        no_clustering: bool,
        #[arg(long)]
        cluster_distance: Option<f32>,
        #[arg(long)]
        simplify: bool,
    },
    /// List nodes and links visible through a viewport.
    Cull {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = 1.0)]
        scale: f32,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        offset_x: f32,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        offset_y: f32,
        #[arg(long, default_value_t = 1200.0)]
        width: f32,
        #[arg(long, default_value_t = 800.0)]
        height: f32,
        #[arg(long)]
        margin: Option<f32>,
    },
    /// Fuzzy-search nodes by id, label or address.
    Search {
        #[arg(long)]
        input: PathBuf,
        #[arg(default_value = "")]
        text: String,
        #[arg(long, value_parser = parse_risk)]
        risk: Option<RiskLevel>,
        #[arg(long, value_parser = parse_category)]
        category: Option<Category>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Cluster, then expand one cluster (or all of them) back out.
    Expand {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        distance: Option<f32>,
        #[arg(long)]
        cluster: Option<String>,
    },
}

fn parse_risk(raw: &str) -> Result<RiskLevel, String> {
    serde_json::from_value(serde_json::Value::from(raw.to_ascii_lowercase()))
        .map_err(|_| format!("unknown risk level `{raw}`"))
}

fn parse_category(raw: &str) -> Result<Category, String> {
    serde_json::from_value(serde_json::Value::from(raw.to_ascii_lowercase()))
        .map_err(|_| format!("unknown category `{raw}`"))
}

fn load_graph(path: &Path) -> anyhow::Result<Graph> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = RawGraph::from_json_str(&raw)
        .with_context(|| format!("failed to parse graph in {}", path.display()))?;
    let (graph, report) = Graph::ingest(raw);
    if !report.is_clean() {
        info!(
            "ingest dropped {} nodes and {} links",
            report.dropped_nodes(),
            report.dropped_links()
        );
    }
    Ok(graph)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{rendered}");
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CullReport {
    nodes: Vec<String>,
    links: Vec<usize>,
}

#[derive(Serialize)]
struct SearchRow {
    id: String,
    score: i64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if args.sync {
        config.coordinator.force_synchronous = true;
    }
    let coordinator = Coordinator::start(config.clone());

    match args.command {
        Command::Layout {
            input,
            width,
            height,
        } => {
            let graph = load_graph(&input)?;
            let result = coordinator.calculate_layout(graph, width, height).wait()?;
            info!("layout finished after {} ticks (settled: {})", result.ticks, result.settled);
            let mut document = GraphDocument::from(&result.graph);
            if let Some(map) = result.cluster_map {
                document = document.with_cluster_map(map);
            }
            print_json(&document)
        }
        Command::Cluster { input, distance } => {
            let graph = load_graph(&input)?;
            let outcome = coordinator.cluster_nodes(graph, distance).wait()?;
            print_json(&GraphDocument::from(&outcome.graph).with_cluster_map(outcome.cluster_map))
        }
        Command::Optimize {
            input,
            mobile,
            max_nodes,
            no_clustering,
            cluster_distance,
            simplify,
        } => {
            let graph = load_graph(&input)?;
            let options = OptimizeOptions {
                is_mobile: mobile,
                max_nodes,
                clustering: !no_clustering,
                cluster_distance,
                simplify_attributes: simplify,
                ..OptimizeOptions::default()
            };
            let outcome = coordinator.optimize_network(graph, options).wait()?;
            info!(
                "optimize truncated {} nodes and dropped {} links",
                outcome.truncated_nodes, outcome.dropped_links
            );
            let mut document = GraphDocument::from(&outcome.graph);
            if let Some(map) = outcome.cluster_map {
                document = document.with_cluster_map(map);
            }
            print_json(&document)
        }
        Command::Cull {
            input,
            scale,
            offset_x,
            offset_y,
            width,
            height,
            margin,
        } => {
            if !(scale > 0.0) {
                bail!("scale must be positive, got {scale}");
            }
            let graph = load_graph(&input)?;
            let culler = ViewportCuller::new(&graph, &config.cull);
            let viewport = Viewport {
                scale,
                offset: vec2(offset_x, offset_y),
                width,
                height,
            };
            let visible = culler.visible_nodes(&viewport, margin.unwrap_or(config.cull.margin));
            let links = culler.visible_links(&graph, &visible);
            print_json(&CullReport {
                nodes: visible
                    .iter()
                    .map(|&index| graph.nodes()[index].id.clone())
                    .collect(),
                links,
            })
        }
        Command::Search {
            input,
            text,
            risk,
            category,
            limit,
        } => {
            let graph = load_graph(&input)?;
            let query = SearchQuery {
                text,
                risk,
                category,
            };
            let rows = search_nodes(&graph, &query, limit)
                .into_iter()
                .map(|hit| SearchRow {
                    id: graph.nodes()[hit.index].id.clone(),
                    score: hit.score,
                })
                .collect::<Vec<_>>();
            print_json(&rows)
        }
        Command::Expand {
            input,
            distance,
            cluster,
        } => {
            let graph = load_graph(&input)?;
            let mut options = ClusterOptions::from(&config.cluster);
            if let Some(distance) = distance {
                options.distance_threshold = distance;
            }
            let mut clustered = cluster_graph(&graph, &options).graph;
            let restored = match cluster {
                Some(id) => expand_cluster(&mut clustered, &id)?,
                None => expand_all(&mut clustered)?,
            };
            info!("restored {restored} nodes");
            print_json(&GraphDocument::from(&clustered))
        }
    }
}
