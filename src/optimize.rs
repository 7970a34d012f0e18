use std::collections::BTreeMap;

use log::debug;
use serde::Deserialize;

use crate::cluster::{ClusterOptions, cluster_graph};
use crate::config::{EngineConfig, MOBILE_MAX_NODES};
use crate::graph::{Graph, Node, NodeId};

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptimizeOptions {
    pub is_mobile: bool,
    /// Falls back to the configured limit for the device class.
    pub max_nodes: Option<usize>,
    pub preserve_groups: bool,
    pub clustering: bool,
    pub cluster_distance: Option<f32>,
    /// Drops transaction hashes, timestamps and free-form metadata.
    pub simplify_attributes: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            is_mobile: false,
            max_nodes: None,
            preserve_groups: true,
            clustering: true,
            cluster_distance: None,
            simplify_attributes: false,
        }
    }
}

pub struct OptimizeOutcome {
    pub graph: Graph,
    /// Present when clustering ran.
    pub cluster_map: Option<BTreeMap<NodeId, NodeId>>,
    pub truncated_nodes: usize,
    pub dropped_links: usize,
}

/// Shrinks a graph for rendering: truncation, attribute stripping, then clustering.
pub fn optimize_network(
    mut graph: Graph,
    options: &OptimizeOptions,
    config: &EngineConfig,
) -> OptimizeOutcome {
    let defaults = &config.optimize;
    let mut max_nodes = options
        .max_nodes
        .unwrap_or_else(|| defaults.max_nodes(options.is_mobile));
    if options.is_mobile {
        max_nodes = max_nodes.min(MOBILE_MAX_NODES);
    }

    let before = graph.node_count();
    let dropped_links = graph.truncate(max_nodes);
    let truncated_nodes = before - graph.node_count();

    if options.simplify_attributes {
        simplify(&mut graph);
    }
    if options.is_mobile {
        strip_labels(graph.nodes_mut());
    }

    let mut cluster_map = None;
    if options.clustering && config.cluster.should_cluster(graph.node_count()) {
        let cluster_options = ClusterOptions {
            distance_threshold: options
                .cluster_distance
                .unwrap_or_else(|| defaults.cluster_distance(options.is_mobile)),
            preserve_groups: options.preserve_groups,
        };
        let outcome = cluster_graph(&graph, &cluster_options);
        graph = outcome.graph;
        cluster_map = Some(outcome.cluster_map);
        if options.is_mobile {
            strip_labels(graph.nodes_mut());
        }
    }

    debug!(
        "optimized network to {} nodes ({truncated_nodes} truncated, {dropped_links} links dropped)",
        graph.node_count()
    );

    OptimizeOutcome {
        graph,
        cluster_map,
        truncated_nodes,
        dropped_links,
    }
}

fn strip_labels(nodes: &mut [Node]) {
    for node in nodes {
        node.label = None;
    }
}

fn simplify(graph: &mut Graph) {
    for node in graph.nodes_mut() {
        node.metadata.clear();
    }
    for link in &mut graph.links {
        link.tx_hash = None;
        link.timestamp = None;
        link.metadata.clear();
    }
}
