use std::collections::HashSet;

use chainviz_layout::graph::{Category, Graph, Link, Node};
use chainviz_layout::{EngineConfig, LayoutEngine, OptimizeOptions};

fn ten_nodes_fifteen_links() -> Graph {
    let nodes = (0..10)
        .map(|i| Node::new(format!("n{i}"), Category::Address).at(i as f32 * 40.0, 0.0))
        .collect();
    let pairs = [
        (0, 1),
        (1, 2),
        (2, 0),
        (0, 3),
        (3, 4),
        (4, 5),
        (5, 6),
        (6, 7),
        (7, 8),
        (8, 9),
        (9, 0),
        (2, 5),
        (1, 7),
        (4, 8),
        (6, 2),
    ];
    let links = pairs
        .iter()
        .map(|&(a, b)| Link::new(format!("n{a}"), format!("n{b}"), 1.0))
        .collect();
    Graph::from_parts(nodes, links).0
}

#[test]
fn truncation_keeps_first_nodes_and_their_links() {
    let graph = ten_nodes_fifteen_links();
    assert_eq!(graph.link_count(), 15);

    let engine = LayoutEngine::new(EngineConfig::default());
    let outcome = engine.optimize_network(
        graph,
        &OptimizeOptions {
            max_nodes: Some(3),
            ..OptimizeOptions::default()
        },
    );

    let ids = outcome
        .graph
        .nodes()
        .iter()
        .map(|node| node.id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["n0", "n1", "n2"]);

    let kept = ids.into_iter().collect::<HashSet<_>>();
    assert_eq!(outcome.graph.link_count(), 3);
    assert!(
        outcome
            .graph
            .links()
            .iter()
            .all(|link| kept.contains(link.source.as_str()) && kept.contains(link.target.as_str()))
    );
    assert_eq!(outcome.truncated_nodes, 7);
    assert_eq!(outcome.dropped_links, 12);
    assert!(outcome.cluster_map.is_none());
}
