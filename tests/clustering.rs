use std::collections::BTreeSet;

use chainviz_layout::graph::{Category, Graph, Link, Node};
use chainviz_layout::{ClusterOptions, cluster_graph, expand_all, expand_cluster};

fn mesh() -> Graph {
    let positions = [(0.0, 0.0), (30.0, 0.0), (15.0, 25.0), (60.0, 40.0), (10.0, 70.0)];
    let nodes = positions
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| Node::new(format!("n{i}"), Category::Address).at(x, y))
        .collect::<Vec<_>>();
    let mut links = Vec::new();
    for a in 0..positions.len() {
        for b in (a + 1)..positions.len() {
            links.push(Link::new(format!("n{a}"), format!("n{b}"), 1.0));
        }
    }
    Graph::from_parts(nodes, links).0
}

fn scattered(count: usize) -> Graph {
    let nodes = (0..count)
        .map(|i| {
            let x = ((i * 37) % 101) as f32 * 7.0;
            let y = ((i * 53) % 97) as f32 * 5.0;
            let group = if i % 3 == 0 { "exchange" } else { "wallet" };
            Node::new(format!("n{i}"), Category::Address)
                .at(x, y)
                .with_group(group)
        })
        .collect::<Vec<_>>();
    let links = (0..count * 2)
        .map(|i| {
            let source = (i * 13) % count;
            let target = (i * 29 + 7) % count;
            Link::new(format!("n{source}"), format!("n{target}"), 1.0 + (i % 5) as f32)
        })
        .collect::<Vec<_>>();
    Graph::from_parts(nodes, links).0
}

fn options(distance_threshold: f32, preserve_groups: bool) -> ClusterOptions {
    ClusterOptions {
        distance_threshold,
        preserve_groups,
    }
}

fn link_set(graph: &Graph) -> Vec<(String, String, u32)> {
    let mut links = graph
        .links()
        .iter()
        .map(|link| (link.source.clone(), link.target.clone(), link.weight.to_bits()))
        .collect::<Vec<_>>();
    links.sort();
    links
}

#[test]
fn zero_threshold_is_a_no_op() {
    let graph = mesh();
    let outcome = cluster_graph(&graph, &options(0.0, false));

    assert_eq!(outcome.graph.node_count(), 5);
    assert!(outcome.graph.nodes().iter().all(|node| !node.is_cluster()));
    assert_eq!(outcome.graph.nodes(), graph.nodes());
    assert_eq!(outcome.graph.links(), graph.links());
    assert!(outcome.cluster_map.iter().all(|(id, owner)| id == owner));
}

#[test]
fn infinite_threshold_collapses_mesh() {
    let outcome = cluster_graph(&mesh(), &options(f32::INFINITY, false));

    assert_eq!(outcome.graph.node_count(), 1);
    let cluster = &outcome.graph.nodes()[0];
    assert_eq!(cluster.cluster_size(), Some(5));
    assert_eq!(outcome.graph.link_count(), 0);
    assert_eq!(outcome.intra_weight, 10.0);
    assert_eq!(outcome.cross_weight, 0.0);
}

#[test]
fn clustering_is_deterministic() {
    let graph = scattered(120);
    let first = cluster_graph(&graph, &options(60.0, true));
    let second = cluster_graph(&graph, &options(60.0, true));

    assert_eq!(first.cluster_map, second.cluster_map);
    assert_eq!(link_set(&first.graph), link_set(&second.graph));
}

#[test]
fn link_weight_is_conserved() {
    let graph = scattered(150);
    for threshold in [0.0, 25.0, 80.0, 400.0, f32::INFINITY] {
        let outcome = cluster_graph(&graph, &options(threshold, false));
        let verbatim = outcome
            .graph
            .links()
            .iter()
            .filter(|link| !link.is_aggregate())
            .map(|link| link.weight)
            .sum::<f32>();
        let total = verbatim + outcome.cross_weight + outcome.intra_weight;
        assert!(
            (total - graph.total_link_weight()).abs() < 1.0e-2,
            "threshold {threshold}: {total} vs {}",
            graph.total_link_weight()
        );
    }
}

#[test]
fn expansion_inverts_clustering() {
    let graph = scattered(90);
    for threshold in [10.0, 45.0, 150.0, f32::INFINITY] {
        let mut clustered = cluster_graph(&graph, &options(threshold, true)).graph;
        expand_all(&mut clustered).unwrap();

        let mut expected = graph.nodes().to_vec();
        let mut actual = clustered.nodes().to_vec();
        expected.sort_by(|a, b| a.id.cmp(&b.id));
        actual.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(actual, expected, "threshold {threshold}");
        assert_eq!(link_set(&clustered), link_set(&graph), "threshold {threshold}");
    }
}

#[test]
fn preserve_groups_never_mixes_groups() {
    let graph = scattered(150);
    let outcome = cluster_graph(&graph, &options(f32::INFINITY, true));

    assert_eq!(outcome.graph.node_count(), 2);
    for cluster in outcome.graph.nodes() {
        let data = cluster.cluster.as_ref().unwrap();
        let groups = data
            .members
            .iter()
            .map(|member| member.group.clone())
            .collect::<BTreeSet<_>>();
        assert_eq!(groups.len(), 1);
        assert_eq!(cluster.group, data.members[0].group);
    }
}

fn node_ids(graph: &Graph) -> Vec<String> {
    let mut ids = graph.nodes().iter().map(|node| node.id.clone()).collect::<Vec<_>>();
    ids.sort();
    ids
}

fn assert_unique_ids(graph: &Graph) {
    let ids = node_ids(graph);
    let unique = ids.iter().collect::<BTreeSet<_>>();
    assert_eq!(unique.len(), ids.len(), "duplicate node ids: {ids:?}");
}

#[test]
fn reclustering_never_reuses_hidden_ids() {
    let positions = [
        ("a", 0.0),
        ("cluster-1", 1.0),
        ("p", 50.0),
        ("q", 51.0),
        ("r", 1000.0),
        ("s", 1001.0),
        ("t", 1050.0),
        ("u", 1051.0),
    ];
    let nodes = positions
        .iter()
        .map(|&(id, x)| Node::new(id, Category::Address).at(x, 0.0))
        .collect::<Vec<_>>();
    let links = vec![
        Link::new("a", "cluster-1", 1.0),
        Link::new("a", "p", 2.0),
        Link::new("r", "t", 3.0),
    ];
    let (graph, _) = Graph::from_parts(nodes, links);

    let once = cluster_graph(&graph, &options(10.0, false)).graph;
    assert_eq!(
        node_ids(&once),
        vec!["cluster-0", "cluster-1-1", "cluster-2", "cluster-3"]
    );

    let mut twice = cluster_graph(&once, &options(150.0, false)).graph;
    assert_eq!(twice.node_count(), 2);
    assert!(!twice.contains("cluster-1"));
    let outer = twice.nodes()[0].id.clone();
    assert_eq!(outer, "cluster-0-1");

    expand_cluster(&mut twice, &outer).unwrap();
    assert_unique_ids(&twice);
    expand_cluster(&mut twice, "cluster-0").unwrap();
    assert_unique_ids(&twice);
    assert!(twice.node("cluster-1").is_some_and(|node| !node.is_cluster()));

    expand_all(&mut twice).unwrap();
    assert_eq!(node_ids(&twice), node_ids(&graph));
    assert_eq!(link_set(&twice), link_set(&graph));
}
