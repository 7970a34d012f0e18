use std::collections::HashMap;

use log::debug;

use super::LinkAggregator;
use crate::error::{EngineError, Result};
use crate::graph::{ClusterData, Graph, NodeId};

/// Maps every id hidden inside a still-collapsed cluster to that top-level cluster.
pub(super) fn collapsed_owners(graph: &Graph) -> HashMap<NodeId, NodeId> {
    fn collect(data: &ClusterData, owner: &NodeId, out: &mut HashMap<NodeId, NodeId>) {
        for member in &data.members {
            out.insert(member.id.clone(), owner.clone());
            if let Some(nested) = &member.cluster {
                collect(nested, owner, out);
            }
        }
    }

    let mut out = HashMap::new();
    for node in graph.nodes() {
        if let Some(data) = &node.cluster {
            collect(data, &node.id, &mut out);
        }
    }
    out
}

/// Replaces a cluster node with its members and replays the links it absorbed.
/// Returns the number of restored members.
pub fn expand_cluster(graph: &mut Graph, cluster_id: &str) -> Result<usize> {
    let index = graph
        .index_of(cluster_id)
        .ok_or_else(|| EngineError::UnknownNode(cluster_id.to_owned()))?;
    if !graph.nodes[index].is_cluster() {
        return Err(EngineError::NotACluster(cluster_id.to_owned()));
    }

    let mut cluster_node = graph.nodes.remove(index);
    let Some(data) = cluster_node.cluster.take() else {
        return Err(EngineError::NotACluster(cluster_id.to_owned()));
    };
    let offset = cluster_node.position - data.origin;
    graph
        .links
        .retain(|link| link.source != cluster_id && link.target != cluster_id);

    let restored = data.members.len();
    for mut member in data.members {
        member.position += offset;
        member.cluster_id = None;
        graph.nodes.push(member);
    }
    graph.reindex();

    let owners = collapsed_owners(graph);
    let resolve = |id: &NodeId| -> Option<NodeId> {
        if graph.contains(id) {
            Some(id.clone())
        } else {
            owners.get(id).cloned()
        }
    };

    let mut verbatim = Vec::new();
    let mut aggregator = LinkAggregator::default();
    for link in data.links {
        let (Some(source), Some(target)) = (resolve(&link.source), resolve(&link.target)) else {
            debug!(
                "dropping replayed link {} -> {}: endpoint no longer present",
                link.source, link.target
            );
            continue;
        };
        if source == link.source && target == link.target {
            verbatim.push(link);
        } else if source != target {
            aggregator.add(&source, &target, link.weight);
        }
    }

    graph.links.extend(verbatim);
    graph.links.extend(aggregator.into_links());
    debug!("expanded {cluster_id} into {restored} nodes");
    Ok(restored)
}

/// Expands clusters until none remain. Returns the total number of restored members.
pub fn expand_all(graph: &mut Graph) -> Result<usize> {
    let mut restored = 0;
    while let Some(id) = graph
        .nodes()
        .iter()
        .find(|node| node.is_cluster())
        .map(|node| node.id.clone())
    {
        restored += expand_cluster(graph, &id)?;
    }
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use emath::vec2;

    use super::*;
    use crate::cluster::{ClusterOptions, cluster_graph};
    use crate::graph::{Category, Link, Node};

    fn two_pairs() -> Graph {
        let nodes = vec![
            Node::new("a", Category::Address).at(0.0, 0.0),
            Node::new("b", Category::Address).at(2.0, 0.0),
            Node::new("c", Category::Address).at(200.0, 0.0),
            Node::new("d", Category::Address).at(202.0, 0.0),
            Node::new("e", Category::Address).at(600.0, 0.0),
        ];
        let links = vec![
            Link::new("a", "b", 1.0),
            Link::new("a", "c", 2.0),
            Link::new("b", "d", 3.0),
            Link::new("d", "e", 4.0),
        ];
        Graph::from_parts(nodes, links).0
    }

    fn options() -> ClusterOptions {
        ClusterOptions {
            distance_threshold: 10.0,
            preserve_groups: false,
        }
    }

    #[test]
    fn partial_expansion_reaggregates_against_collapsed_clusters() {
        let mut graph = cluster_graph(&two_pairs(), &options()).graph;
        assert_eq!(graph.node_count(), 3);

        let restored = expand_cluster(&mut graph, "cluster-0").unwrap();
        assert_eq!(restored, 2);
        assert!(graph.contains("a") && graph.contains("b"));

        let to_cluster = graph
            .links()
            .iter()
            .filter(|link| link.target == "cluster-1")
            .map(|link| (link.source.as_str(), link.weight))
            .collect::<Vec<_>>();
        assert_eq!(to_cluster, vec![("a", 2.0), ("b", 3.0)]);
        assert!(graph.links().iter().any(|link| link.source == "a" && link.target == "b"));
        assert!(graph.node("a").unwrap().cluster_id.is_none());
    }

    #[test]
    fn members_follow_a_moved_cluster() {
        let mut graph = cluster_graph(&two_pairs(), &options()).graph;
        graph.node_mut("cluster-0").unwrap().position += vec2(50.0, -10.0);

        expand_cluster(&mut graph, "cluster-0").unwrap();
        assert_eq!(graph.node("a").unwrap().position, vec2(50.0, -10.0));
        assert_eq!(graph.node("b").unwrap().position, vec2(52.0, -10.0));
    }

    #[test]
    fn expanding_plain_or_missing_nodes_fails() {
        let mut graph = cluster_graph(&two_pairs(), &options()).graph;
        assert!(matches!(
            expand_cluster(&mut graph, "e"),
            Err(EngineError::NotACluster(_))
        ));
        assert!(matches!(
            expand_cluster(&mut graph, "zzz"),
            Err(EngineError::UnknownNode(_))
        ));
    }

    #[test]
    fn expand_all_restores_every_link() {
        let original = two_pairs();
        let mut graph = cluster_graph(&original, &options()).graph;
        assert_eq!(expand_all(&mut graph).unwrap(), 4);

        let mut links = graph
            .links()
            .iter()
            .map(|link| (link.source.clone(), link.target.clone(), link.weight))
            .collect::<Vec<_>>();
        links.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        let expected = original
            .links()
            .iter()
            .map(|link| (link.source.clone(), link.target.clone(), link.weight))
            .collect::<Vec<_>>();
        assert_eq!(links, expected);
        assert!(graph.links().iter().all(|link| link.width.is_none()));
    }
}
