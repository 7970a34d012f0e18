use std::collections::{BTreeSet, VecDeque};

use crate::graph::Graph;

const RELATED_NODE_LIMIT: usize = 280;

/// A selected node with its direct neighbourhood, as ascending node and link indices.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Focus {
    pub nodes: Vec<usize>,
    pub links: Vec<usize>,
}

fn collect_related(
    graph: &Graph,
    link_indices: &[usize],
    forward: bool,
    related_nodes: &mut BTreeSet<usize>,
    related_links: &mut BTreeSet<usize>,
) {
    for &link_index in link_indices {
        if related_nodes.len() >= RELATED_NODE_LIMIT {
            return;
        }
        let link = &graph.links()[link_index];
        let next = if forward { &link.target } else { &link.source };
        if let Some(next_index) = graph.index_of(next) {
            related_nodes.insert(next_index);
            related_links.insert(link_index);
        }
    }
}

pub fn related(graph: &Graph, id: &str) -> Option<Focus> {
    let selected = graph.index_of(id)?;
    let adjacency = graph.adjacency();

    let mut related_nodes = BTreeSet::from([selected]);
    let mut related_links = BTreeSet::new();
    collect_related(
        graph,
        &adjacency.outgoing[selected],
        true,
        &mut related_nodes,
        &mut related_links,
    );
    collect_related(
        graph,
        &adjacency.incoming[selected],
        false,
        &mut related_nodes,
        &mut related_links,
    );

    Some(Focus {
        nodes: related_nodes.into_iter().collect(),
        links: related_links.into_iter().collect(),
    })
}

/// Shortest directed path along link direction, as node indices from `from` to `to`.
pub fn trace_path(graph: &Graph, from: &str, to: &str) -> Option<Vec<usize>> {
    let start = graph.index_of(from)?;
    let goal = graph.index_of(to)?;
    if start == goal {
        return Some(vec![start]);
    }

    let endpoints = graph.link_endpoints();
    let mut outgoing = vec![Vec::new(); graph.node_count()];
    for &(source, target) in &endpoints {
        outgoing[source].push(target);
    }

    let mut queue = VecDeque::from([start]);
    let mut visited = vec![false; graph.node_count()];
    let mut parent = vec![usize::MAX; graph.node_count()];
    visited[start] = true;

    while let Some(node) = queue.pop_front() {
        if node == goal {
            break;
        }
        for &next in &outgoing[node] {
            if !visited[next] {
                visited[next] = true;
                parent[next] = node;
                queue.push_back(next);
            }
        }
    }

    if !visited[goal] {
        return None;
    }

    let mut path = vec![goal];
    let mut cursor = goal;
    while cursor != start {
        cursor = parent[cursor];
        path.push(cursor);
    }
    path.reverse();
    Some(path)
}
