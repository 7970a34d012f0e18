mod expand;
mod grid;

use std::collections::{BTreeMap, HashMap, HashSet};

use emath::Vec2;
use log::debug;
use serde_json::Value;

use crate::config::ClusterConfig;
use crate::graph::{Category, ClusterData, Graph, Link, Node, NodeId, cluster_radius};
use crate::util::aggregated_link_width;
use expand::collapsed_owners;
pub use expand::{expand_all, expand_cluster};
use grid::CentroidGrid;

#[derive(Clone, Copy, Debug)]
pub struct ClusterOptions {
    /// Nodes join a cluster whose centroid is strictly closer than this.
    pub distance_threshold: f32,
    /// Only merge nodes that share a group.
    pub preserve_groups: bool,
}

impl From<&ClusterConfig> for ClusterOptions {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            distance_threshold: config.distance,
            preserve_groups: config.preserve_groups,
        }
    }
}

pub struct ClusterOutcome {
    pub graph: Graph,
    /// Every input node id mapped to the id of the node that now represents it.
    pub cluster_map: BTreeMap<NodeId, NodeId>,
    /// Weight of links folded inside a cluster.
    pub intra_weight: f32,
    /// Weight carried by aggregated links.
    pub cross_weight: f32,
}

struct Seed {
    members: Vec<usize>,
    sum: Vec2,
    group: Option<String>,
}

impl Seed {
    fn centroid(&self) -> Vec2 {
        self.sum / self.members.len() as f32
    }
}

pub fn cluster_graph(graph: &Graph, options: &ClusterOptions) -> ClusterOutcome {
    let seeds = greedy_seeds(graph.nodes(), options);
    // Ids hidden inside existing clusters come back on expansion, so they stay reserved.
    let mut taken = collapsed_owners(graph).into_keys().collect::<HashSet<_>>();
    taken.extend(graph.nodes().iter().map(|node| node.id.clone()));

    let mut names = ClusterNames::new(taken);
    let mut owner = vec![None::<NodeId>; graph.node_count()];
    let seed_ids = seeds
        .iter()
        .map(|seed| {
            (seed.members.len() > 1).then(|| {
                let id = names.next();
                for &member in &seed.members {
                    owner[member] = Some(id.clone());
                }
                id
            })
        })
        .collect::<Vec<_>>();

    let mut member_links = HashMap::<NodeId, Vec<Link>>::new();
    let mut verbatim = Vec::new();
    let mut aggregator = LinkAggregator::default();
    let mut intra_weight = 0.0;

    for link in graph.links() {
        let source_owner = graph.index_of(&link.source).and_then(|i| owner[i].as_ref());
        let target_owner = graph.index_of(&link.target).and_then(|i| owner[i].as_ref());

        if let Some(cluster) = source_owner {
            member_links.entry(cluster.clone()).or_default().push(link.clone());
        }
        if let Some(cluster) = target_owner
            && Some(cluster) != source_owner
        {
            member_links.entry(cluster.clone()).or_default().push(link.clone());
        }

        match (source_owner, target_owner) {
            (None, None) => verbatim.push(link.clone()),
            (Some(source), Some(target)) if source == target => intra_weight += link.weight,
            _ => {
                let source = source_owner.unwrap_or(&link.source);
                let target = target_owner.unwrap_or(&link.target);
                aggregator.add(source, target, link.weight);
            }
        }
    }

    let nodes = seeds
        .iter()
        .zip(seed_ids)
        .map(|(seed, id)| match id {
            Some(id) => {
                let links = member_links.remove(&id).unwrap_or_default();
                cluster_node(graph, seed, id, links)
            }
            None => graph.nodes()[seed.members[0]].clone(),
        })
        .collect::<Vec<_>>();

    let cross_weight = aggregator.total_weight();
    let mut links = verbatim;
    links.extend(aggregator.into_links());

    let cluster_map = graph
        .nodes()
        .iter()
        .zip(&owner)
        .map(|(node, owner)| (node.id.clone(), owner.clone().unwrap_or_else(|| node.id.clone())))
        .collect::<BTreeMap<_, _>>();

    debug!(
        "clustered {} nodes into {} ({} synthetic)",
        graph.node_count(),
        nodes.len(),
        nodes.iter().filter(|node| node.is_cluster()).count()
    );

    ClusterOutcome {
        graph: Graph::from_trusted(nodes, links),
        cluster_map,
        intra_weight,
        cross_weight,
    }
}

fn greedy_seeds(nodes: &[Node], options: &ClusterOptions) -> Vec<Seed> {
    let threshold = options.distance_threshold;
    let mut seeds: Vec<Seed> = Vec::new();
    if !(threshold > 0.0) {
        return nodes
            .iter()
            .enumerate()
            .map(|(index, node)| Seed {
                members: vec![index],
                sum: node.position,
                group: node.group.clone(),
            })
            .collect();
    }

    let threshold_sq = threshold * threshold;
    let mut grid = threshold.is_finite().then(|| CentroidGrid::new(threshold));

    for (index, node) in nodes.iter().enumerate() {
        let point = node.position;
        let candidates = match &grid {
            Some(grid) => grid.candidates(point),
            None => (0..seeds.len()).collect(),
        };

        let mut best: Option<(usize, f32)> = None;
        for slot in candidates {
            let seed = &seeds[slot];
            if options.preserve_groups && seed.group != node.group {
                continue;
            }
            let distance_sq = (seed.centroid() - point).length_sq();
            if !(distance_sq < threshold_sq) {
                continue;
            }
            if best.is_none_or(|(_, best_sq)| distance_sq < best_sq) {
                best = Some((slot, distance_sq));
            }
        }

        match best {
            Some((slot, _)) => {
                let seed = &mut seeds[slot];
                seed.members.push(index);
                seed.sum += point;
                if let Some(grid) = &mut grid {
                    grid.relocate(slot, seed.centroid());
                }
            }
            None => {
                if let Some(grid) = &mut grid {
                    grid.insert(seeds.len(), point);
                }
                seeds.push(Seed {
                    members: vec![index],
                    sum: point,
                    group: node.group.clone(),
                });
            }
        }
    }

    seeds
}

fn cluster_node(graph: &Graph, seed: &Seed, id: NodeId, links: Vec<Link>) -> Node {
    let members = seed
        .members
        .iter()
        .map(|&index| {
            let mut member = graph.nodes()[index].clone();
            member.cluster_id = Some(id.clone());
            member
        })
        .collect::<Vec<_>>();

    let centroid = seed.centroid();
    let mut node = Node::new(id, majority_category(&members));
    node.label = Some(format!("{} nodes", members.len()));
    node.position = centroid;
    node.radius = cluster_radius(members.len());
    node.risk_level = members.iter().filter_map(|member| member.risk_level).max();
    node.weight = members.iter().map(|member| member.weight).sum();
    node.group = shared_group(&members);
    node.cluster = Some(ClusterData {
        members,
        links,
        origin: centroid,
    });
    node
}

fn majority_category(members: &[Node]) -> Category {
    let mut counts: Vec<(Category, usize)> = Vec::new();
    for member in members {
        match counts.iter_mut().find(|(category, _)| *category == member.category) {
            Some((_, count)) => *count += 1,
            None => counts.push((member.category, 1)),
        }
    }
    // Earliest category wins ties.
    counts
        .iter()
        .fold(None::<(Category, usize)>, |best, &(category, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((category, count)),
        })
        .map_or(Category::default(), |(category, _)| category)
}

fn shared_group(members: &[Node]) -> Option<String> {
    let first = members.first()?.group.as_ref()?;
    members
        .iter()
        .all(|member| member.group.as_ref() == Some(first))
        .then(|| first.clone())
}

struct ClusterNames {
    taken: HashSet<NodeId>,
    next: usize,
}

impl ClusterNames {
    fn new(taken: HashSet<NodeId>) -> Self {
        Self { taken, next: 0 }
    }

    fn next(&mut self) -> NodeId {
        let base = format!("cluster-{}", self.next);
        self.next += 1;
        let mut candidate = base.clone();
        let mut suffix = 1;
        while self.taken.contains(&candidate) {
            candidate = format!("{base}-{suffix}");
            suffix += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

/// Sums link weight per ordered endpoint pair, keeping first-seen order.
#[derive(Default)]
pub(crate) struct LinkAggregator {
    order: Vec<(NodeId, NodeId)>,
    totals: HashMap<(NodeId, NodeId), (f32, usize)>,
}

impl LinkAggregator {
    pub(crate) fn add(&mut self, source: &str, target: &str, weight: f32) {
        let key = (source.to_owned(), target.to_owned());
        let entry = self.totals.entry(key.clone()).or_insert_with(|| {
            self.order.push(key);
            (0.0, 0)
        });
        entry.0 += weight;
        entry.1 += 1;
    }

    pub(crate) fn total_weight(&self) -> f32 {
        self.totals.values().map(|(weight, _)| weight).sum()
    }

    pub(crate) fn into_links(mut self) -> Vec<Link> {
        self.order
            .into_iter()
            .filter_map(|key| {
                let (weight, count) = self.totals.remove(&key)?;
                let mut link = Link::new(key.0, key.1, weight);
                link.width = Some(aggregated_link_width(weight));
                link.metadata.insert("linkCount".to_owned(), Value::from(count));
                Some(link)
            })
            .collect()
    }
}
