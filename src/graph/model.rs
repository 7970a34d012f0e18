use std::collections::HashMap;

use emath::Vec2;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type NodeId = String;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Address,
    Transaction,
    Contract,
}

impl Category {
    pub fn default_radius(self) -> f32 {
        match self {
            Self::Address => 8.0,
            Self::Transaction => 6.0,
            Self::Contract => 10.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Payload carried only by synthetic cluster nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterData {
    pub members: Vec<Node>,
    /// Original links with at least one endpoint among `members`.
    pub links: Vec<Link>,
    /// Centroid at creation time; expansion offsets members by how far the cluster moved since.
    pub origin: Vec2,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub label: Option<String>,
    pub position: Vec2,
    pub velocity: Vec2,
    pub fixed_x: Option<f32>,
    pub fixed_y: Option<f32>,
    pub radius: f32,
    pub category: Category,
    pub risk_level: Option<RiskLevel>,
    pub group: Option<String>,
    pub weight: f32,
    pub cluster_id: Option<NodeId>,
    pub cluster: Option<ClusterData>,
    pub metadata: Map<String, Value>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, category: Category) -> Self {
        Self {
            id: id.into(),
            label: None,
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            fixed_x: None,
            fixed_y: None,
            radius: category.default_radius(),
            category,
            risk_level: None,
            group: None,
            weight: 0.0,
            cluster_id: None,
            cluster: None,
            metadata: Map::new(),
        }
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.position = Vec2::new(x, y);
        self
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk_level = Some(risk);
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn is_cluster(&self) -> bool {
        self.cluster.is_some()
    }

    pub fn cluster_size(&self) -> Option<usize> {
        self.cluster.as_ref().map(|data| data.members.len())
    }

    pub fn is_pinned(&self) -> bool {
        self.fixed_x.is_some() || self.fixed_y.is_some()
    }

    pub fn pin(&mut self, position: Vec2) {
        self.fixed_x = Some(position.x);
        self.fixed_y = Some(position.y);
    }

    pub fn release(&mut self) {
        self.fixed_x = None;
        self.fixed_y = None;
    }
}

pub fn cluster_radius(size: usize) -> f32 {
    (10.0 + 2.0 * (size as f32).sqrt()).min(40.0)
}

#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    pub source: NodeId,
    pub target: NodeId,
    pub weight: f32,
    pub tx_hash: Option<String>,
    pub timestamp: Option<i64>,
    /// Display width, set on links aggregated by clustering.
    pub width: Option<f32>,
    pub metadata: Map<String, Value>,
}

impl Link {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>, weight: f32) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            weight,
            tx_hash: None,
            timestamp: None,
            width: None,
            metadata: Map::new(),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        self.width.is_some()
    }
}

/// Owns a node set with unique ids and a link set whose endpoints all exist.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    pub(crate) nodes: Vec<Node>,
    pub(crate) links: Vec<Link>,
    pub(crate) index_by_id: HashMap<NodeId, usize>,
}

/// Per-node link indices in both directions.
pub struct Adjacency {
    pub outgoing: Vec<Vec<usize>>,
    pub incoming: Vec<Vec<usize>>,
}

impl Graph {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index_by_id.get(id).copied()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index_of(id).map(|index| &self.nodes[index])
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.index_of(id).map(|index| &mut self.nodes[index])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index_by_id.contains_key(id)
    }

    pub fn total_link_weight(&self) -> f32 {
        self.links.iter().map(|link| link.weight).sum()
    }

    /// Resolves each link to `(source_index, target_index)`.
    pub fn link_endpoints(&self) -> Vec<(usize, usize)> {
        self.links
            .iter()
            .filter_map(|link| Some((self.index_of(&link.source)?, self.index_of(&link.target)?)))
            .collect()
    }

    pub fn adjacency(&self) -> Adjacency {
        let mut outgoing = vec![Vec::new(); self.nodes.len()];
        let mut incoming = vec![Vec::new(); self.nodes.len()];
        for (link_index, link) in self.links.iter().enumerate() {
            if let (Some(source), Some(target)) =
                (self.index_of(&link.source), self.index_of(&link.target))
            {
                outgoing[source].push(link_index);
                incoming[target].push(link_index);
            }
        }
        Adjacency { outgoing, incoming }
    }

    /// Trusted constructor for parts that already satisfy the graph invariants.
    pub(crate) fn from_trusted(nodes: Vec<Node>, links: Vec<Link>) -> Self {
        let mut graph = Self {
            nodes,
            links,
            index_by_id: HashMap::new(),
        };
        graph.reindex();
        graph
    }

    pub(crate) fn reindex(&mut self) {
        self.index_by_id.clear();
        self.index_by_id.reserve(self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            self.index_by_id.insert(node.id.clone(), index);
        }
    }

    /// Keeps the first `limit` nodes and the links whose endpoints both survive.
    /// Returns how many links were dropped.
    pub fn truncate(&mut self, limit: usize) -> usize {
        if self.nodes.len() <= limit {
            return 0;
        }
        self.nodes.truncate(limit);
        self.reindex();
        let before = self.links.len();
        let index_by_id = &self.index_by_id;
        self.links
            .retain(|link| index_by_id.contains_key(&link.source) && index_by_id.contains_key(&link.target));
        before - self.links.len()
    }
}
