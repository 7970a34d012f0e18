use std::collections::HashSet;
use std::f32::consts::PI;

use emath::{Vec2, vec2};
use log::warn;
use serde::Deserialize;
use serde_json::{Map, Number, Value};

use super::model::{Category, Graph, Link, Node, NodeId, RiskLevel};
use crate::util::stable_pair;

const SEED_RADIUS: f32 = 10.0;
const SEED_JITTER: f32 = 2.0;

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Text(String),
    Number(Number),
}

impl RawId {
    pub fn into_id(self) -> NodeId {
        match self {
            Self::Text(text) => text,
            Self::Number(number) => number.to_string(),
        }
    }
}

/// Link endpoint as it arrives from callers: a bare id or an embedded node object.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RawEndpoint {
    Id(RawId),
    Node { id: RawId },
}

impl RawEndpoint {
    pub fn into_id(self) -> NodeId {
        match self {
            Self::Id(id) | Self::Node { id } => id.into_id(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNode {
    pub id: RawId,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub x: Option<f32>,
    #[serde(default)]
    pub y: Option<f32>,
    #[serde(default)]
    pub fx: Option<f32>,
    #[serde(default)]
    pub fy: Option<f32>,
    #[serde(default)]
    pub size: Option<f32>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub weight: Option<f32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLink {
    pub source: RawEndpoint,
    pub target: RawEndpoint,
    #[serde(default)]
    pub weight: Option<f32>,
    #[serde(default)]
    pub value: Option<f32>,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawGraph {
    #[serde(default)]
    pub nodes: Vec<RawNode>,
    #[serde(default, alias = "edges")]
    pub links: Vec<RawLink>,
}

impl RawGraph {
    pub fn from_json_str(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Recoverable problem found while building a graph; the offending item is dropped.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum InputIssue {
    #[error("duplicate node id {id}")]
    DuplicateNode { id: NodeId },
    #[error("node {id} has invalid size {value}")]
    InvalidRadius { id: NodeId, value: f32 },
    #[error("node {id} has a non-finite pin coordinate")]
    InvalidPin { id: NodeId },
    #[error("link {from} -> {to} references missing node {missing}")]
    DanglingLink {
        from: NodeId,
        to: NodeId,
        missing: NodeId,
    },
    #[error("link {from} -> {to} has invalid weight {weight}")]
    InvalidWeight {
        from: NodeId,
        to: NodeId,
        weight: f32,
    },
}

impl InputIssue {
    fn drops_node(&self) -> bool {
        matches!(
            self,
            Self::DuplicateNode { .. } | Self::InvalidRadius { .. } | Self::InvalidPin { .. }
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IngestReport {
    pub issues: Vec<InputIssue>,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn dropped_nodes(&self) -> usize {
        self.issues.iter().filter(|issue| issue.drops_node()).count()
    }

    pub fn dropped_links(&self) -> usize {
        self.issues.len() - self.dropped_nodes()
    }

    fn record(&mut self, issue: InputIssue) {
        warn!("dropping input: {issue}");
        self.issues.push(issue);
    }
}

impl RawNode {
    fn into_node(self, report: &mut IngestReport) -> Option<(Node, bool)> {
        let id = self.id.into_id();
        let category = self.category.unwrap_or_default();

        let radius = match self.size {
            Some(size) if !size.is_finite() || size < 0.0 => {
                report.record(InputIssue::InvalidRadius { id, value: size });
                return None;
            }
            Some(size) if size > 0.0 => size,
            _ => category.default_radius(),
        };

        if self.fx.is_some_and(|value| !value.is_finite())
            || self.fy.is_some_and(|value| !value.is_finite())
        {
            report.record(InputIssue::InvalidPin { id });
            return None;
        }

        let (position, placed) = match (self.x, self.y) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => (vec2(x, y), true),
            _ => (Vec2::ZERO, false),
        };

        let mut node = Node::new(id, category);
        node.label = self.label;
        node.position = position;
        node.fixed_x = self.fx;
        node.fixed_y = self.fy;
        node.radius = radius;
        node.risk_level = self.risk_level;
        node.group = self.group;
        node.weight = self.weight.filter(|weight| weight.is_finite()).unwrap_or(0.0);
        node.metadata = self.extra;
        Some((node, placed))
    }
}

impl From<RawLink> for Link {
    fn from(raw: RawLink) -> Self {
        let mut link = Link::new(
            raw.source.into_id(),
            raw.target.into_id(),
            raw.weight.or(raw.value).unwrap_or(1.0),
        );
        link.tx_hash = raw.tx_hash;
        link.timestamp = raw.timestamp;
        link.metadata = raw.extra;
        link
    }
}

impl Graph {
    /// Builds a graph from wire input, seeding unplaced nodes around the origin.
    pub fn ingest(raw: RawGraph) -> (Self, IngestReport) {
        Self::ingest_centered(raw, Vec2::ZERO)
    }

    pub fn ingest_centered(raw: RawGraph, center: Vec2) -> (Self, IngestReport) {
        let mut report = IngestReport::default();
        let mut nodes = Vec::with_capacity(raw.nodes.len());
        let mut placed = Vec::with_capacity(raw.nodes.len());
        for raw_node in raw.nodes {
            if let Some((node, is_placed)) = raw_node.into_node(&mut report) {
                nodes.push(node);
                placed.push(is_placed);
            }
        }
        let links = raw.links.into_iter().map(Link::from).collect();
        let graph = Self::assemble(nodes, placed, links, center, &mut report);
        (graph, report)
    }

    /// Validates in-memory nodes and links, dropping whatever breaks the graph invariants.
    pub fn from_parts(nodes: Vec<Node>, links: Vec<Link>) -> (Self, IngestReport) {
        let mut report = IngestReport::default();
        let mut kept = Vec::with_capacity(nodes.len());
        let mut placed = Vec::with_capacity(nodes.len());
        for node in nodes {
            if !node.radius.is_finite() || node.radius < 0.0 {
                report.record(InputIssue::InvalidRadius {
                    value: node.radius,
                    id: node.id,
                });
                continue;
            }
            if node.fixed_x.is_some_and(|value| !value.is_finite())
                || node.fixed_y.is_some_and(|value| !value.is_finite())
            {
                report.record(InputIssue::InvalidPin { id: node.id });
                continue;
            }
            placed.push(node.position.x.is_finite() && node.position.y.is_finite());
            kept.push(node);
        }
        let graph = Self::assemble(kept, placed, links, Vec2::ZERO, &mut report);
        (graph, report)
    }

    fn assemble(
        nodes: Vec<Node>,
        placed: Vec<bool>,
        links: Vec<Link>,
        center: Vec2,
        report: &mut IngestReport,
    ) -> Self {
        let mut seen = HashSet::with_capacity(nodes.len());
        let mut unique = Vec::with_capacity(nodes.len());
        for (mut node, is_placed) in nodes.into_iter().zip(placed) {
            if !seen.insert(node.id.clone()) {
                report.record(InputIssue::DuplicateNode { id: node.id });
                continue;
            }
            if !is_placed {
                node.position = seed_position(&node.id, unique.len(), center);
            }
            if let Some(x) = node.fixed_x {
                node.position.x = x;
            }
            if let Some(y) = node.fixed_y {
                node.position.y = y;
            }
            unique.push(node);
        }

        let mut kept_links = Vec::with_capacity(links.len());
        for link in links {
            let missing = if !seen.contains(&link.source) {
                Some(link.source.clone())
            } else if !seen.contains(&link.target) {
                Some(link.target.clone())
            } else {
                None
            };
            if let Some(missing) = missing {
                report.record(InputIssue::DanglingLink {
                    from: link.source,
                    to: link.target,
                    missing,
                });
                continue;
            }
            if !link.weight.is_finite() || link.weight < 0.0 {
                report.record(InputIssue::InvalidWeight {
                    weight: link.weight,
                    from: link.source,
                    to: link.target,
                });
                continue;
            }
            kept_links.push(link);
        }

        Self::from_trusted(unique, kept_links)
    }
}

/// Phyllotaxis spiral with a small per-id jitter so reruns start from the same layout.
fn seed_position(id: &str, index: usize, center: Vec2) -> Vec2 {
    let radius = SEED_RADIUS * (0.5 + index as f32).sqrt();
    let angle = index as f32 * PI * (3.0 - 5.0_f32.sqrt());
    let (jx, jy) = stable_pair(id);
    center + vec2(angle.cos(), angle.sin()) * radius + vec2(jx, jy) * SEED_JITTER
}
