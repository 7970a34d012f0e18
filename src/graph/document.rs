use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use super::model::{Category, Graph, Link, Node, NodeId, RiskLevel};

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub x: f32,
    pub y: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fx: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fy: Option<f32>,
    pub size: f32,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<NodeId>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_cluster: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_members: Option<Vec<NodeId>>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl From<&Node> for NodeRecord {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            label: node.label.clone(),
            x: node.position.x,
            y: node.position.y,
            fx: node.fixed_x,
            fy: node.fixed_y,
            size: node.radius,
            category: node.category,
            risk_level: node.risk_level,
            group: node.group.clone(),
            cluster_id: node.cluster_id.clone(),
            is_cluster: node.is_cluster(),
            cluster_size: node.cluster_size(),
            cluster_members: node
                .cluster
                .as_ref()
                .map(|data| data.members.iter().map(|member| member.id.clone()).collect()),
            metadata: node.metadata.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRecord {
    pub source: NodeId,
    pub target: NodeId,
    pub weight: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl From<&Link> for LinkRecord {
    fn from(link: &Link) -> Self {
        Self {
            source: link.source.clone(),
            target: link.target.clone(),
            weight: link.weight,
            tx_hash: link.tx_hash.clone(),
            timestamp: link.timestamp,
            width: link.width,
            metadata: link.metadata.clone(),
        }
    }
}

/// Serializable snapshot handed back to the render layer.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDocument {
    pub nodes: Vec<NodeRecord>,
    pub links: Vec<LinkRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_map: Option<BTreeMap<NodeId, NodeId>>,
}

impl GraphDocument {
    pub fn with_cluster_map(mut self, cluster_map: BTreeMap<NodeId, NodeId>) -> Self {
        self.cluster_map = Some(cluster_map);
        self
    }
}

impl From<&Graph> for GraphDocument {
    fn from(graph: &Graph) -> Self {
        Self {
            nodes: graph.nodes().iter().map(NodeRecord::from).collect(),
            links: graph.links().iter().map(LinkRecord::from).collect(),
            cluster_map: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Category, Graph, Link, Node};

    #[test]
    fn document_uses_camel_case_and_skips_empty_fields() {
        let (graph, _) = Graph::from_parts(
            vec![
                Node::new("a", Category::Address).at(1.0, 2.0),
                Node::new("b", Category::Contract).at(3.0, 4.0),
            ],
            vec![Link::new("a", "b", 2.0)],
        );

        let value = serde_json::to_value(GraphDocument::from(&graph)).unwrap();
        assert_eq!(value["nodes"][0]["x"], 1.0);
        assert_eq!(value["nodes"][1]["category"], "contract");
        assert!(value["nodes"][0].get("isCluster").is_none());
        assert!(value["links"][0].get("txHash").is_none());
        assert!(value.get("clusterMap").is_none());
    }
}
