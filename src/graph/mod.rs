mod document;
mod ingest;
mod model;

pub use document::{GraphDocument, LinkRecord, NodeRecord};
pub use ingest::{IngestReport, InputIssue, RawEndpoint, RawGraph, RawId, RawLink, RawNode};
pub use model::{
    Adjacency, Category, ClusterData, Graph, Link, Node, NodeId, RiskLevel, cluster_radius,
};
