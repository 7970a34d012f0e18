//! Layout and scalability engine for blockchain entity graphs: force layout over a
//! Barnes-Hut quadtree, proximity clustering, viewport culling and a background
//! job coordinator.

pub mod cluster;
pub mod config;
pub mod engine;
pub mod error;
pub mod focus;
pub mod graph;
pub mod optimize;
pub mod physics;
pub mod search;
pub mod util;
pub mod viewport;
pub mod worker;

pub use cluster::{ClusterOptions, ClusterOutcome, cluster_graph, expand_all, expand_cluster};
pub use config::EngineConfig;
pub use engine::{LayoutEngine, LayoutFrame, LayoutResult};
pub use error::{EngineError, Result};
pub use graph::{Graph, GraphDocument, Link, Node, NodeId, RawGraph};
pub use optimize::{OptimizeOptions, OptimizeOutcome};
pub use physics::{Simulation, SimulationState, SpatialIndex};
pub use viewport::{Viewport, ViewportCuller};
pub use worker::{Coordinator, ExecutionMode, Pending, PinUpdate, RequestId};
