use std::collections::BTreeMap;

use emath::Vec2;

use crate::cluster::{ClusterOptions, ClusterOutcome, cluster_graph};
use crate::config::EngineConfig;
use crate::graph::{Graph, Node, NodeId};
use crate::optimize::{OptimizeOptions, OptimizeOutcome, optimize_network};
use crate::physics::{Simulation, SimulationState};

/// Intermediate positions streamed while a layout runs.
#[derive(Clone, Debug, PartialEq)]
pub struct LayoutFrame {
    pub tick: usize,
    pub alpha: f32,
    pub positions: Vec<(NodeId, Vec2)>,
}

impl LayoutFrame {
    pub fn capture(simulation: &Simulation) -> Self {
        Self {
            tick: simulation.ticks(),
            alpha: simulation.alpha(),
            positions: simulation
                .graph()
                .nodes()
                .iter()
                .map(|node| (node.id.clone(), node.position))
                .collect(),
        }
    }
}

pub struct LayoutResult {
    pub graph: Graph,
    /// Present when the graph was large enough to be clustered before layout.
    pub cluster_map: Option<BTreeMap<NodeId, NodeId>>,
    pub ticks: usize,
    pub settled: bool,
}

impl LayoutResult {
    pub fn nodes(&self) -> &[Node] {
        self.graph.nodes()
    }
}

/// Runs engine operations on the calling thread.
#[derive(Clone, Debug, Default)]
pub struct LayoutEngine {
    config: EngineConfig,
}

impl LayoutEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: config.sanitized(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn calculate_layout(&self, graph: Graph, width: f32, height: f32) -> LayoutResult {
        self.calculate_layout_with(graph, width, height, |_| {})
    }

    /// Like [`Self::calculate_layout`], calling `between_ticks` before every tick.
    pub fn calculate_layout_with<F>(
        &self,
        graph: Graph,
        width: f32,
        height: f32,
        between_ticks: F,
    ) -> LayoutResult
    where
        F: FnMut(&mut Simulation),
    {
        let (graph, cluster_map) = if self.config.cluster.should_cluster(graph.node_count()) {
            let outcome = cluster_graph(&graph, &ClusterOptions::from(&self.config.cluster));
            (outcome.graph, Some(outcome.cluster_map))
        } else {
            (graph, None)
        };

        let simulation = Simulation::new(graph, width, height, self.config.force);
        self.drive(simulation, cluster_map, between_ticks)
    }

    /// Relaxes a previously laid-out graph again, starting from the restart alpha instead
    /// of a cold start. The graph is not re-clustered.
    pub fn resume_layout_with<F>(
        &self,
        graph: Graph,
        width: f32,
        height: f32,
        between_ticks: F,
    ) -> LayoutResult
    where
        F: FnMut(&mut Simulation),
    {
        let simulation = Simulation::resume(graph, width, height, self.config.force);
        self.drive(simulation, None, between_ticks)
    }

    fn drive<F>(
        &self,
        mut simulation: Simulation,
        cluster_map: Option<BTreeMap<NodeId, NodeId>>,
        mut between_ticks: F,
    ) -> LayoutResult
    where
        F: FnMut(&mut Simulation),
    {
        let mut ticks = 0;
        while ticks < self.config.force.max_ticks && simulation.state() == SimulationState::Running {
            between_ticks(&mut simulation);
            simulation.tick();
            ticks += 1;
        }

        let settled = simulation.state() == SimulationState::Settled;
        LayoutResult {
            graph: simulation.into_graph(),
            cluster_map,
            ticks,
            settled,
        }
    }

    pub fn cluster_nodes(&self, graph: &Graph, distance: Option<f32>) -> ClusterOutcome {
        let mut options = ClusterOptions::from(&self.config.cluster);
        if let Some(distance) = distance {
            options.distance_threshold = distance;
        }
        cluster_graph(graph, &options)
    }

    pub fn optimize_network(&self, graph: Graph, options: &OptimizeOptions) -> OptimizeOutcome {
        optimize_network(graph, options, &self.config)
    }
}
