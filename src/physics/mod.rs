mod forces;
mod quadtree;

use emath::{Vec2, vec2};
use log::debug;

use crate::config::{ForceConfig, MIN_LINK_DISTANCE};
use crate::error::{EngineError, Result};
use crate::graph::Graph;
use crate::util::jiggle_direction;
use forces::{ChargeParams, CollisionParams, accumulate_charge_for_node, accumulate_collision_pairs};
pub use quadtree::SpatialIndex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimulationState {
    Running,
    Settled,
}

#[derive(Default)]
struct PhysicsScratch {
    positions: Vec<Vec2>,
    radii: Vec<f32>,
    deltas: Vec<Vec2>,
}

/// Per-link constants derived from node degrees, recomputed whenever the link set changes.
struct LinkTerm {
    source: usize,
    target: usize,
    /// Share of the correction applied to the target.
    bias: f32,
    strength: f32,
}

/// Alpha-cooled force layout over an owned graph.
pub struct Simulation {
    graph: Graph,
    config: ForceConfig,
    center: Vec2,
    alpha: f32,
    state: SimulationState,
    ticks: usize,
    links: Vec<LinkTerm>,
    scratch: PhysicsScratch,
}

impl Simulation {
    pub fn new(graph: Graph, width: f32, height: f32, config: ForceConfig) -> Self {
        let center = vec2(width, height) * 0.5;
        let center = if center.is_finite() { center } else { Vec2::ZERO };
        let alpha = config.alpha;
        let state = if alpha <= config.alpha_min {
            SimulationState::Settled
        } else {
            SimulationState::Running
        };

        let mut simulation = Self {
            graph,
            config,
            center,
            alpha,
            state,
            ticks: 0,
            links: Vec::new(),
            scratch: PhysicsScratch::default(),
        };
        simulation.rebuild_links();
        simulation.apply_pins();
        simulation
    }

    /// Continues from an already laid-out graph at the restart temperature.
    pub fn resume(graph: Graph, width: f32, height: f32, config: ForceConfig) -> Self {
        let mut simulation = Self::new(graph, width, height, config);
        simulation.alpha = config.restart_alpha;
        simulation.state = if simulation.alpha > config.alpha_min {
            SimulationState::Running
        } else {
            SimulationState::Settled
        };
        simulation
    }

    fn rebuild_links(&mut self) {
        let endpoints = self.graph.link_endpoints();
        let mut degree = vec![0usize; self.graph.node_count()];
        for &(source, target) in &endpoints {
            degree[source] += 1;
            degree[target] += 1;
        }

        self.links = endpoints
            .into_iter()
            .filter(|(source, target)| source != target)
            .map(|(source, target)| {
                let source_degree = degree[source] as f32;
                let target_degree = degree[target] as f32;
                LinkTerm {
                    source,
                    target,
                    bias: source_degree / (source_degree + target_degree),
                    strength: self.config.link_stiffness / source_degree.min(target_degree),
                }
            })
            .collect();
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn ticks(&self) -> usize {
        self.ticks
    }

    pub fn center(&self) -> Vec2 {
        self.center
    }

    /// Upper bound on the ticks needed for alpha to cool from its current value.
    pub fn settle_bound(&self) -> usize {
        let alpha_min = self.config.alpha_min;
        if self.alpha <= alpha_min {
            return 0;
        }
        let decay = (1.0 - self.config.alpha_decay).clamp(f32::MIN_POSITIVE, 1.0 - f32::EPSILON);
        // One extra tick absorbs f32 rounding in the repeated decay.
        ((alpha_min / self.alpha).ln() / decay.ln()).ceil() as usize + 1
    }

    pub fn reheat(&mut self) {
        self.alpha = self.alpha.max(self.config.restart_alpha);
        if self.alpha > self.config.alpha_min {
            self.state = SimulationState::Running;
        }
    }

    pub fn pin(&mut self, id: &str, position: Vec2) -> Result<()> {
        if !position.is_finite() {
            return Err(EngineError::InvalidPin(id.to_owned()));
        }
        let node = self
            .graph
            .node_mut(id)
            .ok_or_else(|| EngineError::UnknownNode(id.to_owned()))?;
        node.pin(position);
        node.position = position;
        node.velocity = Vec2::ZERO;
        self.reheat();
        Ok(())
    }

    pub fn release(&mut self, id: &str) -> Result<()> {
        let node = self
            .graph
            .node_mut(id)
            .ok_or_else(|| EngineError::UnknownNode(id.to_owned()))?;
        node.release();
        self.reheat();
        Ok(())
    }

    /// Ticks until settled or `max_ticks` is reached. Returns the ticks executed.
    pub fn run(&mut self, max_ticks: usize) -> usize {
        let mut executed = 0;
        while executed < max_ticks && self.state == SimulationState::Running {
            self.tick();
            executed += 1;
        }
        executed
    }

    pub fn tick(&mut self) -> SimulationState {
        if self.state == SimulationState::Settled {
            return self.state;
        }

        if !self.graph.is_empty() {
            self.apply_link_force();
            self.apply_charge_and_collision();
            self.apply_center_pull();
            self.integrate();
            self.recenter();
        }

        self.ticks += 1;
        self.alpha += (0.0 - self.alpha) * self.config.alpha_decay;
        if self.alpha <= self.config.alpha_min {
            self.state = SimulationState::Settled;
            debug!(
                "simulation settled after {} ticks ({} nodes)",
                self.ticks,
                self.graph.node_count()
            );
        }

        self.apply_pins();
        self.state
    }

    fn apply_link_force(&mut self) {
        let rest_length = self.config.link_distance.max(MIN_LINK_DISTANCE);
        let alpha = self.alpha;
        let nodes = &mut self.graph.nodes;

        for term in &self.links {
            let source = &nodes[term.source];
            let target = &nodes[term.target];
            let mut delta =
                (target.position + target.velocity) - (source.position + source.velocity);
            let mut distance = delta.length();
            if distance <= f32::EPSILON {
                delta = jiggle_direction(term.source, term.target) * 1.0e-3;
                distance = delta.length();
            }

            let correction = delta * ((distance - rest_length) / distance * alpha * term.strength);
            nodes[term.target].velocity -= correction * term.bias;
            nodes[term.source].velocity += correction * (1.0 - term.bias);
        }
    }

    fn apply_charge_and_collision(&mut self) {
        let node_count = self.graph.node_count();
        let padding = self.config.collision_padding;
        let scratch = &mut self.scratch;
        scratch.positions.clear();
        scratch.radii.clear();
        scratch
            .positions
            .reserve(node_count.saturating_sub(scratch.positions.capacity()));
        scratch
            .radii
            .reserve(node_count.saturating_sub(scratch.radii.capacity()));
        scratch.deltas.resize(node_count, Vec2::ZERO);
        scratch.deltas.fill(Vec2::ZERO);

        let mut max_radius = 0.0_f32;
        for node in &self.graph.nodes {
            let radius = node.radius + padding;
            scratch.positions.push(node.position);
            scratch.radii.push(radius);
            max_radius = max_radius.max(radius);
        }

        let index = SpatialIndex::from_positions(std::mem::take(&mut scratch.positions));
        if let Some(root) = index.root() {
            let charge = ChargeParams {
                scaled_charge: self.config.charge * self.alpha,
                theta: self.config.theta,
            };
            if charge.scaled_charge != 0.0 {
                for (node_index, delta) in scratch.deltas.iter_mut().enumerate() {
                    if !index.positions()[node_index].is_finite() {
                        continue;
                    }
                    accumulate_charge_for_node(root, node_index, index.positions(), charge, delta);
                }
            }

            let max_collision_distance = max_radius * 2.0;
            if self.config.collision_strength > 0.0 && max_collision_distance > 0.0 {
                accumulate_collision_pairs(
                    root,
                    root,
                    true,
                    index.positions(),
                    &scratch.radii,
                    CollisionParams {
                        collision_strength: self.config.collision_strength,
                        max_collision_distance_sq: max_collision_distance * max_collision_distance,
                    },
                    &mut scratch.deltas,
                );
            }
        }

        for (node, delta) in self.graph.nodes.iter_mut().zip(&scratch.deltas) {
            node.velocity += *delta;
        }
        scratch.positions = index.into_positions();
    }

    fn apply_center_pull(&mut self) {
        let pull = self.config.center_strength * self.alpha;
        if pull <= 0.0 {
            return;
        }
        for node in &mut self.graph.nodes {
            node.velocity += (self.center - node.position) * pull;
        }
    }

    fn integrate(&mut self) {
        let retain = 1.0 - self.config.velocity_decay;
        for node in &mut self.graph.nodes {
            if node.fixed_x.is_none() {
                node.velocity.x *= retain;
                node.position.x += node.velocity.x;
            }
            if node.fixed_y.is_none() {
                node.velocity.y *= retain;
                node.position.y += node.velocity.y;
            }
        }
    }

    fn recenter(&mut self) {
        // Pinned nodes anchor the frame.
        if self.graph.nodes.iter().any(|node| node.is_pinned()) {
            return;
        }

        let mut centroid = Vec2::ZERO;
        for node in &self.graph.nodes {
            centroid += node.position;
        }
        centroid /= self.graph.node_count() as f32;
        let shift = self.center - centroid;
        if shift.is_finite() && shift.length_sq() > 0.000_001 {
            for node in &mut self.graph.nodes {
                node.position += shift;
            }
        }
    }

    fn apply_pins(&mut self) {
        for node in &mut self.graph.nodes {
            if let Some(x) = node.fixed_x {
                node.position.x = x;
                node.velocity.x = 0.0;
            }
            if let Some(y) = node.fixed_y {
                node.position.y = y;
                node.velocity.y = 0.0;
            }
        }
    }
}
