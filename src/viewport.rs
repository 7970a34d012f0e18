use emath::{Pos2, Rect, Vec2, pos2};

use crate::config::CullConfig;
use crate::graph::Graph;
use crate::physics::SpatialIndex;

pub const MIN_SCALE: f32 = 0.05;
pub const MAX_SCALE: f32 = 6.0;

/// Pan/zoom transform: `screen = world * scale + offset`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub scale: f32,
    pub offset: Vec2,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            scale: 1.0,
            offset: Vec2::ZERO,
            width,
            height,
        }
    }

    /// World-space rectangle covered by the screen, grown by `margin` world units.
    pub fn world_rect(&self, margin: f32) -> Rect {
        let margin = margin.max(0.0);
        let scale = self.scale.max(f32::MIN_POSITIVE);
        Rect::from_min_max(
            pos2(
                -self.offset.x / scale - margin,
                -self.offset.y / scale - margin,
            ),
            pos2(
                (self.width - self.offset.x) / scale + margin,
                (self.height - self.offset.y) / scale + margin,
            ),
        )
    }

    pub fn world_to_screen(&self, world: Vec2) -> Pos2 {
        (world * self.scale + self.offset).to_pos2()
    }

    pub fn screen_to_world(&self, screen: Pos2) -> Vec2 {
        (screen.to_vec2() - self.offset) / self.scale.max(f32::MIN_POSITIVE)
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        self.offset += delta;
    }

    /// Zooms by `factor` while keeping the world point under `pointer` in place.
    pub fn zoom_at(&mut self, pointer: Pos2, factor: f32) {
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let world_before = self.screen_to_world(pointer);
        self.scale = (self.scale * factor).clamp(MIN_SCALE, MAX_SCALE);
        self.offset = pointer.to_vec2() - world_before * self.scale;
    }
}

fn circle_visible(rect: Rect, position: Vec2, radius: f32) -> bool {
    position.is_finite()
        && !(position.x + radius < rect.left()
            || position.x - radius > rect.right()
            || position.y + radius < rect.top()
            || position.y - radius > rect.bottom())
}

/// Snapshot of node positions answering per-frame visibility queries.
pub struct ViewportCuller {
    positions: Vec<Vec2>,
    radii: Vec<f32>,
    max_radius: f32,
    index: Option<SpatialIndex>,
}

impl ViewportCuller {
    pub fn new(graph: &Graph, config: &CullConfig) -> Self {
        let positions = graph
            .nodes()
            .iter()
            .map(|node| node.position)
            .collect::<Vec<_>>();
        let radii = graph
            .nodes()
            .iter()
            .map(|node| node.radius)
            .collect::<Vec<_>>();
        let max_radius = radii.iter().copied().fold(0.0_f32, f32::max);
        let index = (positions.len() > config.index_threshold)
            .then(|| SpatialIndex::from_positions(positions.clone()));

        Self {
            positions,
            radii,
            max_radius,
            index,
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    /// Ascending indices of nodes whose circle touches the viewport grown by `margin`.
    pub fn visible_nodes(&self, viewport: &Viewport, margin: f32) -> Vec<usize> {
        let rect = viewport.world_rect(margin);
        match &self.index {
            Some(index) => index
                .query(rect.expand(self.max_radius))
                .into_iter()
                .filter(|&i| circle_visible(rect, self.positions[i], self.radii[i]))
                .collect(),
            None => (0..self.positions.len())
                .filter(|&i| circle_visible(rect, self.positions[i], self.radii[i]))
                .collect(),
        }
    }

    /// Indices of links with at least one visible endpoint.
    pub fn visible_links(&self, graph: &Graph, visible: &[usize]) -> Vec<usize> {
        let mut mask = vec![false; graph.node_count()];
        for &index in visible {
            if let Some(slot) = mask.get_mut(index) {
                *slot = true;
            }
        }

        let shown = |id: &str| graph.index_of(id).is_some_and(|index| mask[index]);
        graph
            .links()
            .iter()
            .enumerate()
            .filter(|(_, link)| shown(&link.source) || shown(&link.target))
            .map(|(link_index, _)| link_index)
            .collect()
    }
}
