use emath::{Rect, Vec2, vec2};

use crate::graph::Node;

const QUADTREE_LEAF_CAPACITY: usize = 12;
const QUADTREE_MAX_DEPTH: usize = 10;

#[derive(Clone, Copy, Debug)]
pub(crate) struct QuadBounds {
    pub(crate) center: Vec2,
    pub(crate) half_extent: f32,
}

impl QuadBounds {
    fn from_points(points: &[Vec2]) -> Option<Self> {
        let mut min = vec2(f32::INFINITY, f32::INFINITY);
        let mut max = vec2(f32::NEG_INFINITY, f32::NEG_INFINITY);

        for point in points.iter().filter(|point| point.is_finite()) {
            min.x = min.x.min(point.x);
            min.y = min.y.min(point.y);
            max.x = max.x.max(point.x);
            max.y = max.y.max(point.y);
        }

        if !min.x.is_finite() || !min.y.is_finite() || !max.x.is_finite() || !max.y.is_finite() {
            return None;
        }

        let center = (min + max) * 0.5;
        let span_x = (max.x - min.x).max(1.0);
        let span_y = (max.y - min.y).max(1.0);
        let half_extent = (span_x.max(span_y) * 0.5) + 1.0;

        Some(Self {
            center,
            half_extent,
        })
    }

    pub(crate) fn contains(self, point: Vec2) -> bool {
        let min = self.center - vec2(self.half_extent, self.half_extent);
        let max = self.center + vec2(self.half_extent, self.half_extent);
        point.x >= min.x && point.x <= max.x && point.y >= min.y && point.y <= max.y
    }

    fn child(self, quadrant: usize) -> Self {
        let quarter = self.half_extent * 0.5;
        let offset = match quadrant {
            0 => vec2(-quarter, -quarter),
            1 => vec2(quarter, -quarter),
            2 => vec2(-quarter, quarter),
            _ => vec2(quarter, quarter),
        };

        Self {
            center: self.center + offset,
            half_extent: quarter,
        }
    }

    fn quadrant_for(self, point: Vec2) -> usize {
        let right = point.x >= self.center.x;
        let lower = point.y >= self.center.y;
        match (right, lower) {
            (false, false) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (true, true) => 3,
        }
    }

    pub(crate) fn side_length(self) -> f32 {
        self.half_extent * 2.0
    }

    pub(crate) fn distance_sq_to(self, other: Self) -> f32 {
        let dx = (self.center.x - other.center.x).abs() - (self.half_extent + other.half_extent);
        let dy = (self.center.y - other.center.y).abs() - (self.half_extent + other.half_extent);
        let clamped_dx = dx.max(0.0);
        let clamped_dy = dy.max(0.0);
        (clamped_dx * clamped_dx) + (clamped_dy * clamped_dy)
    }

    fn distance_sq_to_point(self, point: Vec2) -> f32 {
        let dx = ((point.x - self.center.x).abs() - self.half_extent).max(0.0);
        let dy = ((point.y - self.center.y).abs() - self.half_extent).max(0.0);
        (dx * dx) + (dy * dy)
    }

    fn intersects(self, rect: Rect) -> bool {
        !(self.center.x + self.half_extent < rect.min.x
            || self.center.x - self.half_extent > rect.max.x
            || self.center.y + self.half_extent < rect.min.y
            || self.center.y - self.half_extent > rect.max.y)
    }
}

pub(crate) struct QuadNode {
    pub(crate) bounds: QuadBounds,
    pub(crate) center_of_mass: Vec2,
    pub(crate) mass: f32,
    pub(crate) indices: Vec<usize>,
    pub(crate) children: [Option<Box<QuadNode>>; 4],
}

impl QuadNode {
    pub(crate) fn build(positions: &[Vec2]) -> Option<Self> {
        let bounds = QuadBounds::from_points(positions)?;
        let indices = (0..positions.len())
            .filter(|&index| positions[index].is_finite())
            .collect::<Vec<_>>();
        Some(Self::build_node(bounds, indices, positions, 0))
    }

    fn build_node(
        bounds: QuadBounds,
        indices: Vec<usize>,
        positions: &[Vec2],
        depth: usize,
    ) -> Self {
        let mut center_of_mass = Vec2::ZERO;
        for &index in &indices {
            center_of_mass += positions[index];
        }

        let mass = indices.len() as f32;
        if mass > 0.0 {
            center_of_mass /= mass;
        }

        let mut node = Self {
            bounds,
            center_of_mass,
            mass,
            indices,
            children: std::array::from_fn(|_| None),
        };

        if depth >= QUADTREE_MAX_DEPTH || node.indices.len() <= QUADTREE_LEAF_CAPACITY {
            return node;
        }

        let mut buckets = std::array::from_fn::<_, 4, _>(|_| Vec::new());
        for &index in &node.indices {
            let quadrant = bounds.quadrant_for(positions[index]);
            buckets[quadrant].push(index);
        }

        // Stacked points land in one bucket; splitting further would never separate them.
        let non_empty = buckets.iter().filter(|bucket| !bucket.is_empty()).count();
        if non_empty <= 1 {
            return node;
        }

        for (quadrant, bucket) in buckets.into_iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }

            let child_bounds = bounds.child(quadrant);
            node.children[quadrant] = Some(Box::new(Self::build_node(
                child_bounds,
                bucket,
                positions,
                depth + 1,
            )));
        }
        node.indices.clear();
        node
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.children.iter().all(|child| child.is_none())
    }

    fn children(&self) -> impl Iterator<Item = &QuadNode> {
        self.children.iter().filter_map(|child| child.as_deref())
    }

    fn depth(&self) -> usize {
        self.children().map(|child| child.depth() + 1).max().unwrap_or(0)
    }

    fn collect_in_rect(&self, rect: Rect, positions: &[Vec2], out: &mut Vec<usize>) {
        if !self.bounds.intersects(rect) {
            return;
        }
        if self.is_leaf() {
            out.extend(
                self.indices
                    .iter()
                    .copied()
                    .filter(|&index| rect.contains(positions[index].to_pos2())),
            );
            return;
        }
        for child in self.children() {
            child.collect_in_rect(rect, positions, out);
        }
    }

    fn visit_within<F>(&self, center: Vec2, radius_sq: f32, positions: &[Vec2], visitor: &mut F)
    where
        F: FnMut(usize, f32),
    {
        if self.bounds.distance_sq_to_point(center) > radius_sq {
            return;
        }
        if self.is_leaf() {
            for &index in &self.indices {
                let distance_sq = (positions[index] - center).length_sq();
                if distance_sq <= radius_sq {
                    visitor(index, distance_sq);
                }
            }
            return;
        }
        for child in self.children() {
            child.visit_within(center, radius_sq, positions, visitor);
        }
    }

    fn nearest(&self, point: Vec2, positions: &[Vec2], best: &mut Option<(usize, f32)>) {
        if let Some((_, best_sq)) = *best
            && self.bounds.distance_sq_to_point(point) > best_sq
        {
            return;
        }

        if self.is_leaf() {
            for &index in &self.indices {
                let distance_sq = (positions[index] - point).length_sq();
                let closer = match *best {
                    Some((best_index, best_sq)) => {
                        distance_sq < best_sq || (distance_sq == best_sq && index < best_index)
                    }
                    None => true,
                };
                if closer {
                    *best = Some((index, distance_sq));
                }
            }
            return;
        }

        let mut order = self
            .children()
            .map(|child| (child.bounds.distance_sq_to_point(point), child))
            .collect::<Vec<_>>();
        order.sort_by(|a, b| a.0.total_cmp(&b.0));
        for (_, child) in order {
            child.nearest(point, positions, best);
        }
    }
}

/// Quadtree over a snapshot of node positions. Node references are indices into that snapshot.
pub struct SpatialIndex {
    root: Option<QuadNode>,
    positions: Vec<Vec2>,
}

impl SpatialIndex {
    pub fn build(nodes: &[Node]) -> Self {
        Self::from_positions(nodes.iter().map(|node| node.position).collect())
    }

    pub fn from_positions(positions: Vec<Vec2>) -> Self {
        let root = QuadNode::build(&positions);
        Self { root, positions }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Vec2] {
        &self.positions
    }

    pub fn into_positions(self) -> Vec<Vec2> {
        self.positions
    }

    pub fn depth(&self) -> usize {
        self.root.as_ref().map_or(0, QuadNode::depth)
    }

    pub(crate) fn root(&self) -> Option<&QuadNode> {
        self.root.as_ref()
    }

    /// Indices whose position lies inside `rect`, in ascending order.
    pub fn query(&self, rect: Rect) -> Vec<usize> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            root.collect_in_rect(rect, &self.positions, &mut out);
        }
        out.sort_unstable();
        out
    }

    /// Calls `visitor(index, distance_sq)` for every point within `radius` of `center`.
    pub fn for_each_within_radius<F>(&self, center: Vec2, radius: f32, mut visitor: F)
    where
        F: FnMut(usize, f32),
    {
        if let Some(root) = &self.root {
            root.visit_within(center, radius * radius, &self.positions, &mut visitor);
        }
    }

    pub fn nearest(&self, point: Vec2) -> Option<usize> {
        let root = self.root.as_ref()?;
        let mut best = None;
        root.nearest(point, &self.positions, &mut best);
        best.map(|(index, _)| index)
    }
}
