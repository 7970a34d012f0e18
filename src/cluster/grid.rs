use std::collections::HashMap;

use emath::Vec2;

fn cell_key(point: Vec2, cell_size: f32) -> u64 {
    let cell_x = (point.x / cell_size).floor() as i32;
    let cell_y = (point.y / cell_size).floor() as i32;
    ((cell_x as u32 as u64) << 32) | (cell_y as u32 as u64)
}

fn neighbor_keys(point: Vec2, cell_size: f32) -> impl Iterator<Item = u64> {
    let cell_x = (point.x / cell_size).floor() as i32;
    let cell_y = (point.y / cell_size).floor() as i32;
    (-1..=1).flat_map(move |dx: i32| {
        (-1..=1).map(move |dy: i32| {
            let x = cell_x.saturating_add(dx);
            let y = cell_y.saturating_add(dy);
            ((x as u32 as u64) << 32) | (y as u32 as u64)
        })
    })
}

/// Buckets cluster centroids into square cells as wide as the join radius, so every
/// candidate within the radius lives in the 3x3 block around the probe.
pub(super) struct CentroidGrid {
    cell_size: f32,
    cells: HashMap<u64, Vec<usize>>,
    keys: Vec<u64>,
}

impl CentroidGrid {
    pub(super) fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
            keys: Vec::new(),
        }
    }

    /// Registers cluster `slot`; slots must be inserted in order.
    pub(super) fn insert(&mut self, slot: usize, centroid: Vec2) {
        debug_assert_eq!(slot, self.keys.len());
        let key = cell_key(centroid, self.cell_size);
        self.cells.entry(key).or_default().push(slot);
        self.keys.push(key);
    }

    pub(super) fn relocate(&mut self, slot: usize, centroid: Vec2) {
        let key = cell_key(centroid, self.cell_size);
        let previous = self.keys[slot];
        if key == previous {
            return;
        }
        if let Some(bucket) = self.cells.get_mut(&previous) {
            bucket.retain(|&candidate| candidate != slot);
            if bucket.is_empty() {
                self.cells.remove(&previous);
            }
        }
        self.cells.entry(key).or_default().push(slot);
        self.keys[slot] = key;
    }

    /// Slots whose cell touches the block around `point`, in ascending order.
    pub(super) fn candidates(&self, point: Vec2) -> Vec<usize> {
        let mut out = neighbor_keys(point, self.cell_size)
            .filter_map(|key| self.cells.get(&key))
            .flatten()
            .copied()
            .collect::<Vec<_>>();
        out.sort_unstable();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use emath::vec2;

    use super::*;

    #[test]
    fn candidates_cover_neighboring_cells() {
        let mut grid = CentroidGrid::new(10.0);
        grid.insert(0, vec2(1.0, 1.0));
        grid.insert(1, vec2(-9.0, 12.0));
        grid.insert(2, vec2(45.0, 45.0));

        assert_eq!(grid.candidates(vec2(2.0, 2.0)), vec![0, 1]);
        assert_eq!(grid.candidates(vec2(41.0, 38.0)), vec![2]);
    }

    #[test]
    fn relocate_moves_between_cells() {
        let mut grid = CentroidGrid::new(10.0);
        grid.insert(0, vec2(1.0, 1.0));
        grid.relocate(0, vec2(55.0, 55.0));

        assert!(grid.candidates(vec2(1.0, 1.0)).is_empty());
        assert_eq!(grid.candidates(vec2(52.0, 58.0)), vec![0]);
    }
}
