use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use emath::{Vec2, vec2};

/// Maps an id onto a stable pair in `[-1, 1]`, used to jitter seeded positions.
pub fn stable_pair(id: &str) -> (f32, f32) {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    let hash = hasher.finish();

    let x = ((hash & 0xffff_ffff) as f64 / u32::MAX as f64) as f32;
    let y = (((hash >> 32) & 0xffff_ffff) as f64 / u32::MAX as f64) as f32;
    ((x * 2.0) - 1.0, (y * 2.0) - 1.0)
}

/// Deterministic unit direction for two points that share a position.
pub fn jiggle_direction(a: usize, b: usize) -> Vec2 {
    let angle = ((a as f32) * 0.618_034 + (b as f32) * 0.414_214) * std::f32::consts::TAU;
    vec2(angle.cos(), angle.sin())
}

pub fn aggregated_link_width(weight: f32) -> f32 {
    (1.0 + weight.max(1.0).ln()).min(10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_pair_is_repeatable_and_bounded() {
        let first = stable_pair("0xabc");
        assert_eq!(first, stable_pair("0xabc"));
        assert!((-1.0..=1.0).contains(&first.0));
        assert!((-1.0..=1.0).contains(&first.1));
    }

    #[test]
    fn link_width_saturates() {
        assert_eq!(aggregated_link_width(1.0), 1.0);
        assert_eq!(aggregated_link_width(1.0e9), 10.0);
    }
}
