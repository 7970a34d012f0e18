use emath::Vec2;

use super::quadtree::QuadNode;
use crate::util::jiggle_direction;

const MIN_DISTANCE_SQ: f32 = 1.0;

#[derive(Clone, Copy)]
pub(super) struct ChargeParams {
    /// `charge * alpha`; negative pushes nodes apart.
    pub(super) scaled_charge: f32,
    pub(super) theta: f32,
}

#[derive(Clone, Copy)]
pub(super) struct CollisionParams {
    pub(super) collision_strength: f32,
    pub(super) max_collision_distance_sq: f32,
}

fn charge_between(
    point: Vec2,
    source: Vec2,
    mass: f32,
    index: usize,
    other: usize,
    scaled_charge: f32,
) -> Vec2 {
    let mut delta = source - point;
    let mut distance_sq = delta.length_sq();
    if distance_sq <= f32::EPSILON {
        let direction = jiggle_direction(index.min(other), index.max(other));
        delta = if index < other { direction } else { -direction } * 1.0e-3;
        distance_sq = delta.length_sq();
    }
    if distance_sq < MIN_DISTANCE_SQ {
        distance_sq = (MIN_DISTANCE_SQ * distance_sq).sqrt();
    }
    delta * (scaled_charge * mass / distance_sq)
}

pub(super) fn accumulate_charge_for_node(
    node: &QuadNode,
    index: usize,
    positions: &[Vec2],
    params: ChargeParams,
    delta_velocity: &mut Vec2,
) {
    if node.mass <= 0.0 {
        return;
    }

    let point = positions[index];

    if node.is_leaf() {
        for &other_index in &node.indices {
            if other_index == index {
                continue;
            }
            *delta_velocity += charge_between(
                point,
                positions[other_index],
                1.0,
                index,
                other_index,
                params.scaled_charge,
            );
        }
        return;
    }

    let distance_sq = (point - node.center_of_mass).length_sq().max(0.0001);
    let distance = distance_sq.sqrt();
    let can_approximate = !node.bounds.contains(point)
        && ((node.bounds.side_length() / distance) < params.theta)
        && node.mass > 1.0;

    if can_approximate {
        *delta_velocity += charge_between(
            point,
            node.center_of_mass,
            node.mass,
            index,
            usize::MAX,
            params.scaled_charge,
        );
        return;
    }

    for child in node.children.iter().flatten() {
        accumulate_charge_for_node(child, index, positions, params, delta_velocity);
    }
}

fn resolve_overlap(
    from: usize,
    to: usize,
    positions: &[Vec2],
    radii: &[f32],
    collision_strength: f32,
    deltas: &mut [Vec2],
) {
    let min_distance = radii[from] + radii[to];
    let delta = positions[from] - positions[to];
    let distance_sq = delta.length_sq();
    if distance_sq >= min_distance * min_distance {
        return;
    }

    let distance = distance_sq.sqrt();
    let direction = if distance > 0.0001 {
        delta / distance
    } else {
        jiggle_direction(from, to)
    };

    let push = direction * ((min_distance - distance) * collision_strength);
    let from_sq = radii[from] * radii[from];
    let to_sq = radii[to] * radii[to];
    let share = if from_sq + to_sq > 0.0 {
        to_sq / (from_sq + to_sq)
    } else {
        0.5
    };
    deltas[from] += push * share;
    deltas[to] -= push * (1.0 - share);
}

pub(super) fn accumulate_collision_pairs(
    node_a: &QuadNode,
    node_b: &QuadNode,
    same_node: bool,
    positions: &[Vec2],
    radii: &[f32],
    params: CollisionParams,
    deltas: &mut [Vec2],
) {
    if node_a.bounds.distance_sq_to(node_b.bounds) > params.max_collision_distance_sq {
        return;
    }

    if node_a.is_leaf() && node_b.is_leaf() {
        if same_node {
            for i in 0..node_a.indices.len() {
                for j in (i + 1)..node_a.indices.len() {
                    resolve_overlap(
                        node_a.indices[i],
                        node_a.indices[j],
                        positions,
                        radii,
                        params.collision_strength,
                        deltas,
                    );
                }
            }
        } else {
            for &from in &node_a.indices {
                for &to in &node_b.indices {
                    resolve_overlap(from, to, positions, radii, params.collision_strength, deltas);
                }
            }
        }
        return;
    }

    if same_node {
        for first in 0..4 {
            let Some(child_a) = node_a.children[first].as_ref() else {
                continue;
            };

            accumulate_collision_pairs(child_a, child_a, true, positions, radii, params, deltas);

            for second in (first + 1)..4 {
                let Some(child_b) = node_a.children[second].as_ref() else {
                    continue;
                };
                accumulate_collision_pairs(
                    child_a, child_b, false, positions, radii, params, deltas,
                );
            }
        }
        return;
    }

    let split_a = if node_a.is_leaf() {
        false
    } else if node_b.is_leaf() {
        true
    } else {
        node_a.bounds.half_extent >= node_b.bounds.half_extent
    };

    if split_a {
        for child in node_a.children.iter().flatten() {
            accumulate_collision_pairs(child, node_b, false, positions, radii, params, deltas);
        }
    } else {
        for child in node_b.children.iter().flatten() {
            accumulate_collision_pairs(node_a, child, false, positions, radii, params, deltas);
        }
    }
}
