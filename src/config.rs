use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{EngineError, Result};

pub const MIN_LINK_DISTANCE: f32 = 1.0;
pub const MOBILE_MAX_NODES: usize = 100;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub force: ForceConfig,
    pub cluster: ClusterConfig,
    pub cull: CullConfig,
    pub optimize: OptimizeDefaults,
    pub coordinator: CoordinatorConfig,
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        Ok(config.sanitized())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Clamps every tunable into the range the solvers can work with.
    pub fn sanitized(mut self) -> Self {
        let force = &mut self.force;
        if !force.link_distance.is_finite() || force.link_distance < MIN_LINK_DISTANCE {
            force.link_distance = MIN_LINK_DISTANCE;
        }
        force.link_stiffness = finite_or(force.link_stiffness, 1.0).clamp(0.0, 2.0);
        force.charge = finite_or(force.charge, -300.0);
        force.center_strength = finite_or(force.center_strength, 0.02).clamp(0.0, 1.0);
        force.collision_padding = finite_or(force.collision_padding, 5.0).max(0.0);
        force.collision_strength = finite_or(force.collision_strength, 0.7).clamp(0.0, 1.0);
        force.velocity_decay = finite_or(force.velocity_decay, 0.4).clamp(0.0, 1.0);
        force.alpha = finite_or(force.alpha, 1.0).clamp(0.0, 1.0);
        force.alpha_min = finite_or(force.alpha_min, 0.001).clamp(1e-6, 1.0);
        force.alpha_decay = finite_or(force.alpha_decay, default_alpha_decay()).clamp(1e-4, 1.0);
        force.restart_alpha = finite_or(force.restart_alpha, 0.3).clamp(0.0, 1.0);
        force.theta = finite_or(force.theta, 0.72).clamp(0.0, 2.0);
        force.progress_interval = force.progress_interval.max(1);

        self.cluster.distance = finite_or(self.cluster.distance, 100.0).max(0.0);
        self.cull.margin = finite_or(self.cull.margin, 50.0).max(0.0);
        self.coordinator.workers = self.coordinator.workers.max(1);
        self
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() { value } else { fallback }
}

fn default_alpha_decay() -> f32 {
    1.0 - 0.001_f32.powf(1.0 / 300.0)
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ForceConfig {
    pub link_distance: f32,
    pub link_stiffness: f32,
    /// Negative values repel.
    pub charge: f32,
    pub center_strength: f32,
    pub collision_padding: f32,
    pub collision_strength: f32,
    pub velocity_decay: f32,
    pub alpha: f32,
    pub alpha_min: f32,
    pub alpha_decay: f32,
    pub restart_alpha: f32,
    pub theta: f32,
    pub max_ticks: usize,
    pub progress_interval: usize,
}

impl Default for ForceConfig {
    fn default() -> Self {
        Self {
            link_distance: 100.0,
            link_stiffness: 1.0,
            charge: -300.0,
            center_strength: 0.02,
            collision_padding: 5.0,
            collision_strength: 0.7,
            velocity_decay: 0.4,
            alpha: 1.0,
            alpha_min: 0.001,
            alpha_decay: default_alpha_decay(),
            restart_alpha: 0.3,
            theta: 0.72,
            max_ticks: 600,
            progress_interval: 10,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Clustering only kicks in above this many nodes.
    pub min_nodes: usize,
    pub distance: f32,
    pub preserve_groups: bool,
}

impl ClusterConfig {
    pub fn should_cluster(&self, node_count: usize) -> bool {
        node_count > self.min_nodes
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            min_nodes: 100,
            distance: 100.0,
            preserve_groups: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CullConfig {
    pub margin: f32,
    /// Below this node count a linear scan beats building the index.
    pub index_threshold: usize,
}

impl Default for CullConfig {
    fn default() -> Self {
        Self {
            margin: 50.0,
            index_threshold: 64,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptimizeDefaults {
    pub max_nodes: usize,
    pub mobile_max_nodes: usize,
    pub cluster_distance: f32,
    pub mobile_cluster_distance: f32,
}

impl OptimizeDefaults {
    pub fn max_nodes(&self, is_mobile: bool) -> usize {
        if is_mobile {
            self.mobile_max_nodes.min(MOBILE_MAX_NODES)
        } else {
            self.max_nodes
        }
    }

    pub fn cluster_distance(&self, is_mobile: bool) -> f32 {
        if is_mobile {
            self.mobile_cluster_distance
        } else {
            self.cluster_distance
        }
    }
}

impl Default for OptimizeDefaults {
    fn default() -> Self {
        Self {
            max_nodes: 300,
            mobile_max_nodes: MOBILE_MAX_NODES,
            cluster_distance: 100.0,
            mobile_cluster_distance: 50.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoordinatorConfig {
    pub workers: usize,
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    pub force_synchronous: bool,
    /// Finished layouts kept for `Coordinator::resume`; oldest are evicted first.
    pub retained_layouts: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            request_timeout: Duration::from_secs(30),
            force_synchronous: false,
            retained_layouts: 8,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "force": { "linkDistance": 40 }, "coordinator": { "requestTimeout": 250 } }"#,
        )
        .unwrap();

        assert_eq!(config.force.link_distance, 40.0);
        assert_eq!(config.force.charge, -300.0);
        assert_eq!(config.coordinator.request_timeout, Duration::from_millis(250));
        assert_eq!(config.coordinator.workers, 1);
        assert_eq!(config.coordinator.retained_layouts, 8);
    }

    #[test]
    fn zero_link_distance_is_clamped() {
        let config = EngineConfig::from_json_str(r#"{ "force": { "linkDistance": 0 } }"#).unwrap();
        assert_eq!(config.force.link_distance, MIN_LINK_DISTANCE);
    }

    #[test]
    fn mobile_lowers_max_nodes() {
        let defaults = OptimizeDefaults {
            mobile_max_nodes: 500,
            ..OptimizeDefaults::default()
        };
        assert_eq!(defaults.max_nodes(true), MOBILE_MAX_NODES);
        assert_eq!(defaults.max_nodes(false), 300);
    }
}
