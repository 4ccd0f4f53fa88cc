//! Visited-configuration set with a weighted Euclidean metric.
//!
//! Configurations are scaled by per-DOF weights on the way in, so the
//! weighted distance `sqrt(sum w_i^2 (x_i - y_i)^2)` becomes a plain
//! Euclidean distance inside the k-d tree.

use kdtree::distance::squared_euclidean;
use kdtree::KdTree;

use crate::error::{Result, SamplingError};

/// Two configurations closer than this are the same point.
const DUPLICATE_EPSILON: f64 = 1e-12;

pub struct DistanceCache {
    tree: KdTree<f64, usize, Vec<f64>>,
    /// Scaled coordinates of every inserted configuration, by insertion tag.
    points: Vec<Vec<f64>>,
    weights: Vec<f64>,
    max_distance: f64,
}

impl DistanceCache {
    pub fn new(weights: Vec<f64>, max_distance: f64) -> Self {
        let dims = weights.len();
        Self {
            tree: KdTree::new(dims),
            points: Vec::new(),
            weights,
            max_distance,
        }
    }

    /// Weights derived from DOF resolutions: `1/resolution`, or 100 for a
    /// zero resolution.
    pub fn from_resolutions(resolutions: &[f64]) -> Self {
        let weights = resolutions
            .iter()
            .map(|&r| if r > 0.0 { 1.0 / r } else { 100.0 })
            .collect();
        Self::new(weights, 1.0)
    }

    fn scaled(&self, configuration: &[f64]) -> Result<Vec<f64>> {
        if configuration.len() != self.weights.len() {
            return Err(SamplingError::invalid_argument(format!(
                "configuration of dof {} does not match cache dof {}",
                configuration.len(),
                self.weights.len()
            )));
        }
        if configuration.iter().any(|v| !v.is_finite()) {
            return Err(SamplingError::invalid_argument(
                "configuration contains non-finite values",
            ));
        }
        Ok(configuration
            .iter()
            .zip(&self.weights)
            .map(|(v, w)| v * w)
            .collect())
    }

    /// Inserts a configuration unless another one already sits within
    /// `min_separation` (weighted). Returns whether the point was stored.
    pub fn insert(&mut self, configuration: &[f64], min_separation: f64) -> Result<bool> {
        let scaled = self.scaled(configuration)?;
        let separation = min_separation.max(DUPLICATE_EPSILON);
        if let Some((_, dist)) = self.nearest_scaled(&scaled) {
            if dist <= separation {
                return Ok(false);
            }
        }
        let tag = self.points.len();
        self.tree
            .add(scaled.clone(), tag)
            .map_err(|e| SamplingError::invalid_argument(format!("cache insertion failed: {:?}", e)))?;
        self.points.push(scaled);
        Ok(true)
    }

    /// Nearest visited configuration within `radius` (weighted), as
    /// `(insertion tag, distance)`. Admissible: a stored point within the
    /// radius is always found.
    pub fn find_nearest(&self, configuration: &[f64], radius: f64) -> Option<(usize, f64)> {
        let scaled = self.scaled(configuration).ok()?;
        match self.nearest_scaled(&scaled) {
            Some((tag, dist)) if dist <= radius => Some((tag, dist)),
            _ => None,
        }
    }

    fn nearest_scaled(&self, scaled: &[f64]) -> Option<(usize, f64)> {
        let found = self.tree.nearest(scaled, 1, &squared_euclidean).ok()?;
        found.first().map(|&(dist2, &tag)| (tag, dist2.sqrt()))
    }

    pub fn reset(&mut self) {
        self.tree = KdTree::new(self.weights.len());
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    pub fn set_max_distance(&mut self, max_distance: f64) {
        self.max_distance = max_distance;
    }
}

impl std::fmt::Debug for DistanceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistanceCache")
            .field("len", &self.points.len())
            .field("weights", &self.weights)
            .field("max_distance", &self.max_distance)
            .finish()
    }
}
