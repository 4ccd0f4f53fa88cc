//! Tool-pose constraints evaluated during jittering.
//!
//! Both constraints look only at the manipulator transform, so they are
//! cheap enough to run before the collision checks.

use nalgebra::{Isometry3, Vector3};
use serde_json::json;

use crate::error::{Result, SamplingError};

/// Directions are accepted as unit when their norm is within this of 1.
const UNIT_TOLERANCE: f64 = 1e-7;

/// Keeps a manipulator axis inside a cone around a world direction.
///
/// Satisfied iff `dot(R * manip_dir, global_dir) >= cos_thresh`, where `R`
/// is the manipulator rotation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDirectionConstraint {
    /// Constrained axis in the manipulator frame, unit length.
    pub manip_dir: Vector3<f64>,
    /// Cone axis in the world frame, unit length.
    pub global_dir: Vector3<f64>,
    /// Cosine of the cone half-angle.
    pub cos_thresh: f64,
}

impl ToolDirectionConstraint {
    pub fn new(manip_dir: Vector3<f64>, global_dir: Vector3<f64>, cos_thresh: f64) -> Result<Self> {
        if (manip_dir.norm() - 1.0).abs() > UNIT_TOLERANCE {
            return Err(SamplingError::invalid_argument(format!(
                "manipulator direction {:?} is not unit length",
                manip_dir
            )));
        }
        if (global_dir.norm() - 1.0).abs() > UNIT_TOLERANCE {
            return Err(SamplingError::invalid_argument(format!(
                "global direction {:?} is not unit length",
                global_dir
            )));
        }
        Ok(Self {
            manip_dir,
            global_dir,
            cos_thresh,
        })
    }

    /// Cosine between the rotated manipulator axis and the cone axis, for
    /// diagnostics.
    pub fn cos_angle(&self, tool: &Isometry3<f64>) -> f64 {
        (tool.rotation * self.manip_dir).dot(&self.global_dir)
    }

    pub fn is_satisfied(&self, tool: &Isometry3<f64>) -> bool {
        self.cos_angle(tool) >= self.cos_thresh
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "manipDir": [self.manip_dir.x, self.manip_dir.y, self.manip_dir.z],
            "globalDir": [self.global_dir.x, self.global_dir.y, self.global_dir.z],
            "cosAngleThresh": self.cos_thresh,
        })
    }
}

/// Keeps the manipulator translation inside an oriented bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolPositionConstraint {
    pub right: Vector3<f64>,
    pub up: Vector3<f64>,
    pub dir: Vector3<f64>,
    pub center: Vector3<f64>,
    pub extents: Vector3<f64>,
}

impl ToolPositionConstraint {
    pub fn new(
        right: Vector3<f64>,
        up: Vector3<f64>,
        dir: Vector3<f64>,
        center: Vector3<f64>,
        extents: Vector3<f64>,
    ) -> Self {
        Self {
            right,
            up,
            dir,
            center,
            extents,
        }
    }

    pub fn is_satisfied(&self, tool: &Isometry3<f64>) -> bool {
        let d = tool.translation.vector - self.center;
        d.dot(&self.right).abs() <= self.extents.x
            && d.dot(&self.up).abs() <= self.extents.y
            && d.dot(&self.dir).abs() <= self.extents.z
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "right": [self.right.x, self.right.y, self.right.z],
            "up": [self.up.x, self.up.y, self.up.z],
            "dir": [self.dir.x, self.dir.y, self.dir.z],
            "pos": [self.center.x, self.center.y, self.center.z],
            "extents": [self.extents.x, self.extents.y, self.extents.z],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion};
    use std::f64::consts::FRAC_PI_4;

    fn pose(x: f64, y: f64, z: f64, rot: UnitQuaternion<f64>) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::new(x, y, z), rot)
    }

    #[test]
    fn test_direction_requires_unit_vectors() {
        let bad = ToolDirectionConstraint::new(
            Vector3::new(0.0, 0.0, 2.0),
            Vector3::new(0.0, 0.0, 1.0),
            0.9,
        );
        assert!(bad.is_err());
        let good = ToolDirectionConstraint::new(
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 0.0, 1.0),
            0.9,
        );
        assert!(good.is_ok());
    }

    #[test]
    fn test_direction_cone() {
        // Tool z-axis must stay within 45 degrees of world z.
        let constraint = ToolDirectionConstraint::new(
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 0.0, 1.0),
            FRAC_PI_4.cos(),
        )
        .unwrap();

        let upright = pose(0.0, 0.0, 0.0, UnitQuaternion::identity());
        assert!(constraint.is_satisfied(&upright));

        let tilted_30 = pose(
            0.0,
            0.0,
            0.0,
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 30f64.to_radians()),
        );
        assert!(constraint.is_satisfied(&tilted_30));

        let tilted_60 = pose(
            0.0,
            0.0,
            0.0,
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 60f64.to_radians()),
        );
        assert!(!constraint.is_satisfied(&tilted_60));
    }

    #[test]
    fn test_direction_cos_angle_reports_dot() {
        let constraint = ToolDirectionConstraint::new(
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 0.0, 1.0),
            0.0,
        )
        .unwrap();
        let flipped = pose(
            0.0,
            0.0,
            0.0,
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI),
        );
        assert!((constraint.cos_angle(&flipped) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_position_obb() {
        // Axis-aligned box centered at (1, 0, 0) with extents (0.5, 0.2, 0.1).
        let constraint = ToolPositionConstraint::new(
            Vector3::x(),
            Vector3::y(),
            Vector3::z(),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.5, 0.2, 0.1),
        );

        assert!(constraint.is_satisfied(&pose(1.0, 0.0, 0.0, UnitQuaternion::identity())));
        assert!(constraint.is_satisfied(&pose(1.5, 0.2, -0.1, UnitQuaternion::identity())));
        assert!(!constraint.is_satisfied(&pose(1.6, 0.0, 0.0, UnitQuaternion::identity())));
        assert!(!constraint.is_satisfied(&pose(1.0, 0.0, 0.11, UnitQuaternion::identity())));
    }

    #[test]
    fn test_position_obb_rotated_frame() {
        // Box frame rotated 45 degrees around z; a point past the rotated
        // right axis must be rejected even though it is close in world x.
        let sq = FRAC_PI_4.cos();
        let constraint = ToolPositionConstraint::new(
            Vector3::new(sq, sq, 0.0),
            Vector3::new(-sq, sq, 0.0),
            Vector3::z(),
            Vector3::zeros(),
            Vector3::new(0.1, 1.0, 1.0),
        );
        assert!(constraint.is_satisfied(&pose(0.05, 0.05, 0.0, UnitQuaternion::identity())));
        assert!(!constraint.is_satisfied(&pose(0.2, 0.2, 0.0, UnitQuaternion::identity())));
    }
}
