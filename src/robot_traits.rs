//! Defines the robot collaborator interface consumed by the jitterer.
//!
//! The kinematic model, the collision world and the manipulator Jacobian all
//! live behind [`RobotModel`]; this crate only perturbs active DOF values and
//! asks the model what happened. Different robots may be sampled in parallel
//! as long as they do not share a collision world.

use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;
use nalgebra::{DMatrix, Isometry3, Point3, Vector3};

use crate::error::Result;

bitflags! {
    /// Robot property groups a change callback can subscribe to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChangeFlags: u32 {
        /// Joint limits were modified.
        const JOINT_LIMITS = 1 << 0;
        /// A body was grabbed or released.
        const GRABBED = 1 << 1;
    }
}

/// Local axis-aligned bounding box of a link, at the link frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkAabb {
    pub center: Point3<f64>,
    pub extents: Vector3<f64>,
}

impl LinkAabb {
    pub fn new(center: Point3<f64>, extents: Vector3<f64>) -> Self {
        Self { center, extents }
    }
}

/// Minimal collision diagnostics filled by the collision queries.
#[derive(Debug, Default, Clone)]
pub struct CollisionReport {
    /// Names of the two colliding bodies, when the model reports them.
    pub colliding: Option<(String, String)>,
    /// A representative contact point, when the model reports one.
    pub contact: Option<Point3<f64>>,
}

impl CollisionReport {
    pub fn clear(&mut self) {
        self.colliding = None;
        self.contact = None;
    }
}

/// Outcome of a manifold projection through the neighbor-state function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighStatus {
    Success,
    Failed,
}

/// Replaces a raw Euclidean step with its image on a constraint manifold.
///
/// Receives the configuration to update (set to the current one on entry)
/// and the proposed delta; on success the configuration holds the projected
/// neighbor.
pub type NeighStateFn = Box<dyn FnMut(&mut Vec<f64>, &[f64]) -> NeighStatus>;

/// Invoked by the robot after a subscribed property changed. The robot passes
/// itself so the subscriber can re-read limits or links without holding its
/// own reference.
pub type ChangeCallback = Box<dyn Fn(&dyn RobotModel)>;

/// Periodic progress callback of the jitter loop; returning an error cancels
/// sampling and the error propagates out of `sample()`.
pub type StatusCallback = Box<dyn FnMut(u32) -> Result<()>>;

/// Deregisters a change callback when dropped.
///
/// The subscriber holds this handle instead of a strong reference into the
/// robot, so the robot and its subscribers never form an ownership cycle.
pub struct CallbackHandle {
    unregister: Option<Box<dyn FnOnce()>>,
}

impl CallbackHandle {
    pub fn new(unregister: impl FnOnce() + 'static) -> Self {
        Self {
            unregister: Some(Box::new(unregister)),
        }
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CallbackHandle")
    }
}

/// The robot and its collision world, as seen by the jitterer.
///
/// Active DOFs are the joints (plus affine base modes) currently enabled for
/// sampling; limits, resolutions and the Jacobian are all reported for that
/// active set, in order.
pub trait RobotModel {
    fn active_dof_indices(&self) -> Vec<usize>;
    /// Affine base modes enabled alongside the joint DOFs; 0 disables them.
    fn affine_dof_mask(&self) -> u32;
    fn affine_rotation_axis(&self) -> Vector3<f64>;
    fn set_active_dofs(&mut self, indices: &[usize], affine_mask: u32, axis: Vector3<f64>);

    fn active_dof_values(&self) -> Vec<f64>;
    fn set_active_dof_values(&mut self, values: &[f64]);
    /// Values of every robot DOF, not only the active subset.
    fn dof_values(&self) -> Vec<f64>;

    fn active_dof_limits(&self) -> (Vec<f64>, Vec<f64>);
    fn active_dof_resolutions(&self) -> Vec<f64>;

    fn link_count(&self) -> usize;
    /// Links without geometries are virtual and must be skipped when bounding
    /// link motion; their AABBs would poison the excursion test.
    fn link_has_geometry(&self, ilink: usize) -> bool;
    /// Links of grabbed bodies move with the robot and are always tracked.
    fn link_is_grabbed(&self, ilink: usize) -> bool;
    fn link_transform(&self, ilink: usize) -> Isometry3<f64>;
    fn link_local_aabb(&self, ilink: usize) -> LinkAabb;
    fn joint_affects_link(&self, dof_index: usize, ilink: usize) -> bool;

    fn has_manipulator(&self, name: &str) -> bool;
    fn manipulator_transform(&self, name: &str) -> Isometry3<f64>;
    fn manipulator_local_tool_transform(&self, name: &str) -> Isometry3<f64>;
    /// Translational Jacobian of the manipulator tip, 3 rows by active DOF
    /// columns, at the current configuration.
    fn manipulator_jacobian(&self, name: &str) -> DMatrix<f64>;

    fn check_env_collision(&self, report: &mut CollisionReport) -> bool;
    fn check_self_collision(&self, report: &mut CollisionReport) -> bool;

    fn register_change_callback(&mut self, flags: ChangeFlags, callback: ChangeCallback) -> CallbackHandle;
}

/// Scoped snapshot of the robot's active DOF set and values.
///
/// Restores both on drop unless released, which guarantees the robot leaves
/// `sample()` unchanged on every failure and cancellation path.
pub struct RobotStateSaver {
    robot: Rc<RefCell<dyn RobotModel>>,
    indices: Vec<usize>,
    affine_mask: u32,
    affine_axis: Vector3<f64>,
    values: Vec<f64>,
    released: bool,
}

impl RobotStateSaver {
    pub fn new(robot: Rc<RefCell<dyn RobotModel>>) -> Self {
        let (indices, affine_mask, affine_axis, values) = {
            let r = robot.borrow();
            (
                r.active_dof_indices(),
                r.affine_dof_mask(),
                r.affine_rotation_axis(),
                r.active_dof_values(),
            )
        };
        Self {
            robot,
            indices,
            affine_mask,
            affine_axis,
            values,
            released: false,
        }
    }

    /// Keeps the current robot state instead of restoring the snapshot.
    pub fn release(&mut self) {
        self.released = true;
    }
}

impl Drop for RobotStateSaver {
    fn drop(&mut self) {
        if !self.released {
            let mut robot = self.robot.borrow_mut();
            robot.set_active_dofs(&self.indices, self.affine_mask, self.affine_axis);
            robot.set_active_dof_values(&self.values);
        }
    }
}
