//! A gantry-style robot with parry3d collision geometry for the jitter
//! scenarios: every active DOF translates one link along a fixed axis, and
//! the manipulator tip accumulates all link translations.

use std::cell::RefCell;
use std::rc::Rc;

use nalgebra::{DMatrix, Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
use parry3d::query::contact;
use parry3d::shape::Cuboid;

use crate::robot_traits::{
    CallbackHandle, ChangeCallback, ChangeFlags, CollisionReport, LinkAabb, RobotModel,
};

pub struct TestLink {
    pub axis: Vector3<f64>,
    pub dof: usize,
    pub half_extents: Vector3<f64>,
    pub grabbed: bool,
    pub has_geometry: bool,
}

pub struct TestRobot {
    lower: Vec<f64>,
    upper: Vec<f64>,
    resolutions: Vec<f64>,
    values: Vec<f64>,
    active: Vec<usize>,
    affine_mask: u32,
    affine_axis: Vector3<f64>,
    links: Vec<TestLink>,
    obstacles: Vec<(Isometry3<f32>, Cuboid)>,
    manip_name: String,
    local_tool: Isometry3<f64>,
    self_collision_fn: Option<Box<dyn Fn(&[f64]) -> bool>>,
    callbacks: Rc<RefCell<Vec<(u64, ChangeFlags, ChangeCallback)>>>,
    next_callback_id: u64,
}

const LINK_AXES: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

impl TestRobot {
    /// A robot with one tiny cubic link per DOF, translated along the x, y
    /// and z axes in turn.
    pub fn gantry(limits: &[(f64, f64)]) -> Self {
        let dof = limits.len();
        let links = (0..dof)
            .map(|i| {
                let axis = LINK_AXES[i % LINK_AXES.len()];
                TestLink {
                    axis: Vector3::new(axis[0], axis[1], axis[2]),
                    dof: i,
                    half_extents: Vector3::new(1e-6, 1e-6, 1e-6),
                    grabbed: false,
                    has_geometry: true,
                }
            })
            .collect();
        Self {
            lower: limits.iter().map(|&(lo, _)| lo).collect(),
            upper: limits.iter().map(|&(_, hi)| hi).collect(),
            resolutions: vec![0.01; dof],
            values: vec![0.0; dof],
            active: (0..dof).collect(),
            affine_mask: 0,
            affine_axis: Vector3::z(),
            links,
            obstacles: Vec::new(),
            manip_name: "tool".to_string(),
            local_tool: Isometry3::identity(),
            self_collision_fn: None,
            callbacks: Rc::new(RefCell::new(Vec::new())),
            next_callback_id: 0,
        }
    }

    pub fn add_obstacle(&mut self, center: Vector3<f64>, half_extents: Vector3<f64>) {
        let position = Isometry3::from_parts(
            Translation3::new(center.x, center.y, center.z),
            UnitQuaternion::identity(),
        )
        .cast::<f32>();
        self.obstacles
            .push((position, Cuboid::new(half_extents.cast::<f32>())));
    }

    pub fn set_self_collision_fn(&mut self, check: Box<dyn Fn(&[f64]) -> bool>) {
        self.self_collision_fn = Some(check);
    }

    pub fn set_link_axis(&mut self, ilink: usize, axis: Vector3<f64>) {
        self.links[ilink].axis = axis;
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.borrow().len()
    }

    pub fn set_resolutions(&mut self, resolutions: Vec<f64>) {
        self.resolutions = resolutions;
    }

    /// Changes the joint limits and notifies subscribers, as a real robot
    /// would after a model edit.
    pub fn set_limits(&mut self, lower: Vec<f64>, upper: Vec<f64>) {
        self.lower = lower;
        self.upper = upper;
        self.notify(ChangeFlags::JOINT_LIMITS);
    }

    /// Attaches a grabbed-body link driven by an existing DOF.
    pub fn grab_link(&mut self, link: TestLink) {
        self.links.push(link);
        self.notify(ChangeFlags::GRABBED);
    }

    fn notify(&self, flags: ChangeFlags) {
        let callbacks = self.callbacks.borrow();
        for (_, subscribed, callback) in callbacks.iter() {
            if subscribed.intersects(flags) {
                callback(self);
            }
        }
    }

    fn link_shape(&self, ilink: usize) -> (Isometry3<f32>, Cuboid) {
        let link = &self.links[ilink];
        (
            self.link_transform(ilink).cast::<f32>(),
            Cuboid::new(link.half_extents.cast::<f32>()),
        )
    }
}

impl RobotModel for TestRobot {
    fn active_dof_indices(&self) -> Vec<usize> {
        self.active.clone()
    }

    fn affine_dof_mask(&self) -> u32 {
        self.affine_mask
    }

    fn affine_rotation_axis(&self) -> Vector3<f64> {
        self.affine_axis
    }

    fn set_active_dofs(&mut self, indices: &[usize], affine_mask: u32, axis: Vector3<f64>) {
        self.active = indices.to_vec();
        self.affine_mask = affine_mask;
        self.affine_axis = axis;
    }

    fn active_dof_values(&self) -> Vec<f64> {
        self.active.iter().map(|&i| self.values[i]).collect()
    }

    fn set_active_dof_values(&mut self, values: &[f64]) {
        assert_eq!(values.len(), self.active.len());
        for (i, &value) in values.iter().enumerate() {
            let slot = self.active[i];
            self.values[slot] = value;
        }
    }

    fn dof_values(&self) -> Vec<f64> {
        self.values.clone()
    }

    fn active_dof_limits(&self) -> (Vec<f64>, Vec<f64>) {
        (
            self.active.iter().map(|&i| self.lower[i]).collect(),
            self.active.iter().map(|&i| self.upper[i]).collect(),
        )
    }

    fn active_dof_resolutions(&self) -> Vec<f64> {
        self.active.iter().map(|&i| self.resolutions[i]).collect()
    }

    fn link_count(&self) -> usize {
        self.links.len()
    }

    fn link_has_geometry(&self, ilink: usize) -> bool {
        self.links[ilink].has_geometry
    }

    fn link_is_grabbed(&self, ilink: usize) -> bool {
        self.links[ilink].grabbed
    }

    fn link_transform(&self, ilink: usize) -> Isometry3<f64> {
        let link = &self.links[ilink];
        let translation = link.axis * self.values[link.dof];
        Isometry3::from_parts(
            Translation3::new(translation.x, translation.y, translation.z),
            UnitQuaternion::identity(),
        )
    }

    fn link_local_aabb(&self, ilink: usize) -> LinkAabb {
        LinkAabb::new(Point3::origin(), self.links[ilink].half_extents)
    }

    fn joint_affects_link(&self, dof_index: usize, ilink: usize) -> bool {
        self.links[ilink].dof == dof_index
    }

    fn has_manipulator(&self, name: &str) -> bool {
        name == self.manip_name
    }

    fn manipulator_transform(&self, _name: &str) -> Isometry3<f64> {
        let mut tip = Vector3::zeros();
        for link in &self.links {
            tip += link.axis * self.values[link.dof];
        }
        Isometry3::from_parts(
            Translation3::new(tip.x, tip.y, tip.z),
            UnitQuaternion::identity(),
        ) * self.local_tool
    }

    fn manipulator_local_tool_transform(&self, _name: &str) -> Isometry3<f64> {
        self.local_tool
    }

    fn manipulator_jacobian(&self, _name: &str) -> DMatrix<f64> {
        let mut jacobian = DMatrix::zeros(3, self.active.len());
        for (column, &dof) in self.active.iter().enumerate() {
            let mut direction = Vector3::zeros();
            for link in &self.links {
                if link.dof == dof {
                    direction += link.axis;
                }
            }
            jacobian[(0, column)] = direction.x;
            jacobian[(1, column)] = direction.y;
            jacobian[(2, column)] = direction.z;
        }
        jacobian
    }

    fn check_env_collision(&self, report: &mut CollisionReport) -> bool {
        for (ilink, link) in self.links.iter().enumerate() {
            if !link.has_geometry {
                continue;
            }
            let (link_pos, link_shape) = self.link_shape(ilink);
            for (obstacle_pos, obstacle_shape) in &self.obstacles {
                if matches!(
                    contact(&link_pos, &link_shape, obstacle_pos, obstacle_shape, 0.0),
                    Ok(Some(_))
                ) {
                    report.colliding = Some((format!("link{}", ilink), "obstacle".to_string()));
                    return true;
                }
            }
        }
        false
    }

    fn check_self_collision(&self, report: &mut CollisionReport) -> bool {
        if let Some(check) = &self.self_collision_fn {
            if check(&self.values) {
                report.colliding = Some(("self".to_string(), "self".to_string()));
                return true;
            }
        }
        false
    }

    fn register_change_callback(
        &mut self,
        flags: ChangeFlags,
        callback: ChangeCallback,
    ) -> CallbackHandle {
        let id = self.next_callback_id;
        self.next_callback_id += 1;
        self.callbacks.borrow_mut().push((id, flags, callback));
        let weak = Rc::downgrade(&self.callbacks);
        CallbackHandle::new(move || {
            if let Some(callbacks) = weak.upgrade() {
                callbacks.borrow_mut().retain(|(cid, _, _)| *cid != id);
            }
        })
    }
}
