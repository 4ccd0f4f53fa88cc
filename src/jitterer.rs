//! Configuration jitterer.
//!
//! If the current robot configuration is infeasible (in collision or
//! violating tool constraints), jitters the active DOFs until a feasible
//! neighbor is found, optionally biased toward a workspace direction through
//! the Jacobian pseudo-inverse and null-space sampling. Every candidate is
//! re-checked under small perturbations so the result does not sit on a
//! constraint boundary.

use std::cell::RefCell;
use std::rc::Rc;

use nalgebra::{Isometry3, Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bias::BiasDecomposition;
use crate::constraints::{ToolDirectionConstraint, ToolPositionConstraint};
use crate::distance_cache::DistanceCache;
use crate::error::{Result, SamplingError};
use crate::robot_traits::{
    CallbackHandle, ChangeFlags, CollisionReport, LinkAabb, NeighStateFn, NeighStatus, RobotModel,
    RobotStateSaver, StatusCallback,
};

/// Pure-bias ray fractions probed on the first iterations of a biased jitter.
const RAY_INCREMENTS: [f64; 3] = [0.2, 0.5, 0.9];

/// Trimodal delta quantization thresholds for the Uniform(-1, 1) draw.
const JITTER_LOWER_THRESH: f64 = 0.2;
const JITTER_HIGHER_THRESH: f64 = 0.8;

/// The status callback runs once per this many loop iterations.
const STATUS_CALLBACK_PERIOD: u32 = 10;

const EPSILON: f64 = 1e-15;

/// Outcome of one `sample()` call, mirroring the -1/0/1 sentinel protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum JitterResult {
    /// The starting configuration already satisfied every constraint,
    /// perturbations included; the robot was left untouched.
    InitialSatisfied,
    /// The iteration budget ran out without an acceptable neighbor.
    Exhausted,
    /// A feasible neighbor was found (and committed to the robot unless
    /// `set_result_on_robot` is off).
    Found(Vec<f64>),
}

impl JitterResult {
    /// Numeric code of the legacy protocol: -1, 0 or 1.
    pub fn code(&self) -> i8 {
        match self {
            JitterResult::InitialSatisfied => -1,
            JitterResult::Exhausted => 0,
            JitterResult::Found(_) => 1,
        }
    }
}

/// Per-call rejection counts, one bucket per failure category.
#[derive(Debug, Default, Clone, Serialize)]
pub struct FailureCounter {
    #[serde(rename = "envCollision")]
    pub env_collision: u32,
    #[serde(rename = "selfCollision")]
    pub self_collision: u32,
    #[serde(rename = "toolDir")]
    pub tool_dir: u32,
    #[serde(rename = "toolPosition")]
    pub tool_position: u32,
    #[serde(rename = "neighState")]
    pub neigh_state: u32,
    #[serde(rename = "linkDistThresh")]
    pub link_dist_thresh: u32,
    #[serde(rename = "cacheHit")]
    pub cache_hit: u32,
    #[serde(rename = "sameSamples")]
    pub same_samples: u32,
}

impl FailureCounter {
    fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn total(&self) -> u32 {
        self.env_collision
            + self.self_collision
            + self.tool_dir
            + self.tool_position
            + self.neigh_state
            + self.link_dist_thresh
            + self.cache_hit
            + self.same_samples
    }
}

enum Violation {
    ToolDirection,
    ToolPosition,
    EnvCollision,
    SelfCollision,
}

/// Limits and tracked links, refreshed by robot change callbacks.
#[derive(Default)]
struct SharedState {
    lower: Vec<f64>,
    upper: Vec<f64>,
    range: Vec<f64>,
    /// Link indices tracked by the excursion test.
    links: Vec<usize>,
    link_aabbs: Vec<LinkAabb>,
}

impl SharedState {
    fn refresh_limits(&mut self, robot: &dyn RobotModel) {
        let (lower, upper) = robot.active_dof_limits();
        self.range = lower
            .iter()
            .zip(&upper)
            .map(|(lo, hi)| hi - lo)
            .collect();
        self.lower = lower;
        self.upper = upper;
    }

    fn refresh_links(&mut self, robot: &dyn RobotModel, active: &[usize], affine_mask: u32) {
        self.links.clear();
        for ilink in 0..robot.link_count() {
            if !robot.link_has_geometry(ilink) {
                // Virtual links would poison the AABB excursion test.
                continue;
            }
            if robot.link_is_grabbed(ilink)
                || affine_mask != 0
                || active.iter().any(|&dof| robot.joint_affects_link(dof, ilink))
            {
                self.links.push(ilink);
            }
        }
        self.link_aabbs = self
            .links
            .iter()
            .map(|&ilink| robot.link_local_aabb(ilink))
            .collect();
    }
}

pub struct Jitterer {
    robot: Rc<RefCell<dyn RobotModel>>,
    shared: Rc<RefCell<SharedState>>,
    active_indices: Vec<usize>,
    affine_mask: u32,
    affine_axis: Vector3<f64>,

    max_iterations: u32,
    max_jitter: f64,
    perturbation: f64,
    link_dist_thresh: f64,
    neigh_dist_thresh: f64,
    set_result_on_robot: bool,
    reset_iterations_on_sample: bool,

    cache: Option<DistanceCache>,
    rng: StdRng,
    seed: u64,
    /// Iterations consumed since the last seed reset; carries across
    /// `sample()` calls when `reset_iterations_on_sample` is off so repeated
    /// calls skip the already-tested configurations.
    num_iterations: u32,
    counter: FailureCounter,
    report: CollisionReport,

    neigh_state_fn: Option<NeighStateFn>,
    status_fn: Option<StatusCallback>,

    manip_name: Option<String>,
    local_tool: Isometry3<f64>,
    constraint_tool_direction: Option<ToolDirectionConstraint>,
    constraint_tool_position: Option<ToolPositionConstraint>,

    bias_direction: Vector3<f64>,
    bias: Option<BiasDecomposition>,
    use_biasing: bool,
    null_sample_prob: f64,
    null_bias_sample_prob: f64,
    delta_sample_prob: f64,

    curdof: Vec<f64>,
    fulldof: Vec<f64>,
    original_transforms: Vec<Isometry3<f64>>,
    original_inv_transforms: Vec<Isometry3<f64>>,

    _limits_callback: CallbackHandle,
    _grabbed_callback: CallbackHandle,
}

impl Jitterer {
    pub fn new(robot: Rc<RefCell<dyn RobotModel>>, use_cache: bool) -> Result<Self> {
        let (active_indices, affine_mask, affine_axis, resolutions, fulldof) = {
            let r = robot.borrow();
            (
                r.active_dof_indices(),
                r.affine_dof_mask(),
                r.affine_rotation_axis(),
                r.active_dof_resolutions(),
                r.dof_values(),
            )
        };

        let shared = Rc::new(RefCell::new(SharedState::default()));
        {
            let r = robot.borrow();
            let mut s = shared.borrow_mut();
            s.refresh_limits(&*r);
            s.refresh_links(&*r, &active_indices, affine_mask);
        }

        let limits_callback = {
            let weak = Rc::downgrade(&shared);
            robot.borrow_mut().register_change_callback(
                ChangeFlags::JOINT_LIMITS,
                Box::new(move |r| {
                    if let Some(shared) = weak.upgrade() {
                        shared.borrow_mut().refresh_limits(r);
                    }
                }),
            )
        };
        let grabbed_callback = {
            let weak = Rc::downgrade(&shared);
            let active = active_indices.clone();
            robot.borrow_mut().register_change_callback(
                ChangeFlags::GRABBED,
                Box::new(move |r| {
                    if let Some(shared) = weak.upgrade() {
                        shared.borrow_mut().refresh_links(r, &active, affine_mask);
                    }
                }),
            )
        };

        let cache = use_cache.then(|| DistanceCache::from_resolutions(&resolutions));

        let mut jitterer = Self {
            robot,
            shared,
            active_indices,
            affine_mask,
            affine_axis,
            max_iterations: 5000,
            max_jitter: 0.02,
            perturbation: 1e-5,
            link_dist_thresh: 0.02,
            neigh_dist_thresh: 1.0,
            set_result_on_robot: true,
            reset_iterations_on_sample: true,
            cache,
            rng: StdRng::seed_from_u64(0),
            seed: 0,
            num_iterations: 0,
            counter: FailureCounter::default(),
            report: CollisionReport::default(),
            neigh_state_fn: None,
            status_fn: None,
            manip_name: None,
            local_tool: Isometry3::identity(),
            constraint_tool_direction: None,
            constraint_tool_position: None,
            bias_direction: Vector3::zeros(),
            bias: None,
            use_biasing: false,
            null_sample_prob: 0.60,
            null_bias_sample_prob: 0.50,
            delta_sample_prob: 0.50,
            curdof: Vec::new(),
            fulldof,
            original_transforms: Vec::new(),
            original_inv_transforms: Vec::new(),
            _limits_callback: limits_callback,
            _grabbed_callback: grabbed_callback,
        };
        jitterer.update_cache_max_distance();
        Ok(jitterer)
    }

    pub fn dof(&self) -> usize {
        self.shared.borrow().lower.len()
    }

    pub fn limits(&self) -> (Vec<f64>, Vec<f64>) {
        let s = self.shared.borrow();
        (s.lower.clone(), s.upper.clone())
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
        self.num_iterations = 0;
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn max_jitter(&self) -> f64 {
        self.max_jitter
    }

    pub fn set_max_jitter(&mut self, max_jitter: f64) -> Result<()> {
        if !max_jitter.is_finite() || max_jitter < 0.0 {
            return Err(SamplingError::invalid_argument(format!(
                "max jitter {} must be non-negative",
                max_jitter
            )));
        }
        self.max_jitter = max_jitter;
        self.update_cache_max_distance();
        Ok(())
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn set_max_iterations(&mut self, max_iterations: u32) {
        self.max_iterations = max_iterations;
    }

    pub fn perturbation(&self) -> f64 {
        self.perturbation
    }

    pub fn set_perturbation(&mut self, perturbation: f64) -> Result<()> {
        if !perturbation.is_finite() || perturbation < 0.0 {
            return Err(SamplingError::invalid_argument(format!(
                "perturbation {} must be non-negative",
                perturbation
            )));
        }
        self.perturbation = perturbation;
        Ok(())
    }

    pub fn link_dist_thresh(&self) -> f64 {
        self.link_dist_thresh
    }

    pub fn set_link_dist_thresh(&mut self, link_dist_thresh: f64) -> Result<()> {
        if !link_dist_thresh.is_finite() || link_dist_thresh < 0.0 {
            return Err(SamplingError::invalid_argument(format!(
                "link distance threshold {} must be non-negative",
                link_dist_thresh
            )));
        }
        self.link_dist_thresh = link_dist_thresh;
        Ok(())
    }

    pub fn neigh_dist_thresh(&self) -> f64 {
        self.neigh_dist_thresh
    }

    pub fn set_neigh_dist_thresh(&mut self, neigh_dist_thresh: f64) -> Result<()> {
        if !neigh_dist_thresh.is_finite() || neigh_dist_thresh <= 0.0 {
            return Err(SamplingError::invalid_argument(format!(
                "neighbor distance threshold {} must be positive",
                neigh_dist_thresh
            )));
        }
        self.neigh_dist_thresh = neigh_dist_thresh;
        Ok(())
    }

    pub fn set_result_on_robot(&mut self, set_result_on_robot: bool) {
        self.set_result_on_robot = set_result_on_robot;
    }

    pub fn set_reset_iterations_on_sample(&mut self, reset: bool) {
        self.reset_iterations_on_sample = reset;
    }

    pub fn set_neigh_state_fn(&mut self, neigh_state_fn: Option<NeighStateFn>) {
        self.neigh_state_fn = neigh_state_fn;
    }

    pub fn set_status_callback(&mut self, status_fn: Option<StatusCallback>) {
        self.status_fn = status_fn;
    }

    pub fn failures(&self) -> &FailureCounter {
        &self.counter
    }

    #[cfg(test)]
    pub(crate) fn tracked_link_count(&self) -> usize {
        self.shared.borrow().links.len()
    }

    pub fn cache(&self) -> Option<&DistanceCache> {
        self.cache.as_ref()
    }

    pub(crate) fn manip_name(&self) -> Option<&str> {
        self.manip_name.as_deref()
    }

    pub(crate) fn local_tool(&self) -> &Isometry3<f64> {
        &self.local_tool
    }

    pub(crate) fn fulldof(&self) -> &[f64] {
        &self.fulldof
    }

    pub(crate) fn bias_params(&self) -> (bool, Vector3<f64>, f64, f64, f64) {
        (
            self.use_biasing,
            self.bias_direction,
            self.null_sample_prob,
            self.null_bias_sample_prob,
            self.delta_sample_prob,
        )
    }

    pub(crate) fn tool_direction_constraint(&self) -> Option<&ToolDirectionConstraint> {
        self.constraint_tool_direction.as_ref()
    }

    pub(crate) fn tool_position_constraint(&self) -> Option<&ToolPositionConstraint> {
        self.constraint_tool_position.as_ref()
    }

    pub(crate) fn current_option_values(&self) -> (f64, u32, f64, f64, f64, bool) {
        (
            self.max_jitter,
            self.max_iterations,
            self.link_dist_thresh,
            self.perturbation,
            self.neigh_dist_thresh,
            self.reset_iterations_on_sample,
        )
    }

    /// Constrains the manipulator axis to a cone. Resets the visited cache
    /// since previously valid nodes may now violate the constraint.
    pub fn set_constraint_tool_direction(
        &mut self,
        manip: &str,
        constraint: ToolDirectionConstraint,
    ) -> Result<()> {
        if !self.robot.borrow().has_manipulator(manip) {
            return Err(SamplingError::invalid_argument(format!(
                "robot has no manipulator named '{}'",
                manip
            )));
        }
        self.manip_name = Some(manip.to_string());
        self.constraint_tool_direction = Some(constraint);
        if let Some(cache) = &mut self.cache {
            cache.reset();
        }
        Ok(())
    }

    pub fn clear_constraint_tool_direction(&mut self) {
        if self.constraint_tool_direction.take().is_some() {
            if let Some(cache) = &mut self.cache {
                cache.reset();
            }
        }
    }

    /// Constrains the manipulator translation to an oriented box. Resets the
    /// visited cache.
    pub fn set_constraint_tool_position(
        &mut self,
        manip: &str,
        constraint: ToolPositionConstraint,
    ) -> Result<()> {
        if !self.robot.borrow().has_manipulator(manip) {
            return Err(SamplingError::invalid_argument(format!(
                "robot has no manipulator named '{}'",
                manip
            )));
        }
        self.manip_name = Some(manip.to_string());
        self.constraint_tool_position = Some(constraint);
        if let Some(cache) = &mut self.cache {
            cache.reset();
        }
        Ok(())
    }

    pub fn clear_constraint_tool_position(&mut self) {
        if self.constraint_tool_position.take().is_some() {
            if let Some(cache) = &mut self.cache {
                cache.reset();
            }
        }
    }

    /// Biases sampling so the manipulator tends to move along `direction`;
    /// the magnitude of `direction` is the maximum bias distance.
    #[cfg(feature = "jacobian-bias")]
    pub fn set_manipulator_bias(
        &mut self,
        manip: &str,
        direction: Vector3<f64>,
        null_sample_prob: f64,
        null_bias_sample_prob: f64,
        delta_sample_prob: f64,
    ) -> Result<()> {
        if !self.robot.borrow().has_manipulator(manip) {
            return Err(SamplingError::invalid_argument(format!(
                "robot has no manipulator named '{}'",
                manip
            )));
        }
        if direction.norm_squared() <= EPSILON {
            return Err(SamplingError::invalid_argument(
                "bias direction must be nonzero",
            ));
        }
        self.manip_name = Some(manip.to_string());
        self.bias_direction = direction;
        self.bias = None;
        self.null_sample_prob = null_sample_prob;
        self.null_bias_sample_prob = null_bias_sample_prob;
        self.delta_sample_prob = delta_sample_prob;
        self.use_biasing = true;
        self.init_robot_state()?;
        debug!(
            null_sample_prob,
            null_bias_sample_prob, delta_sample_prob, "manipulator bias set"
        );
        Ok(())
    }

    #[cfg(not(feature = "jacobian-bias"))]
    pub fn set_manipulator_bias(
        &mut self,
        _manip: &str,
        _direction: Vector3<f64>,
        _null_sample_prob: f64,
        _null_bias_sample_prob: f64,
        _delta_sample_prob: f64,
    ) -> Result<()> {
        Err(SamplingError::CommandNotSupported(
            "manipulator bias requires the jacobian-bias feature".to_string(),
        ))
    }

    /// Jitters the current configuration until it satisfies all constraints.
    ///
    /// Returns [`JitterResult::InitialSatisfied`] when the starting point
    /// already passes every check (including the perturbation probes),
    /// [`JitterResult::Found`] with the accepted configuration, or
    /// [`JitterResult::Exhausted`] after `max_iterations` rejections. The
    /// robot is restored to its entry state on every path except a committed
    /// success.
    pub fn sample(&mut self) -> Result<JitterResult> {
        let mut saver = RobotStateSaver::new(self.robot.clone());
        self.init_robot_state()?;
        let link_dist_thresh = self.link_dist_thresh;
        let link_dist_thresh2 = link_dist_thresh * link_dist_thresh;

        if self.reset_iterations_on_sample {
            self.num_iterations = 0;
        }

        // Very small angular changes can flip collision results, so every
        // candidate is probed at +perturbation, -perturbation and 0. The zero
        // probe runs last so an accepted robot already holds the result.
        let perturbations: Vec<f64> = if self.perturbation > 0.0 {
            vec![self.perturbation, -self.perturbation, 0.0]
        } else {
            vec![0.0]
        };

        let dof = self.curdof.len();
        let (lower, upper) = self.limits();
        let mut newdof = vec![0.0; dof];
        let mut newdof2 = vec![0.0; dof];
        let mut deltadof = vec![0.0; dof];

        self.counter.reset();

        if self.num_iterations == 0 {
            let mut collision = false;
            let mut constraint_failed = false;
            for &perturb in &perturbations {
                for i in 0..dof {
                    newdof[i] = (self.curdof[i] + perturb).clamp(lower[i], upper[i]);
                }
                self.robot.borrow_mut().set_active_dof_values(&newdof);
                match self.evaluate_state() {
                    Some(Violation::ToolDirection) => {
                        self.counter.tool_dir += 1;
                        constraint_failed = true;
                        break;
                    }
                    Some(Violation::ToolPosition) => {
                        self.counter.tool_position += 1;
                        constraint_failed = true;
                        break;
                    }
                    Some(Violation::EnvCollision) => {
                        self.counter.env_collision += 1;
                        collision = true;
                        break;
                    }
                    Some(Violation::SelfCollision) => {
                        self.counter.self_collision += 1;
                        collision = true;
                        break;
                    }
                    None => {}
                }
            }

            if (!collision && !constraint_failed) || self.max_jitter <= 0.0 {
                return Ok(JitterResult::InitialSatisfied);
            }
            self.num_iterations += 1;
        }

        if let Some(cache) = &mut self.cache {
            cache.insert(&self.curdof, self.neigh_dist_thresh)?;
        }

        let use_biasing = self.use_biasing && self.bias.is_some();
        let ramp_iterations = self.max_iterations / 2;
        let inv_max_iterations = 2.0 / self.max_iterations as f64;
        let bias_magnitude = self.bias_direction.norm();

        for iter in 0..self.max_iterations {
            if iter % STATUS_CALLBACK_PERIOD == 0 {
                if let Some(callback) = self.status_fn.as_mut() {
                    callback(iter)?;
                }
            }
            self.num_iterations += 1;

            let iray = iter as i64 + self.num_iterations as i64 - 2;
            let pure_bias_ray =
                use_biasing && iray >= 0 && (iray as usize) < RAY_INCREMENTS.len();
            if pure_bias_ray {
                // Check samples directly along the bias ray first.
                if let Some(bias) = &self.bias {
                    let inc = RAY_INCREMENTS[iray as usize];
                    for j in 0..dof {
                        newdof[j] = self.curdof[j] + inc * bias.dof_direction[j];
                    }
                }
            } else {
                // Ramp the jitter magnitude up over the first half of the
                // iteration budget.
                let jitter = if iter < ramp_iterations {
                    self.max_jitter * (iter + 1) as f64 * inv_max_iterations
                } else {
                    self.max_jitter
                };

                let mut sample_null = false;
                let mut sample_bias = false;
                let mut sample_delta = false;
                if use_biasing && self.rng.gen::<f64>() < self.null_sample_prob {
                    sample_null = true;
                }
                if use_biasing && self.rng.gen::<f64>() < self.null_bias_sample_prob {
                    sample_bias = true;
                }
                if (!sample_null && !sample_bias) || self.rng.gen::<f64>() < self.delta_sample_prob
                {
                    sample_delta = true;
                }

                if sample_delta {
                    for j in 0..dof {
                        let f = 2.0 * self.rng.gen::<f64>() - 1.0;
                        deltadof[j] = if f.abs() < JITTER_LOWER_THRESH {
                            0.0
                        } else if f < -JITTER_HIGHER_THRESH {
                            -jitter
                        } else if f > JITTER_HIGHER_THRESH {
                            jitter
                        } else {
                            jitter * f
                        };
                    }
                }

                if !sample_bias && !sample_null && !sample_delta {
                    self.counter.same_samples += 1;
                    continue;
                }

                let null_multiplier = (2.0 * link_dist_thresh).max(bias_magnitude);
                newdof.copy_from_slice(&self.curdof);
                if sample_bias {
                    if let Some(bias) = &self.bias {
                        let u: f64 = self.rng.gen();
                        for k in 0..dof {
                            newdof[k] += u * bias.dof_direction[k];
                        }
                    }
                }
                if sample_null {
                    if let Some(bias) = &self.bias {
                        for null_vector in &bias.nullspace {
                            let x = (2.0 * self.rng.gen::<f64>() - 1.0) * null_multiplier;
                            for k in 0..dof {
                                newdof[k] += x * null_vector[k];
                            }
                        }
                    }
                }
                if sample_delta {
                    for k in 0..dof {
                        newdof[k] += deltadof[k];
                    }
                }
            }

            for j in 0..dof {
                newdof[j] = newdof[j].clamp(lower[j], upper[j]);
            }

            // Project the step onto the constraint manifold when a neighbor
            // function is registered; the perturbation probes below bypass it
            // on purpose.
            if self.neigh_state_fn.is_some() {
                for j in 0..dof {
                    deltadof[j] = newdof[j] - self.curdof[j];
                }
                newdof.copy_from_slice(&self.curdof);
                self.robot.borrow_mut().set_active_dof_values(&newdof);
                if let Some(project) = self.neigh_state_fn.as_mut() {
                    if project(&mut newdof, &deltadof) == NeighStatus::Failed {
                        self.counter.neigh_state += 1;
                        continue;
                    }
                }
            }

            if let Some(cache) = &self.cache {
                if cache.find_nearest(&newdof, self.neigh_dist_thresh).is_some() {
                    self.counter.cache_hit += 1;
                    continue;
                }
            }

            self.robot.borrow_mut().set_active_dof_values(&newdof);

            if link_dist_thresh > 0.0
                && !self.links_within_excursion(link_dist_thresh2, use_biasing)
            {
                self.counter.link_dist_thresh += 1;
                continue;
            }

            let mut collision = false;
            let mut constraint_failed = false;
            for &perturb in &perturbations {
                for idof in 0..dof {
                    newdof2[idof] = (newdof[idof] + perturb).clamp(lower[idof], upper[idof]);
                }
                self.robot.borrow_mut().set_active_dof_values(&newdof2);
                match self.evaluate_state() {
                    Some(Violation::ToolDirection) => {
                        self.counter.tool_dir += 1;
                        constraint_failed = true;
                        break;
                    }
                    Some(Violation::ToolPosition) => {
                        self.counter.tool_position += 1;
                        constraint_failed = true;
                        break;
                    }
                    Some(Violation::EnvCollision) => {
                        self.counter.env_collision += 1;
                        collision = true;
                        break;
                    }
                    Some(Violation::SelfCollision) => {
                        self.counter.self_collision += 1;
                        collision = true;
                        break;
                    }
                    None => {}
                }
            }

            if !collision && !constraint_failed {
                // The last perturbation was zero, so the robot already holds
                // the accepted configuration.
                if self.set_result_on_robot {
                    saver.release();
                }
                debug!(
                    iterations = iter + 1,
                    env_collision = self.counter.env_collision,
                    self_collision = self.counter.self_collision,
                    tool_dir = self.counter.tool_dir,
                    tool_position = self.counter.tool_position,
                    neigh_state = self.counter.neigh_state,
                    cache_hit = self.counter.cache_hit,
                    link_dist = self.counter.link_dist_thresh,
                    "jitter succeeded"
                );
                return Ok(JitterResult::Found(newdof));
            }
        }

        info!(
            iterations = self.num_iterations,
            max_iterations = self.max_iterations,
            env_collision = self.counter.env_collision,
            self_collision = self.counter.self_collision,
            tool_dir = self.counter.tool_dir,
            tool_position = self.counter.tool_position,
            neigh_state = self.counter.neigh_state,
            cache_hit = self.counter.cache_hit,
            same_samples = self.counter.same_samples,
            link_dist = self.counter.link_dist_thresh,
            "jitter exhausted the iteration budget"
        );
        Ok(JitterResult::Exhausted)
    }

    /// Repeatedly jitters, collecting the accepted configurations until a
    /// call does not produce a new one.
    pub fn sample_sequence(&mut self, num: usize) -> Result<Vec<Vec<f64>>> {
        let mut samples = Vec::new();
        for _ in 0..num {
            match self.sample()? {
                JitterResult::Found(configuration) => samples.push(configuration),
                _ => break,
            }
        }
        Ok(samples)
    }

    /// Snapshots the robot for one `sample()` call: active DOF values, link
    /// transforms with inverses, the manipulator tool pose, and the bias
    /// decomposition when biasing is active. Also re-reads link AABBs (the
    /// geometry may have changed) and invalidates the visited cache.
    fn init_robot_state(&mut self) -> Result<()> {
        {
            let mut robot = self.robot.borrow_mut();
            robot.set_active_dofs(&self.active_indices, self.affine_mask, self.affine_axis);
            self.curdof = robot.active_dof_values();
            self.fulldof = robot.dof_values();
        }
        let links: Vec<usize> = self.shared.borrow().links.clone();
        {
            let robot = self.robot.borrow();
            if let Some(name) = &self.manip_name {
                self.local_tool = robot.manipulator_local_tool_transform(name);
            }
            self.original_transforms = links
                .iter()
                .map(|&ilink| robot.link_transform(ilink))
                .collect();
            self.original_inv_transforms = self
                .original_transforms
                .iter()
                .map(|t| t.inverse())
                .collect();
            #[cfg(feature = "jacobian-bias")]
            {
                // Recomputed on every call: biasing may be toggled between
                // samples and the Jacobian depends on the current state.
                if let Some(name) = self.manip_name.clone() {
                    let jacobian = robot.manipulator_jacobian(&name);
                    self.bias = BiasDecomposition::compute(&jacobian, &self.bias_direction);
                    if self.use_biasing && self.bias.is_none() {
                        warn!("failed to decompose the manipulator jacobian, biasing disabled");
                    }
                }
            }
        }
        {
            let robot = self.robot.borrow();
            let mut shared = self.shared.borrow_mut();
            shared.link_aabbs = links
                .iter()
                .map(|&ilink| robot.link_local_aabb(ilink))
                .collect();
        }
        if let Some(cache) = &mut self.cache {
            cache.reset();
        }
        Ok(())
    }

    /// Evaluates the current robot state against tool constraints and
    /// collisions, in that fixed order, returning the first violation.
    fn evaluate_state(&mut self) -> Option<Violation> {
        let robot = self.robot.borrow();
        if let Some(name) = &self.manip_name {
            let tool = robot.manipulator_transform(name);
            if let Some(constraint) = &self.constraint_tool_direction {
                if !constraint.is_satisfied(&tool) {
                    return Some(Violation::ToolDirection);
                }
            }
            if let Some(constraint) = &self.constraint_tool_position {
                if !constraint.is_satisfied(&tool) {
                    return Some(Violation::ToolPosition);
                }
            }
        }
        self.report.clear();
        if robot.check_env_collision(&mut self.report) {
            return Some(Violation::EnvCollision);
        }
        if robot.check_self_collision(&mut self.report) {
            return Some(Violation::SelfCollision);
        }
        None
    }

    /// Ellipsoidal Cartesian-excursion test on every tracked link.
    ///
    /// For the frame change `dT = T_orig^-1 * T_new` and each AABB corner
    /// displacement `v = dT*corner - corner`, checks
    /// `(L^2 - |b|^2)(b.v)^2 + |v|^2 |b|^4 <= L^2 |b|^4`, an ellipsoid
    /// aligned with the bias `b` (a sphere of radius L when unbiased).
    fn links_within_excursion(&self, link_dist_thresh2: f64, use_biasing: bool) -> bool {
        let robot = self.robot.borrow();
        let shared = self.shared.borrow();
        for (itracked, &ilink) in shared.links.iter().enumerate() {
            let new_transform = robot.link_transform(ilink);
            let delta = self.original_inv_transforms[itracked] * new_transform;
            let m = *delta.rotation.to_rotation_matrix().matrix() - Matrix3::identity();
            let aabb = &shared.link_aabbs[itracked];

            let box_right =
                Vector3::new(m[(0, 0)], m[(1, 0)], m[(2, 0)]) * aabb.extents.x;
            let box_up = Vector3::new(m[(0, 1)], m[(1, 1)], m[(2, 1)]) * aabb.extents.y;
            let box_dir = Vector3::new(m[(0, 2)], m[(1, 2)], m[(2, 2)]) * aabb.extents.z;
            let box_pos = delta.transform_point(&aabb.center) - aabb.center;

            let b = if use_biasing {
                // Bias expressed in the link frame at the seed configuration.
                self.original_inv_transforms[itracked].rotation * self.bias_direction
            } else {
                Vector3::new(0.0, 0.0, self.link_dist_thresh)
            };
            let b2 = b.norm_squared();
            let b4 = b2 * b2;
            let rhs = b4 * link_dist_thresh2;

            for sx in [-1.0f64, 1.0] {
                for sy in [-1.0f64, 1.0] {
                    for sz in [-1.0f64, 1.0] {
                        let v = box_pos + box_right * sx + box_up * sy + box_dir * sz;
                        let bv = v.dot(&b);
                        let flen2 = (link_dist_thresh2 - b2) * bv * bv + v.norm_squared() * b4;
                        if flen2 > rhs {
                            return false;
                        }
                    }
                }
            }
        }
        true
    }

    /// Cache max distance bound: the weighted diagonal of the limit box.
    fn update_cache_max_distance(&mut self) {
        let range = self.shared.borrow().range.clone();
        if let Some(cache) = &mut self.cache {
            let mut max_distance = 0.0;
            for (r, w) in range.iter().zip(cache.weights()) {
                let f = r * w;
                max_distance += f * f;
            }
            let max_distance = max_distance.sqrt();
            if max_distance > cache.max_distance() + EPSILON {
                cache.set_max_distance(max_distance);
            }
        }
    }
}

impl std::fmt::Debug for Jitterer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jitterer")
            .field("max_jitter", &self.max_jitter)
            .field("max_iterations", &self.max_iterations)
            .field("perturbation", &self.perturbation)
            .field("link_dist_thresh", &self.link_dist_thresh)
            .field("neigh_dist_thresh", &self.neigh_dist_thresh)
            .field("use_biasing", &self.use_biasing)
            .finish()
    }
}
