//! Generic time-parameterized trajectory container.
//!
//! A trajectory is a configuration specification plus a flat row-major
//! waypoint buffer. Interpolators are resolved per group at init time and
//! sampling dispatches over them; cumulative-time caches are rebuilt lazily
//! after mutations.

use std::cell::{Cell, RefCell};

use tracing::warn;

use crate::error::{Result, SamplingError};
use crate::interpolators::{
    direction_slerp, quat_from_axis_angle, quat_inverse, quat_multiply, quat_scale, quat_slerp,
    resolve_group, GroupInterpolator, GroupValidator, IkParamType,
};
use crate::serialization::Readable;
use crate::spec::{
    interpolation_derivative, interpolation_integral, ConfigurationSpec, Group,
};

pub(crate) const EPSILON: f64 = 1e-15;
/// EPSILON^0.9, the per-element error bound of linear segments.
pub(crate) const EPSILON_LINEAR: f64 = 3.162_277_660_168_379_5e-14;

/// Cumulative and inverse-delta time columns, rebuilt lazily.
#[derive(Debug, Default, Clone)]
pub(crate) struct TimeCache {
    pub(crate) accum: Vec<f64>,
    pub(crate) delta_inv: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    pub(crate) spec: ConfigurationSpec,
    pub(crate) interpolators: Vec<Option<GroupInterpolator>>,
    pub(crate) validators: Vec<Option<GroupValidator>>,
    /// Per-DOF column of the derivative used by the interpolator, or a
    /// negative marker: -1 unresolved and unneeded, -2/-3 unresolved but
    /// needed at the group's interpolation order.
    pub(crate) deriv_offsets: Vec<i32>,
    pub(crate) dd_offsets: Vec<i32>,
    pub(crate) ddd_offsets: Vec<i32>,
    pub(crate) integral_offsets: Vec<i32>,
    pub(crate) ii_offsets: Vec<i32>,
    pub(crate) time_offset: Option<usize>,
    pub(crate) data: Vec<f64>,
    pub(crate) description: String,
    pub(crate) readables: Vec<Readable>,
    pub(crate) times: RefCell<TimeCache>,
    pub(crate) changed: Cell<bool>,
    pub(crate) verified: Cell<bool>,
    pub(crate) initialized: bool,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes the trajectory with a specification: reorders groups by
    /// semantic rank, resolves interpolators and cross-group offsets, and
    /// clears all waypoints. Re-initializing with the identical spec skips
    /// the resolution work.
    pub fn init(
        &mut self,
        spec: ConfigurationSpec,
        reserve_rows: usize,
        reserve_time_caches: bool,
    ) -> Result<()> {
        if !(self.initialized && self.spec == spec) {
            spec.validate()?;
            self.initialized = false;
            let mut spec = spec;
            spec.sort_groups_by_rank();
            self.time_offset = spec
                .groups
                .iter()
                .find(|g| g.name == "deltatime")
                .map(|g| g.offset);
            self.spec = spec;
            self.initialize_group_functions();
        }
        self.data.clear();
        {
            let mut times = self.times.borrow_mut();
            times.accum.clear();
            times.delta_inv.clear();
            if reserve_rows > 0 && reserve_time_caches {
                times.accum.reserve(reserve_rows);
                times.delta_inv.reserve(reserve_rows);
            }
        }
        if reserve_rows > 0 {
            let dof = self.spec.dof();
            self.data.reserve(reserve_rows * dof);
        }
        self.changed.set(true);
        self.verified.set(false);
        self.initialized = true;
        Ok(())
    }

    pub fn spec(&self) -> &ConfigurationSpec {
        &self.spec
    }

    pub fn dof(&self) -> usize {
        self.spec.dof()
    }

    pub fn num_waypoints(&self) -> usize {
        let dof = self.spec.dof();
        if dof == 0 {
            0
        } else {
            self.data.len() / dof
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn readables(&self) -> &[Readable] {
        &self.readables
    }

    /// Attaches or replaces (by id) an opaque readable sidecar.
    pub fn set_readable(&mut self, readable: Readable) {
        if let Some(existing) = self.readables.iter_mut().find(|r| r.id == readable.id) {
            *existing = readable;
        } else {
            self.readables.push(readable);
        }
    }

    pub fn clear_readables(&mut self) {
        self.readables.clear();
    }

    fn assert_init(&self) -> Result<()> {
        if !self.initialized {
            return Err(SamplingError::invalid_state(
                "trajectory accessed before initialization",
            ));
        }
        Ok(())
    }

    pub fn clear_waypoints(&mut self) {
        if self.initialized && !self.data.is_empty() {
            self.data.clear();
            self.changed.set(true);
            self.verified.set(false);
        }
    }

    /// Inserts waypoint rows at `index`. With `overwrite`, existing rows from
    /// `index` on are overwritten and any remainder is appended; otherwise
    /// the rows are spliced in.
    pub fn insert(&mut self, index: usize, data: &[f64], overwrite: bool) -> Result<()> {
        self.assert_init()?;
        if data.is_empty() {
            return Ok(());
        }
        let dof = self.spec.dof();
        if dof == 0 {
            return Err(SamplingError::invalid_state("trajectory has zero dof"));
        }
        if data.len() % dof != 0 {
            return Err(SamplingError::invalid_argument(format!(
                "data of size {} does not divide dof {}",
                data.len(),
                dof
            )));
        }
        if index * dof > self.data.len() {
            return Err(SamplingError::invalid_argument(format!(
                "insert index {} is past the last waypoint {}",
                index,
                self.num_waypoints()
            )));
        }
        if overwrite && index * dof < self.data.len() {
            let start = index * dof;
            let ncopy = data.len().min(self.data.len() - start);
            self.data[start..start + ncopy].copy_from_slice(&data[..ncopy]);
            if ncopy < data.len() {
                self.data.extend_from_slice(&data[ncopy..]);
            }
        } else {
            let at = index * dof;
            self.data.splice(at..at, data.iter().copied());
        }
        self.changed.set(true);
        Ok(())
    }

    /// Inserts rows laid out by a different specification, converting each
    /// group through its compatible counterpart.
    pub fn insert_with_spec(
        &mut self,
        index: usize,
        data: &[f64],
        source_spec: &ConfigurationSpec,
        overwrite: bool,
    ) -> Result<()> {
        self.assert_init()?;
        if data.is_empty() {
            return Ok(());
        }
        if *source_spec == self.spec {
            return self.insert(index, data, overwrite);
        }
        let source_dof = source_spec.dof();
        if source_dof == 0 {
            return Err(SamplingError::invalid_argument("source spec has zero dof"));
        }
        if data.len() % source_dof != 0 {
            return Err(SamplingError::invalid_argument(format!(
                "data of size {} does not divide source dof {}",
                data.len(),
                source_dof
            )));
        }
        let dof = self.spec.dof();
        if index * dof > self.data.len() {
            return Err(SamplingError::invalid_argument(format!(
                "insert index {} is past the last waypoint {}",
                index,
                self.num_waypoints()
            )));
        }
        let points = data.len() / source_dof;
        let mut index = index;
        let mut source_index = 0;
        if overwrite && index * dof < self.data.len() {
            let copy_points = points.min(self.data.len() / dof - index);
            let start = index * dof;
            ConfigurationSpec::convert_data(
                &mut self.data[start..start + copy_points * dof],
                &self.spec,
                data,
                source_spec,
                copy_points,
                false,
            )?;
            source_index = copy_points * source_dof;
            index += copy_points;
        }
        if source_index < data.len() {
            let rem_points = (data.len() - source_index) / source_dof;
            let mut converted = vec![0.0; rem_points * dof];
            ConfigurationSpec::convert_data(
                &mut converted,
                &self.spec,
                &data[source_index..],
                source_spec,
                rem_points,
                true,
            )?;
            let at = index * dof;
            self.data.splice(at..at, converted.into_iter());
        }
        self.changed.set(true);
        Ok(())
    }

    /// Removes waypoint rows `[start, end)`.
    pub fn remove(&mut self, start: usize, end: usize) -> Result<()> {
        self.assert_init()?;
        if start == end {
            return Ok(());
        }
        let dof = self.spec.dof();
        if start > end || end * dof > self.data.len() {
            return Err(SamplingError::invalid_argument(format!(
                "cannot remove waypoints [{}, {}) of {}",
                start,
                end,
                self.num_waypoints()
            )));
        }
        self.data.drain(start * dof..end * dof);
        self.changed.set(true);
        Ok(())
    }

    pub fn waypoint(&self, index: usize) -> Result<Vec<f64>> {
        self.waypoints(index, index + 1)
    }

    pub fn waypoints(&self, start: usize, end: usize) -> Result<Vec<f64>> {
        self.assert_init()?;
        let dof = self.spec.dof();
        if start > end || end * dof > self.data.len() {
            return Err(SamplingError::invalid_argument(format!(
                "waypoint range [{}, {}) is outside the trajectory of {} points",
                start,
                end,
                self.num_waypoints()
            )));
        }
        Ok(self.data[start * dof..end * dof].to_vec())
    }

    pub fn waypoints_with_spec(
        &self,
        start: usize,
        end: usize,
        spec: &ConfigurationSpec,
    ) -> Result<Vec<f64>> {
        let native = self.waypoints(start, end)?;
        let points = end - start;
        let mut converted = vec![0.0; points * spec.dof()];
        ConfigurationSpec::convert_data(&mut converted, spec, &native, &self.spec, points, true)?;
        Ok(converted)
    }

    /// Total duration: the cumulative sum of the deltatime column, 0 when
    /// there are no waypoints.
    pub fn duration(&self) -> Result<f64> {
        self.assert_init()?;
        self.ensure_internal()?;
        let times = self.times.borrow();
        Ok(times.accum.last().copied().unwrap_or(0.0))
    }

    /// Index of the first waypoint whose accumulated time is at least `time`;
    /// `num_waypoints()` when the time is past the last waypoint.
    pub fn first_waypoint_index_after_time(&self, time: f64) -> Result<usize> {
        self.assert_init()?;
        self.ensure_internal()?;
        let times = self.times.borrow();
        if times.accum.is_empty() || time < times.accum[0] {
            return Ok(0);
        }
        if time >= times.accum[times.accum.len() - 1] {
            return Ok(self.num_waypoints());
        }
        Ok(times.accum.partition_point(|&a| a < time))
    }

    /// Samples the trajectory at `time` into a full waypoint row.
    ///
    /// At or past the duration this returns the last waypoint verbatim. The
    /// deltatime column of the output carries the offset from the preceding
    /// waypoint so the row can be re-inserted directly.
    pub fn sample(&self, time: f64, data: &mut Vec<f64>) -> Result<()> {
        self.prepare_sampling(time)?;
        let dof = self.spec.dof();
        data.clear();
        data.resize(dof, 0.0);
        self.sample_row(time, data)
    }

    /// Samples at `time` and converts the row into `spec`.
    pub fn sample_with_spec(
        &self,
        time: f64,
        spec: &ConfigurationSpec,
        data: &mut Vec<f64>,
    ) -> Result<()> {
        if *spec == self.spec {
            return self.sample(time, data);
        }
        let mut native = Vec::new();
        self.sample(time, &mut native)?;
        data.clear();
        data.resize(spec.dof(), 0.0);
        ConfigurationSpec::convert_data(data, spec, &native, &self.spec, 1, true)
    }

    /// Samples `ceil(duration/deltatime)` rows at multiples of `deltatime`.
    /// With `ensure_last_point`, one more row is produced when the last
    /// multiple falls short of the duration, and the final row is the last
    /// waypoint verbatim.
    pub fn sample_points_same_delta_time(
        &self,
        deltatime: f64,
        ensure_last_point: bool,
        data: &mut Vec<f64>,
    ) -> Result<()> {
        let duration = self.duration()?;
        self.sample_range_same_delta_time(deltatime, 0.0, duration, ensure_last_point, data)
    }

    pub fn sample_points_same_delta_time_with_spec(
        &self,
        deltatime: f64,
        ensure_last_point: bool,
        spec: &ConfigurationSpec,
        data: &mut Vec<f64>,
    ) -> Result<()> {
        if *spec == self.spec {
            return self.sample_points_same_delta_time(deltatime, ensure_last_point, data);
        }
        let mut native = Vec::new();
        self.sample_points_same_delta_time(deltatime, ensure_last_point, &mut native)?;
        self.convert_sampled(&native, spec, data)
    }

    /// Fixed-step sampling over `[start_time, stop_time]`.
    pub fn sample_range_same_delta_time(
        &self,
        deltatime: f64,
        start_time: f64,
        stop_time: f64,
        ensure_last_point: bool,
        data: &mut Vec<f64>,
    ) -> Result<()> {
        if !(deltatime > 0.0) {
            return Err(SamplingError::invalid_argument(format!(
                "sampling step {} must be positive",
                deltatime
            )));
        }
        if start_time < 0.0 {
            return Err(SamplingError::invalid_argument(
                "start time needs to be non-negative",
            ));
        }
        if stop_time < start_time {
            return Err(SamplingError::invalid_argument(
                "stop time needs to be at least start time",
            ));
        }
        self.prepare_sampling(start_time)?;
        let dof = self.spec.dof();

        let span = stop_time - start_time;
        let mut num_points = (span / deltatime).ceil() as usize;
        if ensure_last_point && (num_points as f64 - 1.0) * deltatime + EPSILON < span {
            num_points += 1;
        }
        data.clear();
        data.resize(dof * num_points, 0.0);

        let interpolated_points = if ensure_last_point {
            num_points.saturating_sub(1)
        } else {
            num_points
        };
        for i in 0..interpolated_points {
            let sample_time = start_time + i as f64 * deltatime;
            let row = &mut data[i * dof..(i + 1) * dof];
            self.sample_row(sample_time, row)?;
        }
        if ensure_last_point && num_points > 0 {
            let row = &mut data[(num_points - 1) * dof..num_points * dof];
            row.copy_from_slice(&self.data[self.data.len() - dof..]);
        }
        Ok(())
    }

    pub fn sample_range_same_delta_time_with_spec(
        &self,
        deltatime: f64,
        start_time: f64,
        stop_time: f64,
        ensure_last_point: bool,
        spec: &ConfigurationSpec,
        data: &mut Vec<f64>,
    ) -> Result<()> {
        if *spec == self.spec {
            return self.sample_range_same_delta_time(
                deltatime,
                start_time,
                stop_time,
                ensure_last_point,
                data,
            );
        }
        let mut native = Vec::new();
        self.sample_range_same_delta_time(
            deltatime,
            start_time,
            stop_time,
            ensure_last_point,
            &mut native,
        )?;
        self.convert_sampled(&native, spec, data)
    }

    fn convert_sampled(
        &self,
        native: &[f64],
        spec: &ConfigurationSpec,
        data: &mut Vec<f64>,
    ) -> Result<()> {
        let native_dof = self.spec.dof();
        let points = native.len() / native_dof;
        data.clear();
        data.resize(points * spec.dof(), 0.0);
        ConfigurationSpec::convert_data(data, spec, native, &self.spec, points, true)
    }

    fn prepare_sampling(&self, time: f64) -> Result<()> {
        self.assert_init()?;
        if self.time_offset.is_none() {
            return Err(SamplingError::invalid_state(
                "trajectory has no deltatime group to sample by",
            ));
        }
        if time < 0.0 {
            return Err(SamplingError::invalid_argument(format!(
                "sample time {} is negative",
                time
            )));
        }
        self.ensure_internal()?;
        let dof = self.spec.dof();
        if dof == 0 || self.data.len() < dof {
            return Err(SamplingError::invalid_argument(
                "trajectory needs at least one point to sample from",
            ));
        }
        self.ensure_verified()
    }

    /// Writes one sampled row; `row` must be zeroed and of full DOF width,
    /// and the internal caches must be current.
    fn sample_row(&self, time: f64, row: &mut [f64]) -> Result<()> {
        let dof = self.spec.dof();
        let toff = self
            .time_offset
            .ok_or_else(|| SamplingError::invalid_state("trajectory has no deltatime group"))?;
        let (duration, index) = {
            let times = self.times.borrow();
            let duration = times.accum.last().copied().unwrap_or(0.0);
            (duration, times.accum.partition_point(|&a| a < time))
        };
        if time >= duration {
            row.copy_from_slice(&self.data[self.data.len() - dof..]);
            return Ok(());
        }
        if index == 0 {
            row.copy_from_slice(&self.data[..dof]);
            row[toff] = time;
            return Ok(());
        }
        let mut deltatime = time - self.times.borrow().accum[index - 1];
        let waypoint_deltatime = self.data[dof * index + toff];
        // Floating-point error can push the local offset slightly outside
        // [0, waypoint_deltatime]; clamp before interpolating.
        if deltatime < 0.0 {
            deltatime = 0.0;
        } else if deltatime > waypoint_deltatime {
            deltatime = waypoint_deltatime;
        }
        for igroup in 0..self.spec.groups.len() {
            if self.interpolators[igroup].is_some() {
                self.interpolate_group(igroup, index - 1, deltatime, row)?;
            }
        }
        row[toff] = deltatime;
        Ok(())
    }

    /// Rebuilds the cumulative and inverse-delta time columns when dirty.
    fn ensure_internal(&self) -> Result<()> {
        if !self.changed.get() {
            return Ok(());
        }
        let mut times = self.times.borrow_mut();
        match self.time_offset {
            None => {
                times.accum.clear();
                times.delta_inv.clear();
            }
            Some(toff) => {
                let n = self.num_waypoints();
                let dof = self.spec.dof();
                times.accum.clear();
                times.delta_inv.clear();
                times.accum.reserve(n);
                times.delta_inv.reserve(n);
                if n > 0 {
                    times.accum.push(self.data[toff]);
                    times.delta_inv.push(1.0 / self.data[toff]);
                    for i in 1..n {
                        let deltatime = self.data[dof * i + toff];
                        if deltatime < 0.0 {
                            return Err(SamplingError::invalid_state(format!(
                                "deltatime ({:.15e}) is < 0 at point {}/{}",
                                deltatime, i, n
                            )));
                        }
                        let prev = times.accum[i - 1];
                        times.delta_inv.push(1.0 / deltatime);
                        times.accum.push(prev + deltatime);
                    }
                }
            }
        }
        self.changed.set(false);
        self.verified.set(false);
        Ok(())
    }

    /// Verifies that every group needing neighbor information resolved a
    /// derivative or integral chain; fails at sample time naming the group.
    fn ensure_verified(&self) -> Result<()> {
        if self.verified.get() {
            return Ok(());
        }
        for (igroup, group) in self.spec.groups.iter().enumerate() {
            if Some(group.offset) != self.time_offset && self.interpolators[igroup].is_none() {
                warn!(
                    interpolation = group.interpolation.as_str(),
                    group = group.name.as_str(),
                    "unknown interpolation method"
                );
            }
        }
        for group in &self.spec.groups {
            for j in 0..group.dof {
                if self.deriv_offsets[group.offset + j] < -2
                    && self.integral_offsets[group.offset + j] < -2
                {
                    return Err(SamplingError::invalid_argument(format!(
                        "{} interpolation group '{}' needs derivatives/integrals for sampling",
                        group.interpolation, group.name
                    )));
                }
            }
        }
        self.verified.set(true);
        Ok(())
    }

    /// Recomputes every waypoint transition from its interpolant and checks
    /// the stored neighbors against the per-order error bounds. Does not
    /// change sampling behaviour.
    pub fn validate_waypoints(&self) -> Result<()> {
        self.assert_init()?;
        self.ensure_internal()?;
        let n = self.num_waypoints();
        if n < 2 {
            return Ok(());
        }
        let accum: Vec<f64> = self.times.borrow().accum.clone();
        for ipoint in 0..n - 1 {
            let deltatime = accum[ipoint + 1] - accum[ipoint];
            for (igroup, validator) in self.validators.iter().enumerate() {
                match validator {
                    Some(GroupValidator::Linear) => {
                        self.validate_linear(igroup, ipoint, deltatime)?
                    }
                    Some(GroupValidator::Quadratic) => {
                        self.validate_quadratic(igroup, ipoint, deltatime)?
                    }
                    // Higher orders always pass.
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn validate_linear(&self, igroup: usize, ipoint: usize, deltatime: f64) -> Result<()> {
        let g = &self.spec.groups[igroup];
        let dof = self.spec.dof();
        let offset = ipoint * dof;
        let derivoff = self.deriv_offsets[g.offset];
        if derivoff < 0 {
            return Ok(());
        }
        let derivoff = derivoff as usize;
        for i in 0..g.dof {
            let deriv0 = self.data[dof + offset + derivoff + i];
            let expected = self.data[offset + g.offset + i] + deltatime * deriv0;
            let error = (self.data[dof + offset + g.offset + i] - expected).abs();
            // A full revolution of a circular DOF is not an error.
            if (error - 2.0 * std::f64::consts::PI).abs() > EPSILON_LINEAR && error > EPSILON_LINEAR
            {
                return Err(SamplingError::invalid_state(format!(
                    "trajectory segment for group '{}' interpolation {} points {}-{} dof {} is invalid",
                    g.name,
                    g.interpolation,
                    ipoint,
                    ipoint + 1,
                    i
                )));
            }
        }
        Ok(())
    }

    fn validate_quadratic(&self, igroup: usize, ipoint: usize, deltatime: f64) -> Result<()> {
        if deltatime <= EPSILON {
            return Ok(());
        }
        let g = &self.spec.groups[igroup];
        let dof = self.spec.dof();
        let offset = ipoint * dof;
        let derivoff = self.deriv_offsets[g.offset];
        if derivoff < 0 {
            // Only the integral chain is present; not enough constraints to
            // verify the segment.
            return Ok(());
        }
        let derivoff = derivoff as usize;
        let idt = self.delta_inv(ipoint + 1);
        for i in 0..g.dof {
            let deriv0 = self.data[offset + derivoff + i];
            let coeff = 0.5 * idt * (self.data[dof + offset + derivoff + i] - deriv0);
            let expected = self.data[offset + g.offset + i] + deltatime * (deriv0 + deltatime * coeff);
            let error = (self.data[dof + offset + g.offset + i] - expected).abs();
            if (error - 2.0 * std::f64::consts::PI).abs() > 1e-5 && error > 1e-4 {
                return Err(SamplingError::invalid_state(format!(
                    "trajectory segment for group '{}' interpolation {} time {} points {}-{} dof {} is invalid",
                    g.name,
                    g.interpolation,
                    deltatime,
                    ipoint,
                    ipoint + 1,
                    i
                )));
            }
        }
        Ok(())
    }

    fn delta_inv(&self, index: usize) -> f64 {
        self.times.borrow().delta_inv[index]
    }

    fn read_quat(&self, index: usize) -> [f64; 4] {
        [
            self.data[index],
            self.data[index + 1],
            self.data[index + 2],
            self.data[index + 3],
        ]
    }

    fn read_vector3(&self, index: usize) -> nalgebra::Vector3<f64> {
        nalgebra::Vector3::new(self.data[index], self.data[index + 1], self.data[index + 2])
    }

    fn interpolate_group(
        &self,
        igroup: usize,
        ipoint: usize,
        deltatime: f64,
        out: &mut [f64],
    ) -> Result<()> {
        let interpolator = match self.interpolators[igroup] {
            Some(interpolator) => interpolator,
            None => return Ok(()),
        };
        match interpolator {
            GroupInterpolator::Previous => self.interpolate_previous(igroup, ipoint, deltatime, out),
            GroupInterpolator::Next => self.interpolate_next(igroup, ipoint, deltatime, out),
            GroupInterpolator::Linear => self.interpolate_linear(igroup, ipoint, deltatime, out),
            GroupInterpolator::LinearIk(iktype) => {
                self.interpolate_linear_ik(igroup, ipoint, deltatime, out, iktype)
            }
            GroupInterpolator::Quadratic => self.interpolate_quadratic(igroup, ipoint, deltatime, out),
            GroupInterpolator::QuadraticIk(iktype) => {
                self.interpolate_quadratic_ik(igroup, ipoint, deltatime, out, iktype)
            }
            GroupInterpolator::Cubic => self.interpolate_cubic(igroup, ipoint, deltatime, out),
            GroupInterpolator::CubicIk(iktype) => {
                self.interpolate_cubic_ik(igroup, ipoint, deltatime, out, iktype)
            }
            GroupInterpolator::Quartic => self.interpolate_quartic(igroup, ipoint, deltatime, out),
            GroupInterpolator::Quintic => self.interpolate_quintic(igroup, ipoint, deltatime, out),
            GroupInterpolator::Sextic => self.interpolate_sextic(igroup, ipoint, deltatime, out),
            GroupInterpolator::Max => self.interpolate_max(igroup, ipoint, deltatime, out),
        }
    }

    fn interpolate_previous(
        &self,
        igroup: usize,
        ipoint: usize,
        deltatime: f64,
        out: &mut [f64],
    ) -> Result<()> {
        let g = &self.spec.groups[igroup];
        let dof = self.spec.dof();
        let mut offset = ipoint * dof + g.offset;
        if (ipoint + 1) * dof < self.data.len() {
            // So close to the next point that it wins.
            let f = self.delta_inv(ipoint + 1) * deltatime;
            if f > 1.0 - EPSILON {
                offset += dof;
            }
        }
        out[g.offset..g.offset + g.dof].copy_from_slice(&self.data[offset..offset + g.dof]);
        Ok(())
    }

    fn interpolate_next(
        &self,
        igroup: usize,
        ipoint: usize,
        deltatime: f64,
        out: &mut [f64],
    ) -> Result<()> {
        let g = &self.spec.groups[igroup];
        let dof = self.spec.dof();
        let mut ipoint = ipoint;
        if (ipoint + 1) * dof < self.data.len() {
            ipoint += 1;
        }
        let mut offset = ipoint * dof + g.offset;
        if deltatime <= EPSILON && ipoint > 0 {
            // So close to the previous point that it wins.
            offset -= dof;
        }
        out[g.offset..g.offset + g.dof].copy_from_slice(&self.data[offset..offset + g.dof]);
        Ok(())
    }

    fn interpolate_linear(
        &self,
        igroup: usize,
        ipoint: usize,
        deltatime: f64,
        out: &mut [f64],
    ) -> Result<()> {
        let g = &self.spec.groups[igroup];
        let dof = self.spec.dof();
        let offset = ipoint * dof;
        let derivoff = self.deriv_offsets[g.offset];
        if derivoff < 0 {
            // No derivative group; blend positions. Can be wrong for circular
            // DOFs.
            let f = self.delta_inv(ipoint + 1) * deltatime;
            for i in 0..g.dof {
                out[g.offset + i] = self.data[offset + g.offset + i] * (1.0 - f)
                    + f * self.data[dof + offset + g.offset + i];
            }
        } else {
            let derivoff = derivoff as usize;
            for i in 0..g.dof {
                let deriv0 = self.data[dof + offset + derivoff + i];
                out[g.offset + i] = self.data[offset + g.offset + i] + deltatime * deriv0;
            }
        }
        Ok(())
    }

    fn interpolate_linear_ik(
        &self,
        igroup: usize,
        ipoint: usize,
        deltatime: f64,
        out: &mut [f64],
        iktype: IkParamType,
    ) -> Result<()> {
        self.interpolate_linear(igroup, ipoint, deltatime, out)?;
        if deltatime <= EPSILON {
            return Ok(());
        }
        let g = &self.spec.groups[igroup];
        let dof = self.spec.dof();
        let offset = ipoint * dof;
        let f = self.delta_inv(ipoint + 1) * deltatime;
        match iktype {
            IkParamType::Rotation3D | IkParamType::Transform6D => {
                let q0 = self.read_quat(offset + g.offset);
                let q1 = self.read_quat(dof + offset + g.offset);
                let q = quat_slerp(&q0, &q1, f);
                out[g.offset..g.offset + 4].copy_from_slice(&q);
            }
            IkParamType::TranslationDirection5D => {
                let dir0 = self.read_vector3(offset + g.offset);
                let dir1 = self.read_vector3(dof + offset + g.offset);
                if let Some(dir) = direction_slerp(&dir0, &dir1, f) {
                    out[g.offset] = dir.x;
                    out[g.offset + 1] = dir.y;
                    out[g.offset + 2] = dir.z;
                }
            }
            IkParamType::Other(_) => {}
        }
        Ok(())
    }

    fn interpolate_quadratic(
        &self,
        igroup: usize,
        ipoint: usize,
        deltatime: f64,
        out: &mut [f64],
    ) -> Result<()> {
        let g = &self.spec.groups[igroup];
        let dof = self.spec.dof();
        let offset = ipoint * dof;
        if deltatime <= EPSILON {
            for i in 0..g.dof {
                out[g.offset + i] = self.data[offset + g.offset + i];
            }
            return Ok(());
        }
        let derivoff = self.deriv_offsets[g.offset];
        if derivoff >= 0 {
            let derivoff = derivoff as usize;
            let idt = self.delta_inv(ipoint + 1);
            for i in 0..g.dof {
                // coeff*t^2 + deriv0*t + pos0
                let deriv0 = self.data[offset + derivoff + i];
                let deriv1 = self.data[dof + offset + derivoff + i];
                let coeff = 0.5 * idt * (deriv1 - deriv0);
                out[g.offset + i] =
                    self.data[offset + g.offset + i] + deltatime * (deriv0 + deltatime * coeff);
            }
        } else {
            let integraloff = self.integral_offsets[g.offset];
            if integraloff < 0 {
                return Err(SamplingError::invalid_argument(format!(
                    "quadratic interpolation of group '{}' has neither derivatives nor integrals",
                    g.name
                )));
            }
            let integraloff = integraloff as usize;
            let idt = self.delta_inv(ipoint + 1);
            let idt2 = idt * idt;
            for i in 0..g.dof {
                // c2*t^2 + c1*t + v0 with the boundary values v1 and the
                // integral difference p1-p0:
                //   c1*dt = 6*(p1-p0)/dt - 4*v0 - 2*v1
                let integral0 = self.data[offset + integraloff + i];
                let integral1 = self.data[dof + offset + integraloff + i];
                let value0 = self.data[offset + g.offset + i];
                let value1 = self.data[dof + offset + g.offset + i];
                let c1_times_delta = 6.0 * (integral1 - integral0) * idt - 4.0 * value0 - 2.0 * value1;
                let c1 = c1_times_delta * idt;
                let c2 = (value1 - value0 - c1_times_delta) * idt2;
                out[g.offset + i] = value0 + deltatime * (c1 + deltatime * c2);
            }
        }
        Ok(())
    }

    fn interpolate_quadratic_ik(
        &self,
        igroup: usize,
        ipoint: usize,
        deltatime: f64,
        out: &mut [f64],
        iktype: IkParamType,
    ) -> Result<()> {
        self.interpolate_quadratic(igroup, ipoint, deltatime, out)?;
        if deltatime <= EPSILON {
            return Ok(());
        }
        let g = &self.spec.groups[igroup];
        let dof = self.spec.dof();
        let offset = ipoint * dof;
        let derivoff = self.deriv_offsets[g.offset];
        if derivoff < 0 {
            return Err(SamplingError::invalid_argument(format!(
                "quadratic ik interpolation of group '{}' needs a derivative group",
                g.name
            )));
        }
        let derivoff = derivoff as usize;
        match iktype {
            IkParamType::Rotation3D | IkParamType::Transform6D => {
                let q0 = self.read_quat(offset + g.offset);
                let q0vel = self.read_quat(offset + derivoff);
                let q1 = self.read_quat(dof + offset + g.offset);
                let q1vel = self.read_quat(dof + offset + derivoff);
                let angular0 = quat_scale(&quat_multiply(&q0vel, &quat_inverse(&q0)), 2.0);
                let angular1 = quat_scale(&quat_multiply(&q1vel, &quat_inverse(&q1)), 2.0);
                let half_idt = 0.5 * self.delta_inv(ipoint + 1);
                let mut total_delta = [0.0; 4];
                for k in 0..4 {
                    let coeff = (angular1[k] - angular0[k]) * half_idt;
                    total_delta[k] = angular0[k] * deltatime + coeff * deltatime * deltatime;
                }
                let rotation = quat_from_axis_angle(&nalgebra::Vector3::new(
                    total_delta[1],
                    total_delta[2],
                    total_delta[3],
                ));
                let q = quat_multiply(&rotation, &q0);
                out[g.offset..g.offset + 4].copy_from_slice(&q);
            }
            IkParamType::TranslationDirection5D => {
                let dir0 = self.read_vector3(offset + g.offset);
                let dir1 = self.read_vector3(dof + offset + g.offset);
                if dir0.cross(&dir1).norm_squared() > EPSILON {
                    let angular0 = self.read_vector3(offset + derivoff);
                    let angular1 = self.read_vector3(dof + offset + derivoff);
                    let coeff = (angular1 - angular0) * (0.5 * self.delta_inv(ipoint + 1));
                    let total_delta = angular0 * deltatime + coeff * (deltatime * deltatime);
                    let dir = crate::interpolators::quat_rotate(
                        &quat_from_axis_angle(&total_delta),
                        &dir0,
                    );
                    out[g.offset] = dir.x;
                    out[g.offset + 1] = dir.y;
                    out[g.offset + 2] = dir.z;
                }
            }
            IkParamType::Other(_) => {}
        }
        Ok(())
    }

    fn interpolate_cubic(
        &self,
        igroup: usize,
        ipoint: usize,
        deltatime: f64,
        out: &mut [f64],
    ) -> Result<()> {
        let g = &self.spec.groups[igroup];
        let dof = self.spec.dof();
        let offset = ipoint * dof;
        if deltatime <= EPSILON {
            for i in 0..g.dof {
                out[g.offset + i] = self.data[offset + g.offset + i];
            }
            return Ok(());
        }
        let derivoff = self.deriv_offsets[g.offset];
        let integraloff = self.integral_offsets[g.offset];
        let iioff = self.ii_offsets[g.offset];
        if derivoff >= 0 {
            // Hermite with endpoint derivatives:
            //   c3 = (v1*dt + v0*dt - 2*(x1 - x0))/dt^3
            //   c2 = (3*(x1 - x0) - 2*v0*dt - v1*dt)/dt^2
            let derivoff = derivoff as usize;
            let idt = self.delta_inv(ipoint + 1);
            let idt2 = idt * idt;
            let idt3 = idt2 * idt;
            for i in 0..g.dof {
                let deriv0 = self.data[offset + derivoff + i];
                let deriv1 = self.data[dof + offset + derivoff + i];
                let px = self.data[dof + offset + g.offset + i] - self.data[offset + g.offset + i];
                let c3 = (deriv1 + deriv0) * idt2 - 2.0 * px * idt3;
                let c2 = 3.0 * px * idt2 - (2.0 * deriv0 + deriv1) * idt;
                out[g.offset + i] = self.data[offset + g.offset + i]
                    + deltatime * (deriv0 + deltatime * (c2 + deltatime * c3));
            }
        } else if integraloff >= 0 && iioff >= 0 {
            // Boundary solve from first and second integrals:
            //   c3 = (10*(x1-x0)*dt^2 - 60*(i1-i0)*dt + 120*(ii1-ii0-i0*dt))/dt^5
            //   c2 = ((18*x0-12*x1)*dt^2 + 84*(i1-i0)*dt - 180*(ii1-ii0-i0*dt))/dt^4
            //   c1 = ((3*x1-9*x0)*dt^2 - 24*(i1-i0)*dt + 60*(ii1-ii0-i0*dt))/dt^3
            let integraloff = integraloff as usize;
            let iioff = iioff as usize;
            let idt = self.delta_inv(ipoint + 1);
            let idt2 = idt * idt;
            let idt3 = idt2 * idt;
            let idt4 = idt3 * idt;
            let idt5 = idt4 * idt;
            for i in 0..g.dof {
                let integ0 = self.data[offset + integraloff + i];
                let idiff = self.data[dof + offset + integraloff + i] - integ0;
                let temp = self.data[dof + offset + iioff + i]
                    - self.data[offset + iioff + i]
                    - integ0 * deltatime;
                let pos0 = self.data[offset + g.offset + i];
                let pos1 = self.data[dof + offset + g.offset + i];
                let c3 = 10.0 * (pos1 - pos0) * idt3 - 60.0 * idiff * idt4 + 120.0 * temp * idt5;
                let c2 =
                    (18.0 * pos0 - 12.0 * pos1) * idt2 + 84.0 * idiff * idt3 - 180.0 * temp * idt4;
                let c1 = (-9.0 * pos0 + 3.0 * pos1) * idt - 24.0 * idiff * idt2 + 60.0 * temp * idt3;
                out[g.offset + i] =
                    pos0 + deltatime * (c1 + deltatime * (c2 + deltatime * c3));
            }
        } else {
            return Err(SamplingError::invalid_argument(format!(
                "cubic interpolation of group '{}' does not have all data",
                g.name
            )));
        }
        Ok(())
    }

    fn interpolate_cubic_ik(
        &self,
        igroup: usize,
        ipoint: usize,
        deltatime: f64,
        out: &mut [f64],
        iktype: IkParamType,
    ) -> Result<()> {
        self.interpolate_cubic(igroup, ipoint, deltatime, out)?;
        if deltatime <= EPSILON {
            return Ok(());
        }
        let g = &self.spec.groups[igroup];
        let dof = self.spec.dof();
        let derivoff = self.deriv_offsets[g.offset];
        let ddoff = self.dd_offsets[g.offset];
        if derivoff < 0 || ddoff < 0 {
            return Err(SamplingError::NotImplemented(format!(
                "cubic ik interpolation of group '{}' without endpoint derivatives and accelerations",
                g.name
            )));
        }
        let derivoff = derivoff as usize;
        let ddoff = ddoff as usize;
        let offset = ipoint * dof;
        let next = offset + dof;
        match iktype {
            IkParamType::Rotation3D | IkParamType::Transform6D => {
                let q0 = self.read_quat(offset + g.offset);
                let q0vel = self.read_quat(offset + derivoff);
                let q0acc = self.read_quat(offset + ddoff);
                let q1 = self.read_quat(next + g.offset);
                let q1acc = self.read_quat(next + ddoff);

                let angular_velocity0 = quat_scale(&quat_multiply(&q0vel, &quat_inverse(&q0)), 2.0);
                let angular_acceleration0 =
                    quat_scale(&quat_multiply(&q0acc, &quat_inverse(&q0)), 2.0);
                let angular_acceleration1 =
                    quat_scale(&quat_multiply(&q1acc, &quat_inverse(&q1)), 2.0);

                let idt = self.delta_inv(ipoint + 1);
                let mut total_delta = [0.0; 4];
                for k in 0..4 {
                    let jerk = (angular_acceleration1[k] - angular_acceleration0[k]) * idt;
                    total_delta[k] = deltatime
                        * (angular_velocity0[k]
                            + deltatime
                                * (0.5 * angular_acceleration0[k] + (deltatime / 6.0) * jerk));
                }
                let rotation = quat_from_axis_angle(&nalgebra::Vector3::new(
                    total_delta[1],
                    total_delta[2],
                    total_delta[3],
                ));
                let q = quat_multiply(&rotation, &q0);
                out[g.offset..g.offset + 4].copy_from_slice(&q);
            }
            IkParamType::TranslationDirection5D => {
                return Err(SamplingError::NotImplemented(
                    "cubic interpolation of 5D translation-direction targets".to_string(),
                ));
            }
            IkParamType::Other(_) => {}
        }
        Ok(())
    }

    fn interpolate_quartic(
        &self,
        igroup: usize,
        ipoint: usize,
        deltatime: f64,
        out: &mut [f64],
    ) -> Result<()> {
        let g = &self.spec.groups[igroup];
        let dof = self.spec.dof();
        let offset = ipoint * dof;
        if deltatime <= EPSILON {
            for i in 0..g.dof {
                out[g.offset + i] = self.data[offset + g.offset + i];
            }
            return Ok(());
        }
        let derivoff = self.deriv_offsets[g.offset];
        let ddoff = self.dd_offsets[g.offset];
        let integraloff = self.integral_offsets[g.offset];
        if derivoff >= 0 && ddoff >= 0 {
            // Boundary values p(0), dp(0), dp(dt), ddp(0), ddp(dt):
            //   c4 = (-2*(v1-v0) + (a0+a1)*dt)/(4*dt^3)
            //   c3 = ((v1-v0)*3 - (2*a0+a1)*dt)/(3*dt^2)
            let derivoff = derivoff as usize;
            let ddoff = ddoff as usize;
            let idt = self.delta_inv(ipoint + 1);
            let idt2 = idt * idt;
            let idt3 = idt2 * idt;
            for i in 0..g.dof {
                let deriv0 = self.data[offset + derivoff + i];
                let deriv1 = self.data[dof + offset + derivoff + i];
                let dd0 = self.data[offset + ddoff + i];
                let dd1 = self.data[dof + offset + ddoff + i];
                let c4 = -0.5 * (deriv1 - deriv0) * idt3 + (dd0 + dd1) * idt2 * 0.25;
                let c3 = (deriv1 - deriv0) * idt2 - (2.0 * dd0 + dd1) * idt / 3.0;
                out[g.offset + i] = self.data[offset + g.offset + i]
                    + deltatime
                        * (deriv0 + deltatime * (0.5 * dd0 + deltatime * (c3 + deltatime * c4)));
            }
        } else if derivoff >= 0 && integraloff >= 0 {
            // Boundary values p(0), p(dt), dp(0), dp(dt), ip(dt):
            //   c4 = 2.5*(v1-v0)/dt^3 - 15*(x0+x1)/dt^4 + 30*(i1-i0)/dt^5
            //   c3 = (6*v0-4*v1)/dt^2 + (32*x0+28*x1)/dt^3 - 60*(i1-i0)/dt^4
            //   c2 = (-4.5*v0+1.5*v1)/dt - (18*x0+12*x1)/dt^2 + 30*(i1-i0)/dt^3
            let derivoff = derivoff as usize;
            let integraloff = integraloff as usize;
            let idt = self.delta_inv(ipoint + 1);
            let idt2 = idt * idt;
            let idt3 = idt2 * idt;
            let idt4 = idt3 * idt;
            let idt5 = idt4 * idt;
            for i in 0..g.dof {
                let deriv0 = self.data[offset + derivoff + i];
                let deriv1 = self.data[dof + offset + derivoff + i];
                let pos0 = self.data[offset + g.offset + i];
                let pos1 = self.data[dof + offset + g.offset + i];
                let idiff = self.data[dof + offset + integraloff + i]
                    - self.data[offset + integraloff + i];
                let c4 = 2.5 * (deriv1 - deriv0) * idt3 - 15.0 * (pos0 + pos1) * idt4
                    + 30.0 * idiff * idt5;
                let c3 = (6.0 * deriv0 - 4.0 * deriv1) * idt2 + (32.0 * pos0 + 28.0 * pos1) * idt3
                    - 60.0 * idiff * idt4;
                let c2 = (-4.5 * deriv0 + 1.5 * deriv1) * idt - (18.0 * pos0 + 12.0 * pos1) * idt2
                    + 30.0 * idiff * idt3;
                out[g.offset + i] = pos0
                    + deltatime * (deriv0 + deltatime * (c2 + deltatime * (c3 + deltatime * c4)));
            }
        } else {
            return Err(SamplingError::invalid_argument(format!(
                "quartic interpolation of group '{}' does not have all data",
                g.name
            )));
        }
        Ok(())
    }

    fn interpolate_quintic(
        &self,
        igroup: usize,
        ipoint: usize,
        deltatime: f64,
        out: &mut [f64],
    ) -> Result<()> {
        let g = &self.spec.groups[igroup];
        let dof = self.spec.dof();
        let offset = ipoint * dof;
        if deltatime <= EPSILON {
            for i in 0..g.dof {
                out[g.offset + i] = self.data[offset + g.offset + i];
            }
            return Ok(());
        }
        let derivoff = self.deriv_offsets[g.offset];
        let ddoff = self.dd_offsets[g.offset];
        if derivoff < 0 || ddoff < 0 {
            return Err(SamplingError::NotImplemented(format!(
                "quintic interpolation of group '{}' without the full derivative chain",
                g.name
            )));
        }
        // Endpoint position/velocity/acceleration Hermite:
        //   c5 = -0.5*a0/dt^3 + a1/(2*dt^3) - 3*v0/dt^4 - 3*v1/dt^4 - 6*p0/dt^5 + 6*p1/dt^5
        //   c4 = 1.5*a0/dt^2 - a1/dt^2 + 8*v0/dt^3 + 7*v1/dt^3 + 15*p0/dt^4 - 15*p1/dt^4
        //   c3 = -1.5*a0/dt + a1/(2*dt) - 6*v0/dt^2 - 4*v1/dt^2 - 10*p0/dt^3 + 10*p1/dt^3
        let derivoff = derivoff as usize;
        let ddoff = ddoff as usize;
        let idt = self.delta_inv(ipoint + 1);
        let idt2 = idt * idt;
        let idt3 = idt2 * idt;
        let idt4 = idt2 * idt2;
        let idt5 = idt4 * idt;
        for i in 0..g.dof {
            let p0 = self.data[offset + g.offset + i];
            let px = self.data[dof + offset + g.offset + i] - p0;
            let deriv0 = self.data[offset + derivoff + i];
            let deriv1 = self.data[dof + offset + derivoff + i];
            let dd0 = self.data[offset + ddoff + i];
            let dd1 = self.data[dof + offset + ddoff + i];
            let c5 = (-0.5 * dd0 + dd1 * 0.5) * idt3 - (3.0 * deriv0 + 3.0 * deriv1) * idt4
                + px * 6.0 * idt5;
            let c4 = (1.5 * dd0 - dd1) * idt2 + (8.0 * deriv0 + 7.0 * deriv1) * idt3
                - px * 15.0 * idt4;
            let c3 = (-1.5 * dd0 + dd1 * 0.5) * idt + (-6.0 * deriv0 - 4.0 * deriv1) * idt2
                + px * 10.0 * idt3;
            out[g.offset + i] = p0
                + deltatime
                    * (deriv0
                        + deltatime
                            * (0.5 * dd0 + deltatime * (c3 + deltatime * (c4 + deltatime * c5))));
        }
        Ok(())
    }

    fn interpolate_sextic(
        &self,
        igroup: usize,
        ipoint: usize,
        deltatime: f64,
        out: &mut [f64],
    ) -> Result<()> {
        let g = &self.spec.groups[igroup];
        let dof = self.spec.dof();
        let offset = ipoint * dof;
        if deltatime <= EPSILON {
            for i in 0..g.dof {
                out[g.offset + i] = self.data[offset + g.offset + i];
            }
            return Ok(());
        }
        let derivoff = self.deriv_offsets[g.offset];
        let ddoff = self.dd_offsets[g.offset];
        let dddoff = self.ddd_offsets[g.offset];
        if derivoff < 0 || ddoff < 0 || dddoff < 0 {
            return Err(SamplingError::NotImplemented(format!(
                "sextic interpolation of group '{}' without the full derivative chain",
                g.name
            )));
        }
        // Endpoint chain up to jerk:
        //   c6 = -a0/(2*dt^4) - a1/(2*dt^4) - j0/(12*dt^3) + j1/(12*dt^3) - v0/dt^5 + v1/dt^5
        //   c5 = 8*a0/(5*dt^3) + 7*a1/(5*dt^3) + 3*j0/(10*dt^2) - j1/(5*dt^2) + 3*v0/dt^4 - 3*v1/dt^4
        //   c4 = -3*a0/(2*dt^2) - a1/dt^2 - 3*j0/(8*dt) + j1/(8*dt) - 5*v0/(2*dt^3) + 5*v1/(2*dt^3)
        let derivoff = derivoff as usize;
        let ddoff = ddoff as usize;
        let dddoff = dddoff as usize;
        let idt = self.delta_inv(ipoint + 1);
        let idt2 = idt * idt;
        let idt3 = idt2 * idt;
        let idt4 = idt2 * idt2;
        let idt5 = idt4 * idt;
        for i in 0..g.dof {
            let p0 = self.data[offset + g.offset + i];
            let deriv0 = self.data[offset + derivoff + i];
            let deriv1 = self.data[dof + offset + derivoff + i];
            let dd0 = self.data[offset + ddoff + i];
            let dd1 = self.data[dof + offset + ddoff + i];
            let ddd0 = self.data[offset + dddoff + i];
            let ddd1 = self.data[dof + offset + dddoff + i];
            let c6 = (-dd0 - dd1) * 0.5 * idt4 + (-ddd0 + ddd1) / 12.0 * idt3
                + (-deriv0 + deriv1) * idt5;
            let c5 = (1.6 * dd0 + 1.4 * dd1) * idt3 + (0.3 * ddd0 - ddd1 * 0.2) * idt2
                + (3.0 * deriv0 - 3.0 * deriv1) * idt4;
            let c4 = (-1.5 * dd0 - dd1) * idt2 + (-0.375 * ddd0 + ddd1 * 0.125) * idt
                + (-2.5 * deriv0 + 2.5 * deriv1) * idt3;
            out[g.offset + i] = p0
                + deltatime
                    * (deriv0
                        + deltatime
                            * (0.5 * dd0
                                + deltatime
                                    * (ddd0 / 6.0
                                        + deltatime * (c4 + deltatime * (c5 + deltatime * c6)))));
        }
        Ok(())
    }

    fn interpolate_max(
        &self,
        igroup: usize,
        ipoint: usize,
        _deltatime: f64,
        out: &mut [f64],
    ) -> Result<()> {
        let g = &self.spec.groups[igroup];
        let dof = self.spec.dof();
        let offset = ipoint * dof + g.offset;
        for i in 0..g.dof {
            out[g.offset + i] = self.data[offset + i].max(self.data[dof + offset + i]);
        }
        Ok(())
    }

    /// Resolves interpolators, validators and the per-DOF cross-group offset
    /// tables, honouring the interpolation-consistency rules: a candidate
    /// derivative (integral) group only counts when its interpolation is the
    /// formal derivative (integral) of this group's.
    fn initialize_group_functions(&mut self) {
        let dof = self.spec.dof();
        let ngroups = self.spec.groups.len();
        self.interpolators = vec![None; ngroups];
        self.validators = vec![None; ngroups];
        self.deriv_offsets = vec![-1; dof];
        self.dd_offsets = vec![-1; dof];
        self.ddd_offsets = vec![-1; dof];
        self.integral_offsets = vec![-1; dof];
        self.ii_offsets = vec![-1; dof];

        for igroup in 0..ngroups {
            let group = self.spec.groups[igroup].clone();
            let (interpolator, validator, need) = resolve_group(&group);
            self.interpolators[igroup] = interpolator;
            self.validators[igroup] = validator;
            if need == 0 {
                continue;
            }
            let need = -(need as i32);

            match self.consistent_derivative(&group) {
                None => {
                    for j in 0..group.dof {
                        self.deriv_offsets[group.offset + j] = need;
                    }
                }
                Some(deriv) => {
                    for j in 0..group.dof {
                        self.deriv_offsets[group.offset + j] = (deriv.offset + j) as i32;
                    }
                    match self.consistent_derivative(&deriv) {
                        None => {
                            for j in 0..group.dof {
                                self.dd_offsets[group.offset + j] = need;
                            }
                        }
                        Some(dd) => {
                            for j in 0..group.dof {
                                self.dd_offsets[group.offset + j] = (dd.offset + j) as i32;
                            }
                            match self.consistent_derivative(&dd) {
                                None => {
                                    for j in 0..group.dof {
                                        self.ddd_offsets[group.offset + j] = need;
                                    }
                                }
                                Some(ddd) => {
                                    for j in 0..group.dof {
                                        self.ddd_offsets[group.offset + j] =
                                            (ddd.offset + j) as i32;
                                    }
                                }
                            }
                        }
                    }
                }
            }

            match self.consistent_integral(&group) {
                None => {
                    for j in 0..group.dof {
                        self.integral_offsets[group.offset + j] = need;
                    }
                }
                Some(integral) => {
                    for j in 0..group.dof {
                        self.integral_offsets[group.offset + j] = (integral.offset + j) as i32;
                    }
                    match self.consistent_integral(&integral) {
                        None => {
                            for j in 0..group.dof {
                                self.ii_offsets[group.offset + j] = need;
                            }
                        }
                        Some(ii) => {
                            for j in 0..group.dof {
                                self.ii_offsets[group.offset + j] = (ii.offset + j) as i32;
                            }
                        }
                    }
                }
            }
        }
    }

    fn consistent_derivative(&self, group: &Group) -> Option<Group> {
        let candidate = self.spec.find_time_derivative_group(group)?;
        let expected = interpolation_derivative(&group.interpolation)?;
        if candidate.interpolation.is_empty() || candidate.interpolation != expected {
            return None;
        }
        Some(candidate.clone())
    }

    fn consistent_integral(&self, group: &Group) -> Option<Group> {
        let candidate = self.spec.find_time_integral_group(group)?;
        let expected = interpolation_integral(&group.interpolation)?;
        if candidate.interpolation.is_empty() || candidate.interpolation != expected {
            return None;
        }
        Some(candidate.clone())
    }
}
