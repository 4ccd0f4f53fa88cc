//! Configuration-space jittering and generic trajectory sampling for robot
//! motion runtimes.
//!
//! Two subsystems share this crate:
//!
//! - The [`jitterer::Jitterer`] takes a robot whose current configuration is
//!   infeasible (in collision, violating tool-pose constraints, or sitting on
//!   a constraint-manifold boundary) and searches for a nearby feasible
//!   configuration by structured random perturbation. Sampling can be biased
//!   toward a workspace direction through the Jacobian pseudo-inverse and the
//!   Jacobian null space, candidates are screened through a visited-set cache
//!   and a per-link Cartesian excursion bound, and every accepted
//!   configuration is re-checked under small perturbations so it does not sit
//!   on a collision or constraint boundary.
//! - The [`trajectory::Trajectory`] is a time-parameterized waypoint sequence
//!   over a user-defined [`spec::ConfigurationSpec`] (mixed joint values,
//!   derivatives, affine transforms, IK parameterizations) supporting
//!   insertion, sampling at arbitrary times through per-group polynomial
//!   interpolants of orders 0 to 6, fixed-step resampling, and a versioned
//!   binary serialization format.
//!
//! The robot kinematic model and the collision world stay outside the crate,
//! behind the [`robot_traits::RobotModel`] trait.
//!
//! # Features
//!
//! - `jacobian-bias` (default): Jacobian/SVD workspace biasing. Without it,
//!   enabling a manipulator bias fails with `CommandNotSupported` at the set
//!   call.

pub mod error;

pub mod robot_traits;

pub mod constraints;

pub mod distance_cache;

pub mod bias;

pub mod jitterer;

pub mod commands;

pub mod spec;

pub mod interpolators;

pub mod trajectory;

pub mod serialization;

#[cfg(test)]
mod tests;

pub use error::{Result, SamplingError};
pub use jitterer::{FailureCounter, Jitterer, JitterResult};
pub use spec::{ConfigurationSpec, Group};
pub use trajectory::Trajectory;
