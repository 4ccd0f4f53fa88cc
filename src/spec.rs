//! Configuration specification: the ordered, named column layout of a
//! trajectory waypoint row.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::{Result, SamplingError};

/// Affine base-mode bits carried in `affine_transform` group names.
pub const AFFINE_X: u32 = 1;
pub const AFFINE_Y: u32 = 2;
pub const AFFINE_Z: u32 = 4;
pub const AFFINE_ROTATION_AXIS: u32 = 8;
pub const AFFINE_ROTATION_3D: u32 = 16;
pub const AFFINE_ROTATION_QUAT: u32 = 32;

/// Column count of an affine DOF mask.
pub fn affine_dof(mask: u32) -> usize {
    let mut dof = 0;
    if mask & AFFINE_X != 0 {
        dof += 1;
    }
    if mask & AFFINE_Y != 0 {
        dof += 1;
    }
    if mask & AFFINE_Z != 0 {
        dof += 1;
    }
    if mask & AFFINE_ROTATION_AXIS != 0 {
        dof += 1;
    }
    if mask & AFFINE_ROTATION_3D != 0 {
        dof += 3;
    }
    if mask & AFFINE_ROTATION_QUAT != 0 {
        dof += 4;
    }
    dof
}

/// Identity-pose values expanded through an affine DOF mask. All zeros
/// except the quaternion block, which carries the identity rotation.
pub fn affine_identity_values(mask: u32) -> Vec<f64> {
    let mut values = Vec::with_capacity(affine_dof(mask));
    if mask & AFFINE_X != 0 {
        values.push(0.0);
    }
    if mask & AFFINE_Y != 0 {
        values.push(0.0);
    }
    if mask & AFFINE_Z != 0 {
        values.push(0.0);
    }
    if mask & AFFINE_ROTATION_AXIS != 0 {
        values.push(0.0);
    }
    if mask & AFFINE_ROTATION_3D != 0 {
        values.extend_from_slice(&[0.0, 0.0, 0.0]);
    }
    if mask & AFFINE_ROTATION_QUAT != 0 {
        values.extend_from_slice(&[1.0, 0.0, 0.0, 0.0]);
    }
    values
}

/// Computation-order rank of the semantic classes: every derivative sorts
/// before the quantity it derives, so interpolators resolve their inputs
/// from already-ordered groups.
static GROUP_ORDER: Lazy<HashMap<&'static str, i32>> = Lazy::new(|| {
    let mut order = HashMap::new();
    order.insert("deltatime", 0);
    order.insert("joint_snaps", 1);
    order.insert("affine_snaps", 2);
    order.insert("joint_jerks", 3);
    order.insert("affine_jerks", 4);
    order.insert("joint_accelerations", 5);
    order.insert("affine_accelerations", 6);
    order.insert("joint_velocities", 7);
    order.insert("affine_velocities", 8);
    order.insert("joint_values", 9);
    order.insert("affine_transform", 10);
    order.insert("joint_torques", 11);
    order
});

/// Time-derivative chains of the semantic classes.
const DERIVATIVE_CHAINS: &[&[&str]] = &[
    &[
        "joint_values",
        "joint_velocities",
        "joint_accelerations",
        "joint_jerks",
        "joint_snaps",
    ],
    &[
        "affine_transform",
        "affine_velocities",
        "affine_accelerations",
        "affine_jerks",
        "affine_snaps",
    ],
    &["ikparam_values", "ikparam_velocities", "ikparam_accelerations"],
];

fn derivative_class(class: &str) -> Option<&'static str> {
    for chain in DERIVATIVE_CHAINS {
        if let Some(pos) = chain.iter().position(|&c| c == class) {
            return chain.get(pos + 1).copied();
        }
    }
    None
}

fn integral_class(class: &str) -> Option<&'static str> {
    for chain in DERIVATIVE_CHAINS {
        if let Some(pos) = chain.iter().position(|&c| c == class) {
            if pos > 0 {
                return chain.get(pos - 1).copied();
            }
        }
    }
    None
}

/// Interpolation of the time derivative of a quantity interpolated this way.
pub fn interpolation_derivative(interpolation: &str) -> Option<&'static str> {
    match interpolation {
        "linear" => Some("next"),
        "quadratic" => Some("linear"),
        "cubic" => Some("quadratic"),
        "quartic" => Some("cubic"),
        "quintic" => Some("quartic"),
        "sextic" => Some("quintic"),
        _ => None,
    }
}

/// Interpolation of the time integral of a quantity interpolated this way.
pub fn interpolation_integral(interpolation: &str) -> Option<&'static str> {
    match interpolation {
        "next" => Some("linear"),
        "linear" => Some("quadratic"),
        "quadratic" => Some("cubic"),
        "cubic" => Some("quartic"),
        "quartic" => Some("quintic"),
        "quintic" => Some("sextic"),
        _ => None,
    }
}

/// One named column slice of a waypoint row.
///
/// The first name token is the semantic class (`joint_values`,
/// `affine_transform <robot> <dofmask>`, `deltatime`,
/// `ikparam_values <iktype>`, ...); trailing tokens qualify it.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub name: String,
    pub offset: usize,
    pub dof: usize,
    /// One of "", previous, next, linear, quadratic, cubic, quartic,
    /// quintic, sextic, max. Preserved verbatim through serialization.
    pub interpolation: String,
}

impl Group {
    pub fn new(name: impl Into<String>, offset: usize, dof: usize, interpolation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            offset,
            dof,
            interpolation: interpolation.into(),
        }
    }

    pub fn semantic_class(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or("")
    }

    /// Name tokens after the semantic class.
    pub fn trailing_tokens(&self) -> Vec<&str> {
        self.name.split_whitespace().skip(1).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigurationSpec {
    pub groups: Vec<Group>,
}

impl ConfigurationSpec {
    pub fn new(groups: Vec<Group>) -> Self {
        Self { groups }
    }

    /// Total columns of one waypoint row.
    pub fn dof(&self) -> usize {
        self.groups
            .iter()
            .map(|g| g.offset + g.dof)
            .max()
            .unwrap_or(0)
    }

    /// Offsets and dofs must partition `[0, dof)` without overlap, and a
    /// `deltatime` group (at most one) must have dof 1.
    pub fn validate(&self) -> Result<()> {
        let total = self.dof();
        let mut covered = vec![false; total];
        let mut num_deltatime = 0;
        for group in &self.groups {
            if group.dof == 0 {
                return Err(SamplingError::invalid_argument(format!(
                    "group '{}' has zero dof",
                    group.name
                )));
            }
            if group.name == "deltatime" {
                num_deltatime += 1;
                if group.dof != 1 {
                    return Err(SamplingError::invalid_argument(format!(
                        "deltatime group has dof {}, expected 1",
                        group.dof
                    )));
                }
            }
            for column in group.offset..group.offset + group.dof {
                if covered[column] {
                    return Err(SamplingError::invalid_argument(format!(
                        "group '{}' overlaps column {}",
                        group.name, column
                    )));
                }
                covered[column] = true;
            }
        }
        if num_deltatime > 1 {
            return Err(SamplingError::invalid_argument(
                "more than one deltatime group",
            ));
        }
        if let Some(hole) = covered.iter().position(|&c| !c) {
            return Err(SamplingError::invalid_argument(format!(
                "column {} is not covered by any group",
                hole
            )));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn find_group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// A group usable in place of `group`: exact name match when possible,
    /// otherwise same semantic class with matching leading secondary tokens.
    pub fn find_compatible_group(&self, group: &Group) -> Option<&Group> {
        if let Some(exact) = self.groups.iter().find(|g| g.name == group.name) {
            return Some(exact);
        }
        let class = group.semantic_class();
        let tokens = group.trailing_tokens();
        self.groups.iter().find(|candidate| {
            if candidate.semantic_class() != class {
                return false;
            }
            candidate
                .trailing_tokens()
                .iter()
                .zip(&tokens)
                .all(|(a, b)| a == b)
        })
    }

    /// The group holding the time derivative of `group` (velocities for
    /// values, accelerations for velocities, ...) with matching trailing
    /// tokens.
    pub fn find_time_derivative_group(&self, group: &Group) -> Option<&Group> {
        let target = derivative_class(group.semantic_class())?;
        let tokens = group.trailing_tokens();
        self.groups
            .iter()
            .find(|g| g.semantic_class() == target && g.trailing_tokens() == tokens)
    }

    /// The group holding the time integral of `group` (values for
    /// velocities, ...) with matching trailing tokens.
    pub fn find_time_integral_group(&self, group: &Group) -> Option<&Group> {
        let target = integral_class(group.semantic_class())?;
        let tokens = group.trailing_tokens();
        self.groups
            .iter()
            .find(|g| g.semantic_class() == target && g.trailing_tokens() == tokens)
    }

    /// Stably reorders groups by semantic rank. Unknown classes sort after
    /// every known one, lexicographically; same-rank groups keep their
    /// original relative order, which matters when several robots contribute
    /// groups of the same class.
    pub fn sort_groups_by_rank(&mut self) {
        self.groups.sort_by(|g1, g2| {
            let r1 = GROUP_ORDER.get(g1.semantic_class());
            let r2 = GROUP_ORDER.get(g2.semantic_class());
            match (r1, r2) {
                (Some(a), Some(b)) => a.cmp(b),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => g1.semantic_class().cmp(g2.semantic_class()),
            }
        });
    }

    /// Default column values of a group that has no source data: zeros,
    /// except the identity pose for `affine_transform` and -1 for
    /// `outputSignals`.
    pub fn group_default_values(group: &Group) -> Vec<f64> {
        let class = group.semantic_class();
        if class == "affine_transform" {
            let tokens = group.trailing_tokens();
            if tokens.len() >= 2 {
                if let Ok(mask) = tokens[1].parse::<u32>() {
                    let values = affine_identity_values(mask);
                    if values.len() == group.dof {
                        return values;
                    }
                }
            }
        } else if class.starts_with("outputSignals") {
            return vec![-1.0; group.dof];
        }
        vec![0.0; group.dof]
    }

    /// Copies `points` rows from `source` (laid out by `source_spec`) into
    /// `target` (laid out by `target_spec`), group by compatible group. When
    /// `fill_uninitialized` is set, target columns without source data get
    /// their group defaults.
    pub fn convert_data(
        target: &mut [f64],
        target_spec: &ConfigurationSpec,
        source: &[f64],
        source_spec: &ConfigurationSpec,
        points: usize,
        fill_uninitialized: bool,
    ) -> Result<()> {
        let target_dof = target_spec.dof();
        let source_dof = source_spec.dof();
        if target.len() < points * target_dof {
            return Err(SamplingError::invalid_argument(format!(
                "target of size {} cannot hold {} rows of dof {}",
                target.len(),
                points,
                target_dof
            )));
        }
        if source.len() < points * source_dof {
            return Err(SamplingError::invalid_argument(format!(
                "source of size {} does not hold {} rows of dof {}",
                source.len(),
                points,
                source_dof
            )));
        }
        for group in &target_spec.groups {
            match source_spec.find_compatible_group(group) {
                Some(source_group) => {
                    let ncopy = group.dof.min(source_group.dof);
                    for point in 0..points {
                        let src = point * source_dof + source_group.offset;
                        let dst = point * target_dof + group.offset;
                        target[dst..dst + ncopy].copy_from_slice(&source[src..src + ncopy]);
                        if fill_uninitialized && ncopy < group.dof {
                            let defaults = Self::group_default_values(group);
                            target[dst + ncopy..dst + group.dof]
                                .copy_from_slice(&defaults[ncopy..]);
                        }
                    }
                }
                None => {
                    if fill_uninitialized {
                        let defaults = Self::group_default_values(group);
                        for point in 0..points {
                            let dst = point * target_dof + group.offset;
                            target[dst..dst + group.dof].copy_from_slice(&defaults);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
