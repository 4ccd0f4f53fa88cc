//! Interpolator resolution and the quaternion/direction math used by the
//! IK-parameterized variants.
//!
//! Each trajectory group resolves to one tagged variant at init time, so
//! sampling dispatches over plain data instead of virtual calls.

use nalgebra::Vector3;

use crate::spec::Group;

/// How an end-effector target is encoded in the data columns of an
/// `ikparam_values <iktype>` group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IkParamType {
    /// Quaternion + translation, 7 columns.
    Transform6D,
    /// Quaternion only, 4 columns.
    Rotation3D,
    /// Translation + unit direction, 6 columns.
    TranslationDirection5D,
    /// Any other parameterization; interpolated as plain Euclidean data.
    Other(u32),
}

const IKP_TRANSFORM_6D: u32 = 0x6700_0001;
const IKP_ROTATION_3D: u32 = 0x3400_0002;
const IKP_TRANSLATION_DIRECTION_5D: u32 = 0x5600_0007;

impl IkParamType {
    pub fn from_tag(tag: u32) -> Self {
        match tag {
            IKP_TRANSFORM_6D => Self::Transform6D,
            IKP_ROTATION_3D => Self::Rotation3D,
            IKP_TRANSLATION_DIRECTION_5D => Self::TranslationDirection5D,
            other => Self::Other(other),
        }
    }

    /// Parses the numeric type tag trailing the semantic class, accepting
    /// decimal and `0x` hexadecimal forms.
    pub fn from_group_name(name: &str) -> Option<Self> {
        let token = name.split_whitespace().nth(1)?;
        let tag = if let Some(hex) = token.strip_prefix("0x") {
            u32::from_str_radix(hex, 16).ok()?
        } else {
            token.parse::<u32>().ok()?
        };
        Some(Self::from_tag(tag))
    }
}

/// Per-group evaluator variant, resolved once at trajectory init.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GroupInterpolator {
    Previous,
    Next,
    Linear,
    LinearIk(IkParamType),
    Quadratic,
    QuadraticIk(IkParamType),
    Cubic,
    CubicIk(IkParamType),
    Quartic,
    Quintic,
    Sextic,
    Max,
}

/// Per-group verify-mode validator variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupValidator {
    Linear,
    Quadratic,
    Cubic,
    Quartic,
    Quintic,
    Sextic,
}

fn is_ik_group(name: &str) -> bool {
    let class = name.split_whitespace().next().unwrap_or("");
    class == "ikparam_values" || class == "ikparam_velocities" || class == "ikparam_accelerations"
}

/// Resolves a group to its interpolator, validator and the neighbor-info
/// requirement level (0 none, 2 linear, 3 quadratic and above).
pub fn resolve_group(
    group: &Group,
) -> (Option<GroupInterpolator>, Option<GroupValidator>, u8) {
    let ik = || IkParamType::from_group_name(&group.name).unwrap_or(IkParamType::Other(0));
    match group.interpolation.as_str() {
        "previous" => (Some(GroupInterpolator::Previous), None, 0),
        "next" | "" => (Some(GroupInterpolator::Next), None, 0),
        "linear" => {
            if is_ik_group(&group.name) {
                (Some(GroupInterpolator::LinearIk(ik())), None, 2)
            } else {
                (
                    Some(GroupInterpolator::Linear),
                    Some(GroupValidator::Linear),
                    2,
                )
            }
        }
        "quadratic" => {
            if is_ik_group(&group.name) {
                (Some(GroupInterpolator::QuadraticIk(ik())), None, 3)
            } else {
                (
                    Some(GroupInterpolator::Quadratic),
                    Some(GroupValidator::Quadratic),
                    3,
                )
            }
        }
        "cubic" => {
            if group.semantic_class() == "ikparam_values" {
                (Some(GroupInterpolator::CubicIk(ik())), None, 3)
            } else {
                (
                    Some(GroupInterpolator::Cubic),
                    Some(GroupValidator::Cubic),
                    3,
                )
            }
        }
        "quartic" => (
            Some(GroupInterpolator::Quartic),
            Some(GroupValidator::Quartic),
            3,
        ),
        "quintic" => (
            Some(GroupInterpolator::Quintic),
            Some(GroupValidator::Quintic),
            3,
        ),
        "sextic" => (
            Some(GroupInterpolator::Sextic),
            Some(GroupValidator::Sextic),
            3,
        ),
        "max" => (Some(GroupInterpolator::Max), None, 0),
        _ => (None, None, 0),
    }
}

// Quaternions are stored [w, x, y, z] in the data columns.

pub(crate) fn quat_multiply(a: &[f64; 4], b: &[f64; 4]) -> [f64; 4] {
    [
        a[0] * b[0] - a[1] * b[1] - a[2] * b[2] - a[3] * b[3],
        a[0] * b[1] + a[1] * b[0] + a[2] * b[3] - a[3] * b[2],
        a[0] * b[2] + a[2] * b[0] + a[3] * b[1] - a[1] * b[3],
        a[0] * b[3] + a[3] * b[0] + a[1] * b[2] - a[2] * b[1],
    ]
}

pub(crate) fn quat_inverse(q: &[f64; 4]) -> [f64; 4] {
    let norm2 = q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3];
    if norm2 <= 0.0 {
        return [1.0, 0.0, 0.0, 0.0];
    }
    [q[0] / norm2, -q[1] / norm2, -q[2] / norm2, -q[3] / norm2]
}

pub(crate) fn quat_scale(q: &[f64; 4], s: f64) -> [f64; 4] {
    [q[0] * s, q[1] * s, q[2] * s, q[3] * s]
}

pub(crate) fn quat_from_axis_angle(axis_angle: &Vector3<f64>) -> [f64; 4] {
    let angle = axis_angle.norm();
    if angle < 1e-12 {
        return [1.0, 0.0, 0.0, 0.0];
    }
    let half = 0.5 * angle;
    let s = half.sin() / angle;
    [half.cos(), axis_angle.x * s, axis_angle.y * s, axis_angle.z * s]
}

pub(crate) fn quat_rotate(q: &[f64; 4], v: &Vector3<f64>) -> Vector3<f64> {
    let pure = [0.0, v.x, v.y, v.z];
    let rotated = quat_multiply(&quat_multiply(q, &pure), &quat_inverse(q));
    Vector3::new(rotated[1], rotated[2], rotated[3])
}

/// Shortest-path spherical interpolation, falling back to normalized linear
/// blending when the endpoints are nearly parallel.
pub(crate) fn quat_slerp(q0: &[f64; 4], q1: &[f64; 4], t: f64) -> [f64; 4] {
    let mut q1 = *q1;
    let mut dot = q0[0] * q1[0] + q0[1] * q1[1] + q0[2] * q1[2] + q0[3] * q1[3];
    if dot < 0.0 {
        q1 = quat_scale(&q1, -1.0);
        dot = -dot;
    }
    if dot > 1.0 - 1e-12 {
        let mut blended = [0.0; 4];
        for i in 0..4 {
            blended[i] = q0[i] * (1.0 - t) + q1[i] * t;
        }
        let norm =
            (blended[0] * blended[0] + blended[1] * blended[1] + blended[2] * blended[2]
                + blended[3] * blended[3])
                .sqrt();
        return quat_scale(&blended, 1.0 / norm);
    }
    let theta = dot.min(1.0).acos();
    let sin_theta = theta.sin();
    let w0 = ((1.0 - t) * theta).sin() / sin_theta;
    let w1 = (t * theta).sin() / sin_theta;
    [
        q0[0] * w0 + q1[0] * w1,
        q0[1] * w0 + q1[1] * w1,
        q0[2] * w0 + q1[2] * w1,
        q0[3] * w0 + q1[3] * w1,
    ]
}

/// Rotates `dir0` a fraction `f` of the way toward `dir1` around the
/// axis-angle mapping one onto the other. Returns `None` when the two
/// directions are parallel and no rotation is defined.
pub(crate) fn direction_slerp(
    dir0: &Vector3<f64>,
    dir1: &Vector3<f64>,
    f: f64,
) -> Option<Vector3<f64>> {
    let axis_angle = dir0.cross(dir1);
    let sin_angle = axis_angle.norm();
    if sin_angle <= 1e-15 {
        return None;
    }
    let scaled = axis_angle * (f * sin_angle.min(1.0).asin() / sin_angle);
    Some(quat_rotate(&quat_from_axis_angle(&scaled), dir0))
}
