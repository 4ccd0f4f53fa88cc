//! Trajectory end-to-end scenarios: derivative-aware sampling, higher-order
//! interpolant chains, IK-parameterized groups and binary round-trips.

use approx::assert_relative_eq;

use crate::error::SamplingError;
use crate::serialization::{Readable, ReadableKind, TRAJECTORY_FORMAT_VERSION, TRAJECTORY_MAGIC};
use crate::spec::{ConfigurationSpec, Group};
use crate::trajectory::Trajectory;

fn linear_with_velocities() -> Trajectory {
    let spec = ConfigurationSpec::new(vec![
        Group::new("deltatime", 0, 1, ""),
        Group::new("joint_values robot0", 1, 2, "linear"),
        Group::new("joint_velocities robot0", 3, 2, "next"),
    ]);
    let mut trajectory = Trajectory::new();
    trajectory.init(spec, 0, false).unwrap();
    trajectory
        .insert(
            0,
            &[
                0.0, 0.0, 0.0, 0.0, 0.0, //
                1.0, 1.0, 2.0, 1.0, 2.0, //
                1.0, 2.0, 4.0, 1.0, 2.0,
            ],
            false,
        )
        .unwrap();
    trajectory
}

#[test]
fn test_derivative_aware_linear_sampling_scenario() {
    let trajectory = linear_with_velocities();
    assert_relative_eq!(trajectory.duration().unwrap(), 2.0);
    let mut row = Vec::new();
    trajectory.sample(0.5, &mut row).unwrap();
    assert_relative_eq!(row[0], 0.5, epsilon = 1e-12);
    assert_relative_eq!(row[1], 0.5, epsilon = 1e-12);
    assert_relative_eq!(row[2], 1.0, epsilon = 1e-12);
    assert_relative_eq!(row[3], 1.0, epsilon = 1e-12);
    assert_relative_eq!(row[4], 2.0, epsilon = 1e-12);
}

#[test]
fn test_sample_at_boundaries_matches_waypoints() {
    let trajectory = linear_with_velocities();
    let mut row = Vec::new();
    trajectory.sample(0.0, &mut row).unwrap();
    assert_eq!(row, trajectory.waypoint(0).unwrap());
    let duration = trajectory.duration().unwrap();
    trajectory.sample(duration, &mut row).unwrap();
    assert_eq!(row, trajectory.waypoint(2).unwrap());
}

#[test]
fn test_quintic_hermite_scenario() {
    // Single DOF from rest to rest: p 0 -> 1, v = a = 0 at both ends.
    let spec = ConfigurationSpec::new(vec![
        Group::new("deltatime", 0, 1, ""),
        Group::new("joint_values robot0", 1, 1, "quintic"),
        Group::new("joint_velocities robot0", 2, 1, "quartic"),
        Group::new("joint_accelerations robot0", 3, 1, "cubic"),
    ]);
    let mut trajectory = Trajectory::new();
    trajectory.init(spec, 0, false).unwrap();
    trajectory
        .insert(
            0,
            &[
                0.0, 0.0, 0.0, 0.0, //
                1.0, 1.0, 0.0, 0.0,
            ],
            false,
        )
        .unwrap();
    let mut row = Vec::new();
    trajectory.sample(0.5, &mut row).unwrap();
    // 10 t^3 - 15 t^4 + 6 t^5 at t = 0.5.
    assert_relative_eq!(row[1], 0.5, epsilon = 1e-12);
    // The quartic velocity interpolant reproduces the quintic's derivative:
    // 30 t^2 - 60 t^3 + 30 t^4 at t = 0.5.
    assert_relative_eq!(row[2], 1.875, epsilon = 1e-9);
}

#[test]
fn test_sextic_chain_reproduces_cubic_motion() {
    // x(t) = t^3 carries v = 3t^2, a = 6t, jerk = 6; the sextic family
    // contains it, so sampling must reproduce it exactly.
    let spec = ConfigurationSpec::new(vec![
        Group::new("deltatime", 0, 1, ""),
        Group::new("joint_values robot0", 1, 1, "sextic"),
        Group::new("joint_velocities robot0", 2, 1, "quintic"),
        Group::new("joint_accelerations robot0", 3, 1, "quartic"),
        Group::new("joint_jerks robot0", 4, 1, "cubic"),
    ]);
    let mut trajectory = Trajectory::new();
    trajectory.init(spec, 0, false).unwrap();
    trajectory
        .insert(
            0,
            &[
                0.0, 0.0, 0.0, 0.0, 6.0, //
                1.0, 1.0, 3.0, 6.0, 6.0,
            ],
            false,
        )
        .unwrap();
    let mut row = Vec::new();
    trajectory.sample(0.5, &mut row).unwrap();
    assert_relative_eq!(row[1], 0.125, epsilon = 1e-9);
    assert_relative_eq!(row[2], 0.75, epsilon = 1e-9);
    assert_relative_eq!(row[3], 3.0, epsilon = 1e-9);
    assert_relative_eq!(row[4], 6.0, epsilon = 1e-9);
}

#[test]
fn test_quintic_without_chain_fails_at_sample_time() {
    // The velocity group's "next" interpolation is not the formal derivative
    // of "quintic", so the position group resolves neither chain; the error
    // surfaces at sample time, naming the group.
    let spec = ConfigurationSpec::new(vec![
        Group::new("deltatime", 0, 1, ""),
        Group::new("joint_values robot0", 1, 1, "quintic"),
        Group::new("joint_velocities robot0", 2, 1, "next"),
    ]);
    let mut trajectory = Trajectory::new();
    trajectory.init(spec, 0, false).unwrap();
    trajectory
        .insert(0, &[0.0, 0.0, 0.0, 1.0, 1.0, 0.0], false)
        .unwrap();
    let mut row = Vec::new();
    match trajectory.sample(0.5, &mut row).unwrap_err() {
        SamplingError::InvalidArgument(message) => {
            assert!(message.contains("joint_values robot0"));
            assert!(message.contains("quintic"));
        }
        other => panic!("expected InvalidArgument, got {:?}", other),
    }
}

#[test]
fn test_ik_transform6d_linear_slerp() {
    let spec = ConfigurationSpec::new(vec![
        Group::new("deltatime", 0, 1, ""),
        Group::new("ikparam_values 0x67000001", 1, 7, "linear"),
    ]);
    let mut trajectory = Trajectory::new();
    trajectory.init(spec, 0, false).unwrap();
    let half_turn = std::f64::consts::FRAC_PI_2;
    let (c, s) = ((half_turn / 2.0).cos(), (half_turn / 2.0).sin());
    // Identity pose to a 90-degree z-rotation translated one unit along x.
    trajectory
        .insert(
            0,
            &[
                0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, //
                1.0, c, 0.0, 0.0, s, 1.0, 0.0, 0.0,
            ],
            false,
        )
        .unwrap();
    let mut row = Vec::new();
    trajectory.sample(0.5, &mut row).unwrap();
    // Slerp halfway: a 45-degree z-rotation; translation blends linearly.
    let expected = (half_turn / 4.0).cos();
    let expected_s = (half_turn / 4.0).sin();
    assert_relative_eq!(row[1], expected, epsilon = 1e-12);
    assert_relative_eq!(row[2], 0.0, epsilon = 1e-12);
    assert_relative_eq!(row[3], 0.0, epsilon = 1e-12);
    assert_relative_eq!(row[4], expected_s, epsilon = 1e-12);
    assert_relative_eq!(row[5], 0.5, epsilon = 1e-12);
}

#[test]
fn test_ik_direction5d_linear_rotates_direction() {
    let spec = ConfigurationSpec::new(vec![
        Group::new("deltatime", 0, 1, ""),
        Group::new("ikparam_values 0x56000007", 1, 6, "linear"),
    ]);
    let mut trajectory = Trajectory::new();
    trajectory.init(spec, 0, false).unwrap();
    // Direction swings from +x to +y while the target point moves along z.
    trajectory
        .insert(
            0,
            &[
                0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, //
                1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 2.0,
            ],
            false,
        )
        .unwrap();
    let mut row = Vec::new();
    trajectory.sample(0.5, &mut row).unwrap();
    let eighth = std::f64::consts::FRAC_PI_4;
    assert_relative_eq!(row[1], eighth.cos(), epsilon = 1e-12);
    assert_relative_eq!(row[2], eighth.sin(), epsilon = 1e-12);
    assert_relative_eq!(row[3], 0.0, epsilon = 1e-12);
    // The direction stays unit length instead of cutting the chord.
    let norm = (row[1] * row[1] + row[2] * row[2] + row[3] * row[3]).sqrt();
    assert_relative_eq!(norm, 1.0, epsilon = 1e-12);
    assert_relative_eq!(row[6], 1.0, epsilon = 1e-12);
}

#[test]
fn test_ik_direction5d_cubic_is_not_implemented() {
    let spec = ConfigurationSpec::new(vec![
        Group::new("deltatime", 0, 1, ""),
        Group::new("ikparam_values 0x56000007", 1, 6, "cubic"),
        Group::new("ikparam_velocities 0x56000007", 7, 6, "quadratic"),
        Group::new("ikparam_accelerations 0x56000007", 13, 6, "linear"),
    ]);
    let mut trajectory = Trajectory::new();
    trajectory.init(spec, 0, false).unwrap();
    let mut rows = vec![0.0; 38];
    rows[1] = 1.0; // unit x direction at both points
    rows[19] = 1.0; // deltatime of the second point
    rows[20] = 1.0;
    trajectory.insert(0, &rows, false).unwrap();
    let mut row = Vec::new();
    let err = trajectory.sample(0.5, &mut row).unwrap_err();
    assert!(matches!(err, SamplingError::NotImplemented(_)));
}

#[test]
fn test_binary_roundtrip_scenario() {
    let mut trajectory = linear_with_velocities();
    trajectory.set_readable(Readable::string("meta", "x"));
    let mut buffer = Vec::new();
    trajectory.serialize(&mut buffer).unwrap();

    // Literal header checks.
    assert_eq!(u16::from_le_bytes([buffer[0], buffer[1]]), TRAJECTORY_MAGIC);
    assert_eq!(u16::from_le_bytes([buffer[0], buffer[1]]), 0x62FF);
    assert_eq!(
        u16::from_le_bytes([buffer[2], buffer[3]]),
        TRAJECTORY_FORMAT_VERSION
    );
    assert_eq!(u16::from_le_bytes([buffer[2], buffer[3]]), 0x0003);
    let marker = b"StringReadable";
    assert!(
        buffer.windows(marker.len()).any(|window| window == marker),
        "reader type missing from the stream"
    );

    let mut restored = Trajectory::new();
    restored.deserialize(&buffer).unwrap();
    assert_eq!(restored.spec(), trajectory.spec());
    assert_eq!(
        restored.waypoints(0, 3).unwrap(),
        trajectory.waypoints(0, 3).unwrap()
    );
    assert_eq!(restored.readables().len(), 1);
    assert_eq!(restored.readables()[0].id, "meta");
    assert_eq!(restored.readables()[0].payload, "x");
    assert_eq!(restored.readables()[0].kind, ReadableKind::StringReadable);
}

#[test]
fn test_sample_with_spec_converts_layout() {
    let trajectory = linear_with_velocities();
    let target = ConfigurationSpec::new(vec![
        Group::new("joint_values robot0", 0, 2, "linear"),
        Group::new("deltatime", 2, 1, ""),
    ]);
    let mut row = Vec::new();
    trajectory.sample_with_spec(0.5, &target, &mut row).unwrap();
    assert_eq!(row.len(), 3);
    assert_relative_eq!(row[0], 0.5, epsilon = 1e-12);
    assert_relative_eq!(row[1], 1.0, epsilon = 1e-12);
    assert_relative_eq!(row[2], 0.5, epsilon = 1e-12);
}

#[test]
fn test_fixed_step_sampling_with_spec() {
    let trajectory = linear_with_velocities();
    let target = ConfigurationSpec::new(vec![
        Group::new("joint_values robot0", 0, 2, "linear"),
        Group::new("deltatime", 2, 1, ""),
    ]);
    let mut rows = Vec::new();
    trajectory
        .sample_points_same_delta_time_with_spec(1.0, true, &target, &mut rows)
        .unwrap();
    // ceil(2/1) = 2 rows plus the ensured last point.
    assert_eq!(rows.len(), 9);
    assert_relative_eq!(rows[0], 0.0, epsilon = 1e-12);
    assert_relative_eq!(rows[3], 1.0, epsilon = 1e-12);
    // Final row is the last waypoint, converted.
    assert_relative_eq!(rows[6], 2.0, epsilon = 1e-12);
    assert_relative_eq!(rows[7], 4.0, epsilon = 1e-12);
    assert_relative_eq!(rows[8], 1.0, epsilon = 1e-12);
}

#[test]
fn test_validate_waypoints_accepts_consistent_quadratic() {
    // x(t) = t^2 between (0,0) and (1,1) with velocities 0 and 2.
    let spec = ConfigurationSpec::new(vec![
        Group::new("deltatime", 0, 1, ""),
        Group::new("joint_values robot0", 1, 1, "quadratic"),
        Group::new("joint_velocities robot0", 2, 1, "linear"),
    ]);
    let mut trajectory = Trajectory::new();
    trajectory.init(spec, 0, false).unwrap();
    trajectory
        .insert(0, &[0.0, 0.0, 0.0, 1.0, 1.0, 2.0], false)
        .unwrap();
    trajectory.validate_waypoints().unwrap();
    let mut row = Vec::new();
    trajectory.sample(0.5, &mut row).unwrap();
    assert_relative_eq!(row[1], 0.25, epsilon = 1e-12);
    assert_relative_eq!(row[2], 1.0, epsilon = 1e-12);
}

#[test]
fn test_group_order_preserved_through_roundtrip() {
    // Two robots contribute same-class groups; their relative order must
    // survive serialization.
    let spec = ConfigurationSpec::new(vec![
        Group::new("joint_values robotA", 0, 1, "linear"),
        Group::new("joint_values robotB", 1, 1, "linear"),
        Group::new("deltatime", 2, 1, ""),
    ]);
    let mut trajectory = Trajectory::new();
    trajectory.init(spec, 0, false).unwrap();
    trajectory.insert(0, &[1.0, 2.0, 0.0], false).unwrap();
    let mut buffer = Vec::new();
    trajectory.serialize(&mut buffer).unwrap();
    let mut restored = Trajectory::new();
    restored.deserialize(&buffer).unwrap();
    let names: Vec<&str> = restored
        .spec()
        .groups
        .iter()
        .map(|g| g.name.as_str())
        .collect();
    assert_eq!(
        names,
        vec!["deltatime", "joint_values robotA", "joint_values robotB"]
    );
}
