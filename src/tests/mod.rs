//! End-to-end scenarios over a parry3d-backed test world.

mod test_robot;

mod trajectory_scenarios;
