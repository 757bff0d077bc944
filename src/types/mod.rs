pub mod linalg;

pub use linalg::*;

use nalgebra::{Quaternion, UnitQuaternion};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw snapshot returned by the robot SDK `states()` call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RobotStates {
    pub tcp_pose: [f64; TCP_POSE_DIM],
    pub tcp_vel: [f64; TWIST_DIM],
    pub ext_wrench_in_world: [f64; WRENCH_DIM],
    pub q: [f64; JOINT_COUNT], // rad
    #[serde(default)]
    pub digital_inputs: Vec<bool>,
}

impl RobotStates {
    /// Robot at rest at the origin with identity orientation.
    pub fn at_rest() -> Self {
        Self {
            tcp_pose: [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
            tcp_vel: [0.0; TWIST_DIM],
            ext_wrench_in_world: [0.0; WRENCH_DIM],
            q: [0.0; JOINT_COUNT],
            digital_inputs: vec![false],
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(self.tcp_pose[0], self.tcp_pose[1], self.tcp_pose[2])
    }

    /// Roll, pitch, yaw (rad) of the TCP orientation.
    pub fn orientation_rpy(&self) -> Vec3 {
        quat_to_euler(
            self.tcp_pose[3],
            self.tcp_pose[4],
            self.tcp_pose[5],
            self.tcp_pose[6],
        )
    }

    /// Pedal is wired to digital input 0.
    pub fn pedal_pressed(&self) -> bool {
        self.digital_inputs.first().copied().unwrap_or(false)
    }
}

/// One telemetry sample of a single robot endpoint, stamped with
/// session-relative seconds.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub t: f64,
    pub position: Vec3,
    pub orientation_rpy: Vec3,
    pub velocity: Vec6,
    pub wrench: Vec6,
    pub joints: JointVec,
    pub pedal: bool,
}

impl Sample {
    pub fn from_states(t: f64, states: &RobotStates) -> Self {
        Self {
            t,
            position: states.position(),
            orientation_rpy: states.orientation_rpy(),
            velocity: Vec6::from_column_slice(&states.tcp_vel),
            wrench: Vec6::from_column_slice(&states.ext_wrench_in_world),
            joints: JointVec::from_column_slice(&states.q),
            pedal: states.pedal_pressed(),
        }
    }

    /// Position (m) for linear axes, Euler angle (rad) for rotational ones.
    pub fn pose_component(&self, axis: Axis) -> f64 {
        if axis.is_rotational() {
            self.orientation_rpy[axis.component()]
        } else {
            self.position[axis.component()]
        }
    }

    pub fn velocity_along(&self, axis: Axis) -> f64 {
        self.velocity[axis.index()]
    }

    pub fn wrench_along(&self, axis: Axis) -> f64 {
        self.wrench[axis.index()]
    }
}

/// Simultaneous samples of the leader (master) and follower (slave) arms.
#[derive(Clone, Debug, PartialEq)]
pub struct DualSample {
    pub t: f64,
    pub leader: Sample,
    pub follower: Sample,
}

impl DualSample {
    pub fn from_states(t: f64, leader: &RobotStates, follower: &RobotStates) -> Self {
        Self {
            t,
            leader: Sample::from_states(t, leader),
            follower: Sample::from_states(t, follower),
        }
    }

    /// Follower minus leader along `axis` (m or rad).
    pub fn tracking_error(&self, axis: Axis) -> f64 {
        self.follower.pose_component(axis) - self.leader.pose_component(axis)
    }
}

/// Cartesian measurement axis of the TCP.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
    Rx,
    Ry,
    Rz,
}

impl Axis {
    pub const ALL: [Axis; 6] = [Axis::X, Axis::Y, Axis::Z, Axis::Rx, Axis::Ry, Axis::Rz];
    pub const LINEAR: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Index into 6-vectors (twist, wrench).
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
            Axis::Rx => 3,
            Axis::Ry => 4,
            Axis::Rz => 5,
        }
    }

    /// Index into the matching 3-vector (position or Euler angles).
    pub fn component(self) -> usize {
        self.index() % 3
    }

    pub fn is_rotational(self) -> bool {
        self.index() >= 3
    }

    pub fn wrench_unit(self) -> &'static str {
        if self.is_rotational() {
            "Nm"
        } else {
            "N"
        }
    }

    pub fn stiffness_unit(self) -> &'static str {
        if self.is_rotational() {
            "Nm/rad"
        } else {
            "N/m"
        }
    }

    pub fn error_unit(self) -> &'static str {
        if self.is_rotational() {
            "rad"
        } else {
            "m"
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
            Axis::Rx => "Rx",
            Axis::Ry => "Ry",
            Axis::Rz => "Rz",
        };
        f.write_str(name)
    }
}

/// Convert a (w, x, y, z) quaternion to roll, pitch, yaw in radians.
///
/// The quaternion is normalised first, so slightly drifted SDK values are fine.
pub fn quat_to_euler(qw: f64, qx: f64, qy: f64, qz: f64) -> Vec3 {
    let q = UnitQuaternion::from_quaternion(Quaternion::new(qw, qx, qy, qz));
    let (roll, pitch, yaw) = q.euler_angles();
    Vec3::new(roll, pitch, yaw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_quat_identity() {
        let rpy = quat_to_euler(1.0, 0.0, 0.0, 0.0);
        assert_abs_diff_eq!(rpy.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_quat_yaw_90() {
        let half = FRAC_PI_2 / 2.0;
        let rpy = quat_to_euler(half.cos(), 0.0, 0.0, half.sin());
        assert_abs_diff_eq!(rpy[2], FRAC_PI_2, epsilon = 1e-9);
        assert_abs_diff_eq!(rpy[0], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_axis_indices() {
        assert_eq!(Axis::Rz.index(), 5);
        assert_eq!(Axis::Rz.component(), 2);
        assert!(Axis::Rx.is_rotational());
        assert!(!Axis::Z.is_rotational());
        assert_eq!(Axis::Ry.wrench_unit(), "Nm");
    }

    #[test]
    fn test_sample_components() {
        let mut states = RobotStates::at_rest();
        states.tcp_pose[1] = 0.25;
        states.tcp_vel[4] = -0.3;
        states.ext_wrench_in_world[2] = 9.5;
        states.digital_inputs = vec![true, false];
        let sample = Sample::from_states(1.5, &states);

        assert_eq!(sample.pose_component(Axis::Y), 0.25);
        assert_eq!(sample.velocity_along(Axis::Ry), -0.3);
        assert_eq!(sample.wrench_along(Axis::Z), 9.5);
        assert!(sample.pedal);
    }

    #[test]
    fn test_tracking_error_sign() {
        let leader = RobotStates::at_rest();
        let mut follower = RobotStates::at_rest();
        follower.tcp_pose[0] = 0.004;
        let dual = DualSample::from_states(0.0, &leader, &follower);
        assert_abs_diff_eq!(dual.tracking_error(Axis::X), 0.004, epsilon = 1e-12);
    }

    #[test]
    fn test_states_json_roundtrip_defaults_inputs() {
        let json = r#"{"tcp_pose":[0,0,0,1,0,0,0],"tcp_vel":[0,0,0,0,0,0],
            "ext_wrench_in_world":[0,0,0,0,0,0],"q":[0,0,0,0,0,0,0]}"#;
        let states: RobotStates = serde_json::from_str(json).unwrap();
        assert!(states.digital_inputs.is_empty());
        assert!(!states.pedal_pressed());
    }
}
