//! Linear algebra aliases for robot telemetry
//!
//! Fixed-size nalgebra vectors keep positions, twists and wrenches
//! dimension-checked at compile time.

use nalgebra::{SVector, Vector3, Vector6};

// ===== Dimensions =====
pub const JOINT_COUNT: usize = 7; // 7-DoF arm
pub const TCP_POSE_DIM: usize = 7; // x, y, z, qw, qx, qy, qz
pub const TWIST_DIM: usize = 6; // vx, vy, vz, wx, wy, wz
pub const WRENCH_DIM: usize = 6; // fx, fy, fz, tx, ty, tz

// ===== Vector Types =====
pub type Vec3 = Vector3<f64>;
pub type Vec6 = Vector6<f64>;
pub type JointVec = SVector<f64, JOINT_COUNT>;

/// Joint-space target in degrees, as stored in the pose tables.
pub type JointPoseDeg = [f64; JOINT_COUNT];
