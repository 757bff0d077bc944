//! Calibration measurements for a leader/follower teleoperation rig.
//!
//! The procedures in [`session`] drive both arms through the robot SDK,
//! launch and tear down the teleop program, segment live telemetry and
//! reduce it to damping, drag, stiffness, transparency, contact and hover
//! figures written to timestamped CSV reports.

pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod operator;
pub mod poses;
pub mod report;
pub mod robot;
pub mod segmentation;
pub mod session;
pub mod supervisor;
pub mod types;

pub use error::{CalibError, Result};
