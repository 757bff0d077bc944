//! Boundary to the robot SDK and the motion helpers built on it.

pub mod bridge;
pub mod scripted;

pub use bridge::BridgeRobot;
pub use scripted::{RobotCommand, ScriptedRobot};

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::clock::SampleClock;
use crate::error::Result;
use crate::types::{JointPoseDeg, RobotStates};

/// Named control mode of a robot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode(pub String);

impl Mode {
    pub const NRT_PRIMITIVE_EXECUTION: &'static str = "NRT_PRIMITIVE_EXECUTION";

    pub fn primitive_execution() -> Self {
        Mode(Self::NRT_PRIMITIVE_EXECUTION.to_string())
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Motion primitives the calibration procedures issue.
#[derive(Clone, Debug, PartialEq)]
pub enum Primitive {
    /// Joint-space move to `target_deg` at `jnt_vel_scale` percent speed.
    MoveJ {
        target_deg: JointPoseDeg,
        jnt_vel_scale: f64,
    },
}

impl Primitive {
    pub fn move_j(target_deg: JointPoseDeg, jnt_vel_scale: f64) -> Self {
        Primitive::MoveJ {
            target_deg,
            jnt_vel_scale,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Primitive::MoveJ { .. } => "MoveJ",
        }
    }
}

/// The subset of the robot SDK used here.
pub trait RobotClient {
    fn serial(&self) -> &str;
    fn states(&mut self) -> Result<RobotStates>;
    fn mode(&mut self) -> Result<Mode>;
    fn switch_mode(&mut self, mode: &Mode) -> Result<()>;
    fn execute_primitive(&mut self, primitive: &Primitive) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

impl<R: RobotClient + ?Sized> RobotClient for Box<R> {
    fn serial(&self) -> &str {
        (**self).serial()
    }
    fn states(&mut self) -> Result<RobotStates> {
        (**self).states()
    }
    fn mode(&mut self) -> Result<Mode> {
        (**self).mode()
    }
    fn switch_mode(&mut self, mode: &Mode) -> Result<()> {
        (**self).switch_mode(mode)
    }
    fn execute_primitive(&mut self, primitive: &Primitive) -> Result<()> {
        (**self).execute_primitive(primitive)
    }
    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }
}

/// Reach-wait tuning.
pub const REACH_TOLERANCE_DEG: f64 = 2.0;
pub const REACH_POLL_S: f64 = 0.2;
pub const PEDAL_POLL_S: f64 = 0.05;

/// Switch to primitive execution and start a MoveJ.
pub fn move_j_deg<R: RobotClient + ?Sized>(robot: &mut R, target_deg: &JointPoseDeg, vel_scale: f64) -> Result<()> {
    robot.switch_mode(&Mode::primitive_execution())?;
    robot.execute_primitive(&Primitive::move_j(*target_deg, vel_scale))
}

/// Every joint within `tol_deg` of the target.
pub fn is_reached(states: &RobotStates, target_deg: &JointPoseDeg, tol_deg: f64) -> bool {
    let tol = tol_deg.to_radians();
    states
        .q
        .iter()
        .zip(target_deg.iter())
        .all(|(q, target)| (q - target.to_radians()).abs() <= tol)
}

/// Poll joint angles until the pose is reached or `timeout_s` elapses.
/// Returns whether the pose was reached.
pub async fn wait_reached<R: RobotClient + ?Sized>(
    robot: &mut R,
    target_deg: &JointPoseDeg,
    tol_deg: f64,
    timeout_s: f64,
    cancel: &CancellationToken,
) -> Result<bool> {
    let mut clock = SampleClock::from_secs(REACH_POLL_S);
    loop {
        let t = clock.tick(cancel).await?;
        if is_reached(&robot.states()?, target_deg, tol_deg) {
            return Ok(true);
        }
        if t >= timeout_s {
            log::warn!("[robot {}] pose not reached within {:.1}s", robot.serial(), timeout_s);
            return Ok(false);
        }
    }
}

/// Drive both arms to the same joint pose and wait for each.
pub async fn sync_pose<L, F>(
    leader: &mut L,
    follower: &mut F,
    target_deg: &JointPoseDeg,
    vel_scale: f64,
    timeout_s: f64,
    cancel: &CancellationToken,
) -> Result<()>
where
    L: RobotClient + ?Sized,
    F: RobotClient + ?Sized,
{
    log::info!("[robot] MoveJ both arms to {:?} (scale {})", target_deg, vel_scale);
    move_j_deg(leader, target_deg, vel_scale)?;
    move_j_deg(follower, target_deg, vel_scale)?;
    wait_reached(leader, target_deg, REACH_TOLERANCE_DEG, timeout_s, cancel).await?;
    wait_reached(follower, target_deg, REACH_TOLERANCE_DEG, timeout_s, cancel).await?;
    Ok(())
}

/// MoveJ every robot to one pose, wait for each, then put back the modes
/// they were in before the move.
pub async fn move_all_restoring<R: RobotClient>(
    robots: &mut [R],
    target_deg: &JointPoseDeg,
    vel_scale: f64,
    timeout_s: f64,
    cancel: &CancellationToken,
) -> Result<()> {
    let modes = robots.iter_mut().map(|r| r.mode()).collect::<Result<Vec<_>>>()?;
    for robot in robots.iter_mut() {
        move_j_deg(robot, target_deg, vel_scale)?;
    }
    for robot in robots.iter_mut() {
        wait_reached(robot, target_deg, REACH_TOLERANCE_DEG, timeout_s, cancel).await?;
    }
    for (robot, mode) in robots.iter_mut().zip(&modes) {
        robot.switch_mode(mode)?;
    }
    Ok(())
}

pub fn stop_all<R: RobotClient>(robots: &mut [R]) {
    for robot in robots.iter_mut() {
        stop_logged(robot);
    }
}

/// Best-effort stop of both arms; failures are logged, not returned.
pub fn stop_both<L, F>(leader: &mut L, follower: &mut F)
where
    L: RobotClient + ?Sized,
    F: RobotClient + ?Sized,
{
    stop_logged(leader);
    stop_logged(follower);
}

fn stop_logged<R: RobotClient + ?Sized>(robot: &mut R) {
    match robot.stop() {
        Ok(()) => log::info!("[robot {}] stopped", robot.serial()),
        Err(e) => log::warn!("[robot {}] stop failed: {}", robot.serial(), e),
    }
}

/// Pedal state; a failed read counts as released.
pub fn pedal_pressed<R: RobotClient + ?Sized>(robot: &mut R) -> bool {
    robot.states().map(|s| s.pedal_pressed()).unwrap_or(false)
}

pub async fn wait_pedal_press<R: RobotClient + ?Sized>(robot: &mut R, cancel: &CancellationToken) -> Result<()> {
    let mut clock = SampleClock::from_secs(PEDAL_POLL_S);
    loop {
        clock.tick(cancel).await?;
        if pedal_pressed(robot) {
            return Ok(());
        }
    }
}

/// Wait for release; a failed read counts as still pressed.
pub async fn wait_pedal_release<R: RobotClient + ?Sized>(robot: &mut R, cancel: &CancellationToken) -> Result<()> {
    let mut clock = SampleClock::from_secs(PEDAL_POLL_S);
    loop {
        clock.tick(cancel).await?;
        let pressed = robot.states().map(|s| s.pedal_pressed()).unwrap_or(true);
        if !pressed {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CalibError;

    fn pedal(pressed: bool) -> RobotStates {
        let mut states = RobotStates::at_rest();
        states.digital_inputs = vec![pressed];
        states
    }

    #[test]
    fn test_is_reached_tolerance() {
        let mut states = RobotStates::at_rest();
        states.q[3] = 91.5_f64.to_radians();
        let mut target = [0.0; 7];
        target[3] = 90.0;
        assert!(is_reached(&states, &target, 2.0));
        target[3] = 88.0;
        assert!(!is_reached(&states, &target, 2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_pose_moves_both_and_reaches() {
        let cancel = CancellationToken::new();
        let mut leader = ScriptedRobot::new("L");
        let mut follower = ScriptedRobot::new("F");
        let target = [0.0, -40.0, 0.0, 90.0, 0.0, 40.0, 0.0];

        sync_pose(&mut leader, &mut follower, &target, 25.0, 7.0, &cancel)
            .await
            .unwrap();

        for robot in [&leader, &follower] {
            assert_eq!(
                robot.commands(),
                &[
                    RobotCommand::SwitchMode(Mode::primitive_execution()),
                    RobotCommand::Primitive(Primitive::move_j(target, 25.0)),
                ]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_all_restores_modes() {
        let cancel = CancellationToken::new();
        let mut robots = vec![ScriptedRobot::new("A"), ScriptedRobot::new("B")];
        let before = robots[0].mode().unwrap();
        let target = [5.0; 7];

        move_all_restoring(&mut robots, &target, 15.0, 5.0, &cancel).await.unwrap();

        for robot in &mut robots {
            assert_eq!(robot.mode().unwrap(), before);
            assert_eq!(
                robot.commands()[1],
                RobotCommand::Primitive(Primitive::move_j(target, 15.0))
            );
        }
        stop_all(&mut robots);
        assert_eq!(robots[1].commands().last(), Some(&RobotCommand::Stop));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_reached_times_out() {
        let cancel = CancellationToken::new();
        let mut robot = ScriptedRobot::new("L").ignore_motion();
        let reached = wait_reached(&mut robot, &[10.0; 7], 2.0, 1.0, &cancel).await.unwrap();
        assert!(!reached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pedal_waits() {
        let cancel = CancellationToken::new();
        let mut robot = ScriptedRobot::with_states(
            "L",
            vec![pedal(false), pedal(false), pedal(true), pedal(true), pedal(false)],
        );
        wait_pedal_press(&mut robot, &cancel).await.unwrap();
        assert_eq!(robot.remaining(), 2);
        wait_pedal_release(&mut robot, &cancel).await.unwrap();
        assert_eq!(robot.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pedal_read_failure_semantics() {
        let cancel = CancellationToken::new();
        let mut robot = ScriptedRobot::new("L").failing();
        assert!(!pedal_pressed(&mut robot));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            trigger.cancel();
        });
        // A dead link never reads as released
        let result = wait_pedal_release(&mut robot, &cancel).await;
        assert!(matches!(result, Err(CalibError::Cancelled)));
    }
}
