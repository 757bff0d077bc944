//! One calibration run: robots, operator, teleop process and report.
//!
//! Procedures borrow the session, and `finish` runs on every exit path so
//! the teleop program and both arms are always stopped before returning.

pub mod contact;
pub mod damping;
pub mod drag;
pub mod hover;
pub mod stiffness;
pub mod transparency;

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::clock::sleep_secs;
use crate::config::CalibrationConfig;
use crate::error::{CalibError, Result};
use crate::operator::{pause, Operator};
use crate::report::CsvReport;
use crate::robot::{stop_both, sync_pose, Mode, RobotClient};
use crate::supervisor::{teleop_args, Elevation, ProcessSupervisor};
use crate::metrics::mean;
use crate::types::{Axis, JointPoseDeg};

/// How the teleop program gets started for a run.
#[derive(Clone, Debug)]
pub enum LaunchPlan {
    /// The operator starts and stops the program by hand.
    Manual { name: Option<String> },
    /// The supervisor launches `exe` in its own process group.
    Supervised {
        exe: PathBuf,
        args: Vec<String>,
        elevation: Elevation,
    },
}

impl LaunchPlan {
    pub fn supervised(exe: &Path, leader: &str, follower: &str, elevation: Elevation) -> Self {
        LaunchPlan::Supervised {
            exe: exe.to_path_buf(),
            args: teleop_args(exe, leader, follower),
            elevation,
        }
    }

    /// File name of the teleop program, when known.
    pub fn name(&self) -> Option<String> {
        match self {
            LaunchPlan::Manual { name } => name.clone(),
            LaunchPlan::Supervised { exe, .. } => exe.file_name().map(|n| n.to_string_lossy().into_owned()),
        }
    }

    pub fn is_high_transparency(&self) -> bool {
        self.name().is_some_and(|n| n.contains("high_transparency"))
    }
}

/// Trial values of one axis with their mean.
#[derive(Clone, Debug, PartialEq)]
pub struct AxisTrials {
    pub axis: Axis,
    pub trials: Vec<f64>,
    pub mean: f64,
}

impl AxisTrials {
    pub fn new(axis: Axis, trials: Vec<f64>) -> Self {
        let mean = mean(&trials);
        Self { axis, trials, mean }
    }
}

/// Whether the teleop program is believed to be running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeleopState {
    Idle,
    Running,
}

pub struct Session<R: RobotClient, O: Operator> {
    leader: R,
    follower: R,
    operator: O,
    supervisor: ProcessSupervisor,
    launch: LaunchPlan,
    teleop: TeleopState,
    config: CalibrationConfig,
    cancel: CancellationToken,
    report: CsvReport,
}

impl<R: RobotClient, O: Operator> Session<R, O> {
    pub fn new(
        robots: (R, R),
        operator: O,
        launch: LaunchPlan,
        config: CalibrationConfig,
        cancel: CancellationToken,
        report: CsvReport,
    ) -> Self {
        let elevation = match &launch {
            LaunchPlan::Supervised { elevation, .. } => elevation.clone(),
            LaunchPlan::Manual { .. } => Elevation::Direct,
        };
        let supervisor = ProcessSupervisor::new(elevation, config.supervisor.clone());
        let (leader, follower) = robots;
        Self {
            leader,
            follower,
            operator,
            supervisor,
            launch,
            teleop: TeleopState::Idle,
            config,
            cancel,
            report,
        }
    }

    pub fn leader(&self) -> &R {
        &self.leader
    }

    pub fn follower(&self) -> &R {
        &self.follower
    }

    pub fn operator(&self) -> &O {
        &self.operator
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn report_path(&self) -> &Path {
        self.report.path()
    }

    pub fn teleop_state(&self) -> TeleopState {
        self.teleop
    }

    async fn prompt(&mut self, message: &str) -> Result<()> {
        pause(&mut self.operator, message, &self.cancel).await
    }

    /// Start the teleop program, then wait the warm-up before returning.
    async fn launch_teleop(&mut self) -> Result<()> {
        if self.teleop == TeleopState::Running {
            return Err(CalibError::AlreadyRunning);
        }
        let supervised = match &self.launch {
            LaunchPlan::Supervised { exe, args, .. } => Some((exe.clone(), args.clone())),
            LaunchPlan::Manual { .. } => None,
        };
        match supervised {
            Some((exe, args)) => {
                self.operator.say(&format!("Starting {}", exe.display()));
                self.supervisor.start(&exe, &args, &self.cancel).await?;
            }
            None => self.prompt("Start the teleop program now, then press Enter: ").await?,
        }
        self.teleop = TeleopState::Running;

        let warmup = self.config.warmup_s;
        self.operator.say(&format!("Waiting {:.0}s for teleop to settle...", warmup));
        sleep_secs(warmup, &self.cancel).await
    }

    async fn stop_teleop(&mut self) {
        if self.teleop == TeleopState::Idle {
            return;
        }
        match self.launch {
            LaunchPlan::Supervised { .. } => self.supervisor.stop().await,
            LaunchPlan::Manual { .. } => self.operator.say("Stop the teleop program now."),
        }
        self.teleop = TeleopState::Idle;
    }

    fn stop_robots(&mut self) {
        stop_both(&mut self.leader, &mut self.follower);
    }

    async fn sync_to(&mut self, target_deg: &JointPoseDeg, vel_scale: f64, timeout_s: f64) -> Result<()> {
        sync_pose(
            &mut self.leader,
            &mut self.follower,
            target_deg,
            vel_scale,
            timeout_s,
            &self.cancel,
        )
        .await
    }

    async fn sync_home(&mut self) -> Result<()> {
        let home = self.config.home_pose_deg;
        let (scale, timeout) = (self.config.sync_vel_scale, self.config.home_timeout_s);
        self.operator.say("Syncing both arms to the home pose...");
        self.sync_to(&home, scale, timeout).await
    }

    fn modes(&mut self) -> Result<(Mode, Mode)> {
        Ok((self.leader.mode()?, self.follower.mode()?))
    }

    fn restore_modes(&mut self, modes: &(Mode, Mode)) -> Result<()> {
        self.leader.switch_mode(&modes.0)?;
        self.follower.switch_mode(&modes.1)
    }

    /// Cleanup for every exit path: teleop stopped, arms stopped, report
    /// flushed, with an abort marker when the run failed.
    pub async fn finish<T>(&mut self, outcome: Result<T>) -> Result<T> {
        self.stop_teleop().await;
        // Covers a launch that failed half way through
        self.supervisor.stop().await;
        self.stop_robots();

        if let Err(e) = &outcome {
            let reason = if e.is_cancelled() { "cancelled".to_string() } else { e.to_string() };
            log::error!("[session] aborted: {}", reason);
            if let Err(write_err) = self.report.abort_marker(&reason) {
                log::warn!("[session] could not mark report: {}", write_err);
            }
            let path = self.report.path().display().to_string();
            self.operator
                .say(&format!("Aborted ({reason}). Teleop and robots stopped, partial results in {path}"));
        } else {
            self.report.flush()?;
            let path = self.report.path().display().to_string();
            self.operator.say(&format!("Done. Results saved to {path}"));
        }
        outcome
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::robot::{RobotCommand, ScriptedRobot};

    #[test]
    fn test_launch_plan_names() {
        let plan = LaunchPlan::supervised(Path::new("/opt/test_high_transparency"), "L", "F", Elevation::Direct);
        assert!(plan.is_high_transparency());
        let LaunchPlan::Supervised { args, .. } = &plan else {
            panic!("expected supervised plan");
        };
        assert_eq!(args, &["-l", "L", "-r", "F"]);

        assert!(!LaunchPlan::Manual { name: None }.is_high_transparency());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_on_error_stops_and_marks() {
        let mut session = session(
            "finish_err",
            ScriptedRobot::new("L"),
            ScriptedRobot::new("F"),
            &[""],
            CalibrationConfig::default(),
            None,
        );
        session.launch_teleop().await.unwrap();
        assert_eq!(session.teleop_state(), TeleopState::Running);

        let outcome: Result<()> = session.finish(Err(CalibError::Cancelled)).await;
        assert!(matches!(outcome, Err(CalibError::Cancelled)));
        assert_eq!(session.teleop_state(), TeleopState::Idle);
        assert_eq!(session.leader().commands().last(), Some(&RobotCommand::Stop));
        assert_eq!(session.follower().commands().last(), Some(&RobotCommand::Stop));
        assert!(report_text(&session).contains("ABORTED\nreason,cancelled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_launch_rejected() {
        let mut session = session(
            "double_launch",
            ScriptedRobot::new("L"),
            ScriptedRobot::new("F"),
            &["", ""],
            CalibrationConfig::default(),
            None,
        );
        session.launch_teleop().await.unwrap();
        assert!(matches!(session.launch_teleop().await, Err(CalibError::AlreadyRunning)));
        session.finish(Ok(())).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_home_then_restore_modes() {
        let mut session = session(
            "home",
            ScriptedRobot::new("L"),
            ScriptedRobot::new("F"),
            &[],
            CalibrationConfig::default(),
            None,
        );
        let modes = session.modes().unwrap();
        session.sync_home().await.unwrap();
        assert_eq!(session.leader.mode().unwrap(), Mode::primitive_execution());
        session.restore_modes(&modes).unwrap();
        assert_eq!(session.leader.mode().unwrap(), modes.0);
    }
}
