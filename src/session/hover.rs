//! Hover: how far the leader drifts in one second when let go.

use tokio::time::Instant;

use super::Session;
use crate::clock::sleep_secs;
use crate::error::{CalibError, Result};
use crate::metrics::{hover, mean, success_rate, HoverResult};
use crate::operator::Operator;
use crate::report::{ts_now, CsvReport};
use crate::robot::{wait_pedal_press, wait_pedal_release, RobotClient};
use crate::types::Sample;

/// Wait after stopping teleop before parking the arms.
const PARK_DELAY_S: f64 = 3.0;

#[derive(Clone, Debug)]
pub struct HoverSummary {
    pub trials: Vec<HoverResult>,
    pub mean_distance_mm: f64,
    pub success_rate: f64, // %
}

pub async fn run<R: RobotClient, O: Operator>(session: &mut Session<R, O>) -> Result<HoverSummary> {
    let cfg = session.config.hover.clone();
    let automatic = !session.launch.is_high_transparency();
    let count = cfg.trials.min(cfg.test_poses_deg.len());
    if count == 0 {
        return Err(CalibError::InvalidInput("hover needs at least one test pose".to_string()));
    }
    if count < cfg.trials {
        log::warn!("[hover] only {} test poses, running {} trials", cfg.test_poses_deg.len(), count);
    }

    let now = ts_now();
    session.report.row(["Hover Measurement", now.as_str()])?;
    session.report.flush()?;

    let modes = session.modes()?;
    let home = session.config.home_pose_deg;
    let home_timeout = session.config.home_timeout_s;
    session.operator.say("Syncing both arms to the home pose...");
    session.sync_to(&home, cfg.vel_scale, home_timeout).await?;
    session.restore_modes(&modes)?;

    session
        .prompt("Home pose synced. Press Enter to start teleop: ")
        .await?;
    session.launch_teleop().await?;

    let t0 = Instant::now();
    let mut trials = Vec::with_capacity(count);
    for i in 0..count {
        session.operator.say(&format!("===== Hover trial {}/{} =====", i + 1, count));
        if automatic {
            move_to_test_pose(session, i).await?;
        } else {
            session
                .prompt(&format!("Move the leader to test pose {}, then press Enter: ", i + 1))
                .await?;
        }

        session.operator.say("Press the pedal, then let go of the handle");
        wait_pedal_press(&mut session.leader, &session.cancel).await?;
        let start = Sample::from_states(t0.elapsed().as_secs_f64(), &session.leader.states()?);
        sleep_secs(cfg.window_s, &session.cancel).await?;
        let end = Sample::from_states(t0.elapsed().as_secs_f64(), &session.leader.states()?);

        let result = hover(&start.position, &end.position, cfg.threshold_mm);
        write_trial(&mut session.report, i + 1, [&start, &end], &result)?;
        session.operator.say(&format!(
            "  moved {:.2} mm: {}",
            result.distance_mm,
            if result.success { "PASS" } else { "FAIL" }
        ));
        log::info!("[hover] trial {}: {:.2} mm success={}", i + 1, result.distance_mm, result.success);
        trials.push(result);

        session.operator.say("Release the pedal");
        wait_pedal_release(&mut session.leader, &session.cancel).await?;
    }
    session.stop_teleop().await;

    let distances: Vec<f64> = trials.iter().map(|r| r.distance_mm).collect();
    let outcomes: Vec<bool> = trials.iter().map(|r| r.success).collect();
    let summary = HoverSummary {
        mean_distance_mm: mean(&distances),
        success_rate: success_rate(&outcomes),
        trials,
    };
    session.operator.say(&format!(
        "Mean drift {:.2} mm, success rate {:.1}%",
        summary.mean_distance_mm, summary.success_rate
    ));

    let report = &mut session.report;
    report.section("FinalResults")?;
    report.row(["Test", "Distance(mm)", "Success"])?;
    for (i, result) in summary.trials.iter().enumerate() {
        report.row([
            (i + 1).to_string(),
            format!("{:.3}", result.distance_mm),
            result.success.to_string(),
        ])?;
    }
    report.row(["Average".to_string(), format!("{:.3}", summary.mean_distance_mm)])?;
    report.row(["SuccessRate(%)".to_string(), format!("{:.1}", summary.success_rate)])?;
    report.flush()?;

    if automatic {
        park(session).await?;
    }
    Ok(summary)
}

/// Leader snapshots bracketing the hover window and the resulting drift.
fn write_trial(
    report: &mut CsvReport,
    trial: usize,
    snapshots: [&Sample; 2],
    result: &HoverResult,
) -> Result<()> {
    report.section(&format!("Trial={trial}"))?;
    report.row(["Snapshot", "time_s", "x", "y", "z"])?;
    for (label, s) in ["start", "end"].into_iter().zip(snapshots) {
        let mut row = vec![label.to_string()];
        row.extend([s.t, s.position.x, s.position.y, s.position.z].map(|v| format!("{v:.6}")));
        report.row(row)?;
    }
    report.row([
        "Result".to_string(),
        format!("{:.3}", result.distance_mm),
        result.success.to_string(),
    ])?;
    report.flush()
}

/// Drive the rig to test pose `i` while the operator holds the pedal, then
/// hand control back to teleop.
async fn move_to_test_pose<R: RobotClient, O: Operator>(session: &mut Session<R, O>, i: usize) -> Result<()> {
    let poses = session.config.hover.test_poses_deg.clone();
    let scale = session.config.hover.vel_scale;
    let timeout = session.config.trial_timeout_s;

    session
        .operator
        .say(&format!("Hold the pedal while both arms move to test pose {}", i + 1));
    wait_pedal_press(&mut session.leader, &session.cancel).await?;
    let teleop_modes = session.modes()?;

    if i > 0 {
        session.sync_to(&poses[i - 1], scale, timeout).await?;
        session.sync_to(&poses[1], scale, timeout).await?;
    }
    session.sync_to(&poses[i], scale, timeout).await?;

    session.operator.say("In position. Release the pedal");
    wait_pedal_release(&mut session.leader, &session.cancel).await?;
    session.restore_modes(&teleop_modes)
}

/// Leave the arms on the last test pose, then the second one.
async fn park<R: RobotClient, O: Operator>(session: &mut Session<R, O>) -> Result<()> {
    let poses = session.config.hover.test_poses_deg.clone();
    let scale = session.config.hover.vel_scale;
    let timeout = session.config.home_timeout_s;
    let last = poses.len() - 1;

    sleep_secs(PARK_DELAY_S, &session.cancel).await?;
    session.sync_to(&poses[last.min(9)], scale, timeout).await?;
    session.sync_to(&poses[last.min(1)], scale, timeout).await
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::config::CalibrationConfig;
    use crate::error::CalibError;
    use crate::robot::{Mode, Primitive, RobotCommand, ScriptedRobot};
    use crate::session::testing::{report_text, session};
    use crate::types::RobotStates;

    fn pedal(pressed: bool, x: f64, y: f64, z: f64) -> RobotStates {
        let mut states = RobotStates::at_rest();
        states.digital_inputs = vec![pressed];
        states.tcp_pose[0] = x;
        states.tcp_pose[1] = y;
        states.tcp_pose[2] = z;
        states
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_hover_trials() {
        let mut config = CalibrationConfig::default();
        config.hover.trials = 2;
        let leader = ScriptedRobot::with_states(
            "L",
            vec![
                RobotStates::at_rest(), // home reach
                pedal(true, 0.0, 0.0, 0.0),
                pedal(true, 0.0, 0.0, 0.0),
                pedal(true, 0.003, 0.004, 0.0),
                pedal(false, 0.0, 0.0, 0.0),
                pedal(true, 0.0, 0.0, 0.0),
                pedal(true, 0.0, 0.0, 0.0),
                pedal(true, 0.0, 0.0, 0.012),
                pedal(false, 0.0, 0.0, 0.0),
            ],
        );
        let mut session = session(
            "hover_manual",
            leader,
            ScriptedRobot::new("F"),
            &["", "", "", ""],
            config,
            Some("test_high_transparency_teleop"),
        );

        let outcome = run(&mut session).await;
        let summary = session.finish(outcome).await.unwrap();

        assert_eq!(summary.trials.len(), 2);
        assert_relative_eq!(summary.trials[0].distance_mm, 5.0, epsilon = 1e-9);
        assert!(summary.trials[0].success);
        assert!(!summary.trials[1].success);
        assert_relative_eq!(summary.success_rate, 50.0);
        assert_relative_eq!(summary.mean_distance_mm, 8.5, epsilon = 1e-9);

        // Home sync restores the teleop mode it found
        let original = Mode("NRT_CARTESIAN_MOTION_FORCE".to_string());
        let commands = session.leader().commands();
        assert_eq!(commands[2], RobotCommand::SwitchMode(original));
        assert_eq!(session.leader().remaining(), 0);

        let text = report_text(&session);
        assert!(text.contains("Test,Distance(mm),Success\n1,5.000,true\n2,12.000,false\n"));
        assert!(text.contains("SuccessRate(%),50.0"));
        assert!(text.contains("Trial=1\nSnapshot,time_s,x,y,z\nstart,"));
        assert!(text.contains(",0.003000,0.004000,0.000000\nResult,5.000,true\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_keeps_finished_trials() {
        let mut config = CalibrationConfig::default();
        config.hover.trials = 3;
        let leader = ScriptedRobot::with_states(
            "L",
            vec![
                RobotStates::at_rest(), // home reach
                pedal(true, 0.0, 0.0, 0.0),
                pedal(true, 0.0, 0.0, 0.0),
                pedal(true, 0.0, 0.0, 0.002),
                pedal(false, 0.0, 0.0, 0.0),
            ],
        );
        // Interrupted when asked to position the leader for trial 2
        let mut session = session(
            "hover_abort",
            leader,
            ScriptedRobot::new("F"),
            &["", "", ""],
            config,
            Some("test_high_transparency_teleop"),
        );

        let outcome = run(&mut session).await;
        assert!(matches!(session.finish(outcome).await, Err(CalibError::Cancelled)));

        let text = report_text(&session);
        assert!(text.contains("Result,2.000,true\n"));
        assert!(!text.contains("Trial=2"));
        assert!(text.contains("ABORTED"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_automatic_hover_moves_and_parks() {
        let mut config = CalibrationConfig::default();
        config.hover.trials = 1;
        let poses = config.hover.test_poses_deg.clone();
        let leader = ScriptedRobot::with_states(
            "L",
            vec![
                RobotStates::at_rest(), // home reach
                pedal(true, 0.0, 0.0, 0.0),
                RobotStates::at_rest(), // test pose reach
                pedal(false, 0.0, 0.0, 0.0),
                pedal(true, 0.0, 0.0, 0.0),
                pedal(true, 0.0, 0.0, 0.0),
                pedal(true, 0.002, 0.0, 0.0),
                pedal(false, 0.0, 0.0, 0.0),
            ],
        );
        let mut session = session("hover_auto", leader, ScriptedRobot::new("F"), &["", ""], config, None);

        let outcome = run(&mut session).await;
        let summary = session.finish(outcome).await.unwrap();

        assert_eq!(summary.trials.len(), 1);
        assert_relative_eq!(summary.trials[0].distance_mm, 2.0, epsilon = 1e-9);
        assert_relative_eq!(summary.success_rate, 100.0);

        let moves: Vec<Primitive> = session
            .follower()
            .commands()
            .iter()
            .filter_map(|c| match c {
                RobotCommand::Primitive(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            moves,
            vec![
                Primitive::move_j(session.config().home_pose_deg, 25.0),
                Primitive::move_j(poses[0], 25.0),
                Primitive::move_j(poses[9], 25.0),
                Primitive::move_j(poses[1], 25.0),
            ]
        );
    }
}
