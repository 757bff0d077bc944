//! Contact wrench: does the follower hold the configured force limit?

use super::Session;
use crate::clock::SampleClock;
use crate::error::Result;
use crate::metrics::{contact, mean, ContactResult};
use crate::operator::{ask_f64, Operator};
use crate::report::{ts_now, CsvReport};
use crate::robot::RobotClient;
use crate::segmentation::{drive, Observed, Segment, ThresholdCapture};
use crate::types::{Axis, DualSample};

#[derive(Clone, Debug)]
pub struct ContactSummary {
    pub setpoint: f64, // N
    pub trials: Vec<ContactResult>,
    pub mean_force: f64,
    pub mean_error_percent: f64,
}

pub async fn run<R: RobotClient, O: Operator>(session: &mut Session<R, O>) -> Result<ContactSummary> {
    let cfg = session.config.contact.clone();
    let now = ts_now();
    session.report.row(["Contact Wrench Measurement", now.as_str()])?;

    let setpoint = ask_f64(
        &mut session.operator,
        "Configured contact force limit (N): ",
        &session.cancel,
    )
    .await?;
    session.report.row(["Setpoint_N".to_string(), format!("{setpoint}")])?;
    session.report.flush()?;
    session.launch_teleop().await?;

    let mut trials = Vec::with_capacity(cfg.trials);
    for trial in 1..=cfg.trials {
        session.operator.say(&format!(
            "[trial {trial}/{}] press the leader down with more than {setpoint} N and hold {:.0}s",
            cfg.trials, cfg.dwell_s
        ));
        let mut capture = ThresholdCapture::new(setpoint, cfg.dwell_s);
        let mut clock = SampleClock::from_secs(cfg.period_s);
        let (leader, follower) = (&mut session.leader, &mut session.follower);
        let segment = drive(&mut clock, &session.cancel, &mut capture, |t| {
            let dual = DualSample::from_states(t, &leader.states()?, &follower.states()?);
            let master = dual.leader.wrench_along(Axis::Z);
            let slave = dual.follower.wrench_along(Axis::Z);
            Ok(Observed::new(t, master, (t, master, slave)))
        })
        .await?;

        let slave: Vec<f64> = segment.samples.iter().map(|&(_, _, slave)| slave).collect();
        let result = contact(&slave, setpoint);
        write_trial(&mut session.report, trial, &segment, &result)?;
        session.operator.say(&format!(
            "  trial {trial}: follower {:.3} N over {} samples, error {:.2}%",
            result.mean_slave,
            segment.len(),
            result.error_percent
        ));
        log::info!("[contact] trial {}: {:.3} N ({:.2}%)", trial, result.mean_slave, result.error_percent);
        trials.push(result);

        if trial < cfg.trials {
            session
                .prompt("Release the leader, then press Enter for the next trial: ")
                .await?;
        }
    }
    session.stop_teleop().await;

    let forces: Vec<f64> = trials.iter().map(|r| r.mean_slave).collect();
    let errors: Vec<f64> = trials.iter().map(|r| r.error_percent).collect();
    let summary = ContactSummary {
        setpoint,
        mean_force: mean(&forces),
        mean_error_percent: mean(&errors),
        trials,
    };
    session.operator.say(&format!(
        "Mean follower force {:.3} N, mean error {:.2}%",
        summary.mean_force, summary.mean_error_percent
    ));

    let report = &mut session.report;
    report.section("FinalResults")?;
    report.row(["Trial", "F_slave_mean_N", "Error_percent"])?;
    for (i, result) in summary.trials.iter().enumerate() {
        report.row([
            (i + 1).to_string(),
            format!("{:.4}", result.mean_slave),
            format!("{:.2}", result.error_percent),
        ])?;
    }
    report.row([
        "Mean".to_string(),
        format!("{:.4}", summary.mean_force),
        format!("{:.2}", summary.mean_error_percent),
    ])?;
    report.flush()?;
    Ok(summary)
}

/// Dwell segment of one trial (t, F_master, F_slave) and its error.
fn write_trial(
    report: &mut CsvReport,
    trial: usize,
    segment: &Segment<(f64, f64, f64)>,
    result: &ContactResult,
) -> Result<()> {
    report.section(&format!("Trial={trial}"))?;
    report.row(["time_s", "F_master_N", "F_slave_N"])?;
    for &(t, master, slave) in &segment.samples {
        report.row([t, master, slave].map(|v| format!("{v:.6}")))?;
    }
    report.row([
        "Result".to_string(),
        format!("{:.4}", result.mean_slave),
        format!("{:.2}", result.error_percent),
    ])?;
    report.flush()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::config::CalibrationConfig;
    use crate::error::CalibError;
    use crate::robot::ScriptedRobot;
    use crate::session::testing::{report_text, session};
    use crate::types::RobotStates;

    fn fz(value: f64) -> RobotStates {
        let mut states = RobotStates::at_rest();
        states.ext_wrench_in_world[2] = value;
        states
    }

    #[tokio::test(start_paused = true)]
    async fn test_contact_against_setpoint() {
        let mut config = CalibrationConfig::default();
        config.contact.trials = 2;
        // Leader pushes down past the limit; follower settles at -21 N
        let leader = ScriptedRobot::with_states("L", vec![fz(-5.0), fz(-25.0)]);
        let follower = ScriptedRobot::with_states("F", vec![fz(-19.0), fz(-21.0)]);
        let mut session = session("contact_run", leader, follower, &["abc", "20", "", ""], config, None);

        let outcome = run(&mut session).await;
        let summary = session.finish(outcome).await.unwrap();

        assert_eq!(summary.setpoint, 20.0);
        assert_eq!(summary.trials.len(), 2);
        assert_relative_eq!(summary.trials[1].mean_slave, 21.0);
        assert_relative_eq!(summary.trials[1].error_percent, 5.0, epsilon = 1e-9);
        assert_relative_eq!(summary.mean_error_percent, 5.0, epsilon = 1e-9);

        let text = report_text(&session);
        assert!(text.contains("Setpoint_N,20\n"));
        assert!(text.contains("Mean,21.0000,5.00"));
        assert!(text.contains("Trial=2\ntime_s,F_master_N,F_slave_N\n"));
        assert!(text.contains(",-25.000000,-21.000000\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_keeps_finished_trials() {
        let mut config = CalibrationConfig::default();
        config.contact.trials = 3;
        let leader = ScriptedRobot::with_states("L", vec![fz(-25.0)]);
        let follower = ScriptedRobot::with_states("F", vec![fz(-21.0)]);
        // Setpoint and teleop start answered, interrupted at the first release prompt
        let mut session = session("contact_abort", leader, follower, &["20", ""], config, None);

        let outcome = run(&mut session).await;
        assert!(matches!(session.finish(outcome).await, Err(CalibError::Cancelled)));

        let text = report_text(&session);
        assert!(text.contains("Setpoint_N,20\n"));
        assert!(text.contains("Trial=1\n"));
        assert!(text.contains("Result,21.0000,5.00\n"));
        assert!(text.contains("ABORTED"));
    }
}
