//! Stiffness: force over tracking error once the ratio settles.

use tokio::time::Duration;

use super::{AxisTrials, Session};
use crate::clock::{sleep_secs, SampleClock};
use crate::error::Result;
use crate::operator::Operator;
use crate::report::{ts_now, CsvReport};
use crate::robot::RobotClient;
use crate::segmentation::{drive, StabilityDetector, StableWindow, SubSegment, TrackingObservation};
use crate::types::{Axis, DualSample};

/// Stable window of one trial, kept for the sub-segment log.
#[derive(Clone, Debug)]
pub struct StiffnessTrial {
    pub axis: Axis,
    pub trial: usize,
    pub window: StableWindow,
}

#[derive(Clone, Debug)]
pub struct StiffnessSummary {
    pub axes: Vec<AxisTrials>,
    pub trials: Vec<StiffnessTrial>,
    pub timed_out: usize,
}

pub async fn run<R: RobotClient, O: Operator>(session: &mut Session<R, O>) -> Result<StiffnessSummary> {
    let cfg = session.config.stiffness.clone();
    let now = ts_now();
    session.report.row(["Stiffness Measurement", now.as_str()])?;
    session.report.flush()?;

    session.sync_home().await?;
    session
        .prompt("Home pose synced. Press Enter to start teleop: ")
        .await?;
    session.launch_teleop().await?;

    let mut axes = Vec::with_capacity(cfg.axes.len());
    let mut windows = Vec::new();
    let mut timed_out = 0;
    for (n, &axis) in cfg.axes.iter().enumerate() {
        session.operator.say(&format!(
            "===== Axis {axis}: hold the leader so the follower pushes steadily along {axis} ====="
        ));
        let mut values = Vec::with_capacity(cfg.trials);
        for trial in 1..=cfg.trials {
            session
                .operator
                .say(&format!("[{axis} trial {trial}/{}] waiting for a stable ratio...", cfg.trials));
            let mut detector = StabilityDetector::new(cfg.stability.clone());
            let mut clock = SampleClock::from_secs(cfg.stability.sample_period_s);
            let (leader, follower, operator) = (&mut session.leader, &mut session.follower, &mut session.operator);
            let collect = drive(&mut clock, &session.cancel, &mut detector, |t| {
                let dual = DualSample::from_states(t, &leader.states()?, &follower.states()?);
                let obs = TrackingObservation {
                    t,
                    error: dual.tracking_error(axis),
                    force: dual.follower.wrench_along(axis),
                };
                operator.status(&format!(
                    "  error {:+.5} {}  force {:+.3} {}",
                    obs.error,
                    axis.error_unit(),
                    obs.force,
                    axis.wrench_unit()
                ));
                Ok(obs)
            });

            let window = match cfg.max_wait_s {
                None => collect.await?,
                Some(limit) => {
                    let bounded = tokio::time::timeout(Duration::from_secs_f64(limit), collect).await;
                    let Ok(window) = bounded else {
                        log::warn!("[stiffness] {} trial {} not stable within {:.0}s", axis, trial, limit);
                        session
                            .operator
                            .say(&format!("\n  no stable ratio within {limit:.0}s, trial skipped"));
                        write_trial(&mut session.report, axis, trial, detector.sub_segments(), None)?;
                        timed_out += 1;
                        continue;
                    };
                    window?
                }
            };

            session.operator.say(&format!(
                "\n  K = {:.2} {} (mean error {:.5} {}, {} sub-segments)",
                window.stiffness,
                axis.stiffness_unit(),
                window.mean_error,
                axis.error_unit(),
                window.segments_seen.len()
            ));
            log::info!("[stiffness] {} trial {}: K={:.2}", axis, trial, window.stiffness);
            write_trial(&mut session.report, axis, trial, &window.segments_seen, Some(&window))?;
            values.push(window.stiffness);
            windows.push(StiffnessTrial { axis, trial, window });
            sleep_secs(cfg.pause_s, &session.cancel).await?;
        }

        let result = AxisTrials::new(axis, values);
        session
            .operator
            .say(&format!("{axis}: average K = {:.2} {}", result.mean, axis.stiffness_unit()));
        axes.push(result);

        if n + 1 < cfg.axes.len() {
            session
                .prompt("Axis done. Release the leader, then press Enter for the next axis: ")
                .await?;
        }
    }

    session.stop_teleop().await;
    let summary = StiffnessSummary {
        axes,
        trials: windows,
        timed_out,
    };
    write_report(session, &summary, cfg.trials)?;
    Ok(summary)
}

/// Sub-segment log of one trial followed by its result, `timeout` when the
/// ratio never settled.
fn write_trial(
    report: &mut CsvReport,
    axis: Axis,
    trial: usize,
    segments: &[SubSegment],
    window: Option<&StableWindow>,
) -> Result<()> {
    report.section("SegmentLog")?;
    report.row(["Axis", "Trial", "Segment", "ClosedAt_s", "K", "MeanError"])?;
    for (i, seg) in segments.iter().enumerate() {
        report.row([
            axis.to_string(),
            trial.to_string(),
            (i + 1).to_string(),
            format!("{:.3}", seg.closed_at),
            format!("{:.4}", seg.stiffness),
            format!("{:.6}", seg.mean_error),
        ])?;
    }
    match window {
        Some(window) => report.row([
            "K".to_string(),
            format!("{:.4}", window.stiffness),
            format!("{:.6}", window.mean_error),
            axis.stiffness_unit().to_string(),
        ])?,
        None => report.row(["K", "timeout"])?,
    }
    report.flush()
}

fn write_report<R: RobotClient, O: Operator>(
    session: &mut Session<R, O>,
    summary: &StiffnessSummary,
    trials: usize,
) -> Result<()> {
    let report = &mut session.report;
    report.section("FinalResults")?;

    let mut header = vec!["Axis".to_string()];
    header.extend((1..=trials).map(|n| format!("Trial {n}")));
    header.extend(["Average".to_string(), "Unit".to_string()]);
    report.row(header)?;
    for result in &summary.axes {
        let mut row = vec![result.axis.to_string()];
        row.extend(result.trials.iter().map(|v| format!("{v:.4}")));
        row.push(format!("{:.4}", result.mean));
        row.push(result.axis.stiffness_unit().to_string());
        report.row(row)?;
    }
    if summary.timed_out > 0 {
        report.row(["TimedOut".to_string(), summary.timed_out.to_string()])?;
    }
    report.flush()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::config::CalibrationConfig;
    use crate::robot::ScriptedRobot;
    use crate::session::testing::{report_text, session};
    use crate::types::RobotStates;

    /// Follower 2 mm ahead on X pushing back with 1 N: K = 500 N/m.
    fn offset_follower(offset: f64) -> ScriptedRobot {
        let mut states = RobotStates::at_rest();
        states.tcp_pose[0] = offset;
        states.ext_wrench_in_world[0] = 1.0;
        ScriptedRobot::with_states("F", vec![states])
    }

    #[tokio::test(start_paused = true)]
    async fn test_stiffness_settles_per_trial() {
        let mut config = CalibrationConfig::default();
        config.stiffness.axes = vec![Axis::X];
        config.stiffness.trials = 2;
        let mut session = session(
            "stiffness_run",
            ScriptedRobot::new("L"),
            offset_follower(0.002),
            &["", ""],
            config,
            None,
        );

        let outcome = run(&mut session).await;
        let summary = session.finish(outcome).await.unwrap();

        assert_eq!(summary.axes[0].trials.len(), 2);
        assert_relative_eq!(summary.axes[0].mean, 500.0, epsilon = 1e-6);
        assert_eq!(summary.trials.len(), 2);
        assert_eq!(summary.trials[0].window.segments_seen.len(), 20);
        assert_eq!(summary.timed_out, 0);

        let text = report_text(&session);
        assert!(text.contains("X,500.0000,500.0000,500.0000,N/m"));
        assert!(text.contains("SegmentLog\nAxis,Trial,Segment,ClosedAt_s,K,MeanError\nX,1,1,"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unstable_trials_time_out_when_bounded() {
        let mut config = CalibrationConfig::default();
        config.stiffness.axes = vec![Axis::X];
        config.stiffness.trials = 2;
        config.stiffness.max_wait_s = Some(1.0);
        // No tracking error: the ratio is infinite and never settles
        let mut session = session(
            "stiffness_timeout",
            ScriptedRobot::new("L"),
            offset_follower(0.0),
            &["", ""],
            config,
            None,
        );

        let outcome = run(&mut session).await;
        let summary = session.finish(outcome).await.unwrap();
        assert_eq!(summary.timed_out, 2);
        assert!(summary.axes[0].trials.is_empty());
        assert_eq!(summary.axes[0].mean, 0.0);

        // Each skipped trial still leaves its sub-segment log behind
        let text = report_text(&session);
        assert_eq!(text.matches("K,timeout\n").count(), 2);
        assert!(text.contains("X,2,1,"));
        assert!(text.contains("TimedOut,2"));
    }
}
