//! Minimum drag: the wrench needed to get the leader moving on each axis.

use super::{AxisTrials, Session};
use crate::clock::SampleClock;
use crate::error::Result;
use crate::metrics::drag_at_crossing;
use crate::operator::Operator;
use crate::report::{ts_now, CsvReport};
use crate::robot::{wait_pedal_press, RobotClient};
use crate::segmentation::{drive, Observed, Segment, ThresholdCapture};
use crate::types::{Axis, Sample};

const RAW_HEADER: [&str; 3] = ["time_s", "velocity", "wrench"];

#[derive(Clone, Debug)]
pub struct DragSummary {
    pub axes: Vec<AxisTrials>,
}

pub async fn run<R: RobotClient, O: Operator>(session: &mut Session<R, O>) -> Result<DragSummary> {
    let cfg = session.config.drag.clone();
    let now = ts_now();
    session.report.row(["Minimum Drag Force", now.as_str()])?;
    session.report.flush()?;

    session.sync_home().await?;
    session
        .prompt("Home pose synced. Press Enter to start teleop: ")
        .await?;
    session.launch_teleop().await?;

    let mut axes = Vec::with_capacity(cfg.axes.len());
    for &axis in &cfg.axes {
        let threshold = cfg.threshold(axis);
        session.operator.say(&format!(
            "===== Axis {axis}: move the leader along {axis} until |v| >= {threshold} ====="
        ));
        let mut trials = Vec::with_capacity(cfg.trials);
        for trial in 1..=cfg.trials {
            session
                .operator
                .say(&format!("[{axis} trial {trial}/{}] press the pedal, then push", cfg.trials));
            wait_pedal_press(&mut session.leader, &session.cancel).await?;

            let mut capture = ThresholdCapture::new(threshold, 0.0);
            let mut clock = SampleClock::from_secs(cfg.period_s);
            let leader = &mut session.leader;
            let segment = drive(&mut clock, &session.cancel, &mut capture, |t| {
                let sample = Sample::from_states(t, &leader.states()?);
                Ok(Observed::new(t, sample.velocity_along(axis), sample))
            })
            .await?;

            let drag = segment
                .samples
                .first()
                .map(|sample| drag_at_crossing(sample, axis))
                .unwrap_or(0.0);
            log::info!("[drag] {} trial {}: {:.4} {}", axis, trial, drag, axis.wrench_unit());
            session
                .operator
                .say(&format!("  minimum drag = {:.4} {}", drag, axis.wrench_unit()));
            write_trial(&mut session.report, axis, trial, &segment, drag)?;
            trials.push(drag);

            session
                .prompt("Return the leader to its start, then press Enter: ")
                .await?;
        }
        let result = AxisTrials::new(axis, trials);
        session
            .operator
            .say(&format!("{axis}: average {:.4} {}", result.mean, axis.wrench_unit()));
        axes.push(result);
    }

    session.stop_teleop().await;
    write_report(session, &axes, cfg.trials)?;
    Ok(DragSummary { axes })
}

/// Crossing samples of one trial and the drag read from them.
fn write_trial(
    report: &mut CsvReport,
    axis: Axis,
    trial: usize,
    segment: &Segment<Sample>,
    drag: f64,
) -> Result<()> {
    report.section(&format!("Axis={axis} Trial={trial}"))?;
    report.row(RAW_HEADER)?;
    for s in &segment.samples {
        report.row([s.t, s.velocity_along(axis), s.wrench_along(axis)].map(|v| format!("{v:.6}")))?;
    }
    let value = format!("{drag:.4}");
    report.row(["Drag", value.as_str(), axis.wrench_unit()])?;
    report.flush()
}

fn write_report<R: RobotClient, O: Operator>(
    session: &mut Session<R, O>,
    axes: &[AxisTrials],
    trials: usize,
) -> Result<()> {
    let report = &mut session.report;
    report.section("FinalResults")?;

    let mut header = vec!["Axis".to_string()];
    header.extend((1..=trials).map(|n| format!("Trial {n}")));
    header.extend(["Average".to_string(), "Unit".to_string()]);
    report.row(header)?;

    for result in axes {
        let mut row = vec![result.axis.to_string()];
        row.extend(result.trials.iter().map(|v| format!("{v:.4}")));
        row.push(format!("{:.4}", result.mean));
        row.push(result.axis.wrench_unit().to_string());
        report.row(row)?;
    }
    report.flush()
}
