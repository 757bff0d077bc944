//! Transparency: leader versus follower Z force while a steady push is held.

use super::Session;
use crate::clock::{sleep_secs, SampleClock};
use crate::error::Result;
use crate::metrics::{format_ratio, mean, transparency, transparency_ratio, TransparencyResult};
use crate::operator::Operator;
use crate::report::{ts_now, CsvReport};
use crate::robot::RobotClient;
use crate::segmentation::{drive, Observed, Segment, ValidityWindow};
use crate::types::{Axis, DualSample};

#[derive(Clone, Debug)]
pub struct TransparencySummary {
    pub trials: Vec<TransparencyResult>,
    /// Mean over trials with a finite ratio, `None` when there are none.
    pub mean_ratio: Option<f64>,
}

fn hint(force: f64, low: f64, high: f64) -> &'static str {
    if force < low {
        "push harder"
    } else if force > high {
        "lighter"
    } else {
        "hold"
    }
}

pub async fn run<R: RobotClient, O: Operator>(session: &mut Session<R, O>) -> Result<TransparencySummary> {
    let cfg = session.config.transparency.clone();
    let now = ts_now();
    session.report.row(["Transparency Measurement", now.as_str()])?;
    session.report.flush()?;

    session.launch_teleop().await?;

    let mut trials = Vec::with_capacity(cfg.trials);
    for trial in 1..=cfg.trials {
        session
            .prompt(&format!(
                "[trial {trial}/{}] Press Enter, then push the follower down with {}-{} N: ",
                cfg.trials, cfg.band_low, cfg.band_high
            ))
            .await?;

        let mut window = ValidityWindow::new(cfg.band_low, cfg.band_high, cfg.dwell_s);
        let mut clock = SampleClock::from_secs(cfg.period_s);
        let (leader, follower, operator) = (&mut session.leader, &mut session.follower, &mut session.operator);
        let segment = drive(&mut clock, &session.cancel, &mut window, |t| {
            let dual = DualSample::from_states(t, &leader.states()?, &follower.states()?);
            let master = dual.leader.wrench_along(Axis::Z);
            let slave = dual.follower.wrench_along(Axis::Z);
            operator.status(&format!(
                "  F_slave {:+6.2} N  F_master {:+6.2} N  {}  {}",
                slave,
                master,
                format_ratio(transparency_ratio(master, slave)),
                hint(slave, cfg.band_low, cfg.band_high)
            ));
            Ok(Observed::new(t, slave, (t, master, slave)))
        })
        .await?;

        let pairs: Vec<(f64, f64)> = segment.samples.iter().map(|&(_, master, slave)| (master, slave)).collect();
        let Some(result) = transparency(&pairs) else {
            continue;
        };
        write_trial(&mut session.report, trial, &segment, &result)?;
        session.operator.say(&format!(
            "\n  trial {trial}: F_master {:.3} N, F_slave {:.3} N, ratio {}",
            result.mean_master,
            result.mean_slave,
            format_ratio(result.ratio)
        ));
        log::info!("[transparency] trial {}: ratio {}", trial, format_ratio(result.ratio));
        trials.push(result);
    }

    let finite: Vec<f64> = trials.iter().map(|r| r.ratio).filter(|r| r.is_finite()).collect();
    let mean_ratio = (!finite.is_empty()).then(|| mean(&finite));
    match mean_ratio {
        Some(ratio) => session.operator.say(&format!("Mean transparency {}", format_ratio(ratio))),
        None => session.operator.say("No valid transparency trial"),
    }

    session.operator.say(&format!(
        "Stopping teleop in {:.0}s, keep clear of the follower",
        cfg.teardown_pause_s
    ));
    sleep_secs(cfg.teardown_pause_s, &session.cancel).await?;
    session.stop_teleop().await;

    let summary = TransparencySummary { trials, mean_ratio };
    write_report(session, &summary)?;
    Ok(summary)
}

/// Validity segment of one trial (t, F_master, F_slave) and its ratio.
fn write_trial(
    report: &mut CsvReport,
    trial: usize,
    segment: &Segment<(f64, f64, f64)>,
    result: &TransparencyResult,
) -> Result<()> {
    report.section(&format!("Trial={trial}"))?;
    report.row(["time_s", "F_master_N", "F_slave_N"])?;
    for &(t, master, slave) in &segment.samples {
        report.row([t, master, slave].map(|v| format!("{v:.6}")))?;
    }
    report.row([
        "Ratio".to_string(),
        format!("{:.4}", result.mean_master),
        format!("{:.4}", result.mean_slave),
        format_ratio(result.ratio),
    ])?;
    report.flush()
}

fn write_report<R: RobotClient, O: Operator>(
    session: &mut Session<R, O>,
    summary: &TransparencySummary,
) -> Result<()> {
    let report = &mut session.report;
    report.section("FinalResults")?;
    report.row(["Trial", "F_master_mean_N", "F_slave_mean_N", "Ratio"])?;
    for (i, result) in summary.trials.iter().enumerate() {
        report.row([
            (i + 1).to_string(),
            format!("{:.4}", result.mean_master),
            format!("{:.4}", result.mean_slave),
            format_ratio(result.ratio),
        ])?;
    }
    let mean = summary.mean_ratio.map(format_ratio).unwrap_or_else(|| "n/a".to_string());
    report.row(["Mean", mean.as_str()])?;
    report.flush()
}
