//! Damping: F/v along each direction, averaged over distance chunks.

use super::Session;
use crate::clock::{sleep_secs, SampleClock};
use crate::config::{DampingConfig, DirectionConfig};
use crate::error::Result;
use crate::metrics::{damping_for_segment, session_damping, DampingResult};
use crate::operator::Operator;
use crate::report::{ts_now, CsvReport};
use crate::robot::RobotClient;
use crate::segmentation::{drive, DistanceWindow, Segment, ZoneSample};
use crate::types::{Sample, Vec3};

const RAW_HEADER: [&str; 11] = ["time_s", "px", "py", "pz", "vx", "vy", "vz", "fx", "fy", "fz", "dist_abs"];
const CHUNK_HEADER: [&str; 7] = ["ChunkIndex", "DistStart_m", "DistEnd_m", "avgV", "avgF", "Bchunk", "N"];

#[derive(Clone, Debug)]
pub struct DirectionResult {
    pub name: String,
    pub samples: usize,
    pub damping: DampingResult,
}

#[derive(Clone, Debug)]
pub struct DampingSummary {
    pub directions: Vec<DirectionResult>,
    pub mean_abs: f64, // N·s/m
}

pub async fn run<R: RobotClient, O: Operator>(session: &mut Session<R, O>) -> Result<DampingSummary> {
    let cfg = session.config.damping.clone();
    let now = ts_now();
    session.report.row(["Damping Measurement", now.as_str()])?;
    session.report.row(["start_m", "final_m", "chunk_m"])?;
    session.report.row([cfg.start_m, cfg.final_m, cfg.chunk_m])?;

    let mut directions = Vec::with_capacity(cfg.directions.len());
    for direction in &cfg.directions {
        directions.push(measure_direction(session, direction, &cfg).await?);
    }

    let per_direction: Vec<f64> = directions.iter().map(|d| d.damping.overall).collect();
    let mean_abs = session_damping(&per_direction);

    session.report.section("FinalResults")?;
    session.report.row(["Direction", "B_dir"])?;
    session.operator.say("===== Damping results =====");
    for direction in &directions {
        let b = format!("{:.4}", direction.damping.overall);
        session.report.row([direction.name.as_str(), b.as_str()])?;
        session.operator.say(&format!("{:>3}: B = {} N·s/m", direction.name, b));
    }
    let mean = format!("{:.4}", mean_abs);
    session.report.row(["Mean(|B_dir|)", mean.as_str()])?;
    session.report.flush()?;
    session.operator.say(&format!("Mean |B| = {} N·s/m", mean));

    Ok(DampingSummary { directions, mean_abs })
}

async fn measure_direction<R: RobotClient, O: Operator>(
    session: &mut Session<R, O>,
    direction: &DirectionConfig,
    cfg: &DampingConfig,
) -> Result<DirectionResult> {
    let name = direction.name.as_str();
    session.operator.say(&format!("===== Direction {name} ====="));
    session
        .prompt(&format!("Press Enter to move both arms to the {name} start pose: "))
        .await?;
    let (scale, timeout) = (session.config.sync_vel_scale, session.config.home_timeout_s);
    session.sync_to(&direction.start_pose_deg, scale, timeout).await?;

    session
        .prompt(&format!("Hold the leader handle, then press Enter to start measuring {name}: "))
        .await?;
    session.stop_robots();
    sleep_secs(1.0, &session.cancel).await?;
    session.launch_teleop().await?;

    let vector = Vec3::from(direction.vector);
    let origin = session.leader.states()?.position();
    let mut window = DistanceWindow::new(origin, vector, cfg.start_m, cfg.final_m)?;
    session.operator.say(&format!(
        "Move the leader along {name}, recording from {:.0} cm to {:.0} cm",
        cfg.start_m * 100.0,
        cfg.final_m * 100.0
    ));

    let mut clock = SampleClock::from_secs(cfg.period_s);
    let leader = &mut session.leader;
    let collected = drive(&mut clock, &session.cancel, &mut window, |t| {
        Ok(Sample::from_states(t, &leader.states()?))
    })
    .await;

    session.stop_teleop().await;
    session.stop_robots();
    let segment = collected?;

    let damping = damping_for_segment(&segment, &vector, cfg.start_m, cfg.final_m, cfg.chunk_m);
    write_block(&mut session.report, name, &segment, &damping)?;
    session.report.flush()?;

    for chunk in &damping.chunks {
        session.operator.say(&format!(
            "  [{:.2}-{:.2} m] v={:.4} F={:.4} B={:.4} (N={})",
            chunk.chunk.dist_start,
            chunk.chunk.dist_end,
            chunk.chunk.mean_velocity,
            chunk.chunk.mean_force,
            chunk.coefficient,
            chunk.chunk.samples
        ));
    }
    session
        .operator
        .say(&format!("{name}: B = {:.4} N·s/m from {} samples", damping.overall, segment.len()));
    log::info!("[damping] {} B={:.4} samples={}", name, damping.overall, segment.len());

    Ok(DirectionResult {
        name: name.to_string(),
        samples: segment.len(),
        damping,
    })
}

fn write_block(
    report: &mut CsvReport,
    name: &str,
    segment: &Segment<ZoneSample>,
    damping: &DampingResult,
) -> Result<()> {
    report.section(&format!("Direction={name}"))?;
    report.row(RAW_HEADER)?;
    for zone in &segment.samples {
        let s = &zone.sample;
        let cells = [
            s.t,
            s.position.x,
            s.position.y,
            s.position.z,
            s.velocity[0],
            s.velocity[1],
            s.velocity[2],
            s.wrench[0],
            s.wrench[1],
            s.wrench[2],
            zone.distance,
        ];
        report.row(cells.map(|v| format!("{v:.6}")))?;
    }

    report.row([""])?;
    report.row(CHUNK_HEADER)?;
    for chunk in &damping.chunks {
        let c = &chunk.chunk;
        report.row([
            c.index.to_string(),
            format!("{:.3}", c.dist_start),
            format!("{:.3}", c.dist_end),
            format!("{:.6}", c.mean_velocity),
            format!("{:.6}", c.mean_force),
            format!("{:.6}", chunk.coefficient),
            c.samples.to_string(),
        ])?;
    }
    let b = format!("{:.6}", damping.overall);
    report.row(["B_dir", b.as_str()])
}
