use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use tokio_util::sync::CancellationToken;

use teleop_calibration_rs::config::CalibrationConfig;
use teleop_calibration_rs::discovery::find_executables;
use teleop_calibration_rs::error::CalibError;
use teleop_calibration_rs::operator::{select_index, ConsoleOperator, Operator};
use teleop_calibration_rs::report::{ts_now, CsvReport};
use teleop_calibration_rs::robot::{BridgeRobot, RobotClient};
use teleop_calibration_rs::session::{contact, damping, drag, hover, stiffness, transparency, LaunchPlan, Session};
use teleop_calibration_rs::supervisor::Elevation;

#[derive(Parser, Debug)]
#[command(name = "teleop_calib")]
#[command(about = "Teleoperation calibration: damping, drag, stiffness, transparency, contact, hover", long_about = None)]
struct Args {
    /// Leader (master) robot serial
    #[arg(short = '1', long)]
    leader: String,

    /// Follower (slave) robot serial
    #[arg(short = '2', long)]
    follower: String,

    /// sudo password for launching the teleop program (omit to run it unprivileged)
    #[arg(short, long, env = "TELEOP_SUDO_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// JSON configuration overriding the built-in defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory for CSV reports
    #[arg(long, default_value = "calibration_results")]
    output_dir: PathBuf,

    /// Directory searched for test_* teleop programs
    #[arg(long, default_value = ".")]
    exe_dir: PathBuf,

    /// Teleop program to launch (skips the selection menu)
    #[arg(long)]
    executable: Option<PathBuf>,

    /// Start and stop the teleop program by hand
    #[arg(long)]
    manual_teleop: bool,

    /// Robot helper command; the serial is appended as last argument
    #[arg(long, default_value = "flexiv_bridge")]
    bridge: String,

    #[command(subcommand)]
    command: Procedure,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Procedure {
    /// Damping coefficient along X±, Y±, Z±
    Damping,
    /// Minimum force/torque to move the leader on each axis
    MinDrag {
        #[arg(short = 'n', long)]
        trials: Option<usize>,
    },
    /// Follower stiffness from force over tracking error
    Stiffness {
        #[arg(short = 'n', long)]
        trials: Option<usize>,
    },
    /// Leader/follower Z force ratio under a steady push
    Transparency {
        #[arg(short = 'n', long)]
        trials: Option<usize>,
    },
    /// Follower force against the configured contact limit
    ContactWrench {
        #[arg(short = 'n', long)]
        trials: Option<usize>,
    },
    /// Leader drift after letting go of the handle
    Hover {
        #[arg(short = 'n', long)]
        trials: Option<usize>,
    },
}

impl Procedure {
    fn report_prefix(self) -> &'static str {
        match self {
            Procedure::Damping => "damping",
            Procedure::MinDrag { .. } => "min_drag",
            Procedure::Stiffness { .. } => "stiffness",
            Procedure::Transparency { .. } => "transparency",
            Procedure::ContactWrench { .. } => "contact_wrench",
            Procedure::Hover { .. } => "hover",
        }
    }

    fn apply(self, config: &mut CalibrationConfig) {
        match self {
            Procedure::Damping => {}
            Procedure::MinDrag { trials } => config.drag.trials = trials.unwrap_or(config.drag.trials),
            Procedure::Stiffness { trials } => config.stiffness.trials = trials.unwrap_or(config.stiffness.trials),
            Procedure::Transparency { trials } => {
                config.transparency.trials = trials.unwrap_or(config.transparency.trials)
            }
            Procedure::ContactWrench { trials } => config.contact.trials = trials.unwrap_or(config.contact.trials),
            Procedure::Hover { trials } => config.hover.trials = trials.unwrap_or(config.hover.trials),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    println!("[{}] Teleop calibration: {}", ts_now(), args.command.report_prefix());
    println!("  Leader: {}  Follower: {}", args.leader, args.follower);
    println!("  Output Dir: {}", args.output_dir.display());

    let mut config = CalibrationConfig::load(args.config.as_deref()).context("loading configuration")?;
    args.command.apply(&mut config);
    config.validate().context("validating configuration")?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, stopping");
            trigger.cancel();
        }
    });

    let mut operator = ConsoleOperator::new();
    let launch = match choose_launch(&args, &mut operator, &cancel).await {
        Ok(launch) => launch,
        Err(e) if e.downcast_ref::<CalibError>().is_some_and(CalibError::is_cancelled) => {
            println!("[{}] Cancelled before start", ts_now());
            std::process::exit(130);
        }
        Err(e) => return Err(e),
    };

    let bridge: Vec<String> = args.bridge.split_whitespace().map(str::to_string).collect();
    let reply_timeout = Duration::from_secs_f64(config.bridge_timeout_s);
    let leader = BridgeRobot::connect(&bridge, &args.leader, reply_timeout)
        .with_context(|| format!("connecting to leader {}", args.leader))?;
    let follower = BridgeRobot::connect(&bridge, &args.follower, reply_timeout)
        .with_context(|| format!("connecting to follower {}", args.follower))?;

    let report = CsvReport::create(&args.output_dir, args.command.report_prefix()).context("creating report")?;
    let mut session = Session::new((leader, follower), operator, launch, config, cancel, report);

    let outcome = run(&mut session, args.command).await;
    match session.finish(outcome).await {
        Ok(()) => {
            println!("[{}] Finished", ts_now());
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            println!("[{}] Interrupted, cleanup done", ts_now());
            // stdin may still have a pending read
            std::process::exit(130);
        }
        Err(e) => Err(e).context(format!("{} failed", args.command.report_prefix())),
    }
}

async fn run<R: RobotClient, O: Operator>(
    session: &mut Session<R, O>,
    command: Procedure,
) -> teleop_calibration_rs::Result<()> {
    match command {
        Procedure::Damping => damping::run(session).await.map(drop),
        Procedure::MinDrag { .. } => drag::run(session).await.map(drop),
        Procedure::Stiffness { .. } => stiffness::run(session).await.map(drop),
        Procedure::Transparency { .. } => transparency::run(session).await.map(drop),
        Procedure::ContactWrench { .. } => contact::run(session).await.map(drop),
        Procedure::Hover { .. } => hover::run(session).await.map(drop),
    }
}

/// Decide who starts the teleop program, offering the `test_*` menu when
/// no executable was named.
async fn choose_launch(args: &Args, operator: &mut ConsoleOperator, cancel: &CancellationToken) -> Result<LaunchPlan> {
    // Contact runs use a teleop program started by hand unless one is named
    let manual = args.manual_teleop || (matches!(args.command, Procedure::ContactWrench { .. }) && args.executable.is_none());

    let exe = match &args.executable {
        Some(path) => path.clone(),
        None if manual => return Ok(LaunchPlan::Manual { name: None }),
        None => {
            let found = find_executables(&args.exe_dir)?;
            println!("Available teleop programs:");
            for (i, exe) in found.iter().enumerate() {
                println!("  [{}] {}", i, exe.name);
            }
            let index = select_index(operator, "Select program: ", found.len(), cancel).await?;
            found[index].path.clone()
        }
    };

    if manual {
        let name = exe.file_name().map(|n| n.to_string_lossy().into_owned());
        return Ok(LaunchPlan::Manual { name });
    }
    println!("  Teleop program: {}", exe.display());
    Ok(LaunchPlan::supervised(
        &exe,
        &args.leader,
        &args.follower,
        Elevation::from_password(args.password.clone()),
    ))
}
