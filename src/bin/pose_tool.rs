use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use tokio_util::sync::CancellationToken;

use teleop_calibration_rs::config::CalibrationConfig;
use teleop_calibration_rs::error::CalibError;
use teleop_calibration_rs::operator::{select_index, ConsoleOperator, Operator};
use teleop_calibration_rs::poses::{PoseStore, SavedPose};
use teleop_calibration_rs::report::ts_now;
use teleop_calibration_rs::robot::{move_all_restoring, stop_all, BridgeRobot, RobotClient};

#[derive(Parser, Debug)]
#[command(name = "pose_tool")]
#[command(about = "Save robot poses and move one or more robots back to them", long_about = None)]
struct Args {
    /// Robot serials; the first one is the robot whose pose gets saved
    #[arg(required = true)]
    robots: Vec<String>,

    /// JSON configuration overriding the built-in defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pose file (defaults to the configured `save_pose.csv`)
    #[arg(long)]
    pose_file: Option<PathBuf>,

    /// Robot helper command; the serial is appended as last argument
    #[arg(long, default_value = "flexiv_bridge")]
    bridge: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Save,
    Go,
    Home,
    Quit,
}

impl Command {
    fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "s" => Some(Command::Save),
            "g" => Some(Command::Go),
            "h" => Some(Command::Home),
            "q" => Some(Command::Quit),
            _ => None,
        }
    }
}

fn format_list(values: &[f64], precision: usize) -> String {
    let cells: Vec<String> = values.iter().map(|v| format!("{v:.precision$}")).collect();
    format!("[{}]", cells.join(", "))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = CalibrationConfig::load(args.config.as_deref()).context("loading configuration")?;
    let store = PoseStore::new(args.pose_file.clone().unwrap_or_else(|| config.pose_file.clone()));
    store.ensure().context("creating pose file")?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, stopping robots");
            trigger.cancel();
        }
    });

    let bridge: Vec<String> = args.bridge.split_whitespace().map(str::to_string).collect();
    let reply_timeout = Duration::from_secs_f64(config.bridge_timeout_s);
    let mut robots = args
        .robots
        .iter()
        .map(|serial| BridgeRobot::connect(&bridge, serial, reply_timeout).with_context(|| format!("connecting to {serial}")))
        .collect::<Result<Vec<_>>>()?;

    println!("[{}] Pose tool: {}", ts_now(), args.robots.join(", "));
    println!("  s: save the pose of {}", args.robots[0]);
    println!("  g: move all robots to a saved pose");
    println!("  h: move all robots home");
    println!("  q: stop robots and exit");

    let mut operator = ConsoleOperator::new();
    let outcome = command_loop(&mut robots, &mut operator, &store, &config, &cancel).await;
    stop_all(&mut robots);

    match outcome {
        Ok(()) => Ok(()),
        Err(CalibError::Cancelled) => {
            println!("[{}] Interrupted, robots stopped", ts_now());
            std::process::exit(130);
        }
        Err(e) => Err(e).context("pose tool failed"),
    }
}

async fn command_loop<R: RobotClient>(
    robots: &mut [R],
    operator: &mut ConsoleOperator,
    store: &PoseStore,
    config: &CalibrationConfig,
    cancel: &CancellationToken,
) -> teleop_calibration_rs::Result<()> {
    loop {
        let answer = operator
            .ask("\nCommand [s]ave / [g]o / [h]ome / [q]uit: ", cancel)
            .await?;
        let Some(command) = Command::parse(&answer) else {
            operator.say(&format!("Unknown command '{answer}'"));
            continue;
        };

        match command {
            Command::Save => {
                let robot = &mut robots[0];
                let pose = SavedPose::from_states(&robot.states()?);
                println!("Robot {}", robot.serial());
                println!("  joints (deg): {}", format_list(&pose.joints_deg, 3));
                println!("  joints (rad): {}", format_list(&pose.joints_rad, 5));
                println!("  TCP (quat):   {}", format_list(&pose.tcp_pose, 5));
                println!("  TCP (euler):  {}", format_list(&pose.tcp_pose_euler, 3));
                store.append(&pose)?;
                operator.say(&format!("Pose saved to {}", store.path().display()));
            }
            Command::Go => {
                let loaded = store.load()?;
                if loaded.skipped > 0 {
                    operator.say(&format!("{} malformed row(s) skipped", loaded.skipped));
                }
                if loaded.poses.is_empty() {
                    operator.say("No saved pose yet");
                    continue;
                }
                for (i, pose) in loaded.poses.iter().enumerate() {
                    println!(
                        "{}: {} | TCP (quat): {} | TCP (euler): {}",
                        i,
                        format_list(&pose.joints_deg, 3),
                        format_list(&pose.tcp_pose, 4),
                        format_list(&pose.tcp_pose_euler, 2)
                    );
                }
                let index = select_index(operator, "Index of the pose to move to: ", loaded.poses.len(), cancel).await?;
                let target = loaded.poses[index].joints_deg;
                operator.say(&format!("Moving to {}", format_list(&target, 3)));
                move_all_restoring(robots, &target, config.pose_tool_vel_scale, config.trial_timeout_s, cancel).await?;
                operator.say("All robots reached the target pose");
            }
            Command::Home => {
                operator.say("Moving all robots home");
                move_all_restoring(
                    robots,
                    &config.home_pose_deg,
                    config.pose_tool_vel_scale,
                    config.home_timeout_s,
                    cancel,
                )
                .await?;
                operator.say("All robots are home");
            }
            Command::Quit => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse(" S "), Some(Command::Save));
        assert_eq!(Command::parse("g"), Some(Command::Go));
        assert_eq!(Command::parse("q"), Some(Command::Quit));
        assert_eq!(Command::parse("x"), None);
    }

    #[test]
    fn test_format_list() {
        assert_eq!(format_list(&[1.0, -2.5], 2), "[1.00, -2.50]");
    }
}
