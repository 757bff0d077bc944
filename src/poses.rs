//! Saved robot poses (`save_pose.csv`).
//!
//! One row per pose; each cell holds a bracketed number list. Rows that do
//! not decode are skipped with a warning so one bad line never hides the rest.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::report::csv_cell;
use crate::types::{JointPoseDeg, RobotStates, JOINT_COUNT, TCP_POSE_DIM};

pub const HEADER: &str = "joint_positions_deg,joint_positions_rad,tcp_pose_quat,tcp_pose_euler";

#[derive(Clone, Debug, PartialEq)]
pub struct SavedPose {
    pub joints_deg: JointPoseDeg,
    pub joints_rad: [f64; JOINT_COUNT],
    pub tcp_pose: [f64; TCP_POSE_DIM], // x, y, z, qw, qx, qy, qz
    pub tcp_pose_euler: [f64; 6], // x, y, z, roll, pitch, yaw (deg)
}

impl SavedPose {
    pub fn from_states(states: &RobotStates) -> Self {
        let p = states.position();
        let rpy = states.orientation_rpy().map(f64::to_degrees);
        Self {
            joints_deg: states.q.map(f64::to_degrees),
            joints_rad: states.q,
            tcp_pose: states.tcp_pose,
            tcp_pose_euler: [p.x, p.y, p.z, rpy.x, rpy.y, rpy.z],
        }
    }

    fn to_row(&self) -> Result<String> {
        let cells = [
            serde_json::to_string(&self.joints_deg)?,
            serde_json::to_string(&self.joints_rad)?,
            serde_json::to_string(&self.tcp_pose)?,
            serde_json::to_string(&self.tcp_pose_euler)?,
        ];
        Ok(cells.iter().map(|c| csv_cell(c)).collect::<Vec<_>>().join(","))
    }

    fn from_row(line: &str) -> std::result::Result<Self, String> {
        let cells = split_csv_line(line);
        if cells.len() < 4 {
            return Err(format!("expected 4 cells, found {}", cells.len()));
        }
        Ok(Self {
            joints_deg: parse_list(&cells[0])?,
            joints_rad: parse_list(&cells[1])?,
            tcp_pose: parse_list(&cells[2])?,
            tcp_pose_euler: parse_list(&cells[3])?,
        })
    }
}

fn parse_list<const N: usize>(cell: &str) -> std::result::Result<[f64; N], String> {
    let values: Vec<f64> = serde_json::from_str(cell.trim()).map_err(|e| format!("'{}': {}", cell, e))?;
    values
        .try_into()
        .map_err(|v: Vec<f64>| format!("expected {} values, found {}", N, v.len()))
}

/// Split one CSV line, honouring double-quoted cells with `""` escapes.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            ('"', _) => quoted = !quoted,
            (',', false) => cells.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    cells.push(current);
    cells
}

/// Poses read back from disk plus the number of rows that failed to decode.
#[derive(Debug, Default)]
pub struct LoadedPoses {
    pub poses: Vec<SavedPose>,
    pub skipped: usize,
}

pub struct PoseStore {
    path: PathBuf,
}

impl PoseStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file with its header row if it does not exist yet.
    pub fn ensure(&self) -> Result<()> {
        if !self.path.exists() {
            fs::write(&self.path, format!("{HEADER}\n"))?;
            log::info!("[poses] created {}", self.path.display());
        }
        Ok(())
    }

    pub fn append(&self, pose: &SavedPose) -> Result<()> {
        self.ensure()?;
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{}", pose.to_row()?)?;
        Ok(())
    }

    pub fn load(&self) -> Result<LoadedPoses> {
        let mut loaded = LoadedPoses::default();
        if !self.path.exists() {
            return Ok(loaded);
        }
        let text = fs::read_to_string(&self.path)?;
        for (n, line) in text.lines().enumerate().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            match SavedPose::from_row(line) {
                Ok(pose) => loaded.poses.push(pose),
                Err(e) => {
                    log::warn!("[poses] {}:{} skipped: {}", self.path.display(), n + 1, e);
                    loaded.skipped += 1;
                }
            }
        }
        Ok(loaded)
    }
}
