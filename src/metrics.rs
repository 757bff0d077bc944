//! Pure reductions from closed segments to calibration metrics.
//!
//! Near-zero denominators map to sentinels (0 or infinity) instead of faults.

use crate::segmentation::{chunk_segment, Chunk, Segment, ZoneSample};
use crate::types::{Axis, Sample, Vec3};

pub const VELOCITY_FLOOR: f64 = 1e-6; // m/s, damping denominator floor
pub const RATIO_FLOOR: f64 = 1e-6; // stiffness / transparency denominator floor
pub const MIN_DAMPING_SAMPLES: usize = 5;
pub const DAMPING_EPSILON: f64 = 1e-9;

/// Arithmetic mean, 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

// ===== Damping =====

/// Damping coefficient of one chunk (N·s/m). Zero when the chunk barely moved.
pub fn damping_coefficient(mean_force: f64, mean_velocity: f64) -> f64 {
    if mean_velocity < VELOCITY_FLOOR {
        return 0.0;
    }
    mean_force / mean_velocity
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChunkDamping {
    pub chunk: Chunk,
    pub coefficient: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DampingResult {
    pub chunks: Vec<ChunkDamping>,
    pub overall: f64,
}

/// Mean over the well-defined (positive) chunk coefficients only.
pub fn overall_damping(coefficients: &[f64]) -> f64 {
    let valid: Vec<f64> = coefficients.iter().copied().filter(|b| *b > 0.0).collect();
    mean(&valid)
}

pub fn damping_from_chunks(chunks: Vec<Chunk>) -> DampingResult {
    let chunks: Vec<ChunkDamping> = chunks
        .into_iter()
        .map(|chunk| ChunkDamping {
            coefficient: damping_coefficient(chunk.mean_force, chunk.mean_velocity),
            chunk,
        })
        .collect();
    let coefficients: Vec<f64> = chunks.iter().map(|c| c.coefficient).collect();
    DampingResult {
        overall: overall_damping(&coefficients),
        chunks,
    }
}

/// Chunk a damping run and reduce it. Too few samples yields B = 0 with no chunks.
pub fn damping_for_segment(
    segment: &Segment<ZoneSample>,
    direction: &Vec3,
    start: f64,
    final_distance: f64,
    width: f64,
) -> DampingResult {
    if segment.len() < MIN_DAMPING_SAMPLES {
        return DampingResult {
            chunks: Vec::new(),
            overall: 0.0,
        };
    }
    damping_from_chunks(chunk_segment(segment, direction, start, final_distance, width))
}

/// Session summary: mean |B| over directions that produced a value.
pub fn session_damping(per_direction: &[f64]) -> f64 {
    let valid: Vec<f64> = per_direction
        .iter()
        .map(|b| b.abs())
        .filter(|b| *b > DAMPING_EPSILON)
        .collect();
    mean(&valid)
}

// ===== Minimum drag =====

/// |wrench| along `axis` at the sample where velocity first crossed its threshold.
pub fn drag_at_crossing(sample: &Sample, axis: Axis) -> f64 {
    sample.wrench_along(axis).abs()
}

// ===== Stiffness =====

/// Force over error, infinite when the error is effectively zero.
pub fn stiffness_ratio(mean_force: f64, mean_error: f64) -> f64 {
    if mean_error.abs() < RATIO_FLOOR {
        return f64::INFINITY;
    }
    mean_force / mean_error
}

// ===== Transparency =====

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransparencyResult {
    pub mean_master: f64, // N
    pub mean_slave: f64,  // N
    pub ratio: f64,
}

/// T = -F_master / F_slave, infinite for a vanishing slave force.
pub fn transparency_ratio(master: f64, slave: f64) -> f64 {
    if slave.abs() < RATIO_FLOOR {
        return f64::INFINITY;
    }
    -master / slave
}

/// Average (master, slave) force pairs of a validity segment, then take the ratio.
pub fn transparency(pairs: &[(f64, f64)]) -> Option<TransparencyResult> {
    if pairs.is_empty() {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_master = pairs.iter().map(|(m, _)| m).sum::<f64>() / n;
    let mean_slave = pairs.iter().map(|(_, s)| s).sum::<f64>() / n;
    Some(TransparencyResult {
        mean_master,
        mean_slave,
        ratio: transparency_ratio(mean_master, mean_slave),
    })
}

/// Render as the "slave:master" ratio shown to the operator.
pub fn format_ratio(ratio: f64) -> String {
    if ratio.is_finite() {
        format!("1:{ratio:.4}")
    } else {
        "1:inf".to_string()
    }
}

// ===== Contact wrench =====

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContactResult {
    pub mean_slave: f64,    // N
    pub error_percent: f64, // %
}

pub fn contact_error_percent(measured: f64, setpoint: f64) -> f64 {
    if setpoint == 0.0 {
        return f64::INFINITY;
    }
    (measured - setpoint).abs() / setpoint.abs() * 100.0
}

/// Compare the mean slave force magnitude over the dwell segment to the setpoint.
pub fn contact(slave_forces: &[f64], setpoint: f64) -> ContactResult {
    let magnitudes: Vec<f64> = slave_forces.iter().map(|f| f.abs()).collect();
    let mean_slave = mean(&magnitudes);
    ContactResult {
        mean_slave,
        error_percent: contact_error_percent(mean_slave, setpoint),
    }
}

// ===== Hover =====

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HoverResult {
    pub distance_mm: f64,
    pub success: bool,
}

pub fn hover_offset_mm(start: &Vec3, end: &Vec3) -> f64 {
    (end - start).norm() * 1000.0
}

pub fn hover(start: &Vec3, end: &Vec3, threshold_mm: f64) -> HoverResult {
    let distance_mm = hover_offset_mm(start, end);
    HoverResult {
        distance_mm,
        success: distance_mm < threshold_mm,
    }
}

/// Percentage of successful trials (0 for none).
pub fn success_rate(outcomes: &[bool]) -> f64 {
    if outcomes.is_empty() {
        return 0.0;
    }
    outcomes.iter().filter(|ok| **ok).count() as f64 / outcomes.len() as f64 * 100.0
}
