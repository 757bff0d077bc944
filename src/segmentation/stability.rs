use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::Detector;
use crate::metrics::stiffness_ratio;

/// Tuning of the rolling-stability gate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub segment_duration_s: f64,
    pub sample_period_s: f64,
    pub window: usize,      // N values kept in the FIFO
    pub floor: f64,         // every value must exceed this
    pub tolerance: f64,     // max - min must stay below this
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            segment_duration_s: 0.1,
            sample_period_s: 0.01,
            window: 20,
            floor: 10.0,
            tolerance: 20.0,
        }
    }
}

impl StabilityConfig {
    /// Samples reduced into one stiffness value (10 at 100 Hz / 0.1 s).
    pub fn samples_per_segment(&self) -> usize {
        if self.sample_period_s <= 0.0 {
            return 1;
        }
        ((self.segment_duration_s / self.sample_period_s).round() as usize).max(1)
    }
}

/// Tracking error and applied force along the measured axis at one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackingObservation {
    pub t: f64,
    pub error: f64, // m or rad, signed
    pub force: f64, // N or Nm, signed
}

/// One reduced sub-segment, kept for the report.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SubSegment {
    pub closed_at: f64,
    pub stiffness: f64,
    pub mean_error: f64,
}

/// The FIFO contents at the moment stability was declared.
#[derive(Clone, Debug, PartialEq)]
pub struct StableWindow {
    pub values: Vec<f64>,
    pub errors: Vec<f64>,
    pub stiffness: f64,
    pub mean_error: f64,
    pub segments_seen: Vec<SubSegment>,
}

/// True when the FIFO is full, every value exceeds `floor` and the spread
/// stays below `tolerance`.
pub fn is_stable(values: &VecDeque<f64>, capacity: usize, floor: f64, tolerance: f64) -> bool {
    if capacity == 0 || values.len() < capacity {
        return false;
    }
    if !values.iter().all(|v| *v > floor) {
        return false;
    }
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    // inf - inf is NaN, which fails the comparison
    max - min < tolerance
}

/// Rolling-stability window over fixed-length sub-segments.
#[derive(Debug)]
pub struct StabilityDetector {
    config: StabilityConfig,
    per_segment: usize,
    pending_errors: Vec<f64>,
    pending_forces: Vec<f64>,
    values: VecDeque<f64>,
    errors: VecDeque<f64>,
    log: Vec<SubSegment>,
}

impl StabilityDetector {
    pub fn new(config: StabilityConfig) -> Self {
        let per_segment = config.samples_per_segment();
        let window = config.window.max(1);
        Self {
            per_segment,
            pending_errors: Vec::with_capacity(per_segment),
            pending_forces: Vec::with_capacity(per_segment),
            values: VecDeque::with_capacity(window),
            errors: VecDeque::with_capacity(window),
            log: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }

    /// Most recent sub-segment, for live readouts.
    pub fn latest(&self) -> Option<&SubSegment> {
        self.log.last()
    }

    /// Sub-segments reduced since the last stable window closed.
    pub fn sub_segments(&self) -> &[SubSegment] {
        &self.log
    }

    fn close_sub_segment(&mut self, t: f64) -> SubSegment {
        let n = self.pending_errors.len() as f64;
        let mean_error = self.pending_errors.iter().map(|e| e.abs()).sum::<f64>() / n;
        let mean_force = self.pending_forces.iter().map(|f| f.abs()).sum::<f64>() / n;
        self.pending_errors.clear();
        self.pending_forces.clear();

        let segment = SubSegment {
            closed_at: t,
            stiffness: stiffness_ratio(mean_force, mean_error),
            mean_error,
        };
        self.log.push(segment);
        segment
    }
}

impl Detector for StabilityDetector {
    type Input = TrackingObservation;
    type Output = StableWindow;

    fn push(&mut self, obs: TrackingObservation) -> Option<StableWindow> {
        self.pending_errors.push(obs.error);
        self.pending_forces.push(obs.force);
        if self.pending_errors.len() < self.per_segment {
            return None;
        }

        let segment = self.close_sub_segment(obs.t);
        let capacity = self.config.window.max(1);
        self.values.push_back(segment.stiffness);
        self.errors.push_back(segment.mean_error);
        while self.values.len() > capacity {
            self.values.pop_front();
            self.errors.pop_front();
        }

        if !is_stable(&self.values, capacity, self.config.floor, self.config.tolerance) {
            return None;
        }

        let values: Vec<f64> = self.values.drain(..).collect();
        let errors: Vec<f64> = self.errors.drain(..).collect();
        let stiffness = values.iter().sum::<f64>() / values.len() as f64;
        let mean_error = errors.iter().sum::<f64>() / errors.len() as f64;
        Some(StableWindow {
            values,
            errors,
            stiffness,
            mean_error,
            segments_seen: std::mem::take(&mut self.log),
        })
    }
}
