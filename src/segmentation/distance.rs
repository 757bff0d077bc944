use nalgebra::Vector3;

use super::{Detector, Segment};
use crate::error::{CalibError, Result};
use crate::types::{Sample, Vec3};

/// Sample recorded inside the active zone with its absolute projected distance.
#[derive(Clone, Debug, PartialEq)]
pub struct ZoneSample {
    pub sample: Sample,
    pub distance: f64,
}

/// Records samples while the TCP travels through `[start, final]` along a
/// direction, measured from the pose at construction time.
///
/// The first sample beyond `final` ends collection for good; there is no
/// re-arming, so a single spike past the boundary also ends the run.
#[derive(Debug)]
pub struct DistanceWindow {
    origin: Vec3,
    direction: Vec3,
    start: f64,
    final_distance: f64,
    armed: bool,
    opened_at: Option<f64>,
    recorded: Vec<ZoneSample>,
}

impl DistanceWindow {
    pub fn new(origin: Vec3, direction: Vec3, start: f64, final_distance: f64) -> Result<Self> {
        let length = direction.norm();
        if length < 1e-9 {
            return Err(CalibError::InvalidInput(
                "direction vector has zero length".to_string(),
            ));
        }
        if !(final_distance > start && start >= 0.0) {
            return Err(CalibError::InvalidInput(format!(
                "active zone [{start}, {final_distance}] is empty"
            )));
        }
        Ok(Self {
            origin,
            direction: direction / length,
            start,
            final_distance,
            armed: false,
            opened_at: None,
            recorded: Vec::new(),
        })
    }

    /// Absolute distance from the origin projected on the direction.
    pub fn projected_distance(&self, position: &Vec3) -> f64 {
        (position - self.origin).dot(&self.direction).abs()
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn recorded(&self) -> usize {
        self.recorded.len()
    }
}

impl Detector for DistanceWindow {
    type Input = Sample;
    type Output = Segment<ZoneSample>;

    fn push(&mut self, sample: Sample) -> Option<Segment<ZoneSample>> {
        let distance = self.projected_distance(&sample.position);

        if !self.armed && distance >= self.start {
            log::debug!("reached {:.3} m, recording", self.start);
            self.armed = true;
        }
        if !self.armed {
            return None;
        }

        if distance > self.final_distance {
            log::debug!("passed {:.3} m, closing zone", self.final_distance);
            let closed_at = sample.t;
            return Some(Segment {
                opened_at: self.opened_at.unwrap_or(closed_at),
                closed_at,
                samples: std::mem::take(&mut self.recorded),
            });
        }

        if distance >= self.start {
            self.opened_at.get_or_insert(sample.t);
            self.recorded.push(ZoneSample { sample, distance });
        }
        None
    }
}

/// Distance bin of a damping run with its aggregate statistics.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub dist_start: f64,
    pub dist_end: f64,
    pub mean_velocity: f64, // mean |v| along the direction, m/s
    pub mean_force: f64,    // mean |F| along the direction, N
    pub samples: usize,
}

/// Number of full-width chunks between `start` and `final_distance`.
pub fn chunk_count(start: f64, final_distance: f64, width: f64) -> usize {
    if width <= 0.0 || final_distance <= start {
        return 0;
    }
    ((final_distance - start) / width + 1e-9).floor() as usize
}

/// Partition a closed zone segment into fixed-width distance chunks.
///
/// Empty chunks are kept with zero statistics so the table stays dense.
/// Samples past the last full chunk (when `width` does not divide the zone)
/// are left out.
pub fn chunk_segment(
    segment: &Segment<ZoneSample>,
    direction: &Vec3,
    start: f64,
    final_distance: f64,
    width: f64,
) -> Vec<Chunk> {
    let count = chunk_count(start, final_distance, width);
    let unit = direction.normalize();

    let mut sums = vec![(0.0_f64, 0.0_f64, 0_usize); count];
    for zone in &segment.samples {
        let Some(index) = chunk_index(zone.distance, start, width, count) else {
            continue;
        };
        let linear_velocity: Vector3<f64> = zone.sample.velocity.fixed_rows::<3>(0).into_owned();
        let force: Vector3<f64> = zone.sample.wrench.fixed_rows::<3>(0).into_owned();
        let slot = &mut sums[index];
        slot.0 += linear_velocity.dot(&unit).abs();
        slot.1 += force.dot(&unit).abs();
        slot.2 += 1;
    }

    sums.into_iter()
        .enumerate()
        .map(|(index, (sum_v, sum_f, n))| {
            let dist_start = start + width * index as f64;
            let (mean_velocity, mean_force) = if n == 0 {
                (0.0, 0.0)
            } else {
                (sum_v / n as f64, sum_f / n as f64)
            };
            Chunk {
                index,
                dist_start,
                dist_end: dist_start + width,
                mean_velocity,
                mean_force,
                samples: n,
            }
        })
        .collect()
}

fn chunk_index(distance: f64, start: f64, width: f64, count: usize) -> Option<usize> {
    if count == 0 || distance < start {
        return None;
    }
    let covered = start + width * count as f64;
    let index = ((distance - start) / width).floor() as usize;
    if index < count {
        Some(index)
    } else if distance <= covered + 1e-9 {
        // Upper edge belongs to the last chunk
        Some(count - 1)
    } else {
        None
    }
}
