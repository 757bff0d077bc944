//! Streaming segmentation of live telemetry.
//!
//! Every detector consumes one observation per clock tick and reports a
//! closed segment once its policy is satisfied. Closed segments are handed
//! out by value, so aborting a collection never touches earlier results.

pub mod distance;
pub mod dwell;
pub mod stability;

pub use distance::{chunk_count, chunk_segment, Chunk, DistanceWindow, ZoneSample};
pub use dwell::{ThresholdCapture, ValidityWindow};
pub use stability::{
    is_stable, StabilityConfig, StabilityDetector, StableWindow, SubSegment, TrackingObservation,
};

use tokio_util::sync::CancellationToken;

use crate::clock::SampleClock;
use crate::error::Result;

/// Slack applied when comparing float timestamps against dwell durations.
pub const TIME_EPSILON: f64 = 1e-9;

/// A stateful policy that turns a stream of observations into segments.
pub trait Detector {
    type Input;
    type Output;

    /// Feed one observation. Returns `Some` exactly when the segment closes.
    fn push(&mut self, input: Self::Input) -> Option<Self::Output>;
}

/// Contiguous span of samples closed by a detector policy.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment<T> {
    pub samples: Vec<T>,
    pub opened_at: f64,
    pub closed_at: f64,
}

impl<T> Segment<T> {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> f64 {
        self.closed_at - self.opened_at
    }
}

/// A scalar reading paired with the payload to buffer when it qualifies.
#[derive(Clone, Debug, PartialEq)]
pub struct Observed<T> {
    pub t: f64,
    pub value: f64,
    pub item: T,
}

impl<T> Observed<T> {
    pub fn new(t: f64, value: f64, item: T) -> Self {
        Self { t, value, item }
    }
}

/// Run `detector` against telemetry pulled by `poll` once per clock tick
/// until it closes a segment or `cancel` fires.
pub async fn drive<D, F>(
    clock: &mut SampleClock,
    cancel: &CancellationToken,
    detector: &mut D,
    mut poll: F,
) -> Result<D::Output>
where
    D: Detector,
    F: FnMut(f64) -> Result<D::Input>,
{
    loop {
        let t = clock.tick(cancel).await?;
        let input = poll(t)?;
        if let Some(output) = detector.push(input) {
            return Ok(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CalibError;

    #[tokio::test(start_paused = true)]
    async fn test_drive_closes_on_detector() {
        let cancel = CancellationToken::new();
        let mut clock = SampleClock::from_secs(0.1);
        let mut detector = ThresholdCapture::new(5.0, 0.0);

        let mut readings = vec![1.0, 2.0, 6.0, 7.0].into_iter();
        let segment = drive(&mut clock, &cancel, &mut detector, |t| {
            let value = readings.next().unwrap_or(0.0);
            Ok(Observed::new(t, value, value))
        })
        .await
        .unwrap();

        assert_eq!(segment.samples, vec![6.0]);
        assert_eq!(clock.ticks(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_propagates_poll_error() {
        let cancel = CancellationToken::new();
        let mut clock = SampleClock::from_secs(0.1);
        let mut detector: ThresholdCapture<f64> = ThresholdCapture::new(5.0, 0.0);

        let result = drive(&mut clock, &cancel, &mut detector, |_| {
            Err(CalibError::Robot("link down".to_string()))
        })
        .await;

        assert!(matches!(result, Err(CalibError::Robot(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_aborts_on_cancel() {
        let cancel = CancellationToken::new();
        let mut clock = SampleClock::from_secs(0.01);
        let mut detector: ThresholdCapture<f64> = ThresholdCapture::new(5.0, 3.0);

        let mut polls = 0;
        let result = drive(&mut clock, &cancel, &mut detector, |t| {
            polls += 1;
            if polls == 50 {
                cancel.cancel();
            }
            Ok(Observed::new(t, 10.0, 10.0))
        })
        .await;

        assert!(matches!(result, Err(CalibError::Cancelled)));
        assert_eq!(polls, 50);
    }
}
