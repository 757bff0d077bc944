use super::{Detector, Observed, Segment, TIME_EPSILON};

/// Buffers items while a condition holds; any break discards the buffer.
#[derive(Debug)]
struct DwellBuffer<T> {
    dwell: f64,
    opened_at: Option<f64>,
    buffer: Vec<T>,
}

impl<T> DwellBuffer<T> {
    fn new(dwell: f64) -> Self {
        Self {
            dwell: dwell.max(0.0),
            opened_at: None,
            buffer: Vec::new(),
        }
    }

    fn observe(&mut self, t: f64, holds: bool, item: T) -> Option<Segment<T>> {
        if !holds {
            // No partial credit
            self.reset();
            return None;
        }

        let opened_at = *self.opened_at.get_or_insert(t);
        self.buffer.push(item);

        if t - opened_at + TIME_EPSILON >= self.dwell {
            self.opened_at = None;
            return Some(Segment {
                samples: std::mem::take(&mut self.buffer),
                opened_at,
                closed_at: t,
            });
        }
        None
    }

    fn reset(&mut self) {
        self.opened_at = None;
        self.buffer.clear();
    }

    fn held_for(&self, now: f64) -> f64 {
        self.opened_at.map(|t0| now - t0).unwrap_or(0.0)
    }
}

/// Closes once `|value| >= threshold` has held continuously for `dwell`
/// seconds. A dwell of zero closes on the first qualifying sample, which is
/// how the minimum-drag trigger captures the exact crossing instant.
#[derive(Debug)]
pub struct ThresholdCapture<T> {
    threshold: f64,
    gate: DwellBuffer<T>,
}

impl<T> ThresholdCapture<T> {
    pub fn new(threshold: f64, dwell: f64) -> Self {
        Self {
            threshold: threshold.abs(),
            gate: DwellBuffer::new(dwell),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Seconds the condition has currently held (0 when idle).
    pub fn held_for(&self, now: f64) -> f64 {
        self.gate.held_for(now)
    }

    pub fn reset(&mut self) {
        self.gate.reset();
    }
}

impl<T> Detector for ThresholdCapture<T> {
    type Input = Observed<T>;
    type Output = Segment<T>;

    fn push(&mut self, input: Observed<T>) -> Option<Segment<T>> {
        let holds = input.value.abs() >= self.threshold;
        self.gate.observe(input.t, holds, input.item)
    }
}

/// Closes once `value` has stayed inside `[low, high]` for `dwell` seconds;
/// every sample of that continuous span forms the segment.
#[derive(Debug)]
pub struct ValidityWindow<T> {
    low: f64,
    high: f64,
    gate: DwellBuffer<T>,
}

impl<T> ValidityWindow<T> {
    pub fn new(low: f64, high: f64, dwell: f64) -> Self {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        Self {
            low,
            high,
            gate: DwellBuffer::new(dwell),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.low..=self.high).contains(&value)
    }

    pub fn band(&self) -> (f64, f64) {
        (self.low, self.high)
    }

    pub fn held_for(&self, now: f64) -> f64 {
        self.gate.held_for(now)
    }
}

impl<T> Detector for ValidityWindow<T> {
    type Input = Observed<T>;
    type Output = Segment<T>;

    fn push(&mut self, input: Observed<T>) -> Option<Segment<T>> {
        let holds = self.contains(input.value);
        self.gate.observe(input.t, holds, input.item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed<D>(detector: &mut D, values: &[f64], period: f64) -> Option<(usize, D::Output)>
    where
        D: Detector<Input = Observed<usize>>,
    {
        values.iter().enumerate().find_map(|(i, v)| {
            detector
                .push(Observed::new(i as f64 * period, *v, i))
                .map(|seg| (i, seg))
        })
    }

    #[test]
    fn test_threshold_never_exceeded_never_closes() {
        let mut capture = ThresholdCapture::new(20.0, 3.0);
        let values = vec![19.9; 1000];
        assert!(feed(&mut capture, &values, 0.01).is_none());
    }

    #[test]
    fn test_threshold_dwell_closes_after_three_seconds() {
        let mut capture = ThresholdCapture::new(20.0, 3.0);
        let values = vec![25.0; 500];
        let (index, segment) = feed(&mut capture, &values, 0.01).unwrap();

        assert_eq!(index, 300);
        assert_eq!(segment.len(), 301);
        assert!((segment.duration() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_dip_discards_buffer() {
        let mut capture = ThresholdCapture::new(20.0, 1.0);
        let mut values = vec![25.0; 80];
        values.push(5.0); // dip at t=0.8
        values.extend(vec![-25.0; 200]); // magnitude counts, sign does not

        let (index, segment) = feed(&mut capture, &values, 0.01).unwrap();
        assert_eq!(index, 181);
        assert_eq!(segment.samples.first(), Some(&81));
        assert_eq!(segment.len(), 101);
    }

    #[test]
    fn test_zero_dwell_captures_first_crossing() {
        let mut capture = ThresholdCapture::new(0.01, 0.0);
        let values = [0.0, 0.002, 0.009, 0.012, 0.5];
        let (index, segment) = feed(&mut capture, &values, 0.01).unwrap();

        assert_eq!(index, 3);
        assert_eq!(segment.samples, vec![3]);
    }

    #[test]
    fn test_validity_band_inclusive() {
        let window: ValidityWindow<()> = ValidityWindow::new(9.0, 11.0, 3.0);
        assert!(window.contains(9.0));
        assert!(window.contains(11.0));
        assert!(!window.contains(11.01));
        assert!(!window.contains(8.99));
    }

    #[test]
    fn test_validity_excursion_resets() {
        let mut window = ValidityWindow::new(9.0, 11.0, 3.0);
        let mut values = vec![10.0; 25]; // 2.5 s at 10 Hz
        values.push(12.0);
        values.extend(vec![10.0; 40]);

        let (index, segment) = feed(&mut window, &values, 0.1).unwrap();
        assert_eq!(index, 56);
        assert_eq!(segment.samples.first(), Some(&26));
        assert_eq!(segment.len(), 31);
    }

    #[test]
    fn test_detector_reusable_after_close() {
        let mut window = ValidityWindow::new(9.0, 11.0, 0.5);
        let values = vec![10.0; 20];
        let (first, _) = feed(&mut window, &values, 0.1).unwrap();
        assert_eq!(first, 5);

        let second = window.push(Observed::new(10.0, 10.0, 0usize));
        assert!(second.is_none());
        assert!((window.held_for(10.2) - 0.2).abs() < 1e-9);
    }
}
