/// Smallest averaging window accepted, in samples.
pub const MIN_WINDOW_SIZE: usize = 64;

/// Only one sample out of this many is read when summing the envelope.
pub const DEFAULT_SAMPLES_TO_SKIP: usize = 6;

/// Running average of the rectified signal over a fixed number of samples.
///
/// The sum is strided: only every `samples_to_skip`-th sample of each channel is read, while
/// the window counts every frame. The resulting level is therefore scaled down by the stride,
/// which downstream consumers already expect.
#[derive(Debug, Clone)]
pub struct EnvelopeTracker {
    sample_accumulator: f32,
    samples_since_emit: usize,
    window_size: usize,
    samples_to_skip: usize,
    instant_energy: f32,
}

impl EnvelopeTracker {
    pub fn new(window_size: usize, samples_to_skip: usize) -> Self {
        Self {
            sample_accumulator: 0.0,
            samples_since_emit: 0,
            window_size: window_size.max(MIN_WINDOW_SIZE),
            samples_to_skip: samples_to_skip.max(1),
            instant_energy: 0.0,
        }
    }

    pub fn set_window_size(&mut self, window_size: usize) {
        self.window_size = window_size.max(MIN_WINDOW_SIZE);
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn samples_to_skip(&self) -> usize {
        self.samples_to_skip
    }

    /// Adds the strided absolute sum of one channel's samples.
    pub fn accumulate(&mut self, samples: &[f32]) {
        self.sample_accumulator += samples
            .iter()
            .step_by(self.samples_to_skip)
            .map(|sample| sample.abs())
            .sum::<f32>();
    }

    /// Counts `frames` more samples, refreshes the instant energy and reports whether the
    /// averaging window closed. Both accumulators restart from zero when it does.
    pub fn advance(&mut self, frames: usize, channels_analyzed: usize) -> bool {
        self.samples_since_emit += frames;

        let divisor = (self.window_size * channels_analyzed.max(1)) as f32;
        self.instant_energy = self.sample_accumulator / divisor;

        if self.samples_since_emit >= self.window_size {
            self.samples_since_emit = 0;
            self.sample_accumulator = 0.0;
            true
        } else {
            false
        }
    }

    pub fn instant_energy(&self) -> f32 {
        self.instant_energy
    }

    pub fn sample_accumulator(&self) -> f32 {
        self.sample_accumulator
    }

    pub fn samples_since_emit(&self) -> usize {
        self.samples_since_emit
    }

    pub fn reset(&mut self) {
        self.sample_accumulator = 0.0;
        self.samples_since_emit = 0;
        self.instant_energy = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_emission_per_window() {
        let mut envelope = EnvelopeTracker::new(256, 1);
        let block = [0.25f32; 64];

        let mut emissions = 0;
        for _ in 0..4 {
            envelope.accumulate(&block);
            if envelope.advance(block.len(), 1) {
                emissions += 1;
            }
        }

        assert_eq!(emissions, 1);
        assert_eq!(envelope.samples_since_emit(), 0);
        assert_eq!(envelope.sample_accumulator(), 0.0);
        assert!((envelope.instant_energy() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_no_emission_before_window_fills() {
        let mut envelope = EnvelopeTracker::new(128, 1);
        envelope.accumulate(&[1.0; 127]);
        assert!(!envelope.advance(127, 1));
        assert_eq!(envelope.samples_since_emit(), 127);

        envelope.accumulate(&[1.0; 1]);
        assert!(envelope.advance(1, 1));
    }

    #[test]
    fn test_strided_sum_reads_every_kth_sample() {
        let mut envelope = EnvelopeTracker::new(64, 6);
        let mut samples = [0.0f32; 12];
        samples[0] = -1.0;
        samples[6] = 0.5;
        samples[3] = 100.0; // skipped

        envelope.accumulate(&samples);
        assert!((envelope.sample_accumulator() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_energy_divides_by_analyzed_channels() {
        let mut envelope = EnvelopeTracker::new(64, 1);
        envelope.accumulate(&[0.5; 64]);
        envelope.accumulate(&[0.5; 64]);
        assert!(envelope.advance(64, 2));
        assert!((envelope.instant_energy() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_window_size_is_clamped() {
        let mut envelope = EnvelopeTracker::new(8, 0);
        assert_eq!(envelope.window_size(), MIN_WINDOW_SIZE);
        assert_eq!(envelope.samples_to_skip(), 1);

        envelope.set_window_size(1024);
        assert_eq!(envelope.window_size(), 1024);
        envelope.set_window_size(0);
        assert_eq!(envelope.window_size(), MIN_WINDOW_SIZE);
    }
}
