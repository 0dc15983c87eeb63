use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

use crate::error::{Result, TapError};

pub const DEFAULT_FFT_SIZE: usize = 4096;
pub const MIN_FFT_SIZE: usize = 16;
pub const MAX_FFT_SIZE: usize = 65536;

/// Number of logarithmic bands reported in spectral messages.
pub const NUM_BANDS: usize = 12;

/// Peak magnitude under which the window is treated as silence.
pub const SILENCE_THRESHOLD: f32 = 0.1;

/// Loudest band must exceed this before bands are normalized, otherwise they are zeroed.
pub const BAND_NOISE_FLOOR: f32 = 50.0;

/// Reported instead of a frequency when the window is silent.
pub const NO_FREQUENCY: f32 = -1.0;

/// Weighting applied to each window before the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowFunction {
    #[default]
    Rectangular,
    Hamming,
}

impl WindowFunction {
    fn coefficients(self, size: usize) -> Vec<f32> {
        match self {
            WindowFunction::Rectangular => vec![1.0; size],
            WindowFunction::Hamming => hamming_window(size),
        }
    }
}

fn hamming_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32;
            0.54 - 0.46 * phase.cos()
        })
        .collect()
}

/// Block FFT over a fixed window of channel-0 samples.
///
/// Samples are collected until the window holds `fft_size` of them, then a forward transform
/// runs, the fundamental frequency is estimated and bins are folded into [`NUM_BANDS`]
/// logarithmic bands. Windows do not overlap. Every buffer, including the FFT scratch space,
/// is allocated in [`SpectralAnalyzer::new`].
pub struct SpectralAnalyzer {
    sample_rate: f32,
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window_function: WindowFunction,
    window: Vec<f32>,
    window_buffer: Vec<f32>,
    write_index: usize,
    spectrum_buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    bands: [f32; NUM_BANDS],
    fundamental_frequency: f32,
    averaging_window: usize,
    transforms: u64,
}

impl SpectralAnalyzer {
    pub fn new(sample_rate: f32, fft_size: usize, window_function: WindowFunction) -> Result<Self> {
        if !fft_size.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&fft_size) {
            return Err(TapError::InvalidFftSize(fft_size));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        if fft.len() != fft_size {
            return Err(TapError::FftPlan { size: fft_size });
        }
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        log::debug!(
            "Planned {}-point FFT ({:?} window, {:.2} Hz per bin)",
            fft_size,
            window_function,
            sample_rate / fft_size as f32
        );

        Ok(Self {
            sample_rate,
            fft_size,
            fft,
            window_function,
            window: window_function.coefficients(fft_size),
            window_buffer: vec![0.0; fft_size],
            write_index: 0,
            spectrum_buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch,
            magnitudes: vec![0.0; fft_size / 2],
            bands: [0.0; NUM_BANDS],
            fundamental_frequency: NO_FREQUENCY,
            averaging_window: 1,
            transforms: 0,
        })
    }

    /// Adds one sample. Returns `true` if it completed a window and a transform ran.
    pub fn push_sample(&mut self, sample: f32) -> bool {
        self.fill_window(&[sample]).1
    }

    /// Copies samples into the current window, stopping at its end. Returns how many samples
    /// were taken and whether the window completed and was transformed.
    pub fn fill_window(&mut self, samples: &[f32]) -> (usize, bool) {
        let start = self.write_index;
        let taken = samples.len().min(self.fft_size - start);
        self.window_buffer[start..start + taken].copy_from_slice(&samples[..taken]);
        self.write_index += taken;

        if self.write_index == self.fft_size {
            self.transform();
            self.write_index = 0;
            (taken, true)
        } else {
            (taken, false)
        }
    }

    /// Adds a block of samples. Returns the number of windows it completed; only the last
    /// transform is kept.
    pub fn push_samples(&mut self, mut samples: &[f32]) -> usize {
        let mut completed = 0;
        while !samples.is_empty() {
            let (taken, transformed) = self.fill_window(samples);
            completed += usize::from(transformed);
            samples = &samples[taken..];
        }
        completed
    }

    fn transform(&mut self) {
        for (bin, (&sample, &weight)) in self
            .spectrum_buffer
            .iter_mut()
            .zip(self.window_buffer.iter().zip(self.window.iter()))
        {
            *bin = Complex::new(sample * weight, 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.spectrum_buffer, &mut self.scratch);

        let averaging = self.averaging_window as f32;
        let half = self.fft_size / 2;
        for (magnitude, bin) in self.magnitudes.iter_mut().zip(&self.spectrum_buffer[..half]) {
            let current = bin.norm();
            *magnitude = if self.averaging_window <= 1 || self.transforms == 0 {
                current
            } else {
                (*magnitude * (averaging - 1.0) + current) / averaging
            };
        }

        self.fundamental_frequency =
            estimate_fundamental(&self.magnitudes, self.sample_rate, self.fft_size);
        aggregate_bands(&self.magnitudes, &mut self.bands);
        normalize_bands(&mut self.bands);
        self.transforms += 1;
    }

    /// Number of transforms averaged into the reported magnitudes (1 disables smoothing).
    pub fn set_averaging_window(&mut self, transforms: usize) {
        self.averaging_window = transforms.max(1);
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    /// Normalized band energies of the last transform.
    pub fn bands(&self) -> &[f32; NUM_BANDS] {
        &self.bands
    }

    /// Bin magnitudes of the last transform, `fft_size / 2` of them.
    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    /// Estimated fundamental in Hz, or [`NO_FREQUENCY`] for a silent window.
    pub fn fundamental_frequency(&self) -> f32 {
        self.fundamental_frequency
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn write_index(&self) -> usize {
        self.write_index
    }

    pub fn window_function(&self) -> WindowFunction {
        self.window_function
    }

    pub fn transforms(&self) -> u64 {
        self.transforms
    }

    pub fn reset(&mut self) {
        self.window_buffer.fill(0.0);
        self.write_index = 0;
        self.magnitudes.fill(0.0);
        self.bands = [0.0; NUM_BANDS];
        self.fundamental_frequency = NO_FREQUENCY;
        self.transforms = 0;
    }
}

/// Interpolates the spectral peak with its louder neighbour.
///
/// The peak bin and that neighbour are averaged, weighted by magnitude, and the resulting
/// fractional bin is converted to Hz.
pub fn estimate_fundamental(magnitudes: &[f32], sample_rate: f32, fft_size: usize) -> f32 {
    let mut peak = 0;
    let mut peak_magnitude = f32::MIN;
    for (index, &magnitude) in magnitudes.iter().enumerate() {
        if magnitude > peak_magnitude {
            peak = index;
            peak_magnitude = magnitude;
        }
    }

    if magnitudes.is_empty() || peak_magnitude < SILENCE_THRESHOLD {
        return NO_FREQUENCY;
    }

    let bin_width = sample_rate / fft_size as f32;
    let left = peak.checked_sub(1).map(|index| (index, magnitudes[index]));
    let right = magnitudes.get(peak + 1).map(|&magnitude| (peak + 1, magnitude));

    let (neighbour, neighbour_magnitude) = match (left, right) {
        (Some(left), Some(right)) => {
            if right.1 > left.1 {
                right
            } else {
                left
            }
        }
        (Some(left), None) => left,
        (None, Some(right)) => right,
        (None, None) => return peak as f32 * bin_width,
    };

    let weighted_bin = (peak as f32 * peak_magnitude + neighbour as f32 * neighbour_magnitude)
        / (peak_magnitude + neighbour_magnitude);
    weighted_bin * bin_width
}

/// Bin range of a logarithmic band: bands 0 and 1 are bins 0 and 1, band `k` covers
/// `[2^(k-1), 2^k)`. Ranges are clipped to `bins`.
pub fn band_range(band: usize, bins: usize) -> Range<usize> {
    let (start, end) = match band {
        0 => (0, 1),
        1 => (1, 2),
        k => (1 << (k - 1), 1 << k),
    };
    start.min(bins)..end.min(bins)
}

pub fn aggregate_bands(magnitudes: &[f32], bands: &mut [f32; NUM_BANDS]) {
    for (band, energy) in bands.iter_mut().enumerate() {
        *energy = magnitudes[band_range(band, magnitudes.len())].iter().sum();
    }
}

/// Scales bands so the loudest is 1.0. Below [`BAND_NOISE_FLOOR`] every band is zeroed.
pub fn normalize_bands(bands: &mut [f32; NUM_BANDS]) {
    let max = bands.iter().copied().fold(0.0f32, f32::max);
    if max > BAND_NOISE_FLOOR {
        for band in bands.iter_mut() {
            *band /= max;
        }
    } else {
        bands.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 44100.0;

    fn bin_centered_sine(bin: usize, amplitude: f32, size: usize) -> Vec<f32> {
        (0..size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * bin as f32 * i as f32 / size as f32;
                amplitude * phase.sin()
            })
            .collect()
    }

    #[test]
    fn test_rejects_invalid_sizes() {
        assert!(matches!(
            SpectralAnalyzer::new(SAMPLE_RATE, 1000, WindowFunction::Rectangular),
            Err(TapError::InvalidFftSize(1000))
        ));
        assert!(SpectralAnalyzer::new(SAMPLE_RATE, 8, WindowFunction::Rectangular).is_err());
        assert!(SpectralAnalyzer::new(SAMPLE_RATE, 1024, WindowFunction::Hamming).is_ok());
    }

    #[test]
    fn test_transform_runs_when_window_fills() {
        let mut analyzer = SpectralAnalyzer::new(SAMPLE_RATE, 64, WindowFunction::Rectangular).unwrap();
        assert_eq!(analyzer.push_samples(&[0.0; 63]), 0);
        assert_eq!(analyzer.write_index(), 63);

        assert!(analyzer.push_sample(0.0));
        assert_eq!(analyzer.write_index(), 0);
        assert_eq!(analyzer.transforms(), 1);

        // Samples past the boundary start the next window
        assert_eq!(analyzer.push_samples(&[0.0; 70]), 1);
        assert_eq!(analyzer.write_index(), 6);

        assert_eq!(analyzer.push_samples(&[0.0; 250]), 4);
        assert_eq!(analyzer.transforms(), 6);
    }

    #[test]
    fn test_fill_window_stops_at_boundary() {
        let mut analyzer = SpectralAnalyzer::new(SAMPLE_RATE, 16, WindowFunction::Rectangular).unwrap();
        let samples = [0.5; 40];

        assert_eq!(analyzer.fill_window(&samples[..10]), (10, false));
        assert_eq!(analyzer.fill_window(&samples[10..]), (6, true));
        assert_eq!(analyzer.write_index(), 0);
        assert_eq!(analyzer.fill_window(&samples[16..]), (16, true));
        assert_eq!(analyzer.fill_window(&samples[32..]), (8, false));
        assert_eq!(analyzer.transforms(), 2);
        assert_eq!(analyzer.fill_window(&[]), (0, false));
    }

    #[test]
    fn test_silence_reports_sentinel_and_zero_bands() {
        let mut analyzer = SpectralAnalyzer::new(SAMPLE_RATE, DEFAULT_FFT_SIZE, WindowFunction::Rectangular).unwrap();
        assert_eq!(analyzer.push_samples(&vec![0.0; DEFAULT_FFT_SIZE]), 1);

        assert_eq!(analyzer.fundamental_frequency(), NO_FREQUENCY);
        assert!(analyzer.bands().iter().all(|&band| band == 0.0));
    }

    #[test]
    fn test_fundamental_of_bin_centered_sine() {
        let mut analyzer = SpectralAnalyzer::new(SAMPLE_RATE, DEFAULT_FFT_SIZE, WindowFunction::Rectangular).unwrap();
        analyzer.push_samples(&bin_centered_sine(100, 0.5, DEFAULT_FFT_SIZE));

        let expected = 100.0 * SAMPLE_RATE / DEFAULT_FFT_SIZE as f32;
        assert!((analyzer.fundamental_frequency() - expected).abs() < 1.0);

        // Bin 100 lives in band 7 ([64, 128))
        let bands = analyzer.bands();
        assert!((bands[7] - 1.0).abs() < 1e-6);
        assert!(bands.iter().enumerate().filter(|(i, _)| *i != 7).all(|(_, &b)| b < 0.01));
    }

    #[test]
    fn test_band_normalization_cancels_scale() {
        let mut loud = SpectralAnalyzer::new(SAMPLE_RATE, DEFAULT_FFT_SIZE, WindowFunction::Rectangular).unwrap();
        let mut quiet = SpectralAnalyzer::new(SAMPLE_RATE, DEFAULT_FFT_SIZE, WindowFunction::Rectangular).unwrap();

        let signal: Vec<f32> = bin_centered_sine(37, 0.6, DEFAULT_FFT_SIZE)
            .iter()
            .zip(bin_centered_sine(300, 0.3, DEFAULT_FFT_SIZE))
            .map(|(a, b)| a + b)
            .collect();
        let scaled: Vec<f32> = signal.iter().map(|s| s * 0.25).collect();

        loud.push_samples(&signal);
        quiet.push_samples(&scaled);

        for (a, b) in loud.bands().iter().zip(quiet.bands()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn test_estimate_fundamental_neighbour_selection() {
        let sample_rate = 1024.0;
        let fft_size = 1024; // 1 Hz per bin

        // Right neighbour louder
        let magnitudes = [0.0, 1.0, 4.0, 2.0, 0.0];
        let expected = (2.0 * 4.0 + 3.0 * 2.0) / 6.0;
        assert!((estimate_fundamental(&magnitudes, sample_rate, fft_size) - expected).abs() < 1e-6);

        // Left neighbour louder
        let magnitudes = [0.0, 3.0, 4.0, 1.0, 0.0];
        let expected = (2.0 * 4.0 + 1.0 * 3.0) / 7.0;
        assert!((estimate_fundamental(&magnitudes, sample_rate, fft_size) - expected).abs() < 1e-6);

        // Peak at the first bin only has a right neighbour
        let magnitudes = [5.0, 1.0, 0.0];
        let expected = 1.0 / 6.0;
        assert!((estimate_fundamental(&magnitudes, sample_rate, fft_size) - expected).abs() < 1e-6);

        assert_eq!(estimate_fundamental(&[0.05, 0.09], sample_rate, fft_size), NO_FREQUENCY);
    }

    #[test]
    fn test_band_ranges_double_in_width() {
        assert_eq!(band_range(0, 2048), 0..1);
        assert_eq!(band_range(1, 2048), 1..2);
        assert_eq!(band_range(2, 2048), 2..4);
        assert_eq!(band_range(7, 2048), 64..128);
        assert_eq!(band_range(11, 2048), 1024..2048);
        // Smaller transforms clip the upper bands
        assert_eq!(band_range(11, 256), 256..256);
    }

    #[test]
    fn test_quiet_bands_are_zeroed() {
        let mut bands = [10.0; NUM_BANDS];
        bands[3] = 49.0;
        normalize_bands(&mut bands);
        assert!(bands.iter().all(|&b| b == 0.0));

        let mut bands = [0.0; NUM_BANDS];
        bands[0] = 100.0;
        bands[5] = 25.0;
        normalize_bands(&mut bands);
        assert_eq!(bands[0], 1.0);
        assert_eq!(bands[5], 0.25);
    }

    #[test]
    fn test_averaging_window_smooths_magnitudes() {
        let size = 256;
        let mut analyzer = SpectralAnalyzer::new(SAMPLE_RATE, size, WindowFunction::Rectangular).unwrap();
        analyzer.set_averaging_window(2);

        analyzer.push_samples(&bin_centered_sine(10, 1.0, size));
        let first = analyzer.magnitudes()[10];
        analyzer.push_samples(&vec![0.0; size]);

        assert!((analyzer.magnitudes()[10] - first / 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_hamming_window_attenuates_edges() {
        let window = hamming_window(64);
        assert!((window[0] - 0.08).abs() < 1e-6);
        assert!((window[63] - 0.08).abs() < 1e-6);
        assert!(window[32] > 0.99);
    }
}
