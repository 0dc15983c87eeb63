use log::{info, warn};
use std::sync::Arc;

use super::beat_detector::BeatDetector;
use super::envelope::{EnvelopeTracker, DEFAULT_SAMPLES_TO_SKIP};
use super::fft::{SpectralAnalyzer, WindowFunction, DEFAULT_FFT_SIZE, NO_FREQUENCY, NUM_BANDS};
use super::{AudioBlock, ChannelSelection};
use crate::error::{Result, TapError};
use crate::host::{PlayHead, PositionInfo};
use crate::monitor::TapMonitor;
use crate::net::encoder::{BinaryEncoder, OscEncoder, DEFAULT_ENCODE_CAPACITY};
use crate::net::messages::{Impulse, LinearSpectrum, SignalLevel, SpectralBands, TimeInfo};
use crate::net::{Endpoints, FeatureSink, FeatureStream, NetworkSink};
use crate::params::{Parameter, Parameters};
use crate::state::{TapState, DEFAULT_UI_HEIGHT, DEFAULT_UI_WIDTH};

/// Samples between two time info messages, whatever the block size.
pub const DEFAULT_TIME_INFO_CYCLE: usize = 2048;

pub const DEFAULT_SAMPLE_RATE: f32 = 44100.0;

/// Build-time choices that stay fixed for the life of a tap.
#[derive(Debug, Clone, PartialEq)]
pub struct TapSettings {
    pub sample_rate: f32,
    pub fft_size: usize,
    pub samples_to_skip: usize,
    pub time_info_cycle: usize,
    pub window_function: WindowFunction,
    pub parameters: Parameters,
}

impl Default for TapSettings {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            fft_size: DEFAULT_FFT_SIZE,
            samples_to_skip: DEFAULT_SAMPLES_TO_SKIP,
            time_info_cycle: DEFAULT_TIME_INFO_CYCLE,
            window_function: WindowFunction::default(),
            parameters: Parameters::default(),
        }
    }
}

#[derive(Debug, Default)]
struct EncodeFailures {
    count: u64,
}

impl EncodeFailures {
    fn record(&mut self, error: TapError) {
        if self.count == 0 {
            warn!("Dropping feature message: {}", error);
        }
        self.count += 1;
    }
}

fn dispatch<S: FeatureSink>(
    sink: &mut S,
    failures: &mut EncodeFailures,
    stream: FeatureStream,
    encoded: Result<&[u8]>,
) {
    match encoded {
        Ok(payload) => sink.send(stream, payload),
        Err(e) => failures.record(e),
    }
}

/// The analysis tap: called once per host audio callback.
///
/// Every callback runs the same fixed sequence: envelope intake, beat detection,
/// then emission of whatever is due (impulse, level, instant value, time info, spectrum).
/// Message structs and encode buffers are created up front and overwritten in place, so
/// `process` does not allocate once the sink is warmed up.
pub struct SignalTap<S: FeatureSink = NetworkSink> {
    parameters: Parameters,
    sample_rate: f32,
    ui_width: u32,
    ui_height: u32,

    envelope: EnvelopeTracker,
    beat_detector: BeatDetector,
    spectrum: SpectralAnalyzer,
    time_info_cycle: usize,
    samples_since_time_info: usize,

    signal_level: SignalLevel,
    instant_value: SignalLevel,
    time_info: TimeInfo,
    spectral_bands: SpectralBands,
    linear_spectrum: LinearSpectrum,
    impulse_payload: Vec<u8>,

    binary: BinaryEncoder,
    osc: OscEncoder,
    failures: EncodeFailures,
    linear_osc_noticed: bool,

    monitor: Arc<TapMonitor>,
    sink: S,
}

impl SignalTap<NetworkSink> {
    /// Opens one transport session per feature stream and builds the tap on top of them.
    pub fn new(settings: TapSettings, endpoints: &Endpoints) -> Result<Self> {
        let sink = NetworkSink::connect(endpoints)?;
        Self::with_sink(settings, sink)
    }
}

impl<S: FeatureSink> SignalTap<S> {
    pub fn with_sink(settings: TapSettings, sink: S) -> Result<Self> {
        let parameters = settings.parameters.sanitized();
        let mut spectrum =
            SpectralAnalyzer::new(settings.sample_rate, settings.fft_size, settings.window_function)?;
        spectrum.set_averaging_window(parameters.fft_averaging_window);

        let half = settings.fft_size / 2;
        let capacity = DEFAULT_ENCODE_CAPACITY.max(16 + half * 4);
        let channel = parameters.channel;

        let mut tap = Self {
            envelope: EnvelopeTracker::new(parameters.averaging_buffer_size, settings.samples_to_skip),
            beat_detector: BeatDetector::new(parameters.average_energy_buffer_size),
            spectrum,
            time_info_cycle: settings.time_info_cycle.max(1),
            samples_since_time_info: 0,
            sample_rate: settings.sample_rate,
            ui_width: DEFAULT_UI_WIDTH,
            ui_height: DEFAULT_UI_HEIGHT,

            signal_level: SignalLevel {
                signal_id: channel,
                signal_level: 0.0,
            },
            instant_value: SignalLevel {
                signal_id: channel,
                signal_level: 0.0,
            },
            time_info: TimeInfo::default(),
            spectral_bands: SpectralBands {
                signal_id: channel,
                fundamental_frequency: NO_FREQUENCY,
                bands: [0.0; NUM_BANDS],
            },
            linear_spectrum: LinearSpectrum {
                signal_id: channel,
                fundamental_frequency: NO_FREQUENCY,
                magnitudes: Vec::with_capacity(half),
            },
            impulse_payload: Vec::with_capacity(16),

            binary: BinaryEncoder::with_capacity(capacity),
            osc: OscEncoder::new(channel)?,
            failures: EncodeFailures::default(),
            linear_osc_noticed: false,

            monitor: Arc::new(TapMonitor::new()),
            sink,
            parameters,
        };
        tap.stamp_channel()?;

        info!(
            "Signal tap ready: channel {}, {} Hz, {}-point FFT, window {} samples",
            channel,
            settings.sample_rate,
            settings.fft_size,
            tap.envelope.window_size()
        );
        Ok(tap)
    }

    /// Analyzes one callback's worth of input and emits whatever became due.
    pub fn process(&mut self, block: &AudioBlock, play_head: Option<&dyn PlayHead>) {
        let frames = block.num_frames();
        let selection = ChannelSelection::from_mono_flag(self.parameters.mono);
        let analyzed = selection.channels_to_analyze(block.num_channels());

        for channel in 0..analyzed {
            self.envelope.accumulate(block.channel(channel));
        }

        let window_closed = self.envelope.advance(frames, analyzed);
        let instant = self.envelope.instant_energy();
        let beat = self.beat_detector.update(instant, self.parameters.send_impulse);
        self.monitor.record_callback(self.beat_detector.intensity(), beat);

        if beat && self.parameters.send_impulse {
            self.emit_impulse();
        }

        let sensitivity = self.parameters.input_sensitivity;
        if window_closed {
            let level = sensitivity * instant;
            self.monitor.set_signal_level(level);
            if self.parameters.send_signal_level {
                self.emit_signal_level(level);
            }
        }

        if self.parameters.send_instant_value {
            self.emit_instant_value(sensitivity * instant);
        }

        self.samples_since_time_info += frames;
        if self.samples_since_time_info >= self.time_info_cycle {
            self.samples_since_time_info %= self.time_info_cycle;
            if self.parameters.send_time_info {
                let position = play_head
                    .and_then(|play_head| play_head.position())
                    .unwrap_or_else(PositionInfo::idle);
                self.monitor.set_position(&position);
                self.emit_time_info(&position);
            } else {
                self.monitor.set_position(&PositionInfo::idle());
            }
        }

        // Spectrum always follows the first channel, one message per completed window
        if self.parameters.send_fft && block.num_channels() > 0 {
            let mut samples = block.channel(0);
            while !samples.is_empty() {
                let (taken, transformed) = self.spectrum.fill_window(samples);
                samples = &samples[taken..];
                if transformed {
                    self.monitor
                        .set_fundamental_frequency(self.spectrum.fundamental_frequency());
                    self.emit_spectrum();
                }
            }
        }
    }

    fn emit_impulse(&mut self) {
        if self.parameters.send_binary {
            self.sink.send(FeatureStream::Impulse, &self.impulse_payload);
        }
        if self.parameters.send_osc {
            self.sink.send(FeatureStream::Osc, self.osc.impulse());
        }
    }

    fn emit_signal_level(&mut self, level: f32) {
        self.signal_level.signal_level = level;
        if self.parameters.send_binary {
            let encoded = self.binary.encode("SignalLevel", &self.signal_level);
            dispatch(&mut self.sink, &mut self.failures, FeatureStream::SignalLevel, encoded);
        }
        if self.parameters.send_osc {
            let encoded = self.osc.signal_level(level);
            dispatch(&mut self.sink, &mut self.failures, FeatureStream::Osc, encoded);
        }
    }

    fn emit_instant_value(&mut self, value: f32) {
        self.instant_value.signal_level = value;
        if self.parameters.send_binary {
            let encoded = self.binary.encode("InstantValue", &self.instant_value);
            dispatch(&mut self.sink, &mut self.failures, FeatureStream::InstantValue, encoded);
        }
        if self.parameters.send_osc {
            let encoded = self.osc.instant_value(value);
            dispatch(&mut self.sink, &mut self.failures, FeatureStream::Osc, encoded);
        }
    }

    fn emit_time_info(&mut self, position: &PositionInfo) {
        self.time_info.is_playing = position.is_playing;
        self.time_info.position = position.ppq_position as f32;
        self.time_info.bpm = position.bpm as f32;

        if self.parameters.send_binary {
            let encoded = self.binary.encode("TimeInfo", &self.time_info);
            dispatch(&mut self.sink, &mut self.failures, FeatureStream::TimeInfo, encoded);
        }
        if self.parameters.send_osc {
            let encoded = self.osc.time_info(position);
            dispatch(&mut self.sink, &mut self.failures, FeatureStream::Osc, encoded);
        }
    }

    fn emit_spectrum(&mut self) {
        let fundamental = self.spectrum.fundamental_frequency();

        if self.parameters.logarithmic_fft {
            self.spectral_bands.fundamental_frequency = fundamental;
            self.spectral_bands.bands = *self.spectrum.bands();
            if self.parameters.send_binary {
                let encoded = self.binary.encode("SpectralBands", &self.spectral_bands);
                dispatch(&mut self.sink, &mut self.failures, FeatureStream::Fft, encoded);
            }
            if self.parameters.send_osc {
                let encoded = self.osc.spectral_bands(&self.spectral_bands.bands);
                dispatch(&mut self.sink, &mut self.failures, FeatureStream::Osc, encoded);
            }
            return;
        }

        self.linear_spectrum.fundamental_frequency = fundamental;
        self.linear_spectrum.magnitudes.clear();
        self.linear_spectrum
            .magnitudes
            .extend_from_slice(self.spectrum.magnitudes());
        if self.parameters.send_binary {
            let encoded = self.binary.encode("LinearSpectrum", &self.linear_spectrum);
            dispatch(&mut self.sink, &mut self.failures, FeatureStream::Fft, encoded);
        }
        if self.parameters.send_osc && !self.linear_osc_noticed {
            warn!("Linear spectrum has no OSC form yet; it is only sent as binary");
            self.linear_osc_noticed = true;
        }
    }

    /// Writes the current channel id into every message template and re-serializes the
    /// impulse payload.
    fn stamp_channel(&mut self) -> Result<()> {
        let channel = self.parameters.channel;
        self.signal_level.signal_id = channel;
        self.instant_value.signal_id = channel;
        self.spectral_bands.signal_id = channel;
        self.linear_spectrum.signal_id = channel;
        self.osc.stamp_channel(channel)?;

        let payload = self.binary.encode("Impulse", &Impulse { signal_id: channel })?;
        self.impulse_payload.clear();
        self.impulse_payload.extend_from_slice(payload);
        Ok(())
    }

    /// Applies a host parameter change and returns the value actually stored.
    pub fn set_parameter(&mut self, parameter: Parameter, value: f32) -> f32 {
        let previous_channel = self.parameters.channel;
        let applied = self.parameters.set(parameter, value);

        match parameter {
            Parameter::Channel => {
                if let Err(e) = self.stamp_channel() {
                    warn!("Failed to re-stamp messages for channel {}: {}", self.parameters.channel, e);
                } else if previous_channel != self.parameters.channel {
                    info!("Reset channel as {}", self.parameters.channel);
                }
            }
            Parameter::AveragingBufferSize => self
                .envelope
                .set_window_size(self.parameters.averaging_buffer_size),
            Parameter::AverageEnergyBufferSize => self
                .beat_detector
                .set_average_window_size(self.parameters.average_energy_buffer_size),
            Parameter::FftAveragingWindow => self
                .spectrum
                .set_averaging_window(self.parameters.fft_averaging_window),
            _ => {}
        }
        applied
    }

    /// Index-based variant used by hosts that enumerate parameters.
    pub fn set_parameter_index(&mut self, index: usize, value: f32) -> Result<f32> {
        Ok(self.set_parameter(Parameter::from_index(index)?, value))
    }

    pub fn parameter(&self, parameter: Parameter) -> f32 {
        self.parameters.get(parameter)
    }

    pub fn parameter_text(&self, parameter: Parameter) -> String {
        self.parameters.text(parameter)
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn save_state(&self) -> Result<Vec<u8>> {
        TapState {
            parameters: self.parameters.clone(),
            ui_width: self.ui_width,
            ui_height: self.ui_height,
        }
        .to_bytes()
    }

    /// Loads a stored document. Parameters go through the regular setters so derived state
    /// (window sizes, channel stamps) follows.
    pub fn restore_state(&mut self, bytes: &[u8]) -> Result<()> {
        let state = TapState::from_bytes(bytes)?;
        for parameter in Parameter::ALL {
            self.set_parameter(parameter, state.parameters.get(parameter));
        }
        self.ui_width = state.ui_width;
        self.ui_height = state.ui_height;
        Ok(())
    }

    /// Called by the host before playback starts or when the sample rate changes.
    pub fn prepare(&mut self, sample_rate: f32) {
        if sample_rate != self.sample_rate {
            info!("Sample rate changed from {} to {} Hz", self.sample_rate, sample_rate);
        }
        self.sample_rate = sample_rate;
        self.spectrum.set_sample_rate(sample_rate);
        self.spectrum.reset();
        self.envelope.reset();
        self.beat_detector.reset();
        self.samples_since_time_info = 0;
    }

    pub fn set_ui_size(&mut self, width: u32, height: u32) {
        self.ui_width = width;
        self.ui_height = height;
    }

    pub fn ui_size(&self) -> (u32, u32) {
        (self.ui_width, self.ui_height)
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn monitor(&self) -> Arc<TapMonitor> {
        Arc::clone(&self.monitor)
    }

    pub fn envelope(&self) -> &EnvelopeTracker {
        &self.envelope
    }

    pub fn beat_detector(&self) -> &BeatDetector {
        &self.beat_detector
    }

    pub fn spectrum(&self) -> &SpectralAnalyzer {
        &self.spectrum
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}
