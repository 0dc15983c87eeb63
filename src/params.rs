use serde::{Deserialize, Serialize};

use crate::error::{Result, TapError};

/// Host-visible parameter table, in the order the host enumerates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    Channel,
    AveragingBufferSize,
    InputSensitivity,
    AverageEnergyBufferSize,
    FftAveragingWindow,
    Mono,
    SendTimeInfo,
    SendSignalLevel,
    SendInstantValue,
    SendImpulse,
    SendFft,
    SendOsc,
    SendBinary,
    LogarithmicFft,
}

impl Parameter {
    pub const COUNT: usize = 14;

    pub const ALL: [Parameter; Parameter::COUNT] = [
        Parameter::Channel,
        Parameter::AveragingBufferSize,
        Parameter::InputSensitivity,
        Parameter::AverageEnergyBufferSize,
        Parameter::FftAveragingWindow,
        Parameter::Mono,
        Parameter::SendTimeInfo,
        Parameter::SendSignalLevel,
        Parameter::SendInstantValue,
        Parameter::SendImpulse,
        Parameter::SendFft,
        Parameter::SendOsc,
        Parameter::SendBinary,
        Parameter::LogarithmicFft,
    ];

    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or(TapError::UnknownParameter(index))
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Parameter::Channel => "Channel Number",
            Parameter::AveragingBufferSize => "Averaging Buffer Size",
            Parameter::InputSensitivity => "Input Sensitivity",
            Parameter::AverageEnergyBufferSize => "Beat Averaging Window",
            Parameter::FftAveragingWindow => "FFT Averaging Window",
            Parameter::Mono => "Mono / Stereo",
            Parameter::SendTimeInfo => "Send TimeInfo",
            Parameter::SendSignalLevel => "Send SignalLevel",
            Parameter::SendInstantValue => "Send InstantValue",
            Parameter::SendImpulse => "Send Impulse",
            Parameter::SendFft => "Send FFT",
            Parameter::SendOsc => "Send OSC",
            Parameter::SendBinary => "Send Binary",
            Parameter::LogarithmicFft => "Logarithmic FFT",
        }
    }

    /// Inclusive range accepted by the setter.
    pub fn range(self) -> (f32, f32) {
        match self {
            Parameter::Channel => (1.0, 16.0),
            Parameter::AveragingBufferSize => (64.0, 4096.0),
            Parameter::InputSensitivity => (0.0, 5.0),
            Parameter::AverageEnergyBufferSize => (2.0, 16.0),
            Parameter::FftAveragingWindow => (1.0, 20.0),
            _ => (0.0, 1.0),
        }
    }

    pub fn is_toggle(self) -> bool {
        matches!(
            self,
            Parameter::Mono
                | Parameter::SendTimeInfo
                | Parameter::SendSignalLevel
                | Parameter::SendInstantValue
                | Parameter::SendImpulse
                | Parameter::SendFft
                | Parameter::SendOsc
                | Parameter::SendBinary
                | Parameter::LogarithmicFft
        )
    }

    pub fn default_value(self) -> f32 {
        Parameters::default().get(self)
    }
}

/// Current value of every parameter.
///
/// Serialized with the same keys the persisted state document uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Parameters {
    pub channel: i32,
    pub averaging_buffer_size: usize,
    pub input_sensitivity: f32,
    pub average_energy_buffer_size: usize,
    pub fft_averaging_window: usize,
    pub mono: bool,
    pub send_time_info: bool,
    pub send_signal_level: bool,
    pub send_instant_value: bool,
    pub send_impulse: bool,
    pub send_fft: bool,
    pub send_osc: bool,
    pub send_binary: bool,
    pub logarithmic_fft: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            channel: 1,
            averaging_buffer_size: 2048,
            input_sensitivity: 1.0,
            average_energy_buffer_size: 8,
            fft_averaging_window: 1,
            mono: false,
            send_time_info: false,
            send_signal_level: true,
            send_instant_value: false,
            send_impulse: true,
            send_fft: false,
            send_osc: false,
            send_binary: true,
            logarithmic_fft: true,
        }
    }
}

fn toggle(value: bool) -> f32 {
    if value {
        1.0
    } else {
        0.0
    }
}

impl Parameters {
    pub fn get(&self, parameter: Parameter) -> f32 {
        match parameter {
            Parameter::Channel => self.channel as f32,
            Parameter::AveragingBufferSize => self.averaging_buffer_size as f32,
            Parameter::InputSensitivity => self.input_sensitivity,
            Parameter::AverageEnergyBufferSize => self.average_energy_buffer_size as f32,
            Parameter::FftAveragingWindow => self.fft_averaging_window as f32,
            Parameter::Mono => toggle(self.mono),
            Parameter::SendTimeInfo => toggle(self.send_time_info),
            Parameter::SendSignalLevel => toggle(self.send_signal_level),
            Parameter::SendInstantValue => toggle(self.send_instant_value),
            Parameter::SendImpulse => toggle(self.send_impulse),
            Parameter::SendFft => toggle(self.send_fft),
            Parameter::SendOsc => toggle(self.send_osc),
            Parameter::SendBinary => toggle(self.send_binary),
            Parameter::LogarithmicFft => toggle(self.logarithmic_fft),
        }
    }

    /// Stores `value` clamped to the parameter's range (integers are rounded, toggles switch
    /// at 0.5) and returns what was applied. NaN leaves the parameter untouched.
    pub fn set(&mut self, parameter: Parameter, value: f32) -> f32 {
        if value.is_nan() {
            return self.get(parameter);
        }

        let (min, max) = parameter.range();
        let clamped = value.clamp(min, max);
        let on = clamped >= 0.5;
        let whole = clamped.round() as usize;

        match parameter {
            Parameter::Channel => self.channel = clamped.round() as i32,
            Parameter::AveragingBufferSize => self.averaging_buffer_size = whole,
            Parameter::InputSensitivity => self.input_sensitivity = clamped,
            Parameter::AverageEnergyBufferSize => self.average_energy_buffer_size = whole,
            Parameter::FftAveragingWindow => self.fft_averaging_window = whole,
            Parameter::Mono => self.mono = on,
            Parameter::SendTimeInfo => self.send_time_info = on,
            Parameter::SendSignalLevel => self.send_signal_level = on,
            Parameter::SendInstantValue => self.send_instant_value = on,
            Parameter::SendImpulse => self.send_impulse = on,
            Parameter::SendFft => self.send_fft = on,
            Parameter::SendOsc => self.send_osc = on,
            Parameter::SendBinary => self.send_binary = on,
            Parameter::LogarithmicFft => self.logarithmic_fft = on,
        }

        self.get(parameter)
    }

    /// Display text for the host's generic editor.
    pub fn text(&self, parameter: Parameter) -> String {
        format!("{:.2}", self.get(parameter))
    }

    /// Re-applies every value through [`Parameters::set`], pulling deserialized values back
    /// into range.
    pub fn sanitized(&self) -> Self {
        let mut sanitized = Self::default();
        for parameter in Parameter::ALL {
            sanitized.set(parameter, self.get(parameter));
        }
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_round_trip() {
        for (index, parameter) in Parameter::ALL.iter().enumerate() {
            assert_eq!(parameter.index(), index);
            assert_eq!(Parameter::from_index(index).unwrap(), *parameter);
        }
        assert!(matches!(
            Parameter::from_index(Parameter::COUNT),
            Err(TapError::UnknownParameter(14))
        ));
    }

    #[test]
    fn test_defaults() {
        assert_eq!(Parameter::Channel.default_value(), 1.0);
        assert_eq!(Parameter::AveragingBufferSize.default_value(), 2048.0);
        assert_eq!(Parameter::AverageEnergyBufferSize.default_value(), 8.0);
        assert_eq!(Parameter::SendImpulse.default_value(), 1.0);
        assert_eq!(Parameter::SendTimeInfo.default_value(), 0.0);
    }

    #[test]
    fn test_setters_clamp_out_of_range_values() {
        let mut parameters = Parameters::default();

        assert_eq!(parameters.set(Parameter::Channel, 42.0), 16.0);
        assert_eq!(parameters.set(Parameter::Channel, -3.0), 1.0);
        assert_eq!(parameters.set(Parameter::AveragingBufferSize, 10.0), 64.0);
        assert_eq!(parameters.set(Parameter::InputSensitivity, 9.0), 5.0);
        assert_eq!(parameters.set(Parameter::AverageEnergyBufferSize, 1.0), 2.0);
        assert_eq!(parameters.set(Parameter::FftAveragingWindow, 0.0), 1.0);
        assert_eq!(parameters.set(Parameter::Channel, 3.6), 4.0);
    }

    #[test]
    fn test_toggles_switch_at_half() {
        let mut parameters = Parameters::default();
        assert_eq!(parameters.set(Parameter::SendFft, 0.7), 1.0);
        assert!(parameters.send_fft);
        assert_eq!(parameters.set(Parameter::SendFft, 0.2), 0.0);
        assert!(!parameters.send_fft);
    }

    #[test]
    fn test_nan_is_ignored() {
        let mut parameters = Parameters::default();
        assert_eq!(parameters.set(Parameter::InputSensitivity, f32::NAN), 1.0);
    }

    #[test]
    fn test_text_has_two_decimals() {
        let parameters = Parameters::default();
        assert_eq!(parameters.text(Parameter::InputSensitivity), "1.00");
        assert_eq!(parameters.text(Parameter::Channel), "1.00");
    }

    #[test]
    fn test_sanitized_clamps_deserialized_values() {
        let parameters = Parameters {
            channel: 99,
            averaging_buffer_size: 1,
            ..Parameters::default()
        };
        let sanitized = parameters.sanitized();
        assert_eq!(sanitized.channel, 16);
        assert_eq!(sanitized.averaging_buffer_size, 64);
    }
}
