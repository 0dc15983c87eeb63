use rosc::{OscMessage, OscPacket, OscType};
use serde::{Deserialize, Serialize};

use crate::audio::fft::NUM_BANDS;
use crate::error::{Result, TapError};

use super::FeatureStream;

pub const SIGNAL_LEVEL_ADDR: &str = "/SIGLVL";
pub const INSTANT_VALUE_ADDR: &str = "/INSTVAL";
pub const IMPULSE_ADDR: &str = "/IMPLS";
pub const TIME_ADDR: &str = "/TIME";
pub const BPM_ADDR: &str = "/BPM";
/// Channel then the 12 band energies. The fundamental frequency only travels in the binary form.
pub const FFT_ADDR: &str = "/FFT";

/// Separator argument carried between channel and level in level messages.
pub const LEVEL_SEPARATOR: &str = "/";

/// Encoded size of [`SpectralBands`]: channel, fundamental and the fixed band array.
pub const SPECTRAL_BANDS_LEN: usize = 4 + 4 + NUM_BANDS * 4;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SignalLevel {
    pub signal_id: i32,
    pub signal_level: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Impulse {
    pub signal_id: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeInfo {
    pub is_playing: bool,
    pub position: f32,
    pub bpm: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpectralBands {
    pub signal_id: i32,
    pub fundamental_frequency: f32,
    pub bands: [f32; NUM_BANDS],
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LinearSpectrum {
    pub signal_id: i32,
    pub fundamental_frequency: f32,
    pub magnitudes: Vec<f32>,
}

/// A decoded feature message, as seen by a consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureMessage {
    SignalLevel(SignalLevel),
    InstantValue(SignalLevel),
    Impulse(Impulse),
    TimeInfo(TimeInfo),
    SpectralBands(SpectralBands),
    LinearSpectrum(LinearSpectrum),
}

fn decode<'a, T: Deserialize<'a>>(message: &'static str, bytes: &'a [u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| TapError::Decode {
        message,
        reason: e.to_string(),
    })
}

fn osc_error(message: &'static str, reason: impl Into<String>) -> TapError {
    TapError::Decode {
        message,
        reason: reason.into(),
    }
}

fn int_arg(message: &'static str, arg: Option<&OscType>) -> Result<i32> {
    match arg {
        Some(OscType::Int(value)) => Ok(*value),
        other => Err(osc_error(message, format!("expected int, got {:?}", other))),
    }
}

fn float_arg(message: &'static str, arg: Option<&OscType>) -> Result<f32> {
    match arg {
        Some(OscType::Float(value)) => Ok(*value),
        other => Err(osc_error(message, format!("expected float, got {:?}", other))),
    }
}

impl FeatureMessage {
    pub fn name(&self) -> &'static str {
        match self {
            FeatureMessage::SignalLevel(_) => "SignalLevel",
            FeatureMessage::InstantValue(_) => "InstantValue",
            FeatureMessage::Impulse(_) => "Impulse",
            FeatureMessage::TimeInfo(_) => "TimeInfo",
            FeatureMessage::SpectralBands(_) => "SpectralBands",
            FeatureMessage::LinearSpectrum(_) => "LinearSpectrum",
        }
    }

    /// Channel id stamped on the message, if it carries one.
    pub fn signal_id(&self) -> Option<i32> {
        match self {
            FeatureMessage::SignalLevel(m) | FeatureMessage::InstantValue(m) => Some(m.signal_id),
            FeatureMessage::Impulse(m) => Some(m.signal_id),
            FeatureMessage::TimeInfo(_) => None,
            FeatureMessage::SpectralBands(m) => Some(m.signal_id),
            FeatureMessage::LinearSpectrum(m) => Some(m.signal_id),
        }
    }

    /// Decodes a binary payload received on `stream`.
    ///
    /// The FFT stream carries both spectrum shapes; the fixed-size band message is told apart
    /// by its length.
    pub fn decode_binary(stream: FeatureStream, bytes: &[u8]) -> Result<Self> {
        match stream {
            FeatureStream::SignalLevel => Ok(Self::SignalLevel(decode("SignalLevel", bytes)?)),
            FeatureStream::InstantValue => Ok(Self::InstantValue(decode("InstantValue", bytes)?)),
            FeatureStream::Impulse => Ok(Self::Impulse(decode("Impulse", bytes)?)),
            FeatureStream::TimeInfo => Ok(Self::TimeInfo(decode("TimeInfo", bytes)?)),
            FeatureStream::Fft if bytes.len() == SPECTRAL_BANDS_LEN => {
                Ok(Self::SpectralBands(decode("SpectralBands", bytes)?))
            }
            FeatureStream::Fft => Ok(Self::LinearSpectrum(decode("LinearSpectrum", bytes)?)),
            FeatureStream::Osc => Err(osc_error("binary", "the OSC stream carries no binary messages")),
        }
    }

    /// Decodes one OSC datagram. A time bundle yields a single `TimeInfo`.
    pub fn decode_osc(bytes: &[u8]) -> Result<Self> {
        let (_, packet) = rosc::decoder::decode_udp(bytes).map_err(|e| osc_error("osc", format!("{:?}", e)))?;

        match packet {
            OscPacket::Message(message) => Self::from_osc_message(&message),
            OscPacket::Bundle(bundle) => {
                // Play state has no OSC representation
                let mut time_info = TimeInfo::default();
                for packet in &bundle.content {
                    let OscPacket::Message(message) = packet else {
                        return Err(osc_error("TimeInfo", "nested bundle"));
                    };
                    match message.addr.as_str() {
                        TIME_ADDR => time_info.position = float_arg("TimeInfo", message.args.first())?,
                        BPM_ADDR => time_info.bpm = float_arg("TimeInfo", message.args.first())?,
                        other => return Err(osc_error("TimeInfo", format!("unexpected address {}", other))),
                    }
                }
                Ok(Self::TimeInfo(time_info))
            }
        }
    }

    fn from_osc_message(message: &OscMessage) -> Result<Self> {
        let args = &message.args;
        match message.addr.as_str() {
            SIGNAL_LEVEL_ADDR => Ok(Self::SignalLevel(SignalLevel {
                signal_id: int_arg("SignalLevel", args.first())?,
                signal_level: float_arg("SignalLevel", args.get(2))?,
            })),
            INSTANT_VALUE_ADDR => Ok(Self::InstantValue(SignalLevel {
                signal_id: int_arg("InstantValue", args.first())?,
                signal_level: float_arg("InstantValue", args.get(2))?,
            })),
            IMPULSE_ADDR => Ok(Self::Impulse(Impulse {
                signal_id: int_arg("Impulse", args.first())?,
            })),
            FFT_ADDR => {
                if args.len() != NUM_BANDS + 1 {
                    return Err(osc_error("SpectralBands", format!("expected {} args, got {}", NUM_BANDS + 1, args.len())));
                }
                let mut bands = [0.0; NUM_BANDS];
                for (band, arg) in bands.iter_mut().zip(&args[1..]) {
                    *band = float_arg("SpectralBands", Some(arg))?;
                }
                // The fundamental only travels in the binary encoding
                Ok(Self::SpectralBands(SpectralBands {
                    signal_id: int_arg("SpectralBands", args.first())?,
                    fundamental_frequency: crate::audio::fft::NO_FREQUENCY,
                    bands,
                }))
            }
            other => Err(osc_error("osc", format!("unknown address {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_layout_sizes() {
        let level = bincode::serialize(&SignalLevel::default()).unwrap();
        assert_eq!(level.len(), 8);
        let impulse = bincode::serialize(&Impulse { signal_id: 3 }).unwrap();
        assert_eq!(impulse, 3i32.to_le_bytes());
        let time = bincode::serialize(&TimeInfo::default()).unwrap();
        assert_eq!(time.len(), 9);
        let bands = bincode::serialize(&SpectralBands::default()).unwrap();
        assert_eq!(bands.len(), SPECTRAL_BANDS_LEN);
    }

    #[test]
    fn test_fft_stream_tells_shapes_apart() {
        let bands = SpectralBands {
            signal_id: 2,
            fundamental_frequency: 440.0,
            bands: [0.5; NUM_BANDS],
        };
        let bytes = bincode::serialize(&bands).unwrap();
        assert_eq!(
            FeatureMessage::decode_binary(FeatureStream::Fft, &bytes).unwrap(),
            FeatureMessage::SpectralBands(bands)
        );

        let linear = LinearSpectrum {
            signal_id: 2,
            fundamental_frequency: 440.0,
            magnitudes: vec![1.0; 32],
        };
        let bytes = bincode::serialize(&linear).unwrap();
        assert_eq!(
            FeatureMessage::decode_binary(FeatureStream::Fft, &bytes).unwrap(),
            FeatureMessage::LinearSpectrum(linear)
        );
    }

    #[test]
    fn test_truncated_payload_is_an_error() {
        let result = FeatureMessage::decode_binary(FeatureStream::SignalLevel, &[1, 0]);
        assert!(matches!(result, Err(TapError::Decode { message: "SignalLevel", .. })));
    }

    #[test]
    fn test_osc_level_message() {
        let packet = OscPacket::Message(OscMessage {
            addr: SIGNAL_LEVEL_ADDR.to_string(),
            args: vec![
                OscType::Int(4),
                OscType::String(LEVEL_SEPARATOR.to_string()),
                OscType::Float(0.25),
            ],
        });
        let bytes = rosc::encoder::encode(&packet).unwrap();

        let message = FeatureMessage::decode_osc(&bytes).unwrap();
        assert_eq!(message.signal_id(), Some(4));
        assert_eq!(
            message,
            FeatureMessage::SignalLevel(SignalLevel {
                signal_id: 4,
                signal_level: 0.25
            })
        );
    }

    #[test]
    fn test_osc_unknown_address() {
        let packet = OscPacket::Message(OscMessage {
            addr: "/nope".to_string(),
            args: vec![],
        });
        let bytes = rosc::encoder::encode(&packet).unwrap();
        assert!(FeatureMessage::decode_osc(&bytes).is_err());
    }
}
