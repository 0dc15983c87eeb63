use rosc::{OscBundle, OscMessage, OscPacket, OscTime, OscType};
use serde::Serialize;

use crate::audio::fft::NUM_BANDS;
use crate::error::{Result, TapError};
use crate::host::PositionInfo;

use super::messages::{
    BPM_ADDR, FFT_ADDR, IMPULSE_ADDR, INSTANT_VALUE_ADDR, LEVEL_SEPARATOR, SIGNAL_LEVEL_ADDR, TIME_ADDR,
};

/// Capacity reserved for encoded payloads. Sized for a linear spectrum of a 4096-point FFT.
pub const DEFAULT_ENCODE_CAPACITY: usize = 16 * 1024;

/// "Immediately" in OSC time tag terms.
const IMMEDIATE: OscTime = OscTime {
    seconds: 0,
    fractional: 1,
};

/// Schema-binary encoding into a reused buffer.
pub struct BinaryEncoder {
    buffer: Vec<u8>,
}

impl BinaryEncoder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encodes `value`, replacing the previous payload. Allocation-free while the payload fits
    /// the reserved capacity.
    pub fn encode<T: Serialize + ?Sized>(&mut self, name: &'static str, value: &T) -> Result<&[u8]> {
        self.buffer.clear();
        bincode::serialize_into(&mut self.buffer, value).map_err(|e| TapError::Encode {
            message: name,
            reason: e.to_string(),
        })?;
        Ok(&self.buffer)
    }
}

impl Default for BinaryEncoder {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ENCODE_CAPACITY)
    }
}

fn level_message(addr: &str, channel: i32) -> OscPacket {
    OscPacket::Message(OscMessage {
        addr: addr.to_string(),
        args: vec![
            OscType::Int(channel),
            OscType::String(LEVEL_SEPARATOR.to_string()),
            OscType::Float(0.0),
        ],
    })
}

fn args_mut(packet: &mut OscPacket) -> &mut [OscType] {
    match packet {
        OscPacket::Message(message) => &mut message.args,
        OscPacket::Bundle(_) => &mut [],
    }
}

fn set_arg(packet: &mut OscPacket, index: usize, value: OscType) {
    if let Some(slot) = args_mut(packet).get_mut(index) {
        *slot = value;
    }
}

fn encode_packet<'a>(buffer: &'a mut Vec<u8>, name: &'static str, packet: &OscPacket) -> Result<&'a [u8]> {
    buffer.clear();
    rosc::encoder::encode_into(packet, buffer).map_err(|e| TapError::Encode {
        message: name,
        reason: format!("{:?}", e),
    })?;
    Ok(buffer.as_slice())
}

/// OSC encoding of every feature message.
///
/// Each message is a persistent packet whose arguments are overwritten before encoding, so
/// steady-state encoding does not allocate. The impulse packet never changes between channel
/// changes and is kept encoded.
pub struct OscEncoder {
    signal_level: OscPacket,
    instant_value: OscPacket,
    spectral_bands: OscPacket,
    time_info: OscPacket,
    impulse_packet: OscPacket,
    impulse: Vec<u8>,
    buffer: Vec<u8>,
}

impl OscEncoder {
    pub fn new(channel: i32) -> Result<Self> {
        let mut bands = Vec::with_capacity(NUM_BANDS + 1);
        bands.push(OscType::Int(channel));
        bands.extend(std::iter::repeat(OscType::Float(0.0)).take(NUM_BANDS));

        let time = |addr: &str| {
            OscPacket::Message(OscMessage {
                addr: addr.to_string(),
                args: vec![OscType::Float(0.0)],
            })
        };

        let mut encoder = Self {
            signal_level: level_message(SIGNAL_LEVEL_ADDR, channel),
            instant_value: level_message(INSTANT_VALUE_ADDR, channel),
            spectral_bands: OscPacket::Message(OscMessage {
                addr: FFT_ADDR.to_string(),
                args: bands,
            }),
            time_info: OscPacket::Bundle(OscBundle {
                timetag: IMMEDIATE,
                content: vec![time(TIME_ADDR), time(BPM_ADDR)],
            }),
            impulse_packet: OscPacket::Message(OscMessage {
                addr: IMPULSE_ADDR.to_string(),
                args: vec![OscType::Int(channel)],
            }),
            impulse: Vec::with_capacity(64),
            buffer: Vec::with_capacity(DEFAULT_ENCODE_CAPACITY),
        };
        encoder.stamp_channel(channel)?;
        Ok(encoder)
    }

    /// Writes `channel` into every packet and re-encodes the impulse.
    pub fn stamp_channel(&mut self, channel: i32) -> Result<()> {
        for packet in [
            &mut self.signal_level,
            &mut self.instant_value,
            &mut self.spectral_bands,
            &mut self.impulse_packet,
        ] {
            set_arg(packet, 0, OscType::Int(channel));
        }
        encode_packet(&mut self.impulse, "Impulse", &self.impulse_packet)?;
        Ok(())
    }

    pub fn signal_level(&mut self, level: f32) -> Result<&[u8]> {
        set_arg(&mut self.signal_level, 2, OscType::Float(level));
        encode_packet(&mut self.buffer, "SignalLevel", &self.signal_level)
    }

    pub fn instant_value(&mut self, value: f32) -> Result<&[u8]> {
        set_arg(&mut self.instant_value, 2, OscType::Float(value));
        encode_packet(&mut self.buffer, "InstantValue", &self.instant_value)
    }

    pub fn impulse(&self) -> &[u8] {
        &self.impulse
    }

    /// `/TIME` and `/BPM` in one bundle. Play state is not part of the OSC form.
    pub fn time_info(&mut self, position: &PositionInfo) -> Result<&[u8]> {
        let values = [position.ppq_position as f32, position.bpm as f32];
        if let OscPacket::Bundle(bundle) = &mut self.time_info {
            for (packet, value) in bundle.content.iter_mut().zip(values) {
                set_arg(packet, 0, OscType::Float(value));
            }
        }
        encode_packet(&mut self.buffer, "TimeInfo", &self.time_info)
    }

    /// Channel followed by the band energies. The fundamental is binary-only.
    pub fn spectral_bands(&mut self, bands: &[f32; NUM_BANDS]) -> Result<&[u8]> {
        for (slot, &energy) in args_mut(&mut self.spectral_bands).iter_mut().skip(1).zip(bands) {
            *slot = OscType::Float(energy);
        }
        encode_packet(&mut self.buffer, "SpectralBands", &self.spectral_bands)
    }
}
