/// Musical meter reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

/// Transport snapshot pulled from the host's play head.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionInfo {
    pub is_playing: bool,
    /// Position in quarter notes since the start of the timeline.
    pub ppq_position: f64,
    pub bpm: f64,
    pub time_signature: TimeSignature,
    pub time_in_seconds: f64,
}

impl PositionInfo {
    /// The snapshot used when the host has no play head or is not playing.
    pub fn idle() -> Self {
        Self {
            is_playing: false,
            ppq_position: 0.0,
            bpm: 120.0,
            time_signature: TimeSignature::default(),
            time_in_seconds: 0.0,
        }
    }
}

impl Default for PositionInfo {
    fn default() -> Self {
        Self::idle()
    }
}

/// Read access to the host transport.
///
/// Returning `None` is a normal condition (no transport, offline render, host refused) and
/// makes the tap fall back to [`PositionInfo::idle`].
pub trait PlayHead {
    fn position(&self) -> Option<PositionInfo>;
}

/// Play head for the standalone binary: a constant tempo clock advanced by processed frames.
#[derive(Debug, Clone)]
pub struct FreeRunningClock {
    sample_rate: f64,
    bpm: f64,
    time_signature: TimeSignature,
    frames: u64,
    playing: bool,
}

impl FreeRunningClock {
    pub fn new(sample_rate: f32, bpm: f64) -> Self {
        Self {
            sample_rate: f64::from(sample_rate),
            bpm,
            time_signature: TimeSignature::default(),
            frames: 0,
            playing: true,
        }
    }

    pub fn advance(&mut self, frames: usize) {
        if self.playing {
            self.frames += frames as u64;
        }
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }
}

impl PlayHead for FreeRunningClock {
    fn position(&self) -> Option<PositionInfo> {
        if self.sample_rate <= 0.0 {
            return None;
        }

        let time_in_seconds = self.frames as f64 / self.sample_rate;
        Some(PositionInfo {
            is_playing: self.playing,
            ppq_position: time_in_seconds * self.bpm / 60.0,
            bpm: self.bpm,
            time_signature: self.time_signature,
            time_in_seconds,
        })
    }
}
