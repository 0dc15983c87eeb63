use atomic_float::{AtomicF32, AtomicF64};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::audio::fft::NO_FREQUENCY;
use crate::host::PositionInfo;

/// "Last observed" values written by the audio thread and polled by an editor or status
/// display.
///
/// Each field is an independent relaxed atomic: readers may see a slightly stale mix of
/// values but never a torn one.
#[derive(Debug)]
pub struct TapMonitor {
    beat_intensity: AtomicF32,
    signal_level: AtomicF32,
    fundamental_frequency: AtomicF32,
    is_playing: AtomicBool,
    ppq_position: AtomicF64,
    bpm: AtomicF64,
    time_in_seconds: AtomicF64,
    callbacks: AtomicU64,
    beats: AtomicU64,
}

/// Copy of every monitored value, taken field by field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorSnapshot {
    pub beat_intensity: f32,
    pub signal_level: f32,
    pub fundamental_frequency: f32,
    pub is_playing: bool,
    pub ppq_position: f64,
    pub bpm: f64,
    pub time_in_seconds: f64,
    pub callbacks: u64,
    pub beats: u64,
}

impl Default for TapMonitor {
    fn default() -> Self {
        let idle = PositionInfo::idle();
        Self {
            beat_intensity: AtomicF32::new(0.0),
            signal_level: AtomicF32::new(0.0),
            fundamental_frequency: AtomicF32::new(NO_FREQUENCY),
            is_playing: AtomicBool::new(idle.is_playing),
            ppq_position: AtomicF64::new(idle.ppq_position),
            bpm: AtomicF64::new(idle.bpm),
            time_in_seconds: AtomicF64::new(idle.time_in_seconds),
            callbacks: AtomicU64::new(0),
            beats: AtomicU64::new(0),
        }
    }
}

impl TapMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_callback(&self, beat_intensity: f32, beat: bool) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
        if beat {
            self.beats.fetch_add(1, Ordering::Relaxed);
        }
        self.beat_intensity.store(beat_intensity, Ordering::Relaxed);
    }

    pub(crate) fn set_signal_level(&self, level: f32) {
        self.signal_level.store(level, Ordering::Relaxed);
    }

    pub(crate) fn set_fundamental_frequency(&self, frequency: f32) {
        self.fundamental_frequency.store(frequency, Ordering::Relaxed);
    }

    pub(crate) fn set_position(&self, position: &PositionInfo) {
        self.is_playing.store(position.is_playing, Ordering::Relaxed);
        self.ppq_position.store(position.ppq_position, Ordering::Relaxed);
        self.bpm.store(position.bpm, Ordering::Relaxed);
        self.time_in_seconds.store(position.time_in_seconds, Ordering::Relaxed);
    }

    pub fn beat_intensity(&self) -> f32 {
        self.beat_intensity.load(Ordering::Relaxed)
    }

    pub fn ppq_position(&self) -> f64 {
        self.ppq_position.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            beat_intensity: self.beat_intensity.load(Ordering::Relaxed),
            signal_level: self.signal_level.load(Ordering::Relaxed),
            fundamental_frequency: self.fundamental_frequency.load(Ordering::Relaxed),
            is_playing: self.is_playing.load(Ordering::Relaxed),
            ppq_position: self.ppq_position.load(Ordering::Relaxed),
            bpm: self.bpm.load(Ordering::Relaxed),
            time_in_seconds: self.time_in_seconds.load(Ordering::Relaxed),
            callbacks: self.callbacks.load(Ordering::Relaxed),
            beats: self.beats.load(Ordering::Relaxed),
        }
    }
}
