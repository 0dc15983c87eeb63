/// Instant energy must exceed the average by this factor to count as a beat.
pub const THRESHOLD_FACTOR: f32 = 4.0;
pub const MIN_AVERAGE_WINDOW: usize = 2;

/// Lowest intensity reported while impulses are enabled.
pub const INTENSITY_FLOOR: f32 = 0.1;
/// Intensity lost per callback.
pub const INTENSITY_DECAY: f32 = 0.05;

/// Energy-ratio beat detector.
///
/// Keeps an exponentially weighted average of the envelope's instant energy and reports a
/// beat when the current instant energy is [`THRESHOLD_FACTOR`] times above it. The average is
/// always fed the energy from the *previous* callback, so a sudden attack is compared against
/// an average that has not absorbed it yet.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    average_energy: f32,
    previous_energy: f32,
    average_window_size: usize,
    intensity: f32,
}

impl BeatDetector {
    pub fn new(average_window_size: usize) -> Self {
        Self {
            average_energy: 0.0,
            previous_energy: 0.0,
            average_window_size: average_window_size.max(MIN_AVERAGE_WINDOW),
            intensity: INTENSITY_FLOOR,
        }
    }

    pub fn set_average_window_size(&mut self, average_window_size: usize) {
        self.average_window_size = average_window_size.max(MIN_AVERAGE_WINDOW);
    }

    /// Runs once per callback. Returns `true` when a beat is detected.
    pub fn update(&mut self, instant_energy: f32, impulses_enabled: bool) -> bool {
        let window = self.average_window_size as f32;
        let smoothed = (self.average_energy * (window - 1.0) + self.previous_energy) / window;
        self.average_energy = flush_denormal(smoothed).max(0.0);

        self.intensity = if !impulses_enabled {
            0.0
        } else if self.intensity > INTENSITY_FLOOR {
            (self.intensity - INTENSITY_DECAY).max(INTENSITY_FLOOR)
        } else {
            INTENSITY_FLOOR
        };

        let beat = instant_energy > self.average_energy * THRESHOLD_FACTOR;
        if beat {
            // Snap the average up so the sustain of the same hit does not retrigger
            self.average_energy = instant_energy;
            if impulses_enabled {
                self.intensity = 1.0;
            }
        }

        self.previous_energy = instant_energy;
        beat
    }

    pub fn average_energy(&self) -> f32 {
        self.average_energy
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn average_window_size(&self) -> usize {
        self.average_window_size
    }

    pub fn reset(&mut self) {
        self.average_energy = 0.0;
        self.previous_energy = 0.0;
        self.intensity = INTENSITY_FLOOR;
    }
}

/// Pushes values below the `f32` resolution around 1.0 to zero.
fn flush_denormal(value: f32) -> f32 {
    let shifted = value + 1.0;
    shifted - 1.0
}
