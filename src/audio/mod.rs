pub mod beat_detector;
pub mod envelope;
pub mod fft;
pub mod processor;

pub use beat_detector::BeatDetector;
pub use envelope::EnvelopeTracker;
pub use fft::{SpectralAnalyzer, WindowFunction};
pub use processor::{SignalTap, TapSettings};

/// One host callback's worth of planar input, borrowed for the duration of the call.
#[derive(Debug, Clone, Copy)]
pub struct AudioBlock<'a> {
    channels: &'a [&'a [f32]],
}

impl<'a> AudioBlock<'a> {
    pub fn new(channels: &'a [&'a [f32]]) -> Self {
        Self { channels }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Frames in the block. Channels of unequal length are cut to the shortest.
    pub fn num_frames(&self) -> usize {
        self.channels.iter().map(|channel| channel.len()).min().unwrap_or(0)
    }

    pub fn channel(&self, index: usize) -> &'a [f32] {
        &self.channels[index][..self.num_frames()]
    }
}

/// Which input channels feed the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSelection {
    Mono,
    All,
}

impl ChannelSelection {
    pub fn from_mono_flag(mono: bool) -> Self {
        if mono {
            ChannelSelection::Mono
        } else {
            ChannelSelection::All
        }
    }

    pub fn channels_to_analyze(self, available: usize) -> usize {
        match self {
            ChannelSelection::Mono => available.min(1),
            ChannelSelection::All => available,
        }
    }
}
