//! Passive analysis tap for a host audio callback.
//!
//! `SignalTap` is invoked once per audio buffer. It tracks the amplitude envelope, detects
//! beats, runs a windowed FFT and republishes what it finds as small messages over local
//! UDP/TCP sockets (bincode payloads) and/or OSC. Audio is never modified.

pub mod audio;
pub mod config;
pub mod error;
pub mod host;
pub mod monitor;
pub mod net;
pub mod params;
pub mod state;

pub use audio::{AudioBlock, SignalTap, TapSettings};
pub use error::{Result, TapError};
pub use host::{PlayHead, PositionInfo};
pub use monitor::TapMonitor;
pub use params::{Parameter, Parameters};
