use anyhow::{Context, Result};
use clap::Parser;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::{after, never, select, tick};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use signal_tap::config::{load_config, Config};
use signal_tap::host::FreeRunningClock;
use signal_tap::net::{FeatureStream, SessionStats};
use signal_tap::{AudioBlock, SignalTap, TapMonitor};

const DEFAULT_CONFIG_FILE: &str = "signal-tap.toml";

/// Channels beyond this are ignored by live capture.
const MAX_CHANNELS: usize = 32;

#[derive(Parser)]
#[command(name = "signal-tap")]
#[command(about = "Analyze live or recorded audio and publish level, beat, spectrum and transport messages")]
struct Args {
    /// Settings file (TOML). Defaults to ./signal-tap.toml when present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Audio file to run through the tap (WAV, MP3, FLAC, OGG). Live capture when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Frames per callback when reading a file
    #[arg(long, default_value = "512")]
    block_size: usize,

    /// Input device name for live capture
    #[arg(long)]
    device: Option<String>,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<f64>,

    /// Tempo reported by the simulated host transport
    #[arg(long, default_value = "120")]
    bpm: f64,

    /// Pace file playback at the file's sample rate instead of as fast as possible
    #[arg(long)]
    realtime: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path).with_context(|| format!("loading {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            load_config(Path::new(DEFAULT_CONFIG_FILE)).context("loading signal-tap.toml")?
        }
        None => Config::default(),
    };

    match &args.input {
        Some(path) => run_file(&args, &config, path),
        None => run_live(&args, &config),
    }
}

fn session_stats(tap: &SignalTap) -> Vec<(FeatureStream, Arc<SessionStats>)> {
    FeatureStream::ALL
        .iter()
        .map(|&stream| (stream, tap.sink().stats(stream)))
        .collect()
}

fn log_status(monitor: &TapMonitor, stats: &[(FeatureStream, Arc<SessionStats>)]) {
    let snapshot = monitor.snapshot();
    info!(
        "callbacks {} | beats {} | level {:.3} | f0 {:.1} Hz | ppq {:.2} @ {:.1} bpm",
        snapshot.callbacks,
        snapshot.beats,
        snapshot.signal_level,
        snapshot.fundamental_frequency,
        snapshot.ppq_position,
        snapshot.bpm
    );

    for (stream, stats) in stats {
        if stats.sent() > 0 || stats.dropped() > 0 {
            info!(
                "  {:<13} sent {:>7} dropped {:>7} resets {:>4}{}",
                stream.name(),
                stats.sent(),
                stats.dropped(),
                stats.disconnects(),
                if stats.is_connected() { "" } else { " (disconnected)" }
            );
        }
    }
}

/// Decodes a whole file into one buffer per channel.
fn load_planar(path: &Path) -> Result<(Vec<Vec<f32>>, u32)> {
    let is_wav = path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("wav"));

    let (interleaved, channels, sample_rate) = if is_wav {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|s| s as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };
        (samples, spec.channels as usize, spec.sample_rate)
    } else {
        use rodio::{Decoder, Source};
        use std::fs::File;
        use std::io::BufReader;

        let file = BufReader::new(File::open(path)?);
        let source = Decoder::new(file)?;
        let channels = source.channels() as usize;
        let sample_rate = source.sample_rate();
        let samples: Vec<f32> = source.convert_samples().collect();
        (samples, channels, sample_rate)
    };

    anyhow::ensure!(channels > 0, "{} has no audio channels", path.display());

    let mut planar = vec![Vec::with_capacity(interleaved.len() / channels); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (channel, &sample) in planar.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }
    Ok((planar, sample_rate))
}

fn run_file(args: &Args, config: &Config, path: &Path) -> Result<()> {
    info!("Loading {}", path.display());
    let (planar, sample_rate) = load_planar(path).with_context(|| format!("decoding {}", path.display()))?;
    let total_frames = planar.first().map_or(0, Vec::len);
    info!(
        "Loaded {} channels, {} frames ({:.2}s at {} Hz)",
        planar.len(),
        total_frames,
        total_frames as f64 / f64::from(sample_rate),
        sample_rate
    );

    let frames = match args.duration {
        Some(seconds) => total_frames.min((seconds * f64::from(sample_rate)) as usize),
        None => total_frames,
    };

    let endpoints = config.endpoints()?;
    let mut tap = SignalTap::new(config.tap_settings(sample_rate as f32), &endpoints)?;
    let monitor = tap.monitor();
    let stats = session_stats(&tap);
    let mut clock = FreeRunningClock::new(sample_rate as f32, args.bpm);

    let block_size = args.block_size.max(1);
    let block_duration = Duration::from_secs_f64(block_size as f64 / f64::from(sample_rate));
    let status = tick(Duration::from_secs(1));
    let started = Instant::now();
    let mut views: Vec<&[f32]> = Vec::with_capacity(planar.len());

    let mut start = 0;
    while start < frames {
        let end = (start + block_size).min(frames);
        views.clear();
        views.extend(planar.iter().map(|channel| &channel[start..end]));

        tap.process(&AudioBlock::new(&views), Some(&clock));
        clock.advance(end - start);
        start = end;

        if args.realtime {
            let due = block_duration * (start / block_size) as u32;
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                std::thread::sleep(wait);
            }
        }
        if status.try_recv().is_ok() {
            log_status(&monitor, &stats);
        }
    }

    info!("Processed {} frames in {:.2?}", frames, started.elapsed());
    log_status(&monitor, &stats);
    Ok(())
}

fn run_live(args: &Args, config: &Config) -> Result<()> {
    let host = cpal::default_host();
    let device = match &args.device {
        Some(name) => host
            .input_devices()?
            .find(|device| device.name().is_ok_and(|device_name| &device_name == name))
            .ok_or_else(|| anyhow::anyhow!("No input device named {:?}", name))?,
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("No input device available"))?,
    };

    let supported = device
        .default_input_config()
        .map_err(|e| anyhow::anyhow!("Failed to get default input config: {}", e))?;
    info!("Using audio device: {}", device.name().unwrap_or_else(|_| "Unknown".to_string()));
    info!("Audio config: {:?}", supported);

    let sample_rate = supported.sample_rate().0;
    let endpoints = config.endpoints()?;
    let tap = SignalTap::new(config.tap_settings(sample_rate as f32), &endpoints)?;
    let monitor = tap.monitor();
    let stats = session_stats(&tap);
    let clock = FreeRunningClock::new(sample_rate as f32, args.bpm);

    let stream_config: cpal::StreamConfig = supported.config();
    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build_input_stream::<f32>(&device, &stream_config, tap, clock)?,
        cpal::SampleFormat::I16 => build_input_stream::<i16>(&device, &stream_config, tap, clock)?,
        cpal::SampleFormat::U16 => build_input_stream::<u16>(&device, &stream_config, tap, clock)?,
        cpal::SampleFormat::I32 => build_input_stream::<i32>(&device, &stream_config, tap, clock)?,
        format => anyhow::bail!("Unsupported sample format {:?}", format),
    };
    stream.play()?;
    info!("Capturing; status every second");

    let status = tick(Duration::from_secs(1));
    let deadline = match args.duration {
        Some(seconds) => after(Duration::from_secs_f64(seconds)),
        None => never(),
    };
    loop {
        select! {
            recv(status) -> _ => log_status(&monitor, &stats),
            recv(deadline) -> _ => break,
        }
    }

    drop(stream);
    log_status(&monitor, &stats);
    Ok(())
}

/// Splits interleaved device samples into the first `planar.len()` channels as `f32`.
fn deinterleave<T>(data: &[T], device_channels: usize, planar: &mut [Vec<f32>])
where
    T: SizedSample,
    f32: FromSample<T>,
{
    for channel in planar.iter_mut() {
        channel.clear();
    }
    for frame in data.chunks_exact(device_channels) {
        for (channel, &sample) in planar.iter_mut().zip(frame) {
            channel.push(f32::from_sample(sample));
        }
    }
}

/// The tap runs directly inside the device callback. Interleaved input is split into planar
/// buffers sized on the first callback and reused afterwards.
fn build_input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut tap: SignalTap,
    mut clock: FreeRunningClock,
) -> Result<cpal::Stream>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let device_channels = config.channels as usize;
    let channels = device_channels.min(MAX_CHANNELS);
    if channels < device_channels {
        warn!("Device has {} channels, analyzing the first {}", device_channels, channels);
    }
    let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(8192); channels];

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            deinterleave(data, device_channels, &mut planar);

            let mut views: [&[f32]; MAX_CHANNELS] = [&[]; MAX_CHANNELS];
            for (view, channel) in views.iter_mut().zip(&planar) {
                *view = channel.as_slice();
            }
            tap.process(&AudioBlock::new(&views[..channels]), Some(&clock));
            clock.advance(data.len() / device_channels);
        },
        |err| {
            warn!("Audio stream error: {}", err);
        },
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deinterleave_converts_integer_samples() {
        let mut planar = vec![Vec::with_capacity(4); 2];
        deinterleave(&[i16::MIN, 0, 0, i16::MIN], 2, &mut planar);
        assert_eq!(planar, vec![vec![-1.0, 0.0], vec![0.0, -1.0]]);

        // Unsigned silence sits at mid-range
        deinterleave(&[32768u16, 32768, 0, 32768], 2, &mut planar);
        assert_eq!(planar, vec![vec![0.0, -1.0], vec![0.0, 0.0]]);
    }

    #[test]
    fn test_deinterleave_drops_extra_device_channels() {
        let mut planar = vec![Vec::new(); 2];
        deinterleave(&[0.1f32, 0.2, 0.3, 0.4, 0.5, 0.6], 3, &mut planar);
        assert_eq!(planar, vec![vec![0.1, 0.4], vec![0.2, 0.5]]);
    }
}
