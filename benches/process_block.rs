//! Cost of one host callback with every feature enabled.
//!
//! Run with: cargo bench --bench process_block

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use signal_tap::audio::TapSettings;
use signal_tap::host::FreeRunningClock;
use signal_tap::net::{FeatureSink, FeatureStream};
use signal_tap::{AudioBlock, SignalTap};

/// Encodes everything and throws the bytes away, so only analysis and encoding are timed.
struct NullSink {
    bytes: usize,
}

impl FeatureSink for NullSink {
    fn send(&mut self, _stream: FeatureStream, payload: &[u8]) {
        self.bytes += payload.len();
    }
}

fn all_features(fft_size: usize) -> TapSettings {
    let mut settings = TapSettings {
        fft_size,
        ..TapSettings::default()
    };
    let parameters = &mut settings.parameters;
    parameters.send_time_info = true;
    parameters.send_signal_level = true;
    parameters.send_instant_value = true;
    parameters.send_impulse = true;
    parameters.send_fft = true;
    parameters.send_osc = true;
    parameters.send_binary = true;
    settings
}

fn stereo_block(frames: usize, offset: usize) -> (Vec<f32>, Vec<f32>) {
    let left = (0..frames)
        .map(|i| (2.0 * std::f32::consts::PI * 440.0 * (offset + i) as f32 / 44100.0).sin() * 0.5)
        .collect();
    let right = (0..frames)
        .map(|i| (2.0 * std::f32::consts::PI * 660.0 * (offset + i) as f32 / 44100.0).sin() * 0.3)
        .collect();
    (left, right)
}

fn bench_process(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_block");

    for fft_size in [1024, 4096] {
        let mut tap = SignalTap::with_sink(all_features(fft_size), NullSink { bytes: 0 })
            .expect("valid settings");
        let mut clock = FreeRunningClock::new(44100.0, 120.0);
        let (left, right) = stereo_block(512, 0);

        group.bench_with_input(BenchmarkId::new("512_frames", fft_size), &fft_size, |b, _| {
            b.iter(|| {
                let channels: [&[f32]; 2] = [&left, &right];
                tap.process(black_box(&AudioBlock::new(&channels)), Some(&clock));
                clock.advance(512);
            })
        });

        black_box(tap.sink().bytes);
    }

    group.finish();
}

criterion_group!(benches, bench_process);
criterion_main!(benches);
