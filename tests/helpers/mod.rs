//! Test helpers and fixtures for overdub integration tests
//!
//! Loops are driven by hand: each test owns a [`Looper`], calls `process`
//! once per simulated callback and inspects the mixed output.
//!
//! ## Tolerance Levels
//!
//! Use the appropriate tolerance from [`tolerances`] module:
//! - `FLOAT_EPSILON` (1e-6): Exact operations (passthrough, unity gain, normalization)
//! - `INT16_EPSILON`: 16-bit fixtures read back as float

#![allow(dead_code)]

pub mod tolerances;

use overdub::prelude::*;
use std::path::{Path, PathBuf};

/// Default test sample rate
pub const TEST_SAMPLE_RATE: u32 = 48000;

/// Callback size used by the integration tests
pub const TEST_BUFFER_SIZE: usize = 256;

/// Route `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Looper recording into `dir`, with small blocks and a generous stop timeout.
pub fn test_looper(dir: &Path) -> Looper {
    init_logging();
    Looper::builder()
        .config(LooperConfig {
            sample_rate: TEST_SAMPLE_RATE,
            max_block_frames: TEST_BUFFER_SIZE,
            ring_buffer_frames: 1 << 16,
            prefetch_frames: 1024,
            recordings_dir: dir.to_path_buf(),
            stop_timeout_ms: 5000,
            ..Default::default()
        })
        .build()
        .expect("Failed to create test looper")
}

/// Run `blocks` callbacks feeding `input` (or silence) and collect the output.
pub fn run_blocks(looper: &mut Looper, input: Option<&[f32]>, blocks: usize) -> Vec<f32> {
    let mut collected = Vec::with_capacity(blocks * TEST_BUFFER_SIZE);
    let mut out = vec![0.0f32; TEST_BUFFER_SIZE];
    for _ in 0..blocks {
        looper.process(TEST_BUFFER_SIZE, input, Some(&mut out));
        collected.extend_from_slice(&out);
    }
    collected
}

/// Generate a constant (DC) signal.
pub fn generate_dc(value: f32, num_samples: usize) -> Vec<f32> {
    vec![value; num_samples]
}

/// Generate a test signal: sine wave at given frequency for specified samples.
pub fn generate_sine(frequency: f64, sample_rate: u32, num_samples: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|i| {
            let t = i as f64 / f64::from(sample_rate);
            (2.0 * std::f64::consts::PI * frequency * t).sin() as f32
        })
        .collect()
}

/// Generate an integer staircase (sample i has value i).
pub fn generate_integer_staircase(num_samples: usize) -> Vec<f32> {
    (0..num_samples).map(|i| i as f32).collect()
}

/// Calculate RMS of a signal.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Calculate peak amplitude of a signal.
pub fn peak(samples: &[f32]) -> f32 {
    samples
        .iter()
        .map(|s| s.abs())
        .fold(0.0_f32, |a, b| a.max(b))
}

/// Assert that a signal is approximately silent (all values near zero).
pub fn assert_silence(samples: &[f32], tolerance: f32) {
    let max = peak(samples);
    assert!(
        max <= tolerance,
        "Expected silence, but peak amplitude was {}",
        max
    );
}

/// Assert every sample is within `tolerance` of `value`.
pub fn assert_constant(samples: &[f32], value: f32, tolerance: f32) {
    if let Some((i, s)) = samples
        .iter()
        .enumerate()
        .find(|(_, s)| (**s - value).abs() > tolerance)
    {
        panic!("Sample {} is {}, expected {}", i, s, value);
    }
}

/// Write interleaved samples as a 32-bit float WAV file.
pub fn save_wav_file(path: &Path, samples: &[f32], channels: u16) -> PathBuf {
    let spec = hound::WavSpec {
        channels,
        sample_rate: TEST_SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("Failed to create WAV file");
    for &s in samples {
        writer.write_sample(s).expect("Failed to write sample");
    }
    writer.finalize().expect("Failed to finalize WAV file");
    path.to_path_buf()
}

/// Write mono samples as a 16-bit PCM WAV file.
pub fn save_wav_file_pcm16(path: &Path, samples: &[f32]) -> PathBuf {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TEST_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("Failed to create WAV file");
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
        writer.write_sample(v).expect("Failed to write sample");
    }
    writer.finalize().expect("Failed to finalize WAV file");
    path.to_path_buf()
}

/// Read a float WAV file back as interleaved samples.
pub fn load_wav_file(path: &Path) -> Vec<f32> {
    hound::WavReader::open(path)
        .expect("Failed to open WAV file")
        .samples::<f32>()
        .map(|s| s.expect("Failed to read sample"))
        .collect()
}
