//! [`TimeStretchEngine`] over signalsmith-stretch.

use super::engine::TimeStretchEngine;
use crate::error::{Error, Result};
use signalsmith_stretch::Stretch;
use std::collections::VecDeque;

const CHANNELS: u32 = 1;

/// Time ratios are limited to this range.
const MIN_RATIO: f64 = 0.1;
const MAX_RATIO: f64 = 16.0;

/// Mono signalsmith stretcher with an output FIFO.
///
/// signalsmith produces exactly as many frames as it is asked for, so the
/// adapter asks for `input * ratio` frames (carrying the fraction) and queues
/// them until the stage retrieves them.
pub struct SignalsmithEngine {
    stretcher: Stretch,
    time_ratio: f64,
    carry: f64,
    max_input: usize,
    staging: Vec<f32>,
    output: VecDeque<f32>,
    output_limit: usize,
}

impl SignalsmithEngine {
    /// `max_input` bounds the input block handed to `process` in one piece;
    /// longer inputs are split.
    pub fn new(sample_rate: u32, max_input: usize) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::TimeStretch("sample rate must be non-zero".into()));
        }
        if max_input == 0 {
            return Err(Error::TimeStretch("input block size must be non-zero".into()));
        }
        let output_limit = max_input * MAX_RATIO as usize * 4;
        Ok(Self {
            stretcher: Stretch::preset_default(CHANNELS, sample_rate),
            time_ratio: 1.0,
            carry: 0.0,
            max_input,
            staging: vec![0.0; max_input * MAX_RATIO as usize + 1],
            output: VecDeque::with_capacity(output_limit),
            output_limit,
        })
    }

    fn process_piece(&mut self, input: &[f32]) {
        let exact = input.len() as f64 * self.time_ratio + self.carry;
        let frames = (exact.floor() as usize).min(self.staging.len());
        self.carry = exact - exact.floor();

        self.stretcher.process(input, &mut self.staging[..frames]);

        let room = self.output_limit.saturating_sub(self.output.len());
        self.output
            .extend(self.staging[..frames.min(room)].iter().copied());
    }
}

impl TimeStretchEngine for SignalsmithEngine {
    fn set_time_ratio(&mut self, ratio: f64) {
        self.time_ratio = ratio.clamp(MIN_RATIO, MAX_RATIO);
    }

    fn set_pitch_scale(&mut self, scale: f64) {
        let semitones = 12.0 * scale.max(f64::MIN_POSITIVE).log2();
        self.stretcher
            .set_transpose_factor_semitones(semitones as f32, None);
    }

    fn process(&mut self, input: &[f32]) {
        for piece in input.chunks(self.max_input) {
            self.process_piece(piece);
        }
    }

    fn available(&self) -> usize {
        self.output.len()
    }

    fn retrieve(&mut self, output: &mut [f32]) -> usize {
        let n = output.len().min(self.output.len());
        for (out, sample) in output.iter_mut().zip(self.output.drain(..n)) {
            *out = sample;
        }
        n
    }

    fn reset(&mut self) {
        self.stretcher.reset();
        self.output.clear();
        self.carry = 0.0;
    }

    fn latency(&self) -> usize {
        self.stretcher.input_latency() + self.stretcher.output_latency()
    }
}
