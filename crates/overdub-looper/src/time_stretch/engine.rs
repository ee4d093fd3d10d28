//! Time-stretch engine contract and the handoff stage that drives it.

use super::types::StretchParams;

/// Opaque mono time-stretch/pitch-shift engine.
///
/// The engine consumes input blocks of any size and makes output available
/// at `input_len * time_ratio` frames on average.
pub trait TimeStretchEngine: Send {
    /// Output duration / input duration.
    fn set_time_ratio(&mut self, ratio: f64);

    /// Frequency multiplier.
    fn set_pitch_scale(&mut self, scale: f64);

    fn process(&mut self, input: &[f32]);

    /// Frames ready to retrieve.
    fn available(&self) -> usize;

    /// Copy up to `output.len()` ready frames out; returns the count.
    fn retrieve(&mut self, output: &mut [f32]) -> usize;

    /// Drop all internal state.
    fn reset(&mut self);

    /// Processing delay in frames.
    fn latency(&self) -> usize {
        0
    }
}

/// Feeds the mixed block to an engine in small sub-chunks, draining after
/// each one to keep the engine's internal buffering short.
pub struct StretchStage {
    engine: Box<dyn TimeStretchEngine>,
    params: StretchParams,
    enabled: bool,
    chunk: usize,
}

impl StretchStage {
    pub fn new(mut engine: Box<dyn TimeStretchEngine>, chunk: usize) -> Self {
        let params = StretchParams::default();
        engine.set_time_ratio(params.time_ratio());
        engine.set_pitch_scale(params.pitch_scale());

        Self {
            engine,
            params,
            enabled: false,
            chunk: chunk.max(1),
        }
    }

    /// Apply new parameters immediately. Any change resets the engine:
    /// a short glitch is preferred over stale parameters.
    pub fn set_params(&mut self, params: StretchParams) {
        if params == self.params {
            return;
        }
        if params.speed != self.params.speed {
            self.engine.set_time_ratio(params.time_ratio());
        }
        if params.pitch_semitones != self.params.pitch_semitones {
            self.engine.set_pitch_scale(params.pitch_scale());
        }
        self.engine.reset();
        self.params = params;
    }

    pub fn params(&self) -> StretchParams {
        self.params
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            self.engine.reset();
        }
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn latency(&self) -> usize {
        self.engine.latency()
    }

    /// Run `input` through the engine and fill `output`. Frames the engine
    /// has not produced by the end of the input are silence.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let mut produced = 0;

        for chunk in input.chunks(self.chunk) {
            self.engine.process(chunk);

            let ready = self.engine.available();
            if ready > 0 && produced < output.len() {
                let take = ready.min(output.len() - produced);
                produced += self
                    .engine
                    .retrieve(&mut output[produced..produced + take]);
            }
        }

        output[produced..].fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Delays its input by `latency` frames and records calls.
    struct DelayEngine {
        queue: VecDeque<f32>,
        latency: usize,
        resets: Arc<AtomicUsize>,
        chunk_sizes: Vec<usize>,
        ratio: f64,
        scale: f64,
    }

    impl DelayEngine {
        fn new(latency: usize, resets: Arc<AtomicUsize>) -> Self {
            Self {
                queue: VecDeque::new(),
                latency,
                resets,
                chunk_sizes: Vec::new(),
                ratio: 0.0,
                scale: 0.0,
            }
        }
    }

    impl TimeStretchEngine for DelayEngine {
        fn set_time_ratio(&mut self, ratio: f64) {
            self.ratio = ratio;
        }

        fn set_pitch_scale(&mut self, scale: f64) {
            self.scale = scale;
        }

        fn process(&mut self, input: &[f32]) {
            self.chunk_sizes.push(input.len());
            self.queue.extend(input);
        }

        fn available(&self) -> usize {
            self.queue.len().saturating_sub(self.latency)
        }

        fn retrieve(&mut self, output: &mut [f32]) -> usize {
            let n = output.len().min(self.available());
            for (out, sample) in output.iter_mut().zip(self.queue.drain(..n)) {
                *out = sample;
            }
            n
        }

        fn reset(&mut self) {
            self.queue.clear();
            self.resets.fetch_add(1, Ordering::Relaxed);
        }

        fn latency(&self) -> usize {
            self.latency
        }
    }

    #[test]
    fn test_passthrough_without_latency() {
        let resets = Arc::new(AtomicUsize::new(0));
        let mut stage = StretchStage::new(Box::new(DelayEngine::new(0, resets)), 64);

        let input: Vec<f32> = (0..200).map(|i| i as f32).collect();
        let mut output = vec![-1.0; 200];
        stage.process(&input, &mut output);
        assert_eq!(output, input);
    }

    #[test]
    fn test_latency_leftover_is_silence() {
        let resets = Arc::new(AtomicUsize::new(0));
        let mut stage = StretchStage::new(Box::new(DelayEngine::new(10, resets)), 16);

        let input = vec![1.0; 64];
        let mut output = vec![-1.0; 64];
        stage.process(&input, &mut output);
        assert!(output[..54].iter().all(|&s| s == 1.0));
        assert!(output[54..].iter().all(|&s| s == 0.0));
        assert_eq!(stage.latency(), 10);

        // The delayed tail arrives first on the next block.
        let mut output = vec![-1.0; 64];
        stage.process(&[2.0; 64], &mut output);
        assert!(output[..10].iter().all(|&s| s == 1.0));
        assert!(output[10..].iter().all(|&s| s == 2.0));
    }

    #[test]
    fn test_parameter_change_resets_engine() {
        let resets = Arc::new(AtomicUsize::new(0));
        let mut stage = StretchStage::new(Box::new(DelayEngine::new(0, Arc::clone(&resets))), 64);

        stage.set_params(StretchParams::new());
        assert_eq!(resets.load(Ordering::Relaxed), 0);

        stage.set_params(StretchParams::new().speed(2.0));
        assert_eq!(resets.load(Ordering::Relaxed), 1);
        stage.set_params(StretchParams::new().speed(2.0).pitch_semitones(3.0));
        assert_eq!(resets.load(Ordering::Relaxed), 2);
        assert_eq!(stage.params().pitch_semitones, 3.0);

        stage.set_enabled(true);
        assert_eq!(resets.load(Ordering::Relaxed), 3);
        stage.set_enabled(true);
        assert_eq!(resets.load(Ordering::Relaxed), 3);
        assert!(stage.is_enabled());
    }
}
