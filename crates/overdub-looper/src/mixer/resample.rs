//! Variable-speed reads: linear interpolation over a source block and the
//! virtual-timeline reader used for independent speed and pitch.

use crate::prefetch::PrefetchBuffer;
use crate::source::AudioSource;

/// Absorbs rounding accumulated in the clock before truncating to a frame.
const FETCH_EPSILON: f64 = 1e-6;

/// Source frames needed to produce `frames` output frames at `speed`,
/// capped to the scratch size `max`.
#[inline]
pub fn source_frames_for(frames: usize, speed: f32, max: usize) -> usize {
    let needed = (frames as f64 / f64::from(speed)).ceil() as usize;
    needed.clamp(1, max.max(1))
}

/// Fill `output` by linear interpolation over `source`, reading output index
/// `i` from source position `i / speed`.
///
/// Brackets past the end of `source` hold the last sample. An empty source
/// produces silence.
pub fn resample_linear(source: &[f32], output: &mut [f32], speed: f32) {
    let Some(&last) = source.last() else {
        output.fill(0.0);
        return;
    };
    let last_index = source.len() - 1;
    let step = 1.0 / f64::from(speed);

    for (i, out) in output.iter_mut().enumerate() {
        let position = i as f64 * step;
        let idx = position.floor() as usize;
        if idx >= last_index {
            *out = last;
            continue;
        }

        let frac = position.fract() as f32;
        let s0 = source[idx];
        let s1 = source[idx + 1];
        *out = s0 + (s1 - s0) * frac;
    }
}

/// Per-loop playback clock for the fallback speed/pitch path.
///
/// Time advances one sample period per output sample regardless of speed or
/// pitch. The playback position is `time * speed`; the fetch address is
/// additionally scaled by the pitch factor, so the two controls stay
/// independent.
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtualTimeline {
    time: f64,
}

impl VirtualTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds since the loop (re)started.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn reset(&mut self) {
        self.time = 0.0;
    }

    /// Move the clock so that it corresponds to `position` frames at `speed`.
    pub fn sync_to(&mut self, position: f64, speed: f32, sample_rate: u32) {
        let rate = f64::from(speed) * f64::from(sample_rate);
        self.time = if rate > 0.0 { position / rate } else { 0.0 };
    }

    /// Render `output` from a loop of `total_frames` frames.
    ///
    /// Returns the new playback position in frames and whether the loop
    /// wrapped during this block. Fetches outside the file length wrap.
    pub fn render(
        &mut self,
        prefetch: &mut PrefetchBuffer,
        source: &mut dyn AudioSource,
        total_frames: u64,
        sample_rate: u32,
        speed: f32,
        pitch_scale: f64,
        output: &mut [f32],
    ) -> (f64, bool) {
        if total_frames == 0 || sample_rate == 0 {
            output.fill(0.0);
            return (0.0, false);
        }

        let sr = f64::from(sample_rate);
        let dt = 1.0 / sr;
        let fetch_rate = f64::from(speed) * pitch_scale * sr;

        for out in output.iter_mut() {
            let fetch = (self.time * fetch_rate + FETCH_EPSILON) as u64 % total_frames;
            *out = prefetch.sample_at(source, fetch);
            self.time += dt;
        }

        let total = total_frames as f64;
        let mut position = self.time * f64::from(speed) * sr;
        let wrapped = position >= total;
        if wrapped {
            position %= total;
            self.sync_to(position, speed, sample_rate);
        }
        (position, wrapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_source_frames_for() {
        assert_eq!(source_frames_for(512, 1.0, 4096), 512);
        assert_eq!(source_frames_for(512, 2.0, 4096), 256);
        assert_eq!(source_frames_for(512, 0.5, 4096), 1024);
        assert_eq!(source_frames_for(100, 3.0, 4096), 34);
        // Capped to the scratch size.
        assert_eq!(source_frames_for(4096, 0.25, 4096), 4096);
    }

    #[test]
    fn test_constant_source_any_speed() {
        let source = [0.2f32; 64];
        for speed in [0.1, 0.25, 0.5, 0.77, 1.0, 1.5, 2.0, 3.3, 10.0] {
            let mut output = [0.0f32; 128];
            let needed = source_frames_for(output.len(), speed, source.len());
            resample_linear(&source[..needed], &mut output, speed);
            assert!(
                output.iter().all(|&s| s == 0.2),
                "speed {} changed a constant signal",
                speed
            );
        }
    }

    #[test]
    fn test_interpolates_between_samples() {
        let source = [0.0, 1.0, 2.0, 3.0];
        let mut output = [0.0f32; 6];
        resample_linear(&source, &mut output, 2.0);
        assert_eq!(output, [0.0, 0.5, 1.0, 1.5, 2.0, 2.5]);
    }

    #[test]
    fn test_holds_last_sample_past_end() {
        let source = [0.0, 1.0];
        let mut output = [9.0f32; 5];
        resample_linear(&source, &mut output, 0.5);
        assert_eq!(output, [0.0, 1.0, 1.0, 1.0, 1.0]);

        let mut output = [9.0f32; 3];
        resample_linear(&[], &mut output, 1.0);
        assert_eq!(output, [0.0; 3]);
    }

    #[test]
    fn test_timeline_neutral_reads_in_order() {
        let data: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let mut source = MemorySource::mono(data, 100);
        let mut prefetch = PrefetchBuffer::with_capacity(32, 1);
        let mut timeline = VirtualTimeline::new();

        let mut output = [0.0f32; 50];
        let (position, wrapped) =
            timeline.render(&mut prefetch, &mut source, 100, 100, 1.0, 1.0, &mut output);
        assert!(!wrapped);
        assert_relative_eq!(position, 50.0, epsilon = 1e-6);
        for (i, &s) in output.iter().enumerate() {
            assert_eq!(s, i as f32);
        }
    }

    #[test]
    fn test_timeline_pitch_scales_fetch_not_position() {
        let data: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let mut source = MemorySource::mono(data, 1000);
        let mut prefetch = PrefetchBuffer::with_capacity(256, 1);
        let mut timeline = VirtualTimeline::new();

        let mut output = [0.0f32; 10];
        let (position, _) =
            timeline.render(&mut prefetch, &mut source, 1000, 1000, 1.0, 2.0, &mut output);
        assert_relative_eq!(position, 10.0, epsilon = 1e-6);
        assert_eq!(output[0], 0.0);
        assert_eq!(output[1], 2.0);
        assert_eq!(output[4], 8.0);
    }

    #[test]
    fn test_timeline_wraps() {
        let mut source = MemorySource::mono(vec![0.5; 40], 100);
        let mut prefetch = PrefetchBuffer::with_capacity(16, 1);
        let mut timeline = VirtualTimeline::new();

        let mut output = [0.0f32; 30];
        let (_, wrapped) =
            timeline.render(&mut prefetch, &mut source, 40, 100, 1.0, 1.0, &mut output);
        assert!(!wrapped);

        let (position, wrapped) =
            timeline.render(&mut prefetch, &mut source, 40, 100, 1.0, 1.0, &mut output);
        assert!(wrapped);
        assert_relative_eq!(position, 20.0, epsilon = 1e-6);
        assert!(output.iter().all(|&s| s == 0.5));
        assert_relative_eq!(timeline.time(), 0.2, epsilon = 1e-9);

        timeline.reset();
        assert_eq!(timeline.time(), 0.0);
    }

    proptest! {
        #[test]
        fn prop_output_stays_within_source_range(
            source in prop::collection::vec(-1.0f32..1.0, 1..64),
            speed in 0.1f32..10.0,
        ) {
            let mut output = [0.0f32; 96];
            resample_linear(&source, &mut output, speed);

            let lo = source.iter().copied().fold(f32::INFINITY, f32::min);
            let hi = source.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            for &s in &output {
                prop_assert!(s >= lo - 1e-6 && s <= hi + 1e-6);
            }
        }
    }
}
