//! N-loop mixer.
//!
//! Each callback the mixer picks one [`RenderStrategy`], renders every
//! audible loop in slot order into a scratch block, sums them with their
//! per-loop volume and normalizes by `1/sqrt(n)` when more than one loop
//! contributed. The sum then optionally goes through the time-stretch stage;
//! master volume is applied last.
//!
//! All scratch is allocated at construction. Callbacks longer than
//! `max_block_frames` are mixed in chunks.

mod resample;
mod strategy;

pub use resample::{resample_linear, source_frames_for, VirtualTimeline};
pub use strategy::{LoopRead, PlaybackParams, RenderStrategy};

use crate::loops::LoopManager;
use crate::time_stretch::{StretchParams, StretchStage};
use overdub_core::LooperConfig;

pub struct Mixer {
    sample_rate: u32,
    max_block: usize,
    /// One loop's rendered block.
    loop_buf: Vec<f32>,
    /// Source frames for variable-speed reads.
    source_buf: Vec<f32>,
    /// Normalized sum, fed to the stretch stage when active.
    mix_buf: Vec<f32>,
    stage: Option<StretchStage>,
    strategy: RenderStrategy,
}

impl Mixer {
    pub fn new(config: &LooperConfig, stage: Option<StretchStage>) -> Self {
        let mut scratch = config.resample_scratch_frames().max(config.max_block_frames);
        if stage.is_some() {
            // The stretch stage is fed `frames * speed` mixed frames.
            let stretched = config.max_block_frames * StretchParams::MAX_SPEED.ceil() as usize;
            scratch = scratch.max(stretched);
        }
        Self {
            sample_rate: config.sample_rate,
            max_block: config.max_block_frames.max(1),
            loop_buf: vec![0.0; scratch],
            source_buf: vec![0.0; scratch],
            mix_buf: vec![0.0; scratch],
            stage,
            strategy: RenderStrategy::Varispeed,
        }
    }

    pub fn has_stretch_engine(&self) -> bool {
        self.stage.is_some()
    }

    pub fn stretch_stage(&self) -> Option<&StretchStage> {
        self.stage.as_ref()
    }

    /// Strategy used by the most recent callback.
    pub fn strategy(&self) -> RenderStrategy {
        self.strategy
    }

    /// Non-RT: push new global parameters into the stretch stage.
    pub fn apply_params(&mut self, params: &PlaybackParams) {
        if let Some(stage) = self.stage.as_mut() {
            stage.set_params(params.stretch_params());
            stage.set_enabled(params.stretch_enabled && params.record_player.is_none());
        }
    }

    /// RT: fill `output` with the mix of every audible loop.
    ///
    /// Returns true if the pulse loop wrapped during the callback.
    pub fn process(
        &mut self,
        loops: &mut LoopManager,
        params: &PlaybackParams,
        output: &mut [f32],
    ) -> bool {
        self.strategy = RenderStrategy::select(params, self.stage.is_some());

        let mut pulse_wrapped = false;
        let mut offset = 0;
        while offset < output.len() {
            let len = (output.len() - offset).min(self.max_block);
            pulse_wrapped |= self.mix_block(loops, params, &mut output[offset..offset + len]);
            offset += len;
        }
        pulse_wrapped
    }

    fn mix_block(
        &mut self,
        loops: &mut LoopManager,
        params: &PlaybackParams,
        output: &mut [f32],
    ) -> bool {
        let frames = output.len();
        let strategy = self.strategy;

        // The stretch engine emits `input / speed` frames, so it is fed
        // `frames * speed` mixed frames to keep its output rate balanced.
        let mix_frames = match strategy {
            RenderStrategy::Stretch => {
                ((frames as f64 * f64::from(params.speed)).round() as usize)
                    .clamp(1, self.mix_buf.len())
            }
            _ => frames,
        };

        let mix = &mut self.mix_buf[..mix_frames];
        mix.fill(0.0);

        let pulse = loops.pulse_loop();
        let mut contributors = 0usize;
        let mut pulse_wrapped = false;

        for slot in loops.slots_mut().iter_mut() {
            if !slot.is_audible() {
                continue;
            }

            let block = &mut self.loop_buf[..mix_frames];
            let read = strategy.loop_read(slot.playback_speed());
            let wrapped = slot.render(read, self.sample_rate, block, &mut self.source_buf);

            let volume = slot.volume();
            for (m, &s) in mix.iter_mut().zip(block.iter()) {
                *m += s * volume;
            }
            contributors += 1;

            if wrapped && pulse == Some(slot.note()) {
                pulse_wrapped = true;
            }
        }

        if contributors > 1 {
            let norm = 1.0 / (contributors as f32).sqrt();
            for m in mix.iter_mut() {
                *m *= norm;
            }
        }

        match (strategy, self.stage.as_mut()) {
            (RenderStrategy::Stretch, Some(stage)) => stage.process(mix, output),
            _ => output.copy_from_slice(&mix[..frames]),
        }

        let master = loops.master_volume();
        if master != 1.0 {
            for s in output.iter_mut() {
                *s *= master;
            }
        }

        if pulse_wrapped {
            loops.release_pending();
        }
        pulse_wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loops::{LoopSlot, PlaybackFile};
    use crate::source::MemorySource;
    use crate::time_stretch::TimeStretchEngine;
    use approx::assert_relative_eq;

    fn config() -> LooperConfig {
        LooperConfig {
            max_block_frames: 64,
            prefetch_frames: 128,
            ..Default::default()
        }
    }

    fn load(loops: &mut LoopManager, note: u8, samples: Vec<f32>, volume: f32) {
        let file = PlaybackFile::new(Box::new(MemorySource::mono(samples, 48000)), "mem.wav");
        loops.install_playback(note, file).unwrap();
        loops.set_loop_volume(note, volume).unwrap();
    }

    #[test]
    fn test_silence_without_loops() {
        let mut loops = LoopManager::new(&config());
        let mut mixer = Mixer::new(&config(), None);
        let mut out = vec![1.0f32; 100];
        mixer.process(&mut loops, &PlaybackParams::default(), &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_two_loops_normalized() {
        let mut loops = LoopManager::new(&config());
        load(&mut loops, 0, vec![0.2; 1000], 1.0);
        load(&mut loops, 1, vec![0.2; 1000], 0.5);

        let mut mixer = Mixer::new(&config(), None);
        let mut out = vec![0.0f32; 200];
        mixer.process(&mut loops, &PlaybackParams::default(), &mut out);

        let expected = (0.2 + 0.5 * 0.2) / 2.0f32.sqrt();
        for &s in &out {
            assert_relative_eq!(s, expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_single_loop_not_normalized() {
        let mut loops = LoopManager::new(&config());
        load(&mut loops, 3, vec![0.25; 500], 1.0);
        loops.set_master_volume(0.5);

        let mut mixer = Mixer::new(&config(), None);
        let mut out = vec![0.0f32; 100];
        mixer.process(&mut loops, &PlaybackParams::default(), &mut out);
        assert!(out.iter().all(|&s| s == 0.125));
    }

    #[test]
    fn test_loop_speed_preserves_constant() {
        let mut loops = LoopManager::new(&config());
        load(&mut loops, 0, vec![0.2; 2000], 1.0);
        loops.set_loop_speed(0, 0.5).unwrap();

        let mut mixer = Mixer::new(&config(), None);
        let mut out = vec![0.0f32; 300];
        mixer.process(&mut loops, &PlaybackParams::default(), &mut out);
        assert!(out.iter().all(|&s| s == 0.2));
        assert_eq!(loops.slot(0).unwrap().sample_position(), 600.0);
    }

    #[test]
    fn test_timeline_fallback_preserves_constant() {
        let mut loops = LoopManager::new(&config());
        load(&mut loops, 0, vec![0.2; 2000], 1.0);

        let mut mixer = Mixer::new(&config(), None);
        let params = PlaybackParams {
            speed: 1.5,
            pitch_semitones: 5.0,
            ..Default::default()
        };
        let mut out = vec![0.0f32; 256];
        mixer.process(&mut loops, &params, &mut out);
        assert!(matches!(mixer.strategy(), RenderStrategy::Timeline { .. }));
        assert!(out.iter().all(|&s| s == 0.2));
    }

    #[test]
    fn test_pending_loop_released_on_pulse_wrap() {
        let mut loops = LoopManager::new(&config());
        loops.set_sync_enabled(true);
        load(&mut loops, 0, vec![0.1; 100], 1.0);
        assert_eq!(loops.pulse_loop(), Some(0));
        load(&mut loops, 1, vec![0.3; 100], 1.0);
        loops.slots_mut()[1].stop();
        loops.slots_mut()[1].resume(0.0, true);

        let mut mixer = Mixer::new(&config(), None);
        let mut out = vec![0.0f32; 60];
        assert!(!mixer.process(&mut loops, &PlaybackParams::default(), &mut out));
        assert!(out.iter().all(|&s| s == 0.1));
        assert!(loops.slot(1).unwrap().is_pending_start());

        // Second block crosses the end of the pulse loop.
        assert!(mixer.process(&mut loops, &PlaybackParams::default(), &mut out));
        assert!(!loops.slot(1).unwrap().is_pending_start());

        mixer.process(&mut loops, &PlaybackParams::default(), &mut out);
        let expected = (0.1 + 0.3) / 2.0f32.sqrt();
        assert_relative_eq!(out[0], expected, epsilon = 1e-6);
    }

    /// Passes input straight through, emitting `input / speed` frames.
    struct RateEngine {
        ratio: f64,
        out: Vec<f32>,
    }

    impl TimeStretchEngine for RateEngine {
        fn set_time_ratio(&mut self, ratio: f64) {
            self.ratio = ratio;
        }

        fn set_pitch_scale(&mut self, _scale: f64) {}

        fn process(&mut self, input: &[f32]) {
            let frames = (input.len() as f64 * self.ratio).round() as usize;
            let value = input.first().copied().unwrap_or(0.0);
            self.out.extend(std::iter::repeat(value).take(frames));
        }

        fn available(&self) -> usize {
            self.out.len()
        }

        fn retrieve(&mut self, output: &mut [f32]) -> usize {
            let n = output.len().min(self.out.len());
            output[..n].copy_from_slice(&self.out[..n]);
            self.out.drain(..n);
            n
        }

        fn reset(&mut self) {
            self.out.clear();
        }
    }

    #[test]
    fn test_stretch_stage_gets_balanced_input() {
        let mut loops = LoopManager::new(&config());
        load(&mut loops, 0, vec![0.2; 4000], 1.0);

        let engine = RateEngine {
            ratio: 1.0,
            out: Vec::new(),
        };
        let stage = StretchStage::new(Box::new(engine), 16);
        let mut mixer = Mixer::new(&config(), Some(stage));

        let params = PlaybackParams {
            speed: 2.0,
            stretch_enabled: true,
            ..Default::default()
        };
        mixer.apply_params(&params);

        let mut out = vec![0.0f32; 64];
        mixer.process(&mut loops, &params, &mut out);
        assert_eq!(mixer.strategy(), RenderStrategy::Stretch);
        assert!(out.iter().all(|&s| s == 0.2));
        // Twice the source frames were consumed for one output block.
        assert_eq!(loops.slot(0).unwrap().sample_position(), 128.0);
    }

    #[test]
    fn test_stretch_at_max_speed_fills_block() {
        let mut loops = LoopManager::new(&config());
        load(&mut loops, 0, vec![0.2; 4000], 1.0);

        let engine = RateEngine {
            ratio: 1.0,
            out: Vec::new(),
        };
        let stage = StretchStage::new(Box::new(engine), 16);
        let mut mixer = Mixer::new(&config(), Some(stage));

        let params = PlaybackParams {
            speed: StretchParams::MAX_SPEED,
            stretch_enabled: true,
            ..Default::default()
        };
        mixer.apply_params(&params);

        let mut out = vec![0.0f32; 64];
        mixer.process(&mut loops, &params, &mut out);
        assert!(out.iter().all(|&s| s == 0.2));
        assert_eq!(loops.slot(0).unwrap().sample_position(), 640.0);
    }
}
