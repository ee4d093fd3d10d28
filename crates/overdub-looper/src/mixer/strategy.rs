//! Render strategy, chosen once per callback.

use crate::time_stretch::{semitones_to_scale, StretchParams};

/// Global playback controls the mixer reads each callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackParams {
    pub speed: f32,
    pub pitch_semitones: f32,
    /// Route the mix through the time-stretch engine when one is installed.
    pub stretch_enabled: bool,
    /// Tape-style varispeed factor; overrides everything else when set.
    pub record_player: Option<f32>,
}

impl Default for PlaybackParams {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch_semitones: 0.0,
            stretch_enabled: false,
            record_player: None,
        }
    }
}

impl PlaybackParams {
    pub fn stretch_params(&self) -> StretchParams {
        StretchParams {
            speed: self.speed,
            pitch_semitones: self.pitch_semitones,
        }
    }

    pub fn is_neutral(&self) -> bool {
        !self.stretch_params().is_active()
    }
}

/// How the loops of one callback are rendered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderStrategy {
    /// Each loop plays at its own speed.
    Varispeed,
    /// Virtual-timeline reads with a global speed and pitch.
    Timeline { speed: f32, pitch_scale: f64 },
    /// Loops mixed at their own speed, then handed to the stretch engine.
    Stretch,
}

impl RenderStrategy {
    /// Record-player mode wins, then an installed and enabled stretch engine,
    /// then the timeline fallback for non-neutral parameters.
    pub fn select(params: &PlaybackParams, engine_available: bool) -> Self {
        if let Some(factor) = params.record_player {
            return Self::Timeline {
                speed: factor,
                pitch_scale: 1.0,
            };
        }
        if params.stretch_enabled && engine_available {
            return Self::Stretch;
        }
        if !params.is_neutral() {
            return Self::Timeline {
                speed: params.speed,
                pitch_scale: semitones_to_scale(params.pitch_semitones),
            };
        }
        Self::Varispeed
    }

    /// Per-loop read for a loop whose own speed is `loop_speed`.
    pub fn loop_read(&self, loop_speed: f32) -> LoopRead {
        match *self {
            Self::Timeline { speed, pitch_scale } => LoopRead::Timeline { speed, pitch_scale },
            Self::Varispeed | Self::Stretch => {
                if loop_speed == 1.0 {
                    LoopRead::Direct
                } else {
                    LoopRead::Linear { speed: loop_speed }
                }
            }
        }
    }
}

/// How one loop fills its block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopRead {
    /// Straight copy out of the prefetch window.
    Direct,
    /// `ceil(n / speed)` source frames, linearly interpolated.
    Linear { speed: f32 },
    /// Point-sampled virtual timeline.
    Timeline { speed: f32, pitch_scale: f64 },
}
