//! Speed and pitch parameters shared by the mixer and the time-stretch stage.

use tracing::warn;

/// Global speed/pitch parameters.
///
/// ## Range Limits
///
/// - `speed`: (0.0, 10.0]; anything else falls back to 1.0
/// - `pitch_semitones`: -12.0 to +12.0 (one octave each way)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StretchParams {
    /// Playback speed factor (1.0 = normal, 0.5 = half speed, 2.0 = double speed)
    pub speed: f32,

    /// Pitch shift in semitones
    pub pitch_semitones: f32,
}

impl StretchParams {
    /// Largest accepted speed factor.
    pub const MAX_SPEED: f32 = 10.0;
    /// Minimum pitch shift (-1 octave)
    pub const MIN_SEMITONES: f32 = -12.0;
    /// Maximum pitch shift (+1 octave)
    pub const MAX_SEMITONES: f32 = 12.0;

    pub fn new() -> Self {
        Self {
            speed: 1.0,
            pitch_semitones: 0.0,
        }
    }

    pub fn speed(mut self, speed: f32) -> Self {
        self.speed = Self::sanitize_speed(speed);
        self
    }

    pub fn pitch_semitones(mut self, semitones: f32) -> Self {
        self.pitch_semitones = Self::clamp_semitones(semitones);
        self
    }

    /// Speeds outside (0, 10] are rejected with a fallback to 1.0.
    pub fn sanitize_speed(speed: f32) -> f32 {
        if speed > 0.0 && speed <= Self::MAX_SPEED {
            speed
        } else {
            warn!("Playback speed {} out of range (0, {}], using 1.0", speed, Self::MAX_SPEED);
            1.0
        }
    }

    pub fn clamp_semitones(semitones: f32) -> f32 {
        if semitones.is_nan() {
            warn!("Pitch shift is NaN, using 0");
            return 0.0;
        }
        let clamped = semitones.clamp(Self::MIN_SEMITONES, Self::MAX_SEMITONES);
        if clamped != semitones {
            warn!("Pitch shift {} clamped to {}", semitones, clamped);
        }
        clamped
    }

    /// True unless both speed and pitch are neutral.
    pub fn is_active(&self) -> bool {
        self.speed != 1.0 || self.pitch_semitones != 0.0
    }

    /// Engine time ratio (output duration / input duration).
    pub fn time_ratio(&self) -> f64 {
        1.0 / f64::from(self.speed)
    }

    /// Frequency ratio for the pitch shift: 2^(semitones/12).
    pub fn pitch_scale(&self) -> f64 {
        semitones_to_scale(self.pitch_semitones)
    }
}

impl Default for StretchParams {
    fn default() -> Self {
        Self::new()
    }
}

/// 2^(semitones/12).
pub fn semitones_to_scale(semitones: f32) -> f64 {
    2.0_f64.powf(f64::from(semitones) / 12.0)
}
