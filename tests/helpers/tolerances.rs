//! Tolerance constants for audio testing.
//!
//! Different operations require different precision levels.

/// Floating point rounding errors (passthrough, exact gain, `1/sqrt(n)` scaling).
/// Use for operations that should be mathematically exact.
pub const FLOAT_EPSILON: f32 = 1e-6;

/// Silence threshold (~-80dB).
/// Values below this are considered silent.
pub const SILENCE_THRESHOLD: f32 = 0.0001;

/// 16-bit quantization step size.
/// Use when a fixture went through 16-bit PCM.
pub const INT16_EPSILON: f32 = 1.0 / 32768.0;
