//! Time-stretch handoff.
//!
//! The DSP itself is an opaque [`TimeStretchEngine`]. [`StretchStage`] owns
//! one and applies the looper's speed/pitch parameters to it:
//!
//! - speed → time ratio `1 / speed`
//! - semitones → pitch scale `2^(semitones / 12)`
//!
//! Without an engine, the mixer falls back to its virtual-timeline reader for
//! independent speed and pitch.
//!
//! # Example
//!
//! ```ignore
//! use overdub_looper::time_stretch::{StretchParams, StretchStage};
//!
//! let mut stage = StretchStage::new(Box::new(my_engine), 64);
//! stage.set_params(StretchParams::new().speed(1.5).pitch_semitones(-2.0));
//! stage.set_enabled(true);
//! stage.process(&mixed, &mut out);
//! ```

mod engine;
#[cfg(feature = "signalsmith")]
mod signalsmith;
mod types;

pub use engine::{StretchStage, TimeStretchEngine};
#[cfg(feature = "signalsmith")]
pub use signalsmith::SignalsmithEngine;
pub use types::{semitones_to_scale, StretchParams};
