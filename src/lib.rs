//! # Overdub - Real-time Multi-track Looper
//!
//! Records audio per trigger, plays loops back and mixes any number of them
//! inside a real-time callback that never blocks, allocates or touches files.
//!
//! ## Architecture
//!
//! Overdub is an umbrella crate that coordinates:
//! - **overdub-core** - RT primitives (SPSC ring buffer, message queue, atomics) and configuration
//! - **overdub-looper** - Loop slots, recording worker, prefetch cache, mixer and time-stretch handoff
//!
//! ## Quick Start
//!
//! ```ignore
//! use overdub::prelude::*;
//!
//! let mut looper = Looper::builder()
//!     .sample_rate(48000)
//!     .recordings_dir("recordings")
//!     .build()?;
//!
//! // MIDI note 60 starts recording, the next note-on plays it. Safe to call
//! // from the audio callback.
//! looper.handle_event(ControlEvent::NoteOn { note: 60, velocity: 127 })?;
//!
//! // Audio thread, once per period:
//! looper.process(frames, Some(&input), Some(&mut output));
//!
//! // Control thread, between periods: open finished takes, refill caches.
//! looper.service();
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - Looper without an external time-stretch engine
//! - `signalsmith` - Time-stretch engine backed by signalsmith-stretch

/// Re-export of overdub-core for direct access
pub use overdub_core as core;

/// Re-export of overdub-looper for direct access
pub use overdub_looper as looper;

// Core types
pub use overdub_core::{
    AtomicFlag, AtomicFloat, LooperConfig, MessageQueue, MessageReceiver, MessageSender,
    RingBuffer, RingConsumer, RingProducer, MAX_LOOPS,
};

// Looper
pub use overdub_looper::{
    AudioSource, ControlAction, ControlEvent, LoopManager, LoopSlot, LoopState, Looper,
    LooperBuilder, MemorySource, Mixer, PlaybackParams, PrefetchBuffer, RecorderStatus,
    RenderStrategy, SourceInfo, StretchParams, StretchStage, SyncChange, TimeStretchEngine,
    WavSource,
};

#[cfg(feature = "signalsmith")]
pub use overdub_looper::time_stretch::SignalsmithEngine;

mod error;
pub use error::{Error, Result};

/// Convenience prelude for common imports
pub mod prelude {
    pub use crate::{Error, Result};
    pub use crate::{ControlEvent, LoopState, Looper, LooperBuilder, LooperConfig};
    pub use crate::{StretchParams, TimeStretchEngine};
}
