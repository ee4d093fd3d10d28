//! Loop recording, playback and mixing.
//!
//! # Features
//!
//! - **Loops**: 128 note-addressed slots cycling Idle → Recording → Playing ⇄ Stopped
//! - **Recording**: background worker fed through a lock-free ring and message queue
//! - **Prefetch**: per-loop sample cache between the WAV file and the callback
//! - **Mixing**: N-loop sum with per-loop volume, `1/sqrt(n)` normalization and master volume
//! - **Speed/pitch**: linear varispeed, a virtual-timeline fallback, or an external time-stretch engine
//!
//! # Example
//!
//! ```ignore
//! use overdub_looper::{ControlEvent, Looper};
//!
//! let mut looper = Looper::builder().recordings_dir("takes").build()?;
//!
//! looper.handle_event(ControlEvent::NoteOn { note: 60, velocity: 100 })?;
//! // audio thread:
//! looper.process(frames, Some(&input), Some(&mut output));
//! // control thread:
//! looper.service();
//! ```

// Error types
pub mod error;
pub use error::{Error, Result};

// Main high-level API
mod system;
pub use system::{Looper, LooperBuilder};

pub use bridge::{Recorder, RecorderStatus, RtBridge, WorkerEvent};
pub use control::{ControlAction, ControlEvent, SyncChange};
pub use loops::{LoopManager, LoopSlot, LoopState};
pub use mixer::{Mixer, PlaybackParams, RenderStrategy};
pub use prefetch::PrefetchBuffer;
pub use source::{AudioSource, FittedSource, MemorySource, SourceInfo, WavSource};
pub use time_stretch::{StretchParams, StretchStage, TimeStretchEngine};

pub mod bridge;
pub mod control;
pub mod loops;
pub mod mixer;
pub mod prefetch;
pub mod source;
pub mod time_stretch;
