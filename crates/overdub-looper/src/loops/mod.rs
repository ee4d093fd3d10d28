//! Loop slots and the trigger state machine.

mod manager;
mod slot;
mod state;

pub use manager::LoopManager;
pub use slot::{clamp_volume, LoopSlot, PlaybackFile, RecordingFile, MAX_VOLUME};
pub use state::LoopState;
