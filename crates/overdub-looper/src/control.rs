//! Logical MIDI control mapping.
//!
//! Events arrive already decoded; this module only maps them to looper
//! actions.
//!
//! | Event | Action |
//! |---|---|
//! | note-on | trigger loop `note`, volume = velocity / 127 |
//! | note-off | ignored |
//! | CC 7 | master volume = value / 127 |
//! | CC 74 | global speed, 0.25x..4x with 64 = 1x |
//! | CC 75 | global pitch, -12..+12 semitones with 64 = 0 |
//! | CC 76 | record-player factor on the CC 74 curve |
//! | CC 78 | sync: >= 64 on, 1..63 off, 0 toggles |
//! | CC 79 | sync cutoff = value / 127 of the pulse loop |

use serde::{Deserialize, Serialize};

pub const CC_VOLUME: u8 = 7;
pub const CC_SPEED: u8 = 74;
pub const CC_PITCH: u8 = 75;
pub const CC_RECORD_PLAYER: u8 = 76;
pub const CC_SYNC: u8 = 78;
pub const CC_SYNC_CUTOFF: u8 = 79;

/// A decoded MIDI event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlEvent {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8, velocity: u8 },
    ControlChange { controller: u8, value: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncChange {
    Enable,
    Disable,
    Toggle,
}

/// What the looper should do for an event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlAction {
    Trigger { note: u8, volume: f32 },
    SetSpeed(f32),
    SetPitch(f32),
    SetRecordPlayer(f32),
    SetMasterVolume(f32),
    Sync(SyncChange),
    SetSyncCutoff(f32),
    Ignore,
}

impl ControlEvent {
    pub fn action(&self) -> ControlAction {
        match *self {
            Self::NoteOn { note, velocity } => ControlAction::Trigger {
                note,
                volume: velocity_to_volume(velocity),
            },
            Self::NoteOff { .. } => ControlAction::Ignore,
            Self::ControlChange { controller, value } => match controller {
                CC_VOLUME => ControlAction::SetMasterVolume(velocity_to_volume(value)),
                CC_SPEED => ControlAction::SetSpeed(cc_to_speed(value)),
                CC_PITCH => ControlAction::SetPitch(cc_to_semitones(value)),
                CC_RECORD_PLAYER => ControlAction::SetRecordPlayer(cc_to_speed(value)),
                CC_SYNC => ControlAction::Sync(cc_to_sync(value)),
                CC_SYNC_CUTOFF => ControlAction::SetSyncCutoff(velocity_to_volume(value)),
                _ => ControlAction::Ignore,
            },
        }
    }
}

#[inline]
pub fn velocity_to_volume(velocity: u8) -> f32 {
    f32::from(velocity & 0x7f) / 127.0
}

/// Piecewise-linear speed curve: 0 → 0.25x, 63/64 → 1x, 127 → 4x.
pub fn cc_to_speed(value: u8) -> f32 {
    let value = value & 0x7f;
    if value < 64 {
        0.25 + (f32::from(value) / 63.0) * 0.75
    } else {
        1.0 + (f32::from(value - 64) / 63.0) * 3.0
    }
}

/// Piecewise-linear pitch curve: 0 → -12, 63/64 → 0, 127 → +12 semitones.
pub fn cc_to_semitones(value: u8) -> f32 {
    let value = value & 0x7f;
    if value < 64 {
        -12.0 + (f32::from(value) / 63.0) * 12.0
    } else {
        (f32::from(value - 64) / 63.0) * 12.0
    }
}

pub fn cc_to_sync(value: u8) -> SyncChange {
    match value {
        0 => SyncChange::Toggle,
        1..=63 => SyncChange::Disable,
        _ => SyncChange::Enable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_note_on_maps_velocity() {
        let action = ControlEvent::NoteOn {
            note: 60,
            velocity: 127,
        }
        .action();
        assert_eq!(action, ControlAction::Trigger { note: 60, volume: 1.0 });

        let ControlAction::Trigger { volume, .. } = ControlEvent::NoteOn {
            note: 1,
            velocity: 64,
        }
        .action() else {
            panic!("expected trigger");
        };
        assert_relative_eq!(volume, 64.0 / 127.0);
    }

    #[test]
    fn test_note_off_ignored() {
        let action = ControlEvent::NoteOff {
            note: 60,
            velocity: 0,
        }
        .action();
        assert_eq!(action, ControlAction::Ignore);
    }

    #[test]
    fn test_speed_curve() {
        assert_relative_eq!(cc_to_speed(0), 0.25);
        assert_relative_eq!(cc_to_speed(63), 1.0);
        assert_relative_eq!(cc_to_speed(64), 1.0);
        assert_relative_eq!(cc_to_speed(127), 4.0);
        for v in 1..128u8 {
            assert!(cc_to_speed(v) >= cc_to_speed(v - 1));
        }
    }

    #[test]
    fn test_pitch_curve() {
        assert_relative_eq!(cc_to_semitones(0), -12.0);
        assert_relative_eq!(cc_to_semitones(63), 0.0);
        assert_relative_eq!(cc_to_semitones(64), 0.0);
        assert_relative_eq!(cc_to_semitones(127), 12.0);
    }

    #[test]
    fn test_control_changes() {
        let cc = |controller, value| ControlEvent::ControlChange { controller, value }.action();
        assert_eq!(cc(CC_VOLUME, 127), ControlAction::SetMasterVolume(1.0));
        assert_eq!(cc(CC_SPEED, 127), ControlAction::SetSpeed(4.0));
        assert_eq!(cc(CC_PITCH, 0), ControlAction::SetPitch(-12.0));
        assert_eq!(cc(CC_RECORD_PLAYER, 0), ControlAction::SetRecordPlayer(0.25));
        assert_eq!(cc(CC_SYNC, 100), ControlAction::Sync(SyncChange::Enable));
        assert_eq!(cc(CC_SYNC, 10), ControlAction::Sync(SyncChange::Disable));
        assert_eq!(cc(CC_SYNC, 0), ControlAction::Sync(SyncChange::Toggle));
        assert_eq!(cc(CC_SYNC_CUTOFF, 127), ControlAction::SetSyncCutoff(1.0));
        assert_eq!(cc(CC_SYNC_CUTOFF, 0), ControlAction::SetSyncCutoff(0.0));
        assert_eq!(cc(1, 64), ControlAction::Ignore);
    }
}
