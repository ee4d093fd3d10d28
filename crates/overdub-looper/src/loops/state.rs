use serde::{Deserialize, Serialize};

/// Lifecycle state of a loop slot.
///
/// ```text
/// Idle ──► Recording ──► Playing ◄──► Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    #[default]
    Idle,
    Recording,
    Playing,
    Stopped,
}

impl LoopState {
    /// State reached by the next trigger, assuming every file operation
    /// succeeds.
    pub fn next(self) -> Self {
        match self {
            Self::Idle => Self::Recording,
            Self::Recording => Self::Playing,
            Self::Playing => Self::Stopped,
            Self::Stopped => Self::Playing,
        }
    }

    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_recording(self) -> bool {
        matches!(self, Self::Recording)
    }

    pub fn is_playing(self) -> bool {
        matches!(self, Self::Playing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Playing => "playing",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
