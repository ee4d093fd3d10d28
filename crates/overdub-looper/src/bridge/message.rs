//! Messages carried from the control/RT side to the worker.
//!
//! Every payload is fixed-size and `Copy` so it can travel through the
//! lock-free [`MessageQueue`](overdub_core::MessageQueue) without touching the
//! heap.

use crate::error::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Longest recording path a message can carry, in bytes.
pub const MAX_PATH_BYTES: usize = 255;

/// Recording path stored inline.
#[derive(Clone, Copy)]
pub struct RecordingPath {
    bytes: [u8; MAX_PATH_BYTES],
    len: u8,
}

impl RecordingPath {
    pub fn new(path: &Path) -> Result<Self> {
        let text = path
            .to_str()
            .ok_or_else(|| Error::PathEncoding(path.to_path_buf()))?;
        if text.len() > MAX_PATH_BYTES {
            return Err(Error::PathTooLong(path.to_path_buf()));
        }

        let mut bytes = [0u8; MAX_PATH_BYTES];
        bytes[..text.len()].copy_from_slice(text.as_bytes());
        Ok(Self {
            bytes,
            len: text.len() as u8,
        })
    }

    pub fn as_str(&self) -> &str {
        // Built from a `&str` in `new`, so always valid UTF-8.
        std::str::from_utf8(&self.bytes[..usize::from(self.len)]).unwrap_or_default()
    }

    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(self.as_str())
    }
}

impl fmt::Debug for RecordingPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RecordingPath").field(&self.as_str()).finish()
    }
}

impl PartialEq for RecordingPath {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

/// Format of a recording file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl RecordingSpec {
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }
}

/// Error conditions raised on the RT side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtErrorCode {
    /// The ring buffer was full and input was dropped.
    BufferOverrun,
}

/// Control message for the worker.
///
/// `at_frame` is the absolute sample index in the recorded input stream,
/// i.e. the number of samples pushed into the ring before this message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtMessage {
    /// `path: None` lets the worker name the file in its recordings
    /// directory.
    StartRecording {
        slot: u8,
        path: Option<RecordingPath>,
        spec: RecordingSpec,
        at_frame: u64,
    },
    StopRecording {
        slot: u8,
        at_frame: u64,
    },
    Level {
        rms: f32,
    },
    Error {
        code: RtErrorCode,
    },
    Shutdown,
}

impl RtMessage {
    /// Short name used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            RtMessage::StartRecording { .. } => "start-recording",
            RtMessage::StopRecording { .. } => "stop-recording",
            RtMessage::Level { .. } => "level",
            RtMessage::Error { .. } => "error",
            RtMessage::Shutdown => "shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_path_roundtrips() {
        let path = Path::new("recordings/loop-note060-2024-01-01T00:00:00.wav");
        let inline = RecordingPath::new(path).unwrap();
        assert_eq!(inline.as_str(), path.to_str().unwrap());
        assert_eq!(inline.to_path_buf(), path);
    }

    #[test]
    fn test_recording_path_too_long() {
        let long = "x".repeat(MAX_PATH_BYTES + 1);
        assert!(matches!(
            RecordingPath::new(Path::new(&long)),
            Err(Error::PathTooLong(_))
        ));

        let exact = "y".repeat(MAX_PATH_BYTES);
        assert!(RecordingPath::new(Path::new(&exact)).is_ok());
    }

    #[test]
    fn test_message_kind() {
        assert_eq!(RtMessage::Shutdown.kind(), "shutdown");
        assert_eq!(RtMessage::Level { rms: 0.1 }.kind(), "level");
        assert_eq!(
            RtMessage::StopRecording {
                slot: 1,
                at_frame: 0
            }
            .kind(),
            "stop-recording"
        );
    }
}
