//! Generated recording filenames.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// `{dir}/loop-note{NNN}-{YYYY-MM-DDTHH:MM:SS}.wav`
pub fn recording_path(dir: &Path, note: u8, time: DateTime<Local>) -> PathBuf {
    dir.join(format!(
        "loop-note{:03}-{}.wav",
        note,
        time.format("%Y-%m-%dT%H:%M:%S")
    ))
}

/// Recording path stamped with the current local time.
pub fn recording_path_now(dir: &Path, note: u8) -> PathBuf {
    recording_path(dir, note, Local::now())
}
