//! Looper configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Number of addressable loop slots (one per MIDI note).
pub const MAX_LOOPS: usize = 128;

/// Configuration for the looper.
///
/// All buffers are sized from these values at construction; nothing grows
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LooperConfig {
    /// Transport sample rate in Hz.
    pub sample_rate: u32,
    /// Largest block mixed in one pass. Longer callbacks are chunked.
    pub max_block_frames: usize,
    /// Requested recording ring size in samples (rounded up to a power of two).
    pub ring_buffer_frames: usize,
    /// Requested message queue size (rounded up to a power of two).
    pub message_queue_len: usize,
    /// Prefetch window per loop, in frames.
    pub prefetch_frames: usize,
    /// Where generated recording files go.
    pub recordings_dir: PathBuf,
    /// Callbacks between input level checks while recording.
    pub level_report_interval: u32,
    /// RMS above which a level report is sent.
    pub level_threshold: f32,
    /// Overruns between throttled overrun error messages.
    pub overrun_report_interval: u32,
    /// Frames between durable syncs of a recording. 0 means one second.
    pub sync_interval_frames: u64,
    /// How long a non-RT flush waits for the worker to close recordings.
    pub stop_timeout_ms: u64,
    /// Enqueue attempts for the shutdown message before the worker is
    /// stopped by flag. Triggers make exactly one attempt.
    pub control_retry_attempts: u32,
    /// Fraction of the pulse loop, 0..=1, up to which a synced start joins
    /// the running pulse. Later starts wait for the next wrap.
    pub sync_cutoff: f32,
    /// Sub-chunk size for the time-stretch handoff.
    pub stretch_chunk_frames: usize,
    /// Source scratch is `max_block_frames * max_resample_ratio` frames.
    pub max_resample_ratio: usize,
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            max_block_frames: 4096,
            ring_buffer_frames: 1 << 17,
            message_queue_len: 256,
            prefetch_frames: 8192,
            recordings_dir: PathBuf::from("recordings"),
            level_report_interval: 100,
            level_threshold: 0.001,
            overrun_report_interval: 1000,
            sync_interval_frames: 0,
            stop_timeout_ms: 500,
            control_retry_attempts: 10,
            sync_cutoff: 0.5,
            stretch_chunk_frames: 64,
            max_resample_ratio: 4,
        }
    }
}

impl LooperConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::InvalidConfig("sample_rate must be non-zero".into()));
        }
        if self.max_block_frames == 0 {
            return Err(Error::InvalidConfig(
                "max_block_frames must be non-zero".into(),
            ));
        }
        if self.ring_usable_frames() < self.max_block_frames {
            return Err(Error::InvalidConfig(format!(
                "ring_buffer_frames {} holds {} samples, less than one block ({})",
                self.ring_buffer_frames,
                self.ring_usable_frames(),
                self.max_block_frames
            )));
        }
        if self.message_queue_len == 0 {
            return Err(Error::InvalidConfig(
                "message_queue_len must be non-zero".into(),
            ));
        }
        if self.prefetch_frames == 0 {
            return Err(Error::InvalidConfig("prefetch_frames must be non-zero".into()));
        }
        if self.stretch_chunk_frames == 0 {
            return Err(Error::InvalidConfig(
                "stretch_chunk_frames must be non-zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.sync_cutoff) {
            return Err(Error::InvalidConfig(format!(
                "sync_cutoff {} outside 0..=1",
                self.sync_cutoff
            )));
        }
        if self.max_resample_ratio == 0 {
            return Err(Error::InvalidConfig(
                "max_resample_ratio must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Samples the recording ring can hold at once: the requested size rounded
    /// up to a power of two, minus the slot that tells full from empty.
    pub fn ring_usable_frames(&self) -> usize {
        self.ring_buffer_frames.max(2).next_power_of_two() - 1
    }

    /// Frames between durable syncs of a recording file.
    pub fn sync_interval(&self) -> u64 {
        if self.sync_interval_frames == 0 {
            u64::from(self.sample_rate)
        } else {
            self.sync_interval_frames
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Size of the bounded source scratch used by variable-speed reads.
    pub fn resample_scratch_frames(&self) -> usize {
        self.max_block_frames * self.max_resample_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LooperConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.prefetch_frames, 8192);
        assert_eq!(config.recordings_dir, PathBuf::from("recordings"));
        assert_eq!(config.sync_interval(), 48000);
        assert_eq!(config.stop_timeout(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_sample_rate() {
        let config = LooperConfig {
            sample_rate: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_ring_smaller_than_block() {
        let config = LooperConfig {
            ring_buffer_frames: 512,
            max_block_frames: 1024,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_ring_exactly_one_block() {
        let config = LooperConfig {
            ring_buffer_frames: 256,
            max_block_frames: 256,
            ..Default::default()
        };
        assert_eq!(config.ring_usable_frames(), 255);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        // Rounding up to the next power of two leaves room for the block.
        let config = LooperConfig {
            ring_buffer_frames: 257,
            max_block_frames: 256,
            ..Default::default()
        };
        assert_eq!(config.ring_usable_frames(), 511);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_sync_cutoff_out_of_range() {
        for cutoff in [-0.1, 1.5, f32::NAN] {
            let config = LooperConfig {
                sync_cutoff: cutoff,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "accepted cutoff {}", cutoff);
        }
    }

    #[test]
    fn test_explicit_sync_interval() {
        let config = LooperConfig {
            sync_interval_frames: 1024,
            ..Default::default()
        };
        assert_eq!(config.sync_interval(), 1024);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: LooperConfig =
            serde_json::from_str(r#"{ "sample_rate": 44100, "recordings_dir": "takes" }"#)
                .unwrap();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.recordings_dir, PathBuf::from("takes"));
        assert_eq!(config.max_block_frames, 4096);
        assert_eq!(config.sync_interval(), 44100);
    }
}
