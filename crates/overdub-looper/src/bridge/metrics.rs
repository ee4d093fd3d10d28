//! Recording I/O statistics shared between the RT side and the worker.
//!
//! All counters are relaxed atomics: they are diagnostics, not
//! synchronization.

use overdub_core::AtomicFloat;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for the recording bridge.
#[derive(Default)]
pub struct BridgeMetrics {
    /// Frames appended to recording files
    frames_written: AtomicU64,
    /// Bytes appended to recording files
    bytes_written: AtomicU64,
    /// Write batches
    write_ops: AtomicU64,
    /// Durable syncs
    syncs: AtomicU64,
    /// Input blocks (partially) dropped because the ring was full
    overruns: AtomicU64,
    /// Short or failed file writes
    underruns: AtomicU64,
    /// Messages the queue rejected
    dropped_messages: AtomicU64,
    /// Level reports received by the worker
    level_reports: AtomicU64,
    /// Last reported input RMS
    last_level: AtomicFloat,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_write(&self, frames: u64, channels: u16) {
        self.frames_written.fetch_add(frames, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(frames * u64::from(channels) * 4, Ordering::Relaxed);
        self.write_ops.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sync(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the overrun count including this one.
    #[inline]
    pub fn record_overrun(&self) -> u64 {
        self.overruns.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped_message(&self) {
        self.dropped_messages.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_level(&self, rms: f32) {
        self.last_level.set(rms);
        self.level_reports.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BridgeMetricsSnapshot {
        BridgeMetricsSnapshot {
            frames_written: self.frames_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            write_ops: self.write_ops.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
            level_reports: self.level_reports.load(Ordering::Relaxed),
            last_level: self.last_level.get_relaxed(),
        }
    }
}

/// Point-in-time copy of [`BridgeMetrics`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BridgeMetricsSnapshot {
    pub frames_written: u64,
    pub bytes_written: u64,
    pub write_ops: u64,
    pub syncs: u64,
    pub overruns: u64,
    pub underruns: u64,
    pub dropped_messages: u64,
    pub level_reports: u64,
    pub last_level: f32,
}

impl BridgeMetricsSnapshot {
    /// Average frames per write batch.
    pub fn frames_per_write(&self) -> f64 {
        if self.write_ops == 0 {
            0.0
        } else {
            self.frames_written as f64 / self.write_ops as f64
        }
    }

    /// True if any input or message was lost.
    pub fn has_losses(&self) -> bool {
        self.overruns > 0 || self.underruns > 0 || self.dropped_messages > 0
    }
}

/// Root-mean-square of a block. RT-safe.
#[inline]
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}
