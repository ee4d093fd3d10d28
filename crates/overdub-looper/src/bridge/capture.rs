//! Recording files ("takes") written by the worker thread.

use super::message::RecordingSpec;
use super::metrics::BridgeMetrics;
use crate::error::Result;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Open a float WAV writer at `path`, creating parent directories.
///
/// Also returns a second handle to the same file, used to force written
/// data to disk while the writer keeps its own buffering.
pub(super) fn create_wav_writer(
    path: &Path,
    spec: RecordingSpec,
) -> Result<(WavWriter<BufWriter<File>>, File)> {
    let spec = WavSpec {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let durable = file.try_clone()?;
    Ok((WavWriter::new(BufWriter::new(file), spec)?, durable))
}

/// One open recording, covering the input samples `[start_frame, stop_frame)`
/// of the shared input stream.
pub(super) struct Take {
    pub slot: u8,
    pub path: PathBuf,
    writer: WavWriter<BufWriter<File>>,
    durable: File,
    channels: u16,
    start_frame: u64,
    stop_frame: Option<u64>,
    samples_written: u64,
    since_sync: u64,
}

impl Take {
    pub fn open(slot: u8, path: PathBuf, spec: RecordingSpec, start_frame: u64) -> Result<Self> {
        let (writer, durable) = create_wav_writer(&path, spec)?;
        Ok(Self {
            slot,
            path,
            writer,
            durable,
            channels: spec.channels.max(1),
            start_frame,
            stop_frame: None,
            samples_written: 0,
            since_sync: 0,
        })
    }

    pub fn stop_at(&mut self, frame: u64) {
        self.stop_frame = Some(frame.max(self.start_frame));
    }

    /// True once every sample up to the stop point has been consumed.
    pub fn is_complete(&self, consumed: u64) -> bool {
        self.stop_frame.is_some_and(|stop| consumed >= stop)
    }

    /// Append the part of `block` that falls inside this take. `block_start`
    /// is the stream index of `block[0]`.
    pub fn write_block(
        &mut self,
        block: &[f32],
        block_start: u64,
        sync_interval: u64,
        metrics: &BridgeMetrics,
    ) {
        let block_end = block_start + block.len() as u64;
        let start = self.start_frame.max(block_start);
        let end = self.stop_frame.map_or(block_end, |stop| stop.min(block_end));
        if start >= end {
            return;
        }

        let range = (start - block_start) as usize..(end - block_start) as usize;
        let mut written = 0u64;
        for &sample in &block[range] {
            if let Err(e) = self.writer.write_sample(sample) {
                warn!("Short write to {}: {}", self.path.display(), e);
                metrics.record_underrun();
                break;
            }
            written += 1;
        }

        if written == 0 {
            return;
        }
        metrics.record_write(written / u64::from(self.channels), self.channels);
        self.samples_written += written;
        self.since_sync += written;

        if self.since_sync >= sync_interval {
            self.since_sync = 0;
            match self.sync() {
                Ok(()) => metrics.record_sync(),
                Err(e) => {
                    warn!("Failed to sync {}: {}", self.path.display(), e);
                    metrics.record_underrun();
                }
            }
        }
    }

    /// Flush buffered samples and the header, then wait for the data to
    /// reach the disk.
    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.durable.sync_data()?;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.samples_written / u64::from(self.channels)
    }

    /// Write the final header and close the file. Returns frames written.
    pub fn finalize(self, metrics: &BridgeMetrics) -> u64 {
        let frames = self.frames_written();
        if let Err(e) = self.writer.finalize() {
            warn!("Failed to finalize {}: {}", self.path.display(), e);
            metrics.record_underrun();
        }
        frames
    }
}
