//! Per-loop prefetch cache between the playback file and the audio callback.
//!
//! The buffer holds one contiguous window of channel-0 samples. [`read`]
//! serves from the window and, when it runs dry, refills synchronously from
//! the source. That refill is a file read on the audio thread: a known RT
//! hazard, kept cold by refilling ahead of time through [`top_up`] whenever
//! [`needs_refill`] reports the window is 75% consumed.
//!
//! Sequential reads and random access through [`sample_at`] share one read
//! cursor, so the refill hint works for both.
//!
//! [`read`]: PrefetchBuffer::read
//! [`top_up`]: PrefetchBuffer::top_up
//! [`needs_refill`]: PrefetchBuffer::needs_refill
//! [`sample_at`]: PrefetchBuffer::sample_at

use crate::error::Result;
use crate::source::AudioSource;

/// Default window size in frames.
pub const PREFETCH_FRAMES: usize = 8192;

/// Cached window of mono samples backed by an [`AudioSource`].
pub struct PrefetchBuffer {
    buffer: Vec<f32>,
    /// Interleaved staging area, `capacity * channels`, used only by refills.
    staging: Vec<f32>,
    channels: usize,
    valid_samples: usize,
    read_position: usize,
    file_position: u64,
    /// File frame of `buffer[0]`. In loop mode the window may run past the
    /// end of the file and continue from frame 0.
    window_start: Option<u64>,
    loop_mode: bool,
}

impl PrefetchBuffer {
    /// Window of [`PREFETCH_FRAMES`] frames for a source with `channels` channels.
    pub fn new(channels: usize) -> Self {
        Self::with_capacity(PREFETCH_FRAMES, channels)
    }

    pub fn with_capacity(capacity: usize, channels: usize) -> Self {
        let capacity = capacity.max(1);
        let channels = channels.max(1);
        Self {
            buffer: vec![0.0; capacity],
            staging: vec![0.0; capacity * channels],
            channels,
            valid_samples: 0,
            read_position: 0,
            file_position: 0,
            window_start: None,
            loop_mode: true,
        }
    }

    /// Resize the staging area for a source with a different channel count.
    ///
    /// Allocates; call only when opening a file, never from the callback.
    pub fn prepare(&mut self, channels: usize) {
        let channels = channels.max(1);
        if channels != self.channels {
            self.channels = channels;
            self.staging = vec![0.0; self.buffer.len() * channels];
        }
        self.reset();
    }

    /// Forget the cached window and rewind to the start of the file.
    pub fn reset(&mut self) {
        self.valid_samples = 0;
        self.read_position = 0;
        self.file_position = 0;
        self.window_start = None;
    }

    /// Replace the window with up to `capacity` frames starting at
    /// `file_position`. Returns the number of frames cached.
    pub fn fill(&mut self, source: &mut dyn AudioSource) -> Result<usize> {
        let start = self.file_position;
        let mut frames = self.load(source, 0)?;

        // A file whose length is a multiple of the window ends exactly on a
        // window edge, leaving the next fill empty. Wrap once and retry.
        if frames == 0 && self.loop_mode && start > 0 {
            self.file_position = 0;
            frames = self.load(source, 0)?;
            self.window_start = Some(0);
        } else {
            self.window_start = Some(start);
        }

        self.valid_samples = frames;
        self.read_position = 0;
        Ok(frames)
    }

    /// Keep the unread tail and append fresh frames behind it.
    ///
    /// Meant for a non-RT tick between callbacks so `read` never has to hit
    /// the file. Returns the number of frames appended.
    pub fn top_up(&mut self, source: &mut dyn AudioSource) -> Result<usize> {
        if self.valid_samples == 0 {
            return self.fill(source);
        }

        let total = source.info().frames;
        let remaining = self.valid_samples - self.read_position;
        let consumed = self.read_position as u64;
        self.buffer.copy_within(self.read_position..self.valid_samples, 0);
        self.window_start = self.window_start.map(|start| {
            let start = start + consumed;
            if self.loop_mode && total > 0 {
                start % total
            } else {
                start
            }
        });
        self.valid_samples = remaining;
        self.read_position = 0;

        let appended = self.load(source, remaining)?;
        self.valid_samples += appended;
        Ok(appended)
    }

    /// Move the read cursor to file frame `frame`. A frame inside the window
    /// keeps the cached samples; anything else empties the window so the
    /// next read or refill starts at `frame`.
    pub fn reposition(&mut self, frame: u64, total_frames: u64) {
        match self.window_index(frame, total_frames) {
            Some(index) => self.read_position = index,
            None => {
                self.valid_samples = 0;
                self.read_position = 0;
                self.file_position = frame;
                self.window_start = None;
            }
        }
    }

    /// Copy `output.len()` samples out of the window, refilling as needed.
    ///
    /// Never under-runs: anything the source cannot provide is silence.
    /// Returns the number of samples that came from the source.
    pub fn read(&mut self, source: &mut dyn AudioSource, output: &mut [f32]) -> usize {
        let mut copied = 0;

        while copied < output.len() {
            if self.read_position >= self.valid_samples {
                match self.fill(source) {
                    Ok(frames) if frames > 0 => {}
                    _ => {
                        output[copied..].fill(0.0);
                        break;
                    }
                }
            }

            let available = self.valid_samples - self.read_position;
            let count = (output.len() - copied).min(available);
            output[copied..copied + count]
                .copy_from_slice(&self.buffer[self.read_position..self.read_position + count]);
            self.read_position += count;
            copied += count;
        }

        copied
    }

    /// Random access to file frame `frame`, refetching the window around it
    /// on a miss. Returns silence past the end of the source.
    ///
    /// The read cursor follows the last frame fetched, so forward access
    /// reports [`needs_refill`](Self::needs_refill) like sequential reads.
    pub fn sample_at(&mut self, source: &mut dyn AudioSource, frame: u64) -> f32 {
        let total = source.info().frames;
        let index = match self.window_index(frame, total) {
            Some(index) => index,
            None => {
                self.file_position = frame;
                if !matches!(self.fill(source), Ok(frames) if frames > 0) {
                    return 0.0;
                }
                match self.window_index(frame, total) {
                    Some(index) => index,
                    None => return 0.0,
                }
            }
        };

        self.read_position = index + 1;
        self.buffer[index]
    }

    /// True once at least 75% of the cached window has been consumed.
    pub fn needs_refill(&self) -> bool {
        self.read_position * 4 >= self.valid_samples * 3
    }

    pub fn set_loop_mode(&mut self, loop_mode: bool) {
        self.loop_mode = loop_mode;
    }

    pub fn loop_mode(&self) -> bool {
        self.loop_mode
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn valid_samples(&self) -> usize {
        self.valid_samples
    }

    pub fn read_position(&self) -> usize {
        self.read_position
    }

    pub fn file_position(&self) -> u64 {
        self.file_position
    }

    fn window_index(&self, frame: u64, total_frames: u64) -> Option<usize> {
        let start = self.window_start?;
        let offset = match frame.checked_sub(start) {
            Some(offset) => offset,
            None if self.loop_mode && total_frames > 0 => frame + total_frames - start,
            None => return None,
        };
        (offset < self.valid_samples as u64).then_some(offset as usize)
    }

    /// Read frames from `file_position` into `buffer[offset..]`, extracting
    /// channel 0, and advance `file_position` (wrapping at end of file when
    /// looping).
    fn load(&mut self, source: &mut dyn AudioSource, offset: usize) -> Result<usize> {
        let space = self.buffer.len() - offset;
        if space == 0 {
            return Ok(0);
        }

        source.seek(self.file_position)?;
        let channels = usize::from(source.info().channels.max(1));

        let frames = if channels == 1 {
            source.read_frames(&mut self.buffer[offset..])?
        } else {
            let max_frames = space.min(self.staging.len() / channels);
            let frames = source.read_frames(&mut self.staging[..max_frames * channels])?;
            for (dst, frame) in self.buffer[offset..]
                .iter_mut()
                .zip(self.staging.chunks_exact(channels))
                .take(frames)
            {
                *dst = frame[0];
            }
            frames
        };

        self.file_position += frames as u64;
        if frames < space && self.loop_mode {
            self.file_position = 0;
        }
        Ok(frames)
    }
}
