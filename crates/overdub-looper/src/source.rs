//! Playback sources: the file codec seam used by the prefetch buffer.

use crate::error::Result;
use hound::{SampleFormat, WavReader};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Format of a playback source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub channels: u16,
    pub sample_rate: u32,
    /// Length in frames.
    pub frames: u64,
}

/// Seekable interleaved float source.
pub trait AudioSource: Send {
    fn info(&self) -> SourceInfo;

    /// Position the next read at `frame`.
    fn seek(&mut self, frame: u64) -> Result<()>;

    /// Read whole interleaved frames into `buf`, returning the number of
    /// frames read. Zero means end of file.
    fn read_frames(&mut self, buf: &mut [f32]) -> Result<usize>;
}

/// WAV file source.
pub struct WavSource {
    reader: WavReader<BufReader<File>>,
    info: SourceInfo,
    format: SampleFormat,
    int_scale: f32,
}

impl WavSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let reader = WavReader::open(path)?;
        let spec = reader.spec();
        let info = SourceInfo {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            frames: u64::from(reader.duration()),
        };
        let int_scale = 1.0 / (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;

        Ok(Self {
            reader,
            info,
            format: spec.sample_format,
            int_scale,
        })
    }
}

impl AudioSource for WavSource {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        let frame = frame.min(self.info.frames) as u32;
        self.reader.seek(frame)?;
        Ok(())
    }

    fn read_frames(&mut self, buf: &mut [f32]) -> Result<usize> {
        let channels = usize::from(self.info.channels.max(1));
        let wanted = (buf.len() / channels) * channels;
        let mut filled = 0;

        match self.format {
            SampleFormat::Float => {
                for sample in self.reader.samples::<f32>().take(wanted) {
                    buf[filled] = sample?;
                    filled += 1;
                }
            }
            SampleFormat::Int => {
                let scale = self.int_scale;
                for sample in self.reader.samples::<i32>().take(wanted) {
                    buf[filled] = sample? as f32 * scale;
                    filled += 1;
                }
            }
        }

        Ok(filled / channels)
    }
}

/// In-memory source, used for generated material and tests.
#[derive(Debug, Clone)]
pub struct MemorySource {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
    position: u64,
}

impl MemorySource {
    /// Wrap interleaved samples. A trailing partial frame is ignored.
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate,
            position: 0,
        }
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(samples, 1, sample_rate)
    }

    fn frames(&self) -> u64 {
        (self.samples.len() / usize::from(self.channels)) as u64
    }
}

impl AudioSource for MemorySource {
    fn info(&self) -> SourceInfo {
        SourceInfo {
            channels: self.channels,
            sample_rate: self.sample_rate,
            frames: self.frames(),
        }
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        self.position = frame.min(self.frames());
        Ok(())
    }

    fn read_frames(&mut self, buf: &mut [f32]) -> Result<usize> {
        let channels = usize::from(self.channels);
        let remaining = (self.frames() - self.position) as usize;
        let frames = (buf.len() / channels).min(remaining);

        let start = self.position as usize * channels;
        let len = frames * channels;
        buf[..len].copy_from_slice(&self.samples[start..start + len]);
        self.position += frames as u64;
        Ok(frames)
    }
}

/// Presents `inner` as exactly `frames` long: a longer source is cut, a
/// shorter one is padded with silence.
pub struct FittedSource {
    inner: Box<dyn AudioSource>,
    frames: u64,
    position: u64,
}

impl FittedSource {
    pub fn new(inner: Box<dyn AudioSource>, frames: u64) -> Self {
        Self {
            inner,
            frames,
            position: 0,
        }
    }
}

impl AudioSource for FittedSource {
    fn info(&self) -> SourceInfo {
        SourceInfo {
            frames: self.frames,
            ..self.inner.info()
        }
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        self.position = frame.min(self.frames);
        self.inner.seek(self.position.min(self.inner.info().frames))
    }

    fn read_frames(&mut self, buf: &mut [f32]) -> Result<usize> {
        let info = self.inner.info();
        let channels = usize::from(info.channels.max(1));
        let wanted = ((buf.len() / channels) as u64).min(self.frames - self.position) as usize;

        let mut read = 0;
        if self.position < info.frames {
            let from_inner = wanted.min((info.frames - self.position) as usize);
            while read < from_inner {
                let frames = self
                    .inner
                    .read_frames(&mut buf[read * channels..from_inner * channels])?;
                if frames == 0 {
                    break;
                }
                read += frames;
            }
        }

        buf[read * channels..wanted * channels].fill(0.0);
        self.position += wanted as u64;
        Ok(wanted)
    }
}
