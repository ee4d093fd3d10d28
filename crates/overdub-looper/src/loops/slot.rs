//! One loop slot: state, files, playback position and prefetch cache.

use super::state::LoopState;
use crate::bridge::RecordingSpec;
use crate::error::Result;
use crate::mixer::{resample_linear, source_frames_for, LoopRead, VirtualTimeline};
use crate::prefetch::PrefetchBuffer;
use crate::source::{AudioSource, SourceInfo};
use crate::time_stretch::StretchParams;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Absorbs rounding in fractional positions before truncating to a frame.
const POSITION_EPSILON: f64 = 1e-6;

/// Largest per-loop volume.
pub const MAX_VOLUME: f32 = 2.0;

/// Clamp a volume to [0, 2]; NaN is silence. Called from triggers, so it
/// never logs.
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return 0.0;
    }
    volume.clamp(0.0, MAX_VOLUME)
}

/// File a slot plays from, held only while Playing or Stopped.
pub struct PlaybackFile {
    source: Box<dyn AudioSource>,
    info: SourceInfo,
    path: PathBuf,
}

impl PlaybackFile {
    pub fn new(source: Box<dyn AudioSource>, path: impl Into<PathBuf>) -> Self {
        let info = source.info();
        let path = path.into();
        if info.channels > 1 {
            warn!(
                "{} has {} channels, playing channel 0 only",
                path.display(),
                info.channels
            );
        }
        Self { source, info, path }
    }

    pub fn info(&self) -> SourceInfo {
        self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A recording in progress. The file handle itself belongs to the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingFile {
    /// Known up front for an explicit path, otherwise once the worker
    /// reports the file it created.
    pub path: Option<PathBuf>,
    pub spec: RecordingSpec,
}

/// Per-note loop slot, exclusively owned by the loop manager.
pub struct LoopSlot {
    note: u8,
    state: LoopState,
    active: bool,
    volume: f32,
    playback_speed: f32,
    /// Playback position in source frames.
    sample_position: f64,
    /// Move the prefetch cache and timeline to `sample_position` before the
    /// next render.
    reset_audio: bool,
    /// Playing, but held until the pulse loop wraps.
    pending_start: bool,
    /// Recording, but the start is held until the pulse loop wraps.
    pending_record: bool,
    /// Recording until the pulse loop wraps.
    pending_stop: bool,
    playback: Option<PlaybackFile>,
    /// Set from the start of a recording until the worker reports the file
    /// closed.
    recording: Option<RecordingFile>,
    prefetch: PrefetchBuffer,
    timeline: VirtualTimeline,
    on_timeline: bool,
}

impl LoopSlot {
    pub fn new(note: u8, prefetch_frames: usize) -> Self {
        Self {
            note,
            state: LoopState::Idle,
            active: false,
            volume: 1.0,
            playback_speed: 1.0,
            sample_position: 0.0,
            reset_audio: false,
            pending_start: false,
            pending_record: false,
            pending_stop: false,
            playback: None,
            recording: None,
            prefetch: PrefetchBuffer::with_capacity(prefetch_frames, 1),
            timeline: VirtualTimeline::new(),
            on_timeline: false,
        }
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn playback_speed(&self) -> f32 {
        self.playback_speed
    }

    pub fn sample_position(&self) -> f64 {
        self.sample_position
    }

    pub fn is_pending_start(&self) -> bool {
        self.pending_start
    }

    pub fn is_pending_record(&self) -> bool {
        self.pending_record
    }

    pub fn is_pending_stop(&self) -> bool {
        self.pending_stop
    }

    /// Stopped recording whose file the worker has not closed yet.
    pub fn is_pending_open(&self) -> bool {
        self.recording.is_some() && !self.state.is_recording()
    }

    pub fn needs_audio_reset(&self) -> bool {
        self.reset_audio
    }

    /// Input is being captured for this slot.
    pub fn is_recording_enabled(&self) -> bool {
        self.state.is_recording() && !self.pending_record
    }

    pub fn recording_path(&self) -> Option<&Path> {
        self.recording.as_ref().and_then(|r| r.path.as_deref())
    }

    pub fn playback_path(&self) -> Option<&Path> {
        self.playback.as_ref().map(PlaybackFile::path)
    }

    pub fn playback_info(&self) -> Option<SourceInfo> {
        self.playback.as_ref().map(PlaybackFile::info)
    }

    /// Length of the loop in frames, once it has a playback file.
    pub fn loop_frames(&self) -> Option<u64> {
        self.playback_info().map(|info| info.frames)
    }

    pub fn prefetch(&self) -> &PrefetchBuffer {
        &self.prefetch
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = clamp_volume(volume);
    }

    pub fn set_playback_speed(&mut self, speed: f32) {
        self.playback_speed = StretchParams::sanitize_speed(speed);
    }

    /// Contributes to the mix this callback.
    pub fn is_audible(&self) -> bool {
        self.active && self.state.is_playing() && !self.pending_start && self.playback.is_some()
    }

    pub(crate) fn allocate(&mut self) -> bool {
        let newly = !self.active;
        self.active = true;
        newly
    }

    /// Enter Recording. With `pending` set the worker has not been asked to
    /// start yet.
    pub(crate) fn begin_recording(&mut self, recording: RecordingFile, pending: bool) {
        self.playback = None;
        self.recording = Some(recording);
        self.pending_record = pending;
        self.pending_stop = false;
        self.pending_start = false;
        self.state = LoopState::Recording;
    }

    /// The held start has been handed to the worker.
    pub(crate) fn recording_started(&mut self) {
        self.pending_record = false;
    }

    pub(crate) fn set_recording_path(&mut self, path: PathBuf) {
        if let Some(recording) = self.recording.as_mut() {
            recording.path = Some(path);
        }
    }

    pub(crate) fn mark_pending_stop(&mut self) {
        self.pending_stop = true;
    }

    /// Recording → Playing. The slot stays silent until the closed file is
    /// attached.
    pub(crate) fn finish_capture(&mut self) {
        self.pending_record = false;
        self.pending_stop = false;
        self.pending_start = false;
        self.sample_position = 0.0;
        self.state = LoopState::Playing;
    }

    pub(crate) fn take_recording(&mut self) -> Option<RecordingFile> {
        self.recording.take()
    }

    /// Open `file` for playback from the top: the cache is reset and primed
    /// with one fill. On failure the slot is left Idle without a file.
    pub(crate) fn start_playback(&mut self, file: PlaybackFile) -> Result<()> {
        self.attach(file)?;
        self.pending_start = false;
        self.state = LoopState::Playing;
        Ok(())
    }

    /// Install the file of a finished recording, keeping whatever Playing or
    /// Stopped state the slot reached while the worker was closing it.
    pub(crate) fn attach(&mut self, mut file: PlaybackFile) -> Result<()> {
        self.playback = None;
        self.prefetch.prepare(usize::from(file.info.channels));

        if let Err(e) = self.prefetch.fill(file.source.as_mut()) {
            self.state = LoopState::Idle;
            return Err(e);
        }

        self.playback = Some(file);
        self.sample_position = 0.0;
        self.timeline.reset();
        self.on_timeline = false;
        self.reset_audio = false;
        Ok(())
    }

    pub(crate) fn stop(&mut self) {
        self.pending_start = false;
        self.state = LoopState::Stopped;
    }

    /// Stopped → Playing from `position`, or from the top once the pulse
    /// wraps when `pending`.
    pub(crate) fn resume(&mut self, position: f64, pending: bool) {
        self.sample_position = if pending { 0.0 } else { position };
        self.reset_audio = true;
        self.pending_start = pending;
        self.state = LoopState::Playing;
    }

    pub(crate) fn release_pending(&mut self) {
        self.pending_start = false;
    }

    pub(crate) fn fall_back_to_idle(&mut self) {
        self.playback = None;
        self.recording = None;
        self.pending_start = false;
        self.pending_record = false;
        self.pending_stop = false;
        self.state = LoopState::Idle;
    }

    /// Release everything and return to an unallocated Idle slot.
    pub(crate) fn clear(&mut self) {
        self.fall_back_to_idle();
        self.prefetch.reset();
        self.timeline.reset();
        self.sample_position = 0.0;
        self.reset_audio = false;
        self.on_timeline = false;
        self.volume = 1.0;
        self.playback_speed = 1.0;
        self.active = false;
    }

    /// Non-RT upkeep: honor a pending audio reset and keep the prefetch
    /// window ahead of the read cursor.
    pub(crate) fn service(&mut self) -> Result<()> {
        let Some(playback) = self.playback.as_mut() else {
            return Ok(());
        };
        if !self.state.is_playing() {
            return Ok(());
        }

        if self.reset_audio {
            self.prefetch
                .reposition(position_frame(self.sample_position), playback.info.frames);
            self.timeline.reset();
            self.on_timeline = false;
            self.reset_audio = false;
        }
        if self.prefetch.needs_refill() {
            self.prefetch.top_up(playback.source.as_mut())?;
        }
        Ok(())
    }

    /// RT: render this loop's block into `output`. `scratch` bounds the
    /// source frames a variable-speed read may consume.
    ///
    /// Returns true if playback wrapped around the end of the loop.
    pub(crate) fn render(
        &mut self,
        read: LoopRead,
        sample_rate: u32,
        output: &mut [f32],
        scratch: &mut [f32],
    ) -> bool {
        let Some(playback) = self.playback.as_mut() else {
            output.fill(0.0);
            return false;
        };
        let total = playback.info.frames;

        if self.reset_audio {
            self.prefetch.reposition(position_frame(self.sample_position), total);
            self.timeline.reset();
            self.on_timeline = false;
            self.reset_audio = false;
        }

        match read {
            LoopRead::Direct | LoopRead::Linear { .. } if self.on_timeline => {
                // Timeline reads leave the cursor at the last fetch, which
                // pitch scaling moves away from the playback position.
                self.prefetch.reposition(position_frame(self.sample_position), total);
                self.on_timeline = false;
            }
            _ => {}
        }

        match read {
            LoopRead::Direct => {
                self.prefetch.read(playback.source.as_mut(), output);
                self.advance(output.len() as f64, total)
            }
            LoopRead::Linear { speed } => {
                let needed = source_frames_for(output.len(), speed, scratch.len());
                let source = &mut scratch[..needed];
                self.prefetch.read(playback.source.as_mut(), source);
                resample_linear(source, output, speed);
                self.advance(needed as f64, total)
            }
            LoopRead::Timeline { speed, pitch_scale } => {
                if !self.on_timeline {
                    self.timeline
                        .sync_to(self.sample_position, speed, sample_rate);
                    self.on_timeline = true;
                }
                let (position, wrapped) = self.timeline.render(
                    &mut self.prefetch,
                    playback.source.as_mut(),
                    total,
                    sample_rate,
                    speed,
                    pitch_scale,
                    output,
                );
                self.sample_position = position;
                wrapped
            }
        }
    }

    fn advance(&mut self, frames: f64, total: u64) -> bool {
        if total == 0 {
            return false;
        }
        let total = total as f64;
        self.sample_position += frames;
        if self.sample_position >= total {
            self.sample_position %= total;
            true
        } else {
            false
        }
    }
}

#[inline]
fn position_frame(position: f64) -> u64 {
    (position + POSITION_EPSILON) as u64
}

impl std::fmt::Debug for LoopSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopSlot")
            .field("note", &self.note)
            .field("state", &self.state)
            .field("active", &self.active)
            .field("volume", &self.volume)
            .field("playback_speed", &self.playback_speed)
            .field("sample_position", &self.sample_position)
            .field("playback", &self.playback_path())
            .field("recording", &self.recording_path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use crate::time_stretch::semitones_to_scale;
    use approx::assert_relative_eq;

    fn playing_slot(samples: Vec<f32>) -> LoopSlot {
        let mut slot = LoopSlot::new(60, 64);
        slot.allocate();
        let file = PlaybackFile::new(Box::new(MemorySource::mono(samples, 48000)), "mem.wav");
        slot.start_playback(file).unwrap();
        slot
    }

    #[test]
    fn test_volume_clamped() {
        assert_eq!(clamp_volume(0.5), 0.5);
        assert_eq!(clamp_volume(3.0), 2.0);
        assert_eq!(clamp_volume(-1.0), 0.0);
        assert_eq!(clamp_volume(f32::NAN), 0.0);

        let mut slot = LoopSlot::new(1, 16);
        slot.set_volume(2.5);
        assert_eq!(slot.volume(), 2.0);
        slot.set_playback_speed(0.0);
        assert_eq!(slot.playback_speed(), 1.0);
    }

    #[test]
    fn test_start_playback_primes_cache() {
        let slot = playing_slot(vec![0.2; 100]);
        assert_eq!(slot.state(), LoopState::Playing);
        assert!(slot.is_audible());
        assert_eq!(slot.prefetch().valid_samples(), 64);
        assert_eq!(slot.playback_path(), Some(Path::new("mem.wav")));
    }

    #[test]
    fn test_direct_render_wraps() {
        let data: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let mut slot = playing_slot(data);
        let mut out = [0.0f32; 60];
        let mut scratch = [0.0f32; 256];

        assert!(!slot.render(LoopRead::Direct, 48000, &mut out, &mut scratch));
        assert_eq!(out[59], 59.0);
        assert!(slot.render(LoopRead::Direct, 48000, &mut out, &mut scratch));
        assert_eq!(out[0], 60.0);
        assert_eq!(out[40], 0.0);
        assert_eq!(slot.sample_position(), 20.0);
    }

    #[test]
    fn test_linear_render_consumes_scaled_frames() {
        let mut slot = playing_slot(vec![0.3; 1000]);
        let mut out = [0.0f32; 100];
        let mut scratch = [0.0f32; 400];

        slot.render(LoopRead::Linear { speed: 2.0 }, 48000, &mut out, &mut scratch);
        assert!(out.iter().all(|&s| s == 0.3));
        assert_eq!(slot.sample_position(), 50.0);
    }

    #[test]
    fn test_resume_resets_position() {
        let data: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let mut slot = playing_slot(data);
        let mut out = [0.0f32; 30];
        let mut scratch = [0.0f32; 64];
        slot.render(LoopRead::Direct, 48000, &mut out, &mut scratch);

        slot.stop();
        assert!(!slot.is_audible());
        slot.resume(0.0, false);
        assert!(slot.needs_audio_reset());
        assert_eq!(slot.sample_position(), 0.0);

        slot.render(LoopRead::Direct, 48000, &mut out, &mut scratch);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[29], 29.0);
        assert!(!slot.needs_audio_reset());
    }

    #[test]
    fn test_service_handles_reset_and_refill() {
        let data: Vec<f32> = (0..200).map(|i| i as f32).collect();
        let mut slot = playing_slot(data);
        let mut out = [0.0f32; 50];
        let mut scratch = [0.0f32; 64];

        slot.render(LoopRead::Direct, 48000, &mut out, &mut scratch);
        assert!(slot.prefetch().needs_refill());
        slot.service().unwrap();
        assert_eq!(slot.prefetch().read_position(), 0);
        assert_eq!(slot.prefetch().valid_samples(), 64);

        slot.stop();
        slot.resume(0.0, false);
        slot.service().unwrap();
        assert!(!slot.needs_audio_reset());
        slot.render(LoopRead::Direct, 48000, &mut out, &mut scratch);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[49], 49.0);
    }

    fn ramp_slot(len: usize, window: usize) -> LoopSlot {
        let data: Vec<f32> = (0..len).map(|i| i as f32).collect();
        let mut slot = LoopSlot::new(60, window);
        slot.allocate();
        let file = PlaybackFile::new(Box::new(MemorySource::mono(data, 48000)), "ramp.wav");
        slot.start_playback(file).unwrap();
        slot
    }

    #[test]
    fn test_leaving_timeline_resumes_at_playback_position() {
        let mut slot = ramp_slot(4000, 1024);
        let mut out = [0.0f32; 64];
        let mut scratch = [0.0f32; 256];

        slot.render(LoopRead::Direct, 48000, &mut out, &mut scratch);
        let shifted = LoopRead::Timeline {
            speed: 1.0,
            pitch_scale: semitones_to_scale(0.5),
        };
        slot.render(shifted, 48000, &mut out, &mut scratch);
        assert_relative_eq!(slot.sample_position(), 128.0, epsilon = 1e-6);
        // Pitch-scaled fetches run ahead of the playback position.
        assert!(out[63] > 128.0);

        slot.render(LoopRead::Direct, 48000, &mut out, &mut scratch);
        assert_eq!(out[0], 128.0);
        assert_eq!(out[63], 191.0);
        assert_relative_eq!(slot.sample_position(), 192.0, epsilon = 1e-6);

        slot.render(shifted, 48000, &mut out, &mut scratch);
        slot.render(LoopRead::Linear { speed: 2.0 }, 48000, &mut out, &mut scratch);
        assert_eq!(out[0], 256.0);
        assert_eq!(out[2], 257.0);
    }

    #[test]
    fn test_timeline_reads_request_refill() {
        let mut slot = ramp_slot(4000, 1024);
        let mut out = [0.0f32; 64];
        let mut scratch = [0.0f32; 256];
        let read = LoopRead::Timeline {
            speed: 1.5,
            pitch_scale: 1.0,
        };

        for _ in 0..10 {
            slot.render(read, 48000, &mut out, &mut scratch);
        }
        assert_relative_eq!(slot.sample_position(), 960.0, epsilon = 1e-6);
        assert!(slot.prefetch().needs_refill());

        slot.service().unwrap();
        assert!(!slot.prefetch().needs_refill());
        let file_position = slot.prefetch().file_position();

        // The topped-up window covers the next blocks without a fill.
        for _ in 0..10 {
            slot.render(read, 48000, &mut out, &mut scratch);
        }
        assert_eq!(slot.prefetch().file_position(), file_position);
        assert_eq!(out[63], 1918.0);
    }

    #[test]
    fn test_resume_at_position() {
        let mut slot = ramp_slot(500, 64);
        let mut out = [0.0f32; 8];
        let mut scratch = [0.0f32; 64];

        slot.stop();
        slot.resume(300.0, false);
        slot.render(LoopRead::Direct, 48000, &mut out, &mut scratch);
        assert_eq!(out[0], 300.0);
        assert_eq!(slot.sample_position(), 308.0);

        slot.stop();
        slot.resume(300.0, true);
        assert!(slot.is_pending_start());
        assert_eq!(slot.sample_position(), 0.0);
    }

    #[test]
    fn test_clear_deallocates() {
        let mut slot = playing_slot(vec![0.1; 10]);
        slot.set_volume(0.5);
        slot.clear();
        assert!(!slot.is_active());
        assert_eq!(slot.state(), LoopState::Idle);
        assert_eq!(slot.volume(), 1.0);
        assert!(slot.playback_path().is_none());
    }
}
