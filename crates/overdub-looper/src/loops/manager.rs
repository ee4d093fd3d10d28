//! Loop manager: owns every slot and drives the per-slot state machine.
//!
//! Triggers only flip slot state and enqueue start/stop messages, so they
//! are safe to call from the audio callback. Files are opened when the
//! worker reports a recording closed, through [`LoopManager::apply_event`]
//! on the non-RT side.

use super::slot::{clamp_volume, LoopSlot, PlaybackFile, RecordingFile};
use super::state::LoopState;
use crate::bridge::{Recorder, RecordingSpec, WorkerEvent};
use crate::error::{Error, Result};
use crate::source::{AudioSource, FittedSource, WavSource};
use overdub_core::{LooperConfig, MAX_LOOPS};
use std::path::Path;
use tracing::{debug, info, warn};

/// Owner of the slot array, master volume, current slot and pulse loop.
pub struct LoopManager {
    slots: Vec<LoopSlot>,
    num_active: usize,
    master_volume: f32,
    current: Option<u8>,
    sample_rate: u32,
    sync_enabled: bool,
    sync_cutoff: f32,
    pulse: Option<u8>,
}

/// Where a synced start begins.
enum SyncedStart {
    /// No pulse to follow: from the top, now.
    Free,
    /// Join the running pulse at this position.
    Join(f64),
    /// Past the cutoff: from the top once the pulse wraps.
    Wait,
}

impl LoopManager {
    pub fn new(config: &LooperConfig) -> Self {
        let slots = (0..MAX_LOOPS)
            .map(|note| LoopSlot::new(note as u8, config.prefetch_frames))
            .collect();

        Self {
            slots,
            num_active: 0,
            master_volume: 1.0,
            current: None,
            sample_rate: config.sample_rate,
            sync_enabled: false,
            sync_cutoff: config.sync_cutoff.clamp(0.0, 1.0),
            pulse: None,
        }
    }

    pub fn slot(&self, note: u8) -> Option<&LoopSlot> {
        self.slots.get(usize::from(note))
    }

    /// Every slot, in note order.
    pub fn slots(&self) -> &[LoopSlot] {
        &self.slots
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [LoopSlot] {
        &mut self.slots
    }

    pub fn state(&self, note: u8) -> LoopState {
        self.slot(note).map_or(LoopState::Idle, LoopSlot::state)
    }

    pub fn num_active_loops(&self) -> usize {
        self.num_active
    }

    /// Slots currently contributing to the mix.
    pub fn num_playing_loops(&self) -> usize {
        self.slots.iter().filter(|s| s.is_audible()).count()
    }

    /// Most recently triggered slot.
    pub fn current_loop(&self) -> Option<u8> {
        self.current
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = clamp_volume(volume);
    }

    pub fn sync_enabled(&self) -> bool {
        self.sync_enabled
    }

    /// Turn pulse quantization on or off. Disabling releases held starts;
    /// held recordings move on the next [`release_held`](Self::release_held).
    pub fn set_sync_enabled(&mut self, enabled: bool) {
        if enabled == self.sync_enabled {
            return;
        }
        self.sync_enabled = enabled;
        if enabled {
            self.pulse = self
                .slots
                .iter()
                .find(|s| s.is_audible())
                .map(LoopSlot::note);
        } else {
            self.pulse = None;
            self.release_pending();
        }
    }

    pub fn sync_cutoff(&self) -> f32 {
        self.sync_cutoff
    }

    /// Fraction of the pulse loop up to which a synced start joins the
    /// running pulse instead of waiting for its next wrap.
    pub fn set_sync_cutoff(&mut self, cutoff: f32) {
        self.sync_cutoff = if cutoff.is_nan() {
            0.5
        } else {
            cutoff.clamp(0.0, 1.0)
        };
    }

    /// Loop whose wraparound releases held starts, recordings and stops.
    pub fn pulse_loop(&self) -> Option<u8> {
        self.pulse
    }

    /// Length of the pulse loop in frames, once it has audio.
    pub fn pulse_frames(&self) -> Option<u64> {
        self.pulse
            .and_then(|pulse| self.slot(pulse))
            .and_then(LoopSlot::loop_frames)
            .filter(|&frames| frames > 0)
    }

    /// Any stopped recording still waiting for the worker to close its file.
    pub fn has_pending_open(&self) -> bool {
        self.slots.iter().any(LoopSlot::is_pending_open)
    }

    pub fn set_loop_volume(&mut self, note: u8, volume: f32) -> Result<()> {
        self.slot_mut(note)?.set_volume(volume);
        Ok(())
    }

    pub fn set_loop_speed(&mut self, note: u8, speed: f32) -> Result<()> {
        self.slot_mut(note)?.set_playback_speed(speed);
        Ok(())
    }

    /// Advance `note` through its state machine. `volume` is applied before
    /// the transition. RT-safe: never blocks, allocates or touches files.
    ///
    /// A start or stop the recorder cannot enqueue is an error and leaves
    /// the slot as it was.
    pub fn trigger(
        &mut self,
        note: u8,
        volume: f32,
        recorder: &mut dyn Recorder,
    ) -> Result<LoopState> {
        self.slot_mut(note)?.set_volume(volume);
        self.transition(note, None, recorder)
    }

    /// Like [`trigger`](Self::trigger), recording into `path` when leaving
    /// Idle. Not RT-safe: the path is copied.
    pub fn trigger_with_file(
        &mut self,
        note: u8,
        volume: f32,
        path: &Path,
        recorder: &mut dyn Recorder,
    ) -> Result<LoopState> {
        self.slot_mut(note)?.set_volume(volume);
        self.transition(note, Some(path), recorder)
    }

    /// Open an existing file straight into Playing.
    pub fn load_loop(&mut self, note: u8, path: &Path) -> Result<()> {
        self.slot_mut(note)?;
        let source = WavSource::open(path)?;
        self.install_playback(note, PlaybackFile::new(Box::new(source), path))?;
        info!("Loaded {} into loop {}", path.display(), note);
        Ok(())
    }

    /// Put an already opened source into `note` and start playing it.
    pub fn install_playback(&mut self, note: u8, file: PlaybackFile) -> Result<()> {
        let slot = self.slot_mut(note)?;
        if slot.state().is_recording() || slot.is_pending_open() {
            return Err(Error::Recording(format!(
                "loop {} is recording, cannot load {}",
                note,
                file.path().display()
            )));
        }

        self.allocate(note);
        let slot = &mut self.slots[usize::from(note)];
        if let Err(e) = slot.start_playback(file) {
            slot.fall_back_to_idle();
            return Err(e);
        }

        self.current = Some(note);
        self.claim_pulse(note);
        Ok(())
    }

    /// Close any open files and return the slot to unallocated Idle.
    pub fn free_loop(&mut self, note: u8, recorder: &mut dyn Recorder) -> Result<()> {
        let slot = self.slot_mut(note)?;
        if !slot.is_active() {
            return Ok(());
        }

        if slot.is_recording_enabled() {
            if let Err(e) = recorder.stop(note) {
                warn!("Loop {} recording did not close cleanly: {}", note, e);
            }
        }
        self.slots[usize::from(note)].clear();
        self.num_active -= 1;

        if self.pulse == Some(note) {
            self.pulse = None;
            self.release_held(recorder);
        }
        if self.current == Some(note) {
            self.current = self
                .slots
                .iter()
                .find(|s| s.is_active())
                .map(LoopSlot::note);
        }

        info!("Freed loop {} ({} active)", note, self.num_active);
        Ok(())
    }

    /// Start every loop held back by sync mode.
    pub fn release_pending(&mut self) {
        for slot in self.slots.iter_mut().filter(|s| s.is_pending_start()) {
            slot.release_pending();
        }
    }

    /// Pulse wrap: release held starts, stop held recordings, then start
    /// held recordings. A message the recorder cannot take stays held until
    /// the next wrap. RT-safe.
    pub fn release_held(&mut self, recorder: &mut dyn Recorder) {
        self.release_pending();

        for slot in self.slots.iter_mut() {
            if slot.is_pending_stop()
                && !slot.is_pending_record()
                && recorder.stop(slot.note()).is_ok()
            {
                slot.finish_capture();
            }
        }

        let spec = RecordingSpec::mono(self.sample_rate);
        for slot in self.slots.iter_mut() {
            if slot.is_pending_record()
                && recorder.start(slot.note(), slot.recording_path(), spec).is_ok()
            {
                slot.recording_started();
            }
        }
    }

    /// Non-RT: apply a worker notification. A finished recording is opened,
    /// fitted to the pulse in sync mode and primed for playback.
    pub fn apply_event(&mut self, event: &WorkerEvent) {
        let Some(slot) = self.slots.get_mut(usize::from(event.slot())) else {
            return;
        };

        match event {
            WorkerEvent::RecordingStarted { slot: note, path } => {
                info!("Loop {} recording to {}", note, path.display());
                slot.set_recording_path(path.clone());
            }
            WorkerEvent::RecordingFailed { slot: note, reason } => {
                warn!("Loop {} recording failed: {}", note, reason);
                if slot.state().is_recording() || slot.is_pending_open() {
                    slot.fall_back_to_idle();
                }
            }
            WorkerEvent::RecordingFinished {
                slot: note,
                frames_written,
                path,
            } => self.open_recorded(*note, *frames_written, path.as_deref()),
        }
    }

    /// Non-RT tick: apply pending audio resets and refill prefetch windows
    /// before the callback runs dry.
    pub fn service(&mut self) {
        for slot in self.slots.iter_mut().filter(|s| s.is_active()) {
            if let Err(e) = slot.service() {
                warn!("Loop {} prefetch refill failed: {}", slot.note(), e);
            }
        }
    }

    fn slot_mut(&mut self, note: u8) -> Result<&mut LoopSlot> {
        self.slots
            .get_mut(usize::from(note))
            .ok_or(Error::InvalidNote(note))
    }

    fn allocate(&mut self, note: u8) {
        if self.slots[usize::from(note)].allocate() {
            self.num_active += 1;
        }
    }

    fn transition(
        &mut self,
        note: u8,
        file: Option<&Path>,
        recorder: &mut dyn Recorder,
    ) -> Result<LoopState> {
        let from = self.slot_mut(note)?.state();
        self.current = Some(note);

        match from {
            LoopState::Idle => self.start_recording(note, file, recorder),
            LoopState::Recording => self.stop_recording(note, recorder),
            LoopState::Playing => {
                self.slots[usize::from(note)].stop();
                Ok(LoopState::Stopped)
            }
            LoopState::Stopped => Ok(self.resume(note)),
        }
    }

    /// Idle → Recording. Held until the pulse wraps while a pulse loop
    /// plays in sync mode.
    fn start_recording(
        &mut self,
        note: u8,
        file: Option<&Path>,
        recorder: &mut dyn Recorder,
    ) -> Result<LoopState> {
        let spec = RecordingSpec::mono(self.sample_rate);
        let held = self.running_pulse(note).is_some();
        if !held {
            recorder.start(note, file, spec)?;
        }

        self.allocate(note);
        let recording = RecordingFile {
            path: file.map(Path::to_path_buf),
            spec,
        };
        self.slots[usize::from(note)].begin_recording(recording, held);
        Ok(LoopState::Recording)
    }

    /// Recording → Playing. The slot stays silent until the worker reports
    /// the file closed. In sync mode the stop waits for the pulse wrap.
    fn stop_recording(&mut self, note: u8, recorder: &mut dyn Recorder) -> Result<LoopState> {
        let quantize = self.running_pulse(note).is_some();
        let slot = &mut self.slots[usize::from(note)];

        if quantize {
            slot.mark_pending_stop();
            return Ok(LoopState::Recording);
        }
        if slot.is_pending_record() {
            // The pulse went away before the recording ever started.
            slot.fall_back_to_idle();
            return Ok(LoopState::Idle);
        }

        recorder.stop(note)?;
        slot.finish_capture();
        Ok(LoopState::Playing)
    }

    fn resume(&mut self, note: u8) -> LoopState {
        let start = self.synced_start(note);
        let slot = &mut self.slots[usize::from(note)];
        match start {
            SyncedStart::Free => {
                slot.resume(0.0, false);
                self.claim_pulse(note);
            }
            SyncedStart::Join(position) => slot.resume(position, false),
            SyncedStart::Wait => slot.resume(0.0, true),
        }
        LoopState::Playing
    }

    /// Position and length of the audible pulse loop, when `note` should
    /// follow it.
    fn running_pulse(&self, note: u8) -> Option<(f64, u64)> {
        if !self.sync_enabled {
            return None;
        }
        let pulse = self.pulse.filter(|&pulse| pulse != note)?;
        let slot = self.slot(pulse).filter(|s| s.is_audible())?;
        let frames = slot.loop_frames().filter(|&frames| frames > 0)?;
        Some((slot.sample_position(), frames))
    }

    fn synced_start(&self, note: u8) -> SyncedStart {
        let Some((position, pulse_frames)) = self.running_pulse(note) else {
            return SyncedStart::Free;
        };
        if position > f64::from(self.sync_cutoff) * pulse_frames as f64 {
            return SyncedStart::Wait;
        }

        let own_frames = self.slots[usize::from(note)]
            .loop_frames()
            .filter(|&frames| frames > 0);
        SyncedStart::Join(own_frames.map_or(0.0, |frames| position % frames as f64))
    }

    fn claim_pulse(&mut self, note: u8) {
        if self.sync_enabled && self.pulse.is_none() {
            self.pulse = Some(note);
        }
    }

    /// Loop length for a recording of `frames` in sync mode: the nearest
    /// whole number of pulses, at least one.
    fn pulse_fitted_length(&self, note: u8, frames: u64) -> Option<u64> {
        if !self.sync_enabled || self.pulse == Some(note) {
            return None;
        }
        let pulse = self.pulse_frames()?;
        let multiple = ((frames + pulse / 2) / pulse).max(1);
        Some(multiple * pulse)
    }

    fn open_recorded(&mut self, note: u8, frames_written: u64, path: Option<&Path>) {
        let slot = &mut self.slots[usize::from(note)];
        if !slot.is_pending_open() {
            debug!("Loop {} is not waiting for a recording, ignoring close", note);
            return;
        }
        slot.take_recording();

        let Some(path) = path.filter(|_| frames_written > 0) else {
            warn!("Loop {} recorded no audio, back to idle", note);
            slot.fall_back_to_idle();
            return;
        };

        let source = match WavSource::open(path) {
            Ok(source) => source,
            Err(e) => {
                warn!("Loop {} cannot play {}: {}", note, path.display(), e);
                slot.fall_back_to_idle();
                return;
            }
        };
        let frames = source.info().frames;
        let mut source: Box<dyn AudioSource> = Box::new(source);
        if let Some(fitted) = self.pulse_fitted_length(note, frames) {
            if fitted != frames {
                info!(
                    "Loop {} fitted to the pulse: {} -> {} frames",
                    note, frames, fitted
                );
                source = Box::new(FittedSource::new(source, fitted));
            }
        }

        let slot = &mut self.slots[usize::from(note)];
        if let Err(e) = slot.attach(PlaybackFile::new(source, path)) {
            warn!("Loop {} cannot play {}: {}", note, path.display(), e);
            slot.fall_back_to_idle();
            return;
        }
        info!("Loop {} ready: {} frames from {}", note, frames, path.display());

        if !self.slots[usize::from(note)].is_audible() {
            return;
        }
        match self.synced_start(note) {
            SyncedStart::Free => self.claim_pulse(note),
            SyncedStart::Join(position) => self.slots[usize::from(note)].resume(position, false),
            SyncedStart::Wait => self.slots[usize::from(note)].resume(0.0, true),
        }
    }
}
