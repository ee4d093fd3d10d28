//! Looper facade: loop manager, mixer and recording bridge behind one
//! control surface and one RT callback.

use crate::bridge::{BridgeMetricsSnapshot, RecorderStatus, RtBridge, WorkerEvent};
use crate::control::{ControlAction, ControlEvent, SyncChange};
use crate::error::Result;
use crate::loops::{LoopManager, LoopState};
use crate::mixer::{Mixer, PlaybackParams, RenderStrategy};
use crate::time_stretch::{StretchParams, StretchStage, TimeStretchEngine};
use overdub_core::LooperConfig;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Multi-track looper.
///
/// [`process`](Self::process), [`handle_event`](Self::handle_event),
/// [`trigger`](Self::trigger) and the parameter setters are RT-safe: they
/// only flip state and enqueue messages for the worker. File work happens
/// in [`service`](Self::service), which a control thread calls between
/// callbacks to open finished recordings and refill prefetch windows.
///
/// ```ignore
/// let mut looper = Looper::builder()
///     .sample_rate(48000)
///     .recordings_dir("takes")
///     .build()?;
///
/// looper.trigger(60, 1.0)?;          // start recording
/// looper.process(256, Some(&input), Some(&mut output));
/// looper.trigger(60, 1.0)?;          // play it back
/// looper.service();                  // open the take once it is closed
/// ```
pub struct Looper {
    config: LooperConfig,
    loops: LoopManager,
    mixer: Mixer,
    bridge: RtBridge,
    params: PlaybackParams,
    reported: ControlReport,
}

/// Control settings as last logged by [`Looper::service`].
#[derive(Debug, Clone, Copy, PartialEq)]
struct ControlReport {
    params: PlaybackParams,
    master_volume: f32,
    sync_enabled: bool,
    sync_cutoff: f32,
    pulse: Option<u8>,
}

impl ControlReport {
    fn capture(params: PlaybackParams, loops: &LoopManager) -> Self {
        Self {
            params,
            master_volume: loops.master_volume(),
            sync_enabled: loops.sync_enabled(),
            sync_cutoff: loops.sync_cutoff(),
            pulse: loops.pulse_loop(),
        }
    }
}

impl Looper {
    pub fn builder() -> LooperBuilder {
        LooperBuilder::default()
    }

    pub fn new(config: LooperConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &LooperConfig {
        &self.config
    }

    /// RT callback for one period of `frames` samples.
    ///
    /// Missing input records silence. Missing output skips the callback.
    pub fn process(&mut self, frames: usize, input: Option<&[f32]>, output: Option<&mut [f32]>) {
        let Some(output) = output else {
            return;
        };
        let frames = frames.min(output.len());

        let input = input.map(|samples| &samples[..frames.min(samples.len())]);
        self.bridge.process_input(input, frames);

        let pulse_wrapped = self
            .mixer
            .process(&mut self.loops, &self.params, &mut output[..frames]);
        if pulse_wrapped {
            self.loops.release_held(&mut self.bridge);
        }
    }

    /// Apply a decoded MIDI event.
    pub fn handle_event(&mut self, event: ControlEvent) -> Result<()> {
        match event.action() {
            ControlAction::Trigger { note, volume } => {
                self.trigger(note, volume)?;
            }
            ControlAction::SetSpeed(speed) => self.set_speed(speed),
            ControlAction::SetPitch(semitones) => self.set_pitch(semitones),
            ControlAction::SetRecordPlayer(factor) => self.set_record_player(factor),
            ControlAction::SetMasterVolume(volume) => self.set_master_volume(volume),
            ControlAction::Sync(change) => self.set_sync(change),
            ControlAction::SetSyncCutoff(cutoff) => self.set_sync_cutoff(cutoff),
            ControlAction::Ignore => {}
        }
        Ok(())
    }

    /// Advance loop `note` through its state machine. A stopped recording
    /// starts playing once [`service`](Self::service) sees its file closed.
    pub fn trigger(&mut self, note: u8, volume: f32) -> Result<LoopState> {
        self.loops.trigger(note, volume, &mut self.bridge)
    }

    /// Trigger, recording into `path` when the loop is idle. Not RT-safe.
    pub fn trigger_with_file(
        &mut self,
        note: u8,
        volume: f32,
        path: impl AsRef<Path>,
    ) -> Result<LoopState> {
        self.loops
            .trigger_with_file(note, volume, path.as_ref(), &mut self.bridge)
    }

    /// Play an existing file in loop `note`.
    pub fn load_loop(&mut self, note: u8, path: impl AsRef<Path>) -> Result<()> {
        self.loops.load_loop(note, path.as_ref())
    }

    pub fn free_loop(&mut self, note: u8) -> Result<()> {
        self.loops.free_loop(note, &mut self.bridge)
    }

    /// Global speed. Leaves record-player mode and, when a stretch engine is
    /// installed, routes non-neutral settings through it.
    pub fn set_speed(&mut self, speed: f32) {
        self.params.speed = StretchParams::sanitize_speed(speed);
        self.params.record_player = None;
        self.enable_stretch_if_active();
    }

    /// Global pitch shift in semitones.
    pub fn set_pitch(&mut self, semitones: f32) {
        self.params.pitch_semitones = StretchParams::clamp_semitones(semitones);
        self.params.record_player = None;
        self.enable_stretch_if_active();
    }

    /// Tape-style varispeed: one factor for speed and pitch. 1.0 turns it off.
    pub fn set_record_player(&mut self, factor: f32) {
        let factor = StretchParams::sanitize_speed(factor);
        self.params.record_player = (factor != 1.0).then_some(factor);
        self.mixer.apply_params(&self.params);
    }

    pub fn set_time_stretch_enabled(&mut self, enabled: bool) {
        if enabled && !self.mixer.has_stretch_engine() {
            warn!("No time-stretch engine installed, using the timeline fallback");
        }
        self.params.stretch_enabled = enabled;
        self.mixer.apply_params(&self.params);
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.loops.set_master_volume(volume);
    }

    pub fn set_loop_volume(&mut self, note: u8, volume: f32) -> Result<()> {
        self.loops.set_loop_volume(note, volume)
    }

    pub fn set_loop_speed(&mut self, note: u8, speed: f32) -> Result<()> {
        self.loops.set_loop_speed(note, speed)
    }

    pub fn set_sync(&mut self, change: SyncChange) {
        let enabled = match change {
            SyncChange::Enable => true,
            SyncChange::Disable => false,
            SyncChange::Toggle => !self.loops.sync_enabled(),
        };
        self.loops.set_sync_enabled(enabled);
        if !enabled {
            // Nothing will wrap for held recordings any more.
            self.loops.release_held(&mut self.bridge);
        }
    }

    pub fn set_sync_cutoff(&mut self, cutoff: f32) {
        self.loops.set_sync_cutoff(cutoff);
    }

    /// Non-RT tick between callbacks: apply worker notifications, open
    /// finished recordings, refill prefetch windows and log control changes
    /// made since the last tick. Returns the notifications applied.
    pub fn service(&mut self) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.bridge.poll_event() {
            self.loops.apply_event(&event);
            events.push(event);
        }
        self.loops.service();
        self.report_changes();
        events
    }

    /// Non-RT: run [`service`](Self::service) until every stopped recording
    /// is playable or `stop_timeout_ms` passes. Returns false on timeout.
    pub fn wait_for_recordings(&mut self) -> bool {
        let deadline = Instant::now() + self.config.stop_timeout();
        loop {
            self.service();
            if !self.loops.has_pending_open() {
                return true;
            }
            if Instant::now() >= deadline {
                warn!("Recordings still closing after {} ms", self.config.stop_timeout_ms);
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Stop the worker, finalizing open recordings.
    pub fn shutdown(&mut self) {
        self.bridge.shutdown();
    }

    pub fn loops(&self) -> &LoopManager {
        &self.loops
    }

    pub fn loop_state(&self, note: u8) -> LoopState {
        self.loops.state(note)
    }

    pub fn params(&self) -> PlaybackParams {
        self.params
    }

    /// Strategy used by the most recent callback.
    pub fn strategy(&self) -> RenderStrategy {
        self.mixer.strategy()
    }

    pub fn is_recording(&self) -> bool {
        self.bridge.is_recording_enabled()
    }

    pub fn current_filename(&self) -> Option<PathBuf> {
        self.bridge.current_filename()
    }

    pub fn metrics(&self) -> BridgeMetricsSnapshot {
        self.bridge.metrics()
    }

    /// Recording status handle for other threads.
    pub fn status(&self) -> RecorderStatus {
        self.bridge.status()
    }

    fn report_changes(&mut self) {
        let now = ControlReport::capture(self.params, &self.loops);
        if now == self.reported {
            return;
        }
        let before = std::mem::replace(&mut self.reported, now);

        if now.params != before.params {
            match now.params.record_player {
                Some(factor) => info!("Record player {:.2}x", factor),
                None => info!(
                    "Speed {:.2}x, pitch {:+.2} semitones, time stretch {}",
                    now.params.speed,
                    now.params.pitch_semitones,
                    if now.params.stretch_enabled { "on" } else { "off" }
                ),
            }
        }
        if now.master_volume != before.master_volume {
            info!("Master volume {:.2}", now.master_volume);
        }
        if now.sync_enabled != before.sync_enabled || now.sync_cutoff != before.sync_cutoff {
            info!(
                "Sync {}, cutoff {:.0}%",
                if now.sync_enabled { "on" } else { "off" },
                now.sync_cutoff * 100.0
            );
        }
        if now.pulse != before.pulse {
            match now.pulse {
                Some(note) => info!("Loop {} is the sync pulse", note),
                None => info!("No sync pulse"),
            }
        }
    }

    fn enable_stretch_if_active(&mut self) {
        if self.mixer.has_stretch_engine() && !self.params.is_neutral() {
            self.params.stretch_enabled = true;
        }
        self.mixer.apply_params(&self.params);
    }
}

/// Builder for [`Looper`].
#[derive(Default)]
pub struct LooperBuilder {
    config: LooperConfig,
    engine: Option<Box<dyn TimeStretchEngine>>,
}

impl LooperBuilder {
    pub fn config(mut self, config: LooperConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.config.sample_rate = sample_rate;
        self
    }

    pub fn max_block_frames(mut self, frames: usize) -> Self {
        self.config.max_block_frames = frames;
        self
    }

    pub fn recordings_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.recordings_dir = dir.into();
        self
    }

    /// Install a time-stretch engine for the mixed output.
    pub fn stretch_engine(mut self, engine: Box<dyn TimeStretchEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Install the signalsmith-stretch engine, sized from the current
    /// configuration.
    #[cfg(feature = "signalsmith")]
    pub fn signalsmith(self) -> Result<Self> {
        let engine = crate::time_stretch::SignalsmithEngine::new(
            self.config.sample_rate,
            self.config.stretch_chunk_frames,
        )?;
        Ok(self.stretch_engine(Box::new(engine)))
    }

    /// Validate the configuration and start the worker thread.
    pub fn build(self) -> Result<Looper> {
        self.config.validate()?;

        let bridge = RtBridge::new(&self.config)?;
        let stage = self
            .engine
            .map(|engine| StretchStage::new(engine, self.config.stretch_chunk_frames));
        let mixer = Mixer::new(&self.config, stage);
        let loops = LoopManager::new(&self.config);
        let params = PlaybackParams::default();

        info!(
            "Looper ready: {} Hz, {} frame blocks, time stretch {}",
            self.config.sample_rate,
            self.config.max_block_frames,
            if mixer.has_stretch_engine() { "on" } else { "off" }
        );

        let reported = ControlReport::capture(params, &loops);

        Ok(Looper {
            config: self.config,
            loops,
            mixer,
            bridge,
            params,
            reported,
        })
    }
}
