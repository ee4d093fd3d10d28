//! RT/non-RT bridge: hands recorded input and control messages from the audio
//! callback to a background worker that owns all recording file I/O.
//!
//! ```text
//!  audio callback                         worker thread
//!  ──────────────                         ─────────────
//!  process_input ──► RingBuffer<f32> ───► drain → Take::write_block
//!  start / stop  ──► MessageQueue    ───► open / stop_at / finalize
//!                ◄── crossbeam events ◄── RecordingStarted / Finished
//! ```
//!
//! Start and stop messages carry the stream index of the first/last recorded
//! sample, so several loops can record overlapping spans of the same input.

mod capture;
mod filename;
mod message;
mod metrics;
mod worker;

pub use filename::{recording_path, recording_path_now};
pub use message::{RecordingPath, RecordingSpec, RtErrorCode, RtMessage, MAX_PATH_BYTES};
pub use metrics::{calculate_rms, BridgeMetrics, BridgeMetricsSnapshot};

use crate::error::{Error, Result};
use crossbeam_channel::Receiver;
use overdub_core::{
    AtomicFlag, LooperConfig, MessageQueue, MessageSender, RingBuffer, RingProducer, MAX_LOOPS,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use worker::{WorkerContext, WorkerThread};

/// Samples the worker moves from the ring per drain step.
const WORKER_CHUNK_SAMPLES: usize = 4096;

/// Starts and stops recordings for loop slots.
///
/// Both calls are a single enqueue attempt and never wait for the worker;
/// the outcome arrives later as a [`WorkerEvent`]. A call that returns an
/// error changed nothing. The loop state machine talks to recording through
/// this seam so it can be driven without a worker thread.
pub trait Recorder {
    /// Begin recording `slot`, into `path` or into a generated file when
    /// `path` is `None`.
    fn start(&mut self, slot: u8, path: Option<&Path>, spec: RecordingSpec) -> Result<()>;

    /// Stop recording `slot` at the current input position.
    fn stop(&mut self, slot: u8) -> Result<()>;
}

/// Notifications from the worker back to the control side.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    RecordingStarted {
        slot: u8,
        path: PathBuf,
    },
    RecordingFailed {
        slot: u8,
        reason: String,
    },
    RecordingFinished {
        slot: u8,
        frames_written: u64,
        path: Option<PathBuf>,
    },
}

impl WorkerEvent {
    pub fn slot(&self) -> u8 {
        match *self {
            WorkerEvent::RecordingStarted { slot, .. }
            | WorkerEvent::RecordingFailed { slot, .. }
            | WorkerEvent::RecordingFinished { slot, .. } => slot,
        }
    }
}

/// State shared between the bridge, the worker and status observers.
#[derive(Default)]
pub(crate) struct BridgeShared {
    metrics: BridgeMetrics,
    /// Gate read by the callback before pushing input into the ring.
    recording_enabled: AtomicFlag,
    current_filename: Mutex<Option<PathBuf>>,
    active_takes: AtomicUsize,
}

/// Cloneable read-only view of the bridge for other threads (UI, logging).
#[derive(Clone)]
pub struct RecorderStatus {
    shared: Arc<BridgeShared>,
}

impl RecorderStatus {
    /// Whether the callback is currently feeding input to the worker.
    pub fn is_recording(&self) -> bool {
        self.shared.recording_enabled.get()
    }

    /// Most recently opened recording file.
    pub fn current_filename(&self) -> Option<PathBuf> {
        self.shared.current_filename.lock().clone()
    }

    /// Recordings the worker currently has open.
    pub fn open_recordings(&self) -> usize {
        self.shared.active_takes.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> BridgeMetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

/// Owner of the ring buffer, the message queue and the worker thread.
pub struct RtBridge {
    audio: RingProducer<f32>,
    messages: MessageSender<RtMessage>,
    events: Receiver<WorkerEvent>,
    shared: Arc<BridgeShared>,
    worker: Option<WorkerThread>,
    /// False once shut down; start and stop are refused from then on.
    accepting: bool,
    silence: Vec<f32>,
    samples_pushed: u64,
    /// Bit `n` is set while slot `n` has a start the worker has accepted
    /// and no stop yet.
    recording_slots: u128,
    callbacks_since_level: u32,
    level_report_interval: u32,
    level_threshold: f32,
    overrun_report_interval: u64,
    control_retry_attempts: u32,
}

impl RtBridge {
    /// Allocate the queues and spawn the worker.
    pub fn new(config: &LooperConfig) -> Result<Self> {
        config.validate()?;

        let (audio, audio_rx) = RingBuffer::with_capacity::<f32>(config.ring_buffer_frames);
        let (messages, message_rx) =
            MessageQueue::with_capacity::<RtMessage>(config.message_queue_len);
        let (event_tx, events) = crossbeam_channel::unbounded();
        let shared = Arc::new(BridgeShared::default());

        let worker = WorkerThread::spawn(WorkerContext {
            messages: message_rx,
            audio: audio_rx,
            events: event_tx,
            shared: Arc::clone(&shared),
            recordings_dir: config.recordings_dir.clone(),
            sync_interval: config.sync_interval(),
            chunk_samples: WORKER_CHUNK_SAMPLES,
        })?;

        Ok(Self::assemble(
            config,
            audio,
            messages,
            events,
            shared,
            Some(worker),
        ))
    }

    fn assemble(
        config: &LooperConfig,
        audio: RingProducer<f32>,
        messages: MessageSender<RtMessage>,
        events: Receiver<WorkerEvent>,
        shared: Arc<BridgeShared>,
        worker: Option<WorkerThread>,
    ) -> Self {
        Self {
            audio,
            messages,
            events,
            shared,
            worker,
            accepting: true,
            silence: vec![0.0; config.max_block_frames],
            samples_pushed: 0,
            recording_slots: 0,
            callbacks_since_level: 0,
            level_report_interval: config.level_report_interval.max(1),
            level_threshold: config.level_threshold,
            overrun_report_interval: u64::from(config.overrun_report_interval.max(1)),
            control_retry_attempts: config.control_retry_attempts.max(1),
        }
    }

    /// RT: forward one callback's input to the worker while recording.
    ///
    /// `None` input records `frames` samples of silence. Never blocks or
    /// allocates; a full ring counts an overrun and drops the remainder.
    pub fn process_input(&mut self, input: Option<&[f32]>, frames: usize) {
        if !self.shared.recording_enabled.get() {
            return;
        }

        let (requested, written) = match input {
            Some(samples) => (samples.len(), self.audio.write(samples)),
            None => {
                let mut written = 0;
                let mut remaining = frames;
                while remaining > 0 {
                    let len = remaining.min(self.silence.len());
                    let count = self.audio.write(&self.silence[..len]);
                    written += count;
                    remaining -= len;
                    if count < len {
                        break;
                    }
                }
                (frames, written)
            }
        };
        self.samples_pushed += written as u64;

        if written < requested {
            let overruns = self.shared.metrics.record_overrun();
            if (overruns - 1) % self.overrun_report_interval == 0 {
                self.send_rt(RtMessage::Error {
                    code: RtErrorCode::BufferOverrun,
                });
            }
        }

        self.callbacks_since_level += 1;
        if self.callbacks_since_level >= self.level_report_interval {
            self.callbacks_since_level = 0;
            if let Some(samples) = input {
                let rms = calculate_rms(samples);
                if rms > self.level_threshold {
                    self.send_rt(RtMessage::Level { rms });
                }
            }
        }
    }

    /// Whether the callback is currently feeding input to the worker.
    pub fn is_recording_enabled(&self) -> bool {
        self.shared.recording_enabled.get()
    }

    /// Whether `slot` has an accepted start and no stop yet.
    pub fn is_slot_recording(&self, slot: u8) -> bool {
        self.recording_slots & slot_bit(slot) != 0
    }

    /// Total samples pushed into the ring so far.
    pub fn samples_pushed(&self) -> u64 {
        self.samples_pushed
    }

    pub fn current_filename(&self) -> Option<PathBuf> {
        self.shared.current_filename.lock().clone()
    }

    pub fn metrics(&self) -> BridgeMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn status(&self) -> RecorderStatus {
        RecorderStatus {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Take the next worker notification, if any. Non-RT.
    pub fn poll_event(&mut self) -> Option<WorkerEvent> {
        let event = self.events.try_recv().ok()?;
        self.observe(&event);
        Some(event)
    }

    /// Wait up to `timeout` for the next worker notification. Non-RT.
    pub fn wait_event(&mut self, timeout: Duration) -> Option<WorkerEvent> {
        let event = self.events.recv_timeout(timeout).ok()?;
        self.observe(&event);
        Some(event)
    }

    /// Stop the worker: enqueue shutdown, then join. Open recordings are
    /// flushed and finalized first. Idempotent.
    pub fn shutdown(&mut self) {
        self.accepting = false;
        let Some(mut worker) = self.worker.take() else {
            return;
        };

        self.recording_slots = 0;
        self.shared.recording_enabled.set(false);
        if let Err(e) = self.send_control(RtMessage::Shutdown) {
            warn!("{}; stopping worker by flag", e);
        }
        worker.stop();
    }

    /// A start the worker could not open never records.
    fn observe(&mut self, event: &WorkerEvent) {
        if let WorkerEvent::RecordingFailed { slot, .. } = *event {
            self.set_slot_recording(slot, false);
        }
    }

    fn set_slot_recording(&mut self, slot: u8, recording: bool) {
        if recording {
            self.recording_slots |= slot_bit(slot);
        } else {
            self.recording_slots &= !slot_bit(slot);
        }
        self.shared
            .recording_enabled
            .set(self.recording_slots != 0);
    }

    fn ensure_accepting(&self, slot: u8) -> Result<()> {
        if usize::from(slot) >= MAX_LOOPS {
            return Err(Error::InvalidNote(slot));
        }
        if !self.accepting {
            return Err(Error::Worker("worker is not running".into()));
        }
        Ok(())
    }

    /// RT-safe single attempt. Dropped messages are counted.
    fn send_rt(&mut self, message: RtMessage) -> bool {
        let sent = self.messages.push(message);
        if !sent {
            self.shared.metrics.record_dropped_message();
        }
        sent
    }

    /// Non-RT: retry a message the worker must see before giving up.
    fn send_control(&mut self, message: RtMessage) -> Result<()> {
        for attempt in 0..self.control_retry_attempts {
            if self.messages.push(message) {
                return Ok(());
            }
            debug!("Message queue full, retrying {} ({})", message.kind(), attempt + 1);
            thread::sleep(Duration::from_millis(1));
        }
        self.shared.metrics.record_dropped_message();
        Err(Error::QueueFull(message.kind()))
    }
}

#[inline]
fn slot_bit(slot: u8) -> u128 {
    1u128.checked_shl(u32::from(slot)).unwrap_or(0)
}

impl Recorder for RtBridge {
    fn start(&mut self, slot: u8, path: Option<&Path>, spec: RecordingSpec) -> Result<()> {
        self.ensure_accepting(slot)?;

        let message = RtMessage::StartRecording {
            slot,
            path: path.map(RecordingPath::new).transpose()?,
            spec,
            at_frame: self.samples_pushed,
        };
        if !self.send_rt(message) {
            return Err(Error::QueueFull(message.kind()));
        }

        // Only after the worker is guaranteed to see the start.
        self.set_slot_recording(slot, true);
        Ok(())
    }

    fn stop(&mut self, slot: u8) -> Result<()> {
        self.ensure_accepting(slot)?;

        let message = RtMessage::StopRecording {
            slot,
            at_frame: self.samples_pushed,
        };
        if !self.send_rt(message) {
            return Err(Error::QueueFull(message.kind()));
        }

        self.set_slot_recording(slot, false);
        Ok(())
    }
}

impl Drop for RtBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
