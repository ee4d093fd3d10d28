//! Worker thread: applies control messages and streams recorded input to disk.

use super::capture::Take;
use super::filename::recording_path_now;
use super::message::RtMessage;
use super::{BridgeShared, WorkerEvent};
use crate::error::Result;
use crossbeam_channel::Sender;
use overdub_core::{MessageReceiver, RingConsumer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thread_priority::ThreadPriority;
use tracing::{debug, info, warn};

/// Everything the worker owns.
pub(super) struct WorkerContext {
    pub messages: MessageReceiver<RtMessage>,
    pub audio: RingConsumer<f32>,
    pub events: Sender<WorkerEvent>,
    pub shared: Arc<BridgeShared>,
    /// Where takes without an explicit path are created.
    pub recordings_dir: PathBuf,
    pub sync_interval: u64,
    pub chunk_samples: usize,
}

/// Handle to the running worker.
pub(super) struct WorkerThread {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerThread {
    pub fn spawn(context: WorkerContext) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("overdub-worker".into())
            .spawn(move || {
                if let Err(e) = thread_priority::set_current_thread_priority(ThreadPriority::Max) {
                    debug!("Could not raise worker priority: {:?}", e);
                }
                worker_loop(context, &flag);
            })?;

        Ok(Self {
            handle: Some(handle),
            shutdown,
        })
    }

    /// Set the shutdown flag and join. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Recording worker panicked");
            }
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WorkerState {
    takes: Vec<Take>,
    scratch: Vec<f32>,
    /// Stream index of the next sample to be read from the ring.
    consumed: u64,
    running: bool,
}

fn worker_loop(mut context: WorkerContext, shutdown: &AtomicBool) {
    info!("Recording worker started");

    let mut state = WorkerState {
        takes: Vec::new(),
        scratch: vec![0.0; context.chunk_samples.max(1)],
        consumed: 0,
        running: true,
    };

    loop {
        process_messages(&mut context, &mut state);
        let drained = drain_audio(&mut context, &mut state);
        finish_completed(&context, &mut state);

        if !state.running || shutdown.load(Ordering::SeqCst) {
            while drain_audio(&mut context, &mut state) > 0 {}
            close_all(&context, &mut state);
            break;
        }

        if drained == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }

    info!("Recording worker stopped");
}

fn process_messages(context: &mut WorkerContext, state: &mut WorkerState) {
    while state.running {
        let Some(message) = context.messages.pop() else {
            break;
        };
        handle_message(message, context, state);
    }
}

fn handle_message(message: RtMessage, context: &WorkerContext, state: &mut WorkerState) {
    match message {
        RtMessage::StartRecording {
            slot,
            path,
            spec,
            at_frame,
        } => {
            if let Some(index) = state.takes.iter().position(|t| t.slot == slot) {
                let take = state.takes.swap_remove(index);
                warn!("Loop {} was still recording, closing {}", slot, take.path.display());
                finish_take(context, take);
            }

            let path = match path {
                Some(path) => path.to_path_buf(),
                None => recording_path_now(&context.recordings_dir, slot),
            };
            match Take::open(slot, path.clone(), spec, at_frame) {
                Ok(take) => {
                    info!("Recording loop {} to {}", slot, path.display());
                    *context.shared.current_filename.lock() = Some(path.clone());
                    state.takes.push(take);
                    let _ = context
                        .events
                        .send(WorkerEvent::RecordingStarted { slot, path });
                }
                Err(e) => {
                    warn!("Failed to open {} for loop {}: {}", path.display(), slot, e);
                    let _ = context.events.send(WorkerEvent::RecordingFailed {
                        slot,
                        reason: e.to_string(),
                    });
                }
            }
            context
                .shared
                .active_takes
                .store(state.takes.len(), Ordering::Relaxed);
        }
        RtMessage::StopRecording { slot, at_frame } => {
            match state.takes.iter_mut().find(|t| t.slot == slot) {
                Some(take) => {
                    debug!("Loop {} stops at sample {}", slot, at_frame);
                    take.stop_at(at_frame);
                }
                None => {
                    debug!("Stop for loop {} with no open recording", slot);
                    let _ = context.events.send(WorkerEvent::RecordingFinished {
                        slot,
                        frames_written: 0,
                        path: None,
                    });
                }
            }
        }
        RtMessage::Level { rms } => {
            debug!("Input level {:.4}", rms);
            context.shared.metrics.record_level(rms);
        }
        RtMessage::Error { code } => {
            let snapshot = context.shared.metrics.snapshot();
            warn!(
                "RT error {:?} (overruns: {}, dropped messages: {})",
                code, snapshot.overruns, snapshot.dropped_messages
            );
        }
        RtMessage::Shutdown => {
            debug!("Shutdown requested");
            state.running = false;
        }
    }
}

/// Move one chunk from the ring into every open take.
///
/// Messages are re-checked after each read: any start/stop that precedes
/// the chunk in the input stream was enqueued before the chunk was
/// published, so it is visible by now.
fn drain_audio(context: &mut WorkerContext, state: &mut WorkerState) -> usize {
    let read = context.audio.read(&mut state.scratch);
    if read == 0 {
        return 0;
    }

    process_messages(context, state);

    let block_start = state.consumed;
    for take in &mut state.takes {
        take.write_block(
            &state.scratch[..read],
            block_start,
            context.sync_interval,
            &context.shared.metrics,
        );
    }
    state.consumed += read as u64;
    read
}

fn finish_completed(context: &WorkerContext, state: &mut WorkerState) {
    let mut index = 0;
    while index < state.takes.len() {
        if state.takes[index].is_complete(state.consumed) {
            let take = state.takes.swap_remove(index);
            finish_take(context, take);
        } else {
            index += 1;
        }
    }
    context
        .shared
        .active_takes
        .store(state.takes.len(), Ordering::Relaxed);
}

fn close_all(context: &WorkerContext, state: &mut WorkerState) {
    for take in state.takes.drain(..) {
        finish_take(context, take);
    }
    context.shared.active_takes.store(0, Ordering::Relaxed);
}

fn finish_take(context: &WorkerContext, take: Take) {
    let slot = take.slot;
    let path = take.path.clone();
    let frames_written = take.finalize(&context.shared.metrics);
    info!(
        "Loop {} recording closed: {} frames in {}",
        slot,
        frames_written,
        path.display()
    );
    let _ = context.events.send(WorkerEvent::RecordingFinished {
        slot,
        frames_written,
        path: Some(path),
    });
}
