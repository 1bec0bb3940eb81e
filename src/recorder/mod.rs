//! DLOG recorder
//!
//! Architecture (single owner):
//! - [`RecordingEngine`]: synchronous state machine, sample buffer, file I/O
//! - [`Recorder`]: tokio task that owns the engine, drives `tick()` from an
//!   interval and applies [`RecorderMessage`]s in arrival order
//! - [`RecorderHandle`]: cloneable front end; events and samples are posted
//!   over an mpsc channel, synchronous calls await a oneshot reply, status
//!   reads come from a shared snapshot without touching the task
//!
//! File layout (DLOG v2):
//! - Fixed header: two magic words, version, Y axis count, data offset
//! - Meta fields: `[u16 len][u8 id][u8 index?][value]`, zero terminated
//! - Sample rows, bit-packed per [`RowLayout`]
//! - Bookmark index records, terminator record, bookmark text

mod active;
mod bit_writer;
mod bookmark;
mod channel;
mod clock;
mod engine;
mod file;
mod flusher;
mod format;
mod params;
mod ring;
mod storage;

pub use active::{ActiveRecording, SampleValue};
pub use bit_writer::BitWriter;
pub use bookmark::{side_file_paths, Bookmark, BookmarkRecorder};
pub use channel::{ChannelSource, FixedChannels};
pub use clock::{ManualTicks, SampleClock, SystemTicks, TickSource};
pub use engine::{RecorderStatus, RecordingEngine};
pub use file::{DlogFile, COPY_CHUNK_SIZE};
pub use flusher::{ChunkedFlusher, FlushPolicy};
pub use format::{
    truncate_utf8, ChannelInfo, DataType, DecodedRow, DlogFileReader, DlogHeader,
    FileFormatError, HeaderLayout, HeaderPatch, PatchField, Range, RowLayout, ScaleType, Unit,
    XAxis, YAxis, BOOKMARK_INDEX_RECORD_SIZE, FIXED_HEADER_SIZE, MAGIC1, MAGIC2,
    MAX_BOOKMARK_TEXT_LEN, MAX_CHANNELS, MAX_COMMENT_LEN, MAX_LABEL_LEN, MAX_Y_AXES, VERSION,
};
pub use params::{
    DlogItem, RecordingParameters, ResourceType, SamplingMode, TriggerSource, DURATION_DEFAULT,
    PERIOD_DEFAULT,
};
pub use ring::{Overflow, RingBuffer};
pub use storage::{FsStorage, OpenMode, Storage, StorageFile};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::common::{
    OverflowSource, RecorderError, RecorderEvent, RecorderResult, RecordingState,
};
use crate::config::RecorderConfig;

/// Reply channel of a synchronous call
pub type Reply<T> = oneshot::Sender<T>;

/// Messages applied by the recorder task
#[derive(Debug)]
pub enum RecorderMessage {
    /// State machine event; `reply` is `None` for fire-and-forget posts
    Event {
        event: RecorderEvent,
        reply: Option<Reply<RecorderResult<()>>>,
    },
    /// Replace the parameters of the next recording
    SetParams {
        params: Box<RecordingParameters>,
        reply: Reply<RecorderResult<()>>,
    },
    Log(Vec<f32>),
    LogBits(u32),
    LogInt16 { bytes: Vec<u8>, bits: u32 },
    LogInt24 { bytes: Vec<u8>, bits: u32 },
    LogInvalid,
    Bookmark(String),
    /// File length and row count announced by the module storing the file
    ModuleProgress { file_length: u64, rows: u32 },
    /// Live display read of one buffered value
    Value {
        row: u32,
        axis: usize,
        reply: Reply<Option<SampleValue>>,
    },
}

/// Recorder control task
pub struct Recorder {
    engine: RecordingEngine,
    rx: mpsc::Receiver<RecorderMessage>,
    status: Arc<RwLock<RecorderStatus>>,
    state_tx: watch::Sender<RecordingState>,
    tick_interval: Duration,
}

impl Recorder {
    /// Wrap an engine; returns the task and a handle to it
    pub fn new(engine: RecordingEngine, config: &RecorderConfig) -> (Self, RecorderHandle) {
        let (tx, rx) = mpsc::channel(config.event_queue.max(1));
        let (state_tx, state_rx) = watch::channel(engine.state());
        let status = Arc::new(RwLock::new(engine.status()));

        let handle = RecorderHandle {
            tx,
            status: Arc::clone(&status),
            state_rx,
        };
        let recorder = Self {
            engine,
            rx,
            status,
            state_tx,
            tick_interval: config.tick_interval().max(Duration::from_millis(1)),
        };
        (recorder, handle)
    }

    /// Run until shutdown or until every handle is dropped.
    ///
    /// An active session is finalized before returning.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut progress = tokio::time::interval(Duration::from_secs(10));

        info!(tick_ms = self.tick_interval.as_millis() as u64, "Recorder task started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("Recorder received shutdown signal");
                    break;
                }

                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.dispatch(msg),
                        None => {
                            debug!("All recorder handles dropped");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.engine.tick();
                }

                _ = progress.tick() => {
                    if self.engine.is_executing() {
                        let status = self.engine.status();
                        info!(
                            elapsed = status.elapsed,
                            rows = status.rows,
                            file_bytes = status.file_length,
                            flushed = %status.counters.format_bytes_flushed(),
                            "Recording progress"
                        );
                    }
                }
            }
            self.publish();
        }

        if !self.engine.is_idle() {
            if let Err(e) = self.engine.handle_event(RecorderEvent::Abort) {
                warn!(error = %e, "Failed to finalize recording on shutdown");
            }
            self.publish();
        }

        let counters = self.engine.counters().snapshot();
        info!(
            sessions = counters.sessions,
            rows = counters.rows,
            bytes = counters.bytes_flushed,
            overflows = counters.overflows,
            storage_errors = counters.storage_errors,
            "Recorder stopped"
        );
    }

    fn dispatch(&mut self, msg: RecorderMessage) {
        match msg {
            RecorderMessage::Event { event, reply } => {
                let result = self.engine.handle_event(event);
                match reply {
                    Some(reply) => {
                        // Waiters must see the new state once the reply arrives
                        self.publish();
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            // Fatal errors were reported when the session aborted
                            if !e.is_fatal() {
                                self.engine.notify_error(&e);
                            }
                        }
                    }
                }
            }
            RecorderMessage::SetParams { params, reply } => {
                let result = self.engine.set_params(*params);
                self.publish();
                let _ = reply.send(result);
            }
            // Ingestion errors already aborted the session and reached the hooks
            RecorderMessage::Log(values) => {
                let _ = self.engine.log(&values);
            }
            RecorderMessage::LogBits(bits) => {
                let _ = self.engine.log_bits(bits);
            }
            RecorderMessage::LogInt16 { bytes, bits } => {
                let _ = self.engine.log_int16(&bytes, bits);
            }
            RecorderMessage::LogInt24 { bytes, bits } => {
                let _ = self.engine.log_int24(&bytes, bits);
            }
            RecorderMessage::LogInvalid => {
                let _ = self.engine.log_invalid();
            }
            RecorderMessage::Bookmark(text) => {
                let _ = self.engine.log_bookmark(&text);
            }
            RecorderMessage::ModuleProgress { file_length, rows } => {
                self.engine.set_module_progress(file_length, rows);
                self.publish();
            }
            RecorderMessage::Value { row, axis, reply } => {
                let _ = reply.send(self.engine.value(row, axis));
            }
        }
    }

    fn publish(&self) {
        *self.status.write() = self.engine.status();
        let state = self.engine.state();
        self.state_tx.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });
    }
}

/// Cloneable front end of a running [`Recorder`]
#[derive(Clone)]
pub struct RecorderHandle {
    tx: mpsc::Sender<RecorderMessage>,
    status: Arc<RwLock<RecorderStatus>>,
    state_rx: watch::Receiver<RecordingState>,
}

impl RecorderHandle {
    async fn send(&self, msg: RecorderMessage) -> RecorderResult<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| RecorderError::ChannelClosed)
    }

    /// Queue an event without waiting for the transition.
    ///
    /// Errors from the transition go to the engine's error hook.
    pub async fn post(&self, event: RecorderEvent) -> RecorderResult<()> {
        self.send(RecorderMessage::Event { event, reply: None }).await
    }

    /// Apply an event and wait for its outcome
    pub async fn request(&self, event: RecorderEvent) -> RecorderResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(RecorderMessage::Event {
            event,
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| RecorderError::ChannelClosed)?
    }

    pub async fn initiate(&self) -> RecorderResult<()> {
        self.request(RecorderEvent::Initiate).await
    }

    /// Arm a trace recording and wait until the transition completed
    pub async fn initiate_trace(&self) -> RecorderResult<()> {
        self.request(RecorderEvent::InitiateTrace).await
    }

    pub async fn start_immediately(&self) -> RecorderResult<()> {
        self.request(RecorderEvent::Start).await
    }

    pub async fn trigger_generated(&self) -> RecorderResult<()> {
        self.request(RecorderEvent::Trigger).await
    }

    pub async fn toggle_start(&self) -> RecorderResult<()> {
        self.request(RecorderEvent::ToggleStart).await
    }

    pub async fn toggle_stop(&self) -> RecorderResult<()> {
        self.request(RecorderEvent::ToggleStop).await
    }

    pub async fn abort(&self) -> RecorderResult<()> {
        self.request(RecorderEvent::Abort).await
    }

    pub async fn abort_after_buffer_overflow(&self, source: OverflowSource) -> RecorderResult<()> {
        self.request(RecorderEvent::AbortAfterBufferOverflow(source))
            .await
    }

    pub async fn abort_after_mass_storage_error(&self) -> RecorderResult<()> {
        self.request(RecorderEvent::AbortAfterMassStorageError).await
    }

    pub async fn reset(&self) -> RecorderResult<()> {
        self.request(RecorderEvent::Reset).await
    }

    /// Replace the parameters of the next recording (IDLE only)
    pub async fn set_params(&self, params: RecordingParameters) -> RecorderResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(RecorderMessage::SetParams {
            params: Box::new(params),
            reply,
        })
        .await?;
        rx.await.map_err(|_| RecorderError::ChannelClosed)?
    }

    pub async fn log(&self, values: Vec<f32>) -> RecorderResult<()> {
        self.send(RecorderMessage::Log(values)).await
    }

    pub async fn log_bits(&self, bits: u32) -> RecorderResult<()> {
        self.send(RecorderMessage::LogBits(bits)).await
    }

    pub async fn log_int16(&self, bytes: Vec<u8>, bits: u32) -> RecorderResult<()> {
        self.send(RecorderMessage::LogInt16 { bytes, bits }).await
    }

    pub async fn log_int24(&self, bytes: Vec<u8>, bits: u32) -> RecorderResult<()> {
        self.send(RecorderMessage::LogInt24 { bytes, bits }).await
    }

    pub async fn log_invalid(&self) -> RecorderResult<()> {
        self.send(RecorderMessage::LogInvalid).await
    }

    pub async fn log_bookmark(&self, text: impl Into<String>) -> RecorderResult<()> {
        self.send(RecorderMessage::Bookmark(text.into())).await
    }

    /// Report progress of a recording stored by a module
    pub async fn set_module_progress(&self, file_length: u64, rows: u32) -> RecorderResult<()> {
        self.send(RecorderMessage::ModuleProgress { file_length, rows })
            .await
    }

    /// Decode one value still resident in the sample buffer
    pub async fn value(&self, row: u32, axis: usize) -> RecorderResult<Option<SampleValue>> {
        let (reply, rx) = oneshot::channel();
        self.send(RecorderMessage::Value { row, axis, reply })
            .await?;
        rx.await.map_err(|_| RecorderError::ChannelClosed)
    }

    /// Latest status snapshot
    pub fn status(&self) -> RecorderStatus {
        self.status.read().clone()
    }

    pub fn state(&self) -> RecordingState {
        *self.state_rx.borrow()
    }

    pub fn is_idle(&self) -> bool {
        self.state() == RecordingState::Idle
    }

    pub fn is_executing(&self) -> bool {
        self.state() == RecordingState::Executing
    }

    /// Receiver for state changes
    pub fn subscribe_state(&self) -> watch::Receiver<RecordingState> {
        self.state_rx.clone()
    }

    /// Wait until the recorder reaches `target`
    pub async fn wait_for_state(&self, target: RecordingState) -> RecorderResult<()> {
        let mut rx = self.state_rx.clone();
        rx.wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| RecorderError::ChannelClosed)
    }
}
