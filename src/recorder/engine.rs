//! Recording engine
//!
//! Owns the state machine, the sample buffer, the destination file and the
//! active session. Every mutation goes through `&mut self`; the control task
//! in [`super::Recorder`] is the single owner at runtime.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::active::{ActiveRecording, SampleValue};
use super::bit_writer::BitWriter;
use super::bookmark::Bookmark;
use super::channel::ChannelSource;
use super::clock::{SampleClock, SystemTicks, TickSource};
use super::file::DlogFile;
use super::flusher::{ChunkedFlusher, FlushPolicy};
use super::format::{DataType, HeaderPatch};
use super::params::{DlogItem, RecordingParameters, ResourceType, SamplingMode, TriggerSource};
use super::ring::Overflow;
use super::storage::Storage;
use crate::common::{
    CounterSnapshot, LoggingHooks, OverflowSource, RecorderCounters, RecorderError,
    RecorderEvent, RecorderHooks, RecorderResult, RecordingState,
};
use crate::config::{DefaultsConfig, RecorderConfig};

/// Read-only view of the engine for status queries
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecorderStatus {
    pub state: RecordingState,
    /// Seconds since sampling started
    pub elapsed: f64,
    /// Bytes in the destination file
    pub file_length: u64,
    /// Destination of the current or most recent recording
    pub file_path: Option<String>,
    pub rows: u32,
    pub mode: Option<SamplingMode>,
    pub bookmarks: Vec<Bookmark>,
    pub counters: CounterSnapshot,
    pub last_error: Option<String>,
}

/// One value of a row, in the axis' on-disk type
#[derive(Debug, Clone, Copy)]
enum Cell {
    Bit(bool),
    Float(f32),
    Int16(i16),
    Int24(i32),
}

impl Cell {
    /// Placeholder for an axis with no sample
    fn empty(data_type: DataType) -> Self {
        match data_type {
            DataType::Bit => Cell::Bit(false),
            DataType::Int16Be => Cell::Int16(0),
            DataType::Int24Be => Cell::Int24(0),
            DataType::Float => Cell::Float(f32::NAN),
        }
    }

    fn from_f32(data_type: DataType, value: f32) -> Self {
        match data_type {
            DataType::Bit => Cell::Bit(value != 0.0),
            DataType::Int16Be => Cell::Int16(value as i16),
            DataType::Int24Be => Cell::Int24(value as i32),
            DataType::Float => Cell::Float(value),
        }
    }
}

/// Write one row: validity bit, values, then pad to a byte boundary
fn write_row(
    writer: &mut BitWriter,
    validity: Option<bool>,
    cells: impl IntoIterator<Item = Cell>,
) -> Result<(), Overflow> {
    if let Some(valid) = validity {
        writer.write_bit(valid)?;
    }
    for cell in cells {
        match cell {
            Cell::Bit(bit) => writer.write_bit(bit)?,
            Cell::Float(v) => {
                writer.flush_bits()?;
                writer.write_float(v)?;
            }
            Cell::Int16(v) => {
                writer.flush_bits()?;
                writer.write_i16(v)?;
            }
            Cell::Int24(v) => {
                writer.flush_bits()?;
                writer.write_i24(v)?;
            }
        }
    }
    writer.flush_bits()
}

fn sample_item(channels: &mut dyn ChannelSource, item: &DlogItem) -> Cell {
    let ch = item.channel as usize;
    match item.resource {
        ResourceType::Voltage => Cell::Float(channels.voltage(ch)),
        ResourceType::Current => Cell::Float(channels.current(ch)),
        ResourceType::Power => Cell::Float(channels.voltage(ch) * channels.current(ch)),
        ResourceType::DigitalInput(pin) => Cell::Bit(channels.digital_input(ch, pin)),
    }
}

pub struct RecordingEngine {
    config: RecorderConfig,
    defaults: DefaultsConfig,
    params: RecordingParameters,
    state: RecordingState,
    trace: bool,
    active: Option<ActiveRecording>,
    writer: BitWriter,
    flusher: ChunkedFlusher,
    file: Option<DlogFile>,
    clock: SampleClock,
    storage: Box<dyn Storage>,
    channels: Box<dyn ChannelSource>,
    hooks: Box<dyn RecorderHooks>,
    ticks: Arc<dyn TickSource>,
    counters: Arc<RecorderCounters>,
    latest_path: Option<String>,
    last_error: Option<String>,
}

impl RecordingEngine {
    pub fn new(
        config: RecorderConfig,
        defaults: DefaultsConfig,
        storage: Box<dyn Storage>,
        channels: Box<dyn ChannelSource>,
    ) -> Self {
        Self {
            writer: BitWriter::new(config.buffer_size),
            flusher: ChunkedFlusher::new(FlushPolicy::from(&config)),
            params: RecordingParameters::from(&defaults),
            config,
            defaults,
            state: RecordingState::Idle,
            trace: false,
            active: None,
            file: None,
            clock: SampleClock::default(),
            storage,
            channels,
            hooks: Box::new(LoggingHooks),
            ticks: Arc::new(SystemTicks::new()),
            counters: Arc::new(RecorderCounters::new()),
            latest_path: None,
            last_error: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Box<dyn RecorderHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_ticks(mut self, ticks: Arc<dyn TickSource>) -> Self {
        self.ticks = ticks;
        self
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == RecordingState::Idle
    }

    pub fn is_executing(&self) -> bool {
        self.state == RecordingState::Executing
    }

    pub fn params(&self) -> &RecordingParameters {
        &self.params
    }

    /// Replace the parameters of the next recording (IDLE only)
    pub fn set_params(&mut self, params: RecordingParameters) -> RecorderResult<()> {
        if self.state != RecordingState::Idle {
            return Err(RecorderError::ParametersLocked(self.state));
        }
        self.params = params;
        Ok(())
    }

    pub fn active(&self) -> Option<&ActiveRecording> {
        self.active.as_ref()
    }

    pub fn counters(&self) -> Arc<RecorderCounters> {
        Arc::clone(&self.counters)
    }

    /// Seconds since sampling started
    pub fn elapsed(&self) -> f64 {
        self.clock.current_time()
    }

    /// Bytes in the destination file (0 when none is open)
    ///
    /// Module-local recordings report what the module last announced.
    pub fn file_length(&self) -> u64 {
        match (self.file.as_ref(), self.active.as_ref()) {
            (Some(file), _) => file.len(),
            (None, Some(active)) if !active.is_buffered() => active.module_file_length,
            _ => 0,
        }
    }

    /// Take file length and row count from the module storing the file
    pub fn set_module_progress(&mut self, file_length: u64, rows: u32) {
        if self.state != RecordingState::Executing {
            return;
        }
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.is_buffered() {
            debug!("Module progress ignored for a local file");
            return;
        }
        active.module_file_length = file_length;
        active.rows = rows;
    }

    /// Destination of the current or most recent recording
    pub fn latest_path(&self) -> Option<&str> {
        self.latest_path.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Decode one axis of a row still resident in the sample buffer
    pub fn value(&self, row: u32, axis: usize) -> Option<SampleValue> {
        self.active.as_ref()?.value(self.writer.ring(), row, axis)
    }

    pub fn status(&self) -> RecorderStatus {
        RecorderStatus {
            state: self.state,
            elapsed: self.elapsed(),
            file_length: self.file_length(),
            file_path: self.latest_path.clone(),
            rows: self.active.as_ref().map_or(0, |a| a.rows),
            mode: self.active.as_ref().map(|a| a.mode),
            bookmarks: self
                .active
                .as_ref()
                .map(|a| a.bookmarks.live().cloned().collect())
                .unwrap_or_default(),
            counters: self.counters.snapshot(),
            last_error: self.last_error.clone(),
        }
    }

    // =========================================================================
    // State machine
    // =========================================================================

    /// Apply one event to the state machine
    pub fn handle_event(&mut self, event: RecorderEvent) -> RecorderResult<()> {
        use RecorderEvent::*;
        use RecordingState::*;

        match (self.state, event) {
            (_, Reset) => {
                self.reset();
                Ok(())
            }
            (Idle, Initiate | ToggleStart) => self.initiate(false),
            (Idle, InitiateTrace) => self.initiate(true),
            (Idle, Start | Trigger) => Err(RecorderError::InvalidTransition {
                state: self.state,
                event,
            }),

            (Initiated, Start | Trigger | ToggleStart) => self.start(),
            (Initiated, Abort | ToggleStop) => {
                self.set_state(Idle);
                Ok(())
            }

            (Executing, ToggleStop | Finish | Abort) => self.finalize(),

            (Initiated | Executing, AbortAfterBufferOverflow(source)) => {
                self.fail(RecorderError::BufferOverflow(source));
                Ok(())
            }
            (Initiated | Executing, AbortAfterMassStorageError) => {
                self.fail(RecorderError::mass_storage("storage error reported"));
                Ok(())
            }

            (state, event) => {
                debug!(%state, %event, "Event ignored");
                Ok(())
            }
        }
    }

    fn set_state(&mut self, state: RecordingState) {
        if self.state == state {
            return;
        }
        let from = self.state;
        self.state = state;
        info!(%from, to = %state, "Recorder state changed");
        self.hooks.on_state_changed(from, state);
    }

    fn initiate(&mut self, trace: bool) -> RecorderResult<()> {
        self.params.check(trace)?;
        self.trace = trace;
        if self.params.trigger_source == TriggerSource::Immediate {
            self.start()
        } else {
            info!(trigger = ?self.params.trigger_source, trace, "Recording armed");
            self.set_state(RecordingState::Initiated);
            Ok(())
        }
    }

    fn start(&mut self) -> RecorderResult<()> {
        self.params.check(self.trace)?;

        let mut params = self.params.clone();
        let mode = SamplingMode::select(self.trace, params.period, self.config.host_period_min);
        if !self.trace {
            params.derive_axes(self.channels.as_ref());
        }
        let mut active = ActiveRecording::new(params, mode, self.config.live_bookmarks_max);

        self.writer.reset();
        self.flusher.reset();

        if active.is_buffered() {
            match self.open_file(&active) {
                Ok(file) => {
                    active.data_offset = file.layout().map_or(0, |l| l.data_offset);
                    self.hooks.on_storage_changed(file.path());
                    self.file = Some(file);
                }
                Err(e) => {
                    self.storage.reinitialize();
                    let msg = format!("cannot create {}: {}", active.params.file_path, e);
                    self.fail(RecorderError::mass_storage(msg.clone()));
                    return Err(RecorderError::mass_storage(msg));
                }
            }
        }

        self.latest_path = Some(active.params.file_path.clone());
        self.clock.reset(self.ticks.millis());
        self.counters.inc_sessions();
        info!(
            path = %active.params.file_path,
            mode = ?active.mode,
            axes = active.params.y_axes.len(),
            row_size = active.layout.row_size(),
            "Recording started"
        );
        self.active = Some(active);
        self.set_state(RecordingState::Executing);
        self.hooks.on_recording_started();
        Ok(())
    }

    /// Create the destination and write the header with placeholders
    fn open_file(&mut self, active: &ActiveRecording) -> std::io::Result<DlogFile> {
        let start_time = chrono::Utc::now().timestamp().max(0) as u32;
        let header = active.params.to_header(start_time, self.channels.as_ref());
        let (bytes, layout) = header.encode();

        let path = PathBuf::from(&active.params.file_path);
        let mut file = DlogFile::create(self.storage.as_mut(), &path)?;
        file.set_layout(layout);
        file.append(&bytes)?;
        file.sync()?;
        debug!(path = %path.display(), header_bytes = bytes.len(), "Header written");
        Ok(file)
    }

    /// Normal end of an executing session
    fn finalize(&mut self) -> RecorderResult<()> {
        self.set_state(RecordingState::Idle);
        let Some(mut active) = self.active.take() else {
            return Ok(());
        };

        let duration = self.clock.advance(self.ticks.millis());
        let result = self.finalize_file(&mut active, duration);

        self.file = None;
        self.params.file_path.clear();
        self.hooks.on_recording_stopped();

        match result {
            Ok(()) => {
                info!(
                    path = %active.params.file_path,
                    rows = active.rows,
                    bookmarks = active.bookmarks.count(),
                    duration,
                    "Recording finalized"
                );
                Ok(())
            }
            Err(e) => {
                error!(path = %active.params.file_path, error = %e, "Finalization failed");
                self.report(&e);
                Err(e)
            }
        }
    }

    fn finalize_file(&mut self, active: &mut ActiveRecording, duration: f64) -> RecorderResult<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };

        self.flusher
            .flush_data(&mut self.writer, file, self.storage.as_mut(), &self.counters)?;
        self.hooks.on_storage_changed(file.path());

        file.patch(HeaderPatch::FinalDuration(duration))?;
        if active.mode != SamplingMode::Trace && active.rows > 1 {
            let step = duration / (active.rows - 1) as f64;
            file.patch(HeaderPatch::XAxisStep(step as f32))?;
        }
        file.patch(HeaderPatch::DataSize(active.rows))?;

        if active.bookmarks.count() > 0 {
            active.bookmarks.merge(self.storage.as_mut(), file)?;
        }
        file.sync()?;
        Ok(())
    }

    /// Error abort: close the file as-is, skip flush, patches and merge
    fn fail(&mut self, err: RecorderError) {
        let was = self.state;
        error!(state = %was, error = %err, "Recording aborted");

        self.active = None;
        self.file = None;
        self.params.file_path.clear();
        self.set_state(RecordingState::Idle);
        if was == RecordingState::Executing {
            self.hooks.on_recording_stopped();
        }
        self.report(&err);
    }

    /// Surface an error that no caller is waiting for
    pub fn notify_error(&mut self, err: &RecorderError) {
        warn!(error = %err, "Recorder request rejected");
        self.report(err);
    }

    fn report(&mut self, err: &RecorderError) {
        match err {
            RecorderError::BufferOverflow(_) => self.counters.inc_overflows(),
            RecorderError::MassStorage(_) | RecorderError::Io(_) => {
                self.counters.inc_storage_errors()
            }
            _ => {}
        }
        self.last_error = Some(err.to_string());
        self.hooks.on_error(err);
    }

    /// Abort whatever is running and restore default parameters
    fn reset(&mut self) {
        match self.state {
            RecordingState::Executing => {
                // Errors were already reported
                let _ = self.finalize();
            }
            RecordingState::Initiated => self.set_state(RecordingState::Idle),
            RecordingState::Idle => {}
        }
        self.params = RecordingParameters::from(&self.defaults);
        self.trace = false;
        debug!("Recording parameters reset to defaults");
    }

    // =========================================================================
    // Sampling
    // =========================================================================

    /// Advance the clock, sample when due and flush; call once per scheduler tick
    pub fn tick(&mut self) {
        if self.state != RecordingState::Executing {
            return;
        }
        let time = self.clock.advance(self.ticks.millis());
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let mode = active.mode;
        let buffered = active.is_buffered();
        let duration = active.params.duration;

        match mode {
            SamplingMode::Periodic { period } if buffered => {
                while self.clock.is_due() {
                    if let Err(overflow) = self.sample_row() {
                        warn!(%overflow, "Sample buffer overrun");
                        self.fail(RecorderError::BufferOverflow(OverflowSource::Master));
                        return;
                    }
                    self.clock.schedule_next(period);
                    if self.clock.is_past(duration) {
                        self.finish();
                        return;
                    }
                }
            }
            SamplingMode::Periodic { .. } | SamplingMode::ModuleControlled => {
                if time >= duration {
                    self.finish();
                    return;
                }
            }
            SamplingMode::Trace => {}
        }

        self.write_pending(false);
    }

    fn finish(&mut self) {
        if let Err(e) = self.handle_event(RecorderEvent::Finish) {
            debug!(error = %e, "Finish completed with error");
        }
    }

    /// Hand due chunks to storage; failures abort the session
    fn write_pending(&mut self, force: bool) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        if let Err(e) = self.flusher.file_write(
            self.writer.ring_mut(),
            file,
            self.storage.as_mut(),
            force,
            &self.counters,
        ) {
            self.fail(e);
        }
    }

    /// Sample every monitored item into one row
    fn sample_row(&mut self) -> Result<(), Overflow> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        let validity = active.params.validity_bit().then_some(true);
        let channels = self.channels.as_mut();
        let cells: Vec<Cell> = active
            .params
            .items
            .iter()
            .map(|item| sample_item(&mut *channels, item))
            .collect();
        write_row(&mut self.writer, validity, cells)?;
        active.rows += 1;
        self.counters.inc_rows();
        Ok(())
    }

    // =========================================================================
    // Explicit ingestion (trace and module-controlled)
    // =========================================================================

    /// Whether log calls are accepted right now
    fn accepting_samples(&self) -> bool {
        if self.state != RecordingState::Executing {
            return false;
        }
        match self.active.as_ref().and_then(|a| a.duration_limit()) {
            Some(limit) => self.clock.current_time() < limit,
            None => self.active.is_some(),
        }
    }

    fn log_row(
        &mut self,
        validity: bool,
        cells: impl Fn(usize, DataType) -> Cell,
    ) -> RecorderResult<()> {
        if !self.accepting_samples() {
            debug!("Sample dropped outside recording window");
            return Ok(());
        }
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };

        if active.is_buffered() {
            let row: Vec<Cell> = active
                .params
                .y_axes
                .iter()
                .enumerate()
                .map(|(i, y)| cells(i, y.data_type))
                .collect();
            let validity = active.params.validity_bit().then_some(validity);
            if let Err(overflow) = write_row(&mut self.writer, validity, row) {
                warn!(%overflow, "Sample buffer overrun");
                self.fail(RecorderError::BufferOverflow(OverflowSource::Master));
                return Err(RecorderError::BufferOverflow(OverflowSource::Master));
            }
        }

        active.rows += 1;
        if validity {
            self.counters.inc_rows();
        } else {
            self.counters.inc_invalid_rows();
        }
        Ok(())
    }

    /// Log one row of values, one per Y axis; missing values are NaN
    pub fn log(&mut self, values: &[f32]) -> RecorderResult<()> {
        self.log_row(true, |i, data_type| match values.get(i) {
            Some(&v) => Cell::from_f32(data_type, v),
            None => Cell::empty(data_type),
        })
    }

    /// Log one row where bit-typed axis `i` takes bit `i` of `bits`
    pub fn log_bits(&mut self, bits: u32) -> RecorderResult<()> {
        self.log_row(true, |i, data_type| match data_type {
            DataType::Bit => Cell::Bit(i < 32 && bits & (1 << i) != 0),
            other => Cell::empty(other),
        })
    }

    /// Log one row of big-endian 16-bit values, plus bit axes from `bits`
    pub fn log_int16(&mut self, bytes: &[u8], bits: u32) -> RecorderResult<()> {
        let raw = self.packed_values(bytes, DataType::Int16Be);
        self.log_row(true, |i, data_type| match data_type {
            DataType::Bit => Cell::Bit(i < 32 && bits & (1 << i) != 0),
            DataType::Int16Be => Cell::Int16(raw.get(i).copied().flatten().unwrap_or(0) as i16),
            other => Cell::empty(other),
        })
    }

    /// Log one row of big-endian 24-bit values, plus bit axes from `bits`
    pub fn log_int24(&mut self, bytes: &[u8], bits: u32) -> RecorderResult<()> {
        let raw = self.packed_values(bytes, DataType::Int24Be);
        self.log_row(true, |i, data_type| match data_type {
            DataType::Bit => Cell::Bit(i < 32 && bits & (1 << i) != 0),
            DataType::Int24Be => Cell::Int24(raw.get(i).copied().flatten().unwrap_or(0)),
            other => Cell::empty(other),
        })
    }

    /// Log a placeholder row (validity bit cleared, or NaN when rows carry none)
    pub fn log_invalid(&mut self) -> RecorderResult<()> {
        self.log_row(false, |_, data_type| Cell::empty(data_type))
    }

    /// Attach a bookmark to the next row
    pub fn log_bookmark(&mut self, text: &str) -> RecorderResult<()> {
        if self.state != RecordingState::Executing {
            debug!("Bookmark dropped while not executing");
            return Ok(());
        }
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        if !active.is_buffered() {
            return Ok(());
        }

        let position = active.rows;
        if let Err(e) = active.bookmarks.add(self.storage.as_mut(), position, text) {
            self.storage.reinitialize();
            let msg = format!("bookmark write failed: {}", e);
            self.fail(RecorderError::mass_storage(msg.clone()));
            return Err(RecorderError::mass_storage(msg));
        }
        self.counters.inc_bookmarks();
        debug!(position, text, "Bookmark added");
        Ok(())
    }

    /// Split `bytes` into per-axis values for axes of `data_type`, in axis order
    fn packed_values(&self, bytes: &[u8], data_type: DataType) -> Vec<Option<i32>> {
        let width = data_type.width();
        let mut offset = 0;
        self.active
            .as_ref()
            .map(|a| a.params.y_axes.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|y| {
                if y.data_type != data_type {
                    return None;
                }
                let chunk = bytes.get(offset..offset + width);
                offset += width;
                chunk.map(|b| match data_type {
                    DataType::Int16Be => i16::from_be_bytes([b[0], b[1]]) as i32,
                    _ => i32::from_be_bytes([b[0], b[1], b[2], 0]) >> 8,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::channel::FixedChannels;
    use crate::recorder::clock::ManualTicks;
    use crate::recorder::format::{DlogFileReader, Range, XAxis, YAxis};
    use crate::recorder::storage::FsStorage;
    use tempfile::tempdir;

    fn engine(ticks: &ManualTicks) -> RecordingEngine {
        RecordingEngine::new(
            RecorderConfig::default(),
            DefaultsConfig::default(),
            Box::new(FsStorage::new()),
            Box::new(FixedChannels::new(vec![5.0], vec![0.5])),
        )
        .with_ticks(Arc::new(ticks.clone()))
    }

    fn trace_params(path: &str, types: &[DataType]) -> RecordingParameters {
        let mut p = RecordingParameters::default();
        p.file_path = path.to_string();
        p.x_axis = XAxis {
            step: 1.0,
            range: Range::new(0.0, 100.0),
            ..Default::default()
        };
        p.y_axes = types
            .iter()
            .map(|&data_type| YAxis {
                data_type,
                ..Default::default()
            })
            .collect();
        p
    }

    #[test]
    fn test_validation_error_leaves_state() {
        let ticks = ManualTicks::new(0);
        let mut engine = engine(&ticks);
        let err = engine.handle_event(RecorderEvent::Initiate).unwrap_err();
        assert!(matches!(err, RecorderError::InvalidParameters(_)));
        assert!(engine.is_idle());
    }

    #[test]
    fn test_start_from_idle_rejected() {
        let ticks = ManualTicks::new(0);
        let mut engine = engine(&ticks);
        assert!(matches!(
            engine.handle_event(RecorderEvent::Trigger),
            Err(RecorderError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_triggered_start() {
        let dir = tempdir().unwrap();
        let ticks = ManualTicks::new(0);
        let mut engine = engine(&ticks);
        let mut params = trace_params(
            dir.path().join("t.dlog").to_str().unwrap(),
            &[DataType::Float],
        );
        params.trigger_source = TriggerSource::Bus;
        engine.set_params(params).unwrap();

        engine.handle_event(RecorderEvent::InitiateTrace).unwrap();
        assert_eq!(engine.state(), RecordingState::Initiated);
        assert!(engine.set_params(RecordingParameters::default()).is_err());

        engine.handle_event(RecorderEvent::Trigger).unwrap();
        assert!(engine.is_executing());
        assert!(engine.file_length() > 0);
    }

    #[test]
    fn test_mixed_row_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mixed.dlog");
        let ticks = ManualTicks::new(0);
        let mut engine = engine(&ticks);
        engine
            .set_params(trace_params(
                path.to_str().unwrap(),
                &[DataType::Bit, DataType::Int16Be, DataType::Bit],
            ))
            .unwrap();
        engine.handle_event(RecorderEvent::InitiateTrace).unwrap();

        engine.log_int16(&[0x01, 0x02], 0b100).unwrap();
        engine.log_invalid().unwrap();
        assert_eq!(engine.value(0, 1), Some(SampleValue::Value(258.0)));
        assert_eq!(engine.value(1, 0), Some(SampleValue::Invalid));
        engine.handle_event(RecorderEvent::ToggleStop).unwrap();

        let mut reader = DlogFileReader::new(std::fs::File::open(&path).unwrap()).unwrap();
        let rows = reader.read_rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].valid);
        assert_eq!(rows[0].values, vec![0.0, 258.0, 1.0]);
        assert!(!rows[1].valid);
        assert_eq!(engine.counters().snapshot().invalid_rows, 1);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let ticks = ManualTicks::new(0);
        let mut engine = engine(&ticks);
        let mut params = RecordingParameters::default();
        params.period = 0.5;
        params.comment = "x".to_string();
        engine.set_params(params).unwrap();
        engine.handle_event(RecorderEvent::Reset).unwrap();
        assert_eq!(engine.params().period, 0.02);
        assert!(engine.params().comment.is_empty());
    }

    #[test]
    fn test_module_local_recording_has_no_file() {
        let ticks = ManualTicks::new(0);
        let mut engine = engine(&ticks);
        let mut params = RecordingParameters::default();
        params.file_path = "1:/recordings/m.dlog".to_string();
        params.period = 0.001;
        params.duration = 0.5;
        params.enable_item(0, ResourceType::Voltage, true);
        engine.set_params(params).unwrap();

        engine.handle_event(RecorderEvent::Initiate).unwrap();
        assert!(engine.is_executing());
        assert_eq!(engine.active().unwrap().mode, SamplingMode::ModuleControlled);
        assert_eq!(engine.file_length(), 0);

        engine.log(&[1.0]).unwrap();
        assert_eq!(engine.active().unwrap().rows, 1);

        ticks.advance(500);
        engine.tick();
        assert!(engine.is_idle());
    }
}
