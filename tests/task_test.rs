//! Recorder task tests: requests, fire-and-forget posts, state waiting and
//! shutdown behavior through `RecorderHandle`.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dlog_recorder::common::{RecorderError, RecorderEvent, RecordingState};
use dlog_recorder::config::{DefaultsConfig, RecorderConfig};
use dlog_recorder::recorder::{
    DataType, DlogFileReader, DlogHeader, FixedChannels, FsStorage, ManualTicks, Range, Recorder,
    RecorderHandle, RecordingEngine, RecordingParameters, ResourceType, SampleValue, XAxis, YAxis,
};
use tempfile::{tempdir, TempDir};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    handle: RecorderHandle,
    task: JoinHandle<()>,
    shutdown: broadcast::Sender<()>,
    ticks: ManualTicks,
    dir: TempDir,
}

impl Harness {
    fn spawn() -> Self {
        let ticks = ManualTicks::new(0);
        let config = RecorderConfig::default();
        let engine = RecordingEngine::new(
            config.clone(),
            DefaultsConfig::default(),
            Box::new(FsStorage::new()),
            Box::new(FixedChannels::new(vec![12.0], vec![0.25])),
        )
        .with_ticks(Arc::new(ticks.clone()));
        let (recorder, handle) = Recorder::new(engine, &config);
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(recorder.run(shutdown_rx));
        Self {
            handle,
            task,
            shutdown,
            ticks,
            dir: tempdir().unwrap(),
        }
    }

    fn path(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().into_owned()
    }

    async fn stop(self) -> TempDir {
        let _ = self.shutdown.send(());
        timeout(WAIT, self.task)
            .await
            .expect("recorder task did not stop")
            .unwrap();
        self.dir
    }
}

fn trace_params(path: String) -> RecordingParameters {
    let mut p = RecordingParameters::default();
    p.file_path = path;
    p.x_axis = XAxis {
        step: 0.01,
        range: Range::new(0.0, 10.0),
        ..Default::default()
    };
    p.y_axes = vec![
        YAxis {
            label: "a".to_string(),
            range: Range::new(-10.0, 10.0),
            ..Default::default()
        },
        YAxis {
            label: "b".to_string(),
            range: Range::new(-10.0, 10.0),
            ..Default::default()
        },
    ];
    p
}

fn periodic_params(path: String, period: f64, duration: f64) -> RecordingParameters {
    let mut p = RecordingParameters::default();
    p.file_path = path;
    p.period = period;
    p.duration = duration;
    p.enable_item(0, ResourceType::Voltage, true);
    p.enable_item(0, ResourceType::Current, true);
    p
}

fn read_header(path: &Path) -> DlogHeader {
    DlogFileReader::new(File::open(path).unwrap())
        .unwrap()
        .header()
        .clone()
}

#[tokio::test]
async fn test_trace_session_through_handle() {
    let h = Harness::spawn();
    let path = h.path("trace.dlog");

    assert_ok!(h.handle.set_params(trace_params(path.clone())).await);
    assert_ok!(h.handle.initiate_trace().await);
    assert_eq!(h.handle.state(), RecordingState::Executing);
    assert!(h.handle.is_executing());

    for i in 0..5 {
        assert_ok!(h.handle.log(vec![i as f32, 2.0 * i as f32]).await);
    }
    assert_ok!(h.handle.log_bookmark("midway").await);
    let value = assert_ok!(h.handle.value(4, 1).await);
    assert_eq!(value, Some(SampleValue::Value(8.0)));

    assert_ok!(h.handle.toggle_stop().await);
    assert!(h.handle.is_idle());
    let status = h.handle.status();
    assert_eq!(status.file_path.as_deref(), Some(path.as_str()));
    assert_eq!(status.counters.rows, 5);
    assert_eq!(status.counters.bookmarks, 1);

    let dir = h.stop().await;
    let header = read_header(&dir.path().join("trace.dlog"));
    assert_eq!(header.data_size, 5);
    assert_eq!(header.bookmarks_size, 1);
}

#[tokio::test]
async fn test_packed_ingestion_through_handle() {
    let h = Harness::spawn();
    let path = h.path("packed.dlog");
    let mut params = trace_params(path);
    params.y_axes[0].data_type = DataType::Bit;
    params.y_axes[1].data_type = DataType::Int24Be;
    params.y_axes.push(YAxis {
        label: "c".to_string(),
        data_type: DataType::Bit,
        range: Range::new(0.0, 1.0),
        ..Default::default()
    });
    assert_ok!(h.handle.set_params(params).await);
    assert_ok!(h.handle.initiate_trace().await);

    assert_ok!(h.handle.log_int24(vec![0xFF, 0xFF, 0xFE], 0b101).await);
    assert_ok!(h.handle.log_bits(0b001).await);
    assert_ok!(h.handle.toggle_stop().await);

    let dir = h.stop().await;
    let mut reader = DlogFileReader::new(File::open(dir.path().join("packed.dlog")).unwrap())
        .unwrap();
    let rows = reader.read_rows().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].values, vec![1.0, -2.0, 1.0]);
    assert_eq!(rows[1].values, vec![1.0, 0.0, 0.0]);
}

#[tokio::test]
async fn test_module_progress_through_handle() {
    let h = Harness::spawn();
    assert_ok!(h.handle.set_params(trace_params("3:/dlog/remote.dlog".to_string())).await);
    assert_ok!(h.handle.initiate_trace().await);
    assert_ok!(h.handle.set_module_progress(2048, 7).await);
    // Serialize behind the post
    assert_ok!(h.handle.value(0, 0).await);

    let status = h.handle.status();
    assert_eq!(status.file_length, 2048);
    assert_eq!(status.rows, 7);
    assert_ok!(h.handle.abort().await);
    h.stop().await;
}

#[tokio::test]
async fn test_request_returns_validation_error() {
    let h = Harness::spawn();
    let err = assert_err!(h.handle.initiate().await);
    assert!(matches!(err, RecorderError::InvalidParameters(_)));
    assert!(h.handle.is_idle());
    h.stop().await;
}

#[tokio::test]
async fn test_posted_error_reaches_status() {
    let h = Harness::spawn();
    assert_ok!(h.handle.post(RecorderEvent::Initiate).await);
    // Serialize behind the post; a no-op request publishes before replying
    assert_ok!(h.handle.abort().await);

    let status = h.handle.status();
    assert_eq!(status.state, RecordingState::Idle);
    let last = status.last_error.expect("posted error not reported");
    assert!(last.contains("No monitored item"));
    h.stop().await;
}

#[tokio::test]
async fn test_parameters_locked_while_executing() {
    let h = Harness::spawn();
    assert_ok!(h.handle.set_params(trace_params(h.path("lock.dlog"))).await);
    assert_ok!(h.handle.initiate_trace().await);

    let err = assert_err!(h.handle.set_params(RecordingParameters::default()).await);
    assert!(matches!(
        err,
        RecorderError::ParametersLocked(RecordingState::Executing)
    ));
    assert_ok!(h.handle.abort().await);
    h.stop().await;
}

#[tokio::test]
async fn test_periodic_session_finishes_and_wakes_waiter() {
    let h = Harness::spawn();
    let path = h.path("periodic.dlog");
    assert_ok!(h.handle.set_params(periodic_params(path, 0.1, 0.2)).await);

    let mut states = h.handle.subscribe_state();
    assert_ok!(h.handle.initiate().await);
    assert_eq!(*states.borrow_and_update(), RecordingState::Executing);

    // One jump past the end: the scheduler catches up on every missed row
    h.ticks.advance(1000);
    assert_ok!(
        timeout(WAIT, h.handle.wait_for_state(RecordingState::Idle))
            .await
            .expect("session did not finish")
    );

    let dir = h.stop().await;
    let mut reader = DlogFileReader::new(File::open(dir.path().join("periodic.dlog")).unwrap())
        .unwrap();
    assert_eq!(reader.header().data_size, 3);
    let rows = reader.read_rows().unwrap();
    assert!(rows.iter().all(|r| r.values == vec![12.0, 0.25]));
}

#[tokio::test]
async fn test_shutdown_finalizes_active_session() {
    let h = Harness::spawn();
    let path = h.path("shutdown.dlog");
    assert_ok!(h.handle.set_params(periodic_params(path, 0.1, 60.0)).await);
    assert_ok!(h.handle.initiate().await);

    // The first row is due at time zero
    let handle = h.handle.clone();
    timeout(WAIT, async move {
        while handle.status().rows == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("no row sampled");

    let handle = h.handle.clone();
    let dir = h.stop().await;
    assert!(handle.is_idle());
    assert!(matches!(
        handle.initiate().await,
        Err(RecorderError::ChannelClosed)
    ));

    let header = read_header(&dir.path().join("shutdown.dlog"));
    assert_eq!(header.data_size, 1);
    assert_eq!(header.final_duration, 0.0);
}

#[tokio::test]
async fn test_task_ends_when_handles_dropped() {
    let Harness {
        handle,
        task,
        shutdown,
        ..
    } = Harness::spawn();
    drop(handle);
    assert_ok!(timeout(WAIT, task).await.expect("task kept running"));
    drop(shutdown);
}
