//! Probe worker runs against a scripted diagnostic process.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use streamwatch::alert::{AlertDispatcher, DispatchOutcome, DispatchSettings, Notifier, NotifyError};
use streamwatch::probe::capture::{FrameCapture, StaticImage};
use streamwatch::probe::command::Invocation;
use streamwatch::probe::detector::{ConditionDetector, DecisionKind, DetectorSettings};
use streamwatch::probe::{ProbeError, ProbeWorker, WorkerSettings};
use streamwatch::store::{SqliteStore, Store};

/// Records every notification.
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .expect("lock")
            .push((subject.to_owned(), body.to_owned()));
        Ok(())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<SqliteStore>,
    notifier: Arc<RecordingNotifier>,
    image: PathBuf,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(
        SqliteStore::open(&dir.path().join("streamwatch.db"))
            .await
            .expect("open store"),
    );
    let image = dir.path().join("audio.jpg");
    std::fs::write(&image, b"\xff\xd8jpeg").expect("write image");
    Fixture {
        _dir: dir,
        store,
        notifier: Arc::new(RecordingNotifier::default()),
        image,
    }
}

fn settings(streamdown_disabled: bool) -> WorkerSettings {
    WorkerSettings {
        poll_interval: Duration::from_millis(50),
        frame_grab_interval: Duration::from_secs(60),
        log_diagnostic_output: true,
        streamdown_disabled,
        detector: DetectorSettings {
            ramp_up: Duration::ZERO,
            ..DetectorSettings::default()
        },
    }
}

fn worker(f: &Fixture, program: &Path, script: &str, streamdown_disabled: bool) -> ProbeWorker {
    let capture: Arc<dyn FrameCapture> = Arc::new(StaticImage::new(&f.image));
    let dispatcher = AlertDispatcher::new(
        "Test".to_owned(),
        DispatchSettings {
            disabled: false,
            throttle: Duration::ZERO,
            send_restored: true,
        },
        Arc::clone(&f.notifier) as Arc<dyn Notifier>,
        Arc::clone(&f.store) as Arc<dyn Store>,
        Arc::clone(&capture),
    );
    ProbeWorker::new(
        "Test".to_owned(),
        "udp://x".to_owned(),
        Invocation {
            program: program.to_path_buf(),
            args: vec!["-c".to_owned(), script.to_owned()],
        },
        settings(streamdown_disabled),
        dispatcher,
        capture,
        Arc::clone(&f.store) as Arc<dyn Store>,
    )
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subprocess_exit_ends_run_and_alerts_are_recorded() {
    let f = fixture().await;
    let script = "sleep 0.1; \
        echo '[silencedetect @ 0x1] silence_start: 3.2' >&2; \
        echo '[silencedetect @ 0x1] silence_end: 9.1 | silence_duration: 5.9' >&2; \
        sleep 0.5; exit 3";
    let mut worker = worker(&f, Path::new("sh"), script, false);

    let error = tokio::time::timeout(Duration::from_secs(10), worker.run())
        .await
        .expect("worker should stop when its subprocess exits");
    assert!(matches!(error, ProbeError::Exited(_)), "{error}");

    let sent = f.notifier.sent();
    let bodies: Vec<&str> = sent.iter().map(|(_, body)| body.as_str()).collect();
    assert_eq!(bodies, vec!["SILENCE DURATION EXCEEDED", "Audio restored"]);
    assert!(sent.iter().all(|(subject, _)| subject == "Test:"));

    let alerts = f.store.recent_alerts("Test", 10).await.expect("alerts");
    assert_eq!(alerts.len(), 2);
    assert!(alerts.iter().all(|a| a.image == "/9hqcGVn"));

    let snapshot = f.store.snapshot("Test").await.expect("snapshot").expect("row");
    assert_eq!(snapshot.data, "/9hqcGVn");
}

#[tokio::test]
async fn detector_time_comes_from_line_arrival() {
    let f = fixture().await;
    let worker = worker(&f, Path::new("sh"), "exit 0", false);
    let t0 = std::time::Instant::now();
    let mut detector = ConditionDetector::new(settings(false).detector, t0);
    let at = |secs: u64| t0.checked_add(Duration::from_secs(secs)).expect("instant");
    let black = |n: u64| {
        format!("[Parsed_blackframe_1 @ 0x1] [info] frame:{n} pblack:99 pts:1 t:0.04 type:P last_keyframe:0")
    };

    // Lines handled back-to-back, as after a long frame grab, keep the
    // spacing they were read with.
    for s in 1..31u64 {
        let decisions = worker.handle_line(&black(s), at(s), &mut detector).await;
        assert!(decisions.is_empty(), "second {s}");
    }
    let decisions = worker.handle_line(&black(31), at(31), &mut detector).await;
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].kind, DecisionKind::Alert);

    let bodies: Vec<String> = f.notifier.sent().into_iter().map(|(_, b)| b).collect();
    assert_eq!(bodies, vec!["BLACKFRAME DURATION EXCEEDED 30sec".to_owned()]);
}

// ---------------------------------------------------------------------------
// Failure reporting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_failure_is_reported_once() {
    let f = fixture().await;
    let mut worker = worker(&f, Path::new("sh"), "exit 1", false);

    let error = worker.run().await;
    assert_eq!(
        worker.report_failure(&error).await,
        Some(DispatchOutcome::Dispatched)
    );
    assert!(worker.is_down());
    assert_eq!(worker.report_failure(&error).await, None);

    let bodies: Vec<String> = f.notifier.sent().into_iter().map(|(_, b)| b).collect();
    assert_eq!(bodies, vec!["Stream failure for: udp://x".to_owned()]);
}

#[tokio::test]
async fn streamdown_disabled_skips_failure_alert() {
    let f = fixture().await;
    let mut worker = worker(&f, Path::new("sh"), "exit 1", true);

    let error = worker.run().await;
    assert_eq!(worker.report_failure(&error).await, None);
    assert!(worker.is_down());
    assert!(f.notifier.sent().is_empty());
}

#[tokio::test]
async fn missing_diagnostic_binary_is_a_launch_error() {
    let f = fixture().await;
    let mut worker = worker(&f, Path::new("/nonexistent/ffmpeg"), "", false);

    let error = worker.run().await;
    assert!(matches!(error, ProbeError::Launch(_)), "{error}");
}

#[tokio::test]
async fn missing_snapshot_image_is_fatal() {
    let f = fixture().await;
    std::fs::remove_file(&f.image).expect("remove image");
    let mut worker = worker(&f, Path::new("sh"), "sleep 5", false);

    let error = tokio::time::timeout(Duration::from_secs(10), worker.run())
        .await
        .expect("capture failure should stop the worker");
    assert!(matches!(error, ProbeError::Capture(_)), "{error}");
}
