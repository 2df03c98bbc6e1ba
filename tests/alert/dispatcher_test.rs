//! Alert dispatcher: toggles, delivery failures and persisted records.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use streamwatch::alert::{AlertDispatcher, DispatchOutcome, DispatchSettings, Notifier, NotifyError};
use streamwatch::probe::capture::{FrameCapture, StaticImage};
use streamwatch::probe::detector::{ConditionKind, Decision, DecisionKind};
use streamwatch::store::{SqliteStore, Store};

/// Notifier that records messages and optionally fails.
struct FakeNotifier {
    fail: bool,
    sent: Mutex<Vec<String>>,
}

impl FakeNotifier {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, _subject: &str, body: &str) -> Result<(), NotifyError> {
        self.sent.lock().expect("lock").push(body.to_owned());
        if self.fail {
            Err(NotifyError::NoTargetAccepted)
        } else {
            Ok(())
        }
    }
}

struct Setup {
    _dir: tempfile::TempDir,
    store: Arc<SqliteStore>,
    capture: Arc<dyn FrameCapture>,
}

async fn setup(with_image: bool) -> Setup {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(
        SqliteStore::open(&dir.path().join("streamwatch.db"))
            .await
            .expect("open store"),
    );
    let image = dir.path().join("frame.jpg");
    if with_image {
        std::fs::write(&image, b"\xff\xd8jpeg").expect("write image");
    }
    let capture: Arc<dyn FrameCapture> = Arc::new(StaticImage::new(&image));
    Setup {
        _dir: dir,
        store,
        capture,
    }
}

fn dispatcher(s: &Setup, notifier: &Arc<FakeNotifier>, settings: DispatchSettings) -> AlertDispatcher {
    AlertDispatcher::new(
        "Lobby Cam".to_owned(),
        settings,
        Arc::clone(notifier) as Arc<dyn Notifier>,
        Arc::clone(&s.store) as Arc<dyn Store>,
        Arc::clone(&s.capture),
    )
}

fn immediate() -> DispatchSettings {
    DispatchSettings {
        disabled: false,
        throttle: Duration::ZERO,
        send_restored: true,
    }
}

fn restore() -> Decision {
    Decision {
        condition: ConditionKind::Silence,
        kind: DecisionKind::Restore,
        message: "Audio restored".to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Delivery and records
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dispatch_notifies_and_records_with_snapshot() {
    let s = setup(true).await;
    let notifier = FakeNotifier::new(false);
    let d = dispatcher(&s, &notifier, immediate());
    assert_eq!(d.subject(), "Lobby Cam:");

    let outcome = d.dispatch("BLACKFRAME DURATION EXCEEDED 30sec").await;
    assert_eq!(outcome, DispatchOutcome::Dispatched);
    assert_eq!(notifier.sent(), vec!["BLACKFRAME DURATION EXCEEDED 30sec"]);

    let records = s.store.recent_alerts("Lobby Cam", 5).await.expect("alerts");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].alert, "BLACKFRAME DURATION EXCEEDED 30sec");
    assert_eq!(records[0].image, "/9hqcGVn");
    assert_eq!(records[0].timestamp.len(), "2024-01-01 00:00:00".len());
}

#[tokio::test]
async fn delivery_failure_still_records() {
    let s = setup(true).await;
    let notifier = FakeNotifier::new(true);
    let d = dispatcher(&s, &notifier, immediate());

    assert_eq!(d.dispatch("SILENCE DURATION EXCEEDED").await, DispatchOutcome::Dispatched);
    let records = s.store.recent_alerts("Lobby Cam", 5).await.expect("alerts");
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn missing_snapshot_records_empty_image() {
    let s = setup(false).await;
    let notifier = FakeNotifier::new(false);
    let d = dispatcher(&s, &notifier, immediate());

    d.dispatch("SILENCE DURATION EXCEEDED").await;
    let records = s.store.recent_alerts("Lobby Cam", 5).await.expect("alerts");
    assert_eq!(records[0].image, "");
}

#[tokio::test]
async fn throttle_delays_the_record() {
    let s = setup(true).await;
    let notifier = FakeNotifier::new(false);
    let d = dispatcher(
        &s,
        &notifier,
        DispatchSettings {
            throttle: Duration::from_millis(200),
            ..immediate()
        },
    );

    let started = std::time::Instant::now();
    d.dispatch("SILENCE DURATION EXCEEDED").await;
    assert!(started.elapsed() >= Duration::from_millis(200));
}

// ---------------------------------------------------------------------------
// Toggles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disabled_dispatcher_does_nothing() {
    let s = setup(true).await;
    let notifier = FakeNotifier::new(false);
    let d = dispatcher(
        &s,
        &notifier,
        DispatchSettings {
            disabled: true,
            ..immediate()
        },
    );

    assert_eq!(d.dispatch("anything").await, DispatchOutcome::Disabled);
    assert!(notifier.sent().is_empty());
    assert!(s
        .store
        .recent_alerts("Lobby Cam", 5)
        .await
        .expect("alerts")
        .is_empty());
}

#[tokio::test]
async fn restores_can_be_suppressed() {
    let s = setup(true).await;
    let notifier = FakeNotifier::new(false);
    let d = dispatcher(
        &s,
        &notifier,
        DispatchSettings {
            send_restored: false,
            ..immediate()
        },
    );

    assert_eq!(
        d.dispatch_decision(&restore()).await,
        DispatchOutcome::RestoreSuppressed
    );
    assert!(notifier.sent().is_empty());

    let alert = Decision {
        kind: DecisionKind::Alert,
        message: "SILENCE DURATION EXCEEDED".to_owned(),
        ..restore()
    };
    assert_eq!(d.dispatch_decision(&alert).await, DispatchOutcome::Dispatched);
    assert_eq!(notifier.sent(), vec!["SILENCE DURATION EXCEEDED"]);
}
