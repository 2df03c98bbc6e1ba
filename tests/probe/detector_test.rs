//! Condition detector behavior over classified diagnostic lines.

use std::time::{Duration, Instant};

use streamwatch::probe::classifier::{classify, ProbeEvent};
use streamwatch::probe::detector::{
    ConditionDetector, ConditionKind, ConditionState, Decision, DecisionKind, DetectorSettings,
};

const BLACK_LINE: &str =
    "[Parsed_blackframe_1 @ 0x5581] [info] frame:{n} pblack:100 pts:1 t:0.04 type:P last_keyframe:0";
const BLACK_END_LINE: &str =
    "[blackdetect @ 0x5582] black_start:10 black_end:45 black_duration:35";

fn settings() -> DetectorSettings {
    DetectorSettings {
        black_duration: Duration::from_secs(30),
        freeze_duration: Duration::from_secs(600),
        stale_timeout: Duration::from_secs(10),
        ramp_up: Duration::from_secs(10),
        freeze_priority: false,
    }
}

fn at(t0: Instant, secs: u64) -> Instant {
    t0.checked_add(Duration::from_secs(secs)).expect("instant")
}

fn black(n: u64) -> ProbeEvent {
    classify(&BLACK_LINE.replace("{n}", &n.to_string()))
}

/// Drive `events` through a fresh detector, one per `(second, event)`.
fn run(settings: DetectorSettings, events: &[(u64, ProbeEvent)]) -> Vec<Decision> {
    let t0 = Instant::now();
    let mut detector = ConditionDetector::new(settings, t0);
    events
        .iter()
        .flat_map(|(secs, event)| detector.observe(event, at(t0, *secs)))
        .collect()
}

// ---------------------------------------------------------------------------
// Quiet streams
// ---------------------------------------------------------------------------

#[test]
fn lines_without_markers_never_alert() {
    let lines = [
        "Input #0, mpegts, from 'udp://239.0.0.1:1234':",
        "  Stream #0:0: Video: h264 (High), yuv420p, 1920x1080",
        "[https @ 0x1] Opening 'https://cdn/seg1.ts' for reading",
        "frame= 1200 fps= 25 q=-0.0 size=N/A time=00:00:48.00",
    ];
    let events: Vec<(u64, ProbeEvent)> = (11..200u64)
        .zip(lines.iter().cycle())
        .map(|(secs, line)| (secs, classify(line)))
        .collect();
    assert!(run(settings(), &events).is_empty());
}

// ---------------------------------------------------------------------------
// Black
// ---------------------------------------------------------------------------

#[test]
fn continuous_black_alerts_once_and_restores_once() {
    let mut events: Vec<(u64, ProbeEvent)> = (11..=60).map(|s| (s, black(s))).collect();
    events.push((61, classify(BLACK_END_LINE)));
    events.push((62, classify(BLACK_END_LINE)));

    let decisions = run(settings(), &events);
    assert_eq!(decisions.len(), 2, "{decisions:?}");
    assert_eq!(decisions[0].kind, DecisionKind::Alert);
    assert_eq!(decisions[0].message, "BLACKFRAME DURATION EXCEEDED 30sec");
    assert_eq!(decisions[1].kind, DecisionKind::Restore);
    assert_eq!(decisions[1].message, "Blackframe issue ended");
}

#[test]
fn black_alert_fires_when_run_reaches_duration() {
    let t0 = Instant::now();
    let mut detector = ConditionDetector::new(settings(), t0);
    for s in 11..41 {
        assert!(detector.observe(&black(s), at(t0, s)).is_empty(), "second {s}");
    }
    let decisions = detector.observe(&black(41), at(t0, 41));
    assert_eq!(decisions.len(), 1);
    assert_eq!(
        detector.condition(ConditionKind::Black).state,
        ConditionState::Alerted
    );
}

#[test]
fn black_gap_resets_timer_without_end_marker() {
    let t0 = Instant::now();
    let mut detector = ConditionDetector::new(settings(), t0);
    for s in 11..=35 {
        detector.observe(&black(s), at(t0, s));
    }
    detector.expire(at(t0, 42));
    assert_eq!(
        detector.condition(ConditionKind::Black).state,
        ConditionState::Idle
    );

    // A fresh run needs the full duration again.
    for s in 43..=72 {
        assert!(detector.observe(&black(s), at(t0, s)).is_empty(), "second {s}");
    }
    assert_eq!(detector.observe(&black(73), at(t0, 73)).len(), 1);
}

#[test]
fn black_gap_between_frames_restarts_the_run() {
    let mut events: Vec<(u64, ProbeEvent)> = (11..=35).map(|s| (s, black(s))).collect();
    events.extend((42..=71).map(|s| (s, black(s))));
    assert!(run(settings(), &events).is_empty(), "no carry-over across the gap");

    events.push((72, black(72)));
    let decisions = run(settings(), &events);
    assert_eq!(decisions.len(), 1, "{decisions:?}");
    assert_eq!(decisions[0].message, "BLACKFRAME DURATION EXCEEDED 30sec");
}

#[test]
fn black_gap_within_window_keeps_the_run() {
    let mut events: Vec<(u64, ProbeEvent)> = (11..=20).map(|s| (s, black(s))).collect();
    events.extend((25..=41).map(|s| (s, black(s))));
    let decisions = run(settings(), &events);
    assert_eq!(decisions.len(), 1, "{decisions:?}");
}

#[test]
fn black_end_without_alert_is_silent() {
    let events = vec![(11, black(1)), (12, classify(BLACK_END_LINE))];
    assert!(run(settings(), &events).is_empty());
}

// ---------------------------------------------------------------------------
// Freeze
// ---------------------------------------------------------------------------

#[test]
fn freeze_suppressed_while_black_is_active() {
    let events = vec![
        (11, black(1)),
        (12, classify("[freezedetect @ 0x1] lavfi.freezedetect.freeze_start: 3")),
    ];
    assert!(run(settings(), &events).is_empty());
}

#[test]
fn freeze_priority_overrides_black_suppression() {
    let events = vec![
        (11, black(1)),
        (12, classify("[freezedetect @ 0x1] lavfi.freezedetect.freeze_start: 3")),
        (13, classify("[freezedetect @ 0x1] lavfi.freezedetect.freeze_end: 9")),
    ];
    let decisions = run(
        DetectorSettings {
            freeze_priority: true,
            ..settings()
        },
        &events,
    );
    let messages: Vec<&str> = decisions.iter().map(|d| d.message.as_str()).collect();
    assert_eq!(
        messages,
        vec!["FREEZEFRAME DURATION EXCEEDED 600sec", "Freezeframe issue ended"]
    );
}

#[test]
fn repeated_freeze_start_alerts_once() {
    let start = classify("lavfi.freezedetect.freeze_start: 3");
    let events = vec![(11, start.clone()), (20, start.clone()), (30, start)];
    assert_eq!(run(settings(), &events).len(), 1);
}

// ---------------------------------------------------------------------------
// Stale frames
// ---------------------------------------------------------------------------

#[test]
fn stalled_counter_alerts_once_then_restores() {
    let frame = |n: u64| classify(&format!("[h264 @ 0x1] [debug] frame:{n} pts:0"));
    let events = vec![
        (11, frame(5)),
        (12, frame(5)),
        (20, frame(5)),
        (23, frame(5)),
        (30, frame(5)),
        (31, frame(6)),
    ];
    let decisions = run(settings(), &events);
    assert_eq!(decisions.len(), 2, "{decisions:?}");
    assert_eq!(decisions[0].condition, ConditionKind::StaleFrame);
    assert_eq!(decisions[0].message, "NO_NEW_FRAMES DURATION EXCEEDED 10sec");
    assert_eq!(decisions[1].message, "NO_NEW_FRAMES CONDITION ENDED");
}

#[test]
fn advancing_counter_never_alerts() {
    let events: Vec<(u64, ProbeEvent)> = (11..100u64)
        .map(|s| (s, ProbeEvent::FrameCounter(s)))
        .collect();
    assert!(run(settings(), &events).is_empty());
}

// ---------------------------------------------------------------------------
// Ramp-up
// ---------------------------------------------------------------------------

#[test]
fn events_inside_ramp_up_leave_no_state() {
    let t0 = Instant::now();
    let mut detector = ConditionDetector::new(settings(), t0);
    for s in 0..=10 {
        assert!(detector.observe(&black(s), at(t0, s)).is_empty());
        detector.observe(&ProbeEvent::FrameCounter(s), at(t0, s));
    }
    assert_eq!(
        detector.condition(ConditionKind::Black).state,
        ConditionState::Idle
    );
    assert_eq!(detector.last_frame(), 0);
}
