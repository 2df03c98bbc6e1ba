//! Event Classifier: maps one raw diagnostic line to a tagged event.
//!
//! This is the only code coupled to ffmpeg's textual output grammar.
//! Everything downstream works on [`ProbeEvent`].

use std::sync::LazyLock;

use regex::Regex;

/// Blackframe filter report, anchored at line start.
static BLACKFRAME_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\[Parsed_blackframe_1.* frame:(\d+).* last_keyframe:(\d+)").ok()
});

/// Verbose per-frame debug line carrying the decoder frame counter.
static FRAME_COUNTER_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[debug\] frame:(\d+)").ok());

const STREAM_FOUND_MARKERS: [&str; 2] = ["Stream #0:0: Video", "Stream #0:1: Video"];
const TRANSPORT_MARKER: &str = "https @ ";

/// A classified diagnostic line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    /// The blackframe filter reported a black frame.
    BlackFrameSeen {
        /// Frame number of the black frame.
        frame: u64,
        /// Frame number of the last keyframe.
        last_keyframe: u64,
    },
    /// The blackdetect filter closed a black segment.
    BlackSegmentEnded,
    /// freezedetect reported the start of a freeze.
    FreezeStarted,
    /// freezedetect reported the end of a freeze.
    FreezeEnded,
    /// silencedetect reported the start of silence.
    SilenceStarted,
    /// silencedetect reported the end of silence.
    SilenceEnded,
    /// Verbose frame counter.
    FrameCounter(u64),
    /// The input's video stream was identified.
    StreamFound,
    /// Transport-level notice from the HTTP(S) demuxer.
    TransportNotice,
    /// Nothing the detector cares about.
    Uninteresting,
}

/// Classify one line.
pub fn classify(line: &str) -> ProbeEvent {
    if let Some(caps) = BLACKFRAME_RE.as_ref().and_then(|re| re.captures(line)) {
        let frame = caps.get(1).and_then(|m| m.as_str().parse().ok());
        let last_keyframe = caps.get(2).and_then(|m| m.as_str().parse().ok());
        if let (Some(frame), Some(last_keyframe)) = (frame, last_keyframe) {
            return ProbeEvent::BlackFrameSeen {
                frame,
                last_keyframe,
            };
        }
    }

    if line.contains("freeze_start") {
        return ProbeEvent::FreezeStarted;
    }
    if line.contains("freeze_end") {
        return ProbeEvent::FreezeEnded;
    }
    if line.contains("silence_start") {
        return ProbeEvent::SilenceStarted;
    }
    if line.contains("silence_end") {
        return ProbeEvent::SilenceEnded;
    }
    if line.contains("black_end") {
        return ProbeEvent::BlackSegmentEnded;
    }

    if let Some(frame) = FRAME_COUNTER_RE
        .as_ref()
        .and_then(|re| re.captures(line))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
    {
        return ProbeEvent::FrameCounter(frame);
    }

    if STREAM_FOUND_MARKERS.iter().any(|m| line.contains(m)) {
        return ProbeEvent::StreamFound;
    }
    if line.contains(TRANSPORT_MARKER) {
        return ProbeEvent::TransportNotice;
    }

    ProbeEvent::Uninteresting
}
