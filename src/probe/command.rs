//! Construction of the ffmpeg invocations used by a probe worker.
//!
//! The filter strings are the compatibility surface with ffmpeg: the
//! classifier relies on the exact filters (and log level) chosen here.

use std::fmt;
use std::path::{Path, PathBuf};

/// Detection thresholds for one stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Luma threshold for the blackframe filter.
    pub black_threshold: u32,
    /// Seconds of continuous black before alerting.
    pub black_duration: u64,
    /// freezedetect noise tolerance in dB.
    pub freeze_threshold: f64,
    /// freezedetect duration in seconds. Zero leaves the filter out.
    pub freeze_duration: u64,
    /// silencedetect noise floor in dB.
    pub silence_threshold: f64,
    /// silencedetect duration in seconds.
    pub silence_duration: u64,
    /// Seconds between snapshot refreshes.
    pub frame_grab_interval: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            black_threshold: 32,
            black_duration: 30,
            freeze_threshold: -50.0,
            freeze_duration: 0,
            silence_threshold: -45.0,
            silence_duration: 60,
            frame_grab_interval: 60,
        }
    }
}

/// A program plus argument vector, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable path.
    pub program: PathBuf,
    /// Arguments, one element per argv entry.
    pub args: Vec<String>,
}

impl Invocation {
    /// Build a `tokio::process::Command` for this invocation.
    pub fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Video filter chain for non-audio streams.
pub fn video_filters(thresholds: &Thresholds) -> String {
    let mut filters = format!(
        "blackdetect=d=0:pix_th=0.10,blackframe=amount=98:threshold={}",
        thresholds.black_threshold
    );
    if thresholds.freeze_duration > 0 {
        filters.push_str(&format!(
            ",freezedetect=noise={}dB:duration={}",
            thresholds.freeze_threshold, thresholds.freeze_duration
        ));
    }
    filters
}

/// Audio filter, present for every stream.
pub fn audio_filter(thresholds: &Thresholds) -> String {
    format!(
        "silencedetect=noise={}dB:d={}",
        thresholds.silence_threshold, thresholds.silence_duration
    )
}

/// The long-running diagnostic invocation for a stream.
///
/// Video streams run at debug level so per-frame counters reach the
/// classifier. Output goes to a null muxer.
pub fn diagnostic_invocation(
    ffmpeg: &Path,
    uri: &str,
    audio_only: bool,
    thresholds: &Thresholds,
) -> Invocation {
    let mut args = vec!["-report".to_owned(), "-i".to_owned(), uri.to_owned()];

    if !audio_only {
        args.extend([
            "-loglevel".to_owned(),
            "repeat+level+debug".to_owned(),
            "-vf".to_owned(),
            video_filters(thresholds),
        ]);
    }

    args.extend([
        "-af".to_owned(),
        audio_filter(thresholds),
        "-max_muxing_queue_size".to_owned(),
        "9999".to_owned(),
        "-f".to_owned(),
        "null".to_owned(),
        "-".to_owned(),
    ]);

    Invocation {
        program: ffmpeg.to_path_buf(),
        args,
    }
}

/// One-shot frame grab writing a single JPEG to `output`.
pub fn frame_grab_invocation(ffmpeg: &Path, uri: &str, output: &Path) -> Invocation {
    Invocation {
        program: ffmpeg.to_path_buf(),
        args: vec![
            "-ss".to_owned(),
            "2".to_owned(),
            "-i".to_owned(),
            uri.to_owned(),
            "-frames:v".to_owned(),
            "1".to_owned(),
            "-y".to_owned(),
            "-f".to_owned(),
            "image2".to_owned(),
            "-t".to_owned(),
            "5".to_owned(),
            output.display().to_string(),
        ],
    }
}
