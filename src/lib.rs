//! Streamwatch: monitors audio/video streams for black, frozen, silent and
//! stalled output.
//!
//! One `streamwatch` process watches one stream through an ffmpeg
//! diagnostic subprocess and alerts operators when a condition persists.
//! The `streamwatch-supervisor` member keeps the right set of these
//! processes running.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod store;

pub mod alert;
pub mod probe;
