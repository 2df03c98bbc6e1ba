//! Streamwatch fleet supervisor.
//!
//! Keeps one `streamwatch` probe running per enabled stream config,
//! kills probes for disabled streams, honors the global restart directive
//! and tears the fleet down on shutdown.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Supervisor configuration loading and validation.
pub mod config;
/// Probe worker launch and command construction.
pub mod launcher;
/// The reconciliation tick.
pub mod reconcile;
/// Process table discovery and termination.
pub mod registry;
/// Worker log tail extraction.
pub mod status;
