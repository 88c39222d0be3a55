/// Daemon lifecycle management.
pub mod daemon;

/// Job submission and inspection.
pub mod job;

/// Device inspection, discovery and export.
pub mod device;

/// CSV batch submissions.
pub mod batch;

/// Configuration document editing.
pub mod config;

/// Upgrade-path table inspection.
pub mod path;
