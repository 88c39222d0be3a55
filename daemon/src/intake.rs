/// Pending-queue scanning, validation and admission.
pub mod jobs;

/// Out-of-band command processing (cancellations).
pub mod commands;
