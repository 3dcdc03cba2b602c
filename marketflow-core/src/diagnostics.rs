//! Diagnostics sink passed explicitly into the merge engine, scheduler,
//! ingestion and pruning.
//!
//! Warnings report repaired inconsistencies (metadata drift, untimed points).
//! Status lines report progress (pages downloaded, rows ingested).

use std::sync::Mutex;

/// Receiver for non-fatal warnings and progress messages.
pub trait Diagnostics: Send + Sync {
    /// A recoverable inconsistency was repaired or a record was skipped.
    fn warn(&self, message: &str);

    /// Progress report, shown in verbose mode.
    fn status(&self, message: &str);
}

/// Forwards diagnostics to `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn warn(&self, message: &str) {
        tracing::warn!(target: "marketflow", "{message}");
    }

    fn status(&self, message: &str) {
        tracing::info!(target: "marketflow", "{message}");
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl Diagnostics for Silent {
    fn warn(&self, _message: &str) {}

    fn status(&self, _message: &str) {}
}

/// Severity of a recorded diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Warning,
    Status,
}

/// Collects diagnostics in memory so callers can inspect them afterwards.
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    entries: Mutex<Vec<(DiagnosticLevel, String)>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, level: DiagnosticLevel, message: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push((level, message.to_string()));
    }

    /// All recorded entries, oldest first.
    pub fn entries(&self) -> Vec<(DiagnosticLevel, String)> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(level, _)| *level == DiagnosticLevel::Warning)
            .map(|(_, message)| message)
            .collect()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(level, _)| *level == DiagnosticLevel::Status)
            .map(|(_, message)| message)
            .collect()
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn warn(&self, message: &str) {
        self.push(DiagnosticLevel::Warning, message);
    }

    fn status(&self, message: &str) {
        self.push(DiagnosticLevel::Status, message);
    }
}
