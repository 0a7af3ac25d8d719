//! Sync run state machine and report

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of one synchronization run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRunState {
    Idle,
    /// Walking the tree and writing catalog batches
    Traversing,
    /// Deleting rows the run did not see
    Reconciling,
    /// Optimizing the path index
    Indexing,
    Completed,
    Failed,
    Cancelled,
}

impl SyncRunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncRunState::Completed | SyncRunState::Failed | SyncRunState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunState::Idle => "idle",
            SyncRunState::Traversing => "traversing",
            SyncRunState::Reconciling => "reconciling",
            SyncRunState::Indexing => "indexing",
            SyncRunState::Completed => "completed",
            SyncRunState::Failed => "failed",
            SyncRunState::Cancelled => "cancelled",
        }
    }

    /// Move to `to`, rejecting transitions the run cannot take
    pub fn transition(self, to: SyncRunState) -> Result<SyncRunState> {
        use SyncRunState::*;

        let valid = match (self, to) {
            (Idle, Traversing) | (Idle, Failed) => true,
            (Traversing, Reconciling) => true,
            (Reconciling, Indexing) => true,
            (Indexing, Completed) => true,
            (Traversing | Reconciling | Indexing, Failed | Cancelled) => true,
            _ => false,
        };

        if valid {
            Ok(to)
        } else {
            Err(SyncError::InvalidStateTransition { from: self, to })
        }
    }
}

impl fmt::Display for SyncRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a completed synchronization run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub source_id: String,
    pub generation: i64,
    /// Files and directories cataloged by this run
    pub total_entries: u64,
    /// Cataloged files with an audio extension
    pub audio_files: u64,
    pub directories: u64,
    /// Symlinks, unreadable entries and entries that never materialized
    pub skipped: u64,
    /// Rows tombstoned because the run did not see them
    pub removed: u64,
    /// First per-entry error of the run; the run itself succeeded
    pub error: Option<String>,
}

impl SyncReport {
    pub fn new(source_id: impl Into<String>, generation: i64) -> Self {
        Self {
            source_id: source_id.into(),
            generation,
            ..Default::default()
        }
    }

    pub(crate) fn record_skip(&mut self, message: impl FnOnce() -> String) {
        self.skipped += 1;
        if self.error.is_none() {
            self.error = Some(message());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = SyncRunState::Idle
            .transition(SyncRunState::Traversing)
            .and_then(|s| s.transition(SyncRunState::Reconciling))
            .and_then(|s| s.transition(SyncRunState::Indexing))
            .and_then(|s| s.transition(SyncRunState::Completed))
            .unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_cancel_only_while_running() {
        assert!(SyncRunState::Traversing
            .transition(SyncRunState::Cancelled)
            .is_ok());
        assert!(SyncRunState::Idle.transition(SyncRunState::Cancelled).is_err());
        assert!(SyncRunState::Completed
            .transition(SyncRunState::Cancelled)
            .is_err());
    }

    #[test]
    fn test_no_phase_skipping() {
        let err = SyncRunState::Traversing
            .transition(SyncRunState::Completed)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid state transition from traversing to completed"
        );
    }

    #[test]
    fn test_first_skip_message_is_kept() {
        let mut report = SyncReport::new("s", 1);
        report.record_skip(|| "first".to_string());
        report.record_skip(|| "second".to_string());
        assert_eq!(report.skipped, 2);
        assert_eq!(report.error.as_deref(), Some("first"));
    }
}
