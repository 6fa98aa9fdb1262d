//! Run progress: how many leaves have reached a terminal outcome.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::mlog;

/// Receives progress notifications for a run.
pub trait ProgressSink: Send + Sync {
    /// Called once before any leaf runs.
    fn started(&self, _total: usize) {}

    /// Called each time a leaf succeeds or fails.
    fn leaf_finished(&self, label: &str, success: bool, completed: usize, total: usize);
}

/// Sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn leaf_finished(&self, _label: &str, _success: bool, _completed: usize, _total: usize) {}
}

/// Sink that writes progress lines to the file log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn started(&self, total: usize) {
        mlog!("Scheduling {} targets", total);
    }

    fn leaf_finished(&self, label: &str, success: bool, completed: usize, total: usize) {
        let outcome = if success { "done" } else { "failed" };
        mlog!("[{}/{}] {} {}", completed, total, label, outcome);
    }
}

/// Counter shared between a run and whoever observes it.
pub struct Progress {
    total: usize,
    completed: AtomicUsize,
    sink: Arc<dyn ProgressSink>,
}

impl Progress {
    pub fn new(total: usize, sink: Arc<dyn ProgressSink>) -> Self {
        sink.started(total);
        Self {
            total,
            completed: AtomicUsize::new(0),
            sink,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Record a leaf's terminal outcome.
    pub fn record(&self, label: &str, success: bool) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.sink.leaf_finished(label, success, completed, self.total);
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("total", &self.total)
            .field("completed", &self.completed())
            .finish()
    }
}
