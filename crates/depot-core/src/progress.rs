//! Progress reporting abstraction.
//!
//! Decouples long-running store maintenance from UI concerns. The monitor
//! doubles as the cancellation channel: engines poll [`is_cancelled`]
//! between units of work and unwind cleanly when it turns true.
//!
//! [`is_cancelled`]: ProgressMonitor::is_cancelled

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Receives progress updates from a long-running operation.
pub trait ProgressMonitor: Send + Sync {
    /// Starts a named task expected to take `total` units of work.
    fn begin_task(&self, title: &str, total: u64);

    /// Reports `completed` additional units of work.
    fn update(&self, completed: u64);

    /// Finishes the current task.
    fn end_task(&self);

    /// Returns true when the caller asked the operation to stop.
    ///
    /// Cancellation is cooperative: the operation polls this between units
    /// of work and aborts through its normal failure path.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Monitor that discards all updates and never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressMonitor;

impl ProgressMonitor for NullProgressMonitor {
    fn begin_task(&self, _title: &str, _total: u64) {}
    fn update(&self, _completed: u64) {}
    fn end_task(&self) {}
}

/// Monitor that counts work units and can be cancelled externally.
///
/// Intended for tests and embedding; rendering is the caller's concern.
#[derive(Debug, Default)]
pub struct CountingProgressMonitor {
    completed: AtomicU64,
    cancelled: AtomicBool,
}

impl CountingProgressMonitor {
    /// Creates a fresh monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total work units reported so far.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Requests cancellation of the monitored operation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

impl ProgressMonitor for CountingProgressMonitor {
    fn begin_task(&self, _title: &str, _total: u64) {}

    fn update(&self, completed: u64) {
        self.completed.fetch_add(completed, Ordering::Relaxed);
    }

    fn end_task(&self) {}

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
