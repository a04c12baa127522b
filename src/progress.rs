//! Progress reporting and cancellation for long-running operations
//!
//! Scans, hash batches, and rename batches all report through a
//! [`ProgressTracker`] and poll a [`CancelFlag`] between files. Events are
//! throttled to the tracker's update interval so a fast hashing loop does
//! not flood subscribers.

use crate::models::ProgressUpdate;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::broadcast;

/// Shared cancellation flag polled once per file
///
/// Cancellation is cooperative: the operation finishes the file it is on,
/// then stops and reports [`crate::models::Completion::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the operation holding this flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the same handle can drive another operation.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Event emitted when progress changes
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// The updated progress snapshot
    pub progress: ProgressUpdate,
    /// When the event was emitted
    pub timestamp: SystemTime,
}

/// Tracker for operation progress with broadcast event emission
pub struct ProgressTracker {
    current_progress: Arc<Mutex<ProgressUpdate>>,
    event_sender: broadcast::Sender<ProgressEvent>,
    last_update_time: Arc<Mutex<Instant>>,
    update_interval: Duration,
}

impl ProgressTracker {
    /// Create a tracker emitting at most one event per 100ms.
    pub fn new() -> Self {
        Self::with_update_interval(Duration::from_millis(100))
    }

    /// Create a tracker with a custom update interval.
    pub fn with_update_interval(interval: Duration) -> Self {
        let (event_sender, _) = broadcast::channel(1000);
        Self {
            current_progress: Arc::new(Mutex::new(ProgressUpdate::new())),
            event_sender,
            last_update_time: Arc::new(Mutex::new(Instant::now())),
            update_interval: interval,
        }
    }

    /// Subscribe to progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.event_sender.subscribe()
    }

    /// Set the total number of files in the operation.
    pub fn set_total_files(&self, total: u64) {
        if let Ok(mut progress) = self.current_progress.lock() {
            progress.total_files = total;
        }
        self.emit_if_due();
    }

    /// Advance the processed-file counter by one.
    pub fn increment_files_processed(&self) {
        if let Ok(mut progress) = self.current_progress.lock() {
            progress.files_processed += 1;
        }
        self.emit_if_due();
    }

    /// Set the file currently being worked on.
    pub fn set_current_file(&self, file_path: Option<PathBuf>) {
        if let Ok(mut progress) = self.current_progress.lock() {
            progress.current_file = file_path;
        }
        self.emit_if_due();
    }

    /// Advance the duplicate-group counter by one.
    pub fn increment_duplicates_found(&self) {
        if let Ok(mut progress) = self.current_progress.lock() {
            progress.duplicates_found += 1;
        }
        self.emit_if_due();
    }

    /// Record the running hash-cache hit count.
    pub fn set_cache_hits(&self, hits: u64) {
        if let Ok(mut progress) = self.current_progress.lock() {
            progress.cache_hits = hits;
        }
        self.emit_if_due();
    }

    /// Current progress snapshot.
    pub fn current(&self) -> ProgressUpdate {
        self.current_progress
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Emit a progress event immediately, bypassing the throttle.
    pub fn emit(&self) {
        let event = ProgressEvent {
            progress: self.current(),
            timestamp: SystemTime::now(),
        };
        let _ = self.event_sender.send(event);
    }

    /// Reset all counters for a new operation.
    pub fn reset(&self) {
        if let Ok(mut progress) = self.current_progress.lock() {
            *progress = ProgressUpdate::new();
        }
        if let Ok(mut last_update) = self.last_update_time.lock() {
            *last_update = Instant::now();
        }
    }

    fn emit_if_due(&self) {
        let due = self
            .last_update_time
            .lock()
            .map(|last| last.elapsed() >= self.update_interval)
            .unwrap_or(false);
        if due {
            self.emit();
            if let Ok(mut last_update) = self.last_update_time.lock() {
                *last_update = Instant::now();
            }
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
