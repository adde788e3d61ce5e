//! Progress tracking for frame output.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A progress update event.
#[derive(Debug, Clone)]
pub enum ProgressUpdate {
    /// Output has started.
    Started {
        total_frames: usize,
    },
    /// A frame was written.
    FrameWritten {
        index: usize,
        written: usize,
        total: usize,
    },
    /// Overall progress.
    Progress {
        percent: f32,
        elapsed_ms: u64,
        fps: f64,
        estimated_remaining_ms: Option<u64>,
    },
    /// Output has completed.
    Completed {
        frames_written: usize,
        total_duration_ms: u64,
    },
    /// Output was cancelled.
    Cancelled,
    /// A frame failed.
    Error {
        index: Option<usize>,
        message: String,
    },
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Tracks output progress and allows cancellation.
pub struct ProgressTracker {
    total_frames: usize,
    written: AtomicU64,
    cancelled: AtomicBool,
    start_time: Option<Instant>,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    /// Create a tracker for `total_frames` frames.
    pub fn new(total_frames: usize) -> Self {
        Self {
            total_frames,
            written: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            start_time: None,
            callback: None,
        }
    }

    /// Create a tracker wrapped in Arc for sharing.
    pub fn new_shared(total_frames: usize) -> Arc<Self> {
        Arc::new(Self::new(total_frames))
    }

    /// Set a callback for progress updates.
    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Start tracking.
    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
        self.send_update(ProgressUpdate::Started {
            total_frames: self.total_frames,
        });
    }

    /// Report that frame `index` has been written.
    pub fn frame_written(&self, index: usize) {
        let written = self.written.fetch_add(1, Ordering::Relaxed) as usize + 1;
        self.send_update(ProgressUpdate::FrameWritten {
            index,
            written,
            total: self.total_frames,
        });
        self.send_progress_update();
    }

    /// Number of frames written so far.
    pub fn frames_written(&self) -> usize {
        self.written.load(Ordering::Relaxed) as usize
    }

    /// Check if output should stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.send_update(ProgressUpdate::Cancelled);
    }

    /// Report an error.
    pub fn report_error(&self, index: Option<usize>, message: String) {
        self.send_update(ProgressUpdate::Error { index, message });
    }

    /// Complete tracking.
    pub fn complete(&self) {
        self.send_update(ProgressUpdate::Completed {
            frames_written: self.frames_written(),
            total_duration_ms: self.elapsed_ms(),
        });
    }

    /// Current progress percentage.
    pub fn progress_percent(&self) -> f32 {
        if self.total_frames == 0 {
            return 100.0;
        }
        (self.frames_written() as f32 / self.total_frames as f32) * 100.0
    }

    /// Frames written per second since `start`.
    pub fn fps(&self) -> f64 {
        let elapsed = self.start_time.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.frames_written() as f64 / elapsed
    }

    /// Estimate remaining time in milliseconds.
    pub fn estimated_remaining_ms(&self) -> Option<u64> {
        let written = self.frames_written();
        if written == 0 {
            return None;
        }
        let per_frame = self.elapsed_ms() / written as u64;
        let remaining = self.total_frames.saturating_sub(written);
        Some(per_frame * remaining as u64)
    }

    fn elapsed_ms(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    fn send_update(&self, update: ProgressUpdate) {
        if let Some(ref callback) = self.callback {
            callback(update);
        }
    }

    fn send_progress_update(&self) {
        self.send_update(ProgressUpdate::Progress {
            percent: self.progress_percent(),
            elapsed_ms: self.elapsed_ms(),
            fps: self.fps(),
            estimated_remaining_ms: self.estimated_remaining_ms(),
        });
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_progress_calculation() {
        let tracker = ProgressTracker::new(4);
        assert_eq!(tracker.progress_percent(), 0.0);
        assert_eq!(tracker.estimated_remaining_ms(), None);

        tracker.frame_written(0);
        tracker.frame_written(1);
        assert_eq!(tracker.progress_percent(), 50.0);
        assert_eq!(ProgressTracker::new(0).progress_percent(), 100.0);
    }

    #[test]
    fn test_cancellation() {
        let tracker = ProgressTracker::new(10);
        assert!(!tracker.is_cancelled());
        tracker.cancel();
        assert!(tracker.is_cancelled());
    }

    #[test]
    fn test_callback_invoked() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let mut tracker = ProgressTracker::new(5).with_callback(Box::new(move |_| {
            call_count_clone.fetch_add(1, Ordering::Relaxed);
        }));

        tracker.start();
        tracker.frame_written(0);
        tracker.complete();

        // Started, FrameWritten, Progress, Completed
        assert_eq!(call_count.load(Ordering::Relaxed), 4);
    }
}
