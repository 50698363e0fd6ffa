use std::sync::Mutex;
use std::time::Duration;

use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    ListingStarted {
        root: String,
    },
    FileFound {
        path: String,
    },
    SubtreeFailed {
        path: String,
        reason: String,
        /// Files found under the folder before the failure; they are kept.
        kept: usize,
    },
    ListingFinished {
        total_files: usize,
    },
    FileDownloaded {
        path: String,
        http_status: u16,
        completed: usize,
        total: usize,
        percent: u8,
    },
    FileFailed {
        path: String,
        http_status: Option<u16>,
        reason: String,
        completed: usize,
        total: usize,
        percent: u8,
    },
    Finished {
        total: usize,
        succeeded: usize,
        failed: usize,
        elapsed: Duration,
    },
}

/// Sink for pipeline events. Called from worker tasks concurrently.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Writes each event as one `tracing` line; the binary routes these to the
/// log file.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::ListingStarted { root } => {
                info!(root = %display_root(&root), "starting file listing")
            }
            ProgressEvent::FileFound { path } => info!("found file: {path}"),
            ProgressEvent::SubtreeFailed {
                path,
                reason,
                kept,
            } => {
                error!(
                    kept,
                    "listing files for {} failed: {reason}",
                    display_root(&path)
                )
            }
            ProgressEvent::ListingFinished { total_files } => {
                info!("total files to download: {total_files}")
            }
            ProgressEvent::FileDownloaded {
                path,
                http_status,
                completed,
                total,
                percent,
            } => {
                info!(http_status, "downloaded {path} successfully");
                info!("progress: {percent}% ({completed}/{total} files done)");
            }
            ProgressEvent::FileFailed {
                path,
                http_status,
                reason,
                completed,
                total,
                percent,
            } => {
                match http_status {
                    Some(status) => {
                        error!(http_status = status, "error downloading {path}: {reason}")
                    }
                    None => error!("error downloading {path}: {reason}"),
                }
                info!("progress: {percent}% ({completed}/{total} files done)");
            }
            ProgressEvent::Finished {
                total,
                succeeded,
                failed,
                elapsed,
            } => {
                if failed > 0 {
                    warn!(total, succeeded, failed, "backup finished with failures");
                } else {
                    info!(total, succeeded, failed, "backup finished");
                }
                info!("elapsed time: {:.3} seconds", elapsed.as_secs_f64());
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// `completed * 100 / total`, rounded down.
pub fn percent_complete(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    (completed.min(total) * 100 / total) as u8
}

fn display_root(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}
