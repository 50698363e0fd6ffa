use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedDownload {
    /// Position in the enumerated file list.
    pub index: usize,
    pub remote_path: String,
}

/// FIFO of pending downloads shared by the worker pool.
#[derive(Debug, Default)]
pub struct DownloadQueue {
    inner: Mutex<VecDeque<QueuedDownload>>,
}

impl DownloadQueue {
    pub fn from_paths(paths: &[String]) -> Self {
        let inner = paths
            .iter()
            .enumerate()
            .map(|(index, path)| QueuedDownload {
                index,
                remote_path: path.clone(),
            })
            .collect();
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub fn take(&self) -> Option<QueuedDownload> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}
