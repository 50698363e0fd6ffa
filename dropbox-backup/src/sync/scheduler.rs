use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dropbox_core::DropboxClient;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::progress::{ProgressEvent, ProgressReporter, percent_complete};
use crate::sync::paths::{destination_path_for, temp_path_for};
use crate::sync::queue::{DownloadQueue, QueuedDownload};
use crate::sync::transfer::{self, TransferError};
use crate::token_manager::{TokenError, TokenManager};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("token refresh failed: {0}")]
    Token(#[from] TokenError),
    #[error("failed to prepare {path}: {source}")]
    Prepare { path: PathBuf, source: io::Error },
    #[error("download worker crashed: {0}")]
    Worker(#[from] JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub remote_path: String,
    pub local_temp_path: PathBuf,
    pub status: JobStatus,
    pub http_status: Option<u16>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub summary: DownloadSummary,
    /// One job per input path, in input order.
    pub jobs: Vec<DownloadJob>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub max_concurrent_requests: usize,
    /// Minimum spacing between two download calls of the same worker.
    pub request_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 50,
            request_delay: Duration::from_millis(100),
        }
    }
}

/// Per-worker minimum interval between issued calls.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last_issued: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_issued: None,
        }
    }

    pub async fn wait(&mut self) {
        if let Some(last) = self.last_issued {
            tokio::time::sleep_until(last + self.min_interval).await;
        }
        self.last_issued = Some(Instant::now());
    }
}

enum Outcome {
    Succeeded { http_status: u16 },
    Failed { http_status: Option<u16>, reason: String },
}

pub struct DownloadScheduler {
    client: DropboxClient,
    tokens: Arc<TokenManager>,
    reporter: Arc<dyn ProgressReporter>,
    temp_dir: PathBuf,
    config: SchedulerConfig,
}

impl DownloadScheduler {
    pub fn new(
        client: DropboxClient,
        tokens: Arc<TokenManager>,
        reporter: Arc<dyn ProgressReporter>,
        temp_dir: PathBuf,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            client,
            tokens,
            reporter,
            temp_dir,
            config,
        }
    }

    /// Downloads every path into `destination`. Individual failures are
    /// recorded in the report; only a failed token refresh aborts the run.
    pub async fn download_all(
        &self,
        file_paths: &[String],
        destination: &Path,
    ) -> Result<DownloadReport, SchedulerError> {
        for dir in [destination, self.temp_dir.as_path()] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| SchedulerError::Prepare {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        let total = file_paths.len();
        let jobs = file_paths
            .iter()
            .map(|path| DownloadJob {
                remote_path: path.clone(),
                local_temp_path: temp_path_for(&self.temp_dir, path),
                status: JobStatus::Pending,
                http_status: None,
            })
            .collect();
        let run = Arc::new(RunState {
            client: self.client.clone(),
            tokens: Arc::clone(&self.tokens),
            reporter: Arc::clone(&self.reporter),
            destination: destination.to_path_buf(),
            queue: DownloadQueue::from_paths(file_paths),
            jobs: Mutex::new(jobs),
            total,
            completed: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        });

        let workers = self.config.max_concurrent_requests.clamp(1, total.max(1));
        info!(total, workers, "starting downloads");
        let mut pool = JoinSet::new();
        for slot in 0..workers {
            let run = Arc::clone(&run);
            let delay = self.config.request_delay;
            pool.spawn(async move { run.work(slot, Throttle::new(delay)).await });
        }
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    pool.abort_all();
                    return Err(err.into());
                }
                Err(err) => {
                    pool.abort_all();
                    return Err(err.into());
                }
            }
        }

        let summary = DownloadSummary {
            total,
            succeeded: run.succeeded.load(Ordering::SeqCst),
            failed: run.failed.load(Ordering::SeqCst),
        };
        let jobs = std::mem::take(&mut *run.jobs.lock().unwrap_or_else(PoisonError::into_inner));
        Ok(DownloadReport { summary, jobs })
    }
}

/// State shared by the workers of one `download_all` call.
struct RunState {
    client: DropboxClient,
    tokens: Arc<TokenManager>,
    reporter: Arc<dyn ProgressReporter>,
    destination: PathBuf,
    queue: DownloadQueue,
    jobs: Mutex<Vec<DownloadJob>>,
    total: usize,
    completed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl RunState {
    async fn work(&self, slot: usize, mut throttle: Throttle) -> Result<(), TokenError> {
        while let Some(queued) = self.queue.take() {
            debug!(slot, path = %queued.remote_path, "worker picked up file");
            let outcome = self.download_one(&queued, &mut throttle).await?;
            self.finish(queued, outcome);
        }
        Ok(())
    }

    async fn download_one(
        &self,
        queued: &QueuedDownload,
        throttle: &mut Throttle,
    ) -> Result<Outcome, TokenError> {
        let remote_path = queued.remote_path.as_str();
        let target = match destination_path_for(&self.destination, remote_path) {
            Ok(target) => target,
            Err(err) => {
                return Ok(Outcome::Failed {
                    http_status: None,
                    reason: TransferError::from(err).to_string(),
                });
            }
        };
        let temp = self.temp_path(queued.index);

        let token = self.tokens.ensure_valid().await?;
        throttle.wait().await;

        let result: Result<u16, TransferError> = async {
            let mut download = self.client.download(token.as_str(), remote_path).await?;
            let status = download.status().as_u16();
            transfer::write_body(&mut download, &temp).await?;
            transfer::commit(&temp, &target).await?;
            Ok(status)
        }
        .await;

        match result {
            Ok(http_status) => Ok(Outcome::Succeeded { http_status }),
            Err(err) => {
                transfer::discard(&temp).await;
                // Only a rejected request carries a status; a body that broke
                // off after a 200 does not count as one.
                Ok(Outcome::Failed {
                    http_status: err.http_status(),
                    reason: err.to_string(),
                })
            }
        }
    }

    fn temp_path(&self, index: usize) -> PathBuf {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)[index]
            .local_temp_path
            .clone()
    }

    fn finish(&self, queued: QueuedDownload, outcome: Outcome) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let percent = percent_complete(completed, self.total);
        let (status, http_status, event) = match outcome {
            Outcome::Succeeded { http_status } => {
                self.succeeded.fetch_add(1, Ordering::SeqCst);
                let event = ProgressEvent::FileDownloaded {
                    path: queued.remote_path,
                    http_status,
                    completed,
                    total: self.total,
                    percent,
                };
                (JobStatus::Succeeded, Some(http_status), event)
            }
            Outcome::Failed {
                http_status,
                reason,
            } => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                let event = ProgressEvent::FileFailed {
                    path: queued.remote_path,
                    http_status,
                    reason,
                    completed,
                    total: self.total,
                    percent,
                };
                (JobStatus::Failed, http_status, event)
            }
        };
        {
            let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
            let job = &mut jobs[queued.index];
            job.status = status;
            job.http_status = http_status;
        }
        self.reporter.report(event);
    }
}
