use std::sync::Arc;
use std::time::{Duration, Instant};

use dropbox_core::{DropboxClient, DropboxError, OAuthClient, OAuthError};
use thiserror::Error;
use tracing::info;

use crate::config::BackupConfig;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::sync::enumerate::TreeEnumerator;
use crate::sync::scheduler::{DownloadReport, DownloadScheduler, SchedulerError};
use crate::token_manager::{Credential, TokenError, TokenManager};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to build api client: {0}")]
    Client(#[from] DropboxError),
    #[error("failed to build oauth client: {0}")]
    OAuth(#[from] OAuthError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Files found by the listing phase, in discovery order.
    pub files: Vec<String>,
    pub report: DownloadReport,
    pub elapsed: Duration,
}

/// One backup run: list the remote tree, then download every file found.
pub struct BackupRuntime {
    config: BackupConfig,
    reporter: Arc<dyn ProgressReporter>,
    enumerator: TreeEnumerator,
    scheduler: DownloadScheduler,
}

impl BackupRuntime {
    pub fn bootstrap(
        config: BackupConfig,
        credential: Credential,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<Self, PipelineError> {
        let client = DropboxClient::new()?;
        let oauth = credential.oauth_client(None)?;
        Ok(Self::with_clients(config, credential, client, oauth, reporter))
    }

    /// Same as [`BackupRuntime::bootstrap`] with caller-supplied clients,
    /// e.g. pointed at a mock server.
    pub fn with_clients(
        config: BackupConfig,
        credential: Credential,
        client: DropboxClient,
        oauth: OAuthClient,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        let tokens = Arc::new(TokenManager::new(credential, client.clone(), oauth));
        let enumerator = TreeEnumerator::new(
            client.clone(),
            Arc::clone(&tokens),
            Arc::clone(&reporter),
            config.listing_options(),
        );
        let scheduler = DownloadScheduler::new(
            client,
            tokens,
            Arc::clone(&reporter),
            config.temp_dir.clone(),
            config.scheduler_config(),
        );
        Self {
            config,
            reporter,
            enumerator,
            scheduler,
        }
    }

    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        info!(
            destination = %self.config.destination.display(),
            workers = self.config.max_concurrent_requests,
            "backup started"
        );

        let files = self.enumerator.enumerate(&self.config.root_path).await?;
        self.reporter.report(ProgressEvent::ListingFinished {
            total_files: files.len(),
        });

        let report = self
            .scheduler
            .download_all(&files, &self.config.destination)
            .await?;
        let elapsed = started.elapsed();
        self.reporter.report(ProgressEvent::Finished {
            total: report.summary.total,
            succeeded: report.summary.succeeded,
            failed: report.summary.failed,
            elapsed,
        });

        Ok(RunSummary {
            files,
            report,
            elapsed,
        })
    }
}
