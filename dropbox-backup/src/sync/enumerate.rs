use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dropbox_core::{DropboxClient, DropboxError, ListFolderResult, Metadata};
use thiserror::Error;
use tracing::{debug, warn};

use crate::progress::{ProgressEvent, ProgressReporter};
use crate::sync::backoff::Backoff;
use crate::token_manager::{TokenError, TokenManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub path: String,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage {
    pub entries: Vec<RemoteEntry>,
    pub has_more: bool,
    pub cursor: String,
}

impl From<ListFolderResult> for ListingPage {
    fn from(result: ListFolderResult) -> Self {
        let entries = result
            .entries
            .into_iter()
            .filter_map(|metadata| {
                let kind = match &metadata {
                    Metadata::File(_) => EntryKind::File,
                    Metadata::Folder(_) => EntryKind::Folder,
                    Metadata::Other => {
                        debug!("skipping listing entry that is neither file nor folder");
                        return None;
                    }
                };
                match metadata.path() {
                    Some(path) => Some(RemoteEntry {
                        path: path.to_string(),
                        kind,
                    }),
                    None => {
                        warn!(?metadata, "listing entry has no path");
                        None
                    }
                }
            })
            .collect();
        Self {
            entries,
            has_more: result.has_more,
            cursor: result.cursor,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListingOptions {
    pub page_limit: Option<u32>,
    pub retry_attempts: u32,
    pub backoff: Backoff,
}

impl Default for ListingOptions {
    fn default() -> Self {
        Self {
            page_limit: None,
            retry_attempts: 3,
            backoff: Backoff::new(Duration::from_secs(2), Duration::from_secs(60), false),
        }
    }
}

#[derive(Debug, Error)]
enum ListingError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Api(#[from] DropboxError),
}

enum NextPage {
    Initial,
    Continue(String),
    Done,
}

/// One folder being listed. Its files stay local to the frame until the
/// folder is complete, then move into the parent frame.
struct FolderFrame {
    path: String,
    next: NextPage,
    pending: VecDeque<RemoteEntry>,
    files: Vec<String>,
}

impl FolderFrame {
    fn new(path: String) -> Self {
        Self {
            path,
            next: NextPage::Initial,
            pending: VecDeque::new(),
            files: Vec::new(),
        }
    }
}

/// Walks a remote folder tree depth-first and collects every file path.
pub struct TreeEnumerator {
    client: DropboxClient,
    tokens: Arc<TokenManager>,
    reporter: Arc<dyn ProgressReporter>,
    options: ListingOptions,
}

impl TreeEnumerator {
    pub fn new(
        client: DropboxClient,
        tokens: Arc<TokenManager>,
        reporter: Arc<dyn ProgressReporter>,
        options: ListingOptions,
    ) -> Self {
        Self {
            client,
            tokens,
            reporter,
            options,
        }
    }

    /// File paths under `root` in depth-first discovery order. A subfolder is
    /// expanded completely at the point it is encountered, before the rest of
    /// its parent's page and the parent's continuation pages.
    ///
    /// Only token refresh failures are returned. When a folder's listing fails
    /// its unlisted remainder is skipped; files found in it before the failure
    /// are kept.
    pub async fn enumerate(&self, root: &str) -> Result<Vec<String>, TokenError> {
        let root = normalize_root(root);
        self.reporter.report(ProgressEvent::ListingStarted { root: root.clone() });

        let mut stack = vec![FolderFrame::new(root)];
        while let Some(frame) = stack.last_mut() {
            if let Some(entry) = frame.pending.pop_front() {
                match entry.kind {
                    EntryKind::File => {
                        self.reporter.report(ProgressEvent::FileFound {
                            path: entry.path.clone(),
                        });
                        frame.files.push(entry.path);
                    }
                    EntryKind::Folder => stack.push(FolderFrame::new(entry.path)),
                }
                continue;
            }

            let next = std::mem::replace(&mut frame.next, NextPage::Done);
            let page = match next {
                NextPage::Initial => self.fetch_page(&frame.path, None).await,
                NextPage::Continue(cursor) => self.fetch_page(&frame.path, Some(&cursor)).await,
                NextPage::Done => {
                    let Some(finished) = stack.pop() else {
                        break;
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.files.extend(finished.files),
                        None => return Ok(finished.files),
                    }
                    continue;
                }
            };

            match page {
                Ok(page) => {
                    frame.pending = page.entries.into();
                    if page.has_more {
                        frame.next = NextPage::Continue(page.cursor);
                    }
                }
                Err(ListingError::Token(err)) => return Err(err),
                Err(ListingError::Api(err)) => {
                    let Some(failed) = stack.pop() else {
                        break;
                    };
                    let kept = failed.files.len();
                    warn!(folder = %failed.path, kept, "listing failed, skipping rest of folder");
                    self.reporter.report(ProgressEvent::SubtreeFailed {
                        path: failed.path,
                        reason: err.to_string(),
                        kept,
                    });
                    // Files already reported as found still become jobs.
                    match stack.last_mut() {
                        Some(parent) => parent.files.extend(failed.files),
                        None => return Ok(failed.files),
                    }
                }
            }
        }
        Ok(Vec::new())
    }

    async fn fetch_page(
        &self,
        folder: &str,
        cursor: Option<&str>,
    ) -> Result<ListingPage, ListingError> {
        let attempts = self.options.retry_attempts.max(1);
        let mut attempt = 0;
        let mut token = self.tokens.ensure_valid().await?;
        loop {
            let result = match cursor {
                None => {
                    self.client
                        .list_folder(token.as_str(), folder, self.options.page_limit)
                        .await
                }
                Some(cursor) => {
                    self.client
                        .list_folder_continue(token.as_str(), cursor)
                        .await
                }
            };
            let err = match result {
                Ok(page) => return Ok(page.into()),
                Err(err) => err,
            };

            attempt += 1;
            if attempt >= attempts || !(err.is_auth() || err.is_retryable()) {
                return Err(err.into());
            }
            if err.is_auth() {
                warn!(folder, "listing rejected the access token, refreshing");
                token = self.tokens.refresh_rejected(&token).await?;
            } else {
                let delay = self
                    .options
                    .backoff
                    .delay_honoring(attempt - 1, err.retry_after());
                warn!(
                    folder,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "listing failed, retrying"
                );
                tokio::time::sleep(delay).await;
                token = self.tokens.ensure_valid().await?;
            }
        }
    }
}

/// Dropbox names the account root `""`, not `"/"`.
fn normalize_root(root: &str) -> String {
    let trimmed = root.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') || trimmed.starts_with("id:") {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
