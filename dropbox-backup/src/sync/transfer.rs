use std::{io, path::Path};

use dropbox_core::{Download, DropboxError};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::sync::paths::{PathError, partial_sibling};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("download failed: {0}")]
    Api(#[from] DropboxError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid remote path: {0}")]
    Path(#[from] PathError),
    #[error("body interrupted: {0}")]
    Interrupted(DropboxError),
}

impl TransferError {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            TransferError::Api(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

/// Streams the body of `download` into `temp`, replacing anything there.
/// Returns the number of bytes written.
pub async fn write_body(download: &mut Download, temp: &Path) -> Result<u64, TransferError> {
    if let Some(parent) = temp.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(temp).await?;
    let mut received = 0u64;
    while let Some(chunk) = download.chunk().await.map_err(TransferError::Interrupted)? {
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(received)
}

/// Moves a finished temp file to `target` with a single rename, so `target`
/// is either absent, the previous version, or the complete new file.
///
/// When the temp directory sits on another filesystem the data is first
/// copied next to `target` and renamed from there.
pub async fn commit(temp: &Path, target: &Path) -> Result<(), TransferError> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::rename(temp, target).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            let staged = partial_sibling(target);
            if let Err(err) = tokio::fs::copy(temp, &staged).await {
                discard(&staged).await;
                return Err(err.into());
            }
            if let Err(err) = tokio::fs::rename(&staged, target).await {
                discard(&staged).await;
                return Err(err.into());
            }
            discard(temp).await;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Best-effort removal of a leftover temp file.
pub async fn discard(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await
        && err.kind() != io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %err, "failed to remove temp file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropbox_core::DropboxClient;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn open_download(server: &MockServer, body: &[u8]) -> Download {
        Mock::given(method("POST"))
            .and(path("/2/files/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
            .mount(server)
            .await;
        DropboxClient::with_base_urls(&server.uri(), &server.uri())
            .unwrap()
            .download("token", "/file.bin")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn writes_body_to_temp_file() {
        let server = MockServer::start().await;
        let mut download = open_download(&server, b"hello").await;
        let dir = tempdir().unwrap();
        let temp = dir.path().join("nested/tmp/file.partial");

        let written = write_body(&mut download, &temp).await.unwrap();

        assert_eq!(written, 5);
        assert_eq!(std::fs::read(temp).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn write_failure_leaves_destination_untouched() {
        let server = MockServer::start().await;
        let mut download = open_download(&server, b"payload").await;
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let temp = blocker.join("file.partial");
        let target = dir.path().join("backup/file.bin");

        let err = write_body(&mut download, &temp)
            .await
            .expect_err("temp parent is a file");

        assert!(matches!(err, TransferError::Io(_)));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn commit_moves_file_and_creates_parents() {
        let dir = tempdir().unwrap();
        let temp = dir.path().join("tmp.partial");
        std::fs::write(&temp, b"data").unwrap();
        let target = dir.path().join("backup/Docs/C.pdf");

        commit(&temp, &target).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"data");
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn commit_overwrites_existing_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("A.txt");
        std::fs::write(&target, b"old").unwrap();
        let temp = dir.path().join("tmp.partial");
        std::fs::write(&temp, b"new").unwrap();

        commit(&temp, &target).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"new");
    }

    #[tokio::test]
    async fn discard_ignores_missing_file() {
        let dir = tempdir().unwrap();
        discard(&dir.path().join("never-created")).await;
    }

    #[test]
    fn http_status_is_exposed_for_api_errors() {
        let err = TransferError::Api(DropboxError::Api {
            status: reqwest::StatusCode::NOT_FOUND,
            body: String::new(),
            retry_after: None,
        });
        assert_eq!(err.http_status(), Some(404));
        let io = TransferError::Io(io::Error::other("disk full"));
        assert_eq!(io.http_status(), None);
    }
}
