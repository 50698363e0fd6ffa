use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log file {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("failed to install log subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Installs the global subscriber: everything allowed by `RUST_LOG` (default
/// `info`) goes to `log_file`, which is truncated; warnings and errors are
/// also echoed to stderr.
pub fn init(log_file: &Path) -> Result<(), LoggingError> {
    if let Some(parent) = log_file.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| LoggingError::Open {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let file = File::create(log_file).map_err(|source| LoggingError::Open {
        path: log_file.to_path_buf(),
        source,
    })?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr)
        .with_filter(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn unwritable_log_path_is_reported() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let err = init(&blocker.join("run.log")).unwrap_err();

        assert!(matches!(err, LoggingError::Open { .. }));
    }
}
