use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("remote path is empty")]
    Empty,
    #[error("remote path contains unsupported component")]
    UnsupportedComponent,
}

/// Maps a Dropbox path ("/Docs/A.txt") to its place under `root`.
pub fn destination_path_for(root: &Path, remote_path: &str) -> Result<PathBuf, PathError> {
    let mut out = root.to_path_buf();
    let mut pushed = false;
    for component in Path::new(remote_path).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                pushed = true;
            }
            Component::RootDir | Component::CurDir => continue,
            Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent);
            }
        }
    }
    if !pushed {
        return Err(PathError::Empty);
    }
    Ok(out)
}

/// Temporary file for `remote_path`, unique per path and flat under `temp_root`.
pub fn temp_path_for(temp_root: &Path, remote_path: &str) -> PathBuf {
    let digest = Sha256::digest(remote_path.as_bytes());
    temp_root.join(format!("{digest:x}.partial"))
}

/// Sibling of `target` used when the final rename has to stay on the
/// destination filesystem.
pub fn partial_sibling(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}
