//! Atomic file replacement

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::StoreError;

/// Writes `data` to `target` through a sibling temp file and a rename
pub(crate) async fn write_atomic(target: &Path, data: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }

    // Same directory keeps the rename on one filesystem
    let tmp_path = {
        let mut p = target.as_os_str().to_owned();
        p.push(".tmp");
        PathBuf::from(p)
    };

    debug!(?tmp_path, bytes = data.len(), "writing to temporary file");
    tokio::fs::write(&tmp_path, data)
        .await
        .map_err(|e| StoreError::io(&tmp_path, e))?;
    tokio::fs::rename(&tmp_path, target)
        .await
        .map_err(|e| StoreError::io(target, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_atomic_creates_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/state.json");

        write_atomic(&target, b"first").await.unwrap();
        write_atomic(&target, b"second").await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"second");
        assert!(!dir.path().join("nested/state.json.tmp").exists());
    }
}
