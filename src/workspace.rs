//! Staging workspaces for pipeline attempts.
//!
//! Every attempt gets its own directory under the staging root:
//! - `<root>/<uuid>/` holds the attachments fetched for that attempt
//! - the directory is removed when the attempt ends, success or failure
//!
//! Removal is best-effort. It never returns an error, since it usually runs on
//! a failure path where a second error would hide the first.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use crate::error::WorkspaceError;

/// Allocates and removes per-attempt staging directories.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    /// Create a manager rooted at `root`.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure the staging root exists.
    pub async fn ensure_root(&self) -> Result<(), WorkspaceError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: self.root.clone(),
                source,
            })
    }

    /// Create a fresh, uniquely named staging directory.
    pub async fn acquire(&self) -> Result<StagingWorkspace, WorkspaceError> {
        let id = Uuid::new_v4();
        let path = self.root.join(id.simple().to_string());
        fs::create_dir_all(&path)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: path.clone(),
                source,
            })?;
        tracing::debug!(workspace = %path.display(), "Staging workspace acquired");
        Ok(StagingWorkspace {
            id,
            path,
            released: false,
        })
    }

    /// Recursively remove a workspace and everything staged in it.
    pub async fn release(&self, mut workspace: StagingWorkspace) {
        workspace.released = true;
        match fs::remove_dir_all(&workspace.path).await {
            Ok(()) => {
                tracing::debug!(workspace = %workspace.path.display(), "Staging workspace removed");
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    workspace = %workspace.path.display(),
                    error = %e,
                    "Failed to remove staging workspace"
                );
            }
        }
    }
}

/// A private staging directory owned by exactly one pipeline attempt.
///
/// If dropped without going through [`WorkspaceManager::release`] (for
/// example when the attempt's future is cancelled) the directory is removed
/// synchronously on drop.
#[derive(Debug)]
pub struct StagingWorkspace {
    id: Uuid,
    path: PathBuf,
    released: bool,
}

impl StagingWorkspace {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path for a new file named `name`, adding a numeric suffix if the name
    /// is already taken in this workspace.
    pub fn reserve_path(&self, name: &str) -> PathBuf {
        let candidate = self.path.join(name);
        if !candidate.exists() {
            return candidate;
        }

        let (stem, ext) = match name.rfind('.') {
            Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
            _ => (name, ""),
        };
        (1..)
            .map(|n| self.path.join(format!("{stem}_{n}{ext}")))
            .find(|p| !p.exists())
            .unwrap_or(candidate)
    }
}

impl Drop for StagingWorkspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path)
            && e.kind() != ErrorKind::NotFound
        {
            tracing::warn!(
                workspace = %self.path.display(),
                error = %e,
                "Failed to remove abandoned staging workspace"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_manager() -> (WorkspaceManager, TempDir) {
        let dir = TempDir::new().unwrap();
        (WorkspaceManager::new(dir.path().join("staging")), dir)
    }

    #[tokio::test]
    async fn acquire_creates_directory_under_root() {
        let (mgr, _dir) = test_manager();
        let ws = mgr.acquire().await.unwrap();
        assert!(ws.path().is_dir());
        assert!(ws.path().starts_with(mgr.root()));
        mgr.release(ws).await;
    }

    #[tokio::test]
    async fn acquire_is_unique_per_attempt() {
        let (mgr, _dir) = test_manager();
        let a = mgr.acquire().await.unwrap();
        let b = mgr.acquire().await.unwrap();
        assert_ne!(a.path(), b.path());
        assert_ne!(a.id(), b.id());
        mgr.release(a).await;
        mgr.release(b).await;
    }

    #[tokio::test]
    async fn release_removes_staged_files() {
        let (mgr, _dir) = test_manager();
        let ws = mgr.acquire().await.unwrap();
        let path = ws.path().to_path_buf();
        fs::create_dir_all(path.join("nested")).await.unwrap();
        fs::write(path.join("photo_1.jpg"), b"jpeg").await.unwrap();
        fs::write(path.join("nested/x.bin"), b"x").await.unwrap();

        mgr.release(ws).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn release_tolerates_missing_directory() {
        let (mgr, _dir) = test_manager();
        let ws = mgr.acquire().await.unwrap();
        let path = ws.path().to_path_buf();
        fs::remove_dir_all(&path).await.unwrap();

        mgr.release(ws).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn dropped_workspace_is_removed() {
        let (mgr, _dir) = test_manager();
        let ws = mgr.acquire().await.unwrap();
        let path = ws.path().to_path_buf();
        fs::write(path.join("a.txt"), b"a").await.unwrap();

        drop(ws);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn reserve_path_avoids_collisions() {
        let (mgr, _dir) = test_manager();
        let ws = mgr.acquire().await.unwrap();

        let first = ws.reserve_path("report.pdf");
        assert_eq!(first, ws.path().join("report.pdf"));
        fs::write(&first, b"1").await.unwrap();

        let second = ws.reserve_path("report.pdf");
        assert_eq!(second, ws.path().join("report_1.pdf"));
        fs::write(&second, b"2").await.unwrap();

        assert_eq!(ws.reserve_path("report.pdf"), ws.path().join("report_2.pdf"));
        assert_eq!(ws.reserve_path("README"), ws.path().join("README"));
        mgr.release(ws).await;
    }

    #[tokio::test]
    async fn ensure_root_creates_missing_root() {
        let (mgr, _dir) = test_manager();
        assert!(!mgr.root().exists());
        mgr.ensure_root().await.unwrap();
        assert!(mgr.root().is_dir());
    }
}
