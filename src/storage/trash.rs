//! Soft delete: files move into `<root>/.trash` and can be restored or purged.
//! Moves never overwrite; a taken name gets a ` (n)` suffix before its extension.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cache::CacheRegistry;
use crate::error::{AppError, AppResult};

use super::paths::{collision_free_name, validate_name, DataLayout};
use super::{list_regular_files, WriteGate};

#[derive(Debug)]
pub struct TrashBin {
    layout: DataLayout,
    caches: Arc<CacheRegistry>,
    gate: Arc<WriteGate>,
    // name check and rename must be atomic with respect to other sessions;
    // held across filesystem awaits
    moves: Mutex<()>,
}

impl TrashBin {
    pub fn new(layout: DataLayout, caches: Arc<CacheRegistry>, gate: Arc<WriteGate>) -> Self {
        Self { layout, caches, gate, moves: Mutex::new(()) }
    }

    /// Move a data file into the trash and tear down its cache. Returns the
    /// name it was stored under.
    pub async fn trash(&self, name: &str) -> AppResult<String> {
        validate_name(name)?;
        let _guard = self.moves.lock().await;
        let src = self.layout.file_path(name);
        require_file(&src, name).await?;
        let trash_dir = self.layout.trash_dir();
        fs::create_dir_all(&trash_dir)
            .await
            .map_err(|e| AppError::io(format!("create trash dir {}", trash_dir.display()), e))?;
        let stored = collision_free_name(&trash_dir, name).await?;
        let dst = trash_dir.join(&stored);
        if let Err(e) = fs::rename(&src, &dst).await {
            warn!(target: "nfstore::trash", file = %name, error = %e, "move to trash failed");
            return Err(AppError::io(format!("move {} to trash", name), e));
        }
        self.caches.remove(name);
        self.gate.forget(name);
        info!(target: "nfstore::trash", file = %name, stored = %stored, "moved to trash");
        Ok(stored)
    }

    /// Names currently in the trash, sorted.
    pub async fn list(&self) -> AppResult<Vec<String>> {
        let dir = self.layout.trash_dir();
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        list_regular_files(&dir, |_| true).await
    }

    /// Move a trashed file back into the data directory. Returns the name it
    /// was restored under.
    pub async fn restore(&self, name: &str) -> AppResult<String> {
        validate_name(name)?;
        let _guard = self.moves.lock().await;
        let src = self.layout.trashed_path(name);
        require_file(&src, name).await?;
        let restored = collision_free_name(self.layout.root(), name).await?;
        let dst = self.layout.file_path(&restored);
        if let Err(e) = fs::rename(&src, &dst).await {
            warn!(target: "nfstore::trash", file = %name, error = %e, "restore failed");
            return Err(AppError::io(format!("restore {}", name), e));
        }
        // a cache may linger under this name from a session that reopened it
        self.caches.remove(&restored);
        info!(target: "nfstore::trash", file = %name, restored = %restored, "restored from trash");
        Ok(restored)
    }

    /// Permanently delete a trashed file.
    pub async fn purge(&self, name: &str) -> AppResult<()> {
        validate_name(name)?;
        let _guard = self.moves.lock().await;
        let path = self.layout.trashed_path(name);
        require_file(&path, name).await?;
        if let Err(e) = fs::remove_file(&path).await {
            warn!(target: "nfstore::trash", file = %name, error = %e, "purge failed");
            return Err(AppError::io(format!("purge {}", name), e));
        }
        info!(target: "nfstore::trash", file = %name, "permanently deleted");
        Ok(())
    }
}

async fn require_file(path: &Path, name: &str) -> AppResult<()> {
    match fs::symlink_metadata(path).await {
        Ok(m) if m.is_file() => Ok(()),
        Ok(_) => Err(AppError::argument(format!("'{}' is not a regular file", name))),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::not_found(name.to_string())),
        Err(e) => Err(AppError::io(format!("stat {}", name), e)),
    }
}

#[cfg(test)]
#[path = "trash_tests.rs"]
mod trash_tests;
