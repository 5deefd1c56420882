//!
//! nfstore file store
//! ------------------
//! Backing files live directly under a configured root directory, one regular
//! file per logical name. Sessions address them through a [`FileHandle`] that
//! they own exclusively; two sessions may hold independent handles to the same
//! file.
//!
//! Reads go through the file's range cache. Writes clear that cache and are
//! serialized by the [`WriteGate`]; with the default policy that is one lock for
//! every file in the process.

use std::io::{ErrorKind, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::cache::{CacheKey, CacheRegistry, RangeCache};
use crate::error::{AppError, AppResult};

mod paths;
mod trash;
mod write_gate;

pub use paths::{validate_name, DataLayout};
pub use trash::TrashBin;
pub use write_gate::{WriteGate, WriteLockPolicy};

/// Placeholder every session targets before its first OPEN. Hidden from LIST.
pub const DEFAULT_FILE: &str = "store.bin";
/// Trash subdirectory under the data root.
pub const TRASH_DIR: &str = ".trash";

/// A session's open backing file.
///
/// The handle keeps the cache that was registered for its name when it was
/// opened. Once the file is trashed that cache is orphaned and cleared, so a
/// handle outliving its file never fills the cache of a newer file that
/// reuses the name.
#[derive(Debug)]
pub struct FileHandle {
    name: String,
    file: File,
    cache: Arc<RangeCache>,
}

impl FileHandle {
    pub fn name(&self) -> &str { &self.name }
}

#[derive(Debug)]
pub struct FileStore {
    layout: DataLayout,
    caches: Arc<CacheRegistry>,
    gate: Arc<WriteGate>,
}

impl FileStore {
    pub fn new(layout: DataLayout, caches: Arc<CacheRegistry>, gate: Arc<WriteGate>) -> Self {
        Self { layout, caches, gate }
    }

    pub fn root(&self) -> &Path { self.layout.root() }
    pub fn caches(&self) -> &Arc<CacheRegistry> { &self.caches }
    pub fn write_policy(&self) -> WriteLockPolicy { self.gate.policy() }

    /// Open `name` read/write, creating it if absent, and make sure its cache exists.
    pub async fn open(&self, name: &str) -> AppResult<FileHandle> {
        validate_name(name)?;
        let path = self.layout.file_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|e| AppError::io(format!("open {}", path.display()), e))?;
        let cache = self.caches.get_or_create(name);
        debug!(target: "nfstore::storage", file = %name, "opened");
        Ok(FileHandle { name: name.to_string(), file, cache })
    }

    /// Up to `len` bytes from `offset`; fewer at end of file. Served from the
    /// file's cache when the exact range was read before and nothing has been
    /// written since.
    pub async fn read(&self, handle: &mut FileHandle, offset: u64, len: u64) -> AppResult<Vec<u8>> {
        let key = CacheKey::new(offset, len);
        if let Some(bytes) = handle.cache.get(&key) {
            return Ok(bytes);
        }
        let generation = handle.cache.generation();
        let started = Instant::now();
        handle.file.seek(SeekFrom::Start(offset)).await
            .map_err(|e| AppError::io(format!("seek {} to {}", handle.name, offset), e))?;
        let mut buf = Vec::new();
        (&mut handle.file).take(len).read_to_end(&mut buf).await
            .map_err(|e| AppError::io(format!("read {}", handle.name), e))?;
        debug!(
            target: "nfstore::storage",
            file = %handle.name, off = offset, len, got = buf.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "read from disk"
        );
        handle.cache.put_if_current(key, buf.clone(), generation);
        Ok(buf)
    }

    /// Write `data` at `offset`. Returns the byte count written; anything short
    /// of `data.len()` is an error.
    pub async fn write(&self, handle: &mut FileHandle, offset: u64, data: &[u8]) -> AppResult<u64> {
        let _gate = self.gate.acquire(&handle.name).await;
        let started = Instant::now();
        // coarse invalidation: overlapping ranges are not tracked individually
        self.invalidate(handle);
        let result = write_at(&mut handle.file, offset, data).await;
        self.invalidate(handle);
        result.map_err(|e| AppError::io(format!("write {} at {}", handle.name, offset), e))?;
        debug!(
            target: "nfstore::storage",
            file = %handle.name, off = offset, len = data.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "write complete"
        );
        Ok(data.len() as u64)
    }

    /// Clear the handle's own cache and whatever cache is registered for its
    /// name now; the two differ once the file has been trashed.
    fn invalidate(&self, handle: &FileHandle) {
        handle.cache.clear();
        if let Some(current) = self.caches.get(&handle.name) {
            if !Arc::ptr_eq(&current, &handle.cache) {
                current.clear();
            }
        }
    }

    /// Regular files in the data directory, excluding the placeholder and dotfiles.
    pub async fn list(&self) -> AppResult<Vec<String>> {
        list_regular_files(self.layout.root(), |n| n != DEFAULT_FILE && !n.starts_with('.')).await
    }

    /// Size in bytes of a data file.
    pub async fn stat(&self, name: &str) -> AppResult<u64> {
        validate_name(name)?;
        match tokio::fs::metadata(self.layout.file_path(name)).await {
            Ok(m) if m.is_file() => Ok(m.len()),
            Ok(_) => Err(AppError::not_found(format!("'{}' is not a regular file", name))),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::not_found(name.to_string())),
            Err(e) => Err(AppError::io(format!("stat {}", name), e)),
        }
    }
}

async fn write_at(file: &mut File, offset: u64, data: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(data).await?;
    // tokio files hand writes to a blocking pool; flush waits for completion
    file.flush().await
}

/// Sorted names of the regular files directly under `dir` accepted by `keep`.
pub(crate) async fn list_regular_files(dir: &Path, keep: impl Fn(&str) -> bool) -> AppResult<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| AppError::io(format!("list {}", dir.display()), e))?;
    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| AppError::io(format!("list {}", dir.display()), e))?
    {
        if !entry.file_type().await.map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if keep(&name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Newline-terminated listing payload.
pub fn listing_payload(names: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for n in names {
        out.extend_from_slice(n.as_bytes());
        out.push(b'\n');
    }
    out
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod storage_tests;
