use std::path::{Component, Path, PathBuf};

use crate::error::{AppError, AppResult};

use super::TRASH_DIR;

/// On-disk layout: regular files directly under `root`, soft-deleted files
/// under `root/.trash`.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    pub fn root(&self) -> &Path { &self.root }

    pub fn trash_dir(&self) -> PathBuf { self.root.join(TRASH_DIR) }

    pub(crate) fn file_path(&self, name: &str) -> PathBuf { self.root.join(name) }

    pub(crate) fn trashed_path(&self, name: &str) -> PathBuf { self.trash_dir().join(name) }

    /// Create the data and trash directories if missing.
    pub fn ensure(&self) -> AppResult<()> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| AppError::io(format!("create data dir {}", self.root.display()), e))?;
        let trash = self.trash_dir();
        std::fs::create_dir_all(&trash)
            .map_err(|e| AppError::io(format!("create trash dir {}", trash.display()), e))
    }
}

/// A client file name must address exactly one entry directly under the data
/// (or trash) directory.
pub fn validate_name(name: &str) -> AppResult<()> {
    if name.is_empty() {
        return Err(AppError::argument("file name must not be empty"));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(AppError::argument(format!("file name '{}' contains a path separator", name)));
    }
    if name == TRASH_DIR {
        return Err(AppError::argument(format!("'{}' is reserved", name)));
    }
    let mut comps = Path::new(name).components();
    match (comps.next(), comps.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(AppError::argument(format!("'{}' is not a plain file name", name))),
    }
}

/// Return `name` if nothing called that exists in `dir`, otherwise the first
/// free `stem (n).ext` with n counting from 1.
pub(crate) async fn collision_free_name(dir: &Path, name: &str) -> AppResult<String> {
    if !occupied(&dir.join(name)).await {
        return Ok(name.to_string());
    }
    let p = Path::new(name);
    let stem = p.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| name.to_string());
    let ext = p.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
    for n in 1..=MAX_DISAMBIGUATION {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if !occupied(&dir.join(&candidate)).await {
            return Ok(candidate);
        }
    }
    Err(AppError::io(
        format!("no free name for '{}' in {}", name, dir.display()),
        std::io::Error::new(std::io::ErrorKind::AlreadyExists, "too many collisions"),
    ))
}

const MAX_DISAMBIGUATION: u32 = 100_000;

// symlink_metadata so a dangling link still counts as taken
async fn occupied(path: &Path) -> bool { tokio::fs::symlink_metadata(path).await.is_ok() }
