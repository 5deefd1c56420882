use super::*;
use crate::storage::{WriteLockPolicy, TRASH_DIR};
use std::path::Path;

fn bin_in(root: &Path) -> (TrashBin, Arc<CacheRegistry>) {
    let layout = DataLayout::new(root);
    layout.ensure().unwrap();
    let caches = Arc::new(CacheRegistry::new(16).unwrap());
    let gate = Arc::new(WriteGate::new(WriteLockPolicy::PerFile));
    (TrashBin::new(layout, caches.clone(), gate), caches)
}

#[tokio::test]
async fn trash_moves_file_and_drops_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let (bin, caches) = bin_in(tmp.path());
    std::fs::write(tmp.path().join("photo"), b"NETA").unwrap();
    caches.get_or_create("photo");
    assert_eq!(bin.trash("photo").await.unwrap(), "photo");
    assert!(!tmp.path().join("photo").exists());
    assert!(tmp.path().join(TRASH_DIR).join("photo").is_file());
    assert!(caches.get("photo").is_none());
    assert_eq!(bin.list().await.unwrap(), vec!["photo".to_string()]);
}

#[tokio::test]
async fn trash_collision_gets_suffix() {
    let tmp = tempfile::tempdir().unwrap();
    let (bin, _) = bin_in(tmp.path());
    for body in [&b"one"[..], b"two", b"three"] {
        std::fs::write(tmp.path().join("a.txt"), body).unwrap();
        bin.trash("a.txt").await.unwrap();
    }
    assert_eq!(bin.list().await.unwrap(), vec!["a (1).txt".to_string(), "a (2).txt".to_string(), "a.txt".to_string()]);
    let first = std::fs::read(tmp.path().join(TRASH_DIR).join("a.txt")).unwrap();
    assert_eq!(first, b"one");
}

#[tokio::test]
async fn restore_round_trip_and_collision() {
    let tmp = tempfile::tempdir().unwrap();
    let (bin, _) = bin_in(tmp.path());
    std::fs::write(tmp.path().join("doc.md"), b"old").unwrap();
    bin.trash("doc.md").await.unwrap();
    std::fs::write(tmp.path().join("doc.md"), b"new").unwrap();
    assert_eq!(bin.restore("doc.md").await.unwrap(), "doc (1).md");
    assert_eq!(std::fs::read(tmp.path().join("doc.md")).unwrap(), b"new");
    assert_eq!(std::fs::read(tmp.path().join("doc (1).md")).unwrap(), b"old");
    assert!(bin.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn purge_is_permanent() {
    let tmp = tempfile::tempdir().unwrap();
    let (bin, _) = bin_in(tmp.path());
    std::fs::write(tmp.path().join("junk"), b"x").unwrap();
    bin.trash("junk").await.unwrap();
    bin.purge("junk").await.unwrap();
    assert!(bin.list().await.unwrap().is_empty());
    assert!(matches!(bin.restore("junk").await, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn missing_sources_are_reported_not_panics() {
    let tmp = tempfile::tempdir().unwrap();
    let (bin, _) = bin_in(tmp.path());
    assert!(matches!(bin.trash("nope").await, Err(AppError::NotFound(_))));
    assert!(matches!(bin.restore("nope").await, Err(AppError::NotFound(_))));
    assert!(matches!(bin.purge("nope").await, Err(AppError::NotFound(_))));
    assert!(matches!(bin.trash("../x").await, Err(AppError::Argument(_))));
}

#[tokio::test]
async fn list_without_trash_dir_is_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let (bin, _) = bin_in(tmp.path());
    std::fs::remove_dir(tmp.path().join(TRASH_DIR)).unwrap();
    assert!(bin.list().await.unwrap().is_empty());
    std::fs::write(tmp.path().join("f"), b"x").unwrap();
    bin.trash("f").await.unwrap();
    assert_eq!(bin.list().await.unwrap(), vec!["f".to_string()]);
}
