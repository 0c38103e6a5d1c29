use std::path::PathBuf;
use std::time::Duration;

use kiln_core::{ContentRoot, FilePath, FileType};
use kiln_vfs::{
    DiskFs, FileChange, FileSystem, ManualFileWatcher, MetadataCache, WatchEvent, WatchMode,
};

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn notifications_mark_paths_dirty_until_queried() {
    let tmp = tempfile::tempdir().unwrap();
    let root = ContentRoot::source(tmp.path());
    let disk = DiskFs::new(root.clone());
    let script = FilePath::content("scripts/main", FileType::Script);
    disk.write_all(&script, b"a", Some(100)).unwrap();

    let watcher = ManualFileWatcher::new();
    let handle = watcher.handle();
    let cache = MetadataCache::with_watcher(root, watcher).unwrap();
    let bridge = cache.bridge().expect("watched cache owns a bridge");

    // Out-of-band edit: invisible until the notification lands.
    disk.write_all(&script, b"abc", Some(200)).unwrap();
    assert_eq!(cache.modified_time(&script), Some(100));

    handle
        .push_change(FileChange::Modified {
            path: tmp.path().join("scripts/main.lua"),
        })
        .unwrap();
    assert!(bridge.wait_for_events(1, WAIT));
    assert_eq!(cache.dirty_len(), 1);

    assert_eq!(cache.modified_time(&script), Some(200));
    assert_eq!(cache.file_size(&script), Some(3));
    assert_eq!(cache.dirty_len(), 0);
}

#[test]
fn moves_mark_both_sides_and_outside_paths_are_ignored() {
    let tmp = tempfile::tempdir().unwrap();
    let root = ContentRoot::source(tmp.path());
    let disk = DiskFs::new(root.clone());
    let before = FilePath::content("ui/old", FileType::Texture0);
    let after = FilePath::content("ui/new", FileType::Texture0);
    disk.write_all(&before, b"png", Some(5)).unwrap();

    let watcher = ManualFileWatcher::new();
    let handle = watcher.handle();
    let cache = MetadataCache::with_watcher(root, watcher).unwrap();
    let bridge = cache.bridge().unwrap();

    std::fs::rename(tmp.path().join("ui/old.png"), tmp.path().join("ui/new.png")).unwrap();
    handle
        .push(WatchEvent::Changes {
            changes: vec![
                FileChange::Moved {
                    from: tmp.path().join("ui/old.png"),
                    to: tmp.path().join("ui/new.png"),
                },
                FileChange::Created {
                    path: PathBuf::from("/somewhere/else.png"),
                },
            ],
        })
        .unwrap();
    assert!(bridge.wait_for_events(2, WAIT));
    assert_eq!(cache.dirty_len(), 2);

    assert!(!cache.exists(&before));
    // Any texture variant resolves to the shared source file.
    assert!(cache.exists(&after.with_type(FileType::Texture3)));
    assert_eq!(cache.modified_time(&after), Some(5));
}

#[test]
fn rescan_event_rewalks_the_tree() {
    let tmp = tempfile::tempdir().unwrap();
    let root = ContentRoot::cooked(tmp.path());
    let watcher = ManualFileWatcher::new();
    let handle = watcher.handle();
    let cache = MetadataCache::with_watcher(root.clone(), watcher).unwrap();
    assert_eq!(cache.cached_len(), 0);

    DiskFs::new(root)
        .write_all(&FilePath::content("a", FileType::Text), b"x", None)
        .unwrap();
    handle.push(WatchEvent::Rescan).unwrap();
    assert!(cache.bridge().unwrap().wait_for_events(1, WAIT));

    assert!(cache.exists(&FilePath::content("a", FileType::Text)));
}

#[test]
fn manual_watcher_records_the_recursive_root() {
    let mut watcher = ManualFileWatcher::new();
    let tmp = tempfile::tempdir().unwrap();
    kiln_vfs::FileWatcher::watch_root(&mut watcher, tmp.path()).unwrap();
    assert_eq!(
        watcher.watched_paths(),
        vec![(tmp.path().to_path_buf(), WatchMode::Recursive)]
    );
}
