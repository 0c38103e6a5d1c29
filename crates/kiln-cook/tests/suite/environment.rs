use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kiln_core::{FilePath, FileType};
use kiln_cook::{
    CookEnvironment, CookOptions, CookSource, CookVersions, VersionGateOutcome, VersionPair,
    VersionTable, VERSION_TABLE_FILE,
};
use kiln_vfs::{FileChange, FileSystem, FileWatcher, ManualFileWatcher, ManualFileWatcherHandle};
use parking_lot::Mutex;

const WAIT: Duration = Duration::from_secs(5);

type Handles = Arc<Mutex<Vec<(PathBuf, ManualFileWatcherHandle)>>>;

/// Options whose watchers are all manual; their handles land in the returned list in
/// subscription order.
fn manual_options(source: &Path, cooked: &Path) -> (CookOptions, Handles) {
    let handles: Handles = Arc::default();
    let sink = Arc::clone(&handles);
    let options = CookOptions::new(source, cooked).with_watcher(move |root| {
        let watcher = ManualFileWatcher::new();
        sink.lock().push((root.to_path_buf(), watcher.handle()));
        Ok(Box::new(watcher) as Box<dyn FileWatcher>)
    });
    (options, handles)
}

fn set_mtime(path: &Path, seconds: i64) {
    filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(seconds, 0)).unwrap();
}

#[test]
fn open_runs_gate_and_walks_both_trees() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("Source");
    let cooked = tmp.path().join("Data").join("Content");
    std::fs::create_dir_all(source.join("fx")).unwrap();
    std::fs::write(source.join("fx/water.fx"), b"fx").unwrap();

    let env = CookEnvironment::open(CookOptions::new(&source, &cooked)).unwrap();
    assert_eq!(env.version_gate(), Some(&VersionGateOutcome::Initialized));
    assert!(cooked.join(VERSION_TABLE_FILE).exists());
    assert_eq!(env.source().cached_len(), 1);
    assert!(env
        .source()
        .exists(&FilePath::content("fx/water", FileType::Effect)));
    assert!(env.source().bridge().is_none());
    assert!(env.source_bridge().is_none());

    let mut options = CookOptions::new(&source, &cooked);
    options.process_one_to_one_versions = false;
    let env = CookEnvironment::open(options).unwrap();
    assert_eq!(env.version_gate(), None);
    // The table is cached like any other cooked file.
    assert_eq!(env.cooked().cached_len(), 1);
    assert!(VersionTable::decode(&std::fs::read(cooked.join(VERSION_TABLE_FILE)).unwrap()).is_ok());
}

#[test]
fn source_edits_reach_cache_and_database() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("Source");
    let cooked = tmp.path().join("Data").join("Content");
    std::fs::create_dir_all(source.join("fx")).unwrap();
    std::fs::create_dir_all(cooked.join("fx")).unwrap();
    std::fs::write(source.join("fx/water.fx"), b"main").unwrap();
    std::fs::write(source.join("fx/common.fxh"), b"header").unwrap();
    std::fs::write(cooked.join("fx/water.fxc"), b"out").unwrap();
    set_mtime(&source.join("fx/water.fx"), 90);
    set_mtime(&source.join("fx/common.fxh"), 100);
    set_mtime(&cooked.join("fx/water.fxc"), 200);

    let (options, handles) = manual_options(&source, &cooked);
    let env = CookEnvironment::open(options).unwrap();
    let roots: Vec<PathBuf> = handles.lock().iter().map(|(root, _)| root.clone()).collect();
    // One watcher per tree; the source one feeds the cache and the database.
    assert_eq!(roots, vec![source.clone(), cooked.clone()]);
    assert!(env.source().bridge().is_none());

    let water = FilePath::content("fx/water", FileType::Effect);
    let header = FilePath::content("fx/common", FileType::EffectHeader);
    let db = env.database();
    db.update_metadata(
        &water,
        200,
        &[CookSource::source(water.clone()), CookSource::source(header.clone())],
    )
    .unwrap();
    assert!(db.check_up_to_date(&water));
    // The metadata write went through the cooked cache.
    assert!(env.cooked().exists(&water.metadata_path()));

    set_mtime(&source.join("fx/common.fxh"), 101);
    handles.lock()[0]
        .1
        .push_change(FileChange::Modified {
            path: source.join("fx/common.fxh"),
        })
        .unwrap();
    assert!(env.source_bridge().unwrap().wait_for_events(1, WAIT));

    assert!(db.was_changed(&header));
    assert_eq!(env.source().modified_time(&header), Some(101));
    let report = db.check_up_to_date_with_details(&water);
    assert!(!report.up_to_date);
    assert_eq!(report.changed, vec![header]);
}

#[test]
fn first_check_after_a_source_event_sees_the_new_stamp() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("Source");
    let cooked = tmp.path().join("Data").join("Content");
    std::fs::create_dir_all(source.join("fx")).unwrap();
    std::fs::create_dir_all(cooked.join("fx")).unwrap();
    std::fs::write(source.join("fx/common.fxh"), b"header").unwrap();
    std::fs::write(cooked.join("fx/water.fxc"), b"out").unwrap();
    set_mtime(&source.join("fx/common.fxh"), 100);
    set_mtime(&cooked.join("fx/water.fxc"), 200);

    let (options, handles) = manual_options(&source, &cooked);
    let env = CookEnvironment::open(options).unwrap();
    let handle = handles.lock()[0].1.clone();
    let water = FilePath::content("fx/water", FileType::Effect);
    let header = FilePath::content("fx/common", FileType::EffectHeader);
    let db = env.database();
    let bridge = env.source_bridge().unwrap();

    for round in 1..=20u64 {
        db.update_metadata(&water, 200, &[CookSource::source(header.clone())])
            .unwrap();
        assert!(db.check_up_to_date(&water), "round {round}");

        set_mtime(&source.join("fx/common.fxh"), 100 + round as i64);
        handle
            .push_change(FileChange::Modified {
                path: source.join("fx/common.fxh"),
            })
            .unwrap();
        assert!(bridge.wait_for_events(round, WAIT));

        // The cache was dirty before the database forgot the output, so the very first check
        // re-stats the header.
        assert!(!db.check_up_to_date(&water), "round {round}");
        assert_eq!(env.source().modified_time(&header), Some(100 + round));
    }
}

#[test]
fn gate_deletes_outdated_outputs_before_the_walk() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("Source");
    let cooked = tmp.path().join("Data").join("Content");
    std::fs::create_dir_all(source.join("fonts")).unwrap();
    std::fs::create_dir_all(cooked.join("fonts/deep")).unwrap();
    std::fs::write(cooked.join("fonts/body.sff"), b"font").unwrap();
    std::fs::write(cooked.join("fonts/deep/title.sff"), b"font").unwrap();
    std::fs::write(cooked.join("fonts/readme.txt"), b"notes").unwrap();

    let versions = CookVersions::current();
    let mut table = VersionTable::current(&versions);
    table.set(FileType::Font, VersionPair { data: 6, cooker: 39 });
    std::fs::write(cooked.join(VERSION_TABLE_FILE), table.encode()).unwrap();

    let body = FilePath::content("fonts/body", FileType::Font);
    let title = FilePath::content("fonts/deep/title", FileType::Font);
    let env = CookEnvironment::open(CookOptions::new(&source, &cooked)).unwrap();
    assert_eq!(
        env.version_gate(),
        Some(&VersionGateOutcome::Fixed { deleted: 2 })
    );
    assert!(!cooked.join("fonts/body.sff").exists());
    assert!(!cooked.join("fonts/deep/title.sff").exists());
    // The walk ran after the deletions.
    assert!(!env.cooked().exists(&body));
    assert!(!env.cooked().exists(&title));
    assert!(env
        .cooked()
        .exists(&FilePath::content("fonts/readme", FileType::Text)));
    drop(env);

    let env = CookEnvironment::open(CookOptions::new(&source, &cooked)).unwrap();
    assert_eq!(env.version_gate(), Some(&VersionGateOutcome::UpToDate));
}
