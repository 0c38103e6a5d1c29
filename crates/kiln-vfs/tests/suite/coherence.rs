use kiln_core::{ContentRoot, FilePath, FileType};
use kiln_vfs::{DiskFs, FileSystem, ListingOptions, MetadataCache};

struct Fixture {
    _tmp: tempfile::TempDir,
    disk: DiskFs,
    cache: MetadataCache,
}

fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let root = ContentRoot::cooked(tmp.path());
    let disk = DiskFs::new(root.clone());
    disk.write_all(&FilePath::content("fx/water", FileType::Effect), b"0123", Some(10))
        .unwrap();
    disk.write_all(&FilePath::content("fx/lava", FileType::Effect), b"01", Some(20))
        .unwrap();
    disk.write_all(&FilePath::content("scripts/main", FileType::Script), b"", Some(30))
        .unwrap();
    let cache = MetadataCache::new(root);
    Fixture {
        _tmp: tmp,
        disk,
        cache,
    }
}

/// Every observable answer of the cache matches a direct disk stat.
fn assert_coherent(fx: &Fixture, paths: &[FilePath]) {
    for path in paths {
        assert_eq!(fx.cache.exists(path), fx.disk.exists(path), "exists {path}");
        assert_eq!(
            fx.cache.file_size(path),
            fx.disk.file_size(path),
            "size {path}"
        );
        assert_eq!(
            fx.cache.modified_time(path),
            fx.disk.modified_time(path),
            "mtime {path}"
        );
    }
    let root = FilePath::content("", FileType::Unknown);
    assert_eq!(
        fx.cache
            .directory_listing(&root, &ListingOptions::recursive())
            .unwrap(),
        fx.disk
            .directory_listing(&root, &ListingOptions::recursive())
            .unwrap()
    );
}

#[test]
fn mutations_through_the_cache_stay_coherent() {
    let fx = fixture();
    let water = FilePath::content("fx/water", FileType::Effect);
    let lava = FilePath::content("fx/lava", FileType::Effect);
    let copy = FilePath::content("fx/backup/water", FileType::Effect);
    let moved = FilePath::content("fx/moved", FileType::Effect);
    let main = FilePath::content("scripts/main", FileType::Script);
    let new = FilePath::content("scripts/new", FileType::Script);
    let all = [
        water.clone(),
        lava.clone(),
        copy.clone(),
        moved.clone(),
        main.clone(),
        new.clone(),
    ];

    assert_coherent(&fx, &all);

    fx.cache.copy(&water, &copy, false).unwrap();
    assert_coherent(&fx, &all);

    fx.cache.rename(&lava, &moved).unwrap();
    assert_coherent(&fx, &all);

    fx.cache.write_all(&new, b"print(1)", None).unwrap();
    assert_coherent(&fx, &all);

    fx.cache.write_all(&main, b"return", Some(99)).unwrap();
    assert_coherent(&fx, &all);

    fx.cache.set_modified_time(&water, 1234).unwrap();
    assert_coherent(&fx, &all);

    fx.cache.delete(&copy).unwrap();
    assert_coherent(&fx, &all);

    fx.cache
        .delete_directory(&FilePath::content("scripts", FileType::Unknown), true)
        .unwrap();
    assert_coherent(&fx, &all);
}

#[test]
fn failed_mutations_leave_the_cache_untouched() {
    let fx = fixture();
    let water = FilePath::content("fx/water", FileType::Effect);
    let lava = FilePath::content("fx/lava", FileType::Effect);
    let ghost = FilePath::content("fx/ghost", FileType::Effect);

    assert!(fx.cache.copy(&water, &lava, false).is_err());
    assert_eq!(fx.cache.file_size(&lava), Some(2));

    assert!(fx.cache.delete(&ghost).is_err());
    assert!(fx.cache.rename(&ghost, &water).is_err());
    assert_eq!(fx.cache.file_size(&water), Some(4));

    assert!(fx
        .cache
        .delete_directory(&FilePath::content("fx", FileType::Unknown), false)
        .is_err());
    assert_eq!(fx.cache.cached_len(), 3);
}

#[test]
fn renaming_a_directory_moves_its_entries() {
    let fx = fixture();
    let from = FilePath::content("fx", FileType::Unknown);
    let to = FilePath::content("effects", FileType::Unknown);

    fx.cache.rename(&from, &to).unwrap();

    assert!(!fx
        .cache
        .exists(&FilePath::content("fx/water", FileType::Effect)));
    assert_eq!(
        fx.cache
            .modified_time(&FilePath::content("effects/water", FileType::Effect)),
        Some(10)
    );
    assert_eq!(fx.cache.cached_len(), 3);
}

#[test]
fn unrecognized_extension_filter_goes_to_disk() {
    let fx = fixture();
    std::fs::write(fx.disk.root().root().join("fx/readme.md"), b"notes").unwrap();

    let listed = fx
        .cache
        .directory_listing(
            &FilePath::content("fx", FileType::Unknown),
            &ListingOptions::recursive().with_extension("md"),
        )
        .unwrap();
    // `.md` has no type, so the listing comes from disk and cannot name the file.
    assert!(listed.is_empty());

    let shallow = fx
        .cache
        .directory_listing(
            &FilePath::content("", FileType::Unknown),
            &ListingOptions::default().with_directories(true),
        )
        .unwrap();
    assert_eq!(
        shallow,
        vec![
            FilePath::content("fx", FileType::Unknown),
            FilePath::content("scripts", FileType::Unknown),
        ]
    );
}

#[test]
fn extension_filters_use_the_tree_column() {
    let fx = fixture();
    let icon = FilePath::content("ui/icon", FileType::Texture0);
    fx.disk.write_all(&icon, b"tex", Some(40)).unwrap();
    let cache = MetadataCache::new(fx.disk.root().clone());
    let root = FilePath::content("", FileType::Unknown);

    let list = |fs: &dyn FileSystem, extension: &str| {
        fs.directory_listing(&root, &ListingOptions::recursive().with_extension(extension))
            .unwrap()
    };
    for extension in ["png", "sif0", ".SIF0", "fx", "fxc"] {
        assert_eq!(
            list(&cache, extension),
            list(&fx.disk, extension),
            "extension {extension}"
        );
    }
    // Source-side extensions name nothing in a cooked tree.
    assert!(list(&cache, "png").is_empty());
    assert!(list(&cache, "fx").is_empty());
    assert_eq!(list(&cache, "sif0"), vec![icon]);
    assert_eq!(
        list(&cache, "fxc"),
        vec![
            FilePath::content("fx/lava", FileType::Effect),
            FilePath::content("fx/water", FileType::Effect),
        ]
    );
}
