use std::fs;
use std::path::Path;

use kiln_core::FileType;
use kiln_cook::{
    CookVersions, VersionGate, VersionGateOutcome, VersionPair, VersionTable, VERSION_TABLE_FILE,
};

fn touch(root: &Path, relative: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, relative.as_bytes()).unwrap();
}

fn write_table(root: &Path, table: &VersionTable) {
    fs::write(root.join(VERSION_TABLE_FILE), table.encode()).unwrap();
}

#[test]
fn outdated_type_is_deleted_in_bulk() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    touch(root, "fonts/body.sff");
    touch(root, "fonts/deep/title.sff");
    touch(root, "scripts/main.lbc");
    touch(root, "fx/water.fxc");
    touch(root, "fx/water.fxc.json");
    touch(root, "notes/readme");

    let versions = CookVersions::current();
    let mut table = VersionTable::current(&versions);
    table.set(FileType::Font, VersionPair { data: 6, cooker: 39 });
    write_table(root, &table);

    let gate = VersionGate::new(root, versions.clone());
    assert_eq!(gate.run().unwrap(), VersionGateOutcome::Fixed { deleted: 2 });

    assert!(!root.join("fonts/body.sff").exists());
    assert!(!root.join("fonts/deep/title.sff").exists());
    assert!(root.join("scripts/main.lbc").exists());
    assert!(root.join("fx/water.fxc").exists());
    assert!(root.join("fx/water.fxc.json").exists());
    assert!(root.join("notes/readme").exists());

    assert_eq!(gate.load().unwrap(), VersionTable::current(&versions));
    assert_eq!(gate.run().unwrap(), VersionGateOutcome::UpToDate);
}

#[test]
fn cooker_bump_invalidates_every_one_to_one_type() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    touch(root, "fonts/body.sff");
    touch(root, "scripts/main.lbc");
    touch(root, "fx/water.fxc");
    touch(root, "fx/water.fxc.json");
    write_table(root, &VersionTable::current(&CookVersions::current()));

    let gate = VersionGate::new(root, CookVersions::current().with_cooker_version(40));
    assert_eq!(gate.run().unwrap(), VersionGateOutcome::Fixed { deleted: 3 });

    // Effects are versioned through their metadata; the metadata files themselves are Json.
    assert!(root.join("fx/water.fxc").exists());
    assert!(!root.join("fx/water.fxc.json").exists());
    assert!(root.join(VERSION_TABLE_FILE).exists());
}

#[test]
fn many_to_one_mismatch_is_ignored() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    touch(root, "fx/water.fxc");

    let versions = CookVersions::current();
    let mut table = VersionTable::current(&versions);
    table.set(FileType::Effect, VersionPair { data: 0, cooker: 0 });
    write_table(root, &table);

    let gate = VersionGate::new(root, versions);
    assert_eq!(gate.run().unwrap(), VersionGateOutcome::UpToDate);
    assert!(root.join("fx/water.fxc").exists());
    // Left as found: nothing needed fixing.
    assert_eq!(gate.load().unwrap(), table);
}
