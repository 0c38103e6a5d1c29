use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;
use std::path::Path;

fn kiln() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("kiln"))
}

fn set_mtime(path: &Path, seconds: i64) {
    filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(seconds, 0)).unwrap();
}

/// A workspace with one effect, its header and a cooked output whose metadata matches them.
fn cooked_workspace() -> TempDir {
    let temp = TempDir::new().unwrap();
    temp.child("kiln.toml")
        .write_str("[logging]\nstderr = false\n")
        .unwrap();
    temp.child("Source/fx/water.fx").write_str("main").unwrap();
    temp.child("Source/fx/common.fxh").write_str("header").unwrap();
    temp.child("Data/Content/fx/water.fxc").write_str("out").unwrap();
    temp.child("Data/Content/fx/water.fxc.json")
        .write_str(
            r#"{
  "CookedTimestamp": 200,
  "CookerVersion": 39,
  "DataVersion": 1,
  "Sources": [
    { "Source": "content://fx/water.fx", "Timestamp": 90 },
    { "Source": "content://fx/common.fxh", "Timestamp": 100 }
  ]
}"#,
        )
        .unwrap();
    set_mtime(&temp.path().join("Source/fx/water.fx"), 90);
    set_mtime(&temp.path().join("Source/fx/common.fxh"), 100);
    set_mtime(&temp.path().join("Data/Content/fx/water.fxc"), 200);
    temp
}

fn json_output(cmd: &mut Command) -> (i32, serde_json::Value) {
    let output = cmd.output().unwrap();
    let code = output.status.code().unwrap_or(-1);
    let value = serde_json::from_slice(&output.stdout).unwrap_or_else(|err| {
        panic!(
            "invalid json ({err}); stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    });
    (code, value)
}

#[test]
fn help_mentions_core_commands() {
    kiln().arg("--help").assert().success().stdout(
        predicate::str::contains("status")
            .and(predicate::str::contains("dependents"))
            .and(predicate::str::contains("ls"))
            .and(predicate::str::contains("versions")),
    );
}

#[test]
fn status_reports_changed_dependencies() {
    let temp = cooked_workspace();

    let (code, v) = json_output(
        kiln()
            .arg("--root")
            .arg(temp.path())
            .args(["status", "fx/water.fxc", "--json"]),
    );
    assert_eq!(code, 0, "{v:#}");
    assert_eq!(v["up_to_date"], true);
    assert_eq!(v["one_to_one"], false);
    assert_eq!(v["asset"], "content://fx/water.fx");

    set_mtime(&temp.path().join("Source/fx/common.fxh"), 101);
    let (code, v) = json_output(
        kiln()
            .arg("--root")
            .arg(temp.path())
            .args(["status", "content://fx/water.fx", "--json"]),
    );
    assert_eq!(code, 1);
    assert_eq!(v["up_to_date"], false);
    assert_eq!(v["changed"], serde_json::json!(["content://fx/common.fxh"]));
}

#[test]
fn human_status_names_the_stale_dependency() {
    let temp = cooked_workspace();
    set_mtime(&temp.path().join("Source/fx/water.fx"), 91);

    kiln()
        .arg("--root")
        .arg(temp.path())
        .args(["status", "fx/water.fxc"])
        .assert()
        .code(1)
        .stdout(
            predicate::str::contains("content://fx/water.fx: stale")
                .and(predicate::str::contains("changed: content://fx/water.fx")),
        );
}

#[test]
fn dependents_are_found_from_cooked_metadata() {
    let temp = cooked_workspace();

    let (code, v) = json_output(
        kiln()
            .arg("--root")
            .arg(temp.path())
            .args(["dependents", "fx/common.fxh", "--json"]),
    );
    assert_eq!(code, 0);
    assert_eq!(v["dependents"], serde_json::json!(["content://fx/water.fx"]));

    // The output is never its own dependent.
    let (_, v) = json_output(
        kiln()
            .arg("--root")
            .arg(temp.path())
            .args(["dependents", "fx/water.fx", "--json"]),
    );
    assert_eq!(v["dependents"], serde_json::json!([]));
}

#[test]
fn ls_lists_through_the_cache() {
    let temp = cooked_workspace();

    let (code, v) = json_output(
        kiln()
            .arg("--root")
            .arg(temp.path())
            .args(["ls", "fx", "--json"]),
    );
    assert_eq!(code, 0);
    assert_eq!(
        v["entries"],
        serde_json::json!(["fx/common.fxh", "fx/water.fx"])
    );

    let (_, v) = json_output(
        kiln()
            .arg("--root")
            .arg(temp.path())
            .args(["ls", "--cooked", "--ext", "fxc", "--json"]),
    );
    assert_eq!(v["entries"], serde_json::json!(["fx/water.fxc"]));
}

#[test]
fn versions_initializes_then_reports_up_to_date() {
    let temp = cooked_workspace();

    let (code, v) = json_output(
        kiln()
            .arg("--root")
            .arg(temp.path())
            .args(["versions", "--json"]),
    );
    assert_eq!(code, 0);
    assert_eq!(v["outcome"], "initialized");
    temp.child("Data/Content/version_data.dat")
        .assert(predicate::path::exists());

    kiln()
        .arg("--root")
        .arg(temp.path())
        .arg("versions")
        .assert()
        .success()
        .stdout(predicate::str::contains("versions: up_to_date"));
}

#[test]
fn invalid_config_fails() {
    let temp = TempDir::new().unwrap();
    temp.child("kiln.toml").write_str("[cook\n").unwrap();

    kiln()
        .arg("--root")
        .arg(temp.path())
        .arg("versions")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to parse toml config"));
}

#[test]
fn explicit_config_paths_resolve_against_its_directory() {
    let temp = cooked_workspace();
    temp.child("conf/kiln.toml")
        .write_str("[paths]\nsource_dir = \"../Source\"\ncooked_dir = \"../Data/Content\"\n")
        .unwrap();

    let (code, v) = json_output(
        kiln()
            .arg("--config")
            .arg(temp.path().join("conf/kiln.toml"))
            .args(["ls", "fx", "--ext", ".fxh", "--json"]),
    );
    assert_eq!(code, 0);
    assert_eq!(v["entries"], serde_json::json!(["fx/common.fxh"]));
}
