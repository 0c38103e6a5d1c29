use std::ffi::OsString;
use std::path::Path;
use std::sync::Mutex;

use kiln_config::{
    discover_config_path, load_for_workspace, ConfigError, KilnConfig, KILN_CONFIG_ENV_VAR,
};
use tempfile::tempdir;

/// Tests touching `KILN_CONFIG_PATH` hold this for their whole body.
static CONFIG_ENV: Mutex<()> = Mutex::new(());

/// Sets (or clears) `KILN_CONFIG_PATH` for the duration of `body`, restoring it afterwards.
fn with_config_env<R>(value: Option<&Path>, body: impl FnOnce() -> R) -> R {
    let _serialized = CONFIG_ENV.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let previous: Option<OsString> = std::env::var_os(KILN_CONFIG_ENV_VAR);
    match value {
        Some(value) => std::env::set_var(KILN_CONFIG_ENV_VAR, value),
        None => std::env::remove_var(KILN_CONFIG_ENV_VAR),
    }
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(body));
    match previous {
        Some(previous) => std::env::set_var(KILN_CONFIG_ENV_VAR, previous),
        None => std::env::remove_var(KILN_CONFIG_ENV_VAR),
    }
    result.unwrap_or_else(|panic| std::panic::resume_unwind(panic))
}

fn canonical(path: &Path) -> std::path::PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[test]
fn kiln_toml_is_preferred_over_the_hidden_file() {
    let dir = tempdir().unwrap();
    let visible = dir.path().join("kiln.toml");
    std::fs::write(&visible, "[cook]\nprocess_one_to_one_versions = false\n").unwrap();
    std::fs::write(dir.path().join(".kiln.toml"), "").unwrap();

    with_config_env(None, || {
        assert_eq!(discover_config_path(dir.path()), Some(canonical(&visible)));
        let (config, path) = load_for_workspace(dir.path()).unwrap();
        assert_eq!(path, Some(canonical(&visible)));
        assert!(!config.cook.process_one_to_one_versions);
    });
}

#[test]
fn hidden_file_is_used_when_alone() {
    let dir = tempdir().unwrap();
    let hidden = dir.path().join(".kiln.toml");
    std::fs::write(&hidden, "[logging]\nlevel = \"debug\"\n").unwrap();

    with_config_env(None, || {
        let (config, path) = load_for_workspace(dir.path()).unwrap();
        assert_eq!(path, Some(canonical(&hidden)));
        assert_eq!(config.logging.level, "debug");
    });
}

#[test]
fn relative_env_override_beats_workspace_files() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("kiln.toml"), "[logging]\nlevel = \"warn\"\n").unwrap();
    std::fs::create_dir_all(dir.path().join("ci")).unwrap();
    std::fs::write(
        dir.path().join("ci").join("kiln.toml"),
        "[paths]\ncooked_dir = \"Out\"\n",
    )
    .unwrap();

    with_config_env(Some(Path::new("ci/kiln.toml")), || {
        let (config, path) = load_for_workspace(dir.path()).unwrap();
        assert_eq!(config.paths.cooked_dir, Path::new("Out"));
        assert_eq!(config.logging.level, "info");
        assert!(path.unwrap().ends_with("ci/kiln.toml"));
    });
}

#[test]
fn workspace_without_config_gets_defaults() {
    let dir = tempdir().unwrap();
    with_config_env(None, || {
        let (config, path) = load_for_workspace(dir.path()).unwrap();
        assert_eq!(config, KilnConfig::default());
        assert_eq!(path, None);
    });
}

#[test]
fn missing_override_target_is_an_io_error() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.toml");
    with_config_env(Some(&missing), || {
        let err = load_for_workspace(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }), "{err}");
    });
}

#[test]
fn unknown_keys_are_reported_without_failing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kiln.toml");
    std::fs::write(&path, "[cook]\nwatch = true\n[paths]\nsource = \"x\"\n").unwrap();

    let (config, diagnostics) = KilnConfig::load_from_path_with_diagnostics(&path).unwrap();
    assert_eq!(config, KilnConfig::default());
    assert_eq!(diagnostics.unknown_keys, ["cook.watch", "paths.source"]);
}
