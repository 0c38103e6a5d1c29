use kiln_config::{init_tracing, LoggingConfig};

#[test]
fn init_tracing_appends_to_the_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("kiln.log");
    let config = LoggingConfig {
        level: "info".to_owned(),
        json: true,
        stderr: false,
        file: Some(file.clone()),
    };

    init_tracing(&config);
    // Repeated calls are no-ops.
    init_tracing(&LoggingConfig::default());

    tracing::warn!(target: "kiln.config", marker = "logging-suite", "written to file");

    let text = std::fs::read_to_string(&file).unwrap();
    let line = text
        .lines()
        .find(|line| line.contains("logging-suite"))
        .expect("event should reach the file sink");
    assert!(line.trim_start().starts_with('{'), "json lines: {line}");
}
