use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Once};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt, TestWriter};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// The `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// A bare level (`debug`, `warning`, ...) or an `EnvFilter` directive string such as
    /// `kiln.cook=trace,info`.
    pub level: String,
    /// One JSON object per line instead of the human format.
    pub json: bool,
    pub stderr: bool,
    /// Appended to when set. An unopenable file disables only this sink.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.to_owned(),
            json: false,
            stderr: true,
            file: None,
        }
    }
}

const DEFAULT_LEVEL: &str = "info";

impl LoggingConfig {
    /// Maps level synonyms onto `EnvFilter` spellings; other input passes through trimmed.
    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let input = input.trim();
        let level = match input.to_ascii_lowercase().as_str() {
            "" => DEFAULT_LEVEL,
            "warning" | "warn" => "warn",
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "error" => "error",
            _ => input,
        };
        level.to_owned()
    }

    /// The filter installed by [`init_tracing`].
    ///
    /// `RUST_LOG` directives are appended after the configured ones so they take precedence.
    /// When the combination does not parse, `RUST_LOG` alone is tried, then the configured
    /// level alone, then plain `info`.
    pub fn env_filter(&self) -> EnvFilter {
        let configured = Self::normalize_level_directives(&self.level);
        let from_env = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let mut candidates = Vec::with_capacity(3);
        if let Some(from_env) = from_env {
            candidates.push(format!("{configured},{from_env}"));
            candidates.push(from_env);
        }
        candidates.push(configured);

        candidates
            .into_iter()
            .find_map(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::default().add_directive(LevelFilter::INFO.into()))
    }

    fn open_log_file(&self) -> Option<File> {
        let path = self.file.as_ref()?;
        OpenOptions::new().create(true).append(true).open(path).ok()
    }

    fn make_writer(&self, file: Option<File>) -> BoxMakeWriter {
        let mut writer = BoxMakeWriter::new(io::sink);
        if self.stderr {
            // Debug builds route through the test harness so `cargo test` captures the output.
            writer = if cfg!(debug_assertions) {
                BoxMakeWriter::new(writer.and(TestWriter::with_stderr))
            } else {
                BoxMakeWriter::new(writer.and(io::stderr))
            };
        }
        if let Some(file) = file {
            writer = BoxMakeWriter::new(writer.and(SharedLogFile(Arc::new(Mutex::new(file)))));
        }
        writer
    }
}

/// A log file shared by every event, locked per write.
struct SharedLogFile(Arc<Mutex<File>>);

impl<'a> MakeWriter<'a> for SharedLogFile {
    type Writer = LockedLogFile<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LockedLogFile(self.0.lock())
    }
}

struct LockedLogFile<'a>(MutexGuard<'a, File>);

impl Write for LockedLogFile<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

static INSTALL: Once = Once::new();

/// Installs the global `tracing` subscriber described by `config`.
///
/// Only the first call in a process has any effect.
pub fn init_tracing(config: &LoggingConfig) {
    INSTALL.call_once(|| install(config));
}

fn install(config: &LoggingConfig) {
    let file = config.open_log_file();
    let lost_file = match (&config.file, &file) {
        (Some(path), None) => Some(path.clone()),
        _ => None,
    };
    let writer = config.make_writer(file);

    let format = tracing_subscriber::fmt::layer().with_ansi(false);
    let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json {
        format.json().with_writer(writer).boxed()
    } else {
        format.with_writer(writer).boxed()
    };

    let installed = tracing::subscriber::set_global_default(
        tracing_subscriber::registry()
            .with(config.env_filter())
            .with(layer),
    );
    if let (Ok(()), Some(path)) = (installed, lost_file) {
        tracing::warn!(
            target: "kiln.config",
            path = %path.display(),
            "cannot open log file, logging to the remaining sinks"
        );
    }
}
