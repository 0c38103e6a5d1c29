use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use kiln_config::KilnConfig;
use kiln_cook::{
    is_one_to_one, CookEnvironment, CookOptions, CookVersions, DependencyDatabase, VersionGate,
    VersionGateOutcome,
};
use kiln_core::{FilePath, FileType, GameDirectory};
use kiln_vfs::{FileSystem, ListingOptions, MetadataCache};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "kiln", version, about = "Kiln CLI (cook state, dependents, content listings)")]
struct Cli {
    /// Config file (defaults to discovery from the workspace root)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Workspace root used for config discovery and relative paths
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Emit JSON suitable for CI
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report whether a cooked asset is up to date, and which dependencies changed
    Status(AssetArgs),
    /// List the cooked outputs that depend on a source file
    Dependents(AssetArgs),
    /// List a content directory through the metadata cache
    Ls(LsArgs),
    /// Delete cooked files whose one-to-one type changed version
    Versions,
}

#[derive(Args)]
struct AssetArgs {
    /// Relative content path (`fx/water.fxc`) or URI (`content://fx/water.fx`)
    asset: String,
}

#[derive(Args)]
struct LsArgs {
    /// Relative directory (empty for the root)
    #[arg(default_value = "")]
    dir: String,
    /// Only list files with this extension
    #[arg(long)]
    ext: Option<String>,
    /// Include directories
    #[arg(long)]
    dirs: bool,
    /// Do not descend into subdirectories
    #[arg(long)]
    shallow: bool,
    /// List the cooked tree instead of the source tree
    #[arg(long)]
    cooked: bool,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Resolved configuration plus the directory its relative paths hang off.
struct Workspace {
    config: KilnConfig,
    base: PathBuf,
}

impl Workspace {
    fn load(cli: &Cli) -> Result<Self> {
        let (config, path) = match &cli.config {
            Some(path) => {
                let config = KilnConfig::load_from_path(path)?;
                (config, Some(path.clone()))
            }
            None => kiln_config::load_for_workspace(&cli.root)?,
        };
        let base = path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| cli.root.clone());
        Ok(Self { config, base })
    }

    fn source_dir(&self) -> PathBuf {
        self.config.paths.source_dir(&self.base)
    }

    fn cooked_dir(&self) -> PathBuf {
        self.config.paths.cooked_dir(&self.base)
    }

    /// Opens both trees without the version gate; inspection never deletes anything.
    fn open(&self) -> Result<CookEnvironment> {
        let mut options = CookOptions::new(self.source_dir(), self.cooked_dir());
        options.process_one_to_one_versions = false;
        CookEnvironment::open(options).context("failed to open cook environment")
    }
}

fn run(cli: Cli) -> Result<i32> {
    let workspace = Workspace::load(&cli)?;
    kiln_config::init_tracing(&workspace.config.logging);

    match &cli.command {
        Command::Status(args) => {
            let asset = parse_asset(&args.asset)?;
            let env = workspace.open()?;
            let report = status(env.database(), &asset);
            let exit = if report.up_to_date { 0 } else { 1 };
            print_output(&report, cli.json)?;
            Ok(exit)
        }
        Command::Dependents(args) => {
            let source = parse_asset(&args.asset)?;
            let env = workspace.open()?;
            let loaded = load_metadata_index(env.cooked(), env.database());
            tracing::debug!(target: "kiln.cli", outputs = loaded, "loaded cook metadata");
            let report = DependentsReport {
                source: source.clone(),
                dependents: env.database().get_dependents(&source),
            };
            print_output(&report, cli.json)?;
            Ok(0)
        }
        Command::Ls(args) => {
            let env = workspace.open()?;
            let cache = if args.cooked { env.cooked() } else { env.source() };
            let report = list(cache, args)?;
            print_output(&report, cli.json)?;
            Ok(0)
        }
        Command::Versions => {
            let gate = VersionGate::new(workspace.cooked_dir(), CookVersions::current());
            let outcome = gate.run()?;
            let exit = match outcome {
                VersionGateOutcome::Aborted { .. } => 1,
                _ => 0,
            };
            print_output(&VersionsReport::from(outcome), cli.json)?;
            Ok(exit)
        }
    }
}

/// Accepts `content://fx/water.fx` or a bare relative filename such as `fx/water.fxc`.
fn parse_asset(raw: &str) -> Result<FilePath> {
    if raw.contains("://") {
        return FilePath::parse_uri(raw).map_err(|err| anyhow!("invalid asset {raw:?}: {err}"));
    }
    FilePath::from_relative_filename(GameDirectory::Content, raw)
        .filter(|path| path.file_type() != FileType::Unknown)
        .ok_or_else(|| anyhow!("invalid asset {raw:?}: unrecognized extension"))
}

/// Resolves every metadata document in the cooked tree so the reverse index is complete.
fn load_metadata_index(cooked: &MetadataCache, database: &DependencyDatabase) -> usize {
    let root = FilePath::new(cooked.root().directory(), "", FileType::Unknown);
    let options = ListingOptions::recursive().with_extension(FileType::Json.cooked_extension());
    let documents = match cooked.directory_listing(&root, &options) {
        Ok(documents) => documents,
        Err(err) => {
            tracing::debug!(target: "kiln.cli", error = %err, "failed to list cooked tree");
            return 0;
        }
    };

    let mut loaded = 0;
    for document in documents {
        // `fx/a.fxc.json` is stored as the Json path `fx/a.fxc`.
        let Some(output) = FilePath::from_relative_filename(
            document.directory(),
            document.relative_without_extension(),
        ) else {
            continue;
        };
        if output.file_type() == FileType::Unknown || is_one_to_one(output.file_type()) {
            continue;
        }
        if database.get_metadata(&output).1 {
            loaded += 1;
        }
    }
    loaded
}

#[derive(Serialize)]
struct StatusReport {
    asset: FilePath,
    file_type: String,
    one_to_one: bool,
    up_to_date: bool,
    /// Empty for a stale many-to-one asset when everything must be recooked.
    changed: Vec<FilePath>,
}

fn status(database: &DependencyDatabase, asset: &FilePath) -> StatusReport {
    let report = database.check_up_to_date_with_details(asset);
    StatusReport {
        asset: asset.clone(),
        file_type: asset.file_type().to_string(),
        one_to_one: is_one_to_one(asset.file_type()),
        up_to_date: report.up_to_date,
        changed: report.changed,
    }
}

#[derive(Serialize)]
struct DependentsReport {
    source: FilePath,
    dependents: Vec<FilePath>,
}

#[derive(Serialize)]
struct ListingReport {
    root: PathBuf,
    entries: Vec<String>,
}

fn list(cache: &MetadataCache, args: &LsArgs) -> Result<ListingReport> {
    let root = cache.root();
    let dir = FilePath::new(root.directory(), &args.dir, FileType::Unknown);
    let mut options = ListingOptions {
        include_directories: args.dirs,
        recursive: !args.shallow,
        extension: None,
    };
    if let Some(ext) = &args.ext {
        options = options.with_extension(ext.as_str());
    }
    let entries = cache
        .directory_listing(&dir, &options)
        .with_context(|| format!("failed to list {:?}", args.dir))?
        .iter()
        .map(|path| root.relative_filename(path))
        .collect();
    Ok(ListingReport {
        root: root.to_absolute(&dir),
        entries,
    })
}

#[derive(Serialize)]
struct VersionsReport {
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_path: Option<PathBuf>,
}

impl From<VersionGateOutcome> for VersionsReport {
    fn from(outcome: VersionGateOutcome) -> Self {
        let (name, deleted, failed_path) = match outcome {
            VersionGateOutcome::Initialized => ("initialized", None, None),
            VersionGateOutcome::UpToDate => ("up_to_date", None, None),
            VersionGateOutcome::Fixed { deleted } => ("fixed", Some(deleted), None),
            VersionGateOutcome::Aborted { path } => ("aborted", None, Some(path)),
        };
        Self {
            outcome: name,
            deleted,
            failed_path,
        }
    }
}

fn print_output<T: Serialize + 'static>(value: &T, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(value)?;
        println!("{out}");
        return Ok(());
    }

    // Human output for known reports. Everything else falls back to pretty JSON.
    let any = value as &dyn std::any::Any;
    if let Some(report) = any.downcast_ref::<StatusReport>() {
        let state = if report.up_to_date { "up to date" } else { "stale" };
        println!("{}: {state}", report.asset);
        for path in &report.changed {
            println!("  changed: {path}");
        }
    } else if let Some(report) = any.downcast_ref::<DependentsReport>() {
        for path in &report.dependents {
            println!("{path}");
        }
    } else if let Some(report) = any.downcast_ref::<ListingReport>() {
        for entry in &report.entries {
            println!("{entry}");
        }
    } else if let Some(report) = any.downcast_ref::<VersionsReport>() {
        match (report.deleted, &report.failed_path) {
            (Some(deleted), _) => println!("versions: {} ({deleted} deleted)", report.outcome),
            (_, Some(path)) => println!("versions: {} at {}", report.outcome, path.display()),
            _ => println!("versions: {}", report.outcome),
        }
    } else {
        let out = serde_json::to_string_pretty(value)?;
        println!("{out}");
    }
    Ok(())
}
