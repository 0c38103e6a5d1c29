use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_core::ContentRoot;
use kiln_vfs::{ChangeBridge, FileWatcher, MetadataCache};

use crate::database::DependencyDatabase;
use crate::error::Result;
use crate::version_gate::{VersionGate, VersionGateOutcome};
use crate::versions::CookVersions;

/// Creates one watcher per subscribed root. Called with the root directory to watch.
pub type WatcherFactory =
    Box<dyn Fn(&Path) -> io::Result<Box<dyn FileWatcher>> + Send + Sync + 'static>;

pub struct CookOptions {
    pub source_dir: PathBuf,
    pub cooked_dir: PathBuf,
    /// Run the [`VersionGate`] on the cooked tree before anything reads it.
    pub process_one_to_one_versions: bool,
    pub versions: CookVersions,
    /// `None` disables change notification entirely.
    pub watcher: Option<WatcherFactory>,
}

impl CookOptions {
    pub fn new(source_dir: impl Into<PathBuf>, cooked_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            cooked_dir: cooked_dir.into(),
            process_one_to_one_versions: true,
            versions: CookVersions::current(),
            watcher: None,
        }
    }

    pub fn with_watcher<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Path) -> io::Result<Box<dyn FileWatcher>> + Send + Sync + 'static,
    {
        self.watcher = Some(Box::new(factory));
        self
    }
}

impl fmt::Debug for CookOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookOptions")
            .field("source_dir", &self.source_dir)
            .field("cooked_dir", &self.cooked_dir)
            .field("process_one_to_one_versions", &self.process_one_to_one_versions)
            .field("versions", &self.versions)
            .field("watcher", &self.watcher.is_some())
            .finish()
    }
}

/// The file-system caches and dependency database for one source/cooked tree pair.
#[derive(Debug)]
pub struct CookEnvironment {
    source: Arc<MetadataCache>,
    cooked: Arc<MetadataCache>,
    database: DependencyDatabase,
    version_gate: Option<VersionGateOutcome>,
}

impl CookEnvironment {
    /// Opens both trees.
    ///
    /// The version gate runs first since it deletes cooked files and nothing may have observed
    /// them yet. Each cache is walked before its watcher is attached; changes in between are
    /// missed.
    ///
    /// The source tree has a single watcher. Its bridge marks the source cache dirty and then
    /// invalidates the database, in that order.
    pub fn open(options: CookOptions) -> Result<Self> {
        let CookOptions {
            source_dir,
            cooked_dir,
            process_one_to_one_versions,
            versions,
            watcher,
        } = options;

        let version_gate = if process_one_to_one_versions {
            Some(VersionGate::new(&cooked_dir, versions.clone()).run()?)
        } else {
            None
        };
        std::fs::create_dir_all(&cooked_dir)?;

        let source = Arc::new(MetadataCache::new(ContentRoot::source(&source_dir)));
        let mut cooked = MetadataCache::new(ContentRoot::cooked(&cooked_dir));
        let source_watcher = match &watcher {
            Some(factory) => {
                let source_watcher = factory(source_dir.as_path())?;
                cooked.watch(factory(cooked_dir.as_path())?)?;
                Some(source_watcher)
            }
            None => None,
        };

        let cooked = Arc::new(cooked);
        let mut database = DependencyDatabase::new(
            Arc::clone(&source) as Arc<dyn kiln_vfs::FileSystem>,
            Arc::clone(&cooked) as Arc<dyn kiln_vfs::FileSystem>,
            versions,
        );
        if let Some(source_watcher) = source_watcher {
            database.watch_after(source_watcher, source.change_sink())?;
        }

        tracing::info!(
            target = "kiln.cook",
            source = %source_dir.display(),
            cooked = %cooked_dir.display(),
            watching = watcher.is_some(),
            "cook environment ready"
        );

        Ok(Self {
            source,
            cooked,
            database,
            version_gate,
        })
    }

    pub fn source(&self) -> &Arc<MetadataCache> {
        &self.source
    }

    pub fn cooked(&self) -> &Arc<MetadataCache> {
        &self.cooked
    }

    pub fn database(&self) -> &DependencyDatabase {
        &self.database
    }

    /// The bridge feeding source-tree changes to both the source cache and the database.
    pub fn source_bridge(&self) -> Option<&ChangeBridge> {
        self.database.bridge()
    }

    /// What the version gate did, or `None` when it was disabled.
    pub fn version_gate(&self) -> Option<&VersionGateOutcome> {
        self.version_gate.as_ref()
    }
}
