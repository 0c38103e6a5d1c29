//! Per-output staleness decisions and the reverse dependency graph.
//!
//! One-to-one outputs are current when their cooked and source modification times agree.
//! Every other output carries a [`CookMetadata`] document recording the versions it was cooked
//! with and a stamp for each dependency; it is current while every stamp still matches.
//!
//! All state sits behind one lock held for the full duration of every public operation, which
//! keeps the metadata table and both reverse indices consistent with each other.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;

use kiln_core::{FilePath, FileType};
use kiln_vfs::{ChangeBridge, ChangeSink, FileSystem, FileWatcher, ListingOptions};
use parking_lot::Mutex;

use crate::error::{CookError, Result};
use crate::metadata::{CookMetadata, CookSource, CookSourceKind, DirectorySource, SourceStamp};
use crate::versions::{is_one_to_one, CookVersions};

/// Result of [`DependencyDatabase::check_up_to_date_with_details`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpToDateReport {
    pub up_to_date: bool,
    /// Dependencies that no longer match their recorded stamp. Empty for a stale output means
    /// a global mismatch (versions or the output itself): treat every dependency as changed.
    pub changed: Vec<FilePath>,
}

type DepIndex = HashMap<FilePath, HashSet<FilePath>>;

#[derive(Debug, Default)]
struct Links {
    files: Vec<FilePath>,
    directories: Vec<FilePath>,
}

#[derive(Debug, Default)]
struct State {
    /// Outputs verified current. Only positive results are remembered.
    up_to_date: HashSet<FilePath>,
    metadata: HashMap<FilePath, CookMetadata>,
    /// Source or sibling path -> outputs depending on it.
    deps: DepIndex,
    /// Directory path -> outputs depending on its file count.
    dir_deps: DepIndex,
    /// Output -> the edges it was last linked with. Outlives `metadata`, so relinking after an
    /// invalidation still removes edges of dependencies the output no longer has.
    links: HashMap<FilePath, Links>,
    /// Paths changed locally since startup.
    changed: HashSet<FilePath>,
}

struct Shared {
    source: Arc<dyn FileSystem>,
    cooked: Arc<dyn FileSystem>,
    versions: CookVersions,
    state: Mutex<State>,
}

/// Dependency tracker for cooked content.
///
/// `source` and `cooked` are the file systems of the source tree and the cooked output tree;
/// they are normally [`kiln_vfs::MetadataCache`]s so timestamp checks stay in memory.
pub struct DependencyDatabase {
    shared: Arc<Shared>,
    bridge: Option<ChangeBridge>,
}

impl std::fmt::Debug for DependencyDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyDatabase")
            .field("source", self.shared.source.root())
            .field("cooked", self.shared.cooked.root())
            .field("watching", &self.bridge.is_some())
            .finish()
    }
}

impl DependencyDatabase {
    pub fn new(
        source: Arc<dyn FileSystem>,
        cooked: Arc<dyn FileSystem>,
        versions: CookVersions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                cooked,
                versions,
                state: Mutex::new(State::default()),
            }),
            bridge: None,
        }
    }

    /// Subscribes to changes of the source tree. Replaces any previous subscription.
    pub fn watch<W: FileWatcher + 'static>(&mut self, watcher: W) -> io::Result<()> {
        let root = self.shared.source.root().clone();
        self.bridge = Some(ChangeBridge::spawn(watcher, root, Arc::clone(&self.shared))?);
        Ok(())
    }

    /// Like [`watch`](Self::watch), but `upstream` receives each change first, on the same
    /// thread.
    ///
    /// A [`kiln_vfs::MetadataCache`] backing the source tree passes its
    /// [`change_sink`](kiln_vfs::MetadataCache::change_sink) here: the changed path is dirty in
    /// the cache before any output depending on it is invalidated, so a check made after the
    /// invalidation never sees the old timestamp.
    pub fn watch_after<W, S>(&mut self, watcher: W, upstream: S) -> io::Result<()>
    where
        W: FileWatcher + 'static,
        S: ChangeSink + 'static,
    {
        let root = self.shared.source.root().clone();
        let sink = (upstream, Arc::clone(&self.shared));
        self.bridge = Some(ChangeBridge::spawn(watcher, root, sink)?);
        Ok(())
    }

    pub fn bridge(&self) -> Option<&ChangeBridge> {
        self.bridge.as_ref()
    }

    pub fn versions(&self) -> &CookVersions {
        &self.shared.versions
    }

    pub fn cooker_version(&self) -> u32 {
        self.shared.versions.cooker_version()
    }

    pub fn data_version(&self, file_type: FileType) -> u32 {
        self.shared.versions.data_version(file_type)
    }

    pub fn is_one_to_one(&self, file_type: FileType) -> bool {
        is_one_to_one(file_type)
    }

    /// `true` if the cooked `output` reflects its current inputs.
    ///
    /// May read the output's metadata document from disk; positive answers are remembered until
    /// a relevant change arrives.
    pub fn check_up_to_date(&self, output: &FilePath) -> bool {
        let shared = &*self.shared;
        let mut state = shared.state.lock();
        if state.up_to_date.contains(output) {
            return true;
        }

        if is_one_to_one(output.file_type()) {
            let current = shared.one_to_one_current(output);
            if current {
                state.up_to_date.insert(output.clone());
            }
            return current;
        }

        shared.resolve_metadata(&mut state, output);
        let current = match state.metadata.get(output) {
            Some(metadata) => {
                shared.globals_match(output, metadata)
                    && !shared.any_changed_dependency(metadata)
            }
            None => false,
        };
        if current {
            state.up_to_date.insert(output.clone());
        }
        current
    }

    /// Like [`check_up_to_date`](Self::check_up_to_date), but reports every dependency that no
    /// longer matches instead of stopping at the first.
    pub fn check_up_to_date_with_details(&self, output: &FilePath) -> UpToDateReport {
        let shared = &*self.shared;
        let mut state = shared.state.lock();
        if state.up_to_date.contains(output) {
            return UpToDateReport {
                up_to_date: true,
                changed: Vec::new(),
            };
        }

        if is_one_to_one(output.file_type()) {
            let up_to_date = shared.one_to_one_current(output);
            if up_to_date {
                state.up_to_date.insert(output.clone());
            }
            return UpToDateReport {
                up_to_date,
                changed: if up_to_date {
                    Vec::new()
                } else {
                    vec![output.clone()]
                },
            };
        }

        shared.resolve_metadata(&mut state, output);
        let report = match state.metadata.get(output) {
            Some(metadata) if shared.globals_match(output, metadata) => {
                let changed = shared.changed_dependencies(metadata);
                UpToDateReport {
                    up_to_date: changed.is_empty(),
                    changed,
                }
            }
            _ => UpToDateReport::default(),
        };
        if report.up_to_date {
            state.up_to_date.insert(output.clone());
        }
        report
    }

    /// Outputs that must be recooked when `source` changes.
    ///
    /// Includes outputs listing `source` (or a texture variant of it) directly and outputs
    /// depending on a directory that contains it. `source` itself is never reported.
    pub fn get_dependents(&self, source: &FilePath) -> Vec<FilePath> {
        let state = self.shared.state.lock();
        dependents(&state, source)
    }

    /// Records a successful cook of `output`.
    ///
    /// Stamps every dependency with its current timestamp (or file count), writes the metadata
    /// document, and only then updates the in-memory state. A no-op for one-to-one types.
    pub fn update_metadata(
        &self,
        output: &FilePath,
        cooked_timestamp: u64,
        sources: &[CookSource],
    ) -> Result<()> {
        if is_one_to_one(output.file_type()) {
            return Ok(());
        }

        if let Some(dir) = sources.iter().find(|dependency| {
            dependency.kind == CookSourceKind::Directory
                && !dependency.path.has_unambiguous_directory_uri()
        }) {
            return Err(CookError::AmbiguousDirectory {
                path: dir.path.relative_without_extension().to_owned(),
            });
        }

        let shared = &*self.shared;
        let mut state = shared.state.lock();

        let mut metadata = CookMetadata {
            cooked_timestamp,
            cooker_version: shared.versions.cooker_version(),
            data_version: shared.versions.data_version(output.file_type()),
            ..CookMetadata::default()
        };
        for dependency in sources {
            let path = dependency.path.canonical();
            match dependency.kind {
                CookSourceKind::Directory => {
                    let file_count = shared.directory_file_count(&path);
                    metadata
                        .directory_sources
                        .push(DirectorySource { source: path, file_count });
                }
                CookSourceKind::Sibling => {
                    let timestamp = shared.cooked.modified_time(&path).unwrap_or(0);
                    metadata.siblings.push(SourceStamp {
                        source: path,
                        timestamp,
                    });
                }
                CookSourceKind::Source => {
                    let timestamp = shared.source.modified_time(&path).unwrap_or(0);
                    metadata.sources.push(SourceStamp {
                        source: path,
                        timestamp,
                    });
                }
            }
        }

        let metadata_path = output.metadata_path();
        let bytes = metadata.to_json()?;
        shared.cooked.write_all(&metadata_path, &bytes, None)?;
        metadata.metadata_timestamp = shared.cooked.modified_time(&metadata_path).unwrap_or(0);

        tracing::debug!(
            target = "kiln.cook",
            output = %output,
            dependencies = sources.len(),
            "committed cook metadata"
        );

        remove_dependents(&mut state, output);
        add_dependents(&mut state, output, &metadata);
        state.metadata.insert(output.clone(), metadata);
        state.up_to_date.insert(output.clone());
        Ok(())
    }

    /// Applies change handling for `path` synchronously, for callers that just mutated it and
    /// query right away.
    pub fn manual_on_file_change(&self, path: &FilePath) {
        let mut state = self.shared.state.lock();
        state.changed.insert(path.clone());
        on_file_change(&mut state, path);
    }

    /// `true` if `path` changed locally since startup.
    pub fn was_changed(&self, path: &FilePath) -> bool {
        self.shared.state.lock().changed.contains(path)
    }

    /// The resolved metadata of `output` and whether it was backed by a document on disk.
    pub fn get_metadata(&self, output: &FilePath) -> (CookMetadata, bool) {
        let shared = &*self.shared;
        let mut state = shared.state.lock();
        shared.resolve_metadata(&mut state, output);
        let metadata = state.metadata.get(output).cloned().unwrap_or_default();
        let on_disk = metadata.metadata_timestamp != 0;
        (metadata, on_disk)
    }
}

impl Shared {
    fn one_to_one_current(&self, output: &FilePath) -> bool {
        self.cooked.modified_time(output).unwrap_or(0) == self.source.modified_time(output).unwrap_or(0)
    }

    /// Versions and the output's own timestamp.
    fn globals_match(&self, output: &FilePath, metadata: &CookMetadata) -> bool {
        metadata.cooker_version == self.versions.cooker_version()
            && metadata.data_version == self.versions.data_version(output.file_type())
            && metadata.cooked_timestamp == self.cooked.modified_time(output).unwrap_or(0)
    }

    fn any_changed_dependency(&self, metadata: &CookMetadata) -> bool {
        self.stale_dependencies(metadata).next().is_some()
    }

    fn changed_dependencies(&self, metadata: &CookMetadata) -> Vec<FilePath> {
        self.stale_dependencies(metadata).cloned().collect()
    }

    /// Siblings, then sources, then directories whose recorded stamp no longer matches.
    fn stale_dependencies<'a>(
        &'a self,
        metadata: &'a CookMetadata,
    ) -> impl Iterator<Item = &'a FilePath> + 'a {
        let siblings = metadata
            .siblings
            .iter()
            .filter(|e| self.cooked.modified_time(&e.source).unwrap_or(0) != e.timestamp)
            .map(|e| &e.source);
        let sources = metadata
            .sources
            .iter()
            .filter(|e| self.source.modified_time(&e.source).unwrap_or(0) != e.timestamp)
            .map(|e| &e.source);
        let directories = metadata
            .directory_sources
            .iter()
            .filter(|e| self.directory_file_count(&e.source) != e.file_count)
            .map(|e| &e.source);
        siblings.chain(sources).chain(directories)
    }

    /// Recursive count of source files under `dir`.
    ///
    /// The type of `dir` selects the extension filter and is not part of the directory name.
    fn directory_file_count(&self, dir: &FilePath) -> u32 {
        let file_type = dir.file_type();
        let mut options = ListingOptions::recursive();
        if file_type != FileType::Unknown {
            options = options.with_extension(file_type.source_extension());
        }
        match self
            .source
            .directory_listing(&dir.with_type(FileType::Unknown), &options)
        {
            Ok(files) => u32::try_from(files.len()).unwrap_or(u32::MAX),
            Err(_) => 0,
        }
    }

    /// Loads `output`'s metadata from disk unless it is already resolved.
    fn resolve_metadata(&self, state: &mut State, output: &FilePath) {
        if state.metadata.contains_key(output) {
            return;
        }
        let metadata = self.read_metadata(output);
        remove_dependents(state, output);
        add_dependents(state, output, &metadata);
        state.metadata.insert(output.clone(), metadata);
        state.up_to_date.remove(output);
    }

    fn read_metadata(&self, output: &FilePath) -> CookMetadata {
        let metadata_path = output.metadata_path();
        let bytes = match self.cooked.read_all(&metadata_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    tracing::debug!(
                        target = "kiln.cook",
                        path = %metadata_path,
                        error = %err,
                        "failed to read cook metadata"
                    );
                }
                return CookMetadata::default();
            }
        };
        let Some(mut metadata) = CookMetadata::parse(&bytes) else {
            tracing::debug!(
                target = "kiln.cook",
                path = %metadata_path,
                "ignoring malformed cook metadata"
            );
            return CookMetadata::default();
        };
        metadata.metadata_timestamp = self.cooked.modified_time(&metadata_path).unwrap_or(0);
        metadata
    }
}

impl ChangeSink for Shared {
    fn on_file_change(&self, old: Option<&FilePath>, new: Option<&FilePath>) {
        let mut state = self.state.lock();
        if let Some(old) = old {
            state.changed.insert(old.clone());
            on_file_change(&mut state, old);
        }
        if let Some(new) = new {
            if Some(new) != old {
                state.changed.insert(new.clone());
                on_file_change(&mut state, new);
            }
        }
    }

    fn on_rescan(&self) {
        let mut state = self.state.lock();
        state.up_to_date.clear();
        state.metadata.clear();
    }
}

fn on_file_change(state: &mut State, path: &FilePath) {
    if path.file_type().is_texture() {
        for ty in FileType::TEXTURES {
            invalidate(state, &path.with_type(ty));
        }
    } else {
        invalidate(state, path);
    }
}

/// Drops cached state of `path` and of its direct dependents.
///
/// One level is enough: a dependent of a dependent rediscovers the change through its own
/// stamps the next time it is checked.
fn invalidate(state: &mut State, path: &FilePath) {
    state.up_to_date.remove(path);
    state.metadata.remove(path);
    for dependent in dependents(state, path) {
        state.up_to_date.remove(&dependent);
        state.metadata.remove(&dependent);
    }
}

fn dependents(state: &State, source: &FilePath) -> Vec<FilePath> {
    let normalized = source.canonical();
    let mut out: Vec<FilePath> = Vec::new();

    if let Some(outputs) = state.deps.get(&normalized) {
        out.extend(outputs.iter().filter(|o| o.canonical() != normalized).cloned());
    }

    // Prefix relations cannot be hashed; directories are scanned.
    for (dir, outputs) in &state.dir_deps {
        if dir.file_type() != FileType::Unknown && dir.file_type() != normalized.file_type() {
            continue;
        }
        if !source.is_under(dir) {
            continue;
        }
        out.extend(outputs.iter().filter(|o| o.canonical() != normalized).cloned());
    }

    out.sort();
    out.dedup();
    out
}

fn add_dependents(state: &mut State, output: &FilePath, metadata: &CookMetadata) {
    let mut links = Links::default();
    for stamp in metadata.siblings.iter().chain(&metadata.sources) {
        state
            .deps
            .entry(stamp.source.clone())
            .or_default()
            .insert(output.clone());
        links.files.push(stamp.source.clone());
    }
    for dir in &metadata.directory_sources {
        state
            .dir_deps
            .entry(dir.source.clone())
            .or_default()
            .insert(output.clone());
        links.directories.push(dir.source.clone());
    }
    state.links.insert(output.clone(), links);
}

/// Unlinks `output` from the reverse indices, using the edges recorded when it was linked.
fn remove_dependents(state: &mut State, output: &FilePath) {
    let Some(links) = state.links.remove(output) else {
        return;
    };
    for file in &links.files {
        unlink(&mut state.deps, file, output);
    }
    for dir in &links.directories {
        unlink(&mut state.dir_deps, dir, output);
    }
}

fn unlink(index: &mut DepIndex, key: &FilePath, output: &FilePath) {
    if let Some(outputs) = index.get_mut(key) {
        outputs.remove(output);
        if outputs.is_empty() {
            index.remove(key);
        }
    }
}
