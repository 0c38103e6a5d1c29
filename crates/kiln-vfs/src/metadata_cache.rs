//! In-memory mirror of file metadata for one content root.
//!
//! [`MetadataCache`] answers existence, size and modification-time queries from a map populated
//! by one recursive walk at construction. Mutations made through the cache update the map after
//! the disk operation succeeded. Mutations made by anyone else reach the cache through change
//! notifications: they only mark paths dirty, and the next query touching a dirty path re-stats
//! it under the cache lock before answering.
//!
//! Two locks are involved. The dirty set has its own short-lived lock so the notification thread
//! never waits on cache readers; the entry map lock is held for the whole of every query and
//! mutation.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kiln_core::{ContentRoot, FilePath, FileType, PathKind};
use parking_lot::Mutex;

use crate::bridge::{ChangeBridge, ChangeSink};
use crate::fs::{outside_root, DiskFs, FileStat, FileSystem, ListingOptions};
use crate::watch::FileWatcher;

type Entries = HashMap<FilePath, FileStat>;

/// Paths known to be stale, filled from the notification thread.
#[derive(Debug, Default)]
pub struct DirtyTracker {
    paths: Mutex<HashSet<FilePath>>,
    rescan: AtomicBool,
}

impl DirtyTracker {
    pub fn mark(&self, path: FilePath) {
        self.paths.lock().insert(path);
    }

    /// Requests a full re-walk before the next query.
    pub fn request_rescan(&self) {
        self.rescan.store(true, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.paths.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self, path: &FilePath) -> bool {
        self.paths.lock().remove(path)
    }

    /// Removes and returns every dirty path whose on-disk relative name satisfies `pred`.
    fn take_matching(&self, mut pred: impl FnMut(&FilePath) -> bool) -> Vec<FilePath> {
        let mut paths = self.paths.lock();
        let taken: Vec<FilePath> = paths.iter().filter(|p| pred(p)).cloned().collect();
        for path in &taken {
            paths.remove(path);
        }
        taken
    }

    fn take_rescan(&self) -> bool {
        self.rescan.swap(false, Ordering::AcqRel)
    }

    fn clear(&self) {
        self.paths.lock().clear();
    }
}

impl ChangeSink for DirtyTracker {
    fn on_file_change(&self, old: Option<&FilePath>, new: Option<&FilePath>) {
        let mut paths = self.paths.lock();
        if let Some(old) = old {
            paths.insert(old.clone());
        }
        if let Some(new) = new {
            if Some(new) != old {
                paths.insert(new.clone());
            }
        }
    }

    fn on_rescan(&self) {
        self.request_rescan();
    }
}

/// Caching [`FileSystem`] over a [`DiskFs`].
///
/// Source trees share one `.png` file between every texture variant, so keys of a
/// [`PathKind::Source`] cache are texture-canonicalized.
#[derive(Debug)]
pub struct MetadataCache {
    disk: DiskFs,
    entries: Mutex<Entries>,
    dirty: Arc<DirtyTracker>,
    bridge: Option<ChangeBridge>,
}

impl MetadataCache {
    /// Walks `root` and caches every file found. Nothing is watched.
    pub fn new(root: ContentRoot) -> Self {
        let disk = DiskFs::new(root);
        let mut entries = Entries::new();
        walk_into(disk.root(), disk.root().root(), &mut entries);
        tracing::debug!(
            target = "kiln.vfs",
            root = %disk.root().root().display(),
            files = entries.len(),
            "metadata cache populated"
        );
        Self {
            disk,
            entries: Mutex::new(entries),
            dirty: Arc::new(DirtyTracker::default()),
            bridge: None,
        }
    }

    /// Walks `root`, then subscribes to `watcher` for changes under it.
    ///
    /// Changes that happen between the end of the walk and the subscription are not observed.
    pub fn with_watcher<W>(root: ContentRoot, watcher: W) -> io::Result<Self>
    where
        W: FileWatcher + 'static,
    {
        let mut cache = Self::new(root);
        cache.watch(watcher)?;
        Ok(cache)
    }

    /// Subscribes to `watcher` for changes under the root, replacing any previous subscription.
    pub fn watch<W: FileWatcher + 'static>(&mut self, watcher: W) -> io::Result<()> {
        let bridge = ChangeBridge::spawn(watcher, self.root().clone(), Arc::clone(&self.dirty))?;
        self.bridge = Some(bridge);
        Ok(())
    }

    /// The change bridge feeding this cache, if it watches its root.
    pub fn bridge(&self) -> Option<&ChangeBridge> {
        self.bridge.as_ref()
    }

    /// Sink that marks paths of this cache dirty.
    pub fn change_sink(&self) -> Arc<DirtyTracker> {
        Arc::clone(&self.dirty)
    }

    /// Marks `path` stale; the next query touching it re-stats it.
    pub fn mark_dirty(&self, path: &FilePath) {
        self.dirty.mark(self.key(path));
    }

    /// Change-notification entry point: marks both sides dirty.
    pub fn on_file_change(&self, old: Option<&FilePath>, new: Option<&FilePath>) {
        let old = old.map(|p| self.key(p));
        let new = new.map(|p| self.key(p));
        self.dirty.on_file_change(old.as_ref(), new.as_ref());
    }

    /// Replaces the whole cache with a fresh walk of the root.
    pub fn rescan(&self) {
        let mut entries = self.entries.lock();
        self.dirty.take_rescan();
        self.rescan_locked(&mut entries);
    }

    /// Number of cached files.
    pub fn cached_len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Number of paths waiting for reconciliation.
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    fn key(&self, path: &FilePath) -> FilePath {
        match self.disk.root().kind() {
            PathKind::Source => path.canonical(),
            PathKind::Cooked => path.clone(),
        }
    }

    fn rescan_locked(&self, entries: &mut Entries) {
        // Clear first: anything marked during the walk is reconciled again later.
        self.dirty.clear();
        entries.clear();
        walk_into(self.disk.root(), self.disk.root().root(), entries);
        tracing::debug!(
            target = "kiln.vfs",
            root = %self.disk.root().root().display(),
            files = entries.len(),
            "metadata cache rescanned"
        );
    }

    /// Applies a pending rescan request, then reconciles `key` and its ancestor directories if
    /// they are dirty.
    fn reconcile(&self, entries: &mut Entries, key: &FilePath) {
        if self.dirty.take_rescan() {
            self.rescan_locked(entries);
        }
        let relative = key.relative_without_extension();
        for (idx, _) in relative.match_indices('/') {
            let ancestor = FilePath::new(key.directory(), &relative[..idx], FileType::Unknown);
            if self.dirty.take(&ancestor) {
                self.refresh(entries, &ancestor);
            }
        }
        if self.dirty.take(key) {
            self.refresh(entries, key);
        }
    }

    /// Reconciles every dirty path inside `dir_relative`, the directory itself, and its
    /// ancestors (a deleted or moved ancestor takes the subtree with it).
    fn reconcile_under(&self, entries: &mut Entries, dir_relative: &str) {
        if self.dirty.take_rescan() {
            self.rescan_locked(entries);
        }
        let root = self.disk.root();
        let taken = self.dirty.take_matching(|path| {
            let relative = root.relative_filename(path);
            dir_relative.is_empty()
                || relative.is_empty()
                || is_same_or_below(&relative, dir_relative)
                || is_same_or_below(dir_relative, &relative)
        });
        for key in taken {
            self.refresh(entries, &key);
        }
    }

    /// Re-stats `key` against disk.
    ///
    /// A file is (re)inserted. A directory is walked when nothing beneath it is cached yet,
    /// which covers directories moved into the tree. A missing path takes everything cached
    /// beneath it along.
    fn refresh(&self, entries: &mut Entries, key: &FilePath) {
        let abs = self.disk.root().to_absolute(key);
        if let Some(stat) = FileStat::of(&abs) {
            entries.insert(key.clone(), stat);
            return;
        }
        entries.remove(key);
        let prefix = self.subtree_prefix(key);
        if abs.is_dir() {
            if !entries
                .keys()
                .any(|p| p.relative_without_extension().starts_with(&prefix))
            {
                walk_into(self.disk.root(), &abs, entries);
            }
        } else {
            entries.retain(|p, _| !p.relative_without_extension().starts_with(&prefix));
        }
    }

    fn purge_under(&self, entries: &mut Entries, dir: &FilePath) {
        let prefix = self.subtree_prefix(dir);
        entries.retain(|p, _| !p.relative_without_extension().starts_with(&prefix));
    }

    /// `relative/` prefix shared by every cached key beneath `dir`; empty for the root.
    fn subtree_prefix(&self, dir: &FilePath) -> String {
        let mut prefix = self.disk.root().relative_filename(dir);
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix
    }

    fn check(&self, path: &FilePath) -> io::Result<FilePath> {
        if !self.disk.root().owns(path) {
            return Err(outside_root(self.disk.root(), path));
        }
        Ok(self.key(path))
    }

    fn cached(&self, path: &FilePath) -> Option<FileStat> {
        let key = self.check(path).ok()?;
        let mut entries = self.entries.lock();
        self.reconcile(&mut entries, &key);
        entries.get(&key).copied()
    }

    fn commit(&self, key: &FilePath) {
        let mut entries = self.entries.lock();
        self.dirty.take(key);
        self.refresh(&mut entries, key);
    }
}

/// `extension` comes from the extension tables (leading dot), `wanted` from a listing filter.
fn extension_matches(extension: &str, wanted: &str) -> bool {
    extension
        .strip_prefix('.')
        .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
}

fn is_same_or_below(path: &str, dir: &str) -> bool {
    match path.strip_prefix(dir) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn walk_into(root: &ContentRoot, dir: &Path, entries: &mut Entries) {
    for entry in walkdir::WalkDir::new(dir).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!(
                    target = "kiln.vfs",
                    root = %root.root().display(),
                    error = %err,
                    "skipping unreadable entry during walk"
                );
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(path) = root.to_file_path(entry.path()) else {
            continue;
        };
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let key = match root.kind() {
            PathKind::Source => path.canonical(),
            PathKind::Cooked => path,
        };
        entries.insert(
            key,
            FileStat {
                size: meta.len(),
                modified_time: meta.modified().map(crate::fs::unix_seconds).unwrap_or(0),
            },
        );
    }
}

impl FileSystem for MetadataCache {
    fn root(&self) -> &ContentRoot {
        self.disk.root()
    }

    fn exists(&self, path: &FilePath) -> bool {
        self.cached(path).is_some()
    }

    fn is_directory(&self, path: &FilePath) -> bool {
        self.disk.is_directory(path)
    }

    fn file_size(&self, path: &FilePath) -> Option<u64> {
        self.cached(path).map(|stat| stat.size)
    }

    fn modified_time(&self, path: &FilePath) -> Option<u64> {
        self.cached(path).map(|stat| stat.modified_time)
    }

    fn read_all(&self, path: &FilePath) -> io::Result<Vec<u8>> {
        self.disk.read_all(path)
    }

    fn open_read(&self, path: &FilePath) -> io::Result<Box<dyn Read + Send>> {
        self.disk.open_read(path)
    }

    fn open_write(&self, path: &FilePath) -> io::Result<Box<dyn Write + Send + '_>> {
        let key = self.check(path)?;
        let abs = self.disk.root().to_absolute(path);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::File::create(&abs)?;
        Ok(Box::new(CachingWriter {
            cache: self,
            key,
            file,
        }))
    }

    fn directory_listing(
        &self,
        dir: &FilePath,
        options: &ListingOptions,
    ) -> io::Result<Vec<FilePath>> {
        self.check(dir)?;
        let root = self.disk.root();
        let wanted = options.bare_extension();
        // Cached keys only carry types whose extension in this tree's column is known.
        let cacheable = wanted.is_none_or(|wanted| {
            FileType::all().any(|ty| extension_matches(root.extension(ty), wanted))
        });
        if options.include_directories || !options.recursive || !cacheable {
            return self.disk.directory_listing(dir, options);
        }

        let dir_relative = root.relative_filename(dir);
        let prefix = if dir_relative.is_empty() {
            String::new()
        } else {
            format!("{dir_relative}/")
        };

        let mut out: Vec<FilePath> = {
            let mut entries = self.entries.lock();
            self.reconcile_under(&mut entries, &dir_relative);
            entries
                .keys()
                .filter(|path| {
                    wanted.is_none_or(|wanted| {
                        extension_matches(root.extension(path.file_type()), wanted)
                    })
                })
                .filter(|path| path.relative_without_extension().starts_with(&prefix))
                .cloned()
                .collect()
        };

        if out.is_empty() && !self.disk.is_directory(dir) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{dir} is not a directory"),
            ));
        }
        out.sort();
        Ok(out)
    }

    fn copy(&self, from: &FilePath, to: &FilePath, allow_overwrite: bool) -> io::Result<()> {
        let from_key = self.check(from)?;
        let to_key = self.check(to)?;
        let mut entries = self.entries.lock();
        self.reconcile(&mut entries, &from_key);
        self.disk.copy(from, to, allow_overwrite)?;
        self.dirty.take(&to_key);
        match entries.get(&from_key).copied() {
            Some(stat) => {
                entries.insert(to_key, stat);
            }
            None => self.refresh(&mut entries, &to_key),
        }
        Ok(())
    }

    fn rename(&self, from: &FilePath, to: &FilePath) -> io::Result<()> {
        let from_key = self.check(from)?;
        let to_key = self.check(to)?;
        let mut entries = self.entries.lock();
        self.reconcile(&mut entries, &from_key);
        self.disk.rename(from, to)?;
        self.dirty.take(&to_key);

        if self.disk.root().to_absolute(&to_key).is_dir() {
            self.purge_under(&mut entries, &from_key);
            self.purge_under(&mut entries, &to_key);
            walk_into(
                self.disk.root(),
                &self.disk.root().to_absolute(&to_key),
                &mut entries,
            );
            return Ok(());
        }

        match entries.remove(&from_key) {
            Some(stat) => {
                entries.insert(to_key, stat);
            }
            None => self.refresh(&mut entries, &to_key),
        }
        Ok(())
    }

    fn delete(&self, path: &FilePath) -> io::Result<()> {
        let key = self.check(path)?;
        let mut entries = self.entries.lock();
        self.disk.delete(path)?;
        self.dirty.take(&key);
        entries.remove(&key);
        Ok(())
    }

    fn delete_directory(&self, dir: &FilePath, recursive: bool) -> io::Result<()> {
        let key = self.check(dir)?;
        let mut entries = self.entries.lock();
        self.disk.delete_directory(dir, recursive)?;
        if recursive {
            self.purge_under(&mut entries, &key);
        }
        Ok(())
    }

    fn create_dir_path(&self, dir: &FilePath) -> io::Result<()> {
        self.check(dir)?;
        self.disk.create_dir_path(dir)
    }

    fn set_modified_time(&self, path: &FilePath, modified_time: u64) -> io::Result<()> {
        let key = self.check(path)?;
        let mut entries = self.entries.lock();
        self.reconcile(&mut entries, &key);
        self.disk.set_modified_time(path, modified_time)?;
        match entries.get_mut(&key) {
            Some(stat) => stat.modified_time = modified_time,
            None => self.refresh(&mut entries, &key),
        }
        Ok(())
    }

    fn set_read_only(&self, path: &FilePath, read_only: bool) -> io::Result<()> {
        self.check(path)?;
        self.disk.set_read_only(path, read_only)
    }

    fn write_all(
        &self,
        path: &FilePath,
        bytes: &[u8],
        modified_time: Option<u64>,
    ) -> io::Result<()> {
        let key = self.check(path)?;
        let mut entries = self.entries.lock();
        self.disk.write_all(path, bytes, modified_time)?;
        self.dirty.take(&key);
        let modified_time = match modified_time {
            Some(modified_time) => Some(modified_time),
            None => self.disk.modified_time(path),
        };
        match modified_time {
            Some(modified_time) => {
                entries.insert(
                    key,
                    FileStat {
                        size: bytes.len() as u64,
                        modified_time,
                    },
                );
            }
            None => self.refresh(&mut entries, &key),
        }
        Ok(())
    }
}

/// Writer returned by [`MetadataCache::open_write`]; every flush (and the final drop) commits
/// the file's current size and modification time to the cache.
struct CachingWriter<'a> {
    cache: &'a MetadataCache,
    key: FilePath,
    file: fs::File,
}

impl Write for CachingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.cache.commit(&self.key);
        Ok(())
    }
}

impl Drop for CachingWriter<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.file.flush() {
            tracing::debug!(
                target = "kiln.vfs",
                path = %self.key,
                error = %err,
                "failed to flush cached writer"
            );
        }
        self.cache.commit(&self.key);
    }
}
