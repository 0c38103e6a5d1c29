//! File-system layer for Kiln.
//!
//! The VFS is responsible for:
//! - The [`FileSystem`] collaborator trait every higher layer reads and writes through.
//! - [`DiskFs`], the plain disk backend, and [`MetadataCache`], its caching counterpart.
//! - Representing file change events and a pluggable watcher interface.
//! - Bridging watcher events onto [`kiln_core::FilePath`]s ([`ChangeBridge`]).

mod bridge;
mod change;
mod fs;
mod metadata_cache;
mod watch;

pub use bridge::{ChangeBridge, ChangeSink};
pub use change::{FileChange, FileChangeKind};
pub use fs::{unix_seconds, DiskFs, FileStat, FileSystem, ListingOptions};
pub use metadata_cache::{DirtyTracker, MetadataCache};
pub use watch::{
    FileWatcher, ManualFileWatcher, ManualFileWatcherHandle, WatchEvent, WatchMessage, WatchMode,
};

#[cfg(feature = "watch-notify")]
pub use watch::{EventNormalizer, NotifyFileWatcher};
