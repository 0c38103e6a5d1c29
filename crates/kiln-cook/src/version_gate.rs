//! Bulk versioning for one-to-one cooked types.
//!
//! One-to-one outputs have no metadata document, so a single table at the cooked root records,
//! per type, the data and cooker versions their files were last cooked with.
//!
//! - A missing or unreadable table is assumed current: it is rewritten and nothing is deleted.
//!   An unneeded recook of everything costs more than a missed one, which can always be forced
//!   by bumping the data version again.
//! - When any one-to-one type is out of date, every cooked file of that type is deleted. The
//!   table is only rewritten once all deletions succeeded, so an interrupted fix is retried on
//!   the next start.
//!
//! The gate must run before anything watches the cooked tree.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use kiln_core::FileType;

use crate::error::{CookError, Result};
use crate::util::atomic_write;
use crate::versions::{is_one_to_one, CookVersions};

/// File name of the version table, relative to the cooked root.
pub const VERSION_TABLE_FILE: &str = "version_data.dat";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionPair {
    pub data: u32,
    pub cooker: u32,
}

/// Persisted per-type versions: `u32 count` then `count` `(data, cooker)` pairs, little endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTable {
    entries: Vec<VersionPair>,
}

impl VersionTable {
    /// Table stamped with `versions` for every type.
    pub fn current(versions: &CookVersions) -> Self {
        Self {
            entries: FileType::all()
                .map(|ty| VersionPair {
                    data: versions.data_version(ty),
                    cooker: versions.cooker_version(),
                })
                .collect(),
        }
    }

    pub fn get(&self, file_type: FileType) -> VersionPair {
        self.entries[file_type.index()]
    }

    pub fn set(&mut self, file_type: FileType, pair: VersionPair) {
        self.entries[file_type.index()] = pair;
    }

    /// `true` if files of `file_type` were cooked with `versions`.
    pub fn is_current(&self, file_type: FileType, versions: &CookVersions) -> bool {
        let pair = self.get(file_type);
        pair.data == versions.data_version(file_type) && pair.cooker == versions.cooker_version()
    }

    /// `true` if every one-to-one type is current. Other types are versioned by their metadata.
    pub fn is_compatible(&self, versions: &CookVersions) -> bool {
        FileType::all()
            .filter(|ty| is_one_to_one(*ty))
            .all(|ty| self.is_current(ty, versions))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.entries.len() * 8);
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for pair in &self.entries {
            out.extend_from_slice(&pair.data.to_le_bytes());
            out.extend_from_slice(&pair.cooker.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut words = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        let count = words.next().ok_or_else(|| invalid("empty table"))? as usize;
        if count != FileType::COUNT {
            return Err(invalid(format!(
                "expected {} entries, found {count}",
                FileType::COUNT
            )));
        }

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            match (words.next(), words.next()) {
                (Some(data), Some(cooker)) => entries.push(VersionPair { data, cooker }),
                _ => return Err(invalid("truncated table")),
            }
        }
        Ok(Self { entries })
    }
}

fn invalid(reason: impl Into<String>) -> CookError {
    CookError::InvalidVersionTable {
        reason: reason.into(),
    }
}

/// What [`VersionGate::run`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionGateOutcome {
    /// No usable table existed; a current one was written and nothing was deleted.
    Initialized,
    /// Every one-to-one type was current.
    UpToDate,
    /// Stale cooked files were deleted and the table rewritten.
    Fixed { deleted: usize },
    /// Deleting `path` failed; the table was left untouched.
    Aborted { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct VersionGate {
    cooked_root: PathBuf,
    versions: CookVersions,
}

impl VersionGate {
    pub fn new(cooked_root: impl Into<PathBuf>, versions: CookVersions) -> Self {
        Self {
            cooked_root: cooked_root.into(),
            versions,
        }
    }

    pub fn table_path(&self) -> PathBuf {
        self.cooked_root.join(VERSION_TABLE_FILE)
    }

    pub fn load(&self) -> Result<VersionTable> {
        VersionTable::decode(&fs::read(self.table_path())?)
    }

    /// Writes a table stamped with the current versions.
    pub fn save(&self) -> Result<()> {
        atomic_write(
            &self.table_path(),
            &VersionTable::current(&self.versions).encode(),
        )
    }

    pub fn run(&self) -> Result<VersionGateOutcome> {
        let table = match self.load() {
            Ok(table) => table,
            Err(err) => {
                tracing::info!(
                    target = "kiln.cook",
                    path = %self.table_path().display(),
                    error = %err,
                    "no usable version table; assuming cooked files are current"
                );
                self.save()?;
                return Ok(VersionGateOutcome::Initialized);
            }
        };

        if table.is_compatible(&self.versions) {
            return Ok(VersionGateOutcome::UpToDate);
        }

        match self.delete_stale(&table) {
            Ok(deleted) => {
                self.save()?;
                tracing::info!(
                    target = "kiln.cook",
                    deleted,
                    "deleted cooked files with outdated versions"
                );
                Ok(VersionGateOutcome::Fixed { deleted })
            }
            Err((path, err)) => {
                tracing::warn!(
                    target = "kiln.cook",
                    path = %path.display(),
                    error = %err,
                    "failed to delete outdated cooked file; version fix deferred"
                );
                Ok(VersionGateOutcome::Aborted { path })
            }
        }
    }

    /// Deletes every stale one-to-one file. Stops at the first failed deletion.
    fn delete_stale(
        &self,
        table: &VersionTable,
    ) -> std::result::Result<usize, (PathBuf, io::Error)> {
        let table_path = self.table_path();
        let mut deleted = 0;
        for entry in walkdir::WalkDir::new(&self.cooked_root).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!(
                        target = "kiln.cook",
                        root = %self.cooked_root.display(),
                        error = %err,
                        "skipping unreadable entry during version fix"
                    );
                    continue;
                }
            };
            if !entry.file_type().is_file() || entry.path() == table_path {
                continue;
            }
            if !self.is_stale(entry.path(), table) {
                continue;
            }
            if let Err(err) = fs::remove_file(entry.path()) {
                return Err((entry.path().to_path_buf(), err));
            }
            deleted += 1;
        }
        Ok(deleted)
    }

    fn is_stale(&self, path: &Path, table: &VersionTable) -> bool {
        let file_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(FileType::from_extension)
            .unwrap_or_default();
        file_type != FileType::Unknown
            && is_one_to_one(file_type)
            && !table.is_current(file_type, &self.versions)
    }
}
