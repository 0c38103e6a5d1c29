use kiln_core::FilePath;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A timestamped file dependency of a cooked output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourceStamp {
    pub source: FilePath,
    pub timestamp: u64,
}

/// A directory dependency: how many matching files the directory held at cook time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DirectorySource {
    #[serde(deserialize_with = "deserialize_directory")]
    pub source: FilePath,
    pub file_count: u32,
}

/// Dependency record persisted next to a many-to-one cooked output.
///
/// Stored as JSON at [`FilePath::metadata_path`] of the output. `Sources` is required (possibly
/// empty); `Siblings` and `DirectorySources` are omitted when empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CookMetadata {
    pub cooked_timestamp: u64,
    pub cooker_version: u32,
    pub data_version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directory_sources: Vec<DirectorySource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub siblings: Vec<SourceStamp>,
    pub sources: Vec<SourceStamp>,
    /// Modification time of the metadata document itself; zero when it was not read from or
    /// written to disk.
    #[serde(skip)]
    pub metadata_timestamp: u64,
}

impl CookMetadata {
    /// Parses a metadata document.
    ///
    /// Anything malformed, including a missing required key, yields `None`. Sibling and source
    /// texture variants are collapsed onto their canonical type.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let mut metadata: CookMetadata = serde_json::from_slice(bytes).ok()?;
        for stamp in metadata.siblings.iter_mut().chain(metadata.sources.iter_mut()) {
            stamp.source = stamp.source.canonical();
        }
        Some(metadata)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Every dependency path, directories included.
    pub fn dependencies(&self) -> impl Iterator<Item = &FilePath> {
        self.siblings
            .iter()
            .chain(&self.sources)
            .map(|stamp| &stamp.source)
            .chain(self.directory_sources.iter().map(|dir| &dir.source))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CookSourceKind {
    /// Compared against the source tree.
    Source,
    /// Lives next to the output; compared against the cooked tree.
    Sibling,
    /// Recursive count of files matching the path's type.
    Directory,
}

fn deserialize_directory<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<FilePath, D::Error> {
    let raw = String::deserialize(deserializer)?;
    FilePath::parse_directory_uri(&raw).map_err(serde::de::Error::custom)
}

/// A dependency reported by the cooker for one output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CookSource {
    pub path: FilePath,
    pub kind: CookSourceKind,
}

impl CookSource {
    pub fn source(path: FilePath) -> Self {
        Self {
            path,
            kind: CookSourceKind::Source,
        }
    }

    pub fn sibling(path: FilePath) -> Self {
        Self {
            path,
            kind: CookSourceKind::Sibling,
        }
    }

    pub fn directory(path: FilePath) -> Self {
        Self {
            path,
            kind: CookSourceKind::Directory,
        }
    }
}
