use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::{FilePath, FileType, GameDirectory};

/// Which extension column a tree stores files under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathKind {
    /// Authored inputs (`.png`, `.fx`, ...).
    Source,
    /// Cooker outputs (`.sif0`, `.fxc`, ...).
    Cooked,
}

/// A directory on disk that backs one [`GameDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRoot {
    root: PathBuf,
    directory: GameDirectory,
    kind: PathKind,
}

impl ContentRoot {
    pub fn new(root: impl AsRef<Path>, directory: GameDirectory, kind: PathKind) -> Self {
        Self {
            root: normalize_local_path(root.as_ref()),
            directory,
            kind,
        }
    }

    /// Source tree for [`GameDirectory::Content`].
    pub fn source(root: impl AsRef<Path>) -> Self {
        Self::new(root, GameDirectory::Content, PathKind::Source)
    }

    /// Cooked output tree for [`GameDirectory::Content`].
    pub fn cooked(root: impl AsRef<Path>) -> Self {
        Self::new(root, GameDirectory::Content, PathKind::Cooked)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn directory(&self) -> GameDirectory {
        self.directory
    }

    pub fn kind(&self) -> PathKind {
        self.kind
    }

    /// `true` if `path` belongs to this root's directory category.
    #[inline]
    pub fn owns(&self, path: &FilePath) -> bool {
        path.directory() == self.directory
    }

    /// Extension (including the leading dot) files of `file_type` carry in this tree.
    pub fn extension(&self, file_type: FileType) -> &'static str {
        match self.kind {
            PathKind::Source => file_type.source_extension(),
            PathKind::Cooked => file_type.cooked_extension(),
        }
    }

    pub fn relative_filename(&self, path: &FilePath) -> String {
        match self.kind {
            PathKind::Source => path.relative_source_filename(),
            PathKind::Cooked => path.relative_filename(),
        }
    }

    /// Absolute location of `path` in this tree. The directory category is not checked.
    pub fn to_absolute(&self, path: &FilePath) -> PathBuf {
        let relative = self.relative_filename(path);
        if relative.is_empty() {
            return self.root.clone();
        }
        let mut out = self.root.clone();
        out.extend(relative.split('/'));
        out
    }

    /// Maps an absolute path back to a [`FilePath`].
    ///
    /// Returns `None` for paths outside the root, non UTF-8 paths, and files with an
    /// unrecognized extension.
    pub fn to_file_path(&self, absolute: &Path) -> Option<FilePath> {
        let absolute = normalize_local_path(absolute);
        let relative = absolute.strip_prefix(&self.root).ok()?;
        let relative = relative.to_str()?;
        FilePath::from_relative_filename(self.directory, relative)
    }
}

/// Lexically normalizes a local path: drops `.` segments and folds `..` where possible.
///
/// This does not hit the file system and does not resolve symlinks.
pub fn normalize_local_path(path: &Path) -> PathBuf {
    let mut prefix: Option<OsString> = None;
    let mut has_root = false;
    let mut stack: Vec<OsString> = Vec::new();

    for component in path.components() {
        match component {
            Component::Prefix(prefix_component) => {
                prefix = Some(prefix_component.as_os_str().to_owned());
            }
            Component::RootDir => has_root = true,
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(last) = stack.last() {
                    if last != ".." {
                        stack.pop();
                        continue;
                    }
                }

                if !has_root {
                    stack.push(OsString::from(".."));
                }
            }
            Component::Normal(segment) => stack.push(segment.to_owned()),
        }
    }

    let mut out = PathBuf::new();
    match (prefix, has_root) {
        (Some(mut prefix), true) => {
            prefix.push(std::path::MAIN_SEPARATOR.to_string());
            out.push(prefix);
        }
        (Some(prefix), false) => out.push(prefix),
        (None, true) => out.push(std::path::MAIN_SEPARATOR.to_string()),
        (None, false) => {}
    }
    out.extend(stack);
    out
}
