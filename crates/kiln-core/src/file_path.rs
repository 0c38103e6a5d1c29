use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::FileType;

/// Logical root a [`FilePath`] is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum GameDirectory {
    Config,
    #[default]
    Content,
    Log,
    Save,
    ToolsBin,
    Videos,
}

impl GameDirectory {
    pub const ALL: [GameDirectory; 6] = [
        GameDirectory::Config,
        GameDirectory::Content,
        GameDirectory::Log,
        GameDirectory::Save,
        GameDirectory::ToolsBin,
        GameDirectory::Videos,
    ];

    /// URI scheme, without the `://` separator.
    pub fn scheme(self) -> &'static str {
        match self {
            GameDirectory::Config => "config",
            GameDirectory::Content => "content",
            GameDirectory::Log => "log",
            GameDirectory::Save => "save",
            GameDirectory::ToolsBin => "tools",
            GameDirectory::Videos => "videos",
        }
    }

    pub fn from_scheme(scheme: &str) -> Option<GameDirectory> {
        Self::ALL
            .into_iter()
            .find(|dir| dir.scheme().eq_ignore_ascii_case(scheme))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilePathError {
    #[error("missing `<scheme>://` prefix in {0:?}")]
    MissingScheme(String),
    #[error("unknown path scheme {0:?}")]
    UnknownScheme(String),
    #[error("unrecognized file extension in {0:?}")]
    UnknownExtension(String),
}

/// Identity of an asset: a directory category, a relative name without extension, and a type.
///
/// The relative part always uses `/` separators and never starts with one. The type selects the
/// extension when the path is resolved against a cooked or source tree (see
/// [`crate::ContentRoot`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FilePath {
    directory: GameDirectory,
    relative: String,
    file_type: FileType,
}

impl FilePath {
    pub fn new(
        directory: GameDirectory,
        relative_without_extension: impl AsRef<str>,
        file_type: FileType,
    ) -> Self {
        Self {
            directory,
            relative: normalize_relative(relative_without_extension.as_ref()),
            file_type,
        }
    }

    /// Convenience for [`GameDirectory::Content`] paths.
    pub fn content(relative_without_extension: impl AsRef<str>, file_type: FileType) -> Self {
        Self::new(GameDirectory::Content, relative_without_extension, file_type)
    }

    /// Builds a path from a relative filename that still carries its extension.
    ///
    /// The extension of the last component selects the type. Returns `None` when that extension
    /// is non-empty but unrecognized.
    pub fn from_relative_filename(directory: GameDirectory, relative: &str) -> Option<Self> {
        let relative = normalize_relative(relative);
        let (stem, extension) = split_extension(&relative);
        let file_type = FileType::from_extension(extension);
        if file_type == FileType::Unknown && !extension.is_empty() {
            return None;
        }
        Some(Self {
            directory,
            relative: stem.to_owned(),
            file_type,
        })
    }

    #[inline]
    pub fn directory(&self) -> GameDirectory {
        self.directory
    }

    #[inline]
    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    #[inline]
    pub fn relative_without_extension(&self) -> &str {
        &self.relative
    }

    pub fn set_type(&mut self, file_type: FileType) {
        self.file_type = file_type;
    }

    pub fn with_type(&self, file_type: FileType) -> Self {
        Self {
            directory: self.directory,
            relative: self.relative.clone(),
            file_type,
        }
    }

    /// Same path with texture variants collapsed onto [`FileType::Texture0`].
    pub fn canonical(&self) -> Self {
        self.with_type(self.file_type.canonical())
    }

    /// Relative filename carrying the cooked extension.
    pub fn relative_filename(&self) -> String {
        format!("{}{}", self.relative, self.file_type.cooked_extension())
    }

    /// Relative filename carrying the source extension.
    pub fn relative_source_filename(&self) -> String {
        format!("{}{}", self.relative, self.file_type.source_extension())
    }

    /// Location of the cook metadata document for this output.
    ///
    /// The whole cooked filename (extension included) becomes the stem, so `fx/a.fxc` maps to
    /// `fx/a.fxc.json`.
    pub fn metadata_path(&self) -> FilePath {
        FilePath {
            directory: self.directory,
            relative: self.relative_filename(),
            file_type: FileType::Json,
        }
    }

    /// `true` if `self` is the directory `dir` or lives somewhere underneath it.
    ///
    /// Comparison is an ASCII case-insensitive prefix match on the relative names; an empty
    /// directory contains everything in the same category.
    pub fn is_under(&self, dir: &FilePath) -> bool {
        if self.directory != dir.directory {
            return false;
        }
        starts_with_ignore_ascii_case(&self.relative, &dir.relative)
    }

    /// `content://relative.ext` form using the source extension.
    pub fn to_uri(&self) -> String {
        format!(
            "{}://{}",
            self.directory.scheme(),
            self.relative_source_filename()
        )
    }

    pub fn parse_uri(uri: &str) -> Result<Self, FilePathError> {
        let Some((scheme, rest)) = uri.split_once("://") else {
            return Err(FilePathError::MissingScheme(uri.to_owned()));
        };
        let directory = GameDirectory::from_scheme(scheme)
            .ok_or_else(|| FilePathError::UnknownScheme(scheme.to_owned()))?;
        Self::from_relative_filename(directory, rest)
            .ok_or_else(|| FilePathError::UnknownExtension(uri.to_owned()))
    }

    /// Like [`FilePath::parse_uri`], for directory names such as `libs/v1.2`: an unrecognized
    /// extension stays part of the name and yields an untyped path.
    pub fn parse_directory_uri(uri: &str) -> Result<Self, FilePathError> {
        match Self::parse_uri(uri) {
            Err(FilePathError::UnknownExtension(_)) => {
                let Some((scheme, rest)) = uri.split_once("://") else {
                    return Err(FilePathError::MissingScheme(uri.to_owned()));
                };
                let directory = GameDirectory::from_scheme(scheme)
                    .ok_or_else(|| FilePathError::UnknownScheme(scheme.to_owned()))?;
                Ok(Self::new(directory, rest, FileType::Unknown))
            }
            parsed => parsed,
        }
    }

    /// `false` for an untyped path whose name ends in a recognized extension (`libs/v1.fx`):
    /// its URI would parse back as a typed path.
    pub fn has_unambiguous_directory_uri(&self) -> bool {
        self.file_type != FileType::Unknown
            || FileType::from_extension(split_extension(&self.relative).1) == FileType::Unknown
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl FromStr for FilePath {
    type Err = FilePathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_uri(s)
    }
}

impl Serialize for FilePath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_uri())
    }
}

impl<'de> Deserialize<'de> for FilePath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse_uri(&raw).map_err(serde::de::Error::custom)
    }
}

fn normalize_relative(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for segment in raw.split(['/', '\\']) {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(segment);
    }
    out
}

/// Splits `a/b.c` into `("a/b", "c")`, mirroring `Path::extension` (a leading dot on the file
/// name does not start an extension).
fn split_extension(relative: &str) -> (&str, &str) {
    let name_start = relative.rfind('/').map_or(0, |idx| idx + 1);
    let name = &relative[name_start..];
    match name.rfind('.') {
        Some(0) | None => (relative, ""),
        Some(dot) => (
            &relative[..name_start + dot],
            &relative[name_start + dot + 1..],
        ),
    }
}

fn starts_with_ignore_ascii_case(haystack: &str, prefix: &str) -> bool {
    haystack.len() >= prefix.len()
        && haystack.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}
