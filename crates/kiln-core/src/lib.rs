//! Core shared types for Kiln.
//!
//! This crate holds the path model every other crate agrees on: asset types and their
//! extensions, logical directory categories, [`FilePath`] keys, and the mapping between keys and
//! the source/cooked trees on disk.

mod file_path;
mod file_type;
mod root;

pub use file_path::{FilePath, FilePathError, GameDirectory};
pub use file_type::FileType;
pub use root::{normalize_local_path, ContentRoot, PathKind};
