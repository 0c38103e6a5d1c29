use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use filetime::FileTime;
use kiln_core::{ContentRoot, FilePath, FileType};

/// Filters for [`FileSystem::directory_listing`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingOptions {
    /// Report directories alongside files.
    pub include_directories: bool,
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Only report files with this extension (with or without the leading dot).
    pub extension: Option<String>,
}

impl ListingOptions {
    /// Recursive, files only, no extension filter.
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            ..Self::default()
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        self.extension = (!extension.is_empty()).then_some(extension);
        self
    }

    pub fn with_directories(mut self, include: bool) -> Self {
        self.include_directories = include;
        self
    }

    /// Extension filter without its leading dot, if any.
    pub fn bare_extension(&self) -> Option<&str> {
        self.extension
            .as_deref()
            .map(|ext| ext.strip_prefix('.').unwrap_or(ext))
            .filter(|ext| !ext.is_empty())
    }
}

/// File system collaborator for one [`ContentRoot`].
///
/// Paths are [`FilePath`] keys; the backend resolves them against its root using the extension
/// column of the root's kind. Modification times are whole seconds since the Unix epoch.
///
/// Queries answer `false`/`None` on any failure. Mutations report the underlying I/O error and
/// never partially apply.
pub trait FileSystem: Send + Sync {
    fn root(&self) -> &ContentRoot;

    fn exists(&self, path: &FilePath) -> bool;

    fn is_directory(&self, path: &FilePath) -> bool;

    fn file_size(&self, path: &FilePath) -> Option<u64>;

    fn modified_time(&self, path: &FilePath) -> Option<u64>;

    fn read_all(&self, path: &FilePath) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.open_read(path)?.read_to_end(&mut out)?;
        Ok(out)
    }

    fn open_read(&self, path: &FilePath) -> io::Result<Box<dyn Read + Send>>;

    /// Opens `path` for writing, truncating it and creating parent directories.
    fn open_write(&self, path: &FilePath) -> io::Result<Box<dyn Write + Send + '_>>;

    /// Lists `dir`. Fails with `NotFound` if `dir` is not a directory.
    fn directory_listing(
        &self,
        dir: &FilePath,
        options: &ListingOptions,
    ) -> io::Result<Vec<FilePath>>;

    fn copy(&self, from: &FilePath, to: &FilePath, allow_overwrite: bool) -> io::Result<()>;

    fn rename(&self, from: &FilePath, to: &FilePath) -> io::Result<()>;

    fn delete(&self, path: &FilePath) -> io::Result<()>;

    /// Removes `dir`; without `recursive` only an empty directory can be removed.
    fn delete_directory(&self, dir: &FilePath, recursive: bool) -> io::Result<()>;

    fn create_dir_path(&self, dir: &FilePath) -> io::Result<()>;

    fn set_modified_time(&self, path: &FilePath, modified_time: u64) -> io::Result<()>;

    fn set_read_only(&self, path: &FilePath, read_only: bool) -> io::Result<()>;

    /// Replaces the contents of `path`, optionally pinning its modification time.
    fn write_all(
        &self,
        path: &FilePath,
        bytes: &[u8],
        modified_time: Option<u64>,
    ) -> io::Result<()>;
}

/// Size and modification time of a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileStat {
    pub size: u64,
    pub modified_time: u64,
}

impl FileStat {
    /// Stats `path`; `None` if it is missing or not a regular file.
    pub fn of(path: &Path) -> Option<FileStat> {
        let meta = fs::metadata(path).ok()?;
        if !meta.is_file() {
            return None;
        }
        Some(FileStat {
            size: meta.len(),
            modified_time: meta.modified().map(unix_seconds).unwrap_or(0),
        })
    }
}

/// Whole seconds since the Unix epoch; pre-epoch times clamp to 0.
pub fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) fn system_time(seconds: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(seconds)
}

pub(crate) fn outside_root(root: &ContentRoot, path: &FilePath) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!(
            "{path} is outside the {} root {}",
            root.directory().scheme(),
            root.root().display()
        ),
    )
}

/// Plain disk backend.
#[derive(Debug, Clone)]
pub struct DiskFs {
    root: ContentRoot,
}

impl DiskFs {
    pub fn new(root: ContentRoot) -> Self {
        Self { root }
    }

    fn resolve(&self, path: &FilePath) -> io::Result<std::path::PathBuf> {
        if !self.root.owns(path) {
            return Err(outside_root(&self.root, path));
        }
        Ok(self.root.to_absolute(path))
    }

    fn stat(&self, path: &FilePath) -> Option<FileStat> {
        let abs = self.resolve(path).ok()?;
        FileStat::of(&abs)
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

pub(crate) fn directory_path(root: &ContentRoot, absolute: &Path) -> Option<FilePath> {
    let relative = absolute.strip_prefix(root.root()).ok()?.to_str()?;
    Some(FilePath::new(root.directory(), relative, FileType::Unknown))
}

fn matches_extension(path: &Path, extension: Option<&str>) -> bool {
    let Some(wanted) = extension else {
        return true;
    };
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
}

impl FileSystem for DiskFs {
    fn root(&self) -> &ContentRoot {
        &self.root
    }

    fn exists(&self, path: &FilePath) -> bool {
        self.stat(path).is_some()
    }

    fn is_directory(&self, path: &FilePath) -> bool {
        self.resolve(path).map(|abs| abs.is_dir()).unwrap_or(false)
    }

    fn file_size(&self, path: &FilePath) -> Option<u64> {
        self.stat(path).map(|stat| stat.size)
    }

    fn modified_time(&self, path: &FilePath) -> Option<u64> {
        self.stat(path).map(|stat| stat.modified_time)
    }

    fn read_all(&self, path: &FilePath) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(path)?)
    }

    fn open_read(&self, path: &FilePath) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(self.resolve(path)?)?))
    }

    fn open_write(&self, path: &FilePath) -> io::Result<Box<dyn Write + Send + '_>> {
        let abs = self.resolve(path)?;
        ensure_parent(&abs)?;
        Ok(Box::new(fs::File::create(abs)?))
    }

    fn directory_listing(
        &self,
        dir: &FilePath,
        options: &ListingOptions,
    ) -> io::Result<Vec<FilePath>> {
        let abs = self.resolve(dir)?;
        if !abs.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", abs.display()),
            ));
        }

        let extension = options.bare_extension();
        let mut walker = walkdir::WalkDir::new(&abs).min_depth(1);
        if !options.recursive {
            walker = walker.max_depth(1);
        }

        let mut out = Vec::new();
        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            let file_type = entry.file_type();
            let keep = if file_type.is_dir() {
                options.include_directories
            } else {
                file_type.is_file() && matches_extension(entry.path(), extension)
            };
            if !keep {
                continue;
            }
            let path = if file_type.is_dir() {
                // Directory names are never typed, even when they contain a dot.
                directory_path(&self.root, entry.path())
            } else {
                self.root.to_file_path(entry.path())
            };
            out.extend(path);
        }
        out.sort();
        Ok(out)
    }

    fn copy(&self, from: &FilePath, to: &FilePath, allow_overwrite: bool) -> io::Result<()> {
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        if !allow_overwrite && dst.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", dst.display()),
            ));
        }
        ensure_parent(&dst)?;
        fs::copy(&src, &dst)?;
        // Copies keep the source timestamp so cached and on-disk metadata agree.
        let meta = fs::metadata(&src)?;
        filetime::set_file_mtime(&dst, FileTime::from_last_modification_time(&meta))
    }

    fn rename(&self, from: &FilePath, to: &FilePath) -> io::Result<()> {
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        ensure_parent(&dst)?;
        fs::rename(src, dst)
    }

    fn delete(&self, path: &FilePath) -> io::Result<()> {
        fs::remove_file(self.resolve(path)?)
    }

    fn delete_directory(&self, dir: &FilePath, recursive: bool) -> io::Result<()> {
        let abs = self.resolve(dir)?;
        if recursive {
            fs::remove_dir_all(abs)
        } else {
            fs::remove_dir(abs)
        }
    }

    fn create_dir_path(&self, dir: &FilePath) -> io::Result<()> {
        fs::create_dir_all(self.resolve(dir)?)
    }

    fn set_modified_time(&self, path: &FilePath, modified_time: u64) -> io::Result<()> {
        let abs = self.resolve(path)?;
        filetime::set_file_mtime(abs, FileTime::from_system_time(system_time(modified_time)))
    }

    fn set_read_only(&self, path: &FilePath, read_only: bool) -> io::Result<()> {
        let abs = self.resolve(path)?;
        let mut permissions = fs::metadata(&abs)?.permissions();
        permissions.set_readonly(read_only);
        fs::set_permissions(abs, permissions)
    }

    fn write_all(
        &self,
        path: &FilePath,
        bytes: &[u8],
        modified_time: Option<u64>,
    ) -> io::Result<()> {
        let abs = self.resolve(path)?;
        ensure_parent(&abs)?;
        fs::write(&abs, bytes)?;
        if let Some(modified_time) = modified_time {
            filetime::set_file_mtime(
                &abs,
                FileTime::from_system_time(system_time(modified_time)),
            )?;
        }
        Ok(())
    }
}
