use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::CookError;

/// Replaces `path` with `bytes` via a sibling temp file and a rename. Readers see either the old
/// file or the complete new one.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), CookError> {
    let dir = match path.parent() {
        Some(dir) if dir.as_os_str().is_empty() => Path::new("."),
        Some(dir) => dir,
        None => return Err(io::Error::other("cannot write to a root path").into()),
    };
    fs::create_dir_all(dir)?;

    let mut staged = StagedFile::create(dir, path)?;
    staged.file.write_all(bytes)?;
    staged.file.sync_all()?;
    staged.commit(path)?;
    Ok(())
}

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// A temp file next to its destination, removed on drop unless committed.
struct StagedFile {
    path: PathBuf,
    file: File,
    committed: bool,
}

impl StagedFile {
    fn create(dir: &Path, dest: &Path) -> io::Result<Self> {
        let name = dest
            .file_name()
            .ok_or_else(|| io::Error::other("destination has no file name"))?;
        loop {
            let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
            let mut staged_name = name.to_os_string();
            staged_name.push(format!(".tmp.{}.{seq}", std::process::id()));
            let path = dir.join(staged_name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    return Ok(Self {
                        path,
                        file,
                        committed: false,
                    })
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err),
            }
        }
    }

    fn commit(mut self, dest: &Path) -> io::Result<()> {
        let renamed = match fs::rename(&self.path, dest) {
            // Windows refuses to rename over an existing file.
            Err(err) if cfg!(windows) && dest.exists() => fs::remove_file(dest)
                .map_err(|_| err)
                .and_then(|()| fs::rename(&self.path, dest)),
            other => other,
        };
        self.committed = renamed.is_ok();
        renamed
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => tracing::debug!(
                target = "kiln.cook",
                path = %self.path.display(),
                error = %err,
                "failed to remove staged file"
            ),
            _ => {}
        }
    }
}
