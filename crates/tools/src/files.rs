//! Filesystem operations confined to one base directory.

use crate::error::FileError;
use serde::Serialize;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteReceipt {
    pub path: PathBuf,
    pub bytes_written: usize,
}

pub struct FileManipulator {
    base_dir: PathBuf,
}

impl FileManipulator {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let base_dir = std::fs::canonicalize(&base_dir).unwrap_or_else(|_| normalize(&base_dir));
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Joins `path` onto the base and collapses `.`/`..` without touching the disk.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf, FileError> {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        };

        let resolved = normalize(&joined);
        if !resolved.starts_with(&self.base_dir) {
            return Err(FileError::OutsideBase(path.to_path_buf()));
        }
        Ok(resolved)
    }

    /// [`resolve`](Self::resolve), then the deepest existing ancestor is
    /// canonicalized so a symlink inside the base cannot lead out of it.
    pub async fn confine(&self, path: impl AsRef<Path>) -> Result<PathBuf, FileError> {
        let path = path.as_ref();
        let resolved = self.resolve(path)?;

        let mut existing = resolved.as_path();
        loop {
            match fs::canonicalize(existing).await {
                Ok(real) if real.starts_with(&self.base_dir) => return Ok(resolved),
                Ok(_) => return Err(FileError::OutsideBase(path.to_path_buf())),
                Err(e) if e.kind() == io::ErrorKind::NotFound => match existing.parent() {
                    Some(parent) if parent.starts_with(&self.base_dir) => existing = parent,
                    _ => return Ok(resolved),
                },
                Err(e) => return Err(FileError::from_io(e, path)),
            }
        }
    }

    pub async fn read(&self, path: impl AsRef<Path>) -> Result<String, FileError> {
        let target = self.confine(&path).await?;
        let content = fs::read_to_string(&target)
            .await
            .map_err(|e| FileError::from_io(e, path.as_ref()))?;
        debug!(path = %target.display(), bytes = content.len(), "File read");
        Ok(content)
    }

    /// Replaces the file at `path` atomically, creating parent directories as needed.
    pub async fn write(
        &self,
        path: impl AsRef<Path>,
        content: &str,
    ) -> Result<WriteReceipt, FileError> {
        let path = path.as_ref();
        let target = self.confine(path).await?;
        let (parent, file_name) = match (target.parent(), target.file_name()) {
            (Some(parent), Some(name)) if target != self.base_dir => (parent, name),
            _ => {
                return Err(FileError::Io {
                    path: path.to_path_buf(),
                    source: io::Error::new(io::ErrorKind::InvalidInput, "not a file path"),
                })
            }
        };

        fs::create_dir_all(parent)
            .await
            .map_err(|e| FileError::from_io(e, path))?;

        let temp_path = parent.join(format!(
            ".{}.{}.tmp",
            file_name.to_string_lossy(),
            uuid::Uuid::new_v4().simple()
        ));

        if let Err(e) = write_synced(&temp_path, content.as_bytes(), &target).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(FileError::from_io(e, path));
        }

        debug!(path = %target.display(), bytes = content.len(), "File written");
        Ok(WriteReceipt {
            path: target,
            bytes_written: content.len(),
        })
    }

    /// Entry names sorted lexicographically. Directories carry a trailing `/`.
    pub async fn list(&self, path: impl AsRef<Path>) -> Result<Vec<String>, FileError> {
        let path = path.as_ref();
        let target = self.confine(path).await?;
        let io_err = |e| FileError::from_io(e, path);

        let mut dir = fs::read_dir(&target).await.map_err(io_err)?;
        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(io_err)? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();

        debug!(path = %target.display(), entries = names.len(), "Directory listed");
        Ok(names)
    }
}

async fn write_synced(temp_path: &Path, bytes: &[u8], target: &Path) -> io::Result<()> {
    let mut file = fs::File::create(temp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(temp_path, target).await
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
