use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::StorageError;
use crate::model::AttachmentItem;

/// Writes rendered Markdown under the output directory.
pub struct OutputStorage {
    overwrite: bool,
}

impl OutputStorage {
    pub fn new(overwrite: bool) -> Self {
        Self { overwrite }
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Writes `content` as UTF-8, creating parent directories as needed.
    ///
    /// Without overwrite the file is created exclusively, so an output that
    /// appeared since the dedup pass yields [`StorageError::FileExists`].
    pub fn write_markdown(&self, path: &Path, content: &str) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        if self.overwrite {
            return std::fs::write(path, content).map_err(|e| StorageError::WriteFile {
                path: path.to_path_buf(),
                source: e,
            });
        }

        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::FileExists(path.to_path_buf()));
            }
            Err(e) => {
                return Err(StorageError::WriteFile {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        file.write_all(content.as_bytes())
            .map_err(|e| StorageError::WriteFile {
                path: path.to_path_buf(),
                source: e,
            })
    }
}

/// Private directory for downloaded attachments, removed on drop.
pub struct ScratchSpace {
    dir: TempDir,
}

impl ScratchSpace {
    pub fn new() -> Result<Self, StorageError> {
        let dir = tempfile::Builder::new()
            .prefix("files2md-")
            .tempdir()
            .map_err(StorageError::Scratch)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Scratch location for an attachment: `<dir>/<index>-<key><ext>`.
///
/// The run index keeps names unique when a key repeats. The extension is
/// kept so converters can detect the format.
pub fn scratch_path(dir: &Path, index: usize, item: &AttachmentItem) -> PathBuf {
    let extension = item.file_extension().unwrap_or_default();
    dir.join(format!("{}-{}{}", index, item.key, extension))
}
