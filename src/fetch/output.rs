use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::Result;

/// An output file that is removed unless explicitly committed.
///
/// Dropping it (including when the owning future is cancelled) deletes
/// whatever was written so far.
pub struct PartialOutput {
    path: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl PartialOutput {
    /// Create `path`, and its parent directories if needed.
    pub async fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        let file = File::create(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            committed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_mut(&mut self) -> &mut File {
        self.file
            .as_mut()
            .expect("output file is present until commit or discard")
    }

    /// Flush and keep the file.
    pub async fn commit(mut self) -> Result<PathBuf> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        self.committed = true;
        Ok(self.path.clone())
    }

    /// Close and delete the file now.
    pub async fn discard(mut self) {
        self.file.take();
        if let Err(e) = fs::remove_file(&self.path).await {
            debug!(path = %self.path.display(), error = %e, "could not remove partial output");
        }
        self.committed = true;
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
