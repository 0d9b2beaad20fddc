use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::{NamedTempFile, TempDir};

/// Create the directory if it doesn’t exist; error if a non-directory exists there.
pub(crate) fn ensure_dir_exists(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            anyhow::bail!("Path exists but is not a directory: {}", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory {}", path.display()))?;
    }
    Ok(())
}

/// Best-effort fsync of a directory so a rename inside it is durable.
fn sync_dir(dir: &Path) {
    let _ = File::open(dir).and_then(|f| f.sync_all());
}

/// Write-then-rename: readers see either the previous file or the complete new one.
pub(crate) fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let parent = target.parent().unwrap_or(Path::new("."));
    ensure_dir_exists(parent)?;

    let mut tmp = NamedTempFile::new_in(parent).context("create temp file")?;
    tmp.write_all(bytes)
        .with_context(|| format!("write temp file for {}", target.display()))?;
    tmp.as_file().sync_all().ok(); // best-effort fsync file
    tmp.persist(target)
        .with_context(|| format!("rename to {}", target.display()))?;
    sync_dir(parent);
    Ok(())
}

/// A scratch directory beside the final outputs, for multi-file formats that
/// must appear all at once.
pub(crate) struct StagedFiles {
    dir: TempDir,
    target_dir: PathBuf,
}

impl StagedFiles {
    pub(crate) fn new(target_dir: &Path) -> Result<Self> {
        ensure_dir_exists(target_dir)?;
        let dir = tempfile::Builder::new()
            .prefix(".staging")
            .tempdir_in(target_dir)
            .with_context(|| format!("create staging dir in {}", target_dir.display()))?;
        Ok(Self { dir, target_dir: target_dir.to_path_buf() })
    }

    /// Path where a file named `name` should be written before `commit`.
    pub(crate) fn path(&self, name: &str) -> PathBuf { self.dir.path().join(name) }

    /// Move every staged file over its counterpart in the target directory.
    /// The staging directory is removed when `self` drops.
    pub(crate) fn commit(self) -> Result<()> {
        for entry in fs::read_dir(self.dir.path())? {
            let entry = entry?;
            let target = self.target_dir.join(entry.file_name());
            fs::rename(entry.path(), &target)
                .with_context(|| format!("rename to {}", target.display()))?;
        }
        sync_dir(&self.target_dir);
        Ok(())
    }
}
