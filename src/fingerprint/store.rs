use std::{collections::{BTreeMap, HashMap}, fs, path::PathBuf};

use anyhow::{Context, Result};

use crate::{error::PipelineError, io::fs::write_atomic};
use super::Fingerprint;

/// Persistent mapping from source name to the fingerprint last published.
pub trait FingerprintStore: Send {
    fn get(&self, name: &str) -> Result<Option<Fingerprint>>;
    fn put(&mut self, name: &str, fingerprint: &Fingerprint) -> Result<()>;
}

impl<S: FingerprintStore + ?Sized> FingerprintStore for Box<S> {
    fn get(&self, name: &str) -> Result<Option<Fingerprint>> { (**self).get(name) }
    fn put(&mut self, name: &str, fingerprint: &Fingerprint) -> Result<()> { (**self).put(name, fingerprint) }
}

/// JSON object of `{ source name: hex digest }` on disk.
///
/// Each `put` rewrites the whole file through a temp-file rename, so an
/// interrupted write leaves every entry as it was.
pub struct FileFingerprintStore {
    path: PathBuf,
}

impl FileFingerprintStore {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = fs::read(&self.path)
            .with_context(|| format!("Failed to read fingerprint store {}", self.path.display()))?;
        serde_json::from_slice(&bytes).map_err(|e| anyhow::Error::from(PipelineError::Invariant(
            format!("fingerprint store {} is corrupted: {e}", self.path.display())
        )))
    }
}

impl FingerprintStore for FileFingerprintStore {
    fn get(&self, name: &str) -> Result<Option<Fingerprint>> {
        self.load()?
            .get(name)
            .map(|hex| Fingerprint::from_hex(hex).map_err(|e| anyhow::Error::from(PipelineError::Invariant(
                format!("fingerprint for {name} in {} is corrupted: {e}", self.path.display())
            ))))
            .transpose()
    }

    fn put(&mut self, name: &str, fingerprint: &Fingerprint) -> Result<()> {
        let mut entries = self.load()?;
        entries.insert(name.to_string(), fingerprint.to_hex());
        let bytes = serde_json::to_vec_pretty(&entries)?;
        write_atomic(&self.path, &bytes)
    }
}

/// Simple in-memory store.
#[derive(Default, Clone, Debug)]
pub struct MemFingerprintStore {
    pub(crate) entries: HashMap<String, Fingerprint>,
}

impl MemFingerprintStore {
    pub fn new() -> Self { Self::default() }
}

impl FingerprintStore for MemFingerprintStore {
    fn get(&self, name: &str) -> Result<Option<Fingerprint>> {
        Ok(self.entries.get(name).copied())
    }

    fn put(&mut self, name: &str, fingerprint: &Fingerprint) -> Result<()> {
        self.entries.insert(name.to_string(), *fingerprint);
        Ok(())
    }
}
