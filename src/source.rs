use std::{collections::HashMap, fs, path::{Path, PathBuf}, time::Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::{
    config::{SourceConfig, StoreConfig, StoreKind},
    error::{DataIssue, PipelineError},
    feature::{Feature, Snapshot},
    io,
    retry::RetryPolicy,
};

/// Raw output of one source read: usable features plus rejected rows.
#[derive(Debug, Default)]
pub struct SourceBatch {
    pub features: Vec<Feature>,
    pub issues: Vec<DataIssue>,
}

/// Read-only access to named source layers. A read must return a complete,
/// consistent snapshot of the layer.
pub trait SourceStore: Send + Sync {
    fn read(&self, name: &str) -> Result<SourceBatch>;

    /// Fail with a configuration error if layer `name` can never be read.
    fn check_available(&self, _name: &str) -> Result<()> { Ok(()) }
}

/// Configuration error unless both the store directory and the layer file exist.
fn require_file(dir: &Path, path: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(PipelineError::Config(format!("source directory not found: {}", dir.display())).into());
    }
    if !path.is_file() {
        return Err(PipelineError::Config(format!("source layer not found: {}", path.display())).into());
    }
    Ok(())
}

/// Shapefile-per-layer directory: `<dir>/<name>.shp`.
pub struct ShapefileStore {
    dir: PathBuf,
    id_field: String,
}

impl ShapefileStore {
    pub fn new(dir: impl Into<PathBuf>, id_field: impl Into<String>) -> Self {
        Self { dir: dir.into(), id_field: id_field.into() }
    }

    #[inline] fn path(&self, name: &str) -> PathBuf { self.dir.join(format!("{name}.shp")) }
}

impl SourceStore for ShapefileStore {
    fn read(&self, name: &str) -> Result<SourceBatch> {
        let (features, issues) = io::shp::read_features(&self.path(name), name, &self.id_field)?;
        Ok(SourceBatch { features, issues })
    }

    fn check_available(&self, name: &str) -> Result<()> { require_file(&self.dir, &self.path(name)) }
}

/// GeoJSON-per-layer directory: `<dir>/<name>.geojson`.
pub struct GeoJsonStore {
    dir: PathBuf,
    id_field: String,
}

impl GeoJsonStore {
    pub fn new(dir: impl Into<PathBuf>, id_field: impl Into<String>) -> Self {
        Self { dir: dir.into(), id_field: id_field.into() }
    }

    #[inline] fn path(&self, name: &str) -> PathBuf { self.dir.join(format!("{name}.geojson")) }
}

impl SourceStore for GeoJsonStore {
    fn check_available(&self, name: &str) -> Result<()> { require_file(&self.dir, &self.path(name)) }

    fn read(&self, name: &str) -> Result<SourceBatch> {
        let path = self.path(name);
        let bytes = fs::read(&path)
            .with_context(|| format!("Failed to read GeoJSON file: {}", path.display()))?;
        let (features, issues) = io::geojson::read_features(&bytes, name, &self.id_field)?;
        Ok(SourceBatch { features, issues })
    }
}

/// Simple in-memory store.
#[derive(Default, Clone)]
pub struct MemStore {
    pub(crate) layers: HashMap<String, Vec<Feature>>,
}

impl MemStore {
    pub fn new() -> Self { Self::default() }

    /// Replace the contents of layer `name`.
    pub fn insert(&mut self, name: &str, features: Vec<Feature>) {
        self.layers.insert(name.to_string(), features);
    }
}

impl SourceStore for MemStore {
    fn read(&self, name: &str) -> Result<SourceBatch> {
        self.check_available(name)?;
        Ok(SourceBatch { features: self.layers[name].clone(), issues: Vec::new() })
    }

    fn check_available(&self, name: &str) -> Result<()> {
        if self.layers.contains_key(name) { Ok(()) }
        else { Err(PipelineError::Config(format!("missing source layer: {name}")).into()) }
    }
}

/// Build the store described by the configuration.
pub fn store_from_config(config: &StoreConfig, id_field: &str) -> Box<dyn SourceStore> {
    match config.kind {
        StoreKind::Shapefile => Box::new(ShapefileStore::new(&config.dir, id_field)),
        StoreKind::Geojson => Box::new(GeoJsonStore::new(&config.dir, id_field)),
    }
}

/// Read, filter, and snapshot one configured source. Failed reads are retried
/// under `retry`; configuration and data errors are not.
pub fn read_snapshot(store: &dyn SourceStore, source: &SourceConfig, retry: &RetryPolicy) -> Result<(Snapshot, Vec<DataIssue>)> {
    let start = Instant::now();
    let (batch, attempts) = retry.run(&format!("read {}", source.name), |_| store.read(&source.name));
    let SourceBatch { mut features, issues } = batch
        .with_context(|| format!("Failed to read source {} after {attempts} attempt(s)", source.name))?;

    if let Some(filter) = &source.filter {
        let before = features.len();
        features.retain(|f| filter.keep(f));
        debug!(source = %source.name, kept = features.len(), dropped = before - features.len(), "applied filter");
    }
    for issue in &issues {
        warn!(%issue, "excluding feature");
    }

    let snapshot = Snapshot::new(&source.name, features)?;
    info!("Extracted {} records from {}", snapshot.len(), source.name);
    debug!(source = %source.name, secs = start.elapsed().as_secs_f64(), "read complete");
    Ok((snapshot, issues))
}
