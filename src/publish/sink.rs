use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

use crate::io::{fs::write_atomic, geojson, shp};
use super::OutputLayer;

/// Somewhere an output layer can be published. A write either fully replaces
/// the destination or leaves it as it was.
pub trait FeatureSink: Send {
    fn write(&mut self, layer: &OutputLayer, destination: &str) -> Result<()>;
}

impl<S: FeatureSink + ?Sized> FeatureSink for Box<S> {
    fn write(&mut self, layer: &OutputLayer, destination: &str) -> Result<()> {
        (**self).write(layer, destination)
    }
}

/// Writes `<dir>/<destination>.shp` (with `.shx` and `.dbf`).
pub struct ShapefileSink {
    dir: PathBuf,
}

impl ShapefileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }
}

impl FeatureSink for ShapefileSink {
    fn write(&mut self, layer: &OutputLayer, destination: &str) -> Result<()> {
        shp::write_layer(&self.dir, destination, layer)?;
        info!("Wrote {} {} records to {}", layer.len(), layer.name, self.dir.join(destination).display());
        Ok(())
    }
}

/// Writes `<dir>/<destination>.geojson`.
pub struct GeoJsonSink {
    dir: PathBuf,
}

impl GeoJsonSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }
}

impl FeatureSink for GeoJsonSink {
    fn write(&mut self, layer: &OutputLayer, destination: &str) -> Result<()> {
        let path = self.dir.join(format!("{destination}.geojson"));
        let bytes = geojson::write_to_geojson_bytes(&geojson::layer_to_geojson(layer))?;
        write_atomic(&path, &bytes)?;
        info!("Wrote {} {} records to {}", layer.len(), layer.name, path.display());
        Ok(())
    }
}
