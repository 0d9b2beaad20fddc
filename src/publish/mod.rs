mod layer;
mod sink;
mod table;

use anyhow::Result;

use crate::{
    config::{SinkConfig, SinkKind},
    error::PipelineError,
    notify::CredentialProvider,
    retry::RetryPolicy,
};

pub use layer::{Field, FieldKind, OutputLayer, OutputRecord, Value};
pub use sink::{FeatureSink, GeoJsonSink, ShapefileSink};
pub use table::{GeoJsonTables, TableClient, TableRow, TableSink, INSERT_BATCH_SIZE};

/// A sink together with where each output goes and how it is retried.
pub struct SinkTarget {
    pub label: String,
    pub sink: Box<dyn FeatureSink>,
    /// File sinks publish before table sinks.
    pub is_file: bool,
    pub surfaces: String,
    pub parcels: String,
    /// The run fails, and nothing is committed, unless every authoritative sink succeeds.
    pub authoritative: bool,
    pub retry: RetryPolicy,
}

impl SinkTarget {
    pub fn new(label: impl Into<String>, sink: Box<dyn FeatureSink>, surfaces: &str, parcels: &str) -> Self {
        Self {
            label: label.into(),
            sink,
            is_file: true,
            surfaces: surfaces.to_string(),
            parcels: parcels.to_string(),
            authoritative: false,
            retry: RetryPolicy::NONE,
        }
    }

    pub fn authoritative(mut self) -> Self { self.authoritative = true; self }

    pub fn table(mut self) -> Self { self.is_file = false; self }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self { self.retry = retry; self }
}

/// Build a sink from its configuration, resolving credentials up front.
/// Unresolvable credentials are a configuration error.
pub fn sink_from_config(config: &SinkConfig, credentials: &dyn CredentialProvider) -> Result<SinkTarget> {
    let resolved = match &config.credentials {
        Some(cref) => Some(credentials.get_credentials(&cref.service, &cref.account).ok_or_else(|| {
            PipelineError::Config(format!("no credentials for {}/{} (sink {})", cref.service, cref.account, config.dir.display()))
        })?),
        None => None,
    };

    let sink: Box<dyn FeatureSink> = match config.kind {
        SinkKind::Shapefile => Box::new(ShapefileSink::new(&config.dir)),
        SinkKind::Geojson => Box::new(GeoJsonSink::new(&config.dir)),
        SinkKind::Table => Box::new(TableSink::new(GeoJsonTables::new(&config.dir, resolved.map(|c| c.username)))),
    };

    let label = format!("{:?} {}", config.kind, config.dir.display()).to_lowercase();
    let mut target = SinkTarget::new(label, sink, &config.surfaces, &config.parcels)
        .with_retry(config.retry_or_default().into());
    target.is_file = config.kind.is_file();
    target.authoritative = config.authoritative;
    Ok(target)
}
