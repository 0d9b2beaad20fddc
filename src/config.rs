use std::{collections::BTreeSet, fs, path::{Path, PathBuf}, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{error::PipelineError, feature::Feature};

/// Standard priority chain, highest priority first.
pub const DEFAULT_LAYER_ORDER: [&str; 7] = [
    "maintenance_areas",
    "buildings",
    "road_areas",
    "parking_lots",
    "driveways",
    "sidewalk_areas",
    "impervious_misc",
];

fn default_id_field() -> String { "GUID".to_string() }
fn default_priority_attributes() -> Vec<String> { vec!["SURFTYPE".to_string()] }
fn default_key_field() -> String { "COBPIN".to_string() }
fn default_area_unit() -> f64 { 1.0 }
fn default_sources() -> Vec<SourceConfig> { DEFAULT_LAYER_ORDER.iter().map(|name| SourceConfig::new(*name)).collect() }

/// Longest delay accepted between retries.
pub const MAX_RETRY_DELAY_SECS: f64 = 3600.0;

/// Everything one run needs, passed explicitly to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Recompute even when no source changed.
    #[serde(default)]
    pub force: bool,

    /// Attribute holding each surface feature's stable identifier.
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Attributes resolved by source priority and used as the dissolve key.
    #[serde(default = "default_priority_attributes")]
    pub priority_attributes: Vec<String>,

    /// JSON file holding the fingerprint of every source from the last publish.
    pub fingerprint_store: PathBuf,

    /// Who receives the end-of-run summary.
    #[serde(default)]
    pub recipients: Vec<String>,

    pub store: StoreConfig,

    /// Surface sources, highest priority first. Defaults to `DEFAULT_LAYER_ORDER`.
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,

    pub parcels: ParcelConfig,

    /// Output destinations. File sinks are always written before table sinks.
    pub sinks: Vec<SinkConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// `<dir>/<source>.shp`
    Shapefile,
    /// `<dir>/<source>.geojson`
    Geojson,
}

/// Where source layers are read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub dir: PathBuf,

    /// Retry budget for a single layer read.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl StoreConfig {
    /// Configured retry budget, or two retries one second apart.
    pub fn retry_or_default(&self) -> RetryConfig {
        self.retry.unwrap_or(RetryConfig { max_retries: 2, delay_secs: 1.0 })
    }
}

/// One entry of the priority chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default)]
    pub filter: Option<AttributeFilter>,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), filter: None }
    }
}

/// Keep only features whose `field` holds one of `values`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeFilter {
    pub field: String,
    pub values: Vec<String>,
}

impl AttributeFilter {
    #[inline]
    pub fn keep(&self, feature: &Feature) -> bool {
        feature.attr(&self.field).is_some_and(|v| self.values.iter().any(|allowed| allowed == v))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParcelConfig {
    pub name: String,

    /// Business key that enriched parcels are aggregated by.
    #[serde(default = "default_key_field")]
    pub key_field: String,

    /// Reporting unit that areas are rounded to.
    #[serde(default = "default_area_unit")]
    pub area_unit: f64,

    #[serde(default)]
    pub filter: Option<AttributeFilter>,
}

impl ParcelConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), key_field: default_key_field(), area_unit: default_area_unit(), filter: None }
    }

    #[inline] pub fn source(&self) -> SourceConfig {
        SourceConfig { name: self.name.clone(), filter: self.filter.clone() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Shapefile,
    Geojson,
    /// Database table (truncate then bulk insert in one transaction).
    Table,
}

impl SinkKind {
    #[inline] pub fn is_file(&self) -> bool { !matches!(self, Self::Table) }
}

/// A named credential in the secret store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialRef {
    pub service: String,
    pub account: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub delay_secs: f64,
}

impl RetryConfig {
    /// The delay, clamped to `0..=MAX_RETRY_DELAY_SECS`; non-finite values count as zero.
    pub fn delay(&self) -> Duration {
        if !self.delay_secs.is_finite() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.delay_secs.clamp(0.0, MAX_RETRY_DELAY_SECS))
    }

    fn validate(&self, owner: &str) -> std::result::Result<(), String> {
        if !self.delay_secs.is_finite() || !(0.0..=MAX_RETRY_DELAY_SECS).contains(&self.delay_secs) {
            return Err(format!(
                "{owner} retry delay must be between 0 and {MAX_RETRY_DELAY_SECS} seconds, got {}", self.delay_secs,
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub dir: PathBuf,

    /// Destination name for the merged surface layer.
    pub surfaces: String,

    /// Destination name for the enriched parcel layer.
    pub parcels: String,

    /// Fingerprints are only committed once every authoritative sink succeeded.
    #[serde(default)]
    pub authoritative: bool,

    #[serde(default)]
    pub credentials: Option<CredentialRef>,

    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl SinkConfig {
    /// Configured retry budget, or the default for the sink kind:
    /// three retries five seconds apart for tables, none for files.
    pub fn retry_or_default(&self) -> RetryConfig {
        self.retry.unwrap_or(match self.kind {
            SinkKind::Table => RetryConfig { max_retries: 3, delay_secs: 5.0 },
            _ => RetryConfig { max_retries: 0, delay_secs: 0.0 },
        })
    }
}

impl RunConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| PipelineError::Config(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Reject configurations that cannot produce a consistent run.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> { Err(PipelineError::Config(msg).into()) };

        if self.sources.is_empty() {
            return fail("at least one source is required".into());
        }
        let mut seen = BTreeSet::new();
        for name in self.sources.iter().map(|s| &s.name).chain([&self.parcels.name]) {
            if !seen.insert(name) {
                return fail(format!("source {name:?} is configured more than once"));
            }
        }
        if self.priority_attributes.iter().any(|a| a == &self.id_field) {
            return fail(format!("id field {:?} cannot also be a priority attribute", self.id_field));
        }
        if !(self.parcels.area_unit > 0.0) {
            return fail(format!("area_unit must be positive, got {}", self.parcels.area_unit));
        }
        if !self.sinks.iter().any(|s| s.authoritative) {
            return fail("at least one sink must be authoritative".into());
        }
        let retries = self.store.retry.iter().map(|r| (r, "store".to_string()))
            .chain(self.sinks.iter().filter_map(|s| s.retry.as_ref().map(|r| (r, format!("sink {}", s.dir.display())))));
        for (retry, owner) in retries {
            if let Err(msg) = retry.validate(&owner) {
                return fail(msg);
            }
        }
        Ok(())
    }
}
