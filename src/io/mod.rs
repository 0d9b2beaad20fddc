//! Format-specific reading and writing, organized by format rather than domain.
//!
//! - `wkb` - Well-Known Binary, the canonical geometry bytes for fingerprints
//! - `shp` - ESRI shapefile features with dBase attributes
//! - `geojson` - GeoJSON FeatureCollections
//! - `fs` - atomic write helpers shared by the file sinks and stores

pub(crate) mod fs;
pub(crate) mod geojson;
pub(crate) mod shp;
pub(crate) mod wkb;
