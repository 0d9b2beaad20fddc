mod snapshot;

use std::collections::BTreeMap;

use geo::{Area, MultiPolygon};

pub use snapshot::Snapshot;

/// Named attribute values of a feature. An absent key is a null value.
pub type Attributes = BTreeMap<String, String>;

/// A single geometric record: stable id, planar (multi)polygon, attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
    pub attributes: Attributes,
}

impl Feature {
    pub fn new(id: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        Self { id: id.into(), geometry, attributes: Attributes::new() }
    }

    /// Builder-style attribute assignment.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Get an attribute value, `None` when null.
    #[inline] pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Planar area in squared CRS units.
    #[inline] pub fn area(&self) -> f64 { self.geometry.unsigned_area() }
}

/// Anything that can be folded into a merge: a named, ordered collection of features.
pub trait Layer {
    fn name(&self) -> &str;
    fn features(&self) -> &[Feature];
}
