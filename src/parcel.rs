use std::{collections::BTreeMap, time::Instant};

use geo::{Area, BooleanOps, Contains, MultiPolygon, Polygon};
use tracing::{debug, info, warn};

use crate::{
    error::DataIssue,
    feature::{Feature, Layer},
    geom::{explode, exterior_only, is_vacant, repair, union_all, SpatialIndex},
    merge::MergedLayer,
};

/// A parcel aggregated by business key, with its impervious/pervious split.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedParcel {
    pub key: String,
    pub geometry: MultiPolygon<f64>,
    pub total_area: f64,
    pub impervious_area: f64,
    pub pervious_area: f64,
}

/// Enriched parcels plus the parcel parts that could not be used.
#[derive(Debug, Clone, Default)]
pub struct ParcelEnrichment {
    pub parcels: Vec<EnrichedParcel>,
    pub issues: Vec<DataIssue>,
}

/// Round `value` to the nearest multiple of `unit`.
#[inline]
fn round_to(value: f64, unit: f64) -> f64 {
    (value / unit).round() * unit
}

#[derive(Debug, Clone)]
pub struct ParcelEnricher {
    key_field: String,
    area_unit: f64,
    /// Source name reported on excluded parcels.
    source: String,
}

impl ParcelEnricher {
    pub fn new(key_field: impl Into<String>, area_unit: f64) -> Self {
        Self { key_field: key_field.into(), area_unit, source: "parcels".into() }
    }

    pub fn with_source(mut self, name: impl Into<String>) -> Self { self.source = name.into(); self }

    /// Remove parcels nested inside another parcel's outer boundary.
    ///
    /// Every parcel is exploded to single parts and reduced to its exterior
    /// ring. Parts that had holes are containers and are always kept; any
    /// other part lying within a container's exterior is a nested duplicate
    /// (a condo box) and is dropped. Output: containers, then surviving parts.
    pub fn cleanse(&self, parcels: &dyn Layer) -> Vec<Feature> {
        let start = Instant::now();
        debug!("Exploding parcel geometries.");
        let mut containers: Vec<(Polygon<f64>, &Feature)> = Vec::new();
        let mut others: Vec<(Polygon<f64>, &Feature)> = Vec::new();
        for feature in parcels.features() {
            for part in explode(feature.geometry.clone()) {
                let is_container = !part.interiors().is_empty();
                let solid = exterior_only(&part);
                if is_container { containers.push((solid, feature)) } else { others.push((solid, feature)) }
            }
        }

        debug!(containers = containers.len(), others = others.len(), "Identifying nested parcels.");
        let footprints: Vec<MultiPolygon<f64>> = containers.iter()
            .map(|(p, _)| MultiPolygon(vec![p.clone()]))
            .collect();
        let index = SpatialIndex::new(&footprints);

        let into_feature = |(polygon, source): (Polygon<f64>, &Feature)| Feature {
            id: source.id.clone(),
            geometry: MultiPolygon(vec![polygon]),
            attributes: source.attributes.clone(),
        };

        let mut nested = 0usize;
        let mut kept: Vec<Feature> = Vec::with_capacity(containers.len() + others.len());
        let survivors: Vec<_> = others.into_iter()
            .filter(|(part, _)| {
                let footprint = MultiPolygon(vec![part.clone()]);
                let inside = index.candidates(&footprint).into_iter()
                    .any(|i| containers[i].0.contains(part));
                nested += inside as usize;
                !inside
            })
            .collect();
        kept.extend(containers.into_iter().map(into_feature));
        kept.extend(survivors.into_iter().map(into_feature));

        info!("Cleansed parcels: kept {}, removed {} nested", kept.len(), nested);
        debug!(secs = start.elapsed().as_secs_f64(), "cleanse complete");
        kept
    }

    /// Attribute surface area to parcels by business key.
    ///
    /// Parts sharing a key are unioned into one parcel; its impervious area is
    /// the total area where surfaces intersect it. Areas are rounded to the
    /// reporting unit, impervious is capped at the total (overlay slivers can
    /// push it past), and pervious is the non-negative remainder.
    pub fn enrich(&self, cleansed: &[Feature], surfaces: &MergedLayer) -> ParcelEnrichment {
        let start = Instant::now();
        let mut issues = Vec::new();
        let mut by_key: BTreeMap<String, Vec<MultiPolygon<f64>>> = BTreeMap::new();
        for parcel in cleansed {
            let Some(key) = parcel.attr(&self.key_field) else {
                warn!(id = %parcel.id, "parcel without {} excluded", self.key_field);
                issues.push(DataIssue {
                    source: self.source.clone(),
                    feature_id: parcel.id.clone(),
                    reason: format!("missing {}", self.key_field),
                });
                continue;
            };
            let Some(geometry) = repair(&parcel.geometry) else {
                warn!(id = %parcel.id, key, "parcel with unrepairable geometry excluded");
                issues.push(DataIssue {
                    source: self.source.clone(),
                    feature_id: parcel.id.clone(),
                    reason: "invalid geometry could not be repaired".into(),
                });
                continue;
            };
            by_key.entry(key.to_string()).or_default().push(geometry);
        }

        debug!("Joining surfaces to cleansed parcels.");
        let surface_geoms: Vec<MultiPolygon<f64>> = surfaces.features().iter()
            .map(|f| f.geometry.clone())
            .collect();
        let index = SpatialIndex::new(&surface_geoms);

        let parcels: Vec<EnrichedParcel> = by_key.into_iter()
            .map(|(key, parts)| {
                let geometry = union_all(parts);
                let impervious: f64 = index.intersecting(&geometry, &surface_geoms).into_iter()
                    .map(|i| surface_geoms[i].intersection(&geometry))
                    .filter(|shared| !is_vacant(shared))
                    .map(|shared| shared.unsigned_area())
                    .sum();

                let total_area = round_to(geometry.unsigned_area(), self.area_unit);
                let impervious_area = round_to(impervious, self.area_unit).min(total_area);
                let pervious_area = (total_area - impervious_area).max(0.0);
                EnrichedParcel { key, geometry, total_area, impervious_area, pervious_area }
            })
            .collect();

        info!("Enriched {} parcels with impervious coverage", parcels.len());
        debug!(secs = start.elapsed().as_secs_f64(), "enrich complete");
        ParcelEnrichment { parcels, issues }
    }
}
