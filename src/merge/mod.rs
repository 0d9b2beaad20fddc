mod overlay;

use std::{collections::BTreeMap, time::Instant};

use anyhow::Result;
use geo::MultiPolygon;
use tracing::{debug, info, warn};

use crate::{
    error::{DataIssue, PipelineError},
    feature::{Attributes, Feature, Layer},
    geom::{explode, repair, union_all},
};

/// Result of a merge: single-part surfaces, each carrying the priority
/// attributes of whichever source won at its location.
#[derive(Debug, Clone, Default)]
pub struct MergedLayer {
    features: Vec<Feature>,
    issues: Vec<DataIssue>,
}

impl MergedLayer {
    #[inline] pub fn len(&self) -> usize { self.features.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.features.is_empty() }

    /// Features excluded from the merge because their geometry was unusable.
    #[inline] pub fn issues(&self) -> &[DataIssue] { &self.issues }

    /// Total covered area in squared CRS units.
    pub fn area(&self) -> f64 { self.features.iter().map(Feature::area).sum() }
}

impl Layer for MergedLayer {
    fn name(&self) -> &str { "merged" }
    fn features(&self) -> &[Feature] { &self.features }
}

/// Folds an ordered list of layers into one, earlier layers winning wherever
/// they overlap later ones, then dissolves by `(id, priority attributes)`.
#[derive(Debug, Clone)]
pub struct LayerMerger {
    priority_attributes: Vec<String>,
}

impl LayerMerger {
    pub fn new(priority_attributes: Vec<String>) -> Self { Self { priority_attributes } }

    #[inline] pub fn priority_attributes(&self) -> &[String] { &self.priority_attributes }

    /// Project a layer down to ids and priority attributes with valid geometry,
    /// then flatten it so no two of its features overlap.
    ///
    /// Unrepairable features are reported and dropped, except on the primary
    /// layer where they abort the merge.
    fn prepare(&self, layer: &dyn Layer, primary: bool, issues: &mut Vec<DataIssue>) -> Result<Vec<Feature>> {
        let mut prepared = Vec::with_capacity(layer.features().len());
        for feature in layer.features() {
            let Some(geometry) = repair(&feature.geometry) else {
                if primary {
                    return Err(PipelineError::Data {
                        source_name: layer.name().to_string(),
                        reason: format!("feature {} has invalid geometry that could not be repaired", feature.id),
                    }.into());
                }
                warn!(source = layer.name(), id = %feature.id, "excluding unrepairable geometry");
                issues.push(DataIssue {
                    source: layer.name().to_string(),
                    feature_id: feature.id.clone(),
                    reason: "invalid geometry could not be repaired".into(),
                });
                continue;
            };
            if geometry != feature.geometry {
                debug!(source = layer.name(), id = %feature.id, "repaired invalid geometry");
            }
            let attributes: Attributes = self.priority_attributes.iter()
                .filter_map(|key| feature.attributes.get_key_value(key))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            prepared.push(Feature { id: feature.id.clone(), geometry, attributes });
        }
        let before = prepared.len();
        let flat = overlay::flatten(prepared);
        if flat.len() < before {
            debug!(source = layer.name(), covered = before - flat.len(), "dropped features covered by earlier ones");
        }
        Ok(flat)
    }

    /// Merge `ordered` (highest priority first) into one layer.
    pub fn merge(&self, ordered: &[&dyn Layer]) -> Result<MergedLayer> {
        let Some((primary, rest)) = ordered.split_first() else {
            return Err(PipelineError::Config("merge requires at least one source".into()).into());
        };

        let mut issues = Vec::new();
        info!("Seeding the unioned geometry with {}", primary.name());
        let mut acc = self.prepare(*primary, true, &mut issues)?;

        for layer in rest {
            let start = Instant::now();
            info!("Adding {} to the union", layer.name());
            let incoming = self.prepare(*layer, false, &mut issues)?;
            acc = overlay::overlay_union(&acc, &incoming, &self.priority_attributes);
            debug!(source = layer.name(), pieces = acc.len(), secs = start.elapsed().as_secs_f64(), "overlay complete");
        }

        info!("Dissolving features by id and {}", self.priority_attributes.join(", "));
        let features = self.dissolve(acc);
        Ok(MergedLayer { features, issues })
    }

    /// Union pieces sharing an identical `(id, priority values)` key, then
    /// split every union back into connected single-part polygons.
    fn dissolve(&self, pieces: Vec<Feature>) -> Vec<Feature> {
        let start = Instant::now();
        let mut groups: BTreeMap<(String, Vec<Option<String>>), Vec<MultiPolygon<f64>>> = BTreeMap::new();
        for piece in pieces {
            let values = self.priority_attributes.iter()
                .map(|key| piece.attributes.get(key).cloned())
                .collect();
            groups.entry((piece.id, values)).or_default().push(piece.geometry);
        }

        let mut features = Vec::new();
        for ((id, values), geometries) in groups {
            let attributes: Attributes = self.priority_attributes.iter().cloned()
                .zip(values)
                .filter_map(|(key, value)| value.map(|v| (key, v)))
                .collect();
            for polygon in explode(union_all(geometries)) {
                features.push(Feature {
                    id: id.clone(),
                    geometry: MultiPolygon(vec![polygon]),
                    attributes: attributes.clone(),
                });
            }
        }
        debug!(features = features.len(), secs = start.elapsed().as_secs_f64(), "dissolve complete");
        features
    }
}
