use geo::{Intersects, MultiPolygon};
use rstar::RTree;

use super::bbox::{envelope_of, BoundingBox};

/// Bounding-box R-tree over a slice of geometries, answering "which of these
/// might touch that" by index.
#[derive(Debug)]
pub(crate) struct SpatialIndex {
    rtree: RTree<BoundingBox>,
}

impl SpatialIndex {
    pub(crate) fn new<'a>(geometries: impl IntoIterator<Item = &'a MultiPolygon<f64>>) -> Self {
        Self {
            rtree: RTree::bulk_load(
                geometries.into_iter().enumerate()
                    .filter_map(|(i, geometry)| BoundingBox::of(i, geometry))
                    .collect()
            ),
        }
    }

    /// Indices whose envelopes intersect the envelope of `geometry`, ascending.
    pub(crate) fn candidates(&self, geometry: &MultiPolygon<f64>) -> Vec<usize> {
        let Some(envelope) = envelope_of(geometry) else { return Vec::new() };
        let mut hits: Vec<usize> = self.rtree
            .locate_in_envelope_intersecting(&envelope)
            .map(|bb| bb.idx())
            .collect();
        hits.sort_unstable();
        hits
    }

    /// Candidates filtered down to those that actually intersect `geometry`.
    pub(crate) fn intersecting(&self, geometry: &MultiPolygon<f64>, indexed: &[MultiPolygon<f64>]) -> Vec<usize> {
        self.candidates(geometry).into_iter()
            .filter(|&i| indexed[i].intersects(geometry))
            .collect()
    }
}
