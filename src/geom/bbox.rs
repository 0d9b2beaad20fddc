use geo::{BoundingRect, MultiPolygon, Rect};
use rstar::{RTreeObject, AABB};

/// An R-tree entry: the envelope of one geometry, tagged with its position in
/// the indexed slice.
#[derive(Debug, Clone)]
pub(crate) struct BoundingBox {
    idx: usize,
    bbox: Rect<f64>,
}

impl BoundingBox {
    /// `None` for empty geometries, which have no envelope.
    pub(crate) fn of(idx: usize, geometry: &MultiPolygon<f64>) -> Option<Self> {
        geometry.bounding_rect().map(|bbox| Self { idx, bbox })
    }

    #[inline] pub(crate) fn idx(&self) -> usize { self.idx }
}

impl RTreeObject for BoundingBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.bbox.min().into(), self.bbox.max().into())
    }
}

/// Envelope of a geometry for querying, or `None` when empty.
pub(crate) fn envelope_of(geometry: &MultiPolygon<f64>) -> Option<AABB<[f64; 2]>> {
    geometry.bounding_rect()
        .map(|rect| AABB::from_corners(rect.min().into(), rect.max().into()))
}
