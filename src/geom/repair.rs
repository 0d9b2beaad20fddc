use geo::{Area, BooleanOps, MultiPolygon, Polygon, Validation};

/// Pieces at or below this area are overlay residue (collapsed slivers,
/// shared edges), not surfaces.
pub(crate) const AREA_EPSILON: f64 = 1e-9;

/// Return a valid copy of `geometry`, or `None` when it cannot be repaired.
///
/// Invalid input is rebuilt with a zero-width self-overlay, which resolves
/// self-intersections and ring orientation the same way a zero-distance
/// buffer does.
pub(crate) fn repair(geometry: &MultiPolygon<f64>) -> Option<MultiPolygon<f64>> {
    if geometry.is_valid() && !is_vacant(geometry) {
        return Some(geometry.clone());
    }
    let rebuilt = geometry.union(&MultiPolygon::new(vec![]));
    (rebuilt.is_valid() && !is_vacant(&rebuilt)).then_some(rebuilt)
}

/// True when the geometry encloses no meaningful area.
#[inline]
pub(crate) fn is_vacant(geometry: &MultiPolygon<f64>) -> bool {
    geometry.unsigned_area() <= AREA_EPSILON
}

/// Split into single-part polygons, dropping degenerate parts.
pub(crate) fn explode(geometry: MultiPolygon<f64>) -> impl Iterator<Item = Polygon<f64>> {
    geometry.0.into_iter().filter(|p| p.unsigned_area() > AREA_EPSILON)
}

/// The polygon bounded by the exterior ring only, holes discarded.
#[inline]
pub(crate) fn exterior_only(polygon: &Polygon<f64>) -> Polygon<f64> {
    Polygon::new(polygon.exterior().clone(), vec![])
}

/// Fold a set of geometries into their union.
pub(crate) fn union_all(geometries: impl IntoIterator<Item = MultiPolygon<f64>>) -> MultiPolygon<f64> {
    geometries.into_iter()
        .reduce(|a, b| a.union(&b))
        .unwrap_or_else(|| MultiPolygon::new(vec![]))
}
