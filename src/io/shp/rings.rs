use shapefile as shp;

/// Signed shoelace area over a closed point sequence (negative for clockwise).
fn signed_area(pts: impl Iterator<Item = (f64, f64)> + Clone) -> f64 {
    let next = pts.clone().skip(1);
    pts.zip(next).map(|((x0, y0), (x1, y1))| x0 * y1 - x1 * y0).sum::<f64>() / 2.0
}

/// Convert shapefile::Polygon to geo::MultiPolygon<f64>
pub(crate) fn shp_to_geo(p: &shp::Polygon) -> geo::MultiPolygon<f64> {
    let mut polys: Vec<geo::Polygon<f64>> = Vec::new();
    let mut exterior: Option<geo::LineString<f64>> = None;
    let mut holes: Vec<geo::LineString<f64>> = Vec::new();

    // Shapefile stores each clockwise outer ring followed by its holes.
    for ring in p.rings() {
        let coords: Vec<geo::Coord<f64>> = ring.points().iter()
            .map(|pt| geo::Coord { x: pt.x, y: pt.y })
            .collect();
        let is_exterior = signed_area(coords.iter().map(|c| (c.x, c.y))) < 0.0;
        // LineString closes itself when wrapped into a Polygon.
        let ls = geo::LineString(coords);
        if is_exterior {
            if let Some(ext) = exterior.take() {
                polys.push(geo::Polygon::new(ext, std::mem::take(&mut holes)));
            }
            exterior = Some(ls);
        } else {
            holes.push(ls);
        }
    }
    if let Some(ext) = exterior {
        polys.push(geo::Polygon::new(ext, holes));
    }

    geo::MultiPolygon(polys)
}

/// Convert geo::MultiPolygon<f64> to shapefile::Polygon
pub(crate) fn geo_to_shp(mp: &geo::MultiPolygon<f64>) -> shp::Polygon {
    /// Collect a ring as closed shapefile points, wound clockwise or not.
    fn ring_points(ring: &geo::LineString<f64>, clockwise: bool) -> Vec<shp::Point> {
        let mut pts: Vec<shp::Point> = ring.coords().map(|c| shp::Point { x: c.x, y: c.y }).collect();
        if let (Some(first), Some(last)) = (pts.first().copied(), pts.last().copied()) {
            if first.x != last.x || first.y != last.y {
                pts.push(first);
            }
        }
        let area = signed_area(pts.iter().map(|p| (p.x, p.y)));
        if (clockwise && area > 0.0) || (!clockwise && area < 0.0) {
            pts.reverse();
        }
        pts
    }

    // [ext CW, hole CCW, hole CCW, ..., next ext CW, ...]
    let mut rings: Vec<shp::PolygonRing<shp::Point>> = Vec::new();
    for poly in &mp.0 {
        rings.push(shp::PolygonRing::Outer(ring_points(poly.exterior(), true)));
        for hole in poly.interiors() {
            rings.push(shp::PolygonRing::Inner(ring_points(hole, false)));
        }
    }

    shp::Polygon::with_rings(rings)
}

#[cfg(test)]
mod tests {
    use geo::{polygon, Area};

    use super::*;

    #[test]
    fn holes_survive_conversion_both_ways() {
        let donut = geo::MultiPolygon(vec![polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)],
            interiors: [[(x: 4.0, y: 4.0), (x: 6.0, y: 4.0), (x: 6.0, y: 6.0), (x: 4.0, y: 6.0)]],
        )]);
        let back = shp_to_geo(&geo_to_shp(&donut));
        assert_eq!(back.0.len(), 1);
        assert_eq!(back.0[0].interiors().len(), 1);
        assert!((back.unsigned_area() - 96.0).abs() < 1e-9);
    }

    #[test]
    fn two_outer_rings_make_two_polygons() {
        let pair = geo::MultiPolygon(vec![
            polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)],
            polygon![(x: 5.0, y: 5.0), (x: 6.0, y: 5.0), (x: 6.0, y: 6.0), (x: 5.0, y: 6.0)],
        ]);
        assert_eq!(shp_to_geo(&geo_to_shp(&pair)).0.len(), 2);
    }
}
