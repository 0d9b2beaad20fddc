use geo::{BooleanOps, MultiPolygon};

use crate::{feature::{Attributes, Feature}, geom::{is_vacant, union_all, SpatialIndex}};

/// Attribute values for an overlay piece: the accumulated side's value where
/// it is present, otherwise the incoming side's.
fn resolve(acc: Option<&Feature>, incoming: Option<&Feature>, keys: &[String], geometry: MultiPolygon<f64>) -> Feature {
    let id = acc.or(incoming).map(|f| f.id.clone()).unwrap_or_default();
    let attributes: Attributes = keys.iter()
        .filter_map(|key| {
            acc.and_then(|f| f.attributes.get(key))
                .or_else(|| incoming.and_then(|f| f.attributes.get(key)))
                .map(|value| (key.clone(), value.clone()))
        })
        .collect();
    Feature { id, geometry, attributes }
}

/// Make the features of one layer mutually exclusive. Each feature keeps only
/// the part not already covered by an earlier feature; fully covered features
/// are dropped.
pub(super) fn flatten(features: Vec<Feature>) -> Vec<Feature> {
    let geoms: Vec<MultiPolygon<f64>> = features.iter().map(|f| f.geometry.clone()).collect();
    let index = SpatialIndex::new(&geoms);

    features.into_iter().enumerate()
        .filter_map(|(k, mut feature)| {
            let earlier: Vec<usize> = index.intersecting(&geoms[k], &geoms).into_iter()
                .filter(|&i| i < k)
                .collect();
            if !earlier.is_empty() {
                feature.geometry = geoms[k].difference(&union_all(earlier.iter().map(|&i| geoms[i].clone())));
            }
            (!is_vacant(&feature.geometry)).then_some(feature)
        })
        .collect()
}

/// Full planar union of two layers.
///
/// Every output piece is one of: an `acc ∩ incoming` intersection, the part
/// of an accumulated feature outside all incoming features, or the part of an
/// incoming feature outside all accumulated features. Zero-area residue is
/// dropped.
pub(super) fn overlay_union(acc: &[Feature], incoming: &[Feature], keys: &[String]) -> Vec<Feature> {
    let acc_geoms: Vec<MultiPolygon<f64>> = acc.iter().map(|f| f.geometry.clone()).collect();
    let inc_geoms: Vec<MultiPolygon<f64>> = incoming.iter().map(|f| f.geometry.clone()).collect();
    let acc_index = SpatialIndex::new(&acc_geoms);
    let inc_index = SpatialIndex::new(&inc_geoms);

    let mut pieces = Vec::with_capacity(acc.len() + incoming.len());

    for a in acc {
        let hits = inc_index.intersecting(&a.geometry, &inc_geoms);
        for &j in &hits {
            let shared = a.geometry.intersection(&inc_geoms[j]);
            if !is_vacant(&shared) {
                pieces.push(resolve(Some(a), Some(&incoming[j]), keys, shared));
            }
        }
        let rest = if hits.is_empty() {
            a.geometry.clone()
        } else {
            a.geometry.difference(&union_all(hits.iter().map(|&j| inc_geoms[j].clone())))
        };
        if !is_vacant(&rest) {
            pieces.push(resolve(Some(a), None, keys, rest));
        }
    }

    for b in incoming {
        let hits = acc_index.intersecting(&b.geometry, &acc_geoms);
        let rest = if hits.is_empty() {
            b.geometry.clone()
        } else {
            b.geometry.difference(&union_all(hits.iter().map(|&i| acc_geoms[i].clone())))
        };
        if !is_vacant(&rest) {
            pieces.push(resolve(None, Some(b), keys, rest));
        }
    }

    pieces
}

#[cfg(test)]
mod tests {
    use geo::{coord, Area, Rect};

    use super::*;

    fn rect(id: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> Feature {
        Feature::new(id, MultiPolygon(vec![Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon()]))
    }

    fn keys() -> Vec<String> { vec!["SURFTYPE".to_string()] }

    #[test]
    fn overlap_takes_accumulated_attributes() {
        let acc = vec![rect("p", 0., 0., 10., 10.).with_attr("SURFTYPE", "Hard")];
        let inc = vec![rect("s", 5., 0., 15., 10.).with_attr("SURFTYPE", "Building")];
        let pieces = overlay_union(&acc, &inc, &keys());

        assert_eq!(pieces.len(), 3);
        let area_of = |id: &str, ty: &str| pieces.iter()
            .filter(|p| p.id == id && p.attr("SURFTYPE") == Some(ty))
            .map(|p| p.area())
            .sum::<f64>();
        assert!((area_of("p", "Hard") - 100.0).abs() < 1e-9);
        assert!((area_of("s", "Building") - 50.0).abs() < 1e-9);
    }

    #[test]
    fn null_accumulated_value_falls_through() {
        let acc = vec![rect("p", 0., 0., 10., 10.)];
        let inc = vec![rect("s", 0., 0., 10., 10.).with_attr("SURFTYPE", "Building")];
        let pieces = overlay_union(&acc, &inc, &keys());

        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].id, "p");
        assert_eq!(pieces[0].attr("SURFTYPE"), Some("Building"));
    }

    #[test]
    fn disjoint_layers_pass_through() {
        let acc = vec![rect("p", 0., 0., 1., 1.).with_attr("SURFTYPE", "Hard")];
        let inc = vec![rect("s", 5., 5., 6., 6.).with_attr("SURFTYPE", "Building")];
        let pieces = overlay_union(&acc, &inc, &keys());
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces.iter().map(|p| p.geometry.unsigned_area()).sum::<f64>(), 2.0);
    }

    #[test]
    fn edge_contact_produces_no_sliver() {
        let acc = vec![rect("p", 0., 0., 1., 1.).with_attr("SURFTYPE", "Hard")];
        let inc = vec![rect("s", 1., 0., 2., 1.).with_attr("SURFTYPE", "Building")];
        let pieces = overlay_union(&acc, &inc, &keys());
        assert_eq!(pieces.len(), 2);
    }

    #[test]
    fn flatten_removes_overlap_within_a_layer() {
        let layer = vec![
            rect("a", 0., 0., 10., 10.),
            rect("b", 0., 0., 10., 10.),
            rect("c", 5., 0., 15., 10.),
            rect("d", 20., 0., 21., 1.),
        ];
        let flat = flatten(layer);

        let ids: Vec<_> = flat.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, ["a", "c", "d"]);
        assert!((flat[1].geometry.unsigned_area() - 50.0).abs() < 1e-9);
        assert!((flat.iter().map(|f| f.geometry.unsigned_area()).sum::<f64>() - 151.0).abs() < 1e-9);
    }

    #[test]
    fn empty_incoming_is_pass_through() {
        let acc = vec![rect("p", 0., 0., 1., 1.).with_attr("SURFTYPE", "Hard")];
        assert_eq!(overlay_union(&acc, &[], &keys()), acc);
    }
}
