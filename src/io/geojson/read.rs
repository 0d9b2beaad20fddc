use anyhow::{anyhow, bail, Context, Result};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde_json::Value;

use crate::{error::DataIssue, feature::{Attributes, Feature}};

/// Parse a ring from GeoJSON coordinates: [[x, y], [x, y], ...]
fn parse_ring_coords(coords: &Value) -> Result<LineString<f64>> {
    let coords = coords.as_array().ok_or_else(|| anyhow!("ring must be an array"))?;
    let mut points = Vec::with_capacity(coords.len());
    for pair in coords {
        let pair = pair.as_array()
            .filter(|p| p.len() >= 2)
            .ok_or_else(|| anyhow!("Invalid coordinate: expected [x, y]"))?;
        let x = pair[0].as_f64().ok_or_else(|| anyhow!("Invalid coordinate: x must be a number"))?;
        let y = pair[1].as_f64().ok_or_else(|| anyhow!("Invalid coordinate: y must be a number"))?;
        points.push(Coord { x, y });
    }
    // Ensure ring is closed (first point == last point)
    if let (Some(&first), Some(&last)) = (points.first(), points.last()) {
        if first != last {
            points.push(first);
        }
    }
    Ok(LineString(points))
}

/// Parse polygon coordinates: [exterior, hole, hole, ...]
fn parse_polygon_coords(coords: &Value) -> Result<Polygon<f64>> {
    let rings = coords.as_array().ok_or_else(|| anyhow!("polygon must be an array of rings"))?;
    let (exterior, holes) = rings.split_first()
        .ok_or_else(|| anyhow!("Invalid Polygon: missing exterior ring"))?;
    Ok(Polygon::new(
        parse_ring_coords(exterior)?,
        holes.iter().map(parse_ring_coords).collect::<Result<_>>()?,
    ))
}

/// Parse a GeoJSON Polygon or MultiPolygon geometry object.
pub(crate) fn parse_geometry(geometry: &Value) -> Result<MultiPolygon<f64>> {
    let coords = &geometry["coordinates"];
    match geometry["type"].as_str() {
        Some("Polygon") => Ok(MultiPolygon(vec![parse_polygon_coords(coords)?])),
        Some("MultiPolygon") => Ok(MultiPolygon(
            coords.as_array()
                .ok_or_else(|| anyhow!("MultiPolygon coordinates must be an array"))?
                .iter()
                .map(parse_polygon_coords)
                .collect::<Result<_>>()?,
        )),
        Some(other) => bail!("unsupported geometry type {other}"),
        None => bail!("geometry has no type"),
    }
}

/// Scalar JSON properties become attribute text; nulls and nested values are dropped.
fn parse_properties(properties: &Value) -> Attributes {
    properties.as_object()
        .map(|map| map.iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k.clone(), s.clone())),
                Value::Number(n) => Some((k.clone(), n.to_string())),
                Value::Bool(b) => Some((k.clone(), b.to_string())),
                _ => None,
            })
            .collect())
        .unwrap_or_default()
}

/// Read a FeatureCollection into features keyed by the `id_field` property.
pub(crate) fn read_features(bytes: &[u8], source: &str, id_field: &str) -> Result<(Vec<Feature>, Vec<DataIssue>)> {
    let value: Value = serde_json::from_slice(bytes).context("Failed to parse GeoJSON bytes")?;
    let collection = value["features"].as_array()
        .ok_or_else(|| anyhow!("GeoJSON for {source} is not a FeatureCollection"))?;

    let mut features = Vec::with_capacity(collection.len());
    let mut issues = Vec::new();
    for (row, feature) in collection.iter().enumerate() {
        let mut attributes = parse_properties(&feature["properties"]);
        let Some(id) = attributes.remove(id_field) else {
            issues.push(DataIssue {
                source: source.to_string(),
                feature_id: format!("#{row}"),
                reason: format!("missing id field {id_field}"),
            });
            continue;
        };
        match parse_geometry(&feature["geometry"]) {
            Ok(geometry) => features.push(Feature { id, geometry, attributes }),
            Err(e) => issues.push(DataIssue {
                source: source.to_string(),
                feature_id: id,
                reason: format!("{e:#}"),
            }),
        }
    }
    Ok((features, issues))
}
