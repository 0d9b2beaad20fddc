use anyhow::{Context, Result};
use geo::{LineString, MultiPolygon};
use serde_json::{json, Map, Value};

use crate::publish::{OutputLayer, Value as FieldValue};

fn ring_coords(ring: &LineString<f64>) -> Value {
    Value::Array(ring.coords().map(|c| json!([c.x, c.y])).collect())
}

/// Standard GeoJSON MultiPolygon geometry object.
fn multipolygon_json(mp: &MultiPolygon<f64>) -> Value {
    let polygons: Vec<Value> = mp.0.iter()
        .map(|polygon| {
            let mut rings = vec![ring_coords(polygon.exterior())];
            rings.extend(polygon.interiors().iter().map(ring_coords));
            Value::Array(rings)
        })
        .collect();
    json!({ "type": "MultiPolygon", "coordinates": polygons })
}

/// Export an output layer as a GeoJSON FeatureCollection value.
pub(crate) fn layer_to_geojson(layer: &OutputLayer) -> Value {
    let features: Vec<Value> = layer.records.iter().map(|record| {
        let properties: Map<String, Value> = layer.fields.iter().zip(&record.values)
            .map(|(field, value)| {
                let value = match value {
                    FieldValue::Text(s) => s.as_ref().map_or(Value::Null, |s| json!(s)),
                    FieldValue::Number(n) => n.map_or(Value::Null, |n| json!(n)),
                };
                (field.name.clone(), value)
            })
            .collect();
        json!({
            "type": "Feature",
            "geometry": multipolygon_json(&record.geometry),
            "properties": properties,
        })
    }).collect();

    json!({
        "type": "FeatureCollection",
        "name": layer.name,
        "features": features,
    })
}

/// Serialize a GeoJSON value to bytes.
pub(crate) fn write_to_geojson_bytes(value: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec(value).context("Failed to serialize GeoJSON to bytes")
}
