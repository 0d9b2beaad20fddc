use std::path::Path;

use anyhow::{Context, Result};
use shapefile::{dbase::{FieldValue, Record}, Reader, Shape};
use tracing::warn;

use crate::{error::DataIssue, feature::{Attributes, Feature}};
use super::rings::shp_to_geo;

/// Render a dBase value as attribute text; `None` for nulls and unsupported kinds.
fn field_text(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Character(Some(s)) => Some(s.trim().to_string()),
        FieldValue::Numeric(Some(n)) => Some(format_number(*n)),
        FieldValue::Float(Some(f)) => Some(format_number(*f as f64)),
        FieldValue::Double(d) => Some(format_number(*d)),
        FieldValue::Integer(i) => Some(i.to_string()),
        FieldValue::Logical(Some(b)) => Some(b.to_string()),
        _ => None,
    }
}

/// Integral values print without a fractional part so ids like `1042.0` read as `1042`.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 { format!("{}", n as i64) } else { n.to_string() }
}

fn record_attributes(record: Record) -> Attributes {
    record.into_iter()
        .filter_map(|(name, value)| field_text(&value).map(|text| (name, text)))
        .filter(|(_, text)| !text.is_empty())
        .collect()
}

/// Read every polygon record of a `.shp` file as a feature keyed by `id_field`.
///
/// Records without a usable id or with non-polygon shapes are reported as
/// issues and skipped.
pub(crate) fn read_features(path: &Path, source: &str, id_field: &str) -> Result<(Vec<Feature>, Vec<DataIssue>)> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open shapefile: {}", path.display()))?;

    let mut features = Vec::with_capacity(reader.shape_count()?);
    let mut issues = Vec::new();
    for (row, result) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = result
            .with_context(|| format!("Error reading shape+record {row} of {}", path.display()))?;
        let mut attributes = record_attributes(record);

        let Some(id) = attributes.remove(id_field) else {
            issues.push(DataIssue {
                source: source.to_string(),
                feature_id: format!("#{row}"),
                reason: format!("missing id field {id_field}"),
            });
            continue;
        };

        let geometry = match shape {
            Shape::Polygon(polygon) => shp_to_geo(&polygon),
            Shape::NullShape => {
                warn!(source, id = %id, "skipping record with null shape");
                continue;
            }
            other => {
                issues.push(DataIssue {
                    source: source.to_string(),
                    feature_id: id,
                    reason: format!("unsupported shape type {:?}", other.shapetype()),
                });
                continue;
            }
        };

        features.push(Feature { id, geometry, attributes });
    }
    Ok((features, issues))
}
