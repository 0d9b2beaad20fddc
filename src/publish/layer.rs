use geo::MultiPolygon;

use crate::{feature::Layer, merge::MergedLayer, parcel::EnrichedParcel};

const ID_WIDTH: u8 = 38;
const TEXT_WIDTH: u8 = 64;
const AREA_WIDTH: u8 = 18;

/// Column type of an output field, sized for dBase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text { width: u8 },
    Number { width: u8, decimals: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

impl Field {
    #[inline] fn text(name: &str, width: u8) -> Self {
        Self { name: name.to_string(), kind: FieldKind::Text { width } }
    }

    #[inline] fn number(name: &str, decimals: u8) -> Self {
        Self { name: name.to_string(), kind: FieldKind::Number { width: AREA_WIDTH, decimals } }
    }
}

/// A single cell. `None` is null.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(Option<String>),
    Number(Option<f64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub geometry: MultiPolygon<f64>,
    pub values: Vec<Value>,
}

/// A flat, typed table of geometry plus values, ready for any sink.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLayer {
    pub name: String,
    pub fields: Vec<Field>,
    pub records: Vec<OutputRecord>,
}

/// Decimal places needed to represent multiples of `unit`.
fn decimals_for(unit: f64) -> u8 {
    if unit >= 1.0 { 0 } else { (-unit.log10() - 1e-9).ceil().clamp(0.0, 8.0) as u8 }
}

impl OutputLayer {
    #[inline] pub fn len(&self) -> usize { self.records.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.records.is_empty() }

    /// Merged surfaces: the id column followed by each priority attribute.
    pub fn surfaces(merged: &MergedLayer, id_field: &str, priority_attributes: &[String]) -> Self {
        let mut fields = vec![Field::text(id_field, ID_WIDTH)];
        fields.extend(priority_attributes.iter().map(|a| Field::text(a, TEXT_WIDTH)));

        let records = merged.features().iter()
            .map(|feature| {
                let mut values = vec![Value::Text(Some(feature.id.clone()))];
                values.extend(priority_attributes.iter()
                    .map(|a| Value::Text(feature.attr(a).map(str::to_string))));
                OutputRecord { geometry: feature.geometry.clone(), values }
            })
            .collect();

        Self { name: "surfaces".into(), fields, records }
    }

    /// Enriched parcels: business key, `IMPERVAREA`, `PERVAREA`.
    pub fn parcels(parcels: &[EnrichedParcel], key_field: &str, area_unit: f64) -> Self {
        let decimals = decimals_for(area_unit);
        let fields = vec![
            Field::text(key_field, TEXT_WIDTH),
            Field::number("IMPERVAREA", decimals),
            Field::number("PERVAREA", decimals),
        ];
        let records = parcels.iter()
            .map(|p| OutputRecord {
                geometry: p.geometry.clone(),
                values: vec![
                    Value::Text(Some(p.key.clone())),
                    Value::Number(Some(p.impervious_area)),
                    Value::Number(Some(p.pervious_area)),
                ],
            })
            .collect();

        Self { name: "parcels".into(), fields, records }
    }
}
