use std::path::Path;

use anyhow::{anyhow, Context, Result};
use shapefile::{dbase::{FieldName, FieldValue, Record, TableWriterBuilder}, Writer};

use crate::{io::fs::StagedFiles, publish::{FieldKind, OutputLayer, Value}};
use super::rings::geo_to_shp;

fn table_builder(layer: &OutputLayer) -> Result<TableWriterBuilder> {
    let mut builder = TableWriterBuilder::new();
    for field in &layer.fields {
        let name = FieldName::try_from(field.name.as_str())
            .map_err(|e| anyhow!("invalid dBase field name {:?}: {e:?}", field.name))?;
        builder = match field.kind {
            FieldKind::Text { width } => builder.add_character_field(name, width),
            FieldKind::Number { width, decimals } => builder.add_numeric_field(name, width, decimals),
        };
    }
    Ok(builder)
}

/// Write `layer` as `<dir>/<stem>.shp` (+ `.shx`, `.dbf`), replacing any
/// previous files only once all of them are complete.
pub(crate) fn write_layer(dir: &Path, stem: &str, layer: &OutputLayer) -> Result<()> {
    let staged = StagedFiles::new(dir)?;
    let shp_path = staged.path(&format!("{stem}.shp"));

    {
        let mut writer = Writer::from_path(&shp_path, table_builder(layer)?)
            .with_context(|| format!("Failed to create shapefile: {}", shp_path.display()))?;

        for (i, rec) in layer.records.iter().enumerate() {
            let mut record = Record::default();
            for (field, value) in layer.fields.iter().zip(&rec.values) {
                let value = match value {
                    Value::Text(s) => FieldValue::Character(s.clone()),
                    Value::Number(n) => FieldValue::Numeric(*n),
                };
                record.insert(field.name.clone(), value);
            }
            writer.write_shape_and_record(&geo_to_shp(&rec.geometry), &record)
                .with_context(|| format!("Error writing record {i} of {}", layer.name))?;
        }
    } // writer flushes headers on drop

    staged.commit()
}
