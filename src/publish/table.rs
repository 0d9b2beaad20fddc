use std::{path::PathBuf, time::Instant};

use anyhow::{bail, Context, Result};
use geo::MultiPolygon;
use tracing::{debug, info, warn};

use crate::io::{fs::write_atomic, geojson};
use super::{Field, FeatureSink, FieldKind, OutputLayer, OutputRecord, Value};

/// Rows per insert statement.
pub const INSERT_BATCH_SIZE: usize = 1000;

/// One row handed to a table client, numbered from 1 within the load.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub object_id: u64,
    pub geometry: MultiPolygon<f64>,
    pub values: Vec<Value>,
}

/// The narrow slice of a database connection a table sink needs.
/// Everything between `begin` and `commit` is one transaction.
pub trait TableClient: Send {
    fn begin(&mut self, table: &str) -> Result<()>;
    fn truncate(&mut self, table: &str) -> Result<()>;
    fn insert(&mut self, table: &str, columns: &[Field], rows: &[TableRow]) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
}

/// Truncate-then-load publication into a database table.
pub struct TableSink<C> {
    client: C,
    batch_size: usize,
}

impl<C: TableClient> TableSink<C> {
    pub fn new(client: C) -> Self { Self { client, batch_size: INSERT_BATCH_SIZE } }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline] pub fn client(&self) -> &C { &self.client }

    fn load(&mut self, layer: &OutputLayer, table: &str) -> Result<()> {
        self.client.truncate(table).with_context(|| format!("Failed to truncate {table}"))?;
        debug!(table, "truncated");

        for (batch, chunk) in layer.records.chunks(self.batch_size).enumerate() {
            let first = batch * self.batch_size;
            let rows: Vec<TableRow> = chunk.iter().enumerate()
                .map(|(i, record)| TableRow {
                    object_id: (first + i + 1) as u64,
                    geometry: record.geometry.clone(),
                    values: record.values.clone(),
                })
                .collect();
            self.client.insert(table, &layer.fields, &rows)
                .with_context(|| format!("Failed to insert rows {}..{} into {table}", first + 1, first + rows.len()))?;
            debug!(table, batch, rows = rows.len(), "inserted batch");
        }

        self.client.commit().with_context(|| format!("Failed to commit {table}"))
    }
}

impl<C: TableClient> FeatureSink for TableSink<C> {
    fn write(&mut self, layer: &OutputLayer, destination: &str) -> Result<()> {
        let start = Instant::now();
        self.client.begin(destination).with_context(|| format!("Failed to open transaction on {destination}"))?;
        if let Err(err) = self.load(layer, destination) {
            if let Err(rollback) = self.client.rollback() {
                warn!(table = destination, "rollback failed: {rollback:#}");
            }
            return Err(err);
        }
        info!("Loaded {} {} records into {destination}", layer.len(), layer.name);
        debug!(table = destination, secs = start.elapsed().as_secs_f64(), "table load complete");
        Ok(())
    }
}

struct Pending {
    table: String,
    truncated: bool,
    columns: Vec<Field>,
    rows: Vec<TableRow>,
}

/// File-backed tables: each table is `<dir>/<owner>.<table>.geojson`, replaced
/// atomically on commit. Unqualified table names are qualified with the owner.
pub struct GeoJsonTables {
    dir: PathBuf,
    owner: Option<String>,
    pending: Option<Pending>,
}

impl GeoJsonTables {
    pub fn new(dir: impl Into<PathBuf>, owner: Option<String>) -> Self {
        Self { dir: dir.into(), owner, pending: None }
    }

    fn qualify(&self, table: &str) -> String {
        match &self.owner {
            Some(owner) if !table.contains('.') => format!("{owner}.{table}"),
            _ => table.to_string(),
        }
    }

    /// Where `table` lives on disk.
    pub fn path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.geojson", self.qualify(table)))
    }

    fn pending(&mut self, table: &str) -> Result<&mut Pending> {
        let qualified = self.qualify(table);
        match self.pending.as_mut() {
            Some(pending) if pending.table == qualified => Ok(pending),
            Some(pending) => bail!("transaction is open on {}, not {qualified}", pending.table),
            None => bail!("no open transaction on {qualified}"),
        }
    }
}

impl TableClient for GeoJsonTables {
    fn begin(&mut self, table: &str) -> Result<()> {
        if let Some(pending) = &self.pending {
            bail!("transaction already open on {}", pending.table);
        }
        self.pending = Some(Pending { table: self.qualify(table), truncated: false, columns: Vec::new(), rows: Vec::new() });
        Ok(())
    }

    fn truncate(&mut self, table: &str) -> Result<()> {
        let pending = self.pending(table)?;
        pending.truncated = true;
        pending.rows.clear();
        Ok(())
    }

    fn insert(&mut self, table: &str, columns: &[Field], rows: &[TableRow]) -> Result<()> {
        let pending = self.pending(table)?;
        if !pending.truncated {
            bail!("appending to {} without truncating is not supported", pending.table);
        }
        if pending.columns.is_empty() {
            pending.columns = columns.to_vec();
        } else if pending.columns != columns {
            bail!("column set changed within one load of {}", pending.table);
        }
        pending.rows.extend_from_slice(rows);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let Some(pending) = self.pending.take() else { bail!("no open transaction") };

        let mut fields = vec![Field { name: "OBJECTID".into(), kind: FieldKind::Number { width: 10, decimals: 0 } }];
        fields.extend(pending.columns);
        let records = pending.rows.into_iter()
            .map(|row| {
                let mut values = vec![Value::Number(Some(row.object_id as f64))];
                values.extend(row.values);
                OutputRecord { geometry: row.geometry, values }
            })
            .collect();
        let layer = OutputLayer { name: pending.table.clone(), fields, records };

        let path = self.dir.join(format!("{}.geojson", pending.table));
        write_atomic(&path, &geojson::write_to_geojson_bytes(&geojson::layer_to_geojson(&layer))?)
    }

    fn rollback(&mut self) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            debug!(table = %pending.table, rows = pending.rows.len(), "rolled back");
        }
        Ok(())
    }
}
