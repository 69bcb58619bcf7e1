//! Parquet / Arrow event-table I/O.
//!
//! Defines the **event table schema v1** and provides read/write functions
//! bridging Arrow [`RecordBatch`] columns and [`ObjectTable`] blocks.
//!
//! # Schema: `nurecon_event_tables_v1`
//!
//! ## Columns
//!
//! | Column              | Arrow Type                      | Description                    |
//! |---------------------|---------------------------------|--------------------------------|
//! | `<group>/<table>`   | `FixedSizeList<Float64>`        | One row per event, flattened `objects x features` |
//!
//! Simulation-truth files carry one group prefix per truth group (e.g.
//! `nominal/jet`); detector-level files use the fixed `delphes/` prefix.
//!
//! ## Parquet key-value metadata
//!
//! | Key                        | Value                                               |
//! |----------------------------|-----------------------------------------------------|
//! | `nurecon.schema_version`   | `"nurecon_event_tables_v1"`                         |
//! | `nurecon.tables`           | JSON map: `{"<column>": {"objects": J, "features": F}}` |
//!
//! The simulation-truth reader treats a missing table as a hard error. The
//! detector-level reader recovers per key: a column that is not in the
//! structured `FixedSizeList` layout is read back as a flat `Float64` column
//! with one object and one feature per event.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, FixedSizeListArray, Float64Array};
use arrow::datatypes::{DataType, Field, Float64Type, Schema};
use arrow::record_batch::RecordBatch;

use crate::reco::RecoTables;
use crate::table::ObjectTable;
use crate::truth::TruthTables;
use nr_core::{Error, Result};

/// Schema version string embedded in Parquet key-value metadata.
pub const EVENT_TABLES_SCHEMA_V1: &str = "nurecon_event_tables_v1";

/// Parquet metadata key for the schema version.
pub const META_KEY_SCHEMA_VERSION: &str = "nurecon.schema_version";

/// Parquet metadata key for per-table shapes (JSON).
pub const META_KEY_TABLES: &str = "nurecon.tables";

/// Group prefix of detector-level files.
pub const RECO_GROUP: &str = "delphes";

/// JSON-serializable per-table shape stored in Parquet metadata.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TableMeta {
    /// Object multiplicity per event.
    pub objects: usize,
    /// Feature width per object.
    pub features: usize,
}

// ---------------------------------------------------------------------------
// Write: ObjectTables -> Arrow RecordBatch -> Parquet
// ---------------------------------------------------------------------------

/// Build an Arrow [`RecordBatch`] from named [`ObjectTable`]s.
///
/// All tables must share the event count. Shapes are embedded in the schema
/// metadata under [`META_KEY_TABLES`].
pub fn tables_to_record_batch(tables: &[(String, &ObjectTable)]) -> Result<RecordBatch> {
    if tables.is_empty() {
        return Err(Error::Validation("tables_to_record_batch requires at least one table".into()));
    }

    let n_events = tables[0].1.n_events();
    let mut meta: BTreeMap<String, TableMeta> = BTreeMap::new();
    let mut fields = Vec::with_capacity(tables.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(tables.len());

    for (name, table) in tables {
        if table.n_events() != n_events {
            return Err(Error::Validation(format!(
                "event count mismatch for table '{name}': expected {n_events}, got {}",
                table.n_events()
            )));
        }
        let row_len = table.n_objects() * table.n_features();
        if row_len == 0 {
            return Err(Error::Validation(format!("table '{name}' has zero-width rows")));
        }

        let item = Arc::new(Field::new("item", DataType::Float64, false));
        let values = Float64Array::from(table.data().to_vec());
        let list =
            FixedSizeListArray::try_new(item.clone(), row_len as i32, Arc::new(values), None)
                .map_err(|e| {
                    Error::Validation(format!("failed to build column '{name}': {e}"))
                })?;

        fields.push(Field::new(
            name,
            DataType::FixedSizeList(item, row_len as i32),
            false,
        ));
        arrays.push(Arc::new(list) as ArrayRef);
        meta.insert(
            name.clone(),
            TableMeta { objects: table.n_objects(), features: table.n_features() },
        );
    }

    let meta_json = serde_json::to_string(&meta)?;
    let metadata = std::collections::HashMap::from([
        (META_KEY_SCHEMA_VERSION.to_string(), EVENT_TABLES_SCHEMA_V1.to_string()),
        (META_KEY_TABLES.to_string(), meta_json),
    ]);
    let schema = Arc::new(Schema::new(fields).with_metadata(metadata));

    RecordBatch::try_new(schema, arrays)
        .map_err(|e| Error::Validation(format!("failed to build RecordBatch: {e}")))
}

/// Write named [`ObjectTable`]s to a Parquet file.
pub fn write_tables_parquet(tables: &[(String, &ObjectTable)], path: &Path) -> Result<()> {
    let batch = tables_to_record_batch(tables)?;
    let file = File::create(path)
        .map_err(|e| Error::Validation(format!("failed to create {}: {e}", path.display())))?;

    let props = parquet::file::properties::WriterProperties::builder()
        .set_compression(parquet::basic::Compression::SNAPPY)
        .build();

    let mut writer = parquet::arrow::ArrowWriter::try_new(file, batch.schema(), Some(props))
        .map_err(|e| Error::Validation(format!("failed to create Parquet writer: {e}")))?;
    writer.write(&batch).map_err(|e| Error::Validation(format!("failed to write Parquet: {e}")))?;
    writer
        .close()
        .map_err(|e| Error::Validation(format!("failed to close Parquet writer: {e}")))?;
    Ok(())
}

/// Write one simulation-truth group to a Parquet file.
pub fn write_truth_parquet(tables: &TruthTables, group: &str, path: &Path) -> Result<()> {
    let named = [
        (format!("{group}/jet"), &tables.jet),
        (format!("{group}/lep"), &tables.lep),
        (format!("{group}/met"), &tables.met),
        (format!("{group}/misc"), &tables.misc),
        (format!("{group}/neutrinos"), &tables.neutrinos),
        (format!("{group}/evt_info"), &tables.evt_info),
    ];
    write_tables_parquet(&named, path)
}

/// Write detector-level tables to a Parquet file under the `delphes/` prefix.
pub fn write_reco_parquet(tables: &RecoTables, path: &Path) -> Result<()> {
    let named = [
        (format!("{RECO_GROUP}/MET"), &tables.met),
        (format!("{RECO_GROUP}/neutrinos"), &tables.neutrinos),
        (format!("{RECO_GROUP}/leptons"), &tables.leptons),
        (format!("{RECO_GROUP}/jets"), &tables.jets),
        (format!("{RECO_GROUP}/jets_indices"), &tables.jets_indices),
    ];
    write_tables_parquet(&named, path)
}

// ---------------------------------------------------------------------------
// Read: Parquet -> Arrow RecordBatch -> ObjectTables
// ---------------------------------------------------------------------------

fn read_batch(path: &Path) -> Result<RecordBatch> {
    let file = File::open(path)
        .map_err(|e| Error::Validation(format!("failed to open {}: {e}", path.display())))?;
    let reader = parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| Error::Validation(format!("failed to read Parquet metadata: {e}")))?
        .build()
        .map_err(|e| Error::Validation(format!("failed to build Parquet reader: {e}")))?;

    let batches: Vec<RecordBatch> = reader
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Validation(format!("failed to decode Parquet batches: {e}")))?;
    if batches.is_empty() {
        return Err(Error::Validation(format!("{} contains no row groups", path.display())));
    }

    arrow::compute::concat_batches(&batches[0].schema(), &batches)
        .map_err(|e| Error::Validation(format!("failed to concat batches: {e}")))
}

fn table_shapes(schema: &Schema) -> Result<BTreeMap<String, TableMeta>> {
    let Some(json) = schema.metadata().get(META_KEY_TABLES) else {
        return Err(Error::Validation(format!("missing {META_KEY_TABLES} metadata")));
    };
    let meta: BTreeMap<String, TableMeta> = serde_json::from_str(json)
        .map_err(|e| Error::Validation(format!("invalid {META_KEY_TABLES} metadata: {e}")))?;
    Ok(meta)
}

/// Decode one structured `FixedSizeList<Float64>` column into an [`ObjectTable`].
fn structured_column(
    batch: &RecordBatch,
    shapes: &BTreeMap<String, TableMeta>,
    name: &str,
) -> Result<ObjectTable> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|_| Error::Validation(format!("missing table column '{name}'")))?;
    let arr = batch.column(idx);

    let list = arr.as_fixed_size_list_opt().ok_or_else(|| {
        Error::Validation(format!(
            "column '{name}' has type {:?}, expected FixedSizeList<Float64>",
            arr.data_type()
        ))
    })?;
    let row_len = list.value_length() as usize;

    let shape = shapes.get(name).ok_or_else(|| {
        Error::Validation(format!("no shape metadata recorded for table '{name}'"))
    })?;
    if shape.objects * shape.features != row_len {
        return Err(Error::Validation(format!(
            "shape metadata for '{name}' ({} x {}) does not match row length {row_len}",
            shape.objects, shape.features
        )));
    }

    let n_events = list.len();
    let mut data = Vec::with_capacity(n_events * row_len);
    for i in 0..n_events {
        let row = list.value(i);
        let row = row.as_primitive_opt::<Float64Type>().ok_or_else(|| {
            Error::Validation(format!("column '{name}' items are not Float64"))
        })?;
        data.extend_from_slice(row.values());
    }

    ObjectTable::new(data, n_events, shape.objects, shape.features)
}

/// Decode a column as a flat `Float64` array: one object, one feature per event.
fn flat_column(batch: &RecordBatch, name: &str) -> Result<ObjectTable> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|_| Error::Validation(format!("missing table column '{name}'")))?;
    let arr = batch.column(idx);
    let vals = arr.as_primitive_opt::<Float64Type>().ok_or_else(|| {
        Error::Validation(format!(
            "column '{name}' has type {:?}, expected Float64",
            arr.data_type()
        ))
    })?;
    ObjectTable::new(vals.values().to_vec(), vals.len(), 1, 1)
}

/// Read one simulation-truth group from a Parquet file.
///
/// Every required table (`jet`, `lep`, `met`, `misc`, `neutrinos`,
/// `evt_info`) must be present in the structured layout; a missing or
/// malformed table is a hard failure.
pub fn read_truth_parquet(path: &Path, group: &str) -> Result<TruthTables> {
    let batch = read_batch(path)?;
    let shapes = table_shapes(&batch.schema())?;

    Ok(TruthTables {
        jet: structured_column(&batch, &shapes, &format!("{group}/jet"))?,
        lep: structured_column(&batch, &shapes, &format!("{group}/lep"))?,
        met: structured_column(&batch, &shapes, &format!("{group}/met"))?,
        misc: structured_column(&batch, &shapes, &format!("{group}/misc"))?,
        neutrinos: structured_column(&batch, &shapes, &format!("{group}/neutrinos"))?,
        evt_info: structured_column(&batch, &shapes, &format!("{group}/evt_info"))?,
    })
}

/// Read detector-level tables from a Parquet file.
///
/// Recovers per key: a column that fails the structured decode is read back
/// as a flat `Float64` array with one object and one feature per event. Only
/// a completely missing column is an error.
pub fn read_reco_parquet(path: &Path) -> Result<RecoTables> {
    let batch = read_batch(path)?;
    let shapes = table_shapes(&batch.schema()).unwrap_or_default();

    let read_key = |name: &str| -> Result<ObjectTable> {
        match structured_column(&batch, &shapes, name) {
            Ok(t) => Ok(t),
            Err(_) => {
                tracing::debug!(column = name, "structured decode failed, falling back to flat");
                flat_column(&batch, name)
            }
        }
    };

    Ok(RecoTables {
        met: read_key(&format!("{RECO_GROUP}/MET"))?,
        neutrinos: read_key(&format!("{RECO_GROUP}/neutrinos"))?,
        leptons: read_key(&format!("{RECO_GROUP}/leptons"))?,
        jets: read_key(&format!("{RECO_GROUP}/jets"))?,
        jets_indices: read_key(&format!("{RECO_GROUP}/jets_indices"))?,
    })
}
