//! End-to-end decoding tests: Parquet file -> decoded events.

#![cfg(feature = "arrow-io")]

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use nr_events::parquet_io::{
    read_reco_parquet, read_truth_parquet, tables_to_record_batch, write_reco_parquet,
    write_truth_parquet, META_KEY_SCHEMA_VERSION, META_KEY_TABLES,
};
use nr_events::{decode_reco, decode_truth, ObjectTable, RecoTables, TruthTables};

fn table(data: Vec<f64>, n_events: usize, n_objects: usize, n_features: usize) -> ObjectTable {
    ObjectTable::new(data, n_events, n_objects, n_features).unwrap()
}

/// One event, 2 leptons (charges +1, -1), 3 jets with the only b-tag on jet 0.
fn dilepton_tables() -> RecoTables {
    RecoTables {
        met: table(vec![60.0, 0.0, -0.5], 1, 1, 3),
        neutrinos: table(vec![12.0, 45.0, 0.4, 0.8, -12.0, 38.0, -0.4, -0.8], 1, 2, 4),
        leptons: table(
            vec![
                42.0, 0.3, 1.1, 47.0, 1.0, -11.0, // antiparticle already first
                39.0, -0.6, -1.9, 44.0, -1.0, 11.0,
            ],
            1,
            2,
            6,
        ),
        jets: table(
            vec![
                85.0, 0.2, 1.0, 90.0, 1.0, // the single b-tagged jet, index 0
                72.0, -0.5, -2.0, 78.0, 0.0, //
                65.0, 1.2, 2.8, 70.0, 0.0,
            ],
            1,
            3,
            5,
        ),
        jets_indices: table(vec![0.0, 1.0, -1.0], 1, 3, 1),
    }
}

#[test]
fn test_scenario_single_b_jet_pairing_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dilepton.parquet");
    write_reco_parquet(&dilepton_tables(), &path).unwrap();

    let events = decode_reco(read_reco_parquet(&path).unwrap()).unwrap();

    // Leptons stay ordered [antiparticle, particle].
    assert_eq!(events.leptons.value(0, 0, 4), 1.0);
    assert_eq!(events.leptons.value(0, 1, 4), -1.0);

    // With one b-tagged jet at index 0, the sentinel mechanism assigns both
    // lepton slots to that same jet.
    assert_eq!(events.pairing.antilepton_jet, vec![0]);
    assert_eq!(events.pairing.lepton_jet, vec![0]);

    // And the quality flag is the only defense downstream.
    assert_eq!(events.at_least_two_bjets, vec![false]);
    assert_eq!(events.has_both_bs, vec![true]);
}

#[test]
fn test_truth_round_trip_applies_clips() {
    let tables = TruthTables {
        jet: table(vec![2000.0, 10.0, -20.0, 5.0, 3.0, 1.0], 1, 1, 6),
        lep: table(vec![30.0, -40.0, 2.0, 4.0, -1.0, 11.0], 1, 1, 6),
        met: table(vec![25.0, -35.0, 1200.0], 1, 1, 3),
        misc: table(vec![0.5, 1.5], 1, 1, 2),
        neutrinos: table(vec![15.0, -3.0, -7.0], 1, 1, 3),
        evt_info: table(vec![42.0], 1, 1, 1),
    };

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truth.parquet");
    write_truth_parquet(&tables, "nominal", &path).unwrap();

    let back = read_truth_parquet(&path, "nominal").unwrap();
    assert_eq!(back.misc, tables.misc);
    assert_eq!(back.evt_info, tables.evt_info);

    // A 2 TeV px is clipped to 1 TeV before four-vector construction.
    let events = decode_truth(back).unwrap();
    assert_eq!(events.jet.value(0, 0, 0), 1000.0);
}

#[test]
fn test_missing_truth_group_is_a_hard_failure() {
    let tables = dilepton_tables();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reco.parquet");
    write_reco_parquet(&tables, &path).unwrap();

    // A detector-level file does not carry the requested truth group.
    assert!(read_truth_parquet(&path, "nominal").is_err());
}

#[test]
fn test_reco_reader_falls_back_to_flat_columns() {
    // Build a file whose jets_indices column is a plain Float64 array rather
    // than the structured layout; the reader must recover for that key only.
    let tables = dilepton_tables();
    let named = [
        ("delphes/MET".to_string(), &tables.met),
        ("delphes/neutrinos".to_string(), &tables.neutrinos),
        ("delphes/leptons".to_string(), &tables.leptons),
        ("delphes/jets".to_string(), &tables.jets),
    ];
    let structured = tables_to_record_batch(&named).unwrap();

    let mut fields: Vec<Field> =
        structured.schema().fields().iter().map(|f| f.as_ref().clone()).collect();
    fields.push(Field::new("delphes/jets_indices", DataType::Float64, false));

    let mut arrays: Vec<ArrayRef> = structured.columns().to_vec();
    arrays.push(Arc::new(Float64Array::from(vec![7.0])) as ArrayRef);

    let metadata = structured.schema().metadata().clone();
    assert!(metadata.contains_key(META_KEY_SCHEMA_VERSION));
    assert!(metadata.contains_key(META_KEY_TABLES));
    let schema = Arc::new(Schema::new(fields).with_metadata(metadata));
    let batch = RecordBatch::try_new(schema, arrays).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mixed.parquet");
    let file = std::fs::File::create(&path).unwrap();
    let mut writer = parquet::arrow::ArrowWriter::try_new(file, batch.schema(), None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();

    let back = read_reco_parquet(&path).unwrap();
    assert_eq!(back.jets, tables.jets);
    // Fallback shape: one object, one feature per event.
    assert_eq!(back.jets_indices.n_objects(), 1);
    assert_eq!(back.jets_indices.n_features(), 1);
    assert_eq!(back.jets_indices.value(0, 0, 0), 7.0);
}
