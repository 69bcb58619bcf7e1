//! # nr-events
//!
//! Detector-level event tables and the decoding pipeline for NuRecon.
//!
//! This crate provides:
//! - A dense [`ObjectTable`] (events x objects x features) raw-array form.
//! - The simulation-truth decoder (unit clipping + log-squash inversion).
//! - The detector-level decoder (charge ordering, polar to Cartesian
//!   conversion, lepton-jet pairing, event quality flags).
//! - Parquet/Arrow readers and writers for both table layouts (feature
//!   `arrow-io`).

#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(feature = "arrow-io")]
pub mod parquet_io;
pub mod reco;
pub mod table;
pub mod truth;

pub use reco::{decode_reco, RecoEvents, RecoTables};
pub use table::ObjectTable;
pub use truth::{decode_truth, TruthEvents, TruthTables, CLIP_MOMENTUM_GEV, CLIP_SUMET_GEV};
