//! Simulation-truth decoding: unit clipping and log-squash inversion.

use crate::table::ObjectTable;
use nr_core::{Error, Result};
use nr_kinematics::{FourVecArray, Frame};
use tracing::debug;

/// Momentum-component clip range, GeV. Guards against ill-conditioned
/// detector-simulation outliers.
pub const CLIP_MOMENTUM_GEV: f64 = 1.0e3;

/// Scalar-sum-of-transverse-energy clip ceiling, GeV.
pub const CLIP_SUMET_GEV: f64 = 5.0e3;

/// Raw simulation-truth tables, one group of a truth file.
///
/// Layouts (feature columns):
/// - `jet`: `(px, py, pz, log(E+1), log(M+1), b-tag, ...)`, at least 5 wide.
/// - `lep`: `(px, py, pz, log(E+1), charge, flavour)`, at least 4 wide.
/// - `met`: `(x, y, scalar-sum, ...)`, at least 3 wide.
/// - `neutrinos`: `(px, py, pz, ...)`.
/// - `misc`, `evt_info`: opaque per-event scalars (multiplicity 1).
#[derive(Debug, Clone)]
pub struct TruthTables {
    /// Jet table.
    pub jet: ObjectTable,
    /// Lepton table.
    pub lep: ObjectTable,
    /// Missing-transverse-energy table.
    pub met: ObjectTable,
    /// Miscellaneous per-event scalars.
    pub misc: ObjectTable,
    /// Neutrino truth table.
    pub neutrinos: ObjectTable,
    /// Per-event bookkeeping scalars.
    pub evt_info: ObjectTable,
}

/// Decoded simulation-truth events: physical units, four-vector blocks.
#[derive(Debug, Clone)]
pub struct TruthEvents {
    /// Jets as Cartesian four-vectors `(px, py, pz, E, M, b-tag, ...)`.
    pub jet: FourVecArray,
    /// Leptons as Cartesian four-vectors `(px, py, pz, E, charge, flavour)`.
    pub lep: FourVecArray,
    /// MET columns `(x, y, scalar-sum, ...)`, clipped.
    pub met: ObjectTable,
    /// Miscellaneous per-event scalars, untouched.
    pub misc: ObjectTable,
    /// Neutrino truth as Cartesian four-vectors.
    pub neutrinos: FourVecArray,
    /// Per-event bookkeeping scalars, untouched.
    pub evt_info: ObjectTable,
}

/// Decode one group of a simulation-truth file.
///
/// Clips the momentum components of jets, leptons and neutrinos to
/// ±[`CLIP_MOMENTUM_GEV`], MET x/y likewise and the MET scalar sum to
/// `[0, `[`CLIP_SUMET_GEV`]`]`, then inverts the `log(x+1)` squash on the jet
/// energy/mass columns and the lepton energy column via `exp(x) - 1`.
///
/// Table-layout violations are hard failures; nothing here is recovered.
pub fn decode_truth(tables: TruthTables) -> Result<TruthEvents> {
    let TruthTables { mut jet, mut lep, mut met, misc, mut neutrinos, evt_info } = tables;

    if jet.n_features() < 5 {
        return Err(Error::Validation(format!(
            "truth jet table must be at least 5 features wide (px, py, pz, logE, logM), got {}",
            jet.n_features()
        )));
    }
    if lep.n_features() < 4 {
        return Err(Error::Validation(format!(
            "truth lepton table must be at least 4 features wide (px, py, pz, logE), got {}",
            lep.n_features()
        )));
    }
    if met.n_features() < 3 {
        return Err(Error::Validation(format!(
            "truth met table must be at least 3 features wide (x, y, scalar-sum), got {}",
            met.n_features()
        )));
    }
    if neutrinos.n_features() < 3 {
        return Err(Error::Validation(format!(
            "truth neutrino table must be at least 3 features wide, got {}",
            neutrinos.n_features()
        )));
    }

    // Safety clips: all momentum components below 1 TeV, MET scalar sum below 5 TeV.
    for f in 0..3 {
        jet.clip_feature(f, -CLIP_MOMENTUM_GEV, CLIP_MOMENTUM_GEV);
        lep.clip_feature(f, -CLIP_MOMENTUM_GEV, CLIP_MOMENTUM_GEV);
        neutrinos.clip_feature(f, -CLIP_MOMENTUM_GEV, CLIP_MOMENTUM_GEV);
    }
    met.clip_feature(0, -CLIP_MOMENTUM_GEV, CLIP_MOMENTUM_GEV);
    met.clip_feature(1, -CLIP_MOMENTUM_GEV, CLIP_MOMENTUM_GEV);
    met.clip_feature(2, 0.0, CLIP_SUMET_GEV);

    // Undo the log-squash preprocessing on the magnitude columns.
    jet.map_feature(3, |x| x.exp() - 1.0);
    jet.map_feature(4, |x| x.exp() - 1.0);
    lep.map_feature(3, |x| x.exp() - 1.0);

    debug!(
        n_events = jet.n_events(),
        n_jets = jet.n_objects(),
        n_leptons = lep.n_objects(),
        "decoded simulation-truth group"
    );

    Ok(TruthEvents {
        jet: jet.into_fourvec(Frame::Cartesian)?,
        lep: lep.into_fourvec(Frame::Cartesian)?,
        met,
        misc,
        neutrinos: neutrinos.into_fourvec(Frame::Cartesian)?,
        evt_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn table(rows: &[&[f64]], n_events: usize, n_objects: usize) -> ObjectTable {
        let width = rows[0].len();
        let data: Vec<f64> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        ObjectTable::new(data, n_events, n_objects, width).unwrap()
    }

    fn truth_fixture(jet_px: f64) -> TruthTables {
        TruthTables {
            jet: table(&[&[jet_px, 10.0, -20.0, 5.0, 3.0, 1.0]], 1, 1),
            lep: table(&[&[30.0, -40.0, 2.0, 4.0, -1.0, 11.0]], 1, 1),
            met: table(&[&[25.0, -35.0, 6000.0]], 1, 1),
            misc: table(&[&[0.5]], 1, 1),
            neutrinos: table(&[&[15.0, 2000.0, -7.0]], 1, 1),
            evt_info: table(&[&[42.0]], 1, 1),
        }
    }

    #[test]
    fn test_momentum_clip_before_fourvec_construction() {
        // px of 2000 GeV is clipped to 1000 GeV.
        let events = decode_truth(truth_fixture(2000.0)).unwrap();
        assert_eq!(events.jet.value(0, 0, 0), 1000.0);
        // Neutrino py likewise.
        assert_eq!(events.neutrinos.value(0, 0, 1), 1000.0);
        // MET scalar sum clipped to 5 TeV.
        assert_eq!(events.met.value(0, 0, 2), 5000.0);
    }

    #[test]
    fn test_log_squash_inversion() {
        let events = decode_truth(truth_fixture(100.0)).unwrap();
        assert_relative_eq!(events.jet.value(0, 0, 3), 5.0f64.exp() - 1.0, epsilon = 1e-12);
        assert_relative_eq!(events.jet.value(0, 0, 4), 3.0f64.exp() - 1.0, epsilon = 1e-12);
        assert_relative_eq!(events.lep.value(0, 0, 3), 4.0f64.exp() - 1.0, epsilon = 1e-12);
        // Charge and flavour columns are untouched.
        assert_eq!(events.lep.value(0, 0, 4), -1.0);
        assert_eq!(events.lep.value(0, 0, 5), 11.0);
    }

    #[test]
    fn test_narrow_tables_are_hard_failures() {
        let mut t = truth_fixture(100.0);
        t.lep = table(&[&[30.0, -40.0, 2.0]], 1, 1);
        assert!(decode_truth(t).is_err());
    }
}
