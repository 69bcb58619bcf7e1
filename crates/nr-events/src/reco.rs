//! Detector-level decoding: lepton ordering, frame conversion, pairing, flags.

use crate::table::ObjectTable;
use nr_core::{Error, Result};
use nr_kinematics::{resolve_pairing, FourVecArray, Frame, PairingAssignment};
use tracing::debug;

/// Raw detector-level tables, keyed sub-tables of one reconstruction file.
///
/// Layouts (feature columns, polar):
/// - `met`: `(pt, eta, phi, ...)`.
/// - `neutrinos`: `(pdg-id, pt, eta, phi)` — the leading PDG-ID column is
///   redundant and there is no energy column.
/// - `leptons`: `(pt, eta, phi, E, charge, flavour)` — charge sits at
///   position −2 and drives the slot ordering.
/// - `jets`: `(pt, eta, phi, E/M, b-tag, ...)`.
/// - `jets_indices`: per-jet truth-matching parton indices.
#[derive(Debug, Clone)]
pub struct RecoTables {
    /// Missing-transverse-energy table.
    pub met: ObjectTable,
    /// Neutrino candidate table.
    pub neutrinos: ObjectTable,
    /// Lepton table.
    pub leptons: ObjectTable,
    /// Jet table.
    pub jets: ObjectTable,
    /// Jet-to-parton truth-matching indices.
    pub jets_indices: ObjectTable,
}

/// Decoded detector-level events.
#[derive(Debug, Clone)]
pub struct RecoEvents {
    /// MET as a Cartesian block.
    pub met: FourVecArray,
    /// Neutrino candidates as Cartesian momentum-only blocks (no energy).
    pub neutrinos: FourVecArray,
    /// Leptons as Cartesian four-vectors, slot 0 the antiparticle.
    pub leptons: FourVecArray,
    /// Jets as Cartesian four-vectors with trailing b-tag metadata.
    pub jets: FourVecArray,
    /// Jet-to-parton truth-matching indices, untouched.
    pub jets_indices: ObjectTable,
    /// Lepton/antilepton to jet assignment.
    pub pairing: PairingAssignment,
    /// Whether both a b and a b-bar parton are matched among the jets.
    pub has_both_bs: Vec<bool>,
    /// Whether at least two jets are b-tagged.
    pub at_least_two_bjets: Vec<bool>,
}

/// Column holding the jet b-tag flag (first column after the kinematics).
const JET_BTAG_COL: usize = 4;

/// Decode one detector-level file into physically consistent events.
///
/// Steps, in order:
/// 1. strip the leading PDG-ID column from the neutrino table;
/// 2. reorder the two leptons per event by charge, descending, so slot 0 is
///    the antiparticle and slot 1 the particle;
/// 3. convert every kinematic block polar to Cartesian;
/// 4. resolve the lepton-jet pairing against b-tagged jets;
/// 5. derive the `has_both_bs` and `at_least_two_bjets` quality flags.
///
/// Exactly two leptons per event is a precondition; any other multiplicity
/// is a `Validation` error.
pub fn decode_reco(tables: RecoTables) -> Result<RecoEvents> {
    let RecoTables { met, neutrinos, mut leptons, jets, jets_indices } = tables;

    if neutrinos.n_features() < 4 {
        return Err(Error::Validation(format!(
            "reco neutrino table must carry (pdg-id, pt, eta, phi), got {} features",
            neutrinos.n_features()
        )));
    }
    if leptons.n_objects() != 2 {
        return Err(Error::Validation(format!(
            "reco decoding requires exactly 2 leptons per event, got {}",
            leptons.n_objects()
        )));
    }
    if leptons.n_features() < 5 {
        return Err(Error::Validation(format!(
            "reco lepton table must carry (pt, eta, phi, E, charge, ...), got {} features",
            leptons.n_features()
        )));
    }
    if jets.n_features() <= JET_BTAG_COL {
        return Err(Error::Validation(format!(
            "reco jet table must carry a b-tag column at position {JET_BTAG_COL}, got {} features",
            jets.n_features()
        )));
    }

    // The PDG-ID column is redundant; neutrinos also carry no energy column.
    let neutrinos = neutrinos.drop_leading_features(1)?;

    // Order the lepton pair by charge, descending: antiparticle first.
    let charge_col = leptons.n_features() - 2;
    let n_events = leptons.n_events();
    for e in 0..n_events {
        if leptons.value(e, 0, charge_col) < leptons.value(e, 1, charge_col) {
            for f in 0..leptons.n_features() {
                let a = leptons.value(e, 0, f);
                let b = leptons.value(e, 1, f);
                leptons.set(e, 0, f, b);
                leptons.set(e, 1, f, a);
            }
        }
    }

    let mut met = met.into_fourvec(Frame::Polar)?;
    let mut neutrinos = neutrinos.into_fourvec(Frame::Polar)?;
    let mut leptons = leptons.into_fourvec(Frame::Polar)?;
    let mut jets = jets.into_fourvec(Frame::Polar)?;
    met.to_cartesian()?;
    neutrinos.to_cartesian()?;
    leptons.to_cartesian()?;
    jets.to_cartesian()?;

    let n_jets = jets.n_objects();
    let mut is_b = Vec::with_capacity(n_events * n_jets);
    for e in 0..n_events {
        for j in 0..n_jets {
            is_b.push(jets.value(e, j, JET_BTAG_COL) != 0.0);
        }
    }

    let pairing = resolve_pairing(&leptons, &jets, &is_b)?;

    // Quality flags: parton truth matching and b-tag multiplicity.
    let mut has_both_bs = Vec::with_capacity(n_events);
    let mut at_least_two_bjets = Vec::with_capacity(n_events);
    for e in 0..n_events {
        let mut has_b = false;
        let mut has_bbar = false;
        for o in 0..jets_indices.n_objects() {
            for f in 0..jets_indices.n_features() {
                let v = jets_indices.value(e, o, f);
                has_b |= v == 0.0;
                has_bbar |= v == 1.0;
            }
        }
        has_both_bs.push(has_b && has_bbar);

        let n_tagged = (0..n_jets).filter(|&j| is_b[e * n_jets + j]).count();
        at_least_two_bjets.push(n_tagged >= 2);
    }

    debug!(n_events, n_jets, "decoded detector-level file");

    Ok(RecoEvents {
        met,
        neutrinos,
        leptons,
        jets,
        jets_indices,
        pairing,
        has_both_bs,
        at_least_two_bjets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn table(data: Vec<f64>, n_events: usize, n_objects: usize, n_features: usize) -> ObjectTable {
        ObjectTable::new(data, n_events, n_objects, n_features).unwrap()
    }

    /// One event: 2 leptons (charges -1 then +1), 3 jets (only jet 2 b-tagged,
    /// matched partons 0 and 1 present).
    fn reco_fixture() -> RecoTables {
        RecoTables {
            met: table(vec![55.0, 0.0, 0.4], 1, 1, 3),
            neutrinos: table(
                vec![12.0, 40.0, 0.5, 1.0, -12.0, 35.0, -0.5, -1.0],
                1,
                2,
                4,
            ),
            leptons: table(
                vec![
                    45.0, 0.2, 1.0, 50.0, -1.0, 11.0, // particle first in the raw table
                    38.0, -0.7, -2.0, 48.0, 1.0, -11.0,
                ],
                1,
                2,
                6,
            ),
            jets: table(
                vec![
                    90.0, 0.1, 0.9, 95.0, 0.0, //
                    70.0, -0.8, -2.1, 80.0, 0.0, //
                    60.0, 1.5, 2.5, 75.0, 1.0,
                ],
                1,
                3,
                5,
            ),
            jets_indices: table(vec![0.0, 1.0, -1.0], 1, 3, 1),
        }
    }

    #[test]
    fn test_lepton_charge_reordering() {
        let events = decode_reco(reco_fixture()).unwrap();
        // Slot 0 is the antiparticle (charge +1), slot 1 the particle.
        assert_eq!(events.leptons.value(0, 0, 4), 1.0);
        assert_eq!(events.leptons.value(0, 1, 4), -1.0);
        assert_eq!(events.leptons.value(0, 0, 5), -11.0);
    }

    #[test]
    fn test_neutrino_pdg_strip_and_conversion() {
        let events = decode_reco(reco_fixture()).unwrap();
        assert_eq!(events.neutrinos.width(), 3);
        // First candidate: pt=40, eta=0.5, phi=1.0.
        assert_relative_eq!(events.neutrinos.value(0, 0, 0), 40.0 * 1.0f64.cos(), epsilon = 1e-12);
        assert_relative_eq!(
            events.neutrinos.value(0, 0, 2),
            40.0 * 0.5f64.sinh(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_quality_flags() {
        let events = decode_reco(reco_fixture()).unwrap();
        // Partons 0 and 1 both matched, but only one jet is b-tagged.
        assert_eq!(events.has_both_bs, vec![true]);
        assert_eq!(events.at_least_two_bjets, vec![false]);
    }

    #[test]
    fn test_pairing_uses_only_tagged_jets() {
        let events = decode_reco(reco_fixture()).unwrap();
        // Jet 2 is the only b-tagged jet; the first pick lands on it.
        assert!(
            events.pairing.antilepton_jet[0] == 2 || events.pairing.lepton_jet[0] == 2
        );
    }

    #[test]
    fn test_wrong_lepton_multiplicity_is_rejected() {
        let mut t = reco_fixture();
        t.leptons = table(vec![45.0, 0.2, 1.0, 50.0, -1.0, 11.0], 1, 1, 6);
        assert!(decode_reco(t).is_err());
    }
}
