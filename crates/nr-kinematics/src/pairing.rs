//! Lepton-jet pairing via iterated nearest-neighbour matching in ΔR.

use crate::fourvec::FourVecArray;
use nr_core::{Error, Result};

/// Distance assigned to non-b-tagged jets and to blanked rows/columns.
///
/// Effectively infinite on the ΔR scale; an argmin over an all-sentinel
/// matrix still yields the first index.
pub const SENTINEL_DR: f64 = 99_999.0;

/// One jet index per event for each lepton slot.
///
/// Slot 0 of the lepton axis is the antiparticle, slot 1 the particle
/// (charge-descending ordering performed by the decoder upstream).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingAssignment {
    /// Jet index matched to the particle lepton (slot 1), per event.
    pub lepton_jet: Vec<usize>,
    /// Jet index matched to the antiparticle lepton (slot 0), per event.
    pub antilepton_jet: Vec<usize>,
}

/// First strict minimum of a row-major `(n_jets, n_leptons)` matrix.
///
/// Ties keep the earliest entry, so the smallest jet index wins, then the
/// smallest lepton index.
fn argmin_matrix(m: &[f64], n_leptons: usize) -> (usize, usize) {
    let mut best = 0usize;
    for (i, &v) in m.iter().enumerate() {
        if v < m[best] {
            best = i;
        }
    }
    (best / n_leptons, best % n_leptons)
}

/// Match each lepton to its nearest b-tagged jet, without reusing a jet.
///
/// Per event, the full `(jets x leptons)` ΔR matrix is formed, non-b-tagged
/// jets are pushed to [`SENTINEL_DR`], and two global minima are extracted:
/// after the first pick, that jet's row and that lepton's column are blanked
/// to the sentinel so neither can be selected again. The pick whose lepton
/// index is slot 0 becomes the antilepton pairing.
///
/// The resolver never fails and never signals invalidity: with fewer than two
/// b-tagged jets the assignment is still produced (the second pick degrades
/// to the first all-sentinel entry) and downstream quality flags are the only
/// defense against using it.
///
/// `is_b` is a flat row-major `(n_events, n_jets)` b-tag mask.
pub fn resolve_pairing(
    leptons: &FourVecArray,
    jets: &FourVecArray,
    is_b: &[bool],
) -> Result<PairingAssignment> {
    let n_events = leptons.n_events();
    let n_leptons = leptons.n_objects();
    let n_jets = jets.n_objects();

    if jets.n_events() != n_events {
        return Err(Error::Validation(format!(
            "resolve_pairing: lepton block has {n_events} events, jet block has {}",
            jets.n_events()
        )));
    }
    if n_leptons == 0 || n_jets == 0 {
        return Err(Error::Validation(format!(
            "resolve_pairing: need at least one lepton and one jet per event, got {n_leptons} leptons x {n_jets} jets"
        )));
    }
    if is_b.len() != n_events * n_jets {
        return Err(Error::Validation(format!(
            "resolve_pairing: b-tag mask length mismatch: expected {}, got {}",
            n_events * n_jets,
            is_b.len()
        )));
    }

    let mut lepton_jet = Vec::with_capacity(n_events);
    let mut antilepton_jet = Vec::with_capacity(n_events);
    let mut dr = vec![0.0f64; n_jets * n_leptons];

    for e in 0..n_events {
        for j in 0..n_jets {
            let tagged = is_b[e * n_jets + j];
            for l in 0..n_leptons {
                dr[j * n_leptons + l] = if tagged {
                    leptons.del_r_to(jets, e, l, j)
                } else {
                    SENTINEL_DR
                };
            }
        }

        // Most confident pairing first.
        let (j1, l1) = argmin_matrix(&dr, n_leptons);

        // Blank the chosen jet and lepton so neither can be re-selected.
        for l in 0..n_leptons {
            dr[j1 * n_leptons + l] = SENTINEL_DR;
        }
        for j in 0..n_jets {
            dr[j * n_leptons + l1] = SENTINEL_DR;
        }

        let (j2, _l2) = argmin_matrix(&dr, n_leptons);

        // Slot 0 is the antiparticle.
        if l1 == 0 {
            antilepton_jet.push(j1);
            lepton_jet.push(j2);
        } else {
            lepton_jet.push(j1);
            antilepton_jet.push(j2);
        }
    }

    Ok(PairingAssignment { lepton_jet, antilepton_jet })
}
