//! # nr-kinematics
//!
//! Relativistic four-vector blocks and the lepton-jet pairing resolver.
//!
//! This crate provides:
//! - A dense [`FourVecArray`] (events x objects x features, SoA-free flat layout)
//!   with explicit Cartesian/polar frame tracking and exact conversions.
//! - ΔR angular distance in (pseudorapidity, azimuth) space.
//! - [`resolve_pairing`]: iterated nearest-neighbour matching of a lepton pair
//!   onto b-tagged jets.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fourvec;
pub mod pairing;

pub use fourvec::{del_r, delta_phi, FourVecArray, Frame};
pub use pairing::{resolve_pairing, PairingAssignment, SENTINEL_DR};
