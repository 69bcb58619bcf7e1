//! Dense four-vector blocks with explicit frame tracking.

use nr_core::{Error, Result};

/// Coordinate frame of the kinematic columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// Columns 0..3 are `(px, py, pz)` in GeV.
    Cartesian,
    /// Columns 0..3 are `(pt, eta, phi)`.
    Polar,
}

/// A dense `(n_events, n_objects, width)` block of per-object kinematic rows.
///
/// Columns `0..3` are the momentum components in the active [`Frame`]; column 3
/// (when present) is the energy (or stored mass, for tables that record one)
/// and columns `4..` are opaque trailing metadata (b-tag, charge, flavour).
/// Frame conversions touch exactly the three momentum components; everything
/// else passes through untouched.
#[derive(Debug, Clone)]
pub struct FourVecArray {
    data: Vec<f64>,
    n_events: usize,
    n_objects: usize,
    width: usize,
    frame: Frame,
}

impl FourVecArray {
    /// Create a block from a flat row-major buffer.
    ///
    /// `width` must be at least 3 (momentum-only blocks, e.g. neutrino
    /// candidates without an energy column, are allowed).
    pub fn new(
        data: Vec<f64>,
        n_events: usize,
        n_objects: usize,
        width: usize,
        frame: Frame,
    ) -> Result<Self> {
        if width < 3 {
            return Err(Error::Validation(format!(
                "FourVecArray requires width >= 3, got {width}"
            )));
        }
        let expected = n_events * n_objects * width;
        if data.len() != expected {
            return Err(Error::Validation(format!(
                "FourVecArray buffer length mismatch: expected {expected} ({n_events} x {n_objects} x {width}), got {}",
                data.len()
            )));
        }
        Ok(Self { data, n_events, n_objects, width, frame })
    }

    /// Number of events (leading axis).
    pub fn n_events(&self) -> usize {
        self.n_events
    }

    /// Object multiplicity per event.
    pub fn n_objects(&self) -> usize {
        self.n_objects
    }

    /// Total feature width per object, including trailing metadata.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Active coordinate frame.
    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// Flat row-major view of the underlying buffer.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    fn idx(&self, event: usize, object: usize, col: usize) -> usize {
        (event * self.n_objects + object) * self.width + col
    }

    /// Value at `(event, object, col)`.
    #[inline]
    pub fn value(&self, event: usize, object: usize, col: usize) -> f64 {
        self.data[self.idx(event, object, col)]
    }

    /// Overwrite the value at `(event, object, col)`.
    #[inline]
    pub fn set(&mut self, event: usize, object: usize, col: usize, v: f64) {
        let i = self.idx(event, object, col);
        self.data[i] = v;
    }

    /// Transverse momentum of one object, valid in either frame.
    pub fn pt(&self, event: usize, object: usize) -> f64 {
        match self.frame {
            Frame::Polar => self.value(event, object, 0),
            Frame::Cartesian => {
                let px = self.value(event, object, 0);
                let py = self.value(event, object, 1);
                px.hypot(py)
            }
        }
    }

    /// Pseudorapidity of one object, valid in either frame.
    pub fn eta(&self, event: usize, object: usize) -> f64 {
        match self.frame {
            Frame::Polar => self.value(event, object, 1),
            Frame::Cartesian => {
                let pt = self.pt(event, object);
                let pz = self.value(event, object, 2);
                (pz / pt).asinh()
            }
        }
    }

    /// Azimuthal angle of one object, valid in either frame.
    pub fn phi(&self, event: usize, object: usize) -> f64 {
        match self.frame {
            Frame::Polar => self.value(event, object, 2),
            Frame::Cartesian => {
                let px = self.value(event, object, 0);
                let py = self.value(event, object, 1);
                py.atan2(px)
            }
        }
    }

    /// Convert polar `(pt, eta, phi)` columns to Cartesian `(px, py, pz)` in place.
    ///
    /// `px = pt cos φ`, `py = pt sin φ`, `pz = pt sinh η`. Column 3 and all
    /// trailing metadata pass through. Fails loudly if already Cartesian.
    pub fn to_cartesian(&mut self) -> Result<()> {
        if self.frame == Frame::Cartesian {
            return Err(Error::Validation(
                "FourVecArray::to_cartesian: block is already Cartesian".into(),
            ));
        }
        for e in 0..self.n_events {
            for o in 0..self.n_objects {
                let pt = self.value(e, o, 0);
                let eta = self.value(e, o, 1);
                let phi = self.value(e, o, 2);
                self.set(e, o, 0, pt * phi.cos());
                self.set(e, o, 1, pt * phi.sin());
                self.set(e, o, 2, pt * eta.sinh());
            }
        }
        self.frame = Frame::Cartesian;
        Ok(())
    }

    /// Convert Cartesian `(px, py, pz)` columns to polar `(pt, eta, phi)` in place.
    ///
    /// Exact inverse of [`to_cartesian`](Self::to_cartesian) up to floating
    /// round-off. Fails loudly if already polar.
    pub fn to_polar(&mut self) -> Result<()> {
        if self.frame == Frame::Polar {
            return Err(Error::Validation(
                "FourVecArray::to_polar: block is already polar".into(),
            ));
        }
        for e in 0..self.n_events {
            for o in 0..self.n_objects {
                let px = self.value(e, o, 0);
                let py = self.value(e, o, 1);
                let pz = self.value(e, o, 2);
                let pt = px.hypot(py);
                self.set(e, o, 0, pt);
                self.set(e, o, 1, (pz / pt).asinh());
                self.set(e, o, 2, py.atan2(px));
            }
        }
        self.frame = Frame::Polar;
        Ok(())
    }

    /// ΔR between object `a` of this block and object `b` of `other`, within one event.
    pub fn del_r_to(
        &self,
        other: &FourVecArray,
        event: usize,
        object_a: usize,
        object_b: usize,
    ) -> f64 {
        del_r(
            self.eta(event, object_a),
            self.phi(event, object_a),
            other.eta(event, object_b),
            other.phi(event, object_b),
        )
    }
}

/// Wrap an azimuthal difference into `(-π, π]`.
#[inline]
pub fn delta_phi(phi_a: f64, phi_b: f64) -> f64 {
    let two_pi = 2.0 * std::f64::consts::PI;
    let mut d = (phi_a - phi_b) % two_pi;
    if d > std::f64::consts::PI {
        d -= two_pi;
    } else if d <= -std::f64::consts::PI {
        d += two_pi;
    }
    d
}

/// Angular distance `ΔR = sqrt(Δη² + Δφ²)` with Δφ wrapped into `(-π, π]`.
#[inline]
pub fn del_r(eta_a: f64, phi_a: f64, eta_b: f64, phi_b: f64) -> f64 {
    let deta = eta_a - eta_b;
    let dphi = delta_phi(phi_a, phi_b);
    (deta * deta + dphi * dphi).sqrt()
}
