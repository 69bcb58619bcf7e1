//! Dense raw event tables.

use nr_core::{Error, Result};
use nr_kinematics::{FourVecArray, Frame};

/// A dense `(n_events, n_objects, n_features)` block of raw detector-level
/// values, row-major.
///
/// This is the plain-array form every reader produces and every decoder
/// consumes; it carries no frame or unit semantics of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectTable {
    data: Vec<f64>,
    n_events: usize,
    n_objects: usize,
    n_features: usize,
}

impl ObjectTable {
    /// Create a table from a flat row-major buffer, with shape validation.
    pub fn new(
        data: Vec<f64>,
        n_events: usize,
        n_objects: usize,
        n_features: usize,
    ) -> Result<Self> {
        let expected = n_events * n_objects * n_features;
        if data.len() != expected {
            return Err(Error::Validation(format!(
                "ObjectTable buffer length mismatch: expected {expected} ({n_events} x {n_objects} x {n_features}), got {}",
                data.len()
            )));
        }
        Ok(Self { data, n_events, n_objects, n_features })
    }

    /// Number of events.
    pub fn n_events(&self) -> usize {
        self.n_events
    }

    /// Object multiplicity per event.
    pub fn n_objects(&self) -> usize {
        self.n_objects
    }

    /// Feature width per object.
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Flat row-major view of the underlying buffer.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    fn idx(&self, event: usize, object: usize, feature: usize) -> usize {
        (event * self.n_objects + object) * self.n_features + feature
    }

    /// Value at `(event, object, feature)`.
    #[inline]
    pub fn value(&self, event: usize, object: usize, feature: usize) -> f64 {
        self.data[self.idx(event, object, feature)]
    }

    /// Overwrite the value at `(event, object, feature)`.
    #[inline]
    pub fn set(&mut self, event: usize, object: usize, feature: usize, v: f64) {
        let i = self.idx(event, object, feature);
        self.data[i] = v;
    }

    /// Clamp one feature column to `[lo, hi]` across all events and objects.
    pub fn clip_feature(&mut self, feature: usize, lo: f64, hi: f64) {
        for e in 0..self.n_events {
            for o in 0..self.n_objects {
                let i = self.idx(e, o, feature);
                self.data[i] = self.data[i].clamp(lo, hi);
            }
        }
    }

    /// Apply `f` to one feature column across all events and objects.
    pub fn map_feature(&mut self, feature: usize, f: impl Fn(f64) -> f64) {
        for e in 0..self.n_events {
            for o in 0..self.n_objects {
                let i = self.idx(e, o, feature);
                self.data[i] = f(self.data[i]);
            }
        }
    }

    /// Drop the leading `n` feature columns, keeping the rest.
    pub fn drop_leading_features(&self, n: usize) -> Result<Self> {
        if n >= self.n_features {
            return Err(Error::Validation(format!(
                "cannot drop {n} leading features from a table {} features wide",
                self.n_features
            )));
        }
        let kept = self.n_features - n;
        let mut data = Vec::with_capacity(self.n_events * self.n_objects * kept);
        for e in 0..self.n_events {
            for o in 0..self.n_objects {
                for f in n..self.n_features {
                    data.push(self.value(e, o, f));
                }
            }
        }
        Self::new(data, self.n_events, self.n_objects, kept)
    }

    /// Reinterpret the table as a four-vector block in the given frame.
    pub fn into_fourvec(self, frame: Frame) -> Result<FourVecArray> {
        FourVecArray::new(self.data, self.n_events, self.n_objects, self.n_features, frame)
    }
}
