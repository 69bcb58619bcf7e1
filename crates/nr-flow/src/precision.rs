//! Scoped numeric-precision control.
//!
//! The model carries an ambient [`Precision`]: in `Single` mode the
//! embedder/encoder activations are rounded through `f32`, emulating a
//! reduced-precision compute path. Log-density evaluation and sampling must
//! always run at full precision, so those call sites acquire a
//! [`PrecisionGuard`] that forces `Double` and restores the previous mode on
//! every exit path, including early error returns and unwinding.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Ambient arithmetic precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// Activations round through `f32`.
    Single,
    /// Full `f64` arithmetic.
    Double,
}

impl Precision {
    fn from_u8(v: u8) -> Self {
        if v == 0 { Self::Single } else { Self::Double }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Single => 0,
            Self::Double => 1,
        }
    }
}

/// Round a value according to the given precision.
#[inline]
pub fn quantize(x: f64, precision: Precision) -> f64 {
    match precision {
        Precision::Single => x as f32 as f64,
        Precision::Double => x,
    }
}

/// Per-model ambient precision state.
///
/// The guard returned by [`force_double`](Self::force_double) owns its handle
/// to the state, so it can outlive any particular borrow of the model.
#[derive(Debug)]
pub struct PrecisionCell(Arc<AtomicU8>);

impl PrecisionCell {
    /// New cell with the given ambient mode.
    pub fn new(precision: Precision) -> Self {
        Self(Arc::new(AtomicU8::new(precision.as_u8())))
    }

    /// Current ambient mode.
    pub fn get(&self) -> Precision {
        Precision::from_u8(self.0.load(Ordering::Relaxed))
    }

    /// Replace the ambient mode.
    pub fn set(&self, precision: Precision) {
        self.0.store(precision.as_u8(), Ordering::Relaxed);
    }

    /// Force `Double` until the returned guard drops.
    pub fn force_double(&self) -> PrecisionGuard {
        let previous = Precision::from_u8(
            self.0.swap(Precision::Double.as_u8(), Ordering::Relaxed),
        );
        PrecisionGuard { cell: Arc::clone(&self.0), previous }
    }
}

impl Default for PrecisionCell {
    fn default() -> Self {
        Self::new(Precision::Double)
    }
}

/// RAII guard restoring the ambient precision on drop.
#[derive(Debug)]
pub struct PrecisionGuard {
    cell: Arc<AtomicU8>,
    previous: Precision,
}

impl Drop for PrecisionGuard {
    fn drop(&mut self) {
        self.cell.store(self.previous.as_u8(), Ordering::Relaxed);
    }
}
