//! Batched input and target containers.

use ndarray::{Array2, Array3, Axis};
use nr_core::{Error, Result};

/// One input stream: values `(batch, multiplicity, features)` plus an
/// optional boolean padding mask `(batch, multiplicity)`.
#[derive(Debug, Clone)]
pub struct StreamData {
    /// Per-object feature values.
    pub values: Array3<f64>,
    /// Padding mask; `None` means every position is valid.
    pub mask: Option<Array2<bool>>,
}

impl StreamData {
    /// Stream without padding: every position valid.
    pub fn new(values: Array3<f64>) -> Self {
        Self { values, mask: None }
    }

    /// Stream with an explicit padding mask.
    pub fn with_mask(values: Array3<f64>, mask: Array2<bool>) -> Result<Self> {
        let (b, m, _) = values.dim();
        if mask.dim() != (b, m) {
            return Err(Error::Validation(format!(
                "stream mask shape {:?} does not match values multiplicity axes ({b}, {m})",
                mask.dim()
            )));
        }
        Ok(Self { values, mask: Some(mask) })
    }

    /// Promote a `(batch, features)` array to multiplicity 1.
    pub fn from_2d(values: Array2<f64>) -> Self {
        Self { values: values.insert_axis(Axis(1)), mask: None }
    }

    /// Whether the mask is false at every position of every event.
    pub fn is_fully_masked(&self) -> bool {
        match &self.mask {
            Some(m) => !m.iter().any(|&v| v),
            None => false,
        }
    }
}

/// Ordered mapping from input stream name to [`StreamData`].
#[derive(Debug, Clone, Default)]
pub struct InputBatch {
    streams: Vec<(String, StreamData)>,
}

impl InputBatch {
    /// Empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stream; insertion order is preserved.
    pub fn insert(&mut self, name: impl Into<String>, data: StreamData) {
        self.streams.push((name.into(), data));
    }

    /// Stream by name.
    pub fn get(&self, name: &str) -> Option<&StreamData> {
        self.streams.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    /// Streams in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StreamData)> {
        self.streams.iter().map(|(n, d)| (n.as_str(), d))
    }

    /// Number of streams.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether the batch carries no streams.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

/// Ordered mapping from target field name to `(batch, features)` values.
#[derive(Debug, Clone, Default)]
pub struct TargetBatch {
    fields: Vec<(String, Array2<f64>)>,
}

impl TargetBatch {
    /// Empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field; insertion order is preserved.
    pub fn insert(&mut self, name: impl Into<String>, values: Array2<f64>) {
        self.fields.push((name.into(), values));
    }

    /// Field by name.
    pub fn get(&self, name: &str) -> Option<&Array2<f64>> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array2<f64>)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_from_2d_promotes_multiplicity() {
        let s = StreamData::from_2d(arr2(&[[1.0, 2.0], [3.0, 4.0]]));
        assert_eq!(s.values.dim(), (2, 1, 2));
        assert!(!s.is_fully_masked());
    }

    #[test]
    fn test_mask_shape_checked() {
        let values = Array3::<f64>::zeros((2, 3, 4));
        let bad = Array2::from_elem((2, 2), true);
        assert!(StreamData::with_mask(values.clone(), bad).is_err());
        let good = Array2::from_elem((2, 3), true);
        assert!(StreamData::with_mask(values, good).is_ok());
    }

    #[test]
    fn test_fully_masked_detection() {
        let values = Array3::<f64>::zeros((2, 2, 1));
        let all_false = Array2::from_elem((2, 2), false);
        let s = StreamData::with_mask(values, all_false).unwrap();
        assert!(s.is_fully_masked());
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut batch = TargetBatch::new();
        batch.insert("px", arr2(&[[1.0]]));
        batch.insert("py", arr2(&[[2.0]]));
        let names: Vec<&str> = batch.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["px", "py"]);
    }
}
