//! Dense feed-forward networks.

use ndarray::{Array1, Array2};
use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};

/// How the final layer of a network is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalInit {
    /// He-scaled random weights, like the hidden layers.
    Random,
    /// All-zero weights and biases, so the network starts as the constant 0.
    Zeros,
}

/// One affine layer, `y = W x + b`, weights stored `(out, in)`.
#[derive(Debug, Clone)]
pub(crate) struct Linear {
    pub(crate) weight: Array2<f64>,
    pub(crate) bias: Array1<f64>,
}

impl Linear {
    fn random(rng: &mut dyn RngCore, in_dim: usize, out_dim: usize) -> Self {
        // He initialization for ReLU stacks.
        let scale = (2.0 / in_dim.max(1) as f64).sqrt();
        let mut weight = Array2::<f64>::zeros((out_dim, in_dim));
        for v in weight.iter_mut() {
            let z: f64 = StandardNormal.sample(rng);
            *v = z * scale;
        }
        Self { weight, bias: Array1::zeros(out_dim) }
    }

    fn zeros(in_dim: usize, out_dim: usize) -> Self {
        Self { weight: Array2::zeros((out_dim, in_dim)), bias: Array1::zeros(out_dim) }
    }

    pub(crate) fn forward(&self, x: &Array1<f64>) -> Array1<f64> {
        self.weight.dot(x) + &self.bias
    }

    /// Rows of `x` are independent samples.
    pub(crate) fn forward_batch(&self, x: &Array2<f64>) -> Array2<f64> {
        x.dot(&self.weight.t()) + &self.bias
    }
}

/// Feed-forward projection network with ReLU hidden activations.
#[derive(Debug, Clone)]
pub struct Mlp {
    pub(crate) layers: Vec<Linear>,
    in_dim: usize,
    out_dim: usize,
}

impl Mlp {
    /// Build a network `in_dim -> hidden_dim x num_hidden -> out_dim`.
    ///
    /// `num_hidden == 0` gives a single affine map.
    pub fn new(
        rng: &mut dyn RngCore,
        in_dim: usize,
        hidden_dim: usize,
        out_dim: usize,
        num_hidden: usize,
        final_init: FinalInit,
    ) -> Self {
        let mut layers = Vec::with_capacity(num_hidden + 1);
        let mut prev = in_dim;
        for _ in 0..num_hidden {
            layers.push(Linear::random(rng, prev, hidden_dim));
            prev = hidden_dim;
        }
        layers.push(match final_init {
            FinalInit::Random => Linear::random(rng, prev, out_dim),
            FinalInit::Zeros => Linear::zeros(prev, out_dim),
        });
        Self { layers, in_dim, out_dim }
    }

    /// Input width.
    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    /// Output width.
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// Forward one sample.
    pub fn forward(&self, x: &Array1<f64>) -> Array1<f64> {
        let last = self.layers.len() - 1;
        let mut h = x.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h);
            if i < last {
                h.mapv_inplace(|v| v.max(0.0));
            }
        }
        h
    }

    /// Forward a batch, one sample per row.
    pub fn forward_batch(&self, x: &Array2<f64>) -> Array2<f64> {
        let last = self.layers.len() - 1;
        let mut h = x.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward_batch(&h);
            if i < last {
                h.mapv_inplace(|v| v.max(0.0));
            }
        }
        h
    }
}
