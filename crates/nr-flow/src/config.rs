//! Model construction configuration.
//!
//! Consumed once at construction; sizing comes from the declared input and
//! target dimension mappings plus the per-component hyperparameters below.

use serde::{Deserialize, Serialize};

/// Per-stream embedding network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// Hidden width of each embedding MLP.
    pub hidden_dim: usize,
    /// Number of hidden layers.
    pub num_layers: usize,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self { hidden_dim: 64, num_layers: 2 }
    }
}

/// Set-encoder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Shared embedding / context width.
    pub dim: usize,
    /// Number of attention heads (`dim` must be divisible by this).
    pub num_heads: usize,
    /// Number of self-attention blocks before pooling.
    pub num_blocks: usize,
    /// Feed-forward expansion factor inside each block.
    pub ff_mult: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self { dim: 64, num_heads: 4, num_blocks: 2, ff_mult: 2 }
    }
}

/// Conditional rational-quadratic-spline flow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Number of coupling layers.
    pub num_layers: usize,
    /// Spline bins per transformed dimension.
    pub num_bins: usize,
    /// Spline support half-width; the transform is the identity outside
    /// `[-tail_bound, tail_bound]`.
    pub tail_bound: f64,
    /// Hidden width of each conditioner MLP.
    pub hidden_dim: usize,
    /// Number of hidden layers in each conditioner MLP.
    pub num_hidden_layers: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self { num_layers: 6, num_bins: 8, tail_bound: 4.0, hidden_dim: 64, num_hidden_layers: 2 }
    }
}

/// Full model specification.
///
/// `input_dimensions` and `target_dimensions` are ordered mappings from
/// stream/field name to per-object feature width; their order fixes the
/// token concatenation order and the target packing order respectively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Input stream name -> per-object feature width, in declaration order.
    pub input_dimensions: Vec<(String, usize)>,
    /// Target field name -> feature width, in declaration order.
    pub target_dimensions: Vec<(String, usize)>,
    /// Embedding network configuration, shared across streams.
    pub embed: EmbedConfig,
    /// Set-encoder configuration.
    pub encoder: EncoderConfig,
    /// Flow configuration.
    pub flow: FlowConfig,
    /// Seed for all weight initialization.
    pub seed: u64,
}
