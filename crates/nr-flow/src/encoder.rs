//! Masked set encoding: self-attention blocks plus attention pooling.
//!
//! Consumes the concatenated per-stream embeddings `(batch, tokens, dim)`
//! with a boolean validity mask and produces one fixed-size context vector
//! per event. Padding is hard-masked: a padded token's key gets a -inf
//! attention logit before the softmax and its row is zeroed after every
//! block, so it can never influence the pooled output.

use crate::config::EncoderConfig;
use crate::mlp::{FinalInit, Mlp};
use ndarray::{Array1, Array2, Array3, Axis};
use nr_core::{Error, Result};
use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;

/// Per-token layer normalization.
#[derive(Debug, Clone)]
struct LayerNorm {
    gamma: Array1<f64>,
    beta: Array1<f64>,
    eps: f64,
}

impl LayerNorm {
    fn new(dim: usize) -> Self {
        Self { gamma: Array1::ones(dim), beta: Array1::zeros(dim), eps: 1e-6 }
    }

    fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.clone();
        for mut row in out.rows_mut() {
            let n = row.len() as f64;
            let mean = row.sum() / n;
            let var = row.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
            let denom = (var + self.eps).sqrt();
            for (j, v) in row.iter_mut().enumerate() {
                *v = (*v - mean) / denom * self.gamma[j] + self.beta[j];
            }
        }
        out
    }
}

/// Multi-head self-attention with hard key masking.
#[derive(Debug, Clone)]
struct MultiHeadAttention {
    wq: Mlp,
    wk: Mlp,
    wv: Mlp,
    wo: Mlp,
    num_heads: usize,
    head_dim: usize,
}

impl MultiHeadAttention {
    fn new(rng: &mut dyn RngCore, dim: usize, num_heads: usize) -> Self {
        let proj = |rng: &mut dyn RngCore| Mlp::new(rng, dim, 0, dim, 0, FinalInit::Random);
        Self {
            wq: proj(rng),
            wk: proj(rng),
            wv: proj(rng),
            wo: proj(rng),
            num_heads,
            head_dim: dim / num_heads,
        }
    }

    /// `x` is `(tokens, dim)`; `mask[t]` marks valid tokens.
    fn forward(&self, x: &Array2<f64>, mask: &[bool]) -> Array2<f64> {
        let (t, dim) = x.dim();
        let q = self.wq.forward_batch(x);
        let k = self.wk.forward_batch(x);
        let v = self.wv.forward_batch(x);

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let mut merged = Array2::<f64>::zeros((t, dim));

        for h in 0..self.num_heads {
            let lo = h * self.head_dim;
            let hi = lo + self.head_dim;
            let qh = q.slice(ndarray::s![.., lo..hi]);
            let kh = k.slice(ndarray::s![.., lo..hi]);
            let vh = v.slice(ndarray::s![.., lo..hi]);

            for i in 0..t {
                if !mask[i] {
                    continue;
                }
                // Masked softmax over keys.
                let mut logits = vec![f64::NEG_INFINITY; t];
                let mut max_logit = f64::NEG_INFINITY;
                for j in 0..t {
                    if mask[j] {
                        let dot = qh.row(i).dot(&kh.row(j));
                        logits[j] = dot * scale;
                        max_logit = max_logit.max(logits[j]);
                    }
                }
                let mut weights = vec![0.0; t];
                let mut total = 0.0;
                for j in 0..t {
                    if mask[j] {
                        let w = (logits[j] - max_logit).exp();
                        weights[j] = w;
                        total += w;
                    }
                }
                for j in 0..t {
                    if weights[j] > 0.0 {
                        let w = weights[j] / total;
                        for c in 0..self.head_dim {
                            merged[(i, lo + c)] += w * vh[(j, c)];
                        }
                    }
                }
            }
        }

        self.wo.forward_batch(&merged)
    }
}

/// Pre-norm attention block: MHSA + feed-forward, both residual.
#[derive(Debug, Clone)]
struct AttentionBlock {
    norm1: LayerNorm,
    attn: MultiHeadAttention,
    norm2: LayerNorm,
    ff: Mlp,
}

impl AttentionBlock {
    fn new(rng: &mut dyn RngCore, cfg: &EncoderConfig) -> Self {
        Self {
            norm1: LayerNorm::new(cfg.dim),
            attn: MultiHeadAttention::new(rng, cfg.dim, cfg.num_heads),
            norm2: LayerNorm::new(cfg.dim),
            ff: Mlp::new(rng, cfg.dim, cfg.dim * cfg.ff_mult, cfg.dim, 1, FinalInit::Random),
        }
    }

    fn forward(&self, x: &Array2<f64>, mask: &[bool]) -> Array2<f64> {
        let mut h = x + &self.attn.forward(&self.norm1.forward(x), mask);
        h = &h + &self.ff.forward_batch(&self.norm2.forward(&h));
        // Padded rows carry no information; keep them hard-zeroed.
        for (i, &valid) in mask.iter().enumerate() {
            if !valid {
                h.row_mut(i).fill(0.0);
            }
        }
        h
    }
}

/// Learned-query attention pooling over valid tokens.
#[derive(Debug, Clone)]
struct PoolingHead {
    query: Array1<f64>,
    key: Mlp,
    value: Mlp,
}

impl PoolingHead {
    fn new(rng: &mut dyn RngCore, dim: usize) -> Self {
        let mut query = Array1::<f64>::zeros(dim);
        let scale = (1.0 / dim as f64).sqrt();
        for v in query.iter_mut() {
            let z: f64 = StandardNormal.sample(rng);
            *v = z * scale;
        }
        Self {
            query,
            key: Mlp::new(rng, dim, 0, dim, 0, FinalInit::Random),
            value: Mlp::new(rng, dim, 0, dim, 0, FinalInit::Random),
        }
    }

    fn forward(&self, x: &Array2<f64>, mask: &[bool]) -> Array1<f64> {
        let dim = x.ncols();
        let k = self.key.forward_batch(x);
        let v = self.value.forward_batch(x);
        let scale = 1.0 / (dim as f64).sqrt();

        let mut max_logit = f64::NEG_INFINITY;
        let mut logits = vec![f64::NEG_INFINITY; x.nrows()];
        for (t, &valid) in mask.iter().enumerate() {
            if valid {
                logits[t] = self.query.dot(&k.row(t)) * scale;
                max_logit = max_logit.max(logits[t]);
            }
        }

        let mut pooled = Array1::<f64>::zeros(dim);
        let mut total = 0.0;
        for (t, &valid) in mask.iter().enumerate() {
            if valid {
                let w = (logits[t] - max_logit).exp();
                total += w;
                pooled.scaled_add(w, &v.row(t));
            }
        }
        pooled / total
    }
}

/// Permutation-respecting masked set encoder.
#[derive(Debug, Clone)]
pub struct SetEncoder {
    blocks: Vec<AttentionBlock>,
    pool: PoolingHead,
    dim: usize,
}

impl SetEncoder {
    /// Build from configuration; `dim` must divide evenly into heads.
    pub fn new(rng: &mut dyn RngCore, cfg: &EncoderConfig) -> Result<Self> {
        if cfg.dim == 0 || cfg.num_heads == 0 || cfg.dim % cfg.num_heads != 0 {
            return Err(Error::Validation(format!(
                "SetEncoder: dim ({}) must be a positive multiple of num_heads ({})",
                cfg.dim, cfg.num_heads
            )));
        }
        let blocks = (0..cfg.num_blocks).map(|_| AttentionBlock::new(rng, cfg)).collect();
        Ok(Self { blocks, pool: PoolingHead::new(rng, cfg.dim), dim: cfg.dim })
    }

    /// Context vector width.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Encode one event's `(tokens, dim)` block into a fixed-size vector.
    ///
    /// At least one token must be valid.
    pub fn encode_event(&self, tokens: &Array2<f64>, mask: &[bool]) -> Result<Array1<f64>> {
        if tokens.nrows() != mask.len() {
            return Err(Error::Validation(format!(
                "SetEncoder: {} tokens but {} mask entries",
                tokens.nrows(),
                mask.len()
            )));
        }
        if !mask.iter().any(|&m| m) {
            return Err(Error::Validation(
                "SetEncoder: event has no valid tokens to aggregate".into(),
            ));
        }
        let mut h = tokens.clone();
        for (i, &valid) in mask.iter().enumerate() {
            if !valid {
                h.row_mut(i).fill(0.0);
            }
        }
        for block in &self.blocks {
            h = block.forward(&h, mask);
        }
        Ok(self.pool.forward(&h, mask))
    }

    /// Encode a `(batch, tokens, dim)` block into `(batch, dim)` contexts.
    pub fn encode_batch(&self, tokens: &Array3<f64>, mask: &Array2<bool>) -> Result<Array2<f64>> {
        let (b, t, d) = tokens.dim();
        if mask.dim() != (b, t) {
            return Err(Error::Validation(format!(
                "SetEncoder: mask shape {:?} does not match token axes ({b}, {t})",
                mask.dim()
            )));
        }
        if d != self.dim {
            return Err(Error::Validation(format!(
                "SetEncoder: token width {d} does not match encoder dim {}",
                self.dim
            )));
        }

        let rows: Vec<Array1<f64>> = (0..b)
            .into_par_iter()
            .map(|e| {
                let event = tokens.index_axis(Axis(0), e).to_owned();
                let m: Vec<bool> = mask.index_axis(Axis(0), e).iter().copied().collect();
                self.encode_event(&event, &m)
            })
            .collect::<Result<_>>()?;

        let mut out = Array2::<f64>::zeros((b, self.dim));
        for (e, row) in rows.into_iter().enumerate() {
            out.row_mut(e).assign(&row);
        }
        Ok(out)
    }
}
