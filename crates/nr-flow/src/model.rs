//! The model orchestrator: embedders, set encoder and conditional flow.

use crate::batch::{InputBatch, StreamData, TargetBatch};
use crate::config::ModelSpec;
use crate::encoder::SetEncoder;
use crate::flow::RqsFlow;
use crate::mlp::{FinalInit, Mlp};
use crate::norm::RunningNorm;
use crate::precision::{quantize, Precision, PrecisionCell};
use crate::tracking::{Summary, SummaryTracker};
use ndarray::{Array2, Array3, Axis};
use nr_core::{Error, Result};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::debug;

/// Normalizer + projection network for one input stream.
#[derive(Debug)]
pub struct StreamEmbedder {
    /// Masked running standardization over the stream's raw features.
    pub norm: RunningNorm,
    /// Projection from the stream's feature width to the shared embedding width.
    pub project: Mlp,
}

/// Named, packed samples with their log-probabilities.
#[derive(Debug, Clone)]
pub struct SampleOutput {
    fields: Vec<(String, Array3<f64>)>,
    /// Per-sample log-probabilities, shape `(events, samples_per_event)`.
    pub log_probs: Array2<f64>,
}

impl SampleOutput {
    /// One packed field, shape `(events, samples_per_event, field_width)`.
    pub fn field(&self, name: &str) -> Option<&Array3<f64>> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// All fields in the declared target order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Array3<f64>)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// Conditional-flow model over set-encoded collider events.
///
/// Construction wires one normalizer + embedder per declared input stream,
/// one normalizer for the concatenated target, the set encoder and the
/// flow; the model is ready immediately afterwards.
#[derive(Debug)]
pub struct NeutrinoFlowModel {
    input_dimensions: Vec<(String, usize)>,
    target_dimensions: Vec<(String, usize)>,
    embedders: Vec<(String, StreamEmbedder)>,
    target_norm: RunningNorm,
    encoder: SetEncoder,
    flow: RqsFlow,
    precision: PrecisionCell,
    training: bool,
}

impl NeutrinoFlowModel {
    /// Build the model from its declared dimensions and hyperparameters.
    pub fn new(spec: &ModelSpec) -> Result<Self> {
        if spec.input_dimensions.is_empty() {
            return Err(Error::Validation("model requires at least one input stream".into()));
        }
        if spec.target_dimensions.is_empty() {
            return Err(Error::Validation("model requires at least one target field".into()));
        }
        for (name, width) in spec.input_dimensions.iter().chain(&spec.target_dimensions) {
            if *width == 0 {
                return Err(Error::Validation(format!(
                    "declared width of '{name}' must be positive"
                )));
            }
        }

        let mut rng = StdRng::seed_from_u64(spec.seed);
        let encoder = SetEncoder::new(&mut rng, &spec.encoder)?;
        let dim = encoder.dim();

        // One (normalizer, embedder) pair per declared stream, in order.
        let mut embedders = Vec::with_capacity(spec.input_dimensions.len());
        for (name, width) in &spec.input_dimensions {
            let embedder = StreamEmbedder {
                norm: RunningNorm::new(*width),
                project: Mlp::new(
                    &mut rng,
                    *width,
                    spec.embed.hidden_dim,
                    dim,
                    spec.embed.num_layers,
                    FinalInit::Random,
                ),
            };
            embedders.push((name.clone(), embedder));
        }

        let target_dim: usize = spec.target_dimensions.iter().map(|(_, w)| w).sum();
        let flow = RqsFlow::new(&mut rng, target_dim, dim, &spec.flow)?;

        debug!(
            n_streams = embedders.len(),
            target_dim,
            context_dim = dim,
            "constructed neutrino flow model"
        );

        Ok(Self {
            input_dimensions: spec.input_dimensions.clone(),
            target_dimensions: spec.target_dimensions.clone(),
            embedders,
            target_norm: RunningNorm::new(target_dim),
            encoder,
            flow,
            precision: PrecisionCell::default(),
            training: false,
        })
    }

    /// Declared target fields and widths, in packing order.
    pub fn target_dimensions(&self) -> &[(String, usize)] {
        &self.target_dimensions
    }

    /// Declared input streams and widths, in declaration order.
    pub fn input_dimensions(&self) -> &[(String, usize)] {
        &self.input_dimensions
    }

    /// Toggle training mode: running statistics accumulate only while on.
    pub fn set_training(&mut self, on: bool) {
        self.training = on;
        for (_, e) in &mut self.embedders {
            e.norm.set_training(on);
        }
        self.target_norm.set_training(on);
    }

    /// Whether statistics updates are currently enabled.
    pub fn training(&self) -> bool {
        self.training
    }

    /// Set the ambient arithmetic precision.
    pub fn set_precision(&self, precision: Precision) {
        self.precision.set(precision);
    }

    /// Current ambient arithmetic precision.
    pub fn precision(&self) -> Precision {
        self.precision.get()
    }

    /// Announce the run-level summary metrics to a tracking collaborator.
    pub fn register_summaries(&self, tracker: &dyn SummaryTracker) {
        tracker.define_metric("train/total_loss", Summary::Min);
        tracker.define_metric("valid/total_loss", Summary::Min);
    }

    fn apply_precision_2d(&self, values: &mut Array2<f64>) {
        let p = self.precision.get();
        if p == Precision::Single {
            values.mapv_inplace(|v| quantize(v, p));
        }
    }

    /// Produce the fixed-size context vector for every event.
    ///
    /// Streams whose mask is false at every position of every event are
    /// dropped entirely; if nothing survives, this is a hard error.
    pub fn get_context(&mut self, inputs: &InputBatch) -> Result<Array2<f64>> {
        let mut batch_size: Option<usize> = None;
        let mut token_blocks: Vec<Array3<f64>> = Vec::new();
        let mut mask_blocks: Vec<Array2<bool>> = Vec::new();

        for (name, data) in inputs.iter() {
            let (b, m, _) = data.values.dim();
            if let Some(expected) = batch_size {
                if b != expected {
                    return Err(Error::Validation(format!(
                        "stream '{name}' has batch size {b}, expected {expected}"
                    )));
                }
            } else {
                batch_size = Some(b);
            }

            // A stream that is fully padded across the batch contributes
            // nothing; drop it before aggregation.
            if data.is_fully_masked() {
                debug!(stream = name, "dropping fully masked input stream");
                continue;
            }

            let embedder = self
                .embedders
                .iter_mut()
                .find(|(n, _)| n == name)
                .map(|(_, e)| e)
                .ok_or_else(|| {
                    Error::Validation(format!("input stream '{name}' was not declared"))
                })?;

            embedder.norm.observe(&data.values, data.mask.as_ref());
            let normed = embedder.norm.normalize_3d(&data.values);

            // Project every position, then restore the multiplicity axis.
            let flat = normed
                .to_shape((b * m, normed.dim().2))
                .map_err(|e| Error::Validation(format!("stream '{name}' reshape failed: {e}")))?
                .to_owned();
            let mut embedded = embedder.project.forward_batch(&flat);
            self.apply_precision_2d(&mut embedded);

            let dim = embedded.ncols();
            let embedded3 = embedded
                .to_shape((b, m, dim))
                .map_err(|e| Error::Validation(format!("stream '{name}' reshape failed: {e}")))?
                .to_owned();

            token_blocks.push(embedded3);
            mask_blocks.push(match &data.mask {
                Some(mask) => mask.clone(),
                None => Array2::from_elem((b, m), true),
            });
        }

        if token_blocks.is_empty() {
            return Err(Error::Validation(
                "no usable input streams: every stream was empty or fully masked".into(),
            ));
        }

        let token_views: Vec<_> = token_blocks.iter().map(|a| a.view()).collect();
        let tokens = ndarray::concatenate(Axis(1), &token_views)
            .map_err(|e| Error::Validation(format!("token concatenation failed: {e}")))?;
        let mask_views: Vec<_> = mask_blocks.iter().map(|a| a.view()).collect();
        let mask = ndarray::concatenate(Axis(1), &mask_views)
            .map_err(|e| Error::Validation(format!("mask concatenation failed: {e}")))?;

        let mut context = self.encoder.encode_batch(&tokens, &mask)?;
        self.apply_precision_2d(&mut context);
        Ok(context)
    }

    /// Concatenate and normalize the target fields in declared order.
    ///
    /// Running statistics update only in training mode; at inference this is
    /// pure.
    pub fn get_targets(&mut self, targets: &TargetBatch) -> Result<Array2<f64>> {
        let mut views = Vec::with_capacity(self.target_dimensions.len());
        for (name, _) in &self.target_dimensions {
            let field = targets.get(name).ok_or_else(|| {
                Error::Validation(format!("target field '{name}' missing from batch"))
            })?;
            views.push(field.view());
        }
        let flat = ndarray::concatenate(Axis(1), &views)
            .map_err(|e| Error::Validation(format!("target concatenation failed: {e}")))?;

        self.target_norm.observe_2d(&flat);
        Ok(self.target_norm.normalize_2d(&flat))
    }

    /// Split a flat `(events, samples, target_dim)` block back into named
    /// fields, by declared widths in declared order.
    pub fn pack_outputs(&self, outputs: &Array3<f64>) -> Result<Vec<(String, Array3<f64>)>> {
        let total: usize = self.target_dimensions.iter().map(|(_, w)| w).sum();
        if outputs.dim().2 != total {
            return Err(Error::Validation(format!(
                "pack_outputs: last axis is {}, declared target width is {total}",
                outputs.dim().2
            )));
        }
        let mut fields = Vec::with_capacity(self.target_dimensions.len());
        let mut offset = 0;
        for (name, width) in &self.target_dimensions {
            let slice = outputs.slice(ndarray::s![.., .., offset..offset + width]).to_owned();
            fields.push((name.clone(), slice));
            offset += width;
        }
        Ok(fields)
    }

    /// Negative log-likelihood of the batch (training and validation loss).
    ///
    /// The flow evaluation runs under a forced full-precision scope
    /// regardless of the ambient mode.
    pub fn loss(&mut self, inputs: &InputBatch, targets: &TargetBatch) -> Result<f64> {
        let context = self.get_context(inputs)?;
        let flat_targets = self.get_targets(targets)?;

        let _full_precision = self.precision.force_double();
        self.flow.forward_kld(&flat_targets, &context)
    }

    /// Draw `samples_per_event` joint samples per event.
    ///
    /// The context is computed once and repeated interleaved (event 0's
    /// replicas contiguous before event 1's); samples are de-normalized,
    /// reshaped to `(events, samples_per_event, target_dim)` and packed into
    /// named fields plus `log_probs`. The whole path runs under the forced
    /// full-precision scope.
    pub fn sample(
        &mut self,
        inputs: &InputBatch,
        samples_per_event: usize,
        rng: &mut dyn RngCore,
    ) -> Result<SampleOutput> {
        if samples_per_event == 0 {
            return Err(Error::Validation("samples_per_event must be at least 1".into()));
        }

        let _full_precision = self.precision.force_double();

        let context = self.get_context(inputs)?;
        let n_events = context.nrows();
        let ctx_dim = context.ncols();
        let total = n_events * samples_per_event;

        let mut repeated = Array2::<f64>::zeros((total, ctx_dim));
        for e in 0..n_events {
            for s in 0..samples_per_event {
                repeated.row_mut(e * samples_per_event + s).assign(&context.row(e));
            }
        }

        let (mut samples, log_probs) = self.flow.sample(total, &repeated, rng)?;
        for mut row in samples.rows_mut() {
            let mut buf: Vec<f64> = row.iter().copied().collect();
            self.target_norm.denormalize_row(&mut buf);
            for (v, b) in row.iter_mut().zip(buf) {
                *v = b;
            }
        }

        let target_dim = samples.ncols();
        let flat: Vec<f64> = samples.iter().copied().collect();
        let cube = Array3::from_shape_vec((n_events, samples_per_event, target_dim), flat)
            .map_err(|e| Error::Validation(format!("sample reshape failed: {e}")))?;

        let lp_flat: Vec<f64> = log_probs.iter().copied().collect();
        let log_probs = Array2::from_shape_vec((n_events, samples_per_event), lp_flat)
            .map_err(|e| Error::Validation(format!("log-prob reshape failed: {e}")))?;

        let fields = self.pack_outputs(&cube)?;
        Ok(SampleOutput { fields, log_probs })
    }

    /// Re-bind positional value arrays to the declared stream names, then
    /// sample once per event.
    ///
    /// The argument count must match the declared stream count exactly.
    pub fn sample_positional(
        &mut self,
        values: &[Array3<f64>],
        rng: &mut dyn RngCore,
    ) -> Result<SampleOutput> {
        if values.len() != self.input_dimensions.len() {
            return Err(Error::Validation(format!(
                "positional rebinding expects {} input arrays, got {}",
                self.input_dimensions.len(),
                values.len()
            )));
        }
        let mut batch = InputBatch::new();
        for ((name, _), array) in self.input_dimensions.iter().zip(values) {
            batch.insert(name.clone(), StreamData::new(array.clone()));
        }
        self.sample(&batch, 1, rng)
    }
}
