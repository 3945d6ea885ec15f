//! One masked training/evaluation step and the per-epoch bookkeeping around it.
//!
//! The model itself lives outside this crate; anything that maps
//! `(inputs, attention_mask, labels)` to `(loss, logits)` can be plugged in.

use std::collections::BTreeMap;

use ndarray::Array2;
use rand::Rng;

use crate::common::{LabelBatch, Logits, TokenBatch};
use crate::error::{MlmError, Result};
use crate::masking::{MaskedBatch, MaskingPolicy};
use crate::metrics::{evaluate_metrics, BoundMetric, Validity};
use crate::vocab::EventVocabulary;

pub trait MlmModel {
    fn forward(
        &mut self,
        inputs: &TokenBatch,
        attention_mask: &Array2<bool>,
        labels: &LabelBatch,
    ) -> Result<(f32, Logits)>;
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub loss: f32,
    pub metrics: Vec<(String, f32)>,
    pub masked: MaskedBatch,
    pub logits: Logits,
}

/// Mask the batch, run the model and score its logits with `metrics`.
#[allow(clippy::too_many_arguments)]
pub fn evaluate_step<M, V, R>(
    model: &mut M,
    vocab: &V,
    policy: &MaskingPolicy,
    input_ids: &TokenBatch,
    attention_mask: &Array2<bool>,
    metrics: &[BoundMetric],
    validity: &Validity,
    rng: &mut R,
) -> Result<StepReport>
where
    M: MlmModel + ?Sized,
    V: EventVocabulary + ?Sized,
    R: Rng + ?Sized,
{
    let masked = policy.mask(vocab, input_ids, Some(attention_mask), rng)?;
    let (loss, logits) = model.forward(&masked.inputs, attention_mask, &masked.labels)?;

    let (batch, seq_len) = input_ids.dim();
    let (lb, ls, num_classes) = logits.dim();
    if (lb, ls) != (batch, seq_len) {
        return Err(MlmError::shape_mismatch(
            [batch, seq_len, num_classes],
            logits.shape(),
        ));
    }

    let metrics = evaluate_metrics(
        metrics,
        logits.view(),
        masked.labels.view(),
        masked.mask_state.view(),
        validity,
    )?;
    Ok(StepReport {
        loss,
        metrics,
        masked,
        logits,
    })
}

/// Averages metric values over the steps of an epoch. NaN entries (steps
/// with nothing to score) are skipped rather than poisoning the mean.
#[derive(Debug, Default, Clone)]
pub struct MetricAccumulator {
    order: Vec<String>,
    sums: BTreeMap<String, (f64, usize)>,
}

impl MetricAccumulator {
    pub fn push(&mut self, values: &[(String, f32)]) {
        for (name, value) in values {
            let entry = self.sums.entry(name.clone()).or_insert_with(|| {
                self.order.push(name.clone());
                (0.0, 0)
            });
            if !value.is_nan() {
                entry.0 += *value as f64;
                entry.1 += 1;
            }
        }
    }

    /// Means in first-seen order; NaN for a metric that never had a value.
    pub fn means(&self) -> Vec<(String, f32)> {
        self.order
            .iter()
            .map(|name| {
                let (sum, count) = self.sums[name];
                let mean = if count == 0 {
                    f32::NAN
                } else {
                    (sum / count as f64) as f32
                };
                (name.clone(), mean)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossHistory {
    pub train_loss: Vec<f32>,
    pub val_loss: Vec<f32>,
    eval_interval: usize,
}

impl LossHistory {
    pub fn new(eval_interval: usize) -> Result<Self> {
        if eval_interval == 0 {
            return Err(MlmError::config("eval_interval must be positive"));
        }
        Ok(Self {
            eval_interval,
            ..Default::default()
        })
    }

    /// Validation runs after every `eval_interval`-th epoch (0-based `epoch`).
    pub fn eval_due(&self, epoch: usize) -> bool {
        (epoch + 1) % self.eval_interval == 0
    }

    pub fn record_train(&mut self, step_losses: &[f32]) -> f32 {
        let avg = mean(step_losses);
        self.train_loss.push(avg);
        avg
    }

    pub fn record_val(&mut self, step_losses: &[f32]) -> f32 {
        let avg = mean(step_losses);
        self.val_loss.push(avg);
        avg
    }

    /// Epoch numbers (1-based) at which each validation loss was recorded.
    pub fn val_epochs(&self) -> Vec<usize> {
        (1..=self.val_loss.len())
            .map(|i| i * self.eval_interval)
            .collect()
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64) as f32
}
