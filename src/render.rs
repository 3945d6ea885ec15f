//! Human-readable traces of performance sequences, for eyeballing what the
//! model was shown and what it predicted.

use colored::Colorize;
use ndarray::{ArrayView1, ArrayView3, Axis};

use crate::error::{MlmError, Result};
use crate::metrics::ranking::argmax;
use crate::vocab::{EventVocabulary, PerformanceEvent, DEFAULT_MASK_EVENT, VELOCITY_MASK_EVENT};

/// Renders `[type-value],` cells separated by tabs. Default mask cells are
/// blue, velocity mask cells yellow.
pub fn render_perf_seq(perf_seq: &[PerformanceEvent]) -> String {
    perf_seq
        .iter()
        .map(|e| {
            let cell = format!("[{}-{}],", e.event_type, e.event_value);
            if *e == DEFAULT_MASK_EVENT {
                cell.blue().to_string()
            } else if *e == VELOCITY_MASK_EVENT {
                cell.yellow().to_string()
            } else {
                cell
            }
        })
        .collect::<Vec<_>>()
        .join("\t")
}

pub fn decode_ids<V>(ids: &[u32], vocab: &V) -> Result<Vec<PerformanceEvent>>
where
    V: EventVocabulary + ?Sized,
{
    ids.iter()
        .map(|&id| vocab.class_index_to_event(id, None))
        .collect()
}

fn row_ids(seq_logits: ArrayView3<f32>, idx: usize) -> Vec<u32> {
    seq_logits
        .index_axis(Axis(0), idx)
        .outer_iter()
        .map(|row: ArrayView1<f32>| argmax(&row) as u32)
        .collect()
}

/// Argmax class ids of the first sequence in the batch.
pub fn logits_to_ids(logits: ArrayView3<f32>) -> Result<Vec<u32>> {
    if logits.len_of(Axis(0)) == 0 {
        return Err(MlmError::invalid_argument("logits batch is empty"));
    }
    Ok(row_ids(logits, 0))
}

/// Decodes the argmax prediction of the first sequence in the batch.
pub fn decode_perf_logits<V>(logits: ArrayView3<f32>, vocab: &V) -> Result<Vec<PerformanceEvent>>
where
    V: EventVocabulary + ?Sized,
{
    decode_ids(&logits_to_ids(logits)?, vocab)
}

/// Decodes sequence `idx`, or every sequence when `idx` is `None`.
pub fn decode_batch_perf_logits<V>(
    logits: ArrayView3<f32>,
    vocab: &V,
    idx: Option<usize>,
) -> Result<Vec<Vec<PerformanceEvent>>>
where
    V: EventVocabulary + ?Sized,
{
    let batch = logits.len_of(Axis(0));
    match idx {
        Some(i) if i >= batch => Err(MlmError::invalid_argument(format!(
            "sequence index {} out of range for batch of {}",
            i, batch
        ))),
        Some(i) => Ok(vec![decode_ids(&row_ids(logits, i), vocab)?]),
        None => (0..batch)
            .map(|i| decode_ids(&row_ids(logits, i), vocab))
            .collect(),
    }
}
