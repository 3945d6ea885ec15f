//! Masked-position metrics.
//!
//! Every metric looks only at the positions admitted by [`Validity`] and works
//! per flattened position, never per sequence.

pub mod binding;
pub mod loss;
pub mod ranking;
pub mod validity;

use ndarray::{ArrayView1, ArrayView2, ArrayView3, Axis};

use crate::common::IGNORE_LABEL_INDEX;
use crate::error::{MlmError, Result};
pub use binding::{bind_metric, evaluate_metrics, BoundMetric, Metric};
pub use loss::cross_entropy_loss;
pub use ranking::{accuracy_within_n, hits_at_k};
pub use validity::{resolve, Validity};

/// Logit rows and labels of the valid positions, in row-major position order.
///
/// A valid position labelled [`IGNORE_LABEL_INDEX`] comes back with `None`:
/// cross-entropy drops it, the ranking metrics count it as a miss.
pub(crate) fn select_valid<'a>(
    logits: ArrayView3<'a, f32>,
    labels: ArrayView2<'_, i64>,
    mask_state: ArrayView2<'_, u8>,
    validity: &Validity,
) -> Result<Vec<(ArrayView1<'a, f32>, Option<usize>)>> {
    let (batch, seq_len, num_classes) = logits.dim();
    if labels.dim() != (batch, seq_len) {
        return Err(MlmError::shape_mismatch([batch, seq_len], labels.shape()));
    }
    if mask_state.dim() != (batch, seq_len) {
        return Err(MlmError::shape_mismatch([batch, seq_len], mask_state.shape()));
    }

    let valid = resolve(&mask_state, validity);
    let mut selected = Vec::new();
    for ((b, i), &is_valid) in valid.indexed_iter() {
        if !is_valid {
            continue;
        }
        let label = match labels[[b, i]] {
            IGNORE_LABEL_INDEX => None,
            label if label < 0 || label as usize >= num_classes => {
                return Err(MlmError::InvalidLabel { label, num_classes });
            }
            label => Some(label as usize),
        };
        // moving a copy of the view keeps the 'a lifetime on the row
        let row = logits.index_axis_move(Axis(0), b).index_axis_move(Axis(0), i);
        selected.push((row, label));
    }
    Ok(selected)
}
