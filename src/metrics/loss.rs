use ndarray::{ArrayView1, ArrayView2, ArrayView3};

use super::{select_valid, Validity};
use crate::error::Result;

fn log_sum_exp(row: &ArrayView1<f32>) -> f64 {
    let max = row.iter().fold(f32::NEG_INFINITY, |m, &x| m.max(x)) as f64;
    let sum: f64 = row.iter().map(|&x| (x as f64 - max).exp()).sum();
    max + sum.ln()
}

/// Mean cross-entropy over the valid positions.
///
/// Valid positions labelled with the ignore sentinel contribute nothing.
/// Returns `0.0` when no position is left to score. HITS@K and accuracy-within-n
/// return NaN in the same situation; the two conventions are kept as is.
pub fn cross_entropy_loss(
    logits: ArrayView3<f32>,
    labels: ArrayView2<i64>,
    mask_state: ArrayView2<u8>,
    validity: &Validity,
) -> Result<f32> {
    let scored: Vec<_> = select_valid(logits, labels, mask_state, validity)?
        .into_iter()
        .filter_map(|(row, label)| label.map(|label| (row, label)))
        .collect();
    if scored.is_empty() {
        return Ok(0.0);
    }
    let total: f64 = scored
        .iter()
        .map(|(row, label)| log_sum_exp(row) - row[*label] as f64)
        .sum();
    Ok((total / scored.len() as f64) as f32)
}
