use ndarray::{ArrayView1, ArrayView2, ArrayView3};

use super::{select_valid, Validity};
use crate::error::{MlmError, Result};

/// Index of the largest logit; the first one wins on ties.
pub fn argmax(row: &ArrayView1<f32>) -> usize {
    let mut best = 0;
    for (j, &x) in row.iter().enumerate() {
        if x > row[best] {
            best = j;
        }
    }
    best
}

// Position of `label` in the ranking by descending logit, lower index first on ties.
fn rank_of(row: &ArrayView1<f32>, label: usize) -> usize {
    let target = row[label];
    row.iter()
        .enumerate()
        .filter(|&(j, &x)| x > target || (x == target && j < label))
        .count()
}

fn mean_of(hits: impl Iterator<Item = bool>, total: usize) -> f32 {
    (hits.filter(|&h| h).count() as f64 / total as f64) as f32
}

/// HITS@K: fraction of valid positions whose label is among the top `k` classes.
///
/// A valid position labelled with the ignore sentinel counts as a miss.
/// NaN when no position is valid.
pub fn hits_at_k(
    logits: ArrayView3<f32>,
    labels: ArrayView2<i64>,
    k: usize,
    mask_state: ArrayView2<u8>,
    validity: &Validity,
) -> Result<f32> {
    if k == 0 {
        return Err(MlmError::config("hits_at_k needs k >= 1"));
    }
    let selected = select_valid(logits, labels, mask_state, validity)?;
    if selected.is_empty() {
        return Ok(f32::NAN);
    }
    Ok(mean_of(
        selected
            .iter()
            .map(|(row, label)| label.is_some_and(|label| rank_of(row, label) < k)),
        selected.len(),
    ))
}

/// Fraction of valid positions where `|argmax - label| <= n`.
///
/// Only meaningful when neighbouring class ids are ordinal neighbours, as the
/// velocity bins are. NaN when no position is valid.
pub fn accuracy_within_n(
    logits: ArrayView3<f32>,
    labels: ArrayView2<i64>,
    n: u32,
    mask_state: ArrayView2<u8>,
    validity: &Validity,
) -> Result<f32> {
    let selected = select_valid(logits, labels, mask_state, validity)?;
    if selected.is_empty() {
        return Ok(f32::NAN);
    }
    Ok(mean_of(
        selected
            .iter()
            .map(|(row, label)| {
                label.is_some_and(|label| argmax(row).abs_diff(label) <= n as usize)
            }),
        selected.len(),
    ))
}
