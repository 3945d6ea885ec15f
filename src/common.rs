// Types and shared constants should be defined here
use ndarray::{Array2, Array3};

use crate::error::{MlmError, Result};

// Sequence usually refers to a single row of input_ids
pub type Sequence = Vec<u32>;

// Batched views, always [batch, seq] (or [batch, seq, vocab] for logits)
pub type TokenBatch = Array2<u32>;
pub type LabelBatch = Array2<i64>;
pub type MaskStateBatch = Array2<u8>;
pub type Logits = Array3<f32>;

/// Label written at every position that carries no loss signal.
pub const IGNORE_LABEL_INDEX: i64 = -100;

pub const MAX_SEQ_LEN: usize = 128;

/// Why a position was masked. Stored as its `u8` code in mask-state tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MaskCategory {
    None = 0,
    Generic = 1,
    // forced by a special event type, replaced with the velocity mask token
    Special = 2,
}

impl MaskCategory {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MaskCategory {
    type Error = u8;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            0 => Ok(MaskCategory::None),
            1 => Ok(MaskCategory::Generic),
            2 => Ok(MaskCategory::Special),
            other => Err(other),
        }
    }
}

/// Nested rows (the Python-side list-of-lists layout) into a `[batch, seq]`
/// array. Ragged rows are rejected.
pub fn array2_from_rows<T: Clone>(rows: Vec<Vec<T>>) -> Result<Array2<T>> {
    let batch = rows.len();
    let seq_len = rows.first().map_or(0, Vec::len);
    let mut flat = Vec::with_capacity(batch * seq_len);
    for (i, row) in rows.into_iter().enumerate() {
        if row.len() != seq_len {
            return Err(MlmError::ShapeMismatch {
                expected: format!("row {} of length {}", i, seq_len),
                actual: format!("length {}", row.len()),
            });
        }
        flat.extend(row);
    }
    Array2::from_shape_vec((batch, seq_len), flat)
        .map_err(|e| MlmError::invalid_argument(e.to_string()))
}

pub fn array3_from_rows(rows: Vec<Vec<Vec<f32>>>) -> Result<Logits> {
    let batch = rows.len();
    let seq_len = rows.first().map_or(0, Vec::len);
    let num_classes = rows
        .first()
        .and_then(|seq| seq.first())
        .map_or(0, Vec::len);
    let mut flat = Vec::with_capacity(batch * seq_len * num_classes);
    for (b, seq) in rows.into_iter().enumerate() {
        if seq.len() != seq_len {
            return Err(MlmError::ShapeMismatch {
                expected: format!("sequence {} of length {}", b, seq_len),
                actual: format!("length {}", seq.len()),
            });
        }
        for (i, row) in seq.into_iter().enumerate() {
            if row.len() != num_classes {
                return Err(MlmError::ShapeMismatch {
                    expected: format!("{} logits at [{}, {}]", num_classes, b, i),
                    actual: format!("{}", row.len()),
                });
            }
            flat.extend(row);
        }
    }
    Array3::from_shape_vec((batch, seq_len, num_classes), flat)
        .map_err(|e| MlmError::invalid_argument(e.to_string()))
}

pub fn rows_from_array2<T: Clone>(array: &Array2<T>) -> Vec<Vec<T>> {
    array.outer_iter().map(|row| row.to_vec()).collect()
}
