use ndarray::Array2;
use rand::Rng;
use tracing::debug;

use crate::common::{
    LabelBatch, MaskCategory, MaskStateBatch, TokenBatch, IGNORE_LABEL_INDEX, MAX_SEQ_LEN,
};
use crate::error::{MlmError, Result};
use crate::vocab::{EventType, EventVocabulary};

/// Output of one masking pass. All three arrays share the input's shape.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedBatch {
    pub inputs: TokenBatch,
    pub labels: LabelBatch,
    pub mask_state: MaskStateBatch,
}

impl MaskedBatch {
    pub fn masked_count(&self) -> usize {
        self.mask_state.iter().filter(|&&m| m > 0).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaskingPolicy {
    mask_prob: f64,
    special_types: Vec<EventType>,
    max_seq_len: usize,
}

impl MaskingPolicy {
    pub fn builder() -> MaskingPolicyBuilder {
        MaskingPolicyBuilder::default()
    }

    pub fn mask_prob(&self) -> f64 {
        self.mask_prob
    }

    pub fn special_types(&self) -> &[EventType] {
        &self.special_types
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !(self.mask_prob > 0.0 && self.mask_prob <= 1.0) {
            return Err(format!(
                "mask probability must be in (0, 1], got {}",
                self.mask_prob
            ));
        }
        if self.max_seq_len == 0 {
            return Err("max_seq_len must be positive".to_string());
        }
        Ok(())
    }

    fn is_special(&self, event_type: EventType) -> bool {
        self.special_types.contains(&event_type)
    }

    /// Masks a `[batch, seq]` token batch.
    ///
    /// Every attended, non-pad position consumes one Bernoulli draw. Positions
    /// whose event type is special are masked regardless of the draw and get
    /// the velocity mask token; drawn positions get the default mask token.
    /// Padding (attention false or the pad id) is left untouched.
    pub fn mask<V, R>(
        &self,
        vocab: &V,
        input_ids: &TokenBatch,
        attention_mask: Option<&Array2<bool>>,
        rng: &mut R,
    ) -> Result<MaskedBatch>
    where
        V: EventVocabulary + ?Sized,
        R: Rng + ?Sized,
    {
        let (batch, seq_len) = input_ids.dim();
        if seq_len > self.max_seq_len {
            return Err(MlmError::invalid_argument(format!(
                "sequence length {} exceeds the maximum of {}",
                seq_len, self.max_seq_len
            )));
        }
        if let Some(attention_mask) = attention_mask {
            if attention_mask.dim() != input_ids.dim() {
                return Err(MlmError::shape_mismatch(
                    input_ids.shape(),
                    attention_mask.shape(),
                ));
            }
        }

        let mut inputs = input_ids.clone();
        let mut labels = LabelBatch::from_elem((batch, seq_len), IGNORE_LABEL_INDEX);
        let mut mask_state = MaskStateBatch::zeros((batch, seq_len));
        let pad_id = vocab.pad_id();

        for ((b, i), &token) in input_ids.indexed_iter() {
            let attended = attention_mask.map_or(true, |a| a[[b, i]]);
            if !attended || token == pad_id {
                continue;
            }
            let drawn = rng.random_bool(self.mask_prob);
            let event = vocab.decode_event(token)?;
            let category = if self.is_special(event.event_type) {
                MaskCategory::Special
            } else if drawn {
                MaskCategory::Generic
            } else {
                continue;
            };
            inputs[[b, i]] = match category {
                MaskCategory::Special => vocab.velocity_mask_id(),
                _ => vocab.default_mask_id(),
            };
            labels[[b, i]] = token as i64;
            mask_state[[b, i]] = category.code();
        }

        let masked = MaskedBatch {
            inputs,
            labels,
            mask_state,
        };
        debug!(
            batch,
            seq_len,
            masked = masked.masked_count(),
            "masked performance batch"
        );
        Ok(masked)
    }
}

pub struct MaskingPolicyBuilder {
    mask_prob: f64,
    special_types: Vec<EventType>,
    max_seq_len: usize,
}

impl Default for MaskingPolicyBuilder {
    fn default() -> Self {
        Self {
            mask_prob: 0.15,
            special_types: Vec::new(),
            max_seq_len: MAX_SEQ_LEN,
        }
    }
}

impl MaskingPolicyBuilder {
    pub fn mask_prob(mut self, prob: f64) -> Self {
        self.mask_prob = prob;
        self
    }

    pub fn special_types(mut self, types: impl IntoIterator<Item = EventType>) -> Self {
        self.special_types = types.into_iter().collect();
        self
    }

    pub fn max_seq_len(mut self, len: usize) -> Self {
        self.max_seq_len = len;
        self
    }

    pub fn build(self) -> Result<MaskingPolicy> {
        let mut policy = MaskingPolicy {
            mask_prob: self.mask_prob,
            special_types: self.special_types,
            max_seq_len: self.max_seq_len,
        };
        policy.special_types.sort();
        policy.special_types.dedup();

        policy.validate().map_err(MlmError::Config)?;
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::{PerformanceEvent, PerformanceOneHotEncoding};
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn vocab() -> PerformanceOneHotEncoding {
        PerformanceOneHotEncoding::new(0, 127, 100, 32)
    }

    fn velocity(enc: &PerformanceOneHotEncoding, v: i32) -> u32 {
        enc.encode_event(&PerformanceEvent::new(EventType::Velocity, v))
            .unwrap()
    }

    #[test]
    fn test_mask_everything() {
        let enc = vocab();
        let policy = MaskingPolicy::builder().mask_prob(1.0).build().unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let input_ids = array![[5u32, 5, 5, 5]];
        let out = policy.mask(&enc, &input_ids, None, &mut rng).unwrap();
        assert_eq!(out.inputs, array![[1u32, 1, 1, 1]]);
        assert_eq!(out.labels, array![[5i64, 5, 5, 5]]);
        assert_eq!(out.mask_state, array![[1u8, 1, 1, 1]]);
    }

    #[test]
    fn test_invalid_probability() {
        for p in [0.0, -0.1, 1.5, f64::NAN] {
            let res = MaskingPolicy::builder().mask_prob(p).build();
            assert!(matches!(res, Err(MlmError::Config(_))), "p = {}", p);
        }
    }

    #[test]
    fn test_special_tokens_always_masked() {
        let enc = vocab();
        let v3 = velocity(&enc, 3);
        let v9 = velocity(&enc, 9);
        let policy = MaskingPolicy::builder()
            .mask_prob(1e-9)
            .special_types([EventType::Velocity])
            .build()
            .unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let input_ids = array![[10u32, v3, 40, v9], [v9, 11, 12, 13]];
        let out = policy.mask(&enc, &input_ids, None, &mut rng).unwrap();
        assert_eq!(out.mask_state, array![[0u8, 2, 0, 2], [2, 0, 0, 0]]);
        assert_eq!(out.inputs, array![[10u32, 2, 40, 2], [2, 11, 12, 13]]);
        assert_eq!(
            out.labels,
            array![
                [IGNORE_LABEL_INDEX, v3 as i64, IGNORE_LABEL_INDEX, v9 as i64],
                [v9 as i64, IGNORE_LABEL_INDEX, IGNORE_LABEL_INDEX, IGNORE_LABEL_INDEX]
            ]
        );
    }

    #[test]
    fn test_padding_is_never_masked() {
        let enc = vocab();
        let policy = MaskingPolicy::builder().mask_prob(1.0).build().unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let input_ids = array![[7u32, 8, 9, 0]];
        let attention = array![[true, true, false, false]];
        let out = policy
            .mask(&enc, &input_ids, Some(&attention), &mut rng)
            .unwrap();
        assert_eq!(out.mask_state, array![[1u8, 1, 0, 0]]);
        assert_eq!(out.inputs, array![[1u32, 1, 9, 0]]);
        assert_eq!(out.labels[[0, 2]], IGNORE_LABEL_INDEX);
    }

    #[test]
    fn test_label_and_state_invariants() {
        let enc = vocab();
        let v5 = velocity(&enc, 5);
        let policy = MaskingPolicy::builder()
            .mask_prob(0.3)
            .special_types([EventType::Velocity])
            .build()
            .unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let input_ids = TokenBatch::from_shape_fn((4, 64), |(b, i)| {
            if (b + i) % 5 == 0 {
                v5
            } else {
                3 + ((b * 64 + i) % 200) as u32
            }
        });
        let out = policy.mask(&enc, &input_ids, None, &mut rng).unwrap();
        assert_eq!(out.inputs.dim(), input_ids.dim());
        assert_eq!(out.labels.dim(), input_ids.dim());
        assert_eq!(out.mask_state.dim(), input_ids.dim());
        for ((b, i), &state) in out.mask_state.indexed_iter() {
            if state == 0 {
                assert_eq!(out.labels[[b, i]], IGNORE_LABEL_INDEX);
                assert_eq!(out.inputs[[b, i]], input_ids[[b, i]]);
            } else {
                assert_eq!(out.labels[[b, i]], input_ids[[b, i]] as i64);
                let expected = if state == 2 { 2 } else { 1 };
                assert_eq!(out.inputs[[b, i]], expected);
            }
        }
    }

    #[test]
    fn test_seeded_masking_is_reproducible() {
        let enc = vocab();
        let policy = MaskingPolicy::builder().mask_prob(0.5).build().unwrap();
        let input_ids = TokenBatch::from_shape_fn((2, 32), |(b, i)| 3 + (b * 32 + i) as u32);
        let a = policy
            .mask(&enc, &input_ids, None, &mut StdRng::seed_from_u64(99))
            .unwrap();
        let b = policy
            .mask(&enc, &input_ids, None, &mut StdRng::seed_from_u64(99))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_long_and_unknown_tokens() {
        let enc = vocab();
        let policy = MaskingPolicy::builder()
            .mask_prob(0.5)
            .max_seq_len(4)
            .build()
            .unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let too_long = TokenBatch::from_elem((1, 5), 5);
        assert!(matches!(
            policy.mask(&enc, &too_long, None, &mut rng),
            Err(MlmError::InvalidArgument(_))
        ));
        let unknown = array![[5u32, 100_000]];
        assert!(matches!(
            policy.mask(&enc, &unknown, None, &mut rng),
            Err(MlmError::InvalidToken(100_000))
        ));
    }
}
