use std::collections::BTreeSet;

use ndarray::{Array, ArrayBase, Data, Dimension};

/// Which mask-state codes a metric is computed over.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Validity {
    /// Any masked position (`mask_state > 0`).
    #[default]
    AllMasked,
    /// Exactly the positions whose code is in the set.
    RestrictedTo(BTreeSet<u8>),
}

impl Validity {
    pub fn restricted_to(codes: impl IntoIterator<Item = u8>) -> Self {
        Validity::RestrictedTo(codes.into_iter().collect())
    }

    pub fn admits(&self, code: u8) -> bool {
        match self {
            Validity::AllMasked => code > 0,
            Validity::RestrictedTo(codes) => codes.contains(&code),
        }
    }
}

/// Pointwise validity mask, same shape as `mask_state`. May be all false.
pub fn resolve<S, D>(mask_state: &ArrayBase<S, D>, validity: &Validity) -> Array<bool, D>
where
    S: Data<Elem = u8>,
    D: Dimension,
{
    mask_state.map(|&code| validity.admits(code))
}
