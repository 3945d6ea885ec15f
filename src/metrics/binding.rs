use ndarray::{ArrayView2, ArrayView3};

use super::{accuracy_within_n, cross_entropy_loss, hits_at_k, Validity};
use crate::error::{MlmError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    CrossEntropy,
    HitsAtK { k: usize },
    AccuracyWithinN { n: u32 },
}

impl Metric {
    pub fn function_name(&self) -> &'static str {
        match self {
            Metric::CrossEntropy => "cross_entropy_loss",
            Metric::HitsAtK { .. } => "hits_at_k",
            Metric::AccuracyWithinN { .. } => "accuracy_within_n",
        }
    }

    pub fn evaluate(
        &self,
        logits: ArrayView3<f32>,
        labels: ArrayView2<i64>,
        mask_state: ArrayView2<u8>,
        validity: &Validity,
    ) -> Result<f32> {
        match *self {
            Metric::CrossEntropy => cross_entropy_loss(logits, labels, mask_state, validity),
            Metric::HitsAtK { k } => hits_at_k(logits, labels, k, mask_state, validity),
            Metric::AccuracyWithinN { n } => {
                accuracy_within_n(logits, labels, n, mask_state, validity)
            }
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = &'static str;

    // Unbound metrics carry the function defaults (k = 3, n = 1)
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cross_entropy_loss" => Ok(Metric::CrossEntropy),
            "hits_at_k" => Ok(Metric::HitsAtK { k: 3 }),
            "accuracy_within_n" => Ok(Metric::AccuracyWithinN { n: 1 }),
            _ => Err(
                "Invalid metric. Use 'cross_entropy_loss', 'hits_at_k' or 'accuracy_within_n'.",
            ),
        }
    }
}

/// A metric with some arguments fixed, named after the function and its
/// bound arguments, e.g. `hits_at_k_k3`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundMetric {
    name: String,
    metric: Metric,
}

impl BoundMetric {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn evaluate(
        &self,
        logits: ArrayView3<f32>,
        labels: ArrayView2<i64>,
        mask_state: ArrayView2<u8>,
        validity: &Validity,
    ) -> Result<f32> {
        self.metric.evaluate(logits, labels, mask_state, validity)
    }
}

impl From<Metric> for BoundMetric {
    fn from(metric: Metric) -> Self {
        BoundMetric {
            name: metric.function_name().to_string(),
            metric,
        }
    }
}

fn non_negative(function: &str, key: &str, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| {
        MlmError::config(format!("{}: {} must be non-negative, got {}", function, key, value))
    })
}

/// Binds `args` (in order) onto `function` and derives the display name.
pub fn bind_metric(function: &str, args: &[(&str, i64)]) -> Result<BoundMetric> {
    let mut metric: Metric = function.parse().map_err(MlmError::config)?;
    for &(key, value) in args {
        metric = match (metric, key) {
            (Metric::HitsAtK { .. }, "k") => Metric::HitsAtK {
                k: non_negative(function, key, value)? as usize,
            },
            (Metric::AccuracyWithinN { .. }, "n") => Metric::AccuracyWithinN {
                n: u32::try_from(non_negative(function, key, value)?)
                    .map_err(|_| MlmError::config(format!("{}: n is too large", function)))?,
            },
            _ => {
                return Err(MlmError::config(format!(
                    "{} takes no argument named '{}'",
                    function, key
                )))
            }
        };
    }

    let name = if args.is_empty() {
        function.to_string()
    } else {
        let arg_str = args
            .iter()
            .map(|(key, value)| format!("{}{}", key, value))
            .collect::<Vec<_>>()
            .join("_");
        format!("{}_{}", function, arg_str)
    };
    Ok(BoundMetric { name, metric })
}

/// Evaluates each metric over the same batch, keeping the given order.
pub fn evaluate_metrics(
    metrics: &[BoundMetric],
    logits: ArrayView3<f32>,
    labels: ArrayView2<i64>,
    mask_state: ArrayView2<u8>,
    validity: &Validity,
) -> Result<Vec<(String, f32)>> {
    metrics
        .iter()
        .map(|m| {
            m.evaluate(logits, labels, mask_state, validity)
                .map(|v| (m.name().to_string(), v))
        })
        .collect()
}
