use pyo3::{exceptions::PyValueError, prelude::*, types::PyDict};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

pub mod checkpoint;
pub mod common;
pub mod config;
pub mod error;
pub mod eval;
pub mod masking;
pub mod metrics;
pub mod render;
pub mod vocab;
use common::{
    array2_from_rows, array3_from_rows, rows_from_array2, Sequence, IGNORE_LABEL_INDEX,
    MAX_SEQ_LEN,
};
use error::MlmError;
use masking::MaskingPolicy;
use metrics::{BoundMetric, Validity};
use vocab::{
    EventType, EventVocabulary, PerformanceConfigs, PerformanceEvent, PerformanceOneHotEncoding,
};

// Events cross the boundary as (event_type, event_value) tuples
type PyEvent = (String, i32);

fn event_to_py(event: &PerformanceEvent) -> PyEvent {
    (event.event_type.as_str().to_string(), event.event_value)
}

fn event_from_py((event_type, event_value): &PyEvent) -> PyResult<PerformanceEvent> {
    let event_type = event_type
        .parse::<EventType>()
        .map_err(|e| PyValueError::new_err(format!("{}: '{}'", e, event_type)))?;
    Ok(PerformanceEvent::new(event_type, *event_value))
}

fn validity_from_py(consider_mask: Option<Vec<u8>>) -> Validity {
    match consider_mask {
        None => Validity::AllMasked,
        Some(codes) => Validity::restricted_to(codes),
    }
}

type MetricInputs = (common::Logits, common::LabelBatch, common::MaskStateBatch, Validity);

fn metric_inputs(
    logits: Vec<Vec<Vec<f32>>>,
    labels: Vec<Vec<i64>>,
    masks: Option<Vec<Vec<u8>>>,
    consider_mask: Option<Vec<u8>>,
) -> error::Result<MetricInputs> {
    let masks = masks.ok_or_else(|| {
        MlmError::config("Masks are needed to evaluate MLM, else all tokens will be considered!")
    })?;
    Ok((
        array3_from_rows(logits)?,
        array2_from_rows(labels)?,
        array2_from_rows(masks)?,
        validity_from_py(consider_mask),
    ))
}

/// One-hot performance vocabulary, looked up by performance config name.
#[pyclass(name = "PerfVocabulary")]
pub struct PyPerfVocabulary {
    encoding: PerformanceOneHotEncoding,
}

#[pymethods]
impl PyPerfVocabulary {
    #[new]
    fn new(perf_config_name: &str) -> PyResult<Self> {
        let configs = PerformanceConfigs::builtin();
        Ok(Self {
            encoding: configs.get(perf_config_name)?.encoding(),
        })
    }

    #[getter]
    fn num_classes(&self) -> usize {
        self.encoding.num_classes()
    }

    fn decode_event(&self, class_index: u32) -> PyResult<PyEvent> {
        Ok(event_to_py(&self.encoding.decode_event(class_index)?))
    }

    fn encode_event(&self, event: PyEvent) -> PyResult<u32> {
        Ok(self.encoding.encode_event(&event_from_py(&event)?)?)
    }
}

#[pyclass(name = "BoundMetric")]
pub struct PyBoundMetric {
    inner: BoundMetric,
}

#[pymethods]
impl PyBoundMetric {
    #[getter(__name__)]
    fn name(&self) -> String {
        self.inner.name().to_string()
    }

    #[pyo3(signature = (logits, labels, masks=None, consider_mask=None))]
    fn __call__(
        &self,
        logits: Vec<Vec<Vec<f32>>>,
        labels: Vec<Vec<i64>>,
        masks: Option<Vec<Vec<u8>>>,
        consider_mask: Option<Vec<u8>>,
    ) -> PyResult<f32> {
        let (logits, labels, masks, validity) =
            metric_inputs(logits, labels, masks, consider_mask)?;
        Ok(self
            .inner
            .evaluate(logits.view(), labels.view(), masks.view(), &validity)?)
    }
}

/// Masks a batch of performance token ids for MLM training.
///
/// Returns `(inputs, labels, mask_state)`, each shaped like `input_ids`.
#[pyfunction]
#[pyo3(signature = (
    input_ids,
    vocab,
    mask_prob=0.15,
    special_types=None,
    attention_mask=None,
    seed=None,
    max_seq_len=MAX_SEQ_LEN,
))]
fn mask_perf_tokens(
    input_ids: Vec<Sequence>,
    vocab: PyRef<'_, PyPerfVocabulary>,
    mask_prob: f64,
    special_types: Option<Vec<String>>,
    attention_mask: Option<Vec<Vec<bool>>>,
    seed: Option<u64>,
    max_seq_len: usize,
) -> PyResult<(Vec<Sequence>, Vec<Vec<i64>>, Vec<Vec<u8>>)> {
    let special_types = special_types
        .unwrap_or_default()
        .iter()
        .map(|s| {
            s.parse::<EventType>()
                .map_err(|e| PyValueError::new_err(format!("{}: '{}'", e, s)))
        })
        .collect::<PyResult<Vec<_>>>()?;
    let policy = MaskingPolicy::builder()
        .mask_prob(mask_prob)
        .special_types(special_types)
        .max_seq_len(max_seq_len)
        .build()?;

    let input_ids = array2_from_rows(input_ids)?;
    let attention_mask = attention_mask.map(array2_from_rows).transpose()?;
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let masked = policy.mask(&vocab.encoding, &input_ids, attention_mask.as_ref(), &mut rng)?;
    Ok((
        rows_from_array2(&masked.inputs),
        rows_from_array2(&masked.labels),
        rows_from_array2(&masked.mask_state),
    ))
}

#[pyfunction(name = "cross_entropy_loss")]
#[pyo3(signature = (logits, labels, masks=None, consider_mask=None))]
fn py_cross_entropy_loss(
    logits: Vec<Vec<Vec<f32>>>,
    labels: Vec<Vec<i64>>,
    masks: Option<Vec<Vec<u8>>>,
    consider_mask: Option<Vec<u8>>,
) -> PyResult<f32> {
    let (logits, labels, masks, validity) = metric_inputs(logits, labels, masks, consider_mask)?;
    Ok(metrics::cross_entropy_loss(
        logits.view(),
        labels.view(),
        masks.view(),
        &validity,
    )?)
}

#[pyfunction(name = "hits_at_k")]
#[pyo3(signature = (logits, labels, k=3, masks=None, consider_mask=None))]
fn py_hits_at_k(
    logits: Vec<Vec<Vec<f32>>>,
    labels: Vec<Vec<i64>>,
    k: usize,
    masks: Option<Vec<Vec<u8>>>,
    consider_mask: Option<Vec<u8>>,
) -> PyResult<f32> {
    let (logits, labels, masks, validity) = metric_inputs(logits, labels, masks, consider_mask)?;
    Ok(metrics::hits_at_k(
        logits.view(),
        labels.view(),
        k,
        masks.view(),
        &validity,
    )?)
}

#[pyfunction(name = "accuracy_within_n")]
#[pyo3(signature = (logits, labels, n=1, masks=None, consider_mask=None))]
fn py_accuracy_within_n(
    logits: Vec<Vec<Vec<f32>>>,
    labels: Vec<Vec<i64>>,
    n: u32,
    masks: Option<Vec<Vec<u8>>>,
    consider_mask: Option<Vec<u8>>,
) -> PyResult<f32> {
    let (logits, labels, masks, validity) = metric_inputs(logits, labels, masks, consider_mask)?;
    Ok(metrics::accuracy_within_n(
        logits.view(),
        labels.view(),
        n,
        masks.view(),
        &validity,
    )?)
}

/// Binds keyword arguments onto a metric, e.g. `bind_metric("hits_at_k", k=5)`.
#[pyfunction(name = "bind_metric")]
#[pyo3(signature = (func, **kwargs))]
fn py_bind_metric(func: &str, kwargs: Option<&Bound<'_, PyDict>>) -> PyResult<PyBoundMetric> {
    let mut args: Vec<(String, i64)> = Vec::new();
    if let Some(kwargs) = kwargs {
        for (key, value) in kwargs.iter() {
            args.push((key.extract()?, value.extract()?));
        }
    }
    let args: Vec<(&str, i64)> = args.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    Ok(PyBoundMetric {
        inner: metrics::bind_metric(func, &args)?,
    })
}

#[pyfunction]
#[pyo3(signature = (logits, decoder=None, idx=None))]
fn decode_batch_perf_logits(
    logits: Vec<Vec<Vec<f32>>>,
    decoder: Option<PyRef<'_, PyPerfVocabulary>>,
    idx: Option<usize>,
) -> PyResult<Vec<Vec<PyEvent>>> {
    let decoder = decoder.ok_or_else(|| MlmError::config("Decoder is required"))?;
    let logits = array3_from_rows(logits)?;
    let decoded = render::decode_batch_perf_logits(logits.view(), &decoder.encoding, idx)?;
    Ok(decoded
        .iter()
        .map(|seq| seq.iter().map(event_to_py).collect())
        .collect())
}

#[pyfunction]
#[pyo3(signature = (logits, decoder=None))]
fn decode_perf_logits(
    logits: Vec<Vec<Vec<f32>>>,
    decoder: Option<PyRef<'_, PyPerfVocabulary>>,
) -> PyResult<Vec<PyEvent>> {
    let decoder = decoder.ok_or_else(|| MlmError::config("Decoder is required"))?;
    let logits = array3_from_rows(logits)?;
    let decoded = render::decode_perf_logits(logits.view(), &decoder.encoding)?;
    Ok(decoded.iter().map(event_to_py).collect())
}

#[pyfunction]
fn logits_to_ids(logits: Vec<Vec<Vec<f32>>>) -> PyResult<Vec<u32>> {
    let logits = array3_from_rows(logits)?;
    Ok(render::logits_to_ids(logits.view())?)
}

#[pyfunction]
fn render_perf_seq(perf_seq: Vec<PyEvent>) -> PyResult<String> {
    let events = perf_seq
        .iter()
        .map(event_from_py)
        .collect::<PyResult<Vec<_>>>()?;
    Ok(render::render_perf_seq(&events))
}

#[pyfunction]
fn print_perf_seq(perf_seq: Vec<PyEvent>) -> PyResult<()> {
    println!("{}", render_perf_seq(perf_seq)?);
    Ok(())
}

/// Routes this module's `tracing` output to stderr. `RUST_LOG` wins over
/// `level` when set; calling it again keeps the first subscriber.
#[pyfunction]
#[pyo3(signature = (level="info"))]
fn init_logging(level: &str) -> PyResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    Ok(())
}

/// A Python module implemented in Rust.
#[pymodule]
fn perfmlm_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyPerfVocabulary>()?;
    m.add_class::<PyBoundMetric>()?;
    m.add_function(wrap_pyfunction!(mask_perf_tokens, m)?)?;
    m.add_function(wrap_pyfunction!(py_cross_entropy_loss, m)?)?;
    m.add_function(wrap_pyfunction!(py_hits_at_k, m)?)?;
    m.add_function(wrap_pyfunction!(py_accuracy_within_n, m)?)?;
    m.add_function(wrap_pyfunction!(py_bind_metric, m)?)?;
    m.add_function(wrap_pyfunction!(decode_batch_perf_logits, m)?)?;
    m.add_function(wrap_pyfunction!(decode_perf_logits, m)?)?;
    m.add_function(wrap_pyfunction!(logits_to_ids, m)?)?;
    m.add_function(wrap_pyfunction!(render_perf_seq, m)?)?;
    m.add_function(wrap_pyfunction!(print_perf_seq, m)?)?;
    m.add_function(wrap_pyfunction!(init_logging, m)?)?;
    m.add("IGNORE_LABEL_INDEX", IGNORE_LABEL_INDEX)?;
    m.add("MAX_SEQ_LEN", MAX_SEQ_LEN)?;
    Ok(())
}
