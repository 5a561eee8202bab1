//! Decoding of classifier output tensors into per-sample predictions.
//!
//! Exported classifiers emit their class probabilities in one of two
//! physical encodings: a dense `[n][2]` float tensor, or a sequence of `n`
//! maps from class label to probability. The encoding is resolved here and
//! never leaks past [`decode`].

use std::collections::BTreeMap;

use crate::errors::{RefactoryError, RefactoryResult};
use crate::models::Prediction;

const POSITIVE_LABEL: i64 = 1;
const CLASS_COUNT: usize = 2;

/// A single named output of the inference runtime, as returned by it.
#[derive(Clone, Debug, PartialEq)]
pub enum OutputValue {
    Int64 { shape: Vec<usize>, data: Vec<i64> },
    Float32 { shape: Vec<usize>, data: Vec<f32> },
    MapSequence(Vec<BTreeMap<i64, f32>>),
}

impl OutputValue {
    fn describe(&self) -> String {
        match self {
            OutputValue::Int64 { shape, .. } => format!("int64 tensor {shape:?}"),
            OutputValue::Float32 { shape, .. } => format!("float32 tensor {shape:?}"),
            OutputValue::MapSequence(maps) => format!("sequence of {} maps", maps.len()),
        }
    }
}

/// Label and probability outputs of one inference run.
#[derive(Clone, Debug, PartialEq)]
pub struct RawOutput {
    pub labels: OutputValue,
    pub probabilities: OutputValue,
}

/// The two recognised probability encodings.
#[derive(Debug)]
enum ProbabilityLayout<'a> {
    /// Row-major `[n][2]`: column 0 is P(false), column 1 is P(true).
    Dense(&'a [f32]),
    LabelMaps(&'a [BTreeMap<i64, f32>]),
}

impl<'a> ProbabilityLayout<'a> {
    fn detect(value: &'a OutputValue, n: usize) -> RefactoryResult<Self> {
        match value {
            OutputValue::Float32 { shape, data }
                if shape.as_slice() == [n, CLASS_COUNT] && data.len() == n * CLASS_COUNT =>
            {
                Ok(ProbabilityLayout::Dense(data))
            }
            OutputValue::MapSequence(maps) if maps.len() == n => {
                Ok(ProbabilityLayout::LabelMaps(maps))
            }
            other => Err(RefactoryError::Decode(format!(
                "unrecognised probability output for batch of {n}: {}",
                other.describe()
            ))),
        }
    }

    fn probability(&self, index: usize, label: bool) -> RefactoryResult<f32> {
        let class = usize::from(label);
        match self {
            ProbabilityLayout::Dense(data) => Ok(data[index * CLASS_COUNT + class]),
            ProbabilityLayout::LabelMaps(maps) => {
                maps[index].get(&(class as i64)).copied().ok_or_else(|| {
                    RefactoryError::Decode(format!(
                        "probability map of sample {index} has no entry for class {class}"
                    ))
                })
            }
        }
    }
}

/// Extract the predicted class labels from the label output.
pub fn raw_labels(value: &OutputValue, n: usize) -> RefactoryResult<&[i64]> {
    match value {
        OutputValue::Int64 { shape, data }
            if data.len() == n && (shape.as_slice() == [n] || shape.as_slice() == [n, 1]) =>
        {
            Ok(data)
        }
        other => Err(RefactoryError::Decode(format!(
            "unrecognised label output for batch of {n}: {}",
            other.describe()
        ))),
    }
}

/// Reconstruct `(label, probability)` for each of the `n` samples.
///
/// The probability is the one of the *predicted* label. Whether it is always
/// at least 0.5 depends on the exported model and is not checked here.
pub fn decode(
    raw_labels: &[i64],
    probabilities: &OutputValue,
    n: usize,
) -> RefactoryResult<Vec<Prediction>> {
    if raw_labels.len() != n {
        return Err(RefactoryError::Decode(format!(
            "expected {n} labels, got {}",
            raw_labels.len()
        )));
    }
    let layout = ProbabilityLayout::detect(probabilities, n)?;

    let mut predictions = Vec::with_capacity(n);
    for (index, raw) in raw_labels.iter().enumerate() {
        let label = *raw == POSITIVE_LABEL;
        let probability = layout.probability(index, label)?;
        if !(0.0..=1.0).contains(&probability) {
            return Err(RefactoryError::Decode(format!(
                "probability {probability} of sample {index} is outside [0, 1]"
            )));
        }
        predictions.push(Prediction { label, probability });
    }
    Ok(predictions)
}

/// Decode a complete runtime output.
pub fn decode_output(output: &RawOutput, n: usize) -> RefactoryResult<Vec<Prediction>> {
    let labels = raw_labels(&output.labels, n)?;
    decode(labels, &output.probabilities, n)
}
