//! Running candidate feature vectors through a loaded classifier.

use std::path::Path;

use tracing::debug;

use crate::errors::{RefactoryError, RefactoryResult};
use crate::inference::decoder::{decode_output, RawOutput};
use crate::models::{Model, ModelDescriptor, RecommendationCandidate};

/// Dense row-major `rows x cols` input matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    /// Stack equally sized vectors; a length mismatch is an inference error.
    pub fn from_rows<'a, I>(cols: usize, rows: I) -> RefactoryResult<Self>
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        let mut data = Vec::new();
        let mut count = 0;
        for row in rows {
            if row.len() != cols {
                return Err(RefactoryError::Inference(format!(
                    "feature vector {count} has {} values, model expects {cols}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
            count += 1;
        }
        Ok(Self {
            rows: count,
            cols,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.cols..(index + 1) * self.cols]
    }
}

/// A classifier loaded into the inference runtime.
pub trait ModelSession {
    /// Free-form metadata description embedded in the exported model.
    fn metadata_description(&self) -> RefactoryResult<String>;

    /// Feed `input` as the model's `float_input` tensor.
    fn run(&self, input: &FeatureMatrix) -> RefactoryResult<RawOutput>;
}

/// Inference runtime capable of loading exported classifiers.
pub trait InferenceRuntime: Send + Sync {
    /// Implementations report failures as `RefactoryError::ModelLoad`.
    fn load_model(&self, path: &Path) -> RefactoryResult<Box<dyn ModelSession>>;
}

/// Read the model identity out of a loaded session.
pub fn describe_model(session: &dyn ModelSession, model_path: &str) -> RefactoryResult<Model> {
    let description = session.metadata_description()?;
    Ok(ModelDescriptor::from_metadata(&description)?.into_model(model_path))
}

/// Score `candidates` in batches of at most `batch_size`, filling in each
/// candidate's prediction. All candidates must belong to `model`.
pub fn predict(
    session: &dyn ModelSession,
    model: &Model,
    candidates: &mut [RecommendationCandidate],
    batch_size: usize,
) -> RefactoryResult<()> {
    let cols = model.feature_names.len();
    for batch in candidates.chunks_mut(batch_size.max(1)) {
        let matrix = FeatureMatrix::from_rows(cols, batch.iter().map(|c| c.features.as_slice()))?;
        debug!(
            "Running model {} on {} x {} input",
            model.id,
            matrix.rows(),
            matrix.cols()
        );
        let output = session.run(&matrix)?;
        let predictions = decode_output(&output, batch.len())?;
        for (candidate, prediction) in batch.iter_mut().zip(predictions) {
            candidate.prediction = Some(prediction);
        }
    }
    Ok(())
}
