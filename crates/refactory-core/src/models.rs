//! Shared typed models used across the pipeline, storage, and selection layers.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{RefactoryError, RefactoryResult};

/// Message used when a model's metadata does not carry its own template.
pub const DEFAULT_MESSAGE_TEMPLATE: &str =
    "Consider extracting part of \"{unit_name}\" to a separate method. \
     ([More info](https://refactoring.com/catalog/extractFunction.html))";

// ---------------------------------------------------------------------------
// Project / change request
// ---------------------------------------------------------------------------

/// A tracked source-control project.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Project {
    pub id: i64,
    pub external_id: i64,
    pub name: String,
    pub working_copy: PathBuf,
}

/// Marker that processing of a change request has started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedChangeRequest {
    pub id: i64,
    pub project_id: i64,
    pub external_number: i64,
    pub head_sha: String,
    pub title: String,
    pub web_url: String,
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// A trained classifier, immutable once stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Model {
    pub id: String,
    pub refactoring_type: String,
    pub trained_on: String,
    pub model_type: String,
    pub model_path: String,
    pub message_template: String,
    /// Ordered exactly as the classifier was trained.
    pub feature_names: Vec<String>,
}

/// JSON document embedded in an exported model's metadata description.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ModelDescriptor {
    pub id: String,
    #[serde(default)]
    pub refactoring_type: String,
    #[serde(default)]
    pub trained_on: String,
    #[serde(default)]
    pub model_type: String,
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ModelDescriptor {
    /// Parse the metadata description of a loaded model session.
    pub fn from_metadata(description: &str) -> RefactoryResult<Self> {
        let descriptor: ModelDescriptor = serde_json::from_str(description)?;
        if descriptor.id.trim().is_empty() {
            return Err(RefactoryError::ModelLoad(
                "model metadata has an empty id".to_string(),
            ));
        }
        if descriptor.feature_names.is_empty() {
            return Err(RefactoryError::ModelLoad(format!(
                "model {} declares no feature names",
                descriptor.id
            )));
        }
        Ok(descriptor)
    }

    pub fn into_model(self, model_path: &str) -> Model {
        Model {
            id: self.id,
            refactoring_type: self.refactoring_type,
            trained_on: self.trained_on,
            model_type: self.model_type,
            model_path: model_path.to_string(),
            message_template: self
                .message
                .unwrap_or_else(|| DEFAULT_MESSAGE_TEMPLATE.to_string()),
            feature_names: self.feature_names,
        }
    }
}

// ---------------------------------------------------------------------------
// Prediction / candidate
// ---------------------------------------------------------------------------

/// Decoded classifier output for one feature vector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prediction {
    pub label: bool,
    /// Confidence in `label`, not in the positive class.
    pub probability: f32,
}

/// One scoring unit (a class or a method) of one change request under one model.
#[derive(Clone, Debug, PartialEq)]
pub struct RecommendationCandidate {
    pub id: Option<i64>,
    pub change_request_id: i64,
    pub model_id: String,
    pub old_path: String,
    pub new_path: String,
    pub line_number: u32,
    pub unit_name: String,
    pub features: Vec<f32>,
    pub prediction: Option<Prediction>,
    externalized: bool,
}

impl RecommendationCandidate {
    pub fn new(
        change_request_id: i64,
        model_id: &str,
        old_path: &str,
        new_path: &str,
        line_number: u32,
        unit_name: &str,
        features: Vec<f32>,
    ) -> Self {
        Self {
            id: None,
            change_request_id,
            model_id: model_id.to_string(),
            old_path: old_path.to_string(),
            new_path: new_path.to_string(),
            line_number,
            unit_name: unit_name.to_string(),
            features,
            prediction: None,
            externalized: false,
        }
    }

    /// Rebuild a candidate from storage.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_row(
        id: i64,
        change_request_id: i64,
        model_id: String,
        old_path: String,
        new_path: String,
        line_number: u32,
        unit_name: String,
        features: Vec<f32>,
        prediction: Prediction,
        externalized: bool,
    ) -> Self {
        Self {
            id: Some(id),
            change_request_id,
            model_id,
            old_path,
            new_path,
            line_number,
            unit_name,
            features,
            prediction: Some(prediction),
            externalized,
        }
    }

    pub fn label(&self) -> bool {
        self.prediction.map(|p| p.label).unwrap_or(false)
    }

    pub fn probability(&self) -> f32 {
        self.prediction.map(|p| p.probability).unwrap_or(0.0)
    }

    pub fn is_externalized(&self) -> bool {
        self.externalized
    }

    /// One-way transition; there is no way back to `false`.
    pub fn mark_externalized(&mut self) {
        self.externalized = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_parses_metadata_and_defaults_message() {
        let json = r#"{
            "id": "5f0c1f7e-extract-method",
            "refactoring_type": "extract_method",
            "trained_on": "apache",
            "model_type": "random_forest",
            "feature_names": ["classLoc", "methodLoc"]
        }"#;
        let model = ModelDescriptor::from_metadata(json)
            .unwrap()
            .into_model("models/pipeline.onnx");
        assert_eq!(model.id, "5f0c1f7e-extract-method");
        assert_eq!(model.feature_names, vec!["classLoc", "methodLoc"]);
        assert_eq!(model.model_path, "models/pipeline.onnx");
        assert_eq!(model.message_template, DEFAULT_MESSAGE_TEMPLATE);
    }

    #[test]
    fn descriptor_without_features_is_rejected() {
        let json = r#"{"id": "m1", "feature_names": []}"#;
        assert!(matches!(
            ModelDescriptor::from_metadata(json),
            Err(RefactoryError::ModelLoad(_))
        ));
    }

    #[test]
    fn descriptor_with_invalid_json_is_a_json_error() {
        assert!(matches!(
            ModelDescriptor::from_metadata("not json"),
            Err(RefactoryError::Json(_))
        ));
    }

    #[test]
    fn externalization_flag_starts_false_and_only_flips_once() {
        let mut candidate =
            RecommendationCandidate::new(1, "m1", "A.java", "A.java", 10, "run", vec![1.0]);
        assert!(!candidate.is_externalized());
        candidate.mark_externalized();
        candidate.mark_externalized();
        assert!(candidate.is_externalized());
    }

    #[test]
    fn unscored_candidate_reports_negative_label() {
        let candidate =
            RecommendationCandidate::new(1, "m1", "A.java", "A.java", 10, "run", vec![1.0]);
        assert!(!candidate.label());
        assert_eq!(candidate.probability(), 0.0);
    }
}
