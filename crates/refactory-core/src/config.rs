//! Pipeline configuration: JSON file, environment overrides, validation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{RefactoryError, RefactoryResult};
use crate::selection::SelectionPolicy;

pub const ENV_MIN_PROBABILITY: &str = "REFACTORY_MIN_PROBABILITY";
pub const ENV_MAX_RECOMMENDATIONS: &str = "REFACTORY_MAX_RECOMMENDATIONS";
pub const ENV_MIN_METHOD_LOC: &str = "REFACTORY_MIN_METHOD_LOC";
pub const ENV_SCHEDULER_ENABLED: &str = "REFACTORY_SCHEDULER_ENABLED";
pub const ENV_DATABASE_PATH: &str = "REFACTORY_DATABASE_PATH";

/// A project the poller watches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Numeric project id on the source-control host.
    pub external_id: i64,
    pub name: String,
    /// Local checkout owned exclusively by the poller.
    pub working_copy: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub min_probability: f32,
    pub max_recommendations: usize,
    pub min_method_loc: u32,
    pub test_path_marker: String,
    pub model_paths: Vec<PathBuf>,
    pub inference_batch_size: usize,
    pub poll_interval_secs: u64,
    pub scheduler_enabled: bool,
    pub database_path: PathBuf,
    pub projects: Vec<ProjectConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_probability: 0.5,
            max_recommendations: 2,
            min_method_loc: 1,
            test_path_marker: "/src/test/".to_string(),
            model_paths: Vec::new(),
            inference_batch_size: 512,
            poll_interval_secs: 20,
            scheduler_enabled: true,
            database_path: PathBuf::from("refactory.db"),
            projects: Vec::new(),
        }
    }
}

fn parse_flag(key: &str, raw: &str) -> RefactoryResult<bool> {
    let v = raw.trim().to_lowercase();
    if matches!(v.as_str(), "1" | "true" | "yes" | "on") {
        Ok(true)
    } else if matches!(v.as_str(), "0" | "false" | "no" | "off") {
        Ok(false)
    } else {
        Err(RefactoryError::Config(format!("{key}: expected a boolean, got {raw:?}")))
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> RefactoryResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| RefactoryError::Config(format!("{key}: cannot parse {raw:?}")))
}

impl PipelineConfig {
    /// Read a JSON config file, apply environment overrides and validate.
    pub fn load(path: &Path) -> RefactoryResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config: PipelineConfig = serde_json::from_str(&text)?;
        config.apply_env_overrides()?;
        config.validate()?;
        tracing::info!(
            "Loaded configuration from {} ({} projects, {} models)",
            path.display(),
            config.projects.len(),
            config.model_paths.len()
        );
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> RefactoryResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key/value source.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> RefactoryResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MIN_PROBABILITY) {
            self.min_probability = parse_value(ENV_MIN_PROBABILITY, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_RECOMMENDATIONS) {
            self.max_recommendations = parse_value(ENV_MAX_RECOMMENDATIONS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MIN_METHOD_LOC) {
            self.min_method_loc = parse_value(ENV_MIN_METHOD_LOC, &raw)?;
        }
        if let Some(raw) = lookup(ENV_SCHEDULER_ENABLED) {
            self.scheduler_enabled = parse_flag(ENV_SCHEDULER_ENABLED, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DATABASE_PATH) {
            if !raw.trim().is_empty() {
                self.database_path = PathBuf::from(raw.trim());
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> RefactoryResult<()> {
        if !(0.0..=1.0).contains(&self.min_probability) {
            return Err(RefactoryError::Config(format!(
                "min_probability must be within [0, 1], got {}",
                self.min_probability
            )));
        }
        if self.inference_batch_size == 0 {
            return Err(RefactoryError::Config(
                "inference_batch_size must be at least 1".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for project in &self.projects {
            if !seen.insert(project.external_id) {
                return Err(RefactoryError::Config(format!(
                    "project {} is configured more than once",
                    project.external_id
                )));
            }
        }
        Ok(())
    }

    pub fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            min_probability: self.min_probability,
            max_recommendations: self.max_recommendations,
        }
    }

    pub fn project(&self, external_id: i64) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.external_id == external_id)
    }
}
