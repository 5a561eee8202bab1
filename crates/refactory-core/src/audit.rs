//! Sampling of stored candidates for human review of model quality.

use std::collections::HashSet;
use std::io::Write;

use crate::errors::RefactoryResult;
use crate::models::RecommendationCandidate;

pub const CSV_HEADER: &str = "new_path,unit_name,probability,line_number";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReviewSampling {
    pub positives: usize,
    /// Positive candidates need at least this confidence.
    pub positive_min_probability: f32,
    pub negatives: usize,
    /// Negative candidates need at most this confidence.
    pub negative_max_probability: f32,
}

impl Default for ReviewSampling {
    fn default() -> Self {
        Self {
            positives: 20,
            positive_min_probability: 0.85,
            negatives: 10,
            negative_max_probability: 0.60,
        }
    }
}

/// Reviewable sample: positives first, then negatives.
#[derive(Debug, Default)]
pub struct ReviewSample<'a> {
    pub positives: Vec<&'a RecommendationCandidate>,
    pub negatives: Vec<&'a RecommendationCandidate>,
}

impl<'a> ReviewSample<'a> {
    pub fn iter(&self) -> impl Iterator<Item = &'a RecommendationCandidate> + '_ {
        self.positives.iter().chain(self.negatives.iter()).copied()
    }
}

fn take_distinct<'a>(
    mut pool: Vec<&'a RecommendationCandidate>,
    limit: usize,
) -> Vec<&'a RecommendationCandidate> {
    pool.sort_by(|a, b| b.probability().total_cmp(&a.probability()));
    let mut seen = HashSet::new();
    pool.into_iter()
        .filter(|&c| seen.insert((c.new_path.as_str(), c.unit_name.as_str())))
        .take(limit)
        .collect()
}

/// Pick the most confident positives and negatives within the sampling
/// bounds, at most one per `(new_path, unit_name)` in each group.
pub fn sample_for_review(
    candidates: &[RecommendationCandidate],
    sampling: ReviewSampling,
) -> ReviewSample<'_> {
    let positives = candidates
        .iter()
        .filter(|c| c.prediction.is_some())
        .filter(|c| c.label() && c.probability() >= sampling.positive_min_probability)
        .collect();
    let negatives = candidates
        .iter()
        .filter(|c| c.prediction.is_some())
        .filter(|c| !c.label() && c.probability() <= sampling.negative_max_probability)
        .collect();
    ReviewSample {
        positives: take_distinct(positives, sampling.positives),
        negatives: take_distinct(negatives, sampling.negatives),
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn write_csv<W: Write>(out: &mut W, sample: &ReviewSample<'_>) -> RefactoryResult<()> {
    writeln!(out, "{CSV_HEADER}")?;
    for candidate in sample.iter() {
        writeln!(
            out,
            "{},{},{:.6},{}",
            csv_field(&candidate.new_path),
            csv_field(&candidate.unit_name),
            candidate.probability(),
            candidate.line_number
        )?;
    }
    Ok(())
}
