//! Threshold, rank, and cap of scored candidates.
//!
//! The cap applies to successful placements: a candidate the host refuses
//! does not use up a slot, and the next-ranked candidate is tried instead.

use tracing::{debug, info, warn};

use crate::collaborators::PostedComment;
use crate::errors::HostError;
use crate::models::RecommendationCandidate;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelectionPolicy {
    pub min_probability: f32,
    pub max_recommendations: usize,
}

/// Indices of positive candidates at or above `min_probability`, most
/// confident first; equal probabilities keep discovery order.
pub fn rank(candidates: &[RecommendationCandidate], min_probability: f32) -> Vec<usize> {
    let mut eligible: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.label() && c.probability() >= min_probability)
        .map(|(index, _)| index)
        .collect();
    eligible.sort_by(|&a, &b| {
        candidates[b]
            .probability()
            .total_cmp(&candidates[a].probability())
    });
    eligible
}

/// The ranked candidates that would be recommended if every placement
/// succeeded.
pub fn select(
    candidates: &[RecommendationCandidate],
    policy: SelectionPolicy,
) -> Vec<&RecommendationCandidate> {
    rank(candidates, policy.min_probability)
        .into_iter()
        .take(policy.max_recommendations)
        .map(|index| &candidates[index])
        .collect()
}

/// Outcome of externalizing a ranked candidate list.
#[derive(Debug, Default)]
pub struct PlacementReport {
    /// Candidate indices that passed the threshold.
    pub eligible: usize,
    /// Indices of candidates now flagged as externalized, in placement order.
    pub placed: Vec<usize>,
    pub comments: Vec<PostedComment>,
    /// Indices whose placement the host refused or failed.
    pub failed: Vec<usize>,
}

/// Externalize ranked candidates until `max_recommendations` placements
/// succeed or the eligible list runs out.
///
/// Host failures are logged and skipped; a failed candidate is never
/// retried and keeps its flag unset.
pub fn place_recommendations<F>(
    candidates: &mut [RecommendationCandidate],
    policy: SelectionPolicy,
    mut post: F,
) -> PlacementReport
where
    F: FnMut(&RecommendationCandidate) -> Result<PostedComment, HostError>,
{
    let ranked = rank(candidates, policy.min_probability);
    let mut report = PlacementReport {
        eligible: ranked.len(),
        ..Default::default()
    };
    debug!(
        "{} of {} candidates meet the recommendation threshold {}",
        ranked.len(),
        candidates.len(),
        policy.min_probability
    );

    for index in ranked {
        if report.placed.len() >= policy.max_recommendations {
            break;
        }
        let candidate = &mut candidates[index];
        match post(candidate) {
            Ok(comment) => {
                candidate.mark_externalized();
                report.placed.push(index);
                report.comments.push(comment);
            }
            Err(e) => {
                warn!(
                    "Cannot place recommendation for {} at {}:{}: {}",
                    candidate.unit_name, candidate.new_path, candidate.line_number, e
                );
                report.failed.push(index);
            }
        }
    }

    info!(
        "Placed {} recommendations ({} failed attempts)",
        report.placed.len(),
        report.failed.len()
    );
    report
}
