//! Contracts of the external systems the pipeline drives.
//!
//! The source-control host, the local working copy, and the static-analysis
//! engine are all blocking calls; the pipeline never runs two of them at once.

use std::path::{Path, PathBuf};

use crate::errors::{HostError, RefactoryResult};
use crate::metrics::adapter::ClassMetrics;
use crate::models::Project;

/// Commits a comment position is anchored to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffRefs {
    pub base_sha: String,
    pub head_sha: String,
    pub start_sha: String,
}

/// An open change request as listed by the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeRequestRef {
    /// Project-scoped sequence number ("iid").
    pub external_number: i64,
    pub head_sha: String,
    pub title: String,
    pub web_url: String,
    pub diff_refs: DiffRefs,
}

/// One file touched by a change request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangedPath {
    pub old_path: String,
    pub new_path: String,
    pub deleted_file: bool,
}

/// Where a comment lands inside the diff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommentPosition<'a> {
    pub old_path: &'a str,
    pub new_path: &'a str,
    pub new_line: u32,
    pub diff_refs: &'a DiffRefs,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostedComment {
    pub id: String,
}

/// Source-control host client.
pub trait SourceControl: Send + Sync {
    fn list_open_change_requests(
        &self,
        project: &Project,
    ) -> Result<Vec<ChangeRequestRef>, HostError>;

    fn get_change_request(
        &self,
        project: &Project,
        external_number: i64,
    ) -> Result<ChangeRequestRef, HostError>;

    fn changed_paths(
        &self,
        project: &Project,
        external_number: i64,
    ) -> Result<Vec<ChangedPath>, HostError>;

    fn post_comment(
        &self,
        project: &Project,
        external_number: i64,
        position: &CommentPosition<'_>,
        text: &str,
    ) -> Result<PostedComment, HostError>;
}

/// Local checkout of a project, exclusively owned by the running pass.
pub trait WorkingCopy: Send + Sync {
    /// Fetch and force-checkout `sha`, returning the checkout root.
    ///
    /// Implementations report failures as `RefactoryError::WorkingCopy`.
    fn ensure_at_revision(&self, project: &Project, sha: &str) -> RefactoryResult<PathBuf>;
}

/// Static-analysis engine producing class results with nested method results.
pub trait MetricsEngine: Send + Sync {
    fn analyze(&self, root: &Path, restrict_to: &[PathBuf]) -> RefactoryResult<Vec<ClassMetrics>>;
}
