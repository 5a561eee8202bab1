//! Per-project record of which change requests have begun processing.
//!
//! A change request moves from [`TrackState::Unknown`] to
//! [`TrackState::Tracked`] exactly once, before any expensive work is done
//! for it. A crash after that point loses its recommendations rather than
//! posting them twice.

use tracing::{debug, info};

use crate::collaborators::ChangeRequestRef;
use crate::errors::RefactoryResult;
use crate::models::{Project, TrackedChangeRequest};
use crate::store::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Unknown,
    Tracked,
}

pub struct IncrementalWorkTracker<'a> {
    db: &'a Database,
}

impl<'a> IncrementalWorkTracker<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn state(&self, project: &Project, external_number: i64) -> RefactoryResult<TrackState> {
        Ok(if self.is_tracked(project, external_number)? {
            TrackState::Tracked
        } else {
            TrackState::Unknown
        })
    }

    pub fn is_tracked(&self, project: &Project, external_number: i64) -> RefactoryResult<bool> {
        self.db.is_change_request_tracked(project.id, external_number)
    }

    /// Mark `change_request` as started, committing immediately.
    ///
    /// Returns `None` if it was already tracked; the storage layer's unique
    /// key makes this safe even without a prior [`Self::is_tracked`] check.
    pub fn track(
        &self,
        project: &Project,
        change_request: &ChangeRequestRef,
    ) -> RefactoryResult<Option<TrackedChangeRequest>> {
        let tracked = self.db.track_change_request(project.id, change_request)?;
        match &tracked {
            Some(row) => debug!(
                "Tracking change request !{} of {} as #{}",
                change_request.external_number, project.name, row.id
            ),
            None => debug!(
                "Change request !{} of {} was already tracked",
                change_request.external_number, project.name
            ),
        }
        Ok(tracked)
    }

    /// The subset of `open` that has never been tracked, in listing order.
    pub fn pending(
        &self,
        project: &Project,
        open: Vec<ChangeRequestRef>,
    ) -> RefactoryResult<Vec<ChangeRequestRef>> {
        let total = open.len();
        let mut pending = Vec::with_capacity(total);
        for change_request in open {
            if !self.is_tracked(project, change_request.external_number)? {
                pending.push(change_request);
            }
        }
        info!(
            "Found {} not yet processed of {} open change requests in {}",
            pending.len(),
            total,
            project.name
        );
        Ok(pending)
    }

    /// Move a change request back to `Unknown`, discarding its candidates,
    /// so that the next pass processes it again.
    pub fn forget(&self, project: &Project, external_number: i64) -> RefactoryResult<bool> {
        let removed = self.db.delete_change_request(project.id, external_number)?;
        if removed {
            info!("Forgot change request !{} of {}", external_number, project.name);
        }
        Ok(removed)
    }
}
