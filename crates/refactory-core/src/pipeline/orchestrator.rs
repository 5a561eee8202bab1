//! One polling pass over every configured project.
//!
//! Per change request there are two transactions: tracking commits on its
//! own before any work starts, and the scored candidates are stored together
//! with their externalization flags once placement has finished. A failing
//! change request never stops the others; a broken working copy stops the
//! rest of its project for this pass.

use std::collections::HashMap;

use tracing::{error, info, warn};

use crate::collaborators::{
    ChangeRequestRef, CommentPosition, MetricsEngine, SourceControl, WorkingCopy,
};
use crate::config::{PipelineConfig, ProjectConfig};
use crate::errors::{ErrorScope, RefactoryError, RefactoryResult};
use crate::inference::predictor::{describe_model, predict, InferenceRuntime};
use crate::message;
use crate::models::{Project, RecommendationCandidate};
use crate::pipeline::candidates::{build_candidates, CandidateRules, DiffIndex};
use crate::selection::place_recommendations;
use crate::store::Database;
use crate::tracker::IncrementalWorkTracker;

/// The external systems a pass talks to.
pub struct Collaborators {
    pub source_control: Box<dyn SourceControl>,
    pub working_copy: Box<dyn WorkingCopy>,
    pub metrics: Box<dyn MetricsEngine>,
    pub inference: Box<dyn InferenceRuntime>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeRequestReport {
    pub external_number: i64,
    pub candidates: usize,
    pub eligible: usize,
    pub placed: usize,
    pub failed_placements: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectReport {
    pub external_id: i64,
    pub processed: Vec<ChangeRequestReport>,
    /// Change requests abandoned after tracking, with the error that stopped them.
    pub failed: Vec<(i64, String)>,
    /// Set when the project was given up for this pass.
    pub aborted: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    pub projects: Vec<ProjectReport>,
}

impl PassReport {
    pub fn processed(&self) -> usize {
        self.projects.iter().map(|p| p.processed.len()).sum()
    }

    pub fn candidates(&self) -> usize {
        self.projects
            .iter()
            .flat_map(|p| &p.processed)
            .map(|c| c.candidates)
            .sum()
    }

    pub fn placed(&self) -> usize {
        self.projects
            .iter()
            .flat_map(|p| &p.processed)
            .map(|c| c.placed)
            .sum()
    }

    pub fn failed(&self) -> usize {
        self.projects.iter().map(|p| p.failed.len()).sum()
    }
}

pub struct Orchestrator {
    collaborators: Collaborators,
    db: Database,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        collaborators: Collaborators,
        db: Database,
        config: PipelineConfig,
    ) -> RefactoryResult<Self> {
        config.validate()?;
        if config.model_paths.is_empty() {
            warn!("No model paths configured; passes will only track change requests");
        }
        Ok(Self {
            collaborators,
            db,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Process every configured project in order. Never fails: project and
    /// change-request errors are logged and recorded in the report.
    pub fn poll_pass(&self) -> PassReport {
        info!("Polling {} projects for change requests", self.config.projects.len());
        let mut report = PassReport::default();
        for project_config in &self.config.projects {
            let project_report = match self.process_project(project_config) {
                Ok(project_report) => project_report,
                Err(e) => {
                    error!("Skipping project {} for this pass: {}", project_config.name, e);
                    ProjectReport {
                        external_id: project_config.external_id,
                        aborted: Some(e.to_string()),
                        ..Default::default()
                    }
                }
            };
            report.projects.push(project_report);
        }
        info!(
            "Finished polling: {} change requests processed, {} failed, {} recommendations placed",
            report.processed(),
            report.failed(),
            report.placed()
        );
        report
    }

    fn project(&self, project_config: &ProjectConfig) -> RefactoryResult<Project> {
        self.db.find_or_create_project(
            project_config.external_id,
            &project_config.name,
            &project_config.working_copy,
        )
    }

    /// Process every open, not yet tracked change request of one project.
    pub fn process_project(&self, project_config: &ProjectConfig) -> RefactoryResult<ProjectReport> {
        let project = self.project(project_config)?;
        let open = self
            .collaborators
            .source_control
            .list_open_change_requests(&project)?;
        info!("{} open change requests in {}", open.len(), project.name);

        let tracker = IncrementalWorkTracker::new(&self.db);
        let pending = tracker.pending(&project, open)?;

        let mut report = ProjectReport {
            external_id: project.external_id,
            ..Default::default()
        };
        for change_request in &pending {
            match self.process_change_request(&project, change_request) {
                Ok(Some(cr_report)) => report.processed.push(cr_report),
                Ok(None) => {}
                Err(e) => {
                    error!(
                        "Processing change request !{} of {} failed: {}",
                        change_request.external_number, project.name, e
                    );
                    report
                        .failed
                        .push((change_request.external_number, e.to_string()));
                    if e.scope() == ErrorScope::Project {
                        report.aborted = Some(e.to_string());
                        break;
                    }
                }
            }
        }
        Ok(report)
    }

    /// Process one change request by number, as a CI job would. Returns
    /// `None` if it had already been tracked.
    pub fn process_single(
        &self,
        project_external_id: i64,
        external_number: i64,
    ) -> RefactoryResult<Option<ChangeRequestReport>> {
        let project_config = self.config.project(project_external_id).ok_or_else(|| {
            RefactoryError::Config(format!("project {project_external_id} is not configured"))
        })?;
        let project = self.project(project_config)?;
        let change_request = self
            .collaborators
            .source_control
            .get_change_request(&project, external_number)?;
        self.process_change_request(&project, &change_request)
    }

    fn process_change_request(
        &self,
        project: &Project,
        change_request: &ChangeRequestRef,
    ) -> RefactoryResult<Option<ChangeRequestReport>> {
        let tracker = IncrementalWorkTracker::new(&self.db);
        let Some(tracked) = tracker.track(project, change_request)? else {
            return Ok(None);
        };
        info!("Found not yet processed change request \"{}\"", change_request.title);

        let mut report = ChangeRequestReport {
            external_number: change_request.external_number,
            ..Default::default()
        };

        let checkout = self
            .collaborators
            .working_copy
            .ensure_at_revision(project, &change_request.head_sha)?;
        let changed = self
            .collaborators
            .source_control
            .changed_paths(project, change_request.external_number)?;
        let diff = DiffIndex::new(changed, &self.config.test_path_marker);
        if diff.is_empty() {
            info!("No analyzable changes in !{}", change_request.external_number);
            return Ok(Some(report));
        }

        let classes = self.collaborators.metrics.analyze(&checkout, &diff.paths())?;
        let rules = CandidateRules {
            min_method_loc: self.config.min_method_loc,
        };

        let mut candidates: Vec<RecommendationCandidate> = Vec::new();
        let mut templates: HashMap<String, String> = HashMap::new();
        for model_path in &self.config.model_paths {
            let session = self.collaborators.inference.load_model(model_path)?;
            let described = describe_model(session.as_ref(), &model_path.to_string_lossy())?;
            let model = self.db.find_or_create_model(&described)?;

            let mut scored = build_candidates(tracked.id, &model, &classes, &diff, &checkout, rules);
            predict(
                session.as_ref(),
                &model,
                &mut scored,
                self.config.inference_batch_size,
            )?;
            templates.insert(model.id.clone(), model.message_template.clone());
            candidates.extend(scored);
        }
        report.candidates = candidates.len();
        if candidates.is_empty() {
            info!("No candidates for !{}", change_request.external_number);
            return Ok(Some(report));
        }

        let source_control = &self.collaborators.source_control;
        let placement = place_recommendations(
            &mut candidates,
            self.config.selection_policy(),
            |candidate| {
                let template = templates
                    .get(&candidate.model_id)
                    .map(String::as_str)
                    .unwrap_or_default();
                let text = message::render(template, candidate);
                let position = CommentPosition {
                    old_path: &candidate.old_path,
                    new_path: &candidate.new_path,
                    new_line: candidate.line_number,
                    diff_refs: &change_request.diff_refs,
                };
                source_control.post_comment(
                    project,
                    change_request.external_number,
                    &position,
                    &text,
                )
            },
        );
        report.eligible = placement.eligible;
        report.placed = placement.placed.len();
        report.failed_placements = placement.failed.len();

        self.db.persist_candidates(&mut candidates)?;
        info!(
            "Created {} discussions on !{}",
            report.placed, change_request.external_number
        );
        Ok(Some(report))
    }
}
