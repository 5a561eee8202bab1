//! In-memory fakes of every collaborator, for driving the pipeline in tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::collaborators::{
    ChangeRequestRef, ChangedPath, CommentPosition, DiffRefs, MetricsEngine, PostedComment,
    SourceControl, WorkingCopy,
};
use crate::errors::{HostError, RefactoryError, RefactoryResult};
use crate::inference::decoder::{OutputValue, RawOutput};
use crate::inference::predictor::{FeatureMatrix, InferenceRuntime, ModelSession};
use crate::metrics::adapter::{ClassMetrics, MethodMetrics};
use crate::models::Project;

pub const CHECKOUT_ROOT: &str = "/work/checkout";
pub const SERVICE_PATH: &str = "src/main/java/com/acme/Service.java";

pub fn change_request(number: i64) -> ChangeRequestRef {
    ChangeRequestRef {
        external_number: number,
        head_sha: format!("head{number}"),
        title: format!("Change {number}"),
        web_url: format!("https://host/acme/-/merge_requests/{number}"),
        diff_refs: DiffRefs {
            base_sha: "base".into(),
            head_sha: format!("head{number}"),
            start_sha: "start".into(),
        },
    }
}

pub fn changed(path: &str) -> ChangedPath {
    ChangedPath {
        old_path: path.to_string(),
        new_path: path.to_string(),
        deleted_file: false,
    }
}

/// A comment the fake host accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Posted {
    pub external_number: i64,
    pub new_path: String,
    pub line: u32,
    pub text: String,
}

#[derive(Default)]
pub struct FakeHost {
    pub open: Mutex<Vec<ChangeRequestRef>>,
    pub changes: Mutex<HashMap<i64, Vec<ChangedPath>>>,
    pub posted: Mutex<Vec<Posted>>,
    /// Lines on which a comment is refused.
    pub rejected_lines: Mutex<HashSet<u32>>,
    /// Change requests whose diff cannot be fetched.
    pub broken_diffs: Mutex<HashSet<i64>>,
    pub listing_fails: Mutex<bool>,
}

impl FakeHost {
    /// One open change request per number, each touching `SERVICE_PATH`.
    pub fn with_open(numbers: &[i64]) -> Self {
        let host = Self::default();
        for &n in numbers {
            host.open.lock().push(change_request(n));
            host.changes.lock().insert(n, vec![changed(SERVICE_PATH)]);
        }
        host
    }
}

impl SourceControl for FakeHost {
    fn list_open_change_requests(
        &self,
        _project: &Project,
    ) -> Result<Vec<ChangeRequestRef>, HostError> {
        if *self.listing_fails.lock() {
            return Err(HostError::Transient("listing unavailable".into()));
        }
        Ok(self.open.lock().clone())
    }

    fn get_change_request(
        &self,
        _project: &Project,
        external_number: i64,
    ) -> Result<ChangeRequestRef, HostError> {
        self.open
            .lock()
            .iter()
            .find(|c| c.external_number == external_number)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("change request {external_number}")))
    }

    fn changed_paths(
        &self,
        _project: &Project,
        external_number: i64,
    ) -> Result<Vec<ChangedPath>, HostError> {
        if self.broken_diffs.lock().contains(&external_number) {
            return Err(HostError::Transient("502 Bad Gateway".into()));
        }
        Ok(self.changes.lock().get(&external_number).cloned().unwrap_or_default())
    }

    fn post_comment(
        &self,
        _project: &Project,
        external_number: i64,
        position: &CommentPosition<'_>,
        text: &str,
    ) -> Result<PostedComment, HostError> {
        if self.rejected_lines.lock().contains(&position.new_line) {
            return Err(HostError::Rejected("line_code can't be blank".into()));
        }
        let mut posted = self.posted.lock();
        posted.push(Posted {
            external_number,
            new_path: position.new_path.to_string(),
            line: position.new_line,
            text: text.to_string(),
        });
        Ok(PostedComment { id: format!("note-{}", posted.len()) })
    }
}

#[derive(Default)]
pub struct FakeCheckout {
    pub checkouts: Mutex<Vec<String>>,
    pub fails: Mutex<bool>,
}

impl WorkingCopy for FakeCheckout {
    fn ensure_at_revision(&self, _project: &Project, sha: &str) -> RefactoryResult<PathBuf> {
        if *self.fails.lock() {
            return Err(RefactoryError::WorkingCopy("remote unreachable".into()));
        }
        self.checkouts.lock().push(sha.to_string());
        Ok(PathBuf::from(CHECKOUT_ROOT))
    }
}

/// Returns the same class results for every analysis.
pub struct FakeAnalyzer {
    pub classes: Vec<ClassMetrics>,
}

impl FakeAnalyzer {
    /// `Service` with a 10-line class body and one method per `(name, line, loc)`.
    pub fn service(methods: &[(&str, u32, u32)]) -> Self {
        let class = ClassMetrics {
            file: format!("{CHECKOUT_ROOT}/{SERVICE_PATH}"),
            class_name: "com.acme.Service".into(),
            loc: 10,
            methods: methods
                .iter()
                .map(|&(name, start_line, loc)| MethodMetrics {
                    method_name: name.to_string(),
                    start_line,
                    loc,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        Self { classes: vec![class] }
    }
}

impl MetricsEngine for FakeAnalyzer {
    fn analyze(&self, _root: &Path, _paths: &[PathBuf]) -> RefactoryResult<Vec<ClassMetrics>> {
        Ok(self.classes.clone())
    }
}

pub const LOC_MODEL_METADATA: &str = r#"{
    "id": "loc-model",
    "refactoring_type": "extract_method",
    "model_type": "fake",
    "feature_names": ["methodLoc", "startLine"],
    "message": "Consider extracting part of {unit_name} (line {line})"
}"#;

/// Scores P(true) as `loc / 100` from the first feature, capped at 1.
pub struct LocSession;

impl ModelSession for LocSession {
    fn metadata_description(&self) -> RefactoryResult<String> {
        Ok(LOC_MODEL_METADATA.to_string())
    }

    fn run(&self, input: &FeatureMatrix) -> RefactoryResult<RawOutput> {
        let mut labels = Vec::with_capacity(input.rows());
        let mut probs = Vec::with_capacity(input.rows() * 2);
        for i in 0..input.rows() {
            let p_true = (input.row(i)[0] / 100.0).min(1.0);
            labels.push(i64::from(p_true > 0.5));
            probs.extend([1.0 - p_true, p_true]);
        }
        Ok(RawOutput {
            labels: OutputValue::Int64 { shape: vec![input.rows()], data: labels },
            probabilities: OutputValue::Float32 { shape: vec![input.rows(), 2], data: probs },
        })
    }
}

#[derive(Default)]
pub struct FakeRuntime {
    pub loads: Mutex<usize>,
    pub fails: Mutex<bool>,
}

impl InferenceRuntime for FakeRuntime {
    fn load_model(&self, path: &Path) -> RefactoryResult<Box<dyn ModelSession>> {
        if *self.fails.lock() {
            return Err(RefactoryError::ModelLoad(format!("cannot read {}", path.display())));
        }
        *self.loads.lock() += 1;
        Ok(Box::new(LocSession))
    }
}

/// Shared handles to the fakes, kept by a test after moving boxed copies
/// into an orchestrator.
#[derive(Clone)]
pub struct Fakes {
    pub host: Arc<FakeHost>,
    pub checkout: Arc<FakeCheckout>,
    pub analyzer: Arc<FakeAnalyzer>,
    pub runtime: Arc<FakeRuntime>,
}

impl Fakes {
    pub fn new(host: FakeHost, analyzer: FakeAnalyzer) -> Self {
        Self {
            host: Arc::new(host),
            checkout: Arc::new(FakeCheckout::default()),
            analyzer: Arc::new(analyzer),
            runtime: Arc::new(FakeRuntime::default()),
        }
    }
}

impl<T: SourceControl + ?Sized> SourceControl for Arc<T> {
    fn list_open_change_requests(
        &self,
        project: &Project,
    ) -> Result<Vec<ChangeRequestRef>, HostError> {
        (**self).list_open_change_requests(project)
    }

    fn get_change_request(
        &self,
        project: &Project,
        external_number: i64,
    ) -> Result<ChangeRequestRef, HostError> {
        (**self).get_change_request(project, external_number)
    }

    fn changed_paths(
        &self,
        project: &Project,
        external_number: i64,
    ) -> Result<Vec<ChangedPath>, HostError> {
        (**self).changed_paths(project, external_number)
    }

    fn post_comment(
        &self,
        project: &Project,
        external_number: i64,
        position: &CommentPosition<'_>,
        text: &str,
    ) -> Result<PostedComment, HostError> {
        (**self).post_comment(project, external_number, position, text)
    }
}

impl<T: WorkingCopy + ?Sized> WorkingCopy for Arc<T> {
    fn ensure_at_revision(&self, project: &Project, sha: &str) -> RefactoryResult<PathBuf> {
        (**self).ensure_at_revision(project, sha)
    }
}

impl<T: MetricsEngine + ?Sized> MetricsEngine for Arc<T> {
    fn analyze(&self, root: &Path, paths: &[PathBuf]) -> RefactoryResult<Vec<ClassMetrics>> {
        (**self).analyze(root, paths)
    }
}

impl<T: InferenceRuntime + ?Sized> InferenceRuntime for Arc<T> {
    fn load_model(&self, path: &Path) -> RefactoryResult<Box<dyn ModelSession>> {
        (**self).load_model(path)
    }
}
