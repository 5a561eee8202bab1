//! Turning the analysis results of one change request into unscored
//! recommendation candidates for one model.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::collaborators::ChangedPath;
use crate::metrics::adapter::{class_map, method_map, usage_map, ClassMetrics};
use crate::metrics::assembler::{assemble_with_layout, FeatureLayout, MetricScope, UnitMaps};
use crate::models::{Model, RecommendationCandidate};

/// Line a class-level candidate is anchored to.
pub const CLASS_START_LINE: u32 = 1;

/// True if either side of the change lives under a test source tree.
/// Paths are matched as if rooted, so `src/test/...` at the top level counts.
pub fn is_test_path(path: &ChangedPath, marker: &str) -> bool {
    let under_marker = |p: &str| format!("/{}", p.trim_start_matches('/')).contains(marker);
    !marker.is_empty() && (under_marker(&path.old_path) || under_marker(&path.new_path))
}

/// Changed files eligible for analysis, keyed by their path relative to the
/// checkout root.
#[derive(Debug, Default)]
pub struct DiffIndex {
    by_new_path: HashMap<PathBuf, ChangedPath>,
}

impl DiffIndex {
    /// Drop deleted files and test sources.
    pub fn new(changed: Vec<ChangedPath>, test_path_marker: &str) -> Self {
        let total = changed.len();
        let by_new_path: HashMap<PathBuf, ChangedPath> = changed
            .into_iter()
            .filter(|p| !p.deleted_file && !is_test_path(p, test_path_marker))
            .map(|p| (PathBuf::from(&p.new_path), p))
            .collect();
        info!("{} of {} changed files are eligible for analysis", by_new_path.len(), total);
        Self { by_new_path }
    }

    pub fn len(&self) -> usize {
        self.by_new_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_new_path.is_empty()
    }

    /// Relative paths to restrict the analysis to, sorted for determinism.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.by_new_path.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Find the change a result file belongs to. `file` may be absolute
    /// (inside `checkout_root`) or already relative.
    pub fn resolve(&self, checkout_root: &Path, file: &str) -> Option<&ChangedPath> {
        let file = Path::new(file);
        let relative = file.strip_prefix(checkout_root).unwrap_or(file);
        self.by_new_path.get(relative)
    }
}

/// Gates applied while building candidates.
#[derive(Clone, Copy, Debug)]
pub struct CandidateRules {
    pub min_method_loc: u32,
}

/// Build one candidate per scoreable class and per scoreable method whose
/// line count reaches `rules.min_method_loc`. Results for files outside
/// `diff` and units lacking a required feature are skipped.
pub fn build_candidates(
    change_request_id: i64,
    model: &Model,
    classes: &[ClassMetrics],
    diff: &DiffIndex,
    checkout_root: &Path,
    rules: CandidateRules,
) -> Vec<RecommendationCandidate> {
    let layout = FeatureLayout::new(&model.feature_names);
    let mut candidates = Vec::new();
    let mut unscoreable = 0usize;
    let mut unmatched = 0usize;

    for class in classes {
        let Some(changed) = diff.resolve(checkout_root, &class.file) else {
            debug!("Analysis result for {} is not part of the diff", class.file);
            unmatched += 1;
            continue;
        };
        let class_metrics = class_map(class);

        let class_maps = UnitMaps::new().with(MetricScope::Class, class_metrics.clone());
        match assemble_with_layout(&layout, &class_maps) {
            Ok(features) => candidates.push(RecommendationCandidate::new(
                change_request_id,
                &model.id,
                &changed.old_path,
                &changed.new_path,
                CLASS_START_LINE,
                &class.class_name,
                features,
            )),
            Err(e) => {
                debug!("Class {} lacks feature {}, skipping", class.class_name, e.missing);
                unscoreable += 1;
            }
        }

        for method in class.methods.iter().filter(|m| m.loc >= rules.min_method_loc) {
            let maps = UnitMaps::new()
                .with(MetricScope::Class, class_metrics.clone())
                .with(MetricScope::Method, method_map(method))
                .with(MetricScope::Usage, usage_map(method));
            match assemble_with_layout(&layout, &maps) {
                Ok(features) => candidates.push(RecommendationCandidate::new(
                    change_request_id,
                    &model.id,
                    &changed.old_path,
                    &changed.new_path,
                    method.start_line,
                    method.display_name(),
                    features,
                )),
                Err(e) => {
                    debug!(
                        "Method {} of {} lacks feature {}, skipping",
                        method.method_name, class.class_name, e.missing
                    );
                    unscoreable += 1;
                }
            }
        }
    }

    info!(
        "Built {} candidates for model {} ({} unscoreable, {} results outside the diff)",
        candidates.len(),
        model.id,
        unscoreable,
        unmatched
    );
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::adapter::MethodMetrics;
    use crate::models::DEFAULT_MESSAGE_TEMPLATE;

    fn changed(path: &str) -> ChangedPath {
        ChangedPath {
            old_path: path.to_string(),
            new_path: path.to_string(),
            deleted_file: false,
        }
    }

    fn model(features: &[&str]) -> Model {
        Model {
            id: "m1".into(),
            refactoring_type: String::new(),
            trained_on: String::new(),
            model_type: String::new(),
            model_path: "m.onnx".into(),
            message_template: DEFAULT_MESSAGE_TEMPLATE.into(),
            feature_names: features.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn method(name: &str, start_line: u32, loc: u32) -> MethodMetrics {
        MethodMetrics {
            method_name: name.into(),
            start_line,
            loc,
            ..Default::default()
        }
    }

    fn class(file: &str, methods: Vec<MethodMetrics>) -> ClassMetrics {
        ClassMetrics {
            file: file.into(),
            class_name: "com.acme.Service".into(),
            loc: 200,
            cbo: 5,
            methods,
            ..Default::default()
        }
    }

    const SERVICE: &str = "src/main/java/com/acme/Service.java";

    #[test]
    fn test_sources_and_deleted_files_are_excluded() {
        let mut deleted = changed("src/main/java/Gone.java");
        deleted.deleted_file = true;
        let index = DiffIndex::new(
            vec![changed(SERVICE), changed("core/src/test/java/ServiceTest.java"), deleted],
            "/src/test/",
        );
        assert_eq!(index.paths(), vec![PathBuf::from(SERVICE)]);
    }

    #[test]
    fn test_marker_matches_renamed_side() {
        let moved = ChangedPath {
            old_path: "a/src/test/java/T.java".into(),
            new_path: "a/src/main/java/T.java".into(),
            deleted_file: false,
        };
        assert!(is_test_path(&moved, "/src/test/"));
        assert!(!is_test_path(&moved, ""));
        assert!(is_test_path(&changed("src/test/java/RootTest.java"), "/src/test/"));
    }

    #[test]
    fn absolute_and_relative_result_files_resolve() {
        let index = DiffIndex::new(vec![changed(SERVICE)], "/src/test/");
        let root = Path::new("/work/repo");
        assert!(index.resolve(root, &format!("/work/repo/{SERVICE}")).is_some());
        assert!(index.resolve(root, SERVICE).is_some());
        assert!(index.resolve(root, "/elsewhere/Service.java").is_none());
    }

    #[test]
    fn class_and_sufficiently_large_methods_become_candidates() {
        let index = DiffIndex::new(vec![changed(SERVICE)], "/src/test/");
        let classes = vec![class(
            &format!("/repo/{SERVICE}"),
            vec![method("handle/1[int]", 30, 12), method("tiny/0", 50, 2)],
        )];
        let candidates = build_candidates(
            7,
            &model(&["classLoc", "classCbo"]),
            &classes,
            &index,
            Path::new("/repo"),
            CandidateRules { min_method_loc: 5 },
        );

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].unit_name, "com.acme.Service");
        assert_eq!(candidates[0].line_number, CLASS_START_LINE);
        assert_eq!(candidates[1].unit_name, "handle");
        assert_eq!(candidates[1].line_number, 30);
        assert_eq!(candidates[1].new_path, SERVICE);
        assert!(candidates.iter().all(|c| c.change_request_id == 7 && c.model_id == "m1"));
    }

    #[test]
    fn method_features_come_from_the_method_map() {
        let index = DiffIndex::new(vec![changed(SERVICE)], "/src/test/");
        let classes = vec![class(SERVICE, vec![method("run/0", 10, 40)])];
        let candidates = build_candidates(
            1,
            &model(&["classLoc", "methodLoc", "methodStartLine"]),
            &classes,
            &index,
            Path::new("/repo"),
            CandidateRules { min_method_loc: 1 },
        );
        // The class-level unit has no `startLine` and is unscoreable.
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].features, vec![200.0, 40.0, 10.0]);
    }

    #[test]
    fn same_named_local_variable_does_not_fill_a_metric() {
        let index = DiffIndex::new(vec![changed(SERVICE)], "/src/test/");
        let mut run = method("run/0", 10, 40);
        run.variables_usage.insert("fanOut".into(), 7);
        let classes = vec![class(SERVICE, vec![run])];
        let candidates = build_candidates(
            1,
            &model(&["methodFanOut"]),
            &classes,
            &index,
            Path::new("/repo"),
            CandidateRules { min_method_loc: 1 },
        );
        assert!(candidates.is_empty());
    }

    #[test]
    fn method_features_make_the_class_unit_unscoreable() {
        let index = DiffIndex::new(vec![changed(SERVICE)], "/src/test/");
        let classes = vec![class(SERVICE, vec![method("run/0", 10, 40)])];
        let candidates = build_candidates(
            1,
            &model(&["methodLoc"]),
            &classes,
            &index,
            Path::new("/repo"),
            CandidateRules { min_method_loc: 1 },
        );
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].unit_name, "run");
        assert_eq!(candidates[0].features, vec![40.0]);
    }

    #[test]
    fn results_outside_the_diff_are_ignored() {
        let index = DiffIndex::new(vec![changed(SERVICE)], "/src/test/");
        let classes = vec![class("src/main/java/Other.java", vec![method("run/0", 3, 9)])];
        let candidates = build_candidates(
            1,
            &model(&["classLoc"]),
            &classes,
            &index,
            Path::new("/repo"),
            CandidateRules { min_method_loc: 1 },
        );
        assert!(candidates.is_empty());
    }
}
