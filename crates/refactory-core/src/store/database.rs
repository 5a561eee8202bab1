//! SQLite storage layer for Refactory.
//!
//! A single connection guarded by a mutex; every operation that writes more
//! than one row does so inside its own transaction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::collaborators::ChangeRequestRef;
use crate::errors::{RefactoryError, RefactoryResult};
use crate::models::{Model, Prediction, Project, RecommendationCandidate, TrackedChangeRequest};
use crate::store::schema;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CANDIDATE_COLUMNS: &str = "id, change_request_id, model_id, old_path, new_path, \
     line_number, unit_name, features_json, label, probability, externalized";

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if text == "~" || text.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if text.len() > 2 {
                expanded.push(&text[2..]);
            }
            return expanded;
        }
    }
    path.to_path_buf()
}

/// Column values of one `recommendation_candidate` row before JSON decoding.
struct CandidateRow {
    id: i64,
    change_request_id: i64,
    model_id: String,
    old_path: String,
    new_path: String,
    line_number: u32,
    unit_name: String,
    features_json: String,
    label: bool,
    probability: f64,
    externalized: bool,
}

impl CandidateRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            change_request_id: row.get(1)?,
            model_id: row.get(2)?,
            old_path: row.get(3)?,
            new_path: row.get(4)?,
            line_number: row.get(5)?,
            unit_name: row.get(6)?,
            features_json: row.get(7)?,
            label: row.get(8)?,
            probability: row.get(9)?,
            externalized: row.get(10)?,
        })
    }

    fn into_candidate(self) -> RefactoryResult<RecommendationCandidate> {
        let features: Vec<f32> = serde_json::from_str(&self.features_json)?;
        Ok(RecommendationCandidate::from_row(
            self.id,
            self.change_request_id,
            self.model_id,
            self.old_path,
            self.new_path,
            self.line_number,
            self.unit_name,
            features,
            Prediction {
                label: self.label,
                probability: self.probability as f32,
            },
            self.externalized,
        ))
    }
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    let working_copy: String = row.get(3)?;
    Ok(Project {
        id: row.get(0)?,
        external_id: row.get(1)?,
        name: row.get(2)?,
        working_copy: PathBuf::from(working_copy),
    })
}

fn change_request_from_row(row: &Row<'_>) -> rusqlite::Result<TrackedChangeRequest> {
    Ok(TrackedChangeRequest {
        id: row.get(0)?,
        project_id: row.get(1)?,
        external_number: row.get(2)?,
        head_sha: row.get(3)?,
        title: row.get(4)?,
        web_url: row.get(5)?,
    })
}

/// SQLite store for projects, tracked change requests, models and
/// recommendation candidates.
pub struct Database {
    db_path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and bring its
    /// schema up to date. Parent directories are created.
    pub fn open(db_path: &Path) -> RefactoryResult<Self> {
        let expanded = expand_tilde(db_path);
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(&expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&resolved)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        let db = Self::init(conn, Some(resolved))?;
        if let Some(path) = db.path() {
            tracing::info!("Opened store at {}", path.display());
        }
        Ok(db)
    }

    pub fn open_in_memory() -> RefactoryResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, db_path: Option<PathBuf>) -> RefactoryResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::migrate_schema(&conn)?;
        Ok(Self {
            db_path,
            conn: Mutex::new(conn),
        })
    }

    /// Resolved file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn schema_version(&self) -> i32 {
        schema::get_schema_version(&self.conn.lock())
    }

    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    pub fn find_project_by_external_id(&self, external_id: i64) -> RefactoryResult<Option<Project>> {
        let conn = self.conn.lock();
        let project = conn
            .query_row(
                "SELECT id, external_id, name, working_copy FROM project WHERE external_id = ?1;",
                params![external_id],
                project_from_row,
            )
            .optional()?;
        Ok(project)
    }

    /// Return the project with `external_id`, inserting it on first sight.
    /// The name and working copy of an existing row are refreshed.
    pub fn find_or_create_project(
        &self,
        external_id: i64,
        name: &str,
        working_copy: &Path,
    ) -> RefactoryResult<Project> {
        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO project(external_id, name, working_copy) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(external_id) DO UPDATE SET \
                     name = excluded.name, \
                     working_copy = excluded.working_copy;",
                params![external_id, name, working_copy.to_string_lossy().to_string()],
            )?;
        }
        self.find_project_by_external_id(external_id)?.ok_or_else(|| {
            RefactoryError::Database(format!("project {external_id} vanished after upsert"))
        })
    }

    // -----------------------------------------------------------------------
    // Change requests
    // -----------------------------------------------------------------------

    pub fn is_change_request_tracked(
        &self,
        project_id: i64,
        external_number: i64,
    ) -> RefactoryResult<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM change_request WHERE project_id = ?1 AND external_number = ?2;",
                params![project_id, external_number],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn find_change_request(
        &self,
        project_id: i64,
        external_number: i64,
    ) -> RefactoryResult<Option<TrackedChangeRequest>> {
        let conn = self.conn.lock();
        let tracked = conn
            .query_row(
                "SELECT id, project_id, external_number, head_sha, title, web_url \
                 FROM change_request WHERE project_id = ?1 AND external_number = ?2;",
                params![project_id, external_number],
                change_request_from_row,
            )
            .optional()?;
        Ok(tracked)
    }

    /// Record that processing of `change_request` has started, committing
    /// immediately. Returns `None` when the change request was already
    /// tracked, so no caller can process it twice.
    pub fn track_change_request(
        &self,
        project_id: i64,
        change_request: &ChangeRequestRef,
    ) -> RefactoryResult<Option<TrackedChangeRequest>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO change_request(project_id, external_number, head_sha, title, web_url) \
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                project_id,
                change_request.external_number,
                change_request.head_sha,
                change_request.title,
                change_request.web_url,
            ],
        )?;
        if inserted == 0 {
            return Ok(None);
        }
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(Some(TrackedChangeRequest {
            id,
            project_id,
            external_number: change_request.external_number,
            head_sha: change_request.head_sha.clone(),
            title: change_request.title.clone(),
            web_url: change_request.web_url.clone(),
        }))
    }

    /// Forget a tracked change request and its candidates so the next pass
    /// processes it again. Returns whether a row was deleted.
    pub fn delete_change_request(
        &self,
        project_id: i64,
        external_number: i64,
    ) -> RefactoryResult<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM change_request WHERE project_id = ?1 AND external_number = ?2;",
            params![project_id, external_number],
        )?;
        Ok(deleted > 0)
    }

    // -----------------------------------------------------------------------
    // Models
    // -----------------------------------------------------------------------

    pub fn find_model(&self, id: &str) -> RefactoryResult<Option<Model>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, refactoring_type, trained_on, model_type, model_path, \
                        message_template, feature_names_json \
                 FROM model WHERE id = ?1;",
                params![id],
                |row| {
                    Ok((
                        Model {
                            id: row.get(0)?,
                            refactoring_type: row.get(1)?,
                            trained_on: row.get(2)?,
                            model_type: row.get(3)?,
                            model_path: row.get(4)?,
                            message_template: row.get(5)?,
                            feature_names: Vec::new(),
                        },
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((mut model, names_json)) => {
                model.feature_names = serde_json::from_str(&names_json)?;
                Ok(Some(model))
            }
            None => Ok(None),
        }
    }

    /// Look `model` up by id and insert it when unknown. Stored models are
    /// immutable: an existing row is returned unchanged.
    pub fn find_or_create_model(&self, model: &Model) -> RefactoryResult<Model> {
        if let Some(existing) = self.find_model(&model.id)? {
            if existing.feature_names != model.feature_names {
                tracing::warn!(
                    "Model {} loaded from {} declares different features than the stored row; keeping the stored row",
                    model.id,
                    model.model_path
                );
            }
            return Ok(existing);
        }
        let names_json = serde_json::to_string(&model.feature_names)?;
        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT OR IGNORE INTO model(id, refactoring_type, trained_on, model_type, \
                     model_path, message_template, feature_names_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
                params![
                    model.id,
                    model.refactoring_type,
                    model.trained_on,
                    model.model_type,
                    model.model_path,
                    model.message_template,
                    names_json,
                ],
            )?;
        }
        tracing::info!("Registered model {} ({})", model.id, model.model_path);
        Ok(model.clone())
    }

    // -----------------------------------------------------------------------
    // Candidates
    // -----------------------------------------------------------------------

    /// Insert all `candidates` with the externalization flag unset, then set
    /// it on the ones already marked externalized, in a single transaction.
    /// Assigned row ids are written back into the candidates.
    pub fn persist_candidates(
        &self,
        candidates: &mut [RecommendationCandidate],
    ) -> RefactoryResult<()> {
        if candidates.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO recommendation_candidate(change_request_id, model_id, old_path, \
                     new_path, line_number, unit_name, features_json, label, probability, externalized) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0);",
            )?;
            for candidate in candidates.iter_mut() {
                let prediction = candidate.prediction.ok_or_else(|| {
                    RefactoryError::Database(format!(
                        "candidate {} in {} has no prediction",
                        candidate.unit_name, candidate.new_path
                    ))
                })?;
                insert.execute(params![
                    candidate.change_request_id,
                    candidate.model_id,
                    candidate.old_path,
                    candidate.new_path,
                    candidate.line_number,
                    candidate.unit_name,
                    serde_json::to_string(&candidate.features)?,
                    prediction.label,
                    f64::from(prediction.probability),
                ])?;
                candidate.id = Some(tx.last_insert_rowid());
            }

            let mut flag = tx.prepare(
                "UPDATE recommendation_candidate SET externalized = 1 WHERE id = ?1;",
            )?;
            for candidate in candidates.iter().filter(|c| c.is_externalized()) {
                flag.execute(params![candidate.id])?;
            }
        }
        tx.commit()?;
        tracing::debug!("Persisted {} candidates", candidates.len());
        Ok(())
    }

    pub fn candidates_for_change_request(
        &self,
        change_request_id: i64,
    ) -> RefactoryResult<Vec<RecommendationCandidate>> {
        self.query_candidates(
            &format!(
                "SELECT {CANDIDATE_COLUMNS} FROM recommendation_candidate \
                 WHERE change_request_id = ?1 ORDER BY id;"
            ),
            params![change_request_id],
        )
    }

    /// Every stored candidate, oldest first.
    pub fn all_candidates(&self) -> RefactoryResult<Vec<RecommendationCandidate>> {
        self.query_candidates(
            &format!("SELECT {CANDIDATE_COLUMNS} FROM recommendation_candidate ORDER BY id;"),
            params![],
        )
    }

    fn query_candidates<P: rusqlite::Params>(
        &self,
        sql: &str,
        query_params: P,
    ) -> RefactoryResult<Vec<RecommendationCandidate>> {
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(query_params, CandidateRow::read)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter().map(CandidateRow::into_candidate).collect()
    }

    // -----------------------------------------------------------------------
    // Backup
    // -----------------------------------------------------------------------

    /// Copy the database to `destination` using the SQLite backup API.
    /// Returns the resolved destination path.
    pub fn backup_to(&self, destination: &Path) -> RefactoryResult<PathBuf> {
        let expanded = expand_tilde(destination);
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(&expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let src_conn = self.conn.lock();
        let mut dst_conn = Connection::open(&resolved)?;
        let backup = rusqlite::backup::Backup::new(&src_conn, &mut dst_conn)?;
        backup.run_to_completion(100, Duration::from_millis(10), None)?;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_MESSAGE_TEMPLATE;

    fn change_request(number: i64) -> ChangeRequestRef {
        ChangeRequestRef {
            external_number: number,
            head_sha: format!("sha{number}"),
            title: format!("CR {number}"),
            web_url: format!("https://host/cr/{number}"),
            diff_refs: Default::default(),
        }
    }

    fn model(id: &str) -> Model {
        Model {
            id: id.to_string(),
            refactoring_type: "extract_method".into(),
            trained_on: "apache".into(),
            model_type: "random_forest".into(),
            model_path: "models/m.onnx".into(),
            message_template: DEFAULT_MESSAGE_TEMPLATE.into(),
            feature_names: vec!["classLoc".into(), "methodLoc".into()],
        }
    }

    fn scored(cr: i64, name: &str, probability: f32) -> RecommendationCandidate {
        let mut c =
            RecommendationCandidate::new(cr, "m1", "A.java", "A.java", 12, name, vec![1.0, 2.5]);
        c.prediction = Some(Prediction { label: true, probability });
        c
    }

    fn seeded() -> (Database, Project, TrackedChangeRequest) {
        let db = Database::open_in_memory().unwrap();
        let project = db.find_or_create_project(42, "demo", Path::new("/tmp/demo")).unwrap();
        db.find_or_create_model(&model("m1")).unwrap();
        let tracked = db.track_change_request(project.id, &change_request(5)).unwrap().unwrap();
        (db, project, tracked)
    }

    #[test]
    fn in_memory_store_is_migrated() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.schema_version(), schema::SCHEMA_VERSION);
        assert!(db.path().is_none());
    }

    #[test]
    fn find_or_create_project_is_keyed_by_external_id() {
        let db = Database::open_in_memory().unwrap();
        let first = db.find_or_create_project(42, "demo", Path::new("/tmp/a")).unwrap();
        let second = db.find_or_create_project(42, "demo-renamed", Path::new("/tmp/b")).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "demo-renamed");
        assert_eq!(second.working_copy, PathBuf::from("/tmp/b"));
        assert!(db.find_project_by_external_id(7).unwrap().is_none());
    }

    #[test]
    fn tracking_is_recorded_once() {
        let (db, project, tracked) = seeded();
        assert!(db.is_change_request_tracked(project.id, 5).unwrap());
        assert!(!db.is_change_request_tracked(project.id, 6).unwrap());
        assert!(db.track_change_request(project.id, &change_request(5)).unwrap().is_none());
        let found = db.find_change_request(project.id, 5).unwrap().unwrap();
        assert_eq!(found, tracked);
    }

    #[test]
    fn models_are_immutable_once_stored() {
        let db = Database::open_in_memory().unwrap();
        let stored = db.find_or_create_model(&model("m1")).unwrap();
        let mut changed = model("m1");
        changed.feature_names = vec!["other".into()];
        let again = db.find_or_create_model(&changed).unwrap();
        assert_eq!(again, stored);
        assert_eq!(db.find_model("m1").unwrap().unwrap().feature_names, stored.feature_names);
        assert!(db.find_model("missing").unwrap().is_none());
    }

    #[test]
    fn persisted_candidates_round_trip_with_flags() {
        let (db, _, tracked) = seeded();
        let mut candidates = vec![scored(tracked.id, "run", 0.9), scored(tracked.id, "stop", 0.7)];
        candidates[0].mark_externalized();

        db.persist_candidates(&mut candidates).unwrap();
        assert!(candidates.iter().all(|c| c.id.is_some()));

        let stored = db.candidates_for_change_request(tracked.id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].unit_name, "run");
        assert!(stored[0].is_externalized());
        assert!(!stored[1].is_externalized());
        assert_eq!(stored[1].features, vec![1.0, 2.5]);
        assert_eq!(stored[1].line_number, 12);
        assert!(stored[0].label());
    }

    #[test]
    fn unscored_candidate_aborts_the_whole_batch() {
        let (db, _, tracked) = seeded();
        let mut candidates = vec![
            scored(tracked.id, "run", 0.9),
            RecommendationCandidate::new(tracked.id, "m1", "A.java", "A.java", 1, "A", vec![]),
        ];
        assert!(matches!(
            db.persist_candidates(&mut candidates),
            Err(RefactoryError::Database(_))
        ));
        assert!(db.all_candidates().unwrap().is_empty());
    }

    #[test]
    fn candidate_for_unknown_model_is_rejected() {
        let (db, _, tracked) = seeded();
        let mut candidate = scored(tracked.id, "run", 0.9);
        candidate.model_id = "unknown".into();
        assert!(db.persist_candidates(&mut [candidate]).is_err());
    }

    #[test]
    fn deleting_a_change_request_cascades_to_candidates() {
        let (db, project, tracked) = seeded();
        db.persist_candidates(&mut [scored(tracked.id, "run", 0.9)]).unwrap();
        assert!(db.delete_change_request(project.id, 5).unwrap());
        assert!(!db.is_change_request_tracked(project.id, 5).unwrap());
        assert!(db.all_candidates().unwrap().is_empty());
        assert!(!db.delete_change_request(project.id, 5).unwrap());
    }

    #[test]
    fn backup_writes_a_readable_copy_at_the_given_path() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.find_or_create_project(5, "acme", Path::new("/w")).unwrap();

        let destination = dir.path().join("backups").join("refactory-copy.db");
        let written = db.backup_to(&destination).unwrap();
        assert_eq!(written, destination);

        let copy = Database::open(&written).unwrap();
        let project = copy.find_project_by_external_id(5).unwrap().unwrap();
        assert_eq!(project.name, "acme");
        assert_eq!(copy.schema_version(), schema::SCHEMA_VERSION);
    }

    #[test]
    fn file_backed_store_survives_reopen_and_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("refactory.db");
        {
            let db = Database::open(&path).unwrap();
            db.find_or_create_project(1, "p", Path::new("/w")).unwrap();
            let copy = db.backup_to(&dir.path().join("backup.db")).unwrap();
            assert!(copy.exists());
        }
        let reopened = Database::open(&path).unwrap();
        assert!(reopened.find_project_by_external_id(1).unwrap().is_some());
        assert_eq!(reopened.path(), Some(path.as_path()));
    }
}
