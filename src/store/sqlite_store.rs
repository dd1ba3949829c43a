use super::models::{
    BatchJob, BatchJobStatus, BatchOutcome, EnrichedTarget, NewScore, ScoreRecord, Target,
};
use super::schema::SCORING_SCHEMA;
use super::ScoringStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

const TARGET_COLUMNS: &str = "id, name, address, city, zip_code, created_at";
const BATCH_JOB_COLUMNS: &str = "batch_id, status, target_ids, target_count, created_at, \
     completed_at, output_file_id, success_count, error_count, total_tokens, cost_estimate";
const SCORE_COLUMNS: &str = "target_id, decoration, coffee, study_suitable, parking, \
     evidence, sources, model, batch_id, updated_at";

pub struct SqliteScoringStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteScoringStore {
    /// Open the scoring database, creating the schema on first use and
    /// validating it on every subsequent open.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let conn = Connection::open(path).context("Failed to open scoring database")?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        if is_new_db {
            info!("Creating new scoring database at {:?}", path);
            SCORING_SCHEMA.create(&conn)?;
        } else {
            let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
            if raw_version != SCORING_SCHEMA.stamped_version() {
                anyhow::bail!(
                    "Scoring database at {:?} has unexpected version {} (expected {})",
                    path,
                    raw_version,
                    SCORING_SCHEMA.stamped_version()
                );
            }
            SCORING_SCHEMA
                .validate(&conn)
                .with_context(|| format!("Scoring database schema validation failed at {:?}", path))?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn parse_string_list(s: &str) -> Vec<String> {
        serde_json::from_str(s).unwrap_or_default()
    }

    fn row_to_target(row: &rusqlite::Row) -> rusqlite::Result<Target> {
        let created_at_str: String = row.get("created_at")?;
        Ok(Target {
            id: row.get("id")?,
            name: row.get("name")?,
            address: row.get("address")?,
            city: row.get("city")?,
            zip_code: row.get("zip_code")?,
            created_at: Self::parse_datetime(&created_at_str),
        })
    }

    fn row_to_batch_job(row: &rusqlite::Row) -> rusqlite::Result<BatchJob> {
        let status_str: String = row.get("status")?;
        let target_ids_str: String = row.get("target_ids")?;
        let created_at_str: String = row.get("created_at")?;
        let completed_at_str: Option<String> = row.get("completed_at")?;
        let target_count: i64 = row.get("target_count")?;

        Ok(BatchJob {
            batch_id: row.get("batch_id")?,
            status: BatchJobStatus::parse(&status_str).unwrap_or(BatchJobStatus::Submitted),
            target_ids: Self::parse_string_list(&target_ids_str),
            target_count: target_count as usize,
            created_at: Self::parse_datetime(&created_at_str),
            completed_at: completed_at_str.as_deref().map(Self::parse_datetime),
            output_file_id: row.get("output_file_id")?,
            success_count: row.get("success_count")?,
            error_count: row.get("error_count")?,
            total_tokens: row.get("total_tokens")?,
            cost_estimate: row.get("cost_estimate")?,
        })
    }

    fn row_to_score(row: &rusqlite::Row) -> rusqlite::Result<ScoreRecord> {
        let evidence_str: String = row.get("evidence")?;
        let sources_str: String = row.get("sources")?;
        let updated_at_str: String = row.get("updated_at")?;

        Ok(ScoreRecord {
            target_id: row.get("target_id")?,
            decoration: row.get("decoration")?,
            coffee: row.get("coffee")?,
            study_suitable: row.get("study_suitable")?,
            parking: row.get("parking")?,
            evidence: Self::parse_string_list(&evidence_str),
            sources: Self::parse_string_list(&sources_str),
            model: row.get("model")?,
            batch_id: row.get("batch_id")?,
            updated_at: Self::parse_datetime(&updated_at_str),
        })
    }
}

impl ScoringStore for SqliteScoringStore {
    fn insert_target(&self, target: &Target) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO targets (id, name, address, city, zip_code, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                target.id,
                target.name,
                target.address,
                target.city,
                target.zip_code,
                Self::format_datetime(&target.created_at),
            ],
        )?;
        Ok(inserted > 0)
    }

    fn target_count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM targets", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn targets_needing_score(
        &self,
        limit: usize,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<Target>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT t.{} FROM targets t
             LEFT JOIN scores s ON t.id = s.target_id
             WHERE s.target_id IS NULL OR s.updated_at < ?1
             LIMIT ?2",
            TARGET_COLUMNS.replace(", ", ", t.")
        ))?;

        let targets = stmt
            .query_map(
                params![Self::format_datetime(&stale_before), limit as i64],
                Self::row_to_target,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(targets)
    }

    fn record_batch_start(&self, batch_id: &str, target_ids: &[String]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let target_ids_json = serde_json::to_string(target_ids)?;
        conn.execute(
            "INSERT INTO batch_jobs (batch_id, status, target_ids, target_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                batch_id,
                BatchJobStatus::Submitted.as_str(),
                target_ids_json,
                target_ids.len() as i64,
                Self::format_datetime(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn pending_batches(&self) -> Result<Vec<BatchJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM batch_jobs WHERE status = ?1 ORDER BY created_at ASC",
            BATCH_JOB_COLUMNS
        ))?;

        let jobs = stmt
            .query_map(
                params![BatchJobStatus::Submitted.as_str()],
                Self::row_to_batch_job,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn get_batch(&self, batch_id: &str) -> Result<Option<BatchJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM batch_jobs WHERE batch_id = ?1",
            BATCH_JOB_COLUMNS
        ))?;

        let job = stmt
            .query_row(params![batch_id], Self::row_to_batch_job)
            .optional()?;
        Ok(job)
    }

    fn upsert_score(&self, score: &NewScore) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO scores
             (target_id, decoration, coffee, study_suitable, parking,
              evidence, sources, model, batch_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                score.target_id,
                score.decoration,
                score.coffee,
                score.study_suitable,
                score.parking,
                serde_json::to_string(&score.evidence)?,
                serde_json::to_string(&score.sources)?,
                score.model,
                score.batch_id,
                Self::format_datetime(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn get_score(&self, target_id: &str) -> Result<Option<ScoreRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scores WHERE target_id = ?1",
            SCORE_COLUMNS
        ))?;

        let score = stmt
            .query_row(params![target_id], Self::row_to_score)
            .optional()?;
        Ok(score)
    }

    fn complete_batch(&self, batch_id: &str, outcome: &BatchOutcome) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE batch_jobs
             SET status = ?1, completed_at = ?2, output_file_id = ?3,
                 success_count = ?4, error_count = ?5, total_tokens = ?6, cost_estimate = ?7
             WHERE batch_id = ?8",
            params![
                BatchJobStatus::Completed.as_str(),
                Self::format_datetime(&Utc::now()),
                outcome.output_file_id,
                outcome.success_count,
                outcome.error_count,
                outcome.total_tokens,
                outcome.cost_estimate,
                batch_id,
            ],
        )?;
        Ok(())
    }

    fn recent_batches(&self, limit: usize) -> Result<Vec<BatchJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM batch_jobs ORDER BY created_at DESC LIMIT ?1",
            BATCH_JOB_COLUMNS
        ))?;

        let jobs = stmt
            .query_map(params![limit as i64], Self::row_to_batch_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn enriched_targets(&self, city: Option<&str>) -> Result<Vec<EnrichedTarget>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT t.id, t.name, t.address, t.city, t.zip_code, t.created_at,
                    s.target_id AS score_target_id, s.decoration, s.coffee, s.study_suitable,
                    s.parking, s.evidence, s.sources, s.model, s.batch_id, s.updated_at
             FROM targets t
             LEFT JOIN scores s ON t.id = s.target_id
             WHERE ?1 IS NULL OR t.city = ?1",
        )?;

        let rows = stmt
            .query_map(params![city], |row| {
                let target = Self::row_to_target(row)?;
                let score_target_id: Option<String> = row.get("score_target_id")?;
                let score = match score_target_id {
                    Some(_) => Some(Self::row_to_score_joined(row)?),
                    None => None,
                };
                Ok(EnrichedTarget { target, score })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl SqliteScoringStore {
    /// Like `row_to_score` but reads the aliased target id from the join.
    fn row_to_score_joined(row: &rusqlite::Row) -> rusqlite::Result<ScoreRecord> {
        let evidence_str: String = row.get("evidence")?;
        let sources_str: String = row.get("sources")?;
        let updated_at_str: String = row.get("updated_at")?;

        Ok(ScoreRecord {
            target_id: row.get("score_target_id")?,
            decoration: row.get("decoration")?,
            coffee: row.get("coffee")?,
            study_suitable: row.get("study_suitable")?,
            parking: row.get("parking")?,
            evidence: Self::parse_string_list(&evidence_str),
            sources: Self::parse_string_list(&sources_str),
            model: row.get("model")?,
            batch_id: row.get("batch_id")?,
            updated_at: Self::parse_datetime(&updated_at_str),
        })
    }
}
