use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A business that is a candidate for AI-derived scoring.
///
/// Created once (usually by seeding) and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub name: String,
    pub address: String,
    pub city: Option<String>,
    pub zip_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Persisted status of a batch job.
///
/// `Submitted` is the only non-terminal state; the single modeled transition
/// is submitted -> completed, performed once when results are processed.
/// Provider-side failed/expired/cancelled batches have no persisted
/// counterpart and stay `Submitted` (see `scoring::poll`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchJobStatus {
    Submitted,
    Completed,
}

impl BatchJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchJobStatus::Submitted => "submitted",
            BatchJobStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(BatchJobStatus::Submitted),
            "completed" => Some(BatchJobStatus::Completed),
            _ => None,
        }
    }
}

/// One bulk submission to the batch-inference provider.
#[derive(Debug, Clone, Serialize)]
pub struct BatchJob {
    pub batch_id: String,
    pub status: BatchJobStatus,
    pub target_ids: Vec<String>,
    pub target_count: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output_file_id: Option<String>,
    pub success_count: i64,
    pub error_count: i64,
    pub total_tokens: i64,
    pub cost_estimate: f64,
}

impl BatchJob {
    /// Wall-clock hours between creation and completion, rounded to two
    /// decimal places. None while the job is still pending.
    pub fn duration_hours(&self) -> Option<f64> {
        let completed_at = self.completed_at?;
        let seconds = (completed_at - self.created_at).num_seconds();
        Some(((seconds as f64 / 3600.0) * 100.0).round() / 100.0)
    }
}

/// Aggregate metadata persisted when a batch job is finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub output_file_id: Option<String>,
    pub success_count: i64,
    pub error_count: i64,
    pub total_tokens: i64,
    pub cost_estimate: f64,
}

/// A validated score ready to be written for one target.
///
/// External field names are already normalized to their stored form here
/// (e.g. the provider's `studySuitable` becomes `study_suitable`).
#[derive(Debug, Clone)]
pub struct NewScore {
    pub target_id: String,
    pub decoration: i64,
    pub coffee: i64,
    pub study_suitable: i64,
    pub parking: String,
    pub evidence: Vec<String>,
    pub sources: Vec<String>,
    pub model: String,
    pub batch_id: String,
}

/// The current enrichment for one target, as persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreRecord {
    pub target_id: String,
    pub decoration: i64,
    pub coffee: i64,
    pub study_suitable: i64,
    pub parking: String,
    pub evidence: Vec<String>,
    pub sources: Vec<String>,
    pub model: String,
    pub batch_id: String,
    pub updated_at: DateTime<Utc>,
}

/// A target joined with its score, if any. Backs the businesses endpoint.
#[derive(Debug, Clone)]
pub struct EnrichedTarget {
    pub target: Target,
    pub score: Option<ScoreRecord>,
}

/// Derived summary over recent batch jobs, served alongside the batch log.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchLogSummary {
    pub total_batches: usize,
    pub completed_batches: usize,
    pub pending_batches: usize,
    pub total_targets: i64,
    pub total_successes: i64,
    pub total_errors: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub success_rate: f64,
}

impl BatchLogSummary {
    pub fn from_jobs(jobs: &[BatchJob]) -> Self {
        let mut summary = BatchLogSummary::default();
        for job in jobs {
            summary.total_batches += 1;
            match job.status {
                BatchJobStatus::Completed => {
                    summary.completed_batches += 1;
                    summary.total_targets += job.target_count as i64;
                    summary.total_successes += job.success_count;
                    summary.total_errors += job.error_count;
                    summary.total_tokens += job.total_tokens;
                    summary.total_cost += job.cost_estimate;
                }
                BatchJobStatus::Submitted => summary.pending_batches += 1,
            }
        }
        let attempted = summary.total_successes + summary.total_errors;
        if attempted > 0 {
            summary.success_rate = summary.total_successes as f64 / attempted as f64;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn job(status: BatchJobStatus, successes: i64, errors: i64) -> BatchJob {
        BatchJob {
            batch_id: "batch-1".to_string(),
            status,
            target_ids: vec![],
            target_count: (successes + errors) as usize,
            created_at: Utc::now(),
            completed_at: None,
            output_file_id: None,
            success_count: successes,
            error_count: errors,
            total_tokens: 100,
            cost_estimate: 0.5,
        }
    }

    #[test]
    fn status_roundtrip() {
        for status in [BatchJobStatus::Submitted, BatchJobStatus::Completed] {
            assert_eq!(BatchJobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BatchJobStatus::parse("cancelled"), None);
    }

    #[test]
    fn duration_hours_requires_completion() {
        let mut j = job(BatchJobStatus::Submitted, 0, 0);
        assert!(j.duration_hours().is_none());

        j.created_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        j.completed_at = Some(Utc.with_ymd_and_hms(2025, 1, 1, 4, 30, 0).unwrap());
        assert_eq!(j.duration_hours(), Some(4.5));
    }

    #[test]
    fn summary_splits_pending_and_completed() {
        let jobs = vec![
            job(BatchJobStatus::Completed, 7, 3),
            job(BatchJobStatus::Submitted, 0, 0),
            job(BatchJobStatus::Completed, 5, 0),
        ];
        let summary = BatchLogSummary::from_jobs(&jobs);
        assert_eq!(summary.total_batches, 3);
        assert_eq!(summary.completed_batches, 2);
        assert_eq!(summary.pending_batches, 1);
        assert_eq!(summary.total_successes, 12);
        assert_eq!(summary.total_errors, 3);
        assert_eq!(summary.total_targets, 15);
        assert!((summary.success_rate - 0.8).abs() < 1e-9);
    }

    #[test]
    fn summary_of_nothing_is_zeroed() {
        let summary = BatchLogSummary::from_jobs(&[]);
        assert_eq!(summary.total_batches, 0);
        assert_eq!(summary.success_rate, 0.0);
    }
}
