//! Poll flow: check every pending batch, process the completed ones, and
//! finalize them.
//!
//! Each pending job is handled in isolation. A provider hiccup or a bad
//! output file for one batch is logged and skipped; the job stays submitted
//! and is retried on the next cycle. Score upserts happen before the batch
//! is marked completed, so a crash mid-processing replays the upserts on the
//! next poll with identical results.

use super::parser::parse_result_line;
use crate::provider::{BatchInfo, BatchProvider};
use crate::store::{BatchJob, BatchOutcome, NewScore, ScoringStore};
use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// Token estimate per successful line when the provider reports no usage.
pub const ESTIMATED_TOKENS_PER_SUCCESS: i64 = 200;

/// Rough gpt-4o-mini pricing, per thousand tokens.
pub const COST_PER_1K_TOKENS: f64 = 0.0015;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Pending jobs found at the start of the cycle.
    pub pending: usize,
    /// Jobs that completed and were finalized this cycle.
    pub processed: usize,
}

/// Run one poll cycle over all pending batches.
pub async fn run_poll(
    store: &dyn ScoringStore,
    provider: &dyn BatchProvider,
    model: &str,
) -> Result<PollOutcome> {
    let pending = store
        .pending_batches()
        .context("Failed to list pending batches")?;

    let mut outcome = PollOutcome {
        pending: pending.len(),
        ..Default::default()
    };

    for job in &pending {
        let info = match provider.get_batch(&job.batch_id).await {
            Ok(info) => info,
            Err(e) => {
                warn!(batch_id = %job.batch_id, error = %e, "Failed to fetch batch state");
                continue;
            }
        };

        if info.status.is_terminal_unsuccessful() {
            // No persisted transition for these; the job stays submitted
            // and keeps showing up here until handled out of band.
            warn!(batch_id = %job.batch_id, status = %info.status, "Batch ended unsuccessfully");
            continue;
        }
        if info.status != crate::provider::ProviderBatchStatus::Completed {
            debug!(batch_id = %job.batch_id, status = %info.status, "Batch still pending");
            continue;
        }

        info!(batch_id = %job.batch_id, "Processing completed batch");
        match process_completed_batch(store, provider, job, &info, model).await {
            Ok((successes, errors)) => {
                info!(
                    batch_id = %job.batch_id,
                    successes, errors, "Finalized batch"
                );
                outcome.processed += 1;
            }
            Err(e) => {
                warn!(batch_id = %job.batch_id, error = %e, "Failed to process batch");
            }
        }
    }

    Ok(outcome)
}

/// Download, parse, and persist the results of one completed batch, then
/// perform the single submitted -> completed transition.
async fn process_completed_batch(
    store: &dyn ScoringStore,
    provider: &dyn BatchProvider,
    job: &BatchJob,
    info: &BatchInfo,
    model: &str,
) -> Result<(i64, i64)> {
    let output_file_id = info
        .output_file_id
        .as_deref()
        .context("Completed batch has no output file")?;
    let text = provider
        .download_file(output_file_id)
        .await
        .context("Failed to download batch output file")?;

    let mut success_count: i64 = 0;
    let mut error_count: i64 = 0;

    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let (target_id, payload) = match parse_result_line(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(batch_id = %job.batch_id, error = %e, "Skipping result line");
                error_count += 1;
                continue;
            }
        };

        let score = NewScore {
            target_id,
            decoration: payload.decoration,
            coffee: payload.coffee,
            study_suitable: payload.study_suitable,
            parking: payload.parking.as_str().to_string(),
            evidence: payload.evidence,
            sources: payload.sources_used,
            model: model.to_string(),
            batch_id: job.batch_id.clone(),
        };
        match store.upsert_score(&score) {
            Ok(()) => success_count += 1,
            Err(e) => {
                warn!(
                    batch_id = %job.batch_id,
                    target_id = %score.target_id,
                    error = %e,
                    "Failed to store score"
                );
                error_count += 1;
            }
        }
    }

    let total_tokens = info
        .total_tokens
        .unwrap_or(success_count * ESTIMATED_TOKENS_PER_SUCCESS);
    let cost_estimate = (total_tokens as f64 / 1000.0) * COST_PER_1K_TOKENS;

    store
        .complete_batch(
            &job.batch_id,
            &BatchOutcome {
                output_file_id: Some(output_file_id.to_string()),
                success_count,
                error_count,
                total_tokens,
                cost_estimate,
            },
        )
        .context("Failed to finalize batch")?;

    Ok((success_count, error_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderBatchStatus, ProviderError};
    use crate::scoring::request::DEFAULT_MODEL;
    use crate::store::{SqliteScoringStore, Target};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeProvider {
        batches: Mutex<HashMap<String, BatchInfo>>,
        files: Mutex<HashMap<String, String>>,
    }

    impl FakeProvider {
        fn new() -> Self {
            Self {
                batches: Mutex::new(HashMap::new()),
                files: Mutex::new(HashMap::new()),
            }
        }

        fn set_batch(&self, info: BatchInfo) {
            self.batches.lock().unwrap().insert(info.id.clone(), info);
        }

        fn set_file(&self, id: &str, content: &str) {
            self.files
                .lock()
                .unwrap()
                .insert(id.to_string(), content.to_string());
        }
    }

    #[async_trait]
    impl BatchProvider for FakeProvider {
        async fn upload_batch_file(&self, _jsonl: &str) -> Result<String, ProviderError> {
            unimplemented!("not used by poll")
        }

        async fn create_batch(&self, _input_file_id: &str) -> Result<String, ProviderError> {
            unimplemented!("not used by poll")
        }

        async fn get_batch(&self, batch_id: &str) -> Result<BatchInfo, ProviderError> {
            self.batches
                .lock()
                .unwrap()
                .get(batch_id)
                .cloned()
                .ok_or(ProviderError::Api {
                    status: 404,
                    message: "no such batch".to_string(),
                })
        }

        async fn download_file(&self, file_id: &str) -> Result<String, ProviderError> {
            self.files
                .lock()
                .unwrap()
                .get(file_id)
                .cloned()
                .ok_or(ProviderError::Api {
                    status: 404,
                    message: "no such file".to_string(),
                })
        }
    }

    fn new_store() -> (SqliteScoringStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteScoringStore::new(temp_dir.path().join("scoring.db")).unwrap();
        (store, temp_dir)
    }

    fn insert_target(store: &SqliteScoringStore, id: &str) {
        store
            .insert_target(&Target {
                id: id.to_string(),
                name: format!("Cafe {}", id),
                address: "1 Main St".to_string(),
                city: None,
                zip_code: None,
                created_at: Utc::now(),
            })
            .unwrap();
    }

    fn ok_line(target_id: &str, coffee: i64) -> String {
        let payload = json!({
            "decoration": 3,
            "coffee": coffee,
            "studySuitable": 4,
            "parking": "street",
            "evidence": ["quiet upstairs"],
            "sources_used": ["https://example.com"]
        });
        json!({
            "custom_id": format!("biz_{}", target_id),
            "response": { "status_code": 200, "body": { "output_text": payload.to_string() } }
        })
        .to_string()
    }

    fn failed_line(target_id: &str) -> String {
        json!({
            "custom_id": format!("biz_{}", target_id),
            "response": { "status_code": 500, "body": { "error": "overloaded" } }
        })
        .to_string()
    }

    #[tokio::test]
    async fn still_running_batch_stays_submitted() {
        let (store, _dir) = new_store();
        let provider = FakeProvider::new();
        store.record_batch_start("batch-1", &[]).unwrap();
        provider.set_batch(BatchInfo {
            id: "batch-1".to_string(),
            status: ProviderBatchStatus::InProgress,
            output_file_id: None,
            total_tokens: None,
        });

        let outcome = run_poll(&store, &provider, DEFAULT_MODEL).await.unwrap();
        assert_eq!(outcome, PollOutcome { pending: 1, processed: 0 });
        assert_eq!(store.pending_batches().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn completed_batch_is_processed_and_finalized() {
        let (store, _dir) = new_store();
        let provider = FakeProvider::new();
        insert_target(&store, "a");
        insert_target(&store, "b");
        store
            .record_batch_start("batch-1", &["a".to_string(), "b".to_string()])
            .unwrap();
        provider.set_batch(BatchInfo {
            id: "batch-1".to_string(),
            status: ProviderBatchStatus::Completed,
            output_file_id: Some("file-out".to_string()),
            total_tokens: None,
        });
        provider.set_file(
            "file-out",
            &format!("{}\n{}\n{}\n", ok_line("a", 5), failed_line("b"), "garbage"),
        );

        let outcome = run_poll(&store, &provider, DEFAULT_MODEL).await.unwrap();
        assert_eq!(outcome, PollOutcome { pending: 1, processed: 1 });

        // One good line, one failed request, one unparseable line.
        let job = store.get_batch("batch-1").unwrap().unwrap();
        assert_eq!(job.success_count, 1);
        assert_eq!(job.error_count, 2);
        assert_eq!(job.total_tokens, ESTIMATED_TOKENS_PER_SUCCESS);
        assert!((job.cost_estimate - 0.0003).abs() < 1e-9);

        let score = store.get_score("a").unwrap().unwrap();
        assert_eq!(score.coffee, 5);
        assert_eq!(score.batch_id, "batch-1");
        assert!(store.get_score("b").unwrap().is_none());
        assert!(store.pending_batches().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reported_token_usage_wins_over_estimate() {
        let (store, _dir) = new_store();
        let provider = FakeProvider::new();
        insert_target(&store, "a");
        store.record_batch_start("batch-1", &["a".to_string()]).unwrap();
        provider.set_batch(BatchInfo {
            id: "batch-1".to_string(),
            status: ProviderBatchStatus::Completed,
            output_file_id: Some("file-out".to_string()),
            total_tokens: Some(9000),
        });
        provider.set_file("file-out", &ok_line("a", 4));

        run_poll(&store, &provider, DEFAULT_MODEL).await.unwrap();

        let job = store.get_batch("batch-1").unwrap().unwrap();
        assert_eq!(job.total_tokens, 9000);
        assert!((job.cost_estimate - 0.0135).abs() < 1e-9);
    }

    #[tokio::test]
    async fn terminal_unsuccessful_batch_stays_submitted() {
        let (store, _dir) = new_store();
        let provider = FakeProvider::new();
        store.record_batch_start("batch-1", &[]).unwrap();
        provider.set_batch(BatchInfo {
            id: "batch-1".to_string(),
            status: ProviderBatchStatus::Expired,
            output_file_id: None,
            total_tokens: None,
        });

        let outcome = run_poll(&store, &provider, DEFAULT_MODEL).await.unwrap();
        assert_eq!(outcome.processed, 0);
        assert_eq!(store.pending_batches().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn one_bad_job_does_not_block_the_others() {
        let (store, _dir) = new_store();
        let provider = FakeProvider::new();
        insert_target(&store, "a");
        store.record_batch_start("batch-bad", &[]).unwrap();
        store.record_batch_start("batch-good", &["a".to_string()]).unwrap();

        // batch-bad is unknown to the provider entirely.
        provider.set_batch(BatchInfo {
            id: "batch-good".to_string(),
            status: ProviderBatchStatus::Completed,
            output_file_id: Some("file-out".to_string()),
            total_tokens: None,
        });
        provider.set_file("file-out", &ok_line("a", 3));

        let outcome = run_poll(&store, &provider, DEFAULT_MODEL).await.unwrap();
        assert_eq!(outcome, PollOutcome { pending: 2, processed: 1 });

        let good = store.get_batch("batch-good").unwrap().unwrap();
        assert_eq!(good.success_count, 1);
        assert_eq!(store.pending_batches().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn scores_for_unknown_targets_count_as_errors() {
        let (store, _dir) = new_store();
        let provider = FakeProvider::new();
        store.record_batch_start("batch-1", &[]).unwrap();
        provider.set_batch(BatchInfo {
            id: "batch-1".to_string(),
            status: ProviderBatchStatus::Completed,
            output_file_id: Some("file-out".to_string()),
            total_tokens: None,
        });
        provider.set_file("file-out", &ok_line("ghost", 4));

        run_poll(&store, &provider, DEFAULT_MODEL).await.unwrap();

        let job = store.get_batch("batch-1").unwrap().unwrap();
        assert_eq!(job.success_count, 0);
        assert_eq!(job.error_count, 1);
    }
}
