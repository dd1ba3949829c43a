//! Submit flow: select stale targets, build the bulk request, create the
//! provider batch, and record it as pending.

use super::request::build_batch_document;
use crate::provider::BatchProvider;
use crate::store::ScoringStore;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use tracing::info;

/// Upper bound on targets per batch, kept small for cost control.
pub const BATCH_TARGET_LIMIT: usize = 50;

/// A score older than this is due for re-scoring.
pub const STALE_AFTER_DAYS: i64 = 7;

#[derive(Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Nothing is unscored or stale; no batch was created.
    NoTargets,
    Submitted {
        batch_id: String,
        target_count: usize,
    },
}

/// Run one submit cycle.
///
/// The batch is recorded locally only after the provider accepts it. A crash
/// between those two steps leaves an orphaned provider batch whose results
/// are never fetched; it costs money but corrupts nothing.
pub async fn run_submit(
    store: &dyn ScoringStore,
    provider: &dyn BatchProvider,
    model: &str,
    limit: usize,
) -> Result<SubmitOutcome> {
    let stale_before = Utc::now() - Duration::days(STALE_AFTER_DAYS);
    let targets = store
        .targets_needing_score(limit, stale_before)
        .context("Failed to select targets needing a score")?;

    if targets.is_empty() {
        info!("No targets need scoring");
        return Ok(SubmitOutcome::NoTargets);
    }
    info!(count = targets.len(), "Found targets needing scores");

    let document = build_batch_document(&targets, model);
    let input_file_id = provider
        .upload_batch_file(&document)
        .await
        .context("Failed to upload batch input file")?;
    info!(%input_file_id, "Uploaded batch input file");

    let batch_id = provider
        .create_batch(&input_file_id)
        .await
        .context("Failed to create provider batch")?;
    info!(%batch_id, "Created batch");

    let target_ids: Vec<String> = targets.iter().map(|t| t.id.clone()).collect();
    store
        .record_batch_start(&batch_id, &target_ids)
        .context("Failed to record batch start")?;

    Ok(SubmitOutcome::Submitted {
        batch_id,
        target_count: targets.len(),
    })
}
