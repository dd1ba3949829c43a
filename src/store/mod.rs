//! Durable persistence for the scoring pipeline.
//!
//! All pipeline state lives here: nothing is carried in memory between the
//! submit and poll entry points, so every persisted effect must be safely
//! replayable after a crash.

mod models;
mod schema;
mod sqlite_store;

pub use models::*;
pub use schema::SCORING_SCHEMA;
pub use sqlite_store::SqliteScoringStore;

use anyhow::Result;
use chrono::{DateTime, Utc};

pub trait ScoringStore: Send + Sync {
    /// Insert a target if it does not already exist. Returns false when the
    /// id was already present (targets are immutable after creation).
    fn insert_target(&self, target: &Target) -> Result<bool>;
    fn target_count(&self) -> Result<usize>;

    /// Up to `limit` targets that have no score, or whose score was last
    /// updated before `stale_before`, in store-native order.
    ///
    /// No fairness guarantee: with a stable order and `limit` below the
    /// stale population, repeated calls can starve the tail of the set.
    fn targets_needing_score(
        &self,
        limit: usize,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<Target>>;

    /// Record a freshly created provider batch as submitted.
    fn record_batch_start(&self, batch_id: &str, target_ids: &[String]) -> Result<()>;

    /// All jobs still in the submitted state.
    fn pending_batches(&self) -> Result<Vec<BatchJob>>;
    fn get_batch(&self, batch_id: &str) -> Result<Option<BatchJob>>;

    /// Insert-or-replace keyed by target id: exactly one live score per
    /// target, unconditionally overwritten. Re-upserting identical data is
    /// a no-op in effect, which is what makes poll replay safe.
    fn upsert_score(&self, score: &NewScore) -> Result<()>;
    fn get_score(&self, target_id: &str) -> Result<Option<ScoreRecord>>;

    /// The single submitted -> completed transition. Stamps the completion
    /// time and stores the aggregate metadata. Terminal.
    fn complete_batch(&self, batch_id: &str, outcome: &BatchOutcome) -> Result<()>;

    /// Most recent jobs first, for the batch log endpoint.
    fn recent_batches(&self, limit: usize) -> Result<Vec<BatchJob>>;

    /// Targets joined with their latest score, optionally filtered by city.
    fn enriched_targets(&self, city: Option<&str>) -> Result<Vec<EnrichedTarget>>;
}
