use axum::extract::FromRef;

use crate::provider::BatchProvider;
use crate::store::ScoringStore;
use std::sync::Arc;
use std::time::Instant;

pub type GuardedScoringStore = Arc<dyn ScoringStore>;
pub type GuardedBatchProvider = Arc<dyn BatchProvider>;

#[derive(Clone)]
pub struct ServerState {
    pub store: GuardedScoringStore,
    pub provider: GuardedBatchProvider,
    pub cron_secret: String,
    pub model: String,
    pub batch_limit: usize,
    pub start_time: Instant,
    pub hash: String,
}

impl FromRef<ServerState> for GuardedScoringStore {
    fn from_ref(input: &ServerState) -> Self {
        input.store.clone()
    }
}

impl FromRef<ServerState> for GuardedBatchProvider {
    fn from_ref(input: &ServerState) -> Self {
        input.provider.clone()
    }
}
