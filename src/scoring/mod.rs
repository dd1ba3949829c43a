//! The batch-scoring pipeline.
//!
//! Two crash-tolerant entry points drive everything: [`submit::run_submit`]
//! turns stale targets into a provider batch, and [`poll::run_poll`] turns
//! completed batches into persisted scores. All state between the two lives
//! in the store.

pub mod parser;
pub mod poll;
pub mod request;
pub mod schema;
pub mod submit;
