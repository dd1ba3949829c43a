//! SQLite schema for the scoring database.
//!
//! Three relations: scoring candidates (`targets`), bulk submissions to the
//! inference provider (`batch_jobs`), and the latest enrichment per target
//! (`scores`). Created if absent, validated if present, never destructively
//! migrated.

use crate::sqlite_persistence::{Column, Schema, SqlType, Table};

const TARGETS_TABLE: Table = Table {
    name: "targets",
    columns: &[
        Column::new("id", SqlType::Text).primary_key(),
        Column::new("name", SqlType::Text).non_null(),
        Column::new("address", SqlType::Text).non_null(),
        Column::new("city", SqlType::Text),
        Column::new("zip_code", SqlType::Text),
        Column::new("created_at", SqlType::Text).non_null(),
    ],
    indices: &[("idx_targets_city", "city")],
};

/// `target_ids` is the ordered id list serialized as a JSON array. Fine at
/// this scale; a higher-cardinality system would normalize it into a join
/// table.
const BATCH_JOBS_TABLE: Table = Table {
    name: "batch_jobs",
    columns: &[
        Column::new("batch_id", SqlType::Text).primary_key(),
        Column::new("status", SqlType::Text).non_null(),
        Column::new("target_ids", SqlType::Text).non_null(),
        Column::new("target_count", SqlType::Integer).non_null(),
        Column::new("created_at", SqlType::Text).non_null(),
        Column::new("completed_at", SqlType::Text),
        Column::new("output_file_id", SqlType::Text),
        Column::new("success_count", SqlType::Integer).non_null().default("0"),
        Column::new("error_count", SqlType::Integer).non_null().default("0"),
        Column::new("total_tokens", SqlType::Integer).non_null().default("0"),
        Column::new("cost_estimate", SqlType::Real).non_null().default("0.0"),
    ],
    indices: &[
        ("idx_batch_jobs_status", "status"),
        ("idx_batch_jobs_created_at", "created_at DESC"),
    ],
};

/// At most one live row per target; upserts replace the row wholesale.
const SCORES_TABLE: Table = Table {
    name: "scores",
    columns: &[
        Column::new("target_id", SqlType::Text)
            .primary_key()
            .references("targets", "id"),
        Column::new("decoration", SqlType::Integer).non_null(),
        Column::new("coffee", SqlType::Integer).non_null(),
        Column::new("study_suitable", SqlType::Integer).non_null(),
        Column::new("parking", SqlType::Text).non_null(),
        Column::new("evidence", SqlType::Text).non_null(),
        Column::new("sources", SqlType::Text).non_null(),
        Column::new("model", SqlType::Text).non_null(),
        Column::new("batch_id", SqlType::Text)
            .non_null()
            .references("batch_jobs", "batch_id"),
        Column::new("updated_at", SqlType::Text).non_null(),
    ],
    indices: &[("idx_scores_updated_at", "updated_at")],
};

pub const SCORING_SCHEMA: Schema = Schema {
    version: 1,
    tables: &[TARGETS_TABLE, BATCH_JOBS_TABLE, SCORES_TABLE],
};
