use anyhow::Result;
use std::time::Duration;

use axum::{
    extract::{Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use super::state::ServerState;
use crate::scoring::poll::run_poll;
use crate::scoring::submit::{run_submit, SubmitOutcome};
use crate::store::{BatchJob, BatchLogSummary, EnrichedTarget};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    };
    Json(stats)
}

/// The cron endpoints are only meant to be hit by the scheduler, which
/// carries a shared bearer secret.
async fn require_cron_secret(
    State(state): State<ServerState>,
    request: Request,
    next: Next,
) -> Response {
    let expected = format!("Bearer {}", state.cron_secret);
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response();
    }
    next.run(request).await
}

async fn submit_batch(State(state): State<ServerState>) -> Response {
    match run_submit(
        state.store.as_ref(),
        state.provider.as_ref(),
        &state.model,
        state.batch_limit,
    )
    .await
    {
        Ok(SubmitOutcome::NoTargets) => {
            Json(json!({ "message": "No targets need scoring" })).into_response()
        }
        Ok(SubmitOutcome::Submitted {
            batch_id,
            target_count,
        }) => Json(json!({
            "message": format!("Created batch {}", batch_id),
            "batch_id": batch_id,
            "targets_count": target_count,
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "Submit cycle failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to submit batch", "details": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn check_batch(State(state): State<ServerState>) -> Response {
    match run_poll(state.store.as_ref(), state.provider.as_ref(), &state.model).await {
        Ok(outcome) if outcome.pending == 0 => {
            Json(json!({ "message": "No pending batches" })).into_response()
        }
        Ok(outcome) => Json(json!({
            "message": format!("Processed {} completed batches", outcome.processed),
            "processed_batches": outcome.processed,
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "Poll cycle failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to check batches", "details": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[derive(Serialize)]
struct BusinessRatings {
    decoration: i64,
    coffee: i64,
    #[serde(rename = "studySuitable")]
    study_suitable: i64,
}

/// A target with whatever enrichment it has, unscored fields filled with
/// neutral defaults.
#[derive(Serialize)]
struct BusinessEntry {
    id: String,
    name: String,
    location: String,
    #[serde(rename = "zipCode")]
    zip_code: Option<String>,
    ratings: BusinessRatings,
    parking: String,
    evidence: Vec<String>,
    sources: Vec<String>,
    #[serde(rename = "lastUpdated")]
    last_updated: Option<DateTime<Utc>>,
}

impl From<EnrichedTarget> for BusinessEntry {
    fn from(enriched: EnrichedTarget) -> Self {
        let target = enriched.target;
        match enriched.score {
            Some(score) => BusinessEntry {
                id: target.id,
                name: target.name,
                location: target.address,
                zip_code: target.zip_code,
                ratings: BusinessRatings {
                    decoration: score.decoration,
                    coffee: score.coffee,
                    study_suitable: score.study_suitable,
                },
                parking: score.parking,
                evidence: score.evidence,
                sources: score.sources,
                last_updated: Some(score.updated_at),
            },
            None => BusinessEntry {
                id: target.id,
                name: target.name,
                location: target.address,
                zip_code: target.zip_code,
                ratings: BusinessRatings {
                    decoration: 0,
                    coffee: 0,
                    study_suitable: 0,
                },
                parking: "unknown".to_string(),
                evidence: Vec::new(),
                sources: Vec::new(),
                last_updated: None,
            },
        }
    }
}

#[derive(Deserialize)]
struct BusinessesQuery {
    city: Option<String>,
}

async fn get_businesses(
    State(state): State<ServerState>,
    Query(query): Query<BusinessesQuery>,
) -> Response {
    match state.store.enriched_targets(query.city.as_deref()) {
        Ok(rows) => {
            let data: Vec<BusinessEntry> = rows.into_iter().map(BusinessEntry::from).collect();
            let count = data.len();
            Json(json!({
                "success": true,
                "data": data,
                "count": count,
                "city": query.city,
            }))
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to fetch enriched targets");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": "Failed to fetch business data",
                    "details": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

#[derive(Serialize)]
struct BatchLogEntry {
    batch_id: String,
    status: String,
    target_count: usize,
    success_count: i64,
    error_count: i64,
    total_tokens: i64,
    cost_estimate: f64,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    duration_hours: Option<f64>,
}

impl From<&BatchJob> for BatchLogEntry {
    fn from(job: &BatchJob) -> Self {
        BatchLogEntry {
            batch_id: job.batch_id.clone(),
            status: job.status.as_str().to_string(),
            target_count: job.target_count,
            success_count: job.success_count,
            error_count: job.error_count,
            total_tokens: job.total_tokens,
            cost_estimate: job.cost_estimate,
            created_at: job.created_at,
            completed_at: job.completed_at,
            duration_hours: job.duration_hours(),
        }
    }
}

#[derive(Deserialize)]
struct BatchLogsQuery {
    limit: Option<usize>,
}

const DEFAULT_BATCH_LOG_LIMIT: usize = 50;

async fn get_batch_logs(
    State(state): State<ServerState>,
    Query(query): Query<BatchLogsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_BATCH_LOG_LIMIT);
    match state.store.recent_batches(limit) {
        Ok(jobs) => {
            let logs: Vec<BatchLogEntry> = jobs.iter().map(BatchLogEntry::from).collect();
            let summary = BatchLogSummary::from_jobs(&jobs);
            let count = logs.len();
            Json(json!({
                "success": true,
                "logs": logs,
                "summary": summary,
                "count": count,
            }))
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to fetch batch logs");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": "Failed to fetch batch logs",
                    "details": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

pub fn make_app(state: ServerState) -> Router {
    let cron_routes: Router = Router::new()
        .route("/submit-batch", post(submit_batch))
        .route("/check-batch", post(check_batch))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_cron_secret,
        ))
        .with_state(state.clone());

    let api_routes: Router = Router::new()
        .route("/businesses", get(get_businesses))
        .route("/batch-logs", get(get_batch_logs))
        .with_state(state.clone());

    Router::new()
        .route("/", get(home))
        .with_state(state.clone())
        .nest("/api/cron", cron_routes)
        .nest("/api", api_routes)
}

pub async fn run_server(state: ServerState, port: u16) -> Result<()> {
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;

    Ok(axum::serve(listener, app).await?)
}
