use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::HealthState;
use crate::api::latency::{LatencySummary, ProviderLatency};
use crate::error::AppError;
use crate::state::ReportStore;
use crate::types::{Exclusion, ExclusionReason, RankedMarket, ResultRow, ScanReport};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<ReportStore>,
    pub health: Arc<HealthState>,
    pub latency: Arc<ProviderLatency>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/rankings", get(get_rankings))
        .route("/rankings/calm", get(get_calm_rankings))
        .route("/exclusions", get(get_exclusions))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RankingsQuery {
    pub limit: Option<usize>,
    pub min_score: Option<f64>,
}

#[derive(Deserialize)]
pub struct ExclusionsQuery {
    pub reason: Option<ExclusionReason>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub scanning: bool,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub last_run_at: Option<i64>,
    pub last_ranked: u64,
    pub last_excluded: u64,
}

#[derive(Serialize)]
pub struct RankingsResponse {
    pub run_id: u64,
    pub finished_at: i64,
    pub timed_out: bool,
    /// Rows in the underlying view before `limit`/`min_score`.
    pub total: usize,
    pub rows: Vec<ResultRow>,
}

#[derive(Serialize)]
pub struct ExclusionsResponse {
    pub run_id: u64,
    pub counts: BTreeMap<ExclusionReason, usize>,
    pub exclusions: Vec<Exclusion>,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub listing: LatencySummary,
    pub book: LatencySummary,
    pub history: LatencySummary,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let h = &state.health;
    let last_run_at = h.last_run_at();
    Json(HealthResponse {
        status: if state.store.has_report() { "ok" } else { "starting" },
        scanning: h.scanning(),
        runs_completed: h.runs_completed(),
        runs_failed: h.runs_failed(),
        last_run_at: (last_run_at > 0).then_some(last_run_at),
        last_ranked: h.last_ranked(),
        last_excluded: h.last_excluded(),
    })
}

async fn get_rankings(
    State(state): State<ApiState>,
    Query(params): Query<RankingsQuery>,
) -> Result<Json<RankingsResponse>, AppError> {
    let report = latest_report(&state)?;
    Ok(Json(rankings_response(&report, &report.ranked, &params)))
}

async fn get_calm_rankings(
    State(state): State<ApiState>,
    Query(params): Query<RankingsQuery>,
) -> Result<Json<RankingsResponse>, AppError> {
    let report = latest_report(&state)?;
    Ok(Json(rankings_response(&report, &report.calm, &params)))
}

async fn get_exclusions(
    State(state): State<ApiState>,
    Query(params): Query<ExclusionsQuery>,
) -> Result<Json<ExclusionsResponse>, AppError> {
    let report = latest_report(&state)?;
    let exclusions = report
        .exclusions
        .iter()
        .filter(|e| params.reason.map_or(true, |r| e.reason == r))
        .cloned()
        .collect();

    Ok(Json(ExclusionsResponse {
        run_id: report.run_id,
        counts: report.exclusion_counts.clone(),
        exclusions,
    }))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    Json(LatencyResponse {
        listing: state.latency.listing.summary(),
        book: state.latency.book.summary(),
        history: state.latency.history.summary(),
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn latest_report(state: &ApiState) -> Result<Arc<ScanReport>, AppError> {
    state
        .store
        .latest()
        .ok_or_else(|| AppError::NotReady("first scan has not completed yet".to_string()))
}

fn rankings_response(
    report: &ScanReport,
    view: &[RankedMarket],
    params: &RankingsQuery,
) -> RankingsResponse {
    RankingsResponse {
        run_id: report.run_id,
        finished_at: report.finished_at,
        timed_out: report.timed_out,
        total: view.len(),
        rows: select_rows(view, params.limit, params.min_score),
    }
}

/// Rows in ranked order, optionally cut at a score floor and a row cap.
fn select_rows(view: &[RankedMarket], limit: Option<usize>, min_score: Option<f64>) -> Vec<ResultRow> {
    let min_score = min_score.unwrap_or(f64::NEG_INFINITY);
    view.iter()
        .filter(|m| m.score >= min_score)
        .take(limit.unwrap_or(usize::MAX))
        .map(RankedMarket::to_row)
        .collect()
}
