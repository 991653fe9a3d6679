use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::de::DeserializeOwned;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{AuditFilter, CustomerFilter, FlagFilter, TransactionFilter};
use crate::error::{AnalysisError, PipelineError, ReviewError};
use crate::review::ReviewSubmission;
use crate::types::{AuditStatus, FlagStatus, LlmRiskLevel, RiskLevel};

use super::types::*;
use super::AppState;

/// Header carrying the reviewer's identity on review submissions.
pub const REVIEWER_HEADER: &str = "x-reviewer-id";

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: msg.into(),
        }),
    )
}

fn pipeline_error(e: PipelineError) -> ApiError {
    let status = match &e {
        PipelineError::TransactionNotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        PipelineError::Analysis(inner) => match inner {
            AnalysisError::Disabled => StatusCode::SERVICE_UNAVAILABLE,
            AnalysisError::FlagNotFound(_)
            | AnalysisError::TransactionNotFound(_)
            | AnalysisError::CustomerNotFound(_) => StatusCode::NOT_FOUND,
            AnalysisError::Llm(_) => StatusCode::BAD_GATEWAY,
            AnalysisError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
        PipelineError::Review(inner) => match inner {
            ReviewError::FlagNotFound(_) => StatusCode::NOT_FOUND,
            ReviewError::UnreviewedVerdict
            | ReviewError::MissingReviewer
            | ReviewError::NotesTooLong { .. } => StatusCode::BAD_REQUEST,
            ReviewError::Stale(_) => StatusCode::CONFLICT,
            ReviewError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
        PipelineError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %e, "API request failed");
    }
    api_error(status, e.to_string())
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid id '{}': {}", raw, e)))
}

fn parse_filter<T: FromStr>(raw: Option<&str>) -> Result<Option<T>, ApiError>
where
    T::Err: std::fmt::Display,
{
    raw.map(|value| T::from_str(value).map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string())))
        .transpose()
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e)))
}

/// Flag listings show the pending queue unless asked otherwise; `all` lifts the filter.
fn flag_status_filter(raw: Option<&str>) -> Result<Option<FlagStatus>, ApiError> {
    match raw {
        None => Ok(Some(FlagStatus::Pending)),
        Some("all") => Ok(None),
        Some(value) => parse_filter::<FlagStatus>(Some(value)),
    }
}

/// An empty body means "all defaults".
fn parse_optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_json(body)
}

// ============================================================
// Health, Stats & Rules
// ============================================================

pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    Ok(Json(HealthResponse {
        status: "healthy",
        llm_enabled: state.pipeline.llm_enabled(),
        timestamp: Utc::now(),
    }))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<StatsResponse> {
    let stats = state.pipeline.get_stats().await.map_err(pipeline_error)?;
    Ok(Json(StatsResponse::new(stats, state.pipeline.llm_enabled())))
}

pub async fn rules(State(state): State<Arc<AppState>>) -> ApiResult<RulesResponse> {
    let available_rules = state.pipeline.list_rules();
    Ok(Json(RulesResponse {
        success: true,
        total_rules: available_rules.len(),
        available_rules,
    }))
}

// ============================================================
// Rule Engine
// ============================================================

pub async fn run_rules(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<RunRulesResponse> {
    let request: RunRulesRequest = parse_optional_json(&body)?;
    state
        .pipeline
        .run_rules(request.transaction_id, request.run_llm_analysis)
        .await
        .map(|report| Json(report.into()))
        .map_err(pipeline_error)
}

// ============================================================
// Flagged Transactions
// ============================================================

pub async fn list_flagged(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FlaggedParams>,
) -> ApiResult<FlaggedTransactionsResponse> {
    let limit = params.limit.unwrap_or(100).min(1000);
    let offset = params.offset.unwrap_or(0);
    let include_llm = params.include_llm.unwrap_or(true);
    let status = flag_status_filter(params.status.as_deref())?;

    let filter = FlagFilter {
        risk_level: parse_filter::<RiskLevel>(params.risk_level.as_deref())?,
        llm_risk_level: parse_filter::<LlmRiskLevel>(params.llm_risk_level.as_deref())?,
        rule_name: params.rule_name.clone(),
        status,
        limit,
        offset,
    };

    let page = state
        .pipeline
        .list_flagged(filter)
        .await
        .map_err(pipeline_error)?;

    Ok(Json(FlaggedTransactionsResponse {
        success: true,
        flagged_transactions: page
            .flags
            .into_iter()
            .map(|record| FlagView::from_record(record, include_llm))
            .collect(),
        total_results: page.total_results,
        filters_applied: FiltersApplied {
            risk_level: params.risk_level,
            llm_risk_level: params.llm_risk_level,
            rule_name: params.rule_name,
            status: Some(
                status
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|| "all".to_string()),
            ),
            include_llm,
            limit,
            offset,
        },
    }))
}

pub async fn submit_review(
    State(state): State<Arc<AppState>>,
    Path(flag_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<ReviewResponse> {
    let flag_id = parse_id(&flag_id)?;
    let request: ReviewRequest = parse_json(&body)?;
    let reviewer = headers
        .get(REVIEWER_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let record = state
        .pipeline
        .submit_review(ReviewSubmission {
            flag_id,
            verdict: request.review_status,
            notes: request.review_notes,
            reviewer,
            reviewed_at: Utc::now(),
        })
        .await
        .map_err(pipeline_error)?;

    Ok(Json(ReviewResponse {
        success: true,
        flag_id,
        review_status: record.verdict,
        reviewed_by: record.reviewer,
        reviewed_at: record.reviewed_at,
    }))
}

pub async fn transaction_explanation(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
) -> ApiResult<ExplanationResponse> {
    let transaction_id = parse_id(&transaction_id)?;
    state
        .pipeline
        .get_explanation(transaction_id)
        .await
        .map(|explanation| Json(explanation.into()))
        .map_err(pipeline_error)
}

// ============================================================
// Transactions & Customers
// ============================================================

pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TransactionParams>,
) -> ApiResult<TransactionsResponse> {
    let filter = TransactionFilter {
        transaction_type: params.transaction_type,
        min_amount: parse_filter::<BigDecimal>(params.min_amount.as_deref())?,
        max_amount: parse_filter::<BigDecimal>(params.max_amount.as_deref())?,
        limit: params.limit.unwrap_or(50).min(1000),
        offset: params.offset.unwrap_or(0),
    };
    state
        .pipeline
        .list_transactions(filter)
        .await
        .map(|page| Json(page.into()))
        .map_err(pipeline_error)
}

pub async fn list_customers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CustomerParams>,
) -> ApiResult<CustomersResponse> {
    let filter = CustomerFilter {
        min_risk_score: params.risk_score,
        country_code: params.country_code,
        limit: params.limit.unwrap_or(50).min(1000),
        offset: params.offset.unwrap_or(0),
    };
    state
        .pipeline
        .list_customers(filter)
        .await
        .map(|page| Json(page.into()))
        .map_err(pipeline_error)
}

// ============================================================
// LLM Analysis & Audit
// ============================================================

pub async fn analyze(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<AnalyzeResponse> {
    let request: AnalyzeRequest = parse_optional_json(&body)?;
    state
        .pipeline
        .analyze(
            request.batch_limit,
            request.transaction_id,
            request.flagged_transaction_id,
        )
        .await
        .map(|outcome| Json(outcome.into()))
        .map_err(pipeline_error)
}

pub async fn llm_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditParams>,
) -> ApiResult<AuditResponse> {
    let filter = AuditFilter {
        status: parse_filter::<AuditStatus>(params.status.as_deref())?,
        transaction_id: params.transaction_id,
        since: params.since,
        until: params.until,
        limit: Some(params.limit.unwrap_or(50).min(1000)),
    };
    state
        .pipeline
        .get_audit(filter)
        .await
        .map(|report| Json(report.into()))
        .map_err(pipeline_error)
}
