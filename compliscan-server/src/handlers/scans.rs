use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use compliscan_core::{
    control::{ScanList, ScanSnapshot},
    submission::{SubmitScan, SubmittedScan},
    types::{JobId, Report, ScanJob, ScanStatus},
};
use serde::{Deserialize, Serialize};

use crate::infra::{
    app_state::AppState,
    errors::{ApiResponse, AppError, AppResult},
    tenant::Tenant,
};

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

/// Body of cancel and retry responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStateChange {
    pub job_id: JobId,
    pub status: ScanStatus,
}

impl From<&ScanJob> for ScanStateChange {
    fn from(job: &ScanJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
        }
    }
}

pub async fn submit_scan_handler(
    Tenant(tenant_id): Tenant,
    State(state): State<AppState>,
    body: Result<Json<SubmitScan>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ApiResponse<SubmittedScan>>)> {
    let Json(request) =
        body.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let submitted = state.submissions.submit(tenant_id, request).await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(submitted))))
}

pub async fn list_scans_handler(
    Tenant(tenant_id): Tenant,
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<ScanList>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let list = state.control.list(tenant_id, limit).await?;
    Ok(Json(ApiResponse::success(list)))
}

pub async fn get_scan_handler(
    Tenant(tenant_id): Tenant,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<Json<ApiResponse<ScanSnapshot>>> {
    let snapshot = state.control.status(tenant_id, job_id).await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

pub async fn cancel_scan_handler(
    Tenant(tenant_id): Tenant,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<Json<ApiResponse<ScanStateChange>>> {
    let job = state.control.cancel(tenant_id, job_id).await?;
    Ok(Json(ApiResponse::success(ScanStateChange::from(&job))))
}

pub async fn retry_scan_handler(
    Tenant(tenant_id): Tenant,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<(StatusCode, Json<ApiResponse<ScanStateChange>>)> {
    let job = state.control.retry(tenant_id, job_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(ScanStateChange::from(&job))),
    ))
}

pub async fn get_report_handler(
    Tenant(tenant_id): Tenant,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<Json<ApiResponse<Report>>> {
    let report = state.control.report(tenant_id, job_id).await?;
    Ok(Json(ApiResponse::success(report)))
}
