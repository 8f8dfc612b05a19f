use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::{ApiState, API_PREFIX, FORWARDED_FROM_HEADER};
use crate::cluster::Cluster;
use crate::error::{GenieError, Result};
use crate::job::client_host::FORWARDED_FOR_HEADER;
use crate::job::{resolve_client_host, JobQuery, JobRecord, JobRequest, JobStatus};
use crate::service::DEFAULT_KILL_REASON;

#[derive(Deserialize)]
pub(super) struct KillParams {
    reason: Option<String>,
}

#[derive(Serialize)]
pub(super) struct JobStatusResponse {
    status: JobStatus,
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub(super) async fn submit_job_handler(
    State(state): State<ApiState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let request = JobRequest::from_slice(&body)?;

    let remote = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string());
    let client_host = resolve_client_host(
        header_value(&headers, FORWARDED_FOR_HEADER),
        remote.as_deref(),
    );

    let job = state.service.submit_job(request, client_host).await?;
    let location = format!("{}/jobs/{}", API_PREFIX, job.id);

    Ok((
        StatusCode::ACCEPTED,
        [(header::LOCATION, location)],
        Json(job),
    ))
}

pub(super) async fn get_job_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>> {
    Ok(Json(state.service.get_job(&id).await?))
}

pub(super) async fn job_status_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>> {
    let record = state.service.get_job(&id).await?;
    Ok(Json(JobStatusResponse {
        status: record.job.status,
    }))
}

pub(super) async fn list_jobs_handler(
    State(state): State<ApiState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<JobRecord>>> {
    let query = JobQuery::from_params(params)?;
    Ok(Json(state.service.find_jobs(&query).await))
}

pub(super) async fn kill_job_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<KillParams>,
    headers: HeaderMap,
) -> Result<Json<JobRecord>> {
    let reason = params
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_KILL_REASON.to_string());

    match state.service.kill_job(&id, &reason).await {
        Err(GenieError::JobNotFound(_)) => {
            let forwarded_from = header_value(&headers, FORWARDED_FROM_HEADER);
            if let Some(origin) = forwarded_from {
                tracing::debug!(job_id = %id, origin, "Forwarded kill for unknown job");
                return Err(GenieError::JobNotFound(id));
            }
            state
                .forwarder
                .kill_job(&id, Some(&reason))
                .await
                .map(Json)
                .ok_or(GenieError::JobNotFound(id))
        }
        result => result.map(Json),
    }
}

pub(super) async fn list_clusters_handler(
    State(state): State<ApiState>,
) -> Result<Json<Vec<Cluster>>> {
    let clusters = state
        .service
        .registry()
        .clusters()
        .registry()
        .all_clusters()
        .await?;
    Ok(Json(clusters))
}
