//! Upload endpoints, both variants

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;

use crate::error::ServiceResult;
use crate::ratelimit::RateAction;
use crate::storage::CompletedPart;
use crate::upload::{
    ChunkReceipt, CompleteResponse, DirectInitResponse, InitRequest, InitResponse, ResumeView,
    SessionView,
};

use super::super::{client_ip, AppState, Data};

/// `POST /api/upload/init`
pub async fn init(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<InitRequest>,
) -> ServiceResult<Data<InitResponse>> {
    let principal = state.require_principal(&headers).await?;
    state.limiter.admit(Some(&principal), &client_ip(&headers, Some(peer)), RateAction::Upload)?;
    Ok(Data(state.uploads.init(&principal, req).await?))
}

/// `PUT /api/upload/chunk/{session}/{index}`: raw binary body, optional
/// `X-Chunk-Hash` with the hex SHA-256 of the chunk
pub async fn put_chunk(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path((session_id, index)): Path<(String, u32)>,
    headers: HeaderMap,
    body: Bytes,
) -> ServiceResult<Data<ChunkReceipt>> {
    let principal = state.require_principal(&headers).await?;
    state.limiter.admit(Some(&principal), &client_ip(&headers, Some(peer)), RateAction::Upload)?;
    let chunk_hash = headers.get("x-chunk-hash").and_then(|v| v.to_str().ok());
    Ok(Data(state.uploads.put_chunk(&principal, &session_id, index, body, chunk_hash).await?))
}

/// `GET /api/upload/status/{session}`
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> ServiceResult<Data<SessionView>> {
    let principal = state.require_principal(&headers).await?;
    Ok(Data(state.uploads.status(&principal, &session_id).await?))
}

/// `GET /api/upload/resume/{session}`
pub async fn resume(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> ServiceResult<Data<ResumeView>> {
    let principal = state.require_principal(&headers).await?;
    Ok(Data(state.uploads.resume(&principal, &session_id).await?))
}

/// `POST /api/upload/complete/{session}`
pub async fn complete(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> ServiceResult<Data<CompleteResponse>> {
    let principal = state.require_principal(&headers).await?;
    state.limiter.admit(Some(&principal), &client_ip(&headers, Some(peer)), RateAction::Upload)?;
    Ok(Data(state.uploads.complete(&principal, &session_id).await?))
}

/// `DELETE /api/upload/abort/{session}`
pub async fn abort(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> ServiceResult<Data<serde_json::Value>> {
    let principal = state.require_principal(&headers).await?;
    state.uploads.abort(&principal, &session_id).await?;
    Ok(Data(serde_json::json!({ "aborted": true })))
}

/// `POST /api/upload/direct/init`
pub async fn direct_init(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<InitRequest>,
) -> ServiceResult<Data<DirectInitResponse>> {
    let principal = state.require_principal(&headers).await?;
    state.limiter.admit(Some(&principal), &client_ip(&headers, Some(peer)), RateAction::Upload)?;
    Ok(Data(state.uploads.init_direct(&principal, req).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectCompleteRequest {
    pub parts: Vec<CompletedPart>,
}

/// `POST /api/upload/direct/complete/{session}`
pub async fn direct_complete(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<DirectCompleteRequest>,
) -> ServiceResult<Data<CompleteResponse>> {
    let principal = state.require_principal(&headers).await?;
    state.limiter.admit(Some(&principal), &client_ip(&headers, Some(peer)), RateAction::Upload)?;
    Ok(Data(state.uploads.complete_direct(&principal, &session_id, req.parts).await?))
}

/// `DELETE /api/upload/direct/abort/{session}`
pub async fn direct_abort(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> ServiceResult<Data<serde_json::Value>> {
    let principal = state.require_principal(&headers).await?;
    state.uploads.abort_direct(&principal, &session_id).await?;
    Ok(Data(serde_json::json!({ "aborted": true })))
}
