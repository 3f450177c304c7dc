//! Admin endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::admin::BulkDeleteReport;
use crate::error::ServiceResult;
use crate::models::User;
use crate::storage::StorageTier;

use super::super::{AppState, Data};

/// Account summary returned by role-change endpoints; credentials and
/// lockout state stay out of responses
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub role: crate::models::Role,
    pub status: crate::models::AccountStatus,
    pub premium_expires_at: Option<DateTime<Utc>>,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            role: user.role,
            status: user.status,
            premium_expires_at: user.premium_expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteRequest {
    #[serde(default)]
    pub duration_months: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteRequest {
    pub file_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct MigrateRequest {
    pub tier: StorageTier,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryRequest {
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// `POST /api/admin/users/{id}/promote`
pub async fn promote(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<PromoteRequest>,
) -> ServiceResult<Data<UserSummary>> {
    let principal = state.require_principal(&headers).await?;
    let user = state.admin.promote(&principal, &user_id, req.duration_months).await?;
    Ok(Data(user.into()))
}

/// `POST /api/admin/users/{id}/demote`
pub async fn demote(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> ServiceResult<Data<UserSummary>> {
    let principal = state.require_principal(&headers).await?;
    let user = state.admin.demote(&principal, &user_id).await?;
    Ok(Data(user.into()))
}

/// `POST /api/admin/users/{id}/block`
pub async fn block(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> ServiceResult<Data<serde_json::Value>> {
    let principal = state.require_principal(&headers).await?;
    state.admin.block(&principal, &user_id).await?;
    Ok(Data(serde_json::json!({ "blocked": true })))
}

/// `POST /api/admin/users/{id}/restrict`
pub async fn restrict(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> ServiceResult<Data<serde_json::Value>> {
    let principal = state.require_principal(&headers).await?;
    state.admin.restrict(&principal, &user_id).await?;
    Ok(Data(serde_json::json!({ "restricted": true })))
}

/// `POST /api/admin/users/{id}/unblock`
pub async fn unblock(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> ServiceResult<Data<serde_json::Value>> {
    let principal = state.require_principal(&headers).await?;
    state.admin.unblock(&principal, &user_id).await?;
    Ok(Data(serde_json::json!({ "unblocked": true })))
}

/// `POST /api/admin/files/bulk-delete`
pub async fn bulk_delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<BulkDeleteRequest>,
) -> ServiceResult<Data<BulkDeleteReport>> {
    let principal = state.require_principal(&headers).await?;
    Ok(Data(state.admin.bulk_delete(&principal, &req.file_ids).await?))
}

/// `POST /api/admin/files/{id}/migrate`
pub async fn force_migrate(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<MigrateRequest>,
) -> ServiceResult<Data<serde_json::Value>> {
    let principal = state.require_principal(&headers).await?;
    state.admin.force_migrate(&principal, &file_id, req.tier).await?;
    Ok(Data(serde_json::json!({ "migrated": true })))
}

/// `PUT /api/admin/files/{id}/expiry`
pub async fn set_expiry(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ExpiryRequest>,
) -> ServiceResult<Data<serde_json::Value>> {
    let principal = state.require_principal(&headers).await?;
    state.admin.set_expiry(&principal, &file_id, req.expires_at).await?;
    Ok(Data(serde_json::json!({ "updated": true })))
}
