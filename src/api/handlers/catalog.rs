//! Folder and file organization endpoints

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use crate::error::ServiceResult;
use crate::models::{FileView, Folder};

use super::super::{AppState, Data};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderScope {
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileScope {
    #[serde(default)]
    pub folder_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderRequest {
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveFolderRequest {
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveFileRequest {
    #[serde(default)]
    pub folder_id: Option<String>,
}

/// `GET /api/folders?parentId=`
pub async fn list_folders(
    State(state): State<Arc<AppState>>,
    Query(scope): Query<FolderScope>,
    headers: HeaderMap,
) -> ServiceResult<Data<Vec<Folder>>> {
    let principal = state.require_principal(&headers).await?;
    Ok(Data(state.catalog.list_folders(&principal, scope.parent_id.as_deref()).await?))
}

/// `POST /api/folders`
pub async fn create_folder(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateFolderRequest>,
) -> ServiceResult<Data<Folder>> {
    let principal = state.require_principal(&headers).await?;
    Ok(Data(state.catalog.create_folder(&principal, &req.name, req.parent_id.as_deref()).await?))
}

/// `POST /api/folders/{id}/rename`
pub async fn rename_folder(
    State(state): State<Arc<AppState>>,
    Path(folder_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<RenameRequest>,
) -> ServiceResult<Data<Folder>> {
    let principal = state.require_principal(&headers).await?;
    Ok(Data(state.catalog.rename_folder(&principal, &folder_id, &req.name).await?))
}

/// `POST /api/folders/{id}/move`
pub async fn move_folder(
    State(state): State<Arc<AppState>>,
    Path(folder_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<MoveFolderRequest>,
) -> ServiceResult<Data<Folder>> {
    let principal = state.require_principal(&headers).await?;
    Ok(Data(state.catalog.move_folder(&principal, &folder_id, req.parent_id.as_deref()).await?))
}

/// `DELETE /api/folders/{id}`
pub async fn delete_folder(
    State(state): State<Arc<AppState>>,
    Path(folder_id): Path<String>,
    headers: HeaderMap,
) -> ServiceResult<Data<serde_json::Value>> {
    let principal = state.require_principal(&headers).await?;
    state.catalog.delete_folder(&principal, &folder_id).await?;
    Ok(Data(serde_json::json!({ "deleted": true })))
}

/// `GET /api/files?folderId=`
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    Query(scope): Query<FileScope>,
    headers: HeaderMap,
) -> ServiceResult<Data<Vec<FileView>>> {
    let principal = state.require_principal(&headers).await?;
    let files = state.catalog.list_files(&principal, scope.folder_id.as_deref()).await?;
    Ok(Data(files.iter().map(FileView::from).collect()))
}

/// `POST /api/files/{id}/rename`
pub async fn rename_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<RenameRequest>,
) -> ServiceResult<Data<FileView>> {
    let principal = state.require_principal(&headers).await?;
    let file = state.catalog.rename_file(&principal, &file_id, &req.name).await?;
    Ok(Data(FileView::from(&file)))
}

/// `POST /api/files/{id}/move`
pub async fn move_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<MoveFileRequest>,
) -> ServiceResult<Data<FileView>> {
    let principal = state.require_principal(&headers).await?;
    let file = state.catalog.move_file(&principal, &file_id, req.folder_id.as_deref()).await?;
    Ok(Data(FileView::from(&file)))
}

/// `DELETE /api/files/{id}`: owner soft delete
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> ServiceResult<Data<serde_json::Value>> {
    let principal = state.require_principal(&headers).await?;
    state.catalog.delete_file(&principal, &file_id).await?;
    Ok(Data(serde_json::json!({ "deleted": true })))
}
