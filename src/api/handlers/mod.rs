//! Request handlers, grouped by surface

pub mod admin;
pub mod catalog;
pub mod download;
pub mod upload;

use axum::extract::State;
use std::sync::Arc;

use super::{AppState, Data};

/// Liveness probe
pub async fn health() -> &'static str {
    "ok"
}

/// Provider capabilities the web client needs before choosing an upload
/// variant
pub async fn storage_info(State(state): State<Arc<AppState>>) -> Data<super::StorageInfo> {
    Data(state.storage_info.clone())
}
