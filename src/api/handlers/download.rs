//! Download endpoints

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;

use crate::error::{ServiceError, ServiceResult};
use crate::models::FileView;
use crate::ratelimit::RateAction;

use super::super::{client_ip, parse_range, AppState, Data};

/// `GET /api/download/info/{file}`: public metadata
pub async fn info(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> ServiceResult<Data<FileView>> {
    let principal = state.principal(&headers).await?;
    Ok(Data(state.downloads.info(&file_id, principal.as_ref()).await?))
}

/// `GET /api/download/{file}`: byte stream with HTTP Range passthrough
pub async fn download(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> ServiceResult<Response> {
    let principal = state.principal(&headers).await?;
    let ip = client_ip(&headers, Some(peer));
    state.limiter.admit(principal.as_ref(), &ip, RateAction::Download)?;

    let range = parse_range(&headers);
    let dl = state.downloads.download(&file_id, principal.as_ref(), &ip, range).await?;

    let status = if dl.meta.range.is_some() { StatusCode::PARTIAL_CONTENT } else { StatusCode::OK };
    let disposition = format!(
        "attachment; filename=\"{}\"",
        dl.meta.file_name.replace(['"', '\\'], "_")
    );

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, dl.meta.mime_type.as_str())
        .header(header::CONTENT_LENGTH, dl.meta.content_length)
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::ACCEPT_RANGES, "bytes");
    if let Some((first, last)) = dl.meta.range {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", first, last, dl.meta.total_size),
        );
    }

    builder
        .body(Body::from_stream(dl.stream))
        .map_err(|e| ServiceError::internal(format!("response build failed: {}", e)))
}
