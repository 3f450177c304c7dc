//! HTTP surface
//!
//! A thin axum edge over the core services: bearer principals, request
//! decoding, the JSON envelope, and error mapping. Token issuance lives
//! outside the core; the edge only resolves an opaque bearer token into a
//! `Principal` through the pluggable `PrincipalResolver`.

mod handlers;
mod responses;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use dashmap::DashMap;
use serde::Serialize;

use crate::admin::AdminOps;
use crate::catalog::Catalog;
use crate::download::DownloadService;
use crate::error::{ServiceError, ServiceResult};
use crate::models::Principal;
use crate::ratelimit::RateLimiter;
use crate::storage::ByteRange;
use crate::upload::UploadManager;

pub use responses::Data;
pub use routes::router;

/// Resolve an opaque bearer token into an authenticated principal.
/// Issuance, refresh, and revocation are the auth service's concern.
#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> ServiceResult<Principal>;
}

/// Fixed token table; development deployments and tests
#[derive(Default)]
pub struct StaticTokenResolver {
    tokens: DashMap<String, Principal>,
}

impl StaticTokenResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, principal: Principal) {
        self.tokens.insert(token.into(), principal);
    }
}

#[async_trait]
impl PrincipalResolver for StaticTokenResolver {
    async fn resolve(&self, token: &str) -> ServiceResult<Principal> {
        self.tokens
            .get(token)
            .map(|p| p.clone())
            .ok_or(ServiceError::Authentication)
    }
}

/// What `GET /upload/storage-info` reports
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub provider: &'static str,
    /// Whether the direct (presigned multipart) variant is available
    pub direct_uploads: bool,
    pub chunk_size: u64,
    pub part_size: u64,
    pub presigned_expiry_seconds: u64,
}

/// Shared handler state
pub struct AppState {
    pub uploads: Arc<UploadManager>,
    pub downloads: Arc<DownloadService>,
    pub catalog: Arc<Catalog>,
    pub admin: Arc<AdminOps>,
    pub limiter: Arc<RateLimiter>,
    pub resolver: Arc<dyn PrincipalResolver>,
    pub storage_info: StorageInfo,
}

impl AppState {
    /// Principal from the Authorization header; `None` for anonymous
    /// requests, `Authentication` for present-but-invalid credentials
    pub async fn principal(&self, headers: &HeaderMap) -> ServiceResult<Option<Principal>> {
        let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
            return Ok(None);
        };
        let raw = value.to_str().map_err(|_| ServiceError::Authentication)?;
        let token = raw.strip_prefix("Bearer ").ok_or(ServiceError::Authentication)?.trim();
        if token.is_empty() {
            return Err(ServiceError::Authentication);
        }
        Ok(Some(self.resolver.resolve(token).await?))
    }

    /// Principal or 401
    pub async fn require_principal(&self, headers: &HeaderMap) -> ServiceResult<Principal> {
        self.principal(headers).await?.ok_or(ServiceError::Authentication)
    }
}

/// Client address for rate limiting and download tracking; a proxy-supplied
/// `X-Forwarded-For` wins over the socket peer
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Single-range `Range` header, passed through byte-for-byte. Multi-range
/// and suffix forms are not served partially; the full object goes out
/// instead, which HTTP permits.
pub fn parse_range(headers: &HeaderMap) -> Option<ByteRange> {
    let raw = headers.get(axum::http::header::RANGE)?.to_str().ok()?;
    let ranges = raw.strip_prefix("bytes=")?;
    if ranges.contains(',') {
        return None;
    }
    let (start, end) = ranges.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => None,
        e => Some(e.parse::<u64>().ok()?),
    };
    if matches!(end, Some(e) if e < start) {
        return None;
    }
    Some(ByteRange { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn range_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert("range", HeaderValue::from_static("bytes=0-99"));
        assert_eq!(parse_range(&headers), Some(ByteRange { start: 0, end: Some(99) }));

        headers.insert("range", HeaderValue::from_static("bytes=500-"));
        assert_eq!(parse_range(&headers), Some(ByteRange { start: 500, end: None }));

        headers.insert("range", HeaderValue::from_static("bytes=5-2"));
        assert_eq!(parse_range(&headers), None);

        headers.insert("range", HeaderValue::from_static("bytes=0-1,5-9"));
        assert_eq!(parse_range(&headers), None);

        headers.insert("range", HeaderValue::from_static("items=0-1"));
        assert_eq!(parse_range(&headers), None);
    }

    #[test]
    fn forwarded_header_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        let peer: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.9");
        assert_eq!(client_ip(&HeaderMap::new(), Some(peer)), "127.0.0.1");
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[tokio::test]
    async fn static_resolver_round_trip() {
        use crate::models::{AccountStatus, Role};
        let resolver = StaticTokenResolver::new();
        resolver.insert("tok", Principal::new("u1", Role::Free, AccountStatus::Active));
        assert_eq!(resolver.resolve("tok").await.unwrap().user_id, "u1");
        assert!(matches!(
            resolver.resolve("nope").await.unwrap_err(),
            ServiceError::Authentication
        ));
    }
}
