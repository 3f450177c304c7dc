//! Admission rate limiting
//!
//! Token buckets keyed by `(subject, action)`: the subject is the user id
//! for authenticated calls and the client IP for anonymous ones. Buckets
//! refill continuously over the configured window and live in process
//! memory; they are advisory capacity control, not accounting.
//!
//! Account standing is enforced here as well: restricted accounts lose all
//! upload actions, blocked accounts lose every authenticated action.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;

use crate::config::{ActionLimits, RateLimitConfig};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{AccountStatus, Principal, Role};

/// Rate-limited action classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateAction {
    Upload,
    Download,
    Auth,
}

impl RateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateAction::Upload => "upload",
            RateAction::Download => "download",
            RateAction::Auth => "auth",
        }
    }
}

/// Who the bucket belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateSubject {
    User { id: String, role: Role },
    Ip(String),
}

impl RateSubject {
    /// Bucket key
    fn to_key(&self, action: RateAction) -> String {
        match self {
            RateSubject::User { id, .. } => format!("user:{}:{}", id, action.as_str()),
            RateSubject::Ip(ip) => format!("ip:{}:{}", ip, action.as_str()),
        }
    }

    /// Principal-derived subject, or an IP subject when anonymous
    pub fn from_principal(principal: Option<&Principal>, client_ip: &str) -> Self {
        match principal {
            Some(p) => RateSubject::User { id: p.user_id.clone(), role: p.role },
            None => RateSubject::Ip(client_ip.to_string()),
        }
    }
}

/// Rate limiting decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed {
        /// Whole tokens left after this request
        remaining: u64,
    },
    Denied {
        /// Seconds until enough tokens exist for one request
        retry_after: u64,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_used: Instant,
}

/// Token-bucket admission layer
pub struct RateLimiter {
    cfg: RateLimitConfig,
    buckets: DashMap<String, Bucket>,
    checks: AtomicU64,
}

/// Opportunistic stale-bucket sweep cadence, in checks
const SWEEP_EVERY: u64 = 4096;

impl RateLimiter {
    pub fn new(cfg: RateLimitConfig) -> Self {
        Self { cfg, buckets: DashMap::new(), checks: AtomicU64::new(0) }
    }

    fn capacity(&self, subject: &RateSubject, action: RateAction) -> u64 {
        let limits: &ActionLimits = match action {
            RateAction::Upload => &self.cfg.upload,
            RateAction::Download => &self.cfg.download,
            RateAction::Auth => &self.cfg.auth,
        };
        match subject {
            RateSubject::Ip(_) => limits.anonymous,
            RateSubject::User { role, .. } => match role {
                Role::Free => limits.free,
                Role::Premium => limits.premium,
                Role::Admin => limits.admin,
            },
        }
    }

    /// Take one token from the subject's bucket for `action`
    pub fn check(&self, subject: &RateSubject, action: RateAction) -> RateDecision {
        let window = self.cfg.window.as_secs_f64().max(1.0);
        let capacity = self.capacity(subject, action);
        if capacity == 0 {
            return RateDecision::Denied { retry_after: window as u64 };
        }
        let refill_per_sec = capacity as f64 / window;

        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep_stale();
        }

        let now = Instant::now();
        let mut entry = self.buckets.entry(subject.to_key(action)).or_insert_with(|| Bucket {
            tokens: capacity as f64,
            last_refill: now,
            last_used: now,
        });
        let bucket = entry.value_mut();

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(capacity as f64);
        bucket.last_refill = now;
        bucket.last_used = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateDecision::Allowed { remaining: bucket.tokens as u64 }
        } else {
            let deficit = 1.0 - bucket.tokens;
            RateDecision::Denied { retry_after: (deficit / refill_per_sec).ceil() as u64 }
        }
    }

    /// Standing gate plus bucket check, mapped to the error taxonomy
    pub fn admit(
        &self,
        principal: Option<&Principal>,
        client_ip: &str,
        action: RateAction,
    ) -> ServiceResult<()> {
        if let Some(p) = principal {
            match (p.status, action) {
                (AccountStatus::Blocked, _) => {
                    return Err(ServiceError::forbidden("account is blocked"))
                }
                (AccountStatus::Restricted, RateAction::Upload) => {
                    return Err(ServiceError::forbidden("account is restricted"))
                }
                _ => {}
            }
        }
        let subject = RateSubject::from_principal(principal, client_ip);
        match self.check(&subject, action) {
            RateDecision::Allowed { .. } => Ok(()),
            RateDecision::Denied { retry_after } => Err(ServiceError::RateLimited { retry_after }),
        }
    }

    /// Drop buckets idle for more than two windows
    fn sweep_stale(&self) {
        let ttl = self.cfg.window.saturating_mul(2);
        self.buckets.retain(|_, bucket| bucket.last_used.elapsed() < ttl);
    }

    /// Live bucket count; metrics and tests
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
