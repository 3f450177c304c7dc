//! Service configuration
//!
//! Configuration is read once at startup from environment variables and is
//! fatal on malformed values. Every section carries production defaults so a
//! bare `STORAGE_PROVIDER=local` deployment works out of the box.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading errors; these abort startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    #[error("missing required option {0}")]
    Missing(&'static str),
}

/// Which blob-store backend the service runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageBackend {
    /// Local filesystem with hot/cold directory prefixes
    Local,
    /// S3-compatible object store (AWS S3, R2, MinIO)
    S3,
    /// In-process store; ephemeral deployments and tests
    Memory,
}

/// S3-compatible backend credentials and addressing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services; path-style addressing is
    /// used whenever this is set
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: String::new(),
            secret_access_key: String::new(),
        }
    }
}

/// Storage provider selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the local backend
    pub local_root: PathBuf,
    pub s3: S3Config,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_root: PathBuf::from("./data/objects"),
            s3: S3Config::default(),
        }
    }
}

/// Upload protocol tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Proxied chunk size in bytes
    pub chunk_size: u64,
    /// Direct-variant part size in bytes; must stay >= `MIN_PART_SIZE`
    pub part_size: u64,
    /// Per-file size ceiling for free users; -1 = unlimited
    pub max_file_size_free: i64,
    /// Per-file size ceiling for premium users; -1 = unlimited
    pub max_file_size_premium: i64,
    /// Upload session time-to-live
    pub session_ttl: Duration,
    /// Presigned part-URL validity
    pub presigned_expiry: Duration,
    /// Mime types accepted at init; empty = accept everything
    pub allowed_mime_types: Vec<String>,
}

impl UploadConfig {
    /// S3 lower bound for every part except the last
    pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: 16 * 1024 * 1024,
            part_size: 25 * 1024 * 1024,
            max_file_size_free: 10 * 1024 * 1024 * 1024,
            max_file_size_premium: -1,
            session_ttl: Duration::from_secs(24 * 3600),
            presigned_expiry: Duration::from_secs(24 * 3600),
            allowed_mime_types: Vec::new(),
        }
    }
}

/// Quota limits seeded per role; -1 = unlimited
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaDefaults {
    pub free_max_storage: i64,
    pub free_max_files: i64,
    pub premium_max_storage: i64,
    pub premium_max_files: i64,
}

impl Default for QuotaDefaults {
    fn default() -> Self {
        Self {
            free_max_storage: 50 * 1024 * 1024 * 1024,
            free_max_files: 10_000,
            premium_max_storage: -1,
            premium_max_files: -1,
        }
    }
}

/// Expiry, anti-abuse, and tier-migration thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Days until a free user's file expires after creation
    pub expiry_days_free: i64,
    /// Distinct downloader IPs that trigger anti-abuse shortening
    pub download_threshold: usize,
    /// Days of life left once the threshold trips
    pub days_after_threshold: i64,
    /// Days without access before any user's file is deleted
    pub inactivity_days: i64,
    /// Days without access before a hot object moves to cold
    pub hot_to_cold_days: i64,
    /// Downloads within one tiering cycle that pull a cold object back to hot
    pub cold_to_hot_downloads: u64,
    /// Upper bound on the unique-downloader IP set
    pub unique_ip_cap: usize,
    /// Time a soft-deleted record lingers before hard removal
    pub soft_delete_grace: Duration,
    /// Days of grace granted to files of a downgraded premium user
    pub downgrade_grace_days: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            expiry_days_free: 5,
            download_threshold: 5,
            days_after_threshold: 1,
            inactivity_days: 90,
            hot_to_cold_days: 7,
            cold_to_hot_downloads: 5,
            unique_ip_cap: 1024,
            soft_delete_grace: Duration::from_secs(24 * 3600),
            downgrade_grace_days: 5,
        }
    }
}

/// Background worker cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub expiry_interval: Duration,
    pub inactivity_interval: Duration,
    pub tiering_interval: Duration,
    pub premium_interval: Duration,
    pub session_gc_interval: Duration,
    /// Items handled per job cycle; the remainder waits for the next tick
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let hour = Duration::from_secs(3600);
        Self {
            expiry_interval: hour,
            inactivity_interval: hour,
            tiering_interval: hour,
            premium_interval: hour,
            session_gc_interval: hour,
            batch_size: 100,
        }
    }
}

/// Per-action token-bucket capacities within one refill window
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ActionLimits {
    pub free: u64,
    pub premium: u64,
    pub admin: u64,
    /// Applied per client IP when no principal is present
    pub anonymous: u64,
}

/// Admission rate limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket refill window
    pub window: Duration,
    pub upload: ActionLimits,
    pub download: ActionLimits,
    pub auth: ActionLimits,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            upload: ActionLimits { free: 30, premium: 120, admin: 600, anonymous: 0 },
            download: ActionLimits { free: 120, premium: 600, admin: 6000, anonymous: 60 },
            auth: ActionLimits { free: 10, premium: 10, admin: 30, anonymous: 10 },
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP bind address
    pub bind_addr: String,
    /// Base URL used when composing download links
    pub public_base_url: String,
    /// Directory holding the embedded metadata store
    pub metadata_path: PathBuf,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub quota: QuotaDefaults,
    pub lifecycle: LifecycleConfig,
    pub workers: WorkerConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            metadata_path: PathBuf::from("./data/meta"),
            storage: StorageConfig::default(),
            upload: UploadConfig::default(),
            quota: QuotaDefaults::default(),
            lifecycle: LifecycleConfig::default(),
            workers: WorkerConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Config {
    /// Build the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Config::default();

        if let Some(addr) = env_string("BIND_ADDR") {
            cfg.bind_addr = addr;
        }
        if let Some(url) = env_string("PUBLIC_BASE_URL") {
            cfg.public_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(path) = env_string("METADATA_PATH") {
            cfg.metadata_path = PathBuf::from(path);
        }

        if let Some(provider) = env_string("STORAGE_PROVIDER") {
            cfg.storage.backend = match provider.as_str() {
                "local" => StorageBackend::Local,
                "s3" => StorageBackend::S3,
                "memory" => StorageBackend::Memory,
                other => {
                    return Err(ConfigError::InvalidValue {
                        name: "STORAGE_PROVIDER".to_string(),
                        value: other.to_string(),
                    })
                }
            };
        }
        if let Some(root) = env_string("STORAGE_LOCAL_ROOT") {
            cfg.storage.local_root = PathBuf::from(root);
        }
        if cfg.storage.backend == StorageBackend::S3 {
            cfg.storage.s3.bucket = env_string("S3_BUCKET").ok_or(ConfigError::Missing("S3_BUCKET"))?;
            cfg.storage.s3.access_key_id =
                env_string("S3_ACCESS_KEY_ID").ok_or(ConfigError::Missing("S3_ACCESS_KEY_ID"))?;
            cfg.storage.s3.secret_access_key = env_string("S3_SECRET_ACCESS_KEY")
                .ok_or(ConfigError::Missing("S3_SECRET_ACCESS_KEY"))?;
            if let Some(region) = env_string("S3_REGION") {
                cfg.storage.s3.region = region;
            }
            cfg.storage.s3.endpoint = env_string("S3_ENDPOINT");
        }

        if let Some(v) = env_parse::<u64>("UPLOAD_CHUNK_SIZE")? {
            cfg.upload.chunk_size = v;
        }
        if let Some(v) = env_parse::<u64>("UPLOAD_PART_SIZE")? {
            cfg.upload.part_size = v;
        }
        if cfg.upload.part_size < UploadConfig::MIN_PART_SIZE {
            return Err(ConfigError::InvalidValue {
                name: "UPLOAD_PART_SIZE".to_string(),
                value: cfg.upload.part_size.to_string(),
            });
        }
        if let Some(v) = env_parse::<i64>("UPLOAD_MAX_FILE_SIZE_FREE")? {
            cfg.upload.max_file_size_free = v;
        }
        if let Some(v) = env_parse::<i64>("UPLOAD_MAX_FILE_SIZE_PREMIUM")? {
            cfg.upload.max_file_size_premium = v;
        }
        if let Some(v) = env_parse::<u64>("UPLOAD_SESSION_TTL_SECS")? {
            cfg.upload.session_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("PRESIGNED_EXPIRY_SECONDS")? {
            cfg.upload.presigned_expiry = Duration::from_secs(v);
        }
        if let Some(list) = env_string("UPLOAD_ALLOWED_MIME_TYPES") {
            cfg.upload.allowed_mime_types = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(v) = env_parse::<i64>("FILE_EXPIRY_DAYS_FREE")? {
            cfg.lifecycle.expiry_days_free = v;
        }
        if let Some(v) = env_parse::<usize>("FILE_EXPIRY_DOWNLOAD_THRESHOLD")? {
            cfg.lifecycle.download_threshold = v;
        }
        if let Some(v) = env_parse::<i64>("FILE_EXPIRY_DAYS_AFTER_THRESHOLD")? {
            cfg.lifecycle.days_after_threshold = v;
        }
        if let Some(v) = env_parse::<i64>("FILE_INACTIVITY_DAYS")? {
            cfg.lifecycle.inactivity_days = v;
        }
        if let Some(v) = env_parse::<i64>("TIER_MIGRATION_HOT_TO_COLD_DAYS")? {
            cfg.lifecycle.hot_to_cold_days = v;
        }
        if let Some(v) = env_parse::<u64>("TIER_MIGRATION_COLD_TO_HOT_DOWNLOADS")? {
            cfg.lifecycle.cold_to_hot_downloads = v;
        }
        if let Some(v) = env_parse::<usize>("FILE_UNIQUE_IP_CAP")? {
            cfg.lifecycle.unique_ip_cap = v;
        }

        if let Some(v) = env_parse::<u64>("WORKER_EXPIRY_INTERVAL_SECS")? {
            cfg.workers.expiry_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("WORKER_INACTIVITY_INTERVAL_SECS")? {
            cfg.workers.inactivity_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("WORKER_TIERING_INTERVAL_SECS")? {
            cfg.workers.tiering_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("WORKER_PREMIUM_INTERVAL_SECS")? {
            cfg.workers.premium_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("WORKER_SESSION_GC_INTERVAL_SECS")? {
            cfg.workers.session_gc_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<usize>("WORKER_BATCH_SIZE")? {
            cfg.workers.batch_size = v;
        }

        if let Some(v) = env_parse::<u64>("RATE_LIMIT_WINDOW_SECS")? {
            cfg.rate_limit.window = Duration::from_secs(v);
        }
        apply_action_limits(&mut cfg.rate_limit.upload, "UPLOAD")?;
        apply_action_limits(&mut cfg.rate_limit.download, "DOWNLOAD")?;
        apply_action_limits(&mut cfg.rate_limit.auth, "AUTH")?;

        Ok(cfg)
    }
}

fn apply_action_limits(limits: &mut ActionLimits, action: &str) -> Result<(), ConfigError> {
    let parse = |role: &str| -> Result<Option<u64>, ConfigError> {
        env_parse::<u64>(&format!("RATE_LIMIT_{}_{}", action, role))
    };
    if let Some(v) = parse("FREE")? {
        limits.free = v;
    }
    if let Some(v) = parse("PREMIUM")? {
        limits.premium = v;
    }
    if let Some(v) = parse("ADMIN")? {
        limits.admin = v;
    }
    if let Some(v) = parse("ANONYMOUS")? {
        limits.anonymous = v;
    }
    Ok(())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env_string(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name: name.to_string(), value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.upload.chunk_size, 16 * 1024 * 1024);
        assert!(cfg.upload.part_size >= UploadConfig::MIN_PART_SIZE);
        assert_eq!(cfg.lifecycle.expiry_days_free, 5);
        assert_eq!(cfg.lifecycle.download_threshold, 5);
        assert_eq!(cfg.workers.batch_size, 100);
        assert_eq!(cfg.quota.premium_max_storage, -1);
    }

    #[test]
    fn anonymous_uploads_disabled_by_default() {
        assert_eq!(RateLimitConfig::default().upload.anonymous, 0);
    }
}
