//! Shared fixture: the full service stack over in-process backends

use std::sync::Arc;

use cloudstore::config::{LifecycleConfig, QuotaDefaults, UploadConfig};
use cloudstore::metadata::{MemoryStore, Repositories};
use cloudstore::models::{AccountStatus, Principal, Role, User};
use cloudstore::quota::QuotaLedger;
use cloudstore::storage::{MemoryStorage, StorageProvider};
use cloudstore::upload::UploadManager;

pub const BASE_URL: &str = "http://files.test";

pub struct TestEnv {
    pub storage: Arc<MemoryStorage>,
    pub provider: Arc<dyn StorageProvider>,
    pub repos: Repositories,
    pub quota: Arc<QuotaLedger>,
    pub uploads: Arc<UploadManager>,
    pub upload_cfg: UploadConfig,
    pub lifecycle_cfg: LifecycleConfig,
}

/// Stack with a tiny chunk size so multi-chunk flows stay cheap
pub fn env_with(mut upload_cfg: UploadConfig) -> TestEnv {
    let store = Arc::new(MemoryStore::new());
    let storage = Arc::new(MemoryStorage::new());
    let provider: Arc<dyn StorageProvider> = storage.clone();
    let repos = Repositories::new(store.clone());
    let quota = Arc::new(QuotaLedger::new(store, QuotaDefaults::default(), &upload_cfg));
    let lifecycle_cfg = LifecycleConfig::default();
    if upload_cfg.chunk_size == 0 {
        upload_cfg.chunk_size = 1024;
    }
    let uploads = Arc::new(UploadManager::new(
        provider.clone(),
        repos.clone(),
        quota.clone(),
        upload_cfg.clone(),
        lifecycle_cfg.clone(),
        BASE_URL,
    ));
    TestEnv { storage, provider, repos, quota, uploads, upload_cfg, lifecycle_cfg }
}

pub fn env() -> TestEnv {
    env_with(UploadConfig { chunk_size: 1024, ..UploadConfig::default() })
}

pub async fn user(env: &TestEnv, role: Role) -> (User, Principal) {
    let user = User::new(format!("{}@test", uuid()), uuid(), role);
    env.repos.users.put(&user).await.unwrap();
    env.quota.get_or_create(&user.id, role, None).await.unwrap();
    let principal = Principal::new(user.id.clone(), role, AccountStatus::Active);
    (user, principal)
}

fn uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
