//! Cross-module flows: upload, share, abuse, lifecycle cleanup

mod common;

use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use cloudstore::download::DownloadService;
use cloudstore::error::ServiceError;
use cloudstore::lifecycle::{ExpiryJob, LifecycleJob, SessionGcJob};
use cloudstore::models::Role;
use cloudstore::storage::StorageTier;
use cloudstore::upload::InitRequest;

use common::{env, user};

fn init_request(name: &str, size: u64) -> InitRequest {
    serde_json::from_value(serde_json::json!({
        "filename": name,
        "size": size,
    }))
    .unwrap()
}

#[tokio::test]
async fn shared_file_is_throttled_then_expired_and_collected() {
    let env = env();
    let (_, principal) = user(&env, Role::Free).await;
    let downloads = DownloadService::new(
        env.provider.clone(),
        env.repos.clone(),
        env.lifecycle_cfg.clone(),
    );

    // Upload a one-chunk file as a free user.
    let init = env.uploads.init(&principal, init_request("meme.png", 512)).await.unwrap();
    env.uploads
        .put_chunk(&principal, &init.session_id, 0, Bytes::from(vec![3u8; 512]), None)
        .await
        .unwrap();
    let done = env.uploads.complete(&principal, &init.session_id).await.unwrap();
    let original_expiry =
        env.repos.files.get(&done.file_id).await.unwrap().unwrap().expires_at.unwrap();

    // Five distinct IPs hit the link; the expiry is pulled in.
    for i in 0..5 {
        downloads.download(&done.file_id, None, &format!("198.51.100.{}", i), None).await.unwrap();
    }
    let shortened =
        env.repos.files.get(&done.file_id).await.unwrap().unwrap().expires_at.unwrap();
    assert!(shortened < original_expiry);

    // An owner download afterwards changes nothing.
    downloads.download(&done.file_id, Some(&principal), "198.51.100.77", None).await.unwrap();
    let after_owner =
        env.repos.files.get(&done.file_id).await.unwrap().unwrap().expires_at.unwrap();
    assert_eq!(after_owner, shortened);

    // Force the clock past the shortened expiry and run the worker.
    env.repos
        .files
        .mutate(&done.file_id, |f| f.expires_at = Some(Utc::now() - ChronoDuration::minutes(1)))
        .await
        .unwrap();
    let job = ExpiryJob::new(
        env.provider.clone(),
        env.repos.clone(),
        env.quota.clone(),
        env.lifecycle_cfg.clone(),
        100,
    );
    assert!(job.run_once().await.unwrap() >= 1);

    // Object gone, record soft-deleted, ledger drained, download 404s.
    let record = env.repos.files.get(&done.file_id).await.unwrap().unwrap();
    assert!(record.is_deleted);
    assert!(!env.provider.exists(&record.storage_key, StorageTier::Hot).await.unwrap());
    let quota = env.quota.get(&principal.user_id).await.unwrap().unwrap();
    assert_eq!(quota.usage.storage_bytes, 0);
    let err = downloads.download(&done.file_id, None, "198.51.100.1", None).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn ledger_matches_live_bytes_after_lifecycle() {
    let env = env();
    let (_, principal) = user(&env, Role::Free).await;

    for (name, size) in [("a.bin", 512u64), ("b.bin", 1024), ("c.bin", 256)] {
        let init = env.uploads.init(&principal, init_request(name, size)).await.unwrap();
        for index in 0..init.total_chunks {
            let len = if index + 1 == init.total_chunks && size % 1024 != 0 {
                (size % 1024) as usize
            } else {
                1024.min(size as usize)
            };
            env.uploads
                .put_chunk(&principal, &init.session_id, index, Bytes::from(vec![1u8; len]), None)
                .await
                .unwrap();
        }
        env.uploads.complete(&principal, &init.session_id).await.unwrap();
    }

    // Expire one of them and run the worker.
    let files = env.repos.files.list_by_user(&principal.user_id).await.unwrap();
    let victim = files.iter().find(|f| f.size == 1024).unwrap();
    env.repos
        .files
        .mutate(&victim.id, |f| f.expires_at = Some(Utc::now() - ChronoDuration::minutes(1)))
        .await
        .unwrap();
    ExpiryJob::new(
        env.provider.clone(),
        env.repos.clone(),
        env.quota.clone(),
        env.lifecycle_cfg.clone(),
        100,
    )
    .run_once()
    .await
    .unwrap();

    let live = env.repos.files.live_bytes_of(&principal.user_id).await.unwrap();
    let quota = env.quota.get(&principal.user_id).await.unwrap().unwrap();
    assert_eq!(live, 512 + 256);
    assert_eq!(quota.usage.storage_bytes, live);
}

#[tokio::test]
async fn session_gc_releases_abandoned_uploads() {
    let env = env();
    let (_, principal) = user(&env, Role::Free).await;

    let init = env.uploads.init(&principal, init_request("left.bin", 2048)).await.unwrap();
    env.uploads
        .put_chunk(&principal, &init.session_id, 0, Bytes::from(vec![1u8; 1024]), None)
        .await
        .unwrap();

    // Session never completes and its TTL lapses.
    env.repos
        .sessions
        .mutate(&init.session_id, |s| s.expires_at = Utc::now() - ChronoDuration::minutes(1))
        .await
        .unwrap();

    let gc = SessionGcJob::new(env.uploads.clone(), 100);
    assert_eq!(gc.run_once().await.unwrap(), 1);
    assert!(env.repos.sessions.get(&init.session_id).await.unwrap().is_none());

    // A second sweep finds nothing.
    assert_eq!(gc.run_once().await.unwrap(), 0);

    // Completed sessions are never collected.
    let keep = env.uploads.init(&principal, init_request("kept.bin", 0)).await.unwrap();
    env.uploads.complete(&principal, &keep.session_id).await.unwrap();
    env.repos
        .sessions
        .mutate(&keep.session_id, |s| s.expires_at = Utc::now() - ChronoDuration::minutes(1))
        .await
        .unwrap();
    assert_eq!(gc.run_once().await.unwrap(), 0);
    assert!(env.repos.sessions.get(&keep.session_id).await.unwrap().is_some());
}
