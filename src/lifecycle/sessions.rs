//! Upload-session GC
//!
//! Thin wrapper: the sweep itself lives on the upload manager, which knows
//! how to release each variant's staged storage.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ServiceResult;
use crate::upload::UploadManager;

use super::LifecycleJob;

pub struct SessionGcJob {
    uploads: Arc<UploadManager>,
    batch: usize,
}

impl SessionGcJob {
    pub fn new(uploads: Arc<UploadManager>, batch: usize) -> Self {
        Self { uploads, batch }
    }
}

#[async_trait]
impl LifecycleJob for SessionGcJob {
    fn name(&self) -> &'static str {
        "session-gc"
    }

    async fn run_once(&self) -> ServiceResult<usize> {
        self.uploads.gc_expired_sessions(self.batch).await
    }
}
