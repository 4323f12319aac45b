//! 过期暂存目录清理的后台任务。

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::STAGING_SWEEP_INTERVAL_SECS;
use crate::storage::Storage;
use crate::upload::{UploadConfig, sweep_stale_staging};

/// 启动后台任务:定期清理超过 TTL 的暂存目录。
pub fn spawn_background_tasks(storage: Arc<Storage>, upload: Arc<UploadConfig>) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(STAGING_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Err(err) = sweep_stale_staging(&storage, &upload).await {
                warn!(error = %err, "staging sweep failed");
            }
        }
    });
}
