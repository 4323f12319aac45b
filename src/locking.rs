//! 上传锁:进程内按会话互斥 + 分片写入期间的哨兵标记文件。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tokio::time;

/// Manages asynchronous mutexes keyed by upload session, so at most one
/// handler runs the completion check and assembly for a given upload.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockManager {
    /// 创建新的锁管理器实例。
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 在给定超时时间内获取会话锁,超时返回 Err。
    pub async fn lock_upload_with_timeout(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<tokio::sync::OwnedMutexGuard<()>, ()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| ())
    }
}

/// 分片写入期间存在的哨兵标记文件。存在即表示"写入进行中",
/// 合并器据此跳过尚未落盘的分片。
pub struct LockMarker {
    path: PathBuf,
    armed: bool,
}

impl LockMarker {
    /// 创建标记文件。标记是建议性的,不要求独占创建。
    pub async fn acquire(path: &Path) -> std::io::Result<Self> {
        fs::File::create(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            armed: true,
        })
    }

    /// 写入结束后移除标记,成功与失败路径都必须调用。
    pub async fn release(mut self) {
        let _ = fs::remove_file(&self.path).await;
        self.armed = false;
    }
}

impl Drop for LockMarker {
    fn drop(&mut self) {
        // panic 等未显式 release 的退出路径的兜底清理。
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LockManager, LockMarker};
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn marker_exists_until_released() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join(".lock_1");

        let marker = LockMarker::acquire(&path).await.expect("acquire");
        assert!(path.is_file());
        marker.release().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn marker_removed_on_drop() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join(".lock_2");

        let marker = LockMarker::acquire(&path).await.expect("acquire");
        drop(marker);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn second_holder_times_out_while_locked() {
        let manager = LockManager::new();
        let guard = manager
            .lock_upload_with_timeout("ns/u1", Duration::from_millis(50))
            .await
            .expect("first lock");

        let blocked = manager
            .lock_upload_with_timeout("ns/u1", Duration::from_millis(50))
            .await;
        assert!(blocked.is_err());

        drop(guard);
        let reacquired = manager
            .lock_upload_with_timeout("ns/u1", Duration::from_millis(50))
            .await;
        assert!(reacquired.is_ok());
    }
}
